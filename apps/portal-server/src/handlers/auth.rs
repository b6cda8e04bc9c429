//! Auth handlers: register, login

use portal_storage::{CreateUserParams, StoreError, User};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::handlers::required;
use crate::server::PortalServer;

pub const MIN_PASSWORD_LEN: usize = 6;

const BAD_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

fn normalize_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ServiceError::validation("a valid email address is required")),
    }
}

/// Create an account with role `User` and no organization.
pub async fn register(
    server: &PortalServer,
    req: RegisterRequest,
) -> Result<AuthResponse, ServiceError> {
    let email = normalize_email(&req.email)?;
    let full_name = required("full name", &req.full_name)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = server.credentials.hash(&req.password)?;
    let user = server
        .store
        .create_user(&CreateUserParams {
            email,
            password_hash,
            full_name,
        })
        .await
        .map_err(|e| match e {
            StoreError::AlreadyExists => {
                ServiceError::invalid("an account with this email already exists")
            }
            other => other.into(),
        })?;

    tracing::info!(user_id = %user.id, "user registered");
    let token = server.tokens.issue(&user.id, user.role)?;
    Ok(AuthResponse { token, user })
}

/// Exchange credentials for a bearer token.
///
/// Unknown email and wrong password fail identically.
pub async fn login(server: &PortalServer, req: LoginRequest) -> Result<AuthResponse, ServiceError> {
    let email = req.email.trim().to_lowercase();
    let user = match server.store.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ServiceError::forbidden(BAD_CREDENTIALS)),
        Err(e) => return Err(e.into()),
    };

    if !server.credentials.verify(&req.password, &user.password_hash) {
        return Err(ServiceError::forbidden(BAD_CREDENTIALS));
    }

    let token = server.tokens.issue(&user.id, user.role)?;
    Ok(AuthResponse { token, user })
}
