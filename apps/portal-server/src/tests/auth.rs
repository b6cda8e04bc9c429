//! Registration, login and bearer token tests.

use super::common::*;
use crate::error::ServiceError;
use crate::handlers::auth::{login, register, LoginRequest, RegisterRequest};
use portal_storage::{Affiliation, Role};

fn registration(email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        full_name: "Ann Example".to_string(),
    }
}

#[tokio::test]
async fn test_register_then_login() {
    let (server, _uploads) = create_test_server().await;

    let registered = register(&server, registration(" Ann@Example.com ", "hunter22"))
        .await
        .unwrap();
    assert_eq!(registered.user.email, "ann@example.com");
    assert_eq!(registered.user.role, Role::User);
    assert_eq!(registered.user.organization, Affiliation::Unaffiliated);
    assert_eq!(
        server.authenticate(&registered.token).unwrap(),
        registered.user.id
    );

    let logged_in = login(
        &server,
        LoginRequest {
            email: "ANN@example.com".to_string(),
            password: "hunter22".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(logged_in.user.id, registered.user.id);
    let bearer = format!("Bearer {}", logged_in.token);
    assert_eq!(server.authenticate(&bearer).unwrap(), registered.user.id);
}

#[tokio::test]
async fn test_login_failures_are_uniform() {
    let (server, _uploads) = create_test_server().await;
    register(&server, registration("ann@example.com", "hunter22"))
        .await
        .unwrap();

    let wrong_password = login(
        &server,
        LoginRequest {
            email: "ann@example.com".to_string(),
            password: "nope-nope".to_string(),
        },
    )
    .await
    .unwrap_err();
    let unknown_email = login(
        &server,
        LoginRequest {
            email: "bob@example.com".to_string(),
            password: "hunter22".to_string(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(wrong_password, ServiceError::Forbidden(_)));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn test_register_validation() {
    let (server, _uploads) = create_test_server().await;

    let short = register(&server, registration("ann@example.com", "123"))
        .await
        .unwrap_err();
    assert!(matches!(short, ServiceError::Validation(_)));

    let bad_email = register(&server, registration("not-an-email", "hunter22"))
        .await
        .unwrap_err();
    assert!(matches!(bad_email, ServiceError::Validation(_)));

    register(&server, registration("ann@example.com", "hunter22"))
        .await
        .unwrap();
    let duplicate = register(&server, registration("ANN@example.com", "hunter22"))
        .await
        .unwrap_err();
    assert!(matches!(duplicate, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn test_garbage_token_rejected() {
    let (server, _uploads) = create_test_server().await;
    assert!(matches!(
        server.authenticate("Bearer not.a.jwt"),
        Err(ServiceError::Forbidden(_))
    ));
}
