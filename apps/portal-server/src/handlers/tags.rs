//! Tag handlers

use portal_authz::{authorize, Action};
use portal_storage::{Tag, UserId};

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::required;
use crate::server::PortalServer;

/// Tags are global; any signed-in user may list them.
pub async fn list_tags(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<Tag>, ServiceError> {
    server.actor(actor_id).await?;
    Ok(server.store.list_tags().await?)
}

pub async fn create_tag(
    server: &PortalServer,
    actor_id: &UserId,
    name: &str,
) -> Result<Tag, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    authorize(&ctx, &Action::CreateTag)?;
    let name = required("tag name", name)?;
    server.store.create_tag(&name).await.entity("tag")
}
