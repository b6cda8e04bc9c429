//! News handlers

use portal_authz::{authorize, content, Action};
use portal_storage::{CreateNewsParams, News, NewsChanges, NewsId, Role, TagId, TeamId, UserId};
use serde::Deserialize;

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{
    publishing_scope, require_tags, required, required_opt, ContentFilter, UserSummary,
};
use crate::server::PortalServer;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNewsRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// `None` publishes organization-wide.
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateNewsRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
}

pub async fn create_news(
    server: &PortalServer,
    actor_id: &UserId,
    req: CreateNewsRequest,
    image: Option<&[u8]>,
) -> Result<News, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let organization_id = publishing_scope(server, &ctx, req.team_id).await?;

    let title = required("title", &req.title)?;
    let body = required("content", &req.content)?;
    require_tags(server, &req.tag_ids).await?;
    let image = match image {
        Some(bytes) => Some(server.store_image(bytes).await?.into_string()),
        None => None,
    };

    let created = server
        .store
        .create_news(&CreateNewsParams {
            title,
            content: body,
            image: image.clone(),
            tag_ids: req.tag_ids,
            organization_id,
            team_id: req.team_id,
            author_id: *actor_id,
        })
        .await;

    match created {
        Ok(news) => {
            tracing::info!(news_id = %news.id, team_id = ?news.team_id, "news published");
            Ok(news)
        }
        Err(e) => {
            server.discard_blob(image).await;
            Err(e.into())
        }
    }
}

pub async fn get_news(
    server: &PortalServer,
    actor_id: &UserId,
    news_id: &NewsId,
) -> Result<News, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let news = server.store.get_news(news_id).await.entity("news post")?;
    content::authorize_view(&ctx, &news.organization_id, news.team_id)?;
    Ok(news)
}

/// Newest first. Viewers without an organization get an empty list.
pub async fn list_news(
    server: &PortalServer,
    actor_id: &UserId,
    filter: ContentFilter,
) -> Result<Vec<News>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let Some((org_id, visibility)) = content::visibility(&ctx) else {
        return Ok(Vec::new());
    };
    let query = filter.into_query(org_id, visibility);
    Ok(server.store.list_news(&query).await?)
}

/// Members who can publish (Manager and up), for the author filter. By name.
pub async fn list_authors(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<UserSummary>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    authorize(&ctx, &Action::ListMembers(&org_id))?;
    let mut authors: Vec<UserSummary> = server
        .store
        .list_organization_users(&org_id)
        .await?
        .iter()
        .filter(|u| u.role.at_least(Role::Manager))
        .map(UserSummary::from)
        .collect();
    authors.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    Ok(authors)
}

/// Author or Admin. A new image replaces (and deletes) the old one.
pub async fn update_news(
    server: &PortalServer,
    actor_id: &UserId,
    news_id: &NewsId,
    req: UpdateNewsRequest,
    image: Option<&[u8]>,
) -> Result<News, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let current = server.store.get_news(news_id).await.entity("news post")?;
    content::authorize_modify(&ctx, &current.organization_id, &current.author_id)?;

    let mut changes = NewsChanges {
        title: required_opt("title", req.title.as_deref())?,
        content: required_opt("content", req.content.as_deref())?,
        image: None,
        tag_ids: req.tag_ids,
    };
    if let Some(tag_ids) = &changes.tag_ids {
        require_tags(server, tag_ids).await?;
    }
    if let Some(bytes) = image {
        changes.image = Some(server.store_image(bytes).await?.into_string());
    }

    match server.store.update_news(news_id, &changes).await {
        Ok(news) => {
            if changes.image.is_some() {
                server.discard_blob(current.image).await;
            }
            Ok(news)
        }
        Err(e) => {
            server.discard_blob(changes.image).await;
            Err::<News, _>(e).entity("news post")
        }
    }
}

/// Delete the record, then its image.
pub async fn delete_news(
    server: &PortalServer,
    actor_id: &UserId,
    news_id: &NewsId,
) -> Result<(), ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let news = server.store.get_news(news_id).await.entity("news post")?;
    content::authorize_modify(&ctx, &news.organization_id, &news.author_id)?;

    server
        .store
        .delete_news(news_id)
        .await
        .entity("news post")?;
    server.discard_blob(news.image).await;
    tracing::info!(news_id = %news_id, "news deleted");
    Ok(())
}
