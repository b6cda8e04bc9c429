//! Document handlers

use portal_authz::content;
use portal_storage::{
    CreateDocumentParams, Document, DocumentChanges, DocumentId, TagId, TeamId, UserId,
};
use serde::Deserialize;

use crate::blobs::{document_extension, BlobRef};
use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{publishing_scope, require_tags, required, required_opt, ContentFilter};
use crate::server::PortalServer;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// `None` publishes organization-wide.
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
}

/// Upload a document. The stored blob keeps the extension of `original_name`.
pub async fn create_document(
    server: &PortalServer,
    actor_id: &UserId,
    req: CreateDocumentRequest,
    original_name: &str,
    bytes: &[u8],
) -> Result<Document, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let organization_id = publishing_scope(server, &ctx, req.team_id).await?;

    let title = required("title", &req.title)?;
    let original_name = required("file name", original_name)?;
    if bytes.is_empty() {
        return Err(ServiceError::validation("document file is empty"));
    }
    require_tags(server, &req.tag_ids).await?;

    let file = server
        .blobs
        .store(bytes, &document_extension(&original_name))
        .await?
        .into_string();

    let created = server
        .store
        .create_document(&CreateDocumentParams {
            title,
            description: req.description.trim().to_string(),
            file: file.clone(),
            original_name,
            tag_ids: req.tag_ids,
            organization_id,
            team_id: req.team_id,
            author_id: *actor_id,
        })
        .await;

    match created {
        Ok(document) => {
            tracing::info!(
                document_id = %document.id,
                team_id = ?document.team_id,
                "document uploaded"
            );
            Ok(document)
        }
        Err(e) => {
            server.discard_blob(Some(file)).await;
            Err(e.into())
        }
    }
}

pub async fn get_document(
    server: &PortalServer,
    actor_id: &UserId,
    document_id: &DocumentId,
) -> Result<Document, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let document = server
        .store
        .get_document(document_id)
        .await
        .entity("document")?;
    content::authorize_view(&ctx, &document.organization_id, document.team_id)?;
    Ok(document)
}

/// A document's file contents under its original name.
#[derive(Debug, Clone)]
pub struct DocumentDownload {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

pub async fn download_document(
    server: &PortalServer,
    actor_id: &UserId,
    document_id: &DocumentId,
) -> Result<DocumentDownload, ServiceError> {
    let document = get_document(server, actor_id, document_id).await?;
    let bytes = server.blobs.read(&BlobRef::from(document.file)).await?;
    Ok(DocumentDownload {
        original_name: document.original_name,
        bytes,
    })
}

/// Newest first. Viewers without an organization get an empty list.
pub async fn list_documents(
    server: &PortalServer,
    actor_id: &UserId,
    filter: ContentFilter,
) -> Result<Vec<Document>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let Some((org_id, visibility)) = content::visibility(&ctx) else {
        return Ok(Vec::new());
    };
    let query = filter.into_query(org_id, visibility);
    Ok(server.store.list_documents(&query).await?)
}

pub async fn update_document(
    server: &PortalServer,
    actor_id: &UserId,
    document_id: &DocumentId,
    req: UpdateDocumentRequest,
) -> Result<Document, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let document = server
        .store
        .get_document(document_id)
        .await
        .entity("document")?;
    content::authorize_modify(&ctx, &document.organization_id, &document.author_id)?;

    let changes = DocumentChanges {
        title: required_opt("title", req.title.as_deref())?,
        description: req.description.map(|d| d.trim().to_string()),
        tag_ids: req.tag_ids,
    };
    if let Some(tag_ids) = &changes.tag_ids {
        require_tags(server, tag_ids).await?;
    }
    server
        .store
        .update_document(document_id, &changes)
        .await
        .entity("document")
}

/// Delete the record, then its file.
pub async fn delete_document(
    server: &PortalServer,
    actor_id: &UserId,
    document_id: &DocumentId,
) -> Result<(), ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let document = server
        .store
        .get_document(document_id)
        .await
        .entity("document")?;
    content::authorize_modify(&ctx, &document.organization_id, &document.author_id)?;

    server
        .store
        .delete_document(document_id)
        .await
        .entity("document")?;
    server.discard_blob(Some(document.file)).await;
    tracing::info!(document_id = %document_id, "document deleted");
    Ok(())
}
