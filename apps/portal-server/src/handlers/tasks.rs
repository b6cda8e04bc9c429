//! Task board handlers

use chrono::{DateTime, Utc};
use portal_authz::{authorize, Action, ActorContext};
use portal_storage::{
    CreateTaskParams, Task, TaskChanges, TaskId, TaskPriority, TaskStatus, Team, TeamId, UserId,
};
use serde::Deserialize;

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{present, required, required_opt};
use crate::server::PortalServer;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_id: Option<UserId>,
}

/// Absent fields are left alone; an explicit `null` clears `due_date` or
/// `assignee_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(deserialize_with = "present")]
    pub assignee_id: Option<Option<UserId>>,
}

impl UpdateTaskRequest {
    fn status_only(&self) -> bool {
        self.status.is_some()
            && *self
                == UpdateTaskRequest {
                    status: self.status,
                    ..Default::default()
                }
    }
}

async fn require_member(
    server: &PortalServer,
    team: &Team,
    assignee_id: &UserId,
) -> Result<(), ServiceError> {
    let assignee = server.store.get_user(assignee_id).await.entity("assignee")?;
    if assignee.team.is(&team.id) {
        Ok(())
    } else {
        Err(ServiceError::invalid(
            "the assignee must be a member of the team",
        ))
    }
}

pub async fn create_task(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    req: CreateTaskRequest,
) -> Result<Task, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let team = server.store.get_team(team_id).await.entity("team")?;
    authorize(&ctx, &Action::ManageTasks(&team))?;

    let title = required("title", &req.title)?;
    if let Some(assignee_id) = &req.assignee_id {
        require_member(server, &team, assignee_id).await?;
    }

    let task = server
        .store
        .create_task(&CreateTaskParams {
            title,
            description: req.description.trim().to_string(),
            priority: req.priority,
            due_date: req.due_date,
            assignee_id: req.assignee_id,
            team_id: team.id,
            organization_id: team.organization_id,
            creator_id: *actor_id,
        })
        .await?;
    tracing::info!(task_id = %task.id, team_id = %team.id, "task created");
    Ok(task)
}

/// Newest first. Team members, the leader and Admins may look.
pub async fn list_tasks(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
) -> Result<Vec<Task>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let team = server.store.get_team(team_id).await.entity("team")?;
    authorize(&ctx, &Action::ViewTasks(&team))?;
    Ok(server.store.list_tasks(team_id).await?)
}

async fn task_and_team(
    server: &PortalServer,
    task_id: &TaskId,
) -> Result<(Task, Team), ServiceError> {
    let task = server.store.get_task(task_id).await.entity("task")?;
    let team = server.store.get_team(&task.team_id).await.entity("team")?;
    Ok((task, team))
}

/// The leader or an Admin may change anything; the assignee may move the
/// status of their own task.
pub async fn update_task(
    server: &PortalServer,
    actor_id: &UserId,
    task_id: &TaskId,
    req: UpdateTaskRequest,
) -> Result<Task, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let (task, team) = task_and_team(server, task_id).await?;
    if !assignee_moves_status(&ctx, &task, &req) {
        authorize(&ctx, &Action::ManageTasks(&team))?;
    }

    if let Some(Some(assignee_id)) = &req.assignee_id {
        require_member(server, &team, assignee_id).await?;
    }

    let changes = TaskChanges {
        title: required_opt("title", req.title.as_deref())?,
        description: req.description.map(|d| d.trim().to_string()),
        status: req.status,
        priority: req.priority,
        due_date: req.due_date,
        assignee_id: req.assignee_id,
    };
    server
        .store
        .update_task(task_id, &changes)
        .await
        .entity("task")
}

fn assignee_moves_status(ctx: &ActorContext, task: &Task, req: &UpdateTaskRequest) -> bool {
    task.assignee_id == Some(ctx.id)
        && ctx.team.is(&task.team_id)
        && req.status_only()
}

pub async fn delete_task(
    server: &PortalServer,
    actor_id: &UserId,
    task_id: &TaskId,
) -> Result<(), ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let (_, team) = task_and_team(server, task_id).await?;
    authorize(&ctx, &Action::ManageTasks(&team))?;
    server.store.delete_task(task_id).await.entity("task")?;
    tracing::info!(task_id = %task_id, "task deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_update() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"status":"done"}"#).unwrap();
        assert!(req.status_only());

        let req: UpdateTaskRequest =
            serde_json::from_str(r#"{"status":"done","title":"x"}"#).unwrap();
        assert!(!req.status_only());

        assert!(!UpdateTaskRequest::default().status_only());
    }

    #[test]
    fn test_explicit_null_clears_assignee() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"assignee_id":null}"#).unwrap();
        assert_eq!(req.assignee_id, Some(None));

        let req: UpdateTaskRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.assignee_id, None);
    }
}
