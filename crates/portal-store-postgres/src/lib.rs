use std::collections::HashMap;

use chrono::{DateTime, Utc};
use portal_storage::{
    Affiliation, ContentQuery, CreateDocumentParams, CreateInviteParams, CreateNewsParams,
    CreateOrganizationParams, CreateTaskParams, CreateTeamParams, CreateUserParams, Document,
    DocumentChanges, DocumentId, Invite, InviteId, News, NewsChanges, NewsId, Organization,
    OrganizationChanges, OrganizationId, ProfileChanges, Role, Store, StoreError, StoreTx, Tag,
    TagId, Task, TaskChanges, TaskId, TaskStatus, Team, TeamChanges, TeamId, TeamVisibility, User,
    UserId,
};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;


static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed [`Store`]. Transactions take `FOR UPDATE` row locks.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;
        tracing::debug!("postgres store ready");

        Ok(Self { pool })
    }
}

pub struct PostgresTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

// ───────────────────────────────────── Helpers ────────────────────────────────────────

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn write_err(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::AlreadyExists,
        Some(db) if db.is_foreign_key_violation() => StoreError::NotFound,
        Some(db) if db.is_check_violation() => StoreError::Conflict,
        _ => StoreError::Backend(e.to_string()),
    }
}

fn require_row(rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

// ───────────────────────────────────── Rows ───────────────────────────────────────────

const USER_COLUMNS: &str = "id, email, password_hash, full_name, avatar, bio, phone, role, \
     organization_id, team_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    full_name: String,
    avatar: Option<String>,
    bio: String,
    phone: String,
    role: i64,
    organization_id: Option<Uuid>,
    team_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        Ok(User {
            id: UserId(self.id),
            email: self.email,
            password_hash: self.password_hash,
            full_name: self.full_name,
            avatar: self.avatar,
            bio: self.bio,
            phone: self.phone,
            role: Role::try_from(self.role).map_err(backend)?,
            organization: self.organization_id.map(OrganizationId).into(),
            team: self.team_id.map(TeamId).into(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_users(rows: Vec<UserRow>) -> Result<Vec<User>, StoreError> {
    rows.into_iter().map(UserRow::into_user).collect()
}

const ORGANIZATION_COLUMNS: &str = "id, name, description, avatar, owner_id, created_at";

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    description: String,
    avatar: Option<String>,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: OrganizationId(row.id),
            name: row.name,
            description: row.description,
            avatar: row.avatar,
            owner_id: UserId(row.owner_id),
            created_at: row.created_at,
        }
    }
}

const TEAM_COLUMNS: &str =
    "id, name, description, avatar, organization_id, leader_id, created_at";

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: Uuid,
    name: String,
    description: String,
    avatar: Option<String>,
    organization_id: Uuid,
    leader_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Team {
            id: TeamId(row.id),
            name: row.name,
            description: row.description,
            avatar: row.avatar,
            organization_id: OrganizationId(row.organization_id),
            leader_id: row.leader_id.map(UserId),
            created_at: row.created_at,
        }
    }
}

const INVITE_COLUMNS: &str =
    "id, token, organization_id, created_by, expires_at, max_uses, uses, created_at";

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: Uuid,
    token: String,
    organization_id: Uuid,
    created_by: Uuid,
    expires_at: DateTime<Utc>,
    max_uses: i64,
    uses: i64,
    created_at: DateTime<Utc>,
}

impl From<InviteRow> for Invite {
    fn from(row: InviteRow) -> Self {
        Invite {
            id: InviteId(row.id),
            token: row.token,
            organization_id: OrganizationId(row.organization_id),
            created_by: UserId(row.created_by),
            expires_at: row.expires_at,
            max_uses: row.max_uses,
            uses: row.uses,
            created_at: row.created_at,
        }
    }
}

const NEWS_COLUMNS: &str = "c.id, c.title, c.content, c.image, c.organization_id, c.team_id, \
     c.author_id, c.created_at, c.updated_at";

#[derive(sqlx::FromRow)]
struct NewsRow {
    id: Uuid,
    title: String,
    content: String,
    image: Option<String>,
    organization_id: Uuid,
    team_id: Option<Uuid>,
    author_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NewsRow {
    fn into_news(self, tags: Vec<Tag>) -> News {
        News {
            id: NewsId(self.id),
            title: self.title,
            content: self.content,
            image: self.image,
            tags,
            organization_id: OrganizationId(self.organization_id),
            team_id: self.team_id.map(TeamId),
            author_id: UserId(self.author_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "c.id, c.title, c.description, c.file, c.original_name, \
     c.organization_id, c.team_id, c.author_id, c.created_at";

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    title: String,
    description: String,
    file: String,
    original_name: String,
    organization_id: Uuid,
    team_id: Option<Uuid>,
    author_id: Uuid,
    created_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self, tags: Vec<Tag>) -> Document {
        Document {
            id: DocumentId(self.id),
            title: self.title,
            description: self.description,
            file: self.file,
            original_name: self.original_name,
            tags,
            organization_id: OrganizationId(self.organization_id),
            team_id: self.team_id.map(TeamId),
            author_id: UserId(self.author_id),
            created_at: self.created_at,
        }
    }
}

const TASK_COLUMNS: &str = "id, title, description, status, priority, due_date, assignee_id, \
     team_id, organization_id, creator_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    status: String,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    assignee_id: Option<Uuid>,
    team_id: Uuid,
    organization_id: Uuid,
    creator_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: TaskId(self.id),
            title: self.title,
            description: self.description,
            status: self.status.parse().map_err(backend)?,
            priority: self.priority.parse().map_err(backend)?,
            due_date: self.due_date,
            assignee_id: self.assignee_id.map(UserId),
            team_id: TeamId(self.team_id),
            organization_id: OrganizationId(self.organization_id),
            creator_id: UserId(self.creator_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ───────────────────────────────────── Shared queries ─────────────────────────────────

/// `lock` appends `FOR UPDATE`.
async fn fetch_user(
    conn: &mut PgConnection,
    user_id: &UserId,
    lock: bool,
) -> Result<User, StoreError> {
    let suffix = if lock { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1{suffix}"
    ))
    .bind(user_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?
    .into_user()
}

async fn write_profile(
    conn: &mut PgConnection,
    user_id: &UserId,
    changes: &ProfileChanges,
) -> Result<User, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET full_name = COALESCE($1, full_name), bio = COALESCE($2, bio),
             phone = COALESCE($3, phone), updated_at = now()
         WHERE id = $4",
    )
    .bind(changes.full_name.as_deref())
    .bind(changes.bio.as_deref())
    .bind(changes.phone.as_deref())
    .bind(user_id.0)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    require_row(result.rows_affected())?;

    fetch_user(conn, user_id, false).await
}

async fn fetch_team(conn: &mut PgConnection, team_id: &TeamId, lock: bool) -> Result<Team, StoreError> {
    let suffix = if lock { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, TeamRow>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1{suffix}"
    ))
    .bind(team_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .map(Team::from)
    .ok_or(StoreError::NotFound)
}

async fn fetch_organization(
    conn: &mut PgConnection,
    org_id: &OrganizationId,
) -> Result<Organization, StoreError> {
    sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1"
    ))
    .bind(org_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .map(Organization::from)
    .ok_or(StoreError::NotFound)
}

async fn fetch_task(conn: &mut PgConnection, task_id: &TaskId) -> Result<Task, StoreError> {
    sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
        .bind(task_id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .into_task()
}

async fn swap_avatar(
    pool: &PgPool,
    table: &str,
    id: Uuid,
    avatar: Option<String>,
) -> Result<Option<String>, StoreError> {
    let mut tx = pool.begin().await.map_err(backend)?;

    let previous: Option<Option<String>> = sqlx::query_scalar(&format!(
        "SELECT avatar FROM {table} WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(backend)?;
    let previous = previous.ok_or(StoreError::NotFound)?;

    sqlx::query(&format!("UPDATE {table} SET avatar = $1 WHERE id = $2"))
        .bind(avatar)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

    tx.commit().await.map_err(backend)?;
    Ok(previous)
}

struct ContentTable {
    links: &'static str,
    link_column: &'static str,
    body_column: &'static str,
}

const NEWS: ContentTable = ContentTable {
    links: "news_tags",
    link_column: "news_id",
    body_column: "content",
};

const DOCUMENTS: ContentTable = ContentTable {
    links: "document_tags",
    link_column: "document_id",
    body_column: "description",
};

fn push_content_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    kind: &ContentTable,
    query: &ContentQuery,
) {
    qb.push(" WHERE c.organization_id = ")
        .push_bind(query.organization_id.0);

    match query.visibility {
        TeamVisibility::Everything => {}
        TeamVisibility::OrganizationWideAnd(Some(team)) => {
            qb.push(" AND (c.team_id IS NULL OR c.team_id = ")
                .push_bind(team.0)
                .push(")");
        }
        TeamVisibility::OrganizationWideAnd(None) => {
            qb.push(" AND c.team_id IS NULL");
        }
    }

    if !query.tag_ids.is_empty() {
        let ids: Vec<Uuid> = query.tag_ids.iter().map(|t| t.0).collect();
        qb.push(format_args!(
            " AND EXISTS (SELECT 1 FROM {} x WHERE x.{} = c.id AND x.tag_id = ANY(",
            kind.links, kind.link_column
        ))
        .push_bind(ids)
        .push("))");
    }

    if !query.author_ids.is_empty() {
        let ids: Vec<Uuid> = query.author_ids.iter().map(|u| u.0).collect();
        qb.push(" AND c.author_id = ANY(").push_bind(ids).push(")");
    }

    if !query.team_ids.is_empty() {
        let ids: Vec<Uuid> = query.team_ids.iter().map(|t| t.0).collect();
        qb.push(" AND c.team_id = ANY(").push_bind(ids).push(")");
    }

    if let Some(pattern) = query.search_pattern() {
        qb.push(" AND (lower(c.title) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
        qb.push(format_args!(" OR lower(c.{}) LIKE ", kind.body_column))
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
        qb.push(format_args!(
            " OR EXISTS (SELECT 1 FROM {} x JOIN tags t ON t.id = x.tag_id \
             WHERE x.{} = c.id AND lower(t.name) LIKE ",
            kind.links, kind.link_column
        ))
        .push_bind(pattern)
        .push(" ESCAPE '\\'))");
    }

    qb.push(" ORDER BY c.created_at DESC, c.id DESC");
}

async fn load_tags(
    conn: &mut PgConnection,
    kind: &ContentTable,
    item_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Tag>>, StoreError> {
    let mut by_item: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    if item_ids.is_empty() {
        return Ok(by_item);
    }

    let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(&format!(
        "SELECT x.{col}, t.id, t.name FROM {links} x JOIN tags t ON t.id = x.tag_id
         WHERE x.{col} = ANY($1) ORDER BY t.name",
        col = kind.link_column,
        links = kind.links
    ))
    .bind(item_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    for (item, tag_id, name) in rows {
        by_item.entry(item).or_default().push(Tag {
            id: TagId(tag_id),
            name,
        });
    }
    Ok(by_item)
}

async fn replace_tags(
    conn: &mut PgConnection,
    kind: &ContentTable,
    item_id: Uuid,
    tag_ids: &[TagId],
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "DELETE FROM {} WHERE {} = $1",
        kind.links, kind.link_column
    ))
    .bind(item_id)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;

    for tag in tag_ids {
        sqlx::query(&format!(
            "INSERT INTO {}({}, tag_id) VALUES($1, $2) ON CONFLICT DO NOTHING",
            kind.links, kind.link_column
        ))
        .bind(item_id)
        .bind(tag.0)
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
    }
    Ok(())
}

async fn fetch_news(conn: &mut PgConnection, news_id: &NewsId) -> Result<News, StoreError> {
    let row = sqlx::query_as::<_, NewsRow>(&format!(
        "SELECT {NEWS_COLUMNS} FROM news c WHERE c.id = $1"
    ))
    .bind(news_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?;

    let mut tags = load_tags(conn, &NEWS, &[news_id.0]).await?;
    Ok(row.into_news(tags.remove(&news_id.0).unwrap_or_default()))
}

async fn fetch_document(
    conn: &mut PgConnection,
    document_id: &DocumentId,
) -> Result<Document, StoreError> {
    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents c WHERE c.id = $1"
    ))
    .bind(document_id.0)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?;

    let mut tags = load_tags(conn, &DOCUMENTS, &[document_id.0]).await?;
    Ok(row.into_document(tags.remove(&document_id.0).unwrap_or_default()))
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PostgresTx { tx }))
    }

    // ───────────────────────────────────── Users ──────────────────────────────────────────

    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError> {
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            email: params.email.trim().to_lowercase(),
            password_hash: params.password_hash.clone(),
            full_name: params.full_name.clone(),
            avatar: None,
            bio: String::new(),
            phone: String::new(),
            role: Role::User,
            organization: Affiliation::Unaffiliated,
            team: Affiliation::Unaffiliated,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO users(id, email, password_hash, full_name, role, created_at, updated_at)
             VALUES($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.role.as_i64())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_user(&mut conn, user_id, false).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .into_user()
    }

    async fn update_user_profile(
        &self,
        user_id: &UserId,
        changes: &ProfileChanges,
    ) -> Result<User, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        write_profile(&mut conn, user_id, changes).await
    }

    async fn set_user_avatar(
        &self,
        user_id: &UserId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        swap_avatar(&self.pool, "users", user_id.0, avatar).await
    }

    async fn list_organization_users(
        &self,
        org_id: &OrganizationId,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE organization_id = $1 ORDER BY full_name, id"
        ))
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_users(rows)
    }

    async fn list_free_users(&self, org_id: &OrganizationId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE organization_id = $1 AND team_id IS NULL
             ORDER BY full_name, id"
        ))
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_users(rows)
    }

    async fn list_potential_leaders(
        &self,
        org_id: &OrganizationId,
        team_id: Option<TeamId>,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users u
             WHERE u.organization_id = $1
               AND (NOT EXISTS (SELECT 1 FROM teams t WHERE t.leader_id = u.id)
                    OR EXISTS (SELECT 1 FROM teams t WHERE t.id = $2 AND t.leader_id = u.id))
             ORDER BY u.full_name, u.id"
        ))
        .bind(org_id.0)
        .bind(team_id.map(|t| t.0))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_users(rows)
    }

    // ───────────────────────────────────── Organizations ──────────────────────────────────

    async fn get_organization(&self, org_id: &OrganizationId) -> Result<Organization, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_organization(&mut conn, org_id).await
    }

    async fn update_organization(
        &self,
        org_id: &OrganizationId,
        changes: &OrganizationChanges,
    ) -> Result<Organization, StoreError> {
        sqlx::query_as::<_, OrganizationRow>(&format!(
            "UPDATE organizations SET name = COALESCE($1, name),
                 description = COALESCE($2, description)
             WHERE id = $3
             RETURNING {ORGANIZATION_COLUMNS}"
        ))
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(org_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_err)?
        .map(Organization::from)
        .ok_or(StoreError::NotFound)
    }

    async fn set_organization_avatar(
        &self,
        org_id: &OrganizationId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        swap_avatar(&self.pool, "organizations", org_id.0, avatar).await
    }

    // ───────────────────────────────────── Teams ──────────────────────────────────────────

    async fn get_team(&self, team_id: &TeamId) -> Result<Team, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_team(&mut conn, team_id, false).await
    }

    async fn list_teams(&self, org_id: &OrganizationId) -> Result<Vec<Team>, StoreError> {
        let rows = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE organization_id = $1 ORDER BY name"
        ))
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Team::from).collect())
    }

    async fn list_team_members(&self, team_id: &TeamId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE team_id = $1 ORDER BY full_name, id"
        ))
        .bind(team_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_users(rows)
    }

    async fn update_team(
        &self,
        team_id: &TeamId,
        changes: &TeamChanges,
    ) -> Result<Team, StoreError> {
        sqlx::query_as::<_, TeamRow>(&format!(
            "UPDATE teams SET name = COALESCE($1, name), description = COALESCE($2, description)
             WHERE id = $3
             RETURNING {TEAM_COLUMNS}"
        ))
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_err)?
        .map(Team::from)
        .ok_or(StoreError::NotFound)
    }

    async fn set_team_avatar(
        &self,
        team_id: &TeamId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        swap_avatar(&self.pool, "teams", team_id.0, avatar).await
    }

    // ───────────────────────────────────── Invites ────────────────────────────────────────

    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError> {
        sqlx::query_as::<_, InviteRow>(&format!(
            "INSERT INTO invites(id, token, organization_id, created_by, expires_at, max_uses, uses)
             VALUES($1, $2, $3, $4, $5, $6, 0)
             RETURNING {INVITE_COLUMNS}"
        ))
        .bind(InviteId::new().0)
        .bind(&params.token)
        .bind(params.organization_id.0)
        .bind(params.created_by.0)
        .bind(params.expires_at)
        .bind(params.max_uses)
        .fetch_one(&self.pool)
        .await
        .map(Invite::from)
        .map_err(write_err)
    }

    async fn get_invite_by_token(&self, token: &str) -> Result<Invite, StoreError> {
        sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(Invite::from)
        .ok_or(StoreError::NotFound)
    }

    async fn list_invites(&self, org_id: &OrganizationId) -> Result<Vec<Invite>, StoreError> {
        let rows = sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE organization_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Invite::from).collect())
    }

    async fn delete_invite(&self, invite_id: &InviteId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM invites WHERE id = $1")
            .bind(invite_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    // ───────────────────────────────────── Tags ───────────────────────────────────────────

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| Tag { id: TagId(id), name })
            .collect())
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let tag = Tag {
            id: TagId::new(),
            name: name.trim().to_string(),
        };
        sqlx::query("INSERT INTO tags(id, name) VALUES($1, $2)")
            .bind(tag.id.0)
            .bind(&tag.name)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(tag)
    }

    // ───────────────────────────────────── News ───────────────────────────────────────────

    async fn create_news(&self, params: &CreateNewsParams) -> Result<News, StoreError> {
        let id = NewsId::new();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO news(id, title, content, image, organization_id, team_id, author_id)
             VALUES($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.0)
        .bind(&params.title)
        .bind(&params.content)
        .bind(params.image.as_deref())
        .bind(params.organization_id.0)
        .bind(params.team_id.map(|t| t.0))
        .bind(params.author_id.0)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        replace_tags(&mut tx, &NEWS, id.0, &params.tag_ids).await?;
        let news = fetch_news(&mut tx, &id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(news)
    }

    async fn get_news(&self, news_id: &NewsId) -> Result<News, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_news(&mut conn, news_id).await
    }

    async fn update_news(
        &self,
        news_id: &NewsId,
        changes: &NewsChanges,
    ) -> Result<News, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE news SET title = COALESCE($1, title), content = COALESCE($2, content),
                 image = COALESCE($3, image), updated_at = now()
             WHERE id = $4",
        )
        .bind(changes.title.as_deref())
        .bind(changes.content.as_deref())
        .bind(changes.image.as_deref())
        .bind(news_id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        require_row(result.rows_affected())?;

        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&mut tx, &NEWS, news_id.0, tag_ids).await?;
        }

        let news = fetch_news(&mut tx, news_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(news)
    }

    async fn delete_news(&self, news_id: &NewsId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM news WHERE id = $1")
            .bind(news_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_news(&self, query: &ContentQuery) -> Result<Vec<News>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {NEWS_COLUMNS} FROM news c"));
        push_content_filters(&mut qb, &NEWS, query);
        let rows = qb
            .build_query_as::<NewsRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut tags = load_tags(&mut conn, &NEWS, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let item_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_news(item_tags)
            })
            .collect())
    }

    // ───────────────────────────────────── Documents ──────────────────────────────────────

    async fn create_document(
        &self,
        params: &CreateDocumentParams,
    ) -> Result<Document, StoreError> {
        let id = DocumentId::new();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO documents(id, title, description, file, original_name, organization_id, team_id, author_id)
             VALUES($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id.0)
        .bind(&params.title)
        .bind(&params.description)
        .bind(&params.file)
        .bind(&params.original_name)
        .bind(params.organization_id.0)
        .bind(params.team_id.map(|t| t.0))
        .bind(params.author_id.0)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        replace_tags(&mut tx, &DOCUMENTS, id.0, &params.tag_ids).await?;
        let document = fetch_document(&mut tx, &id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(document)
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_document(&mut conn, document_id).await
    }

    async fn update_document(
        &self,
        document_id: &DocumentId,
        changes: &DocumentChanges,
    ) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE documents SET title = COALESCE($1, title), description = COALESCE($2, description)
             WHERE id = $3",
        )
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(document_id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        require_row(result.rows_affected())?;

        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&mut tx, &DOCUMENTS, document_id.0, tag_ids).await?;
        }

        let document = fetch_document(&mut tx, document_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(document)
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_documents(&self, query: &ContentQuery) -> Result<Vec<Document>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {DOCUMENT_COLUMNS} FROM documents c"));
        push_content_filters(&mut qb, &DOCUMENTS, query);
        let rows = qb
            .build_query_as::<DocumentRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut tags = load_tags(&mut conn, &DOCUMENTS, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let item_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_document(item_tags)
            })
            .collect())
    }

    // ───────────────────────────────────── Tasks ──────────────────────────────────────────

    async fn create_task(&self, params: &CreateTaskParams) -> Result<Task, StoreError> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks(id, title, description, status, priority, due_date, assignee_id,
                 team_id, organization_id, creator_id)
             VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(TaskId::new().0)
        .bind(&params.title)
        .bind(&params.description)
        .bind(TaskStatus::Todo.as_str())
        .bind(params.priority.as_str())
        .bind(params.due_date)
        .bind(params.assignee_id.map(|u| u.0))
        .bind(params.team_id.0)
        .bind(params.organization_id.0)
        .bind(params.creator_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(write_err)?
        .into_task()
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_task(&mut conn, task_id).await
    }

    async fn update_task(
        &self,
        task_id: &TaskId,
        changes: &TaskChanges,
    ) -> Result<Task, StoreError> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET title = COALESCE($1, title), description = COALESCE($2, description),
                 status = COALESCE($3, status), priority = COALESCE($4, priority),
                 due_date = CASE WHEN $5 THEN $6 ELSE due_date END,
                 assignee_id = CASE WHEN $7 THEN $8 ELSE assignee_id END,
                 updated_at = now()
             WHERE id = $9
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.priority.map(|p| p.as_str()))
        .bind(changes.due_date.is_some())
        .bind(changes.due_date.flatten())
        .bind(changes.assignee_id.is_some())
        .bind(changes.assignee_id.flatten().map(|u| u.0))
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(write_err)?
        .ok_or(StoreError::NotFound)?
        .into_task()
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_tasks(&self, team_id: &TeamId) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE team_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(team_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

#[async_trait::async_trait]
impl StoreTx for PostgresTx {
    // ───────────────────────────────────── Locks ──────────────────────────────────────────

    async fn lock_user(&mut self, user_id: &UserId) -> Result<User, StoreError> {
        fetch_user(&mut self.tx, user_id, true).await
    }

    async fn lock_team(&mut self, team_id: &TeamId) -> Result<Team, StoreError> {
        fetch_team(&mut self.tx, team_id, true).await
    }

    async fn lock_invite(&mut self, token: &str) -> Result<Invite, StoreError> {
        sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE token = $1 FOR UPDATE"
        ))
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?
        .map(Invite::from)
        .ok_or(StoreError::NotFound)
    }

    // ───────────────────────────────────── Writes ─────────────────────────────────────────

    async fn insert_organization(
        &mut self,
        params: &CreateOrganizationParams,
    ) -> Result<Organization, StoreError> {
        sqlx::query_as::<_, OrganizationRow>(&format!(
            "INSERT INTO organizations(id, name, description, owner_id)
             VALUES($1, $2, $3, $4)
             RETURNING {ORGANIZATION_COLUMNS}"
        ))
        .bind(OrganizationId::new().0)
        .bind(&params.name)
        .bind(&params.description)
        .bind(params.owner_id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map(Organization::from)
        .map_err(write_err)
    }

    async fn insert_team(&mut self, params: &CreateTeamParams) -> Result<Team, StoreError> {
        sqlx::query_as::<_, TeamRow>(&format!(
            "INSERT INTO teams(id, name, description, organization_id, leader_id)
             VALUES($1, $2, $3, $4, $5)
             RETURNING {TEAM_COLUMNS}"
        ))
        .bind(TeamId::new().0)
        .bind(&params.name)
        .bind(&params.description)
        .bind(params.organization_id.0)
        .bind(params.leader_id.map(|u| u.0))
        .fetch_one(&mut *self.tx)
        .await
        .map(Team::from)
        .map_err(write_err)
    }

    async fn count_teams_led_by(&mut self, user_id: &UserId) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM teams WHERE leader_id = $1")
            .bind(user_id.0)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(backend)
    }

    async fn update_user_profile(
        &mut self,
        user_id: &UserId,
        changes: &ProfileChanges,
    ) -> Result<User, StoreError> {
        write_profile(&mut self.tx, user_id, changes).await
    }

    async fn set_user_role(&mut self, user_id: &UserId, role: Role) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET role = $1, updated_at = now() WHERE id = $2")
            .bind(role.as_i64())
            .bind(user_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn set_user_team(
        &mut self,
        user_id: &UserId,
        team: Affiliation<TeamId>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET team_id = $1, updated_at = now() WHERE id = $2")
            .bind(team.get().map(|t| t.0))
            .bind(user_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn set_user_membership(
        &mut self,
        user_id: &UserId,
        organization: Affiliation<OrganizationId>,
        team: Affiliation<TeamId>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET organization_id = $1, team_id = $2, updated_at = now() WHERE id = $3",
        )
        .bind(organization.get().map(|o| o.0))
        .bind(team.get().map(|t| t.0))
        .bind(user_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn set_team_leader(
        &mut self,
        team_id: &TeamId,
        leader_id: Option<UserId>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE teams SET leader_id = $1 WHERE id = $2")
            .bind(leader_id.map(|u| u.0))
            .bind(team_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn clear_team_members(&mut self, team_id: &TeamId) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE users SET team_id = NULL, updated_at = now() WHERE team_id = $1")
                .bind(team_id.0)
                .execute(&mut *self.tx)
                .await
                .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn release_leadership(&mut self, user_id: &UserId) -> Result<Vec<TeamId>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE teams SET leader_id = NULL WHERE leader_id = $1 RETURNING id",
        )
        .bind(user_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(ids.into_iter().map(TeamId).collect())
    }

    async fn delete_team(&mut self, team_id: &TeamId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = $1")
            .bind(team_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn delete_user(&mut self, user_id: &UserId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn increment_invite_uses(&mut self, invite_id: &InviteId) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE invites SET uses = uses + 1 WHERE id = $1 AND uses < max_uses")
                .bind(invite_id.0)
                .execute(&mut *self.tx)
                .await
                .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    // ───────────────────────────────────── Completion ─────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(backend)
    }
}
