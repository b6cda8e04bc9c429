use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use portal_storage::{
    Affiliation, ContentQuery, CreateDocumentParams, CreateInviteParams, CreateNewsParams,
    CreateOrganizationParams, CreateTaskParams, CreateTeamParams, CreateUserParams, Document,
    DocumentChanges, DocumentId, Invite, InviteId, News, NewsChanges, NewsId, Organization,
    OrganizationChanges, OrganizationId, ProfileChanges, Role, Store, StoreError, StoreTx, Tag,
    TagId, Task, TaskChanges, TaskId, TaskStatus, Team, TeamChanges, TeamId, TeamVisibility, User,
    UserId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed [`Store`].
///
/// The pool holds a single connection, so an open [`SqliteTx`] excludes every
/// other reader and writer until it finishes. That serialisation stands in
/// for the row locks SQLite doesn't have.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .foreign_keys(true);

        // One long-lived connection: an in-memory database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;
        tracing::debug!(url, "sqlite store ready");

        Ok(Self { pool })
    }
}

/// Open transaction on the store's only connection.
pub struct SqliteTx {
    tx: sqlx::Transaction<'static, Sqlite>,
}

// ───────────────────────────────────── Helpers ────────────────────────────────────────

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Map constraint violations on writes to their storage meaning.
fn write_err(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::AlreadyExists,
        Some(db) if db.is_foreign_key_violation() => StoreError::NotFound,
        Some(db) if db.is_check_violation() => StoreError::Conflict,
        _ => StoreError::Backend(e.to_string()),
    }
}

fn parse_id<T>(s: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse().map_err(backend)
}

fn parse_opt_id<T>(s: Option<&str>) -> Result<Option<T>, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.map(parse_id).transpose()
}

/// Unicode case fold stored in the `*_key` columns.
fn fold(text: &str) -> String {
    text.to_lowercase()
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
    id: String,
    email: String,
    password_hash: String,
    full_name: String,
    avatar: Option<String>,
    bio: String,
    phone: String,
    role: i64,
    organization_id: Option<String>,
    team_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        Ok(User {
            id: parse_id(&self.id)?,
            email: self.email,
            password_hash: self.password_hash,
            full_name: self.full_name,
            avatar: self.avatar,
            bio: self.bio,
            phone: self.phone,
            role: Role::try_from(self.role).map_err(backend)?,
            organization: parse_opt_id(self.organization_id.as_deref())?.into(),
            team: parse_opt_id(self.team_id.as_deref())?.into(),
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
    id: String,
    name: String,
    description: String,
    avatar: Option<String>,
    owner_id: String,
    created_at: DateTime<Utc>,
}

impl OrganizationRow {
    fn into_organization(self) -> Result<Organization, StoreError> {
        Ok(Organization {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
            avatar: self.avatar,
            owner_id: parse_id(&self.owner_id)?,
            created_at: self.created_at,
        })
    }
}

const TEAM_COLUMNS: &str =
    "id, name, description, avatar, organization_id, leader_id, created_at";

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: String,
    name: String,
    description: String,
    avatar: Option<String>,
    organization_id: String,
    leader_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TeamRow {
    fn into_team(self) -> Result<Team, StoreError> {
        Ok(Team {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
            avatar: self.avatar,
            organization_id: parse_id(&self.organization_id)?,
            leader_id: parse_opt_id(self.leader_id.as_deref())?,
            created_at: self.created_at,
        })
    }
}

fn into_teams(rows: Vec<TeamRow>) -> Result<Vec<Team>, StoreError> {
    rows.into_iter().map(TeamRow::into_team).collect()
}

const INVITE_COLUMNS: &str =
    "id, token, organization_id, created_by, expires_at, max_uses, uses, created_at";

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: String,
    token: String,
    organization_id: String,
    created_by: String,
    expires_at: DateTime<Utc>,
    max_uses: i64,
    uses: i64,
    created_at: DateTime<Utc>,
}

impl InviteRow {
    fn into_invite(self) -> Result<Invite, StoreError> {
        Ok(Invite {
            id: parse_id(&self.id)?,
            token: self.token,
            organization_id: parse_id(&self.organization_id)?,
            created_by: parse_id(&self.created_by)?,
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            uses: self.uses,
            created_at: self.created_at,
        })
    }
}

const NEWS_COLUMNS: &str = "c.id, c.title, c.content, c.image, c.organization_id, c.team_id, \
     c.author_id, c.created_at, c.updated_at";

#[derive(sqlx::FromRow)]
struct NewsRow {
    id: String,
    title: String,
    content: String,
    image: Option<String>,
    organization_id: String,
    team_id: Option<String>,
    author_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NewsRow {
    fn into_news(self, tags: Vec<Tag>) -> Result<News, StoreError> {
        Ok(News {
            id: parse_id(&self.id)?,
            title: self.title,
            content: self.content,
            image: self.image,
            tags,
            organization_id: parse_id(&self.organization_id)?,
            team_id: parse_opt_id(self.team_id.as_deref())?,
            author_id: parse_id(&self.author_id)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "c.id, c.title, c.description, c.file, c.original_name, \
     c.organization_id, c.team_id, c.author_id, c.created_at";

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    description: String,
    file: String,
    original_name: String,
    organization_id: String,
    team_id: Option<String>,
    author_id: String,
    created_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self, tags: Vec<Tag>) -> Result<Document, StoreError> {
        Ok(Document {
            id: parse_id(&self.id)?,
            title: self.title,
            description: self.description,
            file: self.file,
            original_name: self.original_name,
            tags,
            organization_id: parse_id(&self.organization_id)?,
            team_id: parse_opt_id(self.team_id.as_deref())?,
            author_id: parse_id(&self.author_id)?,
            created_at: self.created_at,
        })
    }
}

const TASK_COLUMNS: &str = "id, title, description, status, priority, due_date, assignee_id, \
     team_id, organization_id, creator_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    assignee_id: Option<String>,
    team_id: String,
    organization_id: String,
    creator_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: parse_id(&self.id)?,
            title: self.title,
            description: self.description,
            status: self.status.parse().map_err(backend)?,
            priority: self.priority.parse().map_err(backend)?,
            due_date: self.due_date,
            assignee_id: parse_opt_id(self.assignee_id.as_deref())?,
            team_id: parse_id(&self.team_id)?,
            organization_id: parse_id(&self.organization_id)?,
            creator_id: parse_id(&self.creator_id)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ───────────────────────────────────── Shared queries ─────────────────────────────────

async fn fetch_user(conn: &mut SqliteConnection, user_id: &UserId) -> Result<User, StoreError> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .into_user()
}

async fn write_profile(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    changes: &ProfileChanges,
) -> Result<User, StoreError> {
    let result = sqlx::query(
        "UPDATE users SET full_name = COALESCE(?, full_name), bio = COALESCE(?, bio),
             phone = COALESCE(?, phone), updated_at = ?
         WHERE id = ?",
    )
    .bind(changes.full_name.as_deref())
    .bind(changes.bio.as_deref())
    .bind(changes.phone.as_deref())
    .bind(Utc::now())
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    require_row(result.rows_affected())?;

    fetch_user(conn, user_id).await
}

async fn fetch_team(conn: &mut SqliteConnection, team_id: &TeamId) -> Result<Team, StoreError> {
    sqlx::query_as::<_, TeamRow>(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"))
        .bind(team_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .into_team()
}

async fn fetch_invite_by_token(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Invite, StoreError> {
    sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {INVITE_COLUMNS} FROM invites WHERE token = ?"
    ))
    .bind(token)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?
    .into_invite()
}

async fn fetch_organization(
    conn: &mut SqliteConnection,
    org_id: &OrganizationId,
) -> Result<Organization, StoreError> {
    sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?"
    ))
    .bind(org_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?
    .into_organization()
}

async fn fetch_task(conn: &mut SqliteConnection, task_id: &TaskId) -> Result<Task, StoreError> {
    sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
        .bind(task_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .into_task()
}

/// Swap the avatar column of one row, returning the old value.
async fn swap_avatar(
    pool: &SqlitePool,
    table: &str,
    id: String,
    avatar: Option<String>,
) -> Result<Option<String>, StoreError> {
    let mut tx = pool.begin().await.map_err(backend)?;

    let previous: Option<Option<String>> =
        sqlx::query_scalar(&format!("SELECT avatar FROM {table} WHERE id = ?"))
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
    let previous = previous.ok_or(StoreError::NotFound)?;

    sqlx::query(&format!("UPDATE {table} SET avatar = ? WHERE id = ?"))
        .bind(avatar)
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

    tx.commit().await.map_err(backend)?;
    Ok(previous)
}

/// Table layout shared by news and documents.
struct ContentTable {
    table: &'static str,
    links: &'static str,
    link_column: &'static str,
}

const NEWS: ContentTable = ContentTable {
    table: "news",
    links: "news_tags",
    link_column: "news_id",
};

const DOCUMENTS: ContentTable = ContentTable {
    table: "documents",
    links: "document_tags",
    link_column: "document_id",
};

/// Append the visibility rule and the optional filters for `query` to a
/// statement selecting from `kind.table` aliased `c`.
fn push_content_filters(qb: &mut QueryBuilder<'_, Sqlite>, kind: &ContentTable, query: &ContentQuery) {
    qb.push(" WHERE c.organization_id = ")
        .push_bind(query.organization_id.to_string());

    match query.visibility {
        TeamVisibility::Everything => {}
        TeamVisibility::OrganizationWideAnd(Some(team)) => {
            qb.push(" AND (c.team_id IS NULL OR c.team_id = ")
                .push_bind(team.to_string())
                .push(")");
        }
        TeamVisibility::OrganizationWideAnd(None) => {
            qb.push(" AND c.team_id IS NULL");
        }
    }

    if !query.tag_ids.is_empty() {
        qb.push(format_args!(
            " AND EXISTS (SELECT 1 FROM {} x WHERE x.{} = c.id AND x.tag_id IN (",
            kind.links, kind.link_column
        ));
        let mut ids = qb.separated(", ");
        for tag in &query.tag_ids {
            ids.push_bind(tag.to_string());
        }
        ids.push_unseparated("))");
    }

    if !query.author_ids.is_empty() {
        qb.push(" AND c.author_id IN (");
        let mut ids = qb.separated(", ");
        for author in &query.author_ids {
            ids.push_bind(author.to_string());
        }
        ids.push_unseparated(")");
    }

    if !query.team_ids.is_empty() {
        qb.push(" AND c.team_id IN (");
        let mut ids = qb.separated(", ");
        for team in &query.team_ids {
            ids.push_bind(team.to_string());
        }
        ids.push_unseparated(")");
    }

    if let Some(pattern) = query.search_pattern() {
        // The pattern is already folded; LIKE compares non-ASCII bytes exactly.
        qb.push(" AND (c.title_key LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
        qb.push(" OR c.body_key LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
        qb.push(format_args!(
            " OR EXISTS (SELECT 1 FROM {} x JOIN tags t ON t.id = x.tag_id \
             WHERE x.{} = c.id AND t.name_key LIKE ",
            kind.links, kind.link_column
        ))
        .push_bind(pattern)
        .push(" ESCAPE '\\'))");
    }

    qb.push(" ORDER BY c.created_at DESC, c.id DESC");
}

/// Tags per item id for the given items.
async fn load_tags(
    conn: &mut SqliteConnection,
    kind: &ContentTable,
    item_ids: &[String],
) -> Result<HashMap<String, Vec<Tag>>, StoreError> {
    let mut by_item: HashMap<String, Vec<Tag>> = HashMap::new();
    if item_ids.is_empty() {
        return Ok(by_item);
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT x.{col}, t.id, t.name FROM {links} x JOIN tags t ON t.id = x.tag_id WHERE x.{col} IN (",
        col = kind.link_column,
        links = kind.links
    ));
    let mut ids = qb.separated(", ");
    for id in item_ids {
        ids.push_bind(id.clone());
    }
    ids.push_unseparated(") ORDER BY t.name");

    let rows = qb
        .build_query_as::<(String, String, String)>()
        .fetch_all(&mut *conn)
        .await
        .map_err(backend)?;

    for (item, tag_id, name) in rows {
        by_item.entry(item).or_default().push(Tag {
            id: parse_id(&tag_id)?,
            name,
        });
    }
    Ok(by_item)
}

async fn replace_tags(
    conn: &mut SqliteConnection,
    kind: &ContentTable,
    item_id: &str,
    tag_ids: &[TagId],
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "DELETE FROM {} WHERE {} = ?",
        kind.links, kind.link_column
    ))
    .bind(item_id)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;

    for tag in tag_ids {
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {}({}, tag_id) VALUES(?, ?)",
            kind.links, kind.link_column
        ))
        .bind(item_id)
        .bind(tag.to_string())
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
    }
    Ok(())
}

async fn fetch_news(conn: &mut SqliteConnection, news_id: &NewsId) -> Result<News, StoreError> {
    let id = news_id.to_string();
    let row = sqlx::query_as::<_, NewsRow>(&format!(
        "SELECT {NEWS_COLUMNS} FROM news c WHERE c.id = ?"
    ))
    .bind(&id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?;

    let mut tags = load_tags(conn, &NEWS, std::slice::from_ref(&id)).await?;
    row.into_news(tags.remove(&id).unwrap_or_default())
}

async fn fetch_document(
    conn: &mut SqliteConnection,
    document_id: &DocumentId,
) -> Result<Document, StoreError> {
    let id = document_id.to_string();
    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents c WHERE c.id = ?"
    ))
    .bind(&id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?
    .ok_or(StoreError::NotFound)?;

    let mut tags = load_tags(conn, &DOCUMENTS, std::slice::from_ref(&id)).await?;
    row.into_document(tags.remove(&id).unwrap_or_default())
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(SqliteTx { tx }))
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
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
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
        fetch_user(&mut conn, user_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
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
        swap_avatar(&self.pool, "users", user_id.to_string(), avatar).await
    }

    async fn list_organization_users(
        &self,
        org_id: &OrganizationId,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE organization_id = ? ORDER BY full_name, id"
        ))
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_users(rows)
    }

    async fn list_free_users(&self, org_id: &OrganizationId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE organization_id = ? AND team_id IS NULL
             ORDER BY full_name, id"
        ))
        .bind(org_id.to_string())
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
             WHERE u.organization_id = ?
               AND (NOT EXISTS (SELECT 1 FROM teams t WHERE t.leader_id = u.id)
                    OR EXISTS (SELECT 1 FROM teams t WHERE t.id = ? AND t.leader_id = u.id))
             ORDER BY u.full_name, u.id"
        ))
        .bind(org_id.to_string())
        .bind(team_id.map(|t| t.to_string()))
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
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let result = sqlx::query(
            "UPDATE organizations SET name = COALESCE(?, name),
                 description = COALESCE(?, description)
             WHERE id = ?",
        )
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(org_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
        require_row(result.rows_affected())?;

        fetch_organization(&mut conn, org_id).await
    }

    async fn set_organization_avatar(
        &self,
        org_id: &OrganizationId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        swap_avatar(&self.pool, "organizations", org_id.to_string(), avatar).await
    }

    // ───────────────────────────────────── Teams ──────────────────────────────────────────

    async fn get_team(&self, team_id: &TeamId) -> Result<Team, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_team(&mut conn, team_id).await
    }

    async fn list_teams(&self, org_id: &OrganizationId) -> Result<Vec<Team>, StoreError> {
        let rows = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE organization_id = ? ORDER BY name"
        ))
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_teams(rows)
    }

    async fn list_team_members(&self, team_id: &TeamId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE team_id = ? ORDER BY full_name, id"
        ))
        .bind(team_id.to_string())
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
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let result = sqlx::query(
            "UPDATE teams SET name = COALESCE(?, name), name_key = COALESCE(?, name_key),
                 description = COALESCE(?, description)
             WHERE id = ?",
        )
        .bind(changes.name.as_deref())
        .bind(changes.name.as_deref().map(fold))
        .bind(changes.description.as_deref())
        .bind(team_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
        require_row(result.rows_affected())?;

        fetch_team(&mut conn, team_id).await
    }

    async fn set_team_avatar(
        &self,
        team_id: &TeamId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        swap_avatar(&self.pool, "teams", team_id.to_string(), avatar).await
    }

    // ───────────────────────────────────── Invites ────────────────────────────────────────

    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError> {
        let invite = Invite {
            id: InviteId::new(),
            token: params.token.clone(),
            organization_id: params.organization_id,
            created_by: params.created_by,
            expires_at: params.expires_at,
            max_uses: params.max_uses,
            uses: 0,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO invites(id, token, organization_id, created_by, expires_at, max_uses, uses, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(invite.id.to_string())
        .bind(&invite.token)
        .bind(invite.organization_id.to_string())
        .bind(invite.created_by.to_string())
        .bind(invite.expires_at)
        .bind(invite.max_uses)
        .bind(invite.created_at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(invite)
    }

    async fn get_invite_by_token(&self, token: &str) -> Result<Invite, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_invite_by_token(&mut conn, token).await
    }

    async fn list_invites(&self, org_id: &OrganizationId) -> Result<Vec<Invite>, StoreError> {
        let rows = sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE organization_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(InviteRow::into_invite).collect()
    }

    async fn delete_invite(&self, invite_id: &InviteId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM invites WHERE id = ?")
            .bind(invite_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    // ───────────────────────────────────── Tags ───────────────────────────────────────────

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT id, name FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter()
            .map(|(id, name)| {
                Ok(Tag {
                    id: parse_id(&id)?,
                    name,
                })
            })
            .collect()
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let tag = Tag {
            id: TagId::new(),
            name: name.trim().to_string(),
        };
        sqlx::query("INSERT INTO tags(id, name, name_key) VALUES(?, ?, ?)")
            .bind(tag.id.to_string())
            .bind(&tag.name)
            .bind(fold(&tag.name))
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(tag)
    }

    // ───────────────────────────────────── News ───────────────────────────────────────────

    async fn create_news(&self, params: &CreateNewsParams) -> Result<News, StoreError> {
        let id = NewsId::new();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO news(id, title, content, title_key, body_key, image, organization_id, team_id,
                 author_id, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&params.title)
        .bind(&params.content)
        .bind(fold(&params.title))
        .bind(fold(&params.content))
        .bind(params.image.as_deref())
        .bind(params.organization_id.to_string())
        .bind(params.team_id.map(|t| t.to_string()))
        .bind(params.author_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        replace_tags(&mut tx, &NEWS, &id.to_string(), &params.tag_ids).await?;
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
            "UPDATE news SET title = COALESCE(?, title), content = COALESCE(?, content),
                 title_key = COALESCE(?, title_key), body_key = COALESCE(?, body_key),
                 image = COALESCE(?, image), updated_at = ?
             WHERE id = ?",
        )
        .bind(changes.title.as_deref())
        .bind(changes.content.as_deref())
        .bind(changes.title.as_deref().map(fold))
        .bind(changes.content.as_deref().map(fold))
        .bind(changes.image.as_deref())
        .bind(Utc::now())
        .bind(news_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        require_row(result.rows_affected())?;

        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&mut tx, &NEWS, &news_id.to_string(), tag_ids).await?;
        }

        let news = fetch_news(&mut tx, news_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(news)
    }

    async fn delete_news(&self, news_id: &NewsId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM news WHERE id = ?")
            .bind(news_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_news(&self, query: &ContentQuery) -> Result<Vec<News>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {NEWS_COLUMNS} FROM news c"));
        push_content_filters(&mut qb, &NEWS, query);
        let rows = qb
            .build_query_as::<NewsRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut tags = load_tags(&mut conn, &NEWS, &ids).await?;
        rows.into_iter()
            .map(|row| {
                let item_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_news(item_tags)
            })
            .collect()
    }

    // ───────────────────────────────────── Documents ──────────────────────────────────────

    async fn create_document(
        &self,
        params: &CreateDocumentParams,
    ) -> Result<Document, StoreError> {
        let id = DocumentId::new();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO documents(id, title, description, title_key, body_key, file, original_name,
                 organization_id, team_id, author_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&params.title)
        .bind(&params.description)
        .bind(fold(&params.title))
        .bind(fold(&params.description))
        .bind(&params.file)
        .bind(&params.original_name)
        .bind(params.organization_id.to_string())
        .bind(params.team_id.map(|t| t.to_string()))
        .bind(params.author_id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        replace_tags(&mut tx, &DOCUMENTS, &id.to_string(), &params.tag_ids).await?;
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
            "UPDATE documents SET title = COALESCE(?, title), description = COALESCE(?, description),
                 title_key = COALESCE(?, title_key), body_key = COALESCE(?, body_key)
             WHERE id = ?",
        )
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.title.as_deref().map(fold))
        .bind(changes.description.as_deref().map(fold))
        .bind(document_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        require_row(result.rows_affected())?;

        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&mut tx, &DOCUMENTS, &document_id.to_string(), tag_ids).await?;
        }

        let document = fetch_document(&mut tx, document_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(document)
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_documents(&self, query: &ContentQuery) -> Result<Vec<Document>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {DOCUMENT_COLUMNS} FROM documents c"));
        push_content_filters(&mut qb, &DOCUMENTS, query);
        let rows = qb
            .build_query_as::<DocumentRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut tags = load_tags(&mut conn, &DOCUMENTS, &ids).await?;
        rows.into_iter()
            .map(|row| {
                let item_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_document(item_tags)
            })
            .collect()
    }

    // ───────────────────────────────────── Tasks ──────────────────────────────────────────

    async fn create_task(&self, params: &CreateTaskParams) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            title: params.title.clone(),
            description: params.description.clone(),
            status: TaskStatus::Todo,
            priority: params.priority,
            due_date: params.due_date,
            assignee_id: params.assignee_id,
            team_id: params.team_id,
            organization_id: params.organization_id,
            creator_id: params.creator_id,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO tasks(id, title, description, status, priority, due_date, assignee_id,
                 team_id, organization_id, creator_id, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_date)
        .bind(task.assignee_id.map(|u| u.to_string()))
        .bind(task.team_id.to_string())
        .bind(task.organization_id.to_string())
        .bind(task.creator_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(task)
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
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let result = sqlx::query(
            "UPDATE tasks SET title = COALESCE(?, title), description = COALESCE(?, description),
                 status = COALESCE(?, status), priority = COALESCE(?, priority),
                 due_date = CASE WHEN ? THEN ? ELSE due_date END,
                 assignee_id = CASE WHEN ? THEN ? ELSE assignee_id END,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.priority.map(|p| p.as_str()))
        .bind(changes.due_date.is_some())
        .bind(changes.due_date.flatten())
        .bind(changes.assignee_id.is_some())
        .bind(changes.assignee_id.flatten().map(|u| u.to_string()))
        .bind(Utc::now())
        .bind(task_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(write_err)?;
        require_row(result.rows_affected())?;

        fetch_task(&mut conn, task_id).await
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn list_tasks(&self, team_id: &TeamId) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE team_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

#[async_trait::async_trait]
impl StoreTx for SqliteTx {
    // ───────────────────────────────────── Locks ──────────────────────────────────────────

    async fn lock_user(&mut self, user_id: &UserId) -> Result<User, StoreError> {
        fetch_user(&mut self.tx, user_id).await
    }

    async fn lock_team(&mut self, team_id: &TeamId) -> Result<Team, StoreError> {
        fetch_team(&mut self.tx, team_id).await
    }

    async fn lock_invite(&mut self, token: &str) -> Result<Invite, StoreError> {
        fetch_invite_by_token(&mut self.tx, token).await
    }

    // ───────────────────────────────────── Writes ─────────────────────────────────────────

    async fn insert_organization(
        &mut self,
        params: &CreateOrganizationParams,
    ) -> Result<Organization, StoreError> {
        let org = Organization {
            id: OrganizationId::new(),
            name: params.name.clone(),
            description: params.description.clone(),
            avatar: None,
            owner_id: params.owner_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO organizations(id, name, description, owner_id, created_at)
             VALUES(?, ?, ?, ?, ?)",
        )
        .bind(org.id.to_string())
        .bind(&org.name)
        .bind(&org.description)
        .bind(org.owner_id.to_string())
        .bind(org.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        Ok(org)
    }

    async fn insert_team(&mut self, params: &CreateTeamParams) -> Result<Team, StoreError> {
        let team = Team {
            id: TeamId::new(),
            name: params.name.clone(),
            description: params.description.clone(),
            avatar: None,
            organization_id: params.organization_id,
            leader_id: params.leader_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO teams(id, name, name_key, description, organization_id, leader_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(fold(&team.name))
        .bind(&team.description)
        .bind(team.organization_id.to_string())
        .bind(team.leader_id.map(|u| u.to_string()))
        .bind(team.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        Ok(team)
    }

    async fn count_teams_led_by(&mut self, user_id: &UserId) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM teams WHERE leader_id = ?")
            .bind(user_id.to_string())
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
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_i64())
            .bind(Utc::now())
            .bind(user_id.to_string())
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
        let result = sqlx::query("UPDATE users SET team_id = ?, updated_at = ? WHERE id = ?")
            .bind(team.get().map(|t| t.to_string()))
            .bind(Utc::now())
            .bind(user_id.to_string())
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
            "UPDATE users SET organization_id = ?, team_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(organization.get().map(|o| o.to_string()))
        .bind(team.get().map(|t| t.to_string()))
        .bind(Utc::now())
        .bind(user_id.to_string())
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
        let result = sqlx::query("UPDATE teams SET leader_id = ? WHERE id = ?")
            .bind(leader_id.map(|u| u.to_string()))
            .bind(team_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn clear_team_members(&mut self, team_id: &TeamId) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE users SET team_id = NULL, updated_at = ? WHERE team_id = ?")
            .bind(Utc::now())
            .bind(team_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn release_leadership(&mut self, user_id: &UserId) -> Result<Vec<TeamId>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM teams WHERE leader_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;

        sqlx::query("UPDATE teams SET leader_id = NULL WHERE leader_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;

        ids.iter().map(|id| parse_id(id)).collect()
    }

    async fn delete_team(&mut self, team_id: &TeamId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(team_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        require_row(result.rows_affected())
    }

    async fn delete_user(&mut self, user_id: &UserId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        require_row(result.rows_affected())
    }

    async fn increment_invite_uses(&mut self, invite_id: &InviteId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE invites SET uses = uses + 1 WHERE id = ? AND uses < max_uses")
            .bind(invite_id.to_string())
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
