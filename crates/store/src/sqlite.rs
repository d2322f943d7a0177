//! SQLite backend: embedded single-file row store.
//!
//! One database file in WAL mode; a small pool gives concurrent readers
//! while SQLite serializes the single writer. Timestamps are stored as
//! RFC 3339 text and JSON-shaped fields as serialized text. Schema is
//! created by idempotent migrations at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lens_core::store::{
    Granularity, ProjectStats, SessionSummary, TraceFilter, TraceUpdate, UsageBucket,
};
use lens_core::{
    Page, PageRequest, Project, Span, SpanStatus, SpanSubType, SpanType, Store, StoreError,
    Trace, TraceStatus, TraceWithMetrics, TraceWithSpans, User,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Token rollup fragment: input + output of LLM spans only.
const LLM_TOKENS: &str =
    "CASE WHEN s.span_type = 'llm' THEN COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0) ELSE 0 END";

const INSERT_SPAN_SQL: &str = r#"
    INSERT INTO spans (
        project_id, trace_id, id, parent_span_id, span_type, name,
        input, output,
        input_tokens, output_tokens, cache_read_tokens, cache_write_tokens, reasoning_tokens,
        cost_usd, duration_ms, first_token_ms,
        status, stop_reason, error_message, model, provider, thinking,
        tool_uses, sub_type, metadata, started_at, ended_at
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
        ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
    )
    ON CONFLICT (project_id, trace_id, id) DO UPDATE SET
        parent_span_id = excluded.parent_span_id,
        span_type = excluded.span_type,
        name = excluded.name,
        input = excluded.input,
        output = excluded.output,
        input_tokens = excluded.input_tokens,
        output_tokens = excluded.output_tokens,
        cache_read_tokens = excluded.cache_read_tokens,
        cache_write_tokens = excluded.cache_write_tokens,
        reasoning_tokens = excluded.reasoning_tokens,
        cost_usd = excluded.cost_usd,
        duration_ms = excluded.duration_ms,
        first_token_ms = excluded.first_token_ms,
        status = excluded.status,
        stop_reason = excluded.stop_reason,
        error_message = excluded.error_message,
        model = excluded.model,
        provider = excluded.provider,
        thinking = excluded.thinking,
        tool_uses = excluded.tool_uses,
        sub_type = excluded.sub_type,
        metadata = excluded.metadata,
        started_at = excluded.started_at,
        ended_at = excluded.ended_at
"#;

/// Embedded SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the given url or file path.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{url}")
        };
        let in_memory = url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Transient(format!("invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // A :memory: database exists per connection, so the pool must not
        // grow past one.
        let max_connections = if in_memory { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Transient(format!("failed to open SQLite: {e}")))?;

        info!(url = %url, "SQLite store opened");
        Ok(Self { pool })
    }

    /// Ephemeral in-process database, used by tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let store = Self::open("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }

    fn map_err(e: sqlx::Error) -> StoreError {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Transient(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }

    fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
        Ok(User {
            id: get(row, "id")?,
            email: get(row, "email")?,
            password_hash: get(row, "password_hash")?,
            google_id: get(row, "google_id")?,
            name: get(row, "name")?,
            created_at: parse_ts(&get::<String>(row, "created_at")?),
            updated_at: parse_ts(&get::<String>(row, "updated_at")?),
        })
    }

    fn row_to_project(row: &SqliteRow) -> Result<Project, StoreError> {
        let settings: Option<String> = get(row, "settings")?;
        Ok(Project {
            id: get(row, "id")?,
            name: get(row, "name")?,
            api_key_hash: get(row, "api_key_hash")?,
            owner_email: get(row, "owner_email")?,
            settings: settings
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&get::<String>(row, "created_at")?),
            updated_at: parse_ts(&get::<String>(row, "updated_at")?),
        })
    }

    fn row_to_trace(row: &SqliteRow) -> Result<Trace, StoreError> {
        let tags: String = get(row, "tags")?;
        let metadata: String = get(row, "metadata")?;
        let status: String = get(row, "status")?;
        Ok(Trace {
            id: get(row, "id")?,
            project_id: get(row, "project_id")?,
            name: get(row, "name")?,
            session_id: get(row, "session_id")?,
            user_id: get(row, "user_id")?,
            status: TraceStatus::parse(&status).unwrap_or_default(),
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            created_at: parse_ts(&get::<String>(row, "created_at")?),
            updated_at: parse_ts(&get::<String>(row, "updated_at")?),
        })
    }

    fn row_to_span(row: &SqliteRow) -> Result<Span, StoreError> {
        let span_type: String = get(row, "span_type")?;
        let status: String = get(row, "status")?;
        let sub_type: Option<String> = get(row, "sub_type")?;
        let tool_uses: String = get(row, "tool_uses")?;
        let metadata: String = get(row, "metadata")?;
        let ended_at: Option<String> = get(row, "ended_at")?;
        Ok(Span {
            id: get(row, "id")?,
            trace_id: get(row, "trace_id")?,
            parent_span_id: get(row, "parent_span_id")?,
            span_type: SpanType::parse_or_default(Some(&span_type)),
            name: get(row, "name")?,
            input: parse_json_opt(get::<Option<String>>(row, "input")?),
            output: parse_json_opt(get::<Option<String>>(row, "output")?),
            input_tokens: get_tokens(row, "input_tokens")?,
            output_tokens: get_tokens(row, "output_tokens")?,
            cache_read_tokens: get_tokens(row, "cache_read_tokens")?,
            cache_write_tokens: get_tokens(row, "cache_write_tokens")?,
            reasoning_tokens: get_tokens(row, "reasoning_tokens")?,
            cost_usd: get(row, "cost_usd")?,
            duration_ms: get::<Option<i64>>(row, "duration_ms")?.map(|v| v.max(0) as u64),
            first_token_ms: get::<Option<i64>>(row, "first_token_ms")?.map(|v| v.max(0) as u64),
            status: SpanStatus::parse_or_default(Some(&status)),
            stop_reason: get(row, "stop_reason")?,
            error_message: get(row, "error_message")?,
            model: get(row, "model")?,
            provider: get(row, "provider")?,
            thinking: get(row, "thinking")?,
            tool_uses: serde_json::from_str(&tool_uses).unwrap_or_default(),
            sub_type: sub_type.as_deref().and_then(SpanSubType::parse),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            started_at: parse_ts(&get::<String>(row, "started_at")?),
            ended_at: ended_at.as_deref().map(parse_ts),
        })
    }

    fn row_to_trace_with_metrics(row: &SqliteRow) -> Result<TraceWithMetrics, StoreError> {
        let trace = Self::row_to_trace(row)?;
        Ok(TraceWithMetrics {
            trace,
            metrics: lens_core::TraceMetrics {
                total_spans: get::<i64>(row, "total_spans")?.max(0) as u64,
                total_tokens: get::<i64>(row, "total_tokens")?.max(0) as u64,
                total_cost_usd: get(row, "total_cost_usd")?,
                total_duration_ms: get::<i64>(row, "total_duration_ms")?.max(0) as u64,
            },
        })
    }

    /// Append the filter conditions shared by the list and count queries.
    fn push_trace_filters<'a>(
        qb: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>,
        filter: &'a TraceFilter,
    ) {
        if let Some(session_id) = &filter.session_id {
            qb.push(" AND t.session_id = ").push_bind(session_id);
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND t.user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND t.status = ").push_bind(status.as_str());
        }
        if let Some(from) = filter.from {
            qb.push(" AND t.created_at >= ").push_bind(to_ts(from));
        }
        if let Some(to) = filter.to {
            qb.push(" AND t.created_at <= ").push_bind(to_ts(to));
        }
    }
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &'r SqliteRow,
    column: &str,
) -> Result<T, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Fatal(format!("column {column}: {e}")))
}

fn get_tokens(row: &SqliteRow, column: &str) -> Result<Option<u32>, StoreError> {
    Ok(get::<Option<i64>>(row, column)?.map(|v| v.max(0) as u32))
}

fn parse_json_opt(text: Option<String>) -> Option<serde_json::Value> {
    text.and_then(|s| serde_json::from_str(&s).ok())
}

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_text<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

fn bind_span<'q>(
    project_id: &'q str,
    span: &'q Span,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(INSERT_SPAN_SQL)
        .bind(project_id)
        .bind(&span.trace_id)
        .bind(&span.id)
        .bind(&span.parent_span_id)
        .bind(span.span_type.as_str())
        .bind(&span.name)
        .bind(span.input.as_ref().map(json_text))
        .bind(span.output.as_ref().map(json_text))
        .bind(span.input_tokens.map(|v| v as i64))
        .bind(span.output_tokens.map(|v| v as i64))
        .bind(span.cache_read_tokens.map(|v| v as i64))
        .bind(span.cache_write_tokens.map(|v| v as i64))
        .bind(span.reasoning_tokens.map(|v| v as i64))
        .bind(span.cost_usd)
        .bind(span.duration_ms.map(|v| v as i64))
        .bind(span.first_token_ms.map(|v| v as i64))
        .bind(span.status.as_str())
        .bind(&span.stop_reason)
        .bind(&span.error_message)
        .bind(&span.model)
        .bind(&span.provider)
        .bind(&span.thinking)
        .bind(json_text(&span.tool_uses))
        .bind(span.sub_type.map(|s| s.as_str()))
        .bind(json_text(&span.metadata))
        .bind(to_ts(span.started_at))
        .bind(span.ended_at.map(to_ts))
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                google_id     TEXT,
                name          TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_users_google_id ON users(google_id)",
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                api_key_hash TEXT NOT NULL UNIQUE,
                owner_email  TEXT NOT NULL,
                settings     TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_projects_owner_email ON projects(owner_email)",
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id         TEXT NOT NULL,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name       TEXT,
                session_id TEXT,
                user_id    TEXT,
                status     TEXT NOT NULL DEFAULT 'active',
                tags       TEXT NOT NULL DEFAULT '[]',
                metadata   TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (project_id, id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_traces_project_created ON traces(project_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_traces_project_session ON traces(project_id, session_id)",
            "CREATE INDEX IF NOT EXISTS idx_traces_project_user ON traces(project_id, user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS spans (
                project_id        TEXT NOT NULL,
                trace_id          TEXT NOT NULL,
                id                TEXT NOT NULL,
                parent_span_id    TEXT,
                span_type         TEXT NOT NULL,
                name              TEXT NOT NULL,
                input             TEXT,
                output            TEXT,
                input_tokens      INTEGER,
                output_tokens     INTEGER,
                cache_read_tokens INTEGER,
                cache_write_tokens INTEGER,
                reasoning_tokens  INTEGER,
                cost_usd          REAL,
                duration_ms       INTEGER,
                first_token_ms    INTEGER,
                status            TEXT NOT NULL,
                stop_reason       TEXT,
                error_message     TEXT,
                model             TEXT,
                provider          TEXT,
                thinking          TEXT,
                tool_uses         TEXT NOT NULL DEFAULT '[]',
                sub_type          TEXT,
                metadata          TEXT NOT NULL DEFAULT '{}',
                started_at        TEXT NOT NULL,
                ended_at          TEXT,
                PRIMARY KEY (project_id, trace_id, id),
                FOREIGN KEY (project_id, trace_id)
                    REFERENCES traces(project_id, id) ON DELETE CASCADE
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_spans_trace_started ON spans(trace_id, started_at)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, google_id, name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.name)
        .bind(to_ts(user.created_at))
        .bind(to_ts(user.updated_at))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE google_id = ?1")
            .bind(google_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    // ── Projects ──────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, api_key_hash, owner_email, settings, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.api_key_hash)
        .bind(&project.owner_email)
        .bind((!project.settings.is_null()).then(|| json_text(&project.settings)))
        .bind(to_ts(project.created_at))
        .bind(to_ts(project.updated_at))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn project_by_api_key_hash(&self, hash: &str) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE api_key_hash = ?1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn projects_by_owner(&self, owner_email: &str) -> Result<Vec<Project>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM projects WHERE owner_email = ?1 ORDER BY created_at DESC")
                .bind(owner_email)
                .fetch_all(&self.pool)
                .await
                .map_err(Self::map_err)?;
        rows.iter().map(Self::row_to_project).collect()
    }

    async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                name = COALESCE(?2, name),
                settings = COALESCE(?3, settings),
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(settings.map(json_text))
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn rotate_api_key(&self, id: &str, new_hash: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE projects SET api_key_hash = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(new_hash)
                .bind(to_ts(Utc::now()))
                .execute(&self.pool)
                .await
                .map_err(Self::map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ── Traces ────────────────────────────────────────────────────────

    async fn create_or_augment_trace(&self, trace: &Trace) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO traces (id, project_id, name, session_id, user_id, status, tags, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (project_id, id) DO UPDATE SET
                name = COALESCE(NULLIF(traces.name, ''), excluded.name),
                session_id = COALESCE(traces.session_id, excluded.session_id),
                user_id = COALESCE(traces.user_id, excluded.user_id),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&trace.id)
        .bind(&trace.project_id)
        .bind(&trace.name)
        .bind(&trace.session_id)
        .bind(&trace.user_id)
        .bind(trace.status.as_str())
        .bind(json_text(&trace.tags))
        .bind(json_text(&trace.metadata))
        .bind(to_ts(trace.created_at))
        .bind(to_ts(trace.updated_at))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn update_trace(
        &self,
        project_id: &str,
        trace_id: &str,
        update: &TraceUpdate,
    ) -> Result<(), StoreError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM traces WHERE project_id = ?1 AND id = ?2")
                .bind(project_id)
                .bind(trace_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Self::map_err)?;
        let Some(current) = current else {
            return Err(StoreError::NotFound);
        };

        if let Some(next) = update.status {
            let current = TraceStatus::parse(&current).unwrap_or_default();
            if !current.can_transition_to(next) {
                return Err(StoreError::Conflict(format!(
                    "illegal status transition {current} -> {next}"
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE traces SET
                name = COALESCE(?3, name),
                status = COALESCE(?4, status),
                metadata = COALESCE(?5, metadata),
                updated_at = ?6
            WHERE project_id = ?1 AND id = ?2
            "#,
        )
        .bind(project_id)
        .bind(trace_id)
        .bind(&update.name)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.metadata.as_ref().map(json_text))
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn trace_with_spans(
        &self,
        project_id: &str,
        trace_id: &str,
    ) -> Result<Option<TraceWithSpans>, StoreError> {
        let row = sqlx::query("SELECT * FROM traces WHERE project_id = ?1 AND id = ?2")
            .bind(project_id)
            .bind(trace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let trace = Self::row_to_trace(&row)?;

        let span_rows = sqlx::query(
            r#"
            SELECT * FROM spans
            WHERE project_id = ?1 AND trace_id = ?2
            ORDER BY started_at ASC, id ASC
            "#,
        )
        .bind(project_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let spans = span_rows
            .iter()
            .map(Self::row_to_span)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(TraceWithSpans { trace, spans }))
    }

    async fn list_traces(
        &self,
        project_id: &str,
        filter: &TraceFilter,
        page: PageRequest,
    ) -> Result<Page<TraceWithMetrics>, StoreError> {
        let mut count_qb =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT COUNT(*) FROM traces t WHERE t.project_id = ");
        count_qb.push_bind(project_id);
        Self::push_trace_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_err)?;

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!(
            r#"
            SELECT t.id, t.project_id, t.name, t.session_id, t.user_id, t.status,
                   t.tags, t.metadata, t.created_at, t.updated_at,
                   COUNT(s.id) AS total_spans,
                   COALESCE(SUM({LLM_TOKENS}), 0) AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0.0)), 0.0) AS total_cost_usd,
                   COALESCE(SUM(COALESCE(s.duration_ms, 0)), 0) AS total_duration_ms
            FROM traces t
            LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id
            WHERE t.project_id = "#
        ));
        qb.push_bind(project_id);
        Self::push_trace_filters(&mut qb, filter);
        qb.push(" GROUP BY t.project_id, t.id ORDER BY t.created_at DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_err)?;
        let data = rows
            .iter()
            .map(Self::row_to_trace_with_metrics)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(data, total, page))
    }

    async fn delete_traces(&self, project_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM traces WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(result.rows_affected())
    }

    // ── Spans ─────────────────────────────────────────────────────────

    async fn insert_span(&self, project_id: &str, span: &Span) -> Result<(), StoreError> {
        bind_span(project_id, span)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn insert_spans(&self, project_id: &str, spans: &[Span]) -> Result<(), StoreError> {
        if spans.is_empty() {
            return Ok(());
        }
        // SQLite's batching primitive is a single write transaction: one
        // fsync for the whole group instead of one per span.
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for span in spans {
            bind_span(project_id, span)
                .execute(&mut *tx)
                .await
                .map_err(Self::map_err)?;
        }
        tx.commit().await.map_err(Self::map_err)?;
        Ok(())
    }

    // ── Aggregates ────────────────────────────────────────────────────

    async fn list_sessions(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT session_id) FROM traces WHERE project_id = ?1 AND session_id IS NOT NULL",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT t.session_id,
                   COUNT(DISTINCT t.id) AS trace_count,
                   COALESCE(SUM({LLM_TOKENS}), 0) AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0.0)), 0.0) AS total_cost_usd,
                   MIN(t.created_at) AS first_seen,
                   MAX(t.created_at) AS last_seen
            FROM traces t
            LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id
            WHERE t.project_id = ?1 AND t.session_id IS NOT NULL
            GROUP BY t.session_id
            ORDER BY last_seen DESC
            LIMIT ?2 OFFSET ?3
            "#
        ))
        .bind(project_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let data = rows
            .iter()
            .map(|row| {
                Ok(SessionSummary {
                    session_id: get(row, "session_id")?,
                    trace_count: get(row, "trace_count")?,
                    total_tokens: get(row, "total_tokens")?,
                    total_cost_usd: get(row, "total_cost_usd")?,
                    first_seen: parse_ts(&get::<String>(row, "first_seen")?),
                    last_seen: parse_ts(&get::<String>(row, "last_seen")?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Page::new(data, total, page))
    }

    async fn project_stats(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProjectStats, StoreError> {
        let trace_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_traces,
                   SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_traces
            FROM traces
            WHERE project_id = ?1 AND created_at >= ?2 AND created_at <= ?3
            "#,
        )
        .bind(project_id)
        .bind(to_ts(from))
        .bind(to_ts(to))
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let total_traces: i64 = get(&trace_row, "total_traces")?;
        let error_traces: i64 = get::<Option<i64>>(&trace_row, "error_traces")?.unwrap_or(0);

        let span_row = sqlx::query(&format!(
            r#"
            SELECT COUNT(s.id) AS total_spans,
                   COALESCE(SUM({LLM_TOKENS}), 0) AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0.0)), 0.0) AS total_cost_usd,
                   COALESCE(SUM(COALESCE(s.duration_ms, 0)), 0) AS total_duration_ms
            FROM spans s
            JOIN traces t ON t.project_id = s.project_id AND t.id = s.trace_id
            WHERE t.project_id = ?1 AND t.created_at >= ?2 AND t.created_at <= ?3
            "#
        ))
        .bind(project_id)
        .bind(to_ts(from))
        .bind(to_ts(to))
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let total_duration: i64 = get(&span_row, "total_duration_ms")?;

        Ok(ProjectStats {
            total_traces,
            total_spans: get(&span_row, "total_spans")?,
            total_tokens: get(&span_row, "total_tokens")?,
            total_cost_usd: get(&span_row, "total_cost_usd")?,
            avg_duration_ms: total_duration as f64 / total_traces.max(1) as f64,
            error_rate: 100.0 * error_traces as f64 / total_traces.max(1) as f64,
        })
    }

    async fn usage_series(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<UsageBucket>, StoreError> {
        // Native date truncation via strftime; the format is fixed per
        // granularity, never interpolated from input.
        let bucket_expr = match granularity {
            Granularity::Hour => "strftime('%Y-%m-%dT%H:00:00+00:00', t.created_at)",
            Granularity::Day => "strftime('%Y-%m-%dT00:00:00+00:00', t.created_at)",
            Granularity::Week => {
                "strftime('%Y-%m-%dT00:00:00+00:00', t.created_at, 'weekday 0', '-6 days')"
            }
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {bucket_expr} AS bucket,
                   COUNT(DISTINCT t.id) AS trace_count,
                   COALESCE(SUM({LLM_TOKENS}), 0) AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0.0)), 0.0) AS total_cost_usd
            FROM traces t
            LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id
            WHERE t.project_id = ?1 AND t.created_at >= ?2 AND t.created_at <= ?3
            GROUP BY bucket
            ORDER BY bucket ASC
            "#
        ))
        .bind(project_id)
        .bind(to_ts(from))
        .bind(to_ts(to))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        rows.iter()
            .map(|row| {
                Ok(UsageBucket {
                    bucket_start: parse_ts(&get::<String>(row, "bucket")?),
                    trace_count: get(row, "trace_count")?,
                    total_tokens: get(row, "total_tokens")?,
                    total_cost_usd: get(row, "total_cost_usd")?,
                })
            })
            .collect()
    }
}
