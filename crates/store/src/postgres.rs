//! PostgreSQL backend: networked row store with JSON-typed columns.
//!
//! The production default. A bounded connection pool (5..25 by default)
//! serves concurrent request tasks; JSON-shaped fields live in JSONB
//! columns; bulk span insertion uses one multi-row INSERT so the amortized
//! per-span cost stays small.

use crate::ConnectOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lens_core::store::{
    Granularity, ProjectStats, SessionSummary, TraceFilter, TraceUpdate, UsageBucket,
};
use lens_core::{
    Page, PageRequest, Project, Span, SpanStatus, SpanSubType, SpanType, Store, StoreError,
    Trace, TraceStatus, TraceWithMetrics, TraceWithSpans, User,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Row, types::Json};
use tracing::{debug, info};

/// Token rollup fragment: input + output of LLM spans only.
const LLM_TOKENS: &str =
    "CASE WHEN s.span_type = 'llm' THEN COALESCE(s.input_tokens, 0) + COALESCE(s.output_tokens, 0) ELSE 0 END";

/// Update clause applied when a span lands on its (project, trace, id) key
/// again: last writer wins.
const SPAN_CONFLICT_UPDATE: &str = r#"
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

/// Networked PostgreSQL store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with a bounded pool.
    pub async fn connect(database_url: &str, options: ConnectOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(options.min_connections)
            .max_connections(options.max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Transient(format!("PostgreSQL connection failed: {e}")))?;

        info!(
            min = options.min_connections,
            max = options.max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Create from an existing pool (tests and embedding callers).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
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

    fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
        Ok(User {
            id: get(row, "id")?,
            email: get(row, "email")?,
            password_hash: get(row, "password_hash")?,
            google_id: get(row, "google_id")?,
            name: get(row, "name")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn row_to_project(row: &PgRow) -> Result<Project, StoreError> {
        let settings: Option<serde_json::Value> = get(row, "settings")?;
        Ok(Project {
            id: get(row, "id")?,
            name: get(row, "name")?,
            api_key_hash: get(row, "api_key_hash")?,
            owner_email: get(row, "owner_email")?,
            settings: settings.unwrap_or(serde_json::Value::Null),
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn row_to_trace(row: &PgRow) -> Result<Trace, StoreError> {
        let status: String = get(row, "status")?;
        let tags: serde_json::Value = get(row, "tags")?;
        let metadata: serde_json::Value = get(row, "metadata")?;
        Ok(Trace {
            id: get(row, "id")?,
            project_id: get(row, "project_id")?,
            name: get(row, "name")?,
            session_id: get(row, "session_id")?,
            user_id: get(row, "user_id")?,
            status: TraceStatus::parse(&status).unwrap_or_default(),
            tags: serde_json::from_value(tags).unwrap_or_default(),
            metadata: serde_json::from_value(metadata).unwrap_or_default(),
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn row_to_span(row: &PgRow) -> Result<Span, StoreError> {
        let span_type: String = get(row, "span_type")?;
        let status: String = get(row, "status")?;
        let sub_type: Option<String> = get(row, "sub_type")?;
        let tool_uses: serde_json::Value = get(row, "tool_uses")?;
        let metadata: serde_json::Value = get(row, "metadata")?;
        Ok(Span {
            id: get(row, "id")?,
            trace_id: get(row, "trace_id")?,
            parent_span_id: get(row, "parent_span_id")?,
            span_type: SpanType::parse_or_default(Some(&span_type)),
            name: get(row, "name")?,
            input: get(row, "input")?,
            output: get(row, "output")?,
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
            tool_uses: serde_json::from_value(tool_uses).unwrap_or_default(),
            sub_type: sub_type.as_deref().and_then(SpanSubType::parse),
            metadata: serde_json::from_value(metadata).unwrap_or_default(),
            started_at: get(row, "started_at")?,
            ended_at: get(row, "ended_at")?,
        })
    }

    fn row_to_trace_with_metrics(row: &PgRow) -> Result<TraceWithMetrics, StoreError> {
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

    fn push_trace_filters<'a>(
        qb: &mut sqlx::QueryBuilder<'a, sqlx::Postgres>,
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
            qb.push(" AND t.created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND t.created_at <= ").push_bind(to);
        }
    }

    /// The native truncation expression for a granularity.
    fn bucket_expr(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::Hour => "date_trunc('hour', t.created_at)",
            Granularity::Day => "date_trunc('day', t.created_at)",
            Granularity::Week => "date_trunc('week', t.created_at)",
        }
    }
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    column: &str,
) -> Result<T, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Fatal(format!("column {column}: {e}")))
}

fn get_tokens(row: &PgRow, column: &str) -> Result<Option<u32>, StoreError> {
    Ok(get::<Option<i64>>(row, column)?.map(|v| v.max(0) as u32))
}

fn map_json(map: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
    serde_json::Value::Object(map.clone())
}

fn tags_json(tags: &[String]) -> serde_json::Value {
    serde_json::Value::Array(tags.iter().map(|t| t.clone().into()).collect())
}

fn tool_uses_json(span: &Span) -> serde_json::Value {
    serde_json::to_value(&span.tool_uses).unwrap_or(serde_json::Value::Array(vec![]))
}

#[async_trait]
impl Store for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../migrations/postgres.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        debug!("PostgreSQL migrations complete");
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, google_id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE google_id = $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.api_key_hash)
        .bind(&project.owner_email)
        .bind((!project.settings.is_null()).then(|| Json(project.settings.clone())))
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn project_by_api_key_hash(&self, hash: &str) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE api_key_hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn projects_by_owner(&self, owner_email: &str) -> Result<Vec<Project>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM projects WHERE owner_email = $1 ORDER BY created_at DESC")
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
                name = COALESCE($2, name),
                settings = COALESCE($3, settings),
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(settings.map(|s| Json(s.clone())))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
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
            sqlx::query("UPDATE projects SET api_key_hash = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(new_hash)
                .bind(Utc::now())
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
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
        .bind(Json(tags_json(&trace.tags)))
        .bind(Json(map_json(&trace.metadata)))
        .bind(trace.created_at)
        .bind(trace.updated_at)
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
            sqlx::query_scalar("SELECT status FROM traces WHERE project_id = $1 AND id = $2")
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
                name = COALESCE($3, name),
                status = COALESCE($4, status),
                metadata = COALESCE($5, metadata),
                updated_at = $6
            WHERE project_id = $1 AND id = $2
            "#,
        )
        .bind(project_id)
        .bind(trace_id)
        .bind(&update.name)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.metadata.as_ref().map(|m| Json(map_json(m))))
        .bind(Utc::now())
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
        let row = sqlx::query("SELECT * FROM traces WHERE project_id = $1 AND id = $2")
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
            WHERE project_id = $1 AND trace_id = $2
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
        let mut count_qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "SELECT COUNT(*) FROM traces t WHERE t.project_id = ",
        );
        count_qb.push_bind(project_id);
        Self::push_trace_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_err)?;

        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            r#"
            SELECT t.id, t.project_id, t.name, t.session_id, t.user_id, t.status,
                   t.tags, t.metadata, t.created_at, t.updated_at,
                   COUNT(s.id)::BIGINT AS total_spans,
                   COALESCE(SUM({LLM_TOKENS}), 0)::BIGINT AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0)), 0)::DOUBLE PRECISION AS total_cost_usd,
                   COALESCE(SUM(COALESCE(s.duration_ms, 0)), 0)::BIGINT AS total_duration_ms
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
        let result = sqlx::query("DELETE FROM traces WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(result.rows_affected())
    }

    // ── Spans ─────────────────────────────────────────────────────────

    async fn insert_span(&self, project_id: &str, span: &Span) -> Result<(), StoreError> {
        self.insert_spans(project_id, std::slice::from_ref(span)).await
    }

    async fn insert_spans(&self, project_id: &str, spans: &[Span]) -> Result<(), StoreError> {
        if spans.is_empty() {
            return Ok(());
        }

        // One multi-row INSERT per batch: PostgreSQL's batching primitive.
        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            r#"
            INSERT INTO spans (
                project_id, trace_id, id, parent_span_id, span_type, name,
                input, output,
                input_tokens, output_tokens, cache_read_tokens, cache_write_tokens, reasoning_tokens,
                cost_usd, duration_ms, first_token_ms,
                status, stop_reason, error_message, model, provider, thinking,
                tool_uses, sub_type, metadata, started_at, ended_at
            ) "#,
        );
        qb.push_values(spans, |mut row, span| {
            row.push_bind(project_id)
                .push_bind(&span.trace_id)
                .push_bind(&span.id)
                .push_bind(&span.parent_span_id)
                .push_bind(span.span_type.as_str())
                .push_bind(&span.name)
                .push_bind(span.input.clone().map(Json))
                .push_bind(span.output.clone().map(Json))
                .push_bind(span.input_tokens.map(|v| v as i64))
                .push_bind(span.output_tokens.map(|v| v as i64))
                .push_bind(span.cache_read_tokens.map(|v| v as i64))
                .push_bind(span.cache_write_tokens.map(|v| v as i64))
                .push_bind(span.reasoning_tokens.map(|v| v as i64))
                .push_bind(span.cost_usd)
                .push_bind(span.duration_ms.map(|v| v as i64))
                .push_bind(span.first_token_ms.map(|v| v as i64))
                .push_bind(span.status.as_str())
                .push_bind(&span.stop_reason)
                .push_bind(&span.error_message)
                .push_bind(&span.model)
                .push_bind(&span.provider)
                .push_bind(&span.thinking)
                .push_bind(Json(tool_uses_json(span)))
                .push_bind(span.sub_type.map(|s| s.as_str()))
                .push_bind(Json(map_json(&span.metadata)))
                .push_bind(span.started_at)
                .push_bind(span.ended_at);
        });
        qb.push(SPAN_CONFLICT_UPDATE);

        qb.build()
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    // ── Aggregates ────────────────────────────────────────────────────

    async fn list_sessions(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT session_id) FROM traces WHERE project_id = $1 AND session_id IS NOT NULL",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT t.session_id,
                   COUNT(DISTINCT t.id)::BIGINT AS trace_count,
                   COALESCE(SUM({LLM_TOKENS}), 0)::BIGINT AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0)), 0)::DOUBLE PRECISION AS total_cost_usd,
                   MIN(t.created_at) AS first_seen,
                   MAX(t.created_at) AS last_seen
            FROM traces t
            LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id
            WHERE t.project_id = $1 AND t.session_id IS NOT NULL
            GROUP BY t.session_id
            ORDER BY last_seen DESC
            LIMIT $2 OFFSET $3
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
                    first_seen: get(row, "first_seen")?,
                    last_seen: get(row, "last_seen")?,
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
            SELECT COUNT(*)::BIGINT AS total_traces,
                   COUNT(*) FILTER (WHERE status = 'error')::BIGINT AS error_traces
            FROM traces
            WHERE project_id = $1 AND created_at >= $2 AND created_at <= $3
            "#,
        )
        .bind(project_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let total_traces: i64 = get(&trace_row, "total_traces")?;
        let error_traces: i64 = get(&trace_row, "error_traces")?;

        let span_row = sqlx::query(&format!(
            r#"
            SELECT COUNT(s.id)::BIGINT AS total_spans,
                   COALESCE(SUM({LLM_TOKENS}), 0)::BIGINT AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0)), 0)::DOUBLE PRECISION AS total_cost_usd,
                   COALESCE(SUM(COALESCE(s.duration_ms, 0)), 0)::BIGINT AS total_duration_ms
            FROM spans s
            JOIN traces t ON t.project_id = s.project_id AND t.id = s.trace_id
            WHERE t.project_id = $1 AND t.created_at >= $2 AND t.created_at <= $3
            "#
        ))
        .bind(project_id)
        .bind(from)
        .bind(to)
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
        let bucket_expr = Self::bucket_expr(granularity);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {bucket_expr} AS bucket,
                   COUNT(DISTINCT t.id)::BIGINT AS trace_count,
                   COALESCE(SUM({LLM_TOKENS}), 0)::BIGINT AS total_tokens,
                   COALESCE(SUM(COALESCE(s.cost_usd, 0)), 0)::DOUBLE PRECISION AS total_cost_usd
            FROM traces t
            LEFT JOIN spans s ON s.project_id = t.project_id AND s.trace_id = t.id
            WHERE t.project_id = $1 AND t.created_at >= $2 AND t.created_at <= $3
            GROUP BY bucket
            ORDER BY bucket ASC
            "#
        ))
        .bind(project_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        rows.iter()
            .map(|row| {
                Ok(UsageBucket {
                    bucket_start: get(row, "bucket")?,
                    trace_count: get(row, "trace_count")?,
                    total_tokens: get(row, "total_tokens")?,
                    total_cost_usd: get(row, "total_cost_usd")?,
                })
            })
            .collect()
    }
}
