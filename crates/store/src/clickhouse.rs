//! ClickHouse backend: columnar analytics store for high-volume ingest.
//!
//! Mutable entities (users, projects, traces) are written as versioned rows
//! into `ReplacingMergeTree(version)` tables; reads use `FINAL` so the
//! latest row is visible without waiting for a merge. Spans are append-only
//! in a plain `MergeTree`, matching their semantic lifecycle; readers
//! de-duplicate by (trace_id, id) keeping the newest insert.
//!
//! All time bucketing goes through native `toStartOf*` functions, never
//! per-row post-processing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lens_core::store::{
    Granularity, ProjectStats, SessionSummary, TraceFilter, TraceUpdate, UsageBucket,
};
use lens_core::{
    Page, PageRequest, Project, Span, SpanStatus, SpanSubType, SpanType, Store, StoreError,
    Trace, TraceStatus, TraceWithMetrics, TraceWithSpans, User,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use ::clickhouse::{Client, Row};

/// Token rollup fragment: input + output of LLM spans only.
const LLM_TOKENS: &str =
    "if(span_type = 'llm', coalesce(input_tokens, 0) + coalesce(output_tokens, 0), 0)";

/// Newest insert wins per (trace_id, id) within one project.
const DEDUP_SPANS: &str =
    "SELECT * FROM spans WHERE project_id = ? ORDER BY ingested_at DESC LIMIT 1 BY trace_id, id";

/// Columnar ClickHouse store.
pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    /// Build a client from a `clickhouse://` / `clickhouses://` url.
    ///
    /// The url maps onto the HTTP interface: scheme to http(s), the first
    /// path segment to the database (default `lens`).
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("clickhouses://") {
            ("https", rest)
        } else if let Some(rest) = url.strip_prefix("clickhouse://") {
            ("http", rest)
        } else {
            return Err(StoreError::Transient(format!(
                "not a clickhouse url: {url}"
            )));
        };

        let (host, database) = match rest.split_once('/') {
            Some((host, db)) if !db.is_empty() => (host, db),
            _ => (rest.trim_end_matches('/'), "lens"),
        };
        if host.is_empty() {
            return Err(StoreError::Transient(format!(
                "clickhouse url has no host: {url}"
            )));
        }

        // Credentials in the authority part, default port 8123.
        let (user_info, host) = match host.rsplit_once('@') {
            Some((user_info, host)) => (Some(user_info), host),
            None => (None, host),
        };
        let host = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:8123")
        };

        let mut client = Client::default()
            .with_url(format!("{scheme}://{host}"))
            .with_database(database);
        if let Some(user_info) = user_info {
            let (user, password) = user_info
                .split_once(':')
                .unwrap_or((user_info, ""));
            client = client.with_user(user).with_password(password);
        }

        info!(database, "ClickHouse client configured");
        Ok(Self { client })
    }

    fn map_err(e: ::clickhouse::error::Error) -> StoreError {
        StoreError::Transient(e.to_string())
    }

    /// Monotonic row version for the replacing merges.
    fn version(updated_at: DateTime<Utc>) -> u64 {
        updated_at.timestamp_millis().max(0) as u64
    }

    fn bucket_expr(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::Hour => "toDateTime64(toStartOfHour(created_at), 3)",
            Granularity::Day => "toDateTime64(toStartOfDay(created_at), 3)",
            Granularity::Week => "toDateTime64(toStartOfWeek(created_at, 1), 3)",
        }
    }

    async fn fetch_trace(
        &self,
        project_id: &str,
        trace_id: &str,
    ) -> Result<Option<TraceRow>, StoreError> {
        self.client
            .query("SELECT ?fields FROM traces FINAL WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(trace_id)
            .fetch_optional::<TraceRow>()
            .await
            .map_err(Self::map_err)
    }

    async fn write_trace(&self, row: &TraceRow) -> Result<(), StoreError> {
        let mut insert = self
            .client
            .insert::<TraceRow>("traces")
            .await
            .map_err(Self::map_err)?;
        insert.write(row).await.map_err(Self::map_err)?;
        insert.end().await.map_err(Self::map_err)
    }

    async fn write_project(&self, row: &ProjectRow) -> Result<(), StoreError> {
        let mut insert = self
            .client
            .insert::<ProjectRow>("projects")
            .await
            .map_err(Self::map_err)?;
        insert.write(row).await.map_err(Self::map_err)?;
        insert.end().await.map_err(Self::map_err)
    }
}

#[async_trait]
impl Store for ClickHouseStore {
    fn name(&self) -> &str {
        "clickhouse"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id            String,
                email         String,
                password_hash Nullable(String),
                google_id     Nullable(String),
                name          Nullable(String),
                created_at    DateTime64(3, 'UTC'),
                updated_at    DateTime64(3, 'UTC'),
                version       UInt64
            ) ENGINE = ReplacingMergeTree(version)
            ORDER BY id
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id           String,
                name         String,
                api_key_hash String,
                owner_email  String,
                settings     Nullable(String),
                created_at   DateTime64(3, 'UTC'),
                updated_at   DateTime64(3, 'UTC'),
                version      UInt64
            ) ENGINE = ReplacingMergeTree(version)
            ORDER BY id
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id         String,
                project_id String,
                name       Nullable(String),
                session_id Nullable(String),
                user_id    Nullable(String),
                status     String,
                tags       String,
                metadata   String,
                created_at DateTime64(3, 'UTC'),
                updated_at DateTime64(3, 'UTC'),
                version    UInt64
            ) ENGINE = ReplacingMergeTree(version)
            ORDER BY (project_id, id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS spans (
                project_id         String,
                trace_id           String,
                id                 String,
                parent_span_id     Nullable(String),
                span_type          String,
                name               String,
                input              Nullable(String),
                output             Nullable(String),
                input_tokens       Nullable(Int64),
                output_tokens      Nullable(Int64),
                cache_read_tokens  Nullable(Int64),
                cache_write_tokens Nullable(Int64),
                reasoning_tokens   Nullable(Int64),
                cost_usd           Nullable(Float64),
                duration_ms        Nullable(Int64),
                first_token_ms     Nullable(Int64),
                status             String,
                stop_reason        Nullable(String),
                error_message      Nullable(String),
                model              Nullable(String),
                provider           Nullable(String),
                thinking           Nullable(String),
                tool_uses          String,
                sub_type           Nullable(String),
                metadata           String,
                started_at         DateTime64(3, 'UTC'),
                ended_at           Nullable(DateTime64(3, 'UTC')),
                ingested_at        DateTime64(3, 'UTC') DEFAULT now64(3)
            ) ENGINE = MergeTree
            ORDER BY (project_id, trace_id, started_at, id)
            "#,
        ];

        for ddl in statements {
            self.client
                .query(ddl)
                .execute()
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        debug!("ClickHouse migrations complete");
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        // No unique constraints in a merge tree; enforce the email
        // invariant at the application edge.
        if self.user_by_email(&user.email).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "user email already exists: {}",
                user.email
            )));
        }
        let mut insert = self
            .client
            .insert::<UserRow>("users")
            .await
            .map_err(Self::map_err)?;
        insert
            .write(&UserRow::from_user(user))
            .await
            .map_err(Self::map_err)?;
        insert.end().await.map_err(Self::map_err)
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = self
            .client
            .query("SELECT ?fields FROM users FINAL WHERE id = ?")
            .bind(id)
            .fetch_optional::<UserRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(row.map(UserRow::into_user))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = self
            .client
            .query("SELECT ?fields FROM users FINAL WHERE email = ?")
            .bind(email)
            .fetch_optional::<UserRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(row.map(UserRow::into_user))
    }

    async fn user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let row = self
            .client
            .query("SELECT ?fields FROM users FINAL WHERE google_id = ?")
            .bind(google_id)
            .fetch_optional::<UserRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(row.map(UserRow::into_user))
    }

    // ── Projects ──────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        self.write_project(&ProjectRow::from_project(project)).await
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row = self
            .client
            .query("SELECT ?fields FROM projects FINAL WHERE id = ?")
            .bind(id)
            .fetch_optional::<ProjectRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(row.map(ProjectRow::into_project))
    }

    async fn project_by_api_key_hash(&self, hash: &str) -> Result<Option<Project>, StoreError> {
        let row = self
            .client
            .query("SELECT ?fields FROM projects FINAL WHERE api_key_hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional::<ProjectRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(row.map(ProjectRow::into_project))
    }

    async fn projects_by_owner(&self, owner_email: &str) -> Result<Vec<Project>, StoreError> {
        let rows = self
            .client
            .query("SELECT ?fields FROM projects FINAL WHERE owner_email = ? ORDER BY created_at DESC")
            .bind(owner_email)
            .fetch_all::<ProjectRow>()
            .await
            .map_err(Self::map_err)?;
        Ok(rows.into_iter().map(ProjectRow::into_project).collect())
    }

    async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let Some(mut project) = self.project_by_id(id).await? else {
            return Err(StoreError::NotFound);
        };
        if let Some(name) = name {
            project.name = name.to_string();
        }
        if let Some(settings) = settings {
            project.settings = settings.clone();
        }
        project.updated_at = Utc::now();
        self.write_project(&ProjectRow::from_project(&project)).await
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        if self.project_by_id(id).await?.is_none() {
            return Err(StoreError::NotFound);
        }
        for sql in [
            "DELETE FROM spans WHERE project_id = ?",
            "DELETE FROM traces WHERE project_id = ?",
            "DELETE FROM projects WHERE id = ?",
        ] {
            self.client
                .query(sql)
                .bind(id)
                .execute()
                .await
                .map_err(Self::map_err)?;
        }
        Ok(())
    }

    async fn rotate_api_key(&self, id: &str, new_hash: &str) -> Result<(), StoreError> {
        let Some(mut project) = self.project_by_id(id).await? else {
            return Err(StoreError::NotFound);
        };
        project.api_key_hash = new_hash.to_string();
        project.updated_at = Utc::now();
        // A single versioned row replaces (key, hash) atomically at merge;
        // FINAL reads see it immediately.
        self.write_project(&ProjectRow::from_project(&project)).await
    }

    // ── Traces ────────────────────────────────────────────────────────

    async fn create_or_augment_trace(&self, trace: &Trace) -> Result<(), StoreError> {
        let merged = match self.fetch_trace(&trace.project_id, &trace.id).await? {
            None => TraceRow::from_trace(trace),
            Some(existing) => {
                let mut current = existing.into_trace();
                // First writer wins: only unset fields take the new value.
                if current.name.as_deref().unwrap_or("").is_empty() {
                    current.name = trace.name.clone();
                }
                if current.session_id.is_none() {
                    current.session_id = trace.session_id.clone();
                }
                if current.user_id.is_none() {
                    current.user_id = trace.user_id.clone();
                }
                current.updated_at = Utc::now();
                TraceRow::from_trace(&current)
            }
        };
        self.write_trace(&merged).await
    }

    async fn update_trace(
        &self,
        project_id: &str,
        trace_id: &str,
        update: &TraceUpdate,
    ) -> Result<(), StoreError> {
        let Some(row) = self.fetch_trace(project_id, trace_id).await? else {
            return Err(StoreError::NotFound);
        };
        let mut trace = row.into_trace();

        if let Some(next) = update.status {
            if !trace.status.can_transition_to(next) {
                return Err(StoreError::Conflict(format!(
                    "illegal status transition {} -> {}",
                    trace.status, next
                )));
            }
            trace.status = next;
        }
        if let Some(name) = &update.name {
            trace.name = Some(name.clone());
        }
        if let Some(metadata) = &update.metadata {
            trace.metadata = metadata.clone();
        }
        trace.updated_at = Utc::now();
        self.write_trace(&TraceRow::from_trace(&trace)).await
    }

    async fn trace_with_spans(
        &self,
        project_id: &str,
        trace_id: &str,
    ) -> Result<Option<TraceWithSpans>, StoreError> {
        let Some(row) = self.fetch_trace(project_id, trace_id).await? else {
            return Ok(None);
        };

        let spans = self
            .client
            .query(&format!(
                "SELECT ?fields FROM ({DEDUP_SPANS}) WHERE trace_id = ? ORDER BY started_at ASC, id ASC"
            ))
            .bind(project_id)
            .bind(trace_id)
            .fetch_all::<SpanRow>()
            .await
            .map_err(Self::map_err)?;

        Ok(Some(TraceWithSpans {
            trace: row.into_trace(),
            spans: spans.into_iter().map(SpanRow::into_span).collect(),
        }))
    }

    async fn list_traces(
        &self,
        project_id: &str,
        filter: &TraceFilter,
        page: PageRequest,
    ) -> Result<Page<TraceWithMetrics>, StoreError> {
        let (filter_sql, binder) = trace_filter_sql(filter);

        let mut count_query = self
            .client
            .query(&format!(
                "SELECT count() FROM traces FINAL WHERE project_id = ?{filter_sql}"
            ))
            .bind(project_id);
        count_query = binder(count_query);
        let total = count_query
            .fetch_one::<u64>()
            .await
            .map_err(Self::map_err)?;

        let mut rows_query = self
            .client
            .query(&format!(
                "SELECT ?fields FROM traces FINAL WHERE project_id = ?{filter_sql} \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ))
            .bind(project_id);
        rows_query = binder(rows_query);
        let rows = rows_query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all::<TraceRow>()
            .await
            .map_err(Self::map_err)?;

        if rows.is_empty() {
            return Ok(Page::new(vec![], total as i64, page));
        }

        // Second pass: read-time metrics for exactly the page's traces,
        // over the de-duplicated span set.
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let metric_rows = self
            .client
            .query(&format!(
                "SELECT trace_id, \
                        toUInt64(count()) AS total_spans, \
                        toUInt64(sum({LLM_TOKENS})) AS total_tokens, \
                        toFloat64(sum(coalesce(cost_usd, 0))) AS total_cost_usd, \
                        toUInt64(sum(coalesce(duration_ms, 0))) AS total_duration_ms \
                 FROM ({DEDUP_SPANS}) WHERE trace_id IN ? GROUP BY trace_id"
            ))
            .bind(project_id)
            .bind(&ids)
            .fetch_all::<TraceMetricsRow>()
            .await
            .map_err(Self::map_err)?;

        let mut metrics: HashMap<String, TraceMetricsRow> = metric_rows
            .into_iter()
            .map(|m| (m.trace_id.clone(), m))
            .collect();

        let data = rows
            .into_iter()
            .map(|row| {
                let m = metrics.remove(&row.id).unwrap_or_default();
                TraceWithMetrics {
                    trace: row.into_trace(),
                    metrics: lens_core::TraceMetrics {
                        total_spans: m.total_spans,
                        total_tokens: m.total_tokens,
                        total_cost_usd: m.total_cost_usd,
                        total_duration_ms: m.total_duration_ms,
                    },
                }
            })
            .collect();
        Ok(Page::new(data, total as i64, page))
    }

    async fn delete_traces(&self, project_id: &str) -> Result<u64, StoreError> {
        let count = self
            .client
            .query("SELECT count() FROM traces FINAL WHERE project_id = ?")
            .bind(project_id)
            .fetch_one::<u64>()
            .await
            .map_err(Self::map_err)?;
        for sql in [
            "DELETE FROM spans WHERE project_id = ?",
            "DELETE FROM traces WHERE project_id = ?",
        ] {
            self.client
                .query(sql)
                .bind(project_id)
                .execute()
                .await
                .map_err(Self::map_err)?;
        }
        Ok(count)
    }

    // ── Spans ─────────────────────────────────────────────────────────

    async fn insert_span(&self, project_id: &str, span: &Span) -> Result<(), StoreError> {
        self.insert_spans(project_id, std::slice::from_ref(span)).await
    }

    async fn insert_spans(&self, project_id: &str, spans: &[Span]) -> Result<(), StoreError> {
        if spans.is_empty() {
            return Ok(());
        }
        // The native batching primitive: one RowBinary insert for the whole
        // group. Duplicates are accepted; readers keep the newest row.
        let mut insert = self
            .client
            .insert::<SpanRow>("spans")
            .await
            .map_err(Self::map_err)?;
        for span in spans {
            insert
                .write(&SpanRow::from_span(project_id, span))
                .await
                .map_err(Self::map_err)?;
        }
        insert.end().await.map_err(Self::map_err)
    }

    // ── Aggregates ────────────────────────────────────────────────────

    async fn list_sessions(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError> {
        let total = self
            .client
            .query(
                "SELECT toUInt64(uniqExact(session_id)) FROM traces FINAL \
                 WHERE project_id = ? AND isNotNull(session_id)",
            )
            .bind(project_id)
            .fetch_one::<u64>()
            .await
            .map_err(Self::map_err)?;

        let rows = self
            .client
            .query(&format!(
                "SELECT assumeNotNull(t.session_id) AS session_id, \
                        toUInt64(uniqExact(t.id)) AS trace_count, \
                        toUInt64(sum(s.llm_tokens)) AS total_tokens, \
                        toFloat64(sum(s.cost)) AS total_cost_usd, \
                        min(t.created_at) AS first_seen, \
                        max(t.created_at) AS last_seen \
                 FROM traces AS t FINAL \
                 LEFT JOIN ( \
                     SELECT trace_id, {LLM_TOKENS} AS llm_tokens, coalesce(cost_usd, 0) AS cost \
                     FROM ({DEDUP_SPANS}) \
                 ) AS s ON s.trace_id = t.id \
                 WHERE t.project_id = ? AND isNotNull(t.session_id) \
                 GROUP BY t.session_id \
                 ORDER BY last_seen DESC LIMIT ? OFFSET ?"
            ))
            .bind(project_id)
            .bind(project_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all::<SessionRow>()
            .await
            .map_err(Self::map_err)?;

        let data = rows
            .into_iter()
            .map(|r| SessionSummary {
                session_id: r.session_id,
                trace_count: r.trace_count as i64,
                total_tokens: r.total_tokens as i64,
                total_cost_usd: r.total_cost_usd,
                first_seen: r.first_seen,
                last_seen: r.last_seen,
            })
            .collect();
        Ok(Page::new(data, total as i64, page))
    }

    async fn project_stats(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProjectStats, StoreError> {
        let traces = self
            .client
            .query(
                "SELECT toUInt64(count()) AS total_traces, \
                        toUInt64(countIf(status = 'error')) AS error_traces \
                 FROM traces FINAL \
                 WHERE project_id = ? \
                   AND created_at >= fromUnixTimestamp64Milli(?) \
                   AND created_at <= fromUnixTimestamp64Milli(?)",
            )
            .bind(project_id)
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_one::<TraceCountsRow>()
            .await
            .map_err(Self::map_err)?;

        let spans = self
            .client
            .query(&format!(
                "SELECT toUInt64(count()) AS total_spans, \
                        toUInt64(sum({LLM_TOKENS})) AS total_tokens, \
                        toFloat64(sum(coalesce(cost_usd, 0))) AS total_cost_usd, \
                        toUInt64(sum(coalesce(duration_ms, 0))) AS total_duration_ms \
                 FROM ({DEDUP_SPANS}) \
                 WHERE trace_id IN ( \
                     SELECT id FROM traces FINAL \
                     WHERE project_id = ? \
                       AND created_at >= fromUnixTimestamp64Milli(?) \
                       AND created_at <= fromUnixTimestamp64Milli(?) \
                 )"
            ))
            .bind(project_id)
            .bind(project_id)
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_one::<SpanTotalsRow>()
            .await
            .map_err(Self::map_err)?;

        let total_traces = traces.total_traces as i64;
        Ok(ProjectStats {
            total_traces,
            total_spans: spans.total_spans as i64,
            total_tokens: spans.total_tokens as i64,
            total_cost_usd: spans.total_cost_usd,
            avg_duration_ms: spans.total_duration_ms as f64 / total_traces.max(1) as f64,
            error_rate: 100.0 * traces.error_traces as f64 / total_traces.max(1) as f64,
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
        let rows = self
            .client
            .query(&format!(
                "SELECT t.bucket AS bucket, \
                        toUInt64(uniqExact(t.id)) AS trace_count, \
                        toUInt64(sum(s.llm_tokens)) AS total_tokens, \
                        toFloat64(sum(s.cost)) AS total_cost_usd \
                 FROM ( \
                     SELECT id, {bucket_expr} AS bucket FROM traces FINAL \
                     WHERE project_id = ? \
                       AND created_at >= fromUnixTimestamp64Milli(?) \
                       AND created_at <= fromUnixTimestamp64Milli(?) \
                 ) AS t \
                 LEFT JOIN ( \
                     SELECT trace_id, {LLM_TOKENS} AS llm_tokens, coalesce(cost_usd, 0) AS cost \
                     FROM ({DEDUP_SPANS}) \
                 ) AS s ON s.trace_id = t.id \
                 GROUP BY bucket ORDER BY bucket ASC"
            ))
            .bind(project_id)
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .bind(project_id)
            .fetch_all::<BucketRow>()
            .await
            .map_err(Self::map_err)?;

        Ok(rows
            .into_iter()
            .map(|r| UsageBucket {
                bucket_start: r.bucket,
                trace_count: r.trace_count as i64,
                total_tokens: r.total_tokens as i64,
                total_cost_usd: r.total_cost_usd,
            })
            .collect())
    }
}

/// Filter SQL + a bind closure so the same condition list serves the count
/// and page queries in order.
fn trace_filter_sql(
    filter: &TraceFilter,
) -> (
    String,
    impl Fn(::clickhouse::query::Query) -> ::clickhouse::query::Query + '_,
) {
    let mut sql = String::new();
    if filter.session_id.is_some() {
        sql.push_str(" AND session_id = ?");
    }
    if filter.user_id.is_some() {
        sql.push_str(" AND user_id = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.from.is_some() {
        sql.push_str(" AND created_at >= fromUnixTimestamp64Milli(?)");
    }
    if filter.to.is_some() {
        sql.push_str(" AND created_at <= fromUnixTimestamp64Milli(?)");
    }

    let binder = move |mut query: ::clickhouse::query::Query| {
        if let Some(session_id) = &filter.session_id {
            query = query.bind(session_id.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(from) = filter.from {
            query = query.bind(from.timestamp_millis());
        }
        if let Some(to) = filter.to {
            query = query.bind(to.timestamp_millis());
        }
        query
    };
    (sql, binder)
}

// ── Row types ─────────────────────────────────────────────────────────

#[derive(Debug, Row, Serialize, Deserialize)]
struct UserRow {
    id: String,
    email: String,
    password_hash: Option<String>,
    google_id: Option<String>,
    name: Option<String>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    created_at: DateTime<Utc>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    updated_at: DateTime<Utc>,
    version: u64,
}

impl UserRow {
    fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            google_id: user.google_id.clone(),
            name: user.name.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
            version: ClickHouseStore::version(user.updated_at),
        }
    }

    fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            google_id: self.google_id,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct ProjectRow {
    id: String,
    name: String,
    api_key_hash: String,
    owner_email: String,
    settings: Option<String>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    created_at: DateTime<Utc>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    updated_at: DateTime<Utc>,
    version: u64,
}

impl ProjectRow {
    fn from_project(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            api_key_hash: project.api_key_hash.clone(),
            owner_email: project.owner_email.clone(),
            settings: (!project.settings.is_null())
                .then(|| project.settings.to_string()),
            created_at: project.created_at,
            updated_at: project.updated_at,
            version: ClickHouseStore::version(project.updated_at),
        }
    }

    fn into_project(self) -> Project {
        Project {
            id: self.id,
            name: self.name,
            api_key_hash: self.api_key_hash,
            owner_email: self.owner_email,
            settings: self
                .settings
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct TraceRow {
    id: String,
    project_id: String,
    name: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    status: String,
    tags: String,
    metadata: String,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    created_at: DateTime<Utc>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    updated_at: DateTime<Utc>,
    version: u64,
}

impl TraceRow {
    fn from_trace(trace: &Trace) -> Self {
        Self {
            id: trace.id.clone(),
            project_id: trace.project_id.clone(),
            name: trace.name.clone(),
            session_id: trace.session_id.clone(),
            user_id: trace.user_id.clone(),
            status: trace.status.as_str().to_string(),
            tags: serde_json::to_string(&trace.tags).unwrap_or_else(|_| "[]".into()),
            metadata: serde_json::to_string(&trace.metadata).unwrap_or_else(|_| "{}".into()),
            created_at: trace.created_at,
            updated_at: trace.updated_at,
            version: ClickHouseStore::version(trace.updated_at),
        }
    }

    fn into_trace(self) -> Trace {
        Trace {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            session_id: self.session_id,
            user_id: self.user_id,
            status: TraceStatus::parse(&self.status).unwrap_or_default(),
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            metadata: serde_json::from_str(&self.metadata).unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct SpanRow {
    project_id: String,
    trace_id: String,
    id: String,
    parent_span_id: Option<String>,
    span_type: String,
    name: String,
    input: Option<String>,
    output: Option<String>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    cache_read_tokens: Option<i64>,
    cache_write_tokens: Option<i64>,
    reasoning_tokens: Option<i64>,
    cost_usd: Option<f64>,
    duration_ms: Option<i64>,
    first_token_ms: Option<i64>,
    status: String,
    stop_reason: Option<String>,
    error_message: Option<String>,
    model: Option<String>,
    provider: Option<String>,
    thinking: Option<String>,
    tool_uses: String,
    sub_type: Option<String>,
    metadata: String,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    started_at: DateTime<Utc>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis::option")]
    ended_at: Option<DateTime<Utc>>,
}

impl SpanRow {
    fn from_span(project_id: &str, span: &Span) -> Self {
        Self {
            project_id: project_id.to_string(),
            trace_id: span.trace_id.clone(),
            id: span.id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            span_type: span.span_type.as_str().to_string(),
            name: span.name.clone(),
            input: span.input.as_ref().map(|v| v.to_string()),
            output: span.output.as_ref().map(|v| v.to_string()),
            input_tokens: span.input_tokens.map(i64::from),
            output_tokens: span.output_tokens.map(i64::from),
            cache_read_tokens: span.cache_read_tokens.map(i64::from),
            cache_write_tokens: span.cache_write_tokens.map(i64::from),
            reasoning_tokens: span.reasoning_tokens.map(i64::from),
            cost_usd: span.cost_usd,
            duration_ms: span.duration_ms.map(|v| v as i64),
            first_token_ms: span.first_token_ms.map(|v| v as i64),
            status: span.status.as_str().to_string(),
            stop_reason: span.stop_reason.clone(),
            error_message: span.error_message.clone(),
            model: span.model.clone(),
            provider: span.provider.clone(),
            thinking: span.thinking.clone(),
            tool_uses: serde_json::to_string(&span.tool_uses).unwrap_or_else(|_| "[]".into()),
            sub_type: span.sub_type.map(|s| s.as_str().to_string()),
            metadata: serde_json::to_string(&span.metadata).unwrap_or_else(|_| "{}".into()),
            started_at: span.started_at,
            ended_at: span.ended_at,
        }
    }

    fn into_span(self) -> Span {
        Span {
            id: self.id,
            trace_id: self.trace_id,
            parent_span_id: self.parent_span_id,
            span_type: SpanType::parse_or_default(Some(&self.span_type)),
            name: self.name,
            input: self.input.as_deref().and_then(|s| serde_json::from_str(s).ok()),
            output: self.output.as_deref().and_then(|s| serde_json::from_str(s).ok()),
            input_tokens: self.input_tokens.map(|v| v.max(0) as u32),
            output_tokens: self.output_tokens.map(|v| v.max(0) as u32),
            cache_read_tokens: self.cache_read_tokens.map(|v| v.max(0) as u32),
            cache_write_tokens: self.cache_write_tokens.map(|v| v.max(0) as u32),
            reasoning_tokens: self.reasoning_tokens.map(|v| v.max(0) as u32),
            cost_usd: self.cost_usd,
            duration_ms: self.duration_ms.map(|v| v.max(0) as u64),
            first_token_ms: self.first_token_ms.map(|v| v.max(0) as u64),
            status: SpanStatus::parse_or_default(Some(&self.status)),
            stop_reason: self.stop_reason,
            error_message: self.error_message,
            model: self.model,
            provider: self.provider,
            thinking: self.thinking,
            tool_uses: serde_json::from_str(&self.tool_uses).unwrap_or_default(),
            sub_type: self.sub_type.as_deref().and_then(SpanSubType::parse),
            metadata: serde_json::from_str(&self.metadata).unwrap_or_default(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[derive(Debug, Default, Row, Deserialize)]
struct TraceMetricsRow {
    trace_id: String,
    total_spans: u64,
    total_tokens: u64,
    total_cost_usd: f64,
    total_duration_ms: u64,
}

#[derive(Debug, Row, Deserialize)]
struct TraceCountsRow {
    total_traces: u64,
    error_traces: u64,
}

#[derive(Debug, Row, Deserialize)]
struct SpanTotalsRow {
    total_spans: u64,
    total_tokens: u64,
    total_cost_usd: f64,
    total_duration_ms: u64,
}

#[derive(Debug, Row, Deserialize)]
struct SessionRow {
    session_id: String,
    trace_count: u64,
    total_tokens: u64,
    total_cost_usd: f64,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    first_seen: DateTime<Utc>,
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Row, Deserialize)]
struct BucketRow {
    #[serde(with = "::clickhouse::serde::chrono::datetime64::millis")]
    bucket: DateTime<Utc>,
    trace_count: u64,
    total_tokens: u64,
    total_cost_usd: f64,
}
