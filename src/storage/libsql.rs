//! LibSQL storage backend implementation
//!
//! Writes share one connection: every write takes `write_lock`, and
//! multi-statement writes run inside a transaction. File-backed databases
//! run in WAL mode and each read opens its own connection, so reads only see
//! committed rows. `:memory:` databases are private to the connection that
//! created them, so there reads go through the write connection and can
//! observe a transaction that is still open.

use crate::error::{ReaderError, Result};
use crate::storage::{GenerationCommit, ReaderStorage};
use crate::types::{
    Article, ArticleId, Characterization, Comparison, ComparisonId, FeedbackId, FeedbackItem,
    Generation, GenerationFilter, GenerationId, NewArticle, NewComparison, Outcome, PoolEntry,
    ThumbsRating, DEFAULT_RATING,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use libsql::params::{IntoParams, Params};
use libsql::{params, Builder, Connection, Database, Row, Value};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Embedded migrations, applied in order and recorded in `_migrations_applied`
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial_schema.sql",
    include_str!("../../migrations/libsql/001_initial_schema.sql"),
)];

/// Stored ratings may differ from the expected ones by float noise only
const RATING_TOLERANCE: f64 = 1e-9;

const ARTICLE_COLUMNS: &str = "id, source, title, url, author, content_markdown, word_count, \
     received_at, elo_rating, elo_comparisons, elo_confidence, generation_id, user_rating, \
     rated_at, rating_refined";

const COMPARISON_COLUMNS: &str = "id, article_a_id, article_b_id, winner_id, outcome, \
     llm_reasoning, article_a_elo_before, article_a_elo_after, article_b_elo_before, \
     article_b_elo_after, k_factor, generation_id, created_at";

const GENERATION_SELECT: &str = "SELECT g.id, g.criteria_text, g.created_at, \
     g.diff_from_previous, g.feedback_count, g.parent_id, \
     CASE WHEN a.generation_id IS NULL THEN 0 ELSE 1 END \
     FROM generations g LEFT JOIN active_generation a ON a.generation_id = g.id";

const FEEDBACK_COLUMNS: &str =
    "id, article_id, feedback_text, characterization, created_at, generation_id";

/// Parse SQL file into individual statements, handling multi-line constructs like triggers
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;

    for line in sql.lines() {
        let trimmed = line.trim();

        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let upper = trimmed.to_uppercase();
        if upper.starts_with("BEGIN") || upper.contains(" BEGIN") {
            depth += 1;
        }
        if upper.starts_with("END") {
            depth = depth.saturating_sub(1);
        }

        if trimmed.ends_with(';') && depth == 0 {
            statements.push(current.clone());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ReaderError::Database(format!("Invalid stored timestamp: {}", ms)))
}

fn row_to_article(row: &Row) -> Result<Article> {
    let user_rating = row.get::<i64>(12)?;
    Ok(Article {
        id: ArticleId(row.get::<i64>(0)?),
        source: row.get::<String>(1)?,
        title: row.get::<String>(2)?,
        url: row.get::<Option<String>>(3)?,
        author: row.get::<Option<String>>(4)?,
        content_markdown: row.get::<String>(5)?,
        word_count: row.get::<Option<i64>>(6)?,
        received_at: from_millis(row.get::<i64>(7)?)?,
        elo_rating: row.get::<f64>(8)?,
        elo_comparisons: row.get::<i64>(9)? as u32,
        elo_confidence: row.get::<i64>(10)? != 0,
        generation_id: row.get::<Option<i64>>(11)?.map(GenerationId),
        user_rating: ThumbsRating::from_i64(user_rating).ok_or_else(|| {
            ReaderError::Database(format!("Invalid stored user rating: {}", user_rating))
        })?,
        rated_at: row.get::<Option<i64>>(13)?.map(from_millis).transpose()?,
        rating_refined: row.get::<i64>(14)? != 0,
    })
}

fn row_to_comparison(row: &Row) -> Result<Comparison> {
    let outcome = row.get::<String>(4)?;
    Ok(Comparison {
        id: ComparisonId(row.get::<i64>(0)?),
        article_a_id: ArticleId(row.get::<i64>(1)?),
        article_b_id: ArticleId(row.get::<i64>(2)?),
        winner_id: row.get::<Option<i64>>(3)?.map(ArticleId),
        outcome: Outcome::parse(&outcome)
            .ok_or_else(|| ReaderError::Database(format!("Invalid stored outcome: {}", outcome)))?,
        rationale: row.get::<String>(5)?,
        article_a_elo_before: row.get::<f64>(6)?,
        article_a_elo_after: row.get::<f64>(7)?,
        article_b_elo_before: row.get::<f64>(8)?,
        article_b_elo_after: row.get::<f64>(9)?,
        k_factor: row.get::<f64>(10)?,
        generation_id: row.get::<Option<i64>>(11)?.map(GenerationId),
        created_at: from_millis(row.get::<i64>(12)?)?,
    })
}

fn row_to_generation(row: &Row) -> Result<Generation> {
    Ok(Generation {
        id: GenerationId(row.get::<i64>(0)?),
        criteria_text: row.get::<String>(1)?,
        created_at: from_millis(row.get::<i64>(2)?)?,
        diff_from_previous: row.get::<Option<String>>(3)?,
        feedback_count: row.get::<i64>(4)? as u32,
        parent_id: row.get::<Option<i64>>(5)?.map(GenerationId),
        active: row.get::<i64>(6)? != 0,
    })
}

fn row_to_feedback(row: &Row) -> Result<FeedbackItem> {
    let characterization = row
        .get::<Option<String>>(3)?
        .map(|json| serde_json::from_str::<Characterization>(&json))
        .transpose()?;
    Ok(FeedbackItem {
        id: FeedbackId(row.get::<i64>(0)?),
        article_id: ArticleId(row.get::<i64>(1)?),
        text: row.get::<String>(2)?,
        characterization,
        created_at: from_millis(row.get::<i64>(4)?)?,
        generation_id: row.get::<Option<i64>>(5)?.map(GenerationId),
    })
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
}

impl ConnectionMode {
    /// `":memory:"` selects an in-memory database, anything else is a file path
    pub fn from_path(path: &str) -> Self {
        if path == ":memory:" {
            ConnectionMode::InMemory
        } else {
            ConnectionMode::Local(path.to_string())
        }
    }
}

/// LibSQL storage backend
pub struct LibsqlStorage {
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
    in_memory: bool,
}

impl LibsqlStorage {
    /// Validate database file before opening
    ///
    /// Returns `Ok(false)` when the file is missing and `must_exist` is false,
    /// `Ok(true)` when it exists and carries an SQLite header.
    fn validate_database_file(db_path: &str, must_exist: bool) -> Result<bool> {
        let path = std::path::Path::new(db_path);

        if !path.exists() {
            if must_exist {
                return Err(ReaderError::Database(format!(
                    "Database file not found at '{}'. Please run 'nerd-reader init' first.",
                    db_path
                )));
            }
            return Ok(false);
        }

        let bytes = std::fs::read(path).map_err(|e| {
            ReaderError::Database(format!("Cannot read database file at '{}': {}", db_path, e))
        })?;

        // Empty files are fine, SQLite initializes them on first write
        if !bytes.is_empty() && !bytes.starts_with(b"SQLite format 3\0") {
            return Err(ReaderError::Database(format!(
                "Database file at '{}' is corrupted or not a valid SQLite database.",
                db_path
            )));
        }

        debug!("Database file validation passed: {}", db_path);
        Ok(true)
    }

    /// Open storage, creating the database file only if `create_if_missing`
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!(
            "Connecting to LibSQL database: {:?} (create_if_missing: {})",
            mode, create_if_missing
        );

        let in_memory = matches!(mode, ConnectionMode::InMemory);
        let db = match mode {
            ConnectionMode::Local(ref path) => {
                let exists = Self::validate_database_file(path, !create_if_missing)?;
                if create_if_missing && !exists {
                    if let Some(parent) = std::path::Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent).map_err(|e| {
                                ReaderError::Database(format!(
                                    "Failed to create database directory {}: {}",
                                    parent.display(),
                                    e
                                ))
                            })?;
                        }
                    }
                }

                Builder::new_local(path).build().await.map_err(|e| {
                    ReaderError::Database(format!("Failed to create local database: {}", e))
                })?
            }
            ConnectionMode::InMemory => Builder::new_local(":memory:").build().await.map_err(|e| {
                ReaderError::Database(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let conn = db
            .connect()
            .map_err(|e| ReaderError::Database(format!("Failed to get connection: {}", e)))?;

        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| ReaderError::Database(format!("Failed to enable foreign keys: {}", e)))?;

        if !in_memory {
            // Readers on their own connections must not block on the writer
            let mut rows = conn
                .query("PRAGMA journal_mode=WAL", ())
                .await
                .map_err(|e| ReaderError::Database(format!("Failed to enable WAL mode: {}", e)))?;
            rows.next().await?;
        }

        let storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            in_memory,
        };

        storage.run_migrations().await?;
        info!("LibSQL database connection established");
        Ok(storage)
    }

    /// Open an existing database
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        Self::new_with_validation(mode, false).await
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        let _guard = self.write_lock.lock().await;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS _migrations_applied (
                    migration_name TEXT PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                )",
                params![],
            )
            .await
            .map_err(|e| {
                ReaderError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        for (migration_name, sql) in MIGRATIONS {
            let mut rows = self
                .conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*migration_name],
                )
                .await?;
            let already_applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            };
            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", migration_name);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!("Parsed {} statements from {}", statements.len(), migration_name);
            for (i, statement) in statements.iter().enumerate() {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                self.conn.execute(statement, params![]).await.map_err(|e| {
                    ReaderError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}\nStatement: {}",
                        i + 1,
                        migration_name,
                        e,
                        statement.chars().take(300).collect::<String>()
                    ))
                })?;
            }

            self.conn
                .execute(
                    "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                    params![*migration_name, Utc::now().timestamp()],
                )
                .await
                .map_err(|e| ReaderError::Migration(format!("Failed to record migration: {}", e)))?;

            info!("Executed migration: {}", migration_name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Connection for reads that must not see an open write transaction
    fn read_conn(&self) -> Result<Connection> {
        if self.in_memory {
            return Ok(self.conn.clone());
        }
        self.db
            .connect()
            .map_err(|e| ReaderError::Database(format!("Failed to get connection: {}", e)))
    }

    async fn query_articles(
        &self,
        sql: &str,
        params: impl IntoParams + Send,
    ) -> Result<Vec<Article>> {
        let conn = self.read_conn()?;
        let mut rows = conn.query(sql, params).await?;
        let mut articles = Vec::new();
        while let Some(row) = rows.next().await? {
            articles.push(row_to_article(&row)?);
        }
        Ok(articles)
    }

    async fn query_feedback(
        &self,
        sql: &str,
        params: impl IntoParams + Send,
    ) -> Result<Vec<FeedbackItem>> {
        let conn = self.read_conn()?;
        let mut rows = conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_feedback(&row)?);
        }
        Ok(items)
    }

    async fn get_comparison(&self, id: ComparisonId) -> Result<Comparison> {
        let sql = format!("SELECT {} FROM elo_comparisons WHERE id = ?", COMPARISON_COLUMNS);
        let conn = self.read_conn()?;
        let mut rows = conn.query(&sql, params![id.0]).await?;
        match rows.next().await? {
            Some(row) => row_to_comparison(&row),
            None => Err(ReaderError::Database(format!("Comparison {} vanished after insert", id))),
        }
    }

    async fn current_rating(conn: &Connection, id: ArticleId) -> Result<f64> {
        let mut rows = conn
            .query("SELECT elo_rating FROM articles WHERE id = ?", params![id.0])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<f64>(0)?),
            None => Err(ReaderError::ArticleNotFound(id)),
        }
    }

    /// Statements of `apply_comparison`, run inside its transaction
    async fn write_comparison(
        conn: &Connection,
        comparison: &NewComparison,
        confidence_threshold: u32,
    ) -> Result<ComparisonId> {
        for (id, expected) in [
            (comparison.article_a_id, comparison.article_a_elo_before),
            (comparison.article_b_id, comparison.article_b_elo_before),
        ] {
            let stored = Self::current_rating(conn, id).await?;
            if (stored - expected).abs() > RATING_TOLERANCE {
                return Err(ReaderError::ConcurrentMutation(format!(
                    "article {} rating is {} but comparison expected {}",
                    id, stored, expected
                )));
            }
        }

        conn.execute(
            r#"
            INSERT INTO elo_comparisons (
                article_a_id, article_b_id, winner_id, outcome, llm_reasoning,
                article_a_elo_before, article_a_elo_after,
                article_b_elo_before, article_b_elo_after,
                k_factor, generation_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                comparison.article_a_id.0,
                comparison.article_b_id.0,
                comparison.winner_id().map(|id| id.0),
                comparison.outcome.as_str(),
                comparison.rationale.clone(),
                comparison.article_a_elo_before,
                comparison.article_a_elo_after,
                comparison.article_b_elo_before,
                comparison.article_b_elo_after,
                comparison.k_factor,
                comparison.generation_id.0,
                to_millis(Utc::now()),
            ],
        )
        .await?;
        let comparison_id = ComparisonId(conn.last_insert_rowid());

        for (id, rating) in [
            (comparison.article_a_id, comparison.article_a_elo_after),
            (comparison.article_b_id, comparison.article_b_elo_after),
        ] {
            conn.execute(
                r#"
                UPDATE articles
                SET elo_rating = ?,
                    elo_comparisons = elo_comparisons + 1,
                    elo_confidence = CASE
                        WHEN elo_comparisons + 1 >= ? THEN 1
                        ELSE elo_confidence
                    END
                WHERE id = ?
                "#,
                params![rating, confidence_threshold as i64, id.0],
            )
            .await?;
        }

        Ok(comparison_id)
    }

    /// Statements of `commit_generation`, run inside its transaction
    async fn write_generation(conn: &Connection, commit: &GenerationCommit) -> Result<GenerationId> {
        let now = to_millis(Utc::now());

        conn.execute(
            r#"
            INSERT INTO generations (criteria_text, created_at, diff_from_previous, feedback_count, parent_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                commit.criteria_text.clone(),
                now,
                commit.diff_from_previous.clone(),
                commit.feedback_ids.len() as i64,
                commit.expected_active.0,
            ],
        )
        .await?;
        let generation_id = GenerationId(conn.last_insert_rowid());

        let flipped = conn
            .execute(
                r#"
                UPDATE active_generation
                SET generation_id = ?, version = version + 1, updated_at = ?
                WHERE singleton = 1 AND generation_id = ?
                "#,
                params![generation_id.0, now, commit.expected_active.0],
            )
            .await?;
        if flipped != 1 {
            return Err(ReaderError::ConcurrentMutation(format!(
                "generation {} is no longer active",
                commit.expected_active
            )));
        }

        let mut linked = 0u64;
        for feedback_id in &commit.feedback_ids {
            linked += conn
                .execute(
                    "UPDATE heuristic_feedback SET generation_id = ? WHERE id = ? AND generation_id IS NULL",
                    params![generation_id.0, feedback_id.0],
                )
                .await?;
        }
        if linked != commit.feedback_ids.len() as u64 {
            return Err(ReaderError::ConcurrentMutation(format!(
                "only {} of {} feedback items were still unlinked",
                linked,
                commit.feedback_ids.len()
            )));
        }

        Ok(generation_id)
    }
}

#[async_trait]
impl ReaderStorage for LibsqlStorage {
    async fn insert_article(&self, article: &NewArticle) -> Result<ArticleId> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                r#"
                INSERT INTO articles (source, title, url, author, content_markdown, word_count, received_at, elo_rating)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    article.source.clone(),
                    article.title.clone(),
                    article.url.clone(),
                    article.author.clone(),
                    article.content_markdown.clone(),
                    article.word_count,
                    to_millis(Utc::now()),
                    DEFAULT_RATING,
                ],
            )
            .await
            .map_err(|e| ReaderError::Database(format!("Failed to store article: {}", e)))?;
        let id = ArticleId(self.conn.last_insert_rowid());
        debug!("Stored article {}: {}", id, article.title);
        Ok(id)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Article> {
        let sql = format!("SELECT {} FROM articles WHERE id = ?", ARTICLE_COLUMNS);
        self.query_articles(&sql, params![id.0])
            .await?
            .into_iter()
            .next()
            .ok_or(ReaderError::ArticleNotFound(id))
    }

    async fn delete_article(&self, id: ArticleId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let deleted = self
            .conn
            .execute("DELETE FROM articles WHERE id = ?", params![id.0])
            .await?;
        if deleted == 0 {
            return Err(ReaderError::ArticleNotFound(id));
        }
        info!("Deleted article {}", id);
        Ok(())
    }

    async fn initialize_rating(&self, id: ArticleId, generation: GenerationId) -> Result<bool> {
        let updated = {
            let _guard = self.write_lock.lock().await;
            self.conn
                .execute(
                    r#"
                    UPDATE articles
                    SET elo_rating = ?, elo_confidence = 0, generation_id = ?
                    WHERE id = ? AND elo_comparisons = 0
                    "#,
                    params![DEFAULT_RATING, generation.0, id.0],
                )
                .await?
        };
        if updated == 0 {
            // Distinguish "already rated" from "missing"
            self.get_article(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn rated_pool(&self) -> Result<Vec<PoolEntry>> {
        let conn = self.read_conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, generation_id, elo_rating, elo_comparisons, elo_confidence
                FROM articles
                WHERE elo_comparisons > 0 OR generation_id IS NOT NULL
                "#,
                params![],
            )
            .await?;
        let mut pool = Vec::new();
        while let Some(row) = rows.next().await? {
            pool.push(PoolEntry {
                id: ArticleId(row.get::<i64>(0)?),
                generation_id: row.get::<Option<i64>>(1)?.map(GenerationId),
                elo_rating: row.get::<f64>(2)?,
                elo_comparisons: row.get::<i64>(3)? as u32,
                elo_confidence: row.get::<i64>(4)? != 0,
            });
        }
        Ok(pool)
    }

    async fn compared_opponents(&self, id: ArticleId) -> Result<HashSet<ArticleId>> {
        let conn = self.read_conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT article_b_id FROM elo_comparisons WHERE article_a_id = ?
                UNION
                SELECT article_a_id FROM elo_comparisons WHERE article_b_id = ?
                "#,
                params![id.0, id.0],
            )
            .await?;
        let mut opponents = HashSet::new();
        while let Some(row) = rows.next().await? {
            opponents.insert(ArticleId(row.get::<i64>(0)?));
        }
        Ok(opponents)
    }

    async fn apply_comparison(
        &self,
        comparison: &NewComparison,
        confidence_threshold: u32,
    ) -> Result<Comparison> {
        let comparison_id = {
            let _guard = self.write_lock.lock().await;
            let tx = self.conn.transaction().await?;
            match Self::write_comparison(&tx, comparison, confidence_threshold).await {
                Ok(id) => {
                    tx.commit().await.map_err(|e| {
                        let error_msg = e.to_string();
                        if error_msg.contains("locked") || error_msg.contains("busy") {
                            ReaderError::Database(
                                "Transaction failed: database is locked. Another process may be writing.".to_string(),
                            )
                        } else {
                            ReaderError::Database(format!("Transaction commit failed: {}", error_msg))
                        }
                    })?;
                    id
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("Rollback after failed comparison write failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        };

        debug!(
            "Recorded comparison {} ({} vs {}: {})",
            comparison_id, comparison.article_a_id, comparison.article_b_id, comparison.outcome
        );
        self.get_comparison(comparison_id).await
    }

    async fn mark_confident_if_stable(&self, id: ArticleId, threshold: u32) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE articles SET elo_confidence = 1 WHERE id = ? AND elo_comparisons >= ? AND elo_confidence = 0",
                params![id.0, threshold as i64],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn comparisons_for_article(&self, id: ArticleId) -> Result<Vec<Comparison>> {
        let sql = format!(
            "SELECT {} FROM elo_comparisons WHERE article_a_id = ? OR article_b_id = ? ORDER BY created_at ASC, id ASC",
            COMPARISON_COLUMNS
        );
        let conn = self.read_conn()?;
        let mut rows = conn.query(&sql, params![id.0, id.0]).await?;
        let mut comparisons = Vec::new();
        while let Some(row) = rows.next().await? {
            comparisons.push(row_to_comparison(&row)?);
        }
        Ok(comparisons)
    }

    async fn confident_ratings(&self) -> Result<Vec<f64>> {
        let conn = self.read_conn()?;
        let mut rows = conn
            .query("SELECT elo_rating FROM articles WHERE elo_confidence = 1", params![])
            .await?;
        let mut ratings = Vec::new();
        while let Some(row) = rows.next().await? {
            ratings.push(row.get::<f64>(0)?);
        }
        Ok(ratings)
    }

    async fn confident_articles(&self, filter: &GenerationFilter) -> Result<Vec<Article>> {
        let mut sql = format!("SELECT {} FROM articles WHERE elo_confidence = 1", ARTICLE_COLUMNS);
        let mut values: Vec<Value> = Vec::new();
        match filter {
            GenerationFilter::Any => {}
            GenerationFilter::In(generations) => {
                if generations.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; generations.len()].join(", ");
                sql.push_str(&format!(" AND generation_id IN ({})", placeholders));
                values.extend(generations.iter().map(|g| Value::Integer(g.0)));
            }
            GenerationFilter::AtLeast(generation) => {
                sql.push_str(" AND generation_id >= ?");
                values.push(Value::Integer(generation.0));
            }
        }
        sql.push_str(" ORDER BY elo_rating DESC, id ASC");
        self.query_articles(&sql, Params::Positional(values)).await
    }

    async fn unrated_articles(&self) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {} FROM articles WHERE elo_comparisons = 0 ORDER BY received_at ASC, id ASC",
            ARTICLE_COLUMNS
        );
        self.query_articles(&sql, params![]).await
    }

    async fn list_articles(&self, limit: usize) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {} FROM articles ORDER BY elo_rating DESC, id ASC LIMIT ?",
            ARTICLE_COLUMNS
        );
        self.query_articles(&sql, params![limit as i64]).await
    }

    async fn set_user_rating(&self, id: ArticleId, rating: ThumbsRating) -> Result<()> {
        let rated_at = match rating {
            ThumbsRating::Unrated => None,
            _ => Some(to_millis(Utc::now())),
        };
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE articles SET user_rating = ?, rated_at = ? WHERE id = ?",
                params![rating.as_i64(), rated_at, id.0],
            )
            .await?;
        if updated == 0 {
            return Err(ReaderError::ArticleNotFound(id));
        }
        Ok(())
    }

    async fn mark_rating_refined(&self, id: ArticleId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE articles SET rating_refined = 1 WHERE id = ?",
                params![id.0],
            )
            .await?;
        if updated == 0 {
            return Err(ReaderError::ArticleNotFound(id));
        }
        Ok(())
    }

    async fn seed_generation(&self, criteria_text: &str) -> Result<Generation> {
        {
            let _guard = self.write_lock.lock().await;
            if let Some(active) = self.active_generation().await? {
                return Ok(active);
            }

            let tx = self.conn.transaction().await?;
            let now = to_millis(Utc::now());
            tx.execute(
                "INSERT INTO generations (criteria_text, created_at, feedback_count) VALUES (?, ?, 0)",
                params![criteria_text, now],
            )
            .await?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO active_generation (singleton, generation_id, version, updated_at) VALUES (1, ?, 1, ?)",
                params![id, now],
            )
            .await?;
            tx.commit().await?;
            info!("Seeded initial generation {}", id);
        }

        self.active_generation()
            .await?
            .ok_or(ReaderError::NoActiveGeneration)
    }

    async fn active_generation(&self) -> Result<Option<Generation>> {
        let sql = format!("{} WHERE a.singleton = 1", GENERATION_SELECT);
        let conn = self.read_conn()?;
        let mut rows = conn.query(&sql, params![]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_generation(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_generation(&self, id: GenerationId) -> Result<Generation> {
        let sql = format!("{} WHERE g.id = ?", GENERATION_SELECT);
        let conn = self.read_conn()?;
        let mut rows = conn.query(&sql, params![id.0]).await?;
        match rows.next().await? {
            Some(row) => row_to_generation(&row),
            None => Err(ReaderError::GenerationNotFound(id)),
        }
    }

    async fn list_generations(&self) -> Result<Vec<Generation>> {
        let sql = format!("{} ORDER BY g.id DESC", GENERATION_SELECT);
        let conn = self.read_conn()?;
        let mut rows = conn.query(&sql, params![]).await?;
        let mut generations = Vec::new();
        while let Some(row) = rows.next().await? {
            generations.push(row_to_generation(&row)?);
        }
        Ok(generations)
    }

    async fn commit_generation(&self, commit: &GenerationCommit) -> Result<Generation> {
        let generation_id = {
            let _guard = self.write_lock.lock().await;
            let tx = self.conn.transaction().await?;
            match Self::write_generation(&tx, commit).await {
                Ok(id) => {
                    tx.commit().await?;
                    id
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("Rollback after failed generation commit failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        };

        info!(
            "Generation {} is now active (replaces {}, {} feedback items)",
            generation_id,
            commit.expected_active,
            commit.feedback_ids.len()
        );
        self.get_generation(generation_id).await
    }

    async fn insert_feedback(
        &self,
        article_id: ArticleId,
        characterization: Option<&Characterization>,
        text: &str,
    ) -> Result<FeedbackItem> {
        let characterization_json = characterization.map(serde_json::to_string).transpose()?;
        let created_at = Utc::now();

        let id = {
            let _guard = self.write_lock.lock().await;
            self.conn
                .execute(
                    r#"
                    INSERT INTO heuristic_feedback (article_id, feedback_text, characterization, created_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                    params![article_id.0, text, characterization_json, to_millis(created_at)],
                )
                .await
                .map_err(|e| {
                    let msg = e.to_string();
                    if msg.contains("FOREIGN KEY") {
                        ReaderError::ArticleNotFound(article_id)
                    } else {
                        ReaderError::Database(format!("Failed to store feedback: {}", msg))
                    }
                })?;
            FeedbackId(self.conn.last_insert_rowid())
        };

        Ok(FeedbackItem {
            id,
            article_id,
            characterization: characterization.cloned(),
            text: text.to_string(),
            // Stored precision is milliseconds
            created_at: from_millis(to_millis(created_at))?,
            generation_id: None,
        })
    }

    async fn unlinked_feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackItem>> {
        let sql = format!(
            "SELECT {} FROM heuristic_feedback WHERE generation_id IS NULL AND created_at >= ? ORDER BY created_at ASC, id ASC",
            FEEDBACK_COLUMNS
        );
        self.query_feedback(&sql, params![to_millis(since)]).await
    }

    async fn link_feedback(&self, ids: &[FeedbackId], generation: GenerationId) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut linked = 0;
        for id in ids {
            linked += self
                .conn
                .execute(
                    "UPDATE heuristic_feedback SET generation_id = ? WHERE id = ? AND generation_id IS NULL",
                    params![generation.0, id.0],
                )
                .await?;
        }
        Ok(linked)
    }

    async fn feedback_for_generation(&self, generation: GenerationId) -> Result<Vec<FeedbackItem>> {
        let sql = format!(
            "SELECT {} FROM heuristic_feedback WHERE generation_id = ? ORDER BY created_at ASC, id ASC",
            FEEDBACK_COLUMNS
        );
        self.query_feedback(&sql, params![generation.0]).await
    }

    async fn feedback_for_article(&self, article_id: ArticleId) -> Result<Vec<FeedbackItem>> {
        let sql = format!(
            "SELECT {} FROM heuristic_feedback WHERE article_id = ? ORDER BY created_at ASC, id ASC",
            FEEDBACK_COLUMNS
        );
        self.query_feedback(&sql, params![article_id.0]).await
    }
}
