use crate::types::{
    AggregatorError, AnalysisResult, AnalysisState, Article, ArticleCandidate, ArticleFilter,
    Result, SourceCursor, UpsertOutcome,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Counters behind the `stats` command.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_articles: i64,
    pub extracted: i64,
    pub analyzed: i64,
    pub pending_analysis: i64,
    pub by_source: Vec<(String, i64)>,
    pub cursors: Vec<SourceCursor>,
}

/// Articles keyed by URL plus per-source cursor state, on SQLite.
#[derive(Clone)]
pub struct ArticleStore {
    db: Pool<Sqlite>,
}

impl ArticleStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Opened article store at {}", database_url);
        Self::migrate(db).await
    }

    /// A private in-memory database. One connection, kept open for the life of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(db).await
    }

    async fn migrate(db: Pool<Sqlite>) -> Result<Self> {
        MIGRATOR.run(&db).await?;
        Ok(Self { db })
    }

    /// Insert when the URL is unseen. A known URL keeps its identity fields,
    /// extracted text and analysis; its summary is only filled in when the
    /// stored one is empty and the candidate carries one.
    pub async fn upsert_article(&self, candidate: &ArticleCandidate) -> Result<(Article, UpsertOutcome)> {
        let now = to_db_time(&Utc::now());
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO articles (url, source, headline, published_at, fetched_at, summary_content,
                                  analysis_state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'unanalyzed', ?, ?)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&candidate.url)
        .bind(&candidate.source)
        .bind(&candidate.headline)
        .bind(to_db_time(&candidate.published_at))
        .bind(to_db_time(&candidate.fetched_at))
        .bind(&candidate.summary_content)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let outcome = if inserted.rows_affected() > 0 {
            UpsertOutcome::Inserted
        } else {
            let incoming = candidate
                .summary_content
                .as_deref()
                .filter(|content| !content.trim().is_empty());

            let refreshed = match incoming {
                Some(content) => {
                    sqlx::query(
                        r#"
                        UPDATE articles SET summary_content = ?, updated_at = ?
                        WHERE url = ? AND (summary_content IS NULL OR trim(summary_content) = '')
                        "#,
                    )
                    .bind(content)
                    .bind(&now)
                    .bind(&candidate.url)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
                        > 0
                }
                None => false,
            };

            if refreshed {
                UpsertOutcome::Refreshed
            } else {
                UpsertOutcome::Unchanged
            }
        };

        let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
            .bind(&candidate.url)
            .fetch_one(&mut *tx)
            .await?;
        let article = article_from_row(&row)?;

        tx.commit().await?;

        debug!("Upserted {} ({:?}, id {})", article.url, outcome, article.id);
        Ok((article, outcome))
    }

    pub async fn get_cursor(&self, source_name: &str) -> Result<Option<SourceCursor>> {
        let row = sqlx::query("SELECT * FROM source_cursors WHERE source_name = ?")
            .bind(source_name)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(cursor_from_row).transpose()
    }

    /// Records a poll and raises the high-water mark. `last_seen_published_at`
    /// never moves backward; `None` leaves it as it is.
    pub async fn advance_cursor(
        &self,
        source_name: &str,
        polled_at: DateTime<Utc>,
        newest_published_at: Option<DateTime<Utc>>,
    ) -> Result<SourceCursor> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO source_cursors (source_name, last_polled_at, last_seen_published_at)
            VALUES (?, ?, ?)
            ON CONFLICT (source_name) DO UPDATE SET
                last_polled_at = excluded.last_polled_at,
                last_seen_published_at = CASE
                    WHEN excluded.last_seen_published_at IS NULL
                        THEN source_cursors.last_seen_published_at
                    WHEN source_cursors.last_seen_published_at IS NULL
                        THEN excluded.last_seen_published_at
                    WHEN excluded.last_seen_published_at > source_cursors.last_seen_published_at
                        THEN excluded.last_seen_published_at
                    ELSE source_cursors.last_seen_published_at
                END
            "#,
        )
        .bind(source_name)
        .bind(to_db_time(&polled_at))
        .bind(newest_published_at.as_ref().map(to_db_time))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM source_cursors WHERE source_name = ?")
            .bind(source_name)
            .fetch_one(&mut *tx)
            .await?;
        let cursor = cursor_from_row(&row)?;

        tx.commit().await?;

        debug!(
            "Cursor for {} now at {:?}",
            source_name, cursor.last_seen_published_at
        );
        Ok(cursor)
    }

    pub async fn list_cursors(&self) -> Result<Vec<SourceCursor>> {
        let rows = sqlx::query("SELECT * FROM source_cursors ORDER BY last_polled_at DESC, source_name")
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(cursor_from_row).collect()
    }

    /// Most recently published first.
    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE 1 = 1");

        if let Some(source) = &filter.source {
            query.push(" AND source = ").push_bind(source.clone());
        }
        if filter.unanalyzed_only {
            query.push(" AND analysis IS NULL");
        }
        if filter.unextracted_only {
            query.push(" AND extracted_text IS NULL");
        }

        query.push(" ORDER BY published_at DESC, id DESC");

        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(article_from_row).collect()
    }

    /// Articles without an analysis, oldest fetch first. Articles whose last
    /// attempt failed queue behind those never tried.
    pub async fn list_unanalyzed(&self, limit: Option<usize>) -> Result<Vec<Article>> {
        self.list_oldest_fetched("analysis IS NULL", "last_error", limit).await
    }

    /// Articles without extracted text, oldest fetch first. Articles whose last
    /// extraction failed queue behind those never tried.
    pub async fn list_unextracted(&self, limit: Option<usize>) -> Result<Vec<Article>> {
        self.list_oldest_fetched("extracted_text IS NULL", "extraction_error", limit)
            .await
    }

    async fn list_oldest_fetched(
        &self,
        condition: &str,
        error_column: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Article>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE ");
        query.push(condition);
        query.push(" ORDER BY ");
        query.push(error_column);
        query.push(" IS NOT NULL, fetched_at ASC, id ASC");

        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(article_from_row).collect()
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(article_from_row).transpose()
    }

    pub async fn save_extracted_text(&self, id: i64, text: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE articles SET extracted_text = ?, extraction_error = NULL, updated_at = ? WHERE id = ?",
        )
            .bind(text)
            .bind(to_db_time(&Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::ArticleNotFound { id });
        }

        debug!("Stored {} chars of extracted text for article {}", text.len(), id);
        Ok(())
    }

    /// Keeps the reason a download or extraction failed. The article stays
    /// unextracted and moves to the back of the extraction queue.
    pub async fn record_extraction_failure(&self, id: i64, reason: &str) -> Result<()> {
        let result = sqlx::query("UPDATE articles SET extraction_error = ?, updated_at = ? WHERE id = ?")
            .bind(reason)
            .bind(to_db_time(&Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::ArticleNotFound { id });
        }
        Ok(())
    }

    /// Writes the analysis and moves the article to `analyzed`. Fails with
    /// `Conflict` when one is already stored and `overwrite` is not set.
    pub async fn save_analysis(&self, id: i64, analysis: &AnalysisResult, overwrite: bool) -> Result<Article> {
        let payload = serde_json::to_string(analysis)?;
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE articles
            SET analysis = ?, analysis_state = 'analyzed', claimed_at = NULL, claim_token = NULL,
                last_error = NULL, updated_at = ?
            WHERE id = ? AND (analysis IS NULL OR ?)
            "#,
        )
        .bind(&payload)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .bind(overwrite)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = article_exists(&mut *tx, id).await?;
            return Err(if exists {
                AggregatorError::Conflict { id }
            } else {
                AggregatorError::ArticleNotFound { id }
            });
        }

        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let article = article_from_row(&row)?;

        tx.commit().await?;
        Ok(article)
    }

    /// Moves the article into `analyzing` and returns the token that owns
    /// the claim. Only one live claim may exist per article; a claim older
    /// than `ttl` counts as abandoned and may be taken over.
    pub async fn claim_for_analysis(&self, id: i64, overwrite: bool, ttl: Duration) -> Result<Uuid> {
        let now = Utc::now();
        let token = Uuid::new_v4();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE articles SET analysis_state = 'analyzing', claimed_at = ?, claim_token = ?, updated_at = ?
            WHERE id = ?
              AND (analysis IS NULL OR ?)
              AND (analysis_state != 'analyzing' OR claimed_at IS NULL OR claimed_at < ?)
            "#,
        )
        .bind(to_db_time(&now))
        .bind(token.to_string())
        .bind(to_db_time(&now))
        .bind(id)
        .bind(overwrite)
        .bind(to_db_time(&(now - ttl)))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            tx.commit().await?;
            debug!("Claimed article {} for analysis ({})", id, token);
            return Ok(token);
        }

        let row = sqlx::query("SELECT (analysis IS NOT NULL) AS analyzed FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        match row {
            None => Err(AggregatorError::ArticleNotFound { id }),
            Some(row) if row.try_get::<i64, _>("analyzed")? != 0 && !overwrite => {
                Err(AggregatorError::Conflict { id })
            }
            Some(_) => Err(AggregatorError::Claimed { id }),
        }
    }

    /// Stores the analysis under a claim. Fails with `Claimed` when the claim
    /// expired and another worker took the article over; nothing is written.
    pub async fn complete_claim(&self, id: i64, token: Uuid, analysis: &AnalysisResult) -> Result<Article> {
        let payload = serde_json::to_string(analysis)?;
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE articles
            SET analysis = ?, analysis_state = 'analyzed', claimed_at = NULL, claim_token = NULL,
                last_error = NULL, updated_at = ?
            WHERE id = ? AND analysis_state = 'analyzing' AND claim_token = ?
            "#,
        )
        .bind(&payload)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .bind(token.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = article_exists(&mut *tx, id).await?;
            return Err(if exists {
                AggregatorError::Claimed { id }
            } else {
                AggregatorError::ArticleNotFound { id }
            });
        }

        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let article = article_from_row(&row)?;

        tx.commit().await?;
        debug!("Completed claim {} on article {}", token, id);
        Ok(article)
    }

    /// Drops a claim after a failed attempt. The article returns to the state
    /// its stored analysis implies and keeps the failure reason. A claim that
    /// has since passed to another worker is left alone; returns whether this
    /// token still held it.
    pub async fn release_claim(&self, id: i64, token: Uuid, reason: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET analysis_state = CASE WHEN analysis IS NULL THEN 'unanalyzed' ELSE 'analyzed' END,
                claimed_at = NULL, claim_token = NULL, last_error = ?, updated_at = ?
            WHERE id = ? AND analysis_state = 'analyzing' AND claim_token = ?
            "#,
        )
        .bind(reason)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .bind(token.to_string())
        .execute(&self.db)
        .await?;

        let released = result.rows_affected() > 0;
        if !released {
            debug!("Claim {} on article {} was no longer held", token, id);
        }
        Ok(released)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(extracted_text IS NOT NULL), 0) AS extracted,
                   COALESCE(SUM(analysis IS NOT NULL), 0) AS analyzed
            FROM articles
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let total_articles: i64 = totals.try_get("total")?;
        let extracted: i64 = totals.try_get("extracted")?;
        let analyzed: i64 = totals.try_get("analyzed")?;

        let by_source = sqlx::query(
            "SELECT source, COUNT(*) AS count FROM articles GROUP BY source ORDER BY count DESC, source",
        )
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(|row| Ok((row.try_get::<String, _>("source")?, row.try_get::<i64, _>("count")?)))
        .collect::<Result<Vec<_>>>()?;

        Ok(StoreStats {
            total_articles,
            extracted,
            analyzed,
            pending_analysis: total_articles - analyzed,
            by_source,
            cursors: self.list_cursors().await?,
        })
    }
}

async fn article_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM articles WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

/// Fixed-width RFC 3339, so comparing the stored text compares the instants.
fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| AggregatorError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    let analysis = row
        .try_get::<Option<String>, _>("analysis")?
        .map(|payload| serde_json::from_str::<AnalysisResult>(&payload))
        .transpose()?;

    let state: String = row.try_get("analysis_state")?;
    let analysis_state = AnalysisState::from_str(&state)
        .map_err(|e| AggregatorError::Database(sqlx::Error::Decode(Box::new(e))))?;

    Ok(Article {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        source: row.try_get("source")?,
        headline: row.try_get("headline")?,
        published_at: from_db_time(&row.try_get::<String, _>("published_at")?)?,
        fetched_at: from_db_time(&row.try_get::<String, _>("fetched_at")?)?,
        summary_content: row.try_get("summary_content")?,
        extracted_text: row.try_get("extracted_text")?,
        analysis,
        analysis_state,
        last_error: row.try_get("last_error")?,
        extraction_error: row.try_get("extraction_error")?,
        created_at: from_db_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: from_db_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn cursor_from_row(row: &SqliteRow) -> Result<SourceCursor> {
    Ok(SourceCursor {
        source_name: row.try_get("source_name")?,
        last_polled_at: from_db_time(&row.try_get::<String, _>("last_polled_at")?)?,
        last_seen_published_at: row
            .try_get::<Option<String>, _>("last_seen_published_at")?
            .as_deref()
            .map(from_db_time)
            .transpose()?,
    })
}
