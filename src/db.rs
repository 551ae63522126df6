use crate::error::{Result, StoreError};
use crate::models::{EmailAddress, Message};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

const EMAIL_COLUMNS: &str = "e.id, e.subject, e.content, e.original_content, e.thread_id, e.date, \
     e.from_email, e.from_name, e.imap_id, e.in_reply_to";

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        debug!(database_url, "connected to database");
        Ok(Self { pool })
    }

    /// Private in-memory database with the schema applied. The pool holds a
    /// single connection that never expires, since the data lives in it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    /// Newest email whose sender or subject contains `term`.
    pub async fn search_latest(&self, term: &str) -> Result<Option<Message>> {
        let pattern = format!("%{}%", escape_like(term));
        let sql = format!(
            "SELECT {EMAIL_COLUMNS}, 0 AS was_read
             FROM emails e
             WHERE e.from_email LIKE ? ESCAPE '\\'
                OR e.from_name LIKE ? ESCAPE '\\'
                OR e.subject LIKE ? ESCAPE '\\'
             ORDER BY e.date DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(message_from_row).transpose()
    }
}

/// Escapes `LIKE` wildcards so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let id: String = row.get("id");
    let nanos: i64 = row.get("date");
    let date = DateTime::from_timestamp(
        nanos.div_euclid(NANOS_PER_SECOND),
        nanos.rem_euclid(NANOS_PER_SECOND) as u32,
    )
    .ok_or_else(|| StoreError::InvalidDate {
        id: id.clone(),
        nanos,
    })?;

    Ok(Message {
        id,
        subject: row.get("subject"),
        content: row.get("content"),
        original_content: row.get("original_content"),
        thread_id: row.get("thread_id"),
        date,
        from: EmailAddress::new(
            row.get::<String, _>("from_email"),
            row.get::<String, _>("from_name"),
        ),
        imap_id: row.get("imap_id"),
        in_reply_to: row.get("in_reply_to"),
        was_read: row.get("was_read"),
    })
}

#[async_trait]
impl RecordStore for Database {
    async fn contains(&self, email_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM emails WHERE id = ?")
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn thread_messages(&self, thread_id: i64, user_id: Option<i64>) -> Result<Vec<Message>> {
        // Read markers are joined per query; the emails table has no read state.
        let sql = match user_id {
            Some(_) => format!(
                "SELECT {EMAIL_COLUMNS}, r.user_id IS NOT NULL AS was_read
                 FROM emails e
                 LEFT JOIN user_emails_read r ON r.email_id = e.id AND r.user_id = ?
                 WHERE e.thread_id = ?
                 ORDER BY e.date ASC, e.rowid ASC"
            ),
            None => format!(
                "SELECT {EMAIL_COLUMNS}, 0 AS was_read
                 FROM emails e
                 WHERE e.thread_id = ?
                 ORDER BY e.date ASC, e.rowid ASC"
            ),
        };

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        let rows = query.bind(thread_id).fetch_all(&self.pool).await?;
        debug!(thread_id, ?user_id, emails = rows.len(), "loaded thread");

        rows.iter().map(message_from_row).collect()
    }

    async fn thread_count(&self, thread_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(id) FROM emails WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    async fn find_all(&self) -> Result<Vec<Message>> {
        let sql = format!("SELECT {EMAIL_COLUMNS}, 0 AS was_read FROM emails e ORDER BY e.rowid ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn add(&self, email: &Message) -> Result<()> {
        // Dates are stored as nanoseconds since the epoch so they read back unchanged.
        let nanos = email
            .date
            .timestamp_nanos_opt()
            .ok_or_else(|| StoreError::DateOutOfRange {
                id: email.id.clone(),
            })?;

        let result = sqlx::query(
            "INSERT INTO emails (id, subject, content, original_content, thread_id, date, from_email, from_name, imap_id, in_reply_to)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&email.id)
        .bind(&email.subject)
        .bind(&email.content)
        .bind(&email.original_content)
        .bind(email.thread_id)
        .bind(nanos)
        .bind(&email.from.email)
        .bind(&email.from.name)
        .bind(&email.imap_id)
        .bind(&email.in_reply_to)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(email_id = %email.id, thread_id = email.thread_id, "added email");
                Ok(())
            }
            Err(err) => {
                let duplicate = err
                    .as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation());
                if duplicate {
                    Err(StoreError::Conflict {
                        id: email.id.clone(),
                    })
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn email_source(&self, email_id: &str) -> Result<String> {
        let row = sqlx::query("SELECT original_content FROM emails WHERE id = ?")
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(r.get(0)),
            None => Err(StoreError::NotFound {
                id: email_id.to_string(),
            }),
        }
    }

    async fn update_content(&self, email: &Message) -> Result<()> {
        let result = sqlx::query("UPDATE emails SET content = ? WHERE id = ?")
            .bind(&email.content)
            .bind(&email.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: email.id.clone(),
            });
        }
        Ok(())
    }

    async fn email_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    async fn mark_as_read(&self, email_id: &str, user_id: i64) -> Result<()> {
        if !self.contains(email_id).await? {
            return Err(StoreError::NotFound {
                id: email_id.to_string(),
            });
        }

        sqlx::query("INSERT OR IGNORE INTO user_emails_read (user_id, email_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_as_unread(&self, email_id: &str, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_emails_read WHERE user_id = ? AND email_id = ?")
            .bind(user_id)
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::message;
    use chrono::{TimeZone, Utc};

    async fn seeded() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.add(&message("1", 7, None, 1)).await.unwrap();
        db.add(&message("3", 7, Some("1"), 3)).await.unwrap();
        db.add(&message("2", 7, Some("1"), 2)).await.unwrap();
        db.add(&message("4", 7, Some("2"), 4)).await.unwrap();
        db.add(&message("other", 8, None, 5)).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_add_and_contains() {
        let db = Database::in_memory().await.unwrap();
        assert!(!db.contains("1").await.unwrap());

        db.add(&message("1", 1, None, 1)).await.unwrap();
        assert!(db.contains("1").await.unwrap());
        assert_eq!(db.email_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_duplicate_is_conflict() {
        let db = Database::in_memory().await.unwrap();
        db.add(&message("1", 1, None, 1)).await.unwrap();

        let err = db.add(&message("1", 2, None, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref id } if id == "1"));
        assert_eq!(db.email_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_thread_messages_sorted_by_date() {
        let db = seeded().await;
        let messages = db.thread_messages(7, None).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(db.thread_count(7).await.unwrap(), 4);
        assert_eq!(db.thread_count(8).await.unwrap(), 1);
        assert_eq!(db.thread_count(99).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_round_trips_optional_fields() {
        let db = Database::in_memory().await.unwrap();
        let mut email = message("1", 1, Some("<parent@example.com>"), 1_700_000_000);
        email.imap_id = Some("<child@example.com>".to_string());
        db.add(&email).await.unwrap();

        let stored = db.find_all().await.unwrap();
        assert_eq!(stored, vec![email]);
    }

    #[tokio::test]
    async fn test_read_markers_are_per_user() {
        let db = seeded().await;
        db.mark_as_read("2", 42).await.unwrap();
        db.mark_as_read("2", 42).await.unwrap();
        db.mark_as_read("3", 7).await.unwrap();

        let for_42 = db.thread_messages(7, Some(42)).await.unwrap();
        let read: Vec<&str> = for_42
            .iter()
            .filter(|m| m.was_read)
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(read, vec!["2"]);

        let anonymous = db.thread_messages(7, None).await.unwrap();
        assert!(anonymous.iter().all(|m| !m.was_read));

        db.mark_as_unread("2", 42).await.unwrap();
        let for_42 = db.thread_messages(7, Some(42)).await.unwrap();
        assert!(for_42.iter().all(|m| !m.was_read));
    }

    #[tokio::test]
    async fn test_mark_unknown_email_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        let err = db.mark_as_read("nope", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_email_source() {
        let db = seeded().await;
        assert_eq!(
            db.email_source("2").await.unwrap(),
            "Subject: Subject 2\r\n\r\nBody 2"
        );

        let err = db.email_source("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { ref id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_update_content() {
        let db = seeded().await;
        let mut email = db.thread_messages(8, None).await.unwrap().remove(0);
        email.set_content("<p>re-rendered</p>");
        db.update_content(&email).await.unwrap();

        let stored = db.thread_messages(8, None).await.unwrap();
        assert_eq!(stored[0].content, "<p>re-rendered</p>");
        assert_eq!(stored[0].original_content, email.original_content);

        let err = db
            .update_content(&message("missing", 1, None, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_thread_view_from_store() {
        let db = seeded().await;
        db.mark_as_read("4", 1).await.unwrap();

        let view = db.thread_view(7, Some(1)).await.unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view.root_count(), 1);

        let walked: Vec<(usize, &str, bool)> = view
            .walk()
            .map(|(depth, node)| (depth, node.message().id.as_str(), node.message().was_read))
            .collect();
        assert_eq!(
            walked,
            vec![(0, "1", false), (1, "2", false), (2, "4", true), (1, "3", false)]
        );
    }

    #[tokio::test]
    async fn test_empty_thread_view() {
        let db = Database::in_memory().await.unwrap();
        let view = db.thread_view(1, None).await.unwrap();
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn test_search_latest() {
        let db = seeded().await;
        let found = db.search_latest("Subject").await.unwrap().unwrap();
        assert_eq!(found.id, "other");
        assert!(db.search_latest("nothing-matches").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_latest_matches_wildcards_literally() {
        let db = Database::in_memory().await.unwrap();
        let mut sale = message("sale", 1, None, 1);
        sale.subject = "50% off_today".to_string();
        db.add(&sale).await.unwrap();
        db.add(&message("plain", 1, None, 2)).await.unwrap();

        assert!(db.search_latest("_ubject").await.unwrap().is_none());
        assert!(db.search_latest("Sub%ect").await.unwrap().is_none());

        let found = db.search_latest("% off_").await.unwrap().unwrap();
        assert_eq!(found.id, "sale");
    }

    #[tokio::test]
    async fn test_keeps_sub_millisecond_dates() {
        let db = Database::in_memory().await.unwrap();
        let mut email = message("1", 1, None, 0);
        email.date = Utc.timestamp_opt(1, 123_456_789).unwrap();
        db.add(&email).await.unwrap();

        let stored = db.find_all().await.unwrap();
        assert_eq!(stored[0].date, email.date);
        assert_eq!(stored, vec![email]);
    }

    #[tokio::test]
    async fn test_orders_by_sub_millisecond_dates() {
        let db = Database::in_memory().await.unwrap();
        let mut later = message("later", 1, None, 0);
        later.date = Utc.timestamp_opt(1, 500_000).unwrap();
        let mut earlier = message("earlier", 1, None, 0);
        earlier.date = Utc.timestamp_opt(1, 400_000).unwrap();
        db.add(&later).await.unwrap();
        db.add(&earlier).await.unwrap();

        let messages = db.thread_messages(1, None).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn test_pre_epoch_date_round_trips() {
        let db = Database::in_memory().await.unwrap();
        let mut email = message("old", 1, None, 0);
        email.date = Utc.timestamp_opt(-86_400, 999_999_999).unwrap();
        db.add(&email).await.unwrap();

        assert_eq!(db.find_all().await.unwrap()[0].date, email.date);
    }

    #[tokio::test]
    async fn test_add_rejects_date_outside_storable_range() {
        let db = Database::in_memory().await.unwrap();
        let mut email = message("far", 1, None, 0);
        email.date = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();

        let err = db.add(&email).await.unwrap_err();
        assert!(matches!(err, StoreError::DateOutOfRange { ref id } if id == "far"));
        assert!(!db.contains("far").await.unwrap());
    }
}
