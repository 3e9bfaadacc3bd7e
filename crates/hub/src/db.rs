use anyhow::{Context, Result};
use irrigation_timers::{DayTime, Timer, TimerId};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct TimerRow {
    id: i64,
    name: String,
    start_time: i64,
    duration: i64,
}

impl TryFrom<TimerRow> for Timer {
    type Error = anyhow::Error;

    fn try_from(row: TimerRow) -> Result<Self> {
        let start = DayTime::new(row.start_time)
            .with_context(|| format!("timer {} has a corrupt start_time", row.id))?;
        let duration = u32::try_from(row.duration)
            .with_context(|| format!("timer {} has a corrupt duration", row.id))?;
        Ok(Timer::new(row.name, start, duration).with_id(row.id))
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/irrigation.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every in-memory connection is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Timers
    // ----------------------------

    pub async fn count_timers(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM timers")
            .fetch_one(&self.pool)
            .await
            .context("count_timers failed")?;
        Ok(n)
    }

    pub async fn list_timers(&self) -> Result<Vec<Timer>> {
        let rows: Vec<TimerRow> = sqlx::query_as(
            "SELECT id, name, start_time, duration FROM timers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("list_timers failed")?;

        rows.into_iter().map(Timer::try_from).collect()
    }

    pub async fn get_timer(&self, id: TimerId) -> Result<Option<Timer>> {
        let row: Option<TimerRow> = sqlx::query_as(
            "SELECT id, name, start_time, duration FROM timers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get_timer failed")?;

        row.map(Timer::try_from).transpose()
    }

    /// Store a new timer; the returned copy carries the assigned id.
    pub async fn insert_timer(&self, timer: &Timer) -> Result<Timer> {
        let now = now_unix();
        let result = sqlx::query(
            r#"
            INSERT INTO timers (name, start_time, duration, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&timer.name)
        .bind(i64::from(timer.start_time.as_secs()))
        .bind(i64::from(timer.duration))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("insert_timer failed")?;

        Ok(timer.clone().with_id(result.last_insert_rowid()))
    }

    /// Full replace. `None` when no timer has `id`.
    pub async fn update_timer(&self, id: TimerId, timer: &Timer) -> Result<Option<Timer>> {
        let result = sqlx::query(
            r#"
            UPDATE timers
            SET name = ?, start_time = ?, duration = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&timer.name)
        .bind(i64::from(timer.start_time.as_secs()))
        .bind(i64::from(timer.duration))
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update_timer failed")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(timer.clone().with_id(id)))
    }

    /// Returns whether a row was removed.
    pub async fn delete_timer(&self, id: TimerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM timers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_timer failed")?;
        Ok(result.rows_affected() > 0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn memory_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    /// Insert a row whose name is a blob, so every later listing fails to
    /// decode while writes keep working.
    pub(crate) async fn insert_unreadable_row(db: &Db) {
        sqlx::query(
            "INSERT INTO timers (name, start_time, duration, created_at, updated_at) \
             VALUES (X'FF', 0, 60, 0, 0)",
        )
        .execute(&db.pool)
        .await
        .unwrap();
    }

    fn timer(name: &str, start: &str, duration: u32) -> Timer {
        Timer::new(name, start.parse().unwrap(), duration)
    }

    #[tokio::test]
    async fn fresh_db_is_empty() {
        let db = memory_db().await;
        assert_eq!(db.count_timers().await.unwrap(), 0);
        assert!(db.list_timers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_lists_in_order() {
        let db = memory_db().await;
        let a = db.insert_timer(&timer("front", "06:00:00", 600)).await.unwrap();
        let b = db.insert_timer(&timer("back", "18:30:00", 300)).await.unwrap();
        assert!(a.id.is_some());
        assert!(b.id > a.id);

        let listed = db.list_timers().await.unwrap();
        assert_eq!(listed, vec![a, b]);
        assert_eq!(listed[1].start_time.to_string(), "18:30:00");
    }

    #[tokio::test]
    async fn get_unknown_timer_is_none() {
        let db = memory_db().await;
        assert!(db.get_timer(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_replaces_every_field() {
        let db = memory_db().await;
        let a = db.insert_timer(&timer("front", "06:00:00", 600)).await.unwrap();
        let id = a.id.unwrap();

        let updated = db
            .update_timer(id, &timer("lawn", "05:15:00", 1200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, Some(id));
        assert_eq!(db.get_timer(id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn update_unknown_timer_is_none() {
        let db = memory_db().await;
        let out = db.update_timer(7, &timer("x", "01:00:00", 60)).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let db = memory_db().await;
        let a = db.insert_timer(&timer("front", "06:00:00", 600)).await.unwrap();
        let id = a.id.unwrap();

        assert!(db.delete_timer(id).await.unwrap());
        assert!(!db.delete_timer(id).await.unwrap());
        assert_eq!(db.count_timers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreadable_row_fails_listing_but_not_inserts() {
        let db = memory_db().await;
        insert_unreadable_row(&db).await;
        assert!(db.list_timers().await.is_err());
        assert!(db.insert_timer(&timer("front", "06:00:00", 600)).await.is_ok());
    }

    #[tokio::test]
    async fn schema_rejects_out_of_range_rows() {
        let db = memory_db().await;
        let err = sqlx::query(
            "INSERT INTO timers (name, start_time, duration, created_at, updated_at) \
             VALUES ('bad', 90000, 60, 0, 0)",
        )
        .execute(&db.pool)
        .await;
        assert!(err.is_err());
    }
}
