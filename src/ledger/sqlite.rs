//! SQLite-backed result ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ResultEvent, ResultSink};
use crate::admission::Lane;
use crate::error::{Error, Result};
use crate::session::{CompletionSource, ResolutionStrategy};

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) a ledger file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite ledger initialized");
        Ok(ledger)
    }

    /// In-memory ledger (for testing)
    pub fn in_memory() -> Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.create_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::other("ledger connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS results (
                    id TEXT PRIMARY KEY,
                    session_key TEXT NOT NULL,
                    score INTEGER NOT NULL,
                    total INTEGER NOT NULL,
                    source TEXT NOT NULL,
                    lane TEXT NOT NULL,
                    race_resolved INTEGER NOT NULL DEFAULT 0,
                    strategy TEXT,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_results_session
                    ON results(session_key);
                "#,
        )?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<ResultEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_key, score, total, source, lane, race_resolved, strategy, recorded_at
             FROM results ORDER BY recorded_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, session_key, score, total, source, lane, race_resolved, strategy, recorded_at) =
                row?;
            events.push(ResultEvent {
                id: Uuid::parse_str(&id).map_err(|e| Error::with_source("bad result id", e))?,
                session_key,
                score,
                total,
                source: parse_source(&source)?,
                lane: parse_lane(&lane)?,
                race_resolved,
                strategy: strategy
                    .as_deref()
                    .map(|s| match s {
                        "manual_priority" => Ok(ResolutionStrategy::ManualPriority),
                        other => Err(Error::other(format!("unknown strategy '{other}'"))),
                    })
                    .transpose()?,
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|e| Error::with_source("bad recorded_at", e))?
                    .with_timezone(&Utc),
            });
        }
        Ok(events)
    }

    pub fn count_for(&self, session_key: &str) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM results WHERE session_key = ?1",
            params![session_key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ResultSink for SqliteLedger {
    async fn record(&self, event: &ResultEvent) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO results
                (id, session_key, score, total, source, lane, race_resolved, strategy, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.to_string(),
                event.session_key,
                event.score,
                event.total,
                event.source.as_str(),
                event.lane.as_str(),
                event.race_resolved,
                event.strategy.map(|s| s.as_str()),
                event.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn parse_source(s: &str) -> Result<CompletionSource> {
    match s {
        "manual" => Ok(CompletionSource::Manual),
        "auto" => Ok(CompletionSource::Auto),
        other => Err(Error::other(format!("unknown completion source '{other}'"))),
    }
}

fn parse_lane(s: &str) -> Result<Lane> {
    match s {
        "primary" => Ok(Lane::Primary),
        "backup" => Ok(Lane::Backup),
        other => Err(Error::other(format!("unknown lane '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let event = ResultEvent::new("52", 9, 10, CompletionSource::Manual, Lane::Backup)
            .with_resolution(true, Some(ResolutionStrategy::ManualPriority));

        ledger.record(&event).await.unwrap();

        let all = ledger.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, event.id);
        assert_eq!(all[0].lane, Lane::Backup);
        assert!(all[0].race_resolved);
        assert_eq!(all[0].strategy, Some(ResolutionStrategy::ManualPriority));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("results.db");

        {
            let ledger = SqliteLedger::new(&path).unwrap();
            let event = ResultEvent::new("29", 4, 10, CompletionSource::Auto, Lane::Primary);
            ledger.record(&event).await.unwrap();
        }

        let reopened = SqliteLedger::new(&path).unwrap();
        assert_eq!(reopened.count_for("29").unwrap(), 1);
        assert_eq!(reopened.count_for("40").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let event = ResultEvent::new("29", 4, 10, CompletionSource::Auto, Lane::Primary);

        ledger.record(&event).await.unwrap();
        assert!(ledger.record(&event).await.is_err());
    }
}
