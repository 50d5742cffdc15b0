//! Embedded, single-file SQLite event store: a per-aggregate append-only
//! log with optimistic versioning and advisory snapshots. One file, two
//! tables (`events`, `snapshots`); per-aggregate isolation is expressed
//! through the `aggregate_id` column and its index rather than one file per
//! aggregate, since a single-process engine gains nothing from a
//! multi-file layout.

use crate::events::DomainEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use research_core::error::ResearchError;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

/// A single persisted event, with its position in the aggregate's version
/// sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub aggregate_id: String,
    pub version: u64,
    pub event: DomainEvent,
    pub recorded_at: DateTime<Utc>,
}

/// An advisory snapshot of aggregate state at a given version. Snapshots
/// are a latency optimization only; correctness must hold under
/// events-only replay with no snapshot present.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub version: u64,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// The event-store capability: append, load, snapshot, enumerate.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically persists `events`, failing with
    /// [`ResearchError::VersionConflict`] if the stored version does not
    /// equal `expected_version`. On success the stored version becomes
    /// `expected_version + events.len()`.
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: Vec<DomainEvent>,
        expected_version: u64,
    ) -> Result<u64, ResearchError>;

    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, ResearchError>;

    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, ResearchError>;

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), ResearchError>;

    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, ResearchError>;

    async fn aggregate_ids(&self) -> Result<Vec<String>, ResearchError>;

    async fn current_version(&self, aggregate_id: &str) -> Result<u64, ResearchError>;
}

pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ResearchError> {
        let conn = Connection::open(path)?;
        let store = SqliteEventStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, ResearchError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteEventStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), ResearchError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                aggregate_id TEXT NOT NULL,
                version      INTEGER NOT NULL,
                event_type   TEXT NOT NULL,
                payload      TEXT NOT NULL,
                checksum     TEXT NOT NULL,
                recorded_at  TEXT NOT NULL,
                PRIMARY KEY (aggregate_id, version)
            );
            CREATE INDEX IF NOT EXISTS idx_events_aggregate
                ON events (aggregate_id);

            CREATE TABLE IF NOT EXISTS snapshots (
                aggregate_id TEXT PRIMARY KEY,
                version      INTEGER NOT NULL,
                data         TEXT NOT NULL,
                timestamp    TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn checksum(aggregate_id: &str, version: u64, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(aggregate_id.as_bytes());
        hasher.update(version.to_le_bytes());
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn current_version_locked(conn: &Connection, aggregate_id: &str) -> Result<u64, ResearchError> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT MAX(version) FROM events WHERE aggregate_id = ?1",
                params![aggregate_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: Vec<DomainEvent>,
        expected_version: u64,
    ) -> Result<u64, ResearchError> {
        if events.is_empty() {
            return Ok(expected_version);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let stored_version = Self::current_version_locked(&tx, aggregate_id)?;
        if stored_version != expected_version {
            return Err(ResearchError::version_conflict(
                aggregate_id,
                expected_version,
                stored_version,
            ));
        }

        let mut version = expected_version;
        let now = Utc::now();
        for event in &events {
            version += 1;
            let payload = serde_json::to_string(event)?;
            let checksum = Self::checksum(aggregate_id, version, &payload);
            tx.execute(
                "INSERT INTO events (aggregate_id, version, event_type, payload, checksum, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    aggregate_id,
                    version as i64,
                    event.event_type(),
                    payload,
                    checksum,
                    now.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(version)
    }

    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, ResearchError> {
        self.load_events_from(aggregate_id, 0).await
    }

    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, ResearchError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT version, payload, recorded_at FROM events
             WHERE aggregate_id = ?1 AND version > ?2
             ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![aggregate_id, from_version as i64], |row| {
            let version: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            let recorded_at: String = row.get(2)?;
            Ok((version, payload, recorded_at))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (version, payload, recorded_at) = row?;
            let event: DomainEvent = serde_json::from_str(&payload)?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| ResearchError::Serialization(e.to_string()))?
                .with_timezone(&Utc);
            events.push(StoredEvent {
                aggregate_id: aggregate_id.to_string(),
                version: version as u64,
                event,
                recorded_at,
            });
        }
        Ok(events)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), ResearchError> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(&snapshot.data)?;
        conn.execute(
            "INSERT INTO snapshots (aggregate_id, version, data, timestamp)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(aggregate_id) DO UPDATE SET
                version = excluded.version,
                data = excluded.data,
                timestamp = excluded.timestamp",
            params![
                snapshot.aggregate_id,
                snapshot.version as i64,
                data,
                snapshot.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, ResearchError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT version, data, timestamp FROM snapshots WHERE aggregate_id = ?1",
                params![aggregate_id],
                |row| {
                    let version: i64 = row.get(0)?;
                    let data: String = row.get(1)?;
                    let timestamp: String = row.get(2)?;
                    Ok((version, data, timestamp))
                },
            )
            .optional()?;

        match row {
            Some((version, data, timestamp)) => {
                let data: serde_json::Value = serde_json::from_str(&data)?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| ResearchError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(Some(Snapshot {
                    aggregate_id: aggregate_id.to_string(),
                    version: version as u64,
                    data,
                    timestamp,
                }))
            }
            None => Ok(None),
        }
    }

    async fn aggregate_ids(&self) -> Result<Vec<String>, ResearchError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT aggregate_id FROM events")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn current_version(&self, aggregate_id: &str) -> Result<u64, ResearchError> {
        let conn = self.conn.lock().unwrap();
        Self::current_version_locked(&conn, aggregate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::ResearchMode;

    fn started_event() -> DomainEvent {
        DomainEvent::ResearchStarted {
            query: "test query".into(),
            mode: ResearchMode::Diffusion,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_then_load_round_trips_in_version_order() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let v = store
            .append_events("agg-1", vec![started_event()], 0)
            .await
            .unwrap();
        assert_eq!(v, 1);

        let events = store.load_events("agg-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[0].event, started_event().clone());
    }

    #[tokio::test]
    async fn version_sequence_is_gap_free_starting_at_one() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store
            .append_events("agg-1", vec![started_event(), started_event()], 0)
            .await
            .unwrap();
        let events = store.load_events("agg-1").await.unwrap();
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].version, 2);
    }

    #[tokio::test]
    async fn conflicting_expected_version_is_rejected() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store
            .append_events("agg-1", vec![started_event()], 0)
            .await
            .unwrap();
        let err = store
            .append_events("agg-1", vec![started_event()], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn load_events_from_returns_only_newer_events() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store
            .append_events("agg-1", vec![started_event(), started_event(), started_event()], 0)
            .await
            .unwrap();
        let events = store.load_events_from("agg-1", 1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 2);
    }

    #[tokio::test]
    async fn snapshot_round_trips_and_upserts() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store
            .save_snapshot(Snapshot {
                aggregate_id: "agg-1".into(),
                version: 1,
                data: serde_json::json!({"status": "planning"}),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        store
            .save_snapshot(Snapshot {
                aggregate_id: "agg-1".into(),
                version: 2,
                data: serde_json::json!({"status": "searching"}),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let loaded = store.load_snapshot("agg-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.data["status"], "searching");
    }

    #[tokio::test]
    async fn correctness_holds_with_no_snapshot_present() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        assert!(store.load_snapshot("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aggregate_ids_enumerates_distinct_sessions() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append_events("agg-1", vec![started_event()], 0).await.unwrap();
        store.append_events("agg-2", vec![started_event()], 0).await.unwrap();
        let mut ids = store.aggregate_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["agg-1".to_string(), "agg-2".to_string()]);
    }
}
