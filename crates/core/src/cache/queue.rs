//! Sync queue operations.
//!
//! Every record handed to the sync coordinator gets a row here. Rows are never
//! deleted implicitly; they move between `pending`, `synced` and `failed`.

use super::connection::CacheDb;
use crate::{Error, QueuedRecord, Record, SyncState};
use chrono::Utc;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};

const SELECT_QUEUED: &str = "SELECT record_id, payload_json, created_at, sync_state, attempts, last_error FROM sync_queue";

type QueueRow = (i64, String, String, String, u32, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn queued_from_row(row: QueueRow) -> Result<QueuedRecord, Error> {
    let (id, payload_json, created_at, state, attempts, last_error) = row;
    Ok(QueuedRecord {
        id,
        payload: serde_json::from_str(&payload_json)?,
        created_at,
        sync_state: state.parse()?,
        attempts,
        last_error,
    })
}

impl CacheDb {
    /// Queue a record in the given state.
    ///
    /// Re-queuing an existing id replaces its payload and resets its state and
    /// attempt count, keeping its original position in the queue.
    pub async fn enqueue_record(&self, record: &Record, state: SyncState) -> Result<QueuedRecord, Error> {
        self.enqueue_attempted(record, state, 0, None).await
    }

    /// Queue a record together with the outcome of a live write already made.
    ///
    /// State, attempts and last error land in one statement, so a replay can
    /// never observe the row half written.
    pub async fn enqueue_attempted(
        &self, record: &Record, state: SyncState, attempts: u32, last_error: Option<String>,
    ) -> Result<QueuedRecord, Error> {
        let id = record.id;
        let payload_json = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO sync_queue (record_id, payload_json, created_at, sync_state, attempts, last_error, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?3)
                     ON CONFLICT(record_id) DO UPDATE SET
                        payload_json = excluded.payload_json,
                        sync_state = excluded.sync_state,
                        attempts = excluded.attempts,
                        last_error = excluded.last_error,
                        updated_at = excluded.updated_at",
                    params![id, payload_json, now, state.as_str(), attempts, last_error],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        self.queued_record(id)
            .await?
            .ok_or_else(|| Error::CacheUnavailable(format!("record {id} vanished after enqueue")))
    }

    /// Get a queued record by id.
    pub async fn queued_record(&self, id: i64) -> Result<Option<QueuedRecord>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<QueuedRecord>, Error> {
                let row = conn
                    .query_row(&format!("{SELECT_QUEUED} WHERE record_id = ?1"), params![id], read_row)
                    .optional()?;
                row.map(queued_from_row).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Pending records, oldest first.
    pub async fn pending_records(&self) -> Result<Vec<QueuedRecord>, Error> {
        self.records_where(Some(SyncState::Pending)).await
    }

    /// Every queued record regardless of state, oldest first.
    pub async fn all_queued(&self) -> Result<Vec<QueuedRecord>, Error> {
        self.records_where(None).await
    }

    async fn records_where(&self, state: Option<SyncState>) -> Result<Vec<QueuedRecord>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<QueuedRecord>, Error> {
                let rows = match state {
                    Some(state) => {
                        let mut stmt = conn.prepare(&format!("{SELECT_QUEUED} WHERE sync_state = ?1 ORDER BY seq"))?;
                        stmt.query_map(params![state.as_str()], read_row)?
                            .collect::<rusqlite::Result<Vec<_>>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!("{SELECT_QUEUED} ORDER BY seq"))?;
                        stmt.query_map([], read_row)?.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                };
                rows.into_iter().map(queued_from_row).collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Number of records still waiting for replay.
    pub async fn pending_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM sync_queue WHERE sync_state = 'pending'", [], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Record the outcome of a replay for one record.
    ///
    /// Returns false if the id is not queued.
    pub async fn mark_record(
        &self, id: i64, state: SyncState, attempts: u32, last_error: Option<String>,
    ) -> Result<bool, Error> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "UPDATE sync_queue SET sync_state = ?2, attempts = ?3, last_error = ?4, updated_at = ?5
                     WHERE record_id = ?1",
                    params![id, state.as_str(), attempts, last_error, now],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Move a failed record back to pending so the next replay picks it up.
    ///
    /// Returns false if the id is unknown or not in the failed state.
    pub async fn requeue_failed(&self, id: i64) -> Result<bool, Error> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "UPDATE sync_queue SET sync_state = 'pending', attempts = 0, last_error = NULL, updated_at = ?2
                     WHERE record_id = ?1 AND sync_state = 'failed'",
                    params![id, now],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, name: &str) -> Record {
        Record { id, name: name.into(), message: "hi".into(), timestamp: Utc::now().to_rfc3339() }
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let queued = db.enqueue_record(&record(1, "A"), SyncState::Pending).await.unwrap();

        assert_eq!(queued.id, 1);
        assert_eq!(queued.payload.name, "A");
        assert_eq!(queued.sync_state, SyncState::Pending);
        assert_eq!(queued.attempts, 0);
        assert!(db.queued_record(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_in_creation_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        // Ids deliberately out of order: creation order wins.
        db.enqueue_record(&record(30, "first"), SyncState::Pending).await.unwrap();
        db.enqueue_record(&record(10, "second"), SyncState::Pending).await.unwrap();
        db.enqueue_record(&record(20, "done"), SyncState::Synced).await.unwrap();
        db.enqueue_record(&record(5, "third"), SyncState::Pending).await.unwrap();

        let ids: Vec<i64> = db.pending_records().await.unwrap().iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![30, 10, 5]);
        assert_eq!(db.pending_count().await.unwrap(), 3);
        assert_eq!(db.all_queued().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mark_and_requeue() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.enqueue_record(&record(1, "A"), SyncState::Pending).await.unwrap();

        assert!(
            db.mark_record(1, SyncState::Failed, 3, Some("offline".into()))
                .await
                .unwrap()
        );
        let failed = db.queued_record(1).await.unwrap().unwrap();
        assert_eq!(failed.sync_state, SyncState::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_error.as_deref(), Some("offline"));
        assert!(db.pending_records().await.unwrap().is_empty());

        assert!(db.requeue_failed(1).await.unwrap());
        assert!(!db.requeue_failed(1).await.unwrap());
        let pending = db.queued_record(1).await.unwrap().unwrap();
        assert_eq!(pending.sync_state, SyncState::Pending);
        assert_eq!(pending.attempts, 0);

        assert!(!db.mark_record(99, SyncState::Synced, 1, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_reenqueue_keeps_position() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.enqueue_record(&record(1, "A"), SyncState::Pending).await.unwrap();
        db.enqueue_record(&record(2, "B"), SyncState::Pending).await.unwrap();
        db.mark_record(1, SyncState::Failed, 3, Some("x".into())).await.unwrap();

        let again = db.enqueue_record(&record(1, "A2"), SyncState::Pending).await.unwrap();
        assert_eq!(again.payload.name, "A2");
        assert!(again.last_error.is_none());

        let ids: Vec<i64> = db.pending_records().await.unwrap().iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_enqueue_attempted_writes_outcome_at_once() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let queued = db
            .enqueue_attempted(&record(1, "A"), SyncState::Pending, 1, Some("NETWORK_UNAVAILABLE: down".into()))
            .await
            .unwrap();

        assert_eq!(queued.sync_state, SyncState::Pending);
        assert_eq!(queued.attempts, 1);
        assert_eq!(queued.last_error.as_deref(), Some("NETWORK_UNAVAILABLE: down"));
        assert_eq!(db.queued_record(1).await.unwrap().unwrap(), queued);
    }
}
