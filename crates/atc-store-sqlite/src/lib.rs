//! SQLite-backed persistence for `atc-core`'s store traits (`spec.md` §4.8,
//! component C8).
//!
//! Grounded on `forwarder::storage::journal::Journal`: PRAGMA setup at
//! open, an `execute_batch` schema file, an integrity check, and
//! prepared-statement-shaped query helpers. `rusqlite::Connection` is
//! blocking and `!Sync`, so every call hops onto a `spawn_blocking` task
//! against a connection shared behind a `std::sync::Mutex`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atc_core::store::{ClearanceStore, StoreError, TranscriptionStore};
use atc_core::{Clearance, TranscriptionRecord};
use atc_protocol::{FrequencyId, SpeakerType, TranscriptionId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sqlite_err)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite worker task panicked: {e}")))?
    }
}

#[async_trait]
impl TranscriptionStore for SqliteStore {
    async fn insert_transcription(&self, record: &TranscriptionRecord) -> Result<TranscriptionId, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO transcriptions
                     (id, frequency_id, created_at, content, is_complete, is_processed, content_processed, speaker_type, callsign)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.frequency_id.to_string(),
                    record.created_at.to_rfc3339(),
                    record.content,
                    record.is_complete as i64,
                    record.is_processed as i64,
                    record.content_processed,
                    record.speaker_type.map(speaker_to_str),
                    record.callsign,
                ],
            )
            .map_err(sqlite_err)?;
            Ok(record.id)
        })
        .await
    }

    async fn get_unprocessed_transcriptions(&self, batch_size: u32) -> Result<Vec<TranscriptionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, frequency_id, created_at, content, is_complete, is_processed, content_processed, speaker_type, callsign
                     FROM transcriptions
                     WHERE is_complete = 1 AND is_processed = 0
                     ORDER BY created_at ASC
                     LIMIT ?1",
                )
                .map_err(sqlite_err)?;
            let rows = stmt
                .query_map(params![batch_size], map_row)
                .map_err(sqlite_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sqlite_err)?;
            Ok(rows)
        })
        .await
    }

    async fn update_processed(
        &self,
        id: TranscriptionId,
        content_processed: &str,
        speaker_type: Option<SpeakerType>,
        callsign: Option<&str>,
    ) -> Result<(), StoreError> {
        let content_processed = content_processed.to_owned();
        let callsign = callsign.map(str::to_owned);
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE transcriptions
                     SET is_processed = 1, content_processed = ?2, speaker_type = ?3, callsign = ?4
                     WHERE id = ?1",
                    params![id.to_string(), content_processed, speaker_type.map(speaker_to_str), callsign],
                )
                .map_err(sqlite_err)?;
            if updated == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn get_last_processed_transcriptions(
        &self,
        frequency_id: FrequencyId,
        limit: u32,
    ) -> Result<Vec<TranscriptionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, frequency_id, created_at, content, is_complete, is_processed, content_processed, speaker_type, callsign
                     FROM transcriptions
                     WHERE frequency_id = ?1 AND is_processed = 1
                     ORDER BY created_at DESC
                     LIMIT ?2",
                )
                .map_err(sqlite_err)?;
            let rows = stmt
                .query_map(params![frequency_id.to_string(), limit], map_row)
                .map_err(sqlite_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sqlite_err)?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ClearanceStore for SqliteStore {
    async fn insert_clearance(&self, record: &Clearance) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO clearances (id, transcription_id, callsign, clearance_type, text, runway, issued_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.transcription_id.to_string(),
                    record.callsign,
                    record.clearance_type,
                    record.text,
                    record.runway,
                    record.issued_at.to_rfc3339(),
                    record.status,
                ],
            )
            .map_err(sqlite_err)?;
            Ok(())
        })
        .await
    }
}

fn speaker_to_str(speaker: SpeakerType) -> &'static str {
    match speaker {
        SpeakerType::Atc => "ATC",
        SpeakerType::Pilot => "PILOT",
    }
}

fn str_to_speaker(s: &str) -> Option<SpeakerType> {
    match s {
        "ATC" => Some(SpeakerType::Atc),
        "PILOT" => Some(SpeakerType::Pilot),
        _ => None,
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<TranscriptionRecord> {
    let id: String = row.get(0)?;
    let frequency_id: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let speaker_type: Option<String> = row.get(7)?;
    Ok(TranscriptionRecord {
        id: parse_uuid(&id)?,
        frequency_id: parse_uuid(&frequency_id)?,
        created_at: parse_timestamp(&created_at)?,
        content: row.get(3)?,
        is_complete: row.get::<_, i64>(4)? != 0,
        is_processed: row.get::<_, i64>(5)? != 0,
        content_processed: row.get(6)?,
        speaker_type: speaker_type.as_deref().and_then(str_to_speaker),
        callsign: row.get(8)?,
    })
}

fn parse_uuid(s: &str) -> rusqlite::Result<uuid::Uuid> {
    s.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "uuid".to_owned(), rusqlite::types::Type::Text))
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "timestamp".to_owned(), rusqlite::types::Type::Text))
}

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )
    .map_err(sqlite_err)
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn
        .pragma_query_value(None, "integrity_check", |row| row.get(0))
        .map_err(sqlite_err)?;
    if result != "ok" {
        return Err(StoreError::Backend(format!("sqlite integrity check failed: {result}")));
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(include_str!("schema.sql")).map_err(sqlite_err)
}
