use super::traits::{
    Record, RecordStore, RecordUpdate, StatusRow, StatusStore, StatusTableInfo, StorageError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// DuckDB implementation of the record and status stores
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn record_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Record> {
    Ok(Record {
        num: row.get(0)?,
        pregunta: row.get(1)?,
        respuesta: row.get(2)?,
        entonacion_p: row.get(3)?,
        entonacion_r: row.get(4)?,
        notas: row.get(5)?,
    })
}

fn select_record(conn: &Connection, project_id: &str, num: i64) -> Result<Option<Record>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT num, pregunta, respuesta, entonacion_p, entonacion_r, notas
         FROM records WHERE project_id = ? AND num = ?",
    )?;
    let mut rows = stmt.query(duckdb::params![project_id, num])?;
    match rows.next()? {
        Some(row) => Ok(Some(record_from_row(row)?)),
        None => Ok(None),
    }
}

fn status_table_exists(conn: &Connection, project_id: &str) -> Result<bool, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM status_tables WHERE project_id = ?",
        duckdb::params![project_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl DuckDbStorage {
    /// Open (or create) the database file and make sure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened DuckDB storage");
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        let conn = lock(&self.conn)?;

        // (project_id, num) is unique by construction. No PRIMARY KEY: DuckDB rejects
        // re-inserting a key deleted earlier in the same transaction.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                project_id VARCHAR NOT NULL,
                num BIGINT NOT NULL,
                pregunta VARCHAR NOT NULL DEFAULT '',
                respuesta VARCHAR NOT NULL DEFAULT '',
                entonacion_p VARCHAR NOT NULL DEFAULT '',
                entonacion_r VARCHAR NOT NULL DEFAULT '',
                notas VARCHAR NOT NULL DEFAULT ''
            )",
            [],
        )?;

        // One row per project that currently has a status table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS status_tables (
                project_id VARCHAR NOT NULL,
                operation VARCHAR NOT NULL,
                started_at_us BIGINT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS status_rows (
                project_id VARCHAR NOT NULL,
                num BIGINT NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                failed BOOLEAN NOT NULL DEFAULT FALSE,
                error VARCHAR NOT NULL DEFAULT ''
            )",
            [],
        )?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for DuckDbStorage {
    async fn list_records(&self, project_id: &str) -> Result<Vec<Record>, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT num, pregunta, respuesta, entonacion_p, entonacion_r, notas
                 FROM records WHERE project_id = ? ORDER BY num",
            )?;
            let records = stmt
                .query_map(duckdb::params![project_id], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_record(&self, project_id: &str, num: i64) -> Result<Option<Record>, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            select_record(&conn, &project_id, num)
        })
        .await
        .map_err(join_error)?
    }

    async fn update_record(
        &self,
        project_id: &str,
        num: i64,
        update: &RecordUpdate,
    ) -> Result<Record, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();
        let update = update.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut record = select_record(&conn, &project_id, num)?.ok_or_else(|| {
                StorageError::RecordNotFound {
                    project_id: project_id.clone(),
                    num,
                }
            })?;

            update.apply_to(&mut record);

            conn.execute(
                "UPDATE records
                 SET pregunta = ?, respuesta = ?, entonacion_p = ?, entonacion_r = ?, notas = ?
                 WHERE project_id = ? AND num = ?",
                duckdb::params![
                    record.pregunta,
                    record.respuesta,
                    record.entonacion_p,
                    record.entonacion_r,
                    record.notas,
                    project_id,
                    num,
                ],
            )?;

            Ok(record)
        })
        .await
        .map_err(join_error)?
    }

    async fn replace_records(&self, project_id: &str, records: &[Record]) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM records WHERE project_id = ?",
                duckdb::params![project_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO records (project_id, num, pregunta, respuesta, entonacion_p, entonacion_r, notas)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )?;
                for record in &records {
                    stmt.execute(duckdb::params![
                        project_id,
                        record.num,
                        record.pregunta,
                        record.respuesta,
                        record.entonacion_p,
                        record.entonacion_r,
                        record.notas,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn count_records(&self, project_id: &str) -> Result<usize, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM records WHERE project_id = ?",
                duckdb::params![project_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
        .map_err(join_error)?
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            for table in ["records", "status_rows", "status_tables"] {
                tx.execute(
                    &format!("DELETE FROM {} WHERE project_id = ?", table),
                    duckdb::params![project_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl StatusStore for DuckDbStorage {
    async fn create_table(
        &self,
        project_id: &str,
        operation: &str,
        rows: &[StatusRow],
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();
        let operation = operation.to_string();
        let rows = rows.to_vec();
        let started_at = Utc::now().timestamp_micros();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM status_rows WHERE project_id = ?",
                duckdb::params![project_id],
            )?;
            tx.execute(
                "DELETE FROM status_tables WHERE project_id = ?",
                duckdb::params![project_id],
            )?;
            tx.execute(
                "INSERT INTO status_tables (project_id, operation, started_at_us) VALUES (?, ?, ?)",
                duckdb::params![project_id, operation, started_at],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO status_rows (project_id, num, processed, failed, error)
                     VALUES (?, ?, ?, ?, ?)",
                )?;
                for row in &rows {
                    stmt.execute(duckdb::params![
                        project_id,
                        row.num,
                        row.processed,
                        row.failed,
                        row.error,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn table_info(&self, project_id: &str) -> Result<Option<StatusTableInfo>, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT operation, started_at_us FROM status_tables WHERE project_id = ?",
            )?;
            let mut rows = stmt.query(duckdb::params![project_id])?;
            match rows.next()? {
                Some(row) => {
                    let started_at_us: i64 = row.get(1)?;
                    let started_at = DateTime::from_timestamp_micros(started_at_us)
                        .ok_or_else(|| {
                            StorageError::Database(format!("invalid timestamp {}", started_at_us))
                        })?;
                    Ok(Some(StatusTableInfo {
                        operation: row.get(0)?,
                        started_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn upsert_row(&self, project_id: &str, row: &StatusRow) -> Result<bool, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();
        let row = row.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            if !status_table_exists(&conn, &project_id)? {
                return Ok(false);
            }

            let existing: i64 = conn.query_row(
                "SELECT count(*) FROM status_rows WHERE project_id = ? AND num = ?",
                duckdb::params![project_id, row.num],
                |r| r.get(0),
            )?;
            if existing == 0 {
                return Ok(false);
            }

            conn.execute(
                "UPDATE status_rows SET processed = ?, failed = ?, error = ?
                 WHERE project_id = ? AND num = ?",
                duckdb::params![row.processed, row.failed, row.error, project_id, row.num],
            )?;
            Ok(true)
        })
        .await
        .map_err(join_error)?
    }

    async fn read_rows(&self, project_id: &str) -> Result<Option<Vec<StatusRow>>, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            if !status_table_exists(&conn, &project_id)? {
                return Ok(None);
            }

            let mut stmt = conn.prepare(
                "SELECT num, processed, failed, error FROM status_rows
                 WHERE project_id = ? ORDER BY num",
            )?;
            let rows = stmt
                .query_map(duckdb::params![project_id], |row| {
                    Ok(StatusRow {
                        num: row.get(0)?,
                        processed: row.get(1)?,
                        failed: row.get(2)?,
                        error: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(rows))
        })
        .await
        .map_err(join_error)?
    }

    async fn delete_table(&self, project_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            let existed = status_table_exists(&tx, &project_id)?;
            tx.execute(
                "DELETE FROM status_rows WHERE project_id = ?",
                duckdb::params![project_id],
            )?;
            tx.execute(
                "DELETE FROM status_tables WHERE project_id = ?",
                duckdb::params![project_id],
            )?;
            tx.commit()?;
            Ok(existed)
        })
        .await
        .map_err(join_error)?
    }
}
