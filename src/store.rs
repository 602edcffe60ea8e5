// src/store.rs

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::defect::Defect;
use crate::error::StoreError;
use crate::retry::{ExtractionOutcome, RetryAttempt};

/// Request status recorded when the language model failed.
pub const FAILED: &str = "failed";

/// SQLite persistence for verdicts: one row per request, one per attempt.
pub struct VerdictStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAttempt {
    pub index: u32,
    pub status: String,
    pub parse_method: String,
    pub feedback: Option<String>,
    pub completion: String,
    pub record_json: String,
    pub defects: Vec<Defect>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub requests: usize,
    pub accepted: usize,
    pub accepted_with_warnings: usize,
    pub rejected: usize,
    pub failed: usize,
    pub attempts: usize,
}

impl VerdictStore {
    /// Open (or create) the store at `db_path`; `":memory:"` for tests.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS requests (
                request_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                attempt_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                parse_method TEXT NOT NULL,
                feedback TEXT,
                completion TEXT NOT NULL,
                record_json TEXT NOT NULL,
                defects_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (request_id, attempt_index),
                FOREIGN KEY (request_id) REFERENCES requests(request_id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_attempts_request_id ON attempts(request_id)",
            [],
        )?;

        info!("Verdict store initialized");
        Ok(Self { conn })
    }

    /// Store a finished request, replacing any earlier run with the same id.
    pub fn save_outcome(&self, outcome: &ExtractionOutcome) -> Result<(), StoreError> {
        let status = outcome.status().as_str();
        let tx = self.conn.unchecked_transaction()?;

        self.upsert_request(&outcome.request_id, status, outcome.attempts.len(), None)?;
        self.replace_attempts(&outcome.request_id, &outcome.attempts)?;

        tx.commit()?;
        info!(request_id = %outcome.request_id, status, "Outcome stored");
        Ok(())
    }

    /// Store a request abandoned after a language-model failure, with the
    /// attempts that completed before it.
    pub fn save_failure(
        &self,
        request_id: &str,
        error: &str,
        completed: &[RetryAttempt],
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        self.upsert_request(request_id, FAILED, completed.len(), Some(error))?;
        self.replace_attempts(request_id, completed)?;

        tx.commit()?;
        info!(request_id = %request_id, "Failure stored");
        Ok(())
    }

    fn upsert_request(
        &self,
        request_id: &str,
        status: &str,
        attempts: usize,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO requests (request_id, status, attempts, error)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(request_id) DO UPDATE SET
                status = excluded.status,
                attempts = excluded.attempts,
                error = excluded.error,
                updated_at = CURRENT_TIMESTAMP",
            params![request_id, status, attempts as i64, error],
        )?;
        Ok(())
    }

    fn replace_attempts(&self, request_id: &str, attempts: &[RetryAttempt]) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM attempts WHERE request_id = ?1", params![request_id])?;

        for attempt in attempts {
            let verdict = &attempt.verdict;
            self.conn.execute(
                "INSERT INTO attempts
                    (request_id, attempt_index, status, parse_method, feedback, completion, record_json, defects_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    request_id,
                    attempt.index,
                    verdict.status.as_str(),
                    verdict.record.parse_method().as_str(),
                    attempt.feedback,
                    attempt.completion,
                    serde_json::to_string(&verdict.record)?,
                    serde_json::to_string(&verdict.defects)?,
                ],
            )?;
        }
        debug!(request_id = %request_id, count = attempts.len(), "Attempts stored");
        Ok(())
    }

    /// Attempts of a request in order.
    pub fn get_attempts(&self, request_id: &str) -> Result<Vec<StoredAttempt>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT attempt_index, status, parse_method, feedback, completion, record_json, defects_json
             FROM attempts
             WHERE request_id = ?1
             ORDER BY attempt_index",
        )?;
        let rows = stmt.query_map(params![request_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            let (index, status, parse_method, feedback, completion, record_json, defects_json) = row?;
            attempts.push(StoredAttempt {
                index,
                status,
                parse_method,
                feedback,
                completion,
                record_json,
                defects: serde_json::from_str(&defects_json)?,
            });
        }
        Ok(attempts)
    }

    pub fn final_status(&self, request_id: &str) -> Result<Option<String>, StoreError> {
        let status = self
            .conn
            .query_row(
                "SELECT status FROM requests WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Get count of requests by final status
    pub fn get_counts(&self) -> Result<StoreCounts, StoreError> {
        let count_status = |status: &str| -> rusqlite::Result<usize> {
            self.conn.query_row(
                "SELECT COUNT(*) FROM requests WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )
        };

        let requests: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))?;
        let attempts: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM attempts", [], |row| row.get(0))?;

        Ok(StoreCounts {
            requests,
            accepted: count_status("accepted")?,
            accepted_with_warnings: count_status("accepted-with-warnings")?,
            rejected: count_status("rejected")?,
            failed: count_status(FAILED)?,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InvoiceRecord;
    use crate::retry::request_id_for;
    use crate::schema::SchemaSpec;
    use crate::validate::{ValidationEngine, ValidationPolicy};
    use rust_decimal::Decimal;
    use time::macros::date;

    fn attempt(schema: &SchemaSpec, index: u32, total: i64) -> RetryAttempt {
        let record = InvoiceRecord::builder(schema)
            .text("invoice_number", "INV-1")
            .date("invoice_date", date!(2024 - 05 - 02))
            .amount("subtotal", Decimal::new(10000, 2))
            .amount("tax", Decimal::new(1000, 2))
            .amount("total", Decimal::new(total, 2))
            .build();
        let verdict = ValidationEngine::new(schema, ValidationPolicy::default())
            .with_today(date!(2024 - 06 - 01))
            .validate(record);
        RetryAttempt {
            index,
            feedback: (index > 0).then(|| "- total [numeric-inconsistency]".to_string()),
            completion: "{}".to_string(),
            verdict,
        }
    }

    #[test]
    fn test_outcome_round_trip() {
        let schema = SchemaSpec::invoice_default();
        let store = VerdictStore::new(":memory:").unwrap();
        let id = request_id_for("Invoice INV-1");
        let outcome = ExtractionOutcome {
            request_id: id.clone(),
            attempts: vec![attempt(&schema, 0, 11500), attempt(&schema, 1, 11000)],
        };

        store.save_outcome(&outcome).unwrap();

        assert_eq!(store.final_status(&id).unwrap().as_deref(), Some("accepted"));
        let attempts = store.get_attempts(&id).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, "rejected");
        assert_eq!(attempts[0].parse_method, "structured");
        assert_eq!(attempts[0].defects.len(), 1);
        assert_eq!(attempts[0].defects[0].field, "total");
        assert!(attempts[0].feedback.is_none());
        assert!(attempts[1].feedback.is_some());
        assert!(attempts[1].record_json.contains("INV-1"));
    }

    #[test]
    fn test_rerun_replaces_attempts() {
        let schema = SchemaSpec::invoice_default();
        let store = VerdictStore::new(":memory:").unwrap();
        let first = ExtractionOutcome {
            request_id: "r1".to_string(),
            attempts: vec![attempt(&schema, 0, 11500), attempt(&schema, 1, 11500)],
        };
        let second = ExtractionOutcome {
            request_id: "r1".to_string(),
            attempts: vec![attempt(&schema, 0, 11000)],
        };

        store.save_outcome(&first).unwrap();
        store.save_outcome(&second).unwrap();

        assert_eq!(store.get_attempts("r1").unwrap().len(), 1);
        let counts = store.get_counts().unwrap();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.accepted, 1);
        assert_eq!(counts.attempts, 1);
    }

    #[test]
    fn test_counts_by_status() {
        let schema = SchemaSpec::invoice_default();
        let store = VerdictStore::new(":memory:").unwrap();
        store
            .save_outcome(&ExtractionOutcome {
                request_id: "a".to_string(),
                attempts: vec![attempt(&schema, 0, 11000)],
            })
            .unwrap();
        store
            .save_outcome(&ExtractionOutcome {
                request_id: "b".to_string(),
                attempts: vec![attempt(&schema, 0, 11500)],
            })
            .unwrap();
        store
            .save_failure("c", "no completion within 60s", &[attempt(&schema, 0, 11500)])
            .unwrap();

        let counts = store.get_counts().unwrap();
        assert_eq!(
            counts,
            StoreCounts {
                requests: 3,
                accepted: 1,
                accepted_with_warnings: 0,
                rejected: 1,
                failed: 1,
                attempts: 3,
            }
        );
        assert_eq!(store.final_status("missing").unwrap(), None);

        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["accepted_with_warnings"], 0);
    }
}
