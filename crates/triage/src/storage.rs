//! Persistence of ranked findings.
//!
//! Every sink receives the report already in rank order and must preserve
//! both that order and the full evidence of each finding.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::info;

use crate::report::TriageReport;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("time conversion error: {0}")]
    Time(#[from] std::time::SystemTimeError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persistence collaborator.
#[async_trait]
pub trait FindingSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write_report(&self, report: &TriageReport) -> Result<(), StorageError>;
}

async fn write_file(path: &Path, contents: String) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(io_err)
}

/// Pretty JSON of the whole report.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FindingSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn write_report(&self, report: &TriageReport) -> Result<(), StorageError> {
        write_file(&self.path, report.to_json()?).await?;
        info!(path = %self.path.display(), findings = report.findings.len(), "wrote JSON report");
        Ok(())
    }
}

/// Human-readable Markdown rendering.
pub struct MarkdownFileSink {
    path: PathBuf,
}

impl MarkdownFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FindingSink for MarkdownFileSink {
    fn name(&self) -> &str {
        "markdown"
    }

    async fn write_report(&self, report: &TriageReport) -> Result<(), StorageError> {
        write_file(&self.path, report.to_markdown()).await?;
        info!(path = %self.path.display(), "wrote Markdown report");
        Ok(())
    }
}

/// Summary columns of one stored finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingRow {
    pub run_id: i64,
    pub rank: i64,
    pub address: String,
    pub classification: String,
    pub total_score: i64,
    /// Net profit in wei as a decimal string, when a template validated.
    pub net_profit: Option<String>,
}

/// SQLite store keeping one row per scan run and one row per finding.
#[derive(Debug)]
pub struct SqliteFindingStore {
    connection: Mutex<Connection>,
}

impl SqliteFindingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, StorageError> {
        let store = Self {
            connection: Mutex::new(connection),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_schema(&self) -> Result<(), StorageError> {
        self.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scan_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                block_number INTEGER NOT NULL,
                created_at_unix INTEGER NOT NULL,
                summary_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES scan_runs(id),
                rank INTEGER NOT NULL,
                address TEXT NOT NULL,
                classification TEXT NOT NULL,
                total_score INTEGER NOT NULL,
                net_profit TEXT,
                evidence_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS findings_run_rank ON findings (run_id, rank);
            ",
        )?;
        Ok(())
    }

    /// Store a report in one transaction and return its run id.
    pub fn insert_report(&self, report: &TriageReport) -> Result<i64, StorageError> {
        let created_at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let summary_json = serde_json::to_string(&report.summary)?;

        let mut connection = self.lock();
        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO scan_runs (block_number, created_at_unix, summary_json) VALUES (?1, ?2, ?3)",
            params![report.block_number as i64, created_at as i64, summary_json],
        )?;
        let run_id = tx.last_insert_rowid();

        for (rank, finding) in report.findings.iter().enumerate() {
            let evidence_json = serde_json::to_string(finding)?;
            let classification = serde_json::to_value(finding.classification)?
                .as_str()
                .unwrap_or_default()
                .to_owned();
            tx.execute(
                "
                INSERT INTO findings (run_id, rank, address, classification, total_score, net_profit, evidence_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    run_id,
                    rank as i64,
                    format!("0x{:x}", finding.target.address),
                    classification,
                    finding.total_score as i64,
                    finding.economics.as_ref().map(|e| e.net_profit.to_string()),
                    evidence_json,
                ],
            )?;
        }
        tx.commit()?;

        Ok(run_id)
    }

    pub fn latest_run_id(&self) -> Result<Option<i64>, StorageError> {
        let id = self
            .lock()
            .query_row("SELECT MAX(id) FROM scan_runs", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?;
        Ok(id.flatten())
    }

    pub fn list_findings(&self, run_id: i64) -> Result<Vec<FindingRow>, StorageError> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "
            SELECT run_id, rank, address, classification, total_score, net_profit
            FROM findings
            WHERE run_id = ?1
            ORDER BY rank ASC
            ",
        )?;
        let rows = statement.query_map([run_id], |row| {
            Ok(FindingRow {
                run_id: row.get(0)?,
                rank: row.get(1)?,
                address: row.get(2)?,
                classification: row.get(3)?,
                total_score: row.get(4)?,
                net_profit: row.get(5)?,
            })
        })?;

        let mut findings = Vec::new();
        for row in rows {
            findings.push(row?);
        }
        Ok(findings)
    }

    /// Rebuild a stored report with its full evidence, in stored rank order.
    pub fn load_report(&self, run_id: i64) -> Result<Option<TriageReport>, StorageError> {
        let connection = self.lock();
        let run: Option<(i64, String)> = connection
            .query_row(
                "SELECT block_number, summary_json FROM scan_runs WHERE id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((block_number, summary_json)) = run else {
            return Ok(None);
        };

        let mut statement = connection
            .prepare("SELECT evidence_json FROM findings WHERE run_id = ?1 ORDER BY rank ASC")?;
        let rows = statement.query_map([run_id], |row| row.get::<_, String>(0))?;
        let mut findings = Vec::new();
        for row in rows {
            findings.push(serde_json::from_str(&row?)?);
        }

        Ok(Some(TriageReport {
            block_number: block_number as u64,
            summary: serde_json::from_str(&summary_json)?,
            findings,
        }))
    }
}

#[async_trait]
impl FindingSink for SqliteFindingStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_report(&self, report: &TriageReport) -> Result<(), StorageError> {
        let run_id = self.insert_report(report)?;
        info!(run_id, findings = report.findings.len(), "stored findings in SQLite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploit::Economics;
    use crate::types::{
        Annotation, AnnotationKind, Classification, ContractTarget, Finding, SourceStatus,
    };
    use ethereum_types::{Address, U256};
    use std::collections::BTreeMap;
    use tempfile::{NamedTempFile, tempdir};

    fn finding(addr: u64, class: Classification, score: u32) -> Finding {
        Finding {
            target: ContractTarget::new(Address::from_low_u64_be(addr), U256::exp10(18), 1),
            block_number: 42,
            classification: class,
            total_score: score,
            static_score: score,
            source: SourceStatus::Verified {
                contract_name: "Wallet".into(),
                compiler_version: "v0.4.24".into(),
                file_count: 1,
            },
            triggered_rules: BTreeMap::new(),
            echo: None,
            exploits: Vec::new(),
            economics: None,
            facts: Vec::new(),
            annotations: vec![Annotation::new(AnnotationKind::RpcUnavailable, "eth_call")],
        }
    }

    fn sample_report() -> TriageReport {
        let mut validated = finding(3, Classification::ExploitValidated, 8);
        validated.economics = Some(Economics::compute(
            U256::exp10(18),
            100_000,
            U256::from(50_000_000_000u64),
        ));
        TriageReport::build(
            42,
            vec![
                finding(1, Classification::Static, 4),
                validated,
                finding(2, Classification::Confirmed, 6),
            ],
            1,
        )
    }

    #[test]
    fn stores_and_reloads_report_in_rank_order() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteFindingStore::open(file.path()).unwrap();
        let report = sample_report();

        let run_id = store.insert_report(&report).unwrap();
        assert_eq!(store.latest_run_id().unwrap(), Some(run_id));

        let rows = store.list_findings(run_id).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].classification, "exploit_validated");
        assert_eq!(rows[0].net_profit.as_deref(), Some("995000000000000000"));
        assert_eq!(rows[1].classification, "confirmed");
        assert_eq!(rows[2].rank, 2);
        assert_eq!(rows[2].net_profit, None);

        let loaded = store.load_report(run_id).unwrap().unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn empty_store_has_no_runs() {
        let store = SqliteFindingStore::in_memory().unwrap();
        assert_eq!(store.latest_run_id().unwrap(), None);
        assert_eq!(store.load_report(1).unwrap(), None);
        assert!(store.list_findings(1).unwrap().is_empty());
    }

    #[test]
    fn runs_are_kept_separately() {
        let store = SqliteFindingStore::in_memory().unwrap();
        let first = store.insert_report(&sample_report()).unwrap();
        let second = store
            .insert_report(&TriageReport::build(43, Vec::new(), 0))
            .unwrap();
        assert!(second > first);
        assert_eq!(store.list_findings(first).unwrap().len(), 3);
        assert!(store.list_findings(second).unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_sinks_write_json_and_markdown() {
        let dir = tempdir().unwrap();
        let report = sample_report();

        let json_path = dir.path().join("out/findings.json");
        JsonFileSink::new(&json_path).write_report(&report).await.unwrap();
        let json = std::fs::read_to_string(&json_path).unwrap();
        assert_eq!(TriageReport::from_json(&json).unwrap(), report);

        let md_path = dir.path().join("findings.md");
        MarkdownFileSink::new(&md_path).write_report(&report).await.unwrap();
        let md = std::fs::read_to_string(&md_path).unwrap();
        assert!(md.starts_with("# Contract Triage Report"));
    }
}
