//! Run records on disk, one JSON file per run identity.
//!
//! Identities are validated UUIDs before they reach this module, so the
//! file name is never attacker-shaped. Writes are whole-file and
//! last-write-wins; the executor-facing update path tolerates a missing
//! record the way an UPDATE with no matching row would.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Stored state of one run: who may read it, what it last reported, and
/// the call telemetry of its last execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub access_key: String,
    pub report: String,
    pub context: serde_json::Value,
}

impl VmRecord {
    pub fn new(access_key: String, report: String) -> Self {
        Self {
            access_key,
            report,
            context: serde_json::json!({"CALLS": {}}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, vm_id: &str) -> PathBuf {
        self.dir.join(format!("{vm_id}.json"))
    }

    /// Make sure the storage directory exists; safe to call repeatedly.
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn insert(&self, vm_id: &str, record: &VmRecord) -> Result<()> {
        self.ensure().await?;
        self.write_record(&self.record_path(vm_id), record).await
    }

    pub async fn get(&self, vm_id: &str) -> Option<VmRecord> {
        let bytes = fs::read(self.record_path(vm_id)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Overwrite the stored report. A missing record is not an error, it
    /// just updates nothing.
    pub async fn update_report(&self, vm_id: &str, report: &str) -> Result<()> {
        let path = self.record_path(vm_id);
        let Some(mut record) = self.get(vm_id).await else {
            return Ok(());
        };
        record.report = report.to_string();
        self.write_record(&path, &record).await
    }

    /// Overwrite the stored telemetry; same missing-record tolerance.
    pub async fn update_context(&self, vm_id: &str, context: serde_json::Value) -> Result<()> {
        let path = self.record_path(vm_id);
        let Some(mut record) = self.get(vm_id).await else {
            return Ok(());
        };
        record.context = context;
        self.write_record(&path, &record).await
    }

    async fn write_record(&self, path: &Path, record: &VmRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        fs::write(path, bytes).await?;
        Ok(())
    }
}
