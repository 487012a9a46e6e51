//! Append-only audit journal: bounded in-memory retention plus JSONL
//! persistence. One instance per process, passed around as a collaborator;
//! concurrent appenders are serialised inside.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use forge_protocol::audit::AuditEntry;
use forge_protocol::audit::AuditEventType;
use forge_protocol::audit::AuditStatus;

use crate::error::Result;

pub const JOURNAL_FILE_NAME: &str = "forge-audit.log";
const DEFAULT_RETENTION: usize = 10_000;

struct Inner {
    entries: VecDeque<AuditEntry>,
    file: Option<File>,
}

pub struct AuditJournal {
    inner: Mutex<Inner>,
    path: PathBuf,
    retention: usize,
}

impl AuditJournal {
    /// Open (or create) the journal under `log_dir`, loading the most recent
    /// persisted entries into memory.
    pub fn open(log_dir: &Path) -> Result<AuditJournal> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(JOURNAL_FILE_NAME);

        let mut entries = VecDeque::new();
        if path.is_file() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) => {
                        entries.push_back(entry);
                        if entries.len() > DEFAULT_RETENTION {
                            entries.pop_front();
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping malformed journal line"),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(AuditJournal {
            inner: Mutex::new(Inner {
                entries,
                file: Some(file),
            }),
            path,
            retention: DEFAULT_RETENTION,
        })
    }

    /// In-memory journal for tests and ephemeral runs; nothing is persisted.
    pub fn in_memory() -> AuditJournal {
        AuditJournal {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                file: None,
            }),
            path: PathBuf::new(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Persistence failures are logged, never propagated;
    /// losing a journal line must not abort a pipeline.
    pub fn record(
        &self,
        event: AuditEventType,
        actor: &str,
        resource: &str,
        action: &str,
        status: AuditStatus,
        details: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            event,
            actor: actor.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            status,
            details: details.into(),
            metadata,
        };

        let mut inner = self.lock();
        if let Some(file) = inner.file.as_mut() {
            let persist = serde_json::to_string(&entry)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(file, "{line}"));
            if let Err(e) = persist {
                warn!(error = %e, "failed to persist audit entry");
            }
        }
        inner.entries.push_back(entry.clone());
        while inner.entries.len() > self.retention {
            inner.entries.pop_front();
        }
        entry
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn by_resource(&self, resource: &str) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect()
    }

    pub fn by_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.ts >= from && e.ts <= to)
            .cloned()
            .collect()
    }

    pub fn by_status(&self, status: AuditStatus) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Drop entries older than `days` from memory and rewrite the journal
    /// file to match. Returns how many entries were purged.
    pub fn purge_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.ts >= cutoff);
        let purged = before - inner.entries.len();

        if inner.file.is_some() {
            let mut file = File::create(&self.path)?;
            for entry in &inner.entries {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;
            }
            inner.file = Some(OpenOptions::new().append(true).open(&self.path)?);
        }
        Ok(purged)
    }

    /// Native export: one JSON record per line.
    pub fn export_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for entry in self.lock().entries.iter() {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Tabular export for spreadsheets.
    pub fn export_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["id", "ts", "event", "actor", "resource", "action", "status", "details"])
            .map_err(std::io::Error::other)?;
        for entry in self.lock().entries.iter() {
            writer
                .write_record([
                    entry.id.to_string(),
                    entry.ts.to_rfc3339(),
                    entry.event.to_string(),
                    entry.actor.clone(),
                    entry.resource.clone(),
                    entry.action.clone(),
                    entry.status.to_string(),
                    entry.details.clone(),
                ])
                .map_err(std::io::Error::other)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned journal still holds valid entries; keep appending.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn record_n(journal: &AuditJournal, n: usize) {
        for i in 0..n {
            journal.record(
                AuditEventType::ValidationCheck,
                "test",
                &format!("resource-{i}"),
                "check",
                AuditStatus::Success,
                "ok",
                BTreeMap::new(),
            );
        }
    }

    #[test]
    fn entries_persist_as_jsonl_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = AuditJournal::open(dir.path()).unwrap();
            record_n(&journal, 3);
        }
        let journal = AuditJournal::open(dir.path()).unwrap();
        assert_eq!(journal.entries().len(), 3);

        let raw = std::fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[test]
    fn queries_filter_by_resource_and_status() {
        let journal = AuditJournal::in_memory();
        record_n(&journal, 2);
        journal.record(
            AuditEventType::AccessDenied,
            "test",
            "resource-0",
            "apply",
            AuditStatus::Failure,
            "denied",
            BTreeMap::new(),
        );

        assert_eq!(journal.by_resource("resource-0").len(), 2);
        assert_eq!(journal.by_status(AuditStatus::Failure).len(), 1);
        assert_eq!(journal.by_status(AuditStatus::Success).len(), 2);
    }

    #[test]
    fn range_query_preserves_order() {
        let journal = AuditJournal::in_memory();
        record_n(&journal, 5);
        let all = journal.by_range(Utc::now() - Duration::hours(1), Utc::now());
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
    }

    #[test]
    fn purge_drops_old_entries_and_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open(dir.path()).unwrap();
        record_n(&journal, 2);
        // Nothing is older than a day yet.
        assert_eq!(journal.purge_older_than(1).unwrap(), 0);
        assert_eq!(journal.entries().len(), 2);
    }

    #[test]
    fn csv_export_has_a_header_and_one_row_per_entry() {
        let journal = AuditJournal::in_memory();
        record_n(&journal, 2);
        let csv = journal.export_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,ts,event"));
        assert!(lines[1].contains("validation_check"));
    }

    #[test]
    fn jsonl_export_round_trips() {
        let journal = AuditJournal::in_memory();
        record_n(&journal, 2);
        let jsonl = journal.export_jsonl().unwrap();
        for line in jsonl.lines() {
            let entry: AuditEntry = serde_json::from_str(line).unwrap();
            assert_eq!(entry.actor, "test");
        }
    }

    #[test]
    fn concurrent_appends_are_serialised() {
        let journal = std::sync::Arc::new(AuditJournal::in_memory());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let journal = std::sync::Arc::clone(&journal);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    journal.record(
                        AuditEventType::SecretsScan,
                        "thread",
                        "log",
                        "scan",
                        AuditStatus::Success,
                        "ok",
                        BTreeMap::new(),
                    );
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(journal.entries().len(), 200);
    }
}
