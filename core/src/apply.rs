//! Transactional patch application with hash-verified rollback.
//!
//! The applicator is the only component that writes to the working tree.
//! Every run snapshots affected files first, applies sequentially, and on
//! the first error restores every snapshot before returning. Backups and
//! the application record are persisted under `.forge/patches/<id>/` so a
//! later `rollback` can restore byte-exact pre-images. A per-root advisory
//! lock serialises applications against the same tree; once snapshotting
//! has begun the transaction is not cancellable.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fs2::FileExt;
use tracing::debug;
use tracing::error;
use tracing::warn;
use uuid::Uuid;

use forge_diff::UnifiedPatch;
use forge_diff::apply_patch;
use forge_protocol::audit::AuditEventType;
use forge_protocol::audit::AuditStatus;
use forge_protocol::decision::AppliedPatch;
use forge_protocol::decision::ApplicationRecord;
use forge_protocol::decision::ApplicationStatus;
use forge_protocol::decision::GateAction;
use forge_protocol::decision::GateDecision;
use forge_protocol::decision::RollbackOutcome;

use crate::audit::AuditJournal;
use crate::config::STATE_DIR_NAME;
use crate::dry_run::DryRunOptions;
use crate::dry_run::simulate;
use crate::error::ForgeErr;
use crate::error::Result;
use crate::util::sha256_hex;

const PATCHES_DIR: &str = "patches";
const BACKUPS_DIR: &str = "backups";
const RECORD_FILE: &str = "record.json";
const LOCK_FILE: &str = "apply.lock";

#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Apply even when the gate did not say auto-apply.
    pub auto_apply: bool,
    /// Run the dry-run simulator before touching anything.
    pub dry_run_first: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            auto_apply: false,
            dry_run_first: true,
        }
    }
}

/// Held for the duration of a transaction; releasing the file drops the
/// advisory lock.
struct RootLock {
    _file: File,
}

pub struct Applicator {
    root: PathBuf,
    state_dir: PathBuf,
    journal: Arc<AuditJournal>,
}

impl Applicator {
    pub fn new(root: &Path, journal: Arc<AuditJournal>) -> Applicator {
        Applicator {
            root: root.to_path_buf(),
            state_dir: root.join(STATE_DIR_NAME),
            journal,
        }
    }

    /// Apply `patches` under the gate `decision`. Transactional: either every
    /// patch lands, or every touched file is restored to its snapshot.
    pub fn apply_patches(
        &self,
        patches: &[UnifiedPatch],
        decision: &GateDecision,
        options: &ApplyOptions,
    ) -> Result<ApplicationRecord> {
        if decision.action != GateAction::AutoApply && !options.auto_apply {
            self.journal.record(
                AuditEventType::AccessDenied,
                "applicator",
                &self.root.display().to_string(),
                "apply_patches",
                AuditStatus::Failure,
                format!("gate decision is {}, not auto-apply", decision.action),
                BTreeMap::new(),
            );
            return Err(ForgeErr::ApplyFailed(format!(
                "gate decision is {}; pass --auto to override",
                decision.action
            )));
        }

        for patch in patches {
            check_target_path(&patch.filename)?;
        }

        let _lock = self.lock_root()?;

        if options.dry_run_first {
            let plan = simulate(&self.root, patches, &DryRunOptions::default(), None);
            if !plan.success {
                let failed: Vec<String> = plan
                    .steps
                    .iter()
                    .filter(|s| s.status == forge_protocol::decision::StepStatus::Error)
                    .map(|s| s.message.clone())
                    .collect();
                return Err(ForgeErr::ApplyConflict(failed.join("; ")));
            }
        }

        let id = Uuid::new_v4();
        let record_dir = self.record_dir(id);
        let backups_dir = record_dir.join(BACKUPS_DIR);
        std::fs::create_dir_all(&backups_dir)?;

        // Step 1: snapshot every existing target, in memory and on disk.
        let mut snapshots: HashMap<usize, Vec<u8>> = HashMap::new();
        for (i, patch) in patches.iter().enumerate() {
            let target = self.root.join(&patch.filename);
            if !patch.is_new && target.is_file() {
                let bytes = std::fs::read(&target)?;
                std::fs::write(backups_dir.join(format!("{i}.bak")), &bytes)?;
                snapshots.insert(i, bytes);
            }
        }

        // Step 2: apply sequentially; the first failure restores everything.
        let mut applied: Vec<AppliedPatch> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        for patch in patches {
            match self.apply_one(patch) {
                Ok(applied_patch) => {
                    if patch.is_new {
                        created.push(self.root.join(&patch.filename));
                    }
                    applied.push(applied_patch);
                }
                Err(e) => {
                    error!(file = patch.filename, error = %e, "apply failed; restoring snapshots");
                    let restore_note = self.restore_snapshots(patches, &snapshots, &created);
                    let record = ApplicationRecord {
                        id,
                        ts: Utc::now(),
                        patches: applied,
                        decision: decision.clone(),
                        status: ApplicationStatus::Partial,
                        error: Some(format!("{e}; {restore_note}")),
                    };
                    self.persist_record(&record)?;
                    self.journal.record(
                        AuditEventType::FixApplied,
                        "applicator",
                        &patch.filename,
                        "apply_patches",
                        AuditStatus::Failure,
                        format!("{e}; {restore_note}"),
                        BTreeMap::new(),
                    );
                    return Err(ForgeErr::ApplyFailed(format!("{e}; {restore_note}")));
                }
            }
        }

        let record = ApplicationRecord {
            id,
            ts: Utc::now(),
            patches: applied,
            decision: decision.clone(),
            status: ApplicationStatus::Applied,
            error: None,
        };
        self.persist_record(&record)?;
        self.journal.record(
            AuditEventType::FixApplied,
            "applicator",
            &self.root.display().to_string(),
            "apply_patches",
            AuditStatus::Success,
            format!("applied {} patch(es), application {id}", record.patches.len()),
            BTreeMap::new(),
        );
        Ok(record)
    }

    fn apply_one(&self, patch: &UnifiedPatch) -> Result<AppliedPatch> {
        let target = self.root.join(&patch.filename);

        // Hashes are computed over the bytes actually on disk, before and
        // after, so a later integrity check can recompute them.
        let (before_hash, after_hash) = if patch.is_new {
            if let Some(parent) = target.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let content = apply_patch("", patch)?;
            std::fs::write(&target, &content)?;
            (sha256_hex(b""), sha256_hex(&std::fs::read(&target)?))
        } else if patch.is_deleted {
            let bytes = std::fs::read(&target)?;
            std::fs::remove_file(&target)?;
            (sha256_hex(&bytes), sha256_hex(b""))
        } else {
            let bytes = std::fs::read(&target)?;
            let before_hash = sha256_hex(&bytes);
            let current = String::from_utf8_lossy(&bytes).into_owned();
            let next = apply_patch(&current, patch)?;
            std::fs::write(&target, &next)?;
            (before_hash, sha256_hex(&std::fs::read(&target)?))
        };

        debug!(file = patch.filename, %before_hash, %after_hash, "patch applied");
        Ok(AppliedPatch {
            filename: patch.filename.clone(),
            before_hash,
            after_hash,
            ts: Utc::now(),
            patch: patch.clone(),
        })
    }

    /// Put every snapshotted file back and remove files created this run.
    fn restore_snapshots(
        &self,
        patches: &[UnifiedPatch],
        snapshots: &HashMap<usize, Vec<u8>>,
        created: &[PathBuf],
    ) -> String {
        let mut restored = 0usize;
        let mut failures = 0usize;
        for (i, bytes) in snapshots {
            let target = self.root.join(&patches[*i].filename);
            match std::fs::write(&target, bytes) {
                Ok(()) => restored += 1,
                Err(e) => {
                    failures += 1;
                    error!(file = %target.display(), error = %e, "snapshot restore failed");
                }
            }
        }
        for path in created {
            if path.is_file() && std::fs::remove_file(path).is_err() {
                failures += 1;
            }
        }
        if failures == 0 {
            format!("working tree restored ({restored} file(s))")
        } else {
            format!("restoration incomplete: {failures} failure(s)")
        }
    }

    /// Reverse a recorded application: created files are deleted, everything
    /// else is restored verbatim from its backup blob.
    pub fn rollback(&self, id: Uuid) -> Result<RollbackOutcome> {
        let started = Instant::now();
        let _lock = self.lock_root()?;

        let mut record = self.load_record(id)?;
        let backups_dir = self.record_dir(id).join(BACKUPS_DIR);
        let empty_hash = sha256_hex(b"");

        let mut restored: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (i, applied) in record.patches.iter().enumerate().rev() {
            let target = self.root.join(&applied.filename);
            if applied.before_hash == empty_hash && applied.patch.is_new {
                match std::fs::remove_file(&target) {
                    Ok(()) => restored.push(applied.filename.clone()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // Already gone; rollback is idempotent.
                        restored.push(applied.filename.clone());
                    }
                    Err(e) => errors.push(format!("{}: {e}", applied.filename)),
                }
                continue;
            }

            match std::fs::read(backups_dir.join(format!("{i}.bak"))) {
                Ok(bytes) => {
                    let verified = sha256_hex(&bytes) == applied.before_hash;
                    if !verified {
                        warn!(file = applied.filename, "backup hash mismatch; restoring anyway");
                    }
                    if let Some(parent) = target.parent() {
                        if std::fs::create_dir_all(parent).is_err() {
                            errors.push(format!("{}: cannot recreate parent", applied.filename));
                            continue;
                        }
                    }
                    match std::fs::write(&target, &bytes) {
                        Ok(()) => restored.push(applied.filename.clone()),
                        Err(e) => errors.push(format!("{}: {e}", applied.filename)),
                    }
                }
                Err(e) => errors.push(format!("{}: missing backup: {e}", applied.filename)),
            }
        }

        record.status = if errors.is_empty() {
            ApplicationStatus::RolledBack
        } else {
            ApplicationStatus::Partial
        };
        self.persist_record(&record)?;

        let status = if errors.is_empty() {
            AuditStatus::Success
        } else {
            AuditStatus::Warning
        };
        self.journal.record(
            AuditEventType::FixReverted,
            "applicator",
            &self.root.display().to_string(),
            "rollback",
            status,
            format!("application {id}: {} restored, {} errors", restored.len(), errors.len()),
            BTreeMap::new(),
        );

        Ok(RollbackOutcome {
            restored,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Past applications under this root, newest first.
    pub fn list_records(&self) -> Result<Vec<ApplicationRecord>> {
        let patches_dir = self.state_dir.join(PATCHES_DIR);
        let mut records = Vec::new();
        if !patches_dir.is_dir() {
            return Ok(records);
        }
        for entry in std::fs::read_dir(&patches_dir)? {
            let record_path = entry?.path().join(RECORD_FILE);
            if !record_path.is_file() {
                continue;
            }
            match serde_json::from_str::<ApplicationRecord>(&std::fs::read_to_string(&record_path)?)
            {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %record_path.display(), error = %e, "unreadable record"),
            }
        }
        records.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(records)
    }

    fn record_dir(&self, id: Uuid) -> PathBuf {
        self.state_dir.join(PATCHES_DIR).join(id.to_string())
    }

    fn load_record(&self, id: Uuid) -> Result<ApplicationRecord> {
        let path = self.record_dir(id).join(RECORD_FILE);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            ForgeErr::InputInvalid(format!("no application record for {id}"))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn persist_record(&self, record: &ApplicationRecord) -> Result<()> {
        let dir = self.record_dir(record.id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join(RECORD_FILE),
            serde_json::to_string_pretty(record)?,
        )?;
        Ok(())
    }

    fn lock_root(&self) -> Result<RootLock> {
        std::fs::create_dir_all(&self.state_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.state_dir.join(LOCK_FILE))?;
        file.try_lock_exclusive()
            .map_err(|_| ForgeErr::ConcurrentApplication)?;
        Ok(RootLock { _file: file })
    }
}

/// Patch targets must stay inside the working tree.
fn check_target_path(filename: &str) -> Result<()> {
    let path = Path::new(filename);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ForgeErr::InputInvalid(format!(
            "patch target '{filename}' escapes the working tree"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use forge_diff::compute_patch;
    use pretty_assertions::assert_eq;

    fn auto_decision() -> GateDecision {
        GateDecision {
            action: GateAction::AutoApply,
            confidence: 0.95,
            reasoning: "test".to_string(),
            risks: vec![],
            recommendations: vec![],
        }
    }

    fn applicator(root: &Path) -> Applicator {
        Applicator::new(root, Arc::new(AuditJournal::in_memory()))
    }

    #[test]
    fn apply_and_rollback_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("modify.txt"), "alpha\nbravo\ncharlie\n").unwrap();
        std::fs::write(root.join("remove.txt"), "short-lived\n").unwrap();

        let patches = vec![
            UnifiedPatch::new_file("created.txt", "fresh content\n"),
            compute_patch(
                "modify.txt",
                "alpha\nbravo\ncharlie\n",
                "alpha\nBRAVO\ncharlie\n",
                3,
            ),
            UnifiedPatch::delete_file("remove.txt", "short-lived\n"),
        ];

        let applicator = applicator(root);
        let record = applicator
            .apply_patches(&patches, &auto_decision(), &ApplyOptions::default())
            .unwrap();
        assert_eq!(record.status, ApplicationStatus::Applied);
        assert_eq!(record.patches.len(), 3);

        // Post-images on disk hash to the recorded after hashes.
        let created = std::fs::read(root.join("created.txt")).unwrap();
        assert_eq!(sha256_hex(&created), record.patches[0].after_hash);
        let modified = std::fs::read(root.join("modify.txt")).unwrap();
        assert_eq!(sha256_hex(&modified), record.patches[1].after_hash);
        assert!(!root.join("remove.txt").exists());
        assert_eq!(record.patches[2].after_hash, sha256_hex(b""));

        let outcome = applicator.rollback(record.id).unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.restored.len(), 3);

        // Every pre-image is back, byte for byte.
        assert!(!root.join("created.txt").exists());
        let modified = std::fs::read(root.join("modify.txt")).unwrap();
        assert_eq!(sha256_hex(&modified), record.patches[1].before_hash);
        let removed = std::fs::read(root.join("remove.txt")).unwrap();
        assert_eq!(sha256_hex(&removed), record.patches[2].before_hash);
    }

    #[test]
    fn failure_mid_transaction_restores_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("good.txt"), "one\ntwo\n").unwrap();

        let patches = vec![
            compute_patch("good.txt", "one\ntwo\n", "one\nTWO\n", 3),
            // Does not match what is on disk, so application fails.
            compute_patch("good.txt", "stale\ncontent\n", "other\n", 3),
        ];

        let applicator = applicator(root);
        // Skip the pre-flight dry run so the failure happens mid-transaction.
        let err = applicator
            .apply_patches(
                &patches,
                &auto_decision(),
                &ApplyOptions {
                    auto_apply: false,
                    dry_run_first: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "apply_failed");
        assert!(err.to_string().contains("restored"));

        let bytes = std::fs::read(root.join("good.txt")).unwrap();
        assert_eq!(bytes, b"one\ntwo\n");
    }

    #[test]
    fn preflight_dry_run_blocks_conflicting_sets() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let patches = vec![UnifiedPatch::delete_file("ghost.txt", "x\n")];
        let err = applicator(root)
            .apply_patches(&patches, &auto_decision(), &ApplyOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "apply_conflict");
    }

    #[test]
    fn non_auto_decision_requires_override() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let decision = GateDecision {
            action: GateAction::ManualReview,
            ..auto_decision()
        };
        let patches = vec![UnifiedPatch::new_file("a.txt", "x\n")];
        let applicator = applicator(root);

        let err = applicator
            .apply_patches(&patches, &decision, &ApplyOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "apply_failed");

        let record = applicator
            .apply_patches(
                &patches,
                &decision,
                &ApplyOptions {
                    auto_apply: true,
                    dry_run_first: true,
                },
            )
            .unwrap();
        assert_eq!(record.status, ApplicationStatus::Applied);
    }

    #[test]
    fn concurrent_application_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let first = applicator(root);
        let second = applicator(root);

        let _held = first.lock_root().unwrap();
        let patches = vec![UnifiedPatch::new_file("a.txt", "x\n")];
        let err = second
            .apply_patches(&patches, &auto_decision(), &ApplyOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "concurrent_application");
    }

    #[test]
    fn rollback_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let patches = vec![UnifiedPatch::new_file("a.txt", "x\n")];
        let applicator = applicator(root);
        let record = applicator
            .apply_patches(&patches, &auto_decision(), &ApplyOptions::default())
            .unwrap();

        let first = applicator.rollback(record.id).unwrap();
        assert!(first.errors.is_empty());
        let second = applicator.rollback(record.id).unwrap();
        assert!(second.errors.is_empty());
        assert!(!root.join("a.txt").exists());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let patches = vec![UnifiedPatch::new_file("../outside.txt", "x\n")];
        let err = applicator(dir.path())
            .apply_patches(&patches, &auto_decision(), &ApplyOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
    }

    #[test]
    fn records_are_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let applicator = applicator(root);
        let first = applicator
            .apply_patches(
                &[UnifiedPatch::new_file("a.txt", "x\n")],
                &auto_decision(),
                &ApplyOptions::default(),
            )
            .unwrap();
        let second = applicator
            .apply_patches(
                &[UnifiedPatch::new_file("b.txt", "y\n")],
                &auto_decision(),
                &ApplyOptions::default(),
            )
            .unwrap();

        let records = applicator.list_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second.id);
        assert_eq!(records[1].id, first.id);
    }
}
