//! Line-level diff engine: computes patches between two versions of a text
//! document, serialises them in the standard unified-diff envelope, and
//! applies or reverses them without touching the filesystem.
//!
//! Documents are modelled as the result of `split('\n')`, so a trailing
//! newline shows up as a final empty element and `join('\n')` reproduces the
//! input byte-for-byte. Every operation here preserves that round-trip:
//! `apply(apply(doc, p), reverse(p)) == doc`.

mod unified;

use serde::Deserialize;
use serde::Serialize;
use similar::DiffOp;
use similar::TextDiff;
use thiserror::Error;

pub use unified::parse_unified;

/// Number of unchanged lines kept around each change region.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("invalid unified diff at line {line_number}: {message}")]
    Parse { line_number: usize, message: String },

    #[error("hunk at old line {old_start} does not match the original: {message}")]
    HunkMismatch { old_start: usize, message: String },

    #[error("patch is not applicable: {0}")]
    NotApplicable(String),

    #[error("patch violates hunk invariants: {0}")]
    Invalid(String),
}

/// One line of a hunk body, tagged with how it participates in the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchLine {
    Context { text: String },
    Add { text: String },
    Remove { text: String },
}

impl PatchLine {
    pub fn text(&self) -> &str {
        match self {
            PatchLine::Context { text } | PatchLine::Add { text } | PatchLine::Remove { text } => {
                text
            }
        }
    }

    fn is_old_side(&self) -> bool {
        matches!(self, PatchLine::Context { .. } | PatchLine::Remove { .. })
    }

    fn is_new_side(&self) -> bool {
        matches!(self, PatchLine::Context { .. } | PatchLine::Add { .. })
    }
}

/// A contiguous change region. Starts are 1-based line numbers; a side with
/// zero lines uses start 0 by convention (mirrors the unified-diff envelope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<PatchLine>,
}

impl Hunk {
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.is_old_side())
            .map(|l| l.text())
            .collect()
    }

    fn new_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.is_new_side())
            .map(|l| l.text())
            .collect()
    }
}

/// A patch against a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedPatch {
    pub filename: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub hunks: Vec<Hunk>,
}

/// Split a document the way the rest of the engine expects: a trailing
/// newline becomes a final empty element.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

impl UnifiedPatch {
    /// Patch that creates `filename` with `content`.
    pub fn new_file(filename: impl Into<String>, content: &str) -> Self {
        let lines: Vec<PatchLine> = split_lines(content)
            .into_iter()
            .map(|text| PatchLine::Add {
                text: text.to_string(),
            })
            .collect();
        let new_lines = lines.len();
        UnifiedPatch {
            filename: filename.into(),
            is_new: true,
            is_deleted: false,
            hunks: vec![Hunk {
                old_start: 0,
                old_lines: 0,
                new_start: 1,
                new_lines,
                lines,
            }],
        }
    }

    /// Patch that deletes `filename`, recording its current `content` so the
    /// patch can be reversed.
    pub fn delete_file(filename: impl Into<String>, content: &str) -> Self {
        let lines: Vec<PatchLine> = split_lines(content)
            .into_iter()
            .map(|text| PatchLine::Remove {
                text: text.to_string(),
            })
            .collect();
        let old_lines = lines.len();
        UnifiedPatch {
            filename: filename.into(),
            is_new: false,
            is_deleted: true,
            hunks: vec![Hunk {
                old_start: 1,
                old_lines,
                new_start: 0,
                new_lines: 0,
                lines,
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Total number of added plus removed lines across all hunks.
    pub fn lines_changed(&self) -> usize {
        self.hunks
            .iter()
            .map(|h| {
                h.lines
                    .iter()
                    .filter(|l| !matches!(l, PatchLine::Context { .. }))
                    .count()
            })
            .sum()
    }

    /// Checks the structural invariants every well-formed patch upholds:
    /// per-hunk line counts, create/delete shape, and non-overlapping hunks
    /// ordered by `old_start`.
    pub fn validate(&self) -> Result<(), DiffError> {
        for hunk in &self.hunks {
            let old = hunk.lines.iter().filter(|l| l.is_old_side()).count();
            let new = hunk.lines.iter().filter(|l| l.is_new_side()).count();
            if old != hunk.old_lines || new != hunk.new_lines {
                return Err(DiffError::Invalid(format!(
                    "hunk at -{},{} +{},{} has {} old-side and {} new-side lines",
                    hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines, old, new
                )));
            }
        }
        if self.is_new {
            let ok = self.hunks.len() == 1
                && self.hunks[0].old_lines == 0
                && self.hunks[0].old_start == 0;
            if !ok {
                return Err(DiffError::Invalid(
                    "new-file patch must consist of a single all-add hunk".to_string(),
                ));
            }
        }
        if self.is_deleted {
            let ok = self.hunks.len() == 1
                && self.hunks[0].new_lines == 0
                && self.hunks[0].new_start == 0;
            if !ok {
                return Err(DiffError::Invalid(
                    "delete-file patch must consist of a single all-remove hunk".to_string(),
                ));
            }
        }
        let mut prev_end = 0usize;
        for hunk in &self.hunks {
            if hunk.old_lines > 0 {
                if hunk.old_start <= prev_end {
                    return Err(DiffError::Invalid(format!(
                        "hunks overlap at old line {}",
                        hunk.old_start
                    )));
                }
                prev_end = hunk.old_start + hunk.old_lines - 1;
            }
        }
        Ok(())
    }

    /// Standard textual form with `/dev/null` on the absent side.
    pub fn to_unified_string(&self) -> String {
        unified::serialize(self)
    }
}

/// Compute a patch that turns `old` into `new`, keeping `context` unchanged
/// lines around each change. Identical inputs yield an empty patch.
pub fn compute_patch(
    filename: impl Into<String>,
    old: &str,
    new: &str,
    context: usize,
) -> UnifiedPatch {
    let filename = filename.into();
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);

    let diff = TextDiff::from_slices(&old_lines, &new_lines);
    let mut hunks = Vec::new();
    for group in diff.grouped_ops(context) {
        let mut lines: Vec<PatchLine> = Vec::new();
        for op in &group {
            match *op {
                DiffOp::Equal { old_index, len, .. } => {
                    for line in &old_lines[old_index..old_index + len] {
                        lines.push(PatchLine::Context {
                            text: (*line).to_string(),
                        });
                    }
                }
                DiffOp::Delete {
                    old_index, old_len, ..
                } => {
                    for line in &old_lines[old_index..old_index + old_len] {
                        lines.push(PatchLine::Remove {
                            text: (*line).to_string(),
                        });
                    }
                }
                DiffOp::Insert {
                    new_index, new_len, ..
                } => {
                    for line in &new_lines[new_index..new_index + new_len] {
                        lines.push(PatchLine::Add {
                            text: (*line).to_string(),
                        });
                    }
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    for line in &old_lines[old_index..old_index + old_len] {
                        lines.push(PatchLine::Remove {
                            text: (*line).to_string(),
                        });
                    }
                    for line in &new_lines[new_index..new_index + new_len] {
                        lines.push(PatchLine::Add {
                            text: (*line).to_string(),
                        });
                    }
                }
            }
        }
        let (first_old, first_new) = match group.first() {
            Some(op) => (op.old_range().start, op.new_range().start),
            None => continue,
        };
        let old_count = lines.iter().filter(|l| l.is_old_side()).count();
        let new_count = lines.iter().filter(|l| l.is_new_side()).count();
        hunks.push(Hunk {
            old_start: if old_count == 0 { first_old } else { first_old + 1 },
            old_lines: old_count,
            new_start: if new_count == 0 { first_new } else { first_new + 1 },
            new_lines: new_count,
            lines,
        });
    }

    UnifiedPatch {
        filename,
        is_new: false,
        is_deleted: false,
        hunks,
    }
}

/// Apply `patch` to `original`, producing the new document. Hunks are applied
/// in descending position order so earlier offsets stay valid. The old side
/// of every hunk must match the original exactly.
pub fn apply_patch(original: &str, patch: &UnifiedPatch) -> Result<String, DiffError> {
    patch.validate()?;

    if patch.is_new {
        if !original.is_empty() {
            return Err(DiffError::NotApplicable(format!(
                "{} already has content",
                patch.filename
            )));
        }
        let lines = patch.hunks[0].new_side();
        return Ok(lines.join("\n"));
    }

    if patch.is_deleted {
        let expected = patch.hunks[0].old_side();
        if split_lines(original) != expected {
            return Err(DiffError::HunkMismatch {
                old_start: 1,
                message: "content being deleted does not match".to_string(),
            });
        }
        return Ok(String::new());
    }

    let mut lines: Vec<String> = split_lines(original)
        .into_iter()
        .map(|l| l.to_string())
        .collect();

    let mut ordered: Vec<&Hunk> = patch.hunks.iter().collect();
    ordered.sort_by(|a, b| b.new_start.cmp(&a.new_start));

    for hunk in ordered {
        // For a pure insertion the content goes after line `old_start`.
        let at = if hunk.old_lines == 0 {
            hunk.old_start
        } else {
            hunk.old_start - 1
        };
        if at + hunk.old_lines > lines.len() {
            return Err(DiffError::HunkMismatch {
                old_start: hunk.old_start,
                message: format!(
                    "hunk extends past end of file ({} lines)",
                    lines.len()
                ),
            });
        }
        let expected = hunk.old_side();
        let actual = &lines[at..at + hunk.old_lines];
        if actual.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(DiffError::HunkMismatch {
                old_start: hunk.old_start,
                message: "original lines differ from the hunk's old side".to_string(),
            });
        }
        let replacement: Vec<String> = hunk.new_side().into_iter().map(String::from).collect();
        lines.splice(at..at + hunk.old_lines, replacement);
    }

    Ok(lines.join("\n"))
}

/// Swap the two sides of a patch: adds become removes, starts and counts
/// trade places, and create/delete flip. `reverse(reverse(p)) == p`.
pub fn reverse_patch(patch: &UnifiedPatch) -> UnifiedPatch {
    let hunks = patch
        .hunks
        .iter()
        .map(|hunk| {
            let mut lines: Vec<PatchLine> = Vec::with_capacity(hunk.lines.len());
            // Reversal turns adds into removes; re-normalise each change run
            // so removes still precede adds.
            let mut pending_adds: Vec<PatchLine> = Vec::new();
            for line in &hunk.lines {
                match line {
                    PatchLine::Context { text } => {
                        lines.append(&mut pending_adds);
                        lines.push(PatchLine::Context { text: text.clone() });
                    }
                    PatchLine::Add { text } => lines.push(PatchLine::Remove { text: text.clone() }),
                    PatchLine::Remove { text } => {
                        pending_adds.push(PatchLine::Add { text: text.clone() })
                    }
                }
            }
            lines.append(&mut pending_adds);
            Hunk {
                old_start: hunk.new_start,
                old_lines: hunk.new_lines,
                new_start: hunk.old_start,
                new_lines: hunk.old_lines,
                lines,
            }
        })
        .collect();

    UnifiedPatch {
        filename: patch.filename.clone(),
        is_new: patch.is_deleted,
        is_deleted: patch.is_new,
        hunks,
    }
}
