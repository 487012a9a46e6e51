//! Textual unified-diff envelope: `--- a/…`, `+++ b/…`, `@@ -o,ol +n,nl @@`,
//! with `/dev/null` on the absent side for created or deleted files.

use crate::DiffError;
use crate::Hunk;
use crate::PatchLine;
use crate::UnifiedPatch;

pub(crate) fn serialize(patch: &UnifiedPatch) -> String {
    let mut out = String::new();
    if patch.is_new {
        out.push_str("--- /dev/null\n");
    } else {
        out.push_str(&format!("--- a/{}\n", patch.filename));
    }
    if patch.is_deleted {
        out.push_str("+++ /dev/null\n");
    } else {
        out.push_str(&format!("+++ b/{}\n", patch.filename));
    }
    for hunk in &patch.hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
        ));
        for line in &hunk.lines {
            let (prefix, text) = match line {
                PatchLine::Context { text } => (' ', text),
                PatchLine::Add { text } => ('+', text),
                PatchLine::Remove { text } => ('-', text),
            };
            out.push(prefix);
            out.push_str(text);
            out.push('\n');
        }
    }
    out
}

/// Parse the textual unified form back into a [`UnifiedPatch`]. Accepts both
/// `-start,count` and the abbreviated `-start` header shape.
pub fn parse_unified(text: &str) -> Result<UnifiedPatch, DiffError> {
    let mut lines = text.lines().enumerate();

    let (n, old_header) = lines
        .next()
        .ok_or_else(|| parse_err(1, "empty input"))?;
    let old_name = old_header
        .strip_prefix("--- ")
        .ok_or_else(|| parse_err(n + 1, "expected '--- ' header"))?;
    let (n, new_header) = lines
        .next()
        .ok_or_else(|| parse_err(2, "missing '+++ ' header"))?;
    let new_name = new_header
        .strip_prefix("+++ ")
        .ok_or_else(|| parse_err(n + 1, "expected '+++ ' header"))?;

    let is_new = old_name == "/dev/null";
    let is_deleted = new_name == "/dev/null";
    if is_new && is_deleted {
        return Err(parse_err(2, "both sides are /dev/null"));
    }
    let filename = if is_new {
        strip_side_prefix(new_name, "b/")
    } else {
        strip_side_prefix(old_name, "a/")
    }
    .to_string();

    let mut hunks = Vec::new();
    while let Some((n, line)) = lines.next() {
        let header = line
            .strip_prefix("@@ -")
            .and_then(|rest| rest.split_once(" @@").map(|(h, _)| h))
            .ok_or_else(|| parse_err(n + 1, "expected '@@' hunk header"))?;
        let (old_part, new_part) = header
            .split_once(" +")
            .ok_or_else(|| parse_err(n + 1, "malformed hunk header"))?;
        let (old_start, old_lines) = parse_range(old_part, n + 1)?;
        let (new_start, new_lines) = parse_range(new_part, n + 1)?;

        let mut body = Vec::new();
        let mut seen_old = 0usize;
        let mut seen_new = 0usize;
        while seen_old < old_lines || seen_new < new_lines {
            let (n, raw) = lines
                .next()
                .ok_or_else(|| parse_err(n + 1, "hunk body ended early"))?;
            let line = match raw.chars().next() {
                Some(' ') => {
                    seen_old += 1;
                    seen_new += 1;
                    PatchLine::Context {
                        text: raw[1..].to_string(),
                    }
                }
                Some('+') => {
                    seen_new += 1;
                    PatchLine::Add {
                        text: raw[1..].to_string(),
                    }
                }
                Some('-') => {
                    seen_old += 1;
                    PatchLine::Remove {
                        text: raw[1..].to_string(),
                    }
                }
                // A completely empty line stands for a blank context line.
                None => {
                    seen_old += 1;
                    seen_new += 1;
                    PatchLine::Context {
                        text: String::new(),
                    }
                }
                Some(other) => {
                    return Err(parse_err(
                        n + 1,
                        &format!("unexpected hunk line prefix {other:?}"),
                    ));
                }
            };
            body.push(line);
        }

        hunks.push(Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            lines: body,
        });
    }

    let patch = UnifiedPatch {
        filename,
        is_new,
        is_deleted,
        hunks,
    };
    patch.validate()?;
    Ok(patch)
}

fn strip_side_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

fn parse_range(part: &str, line_number: usize) -> Result<(usize, usize), DiffError> {
    let (start, count) = match part.split_once(',') {
        Some((s, c)) => (s, c),
        None => (part, "1"),
    };
    let start = start
        .parse::<usize>()
        .map_err(|_| parse_err(line_number, "bad hunk start"))?;
    let count = count
        .parse::<usize>()
        .map_err(|_| parse_err(line_number, "bad hunk count"))?;
    Ok((start, count))
}

fn parse_err(line_number: usize, message: &str) -> DiffError {
    DiffError::Parse {
        line_number,
        message: message.to_string(),
    }
}
