//! Head/tail trimming for oversized logs. Keeps the first `head` and last
//! `tail` lines with a single omission marker in between; short logs pass
//! through unchanged.

use forge_protocol::analysis::PrunedLog;

pub fn prune(text: &str, head: usize, tail: usize) -> PrunedLog {
    let lines: Vec<&str> = text.lines().collect();
    let total_lines = lines.len();

    if total_lines <= head + tail {
        return PrunedLog {
            text: text.to_string(),
            total_lines,
            kept_head: total_lines.min(head),
            kept_tail: total_lines.saturating_sub(head),
            omitted: 0,
        };
    }

    let omitted = total_lines - head - tail;
    let mut out: Vec<&str> = Vec::with_capacity(head + tail + 1);
    out.extend(&lines[..head]);
    let marker = format!("[... {omitted} lines omitted ...]");
    out.push(&marker);
    out.extend(&lines[total_lines - tail..]);

    PrunedLog {
        text: out.join("\n"),
        total_lines,
        kept_head: head,
        kept_tail: tail,
        omitted,
    }
}
