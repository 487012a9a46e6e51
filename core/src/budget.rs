//! Token budgeting for backend prompts. Token counts are estimated as the
//! average of a word-based and a character-based heuristic; per-model caps
//! are tabulated with a prefix match and narrowed by a safety fraction.

use tracing::debug;

pub const DEFAULT_SAFETY_FRACTION: f64 = 0.8;
const OUTPUT_RESERVATION_FRACTION: f64 = 0.2;
const WORDS_PER_TOKEN: f64 = 1.3;
const CHARS_PER_TOKEN: f64 = 0.25;
const MAX_TRUNCATE_ITERATIONS: usize = 20;
/// Fraction of lines removed per truncation iteration.
const TRUNCATE_STEP: f64 = 0.1;

const SNIPPET_HEAD_LINES: usize = 100;
const SNIPPET_TAIL_LINES: usize = 300;

const OMISSION_MARKER: &str = "[... snippet truncated ...]";

/// Longest-prefix match against known model families; unknown models get a
/// conservative cap.
const MODEL_CAPS: &[(&str, usize)] = &[
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4.1", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o3-mini", 200_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    ("claude-3-5", 200_000),
    ("claude-3", 200_000),
];
const DEFAULT_MODEL_CAP: usize = 16_000;

pub fn model_cap(model: &str) -> usize {
    MODEL_CAPS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, cap)| *cap)
        .unwrap_or(DEFAULT_MODEL_CAP)
}

/// Average of the word-based (1.3 tokens per word) and char-based (0.25
/// tokens per char) estimates.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    let by_words = words * WORDS_PER_TOKEN;
    let by_chars = chars * CHARS_PER_TOKEN;
    ((by_words + by_chars) / 2.0).ceil() as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCheck {
    pub input_tokens: usize,
    pub output_reservation: usize,
    pub remaining: usize,
    pub within_budget: bool,
}

/// Check a (system, user, context) prompt triple against `cap` tokens.
pub fn check_budget(system: &str, user: &str, context: &str, cap: usize, safety: f64) -> BudgetCheck {
    let ceiling = (cap as f64 * safety) as usize;
    let output_reservation = (cap as f64 * OUTPUT_RESERVATION_FRACTION) as usize;
    let input_tokens =
        estimate_tokens(system) + estimate_tokens(user) + estimate_tokens(context);
    let used = input_tokens + output_reservation;
    let within_budget = used <= ceiling;
    let remaining = ceiling.saturating_sub(used);
    if !within_budget {
        debug!(input_tokens, ceiling, "prompt exceeds token budget");
    }
    BudgetCheck {
        input_tokens,
        output_reservation,
        remaining,
        within_budget,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateStrategy {
    /// Drop lines from the start; the end survives.
    Start,
    /// Drop lines from the end; the start survives.
    End,
    /// Drop lines from the middle; both ends survive.
    Middle,
}

/// Iteratively drop lines until `text` fits in `cap` tokens (at most 20
/// iterations), then fall back to a hard character cut.
pub fn truncate_to_fit(text: &str, cap: usize, strategy: TruncateStrategy) -> String {
    if estimate_tokens(text) <= cap {
        return text.to_string();
    }

    let mut lines: Vec<&str> = text.lines().collect();
    for _ in 0..MAX_TRUNCATE_ITERATIONS {
        let drop = ((lines.len() as f64 * TRUNCATE_STEP) as usize).max(1);
        if drop >= lines.len() {
            break;
        }
        match strategy {
            TruncateStrategy::Start => {
                lines.drain(..drop);
            }
            TruncateStrategy::End => {
                let keep = lines.len() - drop;
                lines.truncate(keep);
            }
            TruncateStrategy::Middle => {
                let mid = lines.len() / 2;
                let start = mid.saturating_sub(drop / 2).max(1);
                let end = (start + drop).min(lines.len().saturating_sub(1));
                lines.drain(start..end);
            }
        }
        let candidate = lines.join("\n");
        if estimate_tokens(&candidate) <= cap {
            return candidate;
        }
    }

    // Line dropping was not enough; cut by characters. A token is roughly
    // four characters under the char heuristic.
    let max_chars = cap.saturating_mul(4);
    let joined = lines.join("\n");
    let cut: String = match strategy {
        TruncateStrategy::Start => {
            let skip = joined.chars().count().saturating_sub(max_chars);
            joined.chars().skip(skip).collect()
        }
        TruncateStrategy::End => joined.chars().take(max_chars).collect(),
        TruncateStrategy::Middle => {
            let half = max_chars / 2;
            let total = joined.chars().count();
            let head: String = joined.chars().take(half).collect();
            let tail: String = joined.chars().skip(total.saturating_sub(half)).collect();
            format!("{head}\n{OMISSION_MARKER}\n{tail}")
        }
    };
    cut
}

/// Build the log snippet handed to the agents: a head/tail window with one
/// omission marker, middle-truncated further if it still exceeds `cap`.
pub fn optimize_log_snippet(text: &str, cap: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let windowed = if lines.len() > SNIPPET_HEAD_LINES + SNIPPET_TAIL_LINES {
        let omitted = lines.len() - SNIPPET_HEAD_LINES - SNIPPET_TAIL_LINES;
        let mut out: Vec<&str> = Vec::with_capacity(SNIPPET_HEAD_LINES + SNIPPET_TAIL_LINES + 1);
        out.extend(&lines[..SNIPPET_HEAD_LINES]);
        let marker = format!("[... {omitted} lines omitted ...]");
        out.push(&marker);
        out.extend(&lines[lines.len() - SNIPPET_TAIL_LINES..]);
        out.join("\n")
    } else {
        text.to_string()
    };

    if estimate_tokens(&windowed) <= cap {
        windowed
    } else {
        truncate_to_fit(&windowed, cap, TruncateStrategy::Middle)
    }
}
