//! Structural validation of modified artifacts, dispatched per filename
//! extension. Each file yields errors, warnings and human-readable fix
//! hints; the aggregate report lists the noisiest files first.

use serde::Serialize;
use serde_yaml::Value as YamlValue;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileValidation {
    pub filename: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub fixes: Vec<String>,
}

impl FileValidation {
    fn new(filename: &str) -> Self {
        FileValidation {
            filename: filename.to_string(),
            errors: Vec::new(),
            warnings: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.errors.len() + self.warnings.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Sorted by issue count, noisiest first.
    pub files: Vec<FileValidation>,
}

impl ValidationReport {
    pub fn total_errors(&self) -> usize {
        self.files.iter().map(|f| f.errors.len()).sum()
    }

    pub fn total_warnings(&self) -> usize {
        self.files.iter().map(|f| f.warnings.len()).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors() > 0
    }

    pub fn error_summary(&self) -> String {
        self.files
            .iter()
            .flat_map(|f| f.errors.iter().map(move |e| format!("{}: {e}", f.filename)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a set of (filename, post-image content) pairs.
pub fn validate_files(files: &[(String, String)]) -> ValidationReport {
    let mut validations: Vec<FileValidation> = files
        .iter()
        .map(|(name, content)| validate_file(name, content))
        .collect();
    validations.sort_by(|a, b| b.issue_count().cmp(&a.issue_count()));
    ValidationReport { files: validations }
}

pub fn validate_file(filename: &str, content: &str) -> FileValidation {
    let mut v = FileValidation::new(filename);
    let lower = filename.to_lowercase();
    match extension(&lower) {
        "yml" | "yaml" => validate_yaml(filename, content, &mut v),
        "json" => validate_json(&lower, content, &mut v),
        "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" => validate_script(content, &mut v),
        "py" => validate_python(content, &mut v),
        "sh" | "bash" => validate_shell(content, &mut v),
        other => debug!(filename, extension = other, "no validator for extension"),
    }
    v
}

fn extension(filename: &str) -> &str {
    filename.rsplit('.').next().unwrap_or("")
}

// ---------------------------------------------------------------------------
// YAML workflows
// ---------------------------------------------------------------------------

fn validate_yaml(filename: &str, content: &str, v: &mut FileValidation) {
    for (i, line) in content.lines().enumerate() {
        let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
        if indent.contains('\t') {
            v.errors.push(format!("line {}: tab indentation", i + 1));
            v.fixes.push(format!("line {}: replace tabs with spaces", i + 1));
        } else if !indent.is_empty() && indent.len() % 2 != 0 {
            v.errors
                .push(format!("line {}: indentation is not a multiple of 2", i + 1));
        }
        check_quote_balance(i + 1, line, v);
    }

    let parsed: YamlValue = match serde_yaml::from_str(content) {
        Ok(parsed) => parsed,
        Err(e) => {
            v.errors.push(format!("not parseable as YAML: {e}"));
            return;
        }
    };

    // The workflow-schema requirements only apply to files that are (or
    // claim to be) CI workflow definitions.
    let is_workflow = filename.contains(".github/workflows")
        || parsed.get("jobs").is_some();
    if is_workflow {
        validate_workflow_schema(&parsed, v);
    }
}

fn check_quote_balance(line_number: usize, line: &str, v: &mut FileValidation) {
    // Comments commonly carry apostrophes; skip them.
    let code = line.split('#').next().unwrap_or(line);
    let mut in_single = false;
    let mut in_double = false;
    for c in code.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
    }
    if in_single || in_double {
        v.errors
            .push(format!("line {line_number}: unmatched quote"));
    }
}

fn yaml_get<'a>(mapping: &'a YamlValue, key: &str) -> Option<&'a YamlValue> {
    if let Some(value) = mapping.get(key) {
        return Some(value);
    }
    // YAML 1.1 parses a bare `on` key as the boolean `true`.
    if key == "on" {
        return mapping.get(YamlValue::Bool(true));
    }
    None
}

fn validate_workflow_schema(parsed: &YamlValue, v: &mut FileValidation) {
    if yaml_get(parsed, "name").is_none() {
        v.errors.push("workflow is missing a top-level name".to_string());
        v.fixes.push("add `name: <workflow name>` at the top".to_string());
    }
    if yaml_get(parsed, "on").is_none() {
        v.errors.push("workflow has no trigger clause".to_string());
        v.fixes.push("add an `on:` block (e.g. `on: push`)".to_string());
    }
    let Some(jobs) = yaml_get(parsed, "jobs").and_then(YamlValue::as_mapping) else {
        v.errors.push("workflow has no jobs mapping".to_string());
        return;
    };
    for (job_name, job) in jobs {
        let job_name = job_name.as_str().unwrap_or("<job>");
        if yaml_get(job, "runs-on").is_none() {
            v.errors
                .push(format!("job '{job_name}' has no runner declaration"));
            v.fixes
                .push(format!("add `runs-on: ubuntu-latest` to job '{job_name}'"));
        }
        let steps = yaml_get(job, "steps").and_then(YamlValue::as_sequence);
        match steps {
            None => {
                v.errors.push(format!("job '{job_name}' has no steps"));
            }
            Some(steps) if steps.is_empty() => {
                v.errors.push(format!("job '{job_name}' has no steps"));
            }
            Some(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if yaml_get(step, "uses").is_none() && yaml_get(step, "run").is_none() {
                        v.errors.push(format!(
                            "job '{job_name}' step {} has neither an action reference nor a run command",
                            i + 1
                        ));
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn validate_json(filename: &str, content: &str, v: &mut FileValidation) {
    // Report trailing commas even when a tolerant parser would accept them.
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim_end();
        if trimmed.ends_with(",}") || trimmed.ends_with(",]") {
            v.errors.push(format!("line {}: trailing comma", i + 1));
        }
    }
    let mut squashed = String::with_capacity(content.len());
    for line in content.lines() {
        squashed.push_str(line.trim());
    }
    if squashed.contains(",}") || squashed.contains(",]") {
        let msg = "trailing comma before a closing bracket".to_string();
        if !v.errors.iter().any(|e| e.contains("trailing comma")) {
            v.errors.push(msg);
        }
        v.fixes.push("remove the comma before `}` or `]`".to_string());
    }

    let parsed: serde_json::Value = match serde_json::from_str(content) {
        Ok(parsed) => parsed,
        Err(e) => {
            v.errors.push(format!("not parseable as JSON: {e}"));
            return;
        }
    };

    if filename.ends_with("package.json") {
        for field in ["name", "version"] {
            if parsed.get(field).and_then(serde_json::Value::as_str).is_none() {
                v.errors.push(format!("package manifest is missing '{field}'"));
                v.fixes.push(format!("add a '{field}' field"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TypeScript / JavaScript
// ---------------------------------------------------------------------------

fn validate_script(content: &str, v: &mut FileValidation) {
    let stripped = strip_strings_and_comments(content);
    check_balanced(&stripped, '{', '}', "braces", v);
    check_balanced(&stripped, '(', ')', "parentheses", v);

    for (i, line) in content.lines().enumerate() {
        if line.contains("@ts-ignore") || line.contains("@ts-nocheck") {
            v.warnings
                .push(format!("line {}: type-checker escape directive", i + 1));
            v.fixes
                .push(format!("line {}: fix the underlying type error instead", i + 1));
        }
        if line.contains(": any") || line.contains("as any") || line.contains("<any>") {
            v.warnings.push(format!("line {}: use of `any`", i + 1));
        }
        if line.trim_start().starts_with("var ") {
            v.warnings
                .push(format!("line {}: legacy `var` declaration", i + 1));
            v.fixes
                .push(format!("line {}: use `const` or `let`", i + 1));
        }
    }
}

fn check_balanced(text: &str, open: char, close: char, what: &str, v: &mut FileValidation) {
    let mut depth: i64 = 0;
    for c in text.chars() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth < 0 {
                v.errors.push(format!("unbalanced {what}: extra `{close}`"));
                return;
            }
        }
    }
    if depth > 0 {
        v.errors.push(format!("unbalanced {what}: {depth} unclosed `{open}`"));
    }
}

/// Blank out string literals and comments so bracket counting ignores them.
fn strip_strings_and_comments(content: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Single,
        Double,
        Template,
        LineComment,
        BlockComment,
    }
    let mut state = State::Code;
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '`' => state = State::Template,
                '/' if chars.peek() == Some(&'/') => state = State::LineComment,
                '/' if chars.peek() == Some(&'*') => state = State::BlockComment,
                _ => out.push(c),
            },
            State::Single => match c {
                '\\' => {
                    chars.next();
                }
                '\'' | '\n' => state = State::Code,
                _ => {}
            },
            State::Double => match c {
                '\\' => {
                    chars.next();
                }
                '"' | '\n' => state = State::Code,
                _ => {}
            },
            State::Template => match c {
                '\\' => {
                    chars.next();
                }
                '`' => state = State::Code,
                _ => {}
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

const PY_BLOCK_KEYWORDS: [&str; 9] = [
    "def ", "class ", "if ", "elif ", "else", "for ", "while ", "try", "except",
];

fn validate_python(content: &str, v: &mut FileValidation) {
    for (i, line) in content.lines().enumerate() {
        let spaces = line.chars().take_while(|c| *c == ' ').count();
        if spaces > 0 && spaces % 4 != 0 && !line.trim().is_empty() {
            v.errors
                .push(format!("line {}: indentation is not a multiple of 4", i + 1));
        }
        let trimmed = line.trim();
        let opens_block = PY_BLOCK_KEYWORDS
            .iter()
            .any(|k| trimmed.starts_with(k) || trimmed == k.trim_end());
        if opens_block && !trimmed.ends_with(':') && !trimmed.contains(": ") {
            v.warnings
                .push(format!("line {}: block statement may be missing a colon", i + 1));
            v.fixes.push(format!("line {}: end the statement with `:`", i + 1));
        }
        if trimmed.ends_with(" :") {
            v.warnings
                .push(format!("line {}: space before colon", i + 1));
        }
    }
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

fn validate_shell(content: &str, v: &mut FileValidation) {
    if !content.starts_with("#!") {
        v.warnings.push("script has no shebang".to_string());
        v.fixes.push("add `#!/usr/bin/env bash` as the first line".to_string());
    }
    for (i, line) in content.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if has_unquoted_variable(line) {
            v.warnings
                .push(format!("line {}: unquoted variable reference", i + 1));
            v.fixes
                .push(format!("line {}: wrap the expansion in double quotes", i + 1));
        }
    }
}

fn has_unquoted_variable(line: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '$' if !in_single && !in_double => {
                if chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_')
                {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    const GOOD_WORKFLOW: &str = "name: ci\non:\n  push:\n    branches: [main]\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n      - run: npm test\n";

    #[test]
    fn well_formed_workflow_passes() {
        let v = validate_file(".github/workflows/ci.yml", GOOD_WORKFLOW);
        assert!(v.is_clean(), "unexpected issues: {v:?}");
    }

    #[test]
    fn tab_indentation_is_an_error() {
        let v = validate_file("ci.yml", "name: x\non: push\njobs:\n\tbuild:\n\t\truns-on: ubuntu-latest\n");
        assert!(v.errors.iter().any(|e| e.contains("tab indentation")));
    }

    #[test]
    fn odd_indentation_is_an_error() {
        let v = validate_file("config.yml", "root:\n   child: 1\n");
        assert!(v.errors.iter().any(|e| e.contains("multiple of 2")));
    }

    #[test]
    fn workflow_without_jobs_or_trigger_is_rejected() {
        let v = validate_file(".github/workflows/ci.yml", "name: broken\n");
        assert!(v.errors.iter().any(|e| e.contains("trigger")));
        assert!(v.errors.iter().any(|e| e.contains("jobs")));
    }

    #[test]
    fn job_without_runner_or_steps_is_rejected() {
        let yaml = "name: x\non: push\njobs:\n  build:\n    steps: []\n";
        let v = validate_file(".github/workflows/ci.yml", yaml);
        assert!(v.errors.iter().any(|e| e.contains("runner")));
        assert!(v.errors.iter().any(|e| e.contains("no steps")));
    }

    #[test]
    fn step_needs_uses_or_run() {
        let yaml = "name: x\non: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - name: mystery\n";
        let v = validate_file(".github/workflows/ci.yml", yaml);
        assert!(v.errors.iter().any(|e| e.contains("neither an action reference")));
    }

    #[test]
    fn unmatched_quote_is_an_error() {
        let v = validate_file("ci.yml", "name: \"broken\n");
        assert!(v.errors.iter().any(|e| e.contains("unmatched quote")));
    }

    #[test]
    fn json_trailing_comma_is_reported() {
        let v = validate_file("data.json", "{\"a\": 1,}\n");
        assert!(v.errors.iter().any(|e| e.contains("trailing comma")));
    }

    #[test]
    fn package_manifest_requires_name_and_version() {
        let v = validate_file("package.json", "{\"private\": true}");
        assert!(v.errors.iter().any(|e| e.contains("'name'")));
        assert!(v.errors.iter().any(|e| e.contains("'version'")));
    }

    #[test]
    fn valid_package_manifest_passes() {
        let v = validate_file("package.json", "{\"name\": \"pkg\", \"version\": \"1.0.0\"}");
        assert!(v.is_clean());
    }

    #[test]
    fn unbalanced_braces_in_typescript_is_an_error() {
        let v = validate_file("app.ts", "function f() { if (x) { return 1; }\n");
        assert!(v.errors.iter().any(|e| e.contains("unbalanced braces")));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let v = validate_file("app.ts", "const s = \"{{{\"; const f = () => ({ a: 1 });\n");
        assert!(v.errors.is_empty(), "unexpected: {:?}", v.errors);
    }

    #[test]
    fn ts_escape_directives_warn() {
        let v = validate_file("app.ts", "// @ts-ignore\nconst x: any = 1;\nvar y = 2;\n");
        assert_eq!(v.warnings.len(), 3);
        assert!(v.errors.is_empty());
    }

    #[test]
    fn python_indentation_must_be_multiple_of_four() {
        let v = validate_file("script.py", "def f():\n   return 1\n");
        assert!(v.errors.iter().any(|e| e.contains("multiple of 4")));
    }

    #[test]
    fn python_missing_colon_warns() {
        let v = validate_file("script.py", "def f()\n    return 1\n");
        assert!(v.warnings.iter().any(|w| w.contains("missing a colon")));
    }

    #[test]
    fn shell_without_shebang_warns() {
        let v = validate_file("run.sh", "echo hello\n");
        assert!(v.warnings.iter().any(|w| w.contains("shebang")));
    }

    #[test]
    fn unquoted_shell_variable_warns() {
        let v = validate_file("run.sh", "#!/bin/bash\nrm -rf $TARGET_DIR\n");
        assert!(v.warnings.iter().any(|w| w.contains("unquoted variable")));
        let quoted = validate_file("run.sh", "#!/bin/bash\nrm -rf \"$TARGET_DIR\"\n");
        assert!(quoted.is_clean());
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        let v = validate_file("binary.dat", "\u{0}\u{1}\u{2}");
        assert!(v.is_clean());
    }

    #[test]
    fn report_sorts_noisiest_files_first() {
        let report = validate_files(&[
            ("clean.json".to_string(), "{\"a\": 1}".to_string()),
            ("messy.py".to_string(), "def f()\n   return 1\n".to_string()),
        ]);
        assert_eq!(report.files[0].filename, "messy.py");
        assert_eq!(report.total_errors(), 1);
        assert_eq!(report.total_warnings(), 1);
    }
}
