//! Parsing of model output
//!
//! Models answer in loosely structured markdown. These helpers pull out the
//! pieces each role needs: numbered plan steps, `#### [FILE]: path` code
//! blocks, and reviewer severity markers.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLAN_STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\*\*)?\d+[.)](?:\*\*)?\s*(.*)$").unwrap());

static DEPENDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\(depends?(?:\s+on)?:\s*([\d,\s]+)\)\s*$").unwrap()
});

// Closing fences must sit on a line of their own; backticks inside the
// code do not end the block.
static FILE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)####\s*\[FILE\]:\s*([^\n]*?)\s*\n```[^\n]*\n(.*?)\n?^```[ \t]*$").unwrap()
});

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)```[^\n]*\n(.*?)\n?^```[ \t]*$").unwrap());

static TRAILING_PAREN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(.*?\)\s*$").unwrap());

static TRAILING_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*#.*$").unwrap());

static TEMPLATE_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").unwrap());

static SEVERITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(critical|major|minor)\]").unwrap());

/// Split a numbered plan into step strings.
///
/// Accepts `1. step` and `1) step`, optionally bolded. Lines without a
/// number prefix and empty steps are ignored.
pub fn parse_plan_steps(plan: &str) -> Vec<String> {
    plan.lines()
        .filter_map(|line| PLAN_STEP_RE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|step| !step.is_empty())
        .collect()
}

/// Strip `(depends: N, M)` markers off steps.
///
/// Returns the cleaned steps and, per step, the 0-based indices it depends
/// on. Marker numbers are 1-based. A dependency on the step itself, a later
/// step, or a step that does not exist is dropped. When no step carries a
/// marker the plan is sequential: every step depends on its predecessor.
pub fn parse_step_dependencies(steps: &[String]) -> (Vec<String>, Vec<Vec<usize>>) {
    let mut cleaned = Vec::with_capacity(steps.len());
    let mut deps = Vec::with_capacity(steps.len());
    let mut found_marker = false;

    for (idx, step) in steps.iter().enumerate() {
        match DEPENDS_RE.captures(step) {
            Some(caps) => {
                found_marker = true;
                let mut indices: Vec<usize> = caps[1]
                    .split(',')
                    .filter_map(|n| n.trim().parse::<usize>().ok())
                    .filter(|n| *n >= 1 && n - 1 < idx)
                    .map(|n| n - 1)
                    .collect();
                indices.sort_unstable();
                indices.dedup();
                let start = caps.get(0).map(|m| m.start()).unwrap_or(step.len());
                cleaned.push(step[..start].trim_end().to_string());
                deps.push(indices);
            }
            None => {
                cleaned.push(step.clone());
                deps.push(Vec::new());
            }
        }
    }

    if !found_marker {
        for (idx, d) in deps.iter_mut().enumerate().skip(1) {
            *d = vec![idx - 1];
        }
    }

    (cleaned, deps)
}

/// Clean up a model-written filename.
///
/// Models decorate paths: `calculator.py (main module)`, `` `app.py` ``,
/// `[src]/[main].py`, `.\pkg\mod.py`. All of that is stripped.
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw.trim();
    let name = TRAILING_PAREN_RE.replace(name, "");
    let name = TRAILING_COMMENT_RE.replace(&name, "");
    let name = name.trim_matches('`').trim();
    let name = TEMPLATE_BRACKET_RE.replace_all(name, "$1");
    let name = name.replace('\\', "/");
    let name = name.strip_prefix("./").unwrap_or(&name);
    name.trim().to_string()
}

/// Extract `#### [FILE]: path` blocks followed by a fenced code block.
///
/// Entries whose sanitized name has neither a `/` nor a `.` are skipped;
/// those are almost always prose the model put in the header slot. A later
/// block for the same path replaces an earlier one.
pub fn parse_code_blocks(text: &str) -> BTreeMap<String, String> {
    let text = text.replace("\r\n", "\n");
    let mut files = BTreeMap::new();

    for caps in FILE_BLOCK_RE.captures_iter(&text) {
        let filename = sanitize_filename(&caps[1]);
        if filename.is_empty() || (!filename.contains('/') && !filename.contains('.')) {
            continue;
        }
        files.insert(filename, caps[2].to_string());
    }

    files
}

/// Content of the first fenced code block, if any
pub fn first_code_block(text: &str) -> Option<String> {
    let text = text.replace("\r\n", "\n");
    FENCED_BLOCK_RE
        .captures(&text)
        .map(|caps| caps[1].to_string())
        .filter(|code| !code.trim().is_empty())
}

/// Severity marker found in reviewer feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn marker(&self) -> &'static str {
        match self {
            Severity::Critical => "[CRITICAL]",
            Severity::Major => "[MAJOR]",
            Severity::Minor => "[MINOR]",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            _ => None,
        }
    }
}

/// Find severity-tagged lines in reviewer feedback.
///
/// Returns one `(severity, text)` pair per marker occurrence, with the
/// marker removed from the text.
pub fn find_severity_markers(feedback: &str) -> Vec<(Severity, String)> {
    let mut found = Vec::new();
    for line in feedback.lines() {
        for caps in SEVERITY_RE.captures_iter(line) {
            if let Some(severity) = Severity::from_tag(&caps[1]) {
                let text = SEVERITY_RE.replace_all(line, "");
                let text = text
                    .trim_start_matches(|c: char| matches!(c, '-' | '*' | ':') || c.is_whitespace())
                    .trim_end()
                    .to_string();
                found.push((severity, text));
            }
        }
    }
    found
}

/// Whether a path looks like a test file for common runners
pub fn is_test_file(path: &str) -> bool {
    let path = path.replace('\\', "/");
    let mut components = path.split('/').collect::<Vec<_>>();
    let Some(file_name) = components.pop() else {
        return false;
    };

    if components.iter().any(|c| *c == "tests" || *c == "test") {
        return true;
    }

    let stem = file_name.split('.').next().unwrap_or(file_name);
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
}
