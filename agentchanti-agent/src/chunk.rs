//! Chunk-level editing of source files
//!
//! A file is split into logical chunks (imports, classes, functions,
//! methods, leftover top-level code) with per-language line heuristics. On a
//! revision the coder sees the chunks instead of whole files and answers with
//! `#### [EDIT]` / `#### [NEW]` blocks that are spliced back in. Line numbers
//! in an edit are treated as hints: when the chunk it names is known, the
//! range is re-derived from the chunk and the edit content.

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static PY_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^class\s+\w+").unwrap(),
        Regex::new(r"^(?:async\s+)?def\s+\w+").unwrap(),
        Regex::new(r"^    (?:async\s+)?def\s+\w+").unwrap(),
    ]
});

static JS_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^(?:export\s+)?(?:default\s+)?class\s+\w+").unwrap(),
        Regex::new(r"^(?:export\s+)?(?:async\s+)?function\s+\w+").unwrap(),
        Regex::new(r"^(?:export\s+)?(?:const|let|var)\s+\w+\s*=\s*(?:async\s+)?(?:function|\()")
            .unwrap(),
    ]
});

static GO_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^func\s+(?:\(\w+\s+\*?\w+\)\s+)?\w+").unwrap(),
        Regex::new(r"^type\s+\w+\s+(?:struct|interface)").unwrap(),
    ]
});

static JAVA_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^\s*(?:public|private|protected)\s+(?:static\s+)?class\s+\w+").unwrap(),
        Regex::new(r"^\s*(?:public|private|protected)\s+(?:static\s+)?[\w<>\[\]]+\s+\w+\s*\(")
            .unwrap(),
    ]
});

static RUST_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+\w+").unwrap(),
        Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+\w+").unwrap(),
        Regex::new(r"^impl\b").unwrap(),
    ]
});

static C_BOUNDARIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^(?:static\s+|inline\s+|extern\s+)*\w+(?:\s*\*+)?\s+\**\w+\s*\(").unwrap(),
        Regex::new(r"^typedef\s+(?:struct|enum|union)\b").unwrap(),
        Regex::new(r"^(?:struct|enum|union)\s+\w+\s*\{").unwrap(),
    ]
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:import\s|from\s+\S+\s+import\b|(?:const|let|var)\s+.*=\s*require\(|using\s+|#include\s*[<"]|use\s+|require\s+|package\s+\w)"#,
    )
    .unwrap()
});

static DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:def|function)\s+(\w+)").unwrap());

static FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:func|fn)\s+(?:\([^)]*\)\s*)?(\w+)")
        .unwrap()
});

static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^type\s+(\w+)").unwrap());

static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:class|struct|enum|union|trait)\s+(\w+)").unwrap());

static IMPL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^impl(?:<[^>]*>)?\s+(?:\w+(?:<[^>]*>)?\s+for\s+)?(\w+)").unwrap()
});

static BINDING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:export\s+)?(?:const|let|var)\s+(\w+)").unwrap());

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\w+)\s*\(").unwrap());

static SIGNATURE_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w{3,}").unwrap());

static EDIT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^####\s*\[EDIT\]:\s*(\S+?)(?::(\S+))?\s*\(lines?\s*(\d+)\s*-\s*(\d+)\)").unwrap()
});

static NEW_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^####\s*\[NEW\]:\s*(\S+)\s*\(after\s+line\s+(\d+)\)").unwrap()
});

static FILE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*####\s*\[FILE\]:").unwrap());

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "return", "sizeof"];

/// Lines elided between rendered chunks before a gap marker is shown
const GAP_MARKER_MIN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    JavaScript,
    Go,
    Java,
    Rust,
    C,
}

impl Language {
    fn for_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "rs" => Language::Rust,
            "c" | "h" | "cpp" | "hpp" | "cc" => Language::C,
            _ => Language::Python,
        }
    }

    fn boundaries(self) -> &'static [Regex] {
        match self {
            Language::Python => &PY_BOUNDARIES,
            Language::JavaScript => &JS_BOUNDARIES,
            Language::Go => &GO_BOUNDARIES,
            Language::Java => &JAVA_BOUNDARIES,
            Language::Rust => &RUST_BOUNDARIES,
            Language::C => &C_BOUNDARIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Imports,
    Class,
    Function,
    Method,
    TopLevel,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Imports => "imports",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::TopLevel => "top_level",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, 1-based inclusive line range of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub path: String,
    /// `imports`, `function:name`, `method:Class.name`, `top_level:LINE`, ...
    pub id: String,
    pub kind: ChunkKind,
    pub start: usize,
    pub end: usize,
    pub content: String,
    /// First line of the chunk, shown for context-only chunks
    pub signature: String,
    /// Enclosing class of a method
    pub parent: Option<String>,
}

impl Chunk {
    fn span(&self) -> usize {
        self.end - self.start + 1
    }

    fn name(&self) -> &str {
        self.id.rsplit(':').next().unwrap_or(&self.id)
    }

    /// Whether an id written by the model refers to this chunk.
    ///
    /// Models often drop the kind prefix (`setup` for `function:setup`) or
    /// the class (`authenticate` for `method:UserService.authenticate`).
    pub fn matches_id(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        if self.id == id {
            return true;
        }
        let name = self.name();
        name == id || name.rsplit('.').next() == Some(id)
    }
}

/// One edit parsed from a model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEdit {
    pub path: String,
    /// Chunk id as the model wrote it; empty when it named none
    pub chunk_id: String,
    pub start: usize,
    pub end: usize,
    pub content: String,
    /// Set for `[NEW]` blocks: insert below this line instead of replacing
    pub insert_after: Option<usize>,
}

impl ChunkEdit {
    fn span(&self) -> usize {
        self.end.max(self.start) - self.start + 1
    }

    fn anchor(&self) -> Option<&str> {
        self.content.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

struct Boundary {
    line: usize,
    name: String,
    kind: ChunkKind,
    indent: usize,
}

/// Split `content` into chunks covering every non-blank line.
///
/// Chunks are ordered by start line. Methods are also covered by their
/// class chunk, so ranges may nest but never partially overlap.
pub fn chunk_file(path: &str, content: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let total = lines.len();
    if total == 0 {
        return Vec::new();
    }

    let patterns = Language::for_path(path).boundaries();
    let boundaries: Vec<Boundary> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| patterns.iter().any(|re| re.is_match(line)))
        .map(|(idx, line)| {
            let indent = line.len() - line.trim_start().len();
            let (kind, name) = classify(line.trim(), indent);
            Boundary {
                line: idx,
                name,
                kind,
                indent,
            }
        })
        .collect();

    let mut chunks = Vec::new();
    let imports_end = find_imports_end(&lines);
    if imports_end > 0 {
        chunks.push(Chunk {
            path: path.to_string(),
            id: "imports".to_string(),
            kind: ChunkKind::Imports,
            start: 1,
            end: imports_end,
            content: lines[..imports_end].concat(),
            signature: "(imports)".to_string(),
            parent: None,
        });
    }

    for (i, boundary) in boundaries.iter().enumerate() {
        if boundary.line < imports_end {
            continue;
        }

        let mut end = total - 1;
        if let Some(next) = boundaries[i + 1..]
            .iter()
            .find(|next| next.indent <= boundary.indent)
        {
            end = next.line - 1;
            while end > boundary.line && lines[end].trim().is_empty() {
                end -= 1;
            }
        }

        let parent = match boundary.kind {
            ChunkKind::Method => boundaries[..i]
                .iter()
                .rev()
                .find(|b| b.indent < boundary.indent && b.kind == ChunkKind::Class)
                .map(|b| b.name.clone()),
            _ => None,
        };
        let id = match &parent {
            Some(class) => format!("method:{}.{}", class, boundary.name),
            None => format!("{}:{}", boundary.kind, boundary.name),
        };

        chunks.push(Chunk {
            path: path.to_string(),
            id,
            kind: boundary.kind,
            start: boundary.line + 1,
            end: end + 1,
            content: lines[boundary.line..=end].concat(),
            signature: lines[boundary.line].trim_end().to_string(),
            parent,
        });
    }

    fill_gaps(&mut chunks, &lines, path, imports_end);
    chunks.sort_by_key(|c| c.start);
    chunks
}

fn classify(line: &str, indent: usize) -> (ChunkKind, String) {
    let nested = |kind: ChunkKind| {
        if indent > 0 && kind == ChunkKind::Function {
            ChunkKind::Method
        } else {
            kind
        }
    };

    if let Some(caps) = DEF_RE.captures(line) {
        return (nested(ChunkKind::Function), caps[1].to_string());
    }
    if let Some(caps) = FN_RE.captures(line) {
        return (ChunkKind::Function, caps[1].to_string());
    }
    if let Some(caps) = TYPE_RE.captures(line) {
        return (ChunkKind::Class, caps[1].to_string());
    }
    if let Some(caps) = CLASS_RE.captures(line) {
        return (ChunkKind::Class, caps[1].to_string());
    }
    if let Some(caps) = IMPL_RE.captures(line) {
        return (ChunkKind::Class, caps[1].to_string());
    }
    if let Some(caps) = BINDING_RE.captures(line) {
        return (ChunkKind::Function, caps[1].to_string());
    }
    if let Some(name) = CALL_RE
        .captures_iter(line)
        .map(|caps| caps[1].to_string())
        .find(|name| !CONTROL_KEYWORDS.contains(&name.as_str()))
    {
        return (nested(ChunkKind::Function), name);
    }
    (ChunkKind::TopLevel, "unknown".to_string())
}

/// Number of leading lines that form the import block (0 when none).
///
/// Module docstrings, comments and blank lines may precede or separate the
/// imports; the first other line ends the block.
fn find_imports_end(lines: &[&str]) -> usize {
    let mut last_import = 0;
    let mut docstring: Option<&str> = None;

    for (idx, line) in lines.iter().enumerate() {
        let stripped = line.trim();

        if let Some(quote) = docstring {
            if stripped.contains(quote) {
                docstring = None;
            }
            continue;
        }
        if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| stripped.starts_with(q)) {
            if stripped.matches(quote).count() == 1 {
                docstring = Some(quote);
            }
            continue;
        }
        if IMPORT_RE.is_match(line) {
            last_import = idx + 1;
            continue;
        }
        if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with("//") {
            continue;
        }
        break;
    }

    last_import
}

/// Cover non-blank lines no chunk claims with `top_level` chunks
fn fill_gaps(chunks: &mut Vec<Chunk>, lines: &[&str], path: &str, imports_end: usize) {
    let total = lines.len();
    let mut covered = vec![false; total + 1];
    for chunk in chunks.iter() {
        for line in chunk.start..=chunk.end {
            covered[line] = true;
        }
    }

    let mut gap_start: Option<usize> = None;
    for line in imports_end + 1..=total + 1 {
        let is_covered = line > total || covered[line];
        match (gap_start, is_covered) {
            (None, false) => gap_start = Some(line),
            (Some(first), true) => {
                gap_start = None;
                let blank = |n: usize| lines[n - 1].trim().is_empty();
                let Some(start) = (first..line).find(|&n| !blank(n)) else {
                    continue;
                };
                let end = (start..line).rev().find(|&n| !blank(n)).unwrap_or(start);
                chunks.push(Chunk {
                    path: path.to_string(),
                    id: format!("top_level:{}", start),
                    kind: ChunkKind::TopLevel,
                    start,
                    end,
                    content: lines[start - 1..end].concat(),
                    signature: lines[start - 1].trim_end().to_string(),
                    parent: None,
                });
            }
            _ => {}
        }
    }
}

/// Render chunks for a prompt.
///
/// With `targets` set, only the named chunks are shown in full and marked
/// editable; the rest are reduced to their signature. With `None` every
/// chunk is editable. Imports are always shown in full.
pub fn render_chunks(chunks: &[Chunk], targets: Option<&[String]>) -> String {
    let mut paths: Vec<&str> = Vec::new();
    for chunk in chunks {
        if !paths.contains(&chunk.path.as_str()) {
            paths.push(&chunk.path);
        }
    }

    let mut out = String::new();
    for path in paths {
        let mut file_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.path == path).collect();
        file_chunks.sort_by_key(|c| c.start);
        let total = file_chunks.iter().map(|c| c.end).max().unwrap_or(0);

        out.push_str(&format!("=== FILE: {} ({} lines) ===\n\n", path, total));

        let mut shown_until = 0;
        let mut full_until = 0;
        for chunk in file_chunks {
            if chunk.end <= full_until {
                continue;
            }

            let gap = chunk.start.saturating_sub(shown_until + 1);
            if gap >= GAP_MARKER_MIN {
                out.push_str(&format!("# ... [{} lines omitted] ...\n\n", gap));
            }

            let editable = targets.map_or(true, |ids| ids.contains(&chunk.id));
            let range = format!("lines {}-{}", chunk.start, chunk.end);
            if chunk.kind == ChunkKind::Imports {
                out.push_str(&format!("# --- IMPORTS ({}) ---\n", range));
                out.push_str(chunk.content.trim_end());
                full_until = chunk.end;
            } else if editable {
                out.push_str(&format!("# === EDITABLE: {} ({}) ===\n", chunk.id, range));
                out.push_str(chunk.content.trim_end());
                full_until = chunk.end;
            } else {
                out.push_str(&format!("# --- CONTEXT ONLY: {} ({}) ---\n", chunk.id, range));
                out.push_str(&chunk.signature);
            }
            out.push_str("\n\n");
            shown_until = shown_until.max(chunk.end);
        }

        out.push_str("=== END FILE ===\n\n");
    }
    out.trim_end().to_string()
}

/// Ids of chunks `text` talks about, most relevant first
pub fn target_chunks(chunks: &[Chunk], text: &str) -> Vec<String> {
    let text = text.to_lowercase();
    let mut scored: Vec<(u32, &str)> = Vec::new();

    for chunk in chunks {
        if chunk.kind == ChunkKind::Imports {
            continue;
        }

        let name = chunk.name();
        let mut score = 0;
        for word in split_identifier(name) {
            if word.chars().count() > 2 && text.contains(&word) {
                score += 50;
            }
        }
        if text.contains(&name.to_lowercase()) {
            score += 100;
        }
        let signature = chunk.signature.to_lowercase();
        for word in SIGNATURE_WORD_RE.find_iter(&signature) {
            if text.contains(word.as_str()) {
                score += 10;
            }
        }

        if score > 0 {
            scored.push((score, chunk.id.as_str()));
        }
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, id)| id.to_string()).collect()
}

/// Lowercased words of a snake_case, dotted or camelCase identifier
fn split_identifier(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in name.chars() {
        if ch == '_' || ch == '.' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Pull `[EDIT]` and `[NEW]` blocks out of a response.
///
/// Returns `None` when the response has none or when it switches to whole
/// files with `#### [FILE]:`, in which case the caller parses it as files.
pub fn parse_chunk_edits(response: &str) -> Option<Vec<ChunkEdit>> {
    if FILE_MARKER_RE.is_match(response) {
        debug!("response uses whole-file blocks");
        return None;
    }

    let lines: Vec<&str> = response.lines().collect();
    let mut edits = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx].trim();

        if let Some(caps) = EDIT_MARKER_RE.captures(line) {
            let (Ok(start), Ok(end)) = (caps[3].parse::<usize>(), caps[4].parse::<usize>()) else {
                idx += 1;
                continue;
            };
            if let Some((content, next)) = extract_code_block(&lines, idx + 1) {
                edits.push(ChunkEdit {
                    path: caps[1].to_string(),
                    chunk_id: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                    start,
                    end,
                    content,
                    insert_after: None,
                });
                idx = next;
                continue;
            }
        } else if let Some(caps) = NEW_MARKER_RE.captures(line) {
            let Ok(after) = caps[2].parse::<usize>() else {
                idx += 1;
                continue;
            };
            if let Some((content, next)) = extract_code_block(&lines, idx + 1) {
                edits.push(ChunkEdit {
                    path: caps[1].to_string(),
                    chunk_id: "new".to_string(),
                    start: after + 1,
                    end: after + 1,
                    content,
                    insert_after: Some(after),
                });
                idx = next;
                continue;
            }
        }

        idx += 1;
    }

    if edits.is_empty() {
        None
    } else {
        Some(edits)
    }
}

/// The fenced block following a marker, and the line index after it.
///
/// Another `####` marker before the opening fence means this marker has no
/// block of its own.
fn extract_code_block(lines: &[&str], from: usize) -> Option<(String, usize)> {
    let mut idx = from;
    loop {
        let line = lines.get(idx)?.trim();
        if line.starts_with("```") {
            break;
        }
        if line.starts_with("####") {
            return None;
        }
        idx += 1;
    }

    let mut code = Vec::new();
    idx += 1;
    while let Some(line) = lines.get(idx) {
        if line.trim() == "```" {
            return Some((code.join("\n"), idx + 1));
        }
        code.push(*line);
        idx += 1;
    }
    Some((code.join("\n"), idx))
}

/// Splice `edits` into `original`.
///
/// Each replacement range is first resolved against `known` (the chunks
/// the model was shown) so a wrong line number cannot clobber unrelated
/// code. Edits are applied bottom-up so earlier ranges stay valid.
pub fn apply_chunk_edits(original: &str, edits: &[ChunkEdit], known: &[Chunk]) -> String {
    let mut lines: Vec<String> = original.split_inclusive('\n').map(str::to_string).collect();
    let missing_newline = matches!(lines.last(), Some(last) if !last.ends_with('\n'));
    if let Some(last) = lines.last_mut().filter(|_| missing_newline) {
        last.push('\n');
    }

    let mut resolved: Vec<(usize, usize, &ChunkEdit)> = edits
        .iter()
        .map(|edit| {
            let (start, end) = resolve_range(edit, known, &lines);
            (start, end, edit)
        })
        .collect();
    resolved.sort_by(|a, b| b.0.cmp(&a.0));

    for (start, end, edit) in resolved {
        let mut replacement: Vec<String> =
            edit.content.split_inclusive('\n').map(str::to_string).collect();
        if let Some(last) = replacement.last_mut().filter(|l| !l.ends_with('\n')) {
            last.push('\n');
        }

        match edit.insert_after {
            Some(after) => {
                let at = after.min(lines.len());
                lines.splice(at..at, replacement);
            }
            None => {
                let from = start.saturating_sub(1).min(lines.len());
                let to = end.min(lines.len()).max(from);
                lines.splice(from..to, replacement);
            }
        }
    }

    let mut out = lines.concat();
    if missing_newline && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// The 1-based inclusive range an edit really replaces
fn resolve_range(edit: &ChunkEdit, known: &[Chunk], lines: &[String]) -> (usize, usize) {
    if known.is_empty() || edit.insert_after.is_some() {
        return (edit.start, edit.end);
    }

    let span = edit.span();
    let anchor = edit.anchor();

    if let Some(chunk) = known
        .iter()
        .find(|c| c.path == edit.path && c.matches_id(&edit.chunk_id))
    {
        // An edit covering most of its chunk replaces all of it.
        if span * 10 >= chunk.span() * 7 {
            if (edit.start, edit.end) != (chunk.start, chunk.end) {
                info!(
                    path = %edit.path,
                    chunk = %chunk.id,
                    from = ?(edit.start, edit.end),
                    to = ?(chunk.start, chunk.end),
                    "corrected edit range to its chunk"
                );
            }
            return (chunk.start, chunk.end);
        }

        if let Some(anchor) = anchor {
            let window = chunk.start - 1..chunk.end.min(lines.len());
            if let Some(idx) = window.into_iter().find(|&i| lines[i].trim() == anchor) {
                let start = idx + 1;
                let end = (start + span - 1).min(chunk.end);
                info!(path = %edit.path, chunk = %chunk.id, start, end, "aligned partial edit on its first line");
                return (start, end);
            }
        }

        if chunk.span() > span {
            let offset = edit.start.saturating_sub(chunk.start).min(chunk.span() - span);
            let start = chunk.start + offset;
            return (start, start + span - 1);
        }
        return (chunk.start, chunk.end);
    }

    if let Some(anchor) = anchor {
        if let Some(idx) = lines.iter().position(|l| l.trim() == anchor) {
            let start = idx + 1;
            let end = (start + span - 1).min(lines.len());
            info!(path = %edit.path, start, end, "aligned edit without a known chunk");
            return (start, end);
        }
    }

    if edit.end > lines.len() {
        warn!(
            path = %edit.path,
            start = edit.start,
            end = edit.end,
            total = lines.len(),
            "edit range runs past the end of the file"
        );
    }
    (edit.start, edit.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_PY: &str = "\
import os
from datetime import datetime

GLOBAL_VAR = 42


class UserService:
    def __init__(self, db):
        self.db = db

    def authenticate(self, username, password):
        user = self.db.find(username)
        if user is None:
            return False
        return user.check_password(password)

    def get_user(self, user_id):
        return self.db.get(user_id)


def helper_function():
    return \"hello\"


def another_helper(x, y):
    return x + y
";

    const APP_JS: &str = "\
const express = require('express');
const { UserService } = require('./services');

class AppController {
    constructor(service) {
        this.service = service;
    }
}

function createApp() {
    const app = express();
    return app;
}

module.exports = { AppController, createApp };
";

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.id.as_str()).collect()
    }

    fn find<'a>(chunks: &'a [Chunk], id: &str) -> &'a Chunk {
        chunks.iter().find(|c| c.id == id).unwrap()
    }

    #[test]
    fn test_chunk_python_file() {
        let chunks = chunk_file("service.py", SERVICE_PY);
        assert_eq!(
            ids(&chunks),
            vec![
                "imports",
                "top_level:4",
                "class:UserService",
                "method:UserService.__init__",
                "method:UserService.authenticate",
                "method:UserService.get_user",
                "function:helper_function",
                "function:another_helper",
            ]
        );

        let imports = find(&chunks, "imports");
        assert_eq!((imports.start, imports.end), (1, 2));

        let class = find(&chunks, "class:UserService");
        assert_eq!((class.start, class.end), (7, 18));

        let auth = find(&chunks, "method:UserService.authenticate");
        assert_eq!((auth.start, auth.end), (11, 15));
        assert_eq!(auth.kind, ChunkKind::Method);
        assert_eq!(auth.parent.as_deref(), Some("UserService"));
        assert_eq!(auth.signature, "    def authenticate(self, username, password):");
        assert!(auth.content.ends_with("return user.check_password(password)\n"));

        let last = find(&chunks, "function:another_helper");
        assert_eq!((last.start, last.end), (25, 26));
    }

    #[test]
    fn test_chunks_cover_every_code_line() {
        let chunks = chunk_file("service.py", SERVICE_PY);
        for (idx, line) in SERVICE_PY.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let n = idx + 1;
            assert!(
                chunks.iter().any(|c| c.start <= n && n <= c.end),
                "line {} not covered: {:?}",
                n,
                line
            );
        }
    }

    #[test]
    fn test_chunk_js_file() {
        let chunks = chunk_file("app.js", APP_JS);
        assert_eq!(
            ids(&chunks),
            vec!["imports", "class:AppController", "function:createApp"]
        );
        let class = find(&chunks, "class:AppController");
        assert_eq!((class.start, class.end), (4, 8));
    }

    #[test]
    fn test_chunk_edge_files() {
        assert!(chunk_file("empty.py", "").is_empty());

        let chunks = chunk_file("imports.py", "import os\nimport sys\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Imports);

        let chunks = chunk_file("notes.txt", "x = 1\ny = 2\n");
        assert_eq!(ids(&chunks), vec!["top_level:1"]);
    }

    #[test]
    fn test_imports_stop_at_first_code_line() {
        let source = "\"\"\"Module docs\n\nimport this is prose\n\"\"\"\nimport os\n\nx = 1\n\ndef f():\n    import json\n";
        let chunks = chunk_file("mod.py", source);
        let imports = find(&chunks, "imports");
        assert_eq!((imports.start, imports.end), (1, 5));
    }

    #[test]
    fn test_match_chunk_ids() {
        let chunks = chunk_file("service.py", SERVICE_PY);
        let auth = find(&chunks, "method:UserService.authenticate");
        assert!(auth.matches_id("method:UserService.authenticate"));
        assert!(auth.matches_id("UserService.authenticate"));
        assert!(auth.matches_id("authenticate"));
        assert!(!auth.matches_id("get_user"));
        assert!(!auth.matches_id(""));
    }

    #[test]
    fn test_target_chunks() {
        let chunks = chunk_file("service.py", SERVICE_PY);

        let targets = target_chunks(&chunks, "fix the authenticate method");
        assert_eq!(targets[0], "method:UserService.authenticate");

        let targets = target_chunks(&chunks, "update helper functions");
        assert!(targets.contains(&"function:helper_function".to_string()));
        assert!(targets.contains(&"function:another_helper".to_string()));

        assert!(target_chunks(&chunks, "xyz qq").is_empty());
    }

    #[test]
    fn test_split_identifier() {
        assert_eq!(split_identifier("handleLogin"), vec!["handle", "login"]);
        assert_eq!(split_identifier("UserService.get_user"), vec!["user", "service", "get", "user"]);
    }

    #[test]
    fn test_render_with_targets() {
        let chunks = chunk_file("service.py", SERVICE_PY);
        let targets = vec!["method:UserService.authenticate".to_string()];
        let text = render_chunks(&chunks, Some(&targets));

        assert!(text.starts_with("=== FILE: service.py (26 lines) ==="));
        assert!(text.contains("# --- IMPORTS (lines 1-2) ---\nimport os"));
        assert!(text.contains(
            "# === EDITABLE: method:UserService.authenticate (lines 11-15) ===\n    def authenticate"
        ));
        assert!(text.contains("# --- CONTEXT ONLY: function:helper_function (lines 21-22) ---\ndef helper_function():\n"));
        assert!(!text.contains("return \"hello\""));
        assert!(text.ends_with("=== END FILE ==="));
    }

    #[test]
    fn test_render_all_editable_shows_methods_once() {
        let chunks = chunk_file("service.py", SERVICE_PY);
        let text = render_chunks(&chunks, None);

        assert!(!text.contains("CONTEXT ONLY"));
        assert!(text.contains("EDITABLE: class:UserService"));
        assert!(!text.contains("EDITABLE: method:UserService.authenticate"));
        assert_eq!(text.matches("def authenticate").count(), 1);
    }

    #[test]
    fn test_render_marks_long_gaps() {
        let source = format!("def a():\n    pass\n{}def b():\n    pass\n", "\n".repeat(5));
        let chunks = chunk_file("gaps.py", &source);
        let text = render_chunks(&chunks, None);
        assert!(text.contains("# ... [5 lines omitted] ..."));
    }

    #[test]
    fn test_parse_edit_and_new_blocks() {
        let response = "Here are the changes:\n\n\
            #### [EDIT]: service.py:authenticate (lines 10-15)\n\
            ```python\n\
            def authenticate(self, username, password):\n    return False\n\
            ```\n\n\
            #### [NEW]: service.py (after line 25)\n\
            ```python\n\
            def validate_email(email):\n    return \"@\" in email\n\
            ```\n";
        let edits = parse_chunk_edits(response).unwrap();
        assert_eq!(edits.len(), 2);

        assert_eq!(edits[0].path, "service.py");
        assert_eq!(edits[0].chunk_id, "authenticate");
        assert_eq!((edits[0].start, edits[0].end), (10, 15));
        assert_eq!(
            edits[0].content,
            "def authenticate(self, username, password):\n    return False"
        );
        assert_eq!(edits[0].insert_after, None);

        assert_eq!(edits[1].chunk_id, "new");
        assert_eq!(edits[1].insert_after, Some(25));
    }

    #[test]
    fn test_parse_edit_without_chunk_name() {
        let response = "#### [EDIT]: calc.py (line 3-3)\n```\nreturn a + b\n```";
        let edits = parse_chunk_edits(response).unwrap();
        assert_eq!(edits[0].path, "calc.py");
        assert_eq!(edits[0].chunk_id, "");
        assert_eq!((edits[0].start, edits[0].end), (3, 3));
    }

    #[test]
    fn test_marker_without_block_does_not_take_the_next_one() {
        let response = "#### [EDIT]: a.py:f (lines 1-2)\n\n#### [EDIT]: a.py:g (lines 4-5)\n```\ndef g():\n    pass\n```";
        let edits = parse_chunk_edits(response).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].chunk_id, "g");
    }

    #[test]
    fn test_parse_falls_back_on_file_blocks_or_prose() {
        let response = "#### [FILE]: calc.py\n```python\nx = 1\n```";
        assert!(parse_chunk_edits(response).is_none());
        assert!(parse_chunk_edits("No changes needed, the code looks correct.").is_none());
    }

    fn edit(chunk_id: &str, start: usize, end: usize, content: &str) -> ChunkEdit {
        ChunkEdit {
            path: "t.py".to_string(),
            chunk_id: chunk_id.to_string(),
            start,
            end,
            content: content.to_string(),
            insert_after: None,
        }
    }

    #[test]
    fn test_apply_replaces_and_inserts_bottom_up() {
        let original = "a\nb\nc\nd\ne\n";
        let mut insert = edit("new", 3, 3, "inserted");
        insert.insert_after = Some(2);
        let edits = vec![edit("c1", 2, 2, "B\n"), edit("c2", 4, 4, "D\nD2"), insert];

        let result = apply_chunk_edits(original, &edits, &[]);
        assert_eq!(result, "a\nB\ninserted\nc\nD\nD2\ne\n");
    }

    #[test]
    fn test_apply_keeps_missing_trailing_newline() {
        let mut insert = edit("new", 3, 3, "z");
        insert.insert_after = Some(2);
        assert_eq!(apply_chunk_edits("x\ny", &[insert], &[]), "x\ny\nz");
    }

    #[test]
    fn test_apply_corrects_wrong_line_numbers() {
        let original = "line1\nline2\nline3\nline4\nline5\ndef setup():\n    old_a\n    old_b\n    old_c\n    old_d\n";
        let known = chunk_file("t.py", original);
        let fix = edit("setup", 2, 5, "def setup():\n    new_a\n    new_b\n    new_c\n    new_d\n");

        let result = apply_chunk_edits(original, &[fix], &known);
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(&lines[..5], &["line1", "line2", "line3", "line4", "line5"]);
        assert_eq!(lines[5], "def setup():");
        assert_eq!(lines[6], "    new_a");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_apply_aligns_partial_edit_on_content() {
        let known = chunk_file("service.py", SERVICE_PY);
        // Wrong lines, right first line: replace the two-line `if` block.
        let mut fix = edit(
            "authenticate",
            40,
            41,
            "        if user is None:\n            raise LookupError(username)\n",
        );
        fix.path = "service.py".to_string();

        let result = apply_chunk_edits(SERVICE_PY, &[fix], &known);
        assert!(result.contains(
            "        if user is None:\n            raise LookupError(username)\n        return user.check_password"
        ));
        assert_eq!(result.lines().count(), SERVICE_PY.lines().count());
    }

    #[test]
    fn test_apply_unknown_chunk_uses_content_or_given_lines() {
        let original = "a\nb\nc\nd\ne\n";
        let known = vec![Chunk {
            path: "t.py".to_string(),
            id: "function:setup".to_string(),
            kind: ChunkKind::Function,
            start: 4,
            end: 5,
            content: "d\ne\n".to_string(),
            signature: "def setup():".to_string(),
            parent: None,
        }];

        let result = apply_chunk_edits(original, &[edit("nonexistent", 2, 3, "B\nC\n")], &known);
        assert_eq!(result, "a\nB\nC\nd\ne\n");

        let result = apply_chunk_edits(original, &[edit("nonexistent", 1, 1, "c\nC2\n")], &known);
        assert_eq!(result, "a\nb\nc\nC2\nd\ne\n");
    }
}
