// Reads the file list out of a unified diff between two builds.
//
// Only the per-file headers matter. Replacement content always comes from
// the freshly extracted build, so hunk bodies are skipped. They are skipped by
// counting the lengths in each `@@` header, never by looking at line content,
// since a body line can itself start with `--- ` or `+++ `.

use serde::{Deserialize, Serialize};

use crate::updater::UpdateError;

const DEV_NULL: &str = "/dev/null";

/// The three kinds of change a diff can describe for a file. The declaration
/// order is the order the applier processes them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    Modify,
    Remove,
    Add,
}

impl OperationClass {
    pub const APPLY_ORDER: [OperationClass; 3] = [
        OperationClass::Modify,
        OperationClass::Remove,
        OperationClass::Add,
    ];
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationClass::Modify => write!(f, "Modified"),
            OperationClass::Remove => write!(f, "Removed"),
            OperationClass::Add => write!(f, "Added"),
        }
    }
}

/// Files touched by a diff, grouped by operation, each in diff order.
/// Paths are relative to the tree root and always use `/`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffManifest {
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl DiffManifest {
    pub fn entries(&self, class: OperationClass) -> &[String] {
        match class {
            OperationClass::Modify => &self.modified,
            OperationClass::Remove => &self.removed,
            OperationClass::Add => &self.added,
        }
    }

    pub fn len(&self) -> usize {
        self.modified.len() + self.removed.len() + self.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parse(diff: &str) -> Result<Self, UpdateError> {
        let mut parser = Parser::default();
        let mut lines = diff.lines().enumerate();
        while let Some((index, line)) = lines.next() {
            let line_number = index + 1;
            if let Some(rest) = line.strip_prefix("diff --git ") {
                parser.finish_entry()?;
                let (source, target) = split_git_header(rest).ok_or_else(|| {
                    malformed(line_number, "could not split 'diff --git' header")
                })?;
                parser.start_entry(line_number, source, target, true);
            } else if line.starts_with("new file mode") {
                parser.mark(OperationClass::Add, line_number)?;
            } else if line.starts_with("deleted file mode") {
                parser.mark(OperationClass::Remove, line_number)?;
            } else if let Some(rest) = line.strip_prefix("--- ") {
                let target = match lines.next() {
                    Some((_, next)) => next.strip_prefix("+++ "),
                    None => None,
                }
                .ok_or_else(|| malformed(line_number, "'---' header without '+++' header"))?;
                let source = header_path(rest);
                let target = header_path(target);
                if !parser.continues_git_entry() {
                    parser.finish_entry()?;
                    parser.start_entry(line_number, source, target, false);
                } else {
                    parser.refine_paths(source, target);
                }
            } else if let Some(rest) = line.strip_prefix("Binary files ") {
                let (source, target) = rest
                    .strip_suffix(" differ")
                    .and_then(|paths| paths.split_once(" and "))
                    .ok_or_else(|| malformed(line_number, "unrecognized 'Binary files' line"))?;
                if !parser.continues_git_entry() {
                    parser.finish_entry()?;
                    parser.start_entry(line_number, source, target, false);
                } else {
                    parser.refine_paths(source, target);
                }
                parser.finish_entry()?;
            } else if line.starts_with("@@") {
                let hunk = parse_hunk_header(line)
                    .ok_or_else(|| malformed(line_number, "malformed hunk header"))?;
                parser.saw_hunk(hunk.source_empty(), hunk.target_empty());
                skip_hunk_body(&mut lines, hunk, line_number)?;
            }
            // Everything else is hunk content or preamble.
        }
        parser.finish_entry()?;
        Ok(parser.manifest)
    }
}

fn malformed(line: usize, reason: &str) -> UpdateError {
    UpdateError::MalformedDiff {
        line,
        reason: reason.to_string(),
    }
}

/// Strips the trailing timestamp `diff -u` puts after a tab.
fn header_path(raw: &str) -> &str {
    raw.split('\t').next().unwrap_or(raw).trim_end()
}

/// `a/foo/x b/foo/x`: split at the space that begins the second path.
fn split_git_header(rest: &str) -> Option<(&str, &str)> {
    if let Some(index) = rest.find(" b/") {
        return Some((&rest[..index], &rest[index + 1..]));
    }
    rest.split_once(' ')
}

/// The `(start, length)` ranges of `@@ -s,l +s,l @@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkHeader {
    source: (u64, u64),
    target: (u64, u64),
}

impl HunkHeader {
    fn source_empty(&self) -> bool {
        self.source == (0, 0)
    }

    fn target_empty(&self) -> bool {
        self.target == (0, 0)
    }
}

fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "@@" {
        return None;
    }
    let source = parse_range(parts.next()?.strip_prefix('-')?)?;
    let target = parse_range(parts.next()?.strip_prefix('+')?)?;
    if parts.next()? != "@@" {
        return None;
    }
    Some(HunkHeader { source, target })
}

/// Consumes the body lines of a hunk until both of its lengths are used up.
fn skip_hunk_body<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    hunk: HunkHeader,
    header_line: usize,
) -> Result<(), UpdateError> {
    let (mut source_left, mut target_left) = (hunk.source.1, hunk.target.1);
    while source_left > 0 || target_left > 0 {
        let Some((index, line)) = lines.next() else {
            return Err(malformed(header_line, "diff ends inside a hunk"));
        };
        let line_number = index + 1;
        // Some tools drop the single space of an empty context line.
        let (takes_source, takes_target) = match line.chars().next() {
            Some(' ') | None => (true, true),
            Some('-') => (true, false),
            Some('+') => (false, true),
            Some('\\') => continue,
            Some(_) => return Err(malformed(line_number, "hunk is shorter than its header")),
        };
        if (takes_source && source_left == 0) || (takes_target && target_left == 0) {
            return Err(malformed(line_number, "hunk is longer than its header"));
        }
        source_left -= u64::from(takes_source);
        target_left -= u64::from(takes_target);
    }
    Ok(())
}

fn parse_range(range: &str) -> Option<(u64, u64)> {
    match range.split_once(',') {
        Some((start, length)) => Some((start.parse().ok()?, length.parse().ok()?)),
        // A missing length means one line.
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Drops the leading `<side>/<root>/` pair so both sides of the diff map to
/// the same tree-relative path.
fn relative_path(path: &str, line: usize) -> Result<String, UpdateError> {
    let mut segments = path.splitn(3, '/');
    let rest = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(_), Some(rest)) if !rest.is_empty() => rest,
        _ => {
            return Err(malformed(
                line,
                &format!("path '{}' has no file below the build root", path),
            ))
        }
    };
    // The path is joined onto the installed tree, so it must stay inside it.
    if rest
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(malformed(
            line,
            &format!("path '{}' escapes the build root", path),
        ));
    }
    Ok(rest.to_string())
}

#[derive(Debug)]
struct PendingEntry {
    line: usize,
    source: String,
    target: String,
    class: Option<OperationClass>,
    from_git_header: bool,
    saw_hunk: bool,
}

#[derive(Default)]
struct Parser {
    manifest: DiffManifest,
    pending: Option<PendingEntry>,
}

impl Parser {
    fn start_entry(&mut self, line: usize, source: &str, target: &str, from_git_header: bool) {
        self.pending = Some(PendingEntry {
            line,
            source: source.to_string(),
            target: target.to_string(),
            class: None,
            from_git_header,
            saw_hunk: false,
        });
    }

    /// A git entry owns the `---`/`+++` and `Binary files` lines that follow
    /// its header, until its first hunk.
    fn continues_git_entry(&self) -> bool {
        matches!(&self.pending, Some(p) if p.from_git_header && !p.saw_hunk)
    }

    fn refine_paths(&mut self, source: &str, target: &str) {
        if let Some(pending) = self.pending.as_mut() {
            pending.source = source.to_string();
            pending.target = target.to_string();
        }
    }

    fn mark(&mut self, class: OperationClass, line: usize) -> Result<(), UpdateError> {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.class = Some(class);
                Ok(())
            }
            None => Err(malformed(line, "file mode line outside of a file header")),
        }
    }

    fn saw_hunk(&mut self, source_empty: bool, target_empty: bool) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        // Only the first hunk decides; `diff -N` emits a single hunk covering
        // the whole file for added and removed files.
        if !pending.saw_hunk && pending.class.is_none() {
            if source_empty && !target_empty {
                pending.class = Some(OperationClass::Add);
            } else if target_empty && !source_empty {
                pending.class = Some(OperationClass::Remove);
            }
        }
        pending.saw_hunk = true;
    }

    fn finish_entry(&mut self) -> Result<(), UpdateError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let class = pending.class.unwrap_or(if pending.source == DEV_NULL {
            OperationClass::Add
        } else if pending.target == DEV_NULL {
            OperationClass::Remove
        } else {
            OperationClass::Modify
        });
        let raw_path = match class {
            OperationClass::Add => &pending.target,
            _ => &pending.source,
        };
        let path = relative_path(raw_path, pending.line)?;
        match class {
            OperationClass::Modify => self.manifest.modified.push(path),
            OperationClass::Remove => self.manifest.removed.push(path),
            OperationClass::Add => self.manifest.added.push(path),
        }
        Ok(())
    }
}
