//! Named command series, persisted to a text file.
//!
//! Shortcuts are defined with `name <- series`, validated eagerly through the
//! same expansion and validation pipeline used at execution time, and appended
//! to the shortcut file. On reload, invalid entries are dropped with a warning;
//! entries that depend on a dropped entry are dropped too.
//!
//! File format:
//! ```text
//! # Command shortcuts file
//! # Format: shortcut_name <- command > command > command
//!
//! flash                <- r0.5 > isi2 > r0.5
//!
//! puff                 <- pump:on > air:on > isi1 > air:off
//! ```

use crate::command::grammar::{Grammar, ShortcutLookup};
use crate::command::series::{CommandSeries, SeriesItem};
use crate::command::{Command, RESERVED_WORDS};
use crate::error::{StimError, StimResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[allow(clippy::expect_used)]
static SHORTCUT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid shortcut name regex"));

const FILE_HEADER: &str =
    "# Command shortcuts file\n# Format: shortcut_name <- command > command > command\n";
const MIN_NAME_COLUMN: usize = 20;

/// Separator between a shortcut name and its series.
pub const DEFINE_SEPARATOR: &str = "<-";

/// Guards against runaway expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionLimits {
    /// Maximum nesting of shortcuts and repetition blocks
    pub max_depth: usize,
    /// Maximum number of tokens after expansion
    pub max_len: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_len: 100_000,
        }
    }
}

/// One stored shortcut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    /// Identifier
    pub name: String,
    /// Series text as written
    pub series: String,
}

/// Outcome of loading the shortcut file.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    /// Names that loaded
    pub loaded: Vec<String>,
    /// Rejected entries with the reason
    pub rejected: Vec<(String, String)>,
}

/// Split `name <- series` into its parts, if the line is a definition.
pub fn parse_definition(line: &str) -> Option<(&str, &str)> {
    let (name, series) = line.split_once(DEFINE_SEPARATOR)?;
    Some((name.trim(), series.trim()))
}

/// In-memory shortcut map backed by an optional file.
#[derive(Debug, Clone, Default)]
pub struct ShortcutStore {
    path: Option<PathBuf>,
    entries: Vec<Shortcut>,
    limits: ExpansionLimits,
}

impl ShortcutLookup for ShortcutStore {
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl ShortcutStore {
    /// Empty store that never touches the disk.
    pub fn in_memory(limits: ExpansionLimits) -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            limits,
        }
    }

    /// Empty store persisted to `path`; nothing is read until [`reload`](Self::reload).
    pub fn with_file(path: impl Into<PathBuf>, limits: ExpansionLimits) -> Self {
        Self {
            path: Some(path.into()),
            entries: Vec::new(),
            limits,
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stored shortcut by name.
    pub fn get(&self, name: &str) -> Option<&Shortcut> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Shortcuts in definition order.
    pub fn list(&self) -> &[Shortcut] {
        &self.entries
    }

    /// Number of shortcuts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no shortcut is defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand a raw series into primitive tokens.
    ///
    /// Depth-first, left to right. Shortcut names are replaced by their
    /// expansion, repetition blocks by N copies of their expanded inner series.
    /// The result contains no shortcut names and no repetition syntax, so
    /// expanding its joined form again yields the same tokens.
    pub fn expand(&self, raw: &str) -> StimResult<Vec<String>> {
        let mut out = Vec::new();
        let mut active = Vec::new();
        self.expand_into(raw, 0, &mut active, &mut out)?;
        Ok(out)
    }

    /// Expand then validate every token, atomically.
    pub fn compile(&self, raw: &str, grammar: &Grammar<'_>) -> StimResult<Vec<Command>> {
        let tokens = self.expand(raw)?;
        grammar.compile_series(&tokens, self)
    }

    fn expand_into(
        &self,
        raw: &str,
        depth: usize,
        active: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> StimResult<()> {
        if depth > self.limits.max_depth {
            return Err(StimError::ExpansionTooDeep(self.limits.max_depth));
        }
        let series = CommandSeries::parse(raw)?;
        self.expand_items(&series.items, depth, active, out)
    }

    fn expand_items(
        &self,
        items: &[SeriesItem],
        depth: usize,
        active: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> StimResult<()> {
        for item in items {
            match item {
                SeriesItem::Token(token) => match self.get(token) {
                    Some(shortcut) => {
                        if active.iter().any(|name| name == &shortcut.name) {
                            let mut chain = active.clone();
                            chain.push(shortcut.name.clone());
                            return Err(StimError::ShortcutCycle(chain.join(" -> ")));
                        }
                        active.push(shortcut.name.clone());
                        self.expand_into(&shortcut.series, depth + 1, active, out)?;
                        active.pop();
                    }
                    None => {
                        self.push_token(out, token.clone())?;
                    }
                },
                SeriesItem::Repeat(block) => {
                    if depth + 1 > self.limits.max_depth {
                        return Err(StimError::ExpansionTooDeep(self.limits.max_depth));
                    }
                    let mut inner = Vec::new();
                    self.expand_items(&block.inner.items, depth + 1, active, &mut inner)?;
                    let total = inner.len().saturating_mul(block.count as usize);
                    if out.len().saturating_add(total) > self.limits.max_len {
                        return Err(StimError::ExpansionTooLarge(self.limits.max_len));
                    }
                    for _ in 0..block.count {
                        out.extend(inner.iter().cloned());
                    }
                }
            }
        }
        Ok(())
    }

    fn push_token(&self, out: &mut Vec<String>, token: String) -> StimResult<()> {
        if out.len() >= self.limits.max_len {
            return Err(StimError::ExpansionTooLarge(self.limits.max_len));
        }
        out.push(token);
        Ok(())
    }

    /// Reject names that cannot be used for a new shortcut.
    pub fn check_name(&self, name: &str, grammar: &Grammar<'_>) -> StimResult<()> {
        if !SHORTCUT_NAME.is_match(name) {
            return Err(StimError::InvalidShortcutName(name.to_string()));
        }
        if RESERVED_WORDS.contains(&name) || name == grammar.stim_alias() {
            return Err(StimError::ReservedName(name.to_string()));
        }
        if self.contains(name) {
            return Err(StimError::ShortcutExists(name.to_string()));
        }
        // Names such as r5 or isi2 would shadow the primitive form.
        if grammar.validate(name, self).is_ok() {
            return Err(StimError::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Define, validate and persist a new shortcut.
    pub fn define(&mut self, name: &str, series: &str, grammar: &Grammar<'_>) -> StimResult<()> {
        let name = name.trim();
        let series = series.trim();
        self.check_name(name, grammar)?;
        if series.is_empty() {
            return Err(StimError::Syntax(format!("{name} {DEFINE_SEPARATOR}")));
        }
        self.compile(series, grammar)?;

        if let Some(path) = &self.path {
            append_entry(path, name, series)?;
        }
        self.entries.push(Shortcut {
            name: name.to_string(),
            series: series.to_string(),
        });
        info!(shortcut = name, series, "Shortcut defined");
        Ok(())
    }

    /// Re-read the backing file, replacing the in-memory map.
    ///
    /// A missing file yields an empty store.
    pub fn reload(&mut self, grammar: &Grammar<'_>) -> StimResult<LoadReport> {
        let Some(path) = self.path.clone() else {
            return Ok(LoadReport {
                loaded: self.entries.iter().map(|e| e.name.clone()).collect(),
                rejected: Vec::new(),
            });
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let report = self.load_text(&text, grammar);
        for (entry, reason) in &report.rejected {
            warn!(shortcut = %entry, %reason, file = %path.display(), "Dropped shortcut");
        }
        info!(
            count = report.loaded.len(),
            file = %path.display(),
            "Shortcuts loaded"
        );
        Ok(report)
    }

    /// Replace the map with the entries of `text`, dropping invalid ones.
    pub fn load_text(&mut self, text: &str, grammar: &Grammar<'_>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut candidates: Vec<Shortcut> = Vec::new();
        let mut seen = HashSet::new();

        self.entries.clear();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, series)) = parse_definition(line) else {
                report
                    .rejected
                    .push((line.to_string(), "missing '<-'".to_string()));
                continue;
            };
            if !seen.insert(name.to_string()) {
                report
                    .rejected
                    .push((name.to_string(), "duplicate name".to_string()));
                continue;
            }
            if let Err(err) = self.check_name(name, grammar) {
                report.rejected.push((name.to_string(), err.to_string()));
                continue;
            }
            candidates.push(Shortcut {
                name: name.to_string(),
                series: series.to_string(),
            });
        }

        // Drop entries until every remaining one compiles against the rest.
        self.entries = candidates;
        loop {
            let failing: Vec<(usize, String)> = self
                .entries
                .iter()
                .enumerate()
                .filter_map(|(idx, entry)| {
                    self.compile(&entry.series, grammar)
                        .err()
                        .map(|err| (idx, err.to_string()))
                })
                .collect();
            if failing.is_empty() {
                break;
            }
            for (idx, reason) in failing.into_iter().rev() {
                let entry = self.entries.remove(idx);
                report.rejected.push((entry.name, reason));
            }
        }

        report.loaded = self.entries.iter().map(|e| e.name.clone()).collect();
        report
    }
}

fn append_entry(path: &Path, name: &str, series: &str) -> StimResult<()> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    let longest = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(parse_definition)
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    let width = MIN_NAME_COLUMN.max(longest + 2);

    let mut chunk = String::new();
    if existing.trim().is_empty() {
        chunk.push_str(FILE_HEADER);
        chunk.push('\n');
    } else if !existing.ends_with("\n\n") {
        chunk.push_str(if existing.ends_with('\n') { "\n" } else { "\n\n" });
    }
    chunk.push_str(&format!("{name:<width$} {DEFINE_SEPARATOR} {series}\n"));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = if existing.trim().is_empty() {
        fs::File::create(path)?
    } else {
        OpenOptions::new().append(true).open(path)?
    };
    file.write_all(chunk.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SessionParams;

    fn grammar_parts() -> (SessionParams, Vec<String>) {
        (SessionParams::default(), vec!["looming".to_string()])
    }

    fn store_with(entries: &[(&str, &str)]) -> ShortcutStore {
        let mut store = ShortcutStore::in_memory(ExpansionLimits::default());
        store.entries = entries
            .iter()
            .map(|(name, series)| Shortcut {
                name: name.to_string(),
                series: series.to_string(),
            })
            .collect();
        store
    }

    #[test]
    fn repetition_of_primitives() {
        let store = store_with(&[]);
        assert_eq!(
            store.expand("(r > p) * 3").unwrap(),
            vec!["r", "p", "r", "p", "r", "p"]
        );
    }

    #[test]
    fn nested_shortcuts_and_blocks() {
        let store = store_with(&[("blink", "r0.5 > isi1"), ("train", "(blink) * 2 > p")]);
        assert_eq!(
            store.expand("train > v").unwrap(),
            vec!["r0.5", "isi1", "r0.5", "isi1", "p", "v"]
        );
    }

    #[test]
    fn expansion_is_idempotent() {
        let store = store_with(&[("blink", "r0.5 > isi1"), ("train", "((blink) * 2 > p) * 2")]);
        let once = store.expand("train > (t) * 2").unwrap();
        let twice = store.expand(&once.join(" > ")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cycles_are_detected() {
        let store = store_with(&[("a", "r > b"), ("b", "(a) * 2")]);
        match store.expand("a") {
            Err(StimError::ShortcutCycle(chain)) => assert_eq!(chain, "a -> b -> a"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn size_cap() {
        let mut store = store_with(&[]);
        store.limits.max_len = 10;
        assert!(matches!(
            store.expand("((r) * 5) * 5"),
            Err(StimError::ExpansionTooLarge(10))
        ));
    }

    #[test]
    fn depth_cap() {
        let mut store = store_with(&[("a", "b"), ("b", "c"), ("c", "r")]);
        store.limits.max_depth = 2;
        assert!(matches!(
            store.expand("a"),
            Err(StimError::ExpansionTooDeep(2))
        ));
    }

    #[test]
    fn name_rules() {
        let (params, stimuli) = grammar_parts();
        let grammar = Grammar::new(&params, &stimuli, "r/v");
        let store = store_with(&[("flash", "r")]);
        assert!(matches!(
            store.check_name("bad-name", &grammar),
            Err(StimError::InvalidShortcutName(_))
        ));
        assert!(matches!(
            store.check_name("pump", &grammar),
            Err(StimError::ReservedName(_))
        ));
        assert!(matches!(
            store.check_name("r5", &grammar),
            Err(StimError::ReservedName(_))
        ));
        assert!(matches!(
            store.check_name("flash", &grammar),
            Err(StimError::ShortcutExists(_))
        ));
        assert!(store.check_name("puff_2", &grammar).is_ok());
    }

    #[test]
    fn define_rejects_invalid_series_without_storing() {
        let (params, stimuli) = grammar_parts();
        let grammar = Grammar::new(&params, &stimuli, "r/v");
        let mut store = store_with(&[]);
        let err = store.define("bad", "r > bogus", &grammar).unwrap_err();
        assert!(matches!(err, StimError::SeriesValidationFailed { index: 1, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn load_drops_dependents_of_invalid_entries() {
        let (params, stimuli) = grammar_parts();
        let grammar = Grammar::new(&params, &stimuli, "r/v");
        let mut store = ShortcutStore::in_memory(ExpansionLimits::default());
        let text = "\
# Command shortcuts file
good                 <- r > isi1

broken               <- r > nonsense

uses_broken          <- good > broken

good                 <- p

loop_a               <- loop_b
loop_b               <- loop_a
pump                 <- r
";
        let report = store.load_text(text, &grammar);
        assert_eq!(report.loaded, vec!["good"]);
        let rejected: Vec<&str> = report.rejected.iter().map(|(n, _)| n.as_str()).collect();
        assert!(rejected.contains(&"broken"));
        assert!(rejected.contains(&"uses_broken"));
        assert!(rejected.contains(&"loop_a"));
        assert!(rejected.contains(&"loop_b"));
        assert!(rejected.contains(&"pump"));
        assert_eq!(store.get("good").unwrap().series, "r > isi1");
    }

    #[test]
    fn define_appends_padded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shortcuts.txt");
        let (params, stimuli) = grammar_parts();
        let grammar = Grammar::new(&params, &stimuli, "r/v");

        let mut store = ShortcutStore::with_file(&path, ExpansionLimits::default());
        store.define("blink", "r0.5 > isi1", &grammar).unwrap();
        store.define("twice", "(blink) * 2", &grammar).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Command shortcuts file\n"));
        assert!(text.contains(&format!("{:<20} <- r0.5 > isi1\n", "blink")));
        assert!(text.contains(&format!("\n\n{:<20} <- (blink) * 2\n", "twice")));

        let mut reloaded = ShortcutStore::with_file(&path, ExpansionLimits::default());
        let report = reloaded.reload(&grammar).unwrap();
        assert_eq!(report.loaded, vec!["blink", "twice"]);
        assert_eq!(
            reloaded.expand("twice").unwrap(),
            store.expand("r0.5 > isi1 > r0.5 > isi1").unwrap()
        );
    }

    #[test]
    fn definition_split() {
        assert_eq!(
            parse_definition("foo <- pump:on > isi2"),
            Some(("foo", "pump:on > isi2"))
        );
        assert_eq!(parse_definition("r > p"), None);
    }
}
