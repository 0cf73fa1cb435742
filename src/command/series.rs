//! Parser for `>`-chained series with `(<inner>) * N` repetition blocks.
//!
//! The parser only builds the tree; token validation and shortcut expansion
//! happen afterwards on the flattened token list.

use crate::error::{StimError, StimResult};
use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static REPEAT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*\s*(\d+)$").expect("valid repeat suffix regex"));

/// One element of a series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesItem {
    /// A single command or shortcut token
    Token(String),
    /// A parenthesised group repeated N times
    Repeat(RepetitionBlock),
}

/// `(<inner>) * count`
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionBlock {
    /// Series inside the parentheses
    pub inner: CommandSeries,
    /// Number of repetitions (0 expands to nothing)
    pub count: u32,
}

/// Ordered list of series items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandSeries {
    /// Items in execution order
    pub items: Vec<SeriesItem>,
}

impl CommandSeries {
    /// Parse a raw series string.
    ///
    /// Empty items are kept as empty tokens (which validate as "play once"),
    /// so `a >> b` behaves like `a > <Enter> > b`.
    pub fn parse(text: &str) -> StimResult<Self> {
        let items = split_top_level(text)?
            .into_iter()
            .map(parse_item)
            .collect::<StimResult<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// Flatten repetition blocks into a token list without expanding shortcuts.
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        flatten_into(&self.items, &mut out);
        out
    }
}

fn flatten_into(items: &[SeriesItem], out: &mut Vec<String>) {
    for item in items {
        match item {
            SeriesItem::Token(token) => out.push(token.clone()),
            SeriesItem::Repeat(block) => {
                for _ in 0..block.count {
                    flatten_into(&block.inner.items, out);
                }
            }
        }
    }
}

/// Whether a line should be treated as a series rather than a single command.
pub fn is_series(text: &str) -> bool {
    text.contains('>') || text.contains('(')
}

/// Split on `>` at parenthesis depth zero.
pub fn split_top_level(text: &str) -> StimResult<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    StimError::Syntax(format!("unbalanced ')' in '{}'", text.trim()))
                })?;
            }
            '>' if depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(StimError::Syntax(format!(
            "unbalanced '(' in '{}'",
            text.trim()
        )));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn parse_item(raw: &str) -> StimResult<SeriesItem> {
    let item = raw.trim();
    if let Some(body) = item.strip_prefix('(') {
        let close = matching_close(body)
            .ok_or_else(|| StimError::Syntax(format!("unbalanced '(' in '{item}'")))?;
        let inner = &body[..close];
        let suffix = body[close + 1..].trim();
        let caps = REPEAT_SUFFIX.captures(suffix).ok_or_else(|| {
            StimError::Syntax(format!(
                "repetition block '{item}' must be written as (<commands>) * <count>"
            ))
        })?;
        let count: u32 = caps[1]
            .parse()
            .map_err(|_| StimError::Syntax(format!("repeat count too large in '{item}'")))?;
        return Ok(SeriesItem::Repeat(RepetitionBlock {
            inner: CommandSeries::parse(inner)?,
            count,
        }));
    }
    if item.contains('(') || item.contains(')') {
        return Err(StimError::Syntax(format!("misplaced parenthesis in '{item}'")));
    }
    Ok(SeriesItem::Token(item.to_string()))
}

/// Index of the `)` closing an already consumed `(`.
fn matching_close(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
