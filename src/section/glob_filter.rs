//! Compiled glob predicates over relative paths.

use std::fmt;
use std::path::{Component, Path};

use glob::{MatchOptions, Pattern, PatternError};

/// Matching options shared by excludes and plugin globs.
///
/// `*` is allowed to cross directory separators, so `*.json` selects JSON
/// files at any depth below the directory it is matched against.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled glob pattern together with its source text.
///
/// Besides the `glob` crate syntax, `{a,b}` alternatives are expanded and a
/// `**` that is not a whole path component (as in `**.png`) behaves like `*`.
#[derive(Clone, PartialEq, Eq)]
pub struct GlobFilter {
    source: String,
    patterns: Vec<Pattern>,
}

impl GlobFilter {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let patterns = expand_braces(pattern)
            .iter()
            .map(|p| Pattern::new(&collapse_recursive(p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { source: pattern.to_owned(), patterns })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a path relative to the directory the filter is anchored at.
    pub fn matches(&self, relative: &Path) -> bool {
        let path = slash_path(relative);
        self.patterns.iter().any(|p| p.matches_with(&path, MATCH_OPTIONS))
    }
}

/// Expand the first `{...}` group, recursively. Unbalanced braces are left
/// as literal text.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_owned()];
    };
    let mut depth = 0usize;
    let mut bounds = vec![open];
    let mut close = None;
    for (offset, c) in pattern[open..].char_indices() {
        let at = open + offset;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(at);
                    break;
                }
            }
            ',' if depth == 1 => bounds.push(at),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_owned()];
    };
    bounds.push(close);

    let (head, tail) = (&pattern[..open], &pattern[close + 1..]);
    bounds
        .windows(2)
        .flat_map(|w| expand_braces(&format!("{head}{}{tail}", &pattern[w[0] + 1..w[1]])))
        .collect()
}

fn collapse_recursive(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|part| {
            let mut part = part.to_owned();
            if part != "**" {
                while part.contains("**") {
                    part = part.replace("**", "*");
                }
            }
            part
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Debug for GlobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobFilter").field(&self.as_str()).finish()
    }
}

impl fmt::Display for GlobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether any filter in `filters` matches `relative`.
pub fn any_matches(filters: &[GlobFilter], relative: &Path) -> bool {
    filters.iter().any(|f| f.matches(relative))
}

/// Render a relative path with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&part.to_string_lossy());
    }
    out
}
