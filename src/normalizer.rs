//! Turns free-form model replies into canonical plate strings.
//!
//! The default grammar is the Indonesian plate layout: one or two region
//! letters, up to four digits and up to three suffix letters, e.g. `B 1234 XYZ`.
//! A single optional whitespace character may separate the groups in the raw
//! reply. The canonical form is upper-case with no whitespace, e.g. `B1234XYZ`.

use anyhow::Context;
use regex::Regex;
use std::sync::LazyLock;

/// Plate grammar used when no other pattern is configured.
pub const DEFAULT_PLATE_PATTERN: &str = r"(?i-u)[A-Z]{1,2}\s?[0-9]{1,4}\s?[A-Z]{1,3}";

static DEFAULT_NORMALIZER: LazyLock<Normalizer> = LazyLock::new(Normalizer::default);

#[derive(Debug, Clone)]
pub struct Normalizer {
    plate_regex: Regex,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            plate_regex: Regex::new(DEFAULT_PLATE_PATTERN)
                .unwrap_or_else(|e| unreachable!("default plate pattern is valid: {e}")),
        }
    }
}

impl Normalizer {
    /// Builds a normalizer for a custom plate grammar.
    pub fn with_pattern(pattern: &str) -> anyhow::Result<Self> {
        let plate_regex = Regex::new(pattern)
            .with_context(|| format!("Invalid plate pattern: {pattern}"))?;
        Ok(Self { plate_regex })
    }

    pub fn pattern(&self) -> &str {
        self.plate_regex.as_str()
    }

    /// Returns the first plate-like token in `raw`, canonicalized, or `None`
    /// if nothing in the reply matches the grammar.
    ///
    /// An unparseable reply never falls back to the raw text, it scores as a
    /// total miss.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let stripped = strip_quotes_and_whitespace(raw);
        let found = self.plate_regex.find(stripped)?;
        Some(
            found
                .as_str()
                .chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_uppercase)
                .collect(),
        )
    }
}

/// Normalizes `raw` with the default plate grammar.
pub fn normalize(raw: &str) -> Option<String> {
    DEFAULT_NORMALIZER.normalize(raw)
}

fn strip_quotes_and_whitespace(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
}
