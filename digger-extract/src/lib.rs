//! Heuristic field extraction from untyped query-language text.
//!
//! Neither strategy is a parser. Both tolerate partial or malformed input and
//! return whatever identifiers they can find; an empty set is a valid result.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use digger_types::FieldSet;

pub mod anchor;
pub use anchor::StructuralAnchor;

pub mod sweep;
pub use sweep::TokenSweep;

/// Reserved words of the query language, never reported as fields.
pub const RESERVED_WORDS: [&str; 16] = [
    "query",
    "mutation",
    "subscription",
    "fragment",
    "on",
    "true",
    "false",
    "null",
    "schema",
    "type",
    "interface",
    "union",
    "enum",
    "scalar",
    "input",
    "extend",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Pulls the set of referenced identifiers out of operation text.
///
/// Implementations must be pure: the same text always yields the same set.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, text: &str) -> FieldSet;
}

/// Which extractor to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Every identifier token outside string literals. High recall.
    #[default]
    TokenSweep,
    /// Only identifiers that open a line and precede `{`, `(` or `:`. Stricter.
    StructuralAnchor,
}

impl ExtractionStrategy {
    pub const fn name(self) -> &'static str {
        match self {
            ExtractionStrategy::TokenSweep => "token_sweep",
            ExtractionStrategy::StructuralAnchor => "structural_anchor",
        }
    }
}

impl FieldExtractor for ExtractionStrategy {
    fn extract(&self, text: &str) -> FieldSet {
        match self {
            ExtractionStrategy::TokenSweep => TokenSweep.extract(text),
            ExtractionStrategy::StructuralAnchor => StructuralAnchor.extract(text),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown extraction strategy `{0}` (expected token_sweep or structural_anchor)")]
pub struct UnknownStrategy(pub String);

impl FromStr for ExtractionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "token_sweep" | "sweep" => Ok(ExtractionStrategy::TokenSweep),
            "structural_anchor" | "anchor" => Ok(ExtractionStrategy::StructuralAnchor),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Extract with an explicit strategy.
pub fn extract_fields(text: &str, strategy: ExtractionStrategy) -> FieldSet {
    strategy.extract(text)
}
