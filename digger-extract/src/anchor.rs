use std::sync::LazyLock;

use regex::Regex;

use digger_types::FieldSet;

use crate::sweep::strip_literals;
use crate::{is_reserved, FieldExtractor};

/// A line that opens with an identifier followed by a selection, argument list or colon.
static OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*[{(:]").expect("opener pattern")
});

/// A line holding nothing but one identifier (a leaf selection).
static LEAF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\r?$").expect("leaf pattern")
});

/// Line-oriented extraction that only trusts identifiers in structural positions.
///
/// Depends on the client's formatting: minified single-line documents yield
/// little or nothing. The operation name after `query`/`mutation` is not
/// captured, and neither are type names after `:`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralAnchor;

impl FieldExtractor for StructuralAnchor {
    fn extract(&self, text: &str) -> FieldSet {
        let cleaned = strip_literals(text);
        OPENER
            .captures_iter(&cleaned)
            .chain(LEAF.captures_iter(&cleaned))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|word| !is_reserved(word))
            .map(str::to_string)
            .collect()
    }
}
