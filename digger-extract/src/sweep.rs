use std::sync::LazyLock;

use regex::Regex;

use digger_types::FieldSet;

use crate::{is_reserved, FieldExtractor};

/// Block strings, quoted strings and `#` comments: text that looks like identifiers but is not.
static LITERALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)""".*?"""|"(?:[^"\\\n]|\\.)*"|#[^\n]*"#).expect("literal pattern")
});

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier pattern"));

/// Replace literals and comments with an empty placeholder so their contents are never harvested.
pub(crate) fn strip_literals(text: &str) -> String {
    LITERALS.replace_all(text, "\"\"").into_owned()
}

/// Keeps every identifier token that is not a reserved word.
///
/// Over-extracts on purpose: argument names, type names (`ID`, `Int`) and enum
/// values all land in the set, but nothing is lost to line layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenSweep;

impl FieldExtractor for TokenSweep {
    fn extract(&self, text: &str) -> FieldSet {
        let cleaned = strip_literals(text);
        IDENT
            .find_iter(&cleaned)
            .map(|m| m.as_str())
            .filter(|word| !is_reserved(word))
            .map(str::to_string)
            .collect()
    }
}
