//! Query construction and query-string escaping.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

/// Characters reserved by the query-string syntax, longest first.
const RESERVED: &[&str] = &[
    "&&", "||", "+", "-", "=", "!", "(", ")", "{", "}", "[", "]", "^", "\"", "~", "*", "?",
    ":", "\\", "/",
];

static RESERVED_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = RESERVED
        .iter()
        .map(|s| regex::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("({alternation})")).expect("reserved character regex")
});

/// Make free text safe to embed in a `query_string` query.
///
/// `<` and `>` cannot be escaped and are removed; every other reserved
/// character (or `&&` / `||` pair) is prefixed with a backslash.
pub fn escape(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    RESERVED_RE.replace_all(&stripped, "\\${1}").into_owned()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SearchQuery {
    #[default]
    MatchAll,
    /// Free text, escaped into a `query_string` query.
    Text(String),
    /// A complete request body, passed through untouched.
    Structured(Value),
}

impl SearchQuery {
    /// Blank text becomes [`SearchQuery::MatchAll`].
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            SearchQuery::MatchAll
        } else {
            SearchQuery::Text(text)
        }
    }

    /// Request body with paging applied; explicit paging in a structured
    /// body wins.
    pub fn to_body(&self, size: usize, from: usize) -> Value {
        let mut body = match self {
            SearchQuery::MatchAll => json!({"query": {"match_all": {}}}),
            SearchQuery::Text(text) => json!({"query": {"query_string": {"query": escape(text)}}}),
            SearchQuery::Structured(Value::Object(obj)) => Value::Object(obj.clone()),
            SearchQuery::Structured(other) => json!({"query": other}),
        };
        if let Value::Object(obj) = &mut body {
            set_default(obj, "size", json!(size));
            set_default(obj, "from", json!(from));
        }
        body
    }
}

fn set_default(obj: &mut Map<String, Value>, key: &str, value: Value) {
    obj.entry(key.to_string()).or_insert(value);
}
