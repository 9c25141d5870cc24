use serde::Serialize;
use serde_json::Value;

/// Paging echoed back with every result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub size: usize,
    pub page: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub index: String,
    pub id: String,
    pub score: Option<f64>,
    pub source: Value,
}

impl Hit {
    fn from_raw(raw: &Value) -> Self {
        Self {
            index: str_field(raw, "_index"),
            id: str_field(raw, "_id"),
            score: raw.get("_score").and_then(Value::as_f64),
            source: raw.get("_source").cloned().unwrap_or(Value::Null),
        }
    }
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub pagination: Pagination,
    pub took: Option<u64>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<Value>,
    pub total: u64,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

impl ResultEnvelope {
    /// Wrap a raw search response.
    ///
    /// `hits.total` may be a bare number or a `{"value": n}` object depending
    /// on the cluster version; both are accepted.
    pub fn from_response(pagination: Pagination, response: &Value) -> Self {
        let hits = response.get("hits");
        let total = hits
            .and_then(|h| h.get("total"))
            .and_then(|t| t.as_u64().or_else(|| t.get("value").and_then(Value::as_u64)))
            .unwrap_or(0);
        Self {
            pagination,
            took: response.get("took").and_then(Value::as_u64),
            timed_out: response
                .get("timed_out")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            shards: response.get("_shards").cloned(),
            total,
            max_score: hits
                .and_then(|h| h.get("max_score"))
                .and_then(Value::as_f64),
            hits: hits
                .and_then(|h| h.get("hits"))
                .and_then(Value::as_array)
                .map(|raw| raw.iter().map(Hit::from_raw).collect())
                .unwrap_or_default(),
        }
    }
}
