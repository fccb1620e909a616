use crate::{
    record::{FieldDef, FieldType, RecordType},
    result::{Result, SqlFnError},
};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// A named SQL text with the record type its rows map into
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub sql: String,
    /// Declared from `"returns": ["id:integer", "salary:decimal?"]`; a trailing `?` marks an optional field
    pub returns: Option<RecordType>,
}

/// Runtime settings loaded from JSON
///
/// ```json
/// {
///   "strict_one_or_none": true,
///   "flush_interval_ms": 500,
///   "queries": {
///     "get_user": { "query": "SELECT id, name FROM users WHERE id = @id", "returns": ["id:integer", "name:text"] }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Reject a second row in one-or-none and scalar-or-none shapes
    pub strict_one_or_none: bool,
    /// Period between delta pushes of a multiprocess worker
    pub flush_interval: Duration,
    pub queries: HashMap<String, QuerySpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            strict_one_or_none: false,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            queries: HashMap::new(),
        }
    }
}

fn invalid(what: &str, got: impl std::fmt::Display) -> SqlFnError {
    SqlFnError::new_configuration(format!("expected {what}, got {got}"))
}

impl Settings {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&content)?;
        Self::from_json(json)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        let map = json.as_object().ok_or_else(|| invalid("object", &json))?;
        let mut settings = Settings::default();

        if let Some(strict) = map.get("strict_one_or_none") {
            settings.strict_one_or_none = strict
                .as_bool()
                .ok_or_else(|| invalid("boolean strict_one_or_none", strict))?;
        }

        if let Some(interval) = map.get("flush_interval_ms") {
            let ms = interval
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid("positive integer flush_interval_ms", interval))?;
            settings.flush_interval = Duration::from_millis(ms);
        }

        if let Some(queries) = map.get("queries") {
            let queries = queries
                .as_object()
                .ok_or_else(|| invalid("object of queries", queries))?;
            for (name, value) in queries {
                settings
                    .queries
                    .insert(name.clone(), parse_query(name, value)?);
            }
        }

        Ok(settings)
    }

    pub fn query(&self, name: &str) -> Result<&QuerySpec> {
        self.queries
            .get(name)
            .ok_or_else(|| SqlFnError::new_query_not_found(name))
    }
}

fn parse_query(name: &str, value: &serde_json::Value) -> Result<QuerySpec> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid("object", format!("{name}: {value}")))?;

    let sql = map
        .get("query")
        .and_then(|q| q.as_str())
        .ok_or_else(|| invalid("required 'query' field with string value", format!("{name}: {value}")))?;

    let returns = match map.get("returns") {
        None => None,
        Some(serde_json::Value::Array(items)) => {
            let mut fields = Vec::with_capacity(items.len());
            for item in items {
                let declared = item
                    .as_str()
                    .ok_or_else(|| invalid("'name:type' string", format!("{name}: {item}")))?;
                fields.push(parse_field(declared)?);
            }
            Some(RecordType::new(name, fields))
        }
        Some(other) => return Err(invalid("array of strings", format!("{name}: {other}"))),
    };

    Ok(QuerySpec {
        sql: sql.to_string(),
        returns,
    })
}

fn parse_field(declared: &str) -> Result<FieldDef> {
    let (field, type_name) = declared
        .split_once(':')
        .unwrap_or((declared, "any"));
    let (type_name, required) = match type_name.trim().strip_suffix('?') {
        Some(inner) => (inner, false),
        None => (type_name.trim(), true),
    };
    let field_type: FieldType = type_name.parse()?;
    let field = field.trim();
    if field.is_empty() {
        return Err(invalid("field name", declared));
    }
    Ok(if required {
        FieldDef::required(field, field_type)
    } else {
        FieldDef::optional(field, field_type)
    })
}
