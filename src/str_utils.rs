//! Placeholder handling for SQL text carrying `@name` parameters

use crate::{
    result::{Result, SqlFnError},
    value::SqlValue,
};
use regex::Regex;

static PARAMETER_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

/// Check if a byte position in SQL is inside single or double quotes
///
/// SQL escapes a quote by doubling it, which toggles twice here; a backslash
/// is an ordinary character.
pub fn is_in_quotes(sql: &str, pos: usize) -> bool {
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for (idx, ch) in sql.char_indices() {
        if idx >= pos {
            break;
        }

        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            _ => {}
        }
    }

    in_single_quote || in_double_quote
}

/// `@name` placeholders outside quotes with their byte range, in order of appearance
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, &str)> {
    PARAMETER_REGEX
        .captures_iter(sql)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let name = cap.get(1)?;
            (!is_in_quotes(sql, whole.start())).then(|| (whole.range(), name.as_str()))
        })
        .collect()
}

/// Unique parameter names used by a statement, in order of first appearance
pub fn extract_parameters(sql: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (_, name) in placeholders(sql) {
        if seen.insert(name) {
            params.push(name.to_string());
        }
    }
    params
}

/// Value bound to `name`, accepting keys with or without a leading `@`
pub fn lookup<'a>(params: &'a [(String, SqlValue)], name: &str) -> Result<&'a SqlValue> {
    params
        .iter()
        .find(|(key, _)| key.trim_start_matches('@') == name)
        .map(|(_, value)| value)
        .ok_or_else(|| SqlFnError::new_parameter_not_provided(name))
}

/// Rewrite `@name` placeholders into numbered `$n` ones
///
/// A name used twice keeps one number. Returns the new SQL and the values in
/// placeholder-number order.
pub fn rewrite_to_numbered(sql: &str, params: &[(String, SqlValue)]) -> Result<(String, Vec<SqlValue>)> {
    let mut numbered: Vec<&str> = Vec::new();
    let mut values = Vec::new();
    let mut rewritten = String::with_capacity(sql.len());
    let mut last = 0;

    for (range, name) in placeholders(sql) {
        let number = match numbered.iter().position(|n| *n == name) {
            Some(idx) => idx + 1,
            None => {
                values.push(lookup(params, name)?.clone());
                numbered.push(name);
                numbered.len()
            }
        };
        rewritten.push_str(&sql[last..range.start]);
        rewritten.push('$');
        rewritten.push_str(&number.to_string());
        last = range.end;
    }
    rewritten.push_str(&sql[last..]);

    Ok((rewritten, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, i64)]) -> Vec<(String, SqlValue)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SqlValue::Integer(*v)))
            .collect()
    }

    #[test]
    fn test_is_in_quotes() {
        let sql = "SELECT '@skip', \"@also\" FROM t WHERE id = @id";
        assert!(is_in_quotes(sql, sql.find("@skip").unwrap()));
        assert!(is_in_quotes(sql, sql.find("@also").unwrap()));
        assert!(!is_in_quotes(sql, sql.find("@id").unwrap()));
    }

    #[test]
    fn test_is_in_quotes_after_multibyte_text() {
        let sql = "SELECT 'héllo' AS greeting WHERE id = @id";
        assert!(!is_in_quotes(sql, sql.find("@id").unwrap()));
    }

    #[test]
    fn test_backslash_does_not_escape_a_quote() {
        let sql = r"SELECT 'C:\' AS p, @id AS v";
        assert!(!is_in_quotes(sql, sql.find("@id").unwrap()));
        assert_eq!(extract_parameters(sql), vec!["id"]);
    }

    #[test]
    fn test_doubled_quote_stays_inside_literal() {
        let sql = "SELECT 'it''s @not' , @id";
        assert!(is_in_quotes(sql, sql.find("@not").unwrap()));
        assert!(!is_in_quotes(sql, sql.find("@id").unwrap()));
    }

    #[test]
    fn test_extract_parameters_unique_in_order() {
        let sql = "SELECT * FROM t WHERE a = @a OR b = @b OR c = @a AND d = '@d'";
        assert_eq!(extract_parameters(sql), vec!["a", "b"]);
    }

    #[test]
    fn test_rewrite_to_numbered_reuses_numbers() {
        let (sql, values) = rewrite_to_numbered(
            "SELECT * FROM t WHERE a = @a OR b = @b OR c = @a",
            &named(&[("b", 2), ("a", 1)]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 OR b = $2 OR c = $1");
        assert_eq!(values, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);
    }

    #[test]
    fn test_rewrite_after_backslash_literal() {
        let (sql, values) =
            rewrite_to_numbered(r"SELECT 'C:\' AS p, @id AS v", &named(&[("id", 42)])).unwrap();
        assert_eq!(sql, r"SELECT 'C:\' AS p, $1 AS v");
        assert_eq!(values, vec![SqlValue::Integer(42)]);
    }

    #[test]
    fn test_rewrite_missing_parameter() {
        let err = rewrite_to_numbered("SELECT @id", &[]).unwrap_err();
        assert!(matches!(err, SqlFnError::ParameterNotProvided(ref name) if name == "id"));
        assert_eq!(err.error_kind(), "ProgrammingError");
    }

    #[test]
    fn test_lookup_accepts_prefixed_keys() {
        let params = named(&[("@id", 3)]);
        assert_eq!(lookup(&params, "id").unwrap(), &SqlValue::Integer(3));
    }
}
