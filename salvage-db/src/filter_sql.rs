//! Compilation of [`Filter`] trees to SQL `WHERE` fragments.
//!
//! Intrinsic attributes map to entity columns; every other attribute is
//! read from the JSON `attrs` column with `json_extract`. Placeholders are
//! anonymous and appended to `params` in text order.

use rusqlite::types::Value as SqlValue;
use salvage_core::{Filter, INTRINSIC_ATTRS, Ranking};
use serde_json::Value;

/// SQL expression reading `attr` from an entity row.
pub fn attr_expr(attr: &str, params: &mut Vec<SqlValue>) -> String {
    if INTRINSIC_ATTRS.contains(&attr) {
        attr.to_string()
    } else {
        params.push(SqlValue::Text(json_path(attr)));
        "json_extract(attrs, ?)".to_string()
    }
}

fn json_path(attr: &str) -> String {
    format!("$.\"{}\"", attr.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Convert a JSON value to the SQL value `json_extract` would produce.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Compile a filter to a boolean SQL expression.
pub fn compile(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    match filter {
        Filter::All => "1".to_string(),
        Filter::KindIn(kinds) => {
            if kinds.is_empty() {
                return "0".to_string();
            }
            params.extend(kinds.iter().map(|k| SqlValue::Text(k.clone())));
            format!("kind IN ({})", placeholders(kinds.len()))
        }
        Filter::IdIn(ids) => {
            if ids.is_empty() {
                return "0".to_string();
            }
            params.extend(ids.iter().map(|id| SqlValue::Integer(*id)));
            format!("id IN ({})", placeholders(ids.len()))
        }
        Filter::Eq { attr, value } => {
            let expr = attr_expr(attr, params);
            if value.is_null() {
                format!("{} IS NULL", expr)
            } else {
                params.push(to_sql_value(value));
                format!("{} = ?", expr)
            }
        }
        Filter::IEq { attr, value } => {
            let expr = attr_expr(attr, params);
            params.push(SqlValue::Text(value.to_lowercase()));
            format!("casefold({}) = ?", expr)
        }
        Filter::Regex { attr, pattern } => {
            params.push(SqlValue::Text(pattern.clone()));
            let expr = attr_expr(attr, params);
            format!("regexp(?, {})", expr)
        }
        Filter::IEndsWith { attr, suffix } => {
            let expr = attr_expr(attr, params);
            params.push(SqlValue::Text(format!("%{}", escape_like(&suffix.to_lowercase()))));
            format!("casefold({}) LIKE ? ESCAPE '\\'", expr)
        }
        Filter::IContains { attr, needle } => {
            let expr = attr_expr(attr, params);
            params.push(SqlValue::Text(format!("%{}%", escape_like(&needle.to_lowercase()))));
            format!("casefold({}) LIKE ? ESCAPE '\\'", expr)
        }
        Filter::And(filters) => join(filters, " AND ", "1", params),
        Filter::Or(filters) => join(filters, " OR ", "0", params),
    }
}

fn join(filters: &[Filter], op: &str, empty: &str, params: &mut Vec<SqlValue>) -> String {
    if filters.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = filters.iter().map(|f| compile(f, params)).collect();
    format!("({})", parts.join(op))
}

/// A `CASE` expression evaluating to the index of the first matching tier.
pub fn compile_ranking(ranking: &Ranking, params: &mut Vec<SqlValue>) -> String {
    if ranking.tiers.is_empty() {
        return "0".to_string();
    }
    let mut sql = String::from("CASE");
    for (i, tier) in ranking.tiers.iter().enumerate() {
        let cond = compile(tier, params);
        sql.push_str(&format!(" WHEN {} THEN {}", cond, i));
    }
    sql.push_str(&format!(" ELSE {} END", ranking.default_rank()));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_attrs_use_columns() {
        let mut params = Vec::new();
        let sql = compile(&Filter::eq("slug", "about"), &mut params);
        assert_eq!(sql, "slug = ?");
        assert_eq!(params, vec![SqlValue::Text("about".into())]);
    }

    #[test]
    fn custom_attrs_use_json_extract() {
        let mut params = Vec::new();
        let sql = compile(&Filter::eq("legacy_id", 6), &mut params);
        assert_eq!(sql, "json_extract(attrs, ?) = ?");
        assert_eq!(
            params,
            vec![SqlValue::Text("$.\"legacy_id\"".into()), SqlValue::Integer(6)]
        );
    }

    #[test]
    fn regex_pattern_precedes_expression_params() {
        let mut params = Vec::new();
        let sql = compile(&Filter::regex("file", "^a"), &mut params);
        assert_eq!(sql, "regexp(?, json_extract(attrs, ?))");
        assert_eq!(params[0], SqlValue::Text("^a".into()));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        let mut params = Vec::new();
        compile(&Filter::icontains("file", "50%_off"), &mut params);
        assert_eq!(params[1], SqlValue::Text("%50\\%\\_off%".into()));
    }

    #[test]
    fn empty_or_matches_nothing() {
        let mut params = Vec::new();
        assert_eq!(compile(&Filter::Or(vec![]), &mut params), "0");
    }
}
