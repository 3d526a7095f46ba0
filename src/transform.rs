//! Row transforms applied by `execute`.
//!
//! A transform is any `ResultSet -> ResultSet` function. The built-in one renames column
//! keys between `snake_case` and `camelCase`, optionally descending into JSON values.

use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::results::ResultSet;
use crate::types::Value;

/// Injected post-processing for result sets.
pub type TransformFn = Arc<dyn Fn(ResultSet) -> ResultSet + Send + Sync>;

/// Target naming convention for [`key_case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCase {
    CamelCase,
    SnakeCase,
}

impl KeyCase {
    #[must_use]
    pub fn convert(self, key: &str) -> String {
        match self {
            KeyCase::CamelCase => to_camel_case(key),
            KeyCase::SnakeCase => to_snake_case(key),
        }
    }
}

/// `user_id` → `userId`. Leading underscores are kept.
#[must_use]
pub fn to_camel_case(key: &str) -> String {
    let body = key.trim_start_matches('_');
    let mut out = String::with_capacity(key.len());
    out.push_str(&key[..key.len() - body.len()]);

    let mut upper_next = false;
    for ch in body.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `userId` → `user_id`, `HTTPServer` → `http_server`.
#[must_use]
pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p == '_' => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn convert_json(value: JsonValue, case: KeyCase) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(k, v)| (case.convert(&k), convert_json(v, case)))
                .collect(),
        ),
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(|v| convert_json(v, case)).collect())
        }
        other => other,
    }
}

/// Rename the columns of `result_set`. Unless `shallow`, keys inside JSON values are
/// renamed as well.
#[must_use]
pub fn convert_result_set(result_set: ResultSet, case: KeyCase, shallow: bool) -> ResultSet {
    let Some(columns) = result_set.get_column_names() else {
        return result_set;
    };
    let renamed: Vec<String> = columns.iter().map(|c| case.convert(c)).collect();
    let rows_affected = result_set.rows_affected;

    let mut out = ResultSet::with_capacity(result_set.len());
    out.set_column_names(Arc::new(renamed));
    for row in result_set {
        let values = if shallow {
            row.into_values()
        } else {
            row.into_values()
                .into_iter()
                .map(|value| match value {
                    Value::Json(json) => Value::Json(convert_json(json, case)),
                    other => other,
                })
                .collect()
        };
        out.add_row_values(values);
    }
    out.rows_affected = rows_affected;
    out
}

/// Key-case transform ready to hand to a client.
#[must_use]
pub fn key_case(case: KeyCase, shallow: bool) -> TransformFn {
    Arc::new(move |result_set| convert_result_set(result_set, case, shallow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn case_conversion() {
        assert_eq!(to_camel_case("user_id"), "userId");
        assert_eq!(to_camel_case("_private_field"), "_privateField");
        assert_eq!(to_camel_case("already"), "already");
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("address2Line"), "address2_line");
        assert_eq!(to_snake_case("snake_case"), "snake_case");
    }

    #[test]
    fn renames_columns_and_nested_json() {
        let rs = ResultSet::from_rows(
            ["user_id", "profile_data"],
            vec![vec![
                Value::Int(1),
                Value::Json(json!({ "first_name": "Tim", "pets": [{ "pet_name": "Rex" }] })),
            ]],
        );

        let deep = convert_result_set(rs.clone(), KeyCase::CamelCase, false);
        let row = &deep.results[0];
        assert_eq!(row.get("userId"), Some(&Value::Int(1)));
        assert_eq!(
            row.get("profileData"),
            Some(&Value::Json(
                json!({ "firstName": "Tim", "pets": [{ "petName": "Rex" }] })
            ))
        );
        assert_eq!(deep.rows_affected, 1);

        let shallow = key_case(KeyCase::CamelCase, true)(rs);
        assert_eq!(
            shallow.results[0].get("profileData").and_then(Value::as_json),
            Some(&json!({ "first_name": "Tim", "pets": [{ "pet_name": "Rex" }] }))
        );
    }

    #[test]
    fn results_without_columns_pass_through() {
        let rs = convert_result_set(ResultSet::affected(3), KeyCase::SnakeCase, false);
        assert_eq!(rs.rows_affected, 3);
        assert!(rs.is_empty());
    }
}
