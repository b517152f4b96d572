use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of resolving a dotted attribute path against an entity document.
///
/// Paths use `.` (or `/`) between object keys and `[n]` for array indexes,
/// e.g. `payload.items[0].sku`. On failure the resolver reports the fields
/// that were actually available at the point of divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPathResolver {
    pub gts_id: String,
    pub content: Value,
    pub path: String,
    pub value: Option<Value>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_fields: Option<Vec<String>>,
}

enum Step {
    Key(String),
    Index(String),
}

impl JsonPathResolver {
    #[must_use]
    pub fn new(gts_id: String, content: Value) -> Self {
        JsonPathResolver {
            gts_id,
            content,
            path: String::new(),
            value: None,
            resolved: false,
            error: None,
            available_fields: None,
        }
    }

    /// Tokenize one dot-separated part into a key and its bracket indexes
    /// (`items[0][1]` -> key `items`, indexes `[0]`, `[1]`).
    fn tokenize_part(part: &str) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut rest = part;

        while !rest.is_empty() {
            if let Some(open) = rest.find('[') {
                if open > 0 {
                    steps.push(Step::Key(rest[..open].to_owned()));
                }
                match rest[open..].find(']') {
                    Some(close) => {
                        steps.push(Step::Index(rest[open + 1..open + close].to_owned()));
                        rest = &rest[open + close + 1..];
                    }
                    None => {
                        // Unclosed bracket: treat the remainder literally.
                        steps.push(Step::Key(rest[open..].to_owned()));
                        rest = "";
                    }
                }
            } else {
                steps.push(Step::Key(rest.to_owned()));
                rest = "";
            }
        }

        steps
    }

    fn tokenize(path: &str) -> Vec<Step> {
        path.replace('/', ".")
            .split('.')
            .filter(|p| !p.is_empty())
            .flat_map(Self::tokenize_part)
            .collect()
    }

    fn field_inventory(node: &Value, prefix: &str, out: &mut Vec<String>) {
        match node {
            Value::Object(map) => {
                for (key, value) in map {
                    let here = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    out.push(here.clone());
                    Self::field_inventory(value, &here, out);
                }
            }
            Value::Array(items) => {
                for (i, value) in items.iter().enumerate() {
                    let here = if prefix.is_empty() {
                        format!("[{i}]")
                    } else {
                        format!("{prefix}[{i}]")
                    };
                    out.push(here.clone());
                    Self::field_inventory(value, &here, out);
                }
            }
            _ => {}
        }
    }

    fn fail_at(mut self, cursor: &Value, message: String) -> Self {
        let mut fields = Vec::new();
        Self::field_inventory(cursor, "", &mut fields);
        self.error = Some(message);
        self.available_fields = Some(fields);
        self
    }

    /// Walk the path through the document.
    #[must_use]
    pub fn resolve(mut self, path: &str) -> Self {
        path.clone_into(&mut self.path);
        self.value = None;
        self.resolved = false;
        self.error = None;
        self.available_fields = None;

        let mut cursor = self.content.clone();

        for step in Self::tokenize(path) {
            match (&step, &cursor) {
                (Step::Index(text) | Step::Key(text), Value::Array(items)) => {
                    let Ok(index) = text.parse::<usize>() else {
                        return self.fail_at(&cursor, format!("Expected list index at segment '{text}'"));
                    };
                    let Some(next) = items.get(index) else {
                        return self.fail_at(&cursor, format!("Index out of range at segment '{text}'"));
                    };
                    cursor = next.clone();
                }
                (Step::Key(key), Value::Object(map)) => {
                    let Some(next) = map.get(key) else {
                        return self.fail_at(
                            &cursor,
                            format!("Path not found at segment '{key}' in '{path}', see available fields"),
                        );
                    };
                    cursor = next.clone();
                }
                (Step::Index(index), Value::Object(_)) => {
                    return self.fail_at(
                        &cursor,
                        format!("Path not found at segment '[{index}]' in '{path}', see available fields"),
                    );
                }
                (Step::Key(text) | Step::Index(text), _) => {
                    self.error = Some(format!("Cannot descend into a scalar at segment '{text}'"));
                    self.available_fields = Some(Vec::new());
                    return self;
                }
            }
        }

        self.value = Some(cursor);
        self.resolved = true;
        self
    }

    /// Produce a failed result without walking anything.
    #[must_use]
    pub fn failure(mut self, path: &str, error: &str) -> Self {
        path.clone_into(&mut self.path);
        self.value = None;
        self.resolved = false;
        self.error = Some(error.to_owned());
        self.available_fields = Some(Vec::new());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(content: Value) -> JsonPathResolver {
        JsonPathResolver::new("gts.test.a.b.c.v1~".to_owned(), content)
    }

    #[test]
    fn test_simple_key() {
        let result = resolver(json!({"field": "value"})).resolve("field");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("value")));
    }

    #[test]
    fn test_nested_keys() {
        let result = resolver(json!({"outer": {"inner": "value"}})).resolve("outer.inner");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("value")));
    }

    #[test]
    fn test_slash_separator() {
        let result = resolver(json!({"outer": {"inner": "value"}})).resolve("outer/inner");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("value")));
    }

    #[test]
    fn test_array_index_attached() {
        let result = resolver(json!({"items": [1, 2, 3]})).resolve("items[1]");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(2)));
    }

    #[test]
    fn test_array_index_dotted() {
        let result = resolver(json!({"items": [1, 2, 3]})).resolve("items.[2]");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(3)));
    }

    #[test]
    fn test_array_of_arrays() {
        let result = resolver(json!({"matrix": [[1, 2], [3, 4]]})).resolve("matrix[1][0]");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(3)));
    }

    #[test]
    fn test_array_then_key() {
        let content = json!({"data": [{"name": "first"}, {"name": "second"}]});
        let result = resolver(content).resolve("data[1].name");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("second")));
    }

    #[test]
    fn test_missing_key_lists_available_fields() {
        let result = resolver(json!({"field1": 1, "field2": 2})).resolve("nope");
        assert!(!result.resolved);
        let fields = result.available_fields.unwrap();
        assert!(fields.contains(&"field1".to_owned()));
        assert!(fields.contains(&"field2".to_owned()));
    }

    #[test]
    fn test_available_fields_are_nested() {
        let result = resolver(json!({"a": {"b": {"c": 1}}, "x": [1, {"y": 2}]})).resolve("nope");
        let fields = result.available_fields.unwrap();
        assert!(fields.contains(&"a.b.c".to_owned()));
        assert!(fields.contains(&"x[1].y".to_owned()));
    }

    #[test]
    fn test_index_out_of_range() {
        let result = resolver(json!({"items": [1]})).resolve("items[5]");
        assert!(!result.resolved);
        assert!(result.error.unwrap().contains("out of range"));
    }

    #[test]
    fn test_non_numeric_index() {
        let result = resolver(json!({"items": [1]})).resolve("items[x]");
        assert!(!result.resolved);
        assert!(result.error.unwrap().contains("Expected list index"));
    }

    #[test]
    fn test_bracket_on_object() {
        let result = resolver(json!({"obj": {"k": 1}})).resolve("obj[0]");
        assert!(!result.resolved);
        assert!(result.error.unwrap().contains("Path not found"));
    }

    #[test]
    fn test_descend_into_scalar() {
        let result = resolver(json!({"field": "value"})).resolve("field.nested");
        assert!(!result.resolved);
        assert!(result.error.unwrap().contains("Cannot descend"));
    }

    #[test]
    fn test_empty_path_is_whole_document() {
        let content = json!({"field": "value"});
        let result = resolver(content.clone()).resolve("");
        assert!(result.resolved);
        assert_eq!(result.value, Some(content));
    }

    #[test]
    fn test_failure_constructor() {
        let result = resolver(json!({})).failure("some.path", "boom");
        assert!(!result.resolved);
        assert_eq!(result.path, "some.path");
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.available_fields, Some(Vec::new()));
    }

    #[test]
    fn test_numeric_key_on_array_without_brackets() {
        let result = resolver(json!({"items": ["a", "b"]})).resolve("items.1");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("b")));
    }
}
