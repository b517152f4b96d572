//! `x-gts-ref` evaluation.
//!
//! The `x-gts-ref` extension constrains string values to be GTS identifiers
//! matching a declared target. Two value forms exist:
//!
//! - **JSON Pointer** (`/$id`, `/properties/id`, ...): resolved against the
//!   schema document that carries the `x-gts-ref`; the resolved value is the
//!   required prefix for the instance string.
//! - **GTS id / prefix** (`gts.x.core.events.topic.v1~`, `gts.x.core.*`):
//!   the instance string must be a valid GTS id starting with the prefix,
//!   and (when a registry lookup is supplied) must resolve in the store.
//!
//! Inside `oneOf`/`anyOf`/`allOf` the checks follow the combinator:
//! exactly-one / at-least-one / all ref-bearing branches must be satisfied.

use serde_json::Value;
use std::fmt;

use crate::id::{GtsID, GtsWildcard};

/// A single `x-gts-ref` violation.
#[derive(Debug, Clone)]
pub struct XGtsRefViolation {
    pub field_path: String,
    pub value: String,
    pub ref_pattern: String,
    pub reason: String,
}

impl XGtsRefViolation {
    fn new(field_path: &str, value: &str, ref_pattern: &str, reason: String) -> Self {
        Self {
            field_path: field_path.to_owned(),
            value: value.to_owned(),
            ref_pattern: ref_pattern.to_owned(),
            reason,
        }
    }
}

impl fmt::Display for XGtsRefViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x-gts-ref validation failed for field '{}': {}",
            self.field_path, self.reason
        )
    }
}

/// Registry presence check for prefix-mode targets.
pub type RefLookup<'a> = &'a dyn Fn(&str) -> bool;

/// Walks schemas and instances evaluating `x-gts-ref` constraints.
#[derive(Default)]
pub struct XGtsRefValidator;

impl XGtsRefValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate every `x-gts-ref` declaration inside a schema document:
    /// pointers must resolve within the document, GTS patterns must parse.
    #[must_use]
    pub fn validate_schema(&self, schema: &Value, root: Option<&Value>) -> Vec<XGtsRefViolation> {
        let root = root.unwrap_or(schema);
        let mut violations = Vec::new();
        self.walk_schema(schema, "", root, &mut violations);
        violations
    }

    /// Validate an instance document against the `x-gts-ref` sites of its
    /// (effective) schema. `lookup` checks prefix-mode targets for presence
    /// in the registry.
    #[must_use]
    pub fn validate_instance(
        &self,
        instance: &Value,
        schema: &Value,
        path: &str,
        lookup: Option<RefLookup<'_>>,
    ) -> Vec<XGtsRefViolation> {
        let mut violations = Vec::new();
        self.walk_instance(instance, schema, schema, path, lookup, &mut violations);
        violations
    }

    fn walk_instance(
        &self,
        inst: &Value,
        schema: &Value,
        root: &Value,
        path: &str,
        lookup: Option<RefLookup<'_>>,
        out: &mut Vec<XGtsRefViolation>,
    ) {
        let Some(obj) = schema.as_object() else {
            return;
        };

        if let Some(ref_pattern) = obj.get("x-gts-ref").and_then(Value::as_str)
            && let Some(text) = inst.as_str()
            && let Some(violation) = self.check_value(text, ref_pattern, path, root, lookup)
        {
            out.push(violation);
        }

        for keyword in ["oneOf", "anyOf", "allOf"] {
            if let Some(Value::Array(branches)) = obj.get(keyword) {
                self.check_combinator(keyword, branches, inst, root, path, lookup, out);
            }
        }

        match obj.get("type").and_then(Value::as_str) {
            Some("object") => {
                if let (Some(props), Some(inst_obj)) = (
                    obj.get("properties").and_then(Value::as_object),
                    inst.as_object(),
                ) {
                    for (name, prop_schema) in props {
                        if let Some(value) = inst_obj.get(name) {
                            let prop_path = if path.is_empty() {
                                name.clone()
                            } else {
                                format!("{path}.{name}")
                            };
                            self.walk_instance(value, prop_schema, root, &prop_path, lookup, out);
                        }
                    }
                }
            }
            Some("array") => {
                if let (Some(items), Some(inst_arr)) = (obj.get("items"), inst.as_array()) {
                    for (idx, item) in inst_arr.iter().enumerate() {
                        self.walk_instance(item, items, root, &format!("{path}[{idx}]"), lookup, out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Combinator semantics over the ref dimension only: branches without
    /// any `x-gts-ref` site are neutral and do not participate.
    #[allow(clippy::too_many_arguments)]
    fn check_combinator(
        &self,
        keyword: &str,
        branches: &[Value],
        inst: &Value,
        root: &Value,
        path: &str,
        lookup: Option<RefLookup<'_>>,
        out: &mut Vec<XGtsRefViolation>,
    ) {
        let mut bearing = 0usize;
        let mut passing = 0usize;
        let mut first_failure: Vec<XGtsRefViolation> = Vec::new();

        for branch in branches {
            if !contains_ref_site(branch) {
                continue;
            }
            bearing += 1;
            let mut branch_violations = Vec::new();
            self.walk_instance(inst, branch, root, path, lookup, &mut branch_violations);
            if branch_violations.is_empty() {
                passing += 1;
            } else if first_failure.is_empty() {
                first_failure = branch_violations;
            }
        }

        if bearing == 0 {
            return;
        }

        match keyword {
            "allOf" => {
                if passing < bearing {
                    out.extend(first_failure);
                }
            }
            "anyOf" => {
                if passing == 0 {
                    out.extend(first_failure);
                }
            }
            _ => {
                // oneOf
                if passing == 0 {
                    out.extend(first_failure);
                } else if passing > 1 {
                    out.push(XGtsRefViolation::new(
                        path,
                        "",
                        "",
                        format!("{passing} oneOf branches satisfied their x-gts-ref, expected exactly one"),
                    ));
                }
            }
        }
    }

    fn walk_schema(
        &self,
        schema: &Value,
        path: &str,
        root: &Value,
        out: &mut Vec<XGtsRefViolation>,
    ) {
        let Some(obj) = schema.as_object() else {
            return;
        };

        if let Some(ref_value) = obj.get("x-gts-ref") {
            let ref_path = if path.is_empty() {
                "x-gts-ref".to_owned()
            } else {
                format!("{path}/x-gts-ref")
            };
            match ref_value.as_str() {
                Some(pattern) => {
                    if let Some(violation) = self.check_declaration(pattern, &ref_path, root) {
                        out.push(violation);
                    }
                }
                None => out.push(XGtsRefViolation::new(
                    &ref_path,
                    &ref_value.to_string(),
                    "",
                    format!("x-gts-ref value must be a string, got {ref_value}"),
                )),
            }
        }

        for (key, value) in obj {
            if key == "x-gts-ref" {
                continue;
            }
            let nested = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}/{key}")
            };
            match value {
                Value::Object(_) => self.walk_schema(value, &nested, root, out),
                Value::Array(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        if item.is_object() {
                            self.walk_schema(item, &format!("{nested}[{idx}]"), root, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Check a declared pattern for well-formedness.
    fn check_declaration(
        &self,
        pattern: &str,
        path: &str,
        root: &Value,
    ) -> Option<XGtsRefViolation> {
        if let Some(pointer) = pattern.strip_prefix('/') {
            return match resolve_pointer(root, pointer) {
                Some(resolved) if GtsID::is_valid(&resolved) => None,
                Some(resolved) => Some(XGtsRefViolation::new(
                    path,
                    pattern,
                    pattern,
                    format!("Resolved reference '{pattern}' -> '{resolved}' is not a valid GTS identifier"),
                )),
                None => Some(XGtsRefViolation::new(
                    path,
                    pattern,
                    pattern,
                    format!("Cannot resolve reference path '{pattern}'"),
                )),
            };
        }

        if !pattern.starts_with("gts.") {
            return Some(XGtsRefViolation::new(
                path,
                pattern,
                pattern,
                format!("Invalid x-gts-ref value: '{pattern}' must start with 'gts.' or '/'"),
            ));
        }

        if pattern.contains('*') {
            return match GtsWildcard::new(pattern) {
                Ok(_) => None,
                Err(e) => Some(XGtsRefViolation::new(
                    path,
                    pattern,
                    pattern,
                    format!("Invalid GTS wildcard pattern: {e}"),
                )),
            };
        }

        if GtsID::is_valid(pattern) {
            None
        } else {
            Some(XGtsRefViolation::new(
                path,
                pattern,
                pattern,
                format!("Invalid GTS identifier: {pattern}"),
            ))
        }
    }

    /// Check an instance string against a declared pattern.
    fn check_value(
        &self,
        value: &str,
        ref_pattern: &str,
        path: &str,
        root: &Value,
        lookup: Option<RefLookup<'_>>,
    ) -> Option<XGtsRefViolation> {
        let (resolved, pointer_mode) = if ref_pattern.starts_with('/') {
            match resolve_pointer(root, &ref_pattern[1..]) {
                Some(resolved) if resolved.starts_with("gts.") => (resolved, true),
                Some(resolved) => {
                    return Some(XGtsRefViolation::new(
                        path,
                        value,
                        ref_pattern,
                        format!(
                            "Resolved reference '{ref_pattern}' -> '{resolved}' is not a GTS pattern"
                        ),
                    ));
                }
                None => {
                    return Some(XGtsRefViolation::new(
                        path,
                        value,
                        ref_pattern,
                        format!("Cannot resolve reference path '{ref_pattern}'"),
                    ));
                }
            }
        } else {
            (ref_pattern.to_owned(), false)
        };

        let Ok(candidate) = GtsID::new(value) else {
            return Some(XGtsRefViolation::new(
                path,
                value,
                ref_pattern,
                format!("Value '{value}' is not a valid GTS identifier"),
            ));
        };

        let prefix_ok = if resolved == "gts.*" {
            true
        } else if let Some(prefix) = resolved.strip_suffix('*') {
            value.starts_with(prefix)
        } else if pointer_mode {
            // Pointer targets compare literally: the resolved value itself
            // or a chain extension of it.
            value.starts_with(resolved.as_str())
        } else {
            // A declared GTS prefix behaves as the pattern `<prefix>*`: the
            // value must extend the chain, the bare type id is not a
            // reference to one of its entities.
            GtsWildcard::new(&format!("{resolved}*"))
                .is_ok_and(|pattern| candidate.wildcard_match(&pattern))
        };

        if !prefix_ok {
            return Some(XGtsRefViolation::new(
                path,
                value,
                ref_pattern,
                format!("Value '{value}' does not match pattern '{resolved}'"),
            ));
        }

        // Prefix-mode targets must exist in the registry; pointer-mode refs
        // constrain the shape only.
        if !pointer_mode
            && !resolved.contains('*')
            && let Some(exists) = lookup
            && !exists(value)
        {
            return Some(XGtsRefViolation::new(
                path,
                value,
                ref_pattern,
                format!("Referenced entity '{value}' is not registered"),
            ));
        }

        None
    }
}

/// True when a schema subtree contains at least one `x-gts-ref` key.
fn contains_ref_site(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => {
            map.contains_key("x-gts-ref") || map.values().any(contains_ref_site)
        }
        Value::Array(items) => items.iter().any(contains_ref_site),
        _ => false,
    }
}

/// Resolve a slash-separated pointer inside the schema document. When the
/// target is itself an `x-gts-ref`-carrying object, chase the reference.
fn resolve_pointer(schema: &Value, pointer: &str) -> Option<String> {
    if pointer.is_empty() {
        return None;
    }

    let mut current = schema;
    for part in pointer.split('/') {
        current = current.as_object()?.get(part)?;
    }

    // `$id` values are stored in URI form; pointer targets compare in
    // canonical form.
    if let Some(text) = current.as_str() {
        return Some(crate::id::strip_uri_prefix(text).to_owned());
    }

    if let Some(next) = current.as_object()?.get("x-gts-ref")?.as_str() {
        if let Some(chained) = next.strip_prefix('/') {
            return resolve_pointer(schema, chained);
        }
        return Some(next.to_owned());
    }

    None
}
