//! Minor-version casting and schema compatibility.
//!
//! Casting moves an instance between sibling minor versions of the same
//! type chain: upcasts fill declared defaults, downcasts project away
//! properties the target does not admit, and const-pinned fields are
//! rewritten to the target constant. The produced document is revalidated
//! against the target schema and returned even when validation fails, for
//! diagnostics.
//!
//! Compatibility is judged per mutation class between the old and the new
//! schema: `is_backward_compatible` means
//! no mutation breaks consumers of the old schema, `is_forward_compatible`
//! means no mutation invalidates data written under the old schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::GtsID;
use crate::resolver::{intersect_documents, strip_gts_extensions};

#[derive(Debug, Error)]
pub enum SchemaCastError {
    #[error("source must be an instance (got schema id '{0}')")]
    SourceMustBeInstance(String),

    #[error("Instance must be an object")]
    InstanceMustBeObject,

    #[error("Cannot cast between different major versions ('{from}' -> '{to}')")]
    MajorVersionMismatch { from: String, to: String },

    #[error("Cast failed: {0}")]
    CastError(String),
}

/// Outcome of a cast or a compatibility check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsEntityCastResult {
    pub from_id: String,
    pub to_id: String,
    pub old: String,
    pub new: String,
    pub direction: String,
    pub ok: bool,
    pub added_properties: Vec<String>,
    pub removed_properties: Vec<String>,
    pub changed_properties: Vec<String>,
    pub is_fully_compatible: bool,
    pub is_backward_compatible: bool,
    pub is_forward_compatible: bool,
    pub incompatibility_reasons: Vec<String>,
    pub backward_errors: Vec<String>,
    pub forward_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub casted_entity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GtsEntityCastResult {
    /// A result shell for error reporting before any work happened.
    #[must_use]
    pub fn failed(from_id: &str, to_id: &str, error: String) -> Self {
        GtsEntityCastResult {
            from_id: from_id.to_owned(),
            to_id: to_id.to_owned(),
            old: from_id.to_owned(),
            new: to_id.to_owned(),
            direction: "unknown".to_owned(),
            ok: false,
            added_properties: Vec::new(),
            removed_properties: Vec::new(),
            changed_properties: Vec::new(),
            is_fully_compatible: false,
            is_backward_compatible: false,
            is_forward_compatible: false,
            incompatibility_reasons: Vec::new(),
            backward_errors: Vec::new(),
            forward_errors: Vec::new(),
            casted_entity: None,
            error: Some(error),
        }
    }

    /// Version relation of two identifiers, judged on their final segments:
    /// `up`/`down` for sibling minors, `none` for the same version,
    /// `lateral` for unrelated types, `unknown` for unparseable input.
    #[must_use]
    pub fn infer_direction(from_id: &str, to_id: &str) -> String {
        let (Ok(from), Ok(to)) = (GtsID::new(from_id), GtsID::new(to_id)) else {
            return "unknown".to_owned();
        };
        let (Some(f), Some(t)) = (from.segments.last(), to.segments.last()) else {
            return "unknown".to_owned();
        };

        let same_type = f.vendor == t.vendor
            && f.package == t.package
            && f.namespace == t.namespace
            && f.type_name == t.type_name;
        if !same_type || f.ver_major != t.ver_major {
            return "lateral".to_owned();
        }

        let from_minor = f.ver_minor.unwrap_or(0);
        let to_minor = t.ver_minor.unwrap_or(0);
        match to_minor.cmp(&from_minor) {
            std::cmp::Ordering::Greater => "up".to_owned(),
            std::cmp::Ordering::Less => "down".to_owned(),
            std::cmp::Ordering::Equal => "none".to_owned(),
        }
    }

    /// Cast `instance` from `from_schema` to `to_schema` (both effective,
    /// refs inlined). Identifiers are only used for direction inference and
    /// diagnostics.
    ///
    /// # Errors
    /// `MajorVersionMismatch` for cross-major casts,
    /// `InstanceMustBeObject` for non-object instances.
    pub fn cast(
        from_schema_id: &str,
        to_schema_id: &str,
        instance: &Value,
        from_schema: &Value,
        to_schema: &Value,
    ) -> Result<Self, SchemaCastError> {
        if !instance.is_object() {
            return Err(SchemaCastError::InstanceMustBeObject);
        }

        let direction = Self::infer_direction(from_schema_id, to_schema_id);
        if direction == "lateral" {
            return Err(SchemaCastError::MajorVersionMismatch {
                from: from_schema_id.to_owned(),
                to: to_schema_id.to_owned(),
            });
        }

        let from_flat = flatten_schema(from_schema);
        let to_flat = flatten_schema(to_schema);

        let mut result = GtsEntityCastResult {
            from_id: from_schema_id.to_owned(),
            to_id: to_schema_id.to_owned(),
            old: from_schema_id.to_owned(),
            new: to_schema_id.to_owned(),
            direction,
            ok: true,
            added_properties: Vec::new(),
            removed_properties: Vec::new(),
            changed_properties: Vec::new(),
            is_fully_compatible: false,
            is_backward_compatible: false,
            is_forward_compatible: false,
            incompatibility_reasons: Vec::new(),
            backward_errors: Vec::new(),
            forward_errors: Vec::new(),
            casted_entity: None,
            error: None,
        };

        let (is_backward, backward_errors) =
            Self::check_backward_compatibility(&from_flat, &to_flat);
        let (is_forward, forward_errors) = Self::check_forward_compatibility(&from_flat, &to_flat);
        result.is_backward_compatible = is_backward;
        result.is_forward_compatible = is_forward;
        result.is_fully_compatible = is_backward && is_forward;
        result.backward_errors = backward_errors;
        result.forward_errors = forward_errors;

        let mut casted = instance.clone();
        // Downcasts project the instance onto the target shape; upcasts only
        // drop what a closed target refuses.
        let project = result.direction == "down";
        apply_target_schema(&mut casted, &to_flat, "", project, &mut result);

        // Required properties that neither the instance nor a default could
        // supply make the cast incomplete.
        collect_missing_required(&casted, &to_flat, "", &mut result.incompatibility_reasons);

        let mut plain = strip_gts_extensions(&to_flat);
        if let Some(obj) = plain.as_object_mut() {
            obj.remove("$id");
            obj.remove("$schema");
        }
        match jsonschema::validator_for(&plain) {
            Ok(validator) => {
                let failures: Vec<String> =
                    validator.iter_errors(&casted).map(|e| e.to_string()).collect();
                if !failures.is_empty() {
                    result.ok = false;
                    result.error = Some(format!(
                        "casted entity failed validation: {}",
                        failures.join("; ")
                    ));
                }
            }
            Err(e) => {
                result.ok = false;
                result.error = Some(format!("target schema does not compile: {e}"));
            }
        }

        result.casted_entity = Some(casted);
        Ok(result)
    }

    /// Whether every mutation from `old` to `new` keeps consumers of `old`
    /// working.
    #[must_use]
    pub fn check_backward_compatibility(old: &Value, new: &Value) -> (bool, Vec<String>) {
        let (backward, _) = compare_schemas(old, new);
        (backward.is_empty(), backward)
    }

    /// Whether data written under `old` remains valid under `new`.
    #[must_use]
    pub fn check_forward_compatibility(old: &Value, new: &Value) -> (bool, Vec<String>) {
        let (_, forward) = compare_schemas(old, new);
        (forward.is_empty(), forward)
    }
}

/// Flatten `allOf` composition into a single constraint document. Registry
/// refs must already be inlined by the caller; contradictions fall back to
/// the raw document (they will surface in validation).
#[must_use]
pub fn flatten_schema(schema: &Value) -> Value {
    intersect_documents(std::slice::from_ref(schema), "schema").unwrap_or_else(|_| schema.clone())
}

fn at(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

/// Walk the target schema over the instance: fill defaults, rewrite consts,
/// drop undeclared properties (always under `project`, otherwise only for
/// closed objects), recurse into objects and arrays.
fn apply_target_schema(
    value: &mut Value,
    schema: &Value,
    path: &str,
    project: bool,
    result: &mut GtsEntityCastResult,
) {
    let schema = flatten_schema(schema);
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(items) = schema_obj.get("items")
        && let Some(elements) = value.as_array_mut()
    {
        for (idx, element) in elements.iter_mut().enumerate() {
            apply_target_schema(element, items, &format!("{path}[{idx}]"), project, result);
        }
        return;
    }

    let props = schema_obj.get("properties").and_then(Value::as_object);
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    if let Some(props) = props {
        for (name, prop_schema) in props {
            let prop_flat = flatten_schema(prop_schema);
            let prop_path = at(path, name);

            if let Some(existing) = obj.get_mut(name) {
                if let Some(constant) = prop_flat.get("const") {
                    if existing != constant {
                        *existing = constant.clone();
                        result.changed_properties.push(prop_path.clone());
                    }
                } else {
                    apply_target_schema(existing, &prop_flat, &prop_path, project, result);
                }
            } else if let Some(default) = prop_flat.get("default") {
                obj.insert(name.clone(), default.clone());
                result.added_properties.push(prop_path);
            } else if let Some(constant) = prop_flat.get("const") {
                obj.insert(name.clone(), constant.clone());
                result.added_properties.push(prop_path);
            }
        }

        if project || schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
            let undeclared: Vec<String> = obj
                .keys()
                .filter(|k| !props.contains_key(*k))
                .cloned()
                .collect();
            for name in undeclared {
                obj.remove(&name);
                result.removed_properties.push(at(path, &name));
            }
        }
    }
}

fn collect_missing_required(
    value: &Value,
    schema: &Value,
    path: &str,
    reasons: &mut Vec<String>,
) {
    let schema = flatten_schema(schema);
    let Some(schema_obj) = schema.as_object() else {
        return;
    };
    let Some(obj) = value.as_object() else {
        return;
    };

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                reasons.push(format!(
                    "required property '{}' has no value and no default",
                    at(path, name)
                ));
            }
        }
    }

    if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in props {
            if let Some(nested) = obj.get(name) {
                collect_missing_required(nested, prop_schema, &at(path, name), reasons);
            }
        }
    }
}

const LOWER_BOUNDS: &[&str] = &["minimum", "exclusiveMinimum", "minLength", "minItems"];
const UPPER_BOUNDS: &[&str] = &["maximum", "exclusiveMaximum", "maxLength", "maxItems"];

fn sorted_types(value: &Value) -> Vec<String> {
    let mut names = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    };
    names.sort();
    names
}

/// Classify every mutation between the flattened `old` and `new` documents.
/// Returns `(backward_errors, forward_errors)`.
fn compare_schemas(old: &Value, new: &Value) -> (Vec<String>, Vec<String>) {
    let mut backward = Vec::new();
    let mut forward = Vec::new();
    compare_nodes(
        &flatten_schema(old),
        &flatten_schema(new),
        "",
        &mut backward,
        &mut forward,
    );
    (backward, forward)
}

#[allow(clippy::too_many_lines)]
fn compare_nodes(
    old: &Value,
    new: &Value,
    path: &str,
    backward: &mut Vec<String>,
    forward: &mut Vec<String>,
) {
    let Some(old_obj) = old.as_object() else {
        return;
    };
    let Some(new_obj) = new.as_object() else {
        return;
    };
    let here = if path.is_empty() { "(root)" } else { path };

    // type
    if let (Some(o), Some(n)) = (old_obj.get("type"), new_obj.get("type"))
        && sorted_types(o) != sorted_types(n)
    {
        backward.push(format!("type changed at {here}"));
        forward.push(format!("type changed at {here}"));
    }

    // enum
    match (
        old_obj.get("enum").and_then(Value::as_array),
        new_obj.get("enum").and_then(Value::as_array),
    ) {
        (Some(o), Some(n)) => {
            if n.iter().any(|m| !o.contains(m)) {
                backward.push(format!("enum values added at {here}"));
            }
            if o.iter().any(|m| !n.contains(m)) {
                forward.push(format!("enum values removed at {here}"));
            }
        }
        (None, Some(_)) => backward.push(format!("enum constraint added at {here}")),
        (Some(_), None) => forward.push(format!("enum constraint removed at {here}")),
        (None, None) => {}
    }

    // const
    match (old_obj.get("const"), new_obj.get("const")) {
        (Some(o), Some(n)) if o != n => {
            backward.push(format!("const changed at {here}"));
            forward.push(format!("const changed at {here}"));
        }
        (None, Some(_)) => backward.push(format!("const constraint added at {here}")),
        (Some(_), None) => forward.push(format!("const constraint removed at {here}")),
        _ => {}
    }

    // pattern
    match (old_obj.get("pattern"), new_obj.get("pattern")) {
        (Some(o), Some(n)) if o != n => {
            backward.push(format!("pattern changed at {here}"));
            forward.push(format!("pattern changed at {here}"));
        }
        (None, Some(_)) => backward.push(format!("pattern constraint added at {here}")),
        (Some(_), None) => forward.push(format!("pattern constraint removed at {here}")),
        _ => {}
    }

    // Numeric and size bounds. A tightened bound breaks both directions, a
    // loosened one only breaks consumers of the old schema.
    for (bounds, tightened_when_new_is) in
        [(LOWER_BOUNDS, std::cmp::Ordering::Greater), (UPPER_BOUNDS, std::cmp::Ordering::Less)]
    {
        for keyword in bounds {
            match (
                old_obj.get(*keyword).and_then(Value::as_f64),
                new_obj.get(*keyword).and_then(Value::as_f64),
            ) {
                (Some(o), Some(n)) => {
                    if let Some(ordering) = n.partial_cmp(&o)
                        && ordering != std::cmp::Ordering::Equal
                    {
                        if ordering == tightened_when_new_is {
                            backward.push(format!("'{keyword}' tightened at {here}"));
                            forward.push(format!("'{keyword}' tightened at {here}"));
                        } else {
                            backward.push(format!("'{keyword}' loosened at {here}"));
                        }
                    }
                }
                (None, Some(_)) => backward.push(format!("'{keyword}' constraint added at {here}")),
                (Some(_), None) => forward.push(format!("'{keyword}' constraint removed at {here}")),
                (None, None) => {}
            }
        }
    }

    // additionalProperties
    let old_closed = old_obj.get("additionalProperties") == Some(&Value::Bool(false));
    let new_closed = new_obj.get("additionalProperties") == Some(&Value::Bool(false));
    if !old_closed && new_closed {
        backward.push(format!("object closed at {here}"));
    }
    if old_closed && !new_closed {
        forward.push(format!("object opened at {here}"));
    }

    // required
    let old_required: Vec<&str> = old_obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let new_required: Vec<&str> = new_obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for name in &old_required {
        if !new_required.contains(name) {
            forward.push(format!("required property '{name}' removed at {here}"));
        }
    }

    // properties
    let empty = Map::new();
    let old_props = old_obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let new_props = new_obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    for (name, old_prop) in old_props {
        match new_props.get(name) {
            Some(new_prop) => {
                if new_required.contains(&name.as_str()) && !old_required.contains(&name.as_str()) {
                    backward.push(format!("property '{name}' became required at {here}"));
                }
                compare_nodes(old_prop, new_prop, &at(path, name), backward, forward);
            }
            None => forward.push(format!("property '{name}' removed at {here}")),
        }
    }
    for name in new_props.keys() {
        if !old_props.contains_key(name) && new_required.contains(&name.as_str()) {
            backward.push(format!("required property '{name}' added at {here}"));
        }
    }

    // items
    if let (Some(old_items), Some(new_items)) = (old_obj.get("items"), new_obj.get("items")) {
        compare_nodes(old_items, new_items, &at(path, "items"), backward, forward);
    }
}
