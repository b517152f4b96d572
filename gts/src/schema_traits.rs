//! Trait resolution (`x-gts-traits-schema` / `x-gts-traits`).
//!
//! Trait schemas declare the shape of a configuration object; trait values
//! supply it. Both are gathered along the inheritance chain, base first:
//! trait schemas compose via `allOf` into the effective trait schema, trait
//! values shallow-merge with the most-derived level winning. Defaults from
//! the effective trait schema fill any remaining holes before validation.

use serde_json::Value;

// Bounds `allOf` traversal on hostile or accidentally self-nested schemas.
const MAX_TRAIT_DEPTH: usize = 64;

/// Trait schemas and merged trait values gathered from a chain of schema
/// documents (base first, leaf last).
#[derive(Debug, Default, Clone)]
pub struct TraitChain {
    /// Every `x-gts-traits-schema` seen along the chain, in chain order.
    pub schemas: Vec<Value>,
    /// Shallow-merged `x-gts-traits` values, leaf wins.
    pub values: serde_json::Map<String, Value>,
}

impl TraitChain {
    /// Gather trait schemas and values from raw (non-flattened) schema
    /// documents, base first.
    #[must_use]
    pub fn collect(levels: &[Value]) -> Self {
        let mut chain = TraitChain::default();
        for level in levels {
            chain.absorb(level);
        }
        chain
    }

    /// Absorb one schema document, including its `allOf` branches.
    pub fn absorb(&mut self, document: &Value) {
        gather_trait_schemas(document, &mut self.schemas, 0);
        gather_trait_values(document, &mut self.values, 0);
    }

    /// Whether any level declared trait values.
    #[must_use]
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Validate the merged trait values against the effective trait schema.
    ///
    /// With `check_unresolved`, every schema-declared trait property must end
    /// up with a value (its own or a default); pass `false` for mid-chain
    /// schemas whose descendants may still supply values.
    ///
    /// # Errors
    /// Returns the list of violations: orphan trait values, invalid trait
    /// schemas, failed JSON-Schema validation, unresolved properties.
    pub fn validate(&self, check_unresolved: bool) -> Result<(), Vec<String>> {
        if self.schemas.is_empty() {
            if self.has_values() {
                return Err(vec![
                    "x-gts-traits values provided but no x-gts-traits-schema is defined in the \
                     inheritance chain"
                        .to_owned(),
                ]);
            }
            return Ok(());
        }

        for (i, ts) in self.schemas.iter().enumerate() {
            if ts.as_object().is_some_and(|o| o.contains_key("x-gts-traits")) {
                return Err(vec![format!(
                    "x-gts-traits-schema[{i}] contains 'x-gts-traits': trait values must not \
                     appear inside a trait schema definition"
                )]);
            }
            if let Err(e) = jsonschema::validator_for(ts) {
                return Err(vec![format!(
                    "x-gts-traits-schema[{i}] is not a valid JSON Schema: {e}"
                )]);
            }
        }

        let effective_schema = effective_trait_schema(&self.schemas);
        let effective_values =
            fill_defaults(&effective_schema, &Value::Object(self.values.clone()), 0);
        check_against_schema(&effective_schema, &effective_values, check_unresolved)
    }
}

fn gather_trait_schemas(document: &Value, out: &mut Vec<Value>, depth: usize) {
    if depth >= MAX_TRAIT_DEPTH {
        return;
    }
    let Some(obj) = document.as_object() else {
        return;
    };
    if let Some(ts) = obj.get("x-gts-traits-schema") {
        out.push(ts.clone());
    }
    if let Some(Value::Array(branches)) = obj.get("allOf") {
        for branch in branches {
            gather_trait_schemas(branch, out, depth + 1);
        }
    }
}

fn gather_trait_values(
    document: &Value,
    merged: &mut serde_json::Map<String, Value>,
    depth: usize,
) {
    if depth >= MAX_TRAIT_DEPTH {
        return;
    }
    let Some(obj) = document.as_object() else {
        return;
    };
    if let Some(Value::Object(traits)) = obj.get("x-gts-traits") {
        for (k, v) in traits {
            merged.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Array(branches)) = obj.get("allOf") {
        for branch in branches {
            gather_trait_values(branch, merged, depth + 1);
        }
    }
}

/// Compose the collected trait schemas into one document. A single schema is
/// used as-is; several compose under `allOf`.
#[must_use]
pub fn effective_trait_schema(schemas: &[Value]) -> Value {
    match schemas {
        [] => Value::Object(serde_json::Map::new()),
        [single] => single.clone(),
        many => serde_json::json!({
            "type": "object",
            "allOf": many,
        }),
    }
}

/// Collect property declarations from a trait schema, `allOf` included.
/// A property declared at several levels keeps the most-derived definition.
fn declared_properties(schema: &Value) -> Vec<(String, Value)> {
    fn walk(schema: &Value, props: &mut Vec<(String, Value)>, depth: usize) {
        if depth >= MAX_TRAIT_DEPTH {
            return;
        }
        let Some(obj) = schema.as_object() else {
            return;
        };
        if let Some(Value::Object(p)) = obj.get("properties") {
            for (k, v) in p {
                props.push((k.clone(), v.clone()));
            }
        }
        if let Some(Value::Array(branches)) = obj.get("allOf") {
            for branch in branches {
                walk(branch, props, depth + 1);
            }
        }
    }

    let mut props = Vec::new();
    walk(schema, &mut props, 0);

    let mut seen = std::collections::HashSet::new();
    let mut deduped = Vec::with_capacity(props.len());
    for (name, prop) in props.into_iter().rev() {
        if seen.insert(name.clone()) {
            deduped.push((name, prop));
        }
    }
    deduped.reverse();
    deduped
}

/// Fill `default` values from the trait schema into the merged values for
/// absent properties, recursing into declared object properties.
fn fill_defaults(trait_schema: &Value, values: &Value, depth: usize) -> Value {
    if depth >= MAX_TRAIT_DEPTH {
        return values.clone();
    }

    let mut out = match values {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };

    for (name, prop) in declared_properties(trait_schema) {
        let Some(prop_obj) = prop.as_object() else {
            continue;
        };
        if !out.contains_key(&name) {
            if let Some(default) = prop_obj.get("default") {
                out.insert(name, default.clone());
            }
        } else if prop_obj.get("type") == Some(&Value::String("object".to_owned()))
            && prop_obj.contains_key("properties")
        {
            let nested = fill_defaults(
                &prop,
                out.get(&name).unwrap_or(&Value::Null),
                depth + 1,
            );
            out.insert(name, nested);
        }
    }

    Value::Object(out)
}

fn check_against_schema(
    trait_schema: &Value,
    effective_values: &Value,
    check_unresolved: bool,
) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    match jsonschema::validator_for(trait_schema) {
        Ok(validator) => {
            for error in validator.iter_errors(effective_values) {
                errors.push(format!("trait validation: {error}"));
            }
        }
        Err(e) => errors.push(format!("failed to compile trait schema: {e}")),
    }

    if check_unresolved {
        let values_obj = effective_values.as_object();
        for (name, prop) in declared_properties(trait_schema) {
            let has_value = values_obj.is_some_and(|m| m.contains_key(&name));
            let has_default = prop.as_object().is_some_and(|m| m.contains_key("default"));
            if !has_value && !has_default {
                let expected = prop
                    .as_object()
                    .and_then(|m| m.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("any");
                errors.push(format!(
                    "trait property '{name}' (type: {expected}) is not resolved: no value \
                     provided and no default defined in the trait schema"
                ));
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
