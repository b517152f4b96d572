//! Schema-refinement checking.
//!
//! A derived schema is a sound refinement of its ancestors when every JSON
//! value it accepts is also accepted by each ancestor's effective schema.
//! Derivations are authored as `allOf: [{$ref: parent}, overlay]`; the
//! engine compares the overlay keyword-by-keyword against the tightest
//! ancestor constraints. Tightening passes, loosening and dropping fail.
//! Every derivation step along the chain is re-checked, so a broken
//! base-to-mid step fails the leaf as well.

use serde_json::{Map, Value};

use crate::id::{GTS_URI_PREFIX, GtsID};
use crate::resolver::{
    ResolverError, SchemaLookup, SchemaResolver, chain_prefixes, intersect_documents,
    strip_gts_extensions,
};
use crate::x_gts_ref::XGtsRefValidator;

/// Value-constraint keywords subject to the tighten-only discipline.
const VALUE_CONSTRAINTS: &[&str] = &[
    "enum",
    "const",
    "pattern",
    "format",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "multipleOf",
    "uniqueItems",
];

const LOWER_BOUNDS: &[&str] = &["minimum", "exclusiveMinimum", "minLength", "minItems"];
const UPPER_BOUNDS: &[&str] = &["maximum", "exclusiveMaximum", "maxLength", "maxItems"];

pub struct RefinementEngine<'a> {
    lookup: SchemaLookup<'a>,
}

impl<'a> RefinementEngine<'a> {
    #[must_use]
    pub fn new(lookup: SchemaLookup<'a>) -> Self {
        RefinementEngine { lookup }
    }

    /// Decide whether the schema at `schema_id` is a sound refinement of
    /// every ancestor, and whether its trait declarations are coherent.
    ///
    /// `is_leaf` relaxes the trait-resolution check for schemas that already
    /// have derived children (descendants may still supply trait values).
    ///
    /// # Errors
    /// The collected violations, most specific first.
    pub fn validate_schema(&self, schema_id: &str, is_leaf: bool) -> Result<(), Vec<String>> {
        let resolver = SchemaResolver::new(self.lookup);
        let mut violations = Vec::new();

        let Some(content) = (self.lookup)(schema_id) else {
            return Err(vec![format!("schema '{schema_id}' not found")]);
        };

        // Declared x-gts-ref sites must themselves be well-formed.
        for violation in XGtsRefValidator::new().validate_schema(&content, None) {
            violations.push(violation.to_string());
        }

        // $ref linkage: gts:// URIs (well-formed, no wildcard) or local.
        check_ref_targets(&content, &mut violations);

        if let Err(e) = resolver.check_cycles(schema_id) {
            violations.push(e.to_string());
            return Err(violations);
        }

        // Re-check every derivation step along the chain.
        for level in chain_prefixes(schema_id) {
            if GtsID::new(&level).is_ok_and(|id| id.segments.len() < 2) {
                continue;
            }
            match (self.lookup)(&level) {
                Some(level_content) => {
                    self.check_step(&resolver, &level, &level_content, &mut violations);
                }
                None => violations.push(format!(
                    "missing ancestor schema '{level}' in the chain of '{schema_id}'"
                )),
            }
        }

        // Trait coherence over the whole chain.
        match resolver.trait_chain(schema_id) {
            Ok(chain) => {
                let strict = is_leaf
                    && GtsID::new(schema_id).is_ok_and(|id| id.segments.len() >= 2);
                if let Err(trait_errors) = chain.validate(strict) {
                    violations.extend(trait_errors);
                }
                check_trait_schema_narrowing(&chain.schemas, &mut violations);
            }
            Err(e) => violations.push(e.to_string()),
        }

        // The effective schema must exist and compile as Draft-07.
        match resolver.effective_schema(schema_id) {
            Ok(effective) => {
                let mut plain = strip_gts_extensions(&effective);
                if let Some(obj) = plain.as_object_mut() {
                    obj.remove("$id");
                    obj.remove("$schema");
                }
                if let Err(e) = jsonschema::validator_for(&plain) {
                    violations.push(format!("effective schema does not compile: {e}"));
                }
            }
            Err(e) => violations.push(e.to_string()),
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Check one derivation step: the overlay of `level` against the
    /// intersection of its ancestors' effective schemas.
    fn check_step(
        &self,
        resolver: &SchemaResolver<'_>,
        level: &str,
        content: &Value,
        violations: &mut Vec<String>,
    ) {
        let Some(overlay) = extract_overlay(content) else {
            // No allOf + $ref linkage: an independently authored schema.
            return;
        };

        match resolver.ancestor_effective_schema(level) {
            Ok(Some(ancestor)) => {
                compare_overlay(&overlay, &ancestor, level, violations);
            }
            Ok(None) => {}
            Err(ResolverError::MissingAncestor { id, .. }) => {
                violations.push(format!("missing ancestor schema '{id}' for '{level}'"));
            }
            Err(e) => violations.push(e.to_string()),
        }
    }
}

/// The overlay half of `allOf: [{$ref: parent}, overlay]`, merged with any
/// constraint keywords declared next to the `allOf`. `None` when the schema
/// carries no `gts://` linkage.
#[must_use]
pub fn extract_overlay(content: &Value) -> Option<Value> {
    let obj = content.as_object()?;
    let branches = obj.get("allOf")?.as_array()?;

    let mut has_link = false;
    let mut overlay = Map::new();

    for branch in branches {
        let Some(branch_obj) = branch.as_object() else {
            continue;
        };
        if branch_obj
            .get("$ref")
            .and_then(Value::as_str)
            .is_some_and(|r| r.starts_with(GTS_URI_PREFIX))
        {
            has_link = true;
            continue;
        }
        for (key, value) in branch_obj {
            overlay.insert(key.clone(), value.clone());
        }
    }

    if !has_link {
        return None;
    }

    for (key, value) in obj {
        if matches!(key.as_str(), "$id" | "$schema" | "allOf" | "type") || key.starts_with("x-gts-")
        {
            continue;
        }
        overlay.entry(key.clone()).or_insert_with(|| value.clone());
    }

    Some(Value::Object(overlay))
}

/// Every `$ref` must be a `gts://` URI naming a well-formed, non-wildcard
/// GTS type, or a local `#...` pointer.
pub fn check_ref_targets(content: &Value, violations: &mut Vec<String>) {
    match content {
        Value::Object(map) => {
            if let Some(ref_str) = map.get("$ref").and_then(Value::as_str) {
                if let Some(target) = ref_str.strip_prefix(GTS_URI_PREFIX) {
                    if target.contains('*') {
                        violations.push(format!(
                            "$ref '{ref_str}' must not contain wildcards"
                        ));
                    } else if !GtsID::is_valid(target) {
                        violations.push(format!(
                            "$ref '{ref_str}' is not a valid GTS identifier"
                        ));
                    }
                } else if !ref_str.starts_with('#') {
                    violations.push(format!(
                        "$ref '{ref_str}' must be a 'gts://' URI or a local '#/...' pointer"
                    ));
                }
            }
            for value in map.values() {
                check_ref_targets(value, violations);
            }
        }
        Value::Array(items) => {
            for item in items {
                check_ref_targets(item, violations);
            }
        }
        _ => {}
    }
}

/// Trait schemas narrowed mid-chain must refine the composition of the
/// earlier ones.
fn check_trait_schema_narrowing(schemas: &[Value], violations: &mut Vec<String>) {
    for i in 1..schemas.len() {
        match intersect_documents(&schemas[..i], "x-gts-traits-schema") {
            Ok(earlier) => {
                compare_overlay(&schemas[i], &earlier, "x-gts-traits-schema", violations);
            }
            Err(e) => violations.push(e.to_string()),
        }
    }
}

fn type_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// `integer` narrows `number`; everything else must match by name.
fn type_subsumed(derived: &str, ancestors: &[String]) -> bool {
    ancestors.iter().any(|a| a == derived)
        || (derived == "integer" && ancestors.iter().any(|a| a == "number"))
}

fn number_of(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Whether every member of a finite value set (enum/const) satisfies a
/// bound the overlay dropped. Unverifiable keywords count as satisfied:
/// a finite restatement is a tightening by construction.
#[allow(clippy::cast_precision_loss)]
fn members_satisfy(members: &[Value], keyword: &str, bound: &Value) -> bool {
    let Some(limit) = number_of(bound) else {
        return true;
    };
    members.iter().all(|member| match keyword {
        "minLength" => member
            .as_str()
            .is_none_or(|s| s.chars().count() as f64 >= limit),
        "maxLength" => member
            .as_str()
            .is_none_or(|s| s.chars().count() as f64 <= limit),
        "minimum" => member.as_f64().is_none_or(|n| n >= limit),
        "maximum" => member.as_f64().is_none_or(|n| n <= limit),
        "exclusiveMinimum" => member.as_f64().is_none_or(|n| n > limit),
        "exclusiveMaximum" => member.as_f64().is_none_or(|n| n < limit),
        "minItems" => member.as_array().is_none_or(|a| a.len() as f64 >= limit),
        "maxItems" => member.as_array().is_none_or(|a| a.len() as f64 <= limit),
        _ => true,
    })
}

fn at(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}/{name}")
    }
}

/// Compare an overlay subtree against the effective ancestor subtree.
#[allow(clippy::too_many_lines)]
pub fn compare_overlay(
    overlay: &Value,
    ancestor: &Value,
    path: &str,
    violations: &mut Vec<String>,
) {
    let Some(over) = overlay.as_object() else {
        return;
    };
    let Some(anc) = ancestor.as_object() else {
        return;
    };

    // type: narrowing only.
    if let (Some(o_type), Some(a_type)) = (over.get("type"), anc.get("type")) {
        let ancestors = type_names(a_type);
        let widened: Vec<String> = type_names(o_type)
            .into_iter()
            .filter(|t| !type_subsumed(t, &ancestors))
            .collect();
        if !widened.is_empty() {
            violations.push(format!(
                "type widened at '{path}': '{}' is not accepted by the ancestor type '{}'",
                widened.join(", "),
                ancestors.join(", ")
            ));
        }
    }

    // enum / const: subsets only.
    let anc_enum = anc.get("enum").and_then(Value::as_array);
    let anc_const = anc.get("const");
    if let Some(o_enum) = over.get("enum").and_then(Value::as_array) {
        if let Some(c) = anc_const {
            if !(o_enum.len() == 1 && o_enum[0] == *c) {
                violations.push(format!(
                    "enum at '{path}' conflicts with the ancestor const"
                ));
            }
        } else if let Some(a_enum) = anc_enum {
            let extras: Vec<&Value> = o_enum.iter().filter(|m| !a_enum.contains(m)).collect();
            if !extras.is_empty() {
                violations.push(format!(
                    "enum widened at '{path}': values outside the ancestor enum"
                ));
            }
        }
    }
    if let Some(o_const) = over.get("const") {
        if let Some(c) = anc_const {
            if o_const != c {
                violations.push(format!(
                    "const at '{path}' redefines the ancestor const"
                ));
            }
        } else if let Some(a_enum) = anc_enum
            && !a_enum.contains(o_const)
        {
            violations.push(format!(
                "const at '{path}' is outside the ancestor enum"
            ));
        }
    }

    // Numeric and size bounds: tighten or restate.
    for keyword in LOWER_BOUNDS {
        if let (Some(o), Some(a)) = (
            over.get(*keyword).and_then(number_of),
            anc.get(*keyword).and_then(number_of),
        ) && o < a
        {
            violations.push(format!(
                "'{keyword}' loosened at '{path}': {o} is below the ancestor bound {a}"
            ));
        }
    }
    for keyword in UPPER_BOUNDS {
        if let (Some(o), Some(a)) = (
            over.get(*keyword).and_then(number_of),
            anc.get(*keyword).and_then(number_of),
        ) && o > a
        {
            violations.push(format!(
                "'{keyword}' loosened at '{path}': {o} exceeds the ancestor bound {a}"
            ));
        }
    }

    // pattern: identical or rejected (no implication proving).
    if let (Some(o_pattern), Some(a_pattern)) = (over.get("pattern"), anc.get("pattern"))
        && o_pattern != a_pattern
    {
        violations.push(format!(
            "pattern changed at '{path}': only an identical pattern is accepted"
        ));
    }

    // A closed ancestor object cannot be reopened.
    let anc_closed = anc.get("additionalProperties") == Some(&Value::Bool(false));
    if anc_closed && over.get("additionalProperties") == Some(&Value::Bool(true)) {
        violations.push(format!(
            "additionalProperties reopened at '{path}': the ancestor closed this object"
        ));
    }

    // Omitted vs overridden: an overlay that redeclares a property's type
    // must carry every ancestor value-constraint forward, unless a declared
    // finite value set (enum/const) provably satisfies it.
    if over.contains_key("type") {
        let finite_members: Option<Vec<Value>> = over
            .get("const")
            .map(|c| vec![c.clone()])
            .or_else(|| over.get("enum").and_then(Value::as_array).cloned());
        for keyword in VALUE_CONSTRAINTS {
            let Some(bound) = anc.get(*keyword) else {
                continue;
            };
            if over.contains_key(*keyword) {
                continue;
            }
            match &finite_members {
                Some(members) => {
                    if !members_satisfy(members, keyword, bound) {
                        violations.push(format!(
                            "constraint '{keyword}' dropped at '{path}': declared values \
                             violate the ancestor bound"
                        ));
                    }
                }
                None => violations.push(format!(
                    "constraint '{keyword}' dropped at '{path}': redeclaring the type \
                     requires carrying the ancestor constraint forward"
                )),
            }
        }
    }

    let anc_props = anc.get("properties").and_then(Value::as_object);
    let anc_required = anc.get("required").and_then(Value::as_array);

    // New required names under a closed ancestor are unsatisfiable.
    if anc_closed
        && let Some(required) = over.get("required").and_then(Value::as_array)
    {
        for name in required.iter().filter_map(Value::as_str) {
            if !anc_props.is_some_and(|p| p.contains_key(name)) {
                violations.push(format!(
                    "extension not allowed at '{path}': required property '{name}' is not \
                     declared by the closed ancestor object"
                ));
            }
        }
    }

    // Per-property recursion.
    if let Some(over_props) = over.get("properties").and_then(Value::as_object) {
        for (name, over_prop) in over_props {
            let prop_path = at(path, name);
            if over_prop == &Value::Bool(false) {
                let declared = anc_props.is_some_and(|p| p.contains_key(name));
                let required = anc_required
                    .is_some_and(|r| r.iter().any(|v| v.as_str() == Some(name.as_str())));
                if declared || required {
                    violations.push(format!(
                        "contradiction at '{prop_path}': a false schema forbids a property \
                         the ancestor declares"
                    ));
                }
                continue;
            }
            match anc_props.and_then(|p| p.get(name)) {
                Some(anc_prop) => compare_overlay(over_prop, anc_prop, &prop_path, violations),
                None => {
                    if anc_closed {
                        violations.push(format!(
                            "extension not allowed at '{prop_path}': the ancestor object is \
                             closed (additionalProperties: false)"
                        ));
                    }
                }
            }
        }
    }

    // items recursion.
    if let (Some(over_items), Some(anc_items)) = (over.get("items"), anc.get("items")) {
        compare_overlay(over_items, anc_items, &at(path, "items"), violations);
    }
}
