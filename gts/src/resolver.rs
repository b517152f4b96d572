//! Derivation-graph resolution and effective-schema construction.
//!
//! A type's parents come from two edge kinds: the syntactic `$id`-chain
//! prefix and every `allOf` branch whose `$ref` is a `gts://` URI. The
//! effective schema `E(T)` merges the declared schema with every ancestor
//! under intersection semantics, inlining `$ref`s from the store. Cycles on
//! either edge kind fail fast; the first cycle found is reported.

use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

use crate::id::{GTS_URI_PREFIX, GtsID, strip_uri_prefix};
use crate::schema_traits::TraitChain;

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("missing ancestor schema '{id}' (referenced by '{referenced_by}')")]
    MissingAncestor { id: String, referenced_by: String },

    #[error("cyclic derivation: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("contradiction on '{keyword}' at '{location}'")]
    Contradiction { keyword: String, location: String },
}

/// Read access to stored schema documents by canonical id.
pub type SchemaLookup<'a> = &'a dyn Fn(&str) -> Option<Value>;

pub struct SchemaResolver<'a> {
    lookup: SchemaLookup<'a>,
}

/// Keywords whose merged value is the maximum of the declared values.
const LOWER_BOUNDS: &[&str] = &["minimum", "exclusiveMinimum", "minLength", "minItems", "minProperties"];
/// Keywords whose merged value is the minimum of the declared values.
const UPPER_BOUNDS: &[&str] = &["maximum", "exclusiveMaximum", "maxLength", "maxItems", "maxProperties"];

impl<'a> SchemaResolver<'a> {
    #[must_use]
    pub fn new(lookup: SchemaLookup<'a>) -> Self {
        SchemaResolver { lookup }
    }

    fn fetch(&self, id: &str, referenced_by: &str) -> Result<Value, ResolverError> {
        (self.lookup)(id).ok_or_else(|| ResolverError::MissingAncestor {
            id: id.to_owned(),
            referenced_by: referenced_by.to_owned(),
        })
    }

    /// Direct parent edges of a schema document: `allOf`/`$ref` branches in
    /// declaration order, then the `$id`-chain parent. Local (`#/...`) refs
    /// are intra-document and contribute no edge.
    #[must_use]
    pub fn parent_ids(id: &str, content: &Value) -> Vec<String> {
        let mut parents = Vec::new();

        if let Some(Value::Array(branches)) = content.get("allOf") {
            for branch in branches {
                if let Some(ref_str) = branch.get("$ref").and_then(Value::as_str)
                    && let Some(target) = ref_str.strip_prefix(GTS_URI_PREFIX)
                {
                    parents.push(target.to_owned());
                }
            }
        }

        if let Ok(gts_id) = GtsID::new(id)
            && let Some(chain_parent) = gts_id.type_prefix()
            && !parents.contains(&chain_parent)
        {
            parents.push(chain_parent);
        }

        parents
    }

    /// Transitive ancestors of `id`, nearest first, deduplicated.
    ///
    /// # Errors
    /// `MissingAncestor` when a parent is not stored, `Cycle` on a derivation
    /// loop.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>, ResolverError> {
        self.check_cycles(id)?;

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(id.to_owned());
        seen.insert(id.to_owned());

        while let Some(current) = queue.pop_front() {
            let content = self.fetch(&current, id)?;
            for parent in Self::parent_ids(&current, &content) {
                if seen.insert(parent.clone()) {
                    out.push(parent.clone());
                    queue.push_back(parent);
                }
            }
        }

        Ok(out)
    }

    /// Coloured DFS over the combined edge set; reports the first cycle.
    ///
    /// # Errors
    /// `Cycle` with the offending path; missing nodes are ignored here (they
    /// surface as `MissingAncestor` from the walk that needs them).
    pub fn check_cycles(&self, id: &str) -> Result<(), ResolverError> {
        let mut in_progress = Vec::new();
        let mut done = HashSet::new();
        self.dfs(id, &mut in_progress, &mut done)
    }

    fn dfs(
        &self,
        id: &str,
        in_progress: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), ResolverError> {
        if done.contains(id) {
            return Ok(());
        }
        if let Some(pos) = in_progress.iter().position(|v| v == id) {
            let mut path: Vec<String> = in_progress[pos..].to_vec();
            path.push(id.to_owned());
            return Err(ResolverError::Cycle { path });
        }

        let Some(content) = (self.lookup)(id) else {
            return Ok(());
        };

        in_progress.push(id.to_owned());
        for parent in Self::parent_ids(id, &content) {
            self.dfs(&parent, in_progress, done)?;
        }
        in_progress.pop();
        done.insert(id.to_owned());
        Ok(())
    }

    /// Effective schema `E(T)`: the declared schema merged with every
    /// ancestor under intersection semantics, `$ref`s inlined.
    ///
    /// # Errors
    /// `MissingAncestor`, `Cycle` or `Contradiction`.
    pub fn effective_schema(&self, id: &str) -> Result<Value, ResolverError> {
        self.check_cycles(id)?;
        let content = self.fetch(id, id)?;
        let mut merged = Map::new();
        // The leaf's own $id/$schema survive (pointer-mode x-gts-ref
        // resolves /$id against the effective document); ancestors' are
        // dropped during the merge.
        if let Some(obj) = content.as_object() {
            for key in ["$id", "$schema"] {
                if let Some(value) = obj.get(key) {
                    merged.insert(key.to_owned(), value.clone());
                }
            }
        }
        let mut absorbed = HashSet::new();
        absorbed.insert(id.to_owned());
        self.absorb_document(&mut merged, id, &content, &mut absorbed)?;
        Ok(Value::Object(merged))
    }

    /// The intersection of the effective schemas of every direct parent:
    /// the bar a derived overlay has to clear. `None` for root types.
    ///
    /// # Errors
    /// Same failure modes as [`Self::effective_schema`].
    pub fn ancestor_effective_schema(&self, id: &str) -> Result<Option<Value>, ResolverError> {
        self.check_cycles(id)?;
        let content = self.fetch(id, id)?;
        let parents = Self::parent_ids(id, &content);
        if parents.is_empty() {
            return Ok(None);
        }

        let mut merged = Map::new();
        let mut absorbed = HashSet::new();
        absorbed.insert(id.to_owned());
        for parent in parents {
            if absorbed.insert(parent.clone()) {
                let parent_content = self.fetch(&parent, id)?;
                self.absorb_document(&mut merged, &parent, &parent_content, &mut absorbed)?;
            }
        }
        Ok(Some(Value::Object(merged)))
    }

    /// Merge one document into the accumulator: own keywords first, then
    /// `allOf` branches left to right (links expand to the referenced
    /// document), then the chain parent.
    fn absorb_document(
        &self,
        target: &mut Map<String, Value>,
        id: &str,
        content: &Value,
        absorbed: &mut HashSet<String>,
    ) -> Result<(), ResolverError> {
        let Some(obj) = content.as_object() else {
            return Ok(());
        };

        for (key, value) in obj {
            if matches!(key.as_str(), "$id" | "$schema" | "allOf") {
                continue;
            }
            let inlined = self.inline_refs(value, &mut HashSet::new())?;
            merge_keyword(target, key, &inlined, id)?;
        }

        if let Some(Value::Array(branches)) = obj.get("allOf") {
            for branch in branches {
                if let Some(ref_str) = branch.get("$ref").and_then(Value::as_str) {
                    if let Some(parent) = ref_str.strip_prefix(GTS_URI_PREFIX) {
                        if absorbed.insert(parent.to_owned()) {
                            let parent_content = self.fetch(parent, id)?;
                            self.absorb_document(target, parent, &parent_content, absorbed)?;
                        }
                        continue;
                    }
                    // Local refs stay intra-document; splice the branch as-is.
                }
                let inlined = self.inline_refs(branch, &mut HashSet::new())?;
                if let Some(branch_obj) = inlined.as_object() {
                    for (key, value) in branch_obj {
                        if matches!(key.as_str(), "$id" | "$schema") {
                            continue;
                        }
                        merge_keyword(target, key, value, id)?;
                    }
                }
            }
        }

        if let Ok(gts_id) = GtsID::new(id)
            && let Some(chain_parent) = gts_id.type_prefix()
            && absorbed.insert(chain_parent.clone())
        {
            let parent_content = self.fetch(&chain_parent, id)?;
            self.absorb_document(target, &chain_parent, &parent_content, absorbed)?;
        }

        Ok(())
    }

    /// Replace `gts://` `$ref`s by the referenced schema content, keeping
    /// sibling keywords and guarding against reference loops. Local `#/...`
    /// refs are left for the JSON-Schema validator to resolve.
    ///
    /// # Errors
    /// `MissingAncestor` for dangling registry refs.
    pub fn inline_refs(
        &self,
        schema: &Value,
        visiting: &mut HashSet<String>,
    ) -> Result<Value, ResolverError> {
        match schema {
            Value::Object(map) => {
                if let Some(ref_str) = map.get("$ref").and_then(Value::as_str)
                    && ref_str.starts_with(GTS_URI_PREFIX)
                {
                    let target_id = strip_uri_prefix(ref_str).to_owned();
                    if !visiting.insert(target_id.clone()) {
                        return Err(ResolverError::Cycle {
                            path: vec![target_id],
                        });
                    }
                    let target = self.fetch(&target_id, "$ref")?;
                    let mut resolved = self.inline_refs(&target, visiting)?;
                    visiting.remove(&target_id);

                    if let Value::Object(ref mut resolved_map) = resolved {
                        resolved_map.remove("$id");
                        resolved_map.remove("$schema");
                        for (key, value) in map {
                            if key != "$ref" {
                                resolved_map
                                    .insert(key.clone(), self.inline_refs(value, visiting)?);
                            }
                        }
                    }
                    return Ok(resolved);
                }

                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), self.inline_refs(value, visiting)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.inline_refs(item, visiting)?);
                }
                Ok(Value::Array(out))
            }
            _ => Ok(schema.clone()),
        }
    }

    /// Gather the trait chain along the `$id`-chain prefixes of `id`, base
    /// first, with `$ref`s inside trait schemas resolved from the store.
    ///
    /// # Errors
    /// `MissingAncestor` when a chain level or a trait-schema ref is not
    /// stored.
    pub fn trait_chain(&self, id: &str) -> Result<TraitChain, ResolverError> {
        let mut chain = TraitChain::default();
        for level in chain_prefixes(id) {
            let Some(content) = (self.lookup)(&level) else {
                continue;
            };
            chain.absorb(&content);
        }

        let mut resolved = Vec::with_capacity(chain.schemas.len());
        for schema in &chain.schemas {
            resolved.push(self.inline_refs(schema, &mut HashSet::new())?);
        }
        chain.schemas = resolved;
        Ok(chain)
    }
}

/// All chain prefixes of a type id, shortest first, the id itself included.
#[must_use]
pub fn chain_prefixes(id: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut upto = 0usize;
    for (pos, ch) in id.char_indices() {
        if ch == '~' {
            upto = pos + 1;
            prefixes.push(id[..upto].to_owned());
        }
    }
    if upto < id.len() {
        prefixes.push(id.to_owned());
    }
    prefixes
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn type_set(value: &Value) -> Vec<String> {
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

/// Intersection of two JSON type sets. `integer` is a subtype of `number`,
/// so `number` meets `integer` at `integer`.
fn intersect_type_sets(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for t in a {
        let keep = if b.contains(t) {
            Some(t.clone())
        } else if t == "number" && b.iter().any(|u| u == "integer") {
            Some("integer".to_owned())
        } else if t == "integer" && b.iter().any(|u| u == "number") {
            Some(t.clone())
        } else {
            None
        };
        if let Some(kept) = keep
            && !out.contains(&kept)
        {
            out.push(kept);
        }
    }
    out
}

fn type_set_value(set: &[String]) -> Value {
    if set.len() == 1 {
        Value::String(set[0].clone())
    } else {
        Value::Array(set.iter().cloned().map(Value::String).collect())
    }
}

/// Merge a single keyword into the accumulator under intersection semantics.
#[allow(clippy::too_many_lines)]
fn merge_keyword(
    target: &mut Map<String, Value>,
    keyword: &str,
    value: &Value,
    location: &str,
) -> Result<(), ResolverError> {
    let contradiction = |kw: &str| ResolverError::Contradiction {
        keyword: kw.to_owned(),
        location: location.to_owned(),
    };

    match keyword {
        "type" => {
            if let Some(existing) = target.get("type") {
                let current = type_set(existing);
                let incoming = type_set(value);
                let intersection = intersect_type_sets(&current, &incoming);
                if intersection.is_empty() {
                    return Err(contradiction("type"));
                }
                target.insert("type".to_owned(), type_set_value(&intersection));
            } else {
                target.insert("type".to_owned(), value.clone());
            }
        }
        "enum" => {
            if let Some(constant) = target.get("const") {
                let members = value.as_array().cloned().unwrap_or_default();
                if !members.contains(constant) {
                    return Err(contradiction("enum"));
                }
            } else if let Some(Value::Array(existing)) = target.get("enum") {
                let members = value.as_array().cloned().unwrap_or_default();
                let intersection: Vec<Value> = existing
                    .iter()
                    .filter(|m| members.contains(m))
                    .cloned()
                    .collect();
                if intersection.is_empty() {
                    return Err(contradiction("enum"));
                }
                target.insert("enum".to_owned(), Value::Array(intersection));
            } else {
                target.insert("enum".to_owned(), value.clone());
            }
        }
        "const" => {
            if let Some(existing) = target.get("const") {
                if existing != value {
                    return Err(contradiction("const"));
                }
            } else if let Some(Value::Array(members)) = target.get("enum") {
                if !members.contains(value) {
                    return Err(contradiction("const"));
                }
                target.insert("const".to_owned(), value.clone());
            } else {
                target.insert("const".to_owned(), value.clone());
            }
        }
        "required" => {
            let mut union: Vec<Value> = target
                .get("required")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for name in value.as_array().cloned().unwrap_or_default() {
                if !union.contains(&name) {
                    union.push(name);
                }
            }
            target.insert("required".to_owned(), Value::Array(union));
        }
        "additionalProperties" => {
            let closed_already = target.get("additionalProperties") == Some(&Value::Bool(false));
            if !closed_already {
                target.insert("additionalProperties".to_owned(), value.clone());
            }
        }
        "properties" => {
            let slot = target
                .entry("properties".to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(slot_map) = slot.as_object_mut() else {
                return Ok(());
            };
            if let Some(incoming) = value.as_object() {
                for (name, prop) in incoming {
                    if let Some(existing) = slot_map.get_mut(name) {
                        let merged = merge_subschemas(existing, prop, &format!("{location}/{name}"))?;
                        slot_map.insert(name.clone(), merged);
                    } else {
                        slot_map.insert(name.clone(), prop.clone());
                    }
                }
            }
        }
        "items" => {
            if let Some(existing) = target.get("items") {
                let merged = merge_subschemas(&existing.clone(), value, &format!("{location}/items"))?;
                target.insert("items".to_owned(), merged);
            } else {
                target.insert("items".to_owned(), value.clone());
            }
        }
        "pattern" => {
            match target.get("pattern") {
                None => {
                    target.insert("pattern".to_owned(), value.clone());
                }
                Some(existing) if existing == value => {}
                Some(_) => {
                    // Both patterns apply; carry the extra one in allOf so a
                    // standard validator enforces the conjunction.
                    let extra = serde_json::json!({ "pattern": value });
                    match target.get_mut("allOf") {
                        Some(Value::Array(branches)) => branches.push(extra),
                        _ => {
                            target.insert("allOf".to_owned(), Value::Array(vec![extra]));
                        }
                    }
                }
            }
        }
        _ if LOWER_BOUNDS.contains(&keyword) => {
            let tighter = match (target.get(keyword).and_then(as_f64), as_f64(value)) {
                (Some(current), Some(incoming)) => incoming > current,
                (None, _) => true,
                (_, None) => false,
            };
            if tighter {
                target.insert(keyword.to_owned(), value.clone());
            }
        }
        _ if UPPER_BOUNDS.contains(&keyword) => {
            let tighter = match (target.get(keyword).and_then(as_f64), as_f64(value)) {
                (Some(current), Some(incoming)) => incoming < current,
                (None, _) => true,
                (_, None) => false,
            };
            if tighter {
                target.insert(keyword.to_owned(), value.clone());
            }
        }
        "allOf" => {
            if let Some(branches) = value.as_array() {
                for branch in branches {
                    if let Some(branch_obj) = branch.as_object() {
                        for (key, branch_value) in branch_obj {
                            merge_keyword(target, key, branch_value, location)?;
                        }
                    }
                }
            }
        }
        // Annotations and uncomposed keywords: the most-derived declaration
        // (merged first) wins.
        _ => {
            if !target.contains_key(keyword) {
                target.insert(keyword.to_owned(), value.clone());
            }
        }
    }

    Ok(())
}

/// Merge two subschema values (used for per-property and items recursion).
fn merge_subschemas(base: &Value, overlay: &Value, location: &str) -> Result<Value, ResolverError> {
    // A boolean `false` schema admits nothing.
    if base == &Value::Bool(false) || overlay == &Value::Bool(false) {
        return Err(ResolverError::Contradiction {
            keyword: "false-schema".to_owned(),
            location: location.to_owned(),
        });
    }

    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(overlay_map) = overlay.as_object() {
        for (key, value) in overlay_map {
            merge_keyword(&mut merged, key, value, location)?;
        }
    }
    Ok(Value::Object(merged))
}

/// Intersect standalone schema documents (no store access), used for
/// composing trait schemas before a narrowing check.
///
/// # Errors
/// `Contradiction` when the intersection is empty on some keyword.
pub fn intersect_documents(docs: &[Value], location: &str) -> Result<Value, ResolverError> {
    let mut merged = Map::new();
    for doc in docs {
        if let Some(obj) = doc.as_object() {
            for (key, value) in obj {
                if matches!(key.as_str(), "$id" | "$schema") {
                    continue;
                }
                merge_keyword(&mut merged, key, value, location)?;
            }
        }
    }
    Ok(Value::Object(merged))
}

/// Strip `x-gts-*` extension keywords so a stock Draft-07 validator can
/// compile the document.
#[must_use]
pub fn strip_gts_extensions(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if key.starts_with("x-gts-") {
                    continue;
                }
                out.insert(key.clone(), strip_gts_extensions(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_gts_extensions).collect()),
        _ => schema.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn store(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(id, v)| ((*id).to_owned(), v.clone()))
            .collect()
    }

    const BASE: &str = "gts.x.test.events.base.v1~";
    const MID: &str = "gts.x.test.events.base.v1~x.test._.mid.v1~";
    const LEAF: &str = "gts.x.test.events.base.v1~x.test._.mid.v1~x.test._.leaf.v1~";

    fn derived(parent: &str, overlay: Value) -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "allOf": [
                {"$ref": format!("gts://{parent}")},
                overlay
            ]
        })
    }

    #[test]
    fn test_chain_prefixes() {
        assert_eq!(
            chain_prefixes("gts.a.b.c.d.v1~e.f.g.h.v2~"),
            vec!["gts.a.b.c.d.v1~", "gts.a.b.c.d.v1~e.f.g.h.v2~"]
        );
        assert_eq!(
            chain_prefixes("gts.a.b.c.d.v1~e.f.g.h.v2.0"),
            vec!["gts.a.b.c.d.v1~", "gts.a.b.c.d.v1~e.f.g.h.v2.0"]
        );
    }

    #[test]
    fn test_parent_ids_combines_ref_and_chain() {
        let content = json!({
            "allOf": [
                {"$ref": "gts://gts.x.other.ns.mixin.v1~"},
                {"type": "object"}
            ]
        });
        let parents = SchemaResolver::parent_ids(MID, &content);
        assert_eq!(
            parents,
            vec!["gts.x.other.ns.mixin.v1~".to_owned(), BASE.to_owned()]
        );
    }

    #[test]
    fn test_ancestors_transitive() {
        let schemas = store(&[
            (BASE, json!({"type": "object"})),
            (MID, derived(BASE, json!({"type": "object"}))),
            (LEAF, derived(MID, json!({"type": "object"}))),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let ancestors = resolver.ancestors(LEAF).unwrap();
        assert_eq!(ancestors, vec![MID.to_owned(), BASE.to_owned()]);
    }

    #[test]
    fn test_missing_ancestor() {
        let schemas = store(&[(MID, derived(BASE, json!({"type": "object"})))]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        assert!(matches!(
            resolver.ancestors(MID),
            Err(ResolverError::MissingAncestor { .. })
        ));
    }

    #[test]
    fn test_ref_cycle_detected() {
        let a = "gts.x.test.cyc.aaa.v1~";
        let b = "gts.x.test.cyc.bbb.v1~";
        let schemas = store(&[
            (a, json!({"allOf": [{"$ref": format!("gts://{b}")}]})),
            (b, json!({"allOf": [{"$ref": format!("gts://{a}")}]})),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let err = resolver.check_cycles(a).unwrap_err();
        assert!(matches!(err, ResolverError::Cycle { .. }));
    }

    #[test]
    fn test_effective_schema_merges_bounds() {
        let schemas = store(&[
            (
                BASE,
                json!({
                    "type": "object",
                    "required": ["payload"],
                    "properties": {"payload": {"type": "string", "maxLength": 1024}}
                }),
            ),
            (
                MID,
                derived(
                    BASE,
                    json!({
                        "type": "object",
                        "properties": {"payload": {"type": "string", "maxLength": 512}}
                    }),
                ),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(MID).unwrap();
        assert_eq!(effective["properties"]["payload"]["maxLength"], json!(512));
        assert_eq!(effective["required"], json!(["payload"]));
    }

    #[test]
    fn test_effective_schema_tightest_wins_across_levels() {
        let schemas = store(&[
            (
                BASE,
                json!({"type": "object", "properties": {"n": {"type": "integer", "minimum": 0, "maximum": 100}}}),
            ),
            (
                MID,
                derived(
                    BASE,
                    json!({"type": "object", "properties": {"n": {"minimum": 10}}}),
                ),
            ),
            (
                LEAF,
                derived(
                    MID,
                    json!({"type": "object", "properties": {"n": {"maximum": 50}}}),
                ),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(LEAF).unwrap();
        assert_eq!(effective["properties"]["n"]["minimum"], json!(10));
        assert_eq!(effective["properties"]["n"]["maximum"], json!(50));
    }

    #[test]
    fn test_effective_schema_required_union() {
        let schemas = store(&[
            (
                BASE,
                json!({"type": "object", "required": ["a"], "properties": {"a": {"type": "string"}}}),
            ),
            (
                MID,
                derived(
                    BASE,
                    json!({"type": "object", "required": ["b"], "properties": {"b": {"type": "string"}}}),
                ),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(MID).unwrap();
        let required = effective["required"].as_array().unwrap();
        assert!(required.contains(&json!("a")) && required.contains(&json!("b")));
    }

    #[test]
    fn test_effective_schema_enum_intersection() {
        let schemas = store(&[
            (
                BASE,
                json!({"type": "object", "properties": {"s": {"enum": ["a", "b", "c"]}}}),
            ),
            (
                MID,
                derived(BASE, json!({"type": "object", "properties": {"s": {"enum": ["b", "c", "d"]}}})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(MID).unwrap();
        assert_eq!(effective["properties"]["s"]["enum"], json!(["b", "c"]));
    }

    #[test]
    fn test_effective_schema_type_contradiction() {
        let schemas = store(&[
            (BASE, json!({"type": "object", "properties": {"v": {"type": "string"}}})),
            (
                MID,
                derived(BASE, json!({"type": "object", "properties": {"v": {"type": "integer"}}})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        assert!(matches!(
            resolver.effective_schema(MID),
            Err(ResolverError::Contradiction { .. })
        ));
    }

    #[test]
    fn test_effective_schema_type_narrowing_ok() {
        let schemas = store(&[
            (BASE, json!({"type": "object", "properties": {"v": {"type": ["string", "null"]}}})),
            (
                MID,
                derived(BASE, json!({"type": "object", "properties": {"v": {"type": "string"}}})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(MID).unwrap();
        assert_eq!(effective["properties"]["v"]["type"], json!("string"));
    }

    #[test]
    fn test_effective_schema_closed_base_stays_closed() {
        let schemas = store(&[
            (
                BASE,
                json!({"type": "object", "additionalProperties": false, "properties": {"a": {"type": "string"}}}),
            ),
            (
                MID,
                derived(BASE, json!({"type": "object", "additionalProperties": true})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(MID).unwrap();
        // false is absorptive under AND, regardless of merge order.
        assert_eq!(effective["additionalProperties"], json!(false));
    }

    #[test]
    fn test_inline_refs_expands_property_ref() {
        let schemas = store(&[(
            "gts.x.test.common.address.v1~",
            json!({
                "$id": "gts://gts.x.test.common.address.v1~",
                "type": "object",
                "properties": {"street": {"type": "string"}}
            }),
        )]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let schema = json!({
            "type": "object",
            "properties": {"home": {"$ref": "gts://gts.x.test.common.address.v1~"}}
        });
        let inlined = resolver
            .inline_refs(&schema, &mut HashSet::new())
            .unwrap();
        assert_eq!(
            inlined["properties"]["home"]["properties"]["street"]["type"],
            json!("string")
        );
        assert!(inlined["properties"]["home"].get("$id").is_none());
    }

    #[test]
    fn test_inline_refs_dangling_is_error() {
        let schemas = store(&[]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let schema = json!({"$ref": "gts://gts.x.test.common.missing.v1~"});
        assert!(matches!(
            resolver.inline_refs(&schema, &mut HashSet::new()),
            Err(ResolverError::MissingAncestor { .. })
        ));
    }

    #[test]
    fn test_ancestor_effective_schema_excludes_own_overlay() {
        let schemas = store(&[
            (
                BASE,
                json!({"type": "object", "properties": {"s": {"type": "string", "maxLength": 128}}}),
            ),
            (
                MID,
                derived(BASE, json!({"type": "object", "properties": {"s": {"maxLength": 64}}})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let ancestor = resolver.ancestor_effective_schema(MID).unwrap().unwrap();
        assert_eq!(ancestor["properties"]["s"]["maxLength"], json!(128));
        assert!(resolver.ancestor_effective_schema(BASE).unwrap().is_none());
    }

    #[test]
    fn test_trait_chain_follows_prefixes() {
        let schemas = store(&[
            (
                BASE,
                json!({
                    "type": "object",
                    "x-gts-traits-schema": {
                        "type": "object",
                        "properties": {"retention": {"type": "string", "default": "P30D"}}
                    }
                }),
            ),
            (
                MID,
                derived(BASE, json!({"type": "object", "x-gts-traits": {"retention": "P90D"}})),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let chain = resolver.trait_chain(MID).unwrap();
        assert_eq!(chain.schemas.len(), 1);
        assert_eq!(chain.values.get("retention"), Some(&json!("P90D")));
    }

    #[test]
    fn test_trait_chain_resolves_refs_in_trait_schema() {
        let retention = "gts.x.test.traits.retention.v1~";
        let schemas = store(&[
            (
                retention,
                json!({
                    "$id": format!("gts://{retention}"),
                    "type": "object",
                    "properties": {"retention": {"type": "string", "default": "P30D"}}
                }),
            ),
            (
                BASE,
                json!({
                    "type": "object",
                    "x-gts-traits-schema": {
                        "type": "object",
                        "allOf": [{"$ref": format!("gts://{retention}")}]
                    }
                }),
            ),
        ]);
        let lookup = |id: &str| schemas.get(id).cloned();
        let resolver = SchemaResolver::new(&lookup);
        let chain = resolver.trait_chain(BASE).unwrap();
        assert!(chain.validate(false).is_ok());
        let composed = chain.schemas[0].to_string();
        assert!(composed.contains("retention"));
    }

    #[test]
    fn test_strip_gts_extensions() {
        let schema = json!({
            "type": "object",
            "x-gts-traits-schema": {"type": "object"},
            "properties": {
                "id": {"type": "string", "x-gts-ref": "/$id"}
            }
        });
        let stripped = strip_gts_extensions(&schema);
        assert!(stripped.get("x-gts-traits-schema").is_none());
        assert!(stripped["properties"]["id"].get("x-gts-ref").is_none());
    }
}
