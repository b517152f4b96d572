//! The entity store: versioned immutable snapshots behind a writer lock.
//!
//! Every read operation captures an `Arc` snapshot and sees a consistent
//! view; `put` clones the map, applies the change and installs a new
//! snapshot with a bumped generation. All engines run as pure functions
//! over a snapshot, so requests parallelise freely; the only process-wide
//! state is the snapshot pointer and the effective-schema memo cache,
//! keyed by `(canonical id, generation)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use crate::entities::GtsEntity;
use crate::id::{GtsID, GtsWildcard};
use crate::refinement::RefinementEngine;
use crate::resolver::{ResolverError, SchemaResolver, strip_gts_extensions};
use crate::schema_cast::{GtsEntityCastResult, SchemaCastError};
use crate::x_gts_ref::XGtsRefValidator;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("JSON object with GTS ID '{0}' not found in store")]
    ObjectNotFound(String),
    #[error("JSON schema with GTS ID '{0}' not found in store")]
    SchemaNotFound(String),
    #[error("JSON entity with GTS ID '{0}' not found in store")]
    EntityNotFound(String),
    #[error("Can't determine JSON schema ID for instance with GTS ID '{0}'")]
    SchemaForInstanceNotFound(String),
    #[error("source must be an instance, '{0}' is a schema id")]
    CastSourceMustBeInstance(String),
    #[error("Entity must have a valid id")]
    InvalidEntity,
    #[error("Schema type_id must end with '~'")]
    InvalidSchemaId,
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("{0}")]
    ValidationError(String),
}

/// A source of pre-classified entities used to seed the store.
pub trait GtsReader: Send {
    fn iter(&mut self) -> Box<dyn Iterator<Item = GtsEntity> + '_>;
    fn read_by_id(&self, entity_id: &str) -> Option<GtsEntity>;
    fn reset(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsStoreQueryResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub count: usize,
    pub limit: usize,
    pub results: Vec<Value>,
}

/// One immutable store generation.
#[derive(Default)]
pub struct StoreSnapshot {
    pub generation: u64,
    by_id: HashMap<String, GtsEntity>,
}

impl StoreSnapshot {
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&GtsEntity> {
        self.by_id.get(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GtsEntity)> {
        self.by_id.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Lookup closure over schema contents, as the resolver wants it.
    fn schema_lookup(&self) -> impl Fn(&str) -> Option<Value> + '_ {
        move |id: &str| {
            self.by_id
                .get(id)
                .filter(|e| e.is_schema)
                .map(|e| e.content.clone())
        }
    }
}

pub struct GtsStore {
    snapshot: RwLock<Arc<StoreSnapshot>>,
    effective_cache: Mutex<HashMap<(String, u64), Value>>,
}

impl GtsStore {
    #[must_use]
    pub fn new(reader: Option<Box<dyn GtsReader>>) -> Self {
        let mut by_id = HashMap::new();
        if let Some(mut reader) = reader {
            for entity in reader.iter() {
                if let Some(id) = entity.effective_id() {
                    by_id.insert(id, entity);
                }
            }
        }

        tracing::info!("Populated GtsStore with {} entities", by_id.len());
        GtsStore {
            snapshot: RwLock::new(Arc::new(StoreSnapshot {
                generation: 0,
                by_id,
            })),
            effective_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The current read view. Requests hold it for their whole lifetime and
    /// stay consistent regardless of concurrent writes.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Install an entity under its effective id. Idempotent on identical
    /// payloads: a byte-equal write does not produce a new generation.
    ///
    /// # Errors
    /// `InvalidEntity` when the entity has no usable id.
    pub fn put(&self, entity: GtsEntity) -> Result<String, StoreError> {
        let id = entity.effective_id().ok_or(StoreError::InvalidEntity)?;

        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = guard.by_id.get(&id)
            && existing.content == entity.content
        {
            return Ok(id);
        }

        let mut by_id = guard.by_id.clone();
        by_id.insert(id.clone(), entity);
        *guard = Arc::new(StoreSnapshot {
            generation: guard.generation + 1,
            by_id,
        });

        Ok(id)
    }

    /// Register a schema document under an explicit type id.
    ///
    /// # Errors
    /// `InvalidSchemaId` when `type_id` is not a well-formed type id.
    pub fn put_schema(&self, type_id: &str, schema: &Value) -> Result<(), StoreError> {
        if !type_id.ends_with('~') {
            return Err(StoreError::InvalidSchemaId);
        }
        let gts_id = GtsID::new(type_id).map_err(|_| StoreError::InvalidSchemaId)?;
        self.put(GtsEntity::from_schema(gts_id, schema))?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<GtsEntity> {
        self.snapshot().get(entity_id).cloned()
    }

    /// Stored schema ids whose chain extends `parent_id`.
    #[must_use]
    pub fn children_of(&self, parent_id: &str) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|(id, entity)| {
                entity.is_schema && id.as_str() != parent_id && id.starts_with(parent_id)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Effective schema for `schema_id` on the given snapshot, memoised per
    /// store generation. Stale generations are evicted lazily.
    ///
    /// # Errors
    /// Propagates resolver failures (missing ancestor, cycle,
    /// contradiction).
    pub fn effective_schema(
        &self,
        snapshot: &StoreSnapshot,
        schema_id: &str,
    ) -> Result<Value, ResolverError> {
        let key = (schema_id.to_owned(), snapshot.generation);
        {
            let cache = self
                .effective_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let lookup = snapshot.schema_lookup();
        let resolver = SchemaResolver::new(&lookup);
        let effective = resolver.effective_schema(schema_id)?;

        let mut cache = self
            .effective_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.retain(|(_, generation), _| *generation == snapshot.generation);
        cache.insert(key, effective.clone());
        Ok(effective)
    }

    /// Decide whether the schema at `gts_id` is a sound refinement of its
    /// ancestors (chain and `allOf`/`$ref` edges), with coherent traits.
    ///
    /// # Errors
    /// `SchemaNotFound` and `ValidationError` carrying the violations.
    pub fn validate_schema(&self, gts_id: &str) -> Result<(), StoreError> {
        if !gts_id.ends_with('~') {
            return Err(StoreError::SchemaNotFound(format!(
                "ID '{gts_id}' is not a schema (must end with '~')"
            )));
        }

        let snapshot = self.snapshot();
        let entity = snapshot
            .get(gts_id)
            .ok_or_else(|| StoreError::SchemaNotFound(gts_id.to_owned()))?;
        if !entity.is_schema {
            return Err(StoreError::SchemaNotFound(format!(
                "Entity '{gts_id}' is not a schema"
            )));
        }
        if !entity.content.is_object() {
            return Err(StoreError::SchemaNotFound(format!(
                "Schema '{gts_id}' content must be an object"
            )));
        }

        tracing::info!("Validating schema {gts_id}");

        let is_leaf = !snapshot
            .iter()
            .any(|(id, e)| e.is_schema && id.as_str() != gts_id && id.starts_with(gts_id));

        let lookup = snapshot.schema_lookup();
        RefinementEngine::new(&lookup)
            .validate_schema(gts_id, is_leaf)
            .map_err(|violations| StoreError::ValidationError(violations.join("; ")))
    }

    /// Validate an instance against the effective schema of its parent
    /// type, then evaluate every `x-gts-ref` site.
    ///
    /// # Errors
    /// `ObjectNotFound`, `SchemaForInstanceNotFound`, `SchemaNotFound` or
    /// `ValidationError`.
    pub fn validate_instance(&self, gts_id: &str) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        let entity = snapshot
            .get(gts_id)
            .ok_or_else(|| StoreError::ObjectNotFound(gts_id.to_owned()))?;

        let schema_id = entity
            .schema_id
            .clone()
            .ok_or_else(|| StoreError::SchemaForInstanceNotFound(gts_id.to_owned()))?;

        if snapshot.get(&schema_id).is_none() {
            return Err(StoreError::SchemaNotFound(schema_id));
        }

        tracing::info!("Validating instance {gts_id} against schema {schema_id}");

        let effective = self
            .effective_schema(&snapshot, &schema_id)
            .map_err(|e| StoreError::ValidationError(e.to_string()))?;

        let mut plain = strip_gts_extensions(&effective);
        if let Some(obj) = plain.as_object_mut() {
            obj.remove("$id");
            obj.remove("$schema");
        }

        let validator = jsonschema::validator_for(&plain)
            .map_err(|e| StoreError::ValidationError(format!("Invalid schema: {e}")))?;
        let failures: Vec<String> = validator
            .iter_errors(&entity.content)
            .map(|e| e.to_string())
            .collect();
        if !failures.is_empty() {
            return Err(StoreError::ValidationError(format!(
                "Validation failed: {}",
                failures.join(", ")
            )));
        }

        // x-gts-ref runs over the effective schema with the extension
        // keywords intact; prefix-mode targets must resolve here.
        let exists = |id: &str| snapshot.get(id).is_some();
        let violations = XGtsRefValidator::new().validate_instance(
            &entity.content,
            &effective,
            "",
            Some(&exists),
        );
        if !violations.is_empty() {
            let details: Vec<String> = violations
                .iter()
                .map(|v| {
                    if v.field_path.is_empty() {
                        v.reason.clone()
                    } else {
                        format!("{}: {}", v.field_path, v.reason)
                    }
                })
                .collect();
            return Err(StoreError::ValidationError(format!(
                "x-gts-ref validation failed: {}",
                details.join("; ")
            )));
        }

        Ok(())
    }

    /// Cast an instance onto a sibling minor version of its type.
    ///
    /// # Errors
    /// `EntityNotFound`, `CastSourceMustBeInstance`,
    /// `SchemaForInstanceNotFound`, `ObjectNotFound` or `ValidationError`
    /// from effective-schema construction.
    pub fn cast(
        &self,
        from_id: &str,
        to_schema_id: &str,
    ) -> Result<GtsEntityCastResult, StoreError> {
        let snapshot = self.snapshot();
        let entity = snapshot
            .get(from_id)
            .ok_or_else(|| StoreError::EntityNotFound(from_id.to_owned()))?;

        if entity.is_schema {
            return Err(StoreError::CastSourceMustBeInstance(from_id.to_owned()));
        }

        let from_schema_id = entity
            .schema_id
            .clone()
            .ok_or_else(|| StoreError::SchemaForInstanceNotFound(from_id.to_owned()))?;
        if snapshot.get(to_schema_id).is_none() {
            return Err(StoreError::ObjectNotFound(to_schema_id.to_owned()));
        }

        let from_effective = self
            .effective_schema(&snapshot, &from_schema_id)
            .map_err(|e| StoreError::ValidationError(e.to_string()))?;
        let to_effective = self
            .effective_schema(&snapshot, to_schema_id)
            .map_err(|e| StoreError::ValidationError(e.to_string()))?;

        let mut result = GtsEntityCastResult::cast(
            &from_schema_id,
            to_schema_id,
            &entity.content,
            &from_effective,
            &to_effective,
        )
        .map_err(|e: SchemaCastError| StoreError::ValidationError(e.to_string()))?;
        result.from_id = from_id.to_owned();
        Ok(result)
    }

    /// Mutation-class compatibility verdict for two stored schemas.
    #[must_use]
    pub fn is_minor_compatible(
        &self,
        old_schema_id: &str,
        new_schema_id: &str,
    ) -> GtsEntityCastResult {
        let snapshot = self.snapshot();
        let (Some(_), Some(_)) = (snapshot.get(old_schema_id), snapshot.get(new_schema_id)) else {
            let mut missing =
                GtsEntityCastResult::failed(old_schema_id, new_schema_id, "Schema not found".to_owned());
            missing.incompatibility_reasons.push("Schema not found".to_owned());
            return missing;
        };

        let old_schema = match self.effective_schema(&snapshot, old_schema_id) {
            Ok(v) => v,
            Err(e) => {
                return GtsEntityCastResult::failed(old_schema_id, new_schema_id, e.to_string());
            }
        };
        let new_schema = match self.effective_schema(&snapshot, new_schema_id) {
            Ok(v) => v,
            Err(e) => {
                return GtsEntityCastResult::failed(old_schema_id, new_schema_id, e.to_string());
            }
        };

        let (is_backward, backward_errors) =
            GtsEntityCastResult::check_backward_compatibility(&old_schema, &new_schema);
        let (is_forward, forward_errors) =
            GtsEntityCastResult::check_forward_compatibility(&old_schema, &new_schema);

        let mut result = GtsEntityCastResult::failed(old_schema_id, new_schema_id, String::new());
        result.error = None;
        result.ok = true;
        result.direction = GtsEntityCastResult::infer_direction(old_schema_id, new_schema_id);
        result.is_backward_compatible = is_backward;
        result.is_forward_compatible = is_forward;
        result.is_fully_compatible = is_backward && is_forward;
        result.backward_errors = backward_errors;
        result.forward_errors = forward_errors;
        result
    }

    /// Recursive relationship graph: every GTS reference inside the entity,
    /// plus the parent schema edge, with unknown targets reported inline.
    #[must_use]
    pub fn build_schema_graph(&self, gts_id: &str) -> Value {
        let snapshot = self.snapshot();
        let mut seen = std::collections::HashSet::new();
        Self::graph_node(&snapshot, gts_id, &mut seen)
    }

    fn graph_node(
        snapshot: &StoreSnapshot,
        gts_id: &str,
        seen: &mut std::collections::HashSet<String>,
    ) -> Value {
        let mut node = serde_json::Map::new();
        node.insert("id".to_owned(), Value::String(gts_id.to_owned()));

        if !seen.insert(gts_id.to_owned()) {
            return Value::Object(node);
        }

        let Some(entity) = snapshot.get(gts_id) else {
            node.insert(
                "errors".to_owned(),
                Value::Array(vec![Value::String("Entity not found".to_owned())]),
            );
            return Value::Object(node);
        };

        let mut refs = serde_json::Map::new();
        for r in &entity.gts_refs {
            if r.id == gts_id || r.id.starts_with("http://json-schema.org")
                || r.id.starts_with("https://json-schema.org")
            {
                continue;
            }
            refs.insert(
                r.source_path.clone(),
                Self::graph_node(snapshot, &r.id, seen),
            );
        }
        if !refs.is_empty() {
            node.insert("refs".to_owned(), Value::Object(refs));
        }

        match entity.schema_id {
            Some(ref schema_id)
                if !schema_id.starts_with("http://json-schema.org")
                    && !schema_id.starts_with("https://json-schema.org") =>
            {
                node.insert(
                    "schema_id".to_owned(),
                    Self::graph_node(snapshot, schema_id, seen),
                );
            }
            Some(_) => {}
            None => {
                node.insert(
                    "errors".to_owned(),
                    Value::Array(vec![Value::String("Schema not recognized".to_owned())]),
                );
            }
        }

        Value::Object(node)
    }

    /// Evaluate a query expression: `<pattern>[key=value, key="value", key=*]`.
    #[must_use]
    pub fn query(&self, expr: &str, limit: usize) -> GtsStoreQueryResult {
        let mut result = GtsStoreQueryResult {
            error: String::new(),
            count: 0,
            limit,
            results: Vec::new(),
        };

        let (base, filter_part) = match expr.find('[') {
            Some(pos) => (&expr[..pos], &expr[pos + 1..]),
            None => (expr, ""),
        };
        let base_pattern = base.trim();
        let filters = parse_query_filters(filter_part.rsplit_once(']').map_or("", |x| x.0));

        let pattern = if base_pattern.contains('*') {
            if !base_pattern.ends_with(".*") && !base_pattern.ends_with("~*") {
                result.error =
                    "Invalid query: wildcard patterns must end with .* or ~*".to_owned();
                return result;
            }
            match GtsWildcard::new(base_pattern) {
                Ok(p) => p,
                Err(e) => {
                    result.error = format!("Invalid query: {e}");
                    return result;
                }
            }
        } else {
            if let Err(e) = GtsID::new(base_pattern) {
                result.error = format!("Invalid query: {e}");
                return result;
            }
            match GtsWildcard::new(base_pattern) {
                Ok(p) => p,
                Err(e) => {
                    result.error = format!("Invalid query: {e}");
                    return result;
                }
            }
        };

        let snapshot = self.snapshot();
        for (_, entity) in snapshot.iter() {
            if result.results.len() >= limit {
                break;
            }
            let Some(ref gts_id) = entity.gts_id else {
                continue;
            };
            if !entity.content.is_object() {
                continue;
            }
            if !gts_id.wildcard_match(&pattern) {
                continue;
            }
            if !matches_filters(&entity.content, &filters) {
                continue;
            }
            result.results.push(entity.content.clone());
        }

        result.count = result.results.len();
        result
    }
}

fn parse_query_filters(filter_str: &str) -> HashMap<String, String> {
    let mut filters = HashMap::new();
    for part in filter_str.split(',') {
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            filters.insert(key.trim().to_owned(), value.to_owned());
        }
    }
    filters
}

fn matches_filters(content: &Value, filters: &HashMap<String, String>) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Some(obj) = content.as_object() else {
        return false;
    };

    for (key, expected) in filters {
        let actual = obj.get(key);
        if expected == "*" {
            if actual.is_none_or(Value::is_null) {
                return false;
            }
            continue;
        }
        let matched = match actual {
            Some(Value::String(s)) => s == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        };
        if !matched {
            return false;
        }
    }
    true
}
