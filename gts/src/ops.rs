//! Operation façade: one method per registry operation, each returning a
//! serialisable result mirroring the wire contract. The HTTP server and the
//! CLI are thin shells over this type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::entities::{GtsConfig, GtsEntity};
use crate::files_reader::GtsFileReader;
use crate::id::{GtsID, GtsWildcard, Segment};
use crate::path_resolver::JsonPathResolver;
use crate::refinement::check_ref_targets;
use crate::schema_cast::GtsEntityCastResult;
use crate::store::{GtsStore, GtsStoreQueryResult};
use crate::x_gts_ref::XGtsRefValidator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdValidationResult {
    pub id: String,
    pub valid: bool,
    pub is_schema: bool,
    pub is_wildcard: bool,
    pub error: String,
}

/// Serializable segment view for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdSegmentInfo {
    pub vendor: String,
    pub package: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub ver_major: Option<u32>,
    pub ver_minor: Option<u32>,
    pub is_type: bool,
}

impl From<&Segment> for GtsIdSegmentInfo {
    fn from(seg: &Segment) -> Self {
        Self {
            vendor: seg.vendor.clone(),
            package: seg.package.clone(),
            namespace: seg.namespace.clone(),
            type_name: seg.type_name.clone(),
            ver_major: Some(seg.ver_major),
            ver_minor: seg.ver_minor,
            is_type: seg.is_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdParseResult {
    pub id: String,
    pub ok: bool,
    pub is_schema: bool,
    pub is_wildcard: bool,
    pub segments: Vec<GtsIdSegmentInfo>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdMatchResult {
    pub candidate: String,
    pub pattern: String,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsUuidResult {
    pub id: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsValidationResult {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsEntityValidationResult {
    pub id: String,
    pub ok: bool,
    pub entity_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Relationship graph; serialises as the graph object itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GtsSchemaGraphResult {
    pub graph: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsEntityInfo {
    pub id: String,
    pub schema_id: Option<String>,
    pub is_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsGetEntityResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub schema_id: Option<String>,
    pub is_schema: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsEntitiesListResult {
    pub entities: Vec<GtsEntityInfo>,
    pub count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddEntityResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub schema_id: Option<String>,
    pub is_schema: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddEntitiesResult {
    pub ok: bool,
    pub results: Vec<GtsAddEntityResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddSchemaResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsExtractIdResult {
    pub id: String,
    pub schema_id: Option<String>,
    pub selected_entity_field: Option<String>,
    pub selected_schema_id_field: Option<String>,
    pub is_schema: bool,
}

pub struct GtsOps {
    pub verbose: usize,
    pub cfg: GtsConfig,
    pub path: Option<Vec<String>>,
    pub store: GtsStore,
}

impl GtsOps {
    #[must_use]
    pub fn new(path: Option<Vec<String>>, config: Option<String>, verbose: usize) -> Self {
        let cfg = Self::load_config(config);
        let reader = path.as_ref().map(|p| {
            Box::new(GtsFileReader::new(p, Some(cfg.clone()))) as Box<dyn crate::store::GtsReader>
        });
        let store = GtsStore::new(reader);

        GtsOps {
            verbose,
            cfg,
            path,
            store,
        }
    }

    fn load_config(config_path: Option<String>) -> GtsConfig {
        if let Some(path) = config_path
            && let Ok(cfg) = Self::load_config_from_path(Path::new(&path))
        {
            return cfg;
        }
        if let Ok(cfg) = Self::load_config_from_path(Path::new("gts.config.json")) {
            return cfg;
        }
        GtsConfig::default()
    }

    fn load_config_from_path(path: &Path) -> Result<GtsConfig, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let data: HashMap<String, Value> = serde_json::from_str(&content)?;
        let defaults = GtsConfig::default();

        let string_list = |key: &str| -> Option<Vec<String>> {
            data.get(key).and_then(Value::as_array).map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
        };

        Ok(GtsConfig {
            entity_id_fields: string_list("entity_id_fields").unwrap_or(defaults.entity_id_fields),
            schema_id_fields: string_list("schema_id_fields").unwrap_or(defaults.schema_id_fields),
        })
    }

    /// Register one entity. With `validate`, schema documents undergo
    /// ingest-time checks before storage and instances are validated after
    /// storage; failures report `ok=false` (the HTTP layer maps this to 422).
    #[must_use]
    pub fn add_entity(&self, content: &Value, validate: bool) -> GtsAddEntityResult {
        let entity = GtsEntity::from_value(content, &self.cfg);

        let failed = |error: String| GtsAddEntityResult {
            ok: false,
            id: String::new(),
            schema_id: None,
            is_schema: false,
            error,
        };

        let Some(entity_id) = entity.effective_id() else {
            return failed(if entity.is_schema {
                "Unable to detect GTS ID in schema entity".to_owned()
            } else {
                "Unable to detect ID in instance entity. Instances must have an 'id' field \
                 (or one of the configured entity_id_fields)"
                    .to_owned()
            });
        };

        if validate && entity.is_schema {
            let mut problems = Vec::new();
            for violation in XGtsRefValidator::new().validate_schema(&entity.content, None) {
                problems.push(violation.to_string());
            }
            check_ref_targets(&entity.content, &mut problems);
            if !problems.is_empty() {
                return failed(format!("Validation failed: {}", problems.join("; ")));
            }
        }

        let schema_id = entity.schema_id.clone();
        let is_schema = entity.is_schema;
        if let Err(e) = self.store.put(entity) {
            return failed(e.to_string());
        }

        if validate
            && !is_schema
            && let Err(e) = self.store.validate_instance(&entity_id)
        {
            return failed(format!("Validation failed: {e}"));
        }

        GtsAddEntityResult {
            ok: true,
            id: entity_id,
            schema_id,
            is_schema,
            error: String::new(),
        }
    }

    #[must_use]
    pub fn add_entities(&self, items: &[Value]) -> GtsAddEntitiesResult {
        let results: Vec<GtsAddEntityResult> =
            items.iter().map(|it| self.add_entity(it, false)).collect();
        let ok = results.iter().all(|r| r.ok);
        GtsAddEntitiesResult { ok, results }
    }

    #[must_use]
    pub fn add_schema(&self, type_id: String, schema: &Value) -> GtsAddSchemaResult {
        match self.store.put_schema(&type_id, schema) {
            Ok(()) => GtsAddSchemaResult {
                ok: true,
                id: type_id,
                error: String::new(),
            },
            Err(e) => GtsAddSchemaResult {
                ok: false,
                id: String::new(),
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn validate_id(&self, gts_id: &str) -> GtsIdValidationResult {
        let parsed = if gts_id.contains('*') {
            GtsWildcard::new(gts_id).map(|p| (p.segments, true)).map_err(|e| e.to_string())
        } else {
            GtsID::new(gts_id).map(|p| (p.segments, false)).map_err(|e| e.to_string())
        };

        match parsed {
            Ok((segments, is_wildcard)) => GtsIdValidationResult {
                id: gts_id.to_owned(),
                valid: true,
                is_schema: segments.last().is_some_and(|s| s.is_type),
                is_wildcard,
                error: String::new(),
            },
            Err(error) => GtsIdValidationResult {
                id: gts_id.to_owned(),
                valid: false,
                is_schema: false,
                is_wildcard: false,
                error,
            },
        }
    }

    #[must_use]
    pub fn parse_id(&self, gts_id: &str) -> GtsIdParseResult {
        let parsed = if gts_id.contains('*') {
            GtsWildcard::new(gts_id).map(|p| (p.segments, true)).map_err(|e| e.to_string())
        } else {
            GtsID::new(gts_id).map(|p| (p.segments, false)).map_err(|e| e.to_string())
        };

        match parsed {
            Ok((segments, is_wildcard)) => GtsIdParseResult {
                id: gts_id.to_owned(),
                ok: true,
                is_schema: segments.last().is_some_and(|s| s.is_type),
                is_wildcard,
                segments: segments.iter().map(GtsIdSegmentInfo::from).collect(),
                error: String::new(),
            },
            Err(error) => GtsIdParseResult {
                id: gts_id.to_owned(),
                ok: false,
                is_schema: false,
                is_wildcard: false,
                segments: Vec::new(),
                error,
            },
        }
    }

    /// Pattern matching never reports a mismatch as an error; only malformed
    /// inputs populate `error`.
    #[must_use]
    pub fn match_id_pattern(&self, candidate: &str, pattern: &str) -> GtsIdMatchResult {
        match (GtsID::new(candidate), GtsWildcard::new(pattern)) {
            (Ok(c), Ok(p)) => GtsIdMatchResult {
                candidate: candidate.to_owned(),
                pattern: pattern.to_owned(),
                is_match: c.wildcard_match(&p),
                error: String::new(),
            },
            (Err(e), _) | (_, Err(e)) => GtsIdMatchResult {
                candidate: candidate.to_owned(),
                pattern: pattern.to_owned(),
                is_match: false,
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn uuid(&self, gts_id: &str) -> GtsUuidResult {
        match GtsID::new(gts_id) {
            Ok(g) => GtsUuidResult {
                id: g.id.clone(),
                uuid: g.to_uuid().to_string(),
            },
            Err(_) => GtsUuidResult {
                id: gts_id.to_owned(),
                uuid: String::new(),
            },
        }
    }

    #[must_use]
    pub fn validate_instance(&self, gts_id: &str) -> GtsValidationResult {
        match self.store.validate_instance(gts_id) {
            Ok(()) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: true,
                error: String::new(),
            },
            Err(e) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: false,
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn validate_schema(&self, gts_id: &str) -> GtsValidationResult {
        match self.store.validate_schema(gts_id) {
            Ok(()) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: true,
                error: String::new(),
            },
            Err(e) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: false,
                error: e.to_string(),
            },
        }
    }

    /// Dispatch on the id shape: type ids validate as schemas, everything
    /// else as an instance.
    #[must_use]
    pub fn validate_entity(&self, gts_id: &str) -> GtsEntityValidationResult {
        let (result, entity_type) = if gts_id.ends_with('~') {
            (self.validate_schema(gts_id), "schema")
        } else {
            (self.validate_instance(gts_id), "instance")
        };
        GtsEntityValidationResult {
            id: result.id,
            ok: result.ok,
            entity_type: entity_type.to_owned(),
            error: result.error,
        }
    }

    #[must_use]
    pub fn schema_graph(&self, gts_id: &str) -> GtsSchemaGraphResult {
        GtsSchemaGraphResult {
            graph: self.store.build_schema_graph(gts_id),
        }
    }

    #[must_use]
    pub fn compatibility(&self, old_schema_id: &str, new_schema_id: &str) -> GtsEntityCastResult {
        self.store.is_minor_compatible(old_schema_id, new_schema_id)
    }

    #[must_use]
    pub fn cast(&self, from_id: &str, to_schema_id: &str) -> GtsEntityCastResult {
        match self.store.cast(from_id, to_schema_id) {
            Ok(result) => result,
            Err(e) => GtsEntityCastResult::failed(from_id, to_schema_id, e.to_string()),
        }
    }

    #[must_use]
    pub fn query(&self, expr: &str, limit: usize) -> GtsStoreQueryResult {
        self.store.query(expr, limit)
    }

    #[must_use]
    pub fn attr(&self, gts_with_path: &str) -> JsonPathResolver {
        match GtsID::split_at_path(gts_with_path) {
            Ok((gts, Some(path))) => match self.store.get(&gts) {
                Some(entity) => entity.resolve_path(&path),
                None => JsonPathResolver::new(gts.clone(), Value::Null)
                    .failure(&path, &format!("Entity not found: {gts}")),
            },
            Ok((gts, None)) => JsonPathResolver::new(gts, Value::Null)
                .failure("", "Attribute selector requires '@path' in the identifier"),
            Err(e) => JsonPathResolver::new(String::new(), Value::Null).failure("", &e.to_string()),
        }
    }

    #[must_use]
    pub fn extract_id(&self, content: &Value) -> GtsExtractIdResult {
        let entity = GtsEntity::from_value(content, &self.cfg);
        GtsExtractIdResult {
            id: entity.effective_id().unwrap_or_default(),
            schema_id: entity.schema_id,
            selected_entity_field: entity.selected_entity_field,
            selected_schema_id_field: entity.selected_schema_id_field,
            is_schema: entity.is_schema,
        }
    }

    #[must_use]
    pub fn get_entity(&self, gts_id: &str) -> GtsGetEntityResult {
        match self.store.get(gts_id) {
            Some(entity) => GtsGetEntityResult {
                ok: true,
                id: entity.effective_id().unwrap_or_else(|| gts_id.to_owned()),
                schema_id: entity.schema_id.clone(),
                is_schema: entity.is_schema,
                content: Some(entity.content),
                error: String::new(),
            },
            None => GtsGetEntityResult {
                ok: false,
                id: String::new(),
                schema_id: None,
                is_schema: false,
                content: None,
                error: format!("Entity '{gts_id}' not found"),
            },
        }
    }

    #[must_use]
    pub fn get_entities(&self, limit: usize) -> GtsEntitiesListResult {
        let snapshot = self.store.snapshot();
        let total = snapshot.len();

        let entities: Vec<GtsEntityInfo> = snapshot
            .iter()
            .take(limit)
            .map(|(entity_id, entity)| GtsEntityInfo {
                id: entity_id.clone(),
                schema_id: entity.schema_id.clone(),
                is_schema: entity.is_schema,
            })
            .collect();

        let count = entities.len();
        GtsEntitiesListResult {
            entities,
            count,
            total,
        }
    }

    #[must_use]
    pub fn list(&self, limit: usize) -> GtsEntitiesListResult {
        self.get_entities(limit)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops() -> GtsOps {
        GtsOps::new(None, None, 0)
    }

    #[test]
    fn test_validate_id_type() {
        let result = ops().validate_id("gts.x.pkg.ns.type.v1~");
        assert!(result.valid);
        assert!(result.is_schema);
        assert!(!result.is_wildcard);
        assert!(result.error.is_empty());
    }

    #[test]
    fn test_validate_id_instance() {
        let result = ops().validate_id("gts.x.pkg.ns.type.v1~a.b.c.d.v1.0");
        assert!(result.valid);
        assert!(!result.is_schema);
    }

    #[test]
    fn test_validate_id_wildcard() {
        let result = ops().validate_id("gts.x.pkg.ns.*");
        assert!(result.valid);
        assert!(result.is_wildcard);
    }

    #[test]
    fn test_validate_id_rejections() {
        let o = ops();
        for bad in [
            "GTS.x.pkg.ns.type.v1~",
            "gts.X.pkg.ns.type.v1~",
            "x.pkg.ns.type.v1~",
            "gts.x.pkg.ns.type.1~",
            "gts.x.pkg.ns.type.v1.2.3~",
            "gts.x.pkg.ns.type.v01~",
            "gts.x.pkg.ns.type.v1.01~",
            "gts.1x.pkg.ns.type.v1~",
            "gts.x.pk-g.ns.type.v1~",
            "gts.x..ns.type.v1~",
            "gts.x.pkg.ns.type.v1.0~~",
            "gts.x.pkg.ns.type.v1.0",
            "gts.x.pkg.ns.v1~",
        ] {
            let result = o.validate_id(bad);
            assert!(!result.valid, "{bad} should be invalid");
            assert!(!result.error.is_empty(), "{bad} should carry an error");
        }
    }

    #[test]
    fn test_parse_id_segments() {
        let result = ops().parse_id("gts.x.test3.events.type.v1~abc.app._.custom_event.v1.2");
        assert!(result.ok);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].vendor, "x");
        assert!(result.segments[0].is_type);
        let last = result.segments.last().unwrap();
        assert!(!last.is_type);
        assert_eq!(last.ver_minor, Some(2));
    }

    #[test]
    fn test_parse_id_type_has_no_minor() {
        let result = ops().parse_id("gts.x.test3.events.type.v1~");
        assert!(result.ok);
        assert!(result.is_schema);
        let last = result.segments.last().unwrap();
        assert!(last.is_type);
        assert_eq!(last.ver_minor, None);
    }

    #[test]
    fn test_parse_id_version_zero() {
        let result = ops().parse_id("gts.x.pkg.ns.type.v0~");
        assert!(result.ok);
        assert_eq!(result.segments[0].ver_major, Some(0));
        assert_eq!(result.segments[0].ver_minor, None);
    }

    #[test]
    fn test_parse_id_invalid() {
        let result = ops().parse_id("invalid");
        assert!(!result.ok);
        assert!(result.segments.is_empty());
        assert!(!result.error.is_empty());
    }

    #[test]
    fn test_match_id_pattern() {
        let o = ops();
        assert!(o.match_id_pattern("gts.x.pkg.ns.type.v1.0~a.b.c.d.v1.0", "gts.x.pkg.*").is_match);
        assert!(!o.match_id_pattern("gts.y.pkg.ns.type.v1~", "gts.x.pkg.*").is_match);

        let invalid_candidate = o.match_id_pattern("nope", "gts.x.pkg.*");
        assert!(!invalid_candidate.is_match);
        assert!(!invalid_candidate.error.is_empty());

        let invalid_pattern = o.match_id_pattern("gts.x.pkg.ns.type.v1~", "gts.*.pkg.*");
        assert!(!invalid_pattern.is_match);
        assert!(!invalid_pattern.error.is_empty());
    }

    #[test]
    fn test_uuid_deterministic() {
        let o = ops();
        let one = o.uuid("gts.x.test5.events.type.v1~");
        let two = o.uuid("gts.x.test5.events.type.v1~");
        assert_eq!(one.uuid, two.uuid);
        assert!(!one.uuid.is_empty());

        let other = o.uuid("gts.x.test5.events.type.v2~");
        assert_ne!(one.uuid, other.uuid);
    }

    #[test]
    fn test_uuid_invalid_id_is_empty() {
        let result = ops().uuid("not-an-id");
        assert!(result.uuid.is_empty());
    }

    #[test]
    fn test_extract_id_schema() {
        let result = ops().extract_id(&json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$id": "gts://gts.x.core.events.type.v1~",
            "type": "object"
        }));
        assert!(result.is_schema);
        assert_eq!(result.id, "gts.x.core.events.type.v1~");
        assert_eq!(
            result.schema_id.as_deref(),
            Some("http://json-schema.org/draft-07/schema#")
        );
    }

    #[test]
    fn test_extract_id_chained_instance() {
        let result = ops().extract_id(&json!({
            "id": "gts.x.test2.events.type.v1~abc.app._.custom_event.v1.2"
        }));
        assert_eq!(result.id, "gts.x.test2.events.type.v1~abc.app._.custom_event.v1.2");
        assert_eq!(result.schema_id.as_deref(), Some("gts.x.test2.events.type.v1~"));
        assert_eq!(result.selected_entity_field.as_deref(), Some("id"));
        assert_eq!(result.selected_schema_id_field.as_deref(), Some("id"));
        assert!(!result.is_schema);
    }

    #[test]
    fn test_add_entity_and_get() {
        let o = ops();
        let added = o.add_entity(
            &json!({"id": "gts.x.ops.reg.item.v1~a.b.c.d.v1.0", "name": "one"}),
            false,
        );
        assert!(added.ok);
        assert_eq!(added.id, "gts.x.ops.reg.item.v1~a.b.c.d.v1.0");

        let fetched = o.get_entity("gts.x.ops.reg.item.v1~a.b.c.d.v1.0");
        assert!(fetched.ok);
        assert_eq!(fetched.content.unwrap()["name"], json!("one"));

        let missing = o.get_entity("gts.x.ops.reg.item.v1~a.b.c.d.v9.9");
        assert!(!missing.ok);
        assert!(!missing.error.is_empty());
    }

    #[test]
    fn test_add_entity_without_id_fails() {
        let result = ops().add_entity(&json!({"name": "nobody"}), false);
        assert!(!result.ok);
        assert!(result.error.contains("id"));
    }

    #[test]
    fn test_add_entity_validation_rejects_bad_refs() {
        let o = ops();
        let bad_ref = o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.badref.plain.v1~",
                "type": "object",
                "allOf": [{"$ref": "gts.x.ops.badref.plain.v1~"}]
            }),
            true,
        );
        assert!(!bad_ref.ok, "plain gts. $ref must be rejected");

        let wildcard_ref = o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.badref.wild.v1~",
                "type": "object",
                "allOf": [{"$ref": "gts://gts.x.ops.badref.*"}]
            }),
            true,
        );
        assert!(!wildcard_ref.ok, "wildcard $ref must be rejected");

        let external_ref = o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.badref.ext.v1~",
                "type": "object",
                "allOf": [{"$ref": "https://example.com/schema.json"}]
            }),
            true,
        );
        assert!(!external_ref.ok, "non-GTS external $ref must be rejected");

        let local_ref = o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.badref.local.v1~",
                "type": "object",
                "$defs": {"s": {"type": "string"}},
                "properties": {"name": {"$ref": "#/$defs/s"}}
            }),
            true,
        );
        assert!(local_ref.ok, "local $ref is fine");
    }

    #[test]
    fn test_add_entity_validation_rejects_bad_x_gts_ref() {
        let result = ops().add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.badxref.t.v1~",
                "type": "object",
                "properties": {
                    "link": {"type": "string", "x-gts-ref": "http://not-gts"}
                }
            }),
            true,
        );
        assert!(!result.ok);
    }

    #[test]
    fn test_add_entity_deferred_without_validation_flag() {
        // The same dangling linkage is accepted when validation is off; the
        // failure surfaces from validate-schema instead.
        let o = ops();
        let added = o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.defer.t.v1~",
                "type": "object",
                "allOf": [{"$ref": "gts://gts.x.ops.defer.missing.v1~"}]
            }),
            false,
        );
        assert!(added.ok);

        let validated = o.validate_schema("gts.x.ops.defer.t.v1~");
        assert!(!validated.ok);
    }

    #[test]
    fn test_add_entities_bulk() {
        let o = ops();
        let result = o.add_entities(&[
            json!({"id": "gts.x.ops.bulk.item.v1~a.b.c.d.v1.0"}),
            json!({"id": "gts.x.ops.bulk.item.v1~a.b.c.d.v1.1"}),
            json!({"no_id": true}),
        ]);
        assert!(!result.ok);
        assert_eq!(result.results.len(), 3);
        assert!(result.results[0].ok && result.results[1].ok && !result.results[2].ok);
    }

    #[test]
    fn test_validate_entity_dispatch() {
        let o = ops();
        o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.dispatch.t.v1~",
                "type": "object",
                "properties": {"name": {"type": "string"}}
            }),
            false,
        );
        o.add_entity(
            &json!({"id": "gts.x.ops.dispatch.t.v1~a.b.c.d.v1.0", "name": "n"}),
            false,
        );

        let schema = o.validate_entity("gts.x.ops.dispatch.t.v1~");
        assert_eq!(schema.entity_type, "schema");
        assert!(schema.ok);

        let instance = o.validate_entity("gts.x.ops.dispatch.t.v1~a.b.c.d.v1.0");
        assert_eq!(instance.entity_type, "instance");
        assert!(instance.ok);
    }

    #[test]
    fn test_validate_entity_not_found() {
        let result = ops().validate_entity("gts.x.ops.ghost.t.v1~a.b.c.d.v1.0");
        assert!(!result.ok);
        assert!(!result.error.is_empty());
    }

    #[test]
    fn test_attr_access() {
        let o = ops();
        o.add_entity(
            &json!({
                "id": "gts.x.ops.attr.t.v1~a.b.c.d.v1.0",
                "user": {"profile": {"name": "John"}},
                "items": [{"sku": "SKU-001"}, {"sku": "SKU-002"}]
            }),
            false,
        );

        let nested = o.attr("gts.x.ops.attr.t.v1~a.b.c.d.v1.0@user.profile.name");
        assert!(nested.resolved);
        assert_eq!(nested.value, Some(json!("John")));

        let indexed = o.attr("gts.x.ops.attr.t.v1~a.b.c.d.v1.0@items[1].sku");
        assert!(indexed.resolved);
        assert_eq!(indexed.value, Some(json!("SKU-002")));

        let missing_field = o.attr("gts.x.ops.attr.t.v1~a.b.c.d.v1.0@nope");
        assert!(!missing_field.resolved);

        let no_at = o.attr("gts.x.ops.attr.t.v1~a.b.c.d.v1.0");
        assert!(!no_at.resolved);

        let unknown = o.attr("gts.x.ops.attr.t.v1~a.b.c.d.v9.9@user");
        assert!(!unknown.resolved);
    }

    #[test]
    fn test_list_with_limit() {
        let o = ops();
        for i in 0..5 {
            o.add_entity(
                &json!({"id": format!("gts.x.ops.list.item.v1~a.b.c.d.v1.{i}")}),
                false,
            );
        }
        let limited = o.list(2);
        assert_eq!(limited.entities.len(), 2);
        assert_eq!(limited.count, 2);
        assert_eq!(limited.total, 5);
    }

    #[test]
    fn test_query_through_ops() {
        let o = ops();
        o.add_entity(
            &json!({"id": "gts.x.ops.query.item.v1~a.b.c.d.v1.0", "status": "active"}),
            false,
        );
        let result = o.query("gts.x.ops.query.*", 10);
        assert_eq!(result.count, 1);

        let empty = o.query("gts.x.ops.other.*", 10);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_compatibility_through_ops() {
        let o = ops();
        o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.compat.t.v1.0~",
                "type": "object",
                "required": ["eventId"],
                "properties": {"eventId": {"type": "string"}}
            }),
            false,
        );
        o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.compat.t.v1.1~",
                "type": "object",
                "required": ["eventId"],
                "properties": {
                    "eventId": {"type": "string"},
                    "metadata": {"type": "object", "default": {}}
                }
            }),
            false,
        );

        let result = o.compatibility("gts.x.ops.compat.t.v1.0~", "gts.x.ops.compat.t.v1.1~");
        assert_eq!(result.old, "gts.x.ops.compat.t.v1.0~");
        assert_eq!(result.new, "gts.x.ops.compat.t.v1.1~");
        assert!(result.is_backward_compatible);
    }

    #[test]
    fn test_cast_through_ops_error_shape() {
        let result = ops().cast("gts.x.ops.none.t.v1~a.b.c.d.v1.0", "gts.x.ops.none.t.v1~");
        assert!(result.error.is_some());
        assert!(result.casted_entity.is_none());
    }

    #[test]
    fn test_schema_graph_through_ops() {
        let o = ops();
        o.add_entity(
            &json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "gts://gts.x.ops.graph.t.v1~",
                "type": "object"
            }),
            false,
        );
        let result = o.schema_graph("gts.x.ops.graph.t.v1~");
        assert_eq!(result.graph["id"], json!("gts.x.ops.graph.t.v1~"));
    }
}
