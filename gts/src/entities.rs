use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::id::{GtsID, strip_uri_prefix};
use crate::path_resolver::JsonPathResolver;

/// Field-scan configuration for id extraction.
///
/// Order matters: the first present field wins. The defaults follow the
/// registry contract; a `gts.config.json` file can override both lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsConfig {
    pub entity_id_fields: Vec<String>,
    pub schema_id_fields: Vec<String>,
}

impl Default for GtsConfig {
    fn default() -> Self {
        GtsConfig {
            entity_id_fields: ["id", "gts_id", "gtsId", "$id", "$$id"]
                .map(str::to_owned)
                .to_vec(),
            schema_id_fields: ["type", "gtsTid", "gtsType", "schema"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

/// A source file an entity was loaded from. A top-level JSON array counts as
/// a sequence of entities, one per element.
#[derive(Debug, Clone)]
pub struct GtsFile {
    pub path: String,
    pub name: String,
    pub content: Value,
    pub sequences_count: usize,
}

impl GtsFile {
    #[must_use]
    pub fn new(path: String, name: String, content: Value) -> Self {
        let sequences_count = content.as_array().map_or(1, Vec::len);
        GtsFile {
            path,
            name,
            content,
            sequences_count,
        }
    }
}

/// A GTS identifier referenced somewhere inside an entity document, with the
/// dotted path of the referencing position.
#[derive(Debug, Clone)]
pub struct GtsRef {
    pub id: String,
    pub source_path: String,
}

/// A classified entity document: either a schema (`$schema` present) or an
/// instance, with its extracted identifiers.
#[derive(Debug, Clone)]
pub struct GtsEntity {
    /// The GTS id, when the entity has a well-formed one (`$id` for schemas,
    /// `id` & co. for instances). `None` for anonymous instances.
    pub gts_id: Option<GtsID>,
    /// The id the entity is stored under: the GTS id for schemas and
    /// well-known instances, the raw (UUID or other) id for anonymous ones.
    pub instance_id: Option<String>,
    /// `$schema` presence is the one and only schema marker.
    pub is_schema: bool,
    pub file: Option<GtsFile>,
    pub list_sequence: Option<usize>,
    pub label: String,
    pub content: Value,
    /// The parent this entity conforms to: the chain prefix for chained ids,
    /// else the explicit type field (instances) or the `$schema` value
    /// (schemas).
    pub schema_id: Option<String>,
    pub selected_entity_field: Option<String>,
    pub selected_schema_id_field: Option<String>,
    pub description: String,
    /// Every valid GTS id string found anywhere in the document.
    pub gts_refs: Vec<GtsRef>,
    /// `$ref` values (with `gts://` stripped), schemas only.
    pub schema_refs: Vec<GtsRef>,
}

impl GtsEntity {
    /// Classify a document and extract its identifiers.
    #[must_use]
    pub fn from_value(content: &Value, cfg: &GtsConfig) -> Self {
        let mut entity = GtsEntity {
            gts_id: None,
            instance_id: None,
            is_schema: has_schema_marker(content),
            file: None,
            list_sequence: None,
            label: String::new(),
            content: content.clone(),
            schema_id: None,
            selected_entity_field: None,
            selected_schema_id_field: None,
            description: String::new(),
            gts_refs: Vec::new(),
            schema_refs: Vec::new(),
        };

        if entity.is_schema {
            entity.extract_schema_ids();
        } else {
            entity.extract_instance_ids(cfg);
        }

        if let Some(desc) = content.get("description").and_then(Value::as_str) {
            desc.clone_into(&mut entity.description);
        }

        entity.gts_refs = collect_gts_refs(content);
        if entity.is_schema {
            entity.schema_refs = collect_schema_refs(content);
        }
        entity.refresh_label();

        entity
    }

    /// Wrap a schema document registered under an explicit type id.
    #[must_use]
    pub fn from_schema(gts_id: GtsID, content: &Value) -> Self {
        let mut entity = GtsEntity {
            instance_id: Some(gts_id.id.clone()),
            gts_id: Some(gts_id),
            is_schema: true,
            file: None,
            list_sequence: None,
            label: String::new(),
            content: content.clone(),
            schema_id: None,
            selected_entity_field: None,
            selected_schema_id_field: None,
            description: String::new(),
            gts_refs: collect_gts_refs(content),
            schema_refs: collect_schema_refs(content),
        };
        entity.schema_id = entity.gts_id.as_ref().and_then(GtsID::type_prefix);
        entity.refresh_label();
        entity
    }

    /// Attach the source file an entity was loaded from.
    #[must_use]
    pub fn with_file(mut self, file: GtsFile, list_sequence: Option<usize>) -> Self {
        self.file = Some(file);
        self.list_sequence = list_sequence;
        if self.instance_id.is_none()
            && let Some(ref file) = self.file
        {
            self.instance_id = Some(match list_sequence {
                Some(seq) => format!("{}#{}", file.path, seq),
                None => file.path.clone(),
            });
        }
        self.refresh_label();
        self
    }

    fn refresh_label(&mut self) {
        if let Some(ref file) = self.file {
            self.label = match self.list_sequence {
                Some(seq) => format!("{}#{seq}", file.name),
                None => file.name.clone(),
            };
        } else if let Some(ref instance_id) = self.instance_id {
            self.label = instance_id.clone();
        } else if let Some(ref gts_id) = self.gts_id {
            self.label = gts_id.id.clone();
        }
    }

    /// Schemas carry their GTS id in `$id` (URI form, `gts://` stripped);
    /// their parent is the chain prefix when the id is chained, otherwise the
    /// `$schema` value itself.
    fn extract_schema_ids(&mut self) {
        for field in ["$id", "$$id"] {
            let Some(raw) = self.content.get(field).and_then(Value::as_str) else {
                continue;
            };
            let normalized = strip_uri_prefix(raw.trim());
            if let Ok(gts_id) = GtsID::new(normalized) {
                self.instance_id = Some(gts_id.id.clone());
                self.gts_id = Some(gts_id);
                self.selected_entity_field = Some(field.to_owned());
                break;
            }
        }

        if let Some(schema_val) = self.content.get("$schema").and_then(Value::as_str) {
            self.schema_id = Some(schema_val.to_owned());
            self.selected_schema_id_field = Some("$schema".to_owned());
        }

        // A chained $id overrides the $schema value as the parent.
        if let Some(parent) = self.gts_id.as_ref().and_then(GtsID::type_prefix) {
            self.schema_id = Some(parent);
        }
    }

    /// Instances come in two flavours: well-known (the id field is a GTS id,
    /// its chain prefix names the parent type) and anonymous (UUID or other
    /// opaque id, parent from an explicit type field). Chain priority is
    /// absolute: an explicit type field never overrides a chained id.
    fn extract_instance_ids(&mut self, cfg: &GtsConfig) {
        if !self.content.is_object() {
            return;
        }

        for field in &cfg.entity_id_fields {
            let Some(raw) = self.content.get(field).and_then(Value::as_str) else {
                continue;
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let normalized = if field == "$id" || field == "$$id" {
                strip_uri_prefix(trimmed)
            } else {
                trimmed
            };

            self.selected_entity_field = Some(field.clone());
            if let Ok(gts_id) = GtsID::new(normalized) {
                self.instance_id = Some(gts_id.id.clone());
                if let Some(parent) = gts_id.type_prefix() {
                    self.schema_id = Some(parent);
                    self.selected_schema_id_field = Some(field.clone());
                }
                self.gts_id = Some(gts_id);
            } else {
                // Anonymous instance: keep the raw id, no GTS identity.
                self.instance_id = Some(normalized.to_owned());
            }
            break;
        }

        if self.schema_id.is_none() {
            for field in &cfg.schema_id_fields {
                let Some(raw) = self.content.get(field).and_then(Value::as_str) else {
                    continue;
                };
                let trimmed = raw.trim();
                if GtsID::is_valid(trimmed) && trimmed.ends_with('~') {
                    self.schema_id = Some(trimmed.to_owned());
                    self.selected_schema_id_field = Some(field.clone());
                    break;
                }
            }
        }
    }

    /// The id this entity is stored and addressed under.
    #[must_use]
    pub fn effective_id(&self) -> Option<String> {
        if let Some(ref gts_id) = self.gts_id {
            return Some(gts_id.id.clone());
        }
        self.instance_id.clone()
    }

    /// Resolve a dotted attribute path inside this entity's content.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> JsonPathResolver {
        let gts_id = self
            .gts_id
            .as_ref()
            .map(|g| g.id.clone())
            .unwrap_or_default();
        JsonPathResolver::new(gts_id, self.content.clone()).resolve(path)
    }
}

fn has_schema_marker(content: &Value) -> bool {
    content
        .get("$schema")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

fn walk_values<F>(node: &Value, path: &str, visit: &mut F)
where
    F: FnMut(&Value, &str),
{
    visit(node, path);
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                let next = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk_values(value, &next, visit);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                walk_values(item, &format!("{path}[{idx}]"), visit);
            }
        }
        _ => {}
    }
}

fn dedup_refs(refs: Vec<GtsRef>) -> Vec<GtsRef> {
    let mut seen = HashMap::new();
    let mut out = Vec::new();
    for r in refs {
        let key = format!("{}|{}", r.id, r.source_path);
        if let std::collections::hash_map::Entry::Vacant(e) = seen.entry(key) {
            e.insert(());
            out.push(r);
        }
    }
    out
}

fn collect_gts_refs(content: &Value) -> Vec<GtsRef> {
    let mut found = Vec::new();
    walk_values(content, "", &mut |node, path| {
        if let Some(s) = node.as_str()
            && GtsID::is_valid(s)
        {
            found.push(GtsRef {
                id: s.to_owned(),
                source_path: if path.is_empty() {
                    "root".to_owned()
                } else {
                    path.to_owned()
                },
            });
        }
    });
    dedup_refs(found)
}

fn collect_schema_refs(content: &Value) -> Vec<GtsRef> {
    let mut found = Vec::new();
    walk_values(content, "", &mut |node, path| {
        if let Some(ref_str) = node
            .as_object()
            .and_then(|o| o.get("$ref"))
            .and_then(Value::as_str)
        {
            found.push(GtsRef {
                id: strip_uri_prefix(ref_str).to_owned(),
                source_path: if path.is_empty() {
                    "$ref".to_owned()
                } else {
                    format!("{path}.$ref")
                },
            });
        }
    });
    dedup_refs(found)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(content: Value) -> GtsEntity {
        GtsEntity::from_value(&content, &GtsConfig::default())
    }

    #[test]
    fn test_schema_marker_is_definitive() {
        let schema = entity(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object"
        }));
        assert!(schema.is_schema);

        let instance = entity(json!({
            "$id": "gts://gts.vendor.package.namespace.type.v1.0~",
            "type": "object"
        }));
        assert!(!instance.is_schema);
    }

    #[test]
    fn test_schema_id_from_dollar_id() {
        let e = entity(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$id": "gts://gts.vendor.package.namespace.type.v1.0~",
            "type": "object"
        }));
        assert!(e.is_schema);
        assert_eq!(
            e.gts_id.as_ref().unwrap().id,
            "gts.vendor.package.namespace.type.v1.0~"
        );
        assert_eq!(e.selected_entity_field.as_deref(), Some("$id"));
        // Single segment: parent stays the $schema value.
        assert_eq!(
            e.schema_id.as_deref(),
            Some("http://json-schema.org/draft-07/schema#")
        );
        assert_eq!(e.selected_schema_id_field.as_deref(), Some("$schema"));
    }

    #[test]
    fn test_chained_schema_parent_from_chain() {
        let e = entity(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$id": "gts://gts.x.core.events.type.v1~abc.app._.custom.v1~",
            "type": "object"
        }));
        assert_eq!(e.schema_id.as_deref(), Some("gts.x.core.events.type.v1~"));
    }

    #[test]
    fn test_well_known_instance_chain_priority() {
        // The chained id wins over the (different) explicit type field.
        let e = entity(json!({
            "id": "gts.acme.core.models.user.v1~acme.core.instances.user1.v1.0",
            "type": "gts.acme.core.models.product.v1~"
        }));
        assert!(!e.is_schema);
        assert_eq!(e.schema_id.as_deref(), Some("gts.acme.core.models.user.v1~"));
        assert_eq!(e.selected_entity_field.as_deref(), Some("id"));
        assert_eq!(e.selected_schema_id_field.as_deref(), Some("id"));
    }

    #[test]
    fn test_anonymous_instance_uses_type_field() {
        let e = entity(json!({
            "id": "7a1d2f34-5678-49ab-9012-abcdef123456",
            "type": "gts.x.core.events.type.v1~x.commerce.orders.order_placed.v1.0~"
        }));
        assert!(e.gts_id.is_none());
        assert_eq!(
            e.instance_id.as_deref(),
            Some("7a1d2f34-5678-49ab-9012-abcdef123456")
        );
        assert_eq!(
            e.schema_id.as_deref(),
            Some("gts.x.core.events.type.v1~x.commerce.orders.order_placed.v1.0~")
        );
        assert_eq!(e.selected_schema_id_field.as_deref(), Some("type"));
    }

    #[test]
    fn test_single_segment_instance_id_is_anonymous() {
        // Single-segment instance ids are not valid GTS ids; the raw string
        // still serves as an anonymous id and the schema comes from the
        // explicit field scan.
        let e = entity(json!({
            "id": "gts.x.test2.api.endpoint.v0.1",
            "schema": "gts.x.test2.api.endpoint.v0~"
        }));
        assert!(e.gts_id.is_none());
        assert_eq!(e.instance_id.as_deref(), Some("gts.x.test2.api.endpoint.v0.1"));
        assert_eq!(e.schema_id.as_deref(), Some("gts.x.test2.api.endpoint.v0~"));
        assert_eq!(e.selected_entity_field.as_deref(), Some("id"));
        assert_eq!(e.selected_schema_id_field.as_deref(), Some("schema"));
    }

    #[test]
    fn test_uri_prefix_only_stripped_for_dollar_id() {
        let e = entity(json!({
            "id": "gts://gts.vendor.package.namespace.type.v1~a.b.c.d.v1.0"
        }));
        assert!(e.gts_id.is_none(), "gts:// in 'id' must not be stripped");

        let e = entity(json!({
            "id": "gts:gts.vendor.package.namespace.type.v1~a.b.c.d.v1.0"
        }));
        assert!(e.gts_id.is_none(), "gts: without slashes is not the URI prefix");
    }

    #[test]
    fn test_instance_without_any_id() {
        let e = entity(json!({
            "type": "gts.vendor.package.namespace.type.v1.0~",
            "name": "test"
        }));
        assert!(e.effective_id().is_none());
        assert_eq!(
            e.schema_id.as_deref(),
            Some("gts.vendor.package.namespace.type.v1.0~")
        );
    }

    #[test]
    fn test_type_field_must_be_gts_type() {
        let e = entity(json!({
            "id": "7a1d2f34-5678-49ab-9012-abcdef123456",
            "type": "object"
        }));
        assert!(e.schema_id.is_none());
    }

    #[test]
    fn test_effective_id_prefers_gts_id() {
        let e = entity(json!({
            "id": "gts.x.core.events.type.v1~abc.app._.custom_event.v1.2"
        }));
        assert_eq!(
            e.effective_id().as_deref(),
            Some("gts.x.core.events.type.v1~abc.app._.custom_event.v1.2")
        );
    }

    #[test]
    fn test_gts_refs_collected() {
        let e = entity(json!({
            "id": "gts.x.core.events.type.v1~abc.app._.custom_event.v1.2",
            "nested": {
                "ref": "gts.x.other.ns.thing.v2~a.b.c.d.v1.0"
            }
        }));
        assert!(e.gts_refs.iter().any(|r| r.source_path == "nested.ref"));
    }

    #[test]
    fn test_schema_refs_normalized() {
        let e = entity(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$id": "gts://gts.vendor.package.namespace.type.v1.0~",
            "allOf": [
                {"$ref": "gts://gts.other.package.namespace.type.v2.0~"},
                {"$ref": "#/$defs/Base"}
            ]
        }));
        assert!(e
            .schema_refs
            .iter()
            .any(|r| r.id == "gts.other.package.namespace.type.v2.0~"));
        assert!(e.schema_refs.iter().any(|r| r.id == "#/$defs/Base"));
        assert!(!e.schema_refs.iter().any(|r| r.id.starts_with("gts://")));
    }

    #[test]
    fn test_file_label_with_sequence() {
        let file = GtsFile::new(
            "/data/events.json".to_owned(),
            "events.json".to_owned(),
            json!([{"id": "a"}, {"id": "b"}]),
        );
        assert_eq!(file.sequences_count, 2);

        let e = entity(json!({"id": "gts.a.b.c.d.v1~e.f.g.h.v1.0"})).with_file(file, Some(1));
        assert_eq!(e.label, "events.json#1");
    }

    #[test]
    fn test_description_extraction() {
        let e = entity(json!({
            "id": "gts.a.b.c.d.v1~e.f.g.h.v1.0",
            "description": "A described entity"
        }));
        assert_eq!(e.description, "A described entity");
    }

    #[test]
    fn test_config_default_scan_order() {
        let cfg = GtsConfig::default();
        assert_eq!(cfg.entity_id_fields[0], "id");
        assert_eq!(cfg.schema_id_fields[0], "type");
        assert!(cfg.entity_id_fields.contains(&"$id".to_owned()));
        assert!(cfg.schema_id_fields.contains(&"schema".to_owned()));
    }
}
