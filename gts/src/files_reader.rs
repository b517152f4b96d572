use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::entities::{GtsConfig, GtsEntity, GtsFile};
use crate::store::GtsReader;

const EXCLUDE_DIRS: &[&str] = &["node_modules", "dist", "build"];
const VALID_EXTENSIONS: &[&str] = &["json", "jsonc", "gts", "yaml", "yml"];

/// Seeds the store from JSON/YAML files on disk. A file holding a top-level
/// array contributes one entity per element.
pub struct GtsFileReader {
    paths: Vec<PathBuf>,
    cfg: GtsConfig,
    files: Vec<PathBuf>,
    initialized: bool,
}

impl GtsFileReader {
    #[must_use]
    pub fn new(paths: &[String], cfg: Option<GtsConfig>) -> Self {
        let paths = paths
            .iter()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
            .collect();

        GtsFileReader {
            paths,
            cfg: cfg.unwrap_or_default(),
            files: Vec::new(),
            initialized: false,
        }
    }

    fn has_valid_extension(path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| VALID_EXTENSIONS.contains(&ext.as_str()))
    }

    fn collect_files(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let mut collected = Vec::new();

        for path in &self.paths {
            let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());

            if resolved.is_file() {
                if Self::has_valid_extension(&resolved)
                    && seen.insert(resolved.to_string_lossy().to_string())
                {
                    tracing::debug!("- discovered file: {}", resolved.display());
                    collected.push(resolved);
                }
                continue;
            }

            for entry in WalkDir::new(&resolved).follow_links(true).into_iter().flatten() {
                let entry_path = entry.path();
                if entry_path.is_dir()
                    && let Some(name) = entry_path.file_name()
                    && EXCLUDE_DIRS.contains(&name.to_string_lossy().as_ref())
                {
                    continue;
                }
                if entry_path.is_file() && Self::has_valid_extension(entry_path) {
                    let canonical = entry_path
                        .canonicalize()
                        .unwrap_or_else(|_| entry_path.to_path_buf());
                    if seen.insert(canonical.to_string_lossy().to_string()) {
                        tracing::debug!("- discovered file: {}", canonical.display());
                        collected.push(canonical);
                    }
                }
            }
        }

        self.files = collected;
    }

    fn load_document(file_path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(file_path)?;
        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let value: Value = match extension.as_str() {
            "yaml" | "yml" => serde_saphyr::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(value)
    }

    fn process_file(&self, file_path: &Path) -> Vec<GtsEntity> {
        let content = match Self::load_document(file_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Failed to parse file {}: {e}", file_path.display());
                return Vec::new();
            }
        };

        let file = GtsFile::new(
            file_path.to_string_lossy().to_string(),
            file_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            content.clone(),
        );

        let items: Vec<(Option<usize>, &Value)> = match content.as_array() {
            Some(arr) => arr.iter().enumerate().map(|(i, v)| (Some(i), v)).collect(),
            None => vec![(None, &content)],
        };

        let mut entities = Vec::new();
        for (sequence, item) in items {
            let entity = GtsEntity::from_value(item, &self.cfg).with_file(file.clone(), sequence);
            if let Some(id) = entity.gts_id.as_ref().map(|g| g.id.clone()) {
                tracing::debug!("- discovered entity: {id}");
                entities.push(entity);
            } else if entity.instance_id.is_some() {
                entities.push(entity);
            } else {
                tracing::debug!(
                    "- skipped entity from {} (no usable id)",
                    file_path.display()
                );
            }
        }
        entities
    }
}

impl GtsReader for GtsFileReader {
    fn iter(&mut self) -> Box<dyn Iterator<Item = GtsEntity> + '_> {
        if !self.initialized {
            self.collect_files();
            self.initialized = true;
        }

        tracing::debug!("Processing {} files from {:?}", self.files.len(), self.paths);

        let entities: Vec<GtsEntity> = self
            .files
            .iter()
            .flat_map(|file_path| self.process_file(file_path))
            .collect();

        Box::new(entities.into_iter())
    }

    fn read_by_id(&self, _entity_id: &str) -> Option<GtsEntity> {
        // File-backed seeding has no random access by id.
        None
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}
