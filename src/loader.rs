//! Schema sources: where OpenAPI documents come from.
//!
//! A [`SchemaSource`] returns a [`SchemaSet`] mapping stable identifiers to raw
//! document text. Local directory trees are handled here; GitHub repositories
//! live in [`crate::github`] behind the `remote` feature.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LoadError;
use crate::types::SchemaSet;

/// File extensions recognised as OpenAPI documents.
pub const SCHEMA_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Something that can produce the schema corpus.
///
/// Implementations must be idempotent: the engine calls `load_schemas` once,
/// but calling it again must not change what it returns.
pub trait SchemaSource {
    /// Load every document this source knows about.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when documents exist but cannot be acquired.
    fn load_schemas(&self) -> Result<SchemaSet, LoadError>;
}

impl<S: SchemaSource + ?Sized> SchemaSource for Box<S> {
    fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
        (**self).load_schemas()
    }
}

/// An in-memory set of documents is itself a source.
impl SchemaSource for SchemaSet {
    fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
        Ok(self.clone())
    }
}

/// Check whether a file name has an OpenAPI document extension.
pub fn is_schema_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SCHEMA_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Loads `.yaml` / `.yml` files from local directory trees.
///
/// Roots that do not exist are skipped, so a configuration may list optional
/// locations. Identifiers are absolute file paths.
#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    roots: Vec<PathBuf>,
}

impl LocalSource {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl SchemaSource for LocalSource {
    fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
        let mut schemas = SchemaSet::new();

        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "schema directory does not exist, skipping");
                continue;
            }

            for file in collect_schema_files(root) {
                let content = std::fs::read_to_string(&file).map_err(|source| LoadError::Read {
                    path: file.clone(),
                    source,
                })?;
                let identifier = file.canonicalize().unwrap_or(file);
                debug!(schema = %identifier.display(), "loaded local schema");
                schemas.insert(identifier.display().to_string(), content);
            }
        }

        Ok(schemas)
    }
}

/// Collect all schema files under a directory, sorted for a stable load order.
fn collect_schema_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files_recursive(dir, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if is_schema_file(&path) {
            files.push(path);
        }
    }
}

/// Merges several sources in order; later sources override earlier ones.
#[derive(Default)]
pub struct CompositeSource {
    sources: Vec<Box<dyn SchemaSource>>,
}

impl CompositeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source. It overrides every source added before it.
    pub fn with(mut self, source: impl SchemaSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn push(&mut self, source: Box<dyn SchemaSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SchemaSource for CompositeSource {
    fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
        let mut schemas = SchemaSet::new();
        for source in &self.sources {
            schemas.extend(source.load_schemas()?);
        }
        Ok(schemas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn is_schema_file_extensions() {
        assert!(is_schema_file(Path::new("api.yaml")));
        assert!(is_schema_file(Path::new("nested/api.yml")));
        assert!(!is_schema_file(Path::new("api.json")));
        assert!(!is_schema_file(Path::new("README")));
    }

    #[test]
    fn local_source_recurses_and_filters() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("a.yaml"), "openapi: 3.0.0").unwrap();
        fs::write(dir.path().join("nested/b.yml"), "openapi: 3.1.0").unwrap();
        fs::write(dir.path().join("nested/deeper/c.yaml"), "openapi: 3.0.3").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let schemas = LocalSource::new([dir.path()]).load_schemas().unwrap();
        assert_eq!(schemas.len(), 3);
        assert!(schemas.identifiers().all(|id| Path::new(id).is_absolute()));
        assert!(schemas.iter().any(|(_, text)| text == "openapi: 3.1.0"));
        assert!(!schemas.identifiers().any(|id| id.ends_with("notes.txt")));
    }

    #[test]
    fn local_source_skips_missing_roots() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("api.yaml"), "openapi: 3.0.0").unwrap();

        let source = LocalSource::new([dir.path().join("missing"), dir.path().to_path_buf()]);
        let schemas = source.load_schemas().unwrap();
        assert_eq!(schemas.len(), 1);
    }

    #[test]
    fn local_source_with_no_roots_is_empty() {
        let schemas = LocalSource::default().load_schemas().unwrap();
        assert!(schemas.is_empty());
    }

    #[test]
    fn composite_later_source_overrides() {
        let first: SchemaSet = [("shared", "A"), ("only-first", "1")].into_iter().collect();
        let second: SchemaSet = [("shared", "B")].into_iter().collect();

        let schemas = CompositeSource::new()
            .with(first)
            .with(second)
            .load_schemas()
            .unwrap();

        assert_eq!(schemas.get("shared"), Some("B"));
        assert_eq!(schemas.get("only-first"), Some("1"));
    }

    struct Failing;

    impl SchemaSource for Failing {
        fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
            Err(LoadError::NoSchemasFound)
        }
    }

    #[test]
    fn composite_propagates_child_errors() {
        let source = CompositeSource::new()
            .with(SchemaSet::new())
            .with(Failing);
        assert!(matches!(
            source.load_schemas(),
            Err(LoadError::NoSchemasFound)
        ));
    }
}
