//! Declarative resource batch files.
//!
//! A batch file is a YAML multi-document (or JSON list) where every document
//! declares one desired resource: `{kind, name | metadata.name, spec}`. The
//! parser turns it into an ordered [`ResourceBatch`]; the order of documents
//! is the order the reconciler processes them in.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use crate::api::{ResourceChange, ResourceKind};
use crate::error::{ConfigError, FerroError, Result};

/// Maximum length of a resource name.
const MAX_NAME_LEN: usize = 63;

/// An ordered batch of desired resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceBatch {
    /// Desired resources in declaration order.
    pub changes: Vec<ResourceChange>,
}

impl ResourceBatch {
    /// Number of resources in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Parser for declarative resource batch files.
#[derive(Debug, Default)]
pub struct BatchParser;

impl BatchParser {
    /// Creates a new batch parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads a batch from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any document is not a
    /// valid resource declaration.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ResourceBatch> {
        let path = path.as_ref();
        info!("Loading resources from: {}", path.display());

        if !path.exists() {
            return Err(FerroError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FerroError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_str(&content, Some(path))
    }

    /// Loads a file that must declare exactly one resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the file declares zero or more than one resource.
    pub fn load_one(&self, path: impl AsRef<Path>) -> Result<ResourceChange> {
        let path = path.as_ref();
        let mut batch = self.load_file(path)?;

        if batch.len() != 1 {
            return Err(FerroError::Config(ConfigError::InvalidResource {
                message: format!(
                    "{} should contain 1 resource, but {} found",
                    path.display(),
                    batch.len()
                ),
            }));
        }

        Ok(batch.changes.remove(0))
    }

    /// Parses a batch from YAML (multi-document) or JSON text.
    ///
    /// JSON is a YAML subset, so a single multi-document pass covers both; a
    /// top-level list is flattened into its documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML/JSON or any document is
    /// not a valid resource declaration.
    pub fn parse_str(&self, content: &str, source: Option<&Path>) -> Result<ResourceBatch> {
        debug!("Parsing resource documents");

        let mut documents = Vec::new();
        for deserializer in serde_yaml::Deserializer::from_str(content) {
            let value = Value::deserialize(deserializer).map_err(|e| {
                FerroError::Config(ConfigError::ParseError {
                    message: format!("YAML parse error: {e}"),
                    location: source.map(|p| p.display().to_string()),
                })
            })?;
            if value.is_null() {
                continue;
            }
            match value {
                Value::Array(items) => documents.extend(items),
                other => documents.push(other),
            }
        }

        let mut changes = Vec::with_capacity(documents.len());
        for document in &documents {
            changes.push(Self::build_resource(document)?);
        }

        debug!("Parsed {} resource declarations", changes.len());
        Ok(ResourceBatch { changes })
    }

    /// Builds one [`ResourceChange`] from a parsed document.
    fn build_resource(document: &Value) -> Result<ResourceChange> {
        let Value::Object(fields) = document else {
            return Err(FerroError::Config(ConfigError::invalid_resource(format!(
                "Resource declaration must be a mapping, got: {document}"
            ))));
        };

        let kind = fields
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FerroError::Config(ConfigError::invalid_resource(
                    "Resource declaration is missing a string 'kind' field",
                ))
            })
            .and_then(|k| ResourceKind::from_wire(k).map_err(FerroError::Config))?;

        let name = fields
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| document.pointer("/metadata/name").and_then(Value::as_str))
            .ok_or_else(|| {
                FerroError::Config(ConfigError::invalid_resource(format!(
                    "{kind} declaration is missing 'name' (or 'metadata.name')"
                )))
            })?;

        validate_name(kind, name)?;

        let payload = fields.get("spec").cloned().unwrap_or(Value::Null);

        Ok(ResourceChange::new(kind, name, payload))
    }
}

/// Checks that a resource name is usable as a URL path segment and service
/// label value.
fn validate_name(kind: ResourceKind, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(FerroError::Config(ConfigError::invalid_resource(format!(
            "Invalid {kind} name '{name}': names are lowercase alphanumerics and dashes, \
             at most {MAX_NAME_LEN} characters"
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_multi_document_yaml() {
        let yaml = r#"
kind: Connection
name: training-data
spec:
  type: s3
  uri: s3://models/training
---
kind: ModelTraining
metadata:
  name: recognizer-train
spec:
  toolchain: python
  entrypoint: train.py
"#;
        let batch = BatchParser::new().parse_str(yaml, None).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.changes[0].kind(), ResourceKind::Connection);
        assert_eq!(batch.changes[0].name(), "training-data");
        assert_eq!(batch.changes[1].kind(), ResourceKind::ModelTraining);
        assert_eq!(batch.changes[1].name(), "recognizer-train");
        assert_eq!(batch.changes[1].payload()["toolchain"], "python");
    }

    #[test]
    fn test_parse_json_list() {
        let json = r#"[
            {"kind": "ModelRoute", "name": "alpha", "spec": {"urlPrefix": "/alpha"}},
            {"kind": "ModelRoute", "name": "beta", "spec": {"urlPrefix": "/beta"}}
        ]"#;
        let batch = BatchParser::new().parse_str(json, None).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.changes[1].name(), "beta");
    }

    #[test]
    fn test_unknown_kind_fails_fast() {
        let yaml = "kind: CronJob\nname: nightly\nspec: {}\n";
        let err = BatchParser::new().parse_str(yaml, None).unwrap_err();

        assert!(matches!(
            err,
            FerroError::Config(ConfigError::UnknownResourceKind { .. })
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let yaml = "kind: Connection\nname: Not_Valid\nspec: {}\n";
        assert!(BatchParser::new().parse_str(yaml, None).is_err());
    }

    #[test]
    fn test_load_one_rejects_multiple() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "kind: Connection\nname: a\nspec: {{}}\n---\nkind: Connection\nname: b\nspec: {{}}"
        )
        .unwrap();

        let err = BatchParser::new().load_one(file.path()).unwrap_err();
        assert!(matches!(
            err,
            FerroError::Config(ConfigError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = BatchParser::new()
            .load_file("/nonexistent/resources.yaml")
            .unwrap_err();
        assert!(matches!(
            err,
            FerroError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
