//! Static input files.
//!
//! Input files are declared once under `inputs` and read before any graph
//! is built, so a missing or malformed file stops the run before the
//! provider is called.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{InputFormat, StackConfig, input_format};
use crate::error::ConfigError;
use crate::graph::Value;

/// Parsed content of one input file.
#[derive(Debug, Clone, PartialEq)]
pub enum InputDocument {
    /// A JSON document, kept verbatim.
    Json(String),
    /// The non-empty documents of a YAML stream.
    Yaml(Vec<Value>),
}

/// Every input file of a stack, keyed by alias.
#[derive(Debug, Clone, Default)]
pub struct InputFiles {
    documents: BTreeMap<String, (PathBuf, InputDocument)>,
}

impl InputFiles {
    /// Reads and parses every input declared in `config`.
    ///
    /// Relative paths are resolved against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InputFile`] for a file that cannot be read or parsed.
    pub fn load(config: &StackConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut documents = BTreeMap::new();

        for (alias, relative) in &config.inputs {
            let path = base_dir.join(relative);
            let format = input_format(relative).ok_or_else(|| {
                ConfigError::input_file(&path, "Unsupported file extension")
            })?;

            let content = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::input_file(&path, e.to_string()))?;

            let document = match format {
                InputFormat::Json => parse_json(&path, content)?,
                InputFormat::Yaml => parse_yaml(&path, &content)?,
            };

            debug!("Loaded input '{alias}' from {}", path.display());
            documents.insert(alias.clone(), (path, document));
        }

        Ok(Self { documents })
    }

    /// Returns the raw JSON text of an input.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InputFile`] if the alias is unknown or not JSON.
    pub fn json(&self, alias: &str) -> Result<&str, ConfigError> {
        match self.documents.get(alias) {
            Some((_, InputDocument::Json(raw))) => Ok(raw.as_str()),
            Some((path, InputDocument::Yaml(_))) => {
                Err(ConfigError::input_file(path, "Expected a JSON document"))
            }
            None => Err(unknown(alias)),
        }
    }

    /// Returns the YAML documents of an input.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InputFile`] if the alias is unknown or not YAML.
    pub fn yaml(&self, alias: &str) -> Result<&[Value], ConfigError> {
        match self.documents.get(alias) {
            Some((_, InputDocument::Yaml(docs))) => Ok(docs.as_slice()),
            Some((path, InputDocument::Json(_))) => {
                Err(ConfigError::input_file(path, "Expected YAML documents"))
            }
            None => Err(unknown(alias)),
        }
    }

    /// Number of loaded inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if no input is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn unknown(alias: &str) -> ConfigError {
    ConfigError::input_file(alias, "Input is not declared")
}

fn parse_json(path: &Path, content: String) -> Result<InputDocument, ConfigError> {
    serde_json::from_str::<serde_json::Value>(&content)
        .map_err(|e| ConfigError::input_file(path, format!("Invalid JSON: {e}")))?;
    Ok(InputDocument::Json(content))
}

fn parse_yaml(path: &Path, content: &str) -> Result<InputDocument, ConfigError> {
    let mut documents = Vec::new();

    for (i, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = Value::deserialize(document)
            .map_err(|e| ConfigError::input_file(path, format!("Invalid YAML document {}: {e}", i + 1)))?;
        match value {
            Value::Null => {}
            Value::Map(_) => documents.push(value),
            _ => {
                return Err(ConfigError::input_file(
                    path,
                    format!("YAML document {} is not a mapping", i + 1),
                ));
            }
        }
    }

    if documents.is_empty() {
        return Err(ConfigError::input_file(path, "No YAML documents found"));
    }
    Ok(InputDocument::Yaml(documents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn config_with_inputs(inputs: &[(&str, &str)]) -> StackConfig {
        let mut config = ConfigParser::new()
            .parse_yaml(
                "project: {name: demo}\nenvironments: [test]\ncluster: {name: '{env}-c'}\n",
                None,
            )
            .unwrap();
        config.inputs = inputs
            .iter()
            .map(|(a, p)| ((*a).to_string(), (*p).to_string()))
            .collect();
        config
    }

    #[test]
    fn test_loads_json_and_multi_document_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.json"), r#"{"Version": "2012-10-17"}"#).unwrap();
        std::fs::write(
            dir.path().join("crd.yaml"),
            "apiVersion: v1\nkind: A\n---\napiVersion: v1\nkind: B\n---\n",
        )
        .unwrap();

        let config = config_with_inputs(&[("policy", "policy.json"), ("crd", "crd.yaml")]);
        let inputs = InputFiles::load(&config, dir.path()).unwrap();

        assert_eq!(inputs.len(), 2);
        assert!(inputs.json("policy").unwrap().contains("2012-10-17"));
        let docs = inputs.yaml("crd").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("kind"), Some(&Value::from("B")));
        assert!(inputs.yaml("policy").is_err());
    }

    #[test]
    fn test_missing_file_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_inputs(&[("policy", "elb-policy.json")]);

        let err = InputFiles::load(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InputFile { ref path, .. } if path.ends_with("elb-policy.json")));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.json"), "{ not json").unwrap();
        let config = config_with_inputs(&[("policy", "policy.json")]);

        let err = InputFiles::load(&config, dir.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn test_scalar_yaml_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crd.yaml"), "just a string\n").unwrap();
        let config = config_with_inputs(&[("crd", "crd.yaml")]);

        assert!(InputFiles::load(&config, dir.path()).is_err());
    }
}
