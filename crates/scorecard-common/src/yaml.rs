//! YAML parsing using yaml-rust2
//!
//! Manifests are decoded into `serde_json::Value` so they can be turned into
//! `DynamicObject`s or typed k8s-openapi structs with serde.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error raised while decoding YAML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlError {
    /// Zero-based index of the offending document, if known
    pub document: Option<usize>,
    /// Description of the failure
    pub message: String,
}

impl YamlError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            document: None,
            message: message.into(),
        }
    }

    fn in_document(mut self, index: usize) -> Self {
        self.document = Some(index);
        self
    }
}

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.document {
            Some(index) => write!(f, "document {}: {}", index + 1, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for YamlError {}

/// Parse a single-document YAML string.
///
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError::new(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc).map_err(|e| e.in_document(0)),
        None => Ok(Value::Null),
    }
}

/// Parse a `---` separated YAML stream, one `Value` per document in order.
///
/// Empty documents come back as `Value::Null`; callers decide whether to skip them.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError::new(e.to_string()))?;
    docs.into_iter()
        .enumerate()
        .map(|(i, doc)| yaml_to_json(doc).map_err(|e| e.in_document(i)))
        .collect()
}

fn yaml_key(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(YamlError::new(format!("unsupported mapping key: {:?}", other))),
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError::new(e.to_string()))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Alias(_) => return Err(YamlError::new("YAML aliases are not supported")),
        Yaml::BadValue => return Err(YamlError::new("bad YAML value")),
    })
}
