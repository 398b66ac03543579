use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// The slice of an OpenAPI 3 document the bridge consumes.
///
/// Spec fetching, `$ref` resolution, and caching belong to the parser that
/// produced the document; this model only carries what registry
/// materialization and request assembly need.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenApiDocument {
    #[serde(default)]
    pub openapi: String,
    #[serde(default)]
    pub info: Option<DocumentInfo>,
    /// Path template -> path item, in document order.
    #[serde(default)]
    pub paths: IndexMap<String, PathItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
}

/// HTTP methods materialized into tools, in registration order.
pub const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    pub get: Option<Operation>,
    pub post: Option<Operation>,
    pub put: Option<Operation>,
    pub patch: Option<Operation>,
    pub delete: Option<Operation>,
    /// Path-level parameters, inherited by every operation under this path.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl PathItem {
    pub fn operation(&self, method: &str) -> Option<&Operation> {
        match method {
            "GET" => self.get.as_ref(),
            "POST" => self.post.as_ref(),
            "PUT" => self.put.as_ref(),
            "PATCH" => self.patch.as_ref(),
            "DELETE" => self.delete.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(default, rename = "operationId")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, rename = "requestBody")]
    pub request_body: Option<RequestBody>,
}

impl Operation {
    /// The operation's parameter list with path-level parameters merged in.
    /// Operation-level declarations win on (name, location) collisions.
    pub fn merged_parameters(&self, path_item: &PathItem) -> Vec<Parameter> {
        let mut merged = self.parameters.clone();
        for inherited in &path_item.parameters {
            let shadowed = merged
                .iter()
                .any(|p| p.name == inherited.name && p.location == inherited.location);
            if !shadowed {
                merged.push(inherited.clone());
            }
        }
        merged
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "in")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl Parameter {
    /// JSON type of the parameter, defaulting to `string` when unspecified.
    pub fn json_type(&self) -> String {
        self.schema
            .as_ref()
            .and_then(|s| s.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("string")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    #[default]
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    /// Media type -> schema wrapper, e.g. "application/json".
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    #[serde(default)]
    pub schema: Option<Value>,
}

impl RequestBody {
    /// Schema of the JSON media type, if the body declares one.
    pub fn json_schema(&self) -> Option<&Value> {
        self.content
            .iter()
            .find(|(media, _)| media.contains("json"))
            .and_then(|(_, mt)| mt.schema.as_ref())
    }

    /// Top-level properties of the JSON body schema.
    pub fn top_level_properties(&self) -> Vec<(String, Value)> {
        let Some(props) = self.json_schema().and_then(|s| s.get("properties")) else {
            return Vec::new();
        };
        props
            .as_object()
            .map(|obj| {
                obj.iter()
                    .map(|(name, schema)| (name.clone(), schema.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Required property names of the JSON body schema.
    pub fn required_properties(&self) -> Vec<String> {
        self.json_schema()
            .and_then(|s| s.get("required"))
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl OpenApiDocument {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("failed to parse OpenAPI JSON document")
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml_ng::from_str(data).context("failed to parse OpenAPI YAML document")
    }

    /// Parse by file extension: `.json` as JSON, anything else as YAML.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read spec file: {}", path.display()))?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json(raw.as_bytes())
        } else {
            Self::from_yaml(&raw)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
