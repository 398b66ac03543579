use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::config::SafetyConfig;
use crate::error::BridgeError;
use crate::naming;
use crate::openapi::{METHODS, OpenApiDocument, Operation, Parameter, ParameterLocation};

/// A complete, callable unit derived from one (method, path) pair.
/// Tools are value objects; once materialized they are not mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON input schema: object with `properties` and `required`.
    pub input_schema: Value,
}

/// The searchable projection of a Tool. Searches never read full schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Upper-cased HTTP method.
    pub method: String,
    /// Path template, e.g. `/pets/{id}`.
    pub path: String,
    pub tags: Vec<String>,
}

/// Invocation binding for a tool id. Never leaves the registry except to
/// drive request assembly.
#[derive(Debug, Clone)]
pub struct OperationInfo {
    pub method: String,
    pub path: String,
    /// Operation parameters with path-level parameters merged in.
    pub parameters: Vec<Parameter>,
    pub operation: Operation,
}

#[derive(Default)]
struct RegistryState {
    all_tools: HashMap<String, Tool>,
    /// Insertion-ordered; the slice engines index from.
    metadata: Vec<ToolMetadata>,
    /// Strict subset of `all_tools`.
    loaded_tools: HashMap<String, Tool>,
    operation_map: HashMap<String, OperationInfo>,
}

/// In-memory store of all tools, their metadata, their operation bindings,
/// and the loaded-cache. One RW-lock protects all four maps.
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(RegistryState::default()),
        })
    }

    /// Materialize tools from an OpenAPI document under the given safety
    /// policy. Rebuilding clears all registry state including the loaded
    /// cache: a reloaded spec may rename or remove a previously loaded tool.
    pub fn build_from_spec(&self, doc: &OpenApiDocument, safety: &SafetyConfig) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.all_tools.clear();
        state.metadata.clear();
        state.operation_map.clear();
        state.loaded_tools.clear();

        for (path, item) in &doc.paths {
            for method in METHODS {
                let Some(operation) = item.operation(method) else {
                    continue;
                };
                if safety.read_only_mode && method != "GET" {
                    continue;
                }
                let id = naming::tool_identifier(method, path, operation);
                if id.is_empty() {
                    warn!(method, path = %path, "skipping operation with unusable identifier");
                    continue;
                }
                if safety.denied_operations.iter().any(|d| d == &id) {
                    continue;
                }
                if !safety.allowed_operations.is_empty()
                    && !safety.allowed_operations.contains(&id)
                {
                    continue;
                }
                if state.all_tools.contains_key(&id) {
                    warn!(tool = %id, method, path = %path, "duplicate tool identifier, keeping first registration");
                    continue;
                }

                let parameters = operation.merged_parameters(item);
                let input_schema = build_input_schema(&parameters, operation);

                let name = operation
                    .summary
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(&id)
                    .to_string();
                let description = operation
                    .description
                    .as_deref()
                    .or(operation.summary.as_deref())
                    .unwrap_or_default()
                    .to_string();

                state.metadata.push(ToolMetadata {
                    id: id.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    method: method.to_string(),
                    path: path.clone(),
                    tags: operation.tags.clone(),
                });
                state.operation_map.insert(
                    id.clone(),
                    OperationInfo {
                        method: method.to_string(),
                        path: path.clone(),
                        parameters,
                        operation: operation.clone(),
                    },
                );
                state.all_tools.insert(
                    id.clone(),
                    Tool {
                        id,
                        name,
                        description,
                        input_schema,
                    },
                );
            }
        }

        debug!(tools = state.metadata.len(), "registry materialized");
    }

    /// Fetch a tool into the loaded cache. Returns the tool and whether it
    /// was already cached. Idempotent.
    pub fn load(&self, id: &str) -> Result<(Tool, bool), BridgeError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(tool) = state.all_tools.get(id).cloned() else {
            return Err(BridgeError::ToolNotFound(id.to_string()));
        };
        let cached = state.loaded_tools.contains_key(id);
        if !cached {
            state.loaded_tools.insert(id.to_string(), tool.clone());
        }
        Ok((tool, cached))
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .loaded_tools
            .contains_key(id)
    }

    /// Return every loaded tool to the catalogued state.
    #[allow(dead_code)]
    pub fn clear_cache(&self) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .loaded_tools
            .clear();
    }

    /// Snapshot of the metadata slice in insertion order. Callers iterate
    /// without holding the registry lock.
    pub fn metadata(&self) -> Vec<ToolMetadata> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .metadata
            .clone()
    }

    pub fn operation_info(&self, id: &str) -> Option<OperationInfo> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .operation_map
            .get(id)
            .cloned()
    }

    pub fn tool(&self, id: &str) -> Option<Tool> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .all_tools
            .get(id)
            .cloned()
    }

    pub fn tool_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .all_tools
            .len()
    }

    #[allow(dead_code)]
    pub fn loaded_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .loaded_tools
            .len()
    }
}

/// Input schema for one operation: URL parameters merged with the top-level
/// properties of the JSON request body. Types default to `string`.
fn build_input_schema(parameters: &[Parameter], operation: &Operation) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for param in parameters {
        if !matches!(
            param.location,
            ParameterLocation::Path | ParameterLocation::Query
        ) {
            continue;
        }
        let mut prop = Map::new();
        prop.insert("type".to_string(), Value::String(param.json_type()));
        if let Some(desc) = &param.description {
            prop.insert("description".to_string(), Value::String(desc.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.required || param.location == ParameterLocation::Path {
            required.push(param.name.clone());
        }
    }

    if let Some(body) = &operation.request_body {
        for (name, schema) in body.top_level_properties() {
            if properties.contains_key(&name) {
                continue;
            }
            let prop = match schema {
                Value::Object(mut obj) => {
                    obj.entry("type".to_string())
                        .or_insert_with(|| Value::String("string".to_string()));
                    Value::Object(obj)
                }
                _ => json!({"type": "string"}),
            };
            properties.insert(name, prop);
        }
        for name in body.required_properties() {
            if !required.contains(&name) {
                required.push(name);
            }
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
