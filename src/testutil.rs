//! Shared test fixtures: the pets catalog, metadata builders, and a
//! controllable embedder for degraded-mode tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::embedding::{Embedder, l2_normalize};
use crate::error::BridgeError;
use crate::openapi::OpenApiDocument;
use crate::registry::ToolMetadata;

/// The four-operation pet store catalog used across tests.
pub fn pets_document() -> OpenApiDocument {
    let doc = serde_json::json!({
        "openapi": "3.0.0",
        "info": {"title": "Pet Store", "version": "1.0.0"},
        "paths": {
            "/pets": {
                "get": {"summary": "List pets", "tags": ["pets"]},
                "post": {
                    "summary": "Create a pet",
                    "tags": ["pets"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "age": {"type": "integer"}
                                    },
                                    "required": ["name"]
                                }
                            }
                        }
                    }
                }
            },
            "/pets/{id}": {
                "parameters": [
                    {"name": "id", "in": "path", "required": true,
                     "schema": {"type": "integer"}}
                ],
                "get": {"summary": "Get a pet", "tags": ["pets"]},
                "delete": {"summary": "Delete a pet", "tags": ["pets"]}
            }
        }
    });
    OpenApiDocument::from_json(doc.to_string().as_bytes()).expect("pets fixture parses")
}

pub fn make_meta(id: &str, name: &str, method: &str, path: &str, tags: &[&str]) -> ToolMetadata {
    make_meta_with_description(id, name, &format!("{name} operation"), method, path, tags)
}

pub fn make_meta_with_description(
    id: &str,
    name: &str,
    description: &str,
    method: &str,
    path: &str,
    tags: &[&str],
) -> ToolMetadata {
    ToolMetadata {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// Deterministic embedder with an error-injection switch, for exercising
/// hybrid degraded mode.
pub struct FlakyEmbedder {
    failing: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % 8] += f32::from(b % 13) + 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for FlakyEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(BridgeError::Embedding("injected embedder failure".into()));
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        8
    }
}
