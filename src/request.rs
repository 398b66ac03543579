use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::config::{ApiKeyLocation, AuthConfig};
use crate::error::BridgeError;
use crate::openapi::ParameterLocation;
use crate::registry::OperationInfo;

/// Assembles outbound HTTP requests from an operation binding and the
/// agent-supplied arguments. The client is shared and externally owned.
pub struct RequestBuilder {
    client: reqwest::Client,
}

impl RequestBuilder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build the request: substitute `{param}` path placeholders, route
    /// declared query parameters, and send everything else as the JSON body
    /// on body-bearing methods.
    pub fn build(
        &self,
        info: &OperationInfo,
        base_url: &str,
        arguments: &Map<String, Value>,
    ) -> Result<reqwest::RequestBuilder, BridgeError> {
        let path = substitute_path(&info.path, arguments)?;
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let method = reqwest::Method::from_bytes(info.method.as_bytes())
            .map_err(|_| BridgeError::InvalidArgument(format!("bad method '{}'", info.method)))?;

        let mut builder = self.client.request(method, url);

        let query: Vec<(String, String)> = info
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Query)
            .filter_map(|p| {
                arguments
                    .get(&p.name)
                    .map(|v| (p.name.clone(), scalar_string(v)))
            })
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if matches!(info.method.as_str(), "POST" | "PUT" | "PATCH") {
            let url_params: HashSet<&str> =
                info.parameters.iter().map(|p| p.name.as_str()).collect();
            let body: Map<String, Value> = arguments
                .iter()
                .filter(|(name, _)| !url_params.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if !body.is_empty() || info.operation.request_body.is_some() {
                builder = builder.json(&body);
            }
        }

        Ok(builder)
    }

    pub fn inject_auth(
        &self,
        builder: reqwest::RequestBuilder,
        auth: &AuthConfig,
    ) -> reqwest::RequestBuilder {
        match auth {
            AuthConfig::None => builder,
            AuthConfig::Bearer { token } => builder.bearer_auth(token),
            AuthConfig::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthConfig::ApiKey {
                name,
                value,
                location,
            } => match location {
                ApiKeyLocation::Header => builder.header(name.as_str(), value.as_str()),
                ApiKeyLocation::Query => builder.query(&[(name.as_str(), value.as_str())]),
            },
        }
    }

    pub fn apply_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    /// Send the request and read the full body.
    pub async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<(u16, Vec<u8>), BridgeError> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok((status, body))
    }
}

/// Replace `{name}` segments with argument values.
fn substitute_path(template: &str, arguments: &Map<String, Value>) -> Result<String, BridgeError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        for c in chars.by_ref() {
            if c == '}' {
                break;
            }
            name.push(c);
        }
        let value = arguments.get(&name).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("missing required path parameter '{name}'"))
        })?;
        out.push_str(&scalar_string(value));
    }
    Ok(out)
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::registry::ToolRegistry;
    use crate::testutil::pets_document;
    use serde_json::json;

    fn builder() -> RequestBuilder {
        RequestBuilder::new(reqwest::Client::new())
    }

    fn operation(id: &str) -> OperationInfo {
        let registry = ToolRegistry::new();
        registry.build_from_spec(&pets_document(), &SafetyConfig::default());
        registry.operation_info(id).unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_path_substitution() {
        let info = operation("pets_get");
        let request = builder()
            .build(&info, "http://localhost:9999", &args(json!({"id": 7})))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/pets/7");
        assert_eq!(request.method().as_str(), "GET");
    }

    #[test]
    fn test_missing_path_parameter() {
        let info = operation("pets_get");
        let err = builder()
            .build(&info, "http://localhost:9999", &Map::new())
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_body_arguments_for_post() {
        let info = operation("pets_create");
        let request = builder()
            .build(
                &info,
                "http://localhost:9999",
                &args(json!({"name": "Fluffy", "age": 3})),
            )
            .unwrap()
            .build()
            .unwrap();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let parsed: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(parsed["name"], "Fluffy");
        assert_eq!(parsed["age"], 3);
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let info = operation("pets_list");
        let request = builder()
            .build(&info, "http://localhost:9999/", &Map::new())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:9999/pets");
    }

    #[test]
    fn test_bearer_auth_header() {
        let info = operation("pets_list");
        let b = builder();
        let request = b
            .inject_auth(
                b.build(&info, "http://localhost:9999", &Map::new()).unwrap(),
                &AuthConfig::Bearer {
                    token: "tok".into(),
                },
            )
            .build()
            .unwrap();
        let auth = request.headers().get("authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer tok");
    }

    #[test]
    fn test_api_key_in_query() {
        let info = operation("pets_list");
        let b = builder();
        let request = b
            .inject_auth(
                b.build(&info, "http://localhost:9999", &Map::new()).unwrap(),
                &AuthConfig::ApiKey {
                    name: "key".into(),
                    value: "v1".into(),
                    location: ApiKeyLocation::Query,
                },
            )
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("key=v1"));
    }

    #[test]
    fn test_extra_headers_applied() {
        let info = operation("pets_list");
        let b = builder();
        let mut headers = HashMap::new();
        headers.insert("X-Tenant".to_string(), "acme".to_string());
        let request = b
            .apply_headers(
                b.build(&info, "http://localhost:9999", &Map::new()).unwrap(),
                &headers,
            )
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("x-tenant").unwrap().to_str().unwrap(),
            "acme"
        );
    }
}
