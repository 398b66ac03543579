use serde_json::{Map, Value};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::registry::ToolRegistry;
use crate::request::RequestBuilder;

/// Handle InvokeTool: refuse un-loaded tools, resolve the active profile,
/// assemble and send the HTTP request, and render the response.
///
/// A status >= 400 comes back as [`BridgeError::UpstreamHttp`] with the
/// rendered body preserved, so the caller can still show it to the agent.
pub async fn handle_invoke(
    registry: &ToolRegistry,
    app: &AppConfig,
    requests: &RequestBuilder,
    tool_id: &str,
    arguments: Option<Map<String, Value>>,
) -> Result<String, BridgeError> {
    if tool_id.trim().is_empty() {
        return Err(BridgeError::InvalidArgument("toolId is required".into()));
    }
    if !registry.is_loaded(tool_id) {
        if registry.tool(tool_id).is_none() {
            return Err(BridgeError::ToolNotFound(tool_id.to_string()));
        }
        return Err(BridgeError::NotLoaded(tool_id.to_string()));
    }
    let info = registry
        .operation_info(tool_id)
        .ok_or_else(|| BridgeError::ToolNotFound(tool_id.to_string()))?;

    let (profile_name, profile) = app.resolve_profile(None)?;
    let arguments = arguments.unwrap_or_default();

    let builder = requests.build(&info, &profile.base_url, &arguments)?;
    let builder = requests.inject_auth(builder, &profile.auth);
    let builder = requests.apply_headers(builder, &profile.headers);

    debug!(
        tool = tool_id,
        profile = profile_name,
        method = %info.method,
        path = %info.path,
        "invoking upstream operation"
    );

    let (status, body) = requests.execute(builder).await?;
    let rendered = format_response(&body);
    if status >= 400 {
        return Err(BridgeError::UpstreamHttp {
            status,
            body: rendered,
        });
    }
    Ok(rendered)
}

/// Pretty-print JSON bodies; fall back to raw text for everything else.
pub fn format_response(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(parsed) => serde_json::to_string_pretty(&parsed)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, SafetyConfig};
    use crate::testutil::pets_document;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_for(base_url: &str) -> AppConfig {
        let mut app = AppConfig {
            default_profile: "main".to_string(),
            ..Default::default()
        };
        app.profiles.insert(
            "main".to_string(),
            Profile {
                base_url: base_url.to_string(),
                headers: [("X-Tenant".to_string(), "acme".to_string())].into(),
                auth: crate::config::AuthConfig::Bearer {
                    token: "tok".to_string(),
                },
                safety_config: SafetyConfig::default(),
            },
        );
        app
    }

    fn registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.build_from_spec(&pets_document(), &SafetyConfig::default());
        registry
    }

    fn requests() -> RequestBuilder {
        RequestBuilder::new(reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_invoke_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets"))
            .and(header("authorization", "Bearer tok"))
            .and(header("x-tenant", "acme"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"[{"id":1,"name":"Fluffy"}]"#),
            )
            .mount(&server)
            .await;

        let registry = registry();
        registry.load("pets_list").unwrap();

        let text = handle_invoke(
            &registry,
            &app_for(&server.uri()),
            &requests(),
            "pets_list",
            None,
        )
        .await
        .unwrap();
        assert!(text.contains("Fluffy"));
    }

    #[tokio::test]
    async fn test_invoke_without_load_rejected() {
        let registry = registry();
        let err = handle_invoke(
            &registry,
            &app_for("http://localhost:1"),
            &requests(),
            "pets_list",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::NotLoaded(_)));
        assert!(err.to_string().contains("not loaded"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = registry();
        let err = handle_invoke(
            &registry,
            &app_for("http://localhost:1"),
            &requests(),
            "nope",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_upstream_error_preserves_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":"no pets here"}"#))
            .mount(&server)
            .await;

        let registry = registry();
        registry.load("pets_list").unwrap();

        let err = handle_invoke(
            &registry,
            &app_for(&server.uri()),
            &requests(),
            "pets_list",
            None,
        )
        .await
        .unwrap_err();
        match err {
            BridgeError::UpstreamHttp { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("no pets here"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_network_failure_is_upstream_network() {
        let registry = registry();
        registry.load("pets_list").unwrap();

        // Nothing listens on this port.
        let err = handle_invoke(
            &registry,
            &app_for("http://127.0.0.1:1"),
            &requests(),
            "pets_list",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamNetwork(_)));
    }

    #[tokio::test]
    async fn test_arguments_routed_to_body_and_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pets"))
            .and(body_json(serde_json::json!({"name": "Rex", "age": 2})))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":9}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pets/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":9,"name":"Rex"}"#))
            .mount(&server)
            .await;

        let registry = registry();
        registry.load("pets_create").unwrap();
        registry.load("pets_get").unwrap();

        let app = app_for(&server.uri());
        let create_args = serde_json::json!({"name": "Rex", "age": 2});
        handle_invoke(
            &registry,
            &app,
            &requests(),
            "pets_create",
            create_args.as_object().cloned(),
        )
        .await
        .unwrap();

        let get_args = serde_json::json!({"id": 9});
        let text = handle_invoke(
            &registry,
            &app,
            &requests(),
            "pets_get",
            get_args.as_object().cloned(),
        )
        .await
        .unwrap();
        assert!(text.contains("Rex"));
    }

    #[tokio::test]
    async fn test_missing_profile_is_profile_not_found() {
        let registry = registry();
        registry.load("pets_list").unwrap();

        let app = AppConfig::default();
        let err = handle_invoke(&registry, &app, &requests(), "pets_list", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProfileNotFound(_)));
    }

    #[test]
    fn test_format_response_json_pretty() {
        let text = format_response(br#"{"a":1}"#);
        assert!(text.contains("\"a\": 1"));
    }

    #[test]
    fn test_format_response_raw_fallback() {
        assert_eq!(format_response(b"plain text"), "plain text");
    }

    #[tokio::test]
    async fn test_query_parameters_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        // A variant of the pets catalog that declares a query parameter.
        let doc = crate::openapi::OpenApiDocument::from_json(
            serde_json::json!({
                "paths": {
                    "/pets": {
                        "get": {
                            "summary": "List pets",
                            "parameters": [
                                {"name": "limit", "in": "query",
                                 "schema": {"type": "integer"}}
                            ]
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        let registry = ToolRegistry::new();
        registry.build_from_spec(&doc, &SafetyConfig::default());
        registry.load("pets_list").unwrap();

        let args = serde_json::json!({"limit": 5});
        handle_invoke(
            &registry,
            &app_for(&server.uri()),
            &requests(),
            "pets_list",
            args.as_object().cloned(),
        )
        .await
        .unwrap();
    }
}
