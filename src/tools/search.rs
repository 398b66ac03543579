use crate::engine::SearchEngine;
use crate::error::BridgeError;
use crate::registry::ToolMetadata;

/// Handle SearchTools: run the active engine and render a listing.
pub async fn handle_search(engine: &dyn SearchEngine, query: &str) -> Result<String, BridgeError> {
    let results = engine.search(query).await?;
    Ok(render_results(query, &results))
}

fn render_results(query: &str, results: &[ToolMetadata]) -> String {
    if results.is_empty() {
        return if query.trim().is_empty() {
            "No tools found: the catalog is empty.".to_string()
        } else {
            format!(
                "No tools found for '{query}'.\n  Try a broader query, or an empty query to list the catalog."
            )
        };
    }

    let mut out = format!("Found {} tool(s):\n\n", results.len());
    for meta in results {
        out.push_str(&format!("**{}** ({})\n", meta.name, meta.id));
        out.push_str(&format!("  {} {}\n", meta.method, meta.path));
        if !meta.description.is_empty() {
            out.push_str(&format!("  {}\n", meta.description));
        }
        if !meta.tags.is_empty() {
            out.push_str(&format!("  Tags: {}\n", meta.tags.join(", ")));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PredicateEngine;
    use crate::testutil::make_meta;

    async fn engine() -> PredicateEngine {
        let e = PredicateEngine::new();
        e.index(&[
            make_meta("pets_list", "List pets", "GET", "/pets", &["pets"]),
            make_meta("pets_create", "Create pet", "POST", "/pets", &[]),
        ])
        .await
        .unwrap();
        e
    }

    #[tokio::test]
    async fn test_listing_format() {
        let e = engine().await;
        let text = handle_search(&e, r#"MethodIs("GET")"#).await.unwrap();
        assert!(text.contains("Found 1 tool(s)"));
        assert!(text.contains("**List pets** (pets_list)"));
        assert!(text.contains("GET /pets"));
        assert!(text.contains("Tags: pets"));
    }

    #[tokio::test]
    async fn test_no_results_message() {
        let e = engine().await;
        let text = handle_search(&e, r#"MethodIs("PUT")"#).await.unwrap();
        assert!(text.contains("No tools found"));
    }

    #[tokio::test]
    async fn test_empty_query_lists_all() {
        let e = engine().await;
        let text = handle_search(&e, "").await.unwrap();
        assert!(text.contains("Found 2 tool(s)"));
    }

    #[tokio::test]
    async fn test_bad_query_propagates() {
        let e = engine().await;
        assert!(matches!(
            handle_search(&e, "Bogus(").await,
            Err(BridgeError::InvalidArgument(_))
        ));
    }
}
