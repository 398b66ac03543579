mod cli;
mod config;
mod embedding;
mod engine;
mod error;
mod naming;
mod openapi;
mod registry;
mod request;
mod server;
#[cfg(test)]
mod testutil;
mod tokenize;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Config, SearchEngineKind};
use crate::embedding::{AdaptiveEmbedder, Embedder, LocalEmbedder, RemoteEmbedder, TfIdfEmbedder};
use crate::engine::{
    HybridEngine, LexicalEngine, PredicateEngine, SearchEngine, VectorEngine, vector::compose_text,
};
use crate::registry::ToolRegistry;

/// Everything needed to serve one app over stdio.
struct InitializedBridge {
    server: server::BridgeServer,
}

async fn initialize(cli: &cli::Cli) -> Result<InitializedBridge> {
    let config = Config::load(&cli.config)?;

    // Logs go to stderr so the stdio transport stays clean.
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let app: AppConfig = config.apps.get(&cli.app).cloned().ok_or_else(|| {
        error::BridgeError::ConfigurationMissing(format!(
            "no app '{}' in {}",
            cli.app,
            cli.config.display()
        ))
    })?;

    let spec_path = cli
        .spec
        .clone()
        .or_else(|| app.spec.clone())
        .context("no OpenAPI document configured: set `spec` in the app config or pass --spec")?;
    let document = openapi::OpenApiDocument::from_file(&spec_path)?;
    if let Some(meta) = &document.info {
        tracing::debug!(
            title = %meta.title,
            version = %meta.version,
            openapi = %document.openapi,
            "spec document parsed"
        );
    }

    let (profile_name, profile) = app
        .resolve_profile(None)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let safety = profile.safety_config.clone();
    if !safety.progressive_disclosure {
        warn!(
            "progressiveDisclosure is disabled for profile '{profile_name}', \
             but only the meta-tool surface is served"
        );
    }

    info!(
        app = %cli.app,
        spec = %spec_path.display(),
        profile = profile_name,
        engine = ?safety.search_engine,
        "openbridge starting"
    );

    let registry = ToolRegistry::new();
    registry.build_from_spec(&document, &safety);

    let http_client = reqwest::Client::new();
    let tokenizer = app.search.tokenizer.build();
    let embedding_config = app.search.embedding.to_embedding_config();

    // Model downloads land in the configured cache dir, or the platform one.
    #[cfg(feature = "local-model")]
    {
        let models_dir = embedding_config.cache_dir.clone().or_else(|| {
            dirs::cache_dir().map(|d| d.join("openbridge").join("models"))
        });
        if let Some(dir) = models_dir {
            std::fs::create_dir_all(&dir)?;
            // SAFETY: no concurrent env reads yet; worker threads exist but
            // no user tasks have been spawned.
            unsafe { std::env::set_var("HF_HOME", &dir) };
        }
    }

    let tfidf = Arc::new(TfIdfEmbedder::new(
        Arc::clone(&tokenizer),
        embedding_config.clone(),
    ));
    let local = Arc::new(LocalEmbedder::new(embedding_config.clone()));
    let remote = embedding_config
        .endpoint
        .is_some()
        .then(|| Arc::new(RemoteEmbedder::new(http_client.clone(), embedding_config.clone())));
    let adaptive = Arc::new(AdaptiveEmbedder::new(remote, local, tfidf));

    // Seed the TF-IDF vocabulary from the catalog so query vectors land in
    // the same space as document vectors.
    let metadata = registry.metadata();
    let corpus: Vec<String> = metadata.iter().map(compose_text).collect();
    adaptive.tfidf().index_documents(&corpus);

    let engine: Arc<dyn SearchEngine> = match safety.search_engine {
        SearchEngineKind::Lexical => Arc::new(LexicalEngine::new(Arc::clone(&tokenizer))),
        SearchEngineKind::Predicate => Arc::new(PredicateEngine::new()),
        SearchEngineKind::Vector => Arc::new(VectorEngine::with_top_k(
            Arc::clone(&adaptive) as Arc<dyn Embedder>,
            app.search.hybrid.top_k,
        )),
        SearchEngineKind::Hybrid => Arc::new(
            HybridEngine::new(
                Arc::clone(&tokenizer),
                Arc::clone(&adaptive) as Arc<dyn Embedder>,
                &app.search.hybrid,
            )
            .map_err(|e| anyhow::anyhow!("hybrid engine configuration: {e}"))?,
        ),
    };

    engine
        .index(&metadata)
        .await
        .map_err(|e| anyhow::anyhow!("index build failed: {e}"))?;

    info!(
        tools = registry.tool_count(),
        engine = engine.name(),
        embedder = %adaptive.active_type(),
        "catalog indexed"
    );

    let server = server::BridgeServer::new(
        cli.app.clone(),
        Arc::new(app),
        registry,
        engine,
        Arc::new(request::RequestBuilder::new(http_client)),
    );
    Ok(InitializedBridge { server })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let bridge = initialize(&cli).await?;

    info!("starting MCP stdio server");
    let service = bridge.server.serve(stdio()).await?;

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            result = service.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "MCP service exited with error");
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        service.waiting().await?;
    }

    info!("shutting down");
    Ok(())
}
