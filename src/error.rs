use thiserror::Error;

/// Error taxonomy for the bridge core.
///
/// Agent-visible variants become is-error MCP results with a one-line message;
/// the rest are surfaced to the host runtime as protocol errors.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Tool id unknown, or an operation missing from the spec.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// Profile name absent from the app configuration.
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    /// Invoke called on a tool that was never loaded.
    #[error("tool '{0}' is not loaded. Call LoadTool first to inspect its schema")]
    NotLoaded(String),

    /// Malformed arguments, empty required field, or an unparseable query.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// App config or default profile not set.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The outbound HTTP request returned a status >= 400. The body is
    /// preserved verbatim so the agent still sees the upstream payload.
    #[error("upstream returned HTTP {status}")]
    UpstreamHttp { status: u16, body: String },

    /// DNS, dial, or timeout failure reaching the upstream service.
    #[error("upstream request failed: {0}")]
    UpstreamNetwork(#[from] reqwest::Error),

    /// Engine index build failed (embedding batch, tokenization, etc.).
    #[error("index build failed: {0}")]
    Index(String),

    /// An embedder could not produce vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl BridgeError {
    /// Whether this failure should be conveyed to the agent as an is-error
    /// result rather than raised to the host.
    pub fn is_agent_visible(&self) -> bool {
        matches!(
            self,
            BridgeError::ToolNotFound(_)
                | BridgeError::ProfileNotFound(_)
                | BridgeError::NotLoaded(_)
                | BridgeError::InvalidArgument(_)
                | BridgeError::UpstreamHttp { .. }
                | BridgeError::UpstreamNetwork(_)
        )
    }
}
