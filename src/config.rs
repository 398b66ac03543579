use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::EmbeddingConfig;
use crate::error::BridgeError;
use crate::tokenize::{CjkTokenizer, SimpleTokenizer, Tokenizer, TokenizerConfig, UnicodeTokenizer};

/// Top-level openbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// App name -> per-app configuration.
    #[serde(default)]
    pub apps: HashMap<String, AppConfig>,
}

/// Per-app configuration: where the spec lives and how to call the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// OpenAPI document path. May be overridden on the command line.
    #[serde(default)]
    pub spec: Option<PathBuf>,

    /// Profile used when the caller names none.
    #[serde(default)]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    #[serde(default)]
    pub search: SearchSettings,
}

impl AppConfig {
    /// Pick the named profile, falling back to the default profile.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<(&str, &Profile), BridgeError> {
        let wanted = match name {
            Some(n) if !n.is_empty() => n,
            _ => self.default_profile.as_str(),
        };
        if wanted.is_empty() {
            return Err(BridgeError::ProfileNotFound("(default)".into()));
        }
        self.profiles
            .get_key_value(wanted)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| BridgeError::ProfileNotFound(wanted.to_string()))
    }
}

/// A named set of runtime settings selected at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: String,

    /// Extra headers merged into every outbound request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub safety_config: SafetyConfig,
}

/// Authentication injected into outbound requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    #[serde(rename = "apikey", alias = "apiKey")]
    ApiKey {
        name: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Operation filtering and disclosure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyConfig {
    /// Only GET operations become tools.
    #[serde(default)]
    pub read_only_mode: bool,

    /// Allow-list of tool identifiers. Empty means everything is allowed.
    /// The deny list takes precedence.
    #[serde(default)]
    pub allowed_operations: Vec<String>,

    #[serde(default)]
    pub denied_operations: Vec<String>,

    #[serde(default = "default_true")]
    pub progressive_disclosure: bool,

    #[serde(default)]
    pub search_engine: SearchEngineKind,

    #[serde(default)]
    pub protect_sensitive_info: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            read_only_mode: false,
            allowed_operations: Vec::new(),
            denied_operations: Vec::new(),
            progressive_disclosure: true,
            search_engine: SearchEngineKind::default(),
            protect_sensitive_info: false,
        }
    }
}

/// Which engine backs SearchTools.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngineKind {
    Lexical,
    Predicate,
    Vector,
    #[default]
    Hybrid,
}

/// Retrieval-stack settings shared by the app's profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    #[serde(default)]
    pub hybrid: HybridSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub tokenizer: TokenizerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSettings {
    #[serde(default)]
    pub fusion: FusionKind,

    /// RRF rank constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Weight of the vector ranking under weighted fusion, clamped to [0, 1].
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Optional predicate expression applied after fusion.
    #[serde(default)]
    pub predicate_filter: Option<String>,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            fusion: FusionKind::default(),
            rrf_k: default_rrf_k(),
            vector_weight: default_vector_weight(),
            top_k: default_top_k(),
            predicate_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    #[default]
    Rrf,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Remote embedding service base URL (OpenAI-style API).
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Local model file or hub id.
    #[serde(default)]
    pub model_path: Option<String>,

    /// Cache directory for downloaded models.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_embedding_model(),
            dimension: default_dimension(),
            model_path: None,
            cache_dir: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn to_embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            dimension: self.dimension,
            model_path: self.model_path.clone(),
            cache_dir: self.cache_dir.clone(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizerSettings {
    #[serde(default)]
    pub kind: TokenizerKind,

    /// Extra dictionary file for the CJK tokenizer, one word per line.
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Simple,
    Unicode,
    Cjk,
}

impl TokenizerSettings {
    pub fn build(&self) -> Arc<dyn Tokenizer> {
        let config = TokenizerConfig::default();
        match self.kind {
            TokenizerKind::Simple => Arc::new(SimpleTokenizer::new(config)),
            TokenizerKind::Unicode => Arc::new(UnicodeTokenizer::new(config)),
            TokenizerKind::Cjk => match &self.dictionary {
                Some(path) => Arc::new(CjkTokenizer::with_dictionary(config, path.clone())),
                None => Arc::new(CjkTokenizer::new(config)),
            },
        }
    }
}

// --- Defaults ---

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_top_k() -> usize {
    50
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dimension() -> usize {
    256
}

// --- Loading ---

impl Config {
    /// Load config from a YAML file.
    ///
    /// Pipeline: read file -> shellexpand ${VAR} -> deserialize YAML -> validate
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let expanded = shellexpand::env(&raw)
            .map_err(|e| anyhow::anyhow!("env var interpolation failed: {e}"))?;

        let config: Config = serde_yaml_ng::from_str(&expanded)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, app) in &self.apps {
            if !app.default_profile.is_empty() && !app.profiles.contains_key(&app.default_profile) {
                anyhow::bail!(
                    "app '{name}': defaultProfile '{}' is not declared in profiles",
                    app.default_profile
                );
            }
            let hybrid = &app.search.hybrid;
            if !hybrid.rrf_k.is_finite() || hybrid.rrf_k <= 0.0 {
                anyhow::bail!("app '{name}': hybrid.rrfK must be a positive number");
            }
            if !hybrid.vector_weight.is_finite() {
                anyhow::bail!("app '{name}': hybrid.vectorWeight must be a finite number");
            }
            if hybrid.top_k == 0 {
                anyhow::bail!("app '{name}': hybrid.topK must be >= 1");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
logLevel: debug
apps:
  petstore:
    spec: specs/petstore.yaml
    defaultProfile: production
    profiles:
      production:
        baseURL: https://pets.example.com
        headers:
          X-Tenant: acme
        auth:
          type: bearer
          token: secret-token
        safetyConfig:
          readOnlyMode: true
          searchEngine: hybrid
          deniedOperations: [pets_delete]
    search:
      hybrid:
        fusion: weighted
        vectorWeight: 0.4
      tokenizer:
        kind: cjk
"#;

    fn parse(yaml: &str) -> Config {
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(SAMPLE);
        assert_eq!(config.log_level, "debug");

        let app = &config.apps["petstore"];
        assert_eq!(app.default_profile, "production");
        assert_eq!(app.search.hybrid.fusion, FusionKind::Weighted);
        assert!((app.search.hybrid.vector_weight - 0.4).abs() < 1e-6);
        assert_eq!(app.search.tokenizer.kind, TokenizerKind::Cjk);

        let profile = &app.profiles["production"];
        assert_eq!(profile.base_url, "https://pets.example.com");
        assert!(profile.safety_config.read_only_mode);
        assert_eq!(
            profile.safety_config.denied_operations,
            vec!["pets_delete".to_string()]
        );
        assert!(
            matches!(profile.auth, AuthConfig::Bearer { ref token } if token == "secret-token")
        );
    }

    #[test]
    fn test_defaults() {
        let config = parse("apps: {}");
        assert_eq!(config.log_level, "info");

        let safety = SafetyConfig::default();
        assert!(safety.progressive_disclosure);
        assert_eq!(safety.search_engine, SearchEngineKind::Hybrid);

        let hybrid = HybridSettings::default();
        assert_eq!(hybrid.fusion, FusionKind::Rrf);
        assert!((hybrid.rrf_k - 60.0).abs() < 1e-6);
        assert_eq!(hybrid.top_k, 50);
    }

    #[test]
    fn test_resolve_profile_named_and_default() {
        let config = parse(SAMPLE);
        let app = &config.apps["petstore"];

        let (name, _) = app.resolve_profile(Some("production")).unwrap();
        assert_eq!(name, "production");

        let (name, _) = app.resolve_profile(None).unwrap();
        assert_eq!(name, "production");

        let err = app.resolve_profile(Some("staging")).unwrap_err();
        assert!(matches!(err, BridgeError::ProfileNotFound(ref p) if p == "staging"));
    }

    #[test]
    fn test_resolve_profile_without_default_fails() {
        let app = AppConfig::default();
        assert!(matches!(
            app.resolve_profile(None),
            Err(BridgeError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_default_profile_rejected() {
        let yaml = r#"
apps:
  broken:
    defaultProfile: missing
    profiles: {}
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_auth_parsing() {
        let yaml = r#"
type: apikey
name: X-Api-Key
value: abc123
location: query
"#;
        let auth: AuthConfig = serde_yaml_ng::from_str(yaml).unwrap();
        match auth {
            AuthConfig::ApiKey {
                name,
                value,
                location,
            } => {
                assert_eq!(name, "X-Api-Key");
                assert_eq!(value, "abc123");
                assert_eq!(location, ApiKeyLocation::Query);
            }
            other => panic!("unexpected auth config: {other:?}"),
        }
    }

    #[test]
    fn test_env_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        // SAFETY: tests in this module do not race on this variable.
        unsafe { std::env::set_var("OPENBRIDGE_TEST_TOKEN", "tok-42") };
        std::fs::write(
            &path,
            r#"
apps:
  demo:
    defaultProfile: main
    profiles:
      main:
        baseURL: https://api.example.com
        auth:
          type: bearer
          token: ${OPENBRIDGE_TEST_TOKEN}
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let profile = &config.apps["demo"].profiles["main"];
        assert!(matches!(profile.auth, AuthConfig::Bearer { ref token } if token == "tok-42"));
    }
}
