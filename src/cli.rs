use clap::Parser;
use std::path::PathBuf;

/// MCP server that exposes an OpenAPI service as a progressively-disclosed
/// tool catalog.
#[derive(Parser, Debug)]
#[command(name = "openbridge", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "openbridge.yaml")]
    pub config: PathBuf,

    /// App to serve (a key under `apps` in the config).
    #[arg(short, long)]
    pub app: String,

    /// Override the app's OpenAPI document path.
    #[arg(long)]
    pub spec: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::parse_from(["openbridge", "--app", "petstore"]);
        assert_eq!(cli.app, "petstore");
        assert_eq!(cli.config, PathBuf::from("openbridge.yaml"));
        assert!(cli.spec.is_none());
    }

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::parse_from([
            "openbridge",
            "-c",
            "/etc/openbridge.yaml",
            "-a",
            "petstore",
            "--spec",
            "petstore.json",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/openbridge.yaml"));
        assert_eq!(cli.spec, Some(PathBuf::from("petstore.json")));
    }
}
