use clap::{Parser, Subcommand};

/// orc-gateway — the module orchestration server.
#[derive(Debug, Parser)]
#[command(name = "orc-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the orchestrator (default when no subcommand is given).
    Serve,
    /// Parse and validate the configuration, then exit.
    Doctor,
    /// Print version information.
    Version,
}

/// Loads configuration from the path named by `ORC_CONFIG` (default
/// `config.toml`), falling back to built-in defaults if the file is absent.
/// Shared by `serve` and `doctor` so the logic lives in one place.
pub fn load_config() -> anyhow::Result<(orc_core::Config, String)> {
    let config_path = std::env::var("ORC_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        orc_core::Config::from_toml_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        orc_core::Config::default()
    };

    config.apply_env_overrides();
    Ok((config, config_path))
}
