use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cspy_config::{AdapterConfig, CONFIG_ENV_VAR};

/// Debug Adapter Protocol server for C-SPY.
///
/// Speaks DAP over stdio and connects to the C-SPY session service configured in
/// the `[backend]` section (or given per launch as `backendAddress`).
#[derive(Debug, Parser)]
#[command(name = "cspy-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `CSPY_DAP_CONFIG` is used as a fallback. When neither is provided
    /// the adapter uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    cspy_dap::hardening::init(&config, Arc::new(|message| eprintln!("{message}")));

    cspy_dap::run_stdio(&config).await
}

fn load_config(cli_path: Option<PathBuf>) -> AdapterConfig {
    let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    let Some(path) = path else {
        return AdapterConfig::default();
    };

    match AdapterConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "cspy-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            AdapterConfig::default()
        }
    }
}
