//! Inicialização do `tracing`.
//!
//! `RUST_LOG` tem precedência sobre o nível configurado; `--verbose` força
//! `debug`. Os eventos vão para stderr para não se misturar à saída da CLI.

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

pub fn init(settings: &LogSettings, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if settings.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|e| anyhow!("failed to initialise logging: {e}"))
}
