//! Inicialização do tracing.
//!
//! `RUST_LOG` tem precedência; sem ele vale o nível de `[logging]` (ou
//! `debug` com `--verbose`). Os logs vão para stderr para não misturar com
//! a saída dos comandos.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Instala o subscriber global. Chamadas repetidas não têm efeito.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
