//! `tracing` subscriber setup.

use anyhow::Context as _;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::service::config::LogConfig;

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::filter`].
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .with_context(|| format!("invalid log filter {:?}", config.filter))?;

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .context("tracing subscriber already installed")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("tracing subscriber already installed")?;
    }

    tracing::debug!(filter = %config.filter, json = config.json, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        let config = LogConfig::default();
        // Another test may have installed a subscriber first; either way the
        // second call in this test must fail.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
