pub mod api;
pub mod commands;
pub mod config;
pub mod logging;
pub mod store;

#[cfg(test)]
mod test_support;

use api::{ApiClient, ApiError};
use config::{ClientConfig, ConfigError};
use store::Stores;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run() -> Result<(), AppError> {
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(err) => {
            logging::init("info");
            return Err(err.into());
        }
    };
    logging::init(&config.log_filter);
    tracing::debug!(api_base_url = %config.api_base_url, "configuration loaded");

    let client = ApiClient::new(&config)?;
    let stores = Stores::new(client, &config);

    // The sidebar is a convenience; an unreachable backend should not stop
    // the prompt from opening.
    if let Err(err) = stores.conversations.fetch_conversations().await {
        tracing::warn!("could not load conversations: {}", err);
    }

    commands::repl(&stores, &config).await?;
    Ok(())
}
