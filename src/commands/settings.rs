use crate::api::{ApiInfo, HealthStatus};
use crate::config::ClientConfig;
use crate::store::Stores;

pub fn get_settings(config: &ClientConfig) -> String {
    let settings = config.display_settings();
    let width = settings.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    settings
        .iter()
        .map(|(key, value)| format!("{:<width$}  {}", key, value, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn health(stores: &Stores) -> Result<String, String> {
    let status = stores.client.health().await.map_err(|e| e.to_string())?;
    Ok(render_health(&status))
}

pub async fn api_info(stores: &Stores) -> Result<String, String> {
    let info = stores.client.api_info().await.map_err(|e| e.to_string())?;
    Ok(render_api_info(&info))
}

fn render_health(status: &HealthStatus) -> String {
    match &status.message {
        Some(message) => format!("{} at {} ({})", status.status, status.timestamp, message),
        None => format!("{} at {}", status.status, status.timestamp),
    }
}

fn render_api_info(info: &ApiInfo) -> String {
    let mut lines = vec![match &info.version {
        Some(version) => format!("{} v{}", info.message, version),
        None => info.message.clone(),
    }];
    if let Some(description) = &info.description {
        lines.push(description.clone());
    }
    for (name, path) in &info.endpoints {
        lines.push(format!("  {:<14} {}", name, path));
    }
    lines.join("\n")
}
