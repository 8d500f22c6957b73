// ABOUTME: Models command: lists models installed on the provider.
// ABOUTME: Marks the configured model so it is easy to spot.

use anyhow::{Context, Result};

use crate::config::Config;

/// Human-readable size, e.g. "4.3 GB"
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

pub async fn run(config: &Config) -> Result<()> {
    let provider = config.ollama()?;
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("Failed to list models at {}", config.provider.base_url))?;

    if models.is_empty() {
        println!("No models installed.");
        return Ok(());
    }

    for model in models {
        let marker = if model.name == config.provider.model {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<40} {:>10}", model.name, format_size(model.size));
    }
    Ok(())
}
