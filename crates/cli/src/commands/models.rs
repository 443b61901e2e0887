//! `leadscout models` — List models available upstream.

use leadscout_config::AppConfig;
use leadscout_core::backend::ChatBackend;
use leadscout_providers::OpenRouterBackend;

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let api_key = config.resolve_api_key()?;
    let backend = OpenRouterBackend::new(config.provider.clone(), config.base_url.clone(), api_key)?;

    let models = backend.list_models().await?;
    if models.is_empty() {
        println!("No models reported by {}", config.base_url);
        return Ok(());
    }

    println!("{} model(s) available from {}:\n", models.len(), config.provider);
    for model in &models {
        let marker = if *model == config.default_model {
            " (default)"
        } else if config.fallback_models.contains(model) {
            " (fallback)"
        } else {
            ""
        };
        println!("  {model}{marker}");
    }

    Ok(())
}
