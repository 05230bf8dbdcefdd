//! `sleuth config`: configuration management commands.

use anyhow::Context;
use sleuth_config::AppConfig;

/// The config as TOML with the API key masked.
fn redacted_toml(config: &AppConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&shown).context("Failed to render config")
}

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub fn path() -> anyhow::Result<()> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}

pub fn validate() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Config is invalid")?;
    println!("Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.has_api_key() && config.provider != "ollama" {
        warnings.push("No API key set (SLEUTH_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY)");
    }
    if !config.project.root.is_dir() {
        warnings.push("project.root is not a directory");
    }
    for warning in &warnings {
        println!("  warning: {warning}");
    }

    println!();
    println!("  Provider:       {}", config.provider);
    println!("  Model:          {}", config.model.name);
    println!("  Summary model:  {}", config.summary_profile().name);
    println!("  Token budget:   {}", config.agent.token_budget);
    println!(
        "  Audit log:      {}",
        config
            .gateway
            .audit_path()
            .map_or_else(|| "off".to_string(), |p| p.display().to_string())
    );
    Ok(())
}
