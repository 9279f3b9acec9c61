#![forbid(unsafe_code)]

use std::time::Duration;

use svge_catalogue::{init_tracing, prepare_storage, verify_ordering, AppConfig, AppState};

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn config_from_env() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();
    let role_lookup_timeout = std::env::var("SVGE_ROLE_LOOKUP_TIMEOUT_SECS").map_or_else(
        |_| Ok(defaults.role_lookup_timeout),
        |value| {
            value.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                anyhow::anyhow!("invalid SVGE_ROLE_LOOKUP_TIMEOUT_SECS value {value:?}: {e}")
            })
        },
    )?;
    Ok(AppConfig {
        database_url: optional_env("SVGE_DATABASE_URL"),
        admin_role_name: optional_env("SVGE_ADMIN_ROLE_NAME"),
        discord_api_base: optional_env("SVGE_DISCORD_API_BASE")
            .unwrap_or_else(|| defaults.discord_api_base.clone()),
        discord_guild_id: optional_env("SVGE_DISCORD_GUILD_ID"),
        discord_bot_token: optional_env("SVGE_DISCORD_BOT_TOKEN"),
        role_lookup_timeout,
        ..defaults
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config_from_env()?;
    if config.database_url.is_none() {
        tracing::warn!(
            event = "maintenance.start",
            "SVGE_DATABASE_URL is unset; checking an empty in-memory catalogue"
        );
    }
    let state = AppState::new(&config)?;
    prepare_storage(&state)
        .await
        .map_err(|e| anyhow::anyhow!("storage init failed: {e}"))?;

    let report = verify_ordering(&state)
        .await
        .map_err(|e| anyhow::anyhow!("ordering check failed: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        anyhow::bail!(
            "{} of {} ordering scopes violate position density",
            report.violations.len(),
            report.scopes_checked
        );
    }
    Ok(())
}
