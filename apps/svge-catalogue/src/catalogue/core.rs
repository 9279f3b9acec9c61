use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use svge_core::AuthorizationResolver;

use super::{
    locks::GroupLocks,
    roles::{build_role_directory, RoleDirectory},
    store::CatalogueStore,
};

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_ROLE_LOOKUP_TIMEOUT_SECS: u64 = 3;
pub const MAX_ROLE_LOOKUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// External role that grants global admin without a committee record.
    pub admin_role_name: Option<String>,
    pub discord_api_base: String,
    pub discord_guild_id: Option<String>,
    pub discord_bot_token: Option<String>,
    pub role_lookup_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            admin_role_name: None,
            discord_api_base: String::from(DEFAULT_DISCORD_API_BASE),
            discord_guild_id: None,
            discord_bot_token: None,
            role_lookup_timeout: Duration::from_secs(DEFAULT_ROLE_LOOKUP_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DiscordConfig {
    pub(crate) api_base: String,
    pub(crate) guild_id: String,
    pub(crate) bot_token: String,
    pub(crate) timeout: Duration,
}

pub(crate) fn build_discord_config(config: &AppConfig) -> anyhow::Result<Option<DiscordConfig>> {
    match (&config.discord_guild_id, &config.discord_bot_token) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(anyhow!(
            "discord guild id and bot token must be set together"
        )),
        (Some(guild_id), Some(bot_token)) => {
            let guild_id = guild_id.trim();
            let bot_token = bot_token.trim();
            if guild_id.is_empty() || bot_token.is_empty() {
                return Err(anyhow!("discord guild id and bot token cannot be empty"));
            }
            if !guild_id.chars().all(|c| c.is_ascii_digit()) {
                return Err(anyhow!("discord guild id must be numeric"));
            }
            if config.role_lookup_timeout.is_zero()
                || config.role_lookup_timeout > Duration::from_secs(MAX_ROLE_LOOKUP_TIMEOUT_SECS)
            {
                return Err(anyhow!(
                    "role lookup timeout must be between 1 and {MAX_ROLE_LOOKUP_TIMEOUT_SECS} seconds"
                ));
            }
            Ok(Some(DiscordConfig {
                api_base: validate_discord_api_base(&config.discord_api_base)?,
                guild_id: guild_id.to_owned(),
                bot_token: bot_token.to_owned(),
                timeout: config.role_lookup_timeout,
            }))
        }
    }
}

pub(crate) fn validate_discord_api_base(value: &str) -> anyhow::Result<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.len() > 256 {
        return Err(anyhow!("discord api base url is invalid"));
    }
    if trimmed.starts_with("https://")
        || trimmed.starts_with("http://127.0.0.1")
        || trimmed.starts_with("http://localhost")
    {
        return Ok(trimmed.to_owned());
    }
    Err(anyhow!(
        "discord api base url must use https://, or localhost http:// for tests"
    ))
}

/// Shared handle passed to every catalogue operation.
#[derive(Clone)]
pub struct AppState {
    pub(crate) store: CatalogueStore,
    pub(crate) locks: Arc<GroupLocks>,
    pub(crate) resolver: Arc<AuthorizationResolver>,
    pub(crate) roles: Arc<dyn RoleDirectory>,
}

impl AppState {
    /// Builds state with the role directory described by `config`.
    ///
    /// # Errors
    /// Returns an error if the Discord settings are inconsistent or the
    /// Postgres pool cannot be configured.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let roles = build_role_directory(config)?;
        Self::with_role_directory(config, roles)
    }

    /// Builds state around an injected role directory.
    ///
    /// # Errors
    /// Returns an error if the Postgres pool cannot be configured.
    pub fn with_role_directory(
        config: &AppConfig,
        roles: Arc<dyn RoleDirectory>,
    ) -> anyhow::Result<Self> {
        let admin_role = config
            .admin_role_name
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(ToOwned::to_owned);
        Ok(Self {
            store: CatalogueStore::new(config)?,
            locks: Arc::new(GroupLocks::default()),
            resolver: Arc::new(AuthorizationResolver::new(admin_role)),
            roles,
        })
    }
}
