use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use svge_core::ExternalId;

use super::core::{build_discord_config, AppConfig, DiscordConfig};

/// Answers whether an external identity currently holds a named role.
pub trait RoleDirectory: Send + Sync {
    /// # Errors
    /// Returns an error when the directory cannot be reached or answers
    /// with something unreadable. Callers treat errors as "not held".
    fn holds_role<'a>(
        &'a self,
        external_id: &'a ExternalId,
        role_name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<bool>>;
}

/// Fixed role assignments.
#[derive(Debug, Default, Clone)]
pub struct StaticRoleDirectory {
    roles: HashMap<ExternalId, BTreeSet<String>>,
}

impl StaticRoleDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_role(mut self, external_id: ExternalId, role_name: impl Into<String>) -> Self {
        self.roles
            .entry(external_id)
            .or_default()
            .insert(role_name.into());
        self
    }
}

impl RoleDirectory for StaticRoleDirectory {
    fn holds_role<'a>(
        &'a self,
        external_id: &'a ExternalId,
        role_name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        let held = self
            .roles
            .get(external_id)
            .is_some_and(|roles| roles.contains(role_name));
        Box::pin(async move { Ok(held) })
    }
}

#[derive(Debug, Deserialize)]
struct GuildRole {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

/// Looks roles up on a Discord guild through the bot REST API.
pub struct DiscordRoleDirectory {
    config: DiscordConfig,
    http_client: reqwest::Client,
}

impl DiscordRoleDirectory {
    pub(crate) fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    async fn lookup(&self, external_id: &ExternalId, role_name: &str) -> anyhow::Result<bool> {
        let roles_url = format!(
            "{}/guilds/{}/roles",
            self.config.api_base, self.config.guild_id
        );
        let roles: Vec<GuildRole> = self
            .http_client
            .get(&roles_url)
            .timeout(self.config.timeout)
            .header("authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await
            .context("guild roles request failed")?
            .error_for_status()
            .context("guild roles request rejected")?
            .json()
            .await
            .context("guild roles response was malformed")?;
        let wanted: BTreeSet<String> = roles
            .into_iter()
            .filter(|role| role.name == role_name)
            .map(|role| role.id)
            .collect();
        if wanted.is_empty() {
            return Ok(false);
        }

        let member_url = format!(
            "{}/guilds/{}/members/{}",
            self.config.api_base,
            self.config.guild_id,
            external_id.as_str()
        );
        let response = self
            .http_client
            .get(&member_url)
            .timeout(self.config.timeout)
            .header("authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await
            .context("guild member request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let member: GuildMember = response
            .error_for_status()
            .context("guild member request rejected")?
            .json()
            .await
            .context("guild member response was malformed")?;
        Ok(member.roles.iter().any(|role_id| wanted.contains(role_id)))
    }
}

impl RoleDirectory for DiscordRoleDirectory {
    fn holds_role<'a>(
        &'a self,
        external_id: &'a ExternalId,
        role_name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(self.lookup(external_id, role_name))
    }
}

/// Picks the Discord directory when configured, otherwise an empty static one.
///
/// # Errors
/// Returns an error if the Discord settings are inconsistent.
pub fn build_role_directory(config: &AppConfig) -> anyhow::Result<Arc<dyn RoleDirectory>> {
    match build_discord_config(config)? {
        Some(discord) => {
            if config.admin_role_name.is_none() {
                return Err(anyhow!(
                    "discord role lookup requires an admin role name"
                ));
            }
            Ok(Arc::new(DiscordRoleDirectory::new(discord)))
        }
        None => Ok(Arc::new(StaticRoleDirectory::new())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use svge_core::ExternalId;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::{
        build_role_directory, DiscordRoleDirectory, RoleDirectory, StaticRoleDirectory,
    };
    use crate::catalogue::core::{AppConfig, DiscordConfig};

    fn external(id: &str) -> ExternalId {
        ExternalId::try_from(id.to_owned()).unwrap()
    }

    /// Serves one canned response per accepted connection, chosen by the
    /// request path.
    async fn spawn_discord_stub(member_status: u16, member_roles: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..2 {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut request_buf = [0_u8; 4096];
                let read = stream.read(&mut request_buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&request_buf[..read]).to_string();
                let (status, body) = if request.starts_with("GET /guilds/42/roles") {
                    (
                        200,
                        String::from(
                            r#"[{"id":"7","name":"Committee Admin"},{"id":"8","name":"Member"}]"#,
                        ),
                    )
                } else if member_status == 200 {
                    (200, format!(r#"{{"roles":{member_roles}}}"#))
                } else {
                    (member_status, String::from(r#"{"message":"Unknown Member"}"#))
                };
                let response = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://127.0.0.1:{}", addr.port())
    }

    fn discord(api_base: String) -> DiscordRoleDirectory {
        DiscordRoleDirectory::new(DiscordConfig {
            api_base,
            guild_id: String::from("42"),
            bot_token: String::from("bot-token"),
            timeout: Duration::from_secs(2),
        })
    }

    #[tokio::test]
    async fn static_directory_answers_from_its_map() {
        let directory = StaticRoleDirectory::new().with_role(external("1"), "Committee Admin");
        assert!(directory
            .holds_role(&external("1"), "Committee Admin")
            .await
            .unwrap());
        assert!(!directory.holds_role(&external("1"), "Other").await.unwrap());
        assert!(!directory
            .holds_role(&external("2"), "Committee Admin")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn discord_directory_matches_role_by_name() {
        let base = spawn_discord_stub(200, r#"["8","7"]"#).await;
        let directory = discord(base);
        assert!(directory
            .holds_role(&external("1001"), "Committee Admin")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn discord_directory_reports_missing_role() {
        let base = spawn_discord_stub(200, r#"["8"]"#).await;
        let directory = discord(base);
        assert!(!directory
            .holds_role(&external("1001"), "Committee Admin")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_guild_member_does_not_hold_the_role() {
        let base = spawn_discord_stub(404, "[]").await;
        let directory = discord(base);
        assert!(!directory
            .holds_role(&external("1001"), "Committee Admin")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unreachable_directory_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let directory = discord(format!("http://127.0.0.1:{port}"));
        assert!(directory
            .holds_role(&external("1001"), "Committee Admin")
            .await
            .is_err());
    }

    #[test]
    fn discord_lookup_needs_an_admin_role_name() {
        let config = AppConfig {
            discord_guild_id: Some(String::from("42")),
            discord_bot_token: Some(String::from("token")),
            ..AppConfig::default()
        };
        assert!(build_role_directory(&config).is_err());
        assert!(build_role_directory(&AppConfig {
            admin_role_name: Some(String::from("Committee Admin")),
            ..config
        })
        .is_ok());
    }
}
