//! # Recommended shard count.
//!
//! With `total_shards = "auto"` the manager asks Discord how many shards the
//! bot should run (`GET /gateway/bot`, field `shards`). The lookup sits behind
//! [`ShardCountSource`] so tests and alternative deployments can answer it
//! without the network.
//!
//! A failed lookup is never fatal: [`compute_shard_count`] logs it and runs
//! with a single shard.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::CountSetting;
use crate::error::FetchError;

/// Discord REST base used by [`DiscordGateway`].
pub const DISCORD_API: &str = "https://discord.com/api/v10";

/// Upper bound on one recommendation request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers "how many shards should this bot run?".
#[async_trait]
pub trait ShardCountSource: Send + Sync + 'static {
    /// Recommended shard count (`>= 1`).
    async fn recommended_shards(&self) -> Result<u32, FetchError>;
}

/// Fetches the recommendation from Discord's gateway endpoint.
#[derive(Clone, Debug)]
pub struct DiscordGateway {
    client: reqwest::Client,
    token: Option<String>,
    base_url: String,
}

#[derive(Deserialize)]
struct GatewayBot {
    shards: u32,
}

impl DiscordGateway {
    /// Creates a fetcher authenticated with `token` (`None` makes every fetch fail).
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.filter(|t| !t.trim().is_empty()),
            base_url: DISCORD_API.to_string(),
        }
    }

    /// Reads the token from `DISCORD_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("DISCORD_TOKEN").ok())
    }

    /// Overrides the REST base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ShardCountSource for DiscordGateway {
    async fn recommended_shards(&self) -> Result<u32, FetchError> {
        let token = self.token.as_deref().ok_or(FetchError::MissingToken)?;
        let url = format!("{}/gateway/bot", self.base_url.trim_end_matches('/'));
        let body: GatewayBot = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {token}"))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if body.shards == 0 {
            return Err(FetchError::InvalidCount(body.shards));
        }
        Ok(body.shards)
    }
}

/// Resolves the total shard count for a fleet start.
///
/// - `Fixed(n)` → `n` (at least 1)
/// - `Auto` → the source's answer, or `1` if it fails
pub async fn compute_shard_count(setting: CountSetting, source: &dyn ShardCountSource) -> u32 {
    match setting {
        CountSetting::Fixed(n) => n.max(1),
        CountSetting::Auto => match source.recommended_shards().await {
            Ok(n) => n.max(1),
            Err(e) => {
                warn!(error = %e, label = e.as_label(), "recommended shard count unavailable, using 1");
                1
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u32);

    #[async_trait]
    impl ShardCountSource for Fixed {
        async fn recommended_shards(&self) -> Result<u32, FetchError> {
            Ok(self.0)
        }
    }

    struct Down;

    #[async_trait]
    impl ShardCountSource for Down {
        async fn recommended_shards(&self) -> Result<u32, FetchError> {
            Err(FetchError::MissingToken)
        }
    }

    #[tokio::test]
    async fn test_auto_uses_recommendation() {
        assert_eq!(compute_shard_count(CountSetting::Auto, &Fixed(7)).await, 7);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_one() {
        assert_eq!(compute_shard_count(CountSetting::Auto, &Down).await, 1);
    }

    #[tokio::test]
    async fn test_fixed_skips_the_source() {
        assert_eq!(compute_shard_count(CountSetting::Fixed(4), &Down).await, 4);
    }

    #[tokio::test]
    async fn test_gateway_without_token_fails_fast() {
        let gateway = DiscordGateway::new(Some("  ".into()));
        let err = gateway.recommended_shards().await.expect_err("no token");
        assert_eq!(err.as_label(), "fetch_missing_token");
    }
}
