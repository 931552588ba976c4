//! Caller profile resolution
//!
//! Subscription and preference lookup lives outside this service; the
//! gateway only needs the handful of fields that steer the pipeline, so it
//! talks to the account system through this seam. The static resolver
//! stands in when no account system is wired up (single-tenant deploys and
//! tests).

use async_trait::async_trait;
use promptgate_core::{Result, Tier};

/// Pipeline-relevant facts about the calling profile
#[derive(Debug, Clone)]
pub struct CallerProfile {
    /// Profile owner, if the key maps to a user
    pub user_id: Option<String>,

    /// Subscription tier
    pub tier: Tier,

    /// Whether reputation auto-blocking is enabled for this profile
    pub auto_block_enabled: bool,

    /// Whether this profile participates in collective intelligence
    pub share_intelligence: bool,
}

impl Default for CallerProfile {
    fn default() -> Self {
        Self {
            user_id: None,
            tier: Tier::Free,
            auto_block_enabled: false,
            share_intelligence: true,
        }
    }
}

/// Seam to the external account system
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Resolve an API key to a profile; `None` means the key is unknown
    async fn resolve(&self, api_key: &str) -> Result<Option<CallerProfile>>;
}

/// Accepts any non-empty key and returns a fixed profile
pub struct StaticProfileResolver {
    profile: CallerProfile,
}

impl StaticProfileResolver {
    /// Resolver handing out the given profile
    pub fn new(profile: CallerProfile) -> Self {
        Self { profile }
    }
}

impl Default for StaticProfileResolver {
    fn default() -> Self {
        Self::new(CallerProfile::default())
    }
}

#[async_trait]
impl ProfileResolver for StaticProfileResolver {
    async fn resolve(&self, api_key: &str) -> Result<Option<CallerProfile>> {
        if api_key.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.profile.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let resolver = StaticProfileResolver::default();
        assert!(resolver.resolve("").await.unwrap().is_none());
        assert!(resolver.resolve("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_any_key_resolves_static_profile() {
        let resolver = StaticProfileResolver::new(CallerProfile {
            tier: Tier::Paid,
            auto_block_enabled: true,
            ..Default::default()
        });
        let profile = resolver.resolve("pg_live_abc123").await.unwrap().unwrap();
        assert_eq!(profile.tier, Tier::Paid);
        assert!(profile.auto_block_enabled);
    }
}
