//! Mapping from a connection's hello token to a stable player id.

use async_trait::async_trait;

use crate::common::PlayerId;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> anyhow::Result<PlayerId>;
}

/// Takes the token at face value. Suitable behind an authenticating proxy
/// or for local play.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustingResolver;

#[async_trait]
impl IdentityResolver for TrustingResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<PlayerId> {
        let token = token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!("empty identity token"));
        }
        Ok(token.to_string())
    }
}
