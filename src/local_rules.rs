//! The Local Rules hook: a pluggable, per-deployment veto point
//! consulted by every handler before it commits to the default behavior.
//!
//! A deployment that needs extra policy (e.g. "only zones under a
//! particular parent may chain") implements this trait.
//! [`DefaultLocalRules`] grants everything, matching an out-of-the-box
//! deployment with no extra policy.

use std::future::Future;

pub trait LocalRules: Send + Sync {
    fn sign_start(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn sign_approve(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn assert_signed(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn assert_chained(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn chain_start(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn chain_stop(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn assert_unchained(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn assert_unsigned(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn sign_stop(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn sign_ignore(&self, zone: &str) -> impl Future<Output = bool> + Send;
    fn update_signed(&self, zone: &str) -> impl Future<Output = bool> + Send;
}

/// Grants every hook unconditionally.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLocalRules;

impl LocalRules for DefaultLocalRules {
    async fn sign_start(&self, _zone: &str) -> bool {
        true
    }
    async fn sign_approve(&self, _zone: &str) -> bool {
        true
    }
    async fn assert_signed(&self, _zone: &str) -> bool {
        true
    }
    async fn assert_chained(&self, _zone: &str) -> bool {
        true
    }
    async fn chain_start(&self, _zone: &str) -> bool {
        true
    }
    async fn chain_stop(&self, _zone: &str) -> bool {
        true
    }
    async fn assert_unchained(&self, _zone: &str) -> bool {
        true
    }
    async fn assert_unsigned(&self, _zone: &str) -> bool {
        true
    }
    async fn sign_stop(&self, _zone: &str) -> bool {
        true
    }
    async fn sign_ignore(&self, _zone: &str) -> bool {
        true
    }
    async fn update_signed(&self, _zone: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_grants_everything() {
        let rules = DefaultLocalRules;
        assert!(rules.sign_start("example.org").await);
        assert!(rules.chain_stop("example.org").await);
    }
}
