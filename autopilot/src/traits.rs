//! Trait definitions with mockall annotations for testing
//!
//! The four channel collaborator traits are the only doorway to external
//! platforms; every call goes through the dispatcher's timeout/retry
//! wrapper. The decision engine and orchestrator never call them directly.

use crate::error::{AutopilotResult, ChannelError};
use serde::{Deserialize, Serialize};
use shared::AdPlatform;

/// Product draft produced by the content collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDraft {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub kind: String,
}

/// Storefront listing created by the commerce collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: String,
    pub url: String,
}

/// Campaign created by an advertising collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReceipt {
    pub campaign_id: String,
    pub status: String,
}

/// Scheduled post created by the social collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReceipt {
    pub post_id: String,
    pub status: String,
}

/// Targeting parameters for an ad campaign launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdTargeting {
    pub audience: String,
    pub niche: String,
}

/// Content/product generation collaborator
#[mockall::automock]
#[async_trait::async_trait]
pub trait ContentChannel: Send + Sync {
    /// Generate a product draft for a niche
    ///
    /// # Parameters
    /// - `niche`: market niche to generate for
    /// - `params`: strategy parameters chosen by the decision engine
    async fn generate(
        &self,
        niche: &str,
        params: &serde_json::Value,
    ) -> Result<ProductDraft, ChannelError>;
}

/// Commerce/storefront collaborator
#[mockall::automock]
#[async_trait::async_trait]
pub trait CommerceChannel: Send + Sync {
    /// Publish a product draft as a live listing
    async fn publish(&self, draft: &ProductDraft) -> Result<Listing, ChannelError>;
}

/// Advertising collaborator for a single platform
#[mockall::automock]
#[async_trait::async_trait]
pub trait AdvertisingChannel: Send + Sync {
    /// Platform this collaborator launches campaigns on
    fn platform(&self) -> AdPlatform;

    /// Launch a campaign with the given budget and creative
    ///
    /// # Parameters
    /// - `budget`: campaign budget in USD
    /// - `targeting`: audience targeting parameters
    /// - `creative`: ad copy / creative payload
    async fn launch(
        &self,
        budget: f64,
        targeting: &AdTargeting,
        creative: &str,
    ) -> Result<CampaignReceipt, ChannelError>;
}

/// Organic social posting collaborator
#[mockall::automock]
#[async_trait::async_trait]
pub trait SocialChannel: Send + Sync {
    /// Schedule a post for future publication
    async fn schedule(
        &self,
        content: &str,
        publish_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PostReceipt, ChannelError>;
}

/// File system abstraction for ledger snapshot export
#[mockall::automock]
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Write a file relative to the snapshot base directory
    async fn write_file(&self, name: &str, contents: &[u8]) -> AutopilotResult<()>;
}
