//! Simulated channel collaborators
//!
//! Stand-ins used when no platform credentials are configured, mirroring
//! how the hosted system simulates product creation instead of calling the
//! storefront API. Results carry `sim_`-prefixed identifiers so simulated
//! runs are always distinguishable in the ledger.

use crate::error::ChannelError;
use crate::traits::{
    AdTargeting, AdvertisingChannel, CampaignReceipt, CommerceChannel, ContentChannel, Listing,
    PostReceipt, ProductDraft, SocialChannel,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::AdPlatform;
use uuid::Uuid;

fn sim_id(prefix: &str) -> String {
    format!("sim_{prefix}_{}", Uuid::new_v4().simple())
}

/// Simulated content/product generator
pub struct SimulatedContent;

#[async_trait]
impl ContentChannel for SimulatedContent {
    async fn generate(
        &self,
        niche: &str,
        params: &serde_json::Value,
    ) -> Result<ProductDraft, ChannelError> {
        let price = params
            .get("price_point")
            .and_then(|p| p.as_f64())
            .unwrap_or(19.0);
        let kind = params
            .get("format")
            .and_then(|f| f.as_str())
            .unwrap_or("digital")
            .to_string();

        Ok(ProductDraft {
            title: format!("The Complete {niche} Toolkit"),
            description: format!(
                "A practical {kind} product for the {niche} market, generated on autopilot."
            ),
            price,
            kind,
        })
    }
}

/// Simulated storefront
pub struct SimulatedCommerce;

#[async_trait]
impl CommerceChannel for SimulatedCommerce {
    async fn publish(&self, draft: &ProductDraft) -> Result<Listing, ChannelError> {
        if draft.title.is_empty() {
            return Err(ChannelError::permanent("listing requires a title"));
        }
        let listing_id = sim_id("listing");
        Ok(Listing {
            url: format!("https://store.example/products/{listing_id}"),
            listing_id,
        })
    }
}

/// Simulated ad platform
pub struct SimulatedAdvertising {
    platform: AdPlatform,
}

impl SimulatedAdvertising {
    pub fn new(platform: AdPlatform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl AdvertisingChannel for SimulatedAdvertising {
    fn platform(&self) -> AdPlatform {
        self.platform
    }

    async fn launch(
        &self,
        budget: f64,
        _targeting: &AdTargeting,
        creative: &str,
    ) -> Result<CampaignReceipt, ChannelError> {
        if budget <= 0.0 {
            return Err(ChannelError::permanent("campaign budget must be positive"));
        }
        if creative.is_empty() {
            return Err(ChannelError::permanent("campaign requires a creative"));
        }
        Ok(CampaignReceipt {
            campaign_id: sim_id("campaign"),
            status: "simulated".into(),
        })
    }
}

/// Simulated social scheduler
pub struct SimulatedSocial;

#[async_trait]
impl SocialChannel for SimulatedSocial {
    async fn schedule(
        &self,
        content: &str,
        publish_at: DateTime<Utc>,
    ) -> Result<PostReceipt, ChannelError> {
        if publish_at < Utc::now() - chrono::Duration::minutes(1) {
            return Err(ChannelError::permanent("cannot schedule a post in the past"));
        }
        if content.is_empty() {
            return Err(ChannelError::permanent("post requires content"));
        }
        Ok(PostReceipt {
            post_id: sim_id("post"),
            status: "scheduled".into(),
        })
    }
}
