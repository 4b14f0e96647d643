//! Test helpers and builder functions for orchestrator tests
//!
//! Mock factories with sensible default behaviors plus small utilities for
//! driving and inspecting cycles without boilerplate.

use super::fixtures::TestFixtures;
use autopilot::config::AutopilotConfig;
use autopilot::error::ChannelError;
use autopilot::orchestrator::SharedState;
use autopilot::traits::{
    AdvertisingChannel, CampaignReceipt, CommerceChannel, ContentChannel, Listing,
    MockAdvertisingChannel, MockCommerceChannel, MockContentChannel, MockSocialChannel,
    PostReceipt, ProductDraft, SocialChannel,
};
use autopilot::{DecisionEngine, Orchestrator, StrategyBook};
use shared::{AdPlatform, AiEventKind, Channel, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Helper functions shared by the unit and integration suites
pub struct TestHelpers;

impl TestHelpers {
    /// Content mock that always produces the fixture draft
    pub fn ok_content() -> MockContentChannel {
        let mut content = MockContentChannel::new();
        content
            .expect_generate()
            .returning(|_, _| Ok(TestFixtures::draft()));
        content
    }

    /// Commerce mock that always publishes successfully
    pub fn ok_commerce() -> MockCommerceChannel {
        let mut commerce = MockCommerceChannel::new();
        commerce.expect_publish().returning(|_| {
            Ok(Listing {
                listing_id: "lst_test".into(),
                url: "https://store.example/p/lst_test".into(),
            })
        });
        commerce
    }

    /// Advertising mock that always launches successfully
    pub fn ok_ads() -> MockAdvertisingChannel {
        let mut ads = MockAdvertisingChannel::new();
        ads.expect_platform().returning(|| AdPlatform::Meta);
        ads.expect_launch().returning(|_, _, _| {
            Ok(CampaignReceipt {
                campaign_id: "camp_test".into(),
                status: "active".into(),
            })
        });
        ads
    }

    /// Advertising mock whose launches always fail transiently
    pub fn rate_limited_ads() -> MockAdvertisingChannel {
        let mut ads = MockAdvertisingChannel::new();
        ads.expect_platform().returning(|| AdPlatform::Meta);
        ads.expect_launch()
            .returning(|_, _, _| Err(ChannelError::transient("rate limited")));
        ads
    }

    /// Social mock that always schedules successfully
    pub fn ok_social() -> MockSocialChannel {
        let mut social = MockSocialChannel::new();
        social.expect_schedule().returning(|_, _| {
            Ok(PostReceipt {
                post_id: "post_test".into(),
                status: "scheduled".into(),
            })
        });
        social
    }

    /// The full channel set offered to the decision engine in tests
    pub fn all_channels() -> Vec<Channel> {
        vec![
            Channel::Content,
            Channel::Commerce,
            Channel::Advertising(AdPlatform::Meta),
            Channel::Social,
        ]
    }

    /// Build an orchestrator from explicit collaborators
    pub fn orchestrator_with<C, M, A, S>(
        content: C,
        commerce: M,
        advertising: A,
        social: S,
        config: AutopilotConfig,
    ) -> Orchestrator<C, M, A, S>
    where
        C: ContentChannel + 'static,
        M: CommerceChannel + 'static,
        A: AdvertisingChannel + 'static,
        S: SocialChannel + 'static,
    {
        let engine = DecisionEngine::new(config.decision.clone(), StrategyBook::standard());
        Orchestrator::new(
            Arc::new(content),
            Arc::new(commerce),
            Arc::new(advertising),
            Arc::new(social),
            engine,
            config,
            Self::all_channels(),
        )
        .expect("channels configured")
    }

    /// Orchestrator where every channel succeeds
    pub fn happy_orchestrator() -> Orchestrator<
        MockContentChannel,
        MockCommerceChannel,
        MockAdvertisingChannel,
        MockSocialChannel,
    > {
        Self::orchestrator_with(
            Self::ok_content(),
            Self::ok_commerce(),
            Self::ok_ads(),
            Self::ok_social(),
            TestFixtures::fast_config(),
        )
    }

    /// Count a tenant's audit events of one kind
    pub async fn count_events(
        shared: &Arc<Mutex<SharedState>>,
        tenant_id: TenantId,
        kind: AiEventKind,
    ) -> usize {
        let state = shared.lock().await;
        state
            .ledger
            .events_for_tenant(tenant_id)
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Poll until `predicate` holds or the timeout elapses
    pub async fn wait_until<F, Fut>(mut predicate: F, timeout: Duration)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate().await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Commerce collaborator whose publishes block until released
///
/// Lets a test hold a cycle in the Deploying phase while it inspects or
/// cancels it.
pub struct GatedCommerce {
    gate: Arc<Notify>,
    entered: Arc<Notify>,
}

impl GatedCommerce {
    pub fn new() -> (Self, Arc<Notify>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        (
            Self {
                gate: Arc::clone(&gate),
                entered: Arc::clone(&entered),
            },
            gate,
            entered,
        )
    }
}

#[async_trait::async_trait]
impl CommerceChannel for GatedCommerce {
    async fn publish(&self, _draft: &ProductDraft) -> Result<Listing, ChannelError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(Listing {
            listing_id: "lst_gated".into(),
            url: "https://store.example/p/lst_gated".into(),
        })
    }
}
