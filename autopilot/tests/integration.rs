//! Integration tests for multi-cycle, concurrency, and failure scenarios
//!
//! Each test drives the real orchestrator with mock or gated collaborators
//! and asserts against the ledger, the cache, and the user-visible status
//! surface.

mod common;

use common::helpers::GatedCommerce;
use common::{TestFixtures, TestHelpers};

use autopilot::error::ChannelError;
use autopilot::traits::{Listing, MockAdvertisingChannel, MockCommerceChannel, MockSocialChannel};
use autopilot::{CycleEnd, CyclePhase, CycleStatus, StrategyCache};
use shared::{AiEventKind, Channel, ProfitCategory, Scope, StrategyKey};
use std::sync::Arc;
use std::time::Duration;

/// Scenario: one channel exhausts retries while the rest succeed
#[tokio::test]
async fn partial_channel_failure_degrades_the_cycle() {
    let orchestrator = TestHelpers::orchestrator_with(
        TestHelpers::ok_content(),
        TestHelpers::ok_commerce(),
        TestHelpers::rate_limited_ads(),
        TestHelpers::ok_social(),
        TestFixtures::fast_config(),
    );
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    orchestrator.run_cycle_now(tenant_id, None).await.unwrap();

    let shared = orchestrator.shared_state();
    let state = shared.lock().await;
    let rt = state.tenants.get(&tenant_id).unwrap();
    let report = rt.last_report.as_ref().unwrap();

    // The cycle ends degraded, not failed: siblings kept their results
    assert_eq!(report.end, CycleEnd::Degraded);
    assert_eq!(rt.status(), CycleStatus::Degraded);

    // Exactly one settled task per channel: 3 successes, 1 failure
    let settled: Vec<_> = state
        .ledger
        .events_for_tenant(tenant_id)
        .filter(|e| e.kind == AiEventKind::TaskSettled)
        .collect();
    assert_eq!(settled.len(), 4);
    assert_eq!(settled.iter().filter(|e| e.success).count(), 3);
    assert_eq!(settled.iter().filter(|e| !e.success).count(), 1);

    // No ad-attributed profit was recorded
    assert!(state
        .ledger
        .profits_for_tenant(tenant_id)
        .all(|p| p.category != ProfitCategory::AdReturn));

    // The ad attempt is on the ledger as a failed experience
    let ad_experience = state
        .ledger
        .experiences()
        .iter()
        .find(|e| matches!(e.action, Channel::Advertising(_)))
        .unwrap();
    assert!(!ad_experience.success);
    assert!(ad_experience.result.contains("retries exhausted"));
}

/// Scenario: crossing the reinvestment threshold emits exactly one
/// directive; re-evaluating the same window emits none
#[tokio::test]
async fn reinvestment_directive_fires_once_per_profit_window() {
    // First publish succeeds (realized profit); later publishes fail so the
    // second cycle adds no new profit entries
    let mut commerce = MockCommerceChannel::new();
    commerce.expect_publish().times(1).returning(|_| {
        Ok(Listing {
            listing_id: "lst_1".into(),
            url: "https://store.example/p/1".into(),
        })
    });
    commerce
        .expect_publish()
        .returning(|_| Err(ChannelError::permanent("store offline")));

    let orchestrator = TestHelpers::orchestrator_with(
        TestHelpers::ok_content(),
        commerce,
        TestHelpers::ok_ads(),
        TestHelpers::ok_social(),
        TestFixtures::fast_config(),
    );
    let tenant = TestFixtures::tenant_with_threshold(10.0);
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    // Cycle 1: $19 realized profit crosses the $10 threshold
    orchestrator.run_cycle_now(tenant_id, None).await.unwrap();
    let shared = orchestrator.shared_state();
    {
        let state = shared.lock().await;
        assert_eq!(state.ledger.total_realized_profit(tenant_id), 19.0);
        let rt = state.tenants.get(&tenant_id).unwrap();
        assert!(rt.pending_directive.is_some(), "directive becomes context");
    }
    assert_eq!(
        TestHelpers::count_events(&shared, tenant_id, AiEventKind::DirectiveIssued).await,
        1
    );

    // Cycle 2: no new realized profit, so the same window stays covered
    orchestrator.run_cycle_now(tenant_id, None).await.unwrap();
    assert_eq!(
        TestHelpers::count_events(&shared, tenant_id, AiEventKind::DirectiveIssued).await,
        1,
        "unchanged window must not emit a duplicate directive"
    );
}

/// Scenario: cancellation during Deploying keeps recorded entries and
/// dispatches nothing further
#[tokio::test]
async fn cancellation_during_deploying_preserves_prior_records() {
    let (commerce, gate, entered) = GatedCommerce::new();
    let mut config = TestFixtures::fast_config();
    config.dispatch.task_timeout = Duration::from_secs(30);
    config.dispatch.cycle_deadline = Duration::from_secs(60);

    // Marketing collaborators would panic if called after cancellation
    let mut ads = MockAdvertisingChannel::new();
    ads.expect_platform().returning(|| shared::AdPlatform::Meta);
    ads.expect_launch().times(0);
    let mut social = MockSocialChannel::new();
    social.expect_schedule().times(0);

    let orchestrator = Arc::new(TestHelpers::orchestrator_with(
        TestHelpers::ok_content(),
        commerce,
        ads,
        social,
        config,
    ));
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;
    let shared = orchestrator.shared_state();

    let runner = Arc::clone(&orchestrator);
    let cycle = tokio::spawn(async move { runner.run_cycle_now(tenant_id, None).await });

    // Wait until the publish call is in flight, then cancel
    entered.notified().await;
    {
        let mut state = shared.lock().await;
        let rt = state.tenants.get_mut(&tenant_id).unwrap();
        assert_eq!(rt.active.as_ref().unwrap().phase, CyclePhase::Deploying);
        assert!(rt.request_cancel());
    }
    gate.notify_one();
    cycle.await.unwrap().unwrap();

    let state = shared.lock().await;
    let rt = state.tenants.get(&tenant_id).unwrap();
    assert_eq!(rt.last_report.as_ref().unwrap().end, CycleEnd::Cancelled);
    assert_eq!(rt.status(), CycleStatus::Cancelled);

    // Content and commerce settled before cancellation and stay intact
    let settled: Vec<_> = state
        .ledger
        .events_for_tenant(tenant_id)
        .filter(|e| e.kind == AiEventKind::TaskSettled)
        .collect();
    assert_eq!(settled.len(), 2);
    assert_eq!(state.ledger.experiences().len(), 2);
    assert_eq!(state.ledger.total_realized_profit(tenant_id), 19.0);

    let cancelled_events = state
        .ledger
        .events_for_tenant(tenant_id)
        .filter(|e| e.kind == AiEventKind::CycleCancelled)
        .count();
    assert_eq!(cancelled_events, 1);
}

/// Invariant: at most one cycle holds a tenant's lease at any instant
#[tokio::test]
async fn overlapping_ticks_skip_with_a_conflict_event() {
    let (commerce, gate, entered) = GatedCommerce::new();
    let mut config = TestFixtures::fast_config();
    config.dispatch.task_timeout = Duration::from_secs(30);
    config.dispatch.cycle_deadline = Duration::from_secs(60);

    let orchestrator = Arc::new(TestHelpers::orchestrator_with(
        TestHelpers::ok_content(),
        commerce,
        TestHelpers::ok_ads(),
        TestHelpers::ok_social(),
        config,
    ));
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;
    let shared = orchestrator.shared_state();

    let runner = Arc::clone(&orchestrator);
    let first = tokio::spawn(async move { runner.run_cycle_now(tenant_id, None).await });
    entered.notified().await;

    // A second tick while the lease is held: skipped, logged, not an error
    orchestrator.run_cycle_now(tenant_id, None).await.unwrap();
    assert_eq!(
        TestHelpers::count_events(&shared, tenant_id, AiEventKind::OrchestrationConflict).await,
        1
    );
    {
        let state = shared.lock().await;
        let rt = state.tenants.get(&tenant_id).unwrap();
        assert!(rt.active.is_some(), "first cycle still owns the lease");
    }

    gate.notify_one();
    first.await.unwrap().unwrap();

    let state = shared.lock().await;
    let rt = state.tenants.get(&tenant_id).unwrap();
    assert!(rt.active.is_none());
    assert_eq!(rt.last_report.as_ref().unwrap().end, CycleEnd::Completed);
}

/// Round-trip: cache aggregates equal an exact replay of the ledger
#[tokio::test]
async fn cache_running_mean_matches_ledger_replay() {
    let orchestrator = TestHelpers::happy_orchestrator();
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    for _ in 0..3 {
        orchestrator.run_cycle_now(tenant_id, None).await.unwrap();
    }

    let shared = orchestrator.shared_state();
    let state = shared.lock().await;
    let commerce_strategy = state
        .ledger
        .experiences()
        .iter()
        .find(|e| e.action == Channel::Commerce)
        .map(|e| e.strategy.clone())
        .unwrap();
    let key = StrategyKey {
        scope: Scope::Tenant(tenant_id),
        niche: TestFixtures::NICHE.into(),
        channel: Channel::Commerce,
        strategy: commerce_strategy,
    };

    let live = state.cache.get(&key).expect("entry exists").clone();
    let replayed = StrategyCache::rebuild_entry(&state.ledger, &key).expect("replayable");

    assert_eq!(live.usage_count, replayed.usage_count);
    assert_eq!(live.success_count, replayed.success_count);
    assert!((live.average_profit - replayed.average_profit).abs() < 1e-9);
    assert!((live.success_rate - replayed.success_rate).abs() < 1e-9);
    assert!((0.0..=1.0).contains(&live.success_rate));
}

/// The control surface works end to end against the running loop
#[tokio::test]
async fn control_surface_drives_and_observes_cycles() {
    let mut orchestrator = TestHelpers::happy_orchestrator();
    let mut tenant = TestFixtures::tenant();
    tenant.autopilot_enabled = false;
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    let handle = orchestrator.handle();
    let shutdown = orchestrator.shutdown_sender();
    let shared = orchestrator.shared_state();
    let loop_task = tokio::spawn(async move { orchestrator.run().await });

    // Reconfigure, then trigger one manual cycle
    handle
        .set_reinvestment(tenant_id, 500.0, shared::BudgetPolicy::default())
        .await
        .unwrap();
    handle.trigger_cycle(tenant_id).await.unwrap();

    let probe = shared.clone();
    TestHelpers::wait_until(
        move || {
            let probe = probe.clone();
            async move {
                let state = probe.lock().await;
                state
                    .tenants
                    .get(&tenant_id)
                    .is_some_and(|rt| rt.last_report.is_some())
            }
        },
        Duration::from_secs(5),
    )
    .await;

    let status = handle.cycle_status(tenant_id).await.unwrap();
    assert_eq!(status.status, CycleStatus::Idle);
    assert!(!status.autopilot_enabled);
    let report = status.last_report.unwrap();
    assert_eq!(report.end, CycleEnd::Completed);
    assert_eq!(report.channels.len(), 4);

    let kpis = handle.kpis(tenant_id).await.unwrap();
    assert!((kpis.total_revenue - TestFixtures::LIST_PRICE).abs() < 1e-9);
    assert_eq!(kpis.active_campaigns, 1);
    assert_eq!(kpis.insights.top_niches[0].niche, TestFixtures::NICHE);

    // Threshold update landed in the runtime
    {
        let state = shared.lock().await;
        let rt = state.tenants.get(&tenant_id).unwrap();
        assert_eq!(rt.tenant.reinvestment_threshold, 500.0);
    }

    shutdown.send(()).await.unwrap();
    loop_task.await.unwrap().unwrap();
}

/// The scheduler starts cycles on its own for enabled tenants
#[tokio::test]
async fn scheduler_runs_recurring_cycles_per_tenant() {
    let mut orchestrator = TestHelpers::happy_orchestrator();
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    let shutdown = orchestrator.shutdown_sender();
    let shared = orchestrator.shared_state();
    let loop_task = tokio::spawn(async move { orchestrator.run().await });

    // Two full cycles' worth of experiences (4 channels each)
    let probe = shared.clone();
    TestHelpers::wait_until(
        move || {
            let probe = probe.clone();
            async move {
                let state = probe.lock().await;
                state.ledger.experiences().len() >= 8
            }
        },
        Duration::from_secs(10),
    )
    .await;

    shutdown.send(()).await.unwrap();
    loop_task.await.unwrap().unwrap();

    let state = shared.lock().await;
    assert!(state
        .ledger
        .experiences()
        .iter()
        .all(|e| e.tenant_id == tenant_id));
}

/// A finished cycle leaves a parseable ledger snapshot behind
#[tokio::test]
async fn finished_cycles_export_a_ledger_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TestHelpers::happy_orchestrator().with_snapshot_exporter(Arc::new(
        autopilot::services::RealFileSystem::with_base_dir(dir.path().to_path_buf()),
    ));
    let tenant = TestFixtures::tenant();
    let tenant_id = tenant.id;
    orchestrator.register_tenant(tenant).await;

    orchestrator.run_cycle_now(tenant_id, None).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("ledger.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["experiences"].as_array().unwrap().len(), 4);
    assert!(!snapshot["events"].as_array().unwrap().is_empty());
}

/// Two tenants' cycles are independent: one failing channel set never
/// blocks the other tenant
#[tokio::test]
async fn tenants_do_not_block_each_other() {
    let orchestrator = TestHelpers::orchestrator_with(
        TestHelpers::ok_content(),
        TestHelpers::ok_commerce(),
        TestHelpers::rate_limited_ads(),
        TestHelpers::ok_social(),
        TestFixtures::fast_config(),
    );
    let tenant_a = TestFixtures::tenant();
    let mut tenant_b = TestFixtures::tenant();
    tenant_b.niche = "cooking".into();
    let (id_a, id_b) = (tenant_a.id, tenant_b.id);
    orchestrator.register_tenant(tenant_a).await;
    orchestrator.register_tenant(tenant_b).await;

    // Both run; each sees its own degraded-but-finished cycle
    orchestrator.run_cycle_now(id_a, None).await.unwrap();
    orchestrator.run_cycle_now(id_b, None).await.unwrap();

    let shared = orchestrator.shared_state();
    let state = shared.lock().await;
    for id in [id_a, id_b] {
        let rt = state.tenants.get(&id).unwrap();
        assert_eq!(rt.last_report.as_ref().unwrap().end, CycleEnd::Degraded);
    }

    // Ledger rows never leak across tenants
    let a_niches: Vec<_> = state
        .ledger
        .experiences()
        .iter()
        .filter(|e| e.tenant_id == id_a)
        .filter_map(|e| e.context.get("niche").and_then(|n| n.as_str()))
        .collect();
    assert!(a_niches.iter().all(|n| *n == "fitness"));
}
