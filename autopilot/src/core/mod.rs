//! Core orchestration components
//!
//! Leaves first: the append-only ledger and the derived strategy cache,
//! then the decision engine that reads them, the collector that writes
//! them, the reinvestment policy, and the per-tenant cycle state machine.

pub mod collector;
pub mod decision;
pub mod memory;
pub mod reinvest;
pub mod state;
pub mod strategy_cache;

pub use collector::OutcomeCollector;
pub use decision::{Decision, DecisionEngine, DecisionSource, ManualOverride, RankedStrategy};
pub use memory::{IntelligenceInsights, MemoryLedger};
pub use reinvest::ReinvestmentPolicy;
pub use state::{
    CycleEnd, CycleHandle, CyclePhase, CycleReport, CycleStatus, ChannelResult, FailureBackoff,
    TenantRuntime,
};
pub use strategy_cache::StrategyCache;
