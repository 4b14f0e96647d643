//! Concurrent channel task execution
//!
//! Fans a chosen strategy out into independent per-channel tasks. Each task
//! gets its own timeout and retry budget; a global semaphore bounds
//! concurrent collaborator calls across all tenants so one tenant's burst
//! cannot starve the rest or trip downstream rate limits.

use crate::config::{DispatchConfig, RetryPolicy};
use crate::error::ChannelError;
use crate::traits::{
    AdTargeting, AdvertisingChannel, CommerceChannel, ContentChannel, ProductDraft, SocialChannel,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use shared::{tenant_debug, tenant_warn, Channel, CycleId, OutcomeId, TaskOutcome, TaskStatus, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

/// The collaborator call a task will make
#[derive(Debug, Clone)]
pub enum TaskCall {
    Generate {
        niche: String,
        params: serde_json::Value,
    },
    Publish {
        draft: ProductDraft,
    },
    Launch {
        budget: f64,
        targeting: AdTargeting,
        creative: String,
    },
    Schedule {
        content: String,
        publish_at: DateTime<Utc>,
    },
}

/// One independent unit of channel work within a cycle
#[derive(Debug, Clone)]
pub struct ChannelTask {
    /// Position within the cycle; part of the stable outcome id
    pub index: u32,
    pub channel: Channel,
    pub strategy: String,
    pub call: TaskCall,
}

/// Executes channel tasks against the injected collaborators
pub struct Dispatcher<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    content: Arc<C>,
    commerce: Arc<M>,
    advertising: Arc<A>,
    social: Arc<S>,
    config: DispatchConfig,
    /// Shared across every tenant's cycles
    permits: Arc<Semaphore>,
}

impl<C, M, A, S> Dispatcher<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    pub fn new(
        content: Arc<C>,
        commerce: Arc<M>,
        advertising: Arc<A>,
        social: Arc<S>,
        config: DispatchConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            content,
            commerce,
            advertising,
            social,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Platform of the configured advertising collaborator
    pub fn ad_platform(&self) -> shared::AdPlatform {
        self.advertising.platform()
    }

    /// Deadline instant for a cycle starting now
    pub fn cycle_deadline(&self) -> Instant {
        Instant::now() + self.config.cycle_deadline
    }

    /// Run one group of tasks to settlement
    ///
    /// Every task settles: success, permanent failure, or degraded. A task
    /// failing never cancels its siblings. When the cancel signal is already
    /// set, nothing is dispatched and the group settles empty.
    pub async fn dispatch_group(
        &self,
        tenant_id: TenantId,
        cycle_id: CycleId,
        tasks: Vec<ChannelTask>,
        cancel: watch::Receiver<bool>,
        deadline: Instant,
    ) -> Vec<TaskOutcome> {
        if *cancel.borrow() {
            tenant_debug!(tenant_id, "🚫 Cancel observed, skipping {} tasks", tasks.len());
            return Vec::new();
        }

        let mut meta = Vec::with_capacity(tasks.len());
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            meta.push((task.index, task.channel, task.strategy.clone()));
            let runner = TaskRunner {
                content: Arc::clone(&self.content),
                commerce: Arc::clone(&self.commerce),
                advertising: Arc::clone(&self.advertising),
                social: Arc::clone(&self.social),
                permits: Arc::clone(&self.permits),
                task_timeout: self.config.task_timeout,
                retry: self.config.retry.clone(),
            };
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                runner
                    .run(tenant_id, cycle_id, task, cancel, deadline)
                    .await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(meta)
            .map(|(joined, (index, channel, strategy))| {
                joined.unwrap_or_else(|e| TaskOutcome {
                    outcome_id: OutcomeId::new(cycle_id, channel, index),
                    channel,
                    strategy,
                    status: TaskStatus::Degraded {
                        reason: format!("task aborted: {e}"),
                    },
                    attempts: 0,
                    payload: serde_json::Value::Null,
                })
            })
            .collect()
    }
}

/// Per-task execution state moved into the spawned task
struct TaskRunner<C, M, A, S> {
    content: Arc<C>,
    commerce: Arc<M>,
    advertising: Arc<A>,
    social: Arc<S>,
    permits: Arc<Semaphore>,
    task_timeout: Duration,
    retry: RetryPolicy,
}

impl<C, M, A, S> TaskRunner<C, M, A, S>
where
    C: ContentChannel,
    M: CommerceChannel,
    A: AdvertisingChannel,
    S: SocialChannel,
{
    async fn run(
        &self,
        tenant_id: TenantId,
        cycle_id: CycleId,
        task: ChannelTask,
        cancel: watch::Receiver<bool>,
        deadline: Instant,
    ) -> TaskOutcome {
        let outcome_id = OutcomeId::new(cycle_id, task.channel, task.index);
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.settle(
                    outcome_id,
                    &task,
                    TaskStatus::Degraded {
                        reason: "dispatcher shut down".into(),
                    },
                    0,
                    serde_json::Value::Null,
                )
            }
        };

        let mut attempts = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.settle(
                    outcome_id,
                    &task,
                    TaskStatus::Degraded {
                        reason: "cycle deadline reached".into(),
                    },
                    attempts,
                    serde_json::Value::Null,
                );
            }
            if *cancel.borrow() {
                return self.settle(
                    outcome_id,
                    &task,
                    TaskStatus::Degraded {
                        reason: "cancelled".into(),
                    },
                    attempts,
                    serde_json::Value::Null,
                );
            }

            attempts += 1;
            let call_timeout = self.task_timeout.min(remaining);
            let result = tokio::time::timeout(call_timeout, self.execute(&task.call)).await;

            match result {
                Ok(Ok((payload, revenue))) => {
                    return self.settle(
                        outcome_id,
                        &task,
                        TaskStatus::Succeeded { revenue },
                        attempts,
                        payload,
                    );
                }
                Ok(Err(ChannelError::Permanent { message })) => {
                    // Not retryable; settle immediately
                    return self.settle(
                        outcome_id,
                        &task,
                        TaskStatus::Failed { error: message },
                        attempts,
                        serde_json::Value::Null,
                    );
                }
                Ok(Err(ChannelError::Transient { message })) => {
                    if attempts >= self.retry.max_attempts {
                        return self.settle(
                            outcome_id,
                            &task,
                            TaskStatus::Degraded {
                                reason: format!("retries exhausted: {message}"),
                            },
                            attempts,
                            serde_json::Value::Null,
                        );
                    }
                    tenant_warn!(
                        tenant_id,
                        "⏳ Transient {} failure (attempt {}), backing off: {}",
                        task.channel,
                        attempts,
                        message
                    );
                }
                Err(_) => {
                    // A timed-out call counts as transient
                    if attempts >= self.retry.max_attempts {
                        return self.settle(
                            outcome_id,
                            &task,
                            TaskStatus::Degraded {
                                reason: "timed out".into(),
                            },
                            attempts,
                            serde_json::Value::Null,
                        );
                    }
                    tenant_warn!(
                        tenant_id,
                        "⏳ {} call timed out (attempt {}), backing off",
                        task.channel,
                        attempts
                    );
                }
            }

            let delay = backoff_delay(&self.retry, attempts);
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(delay.min(remaining)).await;
        }
    }

    fn settle(
        &self,
        outcome_id: OutcomeId,
        task: &ChannelTask,
        status: TaskStatus,
        attempts: u32,
        payload: serde_json::Value,
    ) -> TaskOutcome {
        TaskOutcome {
            outcome_id,
            channel: task.channel,
            strategy: task.strategy.clone(),
            status,
            attempts,
            payload,
        }
    }

    /// One collaborator call; returns the receipt payload and any realized
    /// revenue. A published listing settles at list price, the analog of
    /// recording the sale price on the business record at launch time.
    async fn execute(
        &self,
        call: &TaskCall,
    ) -> Result<(serde_json::Value, f64), ChannelError> {
        match call {
            TaskCall::Generate { niche, params } => {
                let draft = self.content.generate(niche, params).await?;
                let payload = serde_json::to_value(&draft).unwrap_or_default();
                Ok((payload, 0.0))
            }
            TaskCall::Publish { draft } => {
                let listing = self.commerce.publish(draft).await?;
                let mut payload = serde_json::to_value(&listing).unwrap_or_default();
                payload["price"] = serde_json::json!(draft.price);
                Ok((payload, draft.price))
            }
            TaskCall::Launch {
                budget,
                targeting,
                creative,
            } => {
                let receipt = self.advertising.launch(*budget, targeting, creative).await?;
                let payload = serde_json::to_value(&receipt).unwrap_or_default();
                Ok((payload, 0.0))
            }
            TaskCall::Schedule {
                content,
                publish_at,
            } => {
                let receipt = self.social.schedule(content, *publish_at).await?;
                let payload = serde_json::to_value(&receipt).unwrap_or_default();
                Ok((payload, 0.0))
            }
        }
    }
}

/// Exponential backoff with jitter for retry `attempt` (1-based)
fn backoff_delay(retry: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = retry.base_delay.saturating_mul(1u32 << exp);
    let capped = base.min(retry.max_delay);
    let jitter = capped.mul_f64(retry.jitter * rand::thread_rng().gen_range(0.0..=1.0));
    capped + jitter
}
