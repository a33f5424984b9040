//! Deferred tasks.
//!
//! Webhook branches never call the payment provider inline. Compensating
//! actions (currently refunds) are written to `scheduled_tasks` and executed
//! by a background loop that claims due rows, runs them through the
//! [`PaymentGateway`], and retries failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{RefundPayload, ScheduledTask, TaskKind};
use crate::payments::PaymentGateway;

/// A task that has failed this many times is marked failed for good.
pub const MAX_TASK_ATTEMPTS: i64 = 5;

/// How long a claimed task may stay running before another poll reclaims it.
pub const TASK_LEASE_SECS: i64 = 300;

const BASE_BACKOFF_SECS: i64 = 60;
const CLAIM_BATCH: i64 = 20;

/// Queue a refund to run on the next poll.
pub fn schedule_refund(conn: &Connection, payload: &RefundPayload) -> Result<ScheduledTask> {
    let body = serde_json::to_string(payload)?;
    let task = queries::create_scheduled_task(conn, TaskKind::Refund, &body, Utc::now().timestamp())?;
    tracing::info!(
        "Scheduled refund task {} for payment intent {}",
        task.id,
        payload.payment_intent_id
    );
    Ok(task)
}

/// Delay before the next try after `attempts` failures: 1m, 2m, 4m, ...
pub fn backoff_secs(attempts: i64) -> i64 {
    BASE_BACKOFF_SECS * 2_i64.pow(attempts.saturating_sub(1).clamp(0, 16) as u32)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskRunSummary {
    pub done: usize,
    pub retried: usize,
    pub failed: usize,
}

async fn execute(task: &ScheduledTask, gateway: &dyn PaymentGateway) -> Result<()> {
    match task.kind {
        TaskKind::Refund => {
            let payload: RefundPayload = serde_json::from_str(&task.payload)?;
            let refund_id = gateway
                .create_refund(&payload.payment_intent_id, &payload.reason)
                .await?;
            tracing::info!(
                "Refund {} issued for payment intent {} (task {})",
                refund_id,
                payload.payment_intent_id,
                task.id
            );
            Ok(())
        }
    }
}

enum Settled {
    Done,
    Retried,
    Failed,
}

/// Record how a claimed task ended.
fn settle(pool: &DbPool, task: &ScheduledTask, outcome: Result<()>) -> Result<Settled> {
    let conn = pool.get()?;
    match outcome {
        Ok(()) => {
            queries::complete_task(&conn, &task.id)?;
            Ok(Settled::Done)
        }
        Err(e) if task.attempts >= MAX_TASK_ATTEMPTS => {
            tracing::error!(
                "Task {} failed permanently after {} attempts: {}",
                task.id,
                task.attempts,
                e
            );
            queries::fail_task(&conn, &task.id, &e.to_string())?;
            Ok(Settled::Failed)
        }
        Err(e) => {
            let run_at = Utc::now().timestamp() + backoff_secs(task.attempts);
            tracing::warn!(
                "Task {} attempt {} failed, retrying at {}: {}",
                task.id,
                task.attempts,
                run_at,
                e
            );
            queries::reschedule_task(&conn, &task.id, &e.to_string(), run_at)?;
            Ok(Settled::Retried)
        }
    }
}

/// Claim every due task and run it once.
///
/// A task whose result cannot be recorded stays running until its lease
/// expires and is then claimed again; the rest of the batch still runs.
pub async fn run_due_tasks(pool: &DbPool, gateway: &dyn PaymentGateway) -> Result<TaskRunSummary> {
    let tasks = {
        let conn = pool.get()?;
        queries::claim_due_tasks(&conn, Utc::now().timestamp(), TASK_LEASE_SECS, CLAIM_BATCH)?
    };

    let mut summary = TaskRunSummary::default();
    for task in tasks {
        // Reclaimed after too many expired leases
        let outcome = if task.attempts > MAX_TASK_ATTEMPTS {
            Err(AppError::Internal(format!(
                "Abandoned after {} attempts without a recorded result",
                MAX_TASK_ATTEMPTS
            )))
        } else {
            execute(&task, gateway).await
        };

        match settle(pool, &task, outcome) {
            Ok(Settled::Done) => summary.done += 1,
            Ok(Settled::Retried) => summary.retried += 1,
            Ok(Settled::Failed) => summary.failed += 1,
            Err(e) => tracing::error!(
                "Could not record result of task {}; it is reclaimed after {}: {}",
                task.id,
                task.run_at,
                e
            ),
        }
    }

    Ok(summary)
}

/// Poll for due tasks every `poll_secs` seconds until the runtime shuts down.
pub fn spawn_task_runner(
    pool: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    poll_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
        loop {
            interval.tick().await;
            match run_due_tasks(&pool, gateway.as_ref()).await {
                Ok(summary) if summary != TaskRunSummary::default() => {
                    tracing::info!(
                        "Task run: done={}, retried={}, failed={}",
                        summary.done,
                        summary.retried,
                        summary.failed
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Task runner error: {}", e),
            }
        }
    })
}
