//! Tests for the deferred task runner.

use std::sync::Arc;

use artlist::scheduler::{
    MAX_TASK_ATTEMPTS, TASK_LEASE_SECS, TaskRunSummary, run_due_tasks, schedule_refund,
};

mod common;
use common::*;

fn refund_payload(payment_intent_id: &str) -> RefundPayload {
    RefundPayload {
        payment_intent_id: payment_intent_id.to_string(),
        open_call_id: Some("oc_missing".into()),
        reason: "open_call_not_found".into(),
    }
}

#[tokio::test]
async fn test_due_refund_runs_once_and_completes() {
    let pool = create_test_pool();
    let gateway = MockGateway::default();
    let task_id = {
        let conn = pool.get().unwrap();
        schedule_refund(&conn, &refund_payload("pi_refund_me")).unwrap().id
    };

    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(
        summary,
        TaskRunSummary {
            done: 1,
            retried: 0,
            failed: 0
        }
    );
    assert_eq!(
        gateway.refunds.lock().unwrap().as_slice(),
        &[("pi_refund_me".to_string(), "open_call_not_found".to_string())]
    );

    {
        let conn = pool.get().unwrap();
        let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.attempts, 1);
    }

    // Completed tasks are never picked up again
    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary, TaskRunSummary::default());
    assert_eq!(gateway.refund_count(), 1);
}

#[tokio::test]
async fn test_failed_refund_is_rescheduled_with_backoff() {
    let pool = create_test_pool();
    let gateway = MockGateway::failing_refunds();
    let task_id = {
        let conn = pool.get().unwrap();
        schedule_refund(&conn, &refund_payload("pi_disputed")).unwrap().id
    };

    let before = chrono::Utc::now().timestamp();
    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary.retried, 1);

    {
        let conn = pool.get().unwrap();
        let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert!(task.run_at >= before + 60);
        assert!(task.last_error.unwrap().contains("Refund failed"));
    }

    // Not due yet
    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary, TaskRunSummary::default());
}

#[tokio::test]
async fn test_refund_fails_permanently_after_max_attempts() {
    let pool = create_test_pool();
    let gateway = MockGateway::failing_refunds();
    let task_id = {
        let conn = pool.get().unwrap();
        let task = schedule_refund(&conn, &refund_payload("pi_hopeless")).unwrap();
        conn.execute(
            "UPDATE scheduled_tasks SET attempts = ?1 WHERE id = ?2",
            rusqlite::params![MAX_TASK_ATTEMPTS - 1, &task.id],
        )
        .unwrap();
        task.id
    };

    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary.failed, 1);

    let conn = pool.get().unwrap();
    let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, MAX_TASK_ATTEMPTS);
    assert!(queries::list_tasks_by_status(&conn, TaskStatus::Pending).unwrap().is_empty());
}

/// Claim a task as a runner would, then push its lease into the past as if
/// that runner had died before recording a result.
fn claim_and_abandon(pool: &DbPool) {
    let conn = pool.get().unwrap();
    let now = chrono::Utc::now().timestamp();
    let claimed = queries::claim_due_tasks(&conn, now, TASK_LEASE_SECS, 10).unwrap();
    assert_eq!(claimed.len(), 1);
    conn.execute(
        "UPDATE scheduled_tasks SET run_at = ?1 WHERE id = ?2",
        rusqlite::params![now - 1, &claimed[0].id],
    )
    .unwrap();
}

#[tokio::test]
async fn test_running_task_is_not_reclaimed_before_lease_expires() {
    let pool = create_test_pool();
    let gateway = MockGateway::default();
    let task_id = {
        let conn = pool.get().unwrap();
        let task = schedule_refund(&conn, &refund_payload("pi_leased")).unwrap();
        let now = chrono::Utc::now().timestamp();
        let claimed = queries::claim_due_tasks(&conn, now, TASK_LEASE_SECS, 10).unwrap();
        assert_eq!(claimed[0].run_at, now + TASK_LEASE_SECS);
        task.id
    };

    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary, TaskRunSummary::default());
    assert_eq!(gateway.refund_count(), 0);

    let conn = pool.get().unwrap();
    let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_interrupted_task_is_reclaimed_after_lease_expires() {
    let pool = create_test_pool();
    let gateway = MockGateway::default();
    let task_id = {
        let conn = pool.get().unwrap();
        schedule_refund(&conn, &refund_payload("pi_interrupted")).unwrap().id
    };
    claim_and_abandon(&pool);

    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(gateway.refund_count(), 1);

    let conn = pool.get().unwrap();
    let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn test_task_abandoned_too_often_fails_without_running() {
    let pool = create_test_pool();
    let gateway = MockGateway::default();
    let task_id = {
        let conn = pool.get().unwrap();
        let task = schedule_refund(&conn, &refund_payload("pi_crashy")).unwrap();
        conn.execute(
            "UPDATE scheduled_tasks SET attempts = ?1 WHERE id = ?2",
            rusqlite::params![MAX_TASK_ATTEMPTS, &task.id],
        )
        .unwrap();
        task.id
    };
    claim_and_abandon(&pool);

    let summary = run_due_tasks(&pool, &gateway).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(gateway.refund_count(), 0);

    let conn = pool.get().unwrap();
    let task = queries::get_scheduled_task(&conn, &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_webhook_scheduled_refund_reaches_gateway() {
    let gateway = Arc::new(MockGateway::default());
    let state = create_test_app_state_with(test_settings(), gateway.clone());

    let session = serde_json::json!({
        "id": "cs_orphan",
        "payment_status": "paid",
        "payment_intent": "pi_orphan",
        "amount_total": 5000,
        "metadata": {
            "account_type": "organizer",
            "payment_type": "One-time",
            "open_call_id": "oc_gone"
        }
    });
    let event = stripe_event("evt_orphan", "checkout.session.completed", session);
    post_webhook(test_app(state.clone()), event.to_string(), None).await;

    // The webhook itself never refunds inline
    assert_eq!(gateway.refund_count(), 0);

    let summary = run_due_tasks(&state.db, gateway.as_ref()).await.unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(gateway.refunds.lock().unwrap()[0].0, "pi_orphan");
}
