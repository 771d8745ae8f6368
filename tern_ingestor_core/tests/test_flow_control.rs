use std::{sync::Arc, time::Duration};

use common::{
    assert_unique, count, default_config, open_session_with_target, push_valid, vector_record,
    vector_schema,
};
use tern_ingestor_core::{
    Admission, OutcomeStatus, RejectReason, Result, Session,
    flow::SteppedLoadPolicy,
    target::InMemoryTarget,
};

mod common;

#[tokio::test]
async fn test_in_flight_batches_never_exceed_budget() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(10, 10)
        .with_concurrency(1, 3);
    let target = InMemoryTarget::new()
        .with_latency_range(Duration::from_millis(5), Duration::from_millis(50));
    let (session, target) = open_session_with_target(config, target);

    push_valid(&session, 0..500).await?;
    let outcomes = session.finish().await?;

    assert_eq!(count(&outcomes).accepted, 500);
    assert_eq!(target.calls(), 50);
    assert!(target.max_concurrent_calls() <= 3);

    Ok(())
}

#[tokio::test]
async fn test_dispatch_stats_track_admissions() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(10, 10)
        .with_concurrency(2, 2);
    let target = InMemoryTarget::new().with_latency(Duration::from_millis(10));
    let (session, target) = open_session_with_target(config, target);

    push_valid(&session, 0..200).await?;
    session.wait_complete().await;

    let stats = session.stats();
    assert_eq!(stats.batches, 20);
    assert_eq!(stats.budget_violations, 0);
    assert_eq!(stats.max_in_flight, 2);
    assert_eq!(target.max_concurrent_calls(), 2);

    session.finish().await?;
    Ok(())
}

#[tokio::test]
async fn test_cancel_rejects_later_records() -> Result<()> {
    let config = default_config().with_batch_size(1, 64);
    let (session, target) = open_session_with_target(config, InMemoryTarget::new());

    push_valid(&session, 0..500).await?;
    session.cancel();

    for seq in 500..1_000 {
        let admission = session.push(vector_record(seq)).await?;
        assert_eq!(admission, Admission::Rejected(RejectReason::SessionCancelled));
    }

    let outcomes = session.finish().await?;
    assert_eq!(outcomes.len(), 1_000);
    assert_unique(&outcomes);

    let counts = count(&outcomes);
    assert_eq!(counts.accepted, 500);
    assert_eq!(counts.rejected, 500);
    assert_eq!(target.stored_len(), 500);

    for outcome in &outcomes {
        if outcome.seq < 500 {
            assert!(outcome.is_accepted(), "{outcome}");
        } else {
            assert_eq!(
                outcome.status,
                OutcomeStatus::Rejected(RejectReason::SessionCancelled)
            );
        }
    }

    Ok(())
}

#[tokio::test]
async fn test_cancel_lets_in_flight_batches_complete() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(10, 10)
        .with_concurrency(1, 4);
    let target = InMemoryTarget::new().with_latency(Duration::from_millis(100));
    let (session, target) = open_session_with_target(config, target);

    push_valid(&session, 0..100).await?;
    while target.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(target.concurrent_calls() > 0);
    assert_eq!(target.stored_len(), 0);
    session.cancel();

    for seq in 100..150 {
        let admission = session.push(vector_record(seq)).await?;
        assert_eq!(admission, Admission::Rejected(RejectReason::SessionCancelled));
    }

    let outcomes = session.finish().await?;
    assert_eq!(outcomes.len(), 150);
    assert_unique(&outcomes);

    for outcome in &outcomes {
        if outcome.seq < 100 {
            assert!(outcome.is_accepted(), "{outcome}");
        } else {
            assert_eq!(
                outcome.status,
                OutcomeStatus::Rejected(RejectReason::SessionCancelled)
            );
        }
    }

    // Every admitted batch was submitted once and never retried.
    assert_eq!(target.calls(), 10);
    assert_eq!(target.batch_sizes(), vec![10; 10]);
    assert_eq!(target.duplicates(), 0);
    assert_eq!(target.stored_len(), 100);

    Ok(())
}

#[tokio::test]
async fn test_flow_shrinks_batches_under_load() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(10, 100)
        .with_concurrency(1, 4)
        .with_ema_alpha(1.0)
        .with_reference_load(100.0);
    let target = InMemoryTarget::new().with_latency(Duration::from_millis(400));
    let (session, target) = open_session_with_target(config, target);

    let initial = session.flow();
    assert_eq!(initial.ema, None);
    assert_eq!(initial.batch_size, 100);
    assert_eq!(initial.concurrency_budget, 4);

    push_valid(&session, 0..2_000).await?;
    session.wait_complete().await;

    let state = session.flow();
    let ema = state.ema.expect("ema after samples");
    assert!((400.0..401.0).contains(&ema), "ema {ema}");
    assert_eq!(state.batch_size, 28);
    assert_eq!(state.concurrency_budget, 2);

    let sizes = target.batch_sizes();
    assert_eq!(sizes[0], 100);
    assert!(sizes.contains(&28));
    assert!(sizes.iter().all(|size| *size <= 100));

    let outcomes = session.finish().await?;
    assert_eq!(count(&outcomes).accepted, 2_000);

    Ok(())
}

#[tokio::test]
async fn test_queue_depth_hint_drives_flow() -> Result<()> {
    let config = default_config()
        .with_batch_size(10, 100)
        .with_concurrency(1, 4)
        .with_ema_alpha(1.0);
    let target = Arc::new(InMemoryTarget::new().with_queue_depth_hint(1_000.0));
    let session = Session::open_with_policy(
        config,
        vector_schema(),
        target.clone(),
        Arc::new(SteppedLoadPolicy::new(100.0)),
    )?;

    push_valid(&session, 0..100).await?;
    session.wait_complete().await;

    let state = session.flow();
    assert_eq!(state.ema, Some(1_000.0));
    assert_eq!(state.batch_size, 10);
    assert_eq!(state.concurrency_budget, 1);

    session.finish().await?;
    Ok(())
}
