use std::time::Duration;

use common::{
    assert_unique, count, default_config, open_session, open_session_with_target, push_valid,
};
use tern_ingestor_core::{
    FailureReason, Outcome, Result,
    target::{Fault, InMemoryTarget},
};

mod common;

fn failure(outcomes: &[Outcome], seq: u64) -> Option<&FailureReason> {
    outcomes
        .iter()
        .find(|outcome| outcome.seq == seq)
        .and_then(Outcome::as_failure)
}

#[tokio::test]
async fn test_target_rejects_single_records() -> Result<()> {
    let (session, target) = open_session(default_config().with_batch_size(50, 50));
    target.reject_sequences([3, 7]);

    push_valid(&session, 0..50).await?;
    let outcomes = session.finish().await?;

    assert_eq!(target.batch_sizes(), vec![50]);
    assert_unique(&outcomes);

    let counts = count(&outcomes);
    assert_eq!(counts.accepted, 48);
    assert_eq!(counts.failed, 2);

    for seq in [3, 7] {
        assert!(matches!(
            failure(&outcomes, seq),
            Some(FailureReason::RejectedByTarget { .. })
        ));
    }
    assert!(failure(&outcomes, 4).is_none());

    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(1, 20)
        .with_retry_limit(3);
    let (session, target) = open_session(config);
    for _ in 0..3 {
        target.push_fault(Fault::Transient);
    }

    push_valid(&session, 0..20).await?;
    let outcomes = session.finish().await?;

    assert_eq!(count(&outcomes).accepted, 20);
    assert_eq!(target.calls(), 4);
    assert_eq!(target.stored_len(), 20);

    Ok(())
}

#[tokio::test]
async fn test_retry_statistics() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(1, 10)
        .with_retry_limit(3);
    let (session, target) = open_session(config);
    for _ in 0..3 {
        target.push_fault(Fault::Transient);
    }

    push_valid(&session, 0..10).await?;
    session.wait_complete().await;

    let stats = session.stats();
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.retries, 3);
    assert_eq!(session.totals().accepted, 10);

    session.finish().await?;
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(1, 10)
        .with_retry_limit(2);
    let (session, target) = open_session(config);
    for _ in 0..3 {
        target.push_fault(Fault::Transient);
    }

    push_valid(&session, 0..10).await?;
    let outcomes = session.finish().await?;

    assert_eq!(count(&outcomes).failed, 10);
    assert_eq!(target.calls(), 3);
    assert!(matches!(
        failure(&outcomes, 0),
        Some(FailureReason::RetriesExhausted { attempts: 3, .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_permanent_failure_does_not_stop_the_stream() -> Result<()> {
    let config = default_config()
        .with_batch_size(10, 10)
        .with_retry_limit(5);
    let (session, target) = open_session(config);
    target.push_fault(Fault::Permanent);

    push_valid(&session, 0..30).await?;
    let outcomes = session.finish().await?;

    assert_eq!(outcomes.len(), 30);
    assert_unique(&outcomes);
    assert_eq!(target.calls(), 3);

    let counts = count(&outcomes);
    assert_eq!(counts.failed, 10);
    assert_eq!(counts.accepted, 20);
    assert!(
        outcomes
            .iter()
            .filter_map(Outcome::as_failure)
            .all(|reason| matches!(reason, FailureReason::Permanent { .. }))
    );

    Ok(())
}

#[tokio::test]
async fn test_short_response_fails_the_batch() -> Result<()> {
    let (session, target) = open_session(default_config().with_batch_size(5, 5));
    target.push_fault(Fault::ShortResponse);

    push_valid(&session, 0..5).await?;
    let outcomes = session.finish().await?;

    assert_eq!(count(&outcomes).failed, 5);
    match failure(&outcomes, 2) {
        Some(FailureReason::Permanent { message }) => {
            assert!(message.contains("4 statuses for a batch of 5 records"));
        }
        other => panic!("unexpected failure {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_lost_response_is_retried_without_duplicates() -> Result<()> {
    tokio::time::pause();

    let (session, target) = open_session(default_config().with_batch_size(8, 8));
    target.push_fault(Fault::TransientAfterWrite);

    push_valid(&session, 0..8).await?;
    let outcomes = session.finish().await?;

    assert_eq!(count(&outcomes).accepted, 8);
    assert_eq!(target.calls(), 2);
    assert_eq!(target.stored_len(), 8);
    assert_eq!(target.duplicates(), 8);

    Ok(())
}

#[tokio::test]
async fn test_hanging_target_times_out() -> Result<()> {
    tokio::time::pause();

    let config = default_config()
        .with_batch_size(4, 4)
        .with_retry_limit(0)
        .with_per_attempt_timeout(Duration::from_millis(100));
    let target = InMemoryTarget::new();
    target.push_fault(Fault::Hang);
    let (session, target) = open_session_with_target(config, target);

    push_valid(&session, 0..8).await?;
    let outcomes = session.finish().await?;

    assert_eq!(target.calls(), 2);
    let counts = count(&outcomes);
    assert_eq!(counts.failed, 4);
    assert_eq!(counts.accepted, 4);
    assert!(outcomes.iter().filter_map(Outcome::as_failure).all(|reason| matches!(
        reason,
        FailureReason::RetriesExhausted { attempts: 1, message } if message.contains("timed out")
    )));

    Ok(())
}
