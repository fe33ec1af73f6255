//! Worker protocol integration tests.
//!
//! Exercises the event surface guarantees: ordering, exactly one
//! terminal event, monotonic progress and cooperative cancellation.

use verbatim::error::TranscriptionError;
use verbatim::worker::{spawn_worker, CancelToken, WorkerEvent};

async fn drain<T>(handle: &mut verbatim::worker::WorkerHandle<T>) -> Vec<WorkerEvent<T>> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn events_arrive_in_happens_before_order() {
    let mut handle = spawn_worker::<u32, _, _>("test", |events, _cancel| async move {
        events.progress("Phase", 10.0, "working");
        events.progress("Phase", 50.0, "still working");
        events.progress("Done", 100.0, "");
        Ok(42)
    });

    let events = drain(&mut handle).await;
    assert!(matches!(events.first(), Some(WorkerEvent::Started)));
    assert!(matches!(events.last(), Some(WorkerEvent::Finished(42))));

    let progress: Vec<f32> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![10.0, 50.0, 100.0]);
}

#[tokio::test]
async fn exactly_one_terminal_event() {
    let mut ok_handle = spawn_worker::<(), _, _>("test", |_events, _cancel| async move { Ok(()) });
    let ok_events = drain(&mut ok_handle).await;
    let terminals = ok_events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::Finished(_) | WorkerEvent::Error(_)))
        .count();
    assert_eq!(terminals, 1);

    let mut err_handle = spawn_worker::<(), _, _>("test", |_events, _cancel| async move {
        Err(TranscriptionError::Failed {
            detail: "decoder exploded".to_string(),
        }
        .into())
    });
    let err_events = drain(&mut err_handle).await;
    let terminals = err_events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::Finished(_) | WorkerEvent::Error(_)))
        .count();
    assert_eq!(terminals, 1);
    assert!(err_events
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error(msg) if msg.contains("decoder exploded"))));
}

#[tokio::test]
async fn progress_percent_is_clamped_monotonic() {
    let mut handle = spawn_worker::<(), _, _>("test", |events, _cancel| async move {
        events.progress("A", 30.0, "");
        events.progress("B", 10.0, ""); // out of order on purpose
        events.progress("C", 120.0, ""); // above the scale
        Ok(())
    });

    let events = drain(&mut handle).await;
    let progress: Vec<f32> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![30.0, 30.0, 100.0]);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn cancellation_yields_cancelled_error_and_no_finished() {
    let mut handle = spawn_worker::<(), _, _>("test", |events, cancel| async move {
        events.progress("Working", 10.0, "");
        loop {
            cancel.check()?;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    });

    handle.cancel();
    let events = drain(&mut handle).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error(msg) if msg == "Transcription cancelled")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkerEvent::Finished(_))));
}

#[tokio::test]
async fn no_progress_after_terminal_event() {
    let mut handle = spawn_worker::<(), _, _>("test", |events, _cancel| async move {
        events.progress("Only", 50.0, "");
        Ok(())
    });

    let events = drain(&mut handle).await;
    let terminal_index = events
        .iter()
        .position(|e| matches!(e, WorkerEvent::Finished(_) | WorkerEvent::Error(_)))
        .expect("terminal event must exist");
    assert!(events[terminal_index + 1..]
        .iter()
        .all(|e| !matches!(e, WorkerEvent::Progress { .. })));
}

#[tokio::test]
async fn stop_joins_the_worker_task() {
    let mut handle = spawn_worker::<(), _, _>("test", |_events, cancel| async move {
        loop {
            cancel.check()?;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    // Must return promptly: cancellation is observed within one poll.
    tokio::time::timeout(std::time::Duration::from_secs(2), handle.stop())
        .await
        .expect("stop must complete within the join bound");
}

#[tokio::test]
async fn cancel_token_checkpoints() {
    let token = CancelToken::new();
    assert!(token.check().is_ok());
    token.cancel();
    assert!(token.is_cancelled());
    assert!(matches!(
        token.check(),
        Err(TranscriptionError::Cancelled)
    ));

    // Clones share the flag.
    let clone = token.clone();
    assert!(clone.is_cancelled());
}
