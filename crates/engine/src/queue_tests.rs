// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testutil::{engine, wait_until};
use fm_core::{Payload, QueueMessage};
use std::time::Duration;

fn message(fixture: &crate::testutil::TestEngine, job: &str) -> QueueMessage {
    QueueMessage::new(job.into(), Payload::new("crawl"), fixture.clock.epoch_ms())
}

#[test]
fn receive_on_empty_queue_returns_none() {
    let fixture = engine();
    assert!(fixture.queue.receive().unwrap().is_none());
}

#[test]
fn receive_leases_and_ack_deletes() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    let (received, token) = fixture.queue.receive().unwrap().unwrap();
    assert_eq!(received.job_id, "job-1");
    assert_eq!(received.receive_count, 1);

    // Leased: nothing else is visible.
    assert!(fixture.queue.receive().unwrap().is_none());

    token.ack().unwrap();
    assert_eq!(fixture.queue.queued_count().unwrap(), 0);

    // Acked: never redelivered, even after the lease would have expired.
    fixture.fake_clock.advance(Duration::from_secs(2));
    assert!(fixture.queue.receive().unwrap().is_none());
}

#[test]
fn unacked_message_redelivers_with_incremented_count() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    let (first, token) = fixture.queue.receive().unwrap().unwrap();
    assert_eq!(first.receive_count, 1);
    drop(token); // processing failure: no ack

    // Still invisible before the visibility timeout.
    fixture.fake_clock.advance(Duration::from_millis(500));
    assert!(fixture.queue.receive().unwrap().is_none());

    // Visible again after it, exactly one count higher.
    fixture.fake_clock.advance(Duration::from_millis(500));
    let (second, _token) = fixture.queue.receive().unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.receive_count, 2);
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    let seen: std::sync::Arc<parking_lot::Mutex<Vec<fm_core::Event>>> = Default::default();
    let sink = std::sync::Arc::clone(&seen);
    fixture.events.subscribe(fm_core::topic::QUEUE_ITEM_DEAD, move |ev| sink.lock().push(ev.clone()));

    // max_receive = 3: three failed deliveries…
    for attempt in 1..=3 {
        let (received, _token) = fixture.queue.receive().unwrap().unwrap();
        assert_eq!(received.receive_count, attempt);
        fixture.fake_clock.advance(Duration::from_secs(1));
    }

    // …then the fourth attempt dead-letters instead of delivering.
    assert!(fixture.queue.receive().unwrap().is_none());
    assert_eq!(fixture.queue.queued_count().unwrap(), 0);

    let dead = fixture.queue.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].receive_count, 4);

    // Reported, not silent.
    assert!(
        wait_until(Duration::from_secs(1), || {
            seen.lock().iter().any(|ev| matches!(
                ev,
                fm_core::Event::QueueItemDead { job_id, receive_count: 4, .. } if job_id == "job-1"
            ))
        })
        .await
    );

    // Dead-lettered messages are never redelivered.
    fixture.fake_clock.advance(Duration::from_secs(60));
    assert!(fixture.queue.receive().unwrap().is_none());
}

#[test]
fn extend_pushes_back_the_deadline() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    let (received, _token) = fixture.queue.receive().unwrap().unwrap();
    fixture.queue.extend(&received.id, Duration::from_secs(5)).unwrap();

    // Past the original timeout but within the extension: still leased.
    fixture.fake_clock.advance(Duration::from_secs(2));
    assert!(fixture.queue.receive().unwrap().is_none());

    fixture.fake_clock.advance(Duration::from_secs(5));
    let (again, _token) = fixture.queue.receive().unwrap().unwrap();
    assert_eq!(again.receive_count, 2);
}

#[test]
fn extend_requires_an_active_lease() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    // Visible (never received) message is not leased.
    let id = fixture.queue.receive().unwrap().map(|(m, t)| {
        drop(t);
        m.id
    });
    let id = id.unwrap();
    fixture.fake_clock.advance(Duration::from_secs(1));
    let err = fixture.queue.extend(&id, Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, EngineError::NotLeased(_)));

    // Unknown message is not leased either.
    let err = fixture.queue.extend(&"msg-ghost".into(), Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, EngineError::NotLeased(_)));
}

#[test]
fn queue_drains_every_visible_message() {
    let fixture = engine();
    let first = message(&fixture, "job-1");
    let second = message(&fixture, "job-2");
    fixture.queue.enqueue(first).unwrap();
    fixture.queue.enqueue(second).unwrap();

    let (a, token_a) = fixture.queue.receive().unwrap().unwrap();
    token_a.ack().unwrap();
    let (b, token_b) = fixture.queue.receive().unwrap().unwrap();
    token_b.ack().unwrap();
    assert_ne!(a.id, b.id);
    assert!(fixture.queue.receive().unwrap().is_none());
}

#[test]
fn delete_by_job_ids_clears_queued_and_dead() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();
    fixture.queue.enqueue(message(&fixture, "job-2")).unwrap();

    let removed = fixture.queue.delete_by_job_id(&"job-1".into()).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(fixture.queue.queued_count().unwrap(), 1);

    let removed = fixture.queue.delete_by_job_ids(&["job-2".into(), "job-1".into()]).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(fixture.queue.queued_count().unwrap(), 0);
}

#[test]
fn closed_queue_stops_serving() {
    let fixture = engine();
    fixture.queue.enqueue(message(&fixture, "job-1")).unwrap();

    fixture.queue.close();
    assert!(fixture.queue.receive().unwrap().is_none());
    assert!(matches!(
        fixture.queue.enqueue(message(&fixture, "job-2")),
        Err(EngineError::QueueClosed)
    ));
}
