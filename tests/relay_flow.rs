//! End-to-end relay scenarios against the in-memory two-ledger simulation

mod common;

use std::time::Duration;

use tokio::time::Instant;

use clpr_relayer::batch::BatchRunner;
use clpr_relayer::queue::SourceQueue;
use clpr_relayer::relay::RelayExecutor;
use clpr_relayer::types::{IdSource, SessionState};
use clpr_relayer::waiter::{wait_for, NotFoundSignatures, WaitPolicy};
use clpr_relayer::{MessageId, Phase, RelayError};

use common::{decode_envelope, short_policy, Simulation};

fn payloads(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn runner(sim: &Simulation) -> BatchRunner {
    BatchRunner::new(sim.sequencer(), sim.executor(short_policy()), sim.verifier())
}

#[tokio::test(start_paused = true)]
async fn test_fresh_batch_of_three_relays_and_verifies() {
    let sim = Simulation::new();

    let outcome = runner(&sim)
        .run(&payloads(&["m1", "m2", "m3"]))
        .await
        .unwrap();

    assert_eq!(outcome.batch.first_free_id, 0);
    assert_eq!(outcome.batch.ids(), vec![MessageId(1), MessageId(2), MessageId(3)]);
    assert_eq!(outcome.receipts.len(), 3);
    assert!(outcome.report.passed());
    assert_eq!(outcome.report.expected_count, 3);
    assert_eq!(outcome.report.observed_count, 3);
    assert_eq!(outcome.report.last_message_id, Some(MessageId(3)));

    assert_eq!(sim.request_count(), 3);
    assert_eq!(sim.delivered().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(sim.executions_of("destination:deliverInboundMessage"), 3);
    assert_eq!(sim.executions_of("source:deliverInboundResponse"), 3);
    assert_eq!(sim.metrics.messages_sent_total.get(), 3);
    assert_eq!(sim.metrics.messages_relayed_total.get(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_relay_returns_echoed_payload_lengths() {
    let sim = Simulation::new();
    let id = sim.with(|w| w.enqueue(b"hello"));

    let receipt = sim
        .executor(short_policy())
        .relay(MessageId(id))
        .await
        .unwrap();

    assert_eq!(receipt.message_id, MessageId(id));
    assert_eq!(receipt.request_len, receipt.response_len);
    assert_ne!(receipt.request_tx, receipt.response_tx);

    let response = sim.with(|w| w.destination.pending.get(&id).cloned()).unwrap();
    let (echoed_id, payload) = decode_envelope(&response).unwrap();
    assert_eq!(echoed_id, id);
    assert_eq!(payload.as_ref(), b"hello");
}

#[tokio::test(start_paused = true)]
async fn test_request_readable_on_third_poll() {
    let sim = Simulation::new();
    sim.with(|w| {
        for i in 1..=5 {
            w.enqueue(format!("m{}", i).as_bytes());
        }
        w.source.outbound_misses.insert(5, 2);
    });

    let queue = sim.source_queue();
    let start = Instant::now();
    let bytes = wait_for(
        &WaitPolicy {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        },
        &NotFoundSignatures::default(),
        "source request",
        || queue.outbound_message_bytes(MessageId(5)),
    )
    .await
    .unwrap();

    assert_eq!(decode_envelope(&bytes).unwrap().0, 5);
    // Two misses, two sleeps
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_not_found_polls_are_counted_not_surfaced() {
    let sim = Simulation::new();
    sim.with(|w| {
        w.enqueue(b"m1");
        w.source.outbound_misses.insert(1, 2);
        w.destination.response_misses.insert(1, 1);
    });

    sim.executor(short_policy()).relay(MessageId(1)).await.unwrap();

    let retries = |phase: Phase| {
        sim.metrics
            .not_found_retries_total
            .with_label_values(&[phase.metric_label()])
            .get()
    };
    assert_eq!(retries(Phase::SourceRequest), 2);
    assert_eq!(retries(Phase::DestinationResponse), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_destination_times_out_without_source_delivery() {
    let sim = Simulation::new();
    sim.with(|w| {
        for i in 1..=7 {
            w.enqueue(format!("m{}", i).as_bytes());
        }
        w.destination.never_respond.insert(7);
    });

    let policy = short_policy();
    let start = Instant::now();
    let err = sim.executor(policy).relay(MessageId(7)).await.unwrap_err();

    match &err {
        RelayError::Timeout {
            message_id, label, ..
        } => {
            assert_eq!(*message_id, MessageId(7));
            assert_eq!(label, "destination response");
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(err.to_string().contains("destination response"));
    assert!(start.elapsed() <= policy.timeout + policy.poll_interval);

    assert_eq!(sim.executions_of("destination:deliverInboundMessage"), 1);
    assert_eq!(sim.executions_of("source:deliverInboundResponse"), 0);
    assert!(sim.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_request_delivery_fails_fast() {
    let sim = Simulation::new();
    sim.with(|w| {
        for i in 1..=9 {
            w.enqueue(format!("m{}", i).as_bytes());
        }
        w.destination.reject_delivery.insert(9);
    });

    let start = Instant::now();
    let err = sim
        .executor(short_policy())
        .relay(MessageId(9))
        .await
        .unwrap_err();

    match &err {
        RelayError::MutationFailed {
            message_id,
            phase,
            status,
            ..
        } => {
            assert_eq!(*message_id, Some(MessageId(9)));
            assert_eq!(*phase, Phase::DeliverRequest);
            assert_eq!(status, "REVERTED");
        }
        other => panic!("expected mutation failure, got {:?}", other),
    }
    // No waiting on a response that can never come
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(sim.executions_of("source:deliverInboundResponse"), 0);
    assert_eq!(sim.request_count(), 0);
    assert_eq!(
        sim.metrics
            .relay_failures_total
            .with_label_values(&["deliver_request", "mutation_failed"])
            .get(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_read_failure_is_not_retried() {
    let sim = Simulation::new();
    sim.with(|w| w.enqueue(b"m1"));

    // Points at an address with no queue; the revert is outside the not-found list
    let executor = RelayExecutor::new(
        SourceQueue::new(sim.source.clone(), common::src_app()),
        sim.destination_queue(),
        short_policy(),
        NotFoundSignatures::default(),
        sim.metrics.clone(),
    );

    let start = Instant::now();
    let err = executor.relay(MessageId(1)).await.unwrap_err();
    assert!(
        matches!(err, RelayError::Read { phase: Phase::SourceRequest, .. }),
        "{:?}",
        err
    );
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(sim.executions_of("destination:deliverInboundMessage"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_short_observed_delta_fails_verification() {
    let sim = Simulation::new();
    // Message 2 is processed but the echo app does not count it
    sim.with(|w| {
        w.destination.uncounted.insert(2);
    });

    let err = runner(&sim)
        .run(&payloads(&["m1", "m2", "m3"]))
        .await
        .unwrap_err();

    match &err {
        RelayError::Verification(report) => {
            assert!(!report.count_ok);
            assert!(report.delivered);
            assert_eq!(report.expected_count, 3);
            assert_eq!(report.observed_count, 2);
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
    assert!(err.to_string().contains("countOk=false"), "{}", err);
    // Relay steps themselves all succeeded
    assert_eq!(sim.executions_of("source:deliverInboundResponse"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_relay_rerun_after_delivery_is_a_no_op() {
    let sim = Simulation::new();
    sim.with(|w| w.enqueue(b"m1"));
    let executor = sim.executor(short_policy());

    executor.relay(MessageId(1)).await.unwrap();
    let count_after_first = sim.request_count();
    let delivered_after_first = sim.delivered();

    // Delivery calls are issued again; the queues treat them as duplicates
    executor.relay(MessageId(1)).await.unwrap();

    assert_eq!(sim.executions_of("destination:deliverInboundMessage"), 2);
    assert_eq!(sim.request_count(), count_after_first);
    assert_eq!(sim.delivered(), delivered_after_first);
}

#[tokio::test(start_paused = true)]
async fn test_emitted_ids_survive_an_interleaving_sender() {
    let sim = Simulation::new();
    sim.with(|w| {
        w.source.emit_logs = true;
        w.source.external_sends_before_each_send = 1;
    });

    let outcome = runner(&sim)
        .run(&payloads(&["a", "b", "c"]))
        .await
        .unwrap();

    assert_eq!(outcome.batch.ids(), vec![MessageId(2), MessageId(4), MessageId(6)]);
    assert!(outcome
        .batch
        .messages
        .iter()
        .all(|m| m.id_source == IdSource::Emitted));
    assert!(outcome.report.passed());

    // The payloads relayed are ours, not the interleaved ones
    for message in &outcome.batch.messages {
        let request = sim
            .with(|w| w.source.outbound.get(&message.message_id.as_u64()).cloned())
            .unwrap();
        assert_eq!(decode_envelope(&request).unwrap().1.to_vec(), message.payload);
    }
}

#[tokio::test(start_paused = true)]
async fn test_derived_ids_without_logs() {
    let sim = Simulation::new();
    sim.with(|w| {
        w.enqueue(b"earlier");
    });

    let batch = sim
        .sequencer()
        .send_batch(&payloads(&["x", "y"]))
        .await
        .unwrap();

    assert_eq!(batch.first_free_id, 1);
    assert_eq!(batch.ids(), vec![MessageId(2), MessageId(3)]);
    assert!(batch.messages.iter().all(|m| m.id_source == IdSource::Derived));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_delivery_catches_unassociated_response() {
    let sim = Simulation::new();
    sim.with(|w| {
        w.enqueue(b"m1");
        w.enqueue(b"m2");
        w.source.swallow_responses = true;
    });

    // Without the post-condition the hand-off looks successful
    sim.executor(short_policy()).relay(MessageId(1)).await.unwrap();

    let err = sim
        .executor(short_policy())
        .with_confirm_delivery(true)
        .relay(MessageId(2))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            RelayError::MutationFailed {
                phase: Phase::ConfirmDelivery,
                ..
            }
        ),
        "{:?}",
        err
    );
}

#[tokio::test(start_paused = true)]
async fn test_confirm_delivery_passes_when_flag_set() {
    let sim = Simulation::new();
    sim.with(|w| w.enqueue(b"m1"));

    sim.executor(short_policy())
        .with_confirm_delivery(true)
        .relay(MessageId(1))
        .await
        .unwrap();
    assert!(sim.delivered().contains(&1));
}

#[tokio::test(start_paused = true)]
async fn test_session_reports_completed_hand_off() {
    let sim = Simulation::new();
    let id = sim.with(|w| w.enqueue(b"m1"));

    let result = sim.executor(short_policy()).relay_session(MessageId(id)).await;

    let receipt = result.outcome.unwrap();
    assert_eq!(receipt.state, SessionState::ResponseDelivered);
    assert_eq!(result.session.state, SessionState::ResponseDelivered);
    assert!(result.session.failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_session_keeps_last_state_reached_before_failure() {
    let sim = Simulation::new();
    sim.with(|w| {
        w.enqueue(b"m1");
        w.enqueue(b"m2");
        w.destination.never_respond.insert(1);
        w.destination.reject_delivery.insert(2);
    });
    let executor = sim.executor(short_policy());

    let silent = executor.relay_session(MessageId(1)).await;
    assert!(silent.outcome.is_err());
    assert_eq!(silent.session.state, SessionState::Failed);
    assert_eq!(silent.session.reached, SessionState::RequestDelivered);
    let reason = silent.session.failure.unwrap();
    assert!(reason.contains("destination response"), "{}", reason);

    let rejected = executor.relay_session(MessageId(2)).await;
    assert!(matches!(rejected.outcome, Err(RelayError::MutationFailed { .. })));
    assert_eq!(rejected.session.state, SessionState::Failed);
    assert_eq!(rejected.session.reached, SessionState::RequestAvailable);
}

#[tokio::test(start_paused = true)]
async fn test_batch_that_cannot_fit_sends_nothing() {
    let sim = Simulation::new();
    sim.with(|w| w.source.next_id = u64::MAX - 1);

    let err = sim
        .sequencer()
        .send_batch(&payloads(&["m1", "m2"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no room"), "{}", err);
    assert_eq!(sim.executions_of("source:send"), 0);
    assert_eq!(sim.metrics.messages_sent_total.get(), 0);
}
