//! Outbox deposit, clear, sweep and archive.
//!
//! - Clearing the same message twice sends it once
//! - Rolled back deposits never reach a producer
//! - Failing topics are tripped and cooled down per clear cycle


use std::sync::Arc;
use std::time::Duration;

use courier_rust::{
    CancellationToken, ClearMode, CommandProcessor, HandlerError, Id, InMemoryArchiveProvider,
    InMemoryOutbox, InMemoryOutboxCircuitBreaker, InMemoryScheduler, Message, MessageHeader,
    MessageMapperRegistry, MessageType, Outbox, OutboxArchiver, OutboxCircuitBreaker, OutboxError,
    OutboxProducerMediator, OutboxSweeper, PolicyRegistry, RequestContext, RequestContextFactory,
    RetryPolicy, RoutingKey, UnitOfWork, RETRY_POLICY,
};

use support::{CountingContextFactory, Fixture, OrderPlaced, TakePayment, ORDERS, PAYMENTS};

fn message(topic: &str) -> Message {
    Message::new(
        MessageHeader::new(Id::random(), topic, MessageType::Event),
        b"{}".to_vec(),
    )
}

async fn outstanding(processor: &CommandProcessor) -> usize {
    processor
        .mediator()
        .unwrap()
        .outbox()
        .outstanding_count()
        .await
        .unwrap()
}

// ============================================================================
// Post and clear
// ============================================================================

#[tokio::test]
async fn post_sends_and_marks_dispatched() {
    let fixture = Fixture::new();
    let processor = fixture.processor();

    let id = processor.post(&OrderPlaced::new(42)).await.unwrap();

    let sent = fixture.orders.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id(), &id);
    assert_eq!(sent[0].topic(), &RoutingKey::new(ORDERS));
    assert_eq!(outstanding(&processor).await, 0);
}

#[tokio::test]
async fn binary_mapped_post_reaches_the_producer_as_bitcode() {
    let fixture = Fixture::new();
    let processor = CommandProcessor::builder()
        .policies(PolicyRegistry::new())
        .mappers(MessageMapperRegistry::new().register_bitcode::<TakePayment>())
        .producers(fixture.producers())
        .build();

    processor.post(&TakePayment::new(250)).await.unwrap();

    let sent = fixture.payments.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header.content_type, MessageHeader::CONTENT_TYPE_BINARY);
    let payment: TakePayment = sent[0].body.decode().unwrap();
    assert_eq!(payment.amount, 250);
}

#[tokio::test]
async fn clearing_the_same_message_twice_sends_it_once() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    let id = processor.deposit(&OrderPlaced::new(7), None).await.unwrap();

    let first = processor.clear_outbox(&[id.clone()]).await.unwrap();
    let second = processor.clear_outbox(&[id.clone()]).await.unwrap();

    assert_eq!(first.dispatched, 1);
    assert_eq!(second.dispatched, 0);
    assert_eq!(second.already_dispatched, 1);
    assert_eq!(fixture.orders.sent_count(), 1);

    let entry = processor
        .mediator()
        .unwrap()
        .outbox()
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    assert!(entry.is_dispatched());
}

#[tokio::test]
async fn clearing_an_unknown_id_is_not_found() {
    let fixture = Fixture::new();
    let processor = fixture.processor();

    let err = processor.clear_outbox(&[Id::new("missing")]).await.unwrap_err();
    assert!(matches!(err, HandlerError::Outbox(OutboxError::NotFound(_))));
}

#[tokio::test]
async fn post_without_publication_is_a_configuration_error() {
    let fixture = Fixture::new();
    let processor = CommandProcessor::builder()
        .mappers(Fixture::mappers())
        .producers({
            let mut producers = courier_rust::ProducerRegistry::new();
            producers.add(Arc::clone(&fixture.orders) as Arc<dyn courier_rust::Producer>);
            producers
        })
        .build();

    let err = processor.post(&TakePayment::new(10)).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn failed_send_is_not_an_error_and_stays_outstanding() {
    let fixture = Fixture::new();
    fixture.orders.set_failing(true);
    let processor = fixture.processor();

    processor.post(&OrderPlaced::new(1)).await.unwrap();
    assert_eq!(outstanding(&processor).await, 1);

    fixture.orders.set_failing(false);
    let result = processor
        .clear_outstanding(10, Duration::ZERO, false)
        .await
        .unwrap();
    assert_eq!(result.dispatched, 1);
    assert_eq!(outstanding(&processor).await, 0);
}

#[tokio::test]
async fn background_post_clears_on_a_spawned_task() {
    let fixture = Fixture::new();
    let contexts = Arc::new(CountingContextFactory::default());
    let processor = CommandProcessor::builder()
        .policies(PolicyRegistry::new())
        .mappers(Fixture::mappers())
        .producers(fixture.producers())
        .context_factory(Arc::clone(&contexts) as Arc<dyn RequestContextFactory>)
        .clear_mode(ClearMode::Background)
        .build();

    processor.post(&TakePayment::new(5)).await.unwrap();

    for _ in 0..50 {
        if fixture.payments.sent_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fixture.payments.sent_count(), 1);
    // one for the post, one for the background clear
    assert_eq!(contexts.created(), 2);
}

#[tokio::test]
async fn processor_clears_stop_when_cancelled() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    let id = processor.deposit(&OrderPlaced::new(3), None).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let by_id = processor
        .clear_outbox_with_cancellation(&[id], &cancel)
        .await
        .unwrap();
    let outstanding_clear = processor
        .clear_outstanding_with_cancellation(10, Duration::ZERO, false, &cancel)
        .await
        .unwrap();

    assert!(by_id.cancelled);
    assert!(outstanding_clear.cancelled);
    assert_eq!(fixture.orders.sent_count(), 0);
    assert_eq!(outstanding(&processor).await, 1);
}

#[tokio::test(start_paused = true)]
async fn sends_are_retried_through_the_retry_policy() {
    let fixture = Fixture::new();
    fixture.orders.set_failing(true);
    let processor = CommandProcessor::builder()
        .policies(PolicyRegistry::new().with(RETRY_POLICY, RetryPolicy::new(vec![Duration::from_millis(50); 2])))
        .mappers(Fixture::mappers())
        .producers(fixture.producers())
        .build();

    processor.post(&OrderPlaced::new(3)).await.unwrap();

    assert_eq!(fixture.orders.attempts(), 3);
    assert_eq!(outstanding(&processor).await, 1);
}

// ============================================================================
// Transactions and limits
// ============================================================================

#[tokio::test]
async fn rolled_back_deposit_is_never_cleared() {
    let fixture = Fixture::new();
    let processor = fixture.processor();

    let mut tx = UnitOfWork::new();
    processor.deposit(&OrderPlaced::new(9), Some(&mut tx)).await.unwrap();
    tx.rollback();

    let result = processor
        .clear_outstanding(10, Duration::ZERO, false)
        .await
        .unwrap();
    assert_eq!(result.attempted(), 0);
    assert_eq!(fixture.orders.sent_count(), 0);
}

#[tokio::test]
async fn committed_deposit_becomes_visible_on_commit() {
    let fixture = Fixture::new();
    let processor = fixture.processor();

    let mut tx = UnitOfWork::new();
    let id = processor.deposit(&OrderPlaced::new(9), Some(&mut tx)).await.unwrap();
    assert_eq!(outstanding(&processor).await, 0);

    tx.commit().unwrap();
    assert_eq!(outstanding(&processor).await, 1);

    processor.clear_outbox(&[id]).await.unwrap();
    assert_eq!(fixture.orders.sent_count(), 1);
}

#[tokio::test]
async fn deposit_batch_writes_all_requests() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    let requests = vec![OrderPlaced::new(1), OrderPlaced::new(2), OrderPlaced::new(3)];

    let ids = processor.deposit_batch(&requests, None).await.unwrap();

    assert_eq!(ids.len(), 3);
    assert_eq!(&ids[1], &requests[1].id);
    assert_eq!(outstanding(&processor).await, 3);
}

#[tokio::test]
async fn outstanding_limit_rejects_deposits() {
    let fixture = Fixture::new();
    let processor = CommandProcessor::builder()
        .policies(PolicyRegistry::new())
        .mappers(Fixture::mappers())
        .producers(fixture.producers())
        .max_outstanding_messages(2)
        .build();

    let requests = vec![OrderPlaced::new(1), OrderPlaced::new(2), OrderPlaced::new(3)];
    let err = processor.deposit_batch(&requests, None).await.unwrap_err();
    assert!(matches!(err, HandlerError::Outbox(OutboxError::LimitReached(2))));
    assert_eq!(outstanding(&processor).await, 0);

    processor.deposit(&OrderPlaced::new(1), None).await.unwrap();
    processor.deposit(&OrderPlaced::new(2), None).await.unwrap();
    let err = processor.deposit(&OrderPlaced::new(3), None).await.unwrap_err();
    assert!(matches!(err, HandlerError::Outbox(OutboxError::LimitReached(2))));
}

// ============================================================================
// Topic circuit breaker
// ============================================================================

#[tokio::test]
async fn tripped_topic_is_skipped_until_it_cools_down() {
    let fixture = Fixture::new();
    let outbox = Arc::new(InMemoryOutbox::new());
    let breaker = Arc::new(InMemoryOutboxCircuitBreaker::new().with_cooldown_count(1));
    breaker.trip_topic(&RoutingKey::new(PAYMENTS));

    let mediator = OutboxProducerMediator::new(outbox.clone(), fixture.producers())
        .with_circuit_breaker(breaker.clone());
    let ctx = RequestContext::new();
    let cancel = CancellationToken::new();
    mediator.add_to_outbox(message(ORDERS), &ctx, None).await.unwrap();
    mediator.add_to_outbox(message(PAYMENTS), &ctx, None).await.unwrap();

    let first = mediator
        .clear_outstanding_from_outbox(10, Duration::ZERO, false, &ctx, &cancel)
        .await
        .unwrap();
    assert_eq!(first.dispatched, 1);
    assert_eq!(fixture.orders.sent_count(), 1);
    assert_eq!(fixture.payments.sent_count(), 0);
    assert!(!breaker.is_tripped(&RoutingKey::new(PAYMENTS)));

    let second = mediator
        .clear_outstanding_from_outbox(10, Duration::ZERO, false, &ctx, &cancel)
        .await
        .unwrap();
    assert_eq!(second.dispatched, 1);
    assert_eq!(fixture.payments.sent_count(), 1);
    assert_eq!(outbox.outstanding_count().await.unwrap(), 0);
}

#[tokio::test]
async fn failing_topic_trips_and_the_rest_of_the_batch_carries_on() {
    let fixture = Fixture::new();
    fixture.payments.set_failing(true);
    let breaker = Arc::new(InMemoryOutboxCircuitBreaker::new());
    let mediator = OutboxProducerMediator::new(Arc::new(InMemoryOutbox::new()), fixture.producers())
        .with_circuit_breaker(breaker.clone());
    let ctx = RequestContext::new();
    let cancel = CancellationToken::new();

    mediator.add_to_outbox(message(PAYMENTS), &ctx, None).await.unwrap();
    mediator.add_to_outbox(message(PAYMENTS), &ctx, None).await.unwrap();
    mediator.add_to_outbox(message(ORDERS), &ctx, None).await.unwrap();

    let result = mediator
        .clear_outstanding_from_outbox(10, Duration::ZERO, false, &ctx, &cancel)
        .await
        .unwrap();

    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.dispatched, 1);
    assert_eq!(fixture.payments.attempts(), 1);
    assert!(breaker.is_tripped(&RoutingKey::new(PAYMENTS)));
}

#[tokio::test]
async fn cancelled_clear_stops_before_sending() {
    let fixture = Fixture::new();
    let mediator = OutboxProducerMediator::new(Arc::new(InMemoryOutbox::new()), fixture.producers());
    let ctx = RequestContext::new();
    mediator.add_to_outbox(message(ORDERS), &ctx, None).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = mediator
        .clear_outstanding_from_outbox(10, Duration::ZERO, false, &ctx, &cancel)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(fixture.orders.sent_count(), 0);
}

// ============================================================================
// Bulk, sweeper and archiver
// ============================================================================

#[tokio::test]
async fn bulk_clear_sends_one_batch_per_topic() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    processor
        .deposit_batch(&[OrderPlaced::new(1), OrderPlaced::new(2)], None)
        .await
        .unwrap();
    processor.deposit(&TakePayment::new(3), None).await.unwrap();

    let result = processor
        .clear_outstanding(1, Duration::ZERO, true)
        .await
        .unwrap();

    assert_eq!(result.dispatched, 3);
    assert_eq!(fixture.orders.batches(), 1);
    assert_eq!(fixture.payments.batches(), 1);
    assert_eq!(fixture.orders.sent_count(), 2);
}

#[tokio::test]
async fn clear_outstanding_honours_max_count() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    processor
        .deposit_batch(&[OrderPlaced::new(1), OrderPlaced::new(2), OrderPlaced::new(3)], None)
        .await
        .unwrap();

    let result = processor
        .clear_outstanding(2, Duration::ZERO, false)
        .await
        .unwrap();

    assert_eq!(result.dispatched, 2);
    assert_eq!(outstanding(&processor).await, 1);
}

#[tokio::test]
async fn sweeper_clears_outstanding_messages_until_stopped() {
    let fixture = Fixture::new();
    let processor = fixture.processor();
    processor
        .deposit_batch(&[OrderPlaced::new(1), OrderPlaced::new(2)], None)
        .await
        .unwrap();

    let sweeper = OutboxSweeper::new(Arc::clone(processor.mediator().unwrap()))
        .with_interval(Duration::from_millis(10))
        .with_min_age(Duration::ZERO)
        .spawn();

    for _ in 0..100 {
        if fixture.orders.sent_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = sweeper.stop().await;

    assert_eq!(fixture.orders.sent_count(), 2);
    assert_eq!(stats.dispatched, 2);
    assert!(stats.sweeps >= 1);
}

#[tokio::test]
async fn archiver_moves_dispatched_messages_out_of_the_outbox() {
    let fixture = Fixture::new();
    let outbox = Arc::new(InMemoryOutbox::new());
    let processor = CommandProcessor::builder()
        .policies(PolicyRegistry::new())
        .mappers(Fixture::mappers())
        .producers(fixture.producers())
        .outbox(outbox.clone())
        .build();

    processor.post(&OrderPlaced::new(1)).await.unwrap();
    processor.deposit(&OrderPlaced::new(2), None).await.unwrap();

    let provider = Arc::new(InMemoryArchiveProvider::new());
    let archived = OutboxArchiver::new(outbox.clone(), provider.clone())
        .archive(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(archived, 1);
    assert_eq!(provider.archived().len(), 1);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox.outstanding_count().await.unwrap(), 1);
}

// ============================================================================
// Scheduled messages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scheduled_message_is_deposited_and_cleared_when_due() {
    let fixture = Fixture::new();
    let scheduler = Arc::new(InMemoryScheduler::new());
    let processor = fixture.processor_with_scheduler(Arc::clone(&scheduler));
    let scheduled = message(ORDERS);

    processor
        .schedule_message_after(scheduled.clone(), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(outstanding(&processor).await, 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    for _ in 0..50 {
        if fixture.orders.sent_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(fixture.orders.sent()[0].id(), scheduled.id());
    let entry = processor
        .mediator()
        .unwrap()
        .outbox()
        .get(scheduled.id())
        .await
        .unwrap()
        .unwrap();
    assert!(entry.is_dispatched());
}

#[tokio::test(start_paused = true)]
async fn scheduled_message_that_fails_to_send_stays_outstanding() {
    let fixture = Fixture::new();
    let scheduler = Arc::new(InMemoryScheduler::new());
    let processor = fixture.processor_with_scheduler(Arc::clone(&scheduler));
    fixture.orders.set_failing(true);

    processor
        .schedule_message_after(message(ORDERS), Duration::from_secs(10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    for _ in 0..50 {
        if fixture.orders.attempts() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(fixture.orders.attempts(), 1);
    assert_eq!(fixture.orders.sent_count(), 0);
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(outstanding(&processor).await, 1);

    fixture.orders.set_failing(false);
    let result = processor
        .clear_outstanding(10, Duration::ZERO, false)
        .await
        .unwrap();
    assert_eq!(result.dispatched, 1);
    assert_eq!(fixture.orders.sent_count(), 1);
    assert_eq!(outstanding(&processor).await, 0);
}

#[tokio::test]
async fn scheduling_a_message_needs_a_scheduler() {
    let fixture = Fixture::new();
    let processor = fixture.processor();

    let err = processor
        .schedule_message_after(message(ORDERS), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}
