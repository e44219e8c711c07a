//! Command processor dispatch through handler pipelines.
//!
//! - Send reaches exactly one handler
//! - Retry and circuit breaker policies guard the chain
//! - Fallback absorbs failures and records the cause
//! - Publish fans out and aggregates failures

mod support;

use std::sync::Arc;
use std::time::Duration;

use courier_rust::{
    CircuitBreakerPolicy, CommandProcessor, FallbackTrigger, HandlerError, HandlerRegistration,
    PolicyRegistry, RetryPolicy, SubscriberRegistry,
};

use support::{count, CompensatingHandler, CountingHandler, OrderPlaced, Outcome, PlaceOrder};

fn processor(subscribers: SubscriberRegistry, policies: PolicyRegistry) -> CommandProcessor {
    CommandProcessor::builder()
        .subscribers(subscribers)
        .policies(policies)
        .build()
}

// ============================================================================
// Send
// ============================================================================

#[tokio::test]
async fn send_invokes_the_single_handler_once_per_call() {
    let handler = Arc::new(CountingHandler::new(Outcome::Succeed));
    let calls = Arc::clone(&handler.calls);
    let processor = processor(
        SubscriberRegistry::new()
            .register(HandlerRegistration::<PlaceOrder>::from_handler(handler).request_logging()),
        PolicyRegistry::new(),
    );

    for n in 1..=3 {
        processor.send(&mut PlaceOrder::new("book")).await.unwrap();
        assert_eq!(count(&calls), n);
    }
}

#[tokio::test]
async fn send_without_handler_is_a_configuration_error() {
    let processor = processor(SubscriberRegistry::new(), PolicyRegistry::new());
    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn send_with_two_handlers_is_a_configuration_error() {
    let first = Arc::new(CountingHandler::new(Outcome::Succeed));
    let second = Arc::new(CountingHandler::new(Outcome::Succeed));
    let (first_calls, second_calls) = (Arc::clone(&first.calls), Arc::clone(&second.calls));
    let processor = processor(
        SubscriberRegistry::new()
            .register(HandlerRegistration::<PlaceOrder>::from_handler(first))
            .register(HandlerRegistration::<PlaceOrder>::from_handler(second)),
        PolicyRegistry::new(),
    );

    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(count(&first_calls) + count(&second_calls), 0);
}

#[tokio::test]
async fn unknown_policy_name_fails_when_the_pipeline_is_built() {
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::new(|| CountingHandler::new(Outcome::Succeed))
                .use_policy(["missing"]),
        ),
        PolicyRegistry::new(),
    );

    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(err.is_configuration());
}

// ============================================================================
// Policies
// ============================================================================

#[tokio::test(start_paused = true)]
async fn retry_runs_the_handler_once_per_backoff_plus_one() {
    let handler = Arc::new(CountingHandler::new(Outcome::Fail));
    let calls = Arc::clone(&handler.calls);
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler).use_policy(["retry"]),
        ),
        PolicyRegistry::new().with("retry", RetryPolicy::new(vec![Duration::from_secs(1); 3])),
    );

    let started = tokio::time::Instant::now();
    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();

    assert!(matches!(err, HandlerError::Failed(_)));
    assert_eq!(count(&calls), 4);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn retry_does_not_repeat_configuration_errors() {
    let handler = Arc::new(CountingHandler::new(Outcome::Configuration));
    let calls = Arc::clone(&handler.calls);
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler).use_policy(["retry"]),
        ),
        PolicyRegistry::new().with("retry", RetryPolicy::immediate(3)),
    );

    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_fails_fast_without_calling_the_handler() {
    let handler = Arc::new(CountingHandler::new(Outcome::Fail));
    let calls = Arc::clone(&handler.calls);
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler).use_policy(["breaker"]),
        ),
        PolicyRegistry::new().with(
            "breaker",
            CircuitBreakerPolicy::new(2, Duration::from_secs(30)).with_name("breaker"),
        ),
    );

    for _ in 0..2 {
        let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }
    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(err.is_broken_circuit());
    assert_eq!(count(&calls), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert_eq!(count(&calls), 3);
}

#[tokio::test(start_paused = true)]
async fn policies_nest_with_the_first_named_outermost() {
    let handler = Arc::new(CountingHandler::new(Outcome::Fail));
    let calls = Arc::clone(&handler.calls);
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler)
                .use_policy(["retry", "breaker"]),
        ),
        PolicyRegistry::new()
            .with("retry", RetryPolicy::immediate(4))
            .with("breaker", CircuitBreakerPolicy::new(2, Duration::from_secs(30))),
    );

    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();

    // once the breaker opens the remaining retries fail fast
    assert!(err.is_broken_circuit());
    assert_eq!(count(&calls), 2);
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn fallback_absorbs_the_failure_and_records_the_cause() {
    let handler = Arc::new(CompensatingHandler::new());
    let (calls, compensations) = (Arc::clone(&handler.calls), Arc::clone(&handler.compensations));
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler)
                .fallback(FallbackTrigger::AllErrors),
        ),
        PolicyRegistry::new(),
    );

    let mut ctx = processor.create_context();
    processor
        .send_with_context(&mut PlaceOrder::new("book"), &mut ctx)
        .await
        .unwrap();

    assert_eq!(count(&calls), 1);
    assert_eq!(count(&compensations), 1);
    assert!(matches!(ctx.fallback_cause(), Some(HandlerError::Failed(_))));
}

#[tokio::test]
async fn fallback_for_another_error_kind_lets_the_failure_through() {
    let handler = Arc::new(CompensatingHandler::new());
    let compensations = Arc::clone(&handler.compensations);
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler)
                .fallback(FallbackTrigger::BrokenCircuit),
        ),
        PolicyRegistry::new(),
    );

    let mut ctx = processor.create_context();
    let err = processor
        .send_with_context(&mut PlaceOrder::new("book"), &mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::Failed(_)));
    assert_eq!(count(&compensations), 0);
    assert!(ctx.fallback_cause().is_none());
}

#[tokio::test]
async fn fallback_without_a_compensating_handler_returns_the_original_error() {
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::new(|| CountingHandler::new(Outcome::Fail))
                .fallback(FallbackTrigger::AllErrors),
        ),
        PolicyRegistry::new(),
    );

    let err = processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    assert!(matches!(err, HandlerError::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn fallback_on_broken_circuit_absorbs_fail_fast_calls() {
    let handler = Arc::new(CompensatingHandler::new());
    let (calls, compensations) = (Arc::clone(&handler.calls), Arc::clone(&handler.compensations));
    let processor = processor(
        SubscriberRegistry::new().register(
            HandlerRegistration::<PlaceOrder>::from_handler(handler)
                .fallback(FallbackTrigger::BrokenCircuit)
                .use_policy(["breaker"]),
        ),
        PolicyRegistry::new().with("breaker", CircuitBreakerPolicy::new(1, Duration::from_secs(30))),
    );

    processor.send(&mut PlaceOrder::new("book")).await.unwrap_err();
    processor.send(&mut PlaceOrder::new("book")).await.unwrap();

    assert_eq!(count(&calls), 1);
    assert_eq!(count(&compensations), 1);
}

// ============================================================================
// Publish
// ============================================================================

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let first = Arc::new(CountingHandler::new(Outcome::Succeed));
    let second = Arc::new(CountingHandler::new(Outcome::Succeed));
    let (first_calls, second_calls) = (Arc::clone(&first.calls), Arc::clone(&second.calls));
    let processor = processor(
        SubscriberRegistry::new()
            .register(HandlerRegistration::<OrderPlaced>::from_handler(first))
            .register(HandlerRegistration::<OrderPlaced>::from_handler(second)),
        PolicyRegistry::new(),
    );

    processor.publish(&mut OrderPlaced::new("o-1")).await.unwrap();
    assert_eq!((count(&first_calls), count(&second_calls)), (1, 1));
}

#[tokio::test]
async fn publish_without_subscribers_succeeds() {
    let processor = processor(SubscriberRegistry::new(), PolicyRegistry::new());
    processor.publish(&mut OrderPlaced::new("o-1")).await.unwrap();
}

#[tokio::test]
async fn publish_runs_all_subscribers_and_aggregates_failures() {
    let survivor = Arc::new(CountingHandler::new(Outcome::Succeed));
    let survivor_calls = Arc::clone(&survivor.calls);
    let processor = processor(
        SubscriberRegistry::new()
            .register(HandlerRegistration::<OrderPlaced>::new(|| CountingHandler::new(Outcome::Fail)))
            .register(HandlerRegistration::<OrderPlaced>::from_handler(survivor))
            .register(HandlerRegistration::<OrderPlaced>::new(|| CountingHandler::new(Outcome::Fail))),
        PolicyRegistry::new(),
    );

    let err = processor.publish(&mut OrderPlaced::new("o-1")).await.unwrap_err();

    assert_eq!(count(&survivor_calls), 1);
    match err {
        HandlerError::Aggregate(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregate, got {other:?}"),
    }
}

#[tokio::test]
async fn publish_with_one_failure_returns_it_unwrapped() {
    let processor = processor(
        SubscriberRegistry::new()
            .register(HandlerRegistration::<OrderPlaced>::new(|| CountingHandler::new(Outcome::Fail)))
            .register(HandlerRegistration::<OrderPlaced>::new(|| CountingHandler::new(Outcome::Succeed))),
        PolicyRegistry::new(),
    );

    let err = processor.publish(&mut OrderPlaced::new("o-1")).await.unwrap_err();
    assert!(matches!(err, HandlerError::Failed(_)));
}

// ============================================================================
// Pipeline cache
// ============================================================================

#[tokio::test]
async fn pipelines_are_cached_until_reset() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let (counter, builds) = (Arc::clone(&calls), Arc::clone(&built));
    let processor = processor(
        SubscriberRegistry::new().register(HandlerRegistration::<PlaceOrder>::new(move || {
            builds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            CountingHandler::with_counter(Outcome::Succeed, Arc::clone(&counter))
        })),
        PolicyRegistry::new(),
    );

    processor.send(&mut PlaceOrder::new("a")).await.unwrap();
    processor.send(&mut PlaceOrder::new("b")).await.unwrap();
    assert!(processor.pipelines().is_cached::<PlaceOrder>());
    assert_eq!(count(&built), 1);

    processor.reset();
    assert!(!processor.pipelines().is_cached::<PlaceOrder>());
    processor.send(&mut PlaceOrder::new("c")).await.unwrap();

    assert_eq!(count(&built), 2);
    assert_eq!(count(&calls), 3);
}
