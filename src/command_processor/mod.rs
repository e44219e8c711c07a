//! Command processor - the dispatch façade.
//!
//! ```text
//! send / publish ──▶ PipelineBuilder (cached) ──▶ handler chain(s)
//! post ──▶ mapper ──▶ outbox (unit of work) ──▶ mediator.clear ──▶ producer
//! schedule_at ──▶ scheduler ──(fires)──▶ send / publish / post
//! schedule_message ──▶ scheduler ──(fires)──▶ outbox ──▶ mediator.clear ──▶ producer
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let processor = CommandProcessor::builder()
//!     .subscribers(SubscriberRegistry::new().register(
//!         HandlerRegistration::<PlaceOrder>::new(|| PlaceOrderHandler),
//!     ))
//!     .mappers(MessageMapperRegistry::new().register_json::<OrderPlaced>())
//!     .producers(ProducerRegistry::new().with(kafka_producer))
//!     .build();
//!
//! processor.send(&mut PlaceOrder::new("sku-1")).await?;
//! processor.post(&OrderPlaced::new("order-1")).await?;
//! ```

mod builder;
mod processor;

pub use builder::{ClearMode, CommandProcessorBuilder};
pub use processor::CommandProcessor;
