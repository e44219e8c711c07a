//! Handler pipelines - ordered chains of decorators ending in a business handler.
//!
//! ## Architecture
//!
//! ```text
//! SubscriberRegistry ──(per request type)──▶ HandlerRegistration*
//!                                                │ build once, cache by TypeId
//!                                                ▼
//! Pipeline:  FallbackPolicyHandler → PolicyHandler → ... → business Handler
//!                 │ catch               │ retry / break
//!                 └──── fallback walk ──┴──────────────▶ Handler::fallback
//! ```
//!
//! Each node receives a [`Next`] pointing at the rest of the chain and
//! decides whether to continue. Decorators are declared explicitly on the
//! registration, outermost first:
//!
//! ```ignore
//! let subscribers = SubscriberRegistry::new().register(
//!     HandlerRegistration::<PlaceOrder>::new(|| PlaceOrderHandler)
//!         .fallback(FallbackTrigger::BrokenCircuit)
//!         .use_policy(["retry", "breaker"]),
//! );
//! ```

mod builder;
mod fallback;
mod handler;
mod logging;
mod policy_handler;
mod registration;

pub use builder::PipelineBuilder;
pub use fallback::{FallbackPolicyHandler, FallbackTrigger};
pub use handler::{Handler, Next, Pipeline};
pub use logging::RequestLoggingHandler;
pub use policy_handler::PolicyHandler;
pub use registration::{HandlerRegistration, SubscriberRegistry};
