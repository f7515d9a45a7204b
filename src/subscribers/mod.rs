//! # Event subscribers.
//!
//! Subscribers observe the runtime [`Event`](crate::events::Event) stream.
//!
//! ## Architecture
//! ```text
//!   Bus ──► manager listener ──► SubscriberSet::emit(&Event)
//!                                    │
//!                                    ├──► [queue] ─► LogWriter
//!                                    └──► [queue] ─► custom subscriber ...
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] built-in `tracing` renderer

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
