//! # Contracts
//!
//! Shared data structures for the analytics client: the event model, engine
//! configuration and error type. Every other crate depends on this one,
//! never the reverse.
//!
//! ## Time Model
//! - Event timestamps are UTC wall-clock readings (`chrono::DateTime<Utc>`)
//! - `originalTimestamp` is stamped once, at admission
//! - `sentAt` is restamped with the dispatch clock on every upload attempt

mod config;
mod context;
mod error;
mod message;
mod settings;

pub use config::*;
pub use context::*;
pub use error::*;
pub use message::*;
pub use settings::*;
