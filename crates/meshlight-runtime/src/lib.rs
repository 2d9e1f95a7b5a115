//! meshlight Runtime - Node orchestration
//!
//! This crate hosts the model servers of one node:
//! 1. Build model instances from a validated configuration
//! 2. Derive the binding graph from the element table
//! 3. Route decoded messages to their model instance
//! 4. Cascade bound state changes and fan out scene work
//! 5. Dispatch timer expiries and the once-per-second clock
//! 6. Buffer outbound messages and events for the host
//!
//! [`driver`] runs a node on a tokio task.

pub mod error;
pub mod config;
pub mod node;
pub mod logging;
pub mod driver;

pub use error::*;
pub use config::*;
pub use node::*;
pub use driver::*;
