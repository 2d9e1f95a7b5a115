//! meshlight Wire - Access layer message format
//!
//! This crate implements the bit-exact boundary between the mesh transport
//! and the model engine:
//! - Opcode encoding (1, 2 and 3 octet forms)
//! - Inbound/outbound message records
//! - Exhaustive decode of model messages
//! - Encode of Status messages
//! - Scheduler register packing

pub mod opcode;
pub mod frame;
pub mod message;
pub mod status;
pub mod schedule;

pub use opcode::*;
pub use frame::*;
pub use message::*;
pub use status::*;
pub use schedule::*;
