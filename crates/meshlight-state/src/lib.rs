//! meshlight State - Per-model state bookkeeping
//!
//! This crate implements the passive half of the engine:
//! - State descriptors (present, target and scene slots)
//! - Transaction deduplication and acknowledgement framing
//! - The binding graph and its cascade walk
//! - The scene register
//! - The NVM collaborator boundary

pub mod store;
pub mod transaction;
pub mod binding;
pub mod scene;
pub mod nvm;

pub use store::*;
pub use transaction::*;
pub use binding::*;
pub use scene::*;
pub use nvm::*;
