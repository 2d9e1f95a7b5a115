//! meshlight Core - Fundamental types for the mesh model engine
//!
//! This crate defines the types shared by every layer of the engine:
//! - Identifiers (ElementId, MeshAddress, AppKeyIndex)
//! - Transition time and delay encodings
//! - State value capability and binding values
//! - Model kinds and the upper-layer event union
//! - The error taxonomy

pub mod id;
pub mod time;
pub mod state;
pub mod event;
pub mod models;
pub mod error;

pub use id::*;
pub use time::*;
pub use state::*;
pub use event::*;
pub use models::*;
pub use error::*;
