//! meshlight Time - Timers and transitions
//!
//! This crate implements the time-driven half of the engine:
//! - The timer collaborator boundary (stable timer identities)
//! - A deterministic virtual timer wheel
//! - The generic transition scheduler (delay, linear steps, move)
//! - The TAI clock used by the Time and Scheduler servers

pub mod timer;
pub mod wheel;
pub mod transition;
pub mod clock;

pub use timer::*;
pub use wheel::*;
pub use transition::*;
pub use clock::*;
