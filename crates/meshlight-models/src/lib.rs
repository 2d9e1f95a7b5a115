//! meshlight Models - Model servers
//!
//! Every transitionable server is built on one generic engine
//! ([`TransitionModel`]) that ties together a state descriptor, a transaction
//! tracker and a transition scheduler. Servers translate between wire
//! messages and that engine, and report through an explicit [`ModelCtx`]:
//! - Generic OnOff, Level, Default Transition Time, Power OnOff, Power Level
//! - Light Lightness and Light HSL (with Hue and Saturation sub-elements)
//! - Scenes, Scheduler and Time

pub mod context;
pub mod engine;
pub mod onoff;
pub mod level;
pub mod default_transition;
pub mod power_onoff;
pub mod power_level;
pub mod lightness;
pub mod hsl;
pub mod scene;
pub mod scheduler;
pub mod time;
pub mod server;

pub use context::*;
pub use engine::*;
pub use onoff::*;
pub use level::*;
pub use default_transition::*;
pub use power_onoff::*;
pub use power_level::*;
pub use lightness::*;
pub use hsl::*;
pub use scene::*;
pub use scheduler::*;
pub use time::*;
pub use server::*;
