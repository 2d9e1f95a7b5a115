//! meshlight Test Harness - Simulation and validation of the model engine
//!
//! This crate provides:
//! - A request builder acting as a mesh client
//! - Lossy link simulation (loss bursts, duplicates)
//! - A lockstep multi-node simulator with reboot from storage
//! - A seeded message fuzzer
//! - End-to-end property tests

pub mod client;
pub mod link;
pub mod simulator;
pub mod fuzzer;

#[cfg(test)]
mod properties;

pub use client::*;
pub use link::*;
pub use simulator::*;
pub use fuzzer::*;
