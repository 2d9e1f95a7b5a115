//! Error types for the mesh model engine

use thiserror::Error;

use crate::{ElementId, ModelKind};

/// Core engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    // Wire errors
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown opcode: {0:#08x}")]
    UnknownOpcode(u32),

    #[error("Invalid parameter length {len} for opcode {opcode:#06x}")]
    InvalidLength { opcode: u32, len: usize },

    #[error("Prohibited value: {0}")]
    ProhibitedValue(&'static str),

    #[error("Reserved field set: {0}")]
    ReservedField(&'static str),

    // Resource errors
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("No free timer")]
    TimerExhausted,

    // Configuration errors
    #[error("No such element: {0:?}")]
    NoSuchElement(ElementId),

    #[error("No {kind:?} model on element {element:?}")]
    NoSuchModel { element: ElementId, kind: ModelKind },

    #[error("Binding cycle through {0}")]
    BindingCycle(String),

    #[error("Binding endpoint missing: {0}")]
    DanglingBinding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Persistence errors
    #[error("Corrupt dataset: {0}")]
    CorruptDataset(String),
}

/// Result type for engine operations
pub type MeshResult<T> = Result<T, MeshError>;
