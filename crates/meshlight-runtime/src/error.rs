//! Runtime error types

use meshlight_core::MeshError;
use meshlight_state::SceneError;
use thiserror::Error;

/// Failures of the node's local API and driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    /// The driver task is gone
    #[error("Node driver stopped")]
    DriverStopped,
}

pub type NodeResult<T> = Result<T, NodeError>;
