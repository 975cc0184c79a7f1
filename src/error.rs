//! Error types for klangraum.

use thiserror::Error;

use crate::node::NodeId;
use crate::spatial::{ComponentId, ComponentRole};

/// Error type for graph, spatialization and engine operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid bus layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Node {0:?} is no longer part of the graph")]
    NodeGone(NodeId),

    #[error("Node {node:?} has no {direction} bus {bus}")]
    InvalidBus {
        node: NodeId,
        direction: &'static str,
        bus: usize,
    },

    #[error("Channel mismatch: output bus carries {output} channels, input bus expects {input}")]
    ChannelMismatch { output: usize, input: usize },

    #[error("Connecting {from:?} to {to:?} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("Graph command queue is full")]
    QueueFull,

    #[error("Node {0:?} is not part of this chain")]
    NotInChain(NodeId),

    #[error("Node {0:?} is already part of this chain")]
    AlreadyInChain(NodeId),

    #[error("Unknown {role} id {id}")]
    UnknownComponent { role: ComponentRole, id: ComponentId },

    #[error("{role} {id} is disabled")]
    ComponentDisabled { role: ComponentRole, id: ComponentId },

    #[error("Cannot register more than {0} components per role")]
    RegistryFull(usize),

    #[error("Listener index {0} out of range")]
    InvalidListener(usize),

    #[error("Audio device not available: {0}")]
    DeviceUnavailable(String),
}

/// Result type alias for klangraum operations.
pub type Result<T> = std::result::Result<T, Error>;
