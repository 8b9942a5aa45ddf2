//! Module containing the universal error type
use crate::node::NodeKind;
use thiserror::Error;

/// Universal error type for `metageo`
#[derive(Error, Debug)]
pub enum Error {
    /// Node is not present in this builder
    #[error("node is not present in this builder")]
    BadNode,

    /// Blocks can only be added to a `Blocks` node
    #[error("cannot add a block to a `{0}` node")]
    NotAGroup(NodeKind),

    /// The parent node cannot accept another child
    #[error("a `{0}` node cannot accept this child")]
    NotAContainer(NodeKind),

    /// The node does not carry a transform
    #[error("a `{0}` node has no transform")]
    NoTransform(NodeKind),

    /// The child node already has a parent
    #[error("node already has a parent")]
    AlreadyParented,

    /// Adding this child would create a cycle
    #[error("node graph contains a cycle")]
    Cycle,

    /// `execute` was called before a root node was set
    #[error("no root node has been set")]
    NoRoot,

    /// A half-edge walk did not close up
    #[error("non-manifold topology: {0}")]
    NonManifold(String),

    /// Every candidate ray from a classification point grazed an edge
    #[error("ambiguous classification ray at {pos:?}")]
    AmbiguousRay {
        /// Position being classified
        pos: [f32; 3],
    },

    /// io error; see inner code for details
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
