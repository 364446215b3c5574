//! Error taxonomy shared across the mesh (§7).

use crate::ids::{ClassName, ConnId};
use thiserror::Error;

/// Errors that can surface on the public Actor request path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// The target actor has been killed and accepts no new work.
    #[error("actor is dead")]
    Dead,

    /// The registry had no live candidate for the given class at the next hop.
    #[error("no actors with class '{class}' are available")]
    NoCandidate { class: ClassName },

    /// A store lookup for `conn_id` found no record.
    #[error("no connection with id '{conn_id}'")]
    NotFound { conn_id: ConnId },

    /// A downstream `request` failed; the inner error is preserved verbatim.
    #[error("downstream request failed: {0}")]
    DownstreamFailure(Box<MeshError>),
}

impl MeshError {
    /// Wrap `self` as the cause of a downstream-propagated failure.
    pub fn into_downstream(self) -> MeshError {
        MeshError::DownstreamFailure(Box::new(self))
    }
}
