//! Error taxonomy for the solver layer.
//!
//! Configuration and topology problems are detected before the solve begins
//! and carry the offending parameter or identifier in the message. Numerical
//! failures name the offending cell. Non-convergence of the outer solver is
//! not an error at this level; it travels through convergence reasons.

use fem_mesh::MeshError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting or missing options; reported before solving
    #[error("configuration error: {0}")]
    Config(String),
    /// Unknown labels, missing discretizations, unsupported orders
    #[error("topology error: {0}")]
    Topology(String),
    /// Singular reference maps, zero-volume cells
    #[error("numerical error: {0}")]
    Numerical(String),
    /// Failure inside the linear-algebra backend
    #[error("linear solver error: {0}")]
    Solver(String),
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

pub type Result<T> = std::result::Result<T, Error>;
