//! Input, output and restart support for the finite-element solver.
//!
//! This crate provides:
//! - **YAML input files** describing a run (`mesh`, `problem`,
//!   `executioner`, `ic`, `bc`, `output` blocks),
//! - **VTK legacy export** of meshes with nodal solution data,
//! - **JSON restart** snapshots of the solution vector with enough
//!   metadata to rebuild a compatible DOF layout.

pub mod input;
pub mod restart;
pub mod vtk;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input file error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("restart file error: {0}")]
    Restart(#[from] serde_json::Error),
    #[error("restart file is incompatible: {0}")]
    Incompatible(String),
    #[error(transparent)]
    Mesh(#[from] fem_mesh::MeshError),
    #[error(transparent)]
    Solver(#[from] fem_solver::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;

pub use input::{
    BcBlock, ExecutionerBlock, IcBlock, InputFile, MeshBlock, OutputBlock, ProblemBlock,
    SideSetSpec,
};
pub use restart::{RestartField, RestartState, load_restart, mesh_fingerprint, save_restart};
pub use vtk::write_vtk;
