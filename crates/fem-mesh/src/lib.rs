//! Unstructured mesh support for the finite element solver.
//!
//! This crate provides the topological mesh container (stratified points,
//! cone/support adjacency, named region labels) and the reference-element
//! geometry tables shared by the discretization layer.

pub mod mesh;
pub mod ref_domain;

pub use mesh::{Label, Mesh, MeshError, PointId};
pub use ref_domain::{ElementType, FaceMode};
