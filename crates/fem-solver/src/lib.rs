//! Finite-element solver core.
//!
//! This crate holds the discretization stack (Lobatto shapesets, Gauss
//! quadrature, reference maps), the DOF layout with assembly lists, the
//! weak-form registry, boundary information, the problem engine driving
//! residual and Jacobian integration, and the outer Newton and implicit
//! time solvers over a pluggable linear-algebra backend.

pub mod assembly_list;
pub mod backend;
pub mod boundary;
pub mod error;
pub mod la;
pub mod lobatto;
pub mod nonlinear;
pub mod problem;
pub mod quadrature;
pub mod ref_map;
pub mod shapeset;
pub mod space;
pub mod transient;
pub mod weak_form;

pub use assembly_list::{AssemblyList, DIRICHLET_DOF};
pub use backend::{LinearSolver, NativeBackend, SolveInfo, default_backend};
pub use boundary::{EssentialBoundaryInfo, NaturalBoundaryInfo, facet_normal_measure};
pub use error::{Error, Result};
pub use la::{Matrix, Vector};
pub use nonlinear::{ConvergenceStatus, NonlinearConfig, NonlinearResults, solve_nonlinear};
pub use problem::{FeProblem, FieldInfo, SpatialFn};
pub use quadrature::{QPoint, Quadrature, gauss, max_quadrature_order};
pub use ref_map::RefMap;
pub use shapeset::{MAX_ORDER, Shapeset, ValueKind};
pub use space::{BcType, ElementLayout, Section, Space};
pub use transient::{
    TimeConvergedReason, TimeScheme, TimeSpec, TransientConfig, TransientSolver,
};
pub use weak_form::{FieldData, FieldId, JacobianFunc, Region, ResidualFunc, WeakForm};
