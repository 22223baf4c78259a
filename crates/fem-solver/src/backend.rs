//! Pluggable linear-solver backends.
//!
//! The engine hands an assembled `Matrix` and right-hand side to a
//! `LinearSolver`; the native backend converts to dense and factorizes with
//! LU. A distributed implementation can slot in behind the same trait.

use crate::error::{Error, Result};
use crate::la::{Matrix, Vector};

/// Information returned by a linear solve
#[derive(Debug, Clone, Copy)]
pub struct SolveInfo {
    pub iterations: usize,
    pub residual_norm: f64,
}

pub trait LinearSolver {
    fn solve(&self, a: &Matrix, b: &Vector) -> Result<(Vector, SolveInfo)>;
}

/// Direct solver on the local process
#[derive(Debug, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        NativeBackend
    }
}

impl LinearSolver for NativeBackend {
    fn solve(&self, a: &Matrix, b: &Vector) -> Result<(Vector, SolveInfo)> {
        let dense = a.to_dense()?;
        let lu = dense.lu();
        let x = lu
            .solve(b.as_dvector())
            .ok_or_else(|| Error::Solver("singular system matrix".into()))?;
        let residual = a.mul_vec(&Vector::from_vec(x.as_slice().to_vec()))?;
        let mut r = residual;
        r.axpy(-1.0, b);
        let info = SolveInfo {
            iterations: 1,
            residual_norm: r.norm(),
        };
        Ok((Vector::from_vec(x.as_slice().to_vec()), info))
    }
}

/// The backend used when none is configured explicitly
pub fn default_backend() -> Box<dyn LinearSolver + Send + Sync> {
    Box::new(NativeBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_diagonal_system() {
        let mut a = Matrix::new(2, 2);
        a.assembly_begin();
        a.add(0, 0, 2.0);
        a.add(1, 1, 4.0);
        a.assembly_end().unwrap();
        let b = Vector::from_vec(vec![2.0, 8.0]);
        let (x, info) = NativeBackend::new().solve(&a, &b).unwrap();
        assert!((x.get(0) - 1.0).abs() < 1e-14);
        assert!((x.get(1) - 2.0).abs() < 1e-14);
        assert!(info.residual_norm < 1e-12);
    }

    #[test]
    fn reports_singular_matrix() {
        let mut a = Matrix::new(2, 2);
        a.assembly_begin();
        a.add(0, 0, 1.0);
        a.assembly_end().unwrap();
        let b = Vector::from_vec(vec![1.0, 1.0]);
        assert!(NativeBackend::new().solve(&a, &b).is_err());
    }
}
