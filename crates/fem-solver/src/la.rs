//! Vector and matrix containers for assembly.
//!
//! `Vector` is a dense value vector with additive scatter; `Matrix`
//! accumulates COO triplets during assembly and converts to CSR when the
//! paired `assembly_begin`/`assembly_end` calls close. The pairing
//! discipline matches a distributed backend even though this implementation
//! is serial; duplicate triplets are summed on conversion and near-zero
//! entries are dropped to preserve sparsity.

use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Dense value vector with additive scatter
#[derive(Debug, Clone)]
pub struct Vector {
    data: DVector<f64>,
}

impl Vector {
    pub fn new(n: usize) -> Self {
        Vector {
            data: DVector::zeros(n),
        }
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Vector {
            data: DVector::from_vec(values),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn get(&self, i: usize) -> f64 {
        self.data[i]
    }

    pub fn set(&mut self, i: usize, v: f64) {
        self.data[i] = v;
    }

    pub fn add(&mut self, i: usize, v: f64) {
        self.data[i] += v;
    }

    pub fn set_values(&mut self, indices: &[usize], values: &[f64]) {
        for (&i, &v) in indices.iter().zip(values) {
            self.data[i] = v;
        }
    }

    pub fn get_values(&self, indices: &[usize]) -> Vec<f64> {
        indices.iter().map(|&i| self.data[i]).collect()
    }

    pub fn norm(&self) -> f64 {
        self.data.norm()
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        self.data.dot(&other.data)
    }

    /// self += alpha * other
    pub fn axpy(&mut self, alpha: f64, other: &Vector) {
        self.data.axpy(alpha, &other.data, 1.0);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data *= alpha;
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice()
    }

    pub fn as_dvector(&self) -> &DVector<f64> {
        &self.data
    }

    /// No-op in the serial backend; kept so call sites stay paired
    pub fn assembly_begin(&mut self) {}

    pub fn assembly_end(&mut self) {}
}

/// Sparse matrix assembled from COO triplets
#[derive(Debug, Clone)]
pub struct Matrix {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
    csr: Option<CsrMatrix<f64>>,
    assembling: bool,
}

impl Matrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Matrix {
            nrows,
            ncols,
            rows: Vec::new(),
            cols: Vec::new(),
            vals: Vec::new(),
            csr: None,
            assembling: false,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn zero(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.vals.clear();
        self.csr = None;
    }

    /// Additive insertion
    pub fn add(&mut self, row: usize, col: usize, v: f64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(v);
        self.csr = None;
    }

    pub fn assembly_begin(&mut self) {
        self.assembling = true;
    }

    /// Sum duplicates and convert to CSR; must pair with `assembly_begin`
    pub fn assembly_end(&mut self) -> Result<()> {
        if !self.assembling {
            return Err(Error::Solver(
                "assembly_end without matching assembly_begin".into(),
            ));
        }
        self.assembling = false;
        let tolerance = 1e-300;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.vals) {
            if v.abs() > tolerance {
                rows.push(r);
                cols.push(c);
                vals.push(v);
            }
        }
        let coo = CooMatrix::try_from_triplets(self.nrows, self.ncols, rows, cols, vals)
            .map_err(|e| Error::Solver(format!("failed to build COO matrix: {:?}", e)))?;
        self.csr = Some(CsrMatrix::from(&coo));
        Ok(())
    }

    pub fn is_assembled(&self) -> bool {
        self.csr.is_some()
    }

    pub fn csr(&self) -> Result<&CsrMatrix<f64>> {
        self.csr
            .as_ref()
            .ok_or_else(|| Error::Solver("matrix is not assembled".into()))
    }

    pub fn nnz(&self) -> usize {
        self.csr.as_ref().map(|m| m.nnz()).unwrap_or(0)
    }

    /// Assembled entry, zero if not stored
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match &self.csr {
            Some(m) => {
                let r = m.row(row);
                r.col_indices()
                    .iter()
                    .position(|&c| c == col)
                    .map(|p| r.values()[p])
                    .unwrap_or(0.0)
            }
            None => 0.0,
        }
    }

    /// Dense copy of the assembled matrix
    pub fn to_dense(&self) -> Result<DMatrix<f64>> {
        let csr = self.csr()?;
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for (row_idx, row) in csr.row_iter().enumerate() {
            for (&col_idx, &value) in row.col_indices().iter().zip(row.values()) {
                dense[(row_idx, col_idx)] = value;
            }
        }
        Ok(dense)
    }

    /// y = A * x
    pub fn mul_vec(&self, x: &Vector) -> Result<Vector> {
        let csr = self.csr()?;
        let mut y = Vector::new(self.nrows);
        for (row_idx, row) in csr.row_iter().enumerate() {
            let mut s = 0.0;
            for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                s += v * x.get(col);
            }
            y.set(row_idx, s);
        }
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_set_get_round_trip() {
        let mut v = Vector::new(5);
        let idx = [0, 2, 4];
        let vals = [1.0, -2.5, 3.75];
        v.set_values(&idx, &vals);
        assert_eq!(v.get_values(&idx), vals.to_vec());
    }

    #[test]
    fn vector_additive_scatter() {
        let mut v = Vector::new(3);
        v.add(1, 2.0);
        v.add(1, 3.0);
        assert_eq!(v.get(1), 5.0);
    }

    #[test]
    fn matrix_sums_duplicates() {
        let mut m = Matrix::new(3, 3);
        m.assembly_begin();
        m.add(0, 0, 1.0);
        m.add(0, 0, 2.0);
        m.add(1, 2, -1.0);
        m.assembly_end().unwrap();
        assert_eq!(m.get(0, 0), 3.0);
        assert_eq!(m.get(1, 2), -1.0);
        assert_eq!(m.get(2, 2), 0.0);
    }

    #[test]
    fn unpaired_assembly_is_an_error() {
        let mut m = Matrix::new(2, 2);
        assert!(m.assembly_end().is_err());
    }

    #[test]
    fn matvec() {
        let mut m = Matrix::new(2, 2);
        m.assembly_begin();
        m.add(0, 0, 2.0);
        m.add(1, 1, 3.0);
        m.assembly_end().unwrap();
        let x = Vector::from_vec(vec![1.0, 2.0]);
        let y = m.mul_vec(&x).unwrap();
        assert_eq!(y.as_slice(), &[2.0, 6.0]);
    }
}
