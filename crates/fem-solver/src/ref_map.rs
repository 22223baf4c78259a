//! Reference map: the per-cell map from the reference element onto a
//! physical cell.
//!
//! Supplies the Jacobian matrix, its determinant and transposed inverse,
//! the integration measure `|J| * w` and physical coordinates at arbitrary
//! reference points. Affine element types (EDGE2, TRI3, TET4) share one
//! cached Jacobian per cell; bilinear and trilinear types evaluate per
//! point through the vertex-only reference-map shapeset.

use crate::error::{Error, Result};
use crate::quadrature::QPoint;
use crate::shapeset::{Shapeset, ValueKind};
use fem_mesh::{ElementType, Mesh, PointId};

type Mat3 = [[f64; 3]; 3];

fn determinant(m: &Mat3, dim: usize) -> f64 {
    match dim {
        1 => m[0][0],
        2 => m[0][0] * m[1][1] - m[0][1] * m[1][0],
        _ => {
            m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
        }
    }
}

/// Transposed inverse; `det` must be nonzero
fn inverse_t(m: &Mat3, dim: usize, det: f64) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    match dim {
        1 => out[0][0] = 1.0 / det,
        2 => {
            let inv = [
                [m[1][1] / det, -m[0][1] / det],
                [-m[1][0] / det, m[0][0] / det],
            ];
            // transpose of the inverse
            out[0][0] = inv[0][0];
            out[0][1] = inv[1][0];
            out[1][0] = inv[0][1];
            out[1][1] = inv[1][1];
        }
        _ => {
            let c = [
                [
                    m[1][1] * m[2][2] - m[1][2] * m[2][1],
                    m[1][2] * m[2][0] - m[1][0] * m[2][2],
                    m[1][0] * m[2][1] - m[1][1] * m[2][0],
                ],
                [
                    m[0][2] * m[2][1] - m[0][1] * m[2][2],
                    m[0][0] * m[2][2] - m[0][2] * m[2][0],
                    m[0][1] * m[2][0] - m[0][0] * m[2][1],
                ],
                [
                    m[0][1] * m[1][2] - m[0][2] * m[1][1],
                    m[0][2] * m[1][0] - m[0][0] * m[1][2],
                    m[0][0] * m[1][1] - m[0][1] * m[1][0],
                ],
            ];
            // inv = adj/det = C^T/det, so inv^T = C/det
            for (o, row) in out.iter_mut().zip(&c) {
                for (v, &cv) in o.iter_mut().zip(row) {
                    *v = cv / det;
                }
            }
        }
    }
    out
}

/// Reference-to-physical map for the active cell
pub struct RefMap<'m> {
    mesh: &'m Mesh,
    shapeset: Shapeset,
    cell: Option<PointId>,
    vert_coords: Vec<[f64; 3]>,
    affine: bool,
    const_jacobian: Mat3,
    const_det: f64,
    const_inv_t: Mat3,
}

impl<'m> RefMap<'m> {
    pub fn new(mesh: &'m Mesh) -> Self {
        RefMap {
            shapeset: Shapeset::ref_map(mesh.cell_type()),
            mesh,
            cell: None,
            vert_coords: Vec::new(),
            affine: false,
            const_jacobian: [[0.0; 3]; 3],
            const_det: 0.0,
            const_inv_t: [[0.0; 3]; 3],
        }
    }

    /// Must be called before any evaluation
    pub fn set_active_cell(&mut self, cell: PointId) -> Result<()> {
        if self.cell == Some(cell) {
            return Ok(());
        }
        let dim = self.mesh.dim();
        self.vert_coords.clear();
        for &v in self.mesh.cell_vertices(cell) {
            let c = self.mesh.vertex_coords(v);
            let mut x = [0.0; 3];
            x[..dim].copy_from_slice(c);
            self.vert_coords.push(x);
        }
        self.affine = matches!(
            self.mesh.cell_type(),
            ElementType::Edge2 | ElementType::Tri3 | ElementType::Tet4
        );
        self.cell = Some(cell);
        if self.affine {
            let j = self.jacobian_at(&[0.0; 3]);
            let det = determinant(&j, dim);
            if det <= 0.0 {
                self.cell = None;
                return Err(Error::Numerical(format!(
                    "zero-volume or inverted cell {}",
                    cell
                )));
            }
            self.const_jacobian = j;
            self.const_det = det;
            self.const_inv_t = inverse_t(&j, dim, det);
        }
        Ok(())
    }

    pub fn active_cell(&self) -> Option<PointId> {
        self.cell
    }

    pub fn is_const_jacobian(&self) -> bool {
        self.affine
    }

    /// Increase in integration order due to the reference map
    pub fn ref_order(&self) -> usize {
        if self.affine { 0 } else { 1 }
    }

    /// Increase in integration order due to the inverse reference map
    pub fn inv_ref_order(&self) -> usize {
        if self.affine { 0 } else { 1 }
    }

    fn jacobian_at(&self, pt: &[f64; 3]) -> Mat3 {
        let dim = self.mesh.dim();
        let kinds = [ValueKind::Dx, ValueKind::Dy, ValueKind::Dz];
        let mut j = [[0.0; 3]; 3];
        for (i, vc) in self.vert_coords.iter().enumerate() {
            let idx = self.shapeset.vertex_index(i);
            for (e, kind) in kinds.iter().enumerate().take(dim) {
                let dn = self
                    .shapeset
                    .get_value(*kind, idx, pt)
                    .expect("reference-map shapeset supplies first derivatives");
                for d in 0..dim {
                    j[d][e] += vc[d] * dn;
                }
            }
        }
        j
    }

    fn det_at(&self, cell: PointId, pt: &[f64; 3]) -> Result<f64> {
        if self.affine {
            return Ok(self.const_det);
        }
        let det = determinant(&self.jacobian_at(pt), self.mesh.dim());
        if det <= 0.0 {
            return Err(Error::Numerical(format!(
                "zero-volume or inverted cell {}",
                cell
            )));
        }
        Ok(det)
    }

    /// Integration measure `|J| * w` at every quadrature point
    pub fn get_jxw(&self, pts: &[QPoint]) -> Result<Vec<f64>> {
        let cell = self.require_cell()?;
        pts.iter()
            .map(|p| Ok(self.det_at(cell, &p.x)? * p.w))
            .collect()
    }

    /// Jacobian determinant at every point
    pub fn get_jacobian(&self, pts: &[QPoint]) -> Result<Vec<f64>> {
        let cell = self.require_cell()?;
        pts.iter().map(|p| self.det_at(cell, &p.x)).collect()
    }

    /// Transposed inverse Jacobian at every point; maps reference gradients
    /// to physical gradients
    pub fn get_inv_jacobian_t(&self, pts: &[QPoint]) -> Result<Vec<Mat3>> {
        let cell = self.require_cell()?;
        if self.affine {
            return Ok(vec![self.const_inv_t; pts.len()]);
        }
        let dim = self.mesh.dim();
        pts.iter()
            .map(|p| {
                let j = self.jacobian_at(&p.x);
                let det = determinant(&j, dim);
                if det <= 0.0 {
                    return Err(Error::Numerical(format!(
                        "zero-volume or inverted cell {}",
                        cell
                    )));
                }
                Ok(inverse_t(&j, dim, det))
            })
            .collect()
    }

    /// Physical coordinates of the points
    pub fn get_phys_coords(&self, pts: &[QPoint]) -> Result<Vec<[f64; 3]>> {
        self.require_cell()?;
        let out = pts
            .iter()
            .map(|p| {
                let mut x = [0.0; 3];
                for (i, vc) in self.vert_coords.iter().enumerate() {
                    let idx = self.shapeset.vertex_index(i);
                    let n = self
                        .shapeset
                        .get_value(ValueKind::Value, idx, &p.x)
                        .expect("reference-map shapeset supplies values");
                    for (xd, &vd) in x.iter_mut().zip(vc) {
                        *xd += n * vd;
                    }
                }
                x
            })
            .collect();
        Ok(out)
    }

    fn require_cell(&self) -> Result<PointId> {
        self.cell
            .ok_or_else(|| Error::Topology("reference map has no active cell".into()))
    }
}
