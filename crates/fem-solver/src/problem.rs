//! The finite-element problem engine.
//!
//! A problem owns the mesh handle, the per-field DOF spaces, the weak-form
//! registry, boundary and initial conditions and the solution storage. The
//! outer solver drives it through three entry points:
//!
//! - `compute_boundary_local` writes the projected essential values into
//!   the local vector,
//! - `compute_residual_local` integrates the registered F0/F1 contributions
//!   over every residual region (volume first, then boundary blocks) and
//!   scatters additively into the global residual,
//! - `compute_jacobian_local` does the same for G0..G3 contributions,
//!   forming element matrices per (field_i, field_j) pair.
//!
//! Cells are processed in chunks sized by the element basis (`block_size =
//! n_basis`, `batch_size = n_blocks * block_size`); element kernels inside
//! a chunk run in parallel and the scatter stays serial, so no locks are
//! needed. Ghost cells take part in geometric setup but never scatter.

use crate::assembly_list::DIRICHLET_DOF;
use crate::boundary::facet_normal_measure;
use crate::error::{Error, Result};
use crate::la::{Matrix, Vector};
use crate::quadrature::{QPoint, gauss};
use crate::ref_map::RefMap;
use crate::shapeset::{Shapeset, ValueKind};
use crate::space::{BcType, ElementLayout, Space};
use crate::weak_form::{FieldData, FieldId, JacobianFunc, Region, ResidualFunc, WeakForm};
use fem_mesh::{ElementType, Mesh, PointId};
use rayon::prelude::*;
use std::sync::Arc;

/// Pointwise scalar function of space and time
pub type SpatialFn = Box<dyn Fn(&[f64], f64) -> f64 + Send + Sync>;

/// A declared field
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    pub n_components: usize,
    pub order: usize,
}

struct EssentialBC {
    boundaries: Vec<String>,
    field: FieldId,
    value: SpatialFn,
}

/// Finite-element problem: fields, conditions, weak form and solution
pub struct FeProblem {
    mesh: Arc<Mesh>,
    fields: Vec<FieldInfo>,
    aux_fields: Vec<FieldInfo>,
    ics: Vec<Option<SpatialFn>>,
    aux_fns: Vec<SpatialFn>,
    essential_bcs: Vec<EssentialBC>,
    weak_form: WeakForm,
    overintegration: usize,
    spaces: Vec<Space>,
    aux_spaces: Vec<Space>,
    field_local_offset: Vec<usize>,
    aux_local_offset: Vec<usize>,
    local_size: usize,
    local_a: Vec<f64>,
    x: Vector,
    n_dofs: usize,
    created: bool,
}

impl FeProblem {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        FeProblem {
            mesh,
            fields: Vec::new(),
            aux_fields: Vec::new(),
            ics: Vec::new(),
            aux_fns: Vec::new(),
            essential_bcs: Vec::new(),
            weak_form: WeakForm::new(),
            overintegration: 2,
            spaces: Vec::new(),
            aux_spaces: Vec::new(),
            field_local_offset: Vec::new(),
            aux_local_offset: Vec::new(),
            local_size: 0,
            local_a: Vec::new(),
            x: Vector::new(0),
            n_dofs: 0,
            created: false,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Declare a primary field; returns its id
    pub fn add_fe(&mut self, name: &str, n_components: usize, order: usize) -> Result<FieldId> {
        if n_components != 1 {
            return Err(Error::Config(format!(
                "field '{}': only single-component H1 fields are supported",
                name
            )));
        }
        let id = self.fields.len();
        self.fields.push(FieldInfo {
            id,
            name: name.to_string(),
            n_components,
            order,
        });
        self.ics.push(None);
        Ok(id)
    }

    /// Declare an auxiliary field computed from a pointwise function
    pub fn add_aux_fe(
        &mut self,
        name: &str,
        n_components: usize,
        order: usize,
        value: SpatialFn,
    ) -> Result<FieldId> {
        if n_components != 1 {
            return Err(Error::Config(format!(
                "aux field '{}': only single-component H1 fields are supported",
                name
            )));
        }
        let id = self.aux_fields.len();
        self.aux_fields.push(FieldInfo {
            id,
            name: name.to_string(),
            n_components,
            order,
        });
        self.aux_fns.push(value);
        Ok(id)
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.id)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Initial condition of a primary field
    pub fn set_initial_condition(&mut self, field: FieldId, value: SpatialFn) {
        self.ics[field] = Some(value);
    }

    /// Essential (Dirichlet) condition on named face sets
    pub fn add_dirichlet_bc(&mut self, field: FieldId, boundaries: &[&str], value: SpatialFn) {
        self.essential_bcs.push(EssentialBC {
            boundaries: boundaries.iter().map(|s| s.to_string()).collect(),
            field,
            value,
        });
    }

    /// Extra quadrature orders on top of `2 * max(field, map)` (default 2)
    pub fn set_overintegration(&mut self, extra: usize) {
        self.overintegration = extra;
    }

    pub fn weak_form(&self) -> &WeakForm {
        &self.weak_form
    }

    pub fn weak_form_mut(&mut self) -> &mut WeakForm {
        &mut self.weak_form
    }

    /// Volume residual block on the whole domain
    pub fn add_residual_block(
        &mut self,
        field: FieldId,
        f0: Option<Box<dyn ResidualFunc>>,
        f1: Option<Box<dyn ResidualFunc>>,
    ) {
        self.weak_form.add_residual_block(Region::all(), field, f0, f1);
    }

    /// Volume Jacobian block on the whole domain
    pub fn add_jacobian_block(
        &mut self,
        field_i: FieldId,
        field_j: FieldId,
        g0: Option<Box<dyn JacobianFunc>>,
        g1: Option<Box<dyn JacobianFunc>>,
        g2: Option<Box<dyn JacobianFunc>>,
        g3: Option<Box<dyn JacobianFunc>>,
    ) {
        self.weak_form
            .add_jacobian_block(Region::all(), field_i, field_j, g0, g1, g2, g3);
    }

    /// Boundary residual block on a named face set
    pub fn add_boundary_residual_block(
        &mut self,
        field: FieldId,
        boundary: &str,
        value: i32,
        f0: Option<Box<dyn ResidualFunc>>,
        f1: Option<Box<dyn ResidualFunc>>,
    ) {
        self.weak_form
            .add_boundary_residual_block(Region::on(boundary, value), field, f0, f1);
    }

    /// Boundary Jacobian block on a named face set
    #[allow(clippy::too_many_arguments)]
    pub fn add_boundary_jacobian_block(
        &mut self,
        field_i: FieldId,
        field_j: FieldId,
        boundary: &str,
        value: i32,
        g0: Option<Box<dyn JacobianFunc>>,
        g1: Option<Box<dyn JacobianFunc>>,
        g2: Option<Box<dyn JacobianFunc>>,
        g3: Option<Box<dyn JacobianFunc>>,
    ) {
        self.weak_form.add_boundary_jacobian_block(
            Region::on(boundary, value),
            field_i,
            field_j,
            g0,
            g1,
            g2,
            g3,
        );
    }

    /// Assign DOFs, allocate storage, compute aux fields and the initial
    /// guess. Must run before any residual or Jacobian evaluation.
    pub fn create(&mut self) -> Result<()> {
        if self.created {
            return Ok(());
        }
        if self.fields.is_empty() {
            return Err(Error::Config(
                "no fields declared; call add_fe before create".into(),
            ));
        }
        let etype = self.mesh.cell_type();
        // primary spaces
        for f in &self.fields {
            let mut sp = Space::new(self.mesh.clone(), Shapeset::new(etype));
            sp.set_uniform_order(f.order)?;
            self.spaces.push(sp);
        }
        for f in &self.aux_fields {
            let mut sp = Space::new(self.mesh.clone(), Shapeset::new(etype));
            sp.set_uniform_order(f.order)?;
            self.aux_spaces.push(sp);
        }
        // classify boundary entities: natural from boundary weak-form
        // regions, essential from the Dirichlet conditions (essential wins)
        let mut bnd_regions = self.weak_form.boundary_residual_regions();
        bnd_regions.extend(self.weak_form.boundary_jacobian_regions());
        for region in &bnd_regions {
            if let Some(name) = &region.label {
                let facets = self.mesh.label_stratum(name, region.value)?.to_vec();
                for sp in &mut self.spaces {
                    sp.set_bc_info(&facets, BcType::Natural, region.value);
                }
            }
        }
        for (marker, bc) in self.essential_bcs.iter().enumerate() {
            for name in &bc.boundaries {
                let facets = self.mesh.points_from_label(name)?.to_vec();
                self.spaces[bc.field].set_bc_info(&facets, BcType::Essential, marker as i32);
            }
        }
        // deterministic field-major DOF numbering
        let mut counter = 0i64;
        for sp in &mut self.spaces {
            sp.assign_dofs(counter, 1)?;
            counter = sp.next_dof();
        }
        self.n_dofs = counter as usize;
        let mut aux_counter = 0i64;
        for sp in &mut self.aux_spaces {
            sp.assign_dofs(aux_counter, 1)?;
            aux_counter = sp.next_dof();
        }
        // local sections, field-major
        let mut off = 0usize;
        for sp in &self.spaces {
            self.field_local_offset.push(off);
            off += sp.local_size();
        }
        self.local_size = off;
        let mut aux_off = 0usize;
        for sp in &self.aux_spaces {
            self.aux_local_offset.push(aux_off);
            aux_off += sp.local_size();
        }
        self.local_a = vec![0.0; aux_off];
        self.compute_aux_fields();
        self.update_essential_projections(0.0);
        self.set_up_initial_guess();
        self.created = true;
        log::info!(
            "problem created: {} fields, {} dofs",
            self.fields.len(),
            self.n_dofs
        );
        Ok(())
    }

    /// Nodal interpolation of the auxiliary functions into the aux vector
    fn compute_aux_fields(&mut self) {
        for (a, sp) in self.aux_spaces.iter().enumerate() {
            let off = self.aux_local_offset[a];
            for v in self.mesh.vertex_range() {
                let slot = off + sp.vertex_local_slot(v);
                self.local_a[slot] = (self.aux_fns[a])(self.mesh.vertex_coords(v), 0.0);
            }
        }
    }

    /// Project the Dirichlet data of every essential vertex at `time`
    pub fn update_essential_projections(&mut self, time: f64) {
        for (fid, sp) in self.spaces.iter_mut().enumerate() {
            for (vertex, marker) in sp.essential_vertices() {
                let bc = &self.essential_bcs[marker as usize];
                debug_assert_eq!(bc.field, fid);
                let value = (bc.value)(self.mesh.vertex_coords(vertex), time);
                sp.set_vertex_bc_proj(vertex, value);
            }
        }
    }

    fn set_up_initial_guess(&mut self) {
        let mut local = vec![0.0; self.local_size];
        for (fid, sp) in self.spaces.iter().enumerate() {
            if let Some(ic) = &self.ics[fid] {
                let off = self.field_local_offset[fid];
                for v in self.mesh.vertex_range() {
                    local[off + sp.vertex_local_slot(v)] = ic(self.mesh.vertex_coords(v), 0.0);
                }
            }
        }
        self.compute_boundary_local(&mut local);
        let mut x = Vector::new(self.n_dofs);
        self.local_to_global(&local, &mut x);
        self.x = x;
    }

    /// Total number of solve unknowns
    pub fn get_dof_count(&self) -> usize {
        self.n_dofs
    }

    pub fn space(&self, field: FieldId) -> &Space {
        &self.spaces[field]
    }

    pub fn solution(&self) -> &Vector {
        &self.x
    }

    pub fn set_solution(&mut self, x: Vector) {
        self.x = x;
    }

    /// Size of the local (ghosted, essential-inclusive) form
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Write the projected essential values into the local vector
    pub fn compute_boundary_local(&self, local: &mut [f64]) {
        for (fid, sp) in self.spaces.iter().enumerate() {
            let off = self.field_local_offset[fid];
            for (slot, value) in sp.essential_local_entries() {
                local[off + slot] = value;
            }
        }
    }

    /// Copy the free entries of the global vector into the local form
    pub fn global_to_local(&self, x: &Vector, local: &mut [f64]) {
        for (fid, sp) in self.spaces.iter().enumerate() {
            let off = self.field_local_offset[fid];
            for (slot, dof) in sp.free_dof_slots() {
                local[off + slot] = x.get(dof as usize);
            }
        }
    }

    /// Copy the free entries of the local form into the global vector
    pub fn local_to_global(&self, local: &[f64], x: &mut Vector) {
        for (fid, sp) in self.spaces.iter().enumerate() {
            let off = self.field_local_offset[fid];
            for (slot, dof) in sp.free_dof_slots() {
                x.set(dof as usize, local[off + slot]);
            }
        }
    }

    /// Local form of `x` with the essential values inserted
    pub fn build_local(&self, x: &Vector) -> Vec<f64> {
        let mut local = vec![0.0; self.local_size];
        self.global_to_local(x, &mut local);
        self.compute_boundary_local(&mut local);
        local
    }

    /// Local form of the current solution (essential values included)
    pub fn compute_solution_vector_local(&self) -> Vec<f64> {
        self.build_local(&self.x)
    }

    /// Integral of the current solution of `field` over the domain
    pub fn integrate_field(&self, field: FieldId) -> Result<f64> {
        self.reduce_field(field, |u| u)
    }

    /// L2 norm of the current solution of `field`
    pub fn l2_norm(&self, field: FieldId) -> Result<f64> {
        Ok(self.reduce_field(field, |u| u * u)?.sqrt())
    }

    fn reduce_field(&self, field: FieldId, f: impl Fn(f64) -> f64) -> Result<f64> {
        let local = self.compute_solution_vector_local();
        let quad = gauss(self.mesh.cell_type());
        let pts = quad.points(self.quad_order(field))?.to_vec();
        let mut total = 0.0;
        for cell in self.mesh.all_cells() {
            if self.mesh.is_ghost_cell(cell) {
                continue;
            }
            let geom = self.cell_geometry(cell, &pts)?;
            let interp = self.interpolate(cell, &pts, &geom, &local, None)?;
            for q in 0..pts.len() {
                let u = interp.values[q * interp.nf + field];
                total += geom.jxw[q] * f(u);
            }
        }
        Ok(total)
    }

    fn region_cells(&self, region: &Region) -> Result<Vec<PointId>> {
        match &region.label {
            None => Ok(self.mesh.all_cells().collect()),
            Some(name) => Ok(self
                .mesh
                .label_stratum(name, region.value)?
                .iter()
                .copied()
                .filter(|&p| self.mesh.is_cell(p))
                .collect()),
        }
    }

    fn quad_order(&self, field: FieldId) -> usize {
        let map_order = if matches!(
            self.mesh.cell_type(),
            ElementType::Edge2 | ElementType::Tri3 | ElementType::Tet4
        ) {
            0
        } else {
            1
        };
        2 * self.fields[field].order.max(map_order).max(1) + self.overintegration
    }

    /// Fill the global residual from the local solution form.
    ///
    /// `local_x_t` carries the local time derivative on transient
    /// evaluations; `shift` is the integrator's shift factor (zero when
    /// steady).
    pub fn compute_residual_local(
        &self,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        f: &mut Vector,
    ) -> Result<()> {
        f.assembly_begin();
        for region in self.weak_form.residual_regions() {
            let cells = self.region_cells(&region)?;
            for field in 0..self.fields.len() {
                if self.weak_form.residual_blocks(&region, field).next().is_none() {
                    continue;
                }
                self.integrate_residual_region(
                    &region, &cells, field, time, shift, local_x, local_x_t, f,
                )?;
            }
        }
        self.compute_bnd_residual(time, shift, local_x, local_x_t, f)?;
        f.assembly_end();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_residual_region(
        &self,
        region: &Region,
        cells: &[PointId],
        field: FieldId,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        f: &mut Vector,
    ) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let qorder = self.quad_order(field);
        let quad = gauss(self.mesh.cell_type());
        let pts = quad.points(qorder)?.to_vec();
        // tile sizes: chunks of conforming batches plus a remainder
        let n_basis = self.spaces[field].shapeset().num_fns(self.fields[field].order);
        let block_size = n_basis;
        let n_blocks = 1;
        let batch_size = n_blocks * block_size;
        let n_batches = 8;
        let chunk_len = (n_batches * batch_size).max(1);
        for chunk in cells.chunks(chunk_len) {
            let elems: Result<Vec<(PointId, Vec<f64>)>> = chunk
                .par_iter()
                .map(|&cell| {
                    let geom = self.cell_geometry(cell, &pts)?;
                    let e = self.cell_residual(
                        cell, region, field, &pts, &geom, None, time, shift, local_x, local_x_t,
                        false,
                    )?;
                    Ok((cell, e))
                })
                .collect();
            for (cell, e) in elems? {
                if self.mesh.is_ghost_cell(cell) {
                    continue;
                }
                self.scatter_residual(field, cell, &e, f)?;
            }
        }
        Ok(())
    }

    fn scatter_residual(
        &self,
        field: FieldId,
        cell: PointId,
        e: &[f64],
        f: &mut Vector,
    ) -> Result<()> {
        let layout = self.spaces[field].get_element_layout(cell)?;
        for k in 0..layout.len() {
            if layout.dof[k] == DIRICHLET_DOF {
                continue;
            }
            f.add(layout.dof[k] as usize, e[k] * layout.coef[k]);
        }
        Ok(())
    }

    /// Geometric data of a cell at a point set
    fn cell_geometry(&self, cell: PointId, pts: &[QPoint]) -> Result<CellGeometry> {
        let mut rm = RefMap::new(&self.mesh);
        rm.set_active_cell(cell)?;
        Ok(CellGeometry {
            jxw: rm.get_jxw(pts)?,
            inv_jt: rm.get_inv_jacobian_t(pts)?,
            xyz: rm.get_phys_coords(pts)?,
        })
    }

    /// Element residual: e[k] = sum_q jxw_q (F0 psi_k + F1 . grad psi_k)
    #[allow(clippy::too_many_arguments)]
    fn cell_residual(
        &self,
        cell: PointId,
        region: &Region,
        field: FieldId,
        pts: &[QPoint],
        geom: &CellGeometry,
        normal: Option<[f64; 3]>,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        boundary: bool,
    ) -> Result<Vec<f64>> {
        let dim = self.mesh.dim();
        let interp = self.interpolate(cell, pts, geom, local_x, local_x_t)?;
        let test = &interp.tabs[field];
        let n_basis = test.n_basis;
        let mut e = vec![0.0; n_basis];
        let mut f0_out = [0.0; 1];
        let mut f1_out = [0.0; 3];
        for q in 0..pts.len() {
            let ctx = interp.context(q, time, shift, normal);
            let jxw = geom.jxw[q];
            let run = |f0: &Option<Box<dyn ResidualFunc>>,
                       f1: &Option<Box<dyn ResidualFunc>>,
                       e: &mut [f64],
                       f0_out: &mut [f64; 1],
                       f1_out: &mut [f64; 3]| {
                if let Some(f0) = f0 {
                    f0_out[0] = 0.0;
                    f0.evaluate(&ctx, &mut f0_out[..]);
                    for (k, ek) in e.iter_mut().enumerate() {
                        *ek += jxw * f0_out[0] * test.vals[k][q];
                    }
                }
                if let Some(f1) = f1 {
                    f1_out.fill(0.0);
                    f1.evaluate(&ctx, &mut f1_out[..dim]);
                    for (k, ek) in e.iter_mut().enumerate() {
                        let g = &test.phys_grads[k][q];
                        let mut s = 0.0;
                        for d in 0..dim {
                            s += f1_out[d] * g[d];
                        }
                        *ek += jxw * s;
                    }
                }
            };
            if boundary {
                for block in self.weak_form.bnd_residual_blocks(region, field) {
                    run(&block.f0, &block.f1, &mut e, &mut f0_out, &mut f1_out);
                }
            } else {
                for block in self.weak_form.residual_blocks(region, field) {
                    run(&block.f0, &block.f1, &mut e, &mut f0_out, &mut f1_out);
                }
            }
        }
        Ok(e)
    }

    /// Fill the Jacobian (and optionally its preconditioner) from the local
    /// solution form. Passing `None` for `jp` means the caller uses one
    /// matrix for both roles, so the preconditioner pass is skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_jacobian_local(
        &self,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        j: &mut Matrix,
        mut jp: Option<&mut Matrix>,
    ) -> Result<()> {
        let has_prec = self.weak_form.has_jacobian_preconditioner() && jp.is_some();
        j.zero();
        j.assembly_begin();
        if let Some(jp) = jp.as_deref_mut() {
            jp.zero();
            jp.assembly_begin();
        }
        for region in self.weak_form.jacobian_regions() {
            let cells = self.region_cells(&region)?;
            for field_i in 0..self.fields.len() {
                for field_j in 0..self.fields.len() {
                    let has_blocks = self
                        .weak_form
                        .jacobian_blocks(&region, field_i, field_j)
                        .next()
                        .is_some();
                    if has_blocks {
                        self.integrate_jacobian_region(
                            &region, &cells, field_i, field_j, time, shift, local_x, local_x_t,
                            false, j,
                        )?;
                    }
                    if has_prec
                        && self
                            .weak_form
                            .jacobian_pre_blocks(&region, field_i, field_j)
                            .next()
                            .is_some()
                    {
                        self.integrate_jacobian_region(
                            &region,
                            &cells,
                            field_i,
                            field_j,
                            time,
                            shift,
                            local_x,
                            local_x_t,
                            true,
                            jp.as_deref_mut().expect("preconditioner matrix"),
                        )?;
                    }
                }
            }
        }
        self.compute_bnd_jacobian(time, shift, local_x, local_x_t, j)?;
        j.assembly_end()?;
        if let Some(jp) = jp {
            jp.assembly_end()?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_jacobian_region(
        &self,
        region: &Region,
        cells: &[PointId],
        field_i: FieldId,
        field_j: FieldId,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        precond: bool,
        j: &mut Matrix,
    ) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let qorder = self.quad_order(field_i).max(self.quad_order(field_j));
        let quad = gauss(self.mesh.cell_type());
        let pts = quad.points(qorder)?.to_vec();
        let n_basis = self.spaces[field_i]
            .shapeset()
            .num_fns(self.fields[field_i].order);
        let batch_size = n_basis;
        let n_batches = 8;
        let chunk_len = (n_batches * batch_size).max(1);
        for chunk in cells.chunks(chunk_len) {
            let elems: Result<Vec<(PointId, Vec<f64>)>> = chunk
                .par_iter()
                .map(|&cell| {
                    let geom = self.cell_geometry(cell, &pts)?;
                    let m = self.cell_jacobian(
                        cell, region, field_i, field_j, &pts, &geom, None, time, shift, local_x,
                        local_x_t, precond, false,
                    )?;
                    Ok((cell, m))
                })
                .collect();
            for (cell, m) in elems? {
                if self.mesh.is_ghost_cell(cell) {
                    continue;
                }
                self.scatter_jacobian(field_i, field_j, cell, &m, j)?;
            }
        }
        Ok(())
    }

    fn scatter_jacobian(
        &self,
        field_i: FieldId,
        field_j: FieldId,
        cell: PointId,
        m: &[f64],
        j: &mut Matrix,
    ) -> Result<()> {
        let li = self.spaces[field_i].get_element_layout(cell)?;
        let lj = self.spaces[field_j].get_element_layout(cell)?;
        let nb_j = lj.len();
        for (i, &di) in li.dof.iter().enumerate() {
            if di == DIRICHLET_DOF {
                continue;
            }
            for (jj, &dj) in lj.dof.iter().enumerate() {
                if dj == DIRICHLET_DOF {
                    continue;
                }
                let v = m[i * nb_j + jj] * li.coef[i] * lj.coef[jj];
                if v != 0.0 {
                    j.add(di as usize, dj as usize, v);
                }
            }
        }
        Ok(())
    }

    /// Element matrix: m[i, j] = sum_q jxw_q (psi_i G0 phi_j
    /// + psi_i (G1 . grad phi_j) + (G2 . grad psi_i) phi_j
    /// + grad psi_i . G3 grad phi_j)
    #[allow(clippy::too_many_arguments)]
    fn cell_jacobian(
        &self,
        cell: PointId,
        region: &Region,
        field_i: FieldId,
        field_j: FieldId,
        pts: &[QPoint],
        geom: &CellGeometry,
        normal: Option<[f64; 3]>,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        precond: bool,
        boundary: bool,
    ) -> Result<Vec<f64>> {
        let dim = self.mesh.dim();
        let interp = self.interpolate(cell, pts, geom, local_x, local_x_t)?;
        let test = &interp.tabs[field_i];
        let trial = &interp.tabs[field_j];
        let (nb_i, nb_j) = (test.n_basis, trial.n_basis);
        let mut m = vec![0.0; nb_i * nb_j];
        let mut g0 = [0.0; 1];
        let mut g1 = [0.0; 3];
        let mut g2 = [0.0; 3];
        let mut g3 = [0.0; 9];
        for q in 0..pts.len() {
            let ctx = interp.context(q, time, shift, normal);
            let jxw = geom.jxw[q];
            let blocks: Vec<&crate::weak_form::JacobianBlock> = if boundary {
                self.weak_form
                    .bnd_jacobian_blocks(region, field_i, field_j)
                    .collect()
            } else if precond {
                self.weak_form
                    .jacobian_pre_blocks(region, field_i, field_j)
                    .collect()
            } else {
                self.weak_form
                    .jacobian_blocks(region, field_i, field_j)
                    .collect()
            };
            for block in blocks {
                if let Some(f) = &block.g0 {
                    g0[0] = 0.0;
                    f.evaluate(&ctx, &mut g0[..]);
                    for i in 0..nb_i {
                        let vi = test.vals[i][q];
                        for jj in 0..nb_j {
                            m[i * nb_j + jj] += jxw * g0[0] * vi * trial.vals[jj][q];
                        }
                    }
                }
                if let Some(f) = &block.g1 {
                    g1.fill(0.0);
                    f.evaluate(&ctx, &mut g1[..dim]);
                    for i in 0..nb_i {
                        let vi = test.vals[i][q];
                        for jj in 0..nb_j {
                            let gj = &trial.phys_grads[jj][q];
                            let mut s = 0.0;
                            for d in 0..dim {
                                s += g1[d] * gj[d];
                            }
                            m[i * nb_j + jj] += jxw * vi * s;
                        }
                    }
                }
                if let Some(f) = &block.g2 {
                    g2.fill(0.0);
                    f.evaluate(&ctx, &mut g2[..dim]);
                    for i in 0..nb_i {
                        let gi = &test.phys_grads[i][q];
                        let mut s = 0.0;
                        for d in 0..dim {
                            s += g2[d] * gi[d];
                        }
                        for jj in 0..nb_j {
                            m[i * nb_j + jj] += jxw * s * trial.vals[jj][q];
                        }
                    }
                }
                if let Some(f) = &block.g3 {
                    g3.fill(0.0);
                    f.evaluate(&ctx, &mut g3[..dim * dim]);
                    for i in 0..nb_i {
                        let gi = &test.phys_grads[i][q];
                        for jj in 0..nb_j {
                            let gj = &trial.phys_grads[jj][q];
                            let mut s = 0.0;
                            for d in 0..dim {
                                for e in 0..dim {
                                    s += gi[d] * g3[d * dim + e] * gj[e];
                                }
                            }
                            m[i * nb_j + jj] += jxw * s;
                        }
                    }
                }
            }
        }
        Ok(m)
    }

    /// Boundary residual contributions (natural conditions)
    fn compute_bnd_residual(
        &self,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        f: &mut Vector,
    ) -> Result<()> {
        for region in self.weak_form.boundary_residual_regions() {
            let facets = self.boundary_facets_of(&region)?;
            for &facet in &facets {
                let cell = self.facet_cell(facet)?;
                if self.mesh.is_ghost_cell(cell) {
                    continue;
                }
                let (normal, _) = facet_normal_measure(&self.mesh, facet)?;
                for field in 0..self.fields.len() {
                    if self
                        .weak_form
                        .bnd_residual_blocks(&region, field)
                        .next()
                        .is_none()
                    {
                        continue;
                    }
                    let (pts, factor) = self.facet_rule(cell, facet, self.quad_order(field))?;
                    let mut geom = self.cell_geometry(cell, &pts)?;
                    for (w, p) in geom.jxw.iter_mut().zip(&pts) {
                        *w = factor * p.w;
                    }
                    let e = self.cell_residual(
                        cell,
                        &region,
                        field,
                        &pts,
                        &geom,
                        Some(normal),
                        time,
                        shift,
                        local_x,
                        local_x_t,
                        true,
                    )?;
                    self.scatter_residual(field, cell, &e, f)?;
                }
            }
        }
        Ok(())
    }

    /// Boundary Jacobian contributions
    fn compute_bnd_jacobian(
        &self,
        time: f64,
        shift: f64,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
        j: &mut Matrix,
    ) -> Result<()> {
        for region in self.weak_form.boundary_jacobian_regions() {
            let facets = self.boundary_facets_of(&region)?;
            for &facet in &facets {
                let cell = self.facet_cell(facet)?;
                if self.mesh.is_ghost_cell(cell) {
                    continue;
                }
                let (normal, _) = facet_normal_measure(&self.mesh, facet)?;
                for field_i in 0..self.fields.len() {
                    for field_j in 0..self.fields.len() {
                        if self
                            .weak_form
                            .bnd_jacobian_blocks(&region, field_i, field_j)
                            .next()
                            .is_none()
                        {
                            continue;
                        }
                        let qorder = self.quad_order(field_i).max(self.quad_order(field_j));
                        let (pts, factor) = self.facet_rule(cell, facet, qorder)?;
                        let mut geom = self.cell_geometry(cell, &pts)?;
                        for (w, p) in geom.jxw.iter_mut().zip(&pts) {
                            *w = factor * p.w;
                        }
                        let m = self.cell_jacobian(
                            cell,
                            &region,
                            field_i,
                            field_j,
                            &pts,
                            &geom,
                            Some(normal),
                            time,
                            shift,
                            local_x,
                            local_x_t,
                            false,
                            true,
                        )?;
                        self.scatter_jacobian(field_i, field_j, cell, &m, j)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn boundary_facets_of(&self, region: &Region) -> Result<Vec<PointId>> {
        let name = region.label.as_ref().ok_or_else(|| {
            Error::Config("boundary weak-form blocks require a face-set label".into())
        })?;
        let range = self.mesh.facet_range();
        Ok(self
            .mesh
            .label_stratum(name, region.value)?
            .iter()
            .copied()
            .filter(|p| range.contains(p))
            .collect())
    }

    fn facet_cell(&self, facet: PointId) -> Result<PointId> {
        self.mesh
            .facet_support_cells(facet)
            .first()
            .copied()
            .ok_or_else(|| Error::Topology(format!("facet {} has no supporting cell", facet)))
    }

    /// Quadrature rule of a boundary facet in the supporting cell's
    /// reference coordinates, plus the constant surface-measure factor
    fn facet_rule(
        &self,
        cell: PointId,
        facet: PointId,
        qorder: usize,
    ) -> Result<(Vec<QPoint>, f64)> {
        let quad = gauss(self.mesh.cell_type());
        match self.mesh.dim() {
            1 => {
                let pos = self
                    .mesh
                    .cell_vertices(cell)
                    .iter()
                    .position(|&v| v == facet)
                    .ok_or_else(|| {
                        Error::Topology(format!("facet {} is not on cell {}", facet, cell))
                    })?;
                let x = if pos == 0 { -1.0 } else { 1.0 };
                Ok((
                    vec![QPoint {
                        x: [x, 0.0, 0.0],
                        w: 1.0,
                    }],
                    1.0,
                ))
            }
            2 => {
                let le = self
                    .mesh
                    .cell_edges(cell)
                    .iter()
                    .position(|&(p, _)| p == facet)
                    .ok_or_else(|| {
                        Error::Topology(format!("facet {} is not on cell {}", facet, cell))
                    })?;
                let (_, len) = facet_normal_measure(&self.mesh, facet)?;
                Ok((quad.edge_points(le, qorder)?.to_vec(), len / 2.0))
            }
            _ => {
                let lf = self
                    .mesh
                    .cell_faces(cell)
                    .iter()
                    .position(|&(p, _)| p == facet)
                    .ok_or_else(|| {
                        Error::Topology(format!("facet {} is not on cell {}", facet, cell))
                    })?;
                let (_, area) = facet_normal_measure(&self.mesh, facet)?;
                let ref_measure = if self.mesh.facet_vertices(facet).len() == 3 {
                    2.0
                } else {
                    4.0
                };
                Ok((quad.face_points(lf, qorder)?.to_vec(), area / ref_measure))
            }
        }
    }

    /// Tabulate bases and interpolate all fields at the points of one cell
    fn interpolate(
        &self,
        cell: PointId,
        pts: &[QPoint],
        geom: &CellGeometry,
        local_x: &[f64],
        local_x_t: Option<&[f64]>,
    ) -> Result<CellInterp> {
        let dim = self.mesh.dim();
        let nq = pts.len();
        let nf = self.fields.len();
        let na = self.aux_fields.len();
        let mut tabs = Vec::with_capacity(nf);
        // point-major storage so the context can hand out per-point slices
        let mut values = vec![0.0; nq * nf];
        let mut gradients = vec![0.0; nq * nf * dim];
        let mut dots = local_x_t.map(|_| vec![0.0; nq * nf]);
        for (fid, sp) in self.spaces.iter().enumerate() {
            let layout = sp.get_element_layout(cell)?;
            let tab = tabulate(sp.shapeset(), &layout, pts, geom, dim)?;
            let off = self.field_local_offset[fid];
            for q in 0..nq {
                let mut v = 0.0;
                let mut g = [0.0; 3];
                let mut vt = 0.0;
                for k in 0..tab.n_basis {
                    let c = local_x[off + layout.local[k]];
                    v += c * tab.vals[k][q];
                    for (gd, &pd) in g.iter_mut().zip(&tab.phys_grads[k][q]).take(dim) {
                        *gd += c * pd;
                    }
                    if let Some(x_t) = local_x_t {
                        vt += x_t[off + layout.local[k]] * tab.vals[k][q];
                    }
                }
                values[q * nf + fid] = v;
                for d in 0..dim {
                    gradients[(q * nf + fid) * dim + d] = g[d];
                }
                if let Some(dots) = dots.as_mut() {
                    dots[q * nf + fid] = vt;
                }
            }
            tabs.push(tab);
        }
        let mut aux_values = vec![0.0; nq * na];
        let mut aux_gradients = vec![0.0; nq * na * dim];
        for (aid, sp) in self.aux_spaces.iter().enumerate() {
            let layout = sp.get_element_layout(cell)?;
            let tab = tabulate(sp.shapeset(), &layout, pts, geom, dim)?;
            let off = self.aux_local_offset[aid];
            for q in 0..nq {
                let mut v = 0.0;
                let mut g = [0.0; 3];
                for k in 0..tab.n_basis {
                    let c = self.local_a[off + layout.local[k]];
                    v += c * tab.vals[k][q];
                    for (gd, &pd) in g.iter_mut().zip(&tab.phys_grads[k][q]).take(dim) {
                        *gd += c * pd;
                    }
                }
                aux_values[q * na + aid] = v;
                for d in 0..dim {
                    aux_gradients[(q * na + aid) * dim + d] = g[d];
                }
            }
        }
        Ok(CellInterp {
            nf,
            na,
            dim,
            tabs,
            values,
            gradients,
            dots,
            aux_values,
            aux_gradients,
            xyz: geom.xyz.clone(),
        })
    }
}

/// Geometric data of one cell at a point set
struct CellGeometry {
    jxw: Vec<f64>,
    inv_jt: Vec<[[f64; 3]; 3]>,
    xyz: Vec<[f64; 3]>,
}

/// Tabulated basis of one field on one cell
struct FieldTab {
    n_basis: usize,
    /// vals[k][q]
    vals: Vec<Vec<f64>>,
    /// physical-space gradients, phys_grads[k][q][d]
    phys_grads: Vec<Vec<[f64; 3]>>,
}

fn tabulate(
    ss: &Shapeset,
    layout: &ElementLayout,
    pts: &[QPoint],
    geom: &CellGeometry,
    dim: usize,
) -> Result<FieldTab> {
    let kinds = [ValueKind::Dx, ValueKind::Dy, ValueKind::Dz];
    let n_basis = layout.len();
    let mut vals = vec![vec![0.0; pts.len()]; n_basis];
    let mut phys_grads = vec![vec![[0.0; 3]; pts.len()]; n_basis];
    for (k, &idx) in layout.shape_idx.iter().enumerate() {
        for (q, p) in pts.iter().enumerate() {
            vals[k][q] = ss.get_value(ValueKind::Value, idx, &p.x)?;
            let mut gref = [0.0; 3];
            for (d, kind) in kinds.iter().enumerate().take(dim) {
                gref[d] = ss.get_value(*kind, idx, &p.x)?;
            }
            let inv = &geom.inv_jt[q];
            for d in 0..dim {
                let mut s = 0.0;
                for (e, &ge) in gref.iter().enumerate().take(dim) {
                    s += inv[d][e] * ge;
                }
                phys_grads[k][q][d] = s;
            }
        }
    }
    Ok(FieldTab {
        n_basis,
        vals,
        phys_grads,
    })
}

/// Interpolated field data of one cell at a point set, point-major
struct CellInterp {
    nf: usize,
    na: usize,
    dim: usize,
    tabs: Vec<FieldTab>,
    values: Vec<f64>,
    gradients: Vec<f64>,
    dots: Option<Vec<f64>>,
    aux_values: Vec<f64>,
    aux_gradients: Vec<f64>,
    xyz: Vec<[f64; 3]>,
}

impl CellInterp {
    /// Evaluation context at quadrature point `q`
    fn context(
        &self,
        q: usize,
        time: f64,
        shift: f64,
        normal: Option<[f64; 3]>,
    ) -> FieldData<'_> {
        let (nf, na, dim) = (self.nf, self.na, self.dim);
        FieldData {
            dim,
            time,
            time_shift: shift,
            xyz: self.xyz[q],
            normal,
            values: &self.values[q * nf..(q + 1) * nf],
            gradients: &self.gradients[q * nf * dim..(q + 1) * nf * dim],
            dots: self
                .dots
                .as_ref()
                .map(|d| &d[q * nf..(q + 1) * nf]),
            aux_values: if na > 0 {
                Some(&self.aux_values[q * na..(q + 1) * na])
            } else {
                None
            },
            aux_gradients: if na > 0 {
                Some(&self.aux_gradients[q * na * dim..(q + 1) * na * dim])
            } else {
                None
            },
        }
    }
}
