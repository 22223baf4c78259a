//! Weak-form registry.
//!
//! Residual contributions come in two parts (F0 integrated against the test
//! function, F1 against its gradient) and Jacobian contributions in four
//! (G0..G3, the combinations of trial/test value and gradient). Blocks are
//! keyed by (region label, label value, field, part) for volume terms and
//! additionally by the trial field for Jacobian terms; a `None` label means
//! the whole domain and is always iterated before labeled regions.
//!
//! Contribution objects read a per-quadrature-point `FieldData` context:
//! field values, gradients and time derivatives, auxiliary field data,
//! physical coordinates, time, the time-integrator shift and, on boundary
//! facets, the outward normal.

pub type FieldId = usize;

/// A subdomain or boundary segment: `(label, value)`; `None` = all cells
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub label: Option<String>,
    pub value: i32,
}

impl Region {
    pub fn all() -> Self {
        Region {
            label: None,
            value: 0,
        }
    }

    pub fn on(label: &str, value: i32) -> Self {
        Region {
            label: Some(label.to_string()),
            value,
        }
    }
}

/// Per-quadrature-point evaluation context handed to contribution objects
pub struct FieldData<'a> {
    pub dim: usize,
    pub time: f64,
    pub(crate) time_shift: f64,
    pub(crate) xyz: [f64; 3],
    pub(crate) normal: Option<[f64; 3]>,
    pub(crate) values: &'a [f64],
    pub(crate) gradients: &'a [f64],
    pub(crate) dots: Option<&'a [f64]>,
    pub(crate) aux_values: Option<&'a [f64]>,
    pub(crate) aux_gradients: Option<&'a [f64]>,
}

impl<'a> FieldData<'a> {
    /// Value of a primary field at the point
    pub fn field_value(&self, field: FieldId) -> f64 {
        self.values[field]
    }

    /// Physical-space gradient of a primary field
    pub fn field_gradient(&self, field: FieldId) -> &[f64] {
        &self.gradients[field * self.dim..(field + 1) * self.dim]
    }

    /// Time derivative of a primary field; zero on steady evaluations
    pub fn field_dot(&self, field: FieldId) -> f64 {
        self.dots.map(|d| d[field]).unwrap_or(0.0)
    }

    /// Value of an auxiliary field, if an aux vector is attached
    pub fn aux_field_value(&self, field: FieldId) -> Option<f64> {
        self.aux_values.map(|a| a[field])
    }

    /// Gradient of an auxiliary field, if an aux vector is attached
    pub fn aux_field_gradient(&self, field: FieldId) -> Option<&[f64]> {
        self.aux_gradients
            .map(|a| &a[field * self.dim..(field + 1) * self.dim])
    }

    /// Shift factor of the implicit time integrator; zero on steady solves
    pub fn time_shift(&self) -> f64 {
        self.time_shift
    }

    /// Physical coordinates of the quadrature point
    pub fn xyz(&self) -> &[f64; 3] {
        &self.xyz
    }

    /// Outward unit normal; present only on boundary integrals
    pub fn normal(&self) -> Option<&[f64; 3]> {
        self.normal.as_ref()
    }
}

/// Residual contribution: writes F0 (scalar) or F1 (`dim` components)
pub trait ResidualFunc: Send + Sync {
    fn evaluate(&self, ctx: &FieldData, f: &mut [f64]);
}

/// Jacobian contribution: writes G0 (scalar), G1/G2 (`dim`) or G3 (`dim^2`)
pub trait JacobianFunc: Send + Sync {
    fn evaluate(&self, ctx: &FieldData, g: &mut [f64]);
}

impl<F> ResidualFunc for F
where
    F: Fn(&FieldData, &mut [f64]) + Send + Sync,
{
    fn evaluate(&self, ctx: &FieldData, f: &mut [f64]) {
        self(ctx, f)
    }
}

impl<F> JacobianFunc for F
where
    F: Fn(&FieldData, &mut [f64]) + Send + Sync,
{
    fn evaluate(&self, ctx: &FieldData, g: &mut [f64]) {
        self(ctx, g)
    }
}

pub(crate) struct ResidualBlock {
    pub region: Region,
    pub field: FieldId,
    pub f0: Option<Box<dyn ResidualFunc>>,
    pub f1: Option<Box<dyn ResidualFunc>>,
}

pub(crate) struct JacobianBlock {
    pub region: Region,
    pub field_i: FieldId,
    pub field_j: FieldId,
    pub g0: Option<Box<dyn JacobianFunc>>,
    pub g1: Option<Box<dyn JacobianFunc>>,
    pub g2: Option<Box<dyn JacobianFunc>>,
    pub g3: Option<Box<dyn JacobianFunc>>,
}

impl JacobianBlock {
    fn is_empty(&self) -> bool {
        self.g0.is_none() && self.g1.is_none() && self.g2.is_none() && self.g3.is_none()
    }
}

/// Registry of residual and Jacobian contribution objects
#[derive(Default)]
pub struct WeakForm {
    pub(crate) residual: Vec<ResidualBlock>,
    pub(crate) jacobian: Vec<JacobianBlock>,
    pub(crate) jacobian_pre: Vec<JacobianBlock>,
    pub(crate) bnd_residual: Vec<ResidualBlock>,
    pub(crate) bnd_jacobian: Vec<JacobianBlock>,
}

impl WeakForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_residual_block(
        &mut self,
        region: Region,
        field: FieldId,
        f0: Option<Box<dyn ResidualFunc>>,
        f1: Option<Box<dyn ResidualFunc>>,
    ) {
        self.residual.push(ResidualBlock {
            region,
            field,
            f0,
            f1,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_jacobian_block(
        &mut self,
        region: Region,
        field_i: FieldId,
        field_j: FieldId,
        g0: Option<Box<dyn JacobianFunc>>,
        g1: Option<Box<dyn JacobianFunc>>,
        g2: Option<Box<dyn JacobianFunc>>,
        g3: Option<Box<dyn JacobianFunc>>,
    ) {
        let block = JacobianBlock {
            region,
            field_i,
            field_j,
            g0,
            g1,
            g2,
            g3,
        };
        if !block.is_empty() {
            self.jacobian.push(block);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_jacobian_preconditioner_block(
        &mut self,
        region: Region,
        field_i: FieldId,
        field_j: FieldId,
        g0: Option<Box<dyn JacobianFunc>>,
        g1: Option<Box<dyn JacobianFunc>>,
        g2: Option<Box<dyn JacobianFunc>>,
        g3: Option<Box<dyn JacobianFunc>>,
    ) {
        let block = JacobianBlock {
            region,
            field_i,
            field_j,
            g0,
            g1,
            g2,
            g3,
        };
        if !block.is_empty() {
            self.jacobian_pre.push(block);
        }
    }

    pub fn add_boundary_residual_block(
        &mut self,
        region: Region,
        field: FieldId,
        f0: Option<Box<dyn ResidualFunc>>,
        f1: Option<Box<dyn ResidualFunc>>,
    ) {
        self.bnd_residual.push(ResidualBlock {
            region,
            field,
            f0,
            f1,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_boundary_jacobian_block(
        &mut self,
        region: Region,
        field_i: FieldId,
        field_j: FieldId,
        g0: Option<Box<dyn JacobianFunc>>,
        g1: Option<Box<dyn JacobianFunc>>,
        g2: Option<Box<dyn JacobianFunc>>,
        g3: Option<Box<dyn JacobianFunc>>,
    ) {
        let block = JacobianBlock {
            region,
            field_i,
            field_j,
            g0,
            g1,
            g2,
            g3,
        };
        if !block.is_empty() {
            self.bnd_jacobian.push(block);
        }
    }

    /// Whether any Jacobian contribution is registered
    pub fn has_jacobian(&self) -> bool {
        !self.jacobian.is_empty() || !self.bnd_jacobian.is_empty()
    }

    /// Whether a dedicated preconditioner contribution is registered
    pub fn has_jacobian_preconditioner(&self) -> bool {
        !self.jacobian_pre.is_empty()
    }

    /// Regions with residual contributions: the whole-domain region first,
    /// then labeled regions in registration order
    pub fn residual_regions(&self) -> Vec<Region> {
        ordered_regions(self.residual.iter().map(|b| &b.region))
    }

    /// Regions with Jacobian contributions, in the same order
    pub fn jacobian_regions(&self) -> Vec<Region> {
        ordered_regions(
            self.jacobian
                .iter()
                .map(|b| &b.region)
                .chain(self.jacobian_pre.iter().map(|b| &b.region)),
        )
    }

    /// Boundary regions carrying residual contributions, registration order
    pub fn boundary_residual_regions(&self) -> Vec<Region> {
        ordered_regions(self.bnd_residual.iter().map(|b| &b.region))
    }

    pub fn boundary_jacobian_regions(&self) -> Vec<Region> {
        ordered_regions(self.bnd_jacobian.iter().map(|b| &b.region))
    }

    pub(crate) fn residual_blocks(
        &self,
        region: &Region,
        field: FieldId,
    ) -> impl Iterator<Item = &ResidualBlock> {
        self.residual
            .iter()
            .filter(move |b| b.region == *region && b.field == field)
    }

    pub(crate) fn jacobian_blocks(
        &self,
        region: &Region,
        field_i: FieldId,
        field_j: FieldId,
    ) -> impl Iterator<Item = &JacobianBlock> {
        self.jacobian
            .iter()
            .filter(move |b| b.region == *region && b.field_i == field_i && b.field_j == field_j)
    }

    pub(crate) fn jacobian_pre_blocks(
        &self,
        region: &Region,
        field_i: FieldId,
        field_j: FieldId,
    ) -> impl Iterator<Item = &JacobianBlock> {
        self.jacobian_pre
            .iter()
            .filter(move |b| b.region == *region && b.field_i == field_i && b.field_j == field_j)
    }

    pub(crate) fn bnd_residual_blocks(
        &self,
        region: &Region,
        field: FieldId,
    ) -> impl Iterator<Item = &ResidualBlock> {
        self.bnd_residual
            .iter()
            .filter(move |b| b.region == *region && b.field == field)
    }

    pub(crate) fn bnd_jacobian_blocks(
        &self,
        region: &Region,
        field_i: FieldId,
        field_j: FieldId,
    ) -> impl Iterator<Item = &JacobianBlock> {
        self.bnd_jacobian
            .iter()
            .filter(move |b| b.region == *region && b.field_i == field_i && b.field_j == field_j)
    }
}

fn ordered_regions<'a>(blocks: impl Iterator<Item = &'a Region>) -> Vec<Region> {
    let mut out: Vec<Region> = Vec::new();
    for r in blocks {
        if !out.contains(r) {
            out.push(r.clone());
        }
    }
    out.sort_by_key(|r| r.label.is_some());
    out
}
