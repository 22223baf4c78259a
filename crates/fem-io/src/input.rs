//! YAML input files.
//!
//! A run is described by top-level `mesh`, `problem`, `executioner`, `ic`,
//! `bc` and `output` blocks. Each block carries a `type` tag naming the
//! registered class; the remaining keys are parameters of that class and
//! unknown keys are rejected during deserialization.

use crate::Result;
use fem_mesh::{ElementType, Mesh};
use fem_solver::{FeProblem, FieldData, TimeScheme, TransientConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Parsed input file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputFile {
    pub mesh: MeshBlock,
    pub problem: ProblemBlock,
    #[serde(default)]
    pub executioner: Option<ExecutionerBlock>,
    #[serde(default)]
    pub ic: Vec<IcBlock>,
    #[serde(default)]
    pub bc: Vec<BcBlock>,
    #[serde(default)]
    pub output: Vec<OutputBlock>,
}

/// Named facet set attached to a mesh block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SideSetSpec {
    pub id: i32,
    pub name: String,
    pub facets: Vec<usize>,
}

/// Uniform 1D mesh on [xmin, xmax] with end side sets "left"/"right"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineMeshBlock {
    pub xmin: f64,
    pub xmax: f64,
    pub nx: usize,
}

/// Uniform quadrilateral mesh on a rectangle, with side sets "left",
/// "right", "bottom" and "top"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxMesh2DBlock {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub nx: usize,
    pub ny: usize,
}

/// Explicit cell list with optional side sets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellListBlock {
    pub dim: usize,
    pub element: String,
    pub cells: Vec<usize>,
    pub coords: Vec<f64>,
    #[serde(default)]
    pub side_sets: Vec<SideSetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshBlock {
    LineMesh(LineMeshBlock),
    BoxMesh2D(BoxMesh2DBlock),
    CellList(CellListBlock),
}

impl MeshBlock {
    pub fn build(&self) -> Result<Mesh> {
        match self {
            MeshBlock::LineMesh(b) => {
                if b.nx == 0 {
                    return Err(fem_solver::Error::Config(
                        "the 'nx' parameter must be at least 1".into(),
                    )
                    .into());
                }
                let xs: Vec<f64> = (0..=b.nx)
                    .map(|i| b.xmin + (b.xmax - b.xmin) * i as f64 / b.nx as f64)
                    .collect();
                let mut mesh = Mesh::line_mesh(&xs)?;
                let left = mesh.vertex_range().start;
                let right = mesh.vertex_range().end - 1;
                mesh.create_side_set(1, &[left], "left");
                mesh.create_side_set(2, &[right], "right");
                Ok(mesh)
            }
            MeshBlock::BoxMesh2D(b) => {
                if b.nx == 0 || b.ny == 0 {
                    return Err(fem_solver::Error::Config(
                        "the 'nx' and 'ny' parameters must be at least 1".into(),
                    )
                    .into());
                }
                Ok(Mesh::box_mesh_2d(b.xmin, b.xmax, b.ymin, b.ymax, b.nx, b.ny)?)
            }
            MeshBlock::CellList(b) => {
                let etype = parse_element_type(&b.element)?;
                let mut mesh = Mesh::from_cell_list(b.dim, etype, &b.cells, &b.coords, true)?;
                for ss in &b.side_sets {
                    mesh.create_side_set(ss.id, &ss.facets, &ss.name);
                }
                Ok(mesh)
            }
        }
    }
}

fn parse_element_type(name: &str) -> Result<ElementType> {
    match name {
        "EDGE2" => Ok(ElementType::Edge2),
        "TRI3" => Ok(ElementType::Tri3),
        "QUAD4" => Ok(ElementType::Quad4),
        "TET4" => Ok(ElementType::Tet4),
        "HEX8" => Ok(ElementType::Hex8),
        "PRISM6" => Ok(ElementType::Prism6),
        _ => Err(fem_solver::Error::Topology(format!("unknown element type '{}'", name)).into()),
    }
}

/// -laplace(u) = f with a constant forcing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoissonBlock {
    #[serde(default = "default_order")]
    pub p_order: usize,
    pub forcing: f64,
}

/// u_t = laplace(u)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeatBlock {
    #[serde(default = "default_order")]
    pub p_order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProblemBlock {
    Poisson(PoissonBlock),
    Heat(HeatBlock),
}

impl ProblemBlock {
    pub fn p_order(&self) -> usize {
        match self {
            ProblemBlock::Poisson(b) => b.p_order,
            ProblemBlock::Heat(b) => b.p_order,
        }
    }
}

fn default_order() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SteadyBlock {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransientBlock {
    pub scheme: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub num_steps: Option<usize>,
    pub dt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionerBlock {
    Steady(SteadyBlock),
    Transient(TransientBlock),
}

impl ExecutionerBlock {
    /// Transient configuration, if this is a transient executioner
    pub fn transient_config(&self) -> Result<Option<TransientConfig>> {
        match self {
            ExecutionerBlock::Steady(_) => Ok(None),
            ExecutionerBlock::Transient(b) => {
                let config = TransientConfig {
                    scheme: TimeScheme::from_str(&b.scheme)?,
                    start_time: b.start_time,
                    end_time: b.end_time,
                    num_steps: b.num_steps,
                    dt: b.dt,
                };
                config.validate()?;
                Ok(Some(config))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantIcBlock {
    pub field: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IcBlock {
    ConstantIC(ConstantIcBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirichletBcBlock {
    pub field: String,
    pub boundary: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NeumannBcBlock {
    pub field: String,
    pub boundary: Vec<String>,
    pub flux: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BcBlock {
    DirichletBC(DirichletBcBlock),
    NeumannBC(NeumannBcBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VtkOutputBlock {
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputBlock {
    VTKOutput(VtkOutputBlock),
}

impl InputFile {
    pub fn parse_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    /// Build the mesh and a fully registered problem from the input blocks
    pub fn build_problem(&self) -> Result<(Arc<Mesh>, FeProblem)> {
        let mesh = Arc::new(self.mesh.build()?);
        let mut problem = FeProblem::new(mesh.clone());
        match &self.problem {
            ProblemBlock::Poisson(b) => {
                let iu = problem.add_fe("u", 1, b.p_order)?;
                let f = b.forcing;
                let affn =
                    problem.add_aux_fe("forcing_fn", 1, b.p_order, Box::new(move |_, _| f))?;
                problem.add_residual_block(
                    iu,
                    Some(Box::new(move |ctx: &FieldData, out: &mut [f64]| {
                        out[0] = -ctx.aux_field_value(affn).unwrap();
                    })),
                    Some(Box::new(move |ctx: &FieldData, out: &mut [f64]| {
                        let g = ctx.field_gradient(iu);
                        out[..ctx.dim].copy_from_slice(&g[..ctx.dim]);
                    })),
                );
                problem.add_jacobian_block(
                    iu,
                    iu,
                    None,
                    None,
                    None,
                    Some(Box::new(|ctx: &FieldData, g: &mut [f64]| {
                        for d in 0..ctx.dim {
                            g[d * ctx.dim + d] = 1.0;
                        }
                    })),
                );
            }
            ProblemBlock::Heat(b) => {
                let iu = problem.add_fe("u", 1, b.p_order)?;
                problem.add_residual_block(
                    iu,
                    Some(Box::new(move |ctx: &FieldData, out: &mut [f64]| {
                        out[0] = ctx.field_dot(iu);
                    })),
                    Some(Box::new(move |ctx: &FieldData, out: &mut [f64]| {
                        let g = ctx.field_gradient(iu);
                        out[..ctx.dim].copy_from_slice(&g[..ctx.dim]);
                    })),
                );
                problem.add_jacobian_block(
                    iu,
                    iu,
                    Some(Box::new(|ctx: &FieldData, g: &mut [f64]| {
                        g[0] = ctx.time_shift();
                    })),
                    None,
                    None,
                    Some(Box::new(|ctx: &FieldData, g: &mut [f64]| {
                        for d in 0..ctx.dim {
                            g[d * ctx.dim + d] = 1.0;
                        }
                    })),
                );
            }
        }
        for ic in &self.ic {
            let IcBlock::ConstantIC(b) = ic;
            let id = problem.field_id(&b.field).ok_or_else(|| {
                fem_solver::Error::Config(format!("unknown field '{}'", b.field))
            })?;
            let v = b.value;
            problem.set_initial_condition(id, Box::new(move |_, _| v));
        }
        for bc in &self.bc {
            match bc {
                BcBlock::DirichletBC(b) => {
                    let id = problem.field_id(&b.field).ok_or_else(|| {
                        fem_solver::Error::Config(format!("unknown field '{}'", b.field))
                    })?;
                    let names: Vec<&str> = b.boundary.iter().map(String::as_str).collect();
                    let v = b.value;
                    problem.add_dirichlet_bc(id, &names, Box::new(move |_, _| v));
                }
                BcBlock::NeumannBC(b) => {
                    let id = problem.field_id(&b.field).ok_or_else(|| {
                        fem_solver::Error::Config(format!("unknown field '{}'", b.field))
                    })?;
                    let g = b.flux;
                    for name in &b.boundary {
                        let value = mesh
                            .get_label(name)?
                            .values()
                            .first()
                            .copied()
                            .unwrap_or(0);
                        problem.add_boundary_residual_block(
                            id,
                            name,
                            value,
                            Some(Box::new(move |_: &FieldData, out: &mut [f64]| {
                                out[0] = -g;
                            })),
                            None,
                        );
                    }
                }
            }
        }
        Ok((mesh, problem))
    }
}
