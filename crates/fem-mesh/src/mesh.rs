//! Unstructured topological mesh.
//!
//! Points are integer ids stratified by depth: cells come first, then
//! vertices, then facets (edges in 2D, faces in 3D) and finally 3D edges.
//! Each point carries a cone (the points one stratum lower bounding it) and
//! a support (the points one stratum higher it bounds). Named labels map
//! point subsets to integer marker values; a `(label, value)` pair is how
//! the discretization layer addresses subdomains and boundary segments.
//!
//! The mesh is immutable after construction apart from label creation.

use crate::ref_domain::{ElementType, FaceMode};
use std::collections::BTreeMap;
use thiserror::Error;

/// Mesh point identifier
pub type PointId = usize;

/// Errors raised during mesh construction and label queries
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh has no label named '{0}'")]
    UnknownLabel(String),
    #[error("cell list length {len} is not a multiple of {corners} corners")]
    RaggedCellList { len: usize, corners: usize },
    #[error("coordinate list length {len} is not a multiple of dimension {dim}")]
    RaggedCoordinates { len: usize, dim: usize },
    #[error("cell {cell} references vertex {vertex}, but only {n_vertices} vertices exist")]
    InvalidVertex {
        cell: usize,
        vertex: usize,
        n_vertices: usize,
    },
    #[error("element type {etype:?} does not match mesh dimension {dim}")]
    DimensionMismatch { etype: ElementType, dim: usize },
    #[error("label '{label}' has no stratum with value {value}")]
    EmptyStratum { label: String, value: i32 },
}

/// A named region: maps a subset of mesh points to integer marker values
#[derive(Debug, Clone, Default)]
pub struct Label {
    values: BTreeMap<PointId, i32>,
    strata: BTreeMap<i32, Vec<PointId>>,
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to `point`
    pub fn set_value(&mut self, point: PointId, value: i32) {
        if let Some(old) = self.values.insert(point, value) {
            if let Some(s) = self.strata.get_mut(&old) {
                s.retain(|&p| p != point);
            }
        }
        let stratum = self.strata.entry(value).or_default();
        match stratum.binary_search(&point) {
            Ok(_) => {}
            Err(pos) => stratum.insert(pos, point),
        }
    }

    /// Marker value of `point`, if labeled
    pub fn value(&self, point: PointId) -> Option<i32> {
        self.values.get(&point).copied()
    }

    /// Sorted points carrying `value`
    pub fn stratum(&self, value: i32) -> &[PointId] {
        self.strata.get(&value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct marker values, ascending
    pub fn values(&self) -> Vec<i32> {
        self.strata.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Unstructured mesh with stratified points and labeled regions
#[derive(Debug, Clone)]
pub struct Mesh {
    dim: usize,
    cell_type: ElementType,
    n_cells: usize,
    n_vertices: usize,
    /// Codim-1 entities created by interpolation (2D edges, 3D faces)
    n_facets: usize,
    /// 3D edges (depth-1 entities); zero below 3D
    n_edges: usize,
    cones: Vec<Vec<PointId>>,
    supports: Vec<Vec<PointId>>,
    /// Corner vertex points per cell, in input order
    cell_vertices: Vec<Vec<PointId>>,
    /// Edge point + orientation per (cell, local edge); empty in 1D
    cell_edges: Vec<Vec<(PointId, u8)>>,
    /// Face point + orientation per (cell, local face); empty below 3D
    cell_faces: Vec<Vec<(PointId, u8)>>,
    /// Vertex points per facet, in canonical (first-encounter) order
    facet_vertices: Vec<Vec<PointId>>,
    coords: Vec<f64>,
    labels: BTreeMap<String, Label>,
}

impl Mesh {
    /// Build a mesh from a flat cell-corner list and vertex coordinates.
    ///
    /// `cells` holds `n_cells * cell_type.num_vertices()` zero-based vertex
    /// indices; `coords` holds `n_vertices * dim` reals. When `interpolate`
    /// is set, codim-1 facets (and 3D edges) are created with deterministic
    /// ids: per cell in order, per local edge/face in reference order.
    pub fn from_cell_list(
        dim: usize,
        cell_type: ElementType,
        cells: &[usize],
        coords: &[f64],
        interpolate: bool,
    ) -> Result<Self, MeshError> {
        if cell_type.dim() != dim {
            return Err(MeshError::DimensionMismatch {
                etype: cell_type,
                dim,
            });
        }
        let corners = cell_type.num_vertices();
        if !cells.len().is_multiple_of(corners) {
            return Err(MeshError::RaggedCellList {
                len: cells.len(),
                corners,
            });
        }
        if !coords.len().is_multiple_of(dim) {
            return Err(MeshError::RaggedCoordinates {
                len: coords.len(),
                dim,
            });
        }
        let n_cells = cells.len() / corners;
        let n_vertices = coords.len() / dim;
        for (c, chunk) in cells.chunks(corners).enumerate() {
            for &v in chunk {
                if v >= n_vertices {
                    return Err(MeshError::InvalidVertex {
                        cell: c,
                        vertex: v,
                        n_vertices,
                    });
                }
            }
        }

        let vertex_offset = n_cells;
        let cell_vertices: Vec<Vec<PointId>> = cells
            .chunks(corners)
            .map(|chunk| chunk.iter().map(|&v| v + vertex_offset).collect())
            .collect();

        let mut mesh = Mesh {
            dim,
            cell_type,
            n_cells,
            n_vertices,
            n_facets: 0,
            n_edges: 0,
            cones: vec![Vec::new(); n_cells + n_vertices],
            supports: vec![Vec::new(); n_cells + n_vertices],
            cell_vertices,
            cell_edges: vec![Vec::new(); n_cells],
            cell_faces: vec![Vec::new(); n_cells],
            facet_vertices: Vec::new(),
            coords: coords.to_vec(),
            labels: BTreeMap::new(),
        };

        match dim {
            1 => mesh.connect_1d(),
            2 => {
                if interpolate {
                    mesh.interpolate_2d();
                }
            }
            3 => {
                if interpolate {
                    mesh.interpolate_3d();
                }
            }
            _ => {
                return Err(MeshError::DimensionMismatch {
                    etype: cell_type,
                    dim,
                });
            }
        }
        log::debug!(
            "built mesh: dim={} cells={} vertices={} facets={}",
            dim,
            mesh.n_cells,
            mesh.n_vertices,
            mesh.num_facets()
        );
        Ok(mesh)
    }

    /// Uniform factory for a 1D mesh with the given vertex positions
    pub fn line_mesh(xs: &[f64]) -> Result<Self, MeshError> {
        let n = xs.len();
        let mut cells = Vec::with_capacity(2 * (n.saturating_sub(1)));
        for i in 0..n.saturating_sub(1) {
            cells.push(i);
            cells.push(i + 1);
        }
        Self::from_cell_list(1, ElementType::Edge2, &cells, xs, true)
    }

    /// Uniform quadrilateral factory on a rectangle, with side sets named
    /// "left", "right", "bottom" and "top"
    #[allow(clippy::too_many_arguments)]
    pub fn box_mesh_2d(
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        nx: usize,
        ny: usize,
    ) -> Result<Self, MeshError> {
        let mut coords = Vec::with_capacity((nx + 1) * (ny + 1) * 2);
        for j in 0..=ny {
            for i in 0..=nx {
                coords.push(xmin + (xmax - xmin) * i as f64 / nx as f64);
                coords.push(ymin + (ymax - ymin) * j as f64 / ny as f64);
            }
        }
        let vid = |i: usize, j: usize| j * (nx + 1) + i;
        let mut cells = Vec::with_capacity(nx * ny * 4);
        for j in 0..ny {
            for i in 0..nx {
                cells.extend_from_slice(&[
                    vid(i, j),
                    vid(i + 1, j),
                    vid(i + 1, j + 1),
                    vid(i, j + 1),
                ]);
            }
        }
        let mut mesh = Self::from_cell_list(2, ElementType::Quad4, &cells, &coords, true)?;
        let on = |mesh: &Mesh, pred: &dyn Fn(&[f64], &[f64]) -> bool| -> Vec<PointId> {
            mesh.boundary_facets()
                .into_iter()
                .filter(|&f| {
                    let verts = mesh.facet_vertices(f);
                    let a = mesh.vertex_coords(verts[0]).to_vec();
                    let b = mesh.vertex_coords(verts[1]).to_vec();
                    pred(&a, &b)
                })
                .collect()
        };
        let eps = 1e-12 * (1.0 + (xmax - xmin).abs() + (ymax - ymin).abs());
        let left = on(&mesh, &|a, b| {
            (a[0] - xmin).abs() < eps && (b[0] - xmin).abs() < eps
        });
        let right = on(&mesh, &|a, b| {
            (a[0] - xmax).abs() < eps && (b[0] - xmax).abs() < eps
        });
        let bottom = on(&mesh, &|a, b| {
            (a[1] - ymin).abs() < eps && (b[1] - ymin).abs() < eps
        });
        let top = on(&mesh, &|a, b| {
            (a[1] - ymax).abs() < eps && (b[1] - ymax).abs() < eps
        });
        mesh.create_side_set(1, &left, "left");
        mesh.create_side_set(2, &right, "right");
        mesh.create_side_set(3, &bottom, "bottom");
        mesh.create_side_set(4, &top, "top");
        Ok(mesh)
    }

    fn connect_1d(&mut self) {
        // 1D facets are the vertices themselves; cone(cell) = its vertices
        for c in 0..self.n_cells {
            let verts = self.cell_vertices[c].clone();
            for &v in &verts {
                self.supports[v].push(c);
            }
            self.cones[c] = verts;
        }
    }

    fn interpolate_2d(&mut self) {
        let facet_offset = self.n_cells + self.n_vertices;
        let mut edge_ids: BTreeMap<(PointId, PointId), PointId> = BTreeMap::new();
        for c in 0..self.n_cells {
            let verts = self.cell_vertices[c].clone();
            for e in 0..self.cell_type.num_edges() {
                let [a, b] = self.cell_type.edge_vertices(e);
                let (va, vb) = (verts[a], verts[b]);
                let key = (va.min(vb), va.max(vb));
                let (point, ori) = match edge_ids.get(&key) {
                    Some(&p) => {
                        let canon = &self.facet_vertices[p - facet_offset];
                        (p, if canon[0] == va { 0 } else { 1 })
                    }
                    None => {
                        let p = facet_offset + self.n_facets;
                        self.n_facets += 1;
                        edge_ids.insert(key, p);
                        self.facet_vertices.push(vec![va, vb]);
                        self.cones.push(vec![va, vb]);
                        self.supports.push(Vec::new());
                        (p, 0)
                    }
                };
                self.cell_edges[c].push((point, ori));
                self.cones[c].push(point);
                self.supports[point].push(c);
            }
        }
        // vertex supports point at the incident edges
        for f in 0..self.n_facets {
            let p = facet_offset + f;
            for &v in &self.facet_vertices[f] {
                self.supports[v].push(p);
            }
        }
    }

    fn interpolate_3d(&mut self) {
        let face_offset = self.n_cells + self.n_vertices;
        let mut face_ids: BTreeMap<Vec<PointId>, PointId> = BTreeMap::new();
        for c in 0..self.n_cells {
            let verts = self.cell_vertices[c].clone();
            for f in 0..self.cell_type.num_faces() {
                let local: Vec<PointId> = self
                    .cell_type
                    .face_vertices(f)
                    .iter()
                    .map(|&i| verts[i])
                    .collect();
                let mut key = local.clone();
                key.sort_unstable();
                let (point, ori) = match face_ids.get(&key) {
                    Some(&p) => {
                        let canon = self.facet_vertices[p - face_offset].clone();
                        (p, face_orientation(&canon, &local, self.cell_type.face_mode(f)))
                    }
                    None => {
                        let p = face_offset + self.n_facets;
                        self.n_facets += 1;
                        face_ids.insert(key, p);
                        self.facet_vertices.push(local.clone());
                        self.cones.push(local.clone());
                        self.supports.push(Vec::new());
                        (p, 0)
                    }
                };
                self.cell_faces[c].push((point, ori));
                self.cones[c].push(point);
                self.supports[point].push(c);
            }
        }
        // 3D edges come after the faces
        let edge_offset = face_offset + self.n_facets;
        let mut edge_ids: BTreeMap<(PointId, PointId), PointId> = BTreeMap::new();
        for c in 0..self.n_cells {
            let verts = self.cell_vertices[c].clone();
            for e in 0..self.cell_type.num_edges() {
                let [a, b] = self.cell_type.edge_vertices(e);
                let (va, vb) = (verts[a], verts[b]);
                let key = (va.min(vb), va.max(vb));
                let (point, ori) = match edge_ids.get(&key) {
                    Some(&p) => {
                        let canon = &self.cones[p];
                        (p, if canon[0] == va { 0 } else { 1 })
                    }
                    None => {
                        let p = edge_offset + self.n_edges;
                        self.n_edges += 1;
                        edge_ids.insert(key, p);
                        self.cones.push(vec![va, vb]);
                        self.supports.push(Vec::new());
                        self.supports[va].push(p);
                        self.supports[vb].push(p);
                        (p, 0)
                    }
                };
                self.cell_edges[c].push((point, ori));
            }
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn cell_type(&self) -> ElementType {
        self.cell_type
    }

    pub fn num_cells(&self) -> usize {
        self.n_cells
    }

    pub fn num_vertices(&self) -> usize {
        self.n_vertices
    }

    pub fn num_points(&self) -> usize {
        self.cones.len()
    }

    /// Number of codim-1 facets (vertices in 1D)
    pub fn num_facets(&self) -> usize {
        if self.dim == 1 {
            self.n_vertices
        } else {
            self.n_facets
        }
    }

    /// Number of 3D edges created by interpolation
    pub fn num_edges(&self) -> usize {
        if self.dim == 2 { self.n_facets } else { self.n_edges }
    }

    pub fn all_cells(&self) -> std::ops::Range<PointId> {
        0..self.n_cells
    }

    pub fn vertex_range(&self) -> std::ops::Range<PointId> {
        self.n_cells..self.n_cells + self.n_vertices
    }

    /// Codim-1 facet point range (the vertex range in 1D)
    pub fn facet_range(&self) -> std::ops::Range<PointId> {
        if self.dim == 1 {
            self.vertex_range()
        } else {
            let start = self.n_cells + self.n_vertices;
            start..start + self.n_facets
        }
    }

    /// Point range of depth-1 edges (equals the facet range in 2D)
    pub fn edge_range(&self) -> std::ops::Range<PointId> {
        match self.dim {
            2 => self.facet_range(),
            3 => {
                let start = self.n_cells + self.n_vertices + self.n_facets;
                start..start + self.n_edges
            }
            _ => 0..0,
        }
    }

    pub fn is_cell(&self, p: PointId) -> bool {
        p < self.n_cells
    }

    pub fn is_vertex(&self, p: PointId) -> bool {
        self.vertex_range().contains(&p)
    }

    pub fn is_facet(&self, p: PointId) -> bool {
        self.facet_range().contains(&p)
    }

    /// Points one stratum lower bounding `p`
    pub fn cone(&self, p: PointId) -> &[PointId] {
        &self.cones[p]
    }

    /// Points one stratum higher bounded by `p`
    pub fn support(&self, p: PointId) -> &[PointId] {
        &self.supports[p]
    }

    /// Corner vertex points of a cell, in input order
    pub fn cell_vertices(&self, cell: PointId) -> &[PointId] {
        &self.cell_vertices[cell]
    }

    /// (edge point, orientation) per local edge of a cell
    pub fn cell_edges(&self, cell: PointId) -> &[(PointId, u8)] {
        &self.cell_edges[cell]
    }

    /// (face point, orientation) per local face of a 3D cell
    pub fn cell_faces(&self, cell: PointId) -> &[(PointId, u8)] {
        &self.cell_faces[cell]
    }

    /// Vertex points of a facet in canonical order (the facet itself in 1D)
    pub fn facet_vertices(&self, facet: PointId) -> Vec<PointId> {
        if self.dim == 1 {
            vec![facet]
        } else {
            let start = self.n_cells + self.n_vertices;
            self.facet_vertices[facet - start].clone()
        }
    }

    /// Zero-based index of a vertex point into the coordinate table
    pub fn vertex_index(&self, vertex: PointId) -> usize {
        debug_assert!(self.is_vertex(vertex));
        vertex - self.n_cells
    }

    /// Coordinates of a vertex point
    pub fn vertex_coords(&self, vertex: PointId) -> &[f64] {
        let i = self.vertex_index(vertex);
        &self.coords[i * self.dim..(i + 1) * self.dim]
    }

    /// Recursive cone of `p` restricted to vertices, sorted ascending
    pub fn closure_vertices(&self, p: PointId) -> Vec<PointId> {
        let mut verts = if self.is_vertex(p) {
            vec![p]
        } else if self.is_cell(p) {
            self.cell_vertices[p].clone()
        } else {
            self.facet_vertices(p)
        };
        verts.sort_unstable();
        verts.dedup();
        verts
    }

    /// Facets whose support is a single cell
    pub fn boundary_facets(&self) -> Vec<PointId> {
        self.facet_range()
            .filter(|&f| self.facet_support_cells(f).len() == 1)
            .collect()
    }

    /// Cells supported by a facet (resolves 1D vertex-facets to cells)
    pub fn facet_support_cells(&self, facet: PointId) -> Vec<PointId> {
        self.supports[facet]
            .iter()
            .copied()
            .filter(|&p| self.is_cell(p))
            .collect()
    }

    /// Create an empty label; a no-op if it already exists
    pub fn create_label(&mut self, name: &str) -> &mut Label {
        self.labels.entry(name.to_string()).or_default()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn get_label(&self, name: &str) -> Result<&Label, MeshError> {
        self.labels
            .get(name)
            .ok_or_else(|| MeshError::UnknownLabel(name.to_string()))
    }

    /// Sorted points of `(label, value)`; errors if the label is missing
    pub fn label_stratum(&self, name: &str, value: i32) -> Result<&[PointId], MeshError> {
        Ok(self.get_label(name)?.stratum(value))
    }

    /// Points of a label under its lowest marker value.
    ///
    /// Face-set labels created by `create_side_set` carry one value; this is
    /// the lookup the boundary layer uses.
    pub fn points_from_label(&self, name: &str) -> Result<&[PointId], MeshError> {
        let label = self.get_label(name)?;
        let value = *label
            .strata
            .keys()
            .next()
            .ok_or_else(|| MeshError::EmptyStratum {
                label: name.to_string(),
                value: 0,
            })?;
        Ok(label.stratum(value))
    }

    /// Register facet points both under the shared "Face Sets" label (with
    /// marker `id`) and under a label named after the set.
    pub fn create_side_set(&mut self, id: i32, facets: &[PointId], name: &str) {
        {
            let fs = self.create_label("Face Sets");
            for &f in facets {
                fs.set_value(f, id);
            }
        }
        let named = self.create_label(name);
        for &f in facets {
            named.set_value(f, id);
        }
    }

    /// Cells marked ghost (value > 0 under the "ghost" label)
    pub fn is_ghost_cell(&self, cell: PointId) -> bool {
        match self.labels.get("ghost") {
            Some(label) => label.value(cell).is_some_and(|v| v > 0),
            None => false,
        }
    }
}

/// Orientation index of a face whose canonical vertex cycle is `canon` as
/// seen from a cell listing it as `local`.
///
/// Rotations occupy `0..n`, reflected cycles `n..2n`.
fn face_orientation(canon: &[PointId], local: &[PointId], mode: FaceMode) -> u8 {
    let n = match mode {
        FaceMode::Triangle => 3,
        FaceMode::Quad => 4,
    };
    let start = canon
        .iter()
        .position(|&v| v == local[0])
        .expect("face vertex sets must match");
    let forward = canon[(start + 1) % n] == local[1];
    if forward {
        start as u8
    } else {
        (n + start) as u8
    }
}
