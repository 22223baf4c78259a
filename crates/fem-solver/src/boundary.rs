//! Boundary information.
//!
//! Two flavors, both built from a facet index set on the mesh:
//! `EssentialBoundaryInfo` owns the ordered boundary-vertex list (with the
//! projected Dirichlet values), `NaturalBoundaryInfo` owns per-facet outward
//! unit normals and facet measures plus the averaged nodal-normal field on
//! the boundary vertices, which is what boundary gradients need where facets
//! meet at corners.

use crate::error::{Error, Result};
use fem_mesh::{Mesh, PointId};

fn centroid(mesh: &Mesh, cell: PointId) -> [f64; 3] {
    let verts = mesh.cell_vertices(cell);
    let mut c = [0.0; 3];
    for &v in verts {
        let x = mesh.vertex_coords(v);
        for (cd, &xd) in c.iter_mut().zip(x) {
            *cd += xd;
        }
    }
    for cd in &mut c {
        *cd /= verts.len() as f64;
    }
    c
}

fn facet_midpoint(mesh: &Mesh, facet: PointId) -> [f64; 3] {
    let verts = mesh.facet_vertices(facet);
    let mut c = [0.0; 3];
    for &v in &verts {
        let x = mesh.vertex_coords(v);
        for (cd, &xd) in c.iter_mut().zip(x) {
            *cd += xd;
        }
    }
    for cd in &mut c {
        *cd /= verts.len() as f64;
    }
    c
}

/// Outward unit normal and measure (length/area) of a boundary facet.
///
/// The normal points away from the facet's single supporting cell; in 1D
/// the facet is a vertex and the measure is 1.
pub fn facet_normal_measure(mesh: &Mesh, facet: PointId) -> Result<([f64; 3], f64)> {
    let support = mesh.facet_support_cells(facet);
    let cell = *support.first().ok_or_else(|| {
        Error::Topology(format!("facet {} has no supporting cell", facet))
    })?;
    let cc = centroid(mesh, cell);
    match mesh.dim() {
        1 => {
            let x = mesh.vertex_coords(facet)[0];
            let n = if x > cc[0] { 1.0 } else { -1.0 };
            Ok(([n, 0.0, 0.0], 1.0))
        }
        2 => {
            let verts = mesh.facet_vertices(facet);
            let a = mesh.vertex_coords(verts[0]);
            let b = mesh.vertex_coords(verts[1]);
            let t = [b[0] - a[0], b[1] - a[1]];
            let len = (t[0] * t[0] + t[1] * t[1]).sqrt();
            if len == 0.0 {
                return Err(Error::Numerical(format!("zero-length facet {}", facet)));
            }
            let mut n = [t[1] / len, -t[0] / len, 0.0];
            let mid = facet_midpoint(mesh, facet);
            let dot = (mid[0] - cc[0]) * n[0] + (mid[1] - cc[1]) * n[1];
            if dot < 0.0 {
                n[0] = -n[0];
                n[1] = -n[1];
            }
            Ok((n, len))
        }
        _ => {
            let verts = mesh.facet_vertices(facet);
            let a3 = {
                let x = mesh.vertex_coords(verts[0]);
                [x[0], x[1], x[2]]
            };
            let mut normal = [0.0; 3];
            let mut area = 0.0;
            // fan triangulation; planar facets assumed
            for k in 1..verts.len() - 1 {
                let b = mesh.vertex_coords(verts[k]);
                let c = mesh.vertex_coords(verts[k + 1]);
                let u = [b[0] - a3[0], b[1] - a3[1], b[2] - a3[2]];
                let v = [c[0] - a3[0], c[1] - a3[1], c[2] - a3[2]];
                let cr = [
                    u[1] * v[2] - u[2] * v[1],
                    u[2] * v[0] - u[0] * v[2],
                    u[0] * v[1] - u[1] * v[0],
                ];
                let tri_area =
                    0.5 * (cr[0] * cr[0] + cr[1] * cr[1] + cr[2] * cr[2]).sqrt();
                area += tri_area;
                for (nd, &cd) in normal.iter_mut().zip(&cr) {
                    *nd += 0.5 * cd;
                }
            }
            let nlen =
                (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
            if nlen == 0.0 {
                return Err(Error::Numerical(format!("zero-area facet {}", facet)));
            }
            let mut n = [normal[0] / nlen, normal[1] / nlen, normal[2] / nlen];
            let mid = facet_midpoint(mesh, facet);
            let dot = (mid[0] - cc[0]) * n[0] + (mid[1] - cc[1]) * n[1] + (mid[2] - cc[2]) * n[2];
            if dot < 0.0 {
                for nd in &mut n {
                    *nd = -*nd;
                }
            }
            Ok((n, area))
        }
    }
}

/// Boundary info for natural (Neumann/Robin) conditions: facet normals,
/// facet measures and nodal normals
pub struct NaturalBoundaryInfo {
    facets: Vec<PointId>,
    normals: Vec<[f64; 3]>,
    measures: Vec<f64>,
    vertices: Vec<PointId>,
    nodal_normals: Vec<[f64; 3]>,
}

impl NaturalBoundaryInfo {
    pub fn new(mesh: &Mesh, facets: &[PointId]) -> Result<Self> {
        let mut normals = Vec::with_capacity(facets.len());
        let mut measures = Vec::with_capacity(facets.len());
        for &f in facets {
            let (n, m) = facet_normal_measure(mesh, f)?;
            normals.push(n);
            measures.push(m);
        }
        // ordered vertex set from the facet closures
        let mut vertices: Vec<PointId> = facets
            .iter()
            .flat_map(|&f| mesh.closure_vertices(f))
            .collect();
        vertices.sort_unstable();
        vertices.dedup();
        // averaged outward direction at each boundary vertex
        let mut nodal_normals = vec![[0.0; 3]; vertices.len()];
        for (fi, &f) in facets.iter().enumerate() {
            for v in mesh.closure_vertices(f) {
                let vi = vertices.binary_search(&v).expect("vertex from closure");
                for (nd, &fd) in nodal_normals[vi].iter_mut().zip(&normals[fi]) {
                    *nd += fd;
                }
            }
        }
        for n in &mut nodal_normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if len > 0.0 {
                for nd in n.iter_mut() {
                    *nd /= len;
                }
            }
        }
        Ok(NaturalBoundaryInfo {
            facets: facets.to_vec(),
            normals,
            measures,
            vertices,
            nodal_normals,
        })
    }

    pub fn num_facets(&self) -> usize {
        self.facets.len()
    }

    pub fn facet(&self, i: usize) -> PointId {
        self.facets[i]
    }

    /// Outward unit normal of the i-th facet
    pub fn normal(&self, i: usize) -> &[f64; 3] {
        &self.normals[i]
    }

    /// Facet measure: length in 2D, area in 3D, 1 in 1D
    pub fn measure(&self, i: usize) -> f64 {
        self.measures[i]
    }

    /// Alias for 1D/2D call sites
    pub fn length(&self, i: usize) -> f64 {
        self.measures[i]
    }

    pub fn area(&self, i: usize) -> f64 {
        self.measures[i]
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, i: usize) -> PointId {
        self.vertices[i]
    }

    /// Averaged outward direction at the i-th boundary vertex
    pub fn nodal_normal(&self, i: usize) -> &[f64; 3] {
        &self.nodal_normals[i]
    }
}

/// Boundary info for essential (Dirichlet) conditions: the ordered vertex
/// set of the boundary and the projected values
pub struct EssentialBoundaryInfo {
    vertices: Vec<PointId>,
    values: Vec<f64>,
}

impl EssentialBoundaryInfo {
    pub fn new(mesh: &Mesh, facets: &[PointId]) -> Self {
        let mut vertices: Vec<PointId> = facets
            .iter()
            .flat_map(|&f| mesh.closure_vertices(f))
            .collect();
        vertices.sort_unstable();
        vertices.dedup();
        let values = vec![0.0; vertices.len()];
        EssentialBoundaryInfo { vertices, values }
    }

    /// Project a Dirichlet function onto the boundary vertices
    pub fn project(&mut self, mesh: &Mesh, f: &dyn Fn(&[f64], f64) -> f64, time: f64) {
        for (i, &v) in self.vertices.iter().enumerate() {
            self.values[i] = f(mesh.vertex_coords(v), time);
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, i: usize) -> PointId {
        self.vertices[i]
    }

    pub fn vertices(&self) -> &[PointId] {
        &self.vertices
    }

    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fem_mesh::{ElementType, Mesh};

    fn mesh_1d() -> Mesh {
        let mut m = Mesh::line_mesh(&[0.0, 0.4, 1.0]).unwrap();
        m.create_side_set(1, &[2], "left");
        m.create_side_set(2, &[4], "right");
        m
    }

    fn mesh_2d() -> Mesh {
        let cells = [0, 1, 2, 1, 3, 2];
        let coords = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut m = Mesh::from_cell_list(2, ElementType::Tri3, &cells, &coords, true).unwrap();
        m.create_side_set(1, &[8], "left");
        m.create_side_set(2, &[6], "bottom");
        m.create_side_set(3, &[9, 10], "top_right");
        m
    }

    fn mesh_3d() -> Mesh {
        let cells = [0, 1, 2, 3];
        let coords = [
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let mut m = Mesh::from_cell_list(3, ElementType::Tet4, &cells, &coords, true).unwrap();
        // the slanted face is the one not touching the origin vertex (point 1)
        let slanted = m
            .boundary_facets()
            .into_iter()
            .find(|&f| !m.facet_vertices(f).contains(&1))
            .unwrap();
        m.create_side_set(1, &[slanted], "slanted");
        m
    }

    #[test]
    fn nodal_normals_1d() {
        let m = mesh_1d();
        let left = NaturalBoundaryInfo::new(&m, m.points_from_label("left").unwrap()).unwrap();
        assert_eq!(left.normal(0)[0], -1.0);
        assert_eq!(left.nodal_normal(0)[0], -1.0);
        assert_eq!(left.length(0), 1.0);

        let right = NaturalBoundaryInfo::new(&m, m.points_from_label("right").unwrap()).unwrap();
        assert_eq!(right.normal(0)[0], 1.0);
        assert_eq!(right.nodal_normal(0)[0], 1.0);
        assert_eq!(right.length(0), 1.0);
    }

    #[test]
    fn nodal_normals_2d() {
        let m = mesh_2d();
        let left = NaturalBoundaryInfo::new(&m, m.points_from_label("left").unwrap()).unwrap();
        assert!((left.normal(0)[0] + 1.0).abs() < 1e-14);
        assert!(left.normal(0)[1].abs() < 1e-14);
        assert!((left.length(0) - 1.0).abs() < 1e-14);
        for i in 0..left.num_vertices() {
            assert!((left.nodal_normal(i)[0] + 1.0).abs() < 1e-14);
            assert!(left.nodal_normal(i)[1].abs() < 1e-14);
        }

        let bottom = NaturalBoundaryInfo::new(&m, m.points_from_label("bottom").unwrap()).unwrap();
        assert!(bottom.normal(0)[0].abs() < 1e-14);
        assert!((bottom.normal(0)[1] + 1.0).abs() < 1e-14);
        assert!((bottom.length(0) - 1.0).abs() < 1e-14);
    }

    #[test]
    fn corner_nodal_normal_averages() {
        let m = mesh_2d();
        let tr = NaturalBoundaryInfo::new(&m, m.points_from_label("top_right").unwrap()).unwrap();
        // the (1,1) corner vertex (point 5) sees both the right and top facet
        let vi = (0..tr.num_vertices()).find(|&i| tr.vertex(i) == 5).unwrap();
        let n = tr.nodal_normal(vi);
        let s = 1.0 / 2.0f64.sqrt();
        assert!((n[0] - s).abs() < 1e-14);
        assert!((n[1] - s).abs() < 1e-14);
    }

    #[test]
    fn slanted_tet_face_normal_and_area() {
        let m = mesh_3d();
        let bnd = NaturalBoundaryInfo::new(&m, m.points_from_label("slanted").unwrap()).unwrap();
        let s = 1.0 / 3.0f64.sqrt();
        let n = bnd.normal(0);
        assert!((n[0] - s).abs() < 1e-14);
        assert!((n[1] - s).abs() < 1e-14);
        assert!((n[2] - s).abs() < 1e-14);
        assert!((bnd.area(0) - 3.0f64.sqrt() / 2.0).abs() < 1e-14);
    }

    #[test]
    fn essential_vertex_sets() {
        let m = mesh_1d();
        let left = EssentialBoundaryInfo::new(&m, m.points_from_label("left").unwrap());
        assert_eq!(left.num_vertices(), 1);
        assert_eq!(left.vertex(0), 2);
        let right = EssentialBoundaryInfo::new(&m, m.points_from_label("right").unwrap());
        assert_eq!(right.vertex(0), 4);

        let m2 = mesh_2d();
        let mut left2 = EssentialBoundaryInfo::new(&m2, m2.points_from_label("left").unwrap());
        assert_eq!(left2.num_vertices(), 2);
        assert_eq!(left2.vertices(), &[2, 4]);
        left2.project(&m2, &|x, _| x[0] * x[0] + x[1] * x[1], 0.0);
        // vertices (0,0) and (0,1)
        assert_eq!(left2.value(0), 0.0);
        assert_eq!(left2.value(1), 1.0);
    }
}
