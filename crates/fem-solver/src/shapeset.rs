//! H1 Lobatto shapesets.
//!
//! One shapeset per element type, plus a vertex-only variant used by the
//! reference map. Every shape function is stored as a product of univariate
//! factors applied to affine arguments of the reference coordinates:
//! vertex functions are affine (or tensor-Lobatto) nodal functions, edge
//! functions are kernel-weighted bubbles `la lb phi_k(lb - la)`, face and
//! interior functions are tensor products of Lobatto kernels. Values and
//! derivatives are closed-form via the product rule.
//!
//! The index space is laid out so that every query returns a contiguous
//! range: vertex functions first, then per (local edge, orientation) blocks
//! ordered by degree, then per (local face, orientation) blocks, then
//! bubbles. Orientations are baked into the stored argument signs and index
//! permutations, so shared entities evaluate identically from both sides.

use crate::error::{Error, Result};
use crate::lobatto::{lobatto, lobatto_dx, lobatto_dxx, phi, phi_dx};
use fem_mesh::{ElementType, FaceMode};
use std::ops::Range;

/// Evaluation kind for shapeset queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Value,
    Dx,
    Dy,
    Dz,
    Dxx,
    Dyy,
    Dzz,
    Dxy,
    Dyz,
    Dxz,
}

/// Highest polynomial degree carried by the H1 Lobatto sets
pub const MAX_ORDER: usize = 11;

#[derive(Debug, Clone, Copy)]
enum FactorKind {
    /// The affine argument itself
    Affine,
    /// Lobatto shape function l_k of the argument
    Lobatto(usize),
    /// Kernel function phi_k of the argument
    Kernel(usize),
}

/// One univariate factor f(c . x + c0)
#[derive(Debug, Clone, Copy)]
struct Factor {
    kind: FactorKind,
    c: [f64; 3],
    c0: f64,
}

impl Factor {
    fn arg(&self, x: &[f64; 3]) -> f64 {
        self.c[0] * x[0] + self.c[1] * x[1] + self.c[2] * x[2] + self.c0
    }

    fn value(&self, x: &[f64; 3]) -> f64 {
        let t = self.arg(x);
        match self.kind {
            FactorKind::Affine => t,
            FactorKind::Lobatto(k) => lobatto(k, t),
            FactorKind::Kernel(k) => phi(k, t),
        }
    }

    /// d/dx_d of the factor
    fn deriv(&self, x: &[f64; 3], d: usize) -> f64 {
        let t = self.arg(x);
        let df = match self.kind {
            FactorKind::Affine => 1.0,
            FactorKind::Lobatto(k) => lobatto_dx(k, t),
            FactorKind::Kernel(k) => phi_dx(k, t),
        };
        df * self.c[d]
    }

    fn second_deriv(&self, x: &[f64; 3], d: usize) -> f64 {
        let t = self.arg(x);
        let ddf = match self.kind {
            FactorKind::Affine => 0.0,
            FactorKind::Lobatto(k) => lobatto_dxx(k, t),
            FactorKind::Kernel(_) => unreachable!("kernel factors never appear alone"),
        };
        ddf * self.c[d] * self.c[d]
    }
}

#[derive(Debug, Clone)]
struct ShapeFun {
    factors: Vec<Factor>,
    order: usize,
}

impl ShapeFun {
    fn value(&self, x: &[f64; 3]) -> f64 {
        self.factors.iter().map(|f| f.value(x)).product()
    }

    fn deriv(&self, x: &[f64; 3], d: usize) -> f64 {
        let vals: Vec<f64> = self.factors.iter().map(|f| f.value(x)).collect();
        let mut sum = 0.0;
        for (i, f) in self.factors.iter().enumerate() {
            let mut term = f.deriv(x, d);
            for (j, &v) in vals.iter().enumerate() {
                if j != i {
                    term *= v;
                }
            }
            sum += term;
        }
        sum
    }
}

fn aff(c: [f64; 3], c0: f64) -> Factor {
    Factor {
        kind: FactorKind::Affine,
        c,
        c0,
    }
}

fn lob(k: usize, c: [f64; 3]) -> Factor {
    Factor {
        kind: FactorKind::Lobatto(k),
        c,
        c0: 0.0,
    }
}

fn ker(k: usize, c: [f64; 3], c0: f64) -> Factor {
    Factor {
        kind: FactorKind::Kernel(k),
        c,
        c0,
    }
}

/// Barycentric coordinates of the reference triangle (in x, y)
const LAMBDA_TRI: [([f64; 3], f64); 3] = [
    ([-0.5, -0.5, 0.0], 0.0),
    ([0.5, 0.0, 0.0], 0.5),
    ([0.0, 0.5, 0.0], 0.5),
];

/// Barycentric coordinates of the reference tetrahedron
const LAMBDA_TET: [([f64; 3], f64); 4] = [
    ([-0.5, -0.5, -0.5], -0.5),
    ([0.5, 0.0, 0.0], 0.5),
    ([0.0, 0.5, 0.0], 0.5),
    ([0.0, 0.0, 0.5], 0.5),
];

fn lambda_diff(a: &([f64; 3], f64), b: &([f64; 3], f64)) -> ([f64; 3], f64) {
    (
        [b.0[0] - a.0[0], b.0[1] - a.0[1], b.0[2] - a.0[2]],
        b.1 - a.1,
    )
}

/// Local face-corner index of each canonical vertex of an oriented triangle
/// face; rotations occupy 0..3, reflected cycles 3..6
fn tri_perm(ori: u8) -> [usize; 3] {
    let (start, forward) = if ori < 3 {
        (ori as usize, true)
    } else {
        ((ori - 3) as usize, false)
    };
    let mut out = [0usize; 3];
    for (m, q) in out.iter_mut().enumerate() {
        *q = if forward {
            (3 + m - start) % 3
        } else {
            (3 + start - m) % 3
        };
    }
    out
}

/// Canonical-to-local index permutation of an oriented quad face
fn quad_perm(ori: u8) -> [usize; 4] {
    let (start, forward) = if ori < 4 {
        (ori as usize, true)
    } else {
        ((ori - 4) as usize, false)
    };
    let mut out = [0usize; 4];
    for (m, q) in out.iter_mut().enumerate() {
        *q = if forward {
            (4 + m - start) % 4
        } else {
            (4 + start - m) % 4
        };
    }
    out
}

/// Reference-square corner parameters in cycle order
const QUAD_CORNERS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// H1 Lobatto shapeset for one element type
#[derive(Debug, Clone)]
pub struct Shapeset {
    etype: ElementType,
    max_order: usize,
    fns: Vec<ShapeFun>,
    vertex_indices: Vec<usize>,
    /// Block start per (local edge, orientation); degrees ascend inside
    edge_blocks: Vec<[usize; 2]>,
    /// Block start per (local face, orientation)
    face_blocks: Vec<Vec<usize>>,
    bubble_start: usize,
}

impl Shapeset {
    /// Full H1 basis for `etype` up to `MAX_ORDER`
    pub fn new(etype: ElementType) -> Self {
        Self::build(etype, false)
    }

    /// Vertex-only basis used by the reference map
    pub fn ref_map(etype: ElementType) -> Self {
        Self::build(etype, true)
    }

    fn build(etype: ElementType, vertex_only: bool) -> Self {
        let mut ss = Shapeset {
            etype,
            max_order: if vertex_only { 1 } else { MAX_ORDER },
            fns: Vec::new(),
            vertex_indices: Vec::new(),
            edge_blocks: Vec::new(),
            face_blocks: Vec::new(),
            bubble_start: 0,
        };
        ss.build_vertices();
        if !vertex_only {
            ss.build_edges();
            ss.build_faces();
            ss.bubble_start = ss.fns.len();
            ss.build_bubbles();
        } else {
            ss.bubble_start = ss.fns.len();
        }
        ss
    }

    fn push(&mut self, factors: Vec<Factor>, order: usize) -> usize {
        self.fns.push(ShapeFun { factors, order });
        self.fns.len() - 1
    }

    fn build_vertices(&mut self) {
        match self.etype {
            ElementType::Edge2 => {
                for k in 0..2 {
                    let i = self.push(vec![lob(k, [1.0, 0.0, 0.0])], 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Tri3 => {
                for l in LAMBDA_TRI {
                    let i = self.push(vec![aff(l.0, l.1)], 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Quad4 => {
                for v in self.etype.vertices() {
                    let fx = lob(if v[0] < 0.0 { 0 } else { 1 }, [1.0, 0.0, 0.0]);
                    let fy = lob(if v[1] < 0.0 { 0 } else { 1 }, [0.0, 1.0, 0.0]);
                    let i = self.push(vec![fx, fy], 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Tet4 => {
                for l in LAMBDA_TET {
                    let i = self.push(vec![aff(l.0, l.1)], 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Hex8 => {
                for v in self.etype.vertices() {
                    let mut fs = Vec::with_capacity(3);
                    for d in 0..3 {
                        let mut c = [0.0; 3];
                        c[d] = 1.0;
                        fs.push(lob(if v[d] < 0.0 { 0 } else { 1 }, c));
                    }
                    let i = self.push(fs, 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Prism6 => {
                for (v, coords) in self.etype.vertices().iter().enumerate() {
                    let l = LAMBDA_TRI[v % 3];
                    let fz = lob(if coords[2] < 0.0 { 0 } else { 1 }, [0.0, 0.0, 1.0]);
                    let i = self.push(vec![aff(l.0, l.1), fz], 1);
                    self.vertex_indices.push(i);
                }
            }
            ElementType::Point => {
                let i = self.push(vec![aff([0.0; 3], 1.0)], 0);
                self.vertex_indices.push(i);
            }
        }
    }

    fn build_edges(&mut self) {
        let ne = self.etype.num_edges();
        for e in 0..ne {
            let mut starts = [0usize; 2];
            for (ori, start) in starts.iter_mut().enumerate() {
                *start = self.fns.len();
                for k in 2..=self.max_order {
                    let factors = self.edge_fn_factors(e, k, ori as u8);
                    self.push(factors, k);
                }
            }
            self.edge_blocks.push(starts);
        }
    }

    fn edge_fn_factors(&self, e: usize, k: usize, ori: u8) -> Vec<Factor> {
        let [a0, b0] = self.etype.edge_vertices(e);
        let (a, b) = if ori == 0 { (a0, b0) } else { (b0, a0) };
        match self.etype {
            ElementType::Tri3 => {
                let (la, lb) = (LAMBDA_TRI[a], LAMBDA_TRI[b]);
                let d = lambda_diff(&la, &lb);
                vec![aff(la.0, la.1), aff(lb.0, lb.1), ker(k - 2, d.0, d.1)]
            }
            ElementType::Tet4 => {
                let (la, lb) = (LAMBDA_TET[a], LAMBDA_TET[b]);
                let d = lambda_diff(&la, &lb);
                vec![aff(la.0, la.1), aff(lb.0, lb.1), ker(k - 2, d.0, d.1)]
            }
            ElementType::Quad4 => {
                let (ra, rb) = (self.etype.vertices()[a], self.etype.vertices()[b]);
                let dir = [(rb[0] - ra[0]) / 2.0, (rb[1] - ra[1]) / 2.0, 0.0];
                // fixed coordinate blends the function onto the edge
                let fixed = if dir[0].abs() > 0.5 { 1 } else { 0 };
                let mut blend_c = [0.0; 3];
                blend_c[fixed] = 1.0;
                let blend = lob(if ra[fixed] < 0.0 { 0 } else { 1 }, blend_c);
                vec![lob(k, dir), blend]
            }
            ElementType::Hex8 => {
                let (ra, rb) = (self.etype.vertices()[a], self.etype.vertices()[b]);
                let dir = [
                    (rb[0] - ra[0]) / 2.0,
                    (rb[1] - ra[1]) / 2.0,
                    (rb[2] - ra[2]) / 2.0,
                ];
                let mut fs = vec![lob(k, dir)];
                for d in 0..3 {
                    if dir[d].abs() < 0.5 {
                        let mut c = [0.0; 3];
                        c[d] = 1.0;
                        fs.push(lob(if ra[d] < 0.0 { 0 } else { 1 }, c));
                    }
                }
                fs
            }
            ElementType::Prism6 => {
                if e < 3 || e >= 6 {
                    // horizontal triangle edge on the bottom or top cap
                    let (la, lb) = (LAMBDA_TRI[a % 3], LAMBDA_TRI[b % 3]);
                    let d = lambda_diff(&la, &lb);
                    let cap = lob(if e < 3 { 0 } else { 1 }, [0.0, 0.0, 1.0]);
                    vec![aff(la.0, la.1), aff(lb.0, lb.1), ker(k - 2, d.0, d.1), cap]
                } else {
                    // vertical edge: nodal triangle function times a z-bubble
                    let base = a.min(b) % 3;
                    let la = LAMBDA_TRI[base];
                    let sgn = if a < b { 1.0 } else { -1.0 };
                    vec![aff(la.0, la.1), lob(k, [0.0, 0.0, sgn])]
                }
            }
            _ => unreachable!("element type {:?} has no edge functions", self.etype),
        }
    }

    fn build_faces(&mut self) {
        let nf = self.etype.num_faces();
        for f in 0..nf {
            let n_ori = self.etype.face_orientations(f);
            let mut starts = Vec::with_capacity(n_ori);
            for ori in 0..n_ori {
                starts.push(self.fns.len());
                match self.etype.face_mode(f) {
                    FaceMode::Triangle => {
                        for d in 3..=self.max_order {
                            for i in 0..=(d - 3) {
                                let j = d - 3 - i;
                                let factors = self.tri_face_factors(f, i, j, ori as u8);
                                self.push(factors, d);
                            }
                        }
                    }
                    FaceMode::Quad => {
                        for m in 2..=self.max_order {
                            for j in 2..=m {
                                let factors = self.quad_face_factors(f, m, j, ori as u8);
                                self.push(factors, m);
                            }
                            for i in 2..m {
                                let factors = self.quad_face_factors(f, i, m, ori as u8);
                                self.push(factors, m);
                            }
                        }
                    }
                }
            }
            self.face_blocks.push(starts);
        }
    }

    fn tri_face_factors(&self, f: usize, i: usize, j: usize, ori: u8) -> Vec<Factor> {
        let verts = self.etype.face_vertices(f);
        let perm = tri_perm(ori);
        let (a, b, c) = (verts[perm[0]], verts[perm[1]], verts[perm[2]]);
        match self.etype {
            ElementType::Tet4 => {
                let (la, lb, lc) = (LAMBDA_TET[a], LAMBDA_TET[b], LAMBDA_TET[c]);
                let dab = lambda_diff(&la, &lb);
                let dac = lambda_diff(&la, &lc);
                vec![
                    aff(la.0, la.1),
                    aff(lb.0, lb.1),
                    aff(lc.0, lc.1),
                    ker(i, dab.0, dab.1),
                    ker(j, dac.0, dac.1),
                ]
            }
            ElementType::Prism6 => {
                let (la, lb, lc) = (
                    LAMBDA_TRI[a % 3],
                    LAMBDA_TRI[b % 3],
                    LAMBDA_TRI[c % 3],
                );
                let dab = lambda_diff(&la, &lb);
                let dac = lambda_diff(&la, &lc);
                let cap = lob(if f == 3 { 0 } else { 1 }, [0.0, 0.0, 1.0]);
                vec![
                    aff(la.0, la.1),
                    aff(lb.0, lb.1),
                    aff(lc.0, lc.1),
                    ker(i, dab.0, dab.1),
                    ker(j, dac.0, dac.1),
                    cap,
                ]
            }
            _ => unreachable!(),
        }
    }

    fn quad_face_factors(&self, f: usize, i: usize, j: usize, ori: u8) -> Vec<Factor> {
        let verts = self.etype.face_vertices(f);
        let perm = quad_perm(ori);
        // canonical corner m sits at local face corner perm[m]
        let p0 = QUAD_CORNERS[perm[0]];
        let p1 = QUAD_CORNERS[perm[1]];
        let p3 = QUAD_CORNERS[perm[3]];
        let ds = [(p1[0] - p0[0]) / 2.0, (p1[1] - p0[1]) / 2.0];
        let dt = [(p3[0] - p0[0]) / 2.0, (p3[1] - p0[1]) / 2.0];
        match self.etype {
            ElementType::Hex8 => {
                let rv: Vec<[f64; 3]> = verts.iter().map(|&v| self.etype.vertices()[v]).collect();
                let u_dir = [
                    (rv[1][0] - rv[0][0]) / 2.0,
                    (rv[1][1] - rv[0][1]) / 2.0,
                    (rv[1][2] - rv[0][2]) / 2.0,
                ];
                let v_dir = [
                    (rv[3][0] - rv[0][0]) / 2.0,
                    (rv[3][1] - rv[0][1]) / 2.0,
                    (rv[3][2] - rv[0][2]) / 2.0,
                ];
                let cs = [
                    ds[0] * u_dir[0] + ds[1] * v_dir[0],
                    ds[0] * u_dir[1] + ds[1] * v_dir[1],
                    ds[0] * u_dir[2] + ds[1] * v_dir[2],
                ];
                let ct = [
                    dt[0] * u_dir[0] + dt[1] * v_dir[0],
                    dt[0] * u_dir[1] + dt[1] * v_dir[1],
                    dt[0] * u_dir[2] + dt[1] * v_dir[2],
                ];
                // normal axis blends the face bubble into the cell
                let n = [
                    u_dir[1] * v_dir[2] - u_dir[2] * v_dir[1],
                    u_dir[2] * v_dir[0] - u_dir[0] * v_dir[2],
                    u_dir[0] * v_dir[1] - u_dir[1] * v_dir[0],
                ];
                let axis = [n[0].abs(), n[1].abs(), n[2].abs()];
                let w0 = axis[0] * rv[0][0] + axis[1] * rv[0][1] + axis[2] * rv[0][2];
                let blend = lob(if w0 < 0.0 { 0 } else { 1 }, axis);
                vec![lob(i, cs), lob(j, ct), blend]
            }
            ElementType::Prism6 => {
                // quad faces of the prism: a triangle-edge direction and z
                let (a, b) = (verts[0], verts[1]);
                let (la, lb) = (LAMBDA_TRI[a % 3], LAMBDA_TRI[b % 3]);
                let d = lambda_diff(&la, &lb);
                let edge_bubble = |deg: usize, sgn: f64| -> Vec<Factor> {
                    vec![
                        aff(la.0, la.1),
                        aff(lb.0, lb.1),
                        ker(
                            deg - 2,
                            [sgn * d.0[0], sgn * d.0[1], sgn * d.0[2]],
                            sgn * d.1,
                        ),
                    ]
                };
                let mut fs;
                if ds[0].abs() > 0.5 {
                    // canonical s runs along the triangle edge, t along z
                    fs = edge_bubble(i, ds[0]);
                    fs.push(lob(j, [0.0, 0.0, dt[1]]));
                } else {
                    fs = edge_bubble(j, dt[0]);
                    fs.push(lob(i, [0.0, 0.0, ds[1]]));
                }
                fs
            }
            _ => unreachable!(),
        }
    }

    fn build_bubbles(&mut self) {
        match self.etype {
            ElementType::Edge2 => {
                for k in 2..=self.max_order {
                    self.push(vec![lob(k, [1.0, 0.0, 0.0])], k);
                }
            }
            ElementType::Tri3 => {
                let ls = LAMBDA_TRI;
                let d10 = lambda_diff(&ls[0], &ls[1]);
                let d20 = lambda_diff(&ls[0], &ls[2]);
                for d in 3..=self.max_order {
                    for i in 0..=(d - 3) {
                        let j = d - 3 - i;
                        self.push(
                            vec![
                                aff(ls[0].0, ls[0].1),
                                aff(ls[1].0, ls[1].1),
                                aff(ls[2].0, ls[2].1),
                                ker(i, d10.0, d10.1),
                                ker(j, d20.0, d20.1),
                            ],
                            d,
                        );
                    }
                }
            }
            ElementType::Quad4 => {
                for m in 2..=self.max_order {
                    for j in 2..=m {
                        self.push(vec![lob(m, [1.0, 0.0, 0.0]), lob(j, [0.0, 1.0, 0.0])], m);
                    }
                    for i in 2..m {
                        self.push(vec![lob(i, [1.0, 0.0, 0.0]), lob(m, [0.0, 1.0, 0.0])], m);
                    }
                }
            }
            ElementType::Tet4 => {
                let ls = LAMBDA_TET;
                let d10 = lambda_diff(&ls[0], &ls[1]);
                let d20 = lambda_diff(&ls[0], &ls[2]);
                let d30 = lambda_diff(&ls[0], &ls[3]);
                for d in 4..=self.max_order {
                    for i in 0..=(d - 4) {
                        for j in 0..=(d - 4 - i) {
                            let k = d - 4 - i - j;
                            self.push(
                                vec![
                                    aff(ls[0].0, ls[0].1),
                                    aff(ls[1].0, ls[1].1),
                                    aff(ls[2].0, ls[2].1),
                                    aff(ls[3].0, ls[3].1),
                                    ker(i, d10.0, d10.1),
                                    ker(j, d20.0, d20.1),
                                    ker(k, d30.0, d30.1),
                                ],
                                d,
                            );
                        }
                    }
                }
            }
            ElementType::Hex8 => {
                for m in 2..=self.max_order {
                    for i in 2..=m {
                        for j in 2..=m {
                            for k in 2..=m {
                                if i.max(j).max(k) == m {
                                    self.push(
                                        vec![
                                            lob(i, [1.0, 0.0, 0.0]),
                                            lob(j, [0.0, 1.0, 0.0]),
                                            lob(k, [0.0, 0.0, 1.0]),
                                        ],
                                        m,
                                    );
                                }
                            }
                        }
                    }
                }
            }
            ElementType::Prism6 => {
                let ls = LAMBDA_TRI;
                let d10 = lambda_diff(&ls[0], &ls[1]);
                let d20 = lambda_diff(&ls[0], &ls[2]);
                for m in 3..=self.max_order {
                    // triangle bubble of xy-degree dt times a z-bubble l_k,
                    // enumerated by max(dt, k)
                    for dt in 3..=m {
                        for k in 2..=m {
                            if dt.max(k) != m {
                                continue;
                            }
                            for i in 0..=(dt - 3) {
                                let j = dt - 3 - i;
                                self.push(
                                    vec![
                                        aff(ls[0].0, ls[0].1),
                                        aff(ls[1].0, ls[1].1),
                                        aff(ls[2].0, ls[2].1),
                                        ker(i, d10.0, d10.1),
                                        ker(j, d20.0, d20.1),
                                        lob(k, [0.0, 0.0, 1.0]),
                                    ],
                                    m,
                                );
                            }
                        }
                    }
                }
            }
            ElementType::Point => {}
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.etype
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn num_components(&self) -> usize {
        1
    }

    fn check_order(&self, order: usize) -> Result<()> {
        if order > self.max_order {
            return Err(Error::Topology(format!(
                "order {} exceeds the maximum order {} of the {:?} shapeset",
                order, self.max_order, self.etype
            )));
        }
        Ok(())
    }

    /// Index of the shape function associated with local vertex `k`
    pub fn vertex_index(&self, k: usize) -> usize {
        self.vertex_indices[k]
    }

    /// Contiguous indices of the edge functions on `(edge, ori)` up to `order`
    pub fn edge_indices(&self, edge: usize, ori: u8, order: usize) -> Result<Range<usize>> {
        self.check_order(order)?;
        let start = self.edge_blocks[edge][ori as usize];
        Ok(start..start + self.num_edge_fns(order))
    }

    /// Contiguous indices of the face functions on `(face, ori)` up to `order`
    pub fn face_indices(&self, face: usize, ori: u8, order: usize) -> Result<Range<usize>> {
        self.check_order(order)?;
        let start = self.face_blocks[face][ori as usize];
        Ok(start..start + self.num_face_fns(face, order))
    }

    /// Contiguous indices of the interior (bubble) functions up to `order`
    pub fn bubble_indices(&self, order: usize) -> Result<Range<usize>> {
        self.check_order(order)?;
        Ok(self.bubble_start..self.bubble_start + self.num_bubble_fns(order))
    }

    /// Polynomial degree of shape function `index`
    pub fn order(&self, index: usize) -> usize {
        self.fns[index].order
    }

    /// Edge DOFs contributed per local edge at `order`
    pub fn num_edge_fns(&self, order: usize) -> usize {
        if self.etype.num_edges() == 0 {
            0
        } else {
            order.saturating_sub(1)
        }
    }

    /// Face DOFs contributed per local face at `order`
    pub fn num_face_fns(&self, face: usize, order: usize) -> usize {
        if self.etype.num_faces() == 0 {
            return 0;
        }
        Self::num_face_fns_mode(self.etype.face_mode(face), order)
    }

    /// Face DOFs of a face of the given mode at `order`
    pub fn num_face_fns_mode(mode: FaceMode, order: usize) -> usize {
        let p = order;
        match mode {
            FaceMode::Triangle => {
                if p < 3 {
                    0
                } else {
                    (p - 1) * (p - 2) / 2
                }
            }
            FaceMode::Quad => {
                if p < 2 {
                    0
                } else {
                    (p - 1) * (p - 1)
                }
            }
        }
    }

    /// Interior DOFs contributed at `order`
    pub fn num_bubble_fns(&self, order: usize) -> usize {
        let p = order;
        match self.etype {
            ElementType::Edge2 => p.saturating_sub(1),
            ElementType::Tri3 => {
                if p < 3 {
                    0
                } else {
                    (p - 1) * (p - 2) / 2
                }
            }
            ElementType::Quad4 => {
                if p < 2 {
                    0
                } else {
                    (p - 1) * (p - 1)
                }
            }
            ElementType::Tet4 => {
                if p < 4 {
                    0
                } else {
                    (p - 1) * (p - 2) * (p - 3) / 6
                }
            }
            ElementType::Hex8 => {
                if p < 2 {
                    0
                } else {
                    (p - 1).pow(3)
                }
            }
            ElementType::Prism6 => {
                if p < 3 {
                    0
                } else {
                    (p - 1) * (p - 2) / 2 * (p - 1)
                }
            }
            ElementType::Point => 0,
        }
    }

    /// Total shape functions of a cell at uniform `order`
    pub fn num_fns(&self, order: usize) -> usize {
        let mut n = self.etype.num_vertices();
        n += self.etype.num_edges() * self.num_edge_fns(order);
        for f in 0..self.etype.num_faces() {
            n += self.num_face_fns(f, order);
        }
        n + self.num_bubble_fns(order)
    }

    /// Evaluate one shape function at a single point
    pub fn get_value(&self, kind: ValueKind, index: usize, pt: &[f64; 3]) -> Result<f64> {
        let f = &self.fns[index];
        let dim = self.etype.dim();
        match kind {
            ValueKind::Value => Ok(f.value(pt)),
            ValueKind::Dx => Ok(f.deriv(pt, 0)),
            ValueKind::Dy if dim >= 2 => Ok(f.deriv(pt, 1)),
            ValueKind::Dz if dim >= 3 => Ok(f.deriv(pt, 2)),
            ValueKind::Dxx if self.etype == ElementType::Edge2 => {
                Ok(f.factors[0].second_deriv(pt, 0))
            }
            _ => Err(Error::Topology(format!(
                "the {:?} shapeset does not supply {:?} values",
                self.etype, kind
            ))),
        }
    }

    /// Evaluate one shape function at a list of points
    pub fn get_values(
        &self,
        kind: ValueKind,
        index: usize,
        pts: &[[f64; 3]],
        vals: &mut [f64],
    ) -> Result<()> {
        debug_assert!(vals.len() >= pts.len());
        for (v, pt) in vals.iter_mut().zip(pts) {
            *v = self.get_value(kind, index, pt)?;
        }
        Ok(())
    }
}
