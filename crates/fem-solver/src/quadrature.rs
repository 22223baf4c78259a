//! Gauss quadrature tables per element type.
//!
//! One read-only instance per element type lives behind a `OnceLock` for the
//! lifetime of the process. The 1D Gauss–Legendre tables are embedded data
//! (orders up to 24); quadrilateral and hexahedral rules are tensor
//! products; triangle, tetrahedron and prism rules are built by the
//! collapsed-coordinate tensor construction, which is exact for the
//! requested order (maximum 20 on simplices). Edge and face sub-rules map
//! the lower-dimensional tables onto the reference sub-entities, so boundary
//! integrals evaluate in the cell's own reference coordinates.

use crate::error::{Error, Result};
use fem_mesh::{ElementType, FaceMode};
use std::sync::OnceLock;

/// A quadrature point on the reference element
#[derive(Debug, Clone, Copy)]
pub struct QPoint {
    pub x: [f64; 3],
    pub w: f64,
}

impl QPoint {
    fn new1(x: f64, w: f64) -> Self {
        QPoint { x: [x, 0.0, 0.0], w }
    }

    fn new2(x: f64, y: f64, w: f64) -> Self {
        QPoint { x: [x, y, 0.0], w }
    }

    fn new3(x: f64, y: f64, z: f64, w: f64) -> Self {
        QPoint { x: [x, y, z], w }
    }
}

// Gauss-Legendre abscissae and weights on [-1, 1]; set n has n+1 points and
// integrates degree 2n+1 exactly.
const GAUSS_PTS_1: [(f64, f64); 1] = [(0.0, 2.0)];
const GAUSS_PTS_2: [(f64, f64); 2] = [(-0.57735026918963, 1.0), (0.57735026918963, 1.0)];
const GAUSS_PTS_3: [(f64, f64); 3] = [
    (-0.77459666924148, 5.0 / 9.0),
    (0.0, 8.0 / 9.0),
    (0.77459666924148, 5.0 / 9.0),
];
const GAUSS_PTS_4: [(f64, f64); 4] = [
    (-0.86113631159405, 0.34785484513745),
    (-0.33998104358486, 0.65214515486255),
    (0.33998104358486, 0.65214515486255),
    (0.86113631159405, 0.34785484513745),
];
const GAUSS_PTS_5: [(f64, f64); 5] = [
    (-0.90617984593866, 0.23692688505619),
    (-0.53846931010568, 0.47862867049937),
    (0.0, 128.0 / 225.0),
    (0.53846931010568, 0.47862867049937),
    (0.90617984593866, 0.23692688505619),
];
const GAUSS_PTS_6: [(f64, f64); 6] = [
    (-0.93246951420315, 0.17132449237917),
    (-0.66120938646627, 0.36076157304814),
    (-0.23861918608320, 0.46791393457269),
    (0.23861918608320, 0.46791393457269),
    (0.66120938646627, 0.36076157304814),
    (0.93246951420315, 0.17132449237917),
];
const GAUSS_PTS_7: [(f64, f64); 7] = [
    (-0.94910791234276, 0.12948496616887),
    (-0.74153118559939, 0.27970539148928),
    (-0.40584515137740, 0.38183005050512),
    (0.0, 0.41795918367347),
    (0.40584515137740, 0.38183005050512),
    (0.74153118559939, 0.27970539148928),
    (0.94910791234276, 0.12948496616887),
];
const GAUSS_PTS_8: [(f64, f64); 8] = [
    (-0.96028985649754, 0.10122853629038),
    (-0.79666647741363, 0.22238103445337),
    (-0.52553240991633, 0.31370664587789),
    (-0.18343464249565, 0.36268378337836),
    (0.18343464249565, 0.36268378337836),
    (0.52553240991633, 0.31370664587789),
    (0.79666647741363, 0.22238103445337),
    (0.96028985649754, 0.10122853629038),
];
const GAUSS_PTS_9: [(f64, f64); 9] = [
    (-0.96816023950763, 0.08127438836157),
    (-0.83603110732664, 0.18064816069486),
    (-0.61337143270059, 0.26061069640294),
    (-0.32425342340381, 0.31234707704000),
    (0.0, 0.33023935500126),
    (0.32425342340381, 0.31234707704000),
    (0.61337143270059, 0.26061069640294),
    (0.83603110732664, 0.18064816069486),
    (0.96816023950763, 0.08127438836157),
];
const GAUSS_PTS_10: [(f64, f64); 10] = [
    (-0.97390652851717, 0.06667134430869),
    (-0.86506336668898, 0.14945134915058),
    (-0.67940956829902, 0.21908636251598),
    (-0.43339539412925, 0.26926671931000),
    (-0.14887433898163, 0.29552422471475),
    (0.14887433898163, 0.29552422471475),
    (0.43339539412925, 0.26926671931000),
    (0.67940956829902, 0.21908636251598),
    (0.86506336668898, 0.14945134915058),
    (0.97390652851717, 0.06667134430869),
];
const GAUSS_PTS_11: [(f64, f64); 11] = [
    (-0.97822865814606, 0.05566856711617),
    (-0.88706259976810, 0.12558036946490),
    (-0.73015200557405, 0.18629021092773),
    (-0.51909612920681, 0.23319376459199),
    (-0.26954315595234, 0.26280454451025),
    (0.0, 0.27292508677790),
    (0.26954315595234, 0.26280454451025),
    (0.51909612920681, 0.23319376459199),
    (0.73015200557405, 0.18629021092773),
    (0.88706259976810, 0.12558036946490),
    (0.97822865814606, 0.05566856711617),
];
const GAUSS_PTS_12: [(f64, f64); 12] = [
    (-0.98156063424672, 0.04717533638651),
    (-0.90411725637047, 0.10693932599532),
    (-0.76990267419430, 0.16007832854335),
    (-0.58731795428662, 0.20316742672307),
    (-0.36783149899818, 0.23349253653835),
    (-0.12523340851147, 0.24914704581340),
    (0.12523340851147, 0.24914704581340),
    (0.36783149899818, 0.23349253653835),
    (0.58731795428662, 0.20316742672307),
    (0.76990267419430, 0.16007832854335),
    (0.90411725637047, 0.10693932599532),
    (0.98156063424672, 0.04717533638651),
];
const GAUSS_PTS_13: [(f64, f64); 13] = [
    (-0.98418305471859, 0.04048400476532),
    (-0.91759839922298, 0.09212149983773),
    (-0.80157809073331, 0.13887351021979),
    (-0.64234933944034, 0.17814598076195),
    (-0.44849275103645, 0.20781604753689),
    (-0.23045831595513, 0.22628318026290),
    (0.0, 0.23255155323087),
    (0.23045831595513, 0.22628318026290),
    (0.44849275103645, 0.20781604753689),
    (0.64234933944034, 0.17814598076195),
    (0.80157809073331, 0.13887351021979),
    (0.91759839922298, 0.09212149983773),
    (0.98418305471859, 0.04048400476532),
];

/// 1D Gauss rule with `n` points (1..=13)
fn gauss_1d(n: usize) -> &'static [(f64, f64)] {
    match n {
        1 => &GAUSS_PTS_1,
        2 => &GAUSS_PTS_2,
        3 => &GAUSS_PTS_3,
        4 => &GAUSS_PTS_4,
        5 => &GAUSS_PTS_5,
        6 => &GAUSS_PTS_6,
        7 => &GAUSS_PTS_7,
        8 => &GAUSS_PTS_8,
        9 => &GAUSS_PTS_9,
        10 => &GAUSS_PTS_10,
        11 => &GAUSS_PTS_11,
        12 => &GAUSS_PTS_12,
        _ => &GAUSS_PTS_13,
    }
}

/// Per-element-type quadrature table
#[derive(Debug)]
pub struct Quadrature {
    etype: ElementType,
    max_order: usize,
    tables: Vec<Vec<QPoint>>,
    edge_tables: Vec<Vec<Vec<QPoint>>>,
    face_tables: Vec<Vec<Vec<QPoint>>>,
}

/// Maximum supported quadrature order for an element type
pub fn max_quadrature_order(etype: ElementType) -> usize {
    match etype {
        ElementType::Edge2 | ElementType::Quad4 | ElementType::Hex8 => 24,
        _ => 20,
    }
}

fn cell_rule(etype: ElementType, order: usize) -> Vec<QPoint> {
    match etype {
        ElementType::Point => vec![QPoint::new1(0.0, 1.0)],
        ElementType::Edge2 => gauss_1d(order / 2 + 1)
            .iter()
            .map(|&(x, w)| QPoint::new1(x, w))
            .collect(),
        ElementType::Tri3 => {
            let n = ((order + 3) / 2).clamp(1, 13);
            let g = gauss_1d(n);
            let mut pts = Vec::with_capacity(n * n);
            for &(a, wa) in g {
                for &(b, wb) in g {
                    let x = (1.0 + a) * (1.0 - b) / 2.0 - 1.0;
                    let y = b;
                    pts.push(QPoint::new2(x, y, wa * wb * (1.0 - b) / 2.0));
                }
            }
            pts
        }
        ElementType::Quad4 => {
            let g = gauss_1d(order / 2 + 1);
            let mut pts = Vec::with_capacity(g.len() * g.len());
            for &(a, wa) in g {
                for &(b, wb) in g {
                    pts.push(QPoint::new2(a, b, wa * wb));
                }
            }
            pts
        }
        ElementType::Tet4 => {
            let n = ((order + 4) / 2).clamp(1, 13);
            let g = gauss_1d(n);
            let mut pts = Vec::with_capacity(n * n * n);
            for &(a, wa) in g {
                for &(b, wb) in g {
                    for &(c, wc) in g {
                        let t1 = (1.0 + a) / 2.0;
                        let t2 = (1.0 + b) / 2.0;
                        let t3 = (1.0 + c) / 2.0;
                        let l1 = t1;
                        let l2 = t2 * (1.0 - t1);
                        let l3 = t3 * (1.0 - t1) * (1.0 - t2);
                        let x = 2.0 * l1 - 1.0;
                        let y = 2.0 * l2 - 1.0;
                        let z = 2.0 * l3 - 1.0;
                        let w = wa * wb * wc * (1.0 - t1) * (1.0 - t1) * (1.0 - t2);
                        pts.push(QPoint::new3(x, y, z, w));
                    }
                }
            }
            pts
        }
        ElementType::Hex8 => {
            let g = gauss_1d(order / 2 + 1);
            let mut pts = Vec::with_capacity(g.len().pow(3));
            for &(a, wa) in g {
                for &(b, wb) in g {
                    for &(c, wc) in g {
                        pts.push(QPoint::new3(a, b, c, wa * wb * wc));
                    }
                }
            }
            pts
        }
        ElementType::Prism6 => {
            let tri = cell_rule(ElementType::Tri3, order);
            let g = gauss_1d(order / 2 + 1);
            let mut pts = Vec::with_capacity(tri.len() * g.len());
            for t in &tri {
                for &(c, wc) in g {
                    pts.push(QPoint::new3(t.x[0], t.x[1], c, t.w * wc));
                }
            }
            pts
        }
    }
}

/// Map a 1D rule onto a local edge of the reference element
fn edge_rule(etype: ElementType, edge: usize, order: usize) -> Vec<QPoint> {
    let [a, b] = etype.edge_vertices(edge);
    let va = etype.vertices()[a];
    let vb = etype.vertices()[b];
    gauss_1d(order / 2 + 1)
        .iter()
        .map(|&(s, w)| {
            let l0 = (1.0 - s) / 2.0;
            let l1 = (1.0 + s) / 2.0;
            QPoint {
                x: [
                    l0 * va[0] + l1 * vb[0],
                    l0 * va[1] + l1 * vb[1],
                    l0 * va[2] + l1 * vb[2],
                ],
                w,
            }
        })
        .collect()
}

/// Map a 2D rule onto a local face of a 3D reference element
fn face_rule(etype: ElementType, face: usize, order: usize) -> Vec<QPoint> {
    let verts = etype.face_vertices(face);
    match etype.face_mode(face) {
        FaceMode::Triangle => {
            let (va, vb, vc) = (
                etype.vertices()[verts[0]],
                etype.vertices()[verts[1]],
                etype.vertices()[verts[2]],
            );
            cell_rule(ElementType::Tri3, order)
                .into_iter()
                .map(|p| {
                    let l0 = -(p.x[0] + p.x[1]) / 2.0;
                    let l1 = (1.0 + p.x[0]) / 2.0;
                    let l2 = (1.0 + p.x[1]) / 2.0;
                    QPoint {
                        x: [
                            l0 * va[0] + l1 * vb[0] + l2 * vc[0],
                            l0 * va[1] + l1 * vb[1] + l2 * vc[1],
                            l0 * va[2] + l1 * vb[2] + l2 * vc[2],
                        ],
                        w: p.w,
                    }
                })
                .collect()
        }
        FaceMode::Quad => {
            let vs: Vec<[f64; 3]> = verts.iter().map(|&v| etype.vertices()[v]).collect();
            cell_rule(ElementType::Quad4, order)
                .into_iter()
                .map(|p| {
                    let (xi, eta) = (p.x[0], p.x[1]);
                    let n = [
                        (1.0 - xi) * (1.0 - eta) / 4.0,
                        (1.0 + xi) * (1.0 - eta) / 4.0,
                        (1.0 + xi) * (1.0 + eta) / 4.0,
                        (1.0 - xi) * (1.0 + eta) / 4.0,
                    ];
                    let mut x = [0.0; 3];
                    for (ni, v) in n.iter().zip(&vs) {
                        for d in 0..3 {
                            x[d] += ni * v[d];
                        }
                    }
                    QPoint { x, w: p.w }
                })
                .collect()
        }
    }
}

impl Quadrature {
    fn build(etype: ElementType) -> Self {
        let max_order = max_quadrature_order(etype);
        let tables = (0..=max_order).map(|q| cell_rule(etype, q)).collect();
        let edge_tables = (0..etype.num_edges())
            .map(|e| (0..=max_order).map(|q| edge_rule(etype, e, q)).collect())
            .collect();
        let face_tables = (0..etype.num_faces())
            .map(|f| (0..=max_order).map(|q| face_rule(etype, f, q)).collect())
            .collect();
        Quadrature {
            etype,
            max_order,
            tables,
            edge_tables,
            face_tables,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.etype
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    fn check_order(&self, order: usize) -> Result<()> {
        if order > self.max_order {
            return Err(Error::Topology(format!(
                "no {:?} quadrature of order {} (maximum is {})",
                self.etype, order, self.max_order
            )));
        }
        Ok(())
    }

    /// Quadrature points on the reference element
    pub fn points(&self, order: usize) -> Result<&[QPoint]> {
        self.check_order(order)?;
        Ok(&self.tables[order])
    }

    pub fn num_points(&self, order: usize) -> Result<usize> {
        Ok(self.points(order)?.len())
    }

    /// Rule on a local edge, in reference-element coordinates
    pub fn edge_points(&self, edge: usize, order: usize) -> Result<&[QPoint]> {
        self.check_order(order)?;
        Ok(&self.edge_tables[edge][order])
    }

    /// Rule on a local face of a 3D element, in reference-element coordinates
    pub fn face_points(&self, face: usize, order: usize) -> Result<&[QPoint]> {
        self.check_order(order)?;
        Ok(&self.face_tables[face][order])
    }
}

static QUAD_EDGE2: OnceLock<Quadrature> = OnceLock::new();
static QUAD_TRI3: OnceLock<Quadrature> = OnceLock::new();
static QUAD_QUAD4: OnceLock<Quadrature> = OnceLock::new();
static QUAD_TET4: OnceLock<Quadrature> = OnceLock::new();
static QUAD_HEX8: OnceLock<Quadrature> = OnceLock::new();
static QUAD_PRISM6: OnceLock<Quadrature> = OnceLock::new();
static QUAD_POINT: OnceLock<Quadrature> = OnceLock::new();

/// The process-wide Gauss table for `etype`
pub fn gauss(etype: ElementType) -> &'static Quadrature {
    let cell = match etype {
        ElementType::Point => &QUAD_POINT,
        ElementType::Edge2 => &QUAD_EDGE2,
        ElementType::Tri3 => &QUAD_TRI3,
        ElementType::Quad4 => &QUAD_QUAD4,
        ElementType::Tet4 => &QUAD_TET4,
        ElementType::Hex8 => &QUAD_HEX8,
        ElementType::Prism6 => &QUAD_PRISM6,
    };
    cell.get_or_init(|| Quadrature::build(etype))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_sum(pts: &[QPoint]) -> f64 {
        pts.iter().map(|p| p.w).sum()
    }

    #[test]
    fn gauss_1d_order_2_weights_sum_to_two() {
        let q = gauss(ElementType::Edge2);
        let pts = q.points(2).unwrap();
        assert_eq!(pts.len(), 2);
        assert!((weight_sum(pts) - 2.0).abs() < 1e-14);
    }

    #[test]
    fn triangle_order_2_weights_sum_to_reference_area() {
        let q = gauss(ElementType::Tri3);
        let pts = q.points(2).unwrap();
        assert!((weight_sum(pts) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn tetra_weights_sum_to_reference_volume() {
        let q = gauss(ElementType::Tet4);
        for order in [0, 2, 5, 10] {
            let pts = q.points(order).unwrap();
            assert!(
                (weight_sum(pts) - 4.0 / 3.0).abs() < 1e-12,
                "order {}",
                order
            );
        }
    }

    #[test]
    fn gauss_1d_integrates_polynomials_exactly() {
        let q = gauss(ElementType::Edge2);
        for p in 0..=23usize {
            let order = p + 1;
            let pts = q.points(order).unwrap();
            let num: f64 = pts.iter().map(|pt| pt.w * pt.x[0].powi(p as i32)).sum();
            let exact = if p % 2 == 0 { 2.0 / (p as f64 + 1.0) } else { 0.0 };
            assert!((num - exact).abs() < 1e-12, "x^{}: {} vs {}", p, num, exact);
        }
    }

    #[test]
    fn triangle_integrates_linear_exactly() {
        // centroid of the reference triangle is (-1/3, -1/3), area 2
        let q = gauss(ElementType::Tri3);
        for order in [1, 2, 5, 20] {
            let pts = q.points(order).unwrap();
            let ix: f64 = pts.iter().map(|p| p.w * p.x[0]).sum();
            let iy: f64 = pts.iter().map(|p| p.w * p.x[1]).sum();
            assert!((ix + 2.0 / 3.0).abs() < 1e-12, "order {}", order);
            assert!((iy + 2.0 / 3.0).abs() < 1e-12, "order {}", order);
        }
    }

    #[test]
    fn triangle_rules_are_consistent_across_orders() {
        let q = gauss(ElementType::Tri3);
        let f = |x: f64, y: f64| x.powi(3) * y + 0.5 * y * y - x;
        let lo: f64 = q
            .points(4)
            .unwrap()
            .iter()
            .map(|p| p.w * f(p.x[0], p.x[1]))
            .sum();
        let hi: f64 = q
            .points(12)
            .unwrap()
            .iter()
            .map(|p| p.w * f(p.x[0], p.x[1]))
            .sum();
        assert!((lo - hi).abs() < 1e-12);
    }

    #[test]
    fn edge_rule_lands_on_the_edge() {
        let q = gauss(ElementType::Tri3);
        // edge 0 of the reference triangle runs along y = -1
        for p in q.edge_points(0, 4).unwrap() {
            assert!((p.x[1] + 1.0).abs() < 1e-14);
            assert!(p.x[0] > -1.0 && p.x[0] < 1.0);
        }
        // weights are the plain 1D weights
        assert!((weight_sum(q.edge_points(0, 2).unwrap()) - 2.0).abs() < 1e-14);
    }

    #[test]
    fn face_rule_lands_on_the_face() {
        let q = gauss(ElementType::Tet4);
        // face 3 of the reference tet lies in z = -1
        for p in q.face_points(3, 4).unwrap() {
            assert!((p.x[2] + 1.0).abs() < 1e-14);
        }
        // slanted face 1 satisfies x + y + z = -1
        for p in q.face_points(1, 4).unwrap() {
            assert!((p.x[0] + p.x[1] + p.x[2] + 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn order_above_max_is_rejected() {
        let q = gauss(ElementType::Tri3);
        assert!(q.points(21).is_err());
        assert_eq!(q.max_order(), 20);
        assert_eq!(gauss(ElementType::Edge2).max_order(), 24);
    }

    #[test]
    fn hex_weights_sum_to_reference_volume() {
        let q = gauss(ElementType::Hex8);
        assert!((weight_sum(q.points(3).unwrap()) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn prism_weights_sum_to_reference_volume() {
        let q = gauss(ElementType::Prism6);
        assert!((weight_sum(q.points(3).unwrap()) - 4.0).abs() < 1e-12);
    }
}
