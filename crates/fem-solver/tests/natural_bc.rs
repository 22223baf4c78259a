//! Natural (Neumann) boundary integrals in 1D and 2D.

use fem_mesh::{ElementType, Mesh};
use fem_solver::{
    ConvergenceStatus, FeProblem, FieldData, NativeBackend, NonlinearConfig, solve_nonlinear,
};
use std::sync::Arc;

#[test]
fn neumann_flux_1d() {
    // -u'' = 0, u(0) = 0, u'(1) = 1: u = x
    let mut mesh = Mesh::line_mesh(&[0.0, 0.5, 1.0]).unwrap();
    let left = mesh.vertex_range().start;
    let right = mesh.vertex_range().end - 1;
    mesh.create_side_set(1, &[left], "left");
    mesh.create_side_set(2, &[right], "right");
    let mut problem = FeProblem::new(Arc::new(mesh));
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_dirichlet_bc(iu, &["left"], Box::new(|_, _| 0.0));
    problem.add_residual_block(
        iu,
        None,
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            f[0] = ctx.field_gradient(iu)[0];
        })),
    );
    problem.add_jacobian_block(
        iu,
        iu,
        None,
        None,
        None,
        Some(Box::new(|_: &FieldData, g: &mut [f64]| g[0] = 1.0)),
    );
    // flux g = 1 enters the residual as -g against the test function
    problem.add_boundary_residual_block(
        iu,
        "right",
        2,
        Some(Box::new(|ctx: &FieldData, f: &mut [f64]| {
            assert!(ctx.normal().is_some());
            f[0] = -1.0;
        })),
        None,
    );
    problem.create().unwrap();

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, ConvergenceStatus::Converged);
    let lx = problem.compute_solution_vector_local();
    assert!((lx[0] - 0.0).abs() < 1e-10);
    assert!((lx[1] - 0.5).abs() < 1e-10);
    assert!((lx[2] - 1.0).abs() < 1e-10);
}

#[test]
fn neumann_flux_2d() {
    // -laplace(u) = 0 on the unit square, u = 0 on the left edge and
    // du/dn = 1 on the right edge: u = x
    let cells = [0, 1, 2, 1, 3, 2];
    let coords = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let mut mesh = Mesh::from_cell_list(2, ElementType::Tri3, &cells, &coords, true).unwrap();
    mesh.create_side_set(1, &[8], "left");
    mesh.create_side_set(2, &[9], "right");
    let mesh = Arc::new(mesh);
    let mut problem = FeProblem::new(mesh.clone());
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_dirichlet_bc(iu, &["left"], Box::new(|_, _| 0.0));
    problem.add_residual_block(
        iu,
        None,
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            let g = ctx.field_gradient(iu);
            f[..ctx.dim].copy_from_slice(&g[..ctx.dim]);
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
    problem.add_boundary_residual_block(
        iu,
        "right",
        2,
        Some(Box::new(|ctx: &FieldData, f: &mut [f64]| {
            let n = ctx.normal().expect("boundary integral has a normal");
            assert!((n[0] - 1.0).abs() < 1e-12);
            assert!(n[1].abs() < 1e-12);
            f[0] = -1.0;
        })),
        None,
    );
    problem.create().unwrap();

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, ConvergenceStatus::Converged);

    let lx = problem.compute_solution_vector_local();
    for v in mesh.vertex_range() {
        let x = mesh.vertex_coords(v);
        let slot = v - mesh.vertex_range().start;
        assert!(
            (lx[slot] - x[0]).abs() < 1e-10,
            "vertex ({}, {}): {} vs {}",
            x[0],
            x[1],
            lx[slot],
            x[0]
        );
    }
}
