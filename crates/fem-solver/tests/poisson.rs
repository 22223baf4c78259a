//! End-to-end Poisson solves and assembly invariants.

use fem_mesh::{ElementType, Mesh};
use fem_solver::{
    FeProblem, FieldData, Matrix, NativeBackend, NonlinearConfig, Vector, solve_nonlinear,
};
use std::sync::Arc;

/// Register -laplace(u) = f with the forcing carried by an aux field:
/// F0 = -f, F1 = grad u, G3 = identity
fn register_poisson(problem: &mut FeProblem, iu: usize, affn: usize) {
    problem.add_residual_block(
        iu,
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            f[0] = -ctx.aux_field_value(affn).unwrap();
        })),
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
}

fn line_mesh_with_ends(xs: &[f64]) -> Mesh {
    let mut mesh = Mesh::line_mesh(xs).unwrap();
    let left = mesh.vertex_range().start;
    let right = mesh.vertex_range().end - 1;
    mesh.create_side_set(1, &[left], "left");
    mesh.create_side_set(2, &[right], "right");
    mesh
}

fn two_triangle_square() -> Mesh {
    let cells = [0, 1, 2, 1, 3, 2];
    let coords = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let mut mesh = Mesh::from_cell_list(2, ElementType::Tri3, &cells, &coords, true).unwrap();
    mesh.create_side_set(1, &[8], "left");
    mesh.create_side_set(2, &[6], "bottom");
    mesh.create_side_set(3, &[9], "right");
    mesh.create_side_set(4, &[10], "top");
    mesh
}

#[test]
fn poisson_1d_quadratic_dirichlet() {
    // -u'' = -2 with u = x^2 on both ends has the exact solution u = x^2,
    // and linear elements are nodally exact in 1D
    let mesh = Arc::new(line_mesh_with_ends(&[0.0, 0.4, 1.0]));
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
    let affn = problem
        .add_aux_fe("forcing_fn", 1, 1, Box::new(|_, _| -2.0))
        .unwrap();
    problem.add_dirichlet_bc(iu, &["left", "right"], Box::new(|x, _| x[0] * x[0]));
    register_poisson(&mut problem, iu, affn);
    problem.create().unwrap();

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, fem_solver::ConvergenceStatus::Converged);

    // single interior unknown at x = 0.4
    assert_eq!(problem.get_dof_count(), 1);
    assert!((problem.solution().get(0) - 0.16).abs() < 1e-7);

    let lx = problem.compute_solution_vector_local();
    assert!((lx[0] - 0.0).abs() < 1e-12);
    assert!((lx[1] - 0.16).abs() < 1e-7);
    assert!((lx[2] - 1.0).abs() < 1e-12);
}

#[test]
fn poisson_1d_homogeneous_dirichlet() {
    // -u'' = -2, u(0) = u(1) = 0: u = x^2 - x, midpoint value -1/4
    let mesh = Arc::new(line_mesh_with_ends(&[0.0, 0.5, 1.0]));
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
    let affn = problem
        .add_aux_fe("forcing_fn", 1, 1, Box::new(|_, _| -2.0))
        .unwrap();
    problem.add_dirichlet_bc(iu, &["left", "right"], Box::new(|_, _| 0.0));
    register_poisson(&mut problem, iu, affn);
    problem.create().unwrap();

    solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert!((problem.solution().get(0) + 0.25).abs() < 1e-7);
}

#[test]
fn poisson_2d_quadratic_dirichlet() {
    // u = x^2 + y^2 with f = -4 is exact; every vertex sits on the
    // boundary, so the trace must match the analytic values exactly
    let mesh = Arc::new(two_triangle_square());
    let mut problem = FeProblem::new(mesh.clone());
    let iu = problem.add_fe("u", 1, 1).unwrap();
    let affn = problem
        .add_aux_fe("forcing_fn", 1, 1, Box::new(|_, _| -4.0))
        .unwrap();
    problem.add_dirichlet_bc(
        iu,
        &["left", "bottom", "right", "top"],
        Box::new(|x, _| x[0] * x[0] + x[1] * x[1]),
    );
    register_poisson(&mut problem, iu, affn);
    problem.create().unwrap();

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, fem_solver::ConvergenceStatus::Converged);

    let lx = problem.compute_solution_vector_local();
    for v in mesh.vertex_range() {
        let x = mesh.vertex_coords(v);
        let expected = x[0] * x[0] + x[1] * x[1];
        let slot = v - mesh.vertex_range().start;
        assert!(
            (lx[slot] - expected).abs() < 1e-12,
            "vertex at ({}, {}): {} vs {}",
            x[0],
            x[1],
            lx[slot],
            expected
        );
    }
}

#[test]
fn constant_one_residual_sums_to_domain_measure() {
    // with F0 = 1 and a partition-of-unity basis, summing the assembled
    // residual gives the domain measure
    let mesh = Arc::new(two_triangle_square());
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_residual_block(
        iu,
        Some(Box::new(|_: &FieldData, f: &mut [f64]| f[0] = 1.0)),
        None,
    );
    problem.create().unwrap();

    let local = problem.build_local(problem.solution());
    let mut f = Vector::new(problem.get_dof_count());
    problem
        .compute_residual_local(0.0, 0.0, &local, None, &mut f)
        .unwrap();
    let total: f64 = f.as_slice().iter().sum();
    assert!((total - 1.0).abs() < 1e-12, "measure: {}", total);
}

#[test]
fn laplacian_stiffness_is_tridiagonal() {
    // uniform unit interval, no essential conditions: K = (1/h) tridiag
    let n = 4usize;
    let h = 1.0 / n as f64;
    let xs: Vec<f64> = (0..=n).map(|i| i as f64 * h).collect();
    let mesh = Arc::new(Mesh::line_mesh(&xs).unwrap());
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
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
    problem.create().unwrap();

    let local = problem.build_local(problem.solution());
    let mut j = Matrix::new(problem.get_dof_count(), problem.get_dof_count());
    problem
        .compute_jacobian_local(0.0, 0.0, &local, None, &mut j, None)
        .unwrap();

    let inv_h = 1.0 / h;
    for i in 0..=n {
        for k in 0..=n {
            let expected = match (i, k) {
                (a, b) if a == b && (a == 0 || a == n) => inv_h,
                (a, b) if a == b => 2.0 * inv_h,
                (a, b) if a.abs_diff(b) == 1 => -inv_h,
                _ => 0.0,
            };
            assert!(
                (j.get(i, k) - expected).abs() < 1e-12,
                "K[{},{}] = {} expected {}",
                i,
                k,
                j.get(i, k),
                expected
            );
        }
    }
}

#[test]
fn jacobian_matches_finite_differences() {
    // nonlinear reaction-diffusion: F0 = u^3 - 2, F1 = grad u
    let mesh = Arc::new(line_mesh_with_ends(&[0.0, 0.3, 0.7, 1.0]));
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_residual_block(
        iu,
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            let u = ctx.field_value(iu);
            f[0] = u * u * u - 2.0;
        })),
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            f[0] = ctx.field_gradient(iu)[0];
        })),
    );
    problem.add_jacobian_block(
        iu,
        iu,
        Some(Box::new(move |ctx: &FieldData, g: &mut [f64]| {
            let u = ctx.field_value(iu);
            g[0] = 3.0 * u * u;
        })),
        None,
        None,
        Some(Box::new(|_: &FieldData, g: &mut [f64]| g[0] = 1.0)),
    );
    problem.create().unwrap();

    let n = problem.get_dof_count();
    let x = Vector::from_vec(vec![0.3, -0.2, 0.5, 0.1]);
    assert_eq!(x.len(), n);
    let local = problem.build_local(&x);

    let mut r0 = Vector::new(n);
    problem
        .compute_residual_local(0.0, 0.0, &local, None, &mut r0)
        .unwrap();
    let mut j = Matrix::new(n, n);
    problem
        .compute_jacobian_local(0.0, 0.0, &local, None, &mut j, None)
        .unwrap();

    let delta = Vector::from_vec(vec![0.11, -0.07, 0.05, 0.02]);
    let eps = 1e-7;
    let mut x_eps = x.clone();
    x_eps.axpy(eps, &delta);
    let local_eps = problem.build_local(&x_eps);
    let mut r_eps = Vector::new(n);
    problem
        .compute_residual_local(0.0, 0.0, &local_eps, None, &mut r_eps)
        .unwrap();

    let jd = j.mul_vec(&delta).unwrap();
    for i in 0..n {
        let fd = (r_eps.get(i) - r0.get(i)) / eps;
        assert!(
            (jd.get(i) - fd).abs() < 1e-5 * (1.0 + fd.abs()),
            "row {}: J*d = {} vs FD = {}",
            i,
            jd.get(i),
            fd
        );
    }
}

#[test]
fn dof_count_and_assembly_list_sizes() {
    let mesh = Arc::new(two_triangle_square());
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 2).unwrap();
    problem.create().unwrap();
    // 4 vertices + 5 edges at order 2
    assert_eq!(problem.get_dof_count(), 9);
    let space = problem.space(iu);
    let mut al = fem_solver::AssemblyList::new();
    space.get_element_assembly_list(0, &mut al).unwrap();
    assert_eq!(al.len(), space.shapeset().num_fns(2));
    assert!(al.coef.iter().all(|&c| c != 0.0));
}

#[test]
fn ghost_cells_are_skipped_in_scatter() {
    let mut mesh = two_triangle_square();
    mesh.create_label("ghost").set_value(1, 1);
    let mesh = Arc::new(mesh);
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_residual_block(
        iu,
        Some(Box::new(|_: &FieldData, f: &mut [f64]| f[0] = 1.0)),
        None,
    );
    problem.create().unwrap();
    let local = problem.build_local(problem.solution());
    let mut f = Vector::new(problem.get_dof_count());
    problem
        .compute_residual_local(0.0, 0.0, &local, None, &mut f)
        .unwrap();
    // only the first triangle contributes: half the square
    let total: f64 = f.as_slice().iter().sum();
    assert!((total - 0.5).abs() < 1e-12, "measure: {}", total);
}

#[test]
fn poisson_1d_second_order_is_galerkin_exact() {
    // with quadratic elements the solution u = x^2 lies in the trial space,
    // so every DOF matches the interpolant exactly
    let mesh = Arc::new(line_mesh_with_ends(&[0.0, 0.4, 1.0]));
    let mut problem = FeProblem::new(mesh);
    let iu = problem.add_fe("u", 1, 2).unwrap();
    let affn = problem
        .add_aux_fe("forcing_fn", 1, 1, Box::new(|_, _| -2.0))
        .unwrap();
    problem.add_dirichlet_bc(iu, &["left", "right"], Box::new(|x, _| x[0] * x[0]));
    register_poisson(&mut problem, iu, affn);
    problem.create().unwrap();
    // one free vertex plus one bubble per cell
    assert_eq!(problem.get_dof_count(), 3);

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, fem_solver::ConvergenceStatus::Converged);

    // interior vertex at x = 0.4
    assert!((problem.solution().get(0) - 0.16).abs() < 1e-9);
    // bubble coefficient of the quadratic remainder on [0, 0.4]:
    // (h^2/4) (xi^2 - 1) = c2 l2(xi) with c2 = h^2 sqrt(6)/6
    let h: f64 = 0.4;
    let c2 = h * h * 6.0f64.sqrt() / 6.0;
    assert!(
        (problem.solution().get(1) - c2).abs() < 1e-9,
        "bubble coefficient {} vs {}",
        problem.solution().get(1),
        c2
    );
}

#[test]
fn laplace_on_quadrilaterals() {
    // u = x is harmonic and lies in the bilinear space; with u = x on the
    // left and right edges and zero flux elsewhere the discrete solution
    // is exact, exercising the per-point reference map of QUAD4
    let mesh = Arc::new(Mesh::box_mesh_2d(0.0, 1.0, 0.0, 1.0, 2, 2).unwrap());
    let mut problem = FeProblem::new(mesh.clone());
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_dirichlet_bc(iu, &["left", "right"], Box::new(|x, _| x[0]));
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
    problem.create().unwrap();

    let res = solve_nonlinear(
        &mut problem,
        0.0,
        None,
        &NonlinearConfig::default(),
        &NativeBackend::new(),
    )
    .unwrap();
    assert_eq!(res.status, fem_solver::ConvergenceStatus::Converged);

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

#[test]
fn solution_postprocessing() {
    // with the nodal interpolant of u = x installed as the solution,
    // the integral over [0, 1] is 1/2 and the L2 norm is 1/sqrt(3)
    let mesh = Arc::new(Mesh::line_mesh(&[0.0, 0.25, 0.5, 0.75, 1.0]).unwrap());
    let mut problem = FeProblem::new(mesh.clone());
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.create().unwrap();
    let values: Vec<f64> = mesh
        .vertex_range()
        .map(|v| mesh.vertex_coords(v)[0])
        .collect();
    problem.set_solution(Vector::from_vec(values));

    let integral = problem.integrate_field(iu).unwrap();
    assert!((integral - 0.5).abs() < 1e-12, "integral: {}", integral);
    let norm = problem.l2_norm(iu).unwrap();
    assert!(
        (norm - 1.0 / 3.0f64.sqrt()).abs() < 1e-12,
        "l2 norm: {}",
        norm
    );
}
