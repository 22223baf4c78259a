//! Implicit time marching of the heat equation on a 1D mesh.
//!
//! The problem is time-independent (no forcing, fixed boundary data), so
//! the march must settle on the steady solution u = x.

use fem_mesh::Mesh;
use fem_solver::{
    FeProblem, FieldData, NativeBackend, NonlinearConfig, TimeConvergedReason, TimeScheme,
    TransientConfig, TransientSolver,
};
use std::sync::Arc;

fn heat_problem() -> FeProblem {
    let mut mesh = Mesh::line_mesh(&[0.0, 0.5, 1.0]).unwrap();
    let left = mesh.vertex_range().start;
    let right = mesh.vertex_range().end - 1;
    mesh.create_side_set(1, &[left], "left");
    mesh.create_side_set(2, &[right], "right");
    let mut problem = FeProblem::new(Arc::new(mesh));
    let iu = problem.add_fe("u", 1, 1).unwrap();
    problem.add_dirichlet_bc(iu, &["left", "right"], Box::new(|x, _| x[0] * x[0]));
    problem.set_initial_condition(iu, Box::new(|_, _| 0.0));
    // F0 = u_t, F1 = grad u; G0 carries the integrator shift, G3 = identity
    problem.add_residual_block(
        iu,
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            f[0] = ctx.field_dot(iu);
        })),
        Some(Box::new(move |ctx: &FieldData, f: &mut [f64]| {
            f[0] = ctx.field_gradient(iu)[0];
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
        Some(Box::new(|_: &FieldData, g: &mut [f64]| g[0] = 1.0)),
    );
    problem.create().unwrap();
    problem
}

#[test]
fn backward_euler_settles_on_steady_state() {
    let mut problem = heat_problem();
    let config = TransientConfig {
        scheme: TimeScheme::BackwardEuler,
        start_time: 0.0,
        end_time: Some(20.0),
        num_steps: None,
        dt: 5.0,
    };
    let mut ts = TransientSolver::new(config, NonlinearConfig::default()).unwrap();
    assert_eq!(ts.time_step(), 5.0);
    assert_eq!(ts.max_time(), Some(20.0));

    ts.solve(&mut problem, &NativeBackend::new()).unwrap();
    assert!(ts.converged_reason().is_converged());
    assert_eq!(ts.converged_reason(), TimeConvergedReason::ConvergedTime);
    assert_eq!(ts.steps_taken(), 4);

    // steady limit of u_t = u'' with u(0) = 0, u(1) = 1 is u = x
    assert!((problem.solution().get(0) - 0.5).abs() < 1e-7);
    let lx = problem.compute_solution_vector_local();
    assert!((lx[0] - 0.0).abs() < 1e-7);
    assert!((lx[1] - 0.5).abs() < 1e-7);
    assert!((lx[2] - 1.0).abs() < 1e-7);
}

#[test]
fn fixed_step_count_march_matches_steady_solve() {
    let mut problem = heat_problem();
    let config = TransientConfig {
        scheme: TimeScheme::BackwardEuler,
        start_time: 0.0,
        end_time: None,
        num_steps: Some(4),
        dt: 5.0,
    };
    let mut ts = TransientSolver::new(config, NonlinearConfig::default()).unwrap();
    ts.solve(&mut problem, &NativeBackend::new()).unwrap();
    assert_eq!(ts.converged_reason(), TimeConvergedReason::ConvergedIts);
    assert!((problem.solution().get(0) - 0.5).abs() < 1e-7);
}

#[test]
fn crank_nicolson_settles_on_steady_state() {
    let mut problem = heat_problem();
    let config = TransientConfig {
        scheme: TimeScheme::CrankNicolson,
        start_time: 0.0,
        end_time: Some(2.0),
        num_steps: None,
        dt: 0.1,
    };
    let mut ts = TransientSolver::new(config, NonlinearConfig::default()).unwrap();
    ts.solve(&mut problem, &NativeBackend::new()).unwrap();
    assert!(ts.converged_reason().is_converged());
    assert!((problem.solution().get(0) - 0.5).abs() < 1e-6);
}

#[test]
fn invalid_time_options_are_rejected_before_solving() {
    let config = TransientConfig {
        scheme: TimeScheme::BackwardEuler,
        start_time: 0.0,
        end_time: Some(20.0),
        num_steps: Some(2),
        dt: 5.0,
    };
    let err = TransientSolver::new(config, NonlinearConfig::default()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("'end_time'") && msg.contains("'num_steps'"));
}
