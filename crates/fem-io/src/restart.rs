//! JSON restart snapshots.
//!
//! A restart file stores the distributed solution values plus the field
//! names and polynomial orders and a mesh fingerprint, which is enough to
//! rebuild a compatible DOF layout. Loading validates compatibility and
//! refuses mismatched meshes or field stacks.

use crate::{IoError, Result};
use fem_mesh::Mesh;
use fem_solver::{FeProblem, Vector};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartField {
    pub name: String,
    pub order: usize,
}

/// Persisted solver state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartState {
    pub mesh_fingerprint: u64,
    pub fields: Vec<RestartField>,
    pub time: f64,
    pub solution: Vec<f64>,
}

/// Topology + coordinate fingerprint of a mesh
pub fn mesh_fingerprint(mesh: &Mesh) -> u64 {
    let mut h = DefaultHasher::new();
    mesh.dim().hash(&mut h);
    mesh.num_cells().hash(&mut h);
    mesh.num_vertices().hash(&mut h);
    for c in mesh.all_cells() {
        mesh.cell_vertices(c).hash(&mut h);
    }
    for v in mesh.vertex_range() {
        for x in mesh.vertex_coords(v) {
            x.to_bits().hash(&mut h);
        }
    }
    h.finish()
}

/// Snapshot the problem state at `time`
pub fn save_restart(
    path: impl AsRef<Path>,
    problem: &FeProblem,
    fields: &[RestartField],
    time: f64,
) -> Result<()> {
    let state = RestartState {
        mesh_fingerprint: mesh_fingerprint(problem.mesh()),
        fields: fields.to_vec(),
        time,
        solution: problem.solution().as_slice().to_vec(),
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(file, &state)?;
    Ok(())
}

/// Load a snapshot and install the solution into a compatible problem
pub fn load_restart(
    path: impl AsRef<Path>,
    problem: &mut FeProblem,
    fields: &[RestartField],
) -> Result<f64> {
    let file = std::fs::File::open(path)?;
    let state: RestartState = serde_json::from_reader(file)?;
    if state.mesh_fingerprint != mesh_fingerprint(problem.mesh()) {
        return Err(IoError::Incompatible(
            "mesh fingerprint does not match".into(),
        ));
    }
    if state.fields.len() != fields.len()
        || state
            .fields
            .iter()
            .zip(fields)
            .any(|(a, b)| a.name != b.name || a.order != b.order)
    {
        return Err(IoError::Incompatible(
            "field names or polynomial orders do not match".into(),
        ));
    }
    if state.solution.len() != problem.get_dof_count() {
        return Err(IoError::Incompatible(format!(
            "solution length {} does not match the DOF layout ({})",
            state.solution.len(),
            problem.get_dof_count()
        )));
    }
    problem.set_solution(Vector::from_vec(state.solution));
    Ok(state.time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_problem() -> FeProblem {
        let mesh = Arc::new(Mesh::line_mesh(&[0.0, 0.5, 1.0]).unwrap());
        let mut problem = FeProblem::new(mesh);
        problem.add_fe("u", 1, 1).unwrap();
        problem.create().unwrap();
        problem
    }

    #[test]
    fn round_trip() {
        let mut problem = make_problem();
        problem.set_solution(Vector::from_vec(vec![1.0, 2.0, 3.0]));
        let fields = [RestartField {
            name: "u".into(),
            order: 1,
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        save_restart(&path, &problem, &fields, 7.5).unwrap();

        let mut other = make_problem();
        let time = load_restart(&path, &mut other, &fields).unwrap();
        assert_eq!(time, 7.5);
        assert_eq!(other.solution().as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn rejects_mismatched_fields() {
        let problem = make_problem();
        let fields = [RestartField {
            name: "u".into(),
            order: 1,
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        save_restart(&path, &problem, &fields, 0.0).unwrap();

        let mut other = make_problem();
        let wrong = [RestartField {
            name: "temperature".into(),
            order: 1,
        }];
        assert!(load_restart(&path, &mut other, &wrong).is_err());
    }

    #[test]
    fn rejects_mismatched_mesh() {
        let problem = make_problem();
        let fields = [RestartField {
            name: "u".into(),
            order: 1,
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        save_restart(&path, &problem, &fields, 0.0).unwrap();

        let mesh = Arc::new(Mesh::line_mesh(&[0.0, 0.4, 1.0]).unwrap());
        let mut other = FeProblem::new(mesh);
        other.add_fe("u", 1, 1).unwrap();
        other.create().unwrap();
        assert!(load_restart(&path, &mut other, &fields).is_err());
    }
}
