//! VTK legacy writer.
//!
//! Exports the mesh with one scalar field of nodal values for ParaView.
//! The ASCII legacy format is split into header, points, cells and point
//! data sections.

use crate::Result;
use fem_mesh::{ElementType, Mesh};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// VTK cell-type codes
fn vtk_cell_type(etype: ElementType) -> u8 {
    match etype {
        ElementType::Point => 1,
        ElementType::Edge2 => 3,
        ElementType::Tri3 => 5,
        ElementType::Quad4 => 9,
        ElementType::Tet4 => 10,
        ElementType::Hex8 => 12,
        ElementType::Prism6 => 13,
    }
}

/// Write the mesh and a nodal scalar field in VTK legacy ASCII format.
///
/// `values` holds one value per vertex, in vertex order.
pub fn write_vtk(path: impl AsRef<Path>, mesh: &Mesh, name: &str, values: &[f64]) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    write_header(&mut w)?;
    write_points(&mut w, mesh)?;
    write_cells(&mut w, mesh)?;
    write_point_data(&mut w, mesh, name, values)?;
    Ok(())
}

fn write_header(w: &mut impl Write) -> Result<()> {
    writeln!(w, "# vtk DataFile Version 3.0")?;
    writeln!(w, "fem solution")?;
    writeln!(w, "ASCII")?;
    writeln!(w, "DATASET UNSTRUCTURED_GRID")?;
    Ok(())
}

fn write_points(w: &mut impl Write, mesh: &Mesh) -> Result<()> {
    writeln!(w, "POINTS {} double", mesh.num_vertices())?;
    for v in mesh.vertex_range() {
        let c = mesh.vertex_coords(v);
        let mut xyz = [0.0; 3];
        xyz[..c.len()].copy_from_slice(c);
        writeln!(w, "{} {} {}", xyz[0], xyz[1], xyz[2])?;
    }
    Ok(())
}

fn write_cells(w: &mut impl Write, mesh: &Mesh) -> Result<()> {
    let n_cells = mesh.num_cells();
    let corners = mesh.cell_type().num_vertices();
    writeln!(w, "CELLS {} {}", n_cells, n_cells * (corners + 1))?;
    let vertex_start = mesh.vertex_range().start;
    for c in mesh.all_cells() {
        let mut line = format!("{}", corners);
        for &v in mesh.cell_vertices(c) {
            line.push_str(&format!(" {}", v - vertex_start));
        }
        writeln!(w, "{}", line)?;
    }
    writeln!(w, "CELL_TYPES {}", n_cells)?;
    let code = vtk_cell_type(mesh.cell_type());
    for _ in 0..n_cells {
        writeln!(w, "{}", code)?;
    }
    Ok(())
}

fn write_point_data(w: &mut impl Write, mesh: &Mesh, name: &str, values: &[f64]) -> Result<()> {
    writeln!(w, "POINT_DATA {}", mesh.num_vertices())?;
    writeln!(w, "SCALARS {} double 1", name)?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for v in values.iter().take(mesh.num_vertices()) {
        writeln!(w, "{}", v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_line_mesh() {
        let mesh = Mesh::line_mesh(&[0.0, 0.5, 1.0]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vtk");
        write_vtk(&path, &mesh, "u", &[0.0, 0.25, 1.0]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("POINTS 3 double"));
        assert!(text.contains("CELLS 2 6"));
        assert!(text.contains("CELL_TYPES 2"));
        assert!(text.contains("SCALARS u double 1"));
        assert!(text.contains("0.25"));
    }

    #[test]
    fn cell_type_codes() {
        assert_eq!(vtk_cell_type(ElementType::Tri3), 5);
        assert_eq!(vtk_cell_type(ElementType::Tet4), 10);
        assert_eq!(vtk_cell_type(ElementType::Hex8), 12);
    }
}
