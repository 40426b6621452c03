//! Legacy VTK output of compartment meshes with per-vertex species values.
use crate::mesh::SimplexMesh;
use eyre::eyre;
use std::path::Path;
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataArray, DataSet, ElementType, Piece, UnstructuredGridPiece,
    Version, VertexNumbers, Vtk,
};

fn cell_type(topological_dim: usize) -> eyre::Result<CellType> {
    match topological_dim {
        1 => Ok(CellType::Line),
        2 => Ok(CellType::Triangle),
        3 => Ok(CellType::Tetra),
        dim => Err(eyre!("no VTK cell type for simplices of dimension {}", dim)),
    }
}

/// Builds an unstructured grid of `mesh` with one scalar point attribute per entry of
/// `point_data`.
pub fn create_vtk_data_set(mesh: &SimplexMesh, point_data: &[(&str, &[f64])]) -> eyre::Result<DataSet> {
    let points: Vec<f64> = mesh
        .vertices()
        .iter()
        .flat_map(|v| v.coords.iter().copied())
        .collect();

    // Laid out as N, i_1, ..., i_N per cell
    let mut vertices = Vec::with_capacity(mesh.num_cells() * (mesh.vertices_per_cell() + 1));
    for cell in mesh.cells() {
        vertices.push(u32::try_from(cell.len())?);
        for index in cell {
            vertices.push(u32::try_from(*index)?);
        }
    }
    let types = vec![cell_type(mesh.topological_dim())?; mesh.num_cells()];

    let mut point_attributes = Vec::with_capacity(point_data.len());
    for (name, values) in point_data {
        if values.len() != mesh.num_vertices() {
            return Err(eyre!(
                "point data {} has {} values for {} vertices",
                name,
                values.len(),
                mesh.num_vertices()
            ));
        }
        point_attributes.push(Attribute::DataArray(DataArray {
            name: name.to_string(),
            elem: ElementType::Scalars {
                num_comp: 1,
                lookup_table: None,
            },
            data: values.to_vec().into(),
        }));
    }

    let piece = UnstructuredGridPiece {
        points: points.into(),
        cells: Cells {
            cell_verts: VertexNumbers::Legacy {
                num_cells: u32::try_from(mesh.num_cells())?,
                vertices,
            },
            types,
        },
        data: Attributes {
            point: point_attributes,
            cell: Vec::new(),
        },
    };

    Ok(DataSet::UnstructuredGrid {
        meta: None,
        pieces: vec![Piece::Inline(Box::new(piece))],
    })
}

/// Writes `mesh` and its point data to a legacy VTK file, creating parent directories.
pub fn write_vtk(
    path: impl AsRef<Path>,
    title: impl Into<String>,
    mesh: &SimplexMesh,
    point_data: &[(&str, &[f64])],
) -> eyre::Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let data = create_vtk_data_set(mesh, point_data)?;
    Vtk {
        version: Version { major: 4, minor: 1 },
        title: title.into(),
        byte_order: ByteOrder::BigEndian,
        data,
        file_path: None,
    }
    .export(path)
    .map_err(|err| eyre!("failed to write VTK file {}: {}", path.display(), err))?;
    Ok(())
}
