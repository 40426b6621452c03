//! Basic procedural mesh generation routines.
use crate::mesh::SimplexMesh;
use nalgebra::Point3;

/// Generates a uniform tetrahedral mesh of the unit cube `[0, 1]^3`.
///
/// Each hexahedral cell is split into six tetrahedra sharing the main diagonal, so that
/// neighboring cells produce conforming faces.
pub fn create_unit_cube_uniform_tet_mesh(cells_per_dim: usize) -> SimplexMesh {
    create_rectangular_uniform_tet_mesh(1.0, 1, 1, 1, cells_per_dim)
}

/// Generates an axis-aligned box `[0, u * ux] x [0, u * uy] x [0, u * uz]` of tetrahedra,
/// where u denotes the unit length and ux, uy and uz the number of units along each axis.
pub fn create_rectangular_uniform_tet_mesh(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    units_z: usize,
    cells_per_unit: usize,
) -> SimplexMesh {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 || units_z == 0 {
        return SimplexMesh::from_vertices_and_connectivity(Vec::new(), Vec::new(), 3);
    }

    let cell_size = unit_length / cells_per_unit as f64;
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let num_cells_z = units_z * cells_per_unit;
    let num_vertices_x = num_cells_x + 1;
    let num_vertices_y = num_cells_y + 1;
    let num_vertices_z = num_cells_z + 1;

    let idx = |i: usize, j: usize, k: usize| (num_vertices_x * num_vertices_y) * k + num_vertices_x * j + i;

    let mut vertices = Vec::new();
    for k in 0..num_vertices_z {
        for j in 0..num_vertices_y {
            for i in 0..num_vertices_x {
                vertices.push(Point3::new(
                    i as f64 * cell_size,
                    j as f64 * cell_size,
                    k as f64 * cell_size,
                ));
            }
        }
    }

    // Kuhn triangulation: one tetrahedron per monotone path from corner 0 to corner 7
    const PATHS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let mut connectivity = Vec::new();
    for k in 0..num_cells_z {
        for j in 0..num_cells_y {
            for i in 0..num_cells_x {
                for path in PATHS {
                    let mut corner = [i, j, k];
                    connectivity.push(idx(corner[0], corner[1], corner[2]));
                    for axis in path {
                        corner[axis] += 1;
                        connectivity.push(idx(corner[0], corner[1], corner[2]));
                    }
                }
            }
        }
    }

    SimplexMesh::from_vertices_and_connectivity(vertices, connectivity, 3)
}

/// Generates a uniform triangle mesh of the unit square `[0, 1]^2` in the plane `z = 0`.
pub fn create_unit_square_uniform_tri_mesh(cells_per_dim: usize) -> SimplexMesh {
    if cells_per_dim == 0 {
        return SimplexMesh::from_vertices_and_connectivity(Vec::new(), Vec::new(), 2);
    }
    let n = cells_per_dim;
    let h = 1.0 / n as f64;
    let idx = |i: usize, j: usize| (n + 1) * j + i;

    let mut vertices = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            vertices.push(Point3::new(i as f64 * h, j as f64 * h, 0.0));
        }
    }

    let mut connectivity = Vec::new();
    for j in 0..n {
        for i in 0..n {
            connectivity.extend_from_slice(&[idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
            connectivity.extend_from_slice(&[idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
        }
    }

    SimplexMesh::from_vertices_and_connectivity(vertices, connectivity, 2)
}

/// Generates a uniform mesh of the unit interval along the x axis.
pub fn create_unit_interval_uniform_mesh(cells: usize) -> SimplexMesh {
    let h = 1.0 / cells.max(1) as f64;
    let vertices = if cells == 0 {
        Vec::new()
    } else {
        (0..=cells).map(|i| Point3::new(i as f64 * h, 0.0, 0.0)).collect()
    };
    let connectivity = (0..cells).flat_map(|i| [i, i + 1]).collect();
    SimplexMesh::from_vertices_and_connectivity(vertices, connectivity, 1)
}
