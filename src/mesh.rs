//! Simplex meshes embedded in three dimensions.
//!
//! Every compartment of a model lives on a [`SimplexMesh`] extracted from a common
//! [`ParentMesh`]. Vertices of a submesh remember the index of the parent vertex they were
//! extracted from, which is how values are transferred between compartments of different
//! dimension.
use crate::element::Simplex;
use crate::error::ModelError;
use nalgebra::Point3;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub mod procedural;

/// A mesh of simplices (segments, triangles or tetrahedra) with vertices in 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexMesh {
    vertices: Vec<Point3<f64>>,
    // Flat cell connectivity, `topological_dim + 1` vertex indices per cell
    connectivity: Vec<usize>,
    topological_dim: usize,
    parent_vertex_indices: Vec<usize>,
}

impl SimplexMesh {
    /// Creates a mesh from vertices and flat connectivity.
    ///
    /// Each vertex is its own parent vertex.
    ///
    /// # Panics
    ///
    /// Panics if the dimension is not in 1..=3, if the connectivity length is not a multiple of
    /// the number of vertices per cell, or if a cell references a vertex out of bounds.
    pub fn from_vertices_and_connectivity(
        vertices: Vec<Point3<f64>>,
        connectivity: Vec<usize>,
        topological_dim: usize,
    ) -> Self {
        assert!(
            (1..=3).contains(&topological_dim),
            "Topological dimension must be 1, 2 or 3."
        );
        assert_eq!(
            connectivity.len() % (topological_dim + 1),
            0,
            "Connectivity length must be a multiple of the number of vertices per cell."
        );
        assert!(
            connectivity.iter().all(|i| *i < vertices.len()),
            "Cell references vertex out of bounds."
        );
        let parent_vertex_indices = (0..vertices.len()).collect();
        Self {
            vertices,
            connectivity,
            topological_dim,
            parent_vertex_indices,
        }
    }

    /// Replaces the parent vertex indices.
    ///
    /// # Panics
    ///
    /// Panics if the number of indices does not match the number of vertices.
    pub fn with_parent_vertex_indices(mut self, parent_vertex_indices: Vec<usize>) -> Self {
        assert_eq!(parent_vertex_indices.len(), self.vertices.len());
        self.parent_vertex_indices = parent_vertex_indices;
        self
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn topological_dim(&self) -> usize {
        self.topological_dim
    }

    pub fn vertices_per_cell(&self) -> usize {
        self.topological_dim + 1
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len() / self.vertices_per_cell()
    }

    pub fn connectivity(&self) -> &[usize] {
        &self.connectivity
    }

    pub fn cell(&self, index: usize) -> &[usize] {
        let n = self.vertices_per_cell();
        &self.connectivity[n * index..n * (index + 1)]
    }

    pub fn cells(&self) -> impl '_ + ExactSizeIterator<Item = &[usize]> {
        self.connectivity.chunks_exact(self.vertices_per_cell())
    }

    /// Index of each vertex in the parent mesh.
    pub fn parent_vertex_indices(&self) -> &[usize] {
        &self.parent_vertex_indices
    }

    pub fn simplex(&self, cell_index: usize) -> Simplex {
        let points: Vec<_> = self
            .cell(cell_index)
            .iter()
            .map(|i| self.vertices[*i])
            .collect();
        Simplex::from_vertices(&points)
    }

    /// Total length, area or volume of the mesh.
    pub fn measure(&self) -> f64 {
        (0..self.num_cells())
            .map(|i| self.simplex(i).measure())
            .sum()
    }

    /// Returns a new mesh in which only the given cells are kept.
    ///
    /// Vertices are relabeled in ascending order of their original index, and parent indices
    /// are carried over.
    pub fn keep_cells(&self, cell_indices: &[usize]) -> Self {
        let mut keep = vec![false; self.vertices.len()];
        for cell_index in cell_indices {
            for v in self.cell(*cell_index) {
                keep[*v] = true;
            }
        }
        let kept: Vec<usize> = (0..self.vertices.len()).filter(|i| keep[*i]).collect();
        let relabel: FxHashMap<usize, usize> = kept
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new))
            .collect();

        let connectivity = cell_indices
            .iter()
            .flat_map(|c| self.cell(*c).iter().map(|v| relabel[v]))
            .collect();
        let vertices = kept.iter().map(|i| self.vertices[*i]).collect();
        let parents = kept
            .iter()
            .map(|i| self.parent_vertex_indices[*i])
            .collect();

        SimplexMesh::from_vertices_and_connectivity(vertices, connectivity, self.topological_dim)
            .with_parent_vertex_indices(parents)
    }

    /// Finds facets that belong to exactly one cell.
    ///
    /// Facets are returned as sorted vertex index lists.
    pub fn find_boundary_facets(&self) -> Vec<Vec<usize>> {
        let mut facet_counts: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        for cell in self.cells() {
            for skip in 0..cell.len() {
                let mut facet: Vec<usize> = cell
                    .iter()
                    .enumerate()
                    .filter(|(local, _)| *local != skip)
                    .map(|(_, v)| *v)
                    .collect();
                facet.sort_unstable();
                *facet_counts.entry(facet).or_insert(0) += 1;
            }
        }
        facet_counts
            .into_iter()
            .filter(|(_, count)| *count == 1)
            .map(|(facet, _)| facet)
            .collect()
    }
}

/// The mesh from which all compartment meshes are extracted.
///
/// Cells of the highest dimension carry a cell marker, and a subset of their facets carry a
/// facet marker. Lower-dimensional compartments are identified by facet markers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentMesh {
    mesh: SimplexMesh,
    cell_markers: Vec<i64>,
    facets: Vec<usize>,
    facet_markers: Vec<i64>,
}

impl ParentMesh {
    pub fn new(
        mesh: SimplexMesh,
        cell_markers: Vec<i64>,
        facets: Vec<usize>,
        facet_markers: Vec<i64>,
    ) -> Result<Self, ModelError> {
        let dim = mesh.topological_dim();
        if cell_markers.len() != mesh.num_cells() {
            return Err(ModelError::Mesh(format!(
                "expected {} cell markers, got {}",
                mesh.num_cells(),
                cell_markers.len()
            )));
        }
        if facets.len() % dim != 0 || facets.len() / dim != facet_markers.len() {
            return Err(ModelError::Mesh(format!(
                "{} facet markers do not match facet connectivity of length {}",
                facet_markers.len(),
                facets.len()
            )));
        }
        if facets.iter().any(|v| *v >= mesh.num_vertices()) {
            return Err(ModelError::Mesh("facet references vertex out of bounds".to_string()));
        }
        Ok(Self {
            mesh,
            cell_markers,
            facets,
            facet_markers,
        })
    }

    /// A parent mesh in which every cell has `cell_marker` and every boundary facet has
    /// `boundary_marker`.
    pub fn from_mesh_with_boundary(mesh: SimplexMesh, cell_marker: i64, boundary_marker: i64) -> Self {
        let cell_markers = vec![cell_marker; mesh.num_cells()];
        let boundary = mesh.find_boundary_facets();
        let facet_markers = vec![boundary_marker; boundary.len()];
        let facets = boundary.into_iter().flatten().collect();
        Self {
            mesh,
            cell_markers,
            facets,
            facet_markers,
        }
    }

    /// Tetrahedral unit cube with all boundary faces marked `boundary_marker`.
    pub fn unit_cube(cells_per_dim: usize, cell_marker: i64, boundary_marker: i64) -> Self {
        let mesh = procedural::create_unit_cube_uniform_tet_mesh(cells_per_dim);
        Self::from_mesh_with_boundary(mesh, cell_marker, boundary_marker)
    }

    /// Triangulated unit square with all boundary edges marked `boundary_marker`.
    pub fn unit_square(cells_per_dim: usize, cell_marker: i64, boundary_marker: i64) -> Self {
        let mesh = procedural::create_unit_square_uniform_tri_mesh(cells_per_dim);
        Self::from_mesh_with_boundary(mesh, cell_marker, boundary_marker)
    }

    pub fn mesh(&self) -> &SimplexMesh {
        &self.mesh
    }

    pub fn dimensionality(&self) -> usize {
        self.mesh.topological_dim()
    }

    pub fn cell_markers(&self) -> &[i64] {
        &self.cell_markers
    }

    pub fn facet_markers(&self) -> &[i64] {
        &self.facet_markers
    }

    pub fn num_facets(&self) -> usize {
        self.facet_markers.len()
    }

    pub fn facet(&self, index: usize) -> &[usize] {
        let n = self.dimensionality();
        &self.facets[n * index..n * (index + 1)]
    }

    /// Sets the marker of every facet whose vertex positions satisfy `predicate`.
    pub fn mark_facets(&mut self, marker: i64, predicate: impl Fn(&[Point3<f64>]) -> bool) {
        for index in 0..self.num_facets() {
            let points: Vec<_> = self
                .facet(index)
                .iter()
                .map(|v| self.mesh.vertices()[*v])
                .collect();
            if predicate(&points) {
                self.facet_markers[index] = marker;
            }
        }
    }

    /// Sets the marker of every cell whose vertex positions satisfy `predicate`.
    pub fn mark_cells(&mut self, marker: i64, predicate: impl Fn(&[Point3<f64>]) -> bool) {
        for index in 0..self.mesh.num_cells() {
            let points: Vec<_> = self
                .mesh
                .cell(index)
                .iter()
                .map(|v| self.mesh.vertices()[*v])
                .collect();
            if predicate(&points) {
                self.cell_markers[index] = marker;
            }
        }
    }

    /// Replaces every marker in `markers` by `target` on the entities of dimension `dim`.
    ///
    /// Compartments spanning several marker values are extracted through a single marker
    /// after coalescing.
    pub fn coalesce_markers(&mut self, dim: usize, markers: &[i64], target: i64) -> Result<(), ModelError> {
        let max_dim = self.dimensionality();
        let entity_markers = if dim == max_dim {
            &mut self.cell_markers
        } else if dim + 1 == max_dim {
            &mut self.facet_markers
        } else {
            return Err(ModelError::Mesh(format!(
                "parent mesh of dimension {} has no markers of dimension {}",
                max_dim, dim
            )));
        };
        for marker in entity_markers.iter_mut() {
            if markers.contains(marker) {
                *marker = target;
            }
        }
        Ok(())
    }

    /// Extracts the cells of dimension `dim` carrying `marker`.
    ///
    /// Cells of the parent's own dimension are selected by cell marker, cells of one dimension
    /// lower by facet marker.
    pub fn extract_submesh(&self, dim: usize, marker: i64) -> Result<SimplexMesh, ModelError> {
        let max_dim = self.dimensionality();
        let submesh = if dim == max_dim {
            let cells: Vec<usize> = (0..self.mesh.num_cells())
                .filter(|c| self.cell_markers[*c] == marker)
                .collect();
            self.mesh.keep_cells(&cells)
        } else if dim >= 1 && dim + 1 == max_dim {
            let facets: Vec<usize> = (0..self.num_facets())
                .filter(|f| self.facet_markers[*f] == marker)
                .collect();
            let facet_mesh = SimplexMesh::from_vertices_and_connectivity(
                self.mesh.vertices().to_vec(),
                facets.iter().flat_map(|f| self.facet(*f).to_vec()).collect(),
                dim,
            );
            let all: Vec<usize> = (0..facets.len()).collect();
            facet_mesh.keep_cells(&all)
        } else {
            return Err(ModelError::Mesh(format!(
                "can not extract a submesh of dimension {} from a parent mesh of dimension {}",
                dim, max_dim
            )));
        };

        if submesh.num_cells() == 0 {
            return Err(ModelError::Mesh(format!(
                "no cells of dimension {} carry marker {}",
                dim, marker
            )));
        }
        Ok(submesh)
    }
}
