//! Loading of marked parent meshes from Gmsh MSH 4.1 files.
//!
//! Cells of the highest dimension present become the parent mesh cells, and cells of one
//! dimension lower become marked facets. Markers are the first physical tag of the Gmsh
//! entity an element belongs to, or zero for entities without physical tags.
use crate::mesh::{ParentMesh, SimplexMesh};
use eyre::{eyre, Context};
use nalgebra::Point3;
use rustc_hash::FxHashMap;
use std::path::Path;

/// Loads a [`ParentMesh`] from a Gmsh MSH file at the given path.
pub fn load_parent_mesh_from_msh_file(file_path: impl AsRef<Path>) -> eyre::Result<ParentMesh> {
    let msh_bytes = std::fs::read(file_path).wrap_err("failed to read file")?;
    load_parent_mesh_from_msh_bytes(&msh_bytes).wrap_err("failed to load mesh from msh file")
}

/// Loads a [`ParentMesh`] by parsing the given bytes as a Gmsh MSH file.
pub fn load_parent_mesh_from_msh_bytes(bytes: &[u8]) -> eyre::Result<ParentMesh> {
    let mut msh_file = mshio::parse_msh_bytes(bytes).map_err(|e| eyre!("failed to parse msh file: {}", e))?;

    let msh_nodes = msh_file
        .data
        .nodes
        .take()
        .ok_or_else(|| eyre!("MSH file does not contain nodes"))?;
    let msh_elements = msh_file
        .data
        .elements
        .take()
        .ok_or_else(|| eyre!("MSH file does not contain elements"))?;
    let physical_tags = entity_physical_tags(msh_file.data.entities.as_ref());

    let mut vertices = Vec::new();
    for node_block in &msh_nodes.node_blocks {
        // Vertex indices are derived from node tags, which must be consecutive
        if node_block.node_tags.is_some() {
            return Err(eyre!("node block tags are not consecutive in msh file"));
        }
        vertices.extend(
            node_block
                .nodes
                .iter()
                .map(|node| Point3::new(node.x, node.y, node.z)),
        );
    }

    let simplex_blocks: Vec<_> = msh_elements
        .element_blocks
        .iter()
        .filter_map(|block| simplex_dim(block.element_type).map(|dim| (dim, block)))
        .collect();
    let max_dim = simplex_blocks
        .iter()
        .map(|(dim, _)| *dim)
        .max()
        .ok_or_else(|| eyre!("MSH file does not contain line, triangle or tetrahedron elements"))?;

    let mut connectivity = Vec::new();
    let mut cell_markers = Vec::new();
    let mut facets = Vec::new();
    let mut facet_markers = Vec::new();
    for (dim, block) in simplex_blocks {
        let (target, markers) = if dim == max_dim {
            (&mut connectivity, &mut cell_markers)
        } else if dim + 1 == max_dim {
            (&mut facets, &mut facet_markers)
        } else {
            continue;
        };
        let marker = physical_tags
            .get(&(dim, block.entity_tag))
            .copied()
            .unwrap_or(0);
        for element in &block.elements {
            if element.nodes.len() < dim + 1 {
                return Err(eyre!("not enough nodes in element {}", element.element_tag));
            }
            for node in &element.nodes[..dim + 1] {
                let index = (*node as usize)
                    .checked_sub(1)
                    .filter(|index| *index < vertices.len())
                    .ok_or_else(|| eyre!("element {} references unknown node {}", element.element_tag, node))?;
                target.push(index);
            }
            markers.push(marker);
        }
    }

    let mesh = SimplexMesh::from_vertices_and_connectivity(vertices, connectivity, max_dim);
    ParentMesh::new(mesh, cell_markers, facets, facet_markers).wrap_err("invalid parent mesh")
}

fn simplex_dim(element_type: mshio::ElementType) -> Option<usize> {
    match element_type {
        mshio::ElementType::Lin2 => Some(1),
        mshio::ElementType::Tri3 => Some(2),
        mshio::ElementType::Tet4 => Some(3),
        _ => None,
    }
}

/// Maps `(dimension, entity tag)` to the first physical tag of the entity.
fn entity_physical_tags(entities: Option<&mshio::Entities<i32, f64>>) -> FxHashMap<(usize, i32), i64> {
    let mut tags = FxHashMap::default();
    if let Some(entities) = entities {
        let mut insert = |dim: usize, tag: i32, physical: &[i32]| {
            if let Some(first) = physical.first() {
                tags.insert((dim, tag), *first as i64);
            }
        };
        for curve in &entities.curves {
            insert(1, curve.tag, &curve.physical_tags);
        }
        for surface in &entities.surfaces {
            insert(2, surface.tag, &surface.physical_tags);
        }
        for volume in &entities.volumes {
            insert(3, volume.tag, &volume.physical_tags);
        }
    }
    tags
}
