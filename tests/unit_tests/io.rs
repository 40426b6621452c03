use stubs::io::msh::load_parent_mesh_from_msh_bytes;
use stubs::io::vtk::write_vtk;
use stubs::mesh::ParentMesh;

/// Two triangles covering the unit square, with the bottom and right edges in a physical
/// group of their own.
const SQUARE_MSH: &str = r#"$MeshFormat
4.1 0 8
$EndMeshFormat
$Entities
0 1 1 0
1 0 0 0 1 1 0 1 2 0
1 0 0 0 1 1 0 1 1 0
$EndEntities
$Nodes
1 4 1 4
2 1 0 4
1
2
3
4
0 0 0
1 0 0
1 1 0
0 1 0
$EndNodes
$Elements
2 4 1 4
2 1 2 2
1 1 2 3
2 1 3 4
1 1 1 2
3 1 2
4 2 3
$EndElements
"#;

#[test]
fn msh_physical_tags_become_markers() -> eyre::Result<()> {
    let parent = load_parent_mesh_from_msh_bytes(SQUARE_MSH.as_bytes())?;

    assert_eq!(parent.dimensionality(), 2);
    assert_eq!(parent.mesh().num_vertices(), 4);
    assert_eq!(parent.mesh().num_cells(), 2);
    assert_eq!(parent.cell_markers(), [1, 1]);
    assert_eq!(parent.num_facets(), 2);
    assert_eq!(parent.facet_markers(), [2, 2]);
    assert_eq!(parent.facet(0), [0, 1]);
    assert_eq!(parent.facet(1), [1, 2]);

    let boundary = parent.extract_submesh(1, 2)?;
    assert_eq!(boundary.num_cells(), 2);
    assert_eq!(boundary.num_vertices(), 3);
    Ok(())
}

#[test]
fn coalesced_markers_extract_as_one_region() -> eyre::Result<()> {
    let mut parent = ParentMesh::unit_square(2, 1, 10);
    parent.mark_cells(2, |points| points.iter().all(|p| p.x >= 0.5));
    let left = parent.extract_submesh(2, 1)?.num_cells();
    let right = parent.extract_submesh(2, 2)?.num_cells();

    parent.coalesce_markers(2, &[2], 1)?;
    assert_eq!(parent.extract_submesh(2, 1)?.num_cells(), left + right);
    assert!(parent.extract_submesh(2, 2).is_err());
    assert!(parent.coalesce_markers(0, &[2], 1).is_err());
    Ok(())
}

#[test]
fn vtk_files_are_written_with_point_data() -> eyre::Result<()> {
    let parent = ParentMesh::unit_cube(1, 1, 2);
    let membrane = parent.extract_submesh(2, 2)?;
    let values: Vec<f64> = (0..membrane.num_vertices()).map(|i| i as f64).collect();

    let path = std::env::temp_dir()
        .join("stubs_unit_tests")
        .join("membrane.vtk");
    write_vtk(&path, "membrane", &membrane, &[("B", values.as_slice())])?;
    assert!(path.exists());
    Ok(())
}
