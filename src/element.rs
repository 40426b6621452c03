//! Linear (P1) simplex elements embedded in three dimensions.
use nalgebra::{DMatrix, Matrix3xX, Point3, Vector3};

/// A segment, triangle or tetrahedron with vertices in 3D.
///
/// The reference dimension is `vertices.len() - 1`, which may be lower than the embedding
/// dimension. Geometric quantities are computed from the metric tensor `J^T J` of the affine
/// map, which makes the same formulas valid for manifold cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplex {
    vertices: Vec<Point3<f64>>,
}

impl Simplex {
    /// # Panics
    ///
    /// Panics unless two to four vertices are given.
    pub fn from_vertices(vertices: &[Point3<f64>]) -> Self {
        assert!(
            (2..=4).contains(&vertices.len()),
            "A simplex needs between two and four vertices."
        );
        Self {
            vertices: vertices.to_vec(),
        }
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn reference_dim(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Jacobian of the affine map from the reference simplex, with columns `x_i - x_0`.
    pub fn jacobian(&self) -> Matrix3xX<f64> {
        let x0 = self.vertices[0];
        Matrix3xX::from_columns(
            &self.vertices[1..]
                .iter()
                .map(|x| x - x0)
                .collect::<Vec<_>>(),
        )
    }

    /// Length, area or volume of the simplex.
    pub fn measure(&self) -> f64 {
        let j = self.jacobian();
        let metric: DMatrix<f64> = j.transpose() * &j;
        let factorial: f64 = (1..=self.reference_dim()).map(|k| k as f64).product();
        metric.determinant().max(0.0).sqrt() / factorial
    }

    /// Gradients of the barycentric coordinates (the P1 basis functions) in the tangent
    /// space of the simplex.
    ///
    /// Returns `None` if the simplex is degenerate.
    pub fn basis_gradients(&self) -> Option<Vec<Vector3<f64>>> {
        let j = self.jacobian();
        let metric: DMatrix<f64> = j.transpose() * &j;
        let metric_inv = metric.try_inverse()?;
        // Columns of J (J^T J)^{-1} are the gradients of lambda_1, ..., lambda_d
        let g = &j * metric_inv;
        let mut gradients = Vec::with_capacity(self.vertices.len());
        let rest: Vec<Vector3<f64>> = g
            .column_iter()
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        gradients.push(-rest.iter().sum::<Vector3<f64>>());
        gradients.extend(rest);
        Some(gradients)
    }

    /// Maps barycentric coordinates to a physical point.
    pub fn map_barycentric(&self, lambda: &[f64]) -> Point3<f64> {
        let coords = self
            .vertices
            .iter()
            .zip(lambda)
            .map(|(x, l)| x.coords * *l)
            .sum::<Vector3<f64>>();
        Point3::from(coords)
    }
}

/// Exact P1 mass matrix entry on a simplex of the given reference dimension and measure.
pub fn p1_mass_entry(reference_dim: usize, measure: f64, a: usize, b: usize) -> f64 {
    let d = reference_dim as f64;
    let diagonal = if a == b { 2.0 } else { 1.0 };
    measure * diagonal / ((d + 1.0) * (d + 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use util::assert_panics;

    #[test]
    fn tetrahedron_gradients_sum_to_zero() {
        let tet = Simplex::from_vertices(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
        ]);
        let gradients = tet.basis_gradients().unwrap();
        let sum: Vector3<f64> = gradients.iter().sum();
        assert!(sum.norm() < 1e-14);
        assert!((gradients[1] - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-14);
        assert!((gradients[2] - Vector3::new(0.0, 0.5, 0.0)).norm() < 1e-14);
        assert!((tet.measure() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn embedded_triangle_measure() {
        let tri = Simplex::from_vertices(&[
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 2.0, 1.0),
            Point3::new(0.0, 0.0, 3.0),
        ]);
        assert!((tri.measure() - 2.0).abs() < 1e-14);
        let gradients = tri.basis_gradients().unwrap();
        // Gradients lie in the plane x = 0
        assert!(gradients.iter().all(|g| g.x.abs() < 1e-14));
    }

    #[test]
    fn p1_mass_rows_sum_to_vertex_share() {
        for d in 1..=3 {
            let row: f64 = (0..=d).map(|b| p1_mass_entry(d, 6.0, 0, b)).sum();
            assert!((row - 6.0 / (d as f64 + 1.0)).abs() < 1e-14);
        }
    }

    #[test]
    fn simplex_vertex_count_is_checked() {
        let points = [Point3::origin(); 5];
        assert_panics!(Simplex::from_vertices(&points[..1]));
        assert_panics!(Simplex::from_vertices(&points));
        assert_eq!(Simplex::from_vertices(&points[..2]).reference_dim(), 1);
    }
}
