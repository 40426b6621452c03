//! Quadrature rules on simplices in barycentric coordinates.
//!
//! Weights of every rule sum to one, so integrals over a cell are obtained by multiplying
//! with the cell measure.

/// Weights and barycentric points.
pub type QuadraturePair = (Vec<f64>, Vec<Vec<f64>>);

/// A rule that integrates polynomials of degree 2 exactly on a simplex of the given
/// reference dimension.
///
/// # Panics
///
/// Panics if the dimension is not in 1..=3.
pub fn simplex_degree2(reference_dim: usize) -> QuadraturePair {
    match reference_dim {
        1 => {
            let a = 0.5 + 0.5 / 3.0f64.sqrt();
            (vec![0.5, 0.5], vec![vec![a, 1.0 - a], vec![1.0 - a, a]])
        }
        2 => {
            let (a, b) = (2.0 / 3.0, 1.0 / 6.0);
            (
                vec![1.0 / 3.0; 3],
                vec![vec![a, b, b], vec![b, a, b], vec![b, b, a]],
            )
        }
        3 => {
            let (a, b) = (0.5854101966249685, 0.1381966011250105);
            (
                vec![0.25; 4],
                vec![
                    vec![a, b, b, b],
                    vec![b, a, b, b],
                    vec![b, b, a, b],
                    vec![b, b, b, a],
                ],
            )
        }
        _ => panic!("No degree 2 rule for reference dimension {}", reference_dim),
    }
}

/// Vertex (nodal) rule used for point measures: one point per vertex with unit weight.
pub fn vertex_rule(reference_dim: usize) -> QuadraturePair {
    let n = reference_dim + 1;
    let points = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    (vec![1.0; n], points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrate(rule: &QuadraturePair, f: impl Fn(&[f64]) -> f64) -> f64 {
        rule.0.iter().zip(&rule.1).map(|(w, p)| w * f(p)).sum()
    }

    #[test]
    fn degree2_rules_integrate_quadratics() {
        // Average of lambda_0^2 over a d-simplex is 2 / ((d + 1)(d + 2))
        for d in 1..=3 {
            let rule = simplex_degree2(d);
            let exact = 2.0 / ((d as f64 + 1.0) * (d as f64 + 2.0));
            assert!((integrate(&rule, |l| l[0] * l[0]) - exact).abs() < 1e-12);
            let mixed = 1.0 / ((d as f64 + 1.0) * (d as f64 + 2.0));
            assert!((integrate(&rule, |l| l[0] * l[1]) - mixed).abs() < 1e-12);
        }
    }
}
