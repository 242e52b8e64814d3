//! Groups the trees of a forest by how close their answers are to the
//! forest's average answer.

use crate::dialect::Dialect;
use crate::reducer::MembershipVector;
use crate::table;
use crate::ForestError;
use rustc_hash::FxHashMap;
use std::path::Path;

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// n-dimensional ball; a point on the boundary is inside.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperSphere {
    pub center: Vec<f64>,
    pub radius: f64,
}

impl HyperSphere {
    pub fn new(center: Vec<f64>, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn dimension(&self) -> usize {
        self.center.len()
    }

    pub fn distance(&self, point: &[f64]) -> f64 {
        euclidean(&self.center, point)
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dimension() && self.distance(point) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeCluster {
    pub tree: String,
    pub distance: f64,
    pub core: bool,
}

/// Sphere centred on the mean point with the mean distance as radius.
pub fn forest_sphere(points: &[Vec<f64>]) -> Option<HyperSphere> {
    let first = points.first()?;
    let mut center = vec![0.0; first.len()];
    for point in points {
        for (c, x) in center.iter_mut().zip(point) {
            *c += x;
        }
    }
    let n = points.len() as f64;
    center.iter_mut().for_each(|c| *c /= n);

    let radius = points.iter().map(|p| euclidean(&center, p)).sum::<f64>() / n;
    Some(HyperSphere::new(center, radius))
}

/// Labels every tree as core (inside the forest sphere) or outlier.
pub fn cluster_trees(trees: &[(String, Vec<f64>)]) -> Vec<TreeCluster> {
    let points: Vec<Vec<f64>> = trees.iter().map(|(_, p)| p.clone()).collect();
    let Some(sphere) = forest_sphere(&points) else {
        return Vec::new();
    };
    trees
        .iter()
        .map(|(tree, point)| TreeCluster {
            tree: tree.clone(),
            distance: sphere.distance(point),
            core: sphere.contains(point),
        })
        .collect()
}

/// A tree's position: its true-class degree for each instance in
/// `identifiers` order. Unreported degrees count as 0.
pub fn tree_point(vector: &MembershipVector, identifiers: &[u64]) -> Result<Vec<f64>, ForestError> {
    let degrees: FxHashMap<u64, f64> = vector
        .rows
        .iter()
        .map(|row| (row.id, vector.degree(row, &row.true_class).unwrap_or(0.0)))
        .collect();
    identifiers
        .iter()
        .map(|id| {
            degrees
                .get(id)
                .copied()
                .ok_or_else(|| ForestError::Reduction(format!("no {} result for instance {}", vector.tnorm, id)))
        })
        .collect()
}

pub fn write_clusters(path: &Path, dialect: &Dialect, clusters: &[TreeCluster]) -> Result<usize, ForestError> {
    table::write_rows(
        path,
        dialect,
        clusters.iter().map(|c| {
            [
                c.tree.clone(),
                c.distance.to_string(),
                if c.core { "1" } else { "0" }.to_string(),
            ]
        }),
    )
}
