//! Shape descriptors of a single particle or contact region.
//!
//! Principal axes come from the sample covariance of the point coordinates.
//! Eigenvalues are returned sorted in descending order, with the eigenvector
//! columns permuted to match, so `values[0]` is always the major axis.

use std::f64::consts::PI;
use std::panic::{self, AssertUnwindSafe};

use log::debug;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use parry3d_f64::na as parry_na;
use parry3d_f64::transformation::try_convex_hull;

use crate::error::{Result, StatsError};
use crate::mesh::MassProperties;


/// Relative size of the smallest principal variance below which a point set
/// is treated as flat (or lower dimensional) and has no enclosed hull volume.
const FLATNESS_TOLERANCE: f64 = 1e-12;

/// A derived index that is either computed or undefined because its
/// denominator vanished. Undefined indices are reported as zero in tables.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ShapeIndex {
    Computed(f64),
    #[default]
    NotApplicable,
}

impl ShapeIndex {
    /// `numerator / denominator`, or `NotApplicable` when the denominator is
    /// zero or the quotient is not finite.
    pub fn ratio(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            return ShapeIndex::NotApplicable;
        }
        let value = numerator / denominator;
        if value.is_finite() {
            ShapeIndex::Computed(value)
        } else {
            ShapeIndex::NotApplicable
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            ShapeIndex::Computed(v) => Some(*v),
            ShapeIndex::NotApplicable => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, ShapeIndex::Computed(_))
    }

    /// Legacy table value: zero when not applicable.
    pub fn or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

/// Principal directions (matrix columns) and variances, largest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalAxes {
    pub vectors: Matrix3<f64>,
    pub values: Vector3<f64>,
}

impl Default for PrincipalAxes {
    fn default() -> Self {
        Self {
            vectors: Matrix3::zeros(),
            values: Vector3::zeros(),
        }
    }
}

impl PrincipalAxes {
    /// Unit direction of axis `i` (0 = major).
    pub fn axis(&self, i: usize) -> Vector3<f64> {
        self.vectors.column(i).into_owned()
    }

    /// λ1 / λ0
    pub fn elongation_index(&self) -> ShapeIndex {
        ShapeIndex::ratio(self.values[1], self.values[0])
    }

    /// λ2 / λ1
    pub fn flatness_index(&self) -> ShapeIndex {
        ShapeIndex::ratio(self.values[2], self.values[1])
    }
}

/// Arithmetic mean of the points.
pub fn centroid(points: &[Point3<f64>]) -> Result<Point3<f64>> {
    if points.is_empty() {
        return Err(StatsError::EmptyGeometry("centroid"));
    }
    let sum = points
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, p| acc + p.coords);
    Ok(Point3::from(sum / points.len() as f64))
}

/// Sample covariance (normalised by `n - 1`); zero for a single point.
fn covariance(points: &[Point3<f64>], mean: &Point3<f64>) -> Matrix3<f64> {
    if points.len() < 2 {
        return Matrix3::zeros();
    }
    let scatter = points.iter().fold(Matrix3::<f64>::zeros(), |acc, p| {
        let d = p - mean;
        acc + d * d.transpose()
    });
    scatter / (points.len() - 1) as f64
}

/// PCA of the point coordinates.
pub fn principal_axes(points: &[Point3<f64>]) -> Result<PrincipalAxes> {
    if points.is_empty() {
        return Err(StatsError::EmptyGeometry("principal axes"));
    }
    let mean = centroid(points)?;
    let eigen = SymmetricEigen::new(covariance(points, &mean));

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut axes = PrincipalAxes::default();
    for (dst, &src) in order.iter().enumerate() {
        axes.values[dst] = eigen.eigenvalues[src];
        axes.vectors.set_column(dst, &eigen.eigenvectors.column(src));
    }
    Ok(axes)
}

/// Volume enclosed by the convex hull of the points.
///
/// Fewer than four points, a flat or collinear set, or a hull the
/// triangulator cannot build all give `0.0`.
pub fn convex_hull_volume(points: &[Point3<f64>]) -> f64 {
    hull_mass_properties(points).map_or(0.0, |props| props.volume)
}

/// Mass properties of the convex hull, `None` for degenerate input.
pub fn hull_mass_properties(points: &[Point3<f64>]) -> Option<MassProperties> {
    if points.len() < 4 || is_flat(points) {
        return None;
    }

    let converted: Vec<parry_na::Point3<f64>> = points
        .iter()
        .map(|p| parry_na::Point3::new(p.x, p.y, p.z))
        .collect();

    // the triangulator asserts on some near-degenerate inputs
    let hull = panic::catch_unwind(AssertUnwindSafe(|| try_convex_hull(&converted)));
    let (vertices, triangles) = match hull {
        Ok(Ok(hull)) => hull,
        Ok(Err(e)) => {
            debug!("convex hull of {} points failed: {:?}", points.len(), e);
            return None;
        }
        Err(_) => {
            debug!("convex hull of {} points panicked", points.len());
            return None;
        }
    };

    let vertices: Vec<Point3<f64>> = vertices
        .iter()
        .map(|p| Point3::new(p.x, p.y, p.z))
        .collect();
    let triangles = triangles
        .iter()
        .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize]);

    MassProperties::of_triangles(&vertices, triangles).filter(|props| props.volume > 0.0)
}

fn is_flat(points: &[Point3<f64>]) -> bool {
    match principal_axes(points) {
        Ok(axes) => {
            let largest = axes.values[0];
            !(largest > 0.0) || axes.values[2] <= largest * FLATNESS_TOLERANCE
        }
        Err(_) => true,
    }
}

/// Radius of the sphere with the given volume.
pub fn equivalent_radius(volume: f64) -> f64 {
    (3.0 * volume / (4.0 * PI)).cbrt()
}

/// (36 π V²)^(1/3) / A
pub fn sphericity(volume: f64, surface_area: f64) -> ShapeIndex {
    ShapeIndex::ratio((36.0 * PI * volume * volume).cbrt(), surface_area)
}

/// V / V_hull
pub fn compactness(volume: f64, hull_volume: f64) -> ShapeIndex {
    ShapeIndex::ratio(volume, hull_volume)
}
