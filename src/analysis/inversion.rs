//! Least-squares plane-wave slowness inversion.
//!
//! For a plane wave crossing the array, the lag between stations `i` and `j`
//! is the projection of the slowness vector on their offset. Stacking one row
//! per measured pair gives an overdetermined 2-unknown system, solved through
//! the normal equations.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::analysis::association::Combination;
use crate::geometry::{ArrayGeometry, wrap_degrees};
use crate::model::{ArrayDetection, PairwiseMeasurement};

/// `det(DᵗD) / trace(DᵗD)²` below this is treated as colinear geometry.
const CONDITION_FLOOR: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq)]
pub enum InversionError {
    /// Fewer than two measured pairs inside the combination.
    TooFewPairs(usize),
    /// Station offsets do not span the plane.
    Singular,
    /// The solution has zero or non-finite slowness.
    DegenerateSlowness,
}

impl fmt::Display for InversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InversionError::TooFewPairs(n) => write!(f, "only {} pair(s) to invert", n),
            InversionError::Singular => write!(f, "array geometry is singular for these pairs"),
            InversionError::DegenerateSlowness => write!(f, "zero or non-finite slowness"),
        }
    }
}

impl std::error::Error for InversionError {}

/// Inverts the pairs of `combination` for velocity and backazimuth.
///
/// Each row is the `(north, east)` offset in km from station `i` to `j`;
/// the data is `t_i − t_j` in seconds. The solution is the slowness vector
/// pointing back toward the source.
pub fn invert(
    combination: &Combination,
    measurements: &[PairwiseMeasurement],
    geometry: &ArrayGeometry,
) -> Result<ArrayDetection, InversionError> {
    let used: Vec<&PairwiseMeasurement> = measurements
        .iter()
        .filter(|m| m.i < m.j && combination.contains_pair(m.i, m.j))
        .collect();
    let rows = used.len();
    if rows < 2 {
        return Err(InversionError::TooFewPairs(rows));
    }

    let mut design = DMatrix::<f64>::zeros(rows, 2);
    let mut lags = DVector::<f64>::zeros(rows);
    for (r, m) in used.iter().enumerate() {
        let (north, east) = geometry.offset_km(m.i, m.j);
        design[(r, 0)] = north;
        design[(r, 1)] = east;
        lags[r] = m.lag_seconds;
    }

    let normal = design.transpose() * &design;
    let trace = normal[(0, 0)] + normal[(1, 1)];
    if trace <= 0.0 || normal.determinant() / (trace * trace) < CONDITION_FLOOR {
        return Err(InversionError::Singular);
    }
    let inverse = normal.try_inverse().ok_or(InversionError::Singular)?;
    let slowness = inverse * design.transpose() * &lags;
    let (s_north, s_east) = (slowness[0], slowness[1]);

    let magnitude = s_north.hypot(s_east);
    if magnitude == 0.0 || !magnitude.is_finite() {
        return Err(InversionError::DegenerateSlowness);
    }

    let residual = &lags - &design * &slowness;
    let rms = (residual.norm_squared() / rows as f64).sqrt();

    Ok(ArrayDetection {
        velocity: 1.0 / magnitude,
        backazimuth: wrap_degrees(s_east.atan2(s_north).to_degrees()),
        rms,
    })
}
