//! Lens distortion models and the pinhole intrinsics view.

mod pinhole_camera;
pub use pinhole_camera::PinholeIntrinsics;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::toolkit::SolveFlags;

/// One named distortion coefficient in the toolkit's output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientName {
    /// Short symbol, e.g. `k1`.
    pub symbol: &'static str,
    /// Record key combining symbol and meaning, e.g. `k1_radial_1`.
    pub key: &'static str,
    /// Human-readable meaning, e.g. `radial 1`.
    pub meaning: &'static str,
}

const fn coeff(symbol: &'static str, key: &'static str, meaning: &'static str) -> CoefficientName {
    CoefficientName {
        symbol,
        key,
        meaning,
    }
}

/// All coefficients in solver output order. Every model uses a prefix.
const COEFFICIENT_NAMES: [CoefficientName; 14] = [
    coeff("k1", "k1_radial_1", "radial 1"),
    coeff("k2", "k2_radial_2", "radial 2"),
    coeff("p1", "p1_tangential_1", "tangential 1"),
    coeff("p2", "p2_tangential_2", "tangential 2"),
    coeff("k3", "k3_radial_3", "radial 3"),
    coeff("k4", "k4_radial_4", "radial 4"),
    coeff("k5", "k5_radial_5", "radial 5"),
    coeff("k6", "k6_radial_6", "radial 6"),
    coeff("s1", "s1_thin_prism_1", "thin prism 1"),
    coeff("s2", "s2_thin_prism_2", "thin prism 2"),
    coeff("s3", "s3_thin_prism_3", "thin prism 3"),
    coeff("s4", "s4_thin_prism_4", "thin prism 4"),
    coeff("tau_x", "tau_x_tilt_x", "sensor tilt x"),
    coeff("tau_y", "tau_y_tilt_y", "sensor tilt y"),
];

/// Distortion model complexity handed to the calibration solve.
///
/// The solve flags and the coefficient-name table both come from the variant,
/// so they can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    /// k1 k2 p1 p2 k3.
    Standard,
    /// Standard plus k4 k5 k6.
    Rational,
    /// Rational plus s1..s4.
    ThinPrism,
    /// Thin prism plus tau_x tau_y.
    Tilted,
}

impl DistortionModel {
    pub const ALL: [DistortionModel; 4] = [
        DistortionModel::Standard,
        DistortionModel::Rational,
        DistortionModel::ThinPrism,
        DistortionModel::Tilted,
    ];

    /// Exact lookup by coefficient count.
    pub fn from_coeff_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.coeff_count() == count)
    }

    /// Lookup by coefficient count, falling back to [`DistortionModel::Standard`]
    /// with a warning for unsupported counts.
    pub fn select(requested: usize) -> Self {
        Self::from_coeff_count(requested).unwrap_or_else(|| {
            log::warn!(
                "unsupported distortion coefficient count {requested}, \
                 falling back to {}",
                DistortionModel::Standard.coeff_count()
            );
            DistortionModel::Standard
        })
    }

    pub const fn coeff_count(&self) -> usize {
        match self {
            DistortionModel::Standard => 5,
            DistortionModel::Rational => 8,
            DistortionModel::ThinPrism => 12,
            DistortionModel::Tilted => 14,
        }
    }

    pub fn solve_flags(&self) -> SolveFlags {
        match self {
            DistortionModel::Standard => SolveFlags::empty(),
            DistortionModel::Rational => SolveFlags::RATIONAL_MODEL,
            DistortionModel::ThinPrism => SolveFlags::RATIONAL_MODEL | SolveFlags::THIN_PRISM_MODEL,
            DistortionModel::Tilted => {
                SolveFlags::RATIONAL_MODEL | SolveFlags::THIN_PRISM_MODEL | SolveFlags::TILTED_MODEL
            }
        }
    }

    pub fn coefficient_names(&self) -> &'static [CoefficientName] {
        &COEFFICIENT_NAMES[..self.coeff_count()]
    }

    /// Pair each returned coefficient with its name.
    ///
    /// Solvers may return fewer values than the model count; only
    /// `min(values, names)` pairs are produced.
    pub fn name_coefficients<'a>(
        &self,
        values: &'a [f64],
    ) -> impl Iterator<Item = (&'static CoefficientName, f64)> + 'a {
        self.coefficient_names().iter().zip(values.iter().copied())
    }
}

impl fmt::Display for DistortionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistortionModel::Standard => "standard",
            DistortionModel::Rational => "rational",
            DistortionModel::ThinPrism => "thin prism",
            DistortionModel::Tilted => "tilted",
        };
        write!(f, "{name} ({} coefficients)", self.coeff_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_counts_round_trip() {
        for count in [5, 8, 12, 14] {
            let model = DistortionModel::select(count);
            assert_eq!(model.coeff_count(), count);
            assert_eq!(model.coefficient_names().len(), count);
            assert_eq!(DistortionModel::from_coeff_count(count), Some(model));
        }
    }

    #[test]
    fn rational_differs_from_standard() {
        let standard = DistortionModel::select(5);
        let rational = DistortionModel::select(8);
        assert_eq!(rational.coefficient_names().len(), 8);
        assert_ne!(rational.solve_flags(), standard.solve_flags());
    }

    #[test]
    fn unsupported_counts_fall_back_to_standard() {
        for count in [0, 3, 4, 6, 13, 15, 100] {
            assert_eq!(DistortionModel::select(count), DistortionModel::select(5));
            assert_eq!(DistortionModel::from_coeff_count(count), None);
        }
    }

    #[test]
    fn flags_accumulate_with_model_order() {
        let flags: Vec<_> = DistortionModel::ALL.iter().map(|m| m.solve_flags()).collect();
        assert!(flags[0].is_empty());
        for pair in flags.windows(2) {
            assert!(pair[1].contains(pair[0]));
            assert_ne!(pair[0], pair[1]);
        }
        assert!(flags[3].contains(SolveFlags::TILTED_MODEL));
        assert!(!flags[2].contains(SolveFlags::TILTED_MODEL));
    }

    #[test]
    fn names_follow_solver_order() {
        let symbols: Vec<_> = DistortionModel::Standard
            .coefficient_names()
            .iter()
            .map(|n| n.symbol)
            .collect();
        assert_eq!(symbols, ["k1", "k2", "p1", "p2", "k3"]);
        let tilted = DistortionModel::Tilted.coefficient_names();
        assert_eq!(tilted[8].symbol, "s1");
        assert_eq!(tilted[13].key, "tau_y_tilt_y");
    }

    #[test]
    fn naming_truncates_to_shorter_side() {
        let model = DistortionModel::Rational;
        let short = [0.1, 0.2, 0.3];
        let named: Vec<_> = model.name_coefficients(&short).collect();
        assert_eq!(named.len(), 3);
        assert_eq!(named[2].0.symbol, "p1");
        assert_eq!(named[2].1, 0.3);

        let long = [0.0; 9];
        assert_eq!(model.name_coefficients(&long).count(), 8);
    }
}
