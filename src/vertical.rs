//! Vertical remapping between two sets of pressure levels, linear in log(pressure).
use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};

use crate::error::ConversionError;
use crate::fields::ScalarField;
use crate::interpolation::{InterpolationMethod, LinearInterp};

/// Remaps (level, y, x) fields from source to target levels.
///
/// Both level sets are given as half-level pressures, top first. The top-most half level
/// of each is dropped and the remaining ones are taken as the level pressures, so a field
/// on the source coordinate must have one level fewer than the source half-level count.
/// Target levels outside the source pressure range get NaN.
///
/// The levels are the same in every column, so each target level's bracketing source
/// levels are found once here and every column is then a weighted sum.
#[derive(Debug, Clone)]
pub struct VerticalRemapper {
    n_source_levels: usize,
    /// Upper source level index and weight of the level below it, per target level
    segments: Vec<Option<(usize, f64)>>,
}

impl VerticalRemapper {
    pub fn new(
        source_half_level_pressures: &[f64],
        target_half_level_pressures: &[f64],
    ) -> Result<Self, ConversionError> {
        let log_p_source = log_levels_below_top(source_half_level_pressures, "source", 2)?;
        let log_p_target = log_levels_below_top(target_half_level_pressures, "target", 1)?;

        // Interpolating the level index itself gives each target's fractional position
        let index = (0..log_p_source.len()).map(|k| k as f64).collect::<Vec<_>>();
        let positions = LinearInterp::new(false)
            .interp1d_many(&log_p_source, &index, &log_p_target)
            .map_err(|e| ConversionError::invalid_coordinate(e.to_string()))?;

        let last_segment = log_p_source.len() - 2;
        let segments = positions
            .into_iter()
            .map(|pos| {
                if pos.is_nan() {
                    return None;
                }
                let k = (pos.floor() as usize).min(last_segment);
                Some((k, pos - k as f64))
            })
            .collect();

        Ok(Self {
            n_source_levels: log_p_source.len(),
            segments,
        })
    }

    pub fn n_source_levels(&self) -> usize {
        self.n_source_levels
    }

    pub fn n_target_levels(&self) -> usize {
        self.segments.len()
    }

    /// Remap a (level, y, x) array column by column.
    pub fn remap_array(&self, field: ArrayView3<f64>) -> Result<Array3<f64>, ConversionError> {
        let (nlev, ny, nx) = field.dim();
        if nlev != self.n_source_levels {
            return Err(ConversionError::shape_mismatch(
                "number of levels in field to remap",
                self.n_source_levels,
                nlev,
            ));
        }

        let mut out = Array3::from_elem((self.n_target_levels(), ny, nx), f64::NAN);
        Zip::from(out.lanes_mut(Axis(0)))
            .and(field.lanes(Axis(0)))
            .for_each(|out_column, column| self.remap_column(column, out_column));
        Ok(out)
    }

    fn remap_column(&self, column: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) {
        for (o, segment) in out.iter_mut().zip(self.segments.iter()) {
            if let Some((k, w)) = *segment {
                // Zero weights are skipped so a NaN on an unused level cannot leak in
                *o = match w {
                    w if w == 0.0 => column[k],
                    w if w == 1.0 => column[k + 1],
                    w => (1.0 - w) * column[k] + w * column[k + 1],
                };
            }
        }
    }

    /// Remap a field, keeping its name, units and long name.
    pub fn remap(&self, field: &ScalarField) -> Result<ScalarField, ConversionError> {
        let data = self.remap_array(field.view_level_y_x()?)?;
        let out = ScalarField::level_y_x(field.name(), field.units(), data);
        Ok(match field.long_name() {
            Some(ln) => out.with_long_name(ln),
            None => out,
        })
    }
}

/// Remap one (level, y, x) array from the source to the target half-level pressures.
pub fn remap_log_pressure(
    field: ArrayView3<f64>,
    source_half_level_pressures: &[f64],
    target_half_level_pressures: &[f64],
) -> Result<Array3<f64>, ConversionError> {
    VerticalRemapper::new(source_half_level_pressures, target_half_level_pressures)?
        .remap_array(field)
}

fn log_levels_below_top(
    half_levels: &[f64],
    which: &str,
    min_levels: usize,
) -> Result<Vec<f64>, ConversionError> {
    if half_levels.len() < min_levels + 1 {
        return Err(ConversionError::invalid_coordinate(format!(
            "{which} coordinate needs at least {} half levels, got {}",
            min_levels + 1,
            half_levels.len()
        )));
    }

    let levels = &half_levels[1..];
    if let Some(p) = levels.iter().find(|p| !(**p > 0.0)) {
        return Err(ConversionError::invalid_coordinate(format!(
            "{which} pressure {p} below the top level is not positive"
        )));
    }

    if let Some(k) = (1..levels.len()).find(|&k| levels[k] <= levels[k - 1]) {
        return Err(ConversionError::invalid_coordinate(format!(
            "{which} pressures must increase downward, but half level {} ({}) <= half level {} ({})",
            k + 1,
            levels[k],
            k,
            levels[k - 1]
        )));
    }

    Ok(levels.iter().map(|p| p.ln()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pressure::source_half_level_pressures;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_two_level_profile() {
        let field = Array3::from_elem((2, 2, 3), 2e-9);
        let out = remap_log_pressure(field.view(), &[0.01, 10.0, 1000.0], &[0.01, 500.0]).unwrap();
        assert_eq!(out.dim(), (1, 2, 3));
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 2e-9, epsilon = 1e-22);
        }
    }

    #[test]
    fn test_linear_in_log_pressure() {
        let field = Array3::from_shape_vec((2, 1, 1), vec![1.0, 3.0]).unwrap();
        // 100 hPa is the geometric mean of 10 and 1000 hPa, i.e. halfway in log(p)
        let out = remap_log_pressure(field.view(), &[1.0, 10.0, 1000.0], &[1.0, 100.0]).unwrap();
        assert_abs_diff_eq!(out[(0, 0, 0)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_identical_levels_are_identity() {
        let p = source_half_level_pressures();
        let field = Array3::from_shape_fn((72, 2, 2), |(k, j, i)| 1e-9 * (1.0 + k as f64) + (j + i) as f64 * 1e-10);
        let out = remap_log_pressure(field.view(), &p, &p).unwrap();
        for (a, b) in out.iter().zip(field.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-20);
        }
    }

    #[test]
    fn test_nan_on_unused_level_does_not_spread() {
        // The 10 hPa target sits exactly on the first source level
        let remapper = VerticalRemapper::new(&[1.0, 10.0, 100.0, 1000.0], &[1.0, 10.0, 1000.0]).unwrap();
        assert_eq!(remapper.n_source_levels(), 3);
        assert_eq!(remapper.n_target_levels(), 2);

        let field = Array3::from_shape_vec((3, 1, 1), vec![5.0, f64::NAN, 7.0]).unwrap();
        let out = remapper.remap_array(field.view()).unwrap();
        assert_abs_diff_eq!(out[(0, 0, 0)], 5.0);
        assert_abs_diff_eq!(out[(1, 0, 0)], 7.0);
    }

    #[test]
    fn test_no_extrapolation() {
        let field = Array3::from_elem((2, 1, 1), 1.0);
        let out =
            remap_log_pressure(field.view(), &[1.0, 10.0, 900.0], &[1.0, 5.0, 100.0, 950.0]).unwrap();
        assert!(out[(0, 0, 0)].is_nan());
        assert_abs_diff_eq!(out[(1, 0, 0)], 1.0);
        assert!(out[(2, 0, 0)].is_nan());
    }

    #[test]
    fn test_non_monotonic_levels() {
        let field = Array3::zeros((3, 1, 1));
        let err =
            remap_log_pressure(field.view(), &[1.0, 10.0, 500.0, 400.0], &[1.0, 100.0]).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidCoordinate(_)));

        let field = Array3::zeros((2, 1, 1));
        let err = remap_log_pressure(field.view(), &[1.0, 10.0, 500.0], &[1.0, 300.0, 300.0])
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidCoordinate(_)));
    }

    #[test]
    fn test_top_level_is_ignored() {
        // A degenerate zero pressure at the top must not matter
        let field = Array3::from_elem((2, 1, 1), 4.0);
        let out = remap_log_pressure(field.view(), &[0.0, 10.0, 1000.0], &[0.0, 50.0]).unwrap();
        assert_abs_diff_eq!(out[(0, 0, 0)], 4.0);
    }

    #[test]
    fn test_level_count_mismatch() {
        let field = Array3::zeros((3, 1, 1));
        let err = remap_log_pressure(field.view(), &[1.0, 10.0, 1000.0], &[1.0, 50.0]).unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }));
    }
}
