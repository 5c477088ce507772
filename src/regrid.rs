//! Bilinear horizontal regridding from a rectilinear latitude/longitude grid.
//!
//! Weights are computed once per (source, target) grid pair as a [`BilinearWeights`]
//! value and then applied to as many fields as needed. The value is immutable, so it can
//! be shared read-only between threads regridding different species.
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2};

use crate::error::ConversionError;
use crate::fields::ScalarField;
use crate::grid::Grid;

const FULL_CIRCLE: f64 = 360.0;

/// One target cell's contributing source cells as (y index, x index, weight).
type Stencil = [(usize, usize, f64); 4];

/// Sparse bilinear weights mapping a source grid onto the centers of a target grid.
///
/// Target cells that fall outside the source grid have no stencil and receive NaN.
#[derive(Debug, Clone)]
pub struct BilinearWeights {
    source_shape: (usize, usize),
    target_shape: (usize, usize),
    stencils: Vec<Option<Stencil>>,
}

impl BilinearWeights {
    /// Compute the weights from `source` to `target`.
    ///
    /// Both grids must carry corner coordinates, and the source grid must be rectilinear
    /// with strictly monotonic axes; otherwise this returns [`ConversionError::GridIncompatible`].
    pub fn new(source: &Grid, target: &Grid) -> Result<Self, ConversionError> {
        let Some((_, src_lon_b)) = source.corners() else {
            return Err(ConversionError::grid_incompatible(
                "source grid has no cell corner coordinates",
            ));
        };
        if !target.has_corners() {
            return Err(ConversionError::grid_incompatible(
                "target grid has no cell corner coordinates",
            ));
        }

        let (lat_axis, lon_axis) = source.rectilinear_axes().ok_or_else(|| {
            ConversionError::grid_incompatible("source grid is not a rectilinear lat/lon grid")
        })?;
        let lat_axis = MonotonicAxis::new(lat_axis.to_vec(), "latitude")?;
        let lon_axis = MonotonicAxis::new(lon_axis.to_vec(), "longitude")?;
        if !lon_axis.ascending {
            return Err(ConversionError::grid_incompatible(
                "source longitudes must increase along x",
            ));
        }

        let lon_b_row = src_lon_b.row(0);
        let lon_span = lon_b_row[lon_b_row.len() - 1] - lon_b_row[0];
        let periodic = lon_span >= FULL_CIRCLE - 1e-6;

        let tgt_lat = target.lat();
        let tgt_lon = target.lon();
        let stencils = tgt_lat
            .iter()
            .zip(tgt_lon.iter())
            .map(|(&lat, &lon)| {
                let (j0, j1, ty) = lat_axis.bracket(lat)?;
                let (i0, i1, tx) = bracket_longitude(&lon_axis, lon, periodic)?;
                Some([
                    (j0, i0, (1.0 - ty) * (1.0 - tx)),
                    (j0, i1, (1.0 - ty) * tx),
                    (j1, i0, ty * (1.0 - tx)),
                    (j1, i1, ty * tx),
                ])
            })
            .collect();

        let weights = Self {
            source_shape: source.shape(),
            target_shape: target.shape(),
            stencils,
        };
        log::debug!(
            "Computed bilinear weights for {} target cells, {} without source coverage",
            weights.stencils.len(),
            weights.n_unmapped()
        );
        Ok(weights)
    }

    /// Number of target cells that receive no value.
    pub fn n_unmapped(&self) -> usize {
        self.stencils.iter().filter(|s| s.is_none()).count()
    }

    /// Sum of weights for each target cell, NaN where the cell is unmapped.
    pub fn weight_sums(&self) -> Array2<f64> {
        let values = self
            .stencils
            .iter()
            .map(|s| match s {
                Some(st) => st.iter().map(|(_, _, w)| w).sum::<f64>(),
                None => f64::NAN,
            })
            .collect();
        // The number of stencils always equals the number of target cells
        Array2::from_shape_vec(self.target_shape, values)
            .unwrap_or_else(|_| Array2::from_elem(self.target_shape, f64::NAN))
    }

    /// Regrid one horizontal slice.
    pub fn apply_2d(&self, field: ArrayView2<f64>) -> Result<Array2<f64>, ConversionError> {
        self.check_source_shape(field.dim())?;
        let mut out = Array2::from_elem(self.target_shape, f64::NAN);
        self.fill(field, out.view_mut());
        Ok(out)
    }

    /// Regrid every level of a (level, y, x) array.
    pub fn apply_levels(&self, field: ArrayView3<f64>) -> Result<Array3<f64>, ConversionError> {
        let (nlev, ny, nx) = field.dim();
        self.check_source_shape((ny, nx))?;
        let (ty, tx) = self.target_shape;
        let mut out = Array3::from_elem((nlev, ty, tx), f64::NAN);
        for (src_level, out_level) in field.outer_iter().zip(out.outer_iter_mut()) {
            self.fill(src_level, out_level);
        }
        Ok(out)
    }

    fn check_source_shape(&self, shape: (usize, usize)) -> Result<(), ConversionError> {
        if shape != self.source_shape {
            return Err(ConversionError::shape_mismatch(
                "horizontal shape of field to regrid",
                format!("{:?}", self.source_shape),
                format!("{shape:?}"),
            ));
        }
        Ok(())
    }

    fn fill(&self, src: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
        for (o, stencil) in out.iter_mut().zip(self.stencils.iter()) {
            if let Some(stencil) = stencil {
                // A zero-weight neighbor must not turn the result into NaN
                *o = stencil
                    .iter()
                    .filter(|&&(_, _, w)| w != 0.0)
                    .map(|&(j, i, w)| w * src[(j, i)])
                    .sum();
            }
        }
    }
}

/// Regrids (level, y, x) fields from one grid to another with a fixed set of weights.
#[derive(Debug, Clone)]
pub struct HorizontalRegridder {
    weights: BilinearWeights,
}

impl HorizontalRegridder {
    pub fn new(source: &Grid, target: &Grid) -> Result<Self, ConversionError> {
        Ok(Self {
            weights: BilinearWeights::new(source, target)?,
        })
    }

    pub fn weights(&self) -> &BilinearWeights {
        &self.weights
    }

    /// Regrid a field, keeping its name, units and long name.
    pub fn regrid(&self, field: &ScalarField) -> Result<ScalarField, ConversionError> {
        let data = self.weights.apply_levels(field.view_level_y_x()?)?;
        let out = ScalarField::level_y_x(field.name(), field.units(), data);
        Ok(match field.long_name() {
            Some(ln) => out.with_long_name(ln),
            None => out,
        })
    }
}

/// Regrid a single field, computing the weights for just this call.
///
/// When regridding several fields between the same grids, build a [`HorizontalRegridder`]
/// once instead.
pub fn regrid_bilinear(
    source_field: &ScalarField,
    source_grid: &Grid,
    target_grid: &Grid,
) -> Result<ScalarField, ConversionError> {
    HorizontalRegridder::new(source_grid, target_grid)?.regrid(source_field)
}

/// A strictly monotonic 1-D coordinate axis.
struct MonotonicAxis {
    values: Vec<f64>,
    ascending: bool,
}

impl MonotonicAxis {
    fn new(values: Vec<f64>, name: &str) -> Result<Self, ConversionError> {
        if values.len() < 2 {
            return Err(ConversionError::grid_incompatible(format!(
                "source {name} axis needs at least two points"
            )));
        }

        let ascending = values[1] > values[0];
        let monotonic = values
            .windows(2)
            .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] });
        if !monotonic {
            return Err(ConversionError::grid_incompatible(format!(
                "source {name} axis is not strictly monotonic"
            )));
        }

        Ok(Self { values, ascending })
    }

    fn first(&self) -> f64 {
        self.values[0]
    }

    fn last(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Find the two neighbors of `v` and its fractional distance from the first,
    /// or `None` if `v` is outside the axis.
    fn bracket(&self, v: f64) -> Option<(usize, usize, f64)> {
        let n = self.values.len();
        let (lo, hi) = if self.ascending {
            (self.first(), self.last())
        } else {
            (self.last(), self.first())
        };
        if v.is_nan() || v < lo || v > hi {
            return None;
        }

        let i = if self.ascending {
            self.values.partition_point(|&a| a <= v)
        } else {
            self.values.partition_point(|&a| a >= v)
        };
        let i0 = i.saturating_sub(1).min(n - 2);
        let (x0, x1) = (self.values[i0], self.values[i0 + 1]);
        Some((i0, i0 + 1, (v - x0) / (x1 - x0)))
    }
}

fn bracket_longitude(
    axis: &MonotonicAxis,
    lon: f64,
    periodic: bool,
) -> Option<(usize, usize, f64)> {
    let first = axis.first();
    let lon = first + (lon - first).rem_euclid(FULL_CIRCLE);
    if lon <= axis.last() {
        return axis.bracket(lon);
    }

    if !periodic {
        return None;
    }

    // Between the last longitude and the first one, one full circle later
    let n = axis.values.len();
    let x0 = axis.last();
    let x1 = first + FULL_CIRCLE;
    Some((n - 1, 0, (lon - x0) / (x1 - x0)))
}
