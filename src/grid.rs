//! Horizontal grid geometry.
//!
//! Grids are supplied by outside loaders (a regular latitude/longitude grid for the
//! reanalysis, one cubed-sphere tile for the model). This module only describes them
//! and checks that the center and corner arrays are consistent.
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::ConversionError;

/// Cell centers and (optionally) cell corners of a horizontal grid, in degrees.
///
/// Center arrays have shape (ny, nx); corner arrays, when present, have shape (ny + 1, nx + 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    lat: Array2<f64>,
    lon: Array2<f64>,
    corners: Option<Corners>,
    tile: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
struct Corners {
    lat: Array2<f64>,
    lon: Array2<f64>,
}

impl Grid {
    /// Create a grid from 2-D cell center latitudes and longitudes, without corners.
    pub fn from_centers(lat: Array2<f64>, lon: Array2<f64>) -> Result<Self, ConversionError> {
        if lat.dim() != lon.dim() {
            return Err(ConversionError::shape_mismatch(
                "grid center longitudes",
                format!("{:?}", lat.dim()),
                format!("{:?}", lon.dim()),
            ));
        }

        Ok(Self {
            lat,
            lon,
            corners: None,
            tile: None,
        })
    }

    /// Add cell corner latitudes and longitudes to this grid.
    pub fn with_corners(
        mut self,
        lat_b: Array2<f64>,
        lon_b: Array2<f64>,
    ) -> Result<Self, ConversionError> {
        let (ny, nx) = self.lat.dim();
        let expected = (ny + 1, nx + 1);
        for (what, arr) in [("grid corner latitudes", &lat_b), ("grid corner longitudes", &lon_b)] {
            if arr.dim() != expected {
                return Err(ConversionError::shape_mismatch(
                    what,
                    format!("{expected:?}"),
                    format!("{:?}", arr.dim()),
                ));
            }
        }

        self.corners = Some(Corners {
            lat: lat_b,
            lon: lon_b,
        });
        Ok(self)
    }

    /// Tag this grid as one face of a cubed sphere.
    pub fn with_tile(mut self, tile: u8) -> Result<Self, ConversionError> {
        if !(1..=6).contains(&tile) {
            return Err(ConversionError::InvalidTile(tile));
        }
        self.tile = Some(tile);
        Ok(self)
    }

    /// Build a regular latitude/longitude grid from its 1-D center axes.
    ///
    /// Corners are placed halfway between neighboring centers and half a spacing beyond
    /// the outermost ones, with latitudes clamped to the poles.
    pub fn regular_lat_lon(lats: &[f64], lons: &[f64]) -> Result<Self, ConversionError> {
        if lats.is_empty() || lons.is_empty() {
            return Err(ConversionError::grid_incompatible(
                "a regular grid needs at least one latitude and one longitude",
            ));
        }

        let ny = lats.len();
        let nx = lons.len();
        let lat = Array2::from_shape_fn((ny, nx), |(j, _)| lats[j]);
        let lon = Array2::from_shape_fn((ny, nx), |(_, i)| lons[i]);

        let lat_edges = axis_edges(lats).mapv(|v| v.clamp(-90.0, 90.0));
        let lon_edges = axis_edges(lons);
        let lat_b = Array2::from_shape_fn((ny + 1, nx + 1), |(j, _)| lat_edges[j]);
        let lon_b = Array2::from_shape_fn((ny + 1, nx + 1), |(_, i)| lon_edges[i]);

        Self::from_centers(lat, lon)?.with_corners(lat_b, lon_b)
    }

    /// Number of cells along (y, x).
    pub fn shape(&self) -> (usize, usize) {
        self.lat.dim()
    }

    pub fn tile(&self) -> Option<u8> {
        self.tile
    }

    pub fn lat(&self) -> ArrayView2<'_, f64> {
        self.lat.view()
    }

    pub fn lon(&self) -> ArrayView2<'_, f64> {
        self.lon.view()
    }

    pub fn has_corners(&self) -> bool {
        self.corners.is_some()
    }

    /// Corner latitudes and longitudes, if this grid has them.
    pub fn corners(&self) -> Option<(ArrayView2<'_, f64>, ArrayView2<'_, f64>)> {
        self.corners.as_ref().map(|c| (c.lat.view(), c.lon.view()))
    }

    /// Return the 1-D latitude and longitude axes if the centers form a rectilinear grid.
    pub fn rectilinear_axes(&self) -> Option<(Array1<f64>, Array1<f64>)> {
        let lat_axis = self.lat.column(0).to_owned();
        let lon_axis = self.lon.row(0).to_owned();

        let lat_ok = self
            .lat
            .axis_iter(Axis(1))
            .all(|col| col.iter().zip(lat_axis.iter()).all(|(a, b)| (a - b).abs() < 1e-9));
        let lon_ok = self
            .lon
            .axis_iter(Axis(0))
            .all(|row| row.iter().zip(lon_axis.iter()).all(|(a, b)| (a - b).abs() < 1e-9));

        if lat_ok && lon_ok {
            Some((lat_axis, lon_axis))
        } else {
            None
        }
    }
}

fn axis_edges(centers: &[f64]) -> Array1<f64> {
    let n = centers.len();
    if n == 1 {
        return Array1::from(vec![centers[0] - 0.5, centers[0] + 0.5]);
    }

    let mut edges = Array1::zeros(n + 1);
    for i in 1..n {
        edges[i] = 0.5 * (centers[i - 1] + centers[i]);
    }
    edges[0] = centers[0] - 0.5 * (centers[1] - centers[0]);
    edges[n] = centers[n - 1] + 0.5 * (centers[n - 1] - centers[n - 2]);
    edges
}

/// Get the cubed-sphere tile number from a model file name such as `gfs_data.tile3.nc`.
pub fn tile_from_file_name(file_name: &str) -> Option<u8> {
    file_name
        .split('.')
        .find_map(|part| part.strip_prefix("tile"))
        .and_then(|n| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    #[test]
    fn test_regular_grid_corners() {
        let grid = Grid::regular_lat_lon(&[-90.0, 0.0, 90.0], &[0.0, 90.0, 180.0, 270.0]).unwrap();
        assert_eq!(grid.shape(), (3, 4));
        let (lat_b, lon_b) = grid.corners().unwrap();
        assert_eq!(lat_b.dim(), (4, 5));
        assert_abs_diff_eq!(lat_b[(0, 0)], -90.0);
        assert_abs_diff_eq!(lat_b[(1, 0)], -45.0);
        assert_abs_diff_eq!(lat_b[(3, 4)], 90.0);
        assert_abs_diff_eq!(lon_b[(0, 0)], -45.0);
        assert_abs_diff_eq!(lon_b[(0, 4)], 315.0);
        assert!(grid.rectilinear_axes().is_some());
    }

    #[test]
    fn test_corner_shape_checked() {
        let lat = Array2::zeros((2, 2));
        let lon = Array2::zeros((2, 2));
        let err = Grid::from_centers(lat, lon)
            .unwrap()
            .with_corners(Array2::zeros((2, 2)), Array2::zeros((3, 3)))
            .unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_curvilinear_is_not_rectilinear() {
        let lat = Array2::from_shape_fn((2, 2), |(j, i)| (j + i) as f64);
        let lon = Array2::from_shape_fn((2, 2), |(_, i)| i as f64);
        let grid = Grid::from_centers(lat, lon).unwrap();
        assert!(grid.rectilinear_axes().is_none());
    }

    #[rstest]
    #[case("gfs_data.tile1.nc", Some(1))]
    #[case("gfs_data.tile6.nc", Some(6))]
    #[case("sfc_data.tile12.nc", Some(12))]
    #[case("gfs_ctrl.nc", None)]
    fn test_tile_from_file_name(#[case] name: &str, #[case] expected: Option<u8>) {
        assert_eq!(tile_from_file_name(name), expected);
    }

    #[test]
    fn test_tile_range() {
        let grid = Grid::from_centers(Array2::zeros((1, 1)), Array2::zeros((1, 1))).unwrap();
        assert_eq!(grid.clone().with_tile(6).unwrap().tile(), Some(6));
        assert_eq!(grid.with_tile(7).unwrap_err(), ConversionError::InvalidTile(7));
    }
}
