//! Hybrid sigma-pressure vertical coordinates.
//!
//! Pressure at a half level k is `ak[k] + bk[k] * ps`. The same algebra is used for the
//! reanalysis coordinate (built in below) and for the model coordinate (read from the
//! model control file), so that the vertical remapping and the 3-D pressure
//! reconstruction always agree.
//!
//! Two fixed surface pressures are used, and they differ on purpose:
//!
//! - half-level profiles for vertical remapping assume a 1000 hPa surface
//!   ([`REMAP_REFERENCE_SURFACE_PRESSURE_PA`]), and are returned in hPa;
//! - the 3-D pressure field used for unit conversion assumes a 101325 Pa surface
//!   ([`FV3_REFERENCE_SURFACE_PRESSURE_PA`]) everywhere, and is returned in Pa.
//!
//! Neither uses the actual model surface pressure.
use ndarray::{Array1, Array3, ArrayView2};

use crate::error::ConversionError;

/// Surface pressure assumed when computing half-level pressure profiles, in Pa.
pub const REMAP_REFERENCE_SURFACE_PRESSURE_PA: f64 = 100000.0;

/// Surface pressure assumed when reconstructing the model's 3-D pressure field, in Pa.
pub const FV3_REFERENCE_SURFACE_PRESSURE_PA: f64 = 101325.0;

const PA_PER_HPA: f64 = 100.0;

/// MERRA-2 pressure offsets (Pa) for the 73 half levels of its 72-level grid, top first.
static MERRA2_AK: [f64; 73] = [
    1.0, 2.00000023841858, 3.27000045776367, 4.75850105285645,
    6.60000133514404, 8.93450164794922, 11.9703016281128, 15.9495029449463,
    21.1349029541016, 27.8526058197021, 36.5041084289551, 47.5806083679199,
    61.6779098510742, 79.5134124755859, 101.944023132324, 130.051025390625,
    165.079025268555, 208.497039794922, 262.021057128906, 327.64306640625,
    407.657104492188, 504.680114746094, 621.680114746094, 761.984191894531,
    929.294189453125, 1127.69018554688, 1364.34020996094, 1645.71032714844,
    1979.16040039062, 2373.04052734375, 2836.78051757812, 3381.00073242188,
    4017.541015625, 4764.39111328125, 5638.791015625, 6660.34130859375,
    7851.2314453125, 9236.572265625, 10866.3017578125, 12783.703125,
    15039.302734375, 17693.00390625, 20119.201171875, 21686.501953125,
    22436.30078125, 22389.80078125, 21877.59765625, 21214.998046875,
    20325.8984375, 19309.6953125, 18161.896484375, 16960.896484375,
    15625.99609375, 14290.9951171875, 12869.59375, 11895.8623046875,
    10918.1708984375, 9936.521484375, 8909.9921875, 7883.421875,
    7062.1982421875, 6436.263671875, 5805.3212890625, 5169.61083984375,
    4533.90087890625, 3898.20092773438, 3257.08081054688, 2609.20068359375,
    1961.310546875, 1313.48034667969, 659.375244140625, 4.80482578277588,
    0.0,
];

/// MERRA-2 sigma multipliers for the 73 half levels of its 72-level grid, top first.
static MERRA2_BK: [f64; 73] = [
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    0.0, 8.17541323527848e-09, 0.00696002459153533, 0.0280100405216217,
    0.0637200623750687, 0.113602079451084, 0.156224086880684, 0.200350105762482,
    0.246741116046906, 0.294403105974197, 0.343381136655807, 0.392891138792038,
    0.44374018907547, 0.494590193033218, 0.546304166316986, 0.581041514873505,
    0.615818440914154, 0.650634944438934, 0.685899913311005, 0.721165955066681,
    0.749378204345703, 0.770637512207031, 0.791946947574615, 0.81330394744873,
    0.834660947322845, 0.856018006801605, 0.877429008483887, 0.898908019065857,
    0.920387029647827, 0.941865026950836, 0.963406026363373, 0.984951972961426,
    1.0,
];

/// A hybrid sigma-pressure coordinate: one (ak, bk) pair per half level, top of the model first.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridCoefficients {
    ak: Array1<f64>,
    bk: Array1<f64>,
}

impl HybridCoefficients {
    /// Create a coordinate from its pressure offsets (`ak`, Pa) and sigma multipliers (`bk`).
    ///
    /// Fails with a shape mismatch if the two sequences have different lengths or if there
    /// are fewer than two half levels (i.e. no full level).
    pub fn new(ak: Vec<f64>, bk: Vec<f64>) -> Result<Self, ConversionError> {
        if ak.len() != bk.len() {
            return Err(ConversionError::shape_mismatch(
                "hybrid coefficient sigma multipliers",
                format!("{} values (as many as the pressure offsets)", ak.len()),
                bk.len(),
            ));
        }

        if ak.len() < 2 {
            return Err(ConversionError::shape_mismatch(
                "hybrid coefficients",
                "at least 2 half levels",
                ak.len(),
            ));
        }

        Ok(Self {
            ak: Array1::from(ak),
            bk: Array1::from(bk),
        })
    }

    /// Create a coordinate from a model `vcoord` array, whose first row holds the pressure
    /// offsets and second row the sigma multipliers.
    pub fn from_vcoord(vcoord: ArrayView2<f64>) -> Result<Self, ConversionError> {
        if vcoord.nrows() != 2 {
            return Err(ConversionError::shape_mismatch(
                "vcoord rows",
                2,
                vcoord.nrows(),
            ));
        }

        Self::new(vcoord.row(0).to_vec(), vcoord.row(1).to_vec())
    }

    /// The built-in 72-level MERRA-2 coordinate.
    pub fn merra2() -> Self {
        Self {
            ak: Array1::from(MERRA2_AK.to_vec()),
            bk: Array1::from(MERRA2_BK.to_vec()),
        }
    }

    pub fn ak(&self) -> &Array1<f64> {
        &self.ak
    }

    pub fn bk(&self) -> &Array1<f64> {
        &self.bk
    }

    pub fn n_half_levels(&self) -> usize {
        self.ak.len()
    }

    pub fn n_full_levels(&self) -> usize {
        self.ak.len() - 1
    }

    /// Half-level pressures in hPa for a given surface pressure in Pa.
    pub fn half_level_pressures_hpa(&self, surface_pressure_pa: f64) -> Vec<f64> {
        self.ak
            .iter()
            .zip(self.bk.iter())
            .map(|(a, b)| (a + b * surface_pressure_pa) / PA_PER_HPA)
            .collect()
    }
}

/// Half-level pressures (hPa) of the MERRA-2 coordinate for a 1000 hPa surface.
pub fn source_half_level_pressures() -> Vec<f64> {
    HybridCoefficients::merra2().half_level_pressures_hpa(REMAP_REFERENCE_SURFACE_PRESSURE_PA)
}

/// Half-level pressures (hPa) of a model coordinate given as separate `ak`/`bk`
/// sequences, for a 1000 hPa surface.
pub fn target_half_level_pressures(ak: &[f64], bk: &[f64]) -> Result<Vec<f64>, ConversionError> {
    let coeffs = HybridCoefficients::new(ak.to_vec(), bk.to_vec())?;
    Ok(coeffs.half_level_pressures_hpa(REMAP_REFERENCE_SURFACE_PRESSURE_PA))
}

/// Reconstruct a (level, y, x) pressure field in Pa on the model's full levels.
///
/// Level k takes the coefficients of half level k + 1, i.e. the lower boundary of
/// the layer, and every column uses the same `surface_pressure_pa`. The pipeline passes
/// [`FV3_REFERENCE_SURFACE_PRESSURE_PA`] here.
pub fn target_full_pressure_field(
    coeffs: &HybridCoefficients,
    surface_pressure_pa: f64,
    horizontal_shape: (usize, usize),
) -> Array3<f64> {
    let (ny, nx) = horizontal_shape;
    let nlev = coeffs.n_full_levels();
    Array3::from_shape_fn((nlev, ny, nx), |(k, _, _)| {
        coeffs.ak[k + 1] + coeffs.bk[k + 1] * surface_pressure_pa
    })
}
