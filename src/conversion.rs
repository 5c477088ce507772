//! Conversion of native mass mixing ratios into the units the model expects.
use ndarray::{Array3, ArrayView3, Zip};

use crate::error::ConversionError;
use crate::fields::ScalarField;
use crate::species::SpeciesMapping;
use crate::units::{self, TracerUnit};

/// Compute a (level, y, x) air density field from pressure (Pa) and temperature (K).
pub fn air_density_field(
    pressure_pa: ArrayView3<f64>,
    temperature_k: ArrayView3<f64>,
) -> Result<Array3<f64>, ConversionError> {
    if pressure_pa.dim() != temperature_k.dim() {
        return Err(ConversionError::shape_mismatch(
            "temperature field",
            format!("{:?} (the pressure field shape)", pressure_pa.dim()),
            format!("{:?}", temperature_k.dim()),
        ));
    }

    Ok(Zip::from(pressure_pa)
        .and(temperature_k)
        .map_collect(|&p, &t| units::air_density(p, t)))
}

/// Replace NaNs with zero, returning how many values were replaced.
pub fn fill_missing_with_zero(values: &mut Array3<f64>) -> usize {
    let mut n_filled = 0;
    values.map_inplace(|v| {
        if v.is_nan() {
            *v = 0.0;
            n_filled += 1;
        }
    });
    n_filled
}

/// Rescales tracers from kg/kg into the units given by their species mapping.
///
/// The air density needed for ppm-equivalent conversions is computed once when the
/// converter is created and reused for every species.
#[derive(Debug, Clone)]
pub struct TracerUnitConverter {
    density: Array3<f64>,
}

impl TracerUnitConverter {
    pub fn new(
        pressure_pa: ArrayView3<f64>,
        temperature_k: ArrayView3<f64>,
    ) -> Result<Self, ConversionError> {
        Ok(Self {
            density: air_density_field(pressure_pa, temperature_k)?,
        })
    }

    pub fn density(&self) -> ArrayView3<'_, f64> {
        self.density.view()
    }

    /// Zero-fill missing values in `values` (kg/kg), then convert them in place.
    pub fn convert_array(
        &self,
        values: &mut Array3<f64>,
        mapping: &SpeciesMapping,
    ) -> Result<(), ConversionError> {
        let n_filled = fill_missing_with_zero(values);
        if n_filled > 0 {
            log::warn!(
                "{n_filled} of {} values for {} had no data and were set to zero",
                values.len(),
                mapping.target_id
            );
        }

        log::debug!("Converting {} to {}", mapping.target_id, mapping.unit);
        match mapping.unit {
            TracerUnit::KilogramPerKilogram => {}
            TracerUnit::MicrogramPerKilogram => {
                let factor = units::microgram_per_kilogram_factor();
                values.mapv_inplace(|v| v * factor);
            }
            TracerUnit::PpmEquivalent => {
                let mw = mapping
                    .molecular_weight
                    .ok_or_else(|| ConversionError::MissingMolecularWeight(mapping.target_id.to_string()))?;
                if values.dim() != self.density.dim() {
                    return Err(ConversionError::shape_mismatch(
                        format!("field '{}' for density-based conversion", mapping.target_id),
                        format!("{:?}", self.density.dim()),
                        format!("{:?}", values.dim()),
                    ));
                }
                Zip::from(values)
                    .and(&self.density)
                    .for_each(|v, &rho| *v *= units::ppm_equivalent_factor(rho, mw));
            }
        }

        Ok(())
    }

    /// Convert a kg/kg field into the mapped tracer, named and labeled for the model.
    pub fn convert(
        &self,
        field: &ScalarField,
        mapping: &SpeciesMapping,
    ) -> Result<ScalarField, ConversionError> {
        let mut values = field.view_level_y_x()?.to_owned();
        self.convert_array(&mut values, mapping)?;
        Ok(ScalarField::level_y_x(mapping.target_id, mapping.unit.label(), values)
            .with_long_name(mapping.target_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rstest::rstest;

    fn converter(pressure: f64, temperature: f64) -> TracerUnitConverter {
        let p = Array3::from_elem((1, 1, 1), pressure);
        let t = Array3::from_elem((1, 1, 1), temperature);
        TracerUnitConverter::new(p.view(), t.view()).unwrap()
    }

    #[test]
    fn test_dms_regression() {
        let conv = converter(100000.0, 280.0);
        assert_relative_eq!(conv.density()[(0, 0, 0)], 100000.0 / (287.0 * 280.0));

        let dms = species::lookup("DMS").unwrap();
        let field = ScalarField::level_y_x("DMS", "kg kg-1", Array3::from_elem((1, 1, 1), 1e-9));
        let out = conv.convert(&field, dms).unwrap();
        assert_eq!(out.name(), "dms");
        assert_eq!(out.units(), "ppm");
        let expected = 1e-9 * (100000.0 / (287.0 * 280.0)) * 1e6 * 24.45 / 63.15;
        assert_relative_eq!(out.data()[[0, 0, 0]], expected, max_relative = 1e-12);
        assert_relative_eq!(out.data()[[0, 0, 0]], 4.818e-4, max_relative = 1e-3);
    }

    #[rstest]
    #[case("BCPHILIC", 2e-9, 2.0)]
    #[case("SS005", 0.0, 0.0)]
    #[case("SO4", f64::NAN, 0.0)]
    fn test_ug_per_kg(#[case] species_id: &str, #[case] value: f64, #[case] expected: f64) {
        let conv = converter(50000.0, 250.0);
        let mut values = Array3::from_elem((1, 1, 1), value);
        conv.convert_array(&mut values, species::lookup(species_id).unwrap())
            .unwrap();
        assert_abs_diff_eq!(values[(0, 0, 0)], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_native_unit_is_unchanged() {
        let conv = converter(50000.0, 250.0);
        let mapping = SpeciesMapping {
            source_id: "X",
            target_id: "x",
            unit: TracerUnit::KilogramPerKilogram,
            molecular_weight: None,
        };
        let mut values = Array3::from_shape_vec((1, 1, 2), vec![3e-9, f64::NAN]).unwrap();
        conv.convert_array(&mut values, &mapping).unwrap();
        assert_eq!(values.as_slice().unwrap(), &[3e-9, 0.0]);
    }

    #[test]
    fn test_ppm_monotonic_in_pressure_and_temperature() {
        let so2 = species::lookup("SO2").unwrap();
        let convert_at = |p: f64, t: f64| {
            let mut v = Array3::from_elem((1, 1, 1), 1e-9);
            converter(p, t).convert_array(&mut v, so2).unwrap();
            v[(0, 0, 0)]
        };

        let pressures = [1000.0, 10000.0, 50000.0, 101325.0];
        for w in pressures.windows(2) {
            assert!(convert_at(w[1], 270.0) > convert_at(w[0], 270.0));
        }

        let temperatures = [190.0, 230.0, 270.0, 310.0];
        for w in temperatures.windows(2) {
            assert!(convert_at(80000.0, w[1]) < convert_at(80000.0, w[0]));
        }
    }

    #[test]
    fn test_missing_molecular_weight() {
        let conv = converter(50000.0, 250.0);
        let mapping = SpeciesMapping {
            source_id: "NO2",
            target_id: "no2",
            unit: TracerUnit::PpmEquivalent,
            molecular_weight: None,
        };
        let mut values = Array3::zeros((1, 1, 1));
        let err = conv.convert_array(&mut values, &mapping).unwrap_err();
        assert_eq!(err, ConversionError::MissingMolecularWeight("no2".to_string()));
    }

    #[test]
    fn test_density_shape_mismatch() {
        let p = Array3::zeros((2, 1, 1));
        let t = Array3::ones((1, 1, 1));
        let err = TracerUnitConverter::new(p.view(), t.view()).unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }));
    }
}
