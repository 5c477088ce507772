use std::fmt::Display;

/// Specific gas constant for dry air used in the density approximation, J/(kg K).
pub const DRY_AIR_GAS_CONSTANT: f64 = 287.0;

/// Molar volume of an ideal gas at 25 °C and 1 atm, L/mol.
pub const MOLAR_VOLUME_25C: f64 = 24.45;

const UG_PER_KG: f64 = 1e9;
const PPM: f64 = 1e6;

/// Units a tracer can be written in for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerUnit {
    /// Native mass mixing ratio scaled to micrograms of tracer per kilogram of air.
    MicrogramPerKilogram,
    /// Mass mixing ratio converted to a ppm equivalent using air density and the
    /// tracer molecular weight.
    PpmEquivalent,
    /// Native mass mixing ratio, kg/kg.
    KilogramPerKilogram,
}

impl TracerUnit {
    /// The string written to the `units` attribute.
    pub fn label(&self) -> &'static str {
        match self {
            TracerUnit::MicrogramPerKilogram => "ug/kg",
            TracerUnit::PpmEquivalent => "ppm",
            TracerUnit::KilogramPerKilogram => "kg/kg",
        }
    }
}

impl Display for TracerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Air density in kg/m3 from pressure (Pa) and temperature (K), treating air as an ideal gas.
pub fn air_density(pressure_pa: f64, temperature_k: f64) -> f64 {
    pressure_pa / (DRY_AIR_GAS_CONSTANT * temperature_k)
}

/// Factor to multiply a kg/kg mass mixing ratio by to get µg/kg.
pub fn microgram_per_kilogram_factor() -> f64 {
    UG_PER_KG
}

/// Factor to multiply a kg/kg mass mixing ratio by to get the ppm equivalent, given the
/// air density in kg/m3 and the tracer molecular weight in g/mol.
pub fn ppm_equivalent_factor(density: f64, molecular_weight: f64) -> f64 {
    density * PPM * MOLAR_VOLUME_25C / molecular_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_labels() {
        assert_eq!(TracerUnit::MicrogramPerKilogram.to_string(), "ug/kg");
        assert_eq!(TracerUnit::PpmEquivalent.to_string(), "ppm");
        assert_eq!(TracerUnit::KilogramPerKilogram.label(), "kg/kg");
    }

    #[test]
    fn test_dms_factor() {
        let rho = air_density(100000.0, 280.0);
        assert_relative_eq!(rho, 1.244400199, max_relative = 1e-9);
        let value = 1e-9 * ppm_equivalent_factor(rho, 63.15);
        assert_relative_eq!(value, 1e-9 * rho * 1e6 * 24.45 / 63.15, max_relative = 1e-12);
        assert_relative_eq!(value, 4.8180e-4, max_relative = 1e-4);
    }
}
