//! The fixed table of MERRA-2 aerosol species converted for the model.
//!
//! Every conversion rule lives in [`MERRA2_AEROSOLS`]: which reanalysis variable maps to
//! which model tracer, what unit the model expects, and (for ppm-equivalent tracers) the
//! molecular weight used in the conversion.
use tabled::Tabled;

use crate::error::ConversionError;
use crate::units::TracerUnit;

/// One row of the species table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeciesMapping {
    /// Variable name in the reanalysis file, e.g. "SO2".
    pub source_id: &'static str,
    /// Tracer name in the model file, e.g. "so2".
    pub target_id: &'static str,
    pub unit: TracerUnit,
    /// Molecular weight in g/mol; required for [`TracerUnit::PpmEquivalent`].
    pub molecular_weight: Option<f64>,
}

impl SpeciesMapping {
    const fn ug_per_kg(source_id: &'static str, target_id: &'static str) -> Self {
        Self {
            source_id,
            target_id,
            unit: TracerUnit::MicrogramPerKilogram,
            molecular_weight: None,
        }
    }

    const fn ppm(source_id: &'static str, target_id: &'static str, molecular_weight: f64) -> Self {
        Self {
            source_id,
            target_id,
            unit: TracerUnit::PpmEquivalent,
            molecular_weight: Some(molecular_weight),
        }
    }
}

pub const DMS_MOLECULAR_WEIGHT: f64 = 63.15;
pub const SO2_MOLECULAR_WEIGHT: f64 = 64.066;
pub const MSA_MOLECULAR_WEIGHT: f64 = 96.11;

/// The MERRA-2 aerosol species, in the order they are added to the model tracer file.
pub static MERRA2_AEROSOLS: &[SpeciesMapping] = &[
    SpeciesMapping::ug_per_kg("BCPHILIC", "bc2"),
    SpeciesMapping::ug_per_kg("BCPHOBIC", "bc1"),
    SpeciesMapping::ppm("DMS", "dms", DMS_MOLECULAR_WEIGHT),
    SpeciesMapping::ug_per_kg("DU001", "dust1"),
    SpeciesMapping::ug_per_kg("DU002", "dust2"),
    SpeciesMapping::ug_per_kg("DU003", "dust3"),
    SpeciesMapping::ug_per_kg("DU004", "dust4"),
    SpeciesMapping::ug_per_kg("DU005", "dust5"),
    SpeciesMapping::ug_per_kg("OCPHILIC", "oc2"),
    SpeciesMapping::ug_per_kg("OCPHOBIC", "oc1"),
    SpeciesMapping::ppm("SO2", "so2", SO2_MOLECULAR_WEIGHT),
    SpeciesMapping::ug_per_kg("SO4", "so4"),
    SpeciesMapping::ug_per_kg("SS001", "seas1"),
    SpeciesMapping::ug_per_kg("SS002", "seas2"),
    SpeciesMapping::ug_per_kg("SS003", "seas3"),
    SpeciesMapping::ug_per_kg("SS004", "seas4"),
    SpeciesMapping::ug_per_kg("SS005", "seas5"),
    SpeciesMapping::ppm("MSA", "msa", MSA_MOLECULAR_WEIGHT),
];

/// Find the table entry for a reanalysis species.
pub fn lookup(source_id: &str) -> Result<&'static SpeciesMapping, ConversionError> {
    MERRA2_AEROSOLS
        .iter()
        .find(|m| m.source_id == source_id)
        .ok_or_else(|| ConversionError::UnknownSpecies(source_id.to_string()))
}

/// Look up a list of requested species, keeping the request order.
///
/// Passing `None` selects the whole table.
pub fn select(requested: Option<&[String]>) -> Result<Vec<&'static SpeciesMapping>, ConversionError> {
    match requested {
        None => Ok(MERRA2_AEROSOLS.iter().collect()),
        Some(ids) => ids.iter().map(|id| lookup(id)).collect(),
    }
}

impl Tabled for SpeciesMapping {
    const LENGTH: usize = 4;

    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.source_id.into(),
            self.target_id.into(),
            self.unit.label().into(),
            self.molecular_weight
                .map(|mw| format!("{mw}"))
                .unwrap_or_else(|| "-".to_string())
                .into(),
        ]
    }

    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec![
            "MERRA-2".into(),
            "model".into(),
            "units".into(),
            "mol. weight".into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_table_is_consistent() {
        assert_eq!(MERRA2_AEROSOLS.len(), 18);
        assert!(MERRA2_AEROSOLS.iter().map(|m| m.source_id).all_unique());
        assert!(MERRA2_AEROSOLS.iter().map(|m| m.target_id).all_unique());
        for m in MERRA2_AEROSOLS {
            let has_mw = m.molecular_weight.is_some();
            let is_ppm = m.unit == TracerUnit::PpmEquivalent;
            assert_eq!(has_mw, is_ppm, "{} has an inconsistent molecular weight", m.source_id);
        }
    }

    #[test]
    fn test_lookup() {
        let so2 = lookup("SO2").unwrap();
        assert_eq!(so2.target_id, "so2");
        assert_eq!(so2.molecular_weight, Some(64.066));
        assert_eq!(lookup("SS003").unwrap().unit, TracerUnit::MicrogramPerKilogram);
        assert_eq!(
            lookup("O3").unwrap_err(),
            ConversionError::UnknownSpecies("O3".to_string())
        );
    }

    #[test]
    fn test_select() {
        assert_eq!(select(None).unwrap().len(), 18);
        let req = vec!["MSA".to_string(), "DMS".to_string()];
        let sel = select(Some(&req)).unwrap();
        assert_eq!(sel.iter().map(|m| m.target_id).collect_vec(), ["msa", "dms"]);

        let req = vec!["DMS".to_string(), "NH3".to_string()];
        assert_eq!(
            select(Some(&req)).unwrap_err(),
            ConversionError::UnknownSpecies("NH3".to_string())
        );
    }
}
