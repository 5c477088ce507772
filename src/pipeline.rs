//! The end-to-end conversion from reanalysis species to model tracers.
//!
//! [`ConversionPipeline::run`] is a pure function of its inputs: it reads the source
//! dataset, the model coordinate, grid and background tracers, and returns a new
//! [`TracerCollection`]. Writing that collection out (and backing up the original file)
//! is left to the caller. Any error aborts the whole run, so no partial output is ever
//! produced.
use error_stack::{Report, ResultExt};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::PipelineConfig;
use crate::conversion::TracerUnitConverter;
use crate::error::{ConversionError, PipelineError, PipelineStep};
use crate::fields::{ScalarField, TracerCollection};
use crate::grid::Grid;
use crate::pressure::{
    target_full_pressure_field, HybridCoefficients, FV3_REFERENCE_SURFACE_PRESSURE_PA,
    REMAP_REFERENCE_SURFACE_PRESSURE_PA,
};
use crate::regrid::HorizontalRegridder;
use crate::species::{self, SpeciesMapping};
use crate::vertical::VerticalRemapper;

/// Reanalysis fields keyed by their source species name, with the grid and vertical
/// coordinate they are defined on.
#[derive(Debug, Clone)]
pub struct SourceDataset {
    pub grid: Grid,
    pub coordinate: HybridCoefficients,
    pub fields: TracerCollection,
}

impl SourceDataset {
    /// A dataset on the standard 72-level MERRA-2 vertical grid.
    pub fn merra2(grid: Grid, fields: TracerCollection) -> Self {
        Self {
            grid,
            coordinate: HybridCoefficients::merra2(),
            fields,
        }
    }
}

/// The existing model state on one tile: its tracers and temperature.
#[derive(Debug, Clone)]
pub struct ModelBackground {
    pub tracers: TracerCollection,
    pub temperature: ScalarField,
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The background tracers with converted species replaced or appended.
    pub tracers: TracerCollection,
    /// Model names of the converted species, in the order they were added.
    pub converted: Vec<String>,
    /// Tracer count to declare in the output file: the configured base count plus
    /// the number of converted species.
    pub declared_tracer_count: usize,
}

struct SpeciesField {
    mapping: &'static SpeciesMapping,
    field: ScalarField,
}

pub struct ConversionPipeline {
    config: PipelineConfig,
}

impl ConversionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(
        &self,
        source: &SourceDataset,
        target_coordinate: &HybridCoefficients,
        target_grid: &Grid,
        background: &ModelBackground,
    ) -> error_stack::Result<ConversionOutput, PipelineError> {
        let selected = self.select_species(source)?;
        log::info!("Converting {} species", selected.len());

        if selected.is_empty() {
            return Ok(ConversionOutput {
                tracers: background.tracers.clone(),
                converted: vec![],
                declared_tracer_count: self.config.base_tracer_count,
            });
        }

        log::info!("Computing half-level pressures");
        let source_phalf = source
            .coordinate
            .half_level_pressures_hpa(REMAP_REFERENCE_SURFACE_PRESSURE_PA);
        let target_phalf =
            target_coordinate.half_level_pressures_hpa(REMAP_REFERENCE_SURFACE_PRESSURE_PA);
        let remapper = VerticalRemapper::new(&source_phalf, &target_phalf)
            .change_context(PipelineError::at_step(PipelineStep::HalfLevelPressures))?;

        log::info!("Regridding horizontally");
        let regridder = HorizontalRegridder::new(&source.grid, target_grid)
            .change_context(PipelineError::at_step(PipelineStep::HorizontalRegrid))?;
        let regridded = self.map_fields(PipelineStep::HorizontalRegrid, &selected, |sf| {
            regridder.regrid(&sf.field)
        })?;

        log::info!("Remapping vertically");
        let remapped = self.map_fields(PipelineStep::VerticalRemap, &regridded, |sf| {
            remapper.remap(&sf.field)
        })?;

        log::info!("Reconstructing the model pressure field");
        let pressure = target_full_pressure_field(
            target_coordinate,
            FV3_REFERENCE_SURFACE_PRESSURE_PA,
            target_grid.shape(),
        );

        log::info!("Computing air density");
        let temperature = background
            .temperature
            .view_level_y_x()
            .change_context(PipelineError::at_step(PipelineStep::AirDensity))?;
        let converter = TracerUnitConverter::new(pressure.view(), temperature)
            .change_context(PipelineError::at_step(PipelineStep::AirDensity))?;

        log::info!("Converting units and assembling tracers");
        let template_shape = background
            .tracers
            .get(&self.config.template_tracer)
            .map(|t| t.shape().to_vec())
            .ok_or_else(|| ConversionError::MissingVariable(self.config.template_tracer.clone()))
            .change_context(PipelineError::at_step(PipelineStep::AssembleTracers))?;
        let converted = self.map_fields(PipelineStep::AssembleTracers, &remapped, |sf| {
            if sf.field.shape() != template_shape.as_slice() {
                return Err(ConversionError::shape_mismatch(
                    format!("remapped field vs. template tracer '{}'", self.config.template_tracer),
                    format!("{template_shape:?}"),
                    format!("{:?}", sf.field.shape()),
                ));
            }
            converter.convert(&sf.field, sf.mapping)
        })?;

        let mut tracers = background.tracers.clone();
        let mut names = Vec::with_capacity(converted.len());
        for sf in converted {
            names.push(sf.mapping.target_id.to_string());
            tracers.insert(sf.field);
        }

        Ok(ConversionOutput {
            tracers,
            declared_tracer_count: self.config.base_tracer_count + names.len(),
            converted: names,
        })
    }

    fn select_species(
        &self,
        source: &SourceDataset,
    ) -> error_stack::Result<Vec<SpeciesField>, PipelineError> {
        let requested = self.config.requested_species();
        let mappings = species::select(requested.as_deref()).map_err(|e| {
            let context = match &e {
                ConversionError::UnknownSpecies(id) => {
                    PipelineError::for_species(PipelineStep::SelectSpecies, id)
                }
                _ => PipelineError::at_step(PipelineStep::SelectSpecies),
            };
            Report::new(e).change_context(context)
        })?;

        mappings
            .into_iter()
            .map(|mapping| -> error_stack::Result<SpeciesField, PipelineError> {
                let field = source
                    .fields
                    .get(mapping.source_id)
                    .ok_or_else(|| ConversionError::MissingVariable(mapping.source_id.to_string()))
                    .and_then(|f| f.at_time(0))
                    .change_context_lazy(|| {
                        PipelineError::for_species(PipelineStep::SelectSpecies, mapping.source_id)
                    })?;
                Ok(SpeciesField { mapping, field })
            })
            .collect()
    }

    /// Apply `f` to every species, in parallel if so configured, keeping the species order.
    fn map_fields<F>(
        &self,
        step: PipelineStep,
        fields: &[SpeciesField],
        f: F,
    ) -> error_stack::Result<Vec<SpeciesField>, PipelineError>
    where
        F: Fn(&SpeciesField) -> Result<ScalarField, ConversionError> + Sync,
    {
        let apply = |sf: &SpeciesField| -> error_stack::Result<SpeciesField, PipelineError> {
            log::debug!("{step}: {}", sf.mapping.source_id);
            let field = f(sf).change_context_lazy(|| {
                PipelineError::for_species(step, sf.mapping.source_id)
            })?;
            Ok(SpeciesField {
                mapping: sf.mapping,
                field,
            })
        };

        if self.config.parallel {
            fields.par_iter().map(apply).collect()
        } else {
            fields.iter().map(apply).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::AxisKind;
    use crate::units;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use itertools::Itertools;
    use ndarray::{Array2, Array3, Array4};
    use rstest::{fixture, rstest};

    const TEMPERATURE: f64 = 280.0;

    fn source_grid() -> Grid {
        let lats = (0..=12).map(|j| -90.0 + 15.0 * j as f64).collect_vec();
        let lons = (0..16).map(|i| -180.0 + 22.5 * i as f64).collect_vec();
        Grid::regular_lat_lon(&lats, &lons).unwrap()
    }

    fn target_grid() -> Grid {
        let lat = Array2::from_shape_fn((2, 3), |(j, i)| 10.0 * j as f64 + i as f64);
        let lon = Array2::from_shape_fn((2, 3), |(j, i)| 30.0 + 15.0 * i as f64 + j as f64);
        let lat_b = Array2::from_shape_fn((3, 4), |(j, i)| -5.0 + 10.0 * j as f64 + i as f64);
        let lon_b = Array2::from_shape_fn((3, 4), |(j, i)| 22.5 + 15.0 * i as f64 + j as f64);
        Grid::from_centers(lat, lon)
            .unwrap()
            .with_corners(lat_b, lon_b)
            .unwrap()
            .with_tile(1)
            .unwrap()
    }

    /// Two source levels at 10 and 1000 hPa
    fn source_coordinate() -> HybridCoefficients {
        HybridCoefficients::new(vec![1.0, 1000.0, 0.0], vec![0.0, 0.0, 1.0]).unwrap()
    }

    /// Two target levels at 500 and 1000 hPa
    fn target_coordinate() -> HybridCoefficients {
        HybridCoefficients::new(vec![100.0, 50000.0, 0.0], vec![0.0, 0.0, 1.0]).unwrap()
    }

    #[fixture]
    fn source() -> SourceDataset {
        let (ny, nx) = source_grid().shape();
        let dms = ScalarField::new(
            "DMS",
            "kg kg-1",
            vec![AxisKind::Time, AxisKind::Level, AxisKind::Y, AxisKind::X],
            Array4::from_elem((1, 2, ny, nx), 2e-9).into_dyn(),
        )
        .unwrap();
        let so4 = ScalarField::level_y_x("SO4", "kg kg-1", Array3::from_elem((2, ny, nx), 1e-9));
        SourceDataset {
            grid: source_grid(),
            coordinate: source_coordinate(),
            fields: [dms, so4].into_iter().collect(),
        }
    }

    #[fixture]
    fn background() -> ModelBackground {
        let tracers = ["sphum", "liq_wat", "o3mr"]
            .into_iter()
            .map(|n| ScalarField::level_y_x(n, "kg/kg", Array3::zeros((2, 2, 3))))
            .collect();
        ModelBackground {
            tracers,
            temperature: ScalarField::level_y_x("t", "K", Array3::from_elem((2, 2, 3), TEMPERATURE)),
        }
    }

    fn config(species: &[&str], parallel: bool) -> PipelineConfig {
        PipelineConfig {
            species: Some(species.iter().map(|s| s.to_string()).collect()),
            parallel,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_full_conversion(source: SourceDataset, background: ModelBackground, #[case] parallel: bool) {
        let pipeline = ConversionPipeline::new(config(&["DMS", "SO4"], parallel));
        let out = pipeline
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap();

        assert_eq!(out.converted, ["dms", "so4"]);
        assert_eq!(out.declared_tracer_count, 5);
        assert_eq!(
            out.tracers.names().collect_vec(),
            ["sphum", "liq_wat", "o3mr", "dms", "so4"]
        );

        let so4 = out.tracers.get("so4").unwrap();
        assert_eq!(so4.units(), "ug/kg");
        for v in so4.data().iter() {
            assert_relative_eq!(*v, 1.0, max_relative = 1e-9);
        }

        let dms = out.tracers.get("dms").unwrap();
        assert_eq!(dms.units(), "ppm");
        assert_eq!(dms.long_name(), Some("dms"));
        let dms = dms.view_level_y_x().unwrap();
        for (k, p) in [50000.0, 101325.0].into_iter().enumerate() {
            let expected = 2e-9 * units::ppm_equivalent_factor(units::air_density(p, TEMPERATURE), 63.15);
            for v in dms.index_axis(ndarray::Axis(0), k).iter() {
                assert_relative_eq!(*v, expected, max_relative = 1e-9);
            }
        }
    }

    #[rstest]
    fn test_all_species_by_default(background: ModelBackground) {
        let (ny, nx) = source_grid().shape();
        let fields = species::MERRA2_AEROSOLS
            .iter()
            .map(|m| ScalarField::level_y_x(m.source_id, "kg kg-1", Array3::from_elem((2, ny, nx), 1e-10)))
            .collect();
        let source = SourceDataset {
            grid: source_grid(),
            coordinate: source_coordinate(),
            fields,
        };

        let out = ConversionPipeline::new(PipelineConfig::default())
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap();
        assert_eq!(out.converted.len(), 18);
        assert_eq!(out.declared_tracer_count, 21);
        assert_eq!(out.tracers.len(), 21);
    }

    #[rstest]
    fn test_gas_mode_is_passthrough(source: SourceDataset, background: ModelBackground) {
        let cfg = PipelineConfig {
            aerosols: false,
            ..Default::default()
        };
        let out = ConversionPipeline::new(cfg)
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap();
        assert!(out.converted.is_empty());
        assert_eq!(out.declared_tracer_count, 3);
        assert_eq!(out.tracers, background.tracers);
    }

    #[rstest]
    fn test_unknown_species(source: SourceDataset, background: ModelBackground) {
        let pipeline = ConversionPipeline::new(config(&["DMS", "NH3"], false));
        let err = pipeline
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &PipelineError::for_species(PipelineStep::SelectSpecies, "NH3")
        );
        assert_eq!(
            err.downcast_ref::<ConversionError>(),
            Some(&ConversionError::UnknownSpecies("NH3".to_string()))
        );
    }

    #[rstest]
    fn test_species_missing_from_source(source: SourceDataset, background: ModelBackground) {
        let pipeline = ConversionPipeline::new(config(&["MSA"], false));
        let err = pipeline
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap_err();
        assert_eq!(err.current_context().species.as_deref(), Some("MSA"));
        assert!(matches!(
            err.downcast_ref::<ConversionError>(),
            Some(ConversionError::MissingVariable(_))
        ));
    }

    #[rstest]
    fn test_target_grid_without_corners(source: SourceDataset, background: ModelBackground) {
        let tgt = target_grid();
        let bare = Grid::from_centers(tgt.lat().to_owned(), tgt.lon().to_owned()).unwrap();
        let err = ConversionPipeline::new(config(&["DMS"], true))
            .run(&source, &target_coordinate(), &bare, &background)
            .unwrap_err();
        assert_eq!(err.current_context().step, PipelineStep::HorizontalRegrid);
        assert!(matches!(
            err.downcast_ref::<ConversionError>(),
            Some(ConversionError::GridIncompatible(_))
        ));
    }

    #[rstest]
    fn test_non_monotonic_target_levels(source: SourceDataset, background: ModelBackground) {
        let bad = HybridCoefficients::new(vec![100.0, 90000.0, 50000.0], vec![0.0, 0.0, 0.0]).unwrap();
        let err = ConversionPipeline::new(config(&["DMS"], true))
            .run(&source, &bad, &target_grid(), &background)
            .unwrap_err();
        assert_eq!(err.current_context().step, PipelineStep::HalfLevelPressures);
        assert!(matches!(
            err.downcast_ref::<ConversionError>(),
            Some(ConversionError::InvalidCoordinate(_))
        ));
    }

    #[rstest]
    fn test_template_shape_mismatch(source: SourceDataset, mut background: ModelBackground) {
        background
            .tracers
            .insert(ScalarField::level_y_x("o3mr", "kg/kg", Array3::zeros((3, 2, 3))));
        let err = ConversionPipeline::new(config(&["SO4"], false))
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &PipelineError::for_species(PipelineStep::AssembleTracers, "SO4")
        );
    }

    #[rstest]
    fn test_missing_values_become_zero(background: ModelBackground) {
        // A source covering only the southern part of the target patch
        let grid = Grid::regular_lat_lon(&[-20.0, 5.0], &[0.0, 90.0]).unwrap();
        let field = ScalarField::level_y_x("SO2", "kg kg-1", Array3::from_elem((2, 2, 2), 1e-9));
        let source = SourceDataset {
            grid,
            coordinate: source_coordinate(),
            fields: std::iter::once(field).collect(),
        };

        let out = ConversionPipeline::new(config(&["SO2"], false))
            .run(&source, &target_coordinate(), &target_grid(), &background)
            .unwrap();
        let so2 = out.tracers.get("so2").unwrap().view_level_y_x().unwrap();
        // Row 0 of the target is at 0-2 N, row 1 at 10-12 N
        assert!(so2.iter().all(|v| !v.is_nan()));
        assert!(so2[(0, 0, 0)] > 0.0);
        assert_abs_diff_eq!(so2[(0, 1, 0)], 0.0);
        assert_abs_diff_eq!(so2[(1, 1, 2)], 0.0);
    }
}
