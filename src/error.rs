//! Common errors across the fv3-ics crate

use std::fmt::Display;

/// Errors raised by the individual conversion components.
///
/// All of these abort the current conversion. The pipeline wraps them in a
/// [`PipelineError`] so that the report also says which step and species failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// Two arrays that must agree in length or shape did not.
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },
    /// A grid lacks the geometry needed to build regridding weights.
    #[error("Grid is not usable for bilinear regridding: {0}")]
    GridIncompatible(String),
    /// A vertical coordinate is not strictly increasing in pressure.
    #[error("Invalid vertical coordinate: {0}")]
    InvalidCoordinate(String),
    /// The species is not in the fixed species table.
    #[error("Species '{0}' is not in the species mapping table")]
    UnknownSpecies(String),
    /// The species is in the table, but the source dataset does not contain it.
    #[error("Variable '{0}' is not present in the input dataset")]
    MissingVariable(String),
    #[error("Species '{0}' is converted to a ppm equivalent but has no molecular weight")]
    MissingMolecularWeight(String),
    #[error("Tile index {0} is outside the valid range 1 to 6")]
    InvalidTile(u8),
}

impl ConversionError {
    pub(crate) fn shape_mismatch<W: ToString, E: Display, A: Display>(
        what: W,
        expected: E,
        actual: A,
    ) -> Self {
        Self::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn grid_incompatible<S: ToString>(reason: S) -> Self {
        Self::GridIncompatible(reason.to_string())
    }

    pub(crate) fn invalid_coordinate<S: ToString>(reason: S) -> Self {
        Self::InvalidCoordinate(reason.to_string())
    }
}

/// The steps of the conversion pipeline, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PipelineStep {
    #[strum(to_string = "species selection")]
    SelectSpecies,
    #[strum(to_string = "half-level pressure calculation")]
    HalfLevelPressures,
    #[strum(to_string = "horizontal regridding")]
    HorizontalRegrid,
    #[strum(to_string = "vertical remapping")]
    VerticalRemap,
    #[strum(to_string = "3-D pressure reconstruction")]
    PressureReconstruction,
    #[strum(to_string = "air density calculation")]
    AirDensity,
    #[strum(to_string = "tracer assembly and unit conversion")]
    AssembleTracers,
}

/// Top-level error of a conversion run, identifying where it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineError {
    pub step: PipelineStep,
    pub species: Option<String>,
}

impl PipelineError {
    pub(crate) fn at_step(step: PipelineStep) -> Self {
        Self { step, species: None }
    }

    pub(crate) fn for_species<S: ToString>(step: PipelineStep, species: S) -> Self {
        Self {
            step,
            species: Some(species.to_string()),
        }
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(species) = &self.species {
            write!(f, "Conversion failed during {} for species '{species}'", self.step)
        } else {
            write!(f, "Conversion failed during {}", self.step)
        }
    }
}

impl std::error::Error for PipelineError {}
