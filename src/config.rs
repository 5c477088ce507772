//! Run configuration for the conversion pipeline.
//!
//! Settings are layered with [`figment`]: built-in defaults first, then an optional
//! TOML file, then environment variables prefixed with `FV3_ICS_` (e.g.
//! `FV3_ICS_TEMPLATE_TRACER=sphum`). A TOML file might look like:
//!
//! ```toml
//! aerosols = true
//! species = ["DMS", "SO2", "SO4", "MSA"]
//! template_tracer = "o3mr"
//! temperature_variable = "t"
//! ```
use std::path::Path;

use error_stack::Report;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "FV3_ICS_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load the pipeline configuration: {0}")]
    Invalid(String),
    #[error("Configuration file {} does not exist", .0.display())]
    FileNotFound(std::path::PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Convert the aerosol species. When `false`, the background tracers are passed
    /// through unchanged.
    pub aerosols: bool,

    /// Reanalysis species to convert. `None` means every species in the table.
    pub species: Option<Vec<String>>,

    /// Background tracer whose shape the converted tracers must match.
    pub template_tracer: String,

    /// Name of the temperature field in the background dataset.
    pub temperature_variable: String,

    /// Number of tracers the model file declares before any are added.
    pub base_tracer_count: usize,

    /// Process species in parallel.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aerosols: true,
            species: None,
            template_tracer: "o3mr".to_string(),
            temperature_variable: "t".to_string(),
            base_tracer_count: 3,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Load the configuration from defaults, an optional TOML file and the environment.
    pub fn load(toml_file: Option<&Path>) -> error_stack::Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));
        if let Some(p) = toml_file {
            if !p.exists() {
                return Err(ConfigError::FileNotFound(p.to_path_buf()).into());
            }
            figment = figment.merge(Toml::file(p));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load the configuration from a TOML string layered over the defaults (no environment).
    pub fn from_toml_str(toml: &str) -> error_stack::Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::string(toml));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> error_stack::Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| Report::new(ConfigError::Invalid(e.to_string())))?;
        log::debug!("Pipeline configuration: {config:?}");
        Ok(config)
    }

    /// The species requested for conversion, or an empty list in non-aerosol mode.
    pub fn requested_species(&self) -> Option<Vec<String>> {
        if self.aerosols {
            self.species.clone()
        } else {
            Some(vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.requested_species(), None);
    }

    #[test]
    fn test_toml_overrides() {
        let config = PipelineConfig::from_toml_str(
            r#"
            species = ["DMS", "SO2"]
            template_tracer = "sphum"
            parallel = false
            "#,
        )
        .unwrap();
        assert_eq!(config.species, Some(vec!["DMS".to_string(), "SO2".to_string()]));
        assert_eq!(config.template_tracer, "sphum");
        assert_eq!(config.temperature_variable, "t");
        assert!(!config.parallel);
    }

    #[test]
    fn test_gas_mode_requests_nothing() {
        let config = PipelineConfig::from_toml_str("aerosols = false").unwrap();
        assert_eq!(config.requested_species(), Some(vec![]));
    }

    #[test]
    fn test_unknown_key() {
        let err = PipelineConfig::from_toml_str("tracer_file = 'gfs_data.tile1.nc'").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Some(Path::new("/no/such/fv3_ics.toml"))).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::FileNotFound(_)));
    }
}
