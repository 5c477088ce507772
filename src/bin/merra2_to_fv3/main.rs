use std::{path::{Path, PathBuf}, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use fv3_ics::{
    config::PipelineConfig,
    grid::tile_from_file_name,
    logging::init_logging,
    nc_io,
    pipeline::ConversionPipeline,
};

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref()) {
        eprintln!("Could not set up logging: {e}");
        return ExitCode::FAILURE;
    }

    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("An error occurred:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Add MERRA-2 aerosol tracers to one tile of FV3 initial conditions.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// MERRA-2 file with the aerosol species on the 72-level grid.
    merra_file: PathBuf,

    /// FV3 control file containing the `vcoord` hybrid coefficients.
    core_file: PathBuf,

    /// FV3 tracer file for one tile, e.g. gfs_data.tile1.nc.
    tracer_file: PathBuf,

    /// Model resolution, e.g. C384. Used to find the grid_spec file.
    #[clap(short, long)]
    resolution: String,

    /// Directory containing the `<RESOLUTION>_grid_spec.tile<N>.nc` files.
    #[clap(short, long)]
    grid_dir: PathBuf,

    /// Tile number (1-6). Taken from the tracer file name if not given.
    #[clap(short, long)]
    tile: Option<u8>,

    /// Skip the aerosol species and only rewrite the tracer count. Overrides the
    /// `aerosols` setting in the configuration.
    #[clap(long)]
    gas_only: bool,

    /// TOML file with pipeline settings.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Write the result here instead of replacing TRACER_FILE. Without this, TRACER_FILE
    /// is renamed to TRACER_FILE.old (which must not exist yet) and the result written
    /// in its place.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Also write a DEBUG level log to this file.
    #[clap(long)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Input(String),
    #[error("Could not read the inputs")]
    Reading,
    #[error("The conversion failed")]
    Conversion,
    #[error("Could not write the output")]
    Writing,
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let mut config = PipelineConfig::load(clargs.config.as_deref())
        .change_context_lazy(|| CliError::Input("invalid configuration".to_string()))?;
    if clargs.gas_only {
        config.aerosols = false;
    }

    let tile = match clargs.tile {
        Some(t) => t,
        None => tracer_file_tile(&clargs.tracer_file)?,
    };
    log::info!("Processing tile {tile} of {}", clargs.resolution);

    let out_file = clargs.output.clone().unwrap_or_else(|| clargs.tracer_file.clone());
    let backup = if clargs.output.is_none() {
        Some(unused_backup_path(&clargs.tracer_file)?)
    } else {
        None
    };

    let grid_file = nc_io::grid_spec_path(&clargs.grid_dir, &clargs.resolution, tile);
    let target_grid = nc_io::read_grid_spec(&grid_file, tile).change_context(CliError::Reading)?;
    let target_coordinate = nc_io::read_vcoord(&clargs.core_file).change_context(CliError::Reading)?;
    let background = nc_io::read_background(
        &clargs.tracer_file,
        &config.template_tracer,
        &config.temperature_variable,
    )
    .change_context(CliError::Reading)?;
    let source = nc_io::read_merra2(&clargs.merra_file).change_context(CliError::Reading)?;

    let template_tracer = config.template_tracer.clone();
    let pipeline = ConversionPipeline::new(config);
    let output = pipeline
        .run(&source, &target_coordinate, &target_grid, &background)
        .change_context(CliError::Conversion)?;

    // Write next to the final file first, so a failed write never clobbers anything
    let tmp_file = with_suffix(&out_file, ".tmp");
    if let Err(e) = nc_io::write_tracers(&clargs.tracer_file, &tmp_file, &template_tracer, &output) {
        if let Err(rm_err) = std::fs::remove_file(&tmp_file) {
            log::warn!("Could not remove partial output {}: {rm_err}", tmp_file.display());
        }
        return Err(e.change_context(CliError::Writing));
    }

    if let Some(backup) = backup {
        std::fs::rename(&clargs.tracer_file, &backup)
            .change_context(CliError::Writing)
            .attach_printable_lazy(|| {
                format!("Could not move {} to {}", clargs.tracer_file.display(), backup.display())
            })?;
        log::info!("Moved {} to {}", clargs.tracer_file.display(), backup.display());
    }
    std::fs::rename(&tmp_file, &out_file)
        .change_context(CliError::Writing)
        .attach_printable_lazy(|| {
            format!("Could not move {} to {}", tmp_file.display(), out_file.display())
        })?;

    println!(
        "Added {} tracers to {}: {}",
        output.converted.len(),
        out_file.display(),
        output.converted.join(", ")
    );
    Ok(())
}

fn tracer_file_tile(tracer_file: &Path) -> error_stack::Result<u8, CliError> {
    tracer_file
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(tile_from_file_name)
        .ok_or_else(|| {
            CliError::Input(format!(
                "cannot infer the tile from {}, pass --tile",
                tracer_file.display()
            ))
            .into()
        })
}

/// The `.old` backup path for the tracer file, which must not exist yet.
fn unused_backup_path(tracer_file: &Path) -> error_stack::Result<PathBuf, CliError> {
    let backup = with_suffix(tracer_file, ".old");
    if backup.exists() {
        return Err(CliError::Input(format!(
            "backup {} already exists, remove it or pass --output",
            backup.display()
        ))
        .into());
    }
    Ok(backup)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("INPUT/gfs_data.tile3.nc"), ".old"),
            PathBuf::from("INPUT/gfs_data.tile3.nc.old")
        );
    }

    #[test]
    fn test_existing_backup_is_kept() {
        let dir = std::env::temp_dir().join(format!("fv3_ics_backup_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let tracer_file = dir.join("gfs_data.tile2.nc");
        let backup = dir.join("gfs_data.tile2.nc.old");
        let _ = std::fs::remove_file(&backup);

        assert_eq!(unused_backup_path(&tracer_file).unwrap(), backup);
        std::fs::write(&backup, b"pristine").unwrap();
        let err = unused_backup_path(&tracer_file).unwrap_err();
        assert!(matches!(err.current_context(), CliError::Input(_)));
        assert_eq!(std::fs::read(&backup).unwrap(), b"pristine");
    }

    #[test]
    fn test_tracer_file_tile() {
        assert_eq!(tracer_file_tile(Path::new("/data/gfs_data.tile5.nc")).unwrap(), 5);
        assert!(tracer_file_tile(Path::new("/data/gfs_data.nc")).is_err());
    }
}
