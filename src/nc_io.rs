//! netCDF loaders and writer around the conversion pipeline.
//!
//! These read the MERRA-2 species file, the model control file (`vcoord`), one model
//! tracer tile file and its grid_spec file, and write the enriched tracer tile back out.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use ndarray::{ArrayD, Ix1, Ix2, Ix3};
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    AttributeValue, Extents,
};

use crate::fields::{AxisKind, ScalarField, TracerCollection};
use crate::grid::Grid;
use crate::pipeline::{ConversionOutput, ModelBackground, SourceDataset};
use crate::pressure::HybridCoefficients;
use crate::species::MERRA2_AEROSOLS;

/// Name of the dimension recording how many tracers the model should read.
pub const TRACER_COUNT_DIM: &str = "ntracer";

#[derive(Debug, thiserror::Error)]
pub enum NcIoError {
    #[error("Could not open {}", .0.display())]
    Open(PathBuf),
    #[error("Could not create {}", .0.display())]
    Create(PathBuf),
    #[error("{} has no variable '{var}'", .path.display())]
    MissingVariable { path: PathBuf, var: String },
    #[error("Error reading '{var}' from {}", .path.display())]
    Read { path: PathBuf, var: String },
    #[error("Error writing '{name}' to {}", .path.display())]
    Write { path: PathBuf, name: String },
    #[error("Unexpected data in '{var}' of {}: {reason}", .path.display())]
    BadData {
        path: PathBuf,
        var: String,
        reason: String,
    },
}

impl NcIoError {
    fn read<S: ToString>(path: &Path, var: S) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            var: var.to_string(),
        }
    }

    fn write<S: ToString>(path: &Path, name: S) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            name: name.to_string(),
        }
    }

    fn bad_data<S: ToString, R: ToString>(path: &Path, var: S, reason: R) -> Self {
        Self::BadData {
            path: path.to_path_buf(),
            var: var.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Path of the grid_spec file for one tile, e.g. `C384_grid_spec.tile1.nc`.
pub fn grid_spec_path(grid_dir: &Path, resolution: &str, tile: u8) -> PathBuf {
    grid_dir.join(format!("{resolution}_grid_spec.tile{tile}.nc"))
}

/// Read the MERRA-2 species listed in the species table that are present in `path`.
pub fn read_merra2(path: &Path) -> error_stack::Result<SourceDataset, NcIoError> {
    let ds = open(path)?;
    let lat = read_f64(&ds, path, "lat")?
        .into_dimensionality::<Ix1>()
        .change_context_lazy(|| NcIoError::bad_data(path, "lat", "expected a 1-D variable"))?;
    let lon = read_f64(&ds, path, "lon")?
        .into_dimensionality::<Ix1>()
        .change_context_lazy(|| NcIoError::bad_data(path, "lon", "expected a 1-D variable"))?;
    let grid = Grid::regular_lat_lon(&lat.to_vec(), &lon.to_vec())
        .change_context_lazy(|| NcIoError::bad_data(path, "lat/lon", "invalid grid"))?;

    let mut fields = TracerCollection::new();
    for mapping in MERRA2_AEROSOLS {
        let Some(var) = ds.variable(mapping.source_id) else {
            log::debug!("{} not in {}", mapping.source_id, path.display());
            continue;
        };

        let axes = var
            .dimensions()
            .iter()
            .map(|d| merra2_axis(&d.name()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                NcIoError::bad_data(path, mapping.source_id, "unexpected dimension names")
            })?;
        let data = var
            .get::<f64, _>(Extents::All)
            .change_context_lazy(|| NcIoError::read(path, mapping.source_id))?;
        let units = string_attribute(&var, "units").unwrap_or_else(|| "kg kg-1".to_string());
        let field = ScalarField::new(mapping.source_id, units, axes, data)
            .change_context_lazy(|| NcIoError::bad_data(path, mapping.source_id, "inconsistent axes"))?;
        fields.insert(field);
    }

    log::info!("Read {} species from {}", fields.len(), path.display());
    Ok(SourceDataset::merra2(grid, fields))
}

fn merra2_axis(dim_name: &str) -> Option<AxisKind> {
    match dim_name {
        "time" => Some(AxisKind::Time),
        "lev" => Some(AxisKind::Level),
        "lat" => Some(AxisKind::Y),
        "lon" => Some(AxisKind::X),
        _ => None,
    }
}

/// Read the model's hybrid coefficients from the `vcoord` variable of its control file.
pub fn read_vcoord(path: &Path) -> error_stack::Result<HybridCoefficients, NcIoError> {
    let ds = open(path)?;
    let vcoord = read_f64(&ds, path, "vcoord")?
        .into_dimensionality::<Ix2>()
        .change_context_lazy(|| NcIoError::bad_data(path, "vcoord", "expected a 2-D variable"))?;
    HybridCoefficients::from_vcoord(vcoord.view())
        .change_context_lazy(|| NcIoError::bad_data(path, "vcoord", "invalid coefficients"))
}

/// Read the background tracers and temperature from a model tile file.
///
/// Every variable with the same dimensions as `template_tracer` (other than the temperature)
/// is taken as a tracer.
pub fn read_background(
    path: &Path,
    template_tracer: &str,
    temperature_variable: &str,
) -> error_stack::Result<ModelBackground, NcIoError> {
    let ds = open(path)?;
    let template = ds.variable(template_tracer).ok_or_else(|| NcIoError::MissingVariable {
        path: path.to_path_buf(),
        var: template_tracer.to_string(),
    })?;
    let tracer_dims = dim_names(&template);

    let mut tracers = TracerCollection::new();
    for var in ds.variables() {
        let name = var.name();
        if name == temperature_variable || dim_names(&var) != tracer_dims {
            continue;
        }
        tracers.insert(read_level_y_x(&ds, path, &name)?);
    }

    let temperature = read_level_y_x(&ds, path, temperature_variable)?;
    log::info!("Read {} background tracers from {}", tracers.len(), path.display());
    Ok(ModelBackground {
        tracers,
        temperature,
    })
}

/// Read the cell centers and corners of one cubed-sphere tile.
pub fn read_grid_spec(path: &Path, tile: u8) -> error_stack::Result<Grid, NcIoError> {
    let ds = open(path)?;
    let read_2d = |name: &str| {
        read_f64(&ds, path, name)?
            .into_dimensionality::<Ix2>()
            .change_context_lazy(|| NcIoError::bad_data(path, name, "expected a 2-D variable"))
    };

    let (lat, lon) = (read_2d("grid_latt")?, read_2d("grid_lont")?);
    let (lat_b, lon_b) = (read_2d("grid_lat")?, read_2d("grid_lon")?);
    let grid = Grid::from_centers(lat, lon)
        .and_then(|g| g.with_corners(lat_b, lon_b))
        .and_then(|g| g.with_tile(tile))
        .change_context_lazy(|| NcIoError::bad_data(path, "grid_*", "inconsistent grid arrays"))?;
    Ok(grid)
}

/// Write the converted tracers to `out_path`, copying everything else from `template_path`.
///
/// Converted tracers take the dimensions, type and attributes of `template_tracer`, with
/// `long_name` and `units` replaced. The [`TRACER_COUNT_DIM`] dimension is set to the
/// declared tracer count.
pub fn write_tracers(
    template_path: &Path,
    out_path: &Path,
    template_tracer: &str,
    output: &ConversionOutput,
) -> error_stack::Result<(), NcIoError> {
    let src = open(template_path)?;
    let mut dst = netcdf::create(out_path)
        .change_context_lazy(|| NcIoError::Create(out_path.to_path_buf()))?;

    for dim in src.dimensions() {
        let name = dim.name();
        if name == TRACER_COUNT_DIM {
            continue;
        }
        let res = if dim.is_unlimited() {
            dst.add_unlimited_dimension(&name)
        } else {
            dst.add_dimension(&name, dim.len())
        };
        res.change_context_lazy(|| NcIoError::write(out_path, &name))?;
    }
    dst.add_dimension(TRACER_COUNT_DIM, output.declared_tracer_count)
        .change_context_lazy(|| NcIoError::write(out_path, TRACER_COUNT_DIM))?;

    for attr in src.attributes() {
        let value = attr
            .value()
            .change_context_lazy(|| NcIoError::read(template_path, attr.name()))?;
        dst.add_attribute(attr.name(), value)
            .change_context_lazy(|| NcIoError::write(out_path, attr.name()))?;
    }

    for var in src.variables() {
        let name = var.name();
        if output.converted.contains(&name) {
            continue;
        }

        let Some(values) =
            NcArray::get_from(&var).change_context_lazy(|| NcIoError::read(template_path, &name))?
        else {
            log::warn!("Skipping '{name}', its type cannot be copied");
            continue;
        };
        let dims = dim_names(&var);
        let dims = dims.iter().map(|d| d.as_str()).collect::<Vec<_>>();
        let mut new_var = values
            .put_to(&mut dst, &name, &dims)
            .change_context_lazy(|| NcIoError::write(out_path, &name))?;
        copy_attributes(&var, &mut new_var, template_path, out_path)?;
    }

    let template = src.variable(template_tracer).ok_or_else(|| NcIoError::MissingVariable {
        path: template_path.to_path_buf(),
        var: template_tracer.to_string(),
    })?;
    let tracer_dims = dim_names(&template);
    let tracer_dims = tracer_dims.iter().map(|d| d.as_str()).collect::<Vec<_>>();
    let as_f32 = matches!(template.vartype(), NcVariableType::Float(FloatType::F32));

    for name in output.converted.iter() {
        let field = output
            .tracers
            .get(name)
            .ok_or_else(|| NcIoError::bad_data(out_path, name, "converted tracer missing from output"))?;
        let values = if as_f32 {
            NcArray::F32(field.data().mapv(|v| v as f32))
        } else {
            NcArray::F64(field.data().clone())
        };
        let mut new_var = values
            .put_to(&mut dst, name, &tracer_dims)
            .change_context_lazy(|| NcIoError::write(out_path, name))?;
        copy_attributes(&template, &mut new_var, template_path, out_path)?;
        new_var
            .put_attribute("long_name", field.long_name().unwrap_or(name.as_str()))
            .change_context_lazy(|| NcIoError::write(out_path, format!("{name}:long_name")))?;
        new_var
            .put_attribute("units", field.units())
            .change_context_lazy(|| NcIoError::write(out_path, format!("{name}:units")))?;
        log::debug!("Wrote {name} ({})", field.units());
    }

    log::info!(
        "Wrote {} with {} = {}",
        out_path.display(),
        TRACER_COUNT_DIM,
        output.declared_tracer_count
    );
    Ok(())
}

fn open(path: &Path) -> error_stack::Result<netcdf::File, NcIoError> {
    netcdf::open(path).change_context_lazy(|| NcIoError::Open(path.to_path_buf()))
}

fn read_f64(ds: &netcdf::File, path: &Path, name: &str) -> error_stack::Result<ArrayD<f64>, NcIoError> {
    let var = ds.variable(name).ok_or_else(|| NcIoError::MissingVariable {
        path: path.to_path_buf(),
        var: name.to_string(),
    })?;
    var.get::<f64, _>(Extents::All)
        .change_context_lazy(|| NcIoError::read(path, name))
}

fn read_level_y_x(ds: &netcdf::File, path: &Path, name: &str) -> error_stack::Result<ScalarField, NcIoError> {
    let data = read_f64(ds, path, name)?
        .into_dimensionality::<Ix3>()
        .change_context_lazy(|| NcIoError::bad_data(path, name, "expected a (level, y, x) variable"))?;
    let units = ds
        .variable(name)
        .and_then(|v| string_attribute(&v, "units"))
        .unwrap_or_default();
    Ok(ScalarField::level_y_x(name, units, data))
}

fn dim_names(var: &netcdf::Variable) -> Vec<String> {
    var.dimensions().iter().map(|d| d.name()).collect()
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name) {
        Some(Ok(AttributeValue::Str(s))) => Some(s),
        _ => None,
    }
}

fn copy_attributes(
    src: &netcdf::Variable,
    dst: &mut netcdf::VariableMut,
    src_path: &Path,
    dst_path: &Path,
) -> error_stack::Result<(), NcIoError> {
    for attr in src.attributes() {
        let value = attr
            .value()
            .change_context_lazy(|| NcIoError::read(src_path, attr.name()))?;
        dst.put_attribute(attr.name(), value)
            .change_context_lazy(|| NcIoError::write(dst_path, attr.name()))?;
    }
    Ok(())
}

/// Any numeric netCDF variable's data, so that variables can be copied between files
/// without knowing their type in advance.
enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Char(ArrayD<u8>),
}

macro_rules! nc_array_dispatch {
    ($self:expr, $arr:ident, $t:ident => $body:expr) => {
        match $self {
            NcArray::I8($arr) => { type $t = i8; $body }
            NcArray::I16($arr) => { type $t = i16; $body }
            NcArray::I32($arr) => { type $t = i32; $body }
            NcArray::I64($arr) => { type $t = i64; $body }
            NcArray::U8($arr) | NcArray::Char($arr) => { type $t = u8; $body }
            NcArray::U16($arr) => { type $t = u16; $body }
            NcArray::U32($arr) => { type $t = u32; $body }
            NcArray::U64($arr) => { type $t = u64; $body }
            NcArray::F32($arr) => { type $t = f32; $body }
            NcArray::F64($arr) => { type $t = f64; $body }
        }
    };
}

impl NcArray {
    /// Read a variable's values; returns `None` for compound, opaque, enum, variable
    /// length and string types, which are not copied.
    fn get_from(var: &netcdf::Variable) -> netcdf::Result<Option<Self>> {
        let arr = match var.vartype() {
            NcVariableType::Int(IntType::I8) => Self::I8(var.get(Extents::All)?),
            NcVariableType::Int(IntType::I16) => Self::I16(var.get(Extents::All)?),
            NcVariableType::Int(IntType::I32) => Self::I32(var.get(Extents::All)?),
            NcVariableType::Int(IntType::I64) => Self::I64(var.get(Extents::All)?),
            NcVariableType::Int(IntType::U8) => Self::U8(var.get(Extents::All)?),
            NcVariableType::Int(IntType::U16) => Self::U16(var.get(Extents::All)?),
            NcVariableType::Int(IntType::U32) => Self::U32(var.get(Extents::All)?),
            NcVariableType::Int(IntType::U64) => Self::U64(var.get(Extents::All)?),
            NcVariableType::Float(FloatType::F32) => Self::F32(var.get(Extents::All)?),
            NcVariableType::Float(FloatType::F64) => Self::F64(var.get(Extents::All)?),
            NcVariableType::Char => Self::Char(var.get(Extents::All)?),
            _ => return Ok(None),
        };
        Ok(Some(arr))
    }

    /// Create a variable in `file` and write this data to it.
    fn put_to<'f>(
        &self,
        file: &'f mut netcdf::FileMut,
        name: &str,
        dims: &[&str],
    ) -> netcdf::Result<netcdf::VariableMut<'f>> {
        nc_array_dispatch!(self, arr, T => {
            let mut var = file.add_variable::<T>(name, dims)?;
            var.put(arr.view(), Extents::All)?;
            Ok(var)
        })
    }
}
