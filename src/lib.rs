//! Convert MERRA-2 aerosol reanalysis fields into FV3 cubed-sphere tracer initial conditions.
//!
//! The stages are independent modules: hybrid pressure coordinates ([`pressure`]),
//! bilinear horizontal regridding ([`regrid`]), log-pressure vertical remapping
//! ([`vertical`]) and tracer unit conversion ([`conversion`]). [`pipeline`] chains them.
pub mod config;
pub mod conversion;
pub mod error;
pub mod fields;
pub mod grid;
pub mod interpolation;
pub mod logging;
#[cfg(feature = "netcdf")]
pub mod nc_io;
pub mod pipeline;
pub mod pressure;
pub mod regrid;
pub mod species;
pub mod units;
pub mod vertical;
