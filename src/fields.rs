//! Tagged physical fields and ordered tracer collections.
//!
//! A [`ScalarField`] carries its values along with the species name, unit and the meaning
//! of each axis. It deliberately holds no reference to the grid or vertical coordinate it
//! is defined on; those are always passed alongside it.
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};

use crate::error::ConversionError;

/// What a single array axis of a [`ScalarField`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AxisKind {
    #[strum(to_string = "time")]
    Time,
    #[strum(to_string = "level")]
    Level,
    #[strum(to_string = "y")]
    Y,
    #[strum(to_string = "x")]
    X,
}

/// The axis layout every 3-D field in the pipeline uses.
pub const LEVEL_Y_X: [AxisKind; 3] = [AxisKind::Level, AxisKind::Y, AxisKind::X];

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    name: String,
    units: String,
    long_name: Option<String>,
    axes: Vec<AxisKind>,
    data: ArrayD<f64>,
}

impl ScalarField {
    /// Create a field, checking that there is one axis tag per array dimension.
    pub fn new<N: ToString, U: ToString>(
        name: N,
        units: U,
        axes: Vec<AxisKind>,
        data: ArrayD<f64>,
    ) -> Result<Self, ConversionError> {
        let name = name.to_string();
        if axes.len() != data.ndim() {
            return Err(ConversionError::shape_mismatch(
                format!("axes of field '{name}'"),
                data.ndim(),
                axes.len(),
            ));
        }

        Ok(Self {
            name,
            units: units.to_string(),
            long_name: None,
            axes,
            data,
        })
    }

    /// Convenience constructor for a (level, y, x) field.
    pub fn level_y_x<N: ToString, U: ToString>(name: N, units: U, data: Array3<f64>) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            long_name: None,
            axes: LEVEL_Y_X.to_vec(),
            data: data.into_dyn(),
        }
    }

    pub fn with_long_name<S: ToString>(mut self, long_name: S) -> Self {
        self.long_name = Some(long_name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn long_name(&self) -> Option<&str> {
        self.long_name.as_deref()
    }

    pub fn axes(&self) -> &[AxisKind] {
        &self.axes
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Return a copy of this field reduced to one time step.
    ///
    /// Fields without a time axis are returned unchanged.
    pub fn at_time(&self, itime: usize) -> Result<Self, ConversionError> {
        let Some(time_axis) = self.axes.iter().position(|a| *a == AxisKind::Time) else {
            return Ok(self.clone());
        };

        let ntime = self.data.len_of(Axis(time_axis));
        if itime >= ntime {
            return Err(ConversionError::shape_mismatch(
                format!("time axis of field '{}'", self.name),
                format!("more than {itime} time steps"),
                ntime,
            ));
        }

        let data = self.data.index_axis(Axis(time_axis), itime).to_owned();
        let axes = self
            .axes
            .iter()
            .copied()
            .filter(|a| *a != AxisKind::Time)
            .collect_vec();
        Ok(Self {
            name: self.name.clone(),
            units: self.units.clone(),
            long_name: self.long_name.clone(),
            axes,
            data,
        })
    }

    /// View the data as a (level, y, x) array.
    ///
    /// Fails with a shape mismatch if the axes are anything other than level, y, x in that order.
    pub fn view_level_y_x(&self) -> Result<ArrayView3<'_, f64>, ConversionError> {
        if self.axes != LEVEL_Y_X {
            return Err(ConversionError::shape_mismatch(
                format!("axes of field '{}'", self.name),
                LEVEL_Y_X.iter().join(", "),
                self.axes.iter().join(", "),
            ));
        }

        // The axes check guarantees three dimensions
        self.data.view().into_dimensionality::<Ix3>().map_err(|e| {
            ConversionError::shape_mismatch(format!("field '{}'", self.name), "3-D array", e)
        })
    }
}

/// An ordered mapping of species name to field.
///
/// Insertion order is preserved so that output files list tracers in the order they were
/// added; replacing an existing tracer keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracerCollection {
    fields: IndexMap<String, ScalarField>,
}

impl TracerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field under its own name, returning the field it replaced, if any.
    pub fn insert(&mut self, field: ScalarField) -> Option<ScalarField> {
        self.fields.insert(field.name.clone(), field)
    }

    pub fn get(&self, name: &str) -> Option<&ScalarField> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<ScalarField> for TracerCollection {
    fn from_iter<T: IntoIterator<Item = ScalarField>>(iter: T) -> Self {
        let mut coll = Self::new();
        for field in iter {
            coll.insert(field);
        }
        coll
    }
}
