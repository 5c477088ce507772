use num_traits::Float;
use std::fmt::Debug;

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("Input arrays were different lengths (x.len() = {x_len}, y.len() = {y_len}")]
    InputLengthMismatch { x_len: usize, y_len: usize },
    #[error(
        "Input arrays were too short, needed at least {req_len} elements but got only {actual_len}"
    )]
    InputTooShort { req_len: usize, actual_len: usize },
    #[error(
        "Requested output coordinate ({out}) falls outside the input domain ({left} to {right})"
    )]
    OutOfDomain {
        left: String,
        right: String,
        out: String,
    },
    #[error("Input x coordinates must be strictly increasing, but x[{index}] <= x[{}]", .index - 1)]
    NotIncreasing { index: usize },
}

pub trait InterpolationMethod {
    fn interp1d<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
    ) -> Result<F, InterpolationError>;

    /// Interpolate to each of `output_x`, putting NaN wherever the point is outside the
    /// input domain and this method does not extrapolate.
    fn interp1d_many<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: &[F],
    ) -> Result<Vec<F>, InterpolationError> {
        output_x
            .iter()
            .map(|&x| match self.interp1d(input_x, input_y, x) {
                Err(InterpolationError::OutOfDomain { .. }) => Ok(F::nan()),
                r => r,
            })
            .collect()
    }

    fn check_1d_inputs<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
        must_be_in_bounds: bool,
        min_len: usize,
    ) -> Result<(), InterpolationError> {
        if input_x.len() != input_y.len() {
            return Err(InterpolationError::InputLengthMismatch {
                x_len: input_x.len(),
                y_len: input_y.len(),
            });
        }

        // Now we know both are the same length, so only need to test 1
        if input_x.len() < min_len {
            return Err(InterpolationError::InputTooShort {
                req_len: min_len,
                actual_len: input_x.len(),
            });
        }

        if must_be_in_bounds {
            let (Some(left_bound), Some(right_bound)) = (
                input_x.iter().copied().reduce(F::min),
                input_x.iter().copied().reduce(F::max),
            ) else {
                // Only empty input gets here, which means min_len was 0 and the
                // interpolator must handle the 0 length case
                return Ok(());
            };

            // NaN compares false both ways, so it must be checked on its own
            if output_x.is_nan() || output_x < left_bound || output_x > right_bound {
                return Err(InterpolationError::OutOfDomain {
                    left: format!("{left_bound:?}"),
                    right: format!("{right_bound:?}"),
                    out: format!("{output_x:?}"),
                });
            }
        }

        Ok(())
    }
}

/// Piecewise linear interpolation over strictly increasing x values.
pub struct LinearInterp {
    allow_extrapolation: bool,
}

impl LinearInterp {
    pub fn new(allow_extrapolation: bool) -> Self {
        Self {
            allow_extrapolation,
        }
    }
}

impl InterpolationMethod for LinearInterp {
    fn interp1d<F: Float + Debug>(
        &self,
        input_x: &[F],
        input_y: &[F],
        output_x: F,
    ) -> Result<F, InterpolationError> {
        self.check_1d_inputs(input_x, input_y, output_x, !self.allow_extrapolation, 2)?;
        if let Some(index) = (1..input_x.len()).find(|&i| input_x[i] <= input_x[i - 1]) {
            return Err(InterpolationError::NotIncreasing { index });
        }

        // Index of the left end of the segment to use; the first or last segment
        // when extrapolating.
        let n = input_x.len();
        let i = input_x[1..n - 1]
            .iter()
            .take_while(|&&x| x <= output_x)
            .count();

        let (x0, x1) = (input_x[i], input_x[i + 1]);
        let (y0, y1) = (input_y[i], input_y[i + 1]);
        let t = (output_x - x0) / (x1 - x0);
        Ok(y0 + t * (y1 - y0))
    }
}
