use ndarray::{Array1, ScalarOperand};
use num::{Float, FromPrimitive, NumCast, ToPrimitive};
use std::fmt;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Floating point type the detectors are generic over (`f32` or `f64`).
pub trait FType:
    Float
    + FromPrimitive
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + fmt::Debug
    + fmt::Display
    + ScalarOperand
    + Send
    + Sync
{
}

impl<T> FType for T where
    T: Float
        + FromPrimitive
        + AddAssign
        + SubAssign
        + MulAssign
        + DivAssign
        + fmt::Debug
        + fmt::Display
        + ScalarOperand
        + Send
        + Sync
{
}

/// A single observation of the stream. Its length is fixed by the first observation a
/// detector sees.
///
/// # Example
///
/// ```
/// use light_outlier::common::Observation;
/// use ndarray::array;
///
/// let obs: Observation<f32> = array![0.5, 1.5, -2.0];
/// assert_eq!(obs.len(), 3);
/// ```
pub type Observation<F> = Array1<F>;

// Numeric cast into `F`. Cannot fail for the float types `FType` covers.
#[inline]
pub(crate) fn to_float<F: FType, T: ToPrimitive>(value: T) -> F {
    <F as NumCast>::from(value).unwrap_or_else(F::nan)
}
