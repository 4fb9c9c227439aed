//! Element types.

use std::fmt;

/// Element type of an [`Array`](crate::Array).
///
/// Values are held as `f64` regardless of dtype; `Float32` arrays keep
/// every element rounded to single precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dtype {
    Float32,
    #[default]
    Float64,
}

impl Dtype {
    /// Short lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }

    /// Round a value to the precision of this dtype.
    #[inline]
    pub fn cast(self, value: f64) -> f64 {
        match self {
            Dtype::Float32 => value as f32 as f64,
            Dtype::Float64 => value,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
