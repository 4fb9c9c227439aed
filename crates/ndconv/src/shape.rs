//! Fixed-capacity shape and parameter vectors.
//!
//! Every shape, axis list and spatial parameter vector is bounded by
//! [`MAX_NDIM`] and stored inline.

use crate::error::TensorError;
use smallvec::SmallVec;

/// Maximum supported tensor rank.
pub const MAX_NDIM: usize = 8;

/// Array shape (dimension sizes, batch and channel axes first).
pub type Shape = SmallVec<[usize; MAX_NDIM]>;

/// One integer per spatial dimension: stride, padding, kernel or output extent.
pub type StackVector = SmallVec<[i64; MAX_NDIM]>;

/// List of axis indices.
pub type Axes = SmallVec<[usize; MAX_NDIM]>;

/// Build a [`Shape`], rejecting ranks above [`MAX_NDIM`].
pub fn make_shape(dims: &[usize]) -> Result<Shape, TensorError> {
    if dims.len() > MAX_NDIM {
        return Err(TensorError::TooManyDimensions {
            ndim: dims.len(),
            max: MAX_NDIM,
        });
    }
    Ok(Shape::from_slice(dims))
}

/// Number of elements described by a shape.
#[inline]
pub fn total_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Spatial extents of a batch-channel-spatial shape, as a parameter vector.
pub fn spatial_dims(shape: &[usize]) -> StackVector {
    shape.iter().skip(2).map(|&d| d as i64).collect()
}

/// Validate and normalize an axis list (sorted, unique, in range).
pub fn normalize_axes(axes: &[usize], ndim: usize) -> Result<Axes, TensorError> {
    let mut sorted: Axes = axes.iter().copied().collect();
    sorted.sort_unstable();
    for (i, &axis) in sorted.iter().enumerate() {
        if axis >= ndim || (i > 0 && sorted[i - 1] == axis) {
            return Err(TensorError::InvalidAxis { axis, ndim });
        }
    }
    Ok(sorted)
}

/// Shape left after reducing `axes`, with reduced axes kept as 1 when `keepdims`.
pub fn reduced_shape(shape: &[usize], axes: &[usize], keepdims: bool) -> Shape {
    let mut out = Shape::new();
    for (i, &d) in shape.iter().enumerate() {
        if axes.contains(&i) {
            if keepdims {
                out.push(1);
            }
        } else {
            out.push(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_shape_too_many_dims() {
        assert!(make_shape(&[1; MAX_NDIM]).is_ok());
        assert!(matches!(
            make_shape(&[1; MAX_NDIM + 1]),
            Err(TensorError::TooManyDimensions { .. })
        ));
    }

    #[test]
    fn test_spatial_dims() {
        assert_eq!(spatial_dims(&[2, 3, 5, 7]).as_slice(), &[5, 7]);
        assert!(spatial_dims(&[2, 3]).is_empty());
    }

    #[test]
    fn test_normalize_axes() {
        assert_eq!(normalize_axes(&[3, 0, 2], 4).unwrap().as_slice(), &[0, 2, 3]);
        assert!(normalize_axes(&[4], 4).is_err());
        assert!(normalize_axes(&[1, 1], 4).is_err());
    }

    #[test]
    fn test_reduced_shape() {
        let shape = [2, 3, 4, 5];
        assert_eq!(reduced_shape(&shape, &[0, 2, 3], false).as_slice(), &[3]);
        assert_eq!(
            reduced_shape(&shape, &[0, 2, 3], true).as_slice(),
            &[1, 3, 1, 1]
        );
    }
}
