//! NumPy-style broadcasting rules
//!
//! Shapes align by the trailing axis. For each axis the extents must be
//! equal, or one of them must be 1, or one operand must lack the axis;
//! the result extent is the max. Broadcast operands are never
//! materialized: an operand maps onto the result shape with stride 0 on
//! every replicated axis, and kernel loops drive all operands from the
//! result shape.

use crate::error::{NdError, Result};

/// Compute the broadcast shape of two input shapes.
///
/// - `[3, 1] + [1, 4] -> [3, 4]`
/// - `[2, 3] + [3] -> [2, 3]`
/// - `[3] + [4] -> INVALID_SHAPE`
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];

    for i in 0..ndim {
        let da = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let db = if i < b.len() { b[b.len() - 1 - i] } else { 1 };

        if da == db || da == 1 || db == 1 {
            out[ndim - 1 - i] = da.max(db);
        } else {
            return Err(NdError::InvalidShape(format!(
                "cannot broadcast {a:?} with {b:?}"
            )));
        }
    }

    Ok(out)
}

/// Map an operand's strides onto a broadcast result shape.
///
/// Missing leading axes and axes broadcast from extent 1 get stride 0, so
/// iteration over the result shape revisits the same bytes. The operand
/// shape must be broadcast-compatible with `out_shape`.
pub fn broadcast_strides(shape: &[usize], strides: &[isize], out_shape: &[usize]) -> Vec<isize> {
    let pad = out_shape.len() - shape.len();
    let mut out = vec![0isize; out_shape.len()];
    for i in 0..shape.len() {
        let axis = pad + i;
        if shape[i] == out_shape[axis] {
            out[axis] = strides[i];
        } else {
            debug_assert_eq!(shape[i], 1, "axis {i} is not broadcastable");
            out[axis] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_broadcast_same_shape() {
        assert_eq!(broadcast_shapes(&[3, 4], &[3, 4]).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_broadcast_scalar() {
        assert_eq!(broadcast_shapes(&[], &[3, 4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shapes(&[3, 4], &[]).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_broadcast_trailing() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(broadcast_shapes(&[3], &[2, 3]).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_broadcast_ones() {
        assert_eq!(broadcast_shapes(&[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert_eq!(
            broadcast_shapes(&[1, 3, 1], &[2, 1, 4]).unwrap(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn test_broadcast_zero_extent() {
        assert_eq!(broadcast_shapes(&[2, 0], &[2, 1]).unwrap(), vec![2, 0]);
        assert_eq!(broadcast_shapes(&[0], &[1]).unwrap(), vec![0]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        assert!(broadcast_shapes(&[3, 4], &[2, 4]).is_err());
        assert!(broadcast_shapes(&[3], &[4]).is_err());
    }

    #[test]
    fn test_broadcast_strides_zero_on_replicated_axes() {
        // [3] against [2, 3]: leading axis is replicated.
        assert_eq!(broadcast_strides(&[3], &[8], &[2, 3]), vec![0, 8]);
        // [2, 1] against [2, 3]: trailing axis is replicated.
        assert_eq!(broadcast_strides(&[2, 1], &[8, 8], &[2, 3]), vec![8, 0]);
        // Scalar against anything: all axes replicated.
        assert_eq!(broadcast_strides(&[], &[], &[2, 3]), vec![0, 0]);
    }

    proptest! {
        #[test]
        fn prop_broadcast_is_commutative(
            a in prop::collection::vec(prop::sample::select(vec![1usize, 2, 3, 5]), 0..=3),
            b in prop::collection::vec(prop::sample::select(vec![1usize, 2, 3, 5]), 0..=3),
        ) {
            let ab = broadcast_shapes(&a, &b);
            let ba = broadcast_shapes(&b, &a);
            match (ab, ba) {
                (Ok(x), Ok(y)) => prop_assert_eq!(x, y),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "broadcast compatibility must be symmetric"),
            }
        }

        #[test]
        fn prop_broadcast_result_covers_both(
            shape in prop::collection::vec(prop::sample::select(vec![1usize, 2, 4]), 1..=3),
        ) {
            // Broadcasting a shape with itself is the identity.
            prop_assert_eq!(broadcast_shapes(&shape, &shape).unwrap(), shape);
        }
    }
}
