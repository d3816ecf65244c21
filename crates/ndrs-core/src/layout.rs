//! Shape/stride layout algebra
//!
//! A [`Layout`] is the view half of an array: shape, signed byte strides
//! and a byte offset into some storage. All view operations (reshape,
//! transpose, slice) are pure functions from layout to layout; nothing in
//! this module touches element data.
//!
//! Conventions:
//! - rank is at most [`MAX_NDIM`]; rank 0 is a scalar with one element
//! - extents may be 0 (empty arrays); strides may be negative (reverse
//!   slices) or zero (broadcast axes)
//! - axes of extent 1 never affect contiguity

use serde::{Deserialize, Serialize};

use crate::error::{NdError, Result};

/// Maximum supported rank.
pub const MAX_NDIM: usize = 8;

/// Shape, byte strides and byte offset of an array view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub byte_offset: usize,
}

/// One axis of a slice request. `None` fields take numpy defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// C-order (row-major) byte strides for a shape.
pub fn contiguous_strides(shape: &[usize], width: usize) -> Vec<isize> {
    let mut strides = vec![width as isize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1) as isize;
    }
    strides
}

/// Element count of a shape (1 for rank 0), or None on overflow.
pub fn checked_elem_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl Layout {
    /// Fresh C-contiguous layout for a shape.
    pub fn contiguous(shape: Vec<usize>, width: usize) -> Self {
        let strides = contiguous_strides(&shape, width);
        Self {
            shape,
            strides,
            byte_offset: 0,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of addressable elements (1 for rank 0, 0 if any extent is 0).
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when the strides are exactly the C-order strides implied by
    /// the shape. Axes of extent 1 are exempt; rank-0 and empty layouts
    /// are contiguous.
    pub fn is_contiguous(&self, width: usize) -> bool {
        if self.shape.contains(&0) {
            return true;
        }
        let mut expected = width as isize;
        for (&extent, &stride) in self.shape.iter().zip(self.strides.iter()).rev() {
            if extent == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected *= extent as isize;
        }
        true
    }

    /// Lowest and one-past-highest byte reachable from this layout,
    /// relative to the start of the storage. Empty layouts reach nothing.
    fn reachable_range(&self, width: usize) -> (isize, isize) {
        if self.shape.contains(&0) {
            let off = self.byte_offset as isize;
            return (off, off);
        }
        let mut lo = self.byte_offset as isize;
        let mut hi = self.byte_offset as isize;
        for (&extent, &stride) in self.shape.iter().zip(self.strides.iter()) {
            let span = stride * (extent as isize - 1);
            if span < 0 {
                lo += span;
            } else {
                hi += span;
            }
        }
        (lo, hi + width as isize)
    }

    /// Check that every element this layout can address lies within a
    /// storage of `capacity` bytes.
    pub fn validate_bounds(&self, width: usize, capacity: usize) -> Result<()> {
        if self.shape.len() != self.strides.len() {
            return Err(NdError::Internal(format!(
                "rank mismatch: {} extents vs {} strides",
                self.shape.len(),
                self.strides.len()
            )));
        }
        if self.shape.contains(&0) {
            if self.byte_offset > capacity {
                return Err(NdError::InvalidStrides(
                    "view offset exceeds storage capacity".into(),
                ));
            }
            return Ok(());
        }
        let (lo, hi) = self.reachable_range(width);
        if lo < 0 || hi as usize > capacity {
            return Err(NdError::InvalidStrides(format!(
                "view reaches bytes [{lo}, {hi}) outside storage of {capacity} bytes"
            )));
        }
        Ok(())
    }

    /// Byte offset of the element at a row-major flat index.
    ///
    /// Used by reductions that need deterministic random access; the
    /// caller guarantees `flat < elem_count()`.
    pub fn offset_at(&self, mut flat: usize) -> isize {
        let mut off = self.byte_offset as isize;
        for axis in (0..self.shape.len()).rev() {
            let extent = self.shape[axis];
            off += (flat % extent) as isize * self.strides[axis];
            flat /= extent;
        }
        off
    }

    /// Reshape as a pure view. Returns the new layout when the existing
    /// stride pattern can be split/fused onto `new_shape`, `None` when a
    /// copy would be required.
    pub fn reshape(&self, new_shape: &[usize], width: usize) -> Option<Layout> {
        debug_assert_eq!(
            checked_elem_count(new_shape),
            Some(self.elem_count()),
            "caller checks element counts before reshaping"
        );

        // Empty arrays and contiguous views renumber freely.
        if self.elem_count() == 0 || self.is_contiguous(width) {
            let mut out = Layout::contiguous(new_shape.to_vec(), width);
            out.byte_offset = self.byte_offset;
            return Some(out);
        }

        // Drop extent-1 axes on both sides; they carry no constraints.
        let old: Vec<(usize, isize)> = self
            .shape
            .iter()
            .zip(self.strides.iter())
            .filter(|(&e, _)| e != 1)
            .map(|(&e, &s)| (e, s))
            .collect();
        let new_sq: Vec<usize> = new_shape.iter().copied().filter(|&e| e != 1).collect();

        let mut sq_strides = vec![0isize; new_sq.len()];
        let (mut oi, mut ni) = (0usize, 0usize);
        while oi < old.len() && ni < new_sq.len() {
            // Grow both chunks until their element counts agree.
            let (mut oj, mut nj) = (oi + 1, ni + 1);
            let mut op = old[oi].0;
            let mut np = new_sq[ni];
            while op != np {
                if np < op {
                    np *= new_sq[nj];
                    nj += 1;
                } else {
                    op *= old[oj].0;
                    oj += 1;
                }
            }
            // The old chunk must be internally C-contiguous to be fusable.
            for k in oi..oj - 1 {
                if old[k].1 != old[k + 1].1 * old[k + 1].0 as isize {
                    return None;
                }
            }
            sq_strides[nj - 1] = old[oj - 1].1;
            for k in (ni..nj - 1).rev() {
                sq_strides[k] = sq_strides[k + 1] * new_sq[k + 1] as isize;
            }
            oi = oj;
            ni = nj;
        }

        // Re-expand extent-1 axes with natural (C-like) strides.
        let mut strides = vec![0isize; new_shape.len()];
        let mut sq = new_sq.len();
        let mut next = width as isize;
        for axis in (0..new_shape.len()).rev() {
            if new_shape[axis] == 1 {
                strides[axis] = next;
            } else {
                sq -= 1;
                strides[axis] = sq_strides[sq];
                next = sq_strides[sq] * new_sq[sq] as isize;
            }
        }

        Some(Layout {
            shape: new_shape.to_vec(),
            strides,
            byte_offset: self.byte_offset,
        })
    }

    /// Permute axes. A `None` permutation reverses them.
    pub fn transpose(&self, perm: Option<&[i64]>) -> Result<Layout> {
        let ndim = self.ndim();
        let perm: Vec<usize> = match perm {
            None => (0..ndim).rev().collect(),
            Some(p) => {
                if p.len() != ndim {
                    return Err(NdError::InvalidArg(format!(
                        "permutation has {} entries for rank {ndim}",
                        p.len()
                    )));
                }
                let mut seen = [false; MAX_NDIM];
                let mut out = Vec::with_capacity(ndim);
                for &axis in p {
                    let axis = usize::try_from(axis).map_err(|_| {
                        NdError::InvalidArg(format!("negative permutation entry {axis}"))
                    })?;
                    if axis >= ndim || seen[axis] {
                        return Err(NdError::InvalidArg(format!(
                            "invalid permutation entry {axis} for rank {ndim}"
                        )));
                    }
                    seen[axis] = true;
                    out.push(axis);
                }
                out
            }
        };

        Ok(Layout {
            shape: perm.iter().map(|&a| self.shape[a]).collect(),
            strides: perm.iter().map(|&a| self.strides[a]).collect(),
            byte_offset: self.byte_offset,
        })
    }

    /// Slice every axis with numpy start/stop/step semantics. The result
    /// shares storage; only shape, strides and offset change.
    pub fn slice(&self, specs: &[SliceSpec]) -> Result<Layout> {
        if specs.len() != self.ndim() {
            return Err(NdError::InvalidArg(format!(
                "slice expects {} axis specs, got {}",
                self.ndim(),
                specs.len()
            )));
        }

        let mut shape = Vec::with_capacity(self.ndim());
        let mut strides = Vec::with_capacity(self.ndim());
        let mut offset = self.byte_offset as isize;

        for (axis, spec) in specs.iter().enumerate() {
            let extent = self.shape[axis] as i64;
            let step = spec.step.unwrap_or(1);
            if step == 0 {
                return Err(NdError::InvalidArg(format!("slice step 0 at axis {axis}")));
            }

            let clamp = |v: i64| -> i64 {
                let v = if v < 0 { v + extent } else { v };
                if step > 0 {
                    v.clamp(0, extent)
                } else {
                    v.clamp(-1, extent - 1)
                }
            };
            let start = clamp(spec.start.unwrap_or(if step > 0 { 0 } else { extent - 1 }));
            let stop = match spec.stop {
                Some(v) => clamp(v),
                // The negative-step default stop (-1) means "one before the
                // first element", not "last element"; it bypasses wrapping.
                None if step > 0 => extent,
                None => -1,
            };

            let len = if step > 0 {
                (stop - start + step - 1).div_euclid(step).max(0)
            } else {
                (stop - start + step + 1).div_euclid(step).max(0)
            } as usize;

            shape.push(len);
            strides.push(self.strides[axis] * step as isize);
            if len > 0 {
                offset += self.strides[axis] * start as isize;
            }
        }

        let offset = usize::try_from(offset)
            .map_err(|_| NdError::Internal("slice moved view before storage start".into()))?;
        Ok(Layout {
            shape,
            strides,
            byte_offset: offset,
        })
    }
}
