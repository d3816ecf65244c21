//! Elementwise binary kernels with broadcasting
//!
//! Every binary op shares the same preamble: promote dtypes, broadcast
//! shapes, allocate a dense output, then run a typed inner loop that
//! drives both inputs through their (possibly zero) strides while the
//! output pointer just walks forward. Integer arithmetic wraps; float
//! arithmetic is IEEE-754 with native NaN propagation.

use ndrs_core::dtype::promote;
use ndrs_core::{broadcast_shapes, DType, NdError, Result};

use crate::array::NdArray;
use crate::iter::{zip_offsets, Operand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Lt,
    Gt,
}

pub fn add(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_arith(a, b, ArithOp::Add)
}

pub fn sub(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_arith(a, b, ArithOp::Sub)
}

pub fn mul(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_arith(a, b, ArithOp::Mul)
}

pub fn div(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_arith(a, b, ArithOp::Div)
}

pub fn eq(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_compare(a, b, CmpOp::Eq)
}

pub fn lt(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_compare(a, b, CmpOp::Lt)
}

pub fn gt(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    binary_compare(a, b, CmpOp::Gt)
}

fn f64_op(op: ArithOp) -> fn(f64, f64) -> f64 {
    match op {
        ArithOp::Add => |x, y| x + y,
        ArithOp::Sub => |x, y| x - y,
        ArithOp::Mul => |x, y| x * y,
        ArithOp::Div => |x, y| x / y,
    }
}

fn f32_op(op: ArithOp) -> fn(f32, f32) -> f32 {
    match op {
        ArithOp::Add => |x, y| x + y,
        ArithOp::Sub => |x, y| x - y,
        ArithOp::Mul => |x, y| x * y,
        ArithOp::Div => |x, y| x / y,
    }
}

fn i32_op(op: ArithOp) -> fn(i32, i32) -> i32 {
    match op {
        ArithOp::Add => |x, y| x.wrapping_add(y),
        ArithOp::Sub => |x, y| x.wrapping_sub(y),
        ArithOp::Mul => |x, y| x.wrapping_mul(y),
        // Divisors are pre-screened for zero; MIN / -1 wraps.
        ArithOp::Div => |x, y| x.wrapping_div(y),
    }
}

/// Integer division has no NaN to absorb a zero divisor, so the whole op
/// fails before any output is produced.
fn check_integer_divisor(b: &NdArray) -> Result<()> {
    let op = Operand::direct(b);
    let mut zero = false;
    zip_offsets(b.shape(), &[&op], |offs| {
        if unsafe { op.i32_at(offs[0]) } == 0 {
            zero = true;
        }
    });
    if zero {
        return Err(NdError::InvalidArg("integer division by zero".into()));
    }
    Ok(())
}

fn binary_arith(a: &NdArray, b: &NdArray, op: ArithOp) -> Result<NdArray> {
    let dtype = promote(a.dtype(), b.dtype());
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    if dtype == DType::I32 && op == ArithOp::Div {
        check_integer_divisor(b)?;
    }

    let out = NdArray::uninit(dtype, &shape)?;
    let oa = Operand::broadcast(a, &shape);
    let ob = Operand::broadcast(b, &shape);

    match dtype {
        DType::F64 => {
            let f = f64_op(op);
            let mut dst = out.base_ptr_mut() as *mut f64;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = f(oa.f64_at(offs[0]), ob.f64_at(offs[1]));
                dst = dst.add(1);
            });
        }
        DType::F32 => {
            let f = f32_op(op);
            let mut dst = out.base_ptr_mut() as *mut f32;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = f(oa.f32_at(offs[0]), ob.f32_at(offs[1]));
                dst = dst.add(1);
            });
        }
        DType::I32 => {
            let f = i32_op(op);
            let mut dst = out.base_ptr_mut() as *mut i32;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = f(oa.i32_at(offs[0]), ob.i32_at(offs[1]));
                dst = dst.add(1);
            });
        }
    }
    Ok(out)
}

fn binary_compare(a: &NdArray, b: &NdArray, op: CmpOp) -> Result<NdArray> {
    let promoted = promote(a.dtype(), b.dtype());
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let out = NdArray::uninit(DType::I32, &shape)?;
    let oa = Operand::broadcast(a, &shape);
    let ob = Operand::broadcast(b, &shape);
    let mut dst = out.base_ptr_mut() as *mut i32;

    if promoted.is_float() {
        // f32 operands widen exactly, so one f64 comparison covers both
        // float widths. NaN compares false under every operator.
        let f: fn(f64, f64) -> bool = match op {
            CmpOp::Eq => |x, y| x == y,
            CmpOp::Lt => |x, y| x < y,
            CmpOp::Gt => |x, y| x > y,
        };
        zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
            *dst = f(oa.f64_at(offs[0]), ob.f64_at(offs[1])) as i32;
            dst = dst.add(1);
        });
    } else {
        let f: fn(i32, i32) -> bool = match op {
            CmpOp::Eq => |x, y| x == y,
            CmpOp::Lt => |x, y| x < y,
            CmpOp::Gt => |x, y| x > y,
        };
        zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
            *dst = f(oa.i32_at(offs[0]), ob.i32_at(offs[1])) as i32;
            dst = dst.add(1);
        });
    }
    Ok(out)
}

/// `where(cond, x, y)`: nonzero cond selects from `x`, zero from `y`.
/// `cond` must be I32; `x` and `y` promote against each other and all
/// three shapes broadcast together.
pub fn where_select(cond: &NdArray, x: &NdArray, y: &NdArray) -> Result<NdArray> {
    if cond.dtype() != DType::I32 {
        return Err(NdError::InvalidDtype(format!(
            "where condition must be i32, got {}",
            cond.dtype()
        )));
    }
    let dtype = promote(x.dtype(), y.dtype());
    let shape = broadcast_shapes(cond.shape(), &broadcast_shapes(x.shape(), y.shape())?)?;

    let out = NdArray::uninit(dtype, &shape)?;
    let oc = Operand::broadcast(cond, &shape);
    let ox = Operand::broadcast(x, &shape);
    let oy = Operand::broadcast(y, &shape);

    match dtype {
        DType::F64 => {
            let mut dst = out.base_ptr_mut() as *mut f64;
            zip_offsets(&shape, &[&oc, &ox, &oy], |offs| unsafe {
                *dst = if oc.i32_at(offs[0]) != 0 {
                    ox.f64_at(offs[1])
                } else {
                    oy.f64_at(offs[2])
                };
                dst = dst.add(1);
            });
        }
        DType::F32 => {
            let mut dst = out.base_ptr_mut() as *mut f32;
            zip_offsets(&shape, &[&oc, &ox, &oy], |offs| unsafe {
                *dst = if oc.i32_at(offs[0]) != 0 {
                    ox.f32_at(offs[1])
                } else {
                    oy.f32_at(offs[2])
                };
                dst = dst.add(1);
            });
        }
        DType::I32 => {
            let mut dst = out.base_ptr_mut() as *mut i32;
            zip_offsets(&shape, &[&oc, &ox, &oy], |offs| unsafe {
                *dst = if oc.i32_at(offs[0]) != 0 {
                    ox.i32_at(offs[1])
                } else {
                    oy.i32_at(offs[2])
                };
                dst = dst.add(1);
            });
        }
    }
    Ok(out)
}

/// Legacy hook: add into a pre-allocated output.
///
/// The output must already be dense, writable and exactly the broadcast
/// shape/dtype of the inputs. Aliasing the output with an input is
/// permitted (elementwise reads happen before the matching write).
pub fn add_into(a: &NdArray, b: &NdArray, out: &NdArray) -> Result<()> {
    let dtype = promote(a.dtype(), b.dtype());
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    if out.dtype() != dtype {
        return Err(NdError::InvalidDtype(format!(
            "output dtype {} does not match promoted dtype {dtype}",
            out.dtype()
        )));
    }
    if out.shape() != shape.as_slice() {
        return Err(NdError::InvalidShape(format!(
            "output shape {:?} does not match broadcast shape {shape:?}",
            out.shape()
        )));
    }
    if !out.is_contiguous() {
        return Err(NdError::NotContiguous("output must be contiguous".into()));
    }
    if out.is_readonly() {
        return Err(NdError::InvalidArg("output is readonly".into()));
    }

    let oa = Operand::broadcast(a, &shape);
    let ob = Operand::broadcast(b, &shape);
    let base = unsafe { out.base_ptr_mut().add(out.byte_offset()) };

    match dtype {
        DType::F64 => {
            let mut dst = base as *mut f64;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = oa.f64_at(offs[0]) + ob.f64_at(offs[1]);
                dst = dst.add(1);
            });
        }
        DType::F32 => {
            let mut dst = base as *mut f32;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = oa.f32_at(offs[0]) + ob.f32_at(offs[1]);
                dst = dst.add(1);
            });
        }
        DType::I32 => {
            let mut dst = base as *mut i32;
            zip_offsets(&shape, &[&oa, &ob], |offs| unsafe {
                *dst = oa.i32_at(offs[0]).wrapping_add(ob.i32_at(offs[1]));
                dst = dst.add(1);
            });
        }
    }
    Ok(())
}
