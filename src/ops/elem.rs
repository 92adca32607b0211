use crate::ops::OpCode;

#[inline]
fn set_valid_or_invalid(out: &mut [f64], instrument_idx: usize, value: f64) {
    out[instrument_idx] = if value.is_finite() { value } else { f64::NAN };
}

#[inline]
fn bool_value(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

#[inline]
fn unary_fn(op: OpCode) -> fn(f64) -> f64 {
    match op {
        OpCode::ElemAbs => f64::abs,
        OpCode::ElemNeg => |x| -x,
        OpCode::ElemSign => |x| if x == 0.0 { 0.0 } else { x.signum() },
        OpCode::ElemSqrt => f64::sqrt,
        OpCode::ElemLog => f64::ln,
        OpCode::ElemLog1p => f64::ln_1p,
        OpCode::ElemExp => f64::exp,
        OpCode::ElemRelu => |x| x.max(0.0),
        OpCode::ElemInv => |x| 1.0 / x,
        OpCode::ElemSquare => |x| x * x,
        _ => |_| f64::NAN,
    }
}

#[inline]
fn binary_fn(op: OpCode) -> fn(f64, f64) -> f64 {
    match op {
        OpCode::ElemAdd => |a, b| a + b,
        OpCode::ElemSub => |a, b| a - b,
        OpCode::ElemMul => |a, b| a * b,
        OpCode::ElemDiv => |a, b| a / b,
        OpCode::ElemPow => f64::powf,
        OpCode::ElemMin => f64::min,
        OpCode::ElemMax => f64::max,
        OpCode::ElemLess => |a, b| bool_value(a < b),
        OpCode::ElemGreater => |a, b| bool_value(a > b),
        _ => |_, _| f64::NAN,
    }
}

/// Applies a one-operand elementwise operator per instrument.
pub fn eval_unary(op: OpCode, x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(x.len(), out.len());
    let f = unary_fn(op);
    for (instrument_idx, &value) in x.iter().enumerate() {
        if !value.is_finite() {
            out[instrument_idx] = f64::NAN;
            continue;
        }
        set_valid_or_invalid(out, instrument_idx, f(value));
    }
}

/// Applies a two-operand elementwise operator per instrument.
pub fn eval_binary(op: OpCode, lhs: &[f64], rhs: &[f64], out: &mut [f64]) {
    debug_assert_eq!(lhs.len(), out.len());
    debug_assert_eq!(rhs.len(), out.len());
    let f = binary_fn(op);
    for (instrument_idx, (&a, &b)) in lhs.iter().zip(rhs).enumerate() {
        if !a.is_finite() || !b.is_finite() {
            out[instrument_idx] = f64::NAN;
            continue;
        }
        set_valid_or_invalid(out, instrument_idx, f(a, b));
    }
}
