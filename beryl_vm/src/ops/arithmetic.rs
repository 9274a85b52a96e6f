//! Arithmetic with type-pair fast paths.
//!
//! The operand pair lives in R(A) and R(A+1). Fixnum and float
//! combinations are computed inline (fixnums wrap, matching host integer
//! semantics); string concatenation is inlined for `+`; every other
//! combination re-enters the send path with the operator symbol already
//! in the instruction word.

use crate::dispatch::ControlFlow;
use crate::ops::calls;
use crate::state::State;
use beryl_bytecode::{Instruction, Opcode};
use beryl_core::{CoreError, ErrorKind, Value};

/// R(A) := R(A) + R(A+1)
pub(crate) fn add(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let (x, y) = (st.reg(a), st.reg(a + 1));
    let out = match (&x, &y) {
        (Value::Fixnum(i), Value::Fixnum(j)) => Value::fixnum(i.wrapping_add(*j)),
        (Value::Fixnum(i), Value::Float(f)) => Value::float(*i as f64 + f),
        (Value::Float(f), Value::Fixnum(i)) => Value::float(f + *i as f64),
        (Value::Float(f), Value::Float(g)) => Value::float(f + g),
        _ => {
            if let Some(s) = st.str_plus(&x, &y) {
                s
            } else {
                return calls::send(st, inst);
            }
        }
    };
    st.set_reg(a, out);
    ControlFlow::Continue
}

/// R(A) := R(A) - R(A+1)
pub(crate) fn sub(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let (x, y) = (st.reg(a), st.reg(a + 1));
    let out = match (&x, &y) {
        (Value::Fixnum(i), Value::Fixnum(j)) => Value::fixnum(i.wrapping_sub(*j)),
        (Value::Fixnum(i), Value::Float(f)) => Value::float(*i as f64 - f),
        (Value::Float(f), Value::Fixnum(i)) => Value::float(f - *i as f64),
        (Value::Float(f), Value::Float(g)) => Value::float(f - g),
        _ => return calls::send(st, inst),
    };
    st.set_reg(a, out);
    ControlFlow::Continue
}

/// R(A) := R(A) * R(A+1)
pub(crate) fn mul(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let (x, y) = (st.reg(a), st.reg(a + 1));
    let out = match (&x, &y) {
        (Value::Fixnum(i), Value::Fixnum(j)) => Value::fixnum(i.wrapping_mul(*j)),
        (Value::Fixnum(i), Value::Float(f)) => Value::float(*i as f64 * f),
        (Value::Float(f), Value::Fixnum(i)) => Value::float(f * *i as f64),
        (Value::Float(f), Value::Float(g)) => Value::float(f * g),
        _ => return calls::send(st, inst),
    };
    st.set_reg(a, out);
    ControlFlow::Continue
}

/// R(A) := R(A) / R(A+1)
pub(crate) fn div(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let (x, y) = (st.reg(a), st.reg(a + 1));
    let out = match (&x, &y) {
        (Value::Fixnum(_), Value::Fixnum(0)) => {
            return st.raise_core(CoreError::new(ErrorKind::ZeroDivision, "divided by 0"))
        }
        (Value::Fixnum(i), Value::Fixnum(j)) => Value::fixnum(i.wrapping_div(*j)),
        (Value::Fixnum(i), Value::Float(f)) => Value::float(*i as f64 / f),
        (Value::Float(f), Value::Fixnum(i)) => Value::float(f / *i as f64),
        (Value::Float(f), Value::Float(g)) => Value::float(f / g),
        _ => return calls::send(st, inst),
    };
    st.set_reg(a, out);
    ControlFlow::Continue
}

/// R(A) := R(A) + C
pub(crate) fn add_imm(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let c = inst.c() as i64;
    match st.reg(a) {
        Value::Fixnum(i) => {
            st.set_reg(a, Value::fixnum(i.wrapping_add(c)));
            ControlFlow::Continue
        }
        Value::Float(f) => {
            st.set_reg(a, Value::float(f + c as f64));
            ControlFlow::Continue
        }
        _ => {
            st.set_reg(a + 1, Value::fixnum(c));
            calls::send(st, Instruction::abc(Opcode::Send, inst.a(), inst.b(), 1))
        }
    }
}

/// R(A) := R(A) - C
pub(crate) fn sub_imm(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let c = inst.c() as i64;
    match st.reg(a) {
        Value::Fixnum(i) => {
            st.set_reg(a, Value::fixnum(i.wrapping_sub(c)));
            ControlFlow::Continue
        }
        Value::Float(f) => {
            st.set_reg(a, Value::float(f - c as f64));
            ControlFlow::Continue
        }
        _ => {
            st.set_reg(a + 1, Value::fixnum(c));
            calls::send(st, Instruction::abc(Opcode::Send, inst.a(), inst.b(), 1))
        }
    }
}
