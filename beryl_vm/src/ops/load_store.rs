//! Constant and register loads.

use crate::dispatch::ControlFlow;
use crate::state::State;
use beryl_bytecode::Instruction;
use beryl_core::{CoreError, ErrorKind, Value};

/// R(A) := R(B)
#[inline]
pub(crate) fn move_reg(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(inst.b() as usize);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// R(A) := pool[Bx]
#[inline]
pub(crate) fn load_literal(st: &mut State, inst: Instruction) -> ControlFlow {
    let lit = match st.cur_literal(inst.bx()) {
        Some(l) => l,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "literal index out of range",
            ))
        }
    };
    let v = st.literal_value(&lit);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// R(A) := sBx
#[inline]
pub(crate) fn load_int(st: &mut State, inst: Instruction) -> ControlFlow {
    st.set_reg(inst.a() as usize, Value::fixnum(inst.sbx() as i64));
    ControlFlow::Continue
}

/// R(A) := syms[Bx]
#[inline]
pub(crate) fn load_sym(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = match st.cur_sym(inst.bx()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    st.set_reg(inst.a() as usize, Value::symbol(sym));
    ControlFlow::Continue
}

/// R(A) := nil
#[inline]
pub(crate) fn load_nil(st: &mut State, inst: Instruction) -> ControlFlow {
    st.set_reg(inst.a() as usize, Value::Nil);
    ControlFlow::Continue
}

/// R(A) := R(0)
#[inline]
pub(crate) fn load_self(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(0);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// R(A) := true
#[inline]
pub(crate) fn load_true(st: &mut State, inst: Instruction) -> ControlFlow {
    st.set_reg(inst.a() as usize, Value::True);
    ControlFlow::Continue
}

/// R(A) := false
#[inline]
pub(crate) fn load_false(st: &mut State, inst: Instruction) -> ControlFlow {
    st.set_reg(inst.a() as usize, Value::False);
    ControlFlow::Continue
}
