//! Variable access: globals, specials, instance/class variables,
//! constants, and upvalues.
//!
//! Each form delegates to the matching host store; the symbol operand
//! indexes the current body's symbol table.

use crate::dispatch::ControlFlow;
use crate::ops::vm_try;
use crate::state::State;
use beryl_bytecode::Instruction;
use beryl_core::{CoreError, ErrorKind, Symbol, Value};

fn operand_sym(st: &State, idx: u32) -> Result<Symbol, CoreError> {
    st.cur_sym(idx)
        .ok_or_else(|| CoreError::new(ErrorKind::Runtime, "symbol index out of range"))
}

/// R(A) := getglobal(syms[Bx])
pub(crate) fn get_global(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.gv_get(sym);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// setglobal(syms[Bx], R(A))
pub(crate) fn set_global(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.reg(inst.a() as usize);
    st.gv_set(sym, v);
    ControlFlow::Continue
}

/// R(A) := special[Bx]
pub(crate) fn get_special(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.special_get(inst.bx());
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// special[Bx] := R(A)
pub(crate) fn set_special(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(inst.a() as usize);
    st.special_set(inst.bx(), v);
    ControlFlow::Continue
}

/// R(A) := ivget(self, syms[Bx])
pub(crate) fn get_ivar(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let recv = st.reg(0);
    let v = st.iv_get(&recv, sym);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// ivset(self, syms[Bx], R(A))
pub(crate) fn set_ivar(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let recv = st.reg(0);
    let v = st.reg(inst.a() as usize);
    st.iv_set(&recv, sym, v);
    ControlFlow::Continue
}

/// R(A) := cvget(syms[Bx])
pub(crate) fn get_cvar(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.cv_get(sym);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// cvset(syms[Bx], R(A))
pub(crate) fn set_cvar(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.reg(inst.a() as usize);
    st.cv_set(sym, v);
    ControlFlow::Continue
}

/// R(A) := constget(syms[Bx])
pub(crate) fn get_const(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.const_get(sym);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// constset(syms[Bx], R(A))
pub(crate) fn set_const(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let v = st.reg(inst.a() as usize);
    st.const_set(sym, v);
    ControlFlow::Continue
}

/// R(A) := R(A)::syms[Bx]
pub(crate) fn get_scoped_const(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let a = inst.a() as usize;
    let scope = st.reg(a);
    let class = match scope.as_object() {
        Some(o) => o.clone(),
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "constant scope is not a class or module",
            ))
        }
    };
    let v = st.const_get_from(&class, sym);
    st.set_reg(a, v);
    ControlFlow::Continue
}

/// R(A+1)::syms[Bx] := R(A)
pub(crate) fn set_scoped_const(st: &mut State, inst: Instruction) -> ControlFlow {
    let sym = vm_try!(st, operand_sym(st, inst.bx()));
    let a = inst.a() as usize;
    let scope = st.reg(a + 1);
    let class = match scope.as_object() {
        Some(o) => o.clone(),
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "constant scope is not a class or module",
            ))
        }
    };
    let v = st.reg(a);
    vm_try!(st, st.const_set_on(&class, sym, v));
    ControlFlow::Continue
}

/// R(A) := upvalue(slot B, nesting C)
pub(crate) fn get_upvar(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.uvget(inst.c() as usize, inst.b() as usize);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// upvalue(slot B, nesting C) := R(A)
pub(crate) fn set_upvar(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(inst.a() as usize);
    st.uvset(inst.c() as usize, inst.b() as usize, v);
    ControlFlow::Continue
}
