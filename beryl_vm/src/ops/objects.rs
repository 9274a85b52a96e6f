//! Procedure creation and class/module definition.

use crate::dispatch::ControlFlow;
use crate::ops::vm_try;
use crate::state::State;
use beryl_bytecode::{Instruction, LAMBDA_CAPTURE, LAMBDA_STRICT};
use beryl_core::{CoreError, ErrorKind, Value};

/// R(A) := procedure over child irep b, flags in z.
///
/// The capture flag turns the procedure into a closure over the current
/// frame's environment; the strict flag arms arity enforcement.
pub(crate) fn lambda(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let flags = inst.bz_z();
    let child = match st.child_irep(inst.bz_b()) {
        Some(c) => c,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "nested procedure index out of range",
            ))
        }
    };
    let strict = flags & LAMBDA_STRICT != 0;
    let p = if flags & LAMBDA_CAPTURE != 0 {
        st.closure_new(&child, strict)
    } else {
        st.proc_new(&child, strict)
    };
    st.set_reg(a, Value::Object(p));
    ControlFlow::Continue
}

/// R(A) := the root object class
pub(crate) fn root_class(st: &mut State, inst: Instruction) -> ControlFlow {
    let object = st.core.object.clone();
    st.set_reg(inst.a() as usize, Value::Object(object));
    ControlFlow::Continue
}

/// R(A) := newclass(R(A), syms[B], R(A+1))
///
/// A nil base defines under the current target class; a nil superclass
/// defaults to the root class.
pub(crate) fn def_class(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let name = match st.cur_sym(inst.b()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    let base = st.reg(a);
    let sup = st.reg(a + 1);

    let outer = match &base {
        Value::Nil => st.ci().target_class.clone(),
        Value::Object(o) => o.clone(),
        _ => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "class definition in a non-class",
            ))
        }
    };
    let super_class = match &sup {
        Value::Nil => None,
        Value::Object(o) => Some(o.clone()),
        _ => {
            return st.raise_core(CoreError::new(ErrorKind::Type, "superclass is not a class"))
        }
    };
    let c = vm_try!(st, st.define_class(&outer, name, super_class));
    st.set_reg(a, Value::Object(c));
    ControlFlow::Continue
}

/// R(A) := newmodule(R(A), syms[B])
pub(crate) fn def_module(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let name = match st.cur_sym(inst.b()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    let base = st.reg(a);
    let outer = match &base {
        Value::Nil => st.ci().target_class.clone(),
        Value::Object(o) => o.clone(),
        _ => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "module definition in a non-class",
            ))
        }
    };
    let m = vm_try!(st, st.define_module(&outer, name));
    st.set_reg(a, Value::Object(m));
    ControlFlow::Continue
}

/// R(A).define_method(syms[B], R(A+1))
pub(crate) fn def_method(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let mid = match st.cur_sym(inst.b()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    let class = match st.reg(a).as_object() {
        Some(o) => o.clone(),
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "method definition on a non-class",
            ))
        }
    };
    let body = match st.reg(a + 1).as_object() {
        Some(o) => o.clone(),
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "method body is not a procedure",
            ))
        }
    };
    vm_try!(st, st.define_method(&class, mid, &body));
    ControlFlow::Continue
}

/// R(A) := singleton class of R(B)
pub(crate) fn singleton_class(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(inst.b() as usize);
    let sc = vm_try!(st, st.singleton_class(&v));
    st.set_reg(inst.a() as usize, Value::Object(sc));
    ControlFlow::Continue
}

/// R(A) := current target class
pub(crate) fn target_class(st: &mut State, inst: Instruction) -> ControlFlow {
    let t = st.ci().target_class.clone();
    st.set_reg(inst.a() as usize, Value::Object(t));
    ControlFlow::Continue
}
