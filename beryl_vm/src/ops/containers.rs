//! Array, string, hash and range construction and access.

use crate::dispatch::ControlFlow;
use crate::ops::vm_try;
use crate::state::State;
use beryl_bytecode::{Instruction, Literal};
use beryl_core::{CoreError, ErrorKind, Value};

/// R(A) := [R(B), ..., R(B+C-1)]
pub(crate) fn make_array(st: &mut State, inst: Instruction) -> ControlFlow {
    let b = inst.b() as usize;
    let c = inst.c() as usize;
    let elems: Vec<Value> = (0..c).map(|i| st.reg(b + i)).collect();
    let ary = st.ary_new(elems);
    st.set_reg(inst.a() as usize, ary);
    ControlFlow::Continue
}

/// R(A).concat(splat R(B))
pub(crate) fn array_cat(st: &mut State, inst: Instruction) -> ControlFlow {
    let dst = st.reg(inst.a() as usize);
    let src = st.reg(inst.b() as usize);
    let splatted = st.ary_splat(&src);
    vm_try!(st, st.ary_concat(&dst, &splatted));
    ControlFlow::Continue
}

/// R(A).push(R(B))
pub(crate) fn array_push(st: &mut State, inst: Instruction) -> ControlFlow {
    let dst = st.reg(inst.a() as usize);
    let v = st.reg(inst.b() as usize);
    vm_try!(st, st.ary_push(&dst, v));
    ControlFlow::Continue
}

/// R(A) := R(B)[C]
///
/// A non-array source copies itself for index 0 and reads nil above.
pub(crate) fn array_ref(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let v = st.reg(inst.b() as usize);
    let c = inst.c() as usize;
    if st.ary_elems(&v).is_none() {
        if c == 0 {
            st.set_reg(a, v);
        } else {
            st.set_reg(a, Value::Nil);
        }
    } else {
        let got = st.ary_ref(&v, c);
        st.set_reg(a, got);
    }
    ControlFlow::Continue
}

/// R(B)[C] := R(A)
pub(crate) fn array_set(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.reg(inst.a() as usize);
    let ary = st.reg(inst.b() as usize);
    vm_try!(st, st.ary_set(&ary, inst.c() as usize, v));
    ControlFlow::Continue
}

/// Destructure: *R(A), R(A+1), ..., R(A+C) := R(A)
///
/// B leading elements were consumed elsewhere; R(A) receives the rest
/// array and the C following registers take the tail (nil-padded when
/// the source is short).
pub(crate) fn array_post(st: &mut State, inst: Instruction) -> ControlFlow {
    let mut a = inst.a() as usize;
    let pre = inst.b() as usize;
    let post = inst.c() as usize;
    let v = st.reg(a);

    match st.ary_elems(&v) {
        None => {
            let empty = st.ary_new(Vec::new());
            st.set_reg(a, empty);
            a += 1;
            for i in 0..post {
                st.set_reg(a + i, Value::Nil);
            }
        }
        Some(elems) => {
            let len = elems.len();
            if len > pre + post {
                let rest: Vec<Value> = elems[pre..len - post].to_vec();
                let rest_v = st.ary_new(rest);
                st.set_reg(a, rest_v);
                a += 1;
                for i in 0..post {
                    st.set_reg(a + i, elems[len - post + i].clone());
                }
            } else {
                let empty = st.ary_new(Vec::new());
                st.set_reg(a, empty);
                a += 1;
                let avail = len.saturating_sub(pre);
                for i in 0..avail {
                    st.set_reg(a + i, elems[pre + i].clone());
                }
                for i in avail..post {
                    st.set_reg(a + i, Value::Nil);
                }
            }
        }
    }
    ControlFlow::Continue
}

/// R(A) := fresh string copy of pool[Bx]
pub(crate) fn make_string(st: &mut State, inst: Instruction) -> ControlFlow {
    let s = match st.cur_literal(inst.bx()) {
        Some(Literal::Str(s)) => s.to_string(),
        Some(other) => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                format!("string literal expected, found {:?}", other),
            ))
        }
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "literal index out of range",
            ))
        }
    };
    let v = st.string_new(s);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// R(A).concat(R(B)) in place
pub(crate) fn str_cat(st: &mut State, inst: Instruction) -> ControlFlow {
    let dst = st.reg(inst.a() as usize);
    let src = st.reg(inst.b() as usize);
    vm_try!(st, st.str_concat(&dst, &src));
    ControlFlow::Continue
}

/// R(A) := { R(B) => R(B+1), ..., R(B+2C-2) => R(B+2C-1) }
pub(crate) fn make_hash(st: &mut State, inst: Instruction) -> ControlFlow {
    let b = inst.b() as usize;
    let c = inst.c() as usize;
    let hash = st.hash_new();
    for i in 0..c {
        let k = st.reg(b + 2 * i);
        let v = st.reg(b + 2 * i + 1);
        vm_try!(st, st.hash_set(&hash, k, v));
    }
    st.set_reg(inst.a() as usize, hash);
    ControlFlow::Continue
}

/// R(A) := range(R(B), R(B+1), exclusive = C)
pub(crate) fn make_range(st: &mut State, inst: Instruction) -> ControlFlow {
    let b = inst.b() as usize;
    let begin = st.reg(b);
    let end = st.reg(b + 1);
    let r = st.range_new(begin, end, inst.c() != 0);
    st.set_reg(inst.a() as usize, r);
    ControlFlow::Continue
}
