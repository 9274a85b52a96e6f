//! Callee-side argument reconciliation and enclosing-scope argument
//! access.
//!
//! The reconciliation opcode rewrites the incoming argument shape into
//! the declared layout `[self, m1.., o.., rest, m2.., block]`, advancing
//! the pc past default-initialiser jumps that are already satisfied. The
//! scope-addressed forms read the same layout out of an enclosing
//! frame's window or environment.

use crate::dispatch::ControlFlow;
use crate::state::State;
use beryl_bytecode::{ArgScope, Instruction, ParamSpec};
use beryl_core::object::{as_proc, ObjRef};
use beryl_core::{CoreError, ErrorKind, Value};
use smallvec::SmallVec;

type ArgBuf = SmallVec<[Value; 8]>;

/// Arity reconciliation (the declared-shape descriptor is packed in Ax).
pub(crate) fn enter(st: &mut State, inst: Instruction) -> ControlFlow {
    let spec = ParamSpec::unpack(inst.ax());
    let m1 = spec.m1 as usize;
    let o = spec.o as usize;
    let r = spec.r;
    let m2 = spec.m2 as usize;
    let len = spec.len() as usize;

    let base = st.base();
    let frame_argc = st.ci().argc;

    // Snapshot the actual arguments and block.
    let mut argv: ArgBuf;
    let block: Value;
    if frame_argc < 0 {
        let packed = st.reg(1);
        argv = match st.ary_elems(&packed) {
            Some(elems) => elems.into_iter().collect(),
            None => {
                return st.raise_core(CoreError::new(
                    ErrorKind::Type,
                    "packed argument register does not hold an array",
                ))
            }
        };
        block = st.reg(2);
        // Keep the packed array reachable for scope-addressed access.
        st.stack_extend(base, len + 3, len + 3);
        st.set_reg(len + 2, packed);
    } else {
        let argc = frame_argc as usize;
        argv = (0..argc).map(|i| st.reg(1 + i)).collect();
        block = st.reg(1 + argc);
    }
    let mut argc = argv.len();

    let strict = st
        .ci()
        .proc
        .as_ref()
        .and_then(|p| as_proc(p))
        .map(|p| p.strict)
        .unwrap_or(false);

    if strict {
        if argc < m1 + m2 || (!r && argc > len) {
            let name = st
                .ci()
                .mid
                .and_then(|s| st.sym_name(s))
                .map(str::to_owned);
            return st.raise_core(CoreError::arg_count(
                name.as_deref(),
                argc as i64,
                (m1 + m2) as i64,
            ));
        }
    } else if len > 1 && argc == 1 {
        // Block-style auto-splat of a lone array argument.
        if let Some(elems) = st.ary_elems(&argv[0]) {
            argv = elems.into_iter().collect();
            argc = argv.len();
        }
    }

    st.ci_mut().argc = len as i32;
    st.stack_extend(base, len + 2, len + 2);

    if argc < len {
        // Under-supplied: fill what exists, place the required suffix,
        // and skip only the satisfied default initialisers.
        let prefix = argc.saturating_sub(m2).min(m1 + o);
        for (i, v) in argv.iter().take(prefix).enumerate() {
            st.set_reg(1 + i, v.clone());
        }
        let tail = m2.min(argc);
        for i in 0..tail {
            st.set_reg(len - m2 + 1 + i, argv[argc - tail + i].clone());
        }
        if r {
            let rest = st.ary_new(Vec::new());
            st.set_reg(m1 + o + 1, rest);
        }
        st.set_reg(len + 1, block);
        let skip = argc.saturating_sub(m1 + m2);
        st.ci_mut().pc += skip;
    } else {
        for (i, v) in argv.iter().take(m1 + o).enumerate() {
            st.set_reg(1 + i, v.clone());
        }
        if r {
            let rest: Vec<Value> = argv[m1 + o..argc - m2].to_vec();
            let rest_v = st.ary_new(rest);
            st.set_reg(m1 + o + 1, rest_v);
        }
        for i in 0..m2 {
            st.set_reg(m1 + o + r as usize + 1 + i, argv[argc - m2 + i].clone());
        }
        st.set_reg(len + 1, block);
        st.ci_mut().pc += o;
    }
    ControlFlow::Continue
}

/// Slots 1.. of the addressed scope: the local window at nesting 0,
/// otherwise the environment `lv - 1` levels up the chain.
fn scope_slots(st: &mut State, lv: u32, needed: usize) -> Result<ArgBuf, CoreError> {
    if lv == 0 {
        Ok((0..needed).map(|i| st.reg(1 + i)).collect())
    } else {
        let env: ObjRef = st.uvenv(lv as usize - 1).ok_or_else(|| {
            CoreError::new(ErrorKind::Runtime, "no enclosing scope at that nesting")
        })?;
        let slots = st.env_slots(&env);
        Ok((0..needed)
            .map(|i| slots.get(1 + i).cloned().unwrap_or(Value::Nil))
            .collect())
    }
}

/// R(A) := argument array gathered from the described scope;
/// R(A+1) := that scope's block argument.
pub(crate) fn arg_array(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let scope = ArgScope::unpack(inst.bx());
    let m1 = scope.m1 as usize;
    let r = scope.r as usize;
    let m2 = scope.m2 as usize;

    let needed = m1 + r + m2 + 1;
    let src = match scope_slots(st, scope.lv, needed) {
        Ok(s) => s,
        Err(e) => return st.raise_core(e),
    };

    let ary = if r == 0 {
        st.ary_new(src[..m1 + m2].to_vec())
    } else {
        let mut elems: Vec<Value> = src[..m1].to_vec();
        if let Some(rest) = st.ary_elems(&src[m1]) {
            elems.extend(rest);
        }
        elems.extend_from_slice(&src[m1 + 1..m1 + 1 + m2]);
        st.ary_new(elems)
    };
    st.set_reg(a, ary);
    st.set_reg(a + 1, src[m1 + r + m2].clone());
    ControlFlow::Continue
}

/// R(A) := block argument of the described scope.
pub(crate) fn block_push(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let scope = ArgScope::unpack(inst.bx());
    let at = scope.m1 as usize + scope.r as usize + scope.m2 as usize;
    let src = match scope_slots(st, scope.lv, at + 1) {
        Ok(s) => s,
        Err(e) => return st.raise_core(e),
    };
    st.set_reg(a, src[at].clone());
    ControlFlow::Continue
}
