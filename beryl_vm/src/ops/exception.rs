//! Rescue and ensure machinery.
//!
//! Setting the exception slot is the only raise mechanism. The unwind
//! walk pops frames that share their rescue watermark with the frame
//! below (no handler active), resumes at the newest saved handler pc
//! when one exists, and otherwise pops this invocation's entry frame and
//! hands control back to the host with the slot still set.

use crate::dispatch::ControlFlow;
use crate::state::State;
use beryl_bytecode::{Instruction, Literal};
use beryl_core::{CoreError, ErrorKind, Value};

/// Arm a handler at pc + sBx.
pub(crate) fn on_err(st: &mut State, inst: Instruction) -> ControlFlow {
    let target = st.ci().pc as i64 + inst.sbx() as i64;
    if target < 0 {
        return st.raise_core(CoreError::new(
            ErrorKind::Runtime,
            "handler target out of range",
        ));
    }
    let slot = st.ci().ridx;
    st.rescue_put(slot, target as usize);
    st.ci_mut().ridx = slot + 1;
    ControlFlow::Continue
}

/// R(A) := exception; clear the slot
pub(crate) fn rescue(st: &mut State, inst: Instruction) -> ControlFlow {
    let v = st.exc.take().map(Value::Object).unwrap_or(Value::Nil);
    st.set_reg(inst.a() as usize, v);
    ControlFlow::Continue
}

/// Drop A armed handlers.
pub(crate) fn pop_err(st: &mut State, inst: Instruction) -> ControlFlow {
    let n = inst.a() as usize;
    let ridx = st.ci().ridx;
    if n > ridx {
        return st.raise_core(CoreError::new(
            ErrorKind::Runtime,
            "rescue stack underflow",
        ));
    }
    st.ci_mut().ridx = ridx - n;
    ControlFlow::Continue
}

/// exception := R(A); unwind
pub(crate) fn raise(st: &mut State, inst: Instruction) -> ControlFlow {
    match st.reg(inst.a() as usize) {
        Value::Object(o) => {
            st.exc = Some(o);
            st.unwind()
        }
        _ => st.raise_core(CoreError::new(
            ErrorKind::Type,
            "exception object expected",
        )),
    }
}

/// Register a closure over child Bx on the ensure stack.
pub(crate) fn ensure_push(st: &mut State, inst: Instruction) -> ControlFlow {
    let child = match st.child_irep(inst.bx()) {
        Some(c) => c,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "nested procedure index out of range",
            ))
        }
    };
    let p = st.closure_new(&child, false);
    let slot = st.ci().eidx;
    st.ensure_put(slot, p);
    st.ci_mut().eidx = slot + 1;
    ControlFlow::Continue
}

/// Pop and invoke A ensure procedures, newest first.
pub(crate) fn ensure_pop(st: &mut State, inst: Instruction) -> ControlFlow {
    let n = inst.a() as usize;
    if n > st.ci().eidx {
        return st.raise_core(CoreError::new(
            ErrorKind::Runtime,
            "ensure stack underflow",
        ));
    }
    for _ in 0..n {
        let e = st.ci().eidx - 1;
        st.ci_mut().eidx = e;
        st.ecall(e);
    }
    ControlFlow::Continue
}

/// Raise a runtime error with the literal message pool[Bx].
pub(crate) fn err(st: &mut State, inst: Instruction) -> ControlFlow {
    let message = match st.cur_literal(inst.bx()) {
        Some(Literal::Str(s)) => s.to_string(),
        Some(other) => format!("{:?}", other),
        None => "unknown error".to_string(),
    };
    st.raise_core(CoreError::new(ErrorKind::Runtime, message))
}

impl State {
    /// Materialise an error as an exception object and unwind.
    pub(crate) fn raise_core(&mut self, err: CoreError) -> ControlFlow {
        self.raise_error(err.kind, err.message);
        self.unwind()
    }

    /// The raise-unwind walk.
    ///
    /// Frames whose rescue watermark equals the one below them have no
    /// active handler and are popped (their environments are promoted on
    /// the way out). A frame with an active handler resumes at the
    /// newest saved pc. An entry frame (`acc < 0`) without a handler is
    /// popped and the invocation finishes with nil; the exception slot
    /// stays set for whoever entered.
    pub(crate) fn unwind(&mut self) -> ControlFlow {
        loop {
            let idx = self.ci_index();
            let below_ridx = if idx == 0 { 0 } else { self.frames[idx - 1].ridx };
            let (ridx, acc) = {
                let f = self.ci();
                (f.ridx, f.acc)
            };

            if ridx > below_ridx {
                // Resume in this frame at the newest handler.
                let f = self.ci_mut();
                f.ridx -= 1;
                let slot = f.ridx;
                let pc = self.rescue[slot];
                self.ci_mut().pc = pc;
                return ControlFlow::Continue;
            }

            if idx == 0 {
                // Bottom of the world; nothing to pop.
                return ControlFlow::Finish(Value::Nil);
            }

            self.pop_frame();

            if acc < 0 {
                // This invocation's entry frame is gone; report to the
                // host path that entered the loop.
                return ControlFlow::Finish(Value::Nil);
            }
        }
    }
}
