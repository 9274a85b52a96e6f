//! Jumps, returns and the trace opcode.
//!
//! The return path is shared with native tail calls: select the frame
//! that is actually leaving (break and non-local return retarget through
//! the closure's environment), promote and pop, run the ensure
//! procedures registered above the caller's watermark, then deliver the
//! value to the caller's accumulator register or to the host.

use crate::dispatch::ControlFlow;
use crate::state::State;
use beryl_bytecode::{Instruction, ReturnMode};
use beryl_core::object::{as_env, as_proc};
use beryl_core::{CoreError, ErrorKind, Value};

/// pc += sBx (relative to the instruction after the jump)
#[inline]
pub(crate) fn jump(st: &mut State, inst: Instruction) -> ControlFlow {
    branch(st, inst.sbx())
}

/// if R(A) then pc += sBx
#[inline]
pub(crate) fn jump_if(st: &mut State, inst: Instruction) -> ControlFlow {
    if st.reg(inst.a() as usize).is_truthy() {
        return branch(st, inst.sbx());
    }
    ControlFlow::Continue
}

/// unless R(A) then pc += sBx
#[inline]
pub(crate) fn jump_not(st: &mut State, inst: Instruction) -> ControlFlow {
    if !st.reg(inst.a() as usize).is_truthy() {
        return branch(st, inst.sbx());
    }
    ControlFlow::Continue
}

fn branch(st: &mut State, offset: i32) -> ControlFlow {
    let pc = st.ci().pc as i64 + offset as i64;
    if pc < 0 {
        return st.raise_core(CoreError::new(
            ErrorKind::Runtime,
            "branch target out of range",
        ));
    }
    st.ci_mut().pc = pc as usize;
    ControlFlow::Continue
}

/// return R(A) with mode B
pub(crate) fn return_op(st: &mut State, inst: Instruction) -> ControlFlow {
    // A pending exception at a return site resumes the unwind instead.
    if st.exc.is_some() {
        return st.unwind();
    }
    let v = st.reg(inst.a() as usize);
    let mode = match ReturnMode::from_u32(inst.b()) {
        Some(m) => m,
        None => {
            return st.raise_core(CoreError::new(ErrorKind::Runtime, "bad return mode"));
        }
    };
    st.do_return(v, mode)
}

/// trace hook: report (A, B, C) through the installed sink
pub(crate) fn debug(st: &mut State, inst: Instruction) -> ControlFlow {
    st.trace.debug(inst.a(), inst.b(), inst.c());
    ControlFlow::Continue
}

impl State {
    /// Leave the current frame with `v`.
    ///
    /// Break mode unwinds to the frame above the environment's creator;
    /// return mode unwinds to the creator itself. Both are only legal
    /// while the creating frame is still alive.
    pub(crate) fn do_return(&mut self, v: Value, mode: ReturnMode) -> ControlFlow {
        // Ensure procedures registered by everything we are about to
        // leave, measured from the top frame.
        let eidx = self.ci().eidx;

        let leaving_idx = match mode {
            ReturnMode::Normal => self.ci_index(),
            ReturnMode::Break | ReturnMode::Return => {
                let cioff = self.current_env_cioff();
                match cioff {
                    Some(off) => {
                        if mode == ReturnMode::Break {
                            off + 1
                        } else {
                            off
                        }
                    }
                    None => {
                        let kind = if mode == ReturnMode::Break {
                            "break"
                        } else {
                            "return"
                        };
                        return self.raise_core(CoreError::local_jump(kind));
                    }
                }
            }
        };

        // Pop everything above the leaving frame, then the frame itself.
        while self.ci_index() > leaving_idx {
            self.pop_frame();
        }
        let leaving = self.pop_frame();
        let acc = leaving.acc;

        let cur_eidx = self.ci().eidx;

        // Newest-first ensure invocation down to the caller's watermark.
        let mut e = eidx;
        while e > cur_eidx {
            e -= 1;
            self.ecall(e);
        }

        if acc < 0 {
            return ControlFlow::Finish(v);
        }
        let at = self.base() + acc as usize;
        if at >= self.stack.len() {
            let base = self.base();
            self.stack_extend(base, acc as usize + 1, acc as usize + 1);
        }
        self.stack[at] = v;
        ControlFlow::Continue
    }

    /// Frame index recorded by the running closure's environment, if the
    /// environment still aliases a live frame.
    fn current_env_cioff(&self) -> Option<usize> {
        let proc_obj = self.ci().proc.as_ref()?;
        let env = as_proc(proc_obj)?.env.as_ref()?;
        let off = as_env(env)?.cioff();
        if off < 0 {
            None
        } else {
            Some(off as usize)
        }
    }
}
