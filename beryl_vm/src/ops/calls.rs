//! Method invocation: send, super, bare procedure call, tail call, and
//! class-body execution.
//!
//! All resolution goes through the host's class walk. A miss rewrites
//! the call to `method_missing` with the original name prepended to the
//! argument list (or unshifted into the packed array when the caller
//! exceeded the inline argument maximum).
//!
//! Frames push with their own register base (`caller base + A`), so a
//! native callee writing its result into window slot 0 lands it exactly
//! in the caller's destination register.

use crate::dispatch::ControlFlow;
use crate::frame::Frame;
use crate::state::State;
use beryl_bytecode::{Instruction, ReturnMode, CALL_MAXARGS};
use beryl_core::object::{as_env, as_proc, ObjRef, ProcBody};
use beryl_core::{CoreError, ErrorKind, Symbol, Value};

/// Outcome of method resolution, after any method_missing rewrite.
pub(crate) struct Resolved {
    pub m: ObjRef,
    pub mid: Symbol,
    /// Inline argument count, possibly grown by the prepended name.
    pub n: u32,
    pub target_class: ObjRef,
}

impl State {
    /// Resolve `mid` on the class of the receiver in R(A), rewriting to
    /// `method_missing` (and shuffling arguments) on a miss.
    pub(crate) fn resolve_method(
        &mut self,
        a: usize,
        mid: Symbol,
        n: u32,
        recv: &Value,
    ) -> Result<Resolved, CoreError> {
        let klass = self.class_of(recv);
        if let Some((m, defining)) = self.method_search(&klass, mid) {
            let target_class = as_proc(&m)
                .and_then(|p| p.target_class.read().clone())
                .unwrap_or(defining);
            return Ok(Resolved {
                m,
                mid,
                n,
                target_class,
            });
        }

        let missing = self.intern("method_missing");
        let (m, defining) = self.method_search(&klass, missing).ok_or_else(|| {
            let name = self
                .sym_name(mid)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("#{}", mid.0));
            CoreError::new(ErrorKind::NoMethod, format!("undefined method '{}'", name))
        })?;
        let target_class = as_proc(&m)
            .and_then(|p| p.target_class.read().clone())
            .unwrap_or(defining);

        if n == CALL_MAXARGS {
            // Arguments are packed: push the name into the array.
            let packed = self.reg(a + 1);
            self.ary_unshift(&packed, Value::symbol(mid))?;
            Ok(Resolved {
                m,
                mid: missing,
                n,
                target_class,
            })
        } else {
            // Shift args and block up one slot, insert the name.
            let b = self.base();
            let needed = a + n as usize + 3;
            self.stack_extend(b, needed, needed);
            self.stack_move(b + a + 2, b + a + 1, n as usize + 1);
            self.set_reg(a + 1, Value::symbol(mid));
            Ok(Resolved {
                m,
                mid: missing,
                n: n + 1,
                target_class,
            })
        }
    }

    /// Push the callee frame for a send-style invocation and either run
    /// the native body to completion or hand the loop to the bytecode.
    fn invoke(&mut self, a: usize, resolved: Resolved, recv: Value) -> ControlFlow {
        let Resolved {
            m,
            mid,
            n,
            target_class,
        } = resolved;
        let callee_base = self.base() + a;
        let argc = if n == CALL_MAXARGS { -1 } else { n as i32 };
        let body = match as_proc(&m) {
            Some(p) => p.body,
            None => {
                return self.raise_core(CoreError::new(
                    ErrorKind::Type,
                    "method table entry is not a procedure",
                ))
            }
        };

        match body {
            ProcBody::Native(id) => {
                let nregs = if argc < 0 { 3 } else { n as usize + 2 };
                self.cipush(Frame::new(
                    Some(mid),
                    Some(m),
                    None,
                    target_class,
                    callee_base,
                    nregs,
                    argc,
                    a as i32,
                ));
                let f = match self.native_at(id) {
                    Some(f) => f,
                    None => {
                        return self.raise_core(CoreError::new(
                            ErrorKind::Runtime,
                            "native registry slot is empty",
                        ))
                    }
                };
                let ret = f(self, recv);
                // Window slot 0 aliases the caller's destination register.
                self.stack[callee_base] = ret;
                if self.exc.is_some() {
                    return self.unwind();
                }
                self.pop_frame();
                ControlFlow::Continue
            }
            ProcBody::Irep(id) => {
                let irep = match self.irep_at(id) {
                    Some(i) => i,
                    None => {
                        return self.raise_core(CoreError::new(
                            ErrorKind::Runtime,
                            "irep table slot is empty",
                        ))
                    }
                };
                let nregs = irep.nregs as usize;
                self.cipush(Frame::new(
                    Some(mid),
                    Some(m),
                    Some(irep),
                    target_class,
                    callee_base,
                    nregs,
                    argc,
                    a as i32,
                ));
                if argc < 0 {
                    self.stack_extend(callee_base, nregs.max(3), 3);
                } else {
                    self.stack_extend(callee_base, nregs, argc as usize + 2);
                }
                ControlFlow::Continue
            }
        }
    }
}

/// R(A) := call(R(A), syms[B], R(A+1), ..., R(A+C-1))
pub(crate) fn send(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let n = inst.c();
    let mid = match st.cur_sym(inst.b()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    let recv = st.reg(a);
    let resolved = match st.resolve_method(a, mid, n, &recv) {
        Ok(r) => r,
        Err(e) => return st.raise_core(e),
    };
    st.invoke(a, resolved, recv)
}

/// R(A) := super(R(A+1), ..., R(A+C-1))
pub(crate) fn super_send(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let mut n = inst.c();
    let recv = st.reg(0);

    let (mut mid, start) = {
        let f = st.ci();
        let mid = match f.mid {
            Some(m) => m,
            None => {
                return st.raise_core(CoreError::new(
                    ErrorKind::Runtime,
                    "super called outside of method",
                ))
            }
        };
        let defined_in = f
            .proc
            .as_ref()
            .and_then(|p| as_proc(p))
            .and_then(|p| p.target_class.read().clone());
        let start = match defined_in {
            Some(c) => c,
            None => {
                return st.raise_core(CoreError::new(
                    ErrorKind::Runtime,
                    "super called outside of method",
                ))
            }
        };
        (mid, start)
    };

    let sup = beryl_core::object::as_class(&start)
        .and_then(|k| k.super_class.read().clone());
    let found = sup.as_ref().and_then(|c| st.method_search(c, mid));

    let resolved = match found {
        Some((m, defining)) => {
            let target_class = as_proc(&m)
                .and_then(|p| p.target_class.read().clone())
                .unwrap_or(defining);
            Resolved {
                m,
                mid,
                n,
                target_class,
            }
        }
        None => {
            // No super method: rewrite to method_missing on the class
            // the current method was defined in.
            let original = mid;
            let missing = st.intern("method_missing");
            let pair = st.method_search(&start, missing);
            let (m, defining) = match pair {
                Some(p) => p,
                None => {
                    let name = st
                        .sym_name(original)
                        .map(str::to_owned)
                        .unwrap_or_default();
                    return st.raise_core(CoreError::new(
                        ErrorKind::NoMethod,
                        format!("undefined method '{}'", name),
                    ));
                }
            };
            let target_class = as_proc(&m)
                .and_then(|p| p.target_class.read().clone())
                .unwrap_or(defining);
            if n == CALL_MAXARGS {
                let packed = st.reg(a + 1);
                if let Err(e) = st.ary_unshift(&packed, Value::symbol(original)) {
                    return st.raise_core(e);
                }
            } else {
                let b = st.base();
                let needed = a + n as usize + 3;
                st.stack_extend(b, needed, needed);
                st.stack_move(b + a + 2, b + a + 1, n as usize + 1);
                st.set_reg(a + 1, Value::symbol(original));
                n += 1;
            }
            mid = missing;
            Resolved {
                m,
                mid,
                n,
                target_class,
            }
        }
    };

    // Register A may hold anything; super always reuses the current
    // self, so plant it in the callee's slot 0 up front.
    let b = st.base();
    st.stack_extend(b, a + 1, a + 1);
    st.stack[b + a] = recv.clone();
    st.invoke(a, resolved, recv)
}

/// Re-entry for bare procedure invocation: replace the current frame
/// with the procedure held in self.
pub(crate) fn call(st: &mut State, inst: Instruction) -> ControlFlow {
    let _ = inst;
    let recv = st.reg(0);
    let m = match recv.as_object().filter(|o| as_proc(o).is_some()) {
        Some(o) => o.clone(),
        None => {
            return st.raise_core(CoreError::new(ErrorKind::Type, "call receiver is not a proc"))
        }
    };
    let (body, env, target) = {
        let p = as_proc(&m).expect("checked above");
        (p.body, p.env.clone(), p.target_class.read().clone())
    };

    {
        let f = st.ci_mut();
        f.proc = Some(m.clone());
        if let Some(t) = target {
            f.target_class = t;
        }
        if let Some(env_obj) = &env {
            if let Some(e) = as_env(env_obj) {
                if e.mid.is_some() {
                    f.mid = e.mid;
                }
            }
        }
    }

    match body {
        ProcBody::Native(id) => {
            let base = st.base();
            let f = match st.native_at(id) {
                Some(f) => f,
                None => {
                    return st.raise_core(CoreError::new(
                        ErrorKind::Runtime,
                        "native registry slot is empty",
                    ))
                }
            };
            let ret = f(st, recv);
            st.stack[base] = ret;
            if st.exc.is_some() {
                return st.unwind();
            }
            st.pop_frame();
            ControlFlow::Continue
        }
        ProcBody::Irep(id) => {
            let irep = match st.irep_at(id) {
                Some(i) => i,
                None => {
                    return st.raise_core(CoreError::new(
                        ErrorKind::Runtime,
                        "irep table slot is empty",
                    ))
                }
            };
            let nregs = irep.nregs as usize;
            let (base, argc) = {
                let f = st.ci_mut();
                f.irep = Some(irep);
                f.pc = 0;
                f.nregs = nregs;
                (f.stackidx, f.argc)
            };
            if argc < 0 {
                st.stack_extend(base, nregs.max(3), 3);
            } else {
                st.stack_extend(base, nregs, argc as usize + 2);
            }
            // A captured environment supplies the original receiver.
            if let Some(env_obj) = env {
                let self_v = st.env_read(&env_obj, 0);
                st.stack[base] = self_v;
            }
            ControlFlow::Continue
        }
    }
}

/// Tail call: resolve like send but replace the current frame, copying
/// receiver, arguments and block down to the frame base.
pub(crate) fn tail_call(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let n = inst.c();
    let mid = match st.cur_sym(inst.b()) {
        Some(s) => s,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "symbol index out of range",
            ))
        }
    };
    let recv = st.reg(a);
    let resolved = match st.resolve_method(a, mid, n, &recv) {
        Ok(r) => r,
        Err(e) => return st.raise_core(e),
    };
    let Resolved {
        m,
        mid,
        n,
        target_class,
    } = resolved;
    let argc = if n == CALL_MAXARGS { -1 } else { n as i32 };
    let body = match as_proc(&m) {
        Some(p) => p.body,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "method table entry is not a procedure",
            ))
        }
    };

    let base = st.base();
    {
        let f = st.ci_mut();
        f.mid = Some(mid);
        f.target_class = target_class;
        f.argc = argc;
        f.proc = Some(m.clone());
    }
    // Receiver, inline args (or the packed array), and the block slot.
    let moved = if argc < 0 { 3 } else { n as usize + 2 };
    st.stack_move(base, base + a, moved);

    match body {
        ProcBody::Native(id) => {
            let f = match st.native_at(id) {
                Some(f) => f,
                None => {
                    return st.raise_core(CoreError::new(
                        ErrorKind::Runtime,
                        "native registry slot is empty",
                    ))
                }
            };
            let ret = f(st, recv);
            st.stack[base] = ret.clone();
            if st.exc.is_some() {
                return st.unwind();
            }
            // Flow straight into the return path so ensures still run.
            st.do_return(ret, ReturnMode::Normal)
        }
        ProcBody::Irep(id) => {
            let irep = match st.irep_at(id) {
                Some(i) => i,
                None => {
                    return st.raise_core(CoreError::new(
                        ErrorKind::Runtime,
                        "irep table slot is empty",
                    ))
                }
            };
            let nregs = irep.nregs as usize;
            {
                let f = st.ci_mut();
                f.irep = Some(irep);
                f.pc = 0;
                f.nregs = nregs;
            }
            if argc < 0 {
                st.stack_extend(base, nregs.max(3), 3);
            } else {
                st.stack_extend(base, nregs, argc as usize + 2);
            }
            ControlFlow::Continue
        }
    }
}

/// Execute child irep Bx with R(A) as the enclosing class (class and
/// module bodies).
pub(crate) fn exec(st: &mut State, inst: Instruction) -> ControlFlow {
    let a = inst.a() as usize;
    let recv = st.reg(a);
    let class_obj = match recv.as_object() {
        Some(o) if beryl_core::object::as_class(o).is_some() => o.clone(),
        _ => {
            return st.raise_core(CoreError::new(
                ErrorKind::Type,
                "class body target is not a class or module",
            ))
        }
    };
    let child = match st.child_irep(inst.bx()) {
        Some(c) => c,
        None => {
            return st.raise_core(CoreError::new(
                ErrorKind::Runtime,
                "nested procedure index out of range",
            ))
        }
    };

    let p = beryl_core::object::RObject::proc_obj(
        ProcBody::Irep(beryl_core::object::IrepId(child.idx)),
        Some(class_obj.clone()),
        false,
        None,
    );
    st.gc.protect(&p);

    let callee_base = st.base() + a;
    let nregs = child.nregs as usize;
    st.cipush(Frame::new(
        None,
        Some(p),
        Some(child),
        class_obj,
        callee_base,
        nregs,
        0,
        a as i32,
    ));
    st.stack_extend(callee_base, nregs, 1);
    ControlFlow::Continue
}
