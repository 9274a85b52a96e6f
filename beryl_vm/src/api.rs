//! The exposed host API: running procedures, synthesised method calls,
//! block invocation, and stack preflight.
//!
//! Every entry pushes a frame marked `acc = -1` and drives the dispatch
//! loop to completion. On an unhandled raise the loop returns nil with
//! the exception slot still set; callers inspect [`State::exception`].

use crate::frame::Frame;
use crate::state::State;
use beryl_bytecode::Irep;
use beryl_core::object::{as_proc, ObjRef, ProcBody};
use beryl_core::{ErrorKind, Symbol, Value};
use smallvec::SmallVec;
use std::sync::Arc;

impl State {
    /// Run a procedure value to completion with the given `self`.
    ///
    /// On an unhandled raise the exception slot is left set and nil is
    /// returned.
    pub fn run(&mut self, proc_val: &Value, self_val: Value) -> Value {
        let p = match proc_val.as_object().filter(|o| as_proc(o).is_some()) {
            Some(o) => o.clone(),
            None => return self.raise_error(ErrorKind::Type, "not a procedure"),
        };
        self.run_proc(&p, self_val)
    }

    /// Run a procedure object to completion.
    pub fn run_proc(&mut self, p: &ObjRef, self_val: Value) -> Value {
        self.run_internal(p, self_val, None)
    }

    /// Convenience for hosts and tests: wrap a registered irep in a
    /// plain procedure targeting the root class and run it.
    pub fn run_irep(&mut self, irep: &Arc<Irep>, self_val: Value) -> Value {
        let object = self.core.object.clone();
        let p = beryl_core::object::RObject::proc_obj(
            ProcBody::Irep(beryl_core::object::IrepId(irep.idx)),
            Some(object),
            false,
            None,
        );
        self.gc.protect(&p);
        self.run_proc(&p, self_val)
    }

    /// Shared entry path for `run`, ensure invocation and block yields.
    pub(crate) fn run_internal(
        &mut self,
        p: &ObjRef,
        self_val: Value,
        mid: Option<Symbol>,
    ) -> Value {
        let entry_base = {
            let c = self.ci();
            c.stackidx + c.nregs
        };
        let target = as_proc(p)
            .and_then(|pr| pr.target_class.read().clone())
            .unwrap_or_else(|| self.core.object.clone());
        let body = match as_proc(p) {
            Some(pr) => pr.body,
            None => return self.raise_error(ErrorKind::Type, "not a procedure"),
        };

        match body {
            ProcBody::Native(id) => {
                self.cipush(Frame::new(
                    mid,
                    Some(p.clone()),
                    None,
                    target,
                    entry_base,
                    2,
                    0,
                    -1,
                ));
                self.stack_extend(entry_base, 2, 0);
                self.stack[entry_base] = self_val.clone();
                let f = match self.native_at(id) {
                    Some(f) => f,
                    None => {
                        self.pop_frame();
                        return self.raise_error(
                            ErrorKind::Runtime,
                            "native registry slot is empty",
                        );
                    }
                };
                let ret = f(self, self_val);
                self.pop_frame();
                ret
            }
            ProcBody::Irep(id) => {
                let irep = match self.irep_at(id) {
                    Some(i) => i,
                    None => {
                        return self
                            .raise_error(ErrorKind::Runtime, "irep table slot is empty")
                    }
                };
                let nregs = irep.nregs as usize + 2;
                self.cipush(Frame::new(
                    mid,
                    Some(p.clone()),
                    Some(irep),
                    target,
                    entry_base,
                    nregs,
                    0,
                    -1,
                ));
                self.stack_extend(entry_base, nregs, 0);
                self.stack[entry_base] = self_val;
                self.execute()
            }
        }
    }

    /// Invoke one registered ensure procedure with the current self.
    pub(crate) fn ecall(&mut self, idx: usize) {
        let p = match self.ensure.get(idx) {
            Some(p) => p.clone(),
            None => return,
        };
        let self_v = self.reg(0);
        let mid = self.ci().mid;
        self.run_internal(&p, self_v, mid);
    }

    /// Synthesise a method call on `self_val` and run it to completion.
    pub fn funcall(&mut self, self_val: Value, name: &str, args: &[Value]) -> Value {
        self.funcall_with_block(self_val, name, args, None)
    }

    /// `funcall` with an explicit block argument.
    pub fn funcall_with_block(
        &mut self,
        self_val: Value,
        name: &str,
        args: &[Value],
        block: Option<Value>,
    ) -> Value {
        let mut mid = self.intern(name);
        let klass = self.class_of(&self_val);
        let mut prepend: Option<Symbol> = None;

        let found = self.method_search(&klass, mid);
        let (m, defining) = match found {
            Some(pair) => pair,
            None => {
                let original = mid;
                mid = self.intern("method_missing");
                match self.method_search(&klass, mid) {
                    Some(pair) => {
                        prepend = Some(original);
                        pair
                    }
                    None => {
                        return self.raise_error(
                            ErrorKind::NoMethod,
                            format!("undefined method '{}'", name),
                        )
                    }
                }
            }
        };
        let target = as_proc(&m)
            .and_then(|p| p.target_class.read().clone())
            .unwrap_or(defining);

        // Stage the window: self, (name,) args..., block.
        let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
        if let Some(sym) = prepend {
            argv.push(Value::symbol(sym));
        }
        argv.extend(args.iter().cloned());
        let argc = argv.len();

        let entry_base = {
            let c = self.ci();
            c.stackidx + c.nregs
        };
        let body = match as_proc(&m) {
            Some(p) => p.body,
            None => return self.raise_error(ErrorKind::Type, "method entry is not a procedure"),
        };

        let fill = |st: &mut State| {
            st.stack[entry_base] = self_val.clone();
            for (i, v) in argv.iter().enumerate() {
                st.stack[entry_base + 1 + i] = v.clone();
            }
            st.stack[entry_base + 1 + argc] = block.clone().unwrap_or(Value::Nil);
        };

        match body {
            ProcBody::Native(id) => {
                let win = argc + 2;
                self.cipush(Frame::new(
                    Some(mid),
                    Some(m.clone()),
                    None,
                    target,
                    entry_base,
                    win,
                    argc as i32,
                    -1,
                ));
                self.stack_extend(entry_base, win, 0);
                fill(self);
                let f = match self.native_at(id) {
                    Some(f) => f,
                    None => {
                        self.pop_frame();
                        return self.raise_error(
                            ErrorKind::Runtime,
                            "native registry slot is empty",
                        );
                    }
                };
                let ret = f(self, self_val.clone());
                self.pop_frame();
                ret
            }
            ProcBody::Irep(id) => {
                let irep = match self.irep_at(id) {
                    Some(i) => i,
                    None => {
                        return self
                            .raise_error(ErrorKind::Runtime, "irep table slot is empty")
                    }
                };
                let nregs = (irep.nregs as usize + 2).max(argc + 2);
                self.cipush(Frame::new(
                    Some(mid),
                    Some(m.clone()),
                    Some(irep),
                    target,
                    entry_base,
                    nregs,
                    argc as i32,
                    -1,
                ));
                self.stack_extend(entry_base, nregs, 0);
                fill(self);
                self.execute()
            }
        }
    }

    /// Invoke a block (procedure value) with the given arguments; `self`
    /// defaults to the current frame's receiver.
    pub fn yield_proc(
        &mut self,
        block: &Value,
        args: &[Value],
        self_val: Option<Value>,
    ) -> Value {
        let p = match block.as_object().filter(|o| as_proc(o).is_some()) {
            Some(o) => o.clone(),
            None => return self.raise_error(ErrorKind::Type, "no block given"),
        };
        let self_v = self_val.unwrap_or_else(|| self.reg(0));
        let mid = self.ci().mid;
        let target = as_proc(&p)
            .and_then(|pr| pr.target_class.read().clone())
            .unwrap_or_else(|| self.core.object.clone());

        let entry_base = {
            let c = self.ci();
            c.stackidx + c.nregs
        };
        let argc = args.len();
        let body = as_proc(&p).map(|pr| pr.body).expect("checked above");

        match body {
            ProcBody::Native(id) => {
                let win = argc + 2;
                self.cipush(Frame::new(
                    mid,
                    Some(p.clone()),
                    None,
                    target,
                    entry_base,
                    win,
                    argc as i32,
                    -1,
                ));
                self.stack_extend(entry_base, win, 0);
                self.stack[entry_base] = self_v.clone();
                for (i, v) in args.iter().enumerate() {
                    self.stack[entry_base + 1 + i] = v.clone();
                }
                self.stack[entry_base + 1 + argc] = Value::Nil;
                let f = match self.native_at(id) {
                    Some(f) => f,
                    None => {
                        self.pop_frame();
                        return self.raise_error(
                            ErrorKind::Runtime,
                            "native registry slot is empty",
                        );
                    }
                };
                let ret = f(self, self_v);
                self.pop_frame();
                ret
            }
            ProcBody::Irep(id) => {
                let irep = match self.irep_at(id) {
                    Some(i) => i,
                    None => {
                        return self
                            .raise_error(ErrorKind::Runtime, "irep table slot is empty")
                    }
                };
                let nregs = (irep.nregs as usize + 2).max(argc + 2);
                self.cipush(Frame::new(
                    mid,
                    Some(p.clone()),
                    Some(irep),
                    target,
                    entry_base,
                    nregs,
                    argc as i32,
                    -1,
                ));
                self.stack_extend(entry_base, nregs, 0);
                self.stack[entry_base] = self_v;
                for (i, v) in args.iter().enumerate() {
                    self.stack[entry_base + 1 + i] = v.clone();
                }
                self.stack[entry_base + 1 + argc] = Value::Nil;
                self.execute()
            }
        }
    }

    /// Force operand-stack capacity for `n` slots above the current
    /// base without touching live registers.
    pub fn checkstack(&mut self, n: usize) {
        let base = self.base();
        let room = n + 1;
        self.stack_extend(base, room, room);
    }
}
