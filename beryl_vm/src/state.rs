//! The execution context.
//!
//! One [`State`] owns every mutable structure the interpreter touches:
//! the operand stack, the frame stack, the rescue and ensure stacks, the
//! exception slot, the symbol interner, the irep table, the native
//! function registry, the variable stores and the collector hooks.
//! All entry points take the state explicitly; there is no ambient VM.
//!
//! Register windows are `(stackidx, nregs)` pairs into the operand
//! stack. Any operation that can grow a stack works through indices and
//! re-derives slices afterwards, so growth never invalidates a frame.

use crate::builtins::{self, CoreClasses};
use crate::frame::{Frame, CALLINFO_INIT_SIZE, STACK_INIT_SIZE};
use crate::gc::GcHooks;
use crate::trace::{StdoutTrace, TraceSink};
use beryl_bytecode::{Irep, Literal};
use beryl_core::object::{as_env, as_proc, EnvHome, IrepId, NativeId, ObjRef, ProcBody, RObject};
use beryl_core::{Symbol, SymbolTable, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A host-native procedure: takes the state and the receiver, returns
/// the result. Arguments are read from the current register window via
/// [`State::args`] / [`State::block_arg`]; failures are reported by
/// raising into the exception slot.
pub type NativeFn = fn(&mut State, Value) -> Value;

/// The virtual machine state.
pub struct State {
    /// Operand stack. Length is the allocated size; unused slots are nil.
    pub(crate) stack: Vec<Value>,
    /// Frame (call info) stack. Index 0 is a permanent bottom frame.
    pub(crate) frames: Vec<Frame>,
    /// Saved handler pcs; the current frame's `ridx` is its watermark.
    pub(crate) rescue: Vec<usize>,
    /// Procedures to run on non-local exit, watermarked by `eidx`.
    pub(crate) ensure: Vec<ObjRef>,
    /// The exception slot; setting it is the only raise mechanism.
    pub(crate) exc: Option<ObjRef>,

    pub(crate) symbols: SymbolTable,
    pub(crate) ireps: Vec<Arc<Irep>>,
    pub(crate) natives: Vec<NativeFn>,

    pub(crate) globals: FxHashMap<Symbol, Value>,
    pub(crate) specials: FxHashMap<u32, Value>,

    pub(crate) gc: GcHooks,
    pub(crate) trace: Box<dyn TraceSink>,
    /// The bootstrapped class set.
    pub core: CoreClasses,
}

impl State {
    pub fn new() -> State {
        let mut symbols = SymbolTable::new();
        let core = builtins::bootstrap_classes(&mut symbols);
        let bottom = Frame::bottom(core.object.clone());

        let mut st = State {
            stack: vec![Value::Nil; STACK_INIT_SIZE],
            frames: Vec::with_capacity(CALLINFO_INIT_SIZE),
            rescue: Vec::new(),
            ensure: Vec::new(),
            exc: None,
            symbols,
            ireps: Vec::new(),
            natives: Vec::new(),
            globals: FxHashMap::default(),
            specials: FxHashMap::default(),
            gc: GcHooks::new(),
            trace: Box::new(StdoutTrace),
            core,
        };
        st.frames.push(bottom);
        builtins::install_builtins(&mut st);
        st
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn sym_name(&self, sym: Symbol) -> Option<&str> {
        self.symbols.name(sym)
    }

    // =========================================================================
    // Frames
    // =========================================================================

    #[inline]
    pub(crate) fn ci(&self) -> &Frame {
        self.frames.last().expect("call-info stack is never empty")
    }

    #[inline]
    pub(crate) fn ci_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .expect("call-info stack is never empty")
    }

    #[inline]
    pub(crate) fn ci_index(&self) -> usize {
        self.frames.len() - 1
    }

    /// Current frame depth, counting the permanent bottom frame.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Push a frame, inheriting the unwind watermarks from the top.
    pub(crate) fn cipush(&mut self, mut frame: Frame) {
        let (ridx, eidx) = {
            let top = self.ci();
            (top.ridx, top.eidx)
        };
        frame.ridx = ridx;
        frame.eidx = eidx;
        self.frames.push(frame);
    }

    /// Pop the top frame. If it owns a live environment, the register
    /// window is copied out first so closures over it keep working.
    pub(crate) fn pop_frame(&mut self) -> Frame {
        debug_assert!(self.frames.len() > 1, "attempted to pop the bottom frame");
        let f = self.frames.pop().expect("call-info stack is never empty");
        if let Some(env_obj) = &f.env {
            if let Some(env) = as_env(env_obj) {
                if !env.is_detached() {
                    let start = f.stackidx.min(self.stack.len());
                    let end = (f.stackidx + env.len).min(self.stack.len());
                    let mut slots = self.stack[start..end].to_vec();
                    slots.resize(env.len, Value::Nil);
                    env.detach(slots.into_boxed_slice());
                }
            }
        }
        f
    }

    // =========================================================================
    // Registers and operand stack
    // =========================================================================

    /// Base offset of the current register window.
    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.ci().stackidx
    }

    /// Read register `i` of the current window.
    #[inline]
    pub(crate) fn reg(&self, i: usize) -> Value {
        let at = self.base() + i;
        self.stack.get(at).cloned().unwrap_or(Value::Nil)
    }

    /// Write register `i` of the current window.
    #[inline]
    pub(crate) fn set_reg(&mut self, i: usize, v: Value) {
        let at = self.base() + i;
        if at >= self.stack.len() {
            let base = self.base();
            self.stack_extend(base, i + 1, i + 1);
        }
        self.stack[at] = v;
    }

    /// Ensure the window starting at `base` can hold `room` slots,
    /// growing the operand stack if needed (double when the shortfall
    /// fits the current size, otherwise grow by the request). Window
    /// slots `[keep, room)` are reset to nil.
    pub(crate) fn stack_extend(&mut self, base: usize, room: usize, keep: usize) {
        if base + room > self.stack.len() {
            let len = self.stack.len();
            let grown = if room <= len { len * 2 } else { len + room };
            let new_len = grown.max(base + room);
            self.stack.resize(new_len, Value::Nil);
        }
        if room > keep {
            for slot in &mut self.stack[base + keep..base + room] {
                *slot = Value::Nil;
            }
        }
    }

    /// Store a handler pc at rescue slot `idx`.
    ///
    /// The rescue and ensure vectors are slot-addressed stacks: frames
    /// carry watermark indices into them and pops only move watermarks,
    /// so a slot may be rewritten by a later push without the vector
    /// ever shrinking while entries above a live watermark exist.
    pub(crate) fn rescue_put(&mut self, idx: usize, pc: usize) {
        if idx < self.rescue.len() {
            self.rescue[idx] = pc;
        } else {
            debug_assert_eq!(idx, self.rescue.len());
            self.rescue.push(pc);
        }
    }

    /// Store an ensure procedure at slot `idx`; same discipline as
    /// [`State::rescue_put`].
    pub(crate) fn ensure_put(&mut self, idx: usize, p: ObjRef) {
        if idx < self.ensure.len() {
            self.ensure[idx] = p;
        } else {
            debug_assert_eq!(idx, self.ensure.len());
            self.ensure.push(p);
        }
    }

    /// Overlap-safe register block move.
    pub(crate) fn stack_move(&mut self, dst: usize, src: usize, n: usize) {
        if dst == src || n == 0 {
            return;
        }
        let needed = dst.max(src) + n;
        if needed > self.stack.len() {
            self.stack.resize(needed, Value::Nil);
        }
        if dst < src {
            for i in 0..n {
                self.stack[dst + i] = self.stack[src + i].clone();
            }
        } else {
            for i in (0..n).rev() {
                self.stack[dst + i] = self.stack[src + i].clone();
            }
        }
    }

    // =========================================================================
    // Ireps and natives
    // =========================================================================

    /// Register a compiled body, assigning its table slot. Families of
    /// ireps (a body plus its nested procedures) must be registered
    /// contiguously, parent first, because the nested-procedure opcodes
    /// address children as `table[parent.idx + operand]`.
    pub fn register_irep(&mut self, mut irep: Irep) -> Arc<Irep> {
        irep.idx = self.ireps.len();
        let arc = Arc::new(irep);
        self.ireps.push(arc.clone());
        arc
    }

    /// Register a parent-first family of ireps.
    pub fn register_family(&mut self, family: Vec<Irep>) -> Vec<Arc<Irep>> {
        family.into_iter().map(|i| self.register_irep(i)).collect()
    }

    pub(crate) fn irep_at(&self, id: IrepId) -> Option<Arc<Irep>> {
        self.ireps.get(id.0).cloned()
    }

    /// Resolve a nested irep relative to the currently executing body.
    pub(crate) fn child_irep(&self, offset: u32) -> Option<Arc<Irep>> {
        let parent = self.ci().irep.as_ref()?;
        self.ireps.get(parent.idx + offset as usize).cloned()
    }

    /// Symbol table entry of the currently executing body.
    #[inline]
    pub(crate) fn cur_sym(&self, idx: u32) -> Option<Symbol> {
        self.ci().irep.as_ref().and_then(|ir| ir.sym(idx))
    }

    /// Literal-pool entry of the currently executing body.
    pub(crate) fn cur_literal(&self, idx: u32) -> Option<Literal> {
        self.ci()
            .irep
            .as_ref()
            .and_then(|ir| ir.literal(idx).cloned())
    }

    /// Register a native function, returning its registry slot.
    pub fn register_native(&mut self, f: NativeFn) -> NativeId {
        let id = NativeId(self.natives.len());
        self.natives.push(f);
        id
    }

    pub(crate) fn native_at(&self, id: NativeId) -> Option<NativeFn> {
        self.natives.get(id.0).copied()
    }

    // =========================================================================
    // Procedure construction
    // =========================================================================

    /// A plain procedure over a compiled body.
    pub fn proc_new(&mut self, irep: &Arc<Irep>, strict: bool) -> ObjRef {
        let p = RObject::proc_obj(
            ProcBody::Irep(IrepId(irep.idx)),
            Some(self.ci().target_class.clone()),
            strict,
            None,
        );
        self.gc.protect(&p);
        p
    }

    /// A closure over a compiled body, capturing the current frame's
    /// environment (created lazily on first capture).
    pub fn closure_new(&mut self, irep: &Arc<Irep>, strict: bool) -> ObjRef {
        let env = self.frame_env();
        let p = RObject::proc_obj(
            ProcBody::Irep(IrepId(irep.idx)),
            Some(self.ci().target_class.clone()),
            strict,
            Some(env),
        );
        self.gc.protect(&p);
        p
    }

    /// A procedure wrapping a host function.
    pub fn native_proc(&mut self, f: NativeFn) -> ObjRef {
        let id = self.register_native(f);
        let p = RObject::proc_obj(ProcBody::Native(id), None, false, None);
        self.gc.protect(&p);
        p
    }

    /// The current frame's environment, creating it on first use. The
    /// environment spans the whole register window and chains to the
    /// enclosing procedure's environment.
    pub(crate) fn frame_env(&mut self) -> ObjRef {
        if let Some(e) = &self.ci().env {
            return e.clone();
        }
        let cioff = self.ci_index();
        let (mid, parent, len, base) = {
            let f = self.ci();
            let parent = f
                .proc
                .as_ref()
                .and_then(|p| as_proc(p))
                .and_then(|p| p.env.clone());
            (f.mid, parent, f.nregs, f.stackidx)
        };
        let env = RObject::env(mid, parent, len, cioff, base);
        self.gc.protect(&env);
        self.ci_mut().env = Some(env.clone());
        env
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Environment `up` levels above the running procedure.
    pub(crate) fn uvenv(&self, up: usize) -> Option<ObjRef> {
        let mut e = self
            .ci()
            .proc
            .as_ref()
            .and_then(|p| as_proc(p))
            .and_then(|p| p.env.clone())?;
        for _ in 0..up {
            let parent = as_env(&e)?.parent.clone()?;
            e = parent;
        }
        Some(e)
    }

    /// Read one slot of an environment, wherever it currently lives.
    pub(crate) fn env_read(&self, env_obj: &ObjRef, idx: usize) -> Value {
        let env = match as_env(env_obj) {
            Some(e) => e,
            None => return Value::Nil,
        };
        match &*env.home.read() {
            EnvHome::Open { base, .. } => {
                self.stack.get(base + idx).cloned().unwrap_or(Value::Nil)
            }
            EnvHome::Detached { slots } => slots.get(idx).cloned().unwrap_or(Value::Nil),
        }
    }

    /// Snapshot an environment's slots.
    pub(crate) fn env_slots(&self, env_obj: &ObjRef) -> Vec<Value> {
        let env = match as_env(env_obj) {
            Some(e) => e,
            None => return Vec::new(),
        };
        match &*env.home.read() {
            EnvHome::Open { base, .. } => {
                let end = (base + env.len).min(self.stack.len());
                let mut v = self.stack[(*base).min(end)..end].to_vec();
                v.resize(env.len, Value::Nil);
                v
            }
            EnvHome::Detached { slots } => slots.to_vec(),
        }
    }

    pub(crate) fn uvget(&self, up: usize, idx: usize) -> Value {
        match self.uvenv(up) {
            Some(e) => self.env_read(&e, idx),
            None => Value::Nil,
        }
    }

    /// Store an upvalue and inform the collector that the environment
    /// acquired a reference.
    pub(crate) fn uvset(&mut self, up: usize, idx: usize, v: Value) {
        let env_obj = match self.uvenv(up) {
            Some(e) => e,
            None => return,
        };
        if let Some(env) = as_env(&env_obj) {
            let mut home = env.home.write();
            match &mut *home {
                EnvHome::Open { base, .. } => {
                    let at = *base + idx;
                    if at < self.stack.len() {
                        self.stack[at] = v;
                    }
                }
                EnvHome::Detached { slots } => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = v;
                    }
                }
            }
        }
        self.gc.write_barrier(&env_obj);
    }

    // =========================================================================
    // Native argument access
    // =========================================================================

    /// Arguments of the current invocation, unpacking the packed-array
    /// form transparently.
    pub fn args(&self) -> Vec<Value> {
        let f = self.ci();
        if f.packed_args() {
            if let Some(o) = self.reg(1).as_object() {
                if let beryl_core::ObjData::Array(v) = &o.data {
                    return v.read().clone();
                }
            }
            Vec::new()
        } else {
            (0..f.argc.max(0) as usize).map(|i| self.reg(1 + i)).collect()
        }
    }

    /// The block argument of the current invocation (nil when absent).
    pub fn block_arg(&self) -> Value {
        let f = self.ci();
        if f.packed_args() {
            self.reg(2)
        } else {
            self.reg(1 + f.argc.max(0) as usize)
        }
    }

    // =========================================================================
    // Exception slot
    // =========================================================================

    /// The pending exception, if any.
    pub fn exception(&self) -> Option<Value> {
        self.exc.clone().map(Value::Object)
    }

    pub fn clear_exception(&mut self) {
        self.exc = None;
    }

    /// Inject an exception between opcodes (asynchronous raise from the
    /// host). Returns false if the value is not a heap object.
    pub fn inject_exception(&mut self, v: Value) -> bool {
        match v {
            Value::Object(o) => {
                self.exc = Some(o);
                true
            }
            _ => false,
        }
    }

    /// Message of the pending exception, for hosts and tests.
    pub fn exception_message(&self) -> Option<String> {
        let exc = self.exc.as_ref()?;
        match &exc.data {
            beryl_core::ObjData::Exception(e) => Some(e.message.read().clone()),
            _ => None,
        }
    }

    /// Class name of the pending exception.
    pub fn exception_class_name(&self) -> Option<String> {
        let exc = self.exc.clone()?;
        let class = self.class_of(&Value::Object(exc));
        let name = beryl_core::object::as_class(&class)?.name.read().as_ref().copied()?;
        self.sym_name(name).map(str::to_owned)
    }

    // =========================================================================
    // Trace sink
    // =========================================================================

    /// Replace the trace sink.
    pub fn set_trace(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = sink;
    }

    /// Collector hooks, for hosts that drive a real collector.
    pub fn gc_hooks(&mut self) -> &mut GcHooks {
        &mut self.gc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_extend_growth_policy() {
        let mut st = State::new();
        let len0 = st.stack.len();
        assert_eq!(len0, STACK_INIT_SIZE);
        // Small shortfall doubles.
        st.stack_extend(len0 - 1, 2, 0);
        assert_eq!(st.stack.len(), len0 * 2);
        // Oversized request grows by the request.
        let len1 = st.stack.len();
        st.stack_extend(0, len1 + 100, 0);
        assert_eq!(st.stack.len(), len1 * 2 + 100);
    }

    #[test]
    fn test_stack_extend_clears_reused_region() {
        let mut st = State::new();
        st.stack[3] = Value::fixnum(9);
        st.stack_extend(0, 8, 2);
        assert!(st.stack[3].is_nil());
    }

    #[test]
    fn test_stack_extend_preserves_live_values() {
        let mut st = State::new();
        st.stack[0] = Value::fixnum(1);
        st.stack[1] = Value::fixnum(2);
        let want = st.stack.len() * 4;
        st.stack_extend(0, want, 2);
        assert_eq!(st.stack[0].as_fixnum(), Some(1));
        assert_eq!(st.stack[1].as_fixnum(), Some(2));
        assert!(st.stack[2].is_nil());
    }

    #[test]
    fn test_stack_move_overlapping() {
        let mut st = State::new();
        for i in 0..6 {
            st.stack[i] = Value::fixnum(i as i64);
        }
        // Shift up by one.
        st.stack_move(1, 0, 5);
        let got: Vec<i64> = (1..6).map(|i| st.stack[i].as_fixnum().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        // Shift down by two.
        st.stack_move(0, 2, 3);
        assert_eq!(st.stack[0].as_fixnum(), Some(1));
    }

    #[test]
    fn test_register_family_is_contiguous() {
        let mut st = State::new();
        let start = st.ireps.len();
        let a = beryl_bytecode::IrepBuilder::new("a", 2).finish();
        let b = beryl_bytecode::IrepBuilder::new("b", 2).finish();
        let regs = st.register_family(vec![a, b]);
        assert_eq!(regs[0].idx, start);
        assert_eq!(regs[1].idx, start + 1);
    }
}
