//! Bytecode assembler.
//!
//! `IrepBuilder` provides a high-level API for constructing ireps with
//! label resolution and pool/symbol deduplication. Jump offsets are
//! relative to the instruction after the jump, so a patch for a branch
//! at index `i` targeting index `t` is `t - i - 1`.
//!
//! # Example
//! ```
//! use beryl_bytecode::{IrepBuilder, ReturnMode};
//!
//! let mut b = IrepBuilder::new("answer", 2);
//! b.loadi(1, 42);
//! b.ret(1, ReturnMode::Normal);
//! let irep = b.finish();
//! assert_eq!(irep.iseq.len(), 2);
//! ```

use crate::instruction::{
    ArgScope, Instruction, Opcode, ParamSpec, ReturnMode,
};
use crate::irep::{Irep, Literal};
use beryl_core::Symbol;
use std::collections::HashMap;
use std::sync::Arc;

/// A jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A branch that needs its offset patched once the label is bound.
#[derive(Debug)]
struct ForwardRef {
    instruction_index: usize,
    label: Label,
}

/// Key type for literal-pool deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Int(i64),
    /// Float bits for exact comparison.
    Float(u64),
    Str(Arc<str>),
}

impl LiteralKey {
    fn of(lit: &Literal) -> LiteralKey {
        match lit {
            Literal::Int(i) => LiteralKey::Int(*i),
            Literal::Float(f) => LiteralKey::Float(f.to_bits()),
            Literal::Str(s) => LiteralKey::Str(s.clone()),
        }
    }
}

/// Builder for constructing ireps.
pub struct IrepBuilder {
    name: Arc<str>,
    nregs: u16,
    instructions: Vec<Instruction>,

    pool: Vec<Literal>,
    pool_map: HashMap<LiteralKey, u16>,

    syms: Vec<Symbol>,
    sym_map: HashMap<Symbol, u16>,

    next_label: u32,
    labels: HashMap<Label, usize>,
    forward_refs: Vec<ForwardRef>,
}

impl IrepBuilder {
    pub fn new(name: impl Into<Arc<str>>, nregs: u16) -> Self {
        Self {
            name: name.into(),
            nregs,
            instructions: Vec::new(),
            pool: Vec::new(),
            pool_map: HashMap::new(),
            syms: Vec::new(),
            sym_map: HashMap::new(),
            next_label: 0,
            labels: HashMap::new(),
            forward_refs: Vec::new(),
        }
    }

    // =========================================================================
    // Pools
    // =========================================================================

    /// Add a literal, deduplicating identical entries.
    pub fn literal(&mut self, lit: Literal) -> u16 {
        let key = LiteralKey::of(&lit);
        if let Some(&idx) = self.pool_map.get(&key) {
            return idx;
        }
        let idx = self.pool.len() as u16;
        self.pool.push(lit);
        self.pool_map.insert(key, idx);
        idx
    }

    pub fn lit_int(&mut self, v: i64) -> u16 {
        self.literal(Literal::Int(v))
    }

    pub fn lit_float(&mut self, v: f64) -> u16 {
        self.literal(Literal::Float(v))
    }

    pub fn lit_str(&mut self, v: impl Into<Arc<str>>) -> u16 {
        self.literal(Literal::Str(v.into()))
    }

    /// Add a symbol to the irep-local table, deduplicating.
    pub fn sym(&mut self, s: Symbol) -> u16 {
        if let Some(&idx) = self.sym_map.get(&s) {
            return idx;
        }
        let idx = self.syms.len() as u16;
        self.syms.push(s);
        self.sym_map.insert(s, idx);
        idx
    }

    // =========================================================================
    // Labels
    // =========================================================================

    pub fn label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Mark the current position as the target of `label`.
    pub fn bind(&mut self, label: Label) {
        self.labels.insert(label, self.instructions.len());
    }

    fn emit_branch(&mut self, op: Opcode, a: u32, label: Label) {
        let at = self.instructions.len();
        self.instructions.push(Instruction::asbx(op, a, 0));
        self.forward_refs.push(ForwardRef {
            instruction_index: at,
            label,
        });
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn pc(&self) -> usize {
        self.instructions.len()
    }

    pub fn nop(&mut self) {
        self.emit(Instruction::abc(Opcode::Nop, 0, 0, 0));
    }

    pub fn move_(&mut self, dst: u32, src: u32) {
        self.emit(Instruction::abc(Opcode::Move, dst, src, 0));
    }

    pub fn loadl(&mut self, dst: u32, pool_idx: u16) {
        self.emit(Instruction::abx(Opcode::LoadLiteral, dst, pool_idx as u32));
    }

    pub fn loadi(&mut self, dst: u32, v: i32) {
        self.emit(Instruction::asbx(Opcode::LoadInt, dst, v));
    }

    pub fn loadsym(&mut self, dst: u32, s: Symbol) {
        let idx = self.sym(s);
        self.emit(Instruction::abx(Opcode::LoadSym, dst, idx as u32));
    }

    pub fn loadnil(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::LoadNil, dst, 0, 0));
    }

    pub fn loadself(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::LoadSelf, dst, 0, 0));
    }

    pub fn loadt(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::LoadTrue, dst, 0, 0));
    }

    pub fn loadf(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::LoadFalse, dst, 0, 0));
    }

    /// Variable access sharing the A/Bx symbol shape.
    pub fn var_op(&mut self, op: Opcode, a: u32, s: Symbol) {
        let idx = self.sym(s);
        self.emit(Instruction::abx(op, a, idx as u32));
    }

    pub fn getupvar(&mut self, dst: u32, slot: u32, nesting: u32) {
        self.emit(Instruction::abc(Opcode::GetUpvar, dst, slot, nesting));
    }

    pub fn setupvar(&mut self, src: u32, slot: u32, nesting: u32) {
        self.emit(Instruction::abc(Opcode::SetUpvar, src, slot, nesting));
    }

    pub fn jump(&mut self, label: Label) {
        self.emit_branch(Opcode::Jump, 0, label);
    }

    pub fn jump_if(&mut self, src: u32, label: Label) {
        self.emit_branch(Opcode::JumpIf, src, label);
    }

    pub fn jump_not(&mut self, src: u32, label: Label) {
        self.emit_branch(Opcode::JumpNot, src, label);
    }

    pub fn on_err(&mut self, handler: Label) {
        self.emit_branch(Opcode::OnErr, 0, handler);
    }

    pub fn rescue(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::Rescue, dst, 0, 0));
    }

    pub fn pop_err(&mut self, n: u32) {
        self.emit(Instruction::abc(Opcode::PopErr, n, 0, 0));
    }

    pub fn raise(&mut self, src: u32) {
        self.emit(Instruction::abc(Opcode::Raise, src, 0, 0));
    }

    pub fn ensure_push(&mut self, child: u32) {
        self.emit(Instruction::abx(Opcode::EnsurePush, 0, child));
    }

    pub fn ensure_pop(&mut self, n: u32) {
        self.emit(Instruction::abc(Opcode::EnsurePop, n, 0, 0));
    }

    pub fn send(&mut self, a: u32, mid: Symbol, argc: u32) {
        let idx = self.sym(mid);
        self.emit(Instruction::abc(Opcode::Send, a, idx as u32, argc));
    }

    pub fn super_(&mut self, a: u32, argc: u32) {
        self.emit(Instruction::abc(Opcode::Super, a, 0, argc));
    }

    pub fn tail_call(&mut self, a: u32, mid: Symbol, argc: u32) {
        let idx = self.sym(mid);
        self.emit(Instruction::abc(Opcode::TailCall, a, idx as u32, argc));
    }

    pub fn enter(&mut self, spec: ParamSpec) {
        self.emit(Instruction::new_ax(Opcode::Enter, spec.pack()));
    }

    pub fn arg_array(&mut self, dst: u32, scope: ArgScope) {
        self.emit(Instruction::abx(Opcode::ArgArray, dst, scope.pack()));
    }

    pub fn block_push(&mut self, dst: u32, scope: ArgScope) {
        self.emit(Instruction::abx(Opcode::BlockPush, dst, scope.pack()));
    }

    pub fn ret(&mut self, src: u32, mode: ReturnMode) {
        self.emit(Instruction::abc(Opcode::Return, src, mode as u32, 0));
    }

    /// Binary operators share the A (operand pair) / B (operator symbol)
    /// / C (argument count) shape so the fallback send can reuse the word.
    pub fn binop(&mut self, op: Opcode, a: u32, mid: Symbol) {
        let idx = self.sym(mid);
        self.emit(Instruction::abc(op, a, idx as u32, 1));
    }

    pub fn binop_imm(&mut self, op: Opcode, a: u32, mid: Symbol, imm: u32) {
        let idx = self.sym(mid);
        self.emit(Instruction::abc(op, a, idx as u32, imm));
    }

    pub fn make_array(&mut self, dst: u32, start: u32, count: u32) {
        self.emit(Instruction::abc(Opcode::MakeArray, dst, start, count));
    }

    pub fn array_cat(&mut self, dst: u32, src: u32) {
        self.emit(Instruction::abc(Opcode::ArrayCat, dst, src, 0));
    }

    pub fn array_push(&mut self, dst: u32, src: u32) {
        self.emit(Instruction::abc(Opcode::ArrayPush, dst, src, 0));
    }

    pub fn array_ref(&mut self, dst: u32, src: u32, idx: u32) {
        self.emit(Instruction::abc(Opcode::ArrayRef, dst, src, idx));
    }

    pub fn array_set(&mut self, src: u32, ary: u32, idx: u32) {
        self.emit(Instruction::abc(Opcode::ArraySet, src, ary, idx));
    }

    pub fn array_post(&mut self, a: u32, pre: u32, post: u32) {
        self.emit(Instruction::abc(Opcode::ArrayPost, a, pre, post));
    }

    pub fn string(&mut self, dst: u32, s: impl Into<Arc<str>>) {
        let idx = self.lit_str(s);
        self.emit(Instruction::abx(Opcode::MakeString, dst, idx as u32));
    }

    pub fn str_cat(&mut self, dst: u32, src: u32) {
        self.emit(Instruction::abc(Opcode::StrCat, dst, src, 0));
    }

    pub fn make_hash(&mut self, dst: u32, start: u32, pairs: u32) {
        self.emit(Instruction::abc(Opcode::MakeHash, dst, start, pairs));
    }

    pub fn lambda(&mut self, dst: u32, child: u32, flags: u32) {
        self.emit(Instruction::abz(Opcode::Lambda, dst, child, flags));
    }

    pub fn make_range(&mut self, dst: u32, start: u32, exclusive: bool) {
        self.emit(Instruction::abc(Opcode::MakeRange, dst, start, exclusive as u32));
    }

    pub fn root_class(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::RootClass, dst, 0, 0));
    }

    pub fn def_class(&mut self, a: u32, name: Symbol) {
        let idx = self.sym(name);
        self.emit(Instruction::abc(Opcode::DefClass, a, idx as u32, 0));
    }

    pub fn def_module(&mut self, a: u32, name: Symbol) {
        let idx = self.sym(name);
        self.emit(Instruction::abc(Opcode::DefModule, a, idx as u32, 0));
    }

    pub fn exec(&mut self, a: u32, child: u32) {
        self.emit(Instruction::abx(Opcode::Exec, a, child));
    }

    pub fn def_method(&mut self, a: u32, name: Symbol) {
        let idx = self.sym(name);
        self.emit(Instruction::abc(Opcode::DefMethod, a, idx as u32, 0));
    }

    pub fn singleton_class(&mut self, dst: u32, src: u32) {
        self.emit(Instruction::abc(Opcode::SingletonClass, dst, src, 0));
    }

    pub fn target_class(&mut self, dst: u32) {
        self.emit(Instruction::abc(Opcode::TargetClass, dst, 0, 0));
    }

    pub fn call(&mut self, a: u32) {
        self.emit(Instruction::abc(Opcode::Call, a, 0, 0));
    }

    pub fn stop(&mut self) {
        self.emit(Instruction::abc(Opcode::Stop, 0, 0, 0));
    }

    pub fn err(&mut self, message: impl Into<Arc<str>>) {
        let idx = self.lit_str(message);
        self.emit(Instruction::abx(Opcode::Err, 0, idx as u32));
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Patch branches and produce the irep. The result still needs to be
    /// registered with the interpreter before it can run.
    pub fn finish(mut self) -> Irep {
        for fwd in &self.forward_refs {
            let target = *self
                .labels
                .get(&fwd.label)
                .expect("unbound label in bytecode builder");
            let at = fwd.instruction_index;
            let offset = target as i32 - at as i32 - 1;
            let old = self.instructions[at];
            let op = old.opcode().expect("branch placeholder lost its opcode");
            self.instructions[at] = Instruction::asbx(op, old.a(), offset);
        }

        Irep {
            idx: usize::MAX,
            nregs: self.nregs,
            iseq: self.instructions.into_boxed_slice(),
            pool: self.pool.into_boxed_slice(),
            syms: self.syms.into_boxed_slice(),
            name: Some(self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_branches() {
        let mut b = IrepBuilder::new("loop", 3);
        let top = b.label();
        let done = b.label();

        b.bind(top); // 0
        b.jump_not(1, done); // 0: JMPNOT r1 -> done
        b.nop(); // 1
        b.jump(top); // 2: JMP -> top
        b.bind(done);
        b.ret(0, ReturnMode::Normal); // 3

        let irep = b.finish();
        // JMPNOT at 0 targets 3: offset 2 past the following instruction.
        assert_eq!(irep.iseq[0].sbx(), 2);
        // JMP at 2 targets 0: offset -3.
        assert_eq!(irep.iseq[2].sbx(), -3);
    }

    #[test]
    fn test_pool_and_sym_dedup() {
        let mut b = IrepBuilder::new("t", 2);
        let i1 = b.lit_int(9);
        let i2 = b.lit_int(9);
        let i3 = b.lit_str("x");
        assert_eq!(i1, i2);
        assert_ne!(i1, i3);

        let s = Symbol(4);
        assert_eq!(b.sym(s), b.sym(s));
    }

    #[test]
    fn test_loadi_encoding() {
        let mut b = IrepBuilder::new("t", 2);
        b.loadi(1, -7);
        let irep = b.finish();
        assert_eq!(irep.iseq[0].opcode(), Some(Opcode::LoadInt));
        assert_eq!(irep.iseq[0].sbx(), -7);
    }
}
