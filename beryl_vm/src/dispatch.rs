//! The fetch/decode/execute loop.
//!
//! One instruction is fetched from the current frame, decoded, and
//! routed to its handler. Handlers return [`ControlFlow`]; raises are
//! funneled through the state's unwind routine, which either resumes at
//! a rescue handler (`Continue`) or pops this invocation's entry frame
//! and finishes with nil, leaving the exception slot set for the host.
//!
//! The collector arena index is snapshotted at loop entry and restored
//! after every opcode, bounding rooting work to a single instruction's
//! transients.

use crate::ops;
use crate::state::State;
use beryl_bytecode::{Instruction, Opcode};
use beryl_core::{CoreError, ErrorKind, Value};

/// Outcome of one dispatch step.
pub enum ControlFlow {
    /// Keep fetching from the (possibly rebound) current frame.
    Continue,
    /// This invocation's entry frame was popped; the loop returns the
    /// value to the host path that entered it.
    Finish(Value),
}

impl State {
    /// Fetch the next instruction of the current frame, advancing its pc.
    #[inline]
    pub(crate) fn fetch(&mut self) -> Option<Instruction> {
        let f = self.ci_mut();
        let inst = match &f.irep {
            Some(irep) => irep.iseq.get(f.pc).copied(),
            None => None,
        };
        if inst.is_some() {
            f.pc += 1;
        }
        inst
    }

    /// Run the current entry frame's procedure to completion.
    pub(crate) fn execute(&mut self) -> Value {
        let ai = self.gc.arena_save();
        loop {
            let inst = match self.fetch() {
                Some(i) => i,
                // Fell off the end of the instruction stream; treat it
                // like an explicit stop.
                None => return self.stop_run(),
            };
            let flow = self.step(inst);
            self.gc.arena_restore(ai);
            if let ControlFlow::Finish(v) = flow {
                return v;
            }
        }
    }

    /// Unwind the current invocation unconditionally (stop-the-VM).
    pub(crate) fn stop_run(&mut self) -> Value {
        loop {
            if self.ci_index() == 0 {
                return Value::Nil;
            }
            let acc = self.ci().acc;
            self.pop_frame();
            if acc < 0 {
                return Value::Nil;
            }
        }
    }

    /// Decode and execute one instruction.
    fn step(&mut self, inst: Instruction) -> ControlFlow {
        let op = match inst.opcode() {
            Some(op) => op,
            None => {
                return self.raise_core(CoreError::new(
                    ErrorKind::Runtime,
                    format!("illegal instruction {:#010x}", inst.0),
                ))
            }
        };
        match op {
            Opcode::Nop => ControlFlow::Continue,
            Opcode::Move => ops::load_store::move_reg(self, inst),
            Opcode::LoadLiteral => ops::load_store::load_literal(self, inst),
            Opcode::LoadInt => ops::load_store::load_int(self, inst),
            Opcode::LoadSym => ops::load_store::load_sym(self, inst),
            Opcode::LoadNil => ops::load_store::load_nil(self, inst),
            Opcode::LoadSelf => ops::load_store::load_self(self, inst),
            Opcode::LoadTrue => ops::load_store::load_true(self, inst),
            Opcode::LoadFalse => ops::load_store::load_false(self, inst),

            Opcode::GetGlobal => ops::variables::get_global(self, inst),
            Opcode::SetGlobal => ops::variables::set_global(self, inst),
            Opcode::GetSpecial => ops::variables::get_special(self, inst),
            Opcode::SetSpecial => ops::variables::set_special(self, inst),
            Opcode::GetIvar => ops::variables::get_ivar(self, inst),
            Opcode::SetIvar => ops::variables::set_ivar(self, inst),
            Opcode::GetCvar => ops::variables::get_cvar(self, inst),
            Opcode::SetCvar => ops::variables::set_cvar(self, inst),
            Opcode::GetConst => ops::variables::get_const(self, inst),
            Opcode::SetConst => ops::variables::set_const(self, inst),
            Opcode::GetScopedConst => ops::variables::get_scoped_const(self, inst),
            Opcode::SetScopedConst => ops::variables::set_scoped_const(self, inst),
            Opcode::GetUpvar => ops::variables::get_upvar(self, inst),
            Opcode::SetUpvar => ops::variables::set_upvar(self, inst),

            Opcode::Jump => ops::control::jump(self, inst),
            Opcode::JumpIf => ops::control::jump_if(self, inst),
            Opcode::JumpNot => ops::control::jump_not(self, inst),

            Opcode::OnErr => ops::exception::on_err(self, inst),
            Opcode::Rescue => ops::exception::rescue(self, inst),
            Opcode::PopErr => ops::exception::pop_err(self, inst),
            Opcode::Raise => ops::exception::raise(self, inst),
            Opcode::EnsurePush => ops::exception::ensure_push(self, inst),
            Opcode::EnsurePop => ops::exception::ensure_pop(self, inst),

            Opcode::Send => ops::calls::send(self, inst),
            // Reserved call forms; no effect pending a specification.
            Opcode::FuncSend => ControlFlow::Continue,
            Opcode::ValueSend => ControlFlow::Continue,
            Opcode::Call => ops::calls::call(self, inst),
            Opcode::Super => ops::calls::super_send(self, inst),
            Opcode::ArgArray => ops::args::arg_array(self, inst),
            Opcode::Enter => ops::args::enter(self, inst),
            // Reserved keyword-argument forms; no effect.
            Opcode::KeyArg => ControlFlow::Continue,
            Opcode::KeyDict => ControlFlow::Continue,
            Opcode::Return => ops::control::return_op(self, inst),
            Opcode::TailCall => ops::calls::tail_call(self, inst),
            Opcode::BlockPush => ops::args::block_push(self, inst),

            Opcode::Add => ops::arithmetic::add(self, inst),
            Opcode::AddImm => ops::arithmetic::add_imm(self, inst),
            Opcode::Sub => ops::arithmetic::sub(self, inst),
            Opcode::SubImm => ops::arithmetic::sub_imm(self, inst),
            Opcode::Mul => ops::arithmetic::mul(self, inst),
            Opcode::Div => ops::arithmetic::div(self, inst),

            Opcode::Eq => ops::comparison::eq(self, inst),
            Opcode::Lt => ops::comparison::lt(self, inst),
            Opcode::Le => ops::comparison::le(self, inst),
            Opcode::Gt => ops::comparison::gt(self, inst),
            Opcode::Ge => ops::comparison::ge(self, inst),

            Opcode::MakeArray => ops::containers::make_array(self, inst),
            Opcode::ArrayCat => ops::containers::array_cat(self, inst),
            Opcode::ArrayPush => ops::containers::array_push(self, inst),
            Opcode::ArrayRef => ops::containers::array_ref(self, inst),
            Opcode::ArraySet => ops::containers::array_set(self, inst),
            Opcode::ArrayPost => ops::containers::array_post(self, inst),
            Opcode::MakeString => ops::containers::make_string(self, inst),
            Opcode::StrCat => ops::containers::str_cat(self, inst),
            Opcode::MakeHash => ops::containers::make_hash(self, inst),
            Opcode::MakeRange => ops::containers::make_range(self, inst),

            Opcode::Lambda => ops::objects::lambda(self, inst),
            Opcode::RootClass => ops::objects::root_class(self, inst),
            Opcode::DefClass => ops::objects::def_class(self, inst),
            Opcode::DefModule => ops::objects::def_module(self, inst),
            Opcode::Exec => ops::calls::exec(self, inst),
            Opcode::DefMethod => ops::objects::def_method(self, inst),
            Opcode::SingletonClass => ops::objects::singleton_class(self, inst),
            Opcode::TargetClass => ops::objects::target_class(self, inst),

            Opcode::Debug => ops::control::debug(self, inst),
            Opcode::Stop => ControlFlow::Finish(self.stop_run()),
            Opcode::Err => ops::exception::err(self, inst),
        }
    }
}
