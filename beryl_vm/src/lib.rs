//! Register-based bytecode interpreter for the Beryl scripting language.
//!
//! This crate is the execution core: a dispatch engine that runs fixed
//! width instructions against a growable operand stack, with method
//! dispatch, closures and upvalue capture, exception handling with
//! ensure blocks, tail calls, and variadic argument reconciliation.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                      State                         │
//! ├───────────────────────────────────────────────────┤
//! │  operand stack   [ self | r1 | r2 | ... ]          │
//! │  frame stack     [ Frame 0 | Frame 1 | ... top ]   │
//! │  rescue stack    [ handler pc, ... ]               │
//! │  ensure stack    [ proc, ... ]                     │
//! │  exception slot  Option<exception object>          │
//! │                                                    │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────────┐  │
//! │  │ SymbolTable│ │ irep table   │ │ NativeFns   │  │
//! │  └────────────┘ └──────────────┘ └─────────────┘  │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────────┐  │
//! │  │ globals    │ │ core classes │ │ GC hooks    │  │
//! │  └────────────┘ └──────────────┘ └─────────────┘  │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Each frame's register window is a slice of the shared operand stack
//! addressed by `(stackidx, nregs)`; slot 0 is always `self`. Control
//! transfers rebind the current frame rather than recursing, so deep
//! bytecode call chains cost no native stack. Host re-entry (native
//! methods calling back in, ensure invocation) recurses into the
//! dispatch loop with an entry frame marked `acc = -1`, which acts as
//! the unwind barrier for that invocation.
//!
//! # Example
//!
//! ```
//! use beryl_bytecode::{IrepBuilder, ReturnMode};
//! use beryl_core::Value;
//! use beryl_vm::State;
//!
//! let mut st = State::new();
//! let mut b = IrepBuilder::new("main", 3);
//! b.loadi(1, 40);
//! b.ret(1, ReturnMode::Normal);
//! let irep = st.register_irep(b.finish());
//! let out = st.run_irep(&irep, Value::nil());
//! assert_eq!(out.as_fixnum(), Some(40));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod api;
pub mod builtins;
pub mod dispatch;
pub mod frame;
pub mod gc;
pub mod host;
pub mod ops;
pub mod state;
pub mod trace;

pub use builtins::CoreClasses;
pub use dispatch::ControlFlow;
pub use frame::{Frame, CALLINFO_INIT_SIZE, STACK_INIT_SIZE};
pub use gc::GcHooks;
pub use state::{NativeFn, State};
pub use trace::{StdoutTrace, TraceSink};
