//! Bytecode representation for the Beryl VM.
//!
//! - [`Instruction`] / [`Opcode`] - 32-bit packed instruction format
//! - [`Irep`] - a compiled procedure body (instructions, literal pool,
//!   symbol table, declared register count)
//! - [`IrepBuilder`] - assembler with label resolution for constructing
//!   ireps by hand (tests, bootstrap code, host embedding)
//!
//! The instruction word carries a 7-bit opcode in the low bits and three
//! operand fields above it: `A:9 | B:9 | C:7` counting down from the top.
//! `Bx` fuses B and C into 16 bits, `sBx` is the same field biased by
//! 0x7FFF, and `Ax` fuses all 25 operand bits.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod builder;
pub mod instruction;
pub mod irep;

pub use builder::{IrepBuilder, Label};
pub use instruction::{
    ArgScope, Instruction, InstructionFormat, Opcode, ParamSpec, ReturnMode, CALL_MAXARGS,
    LAMBDA_CAPTURE, LAMBDA_STRICT, MAXARG_SBX,
};
pub use irep::{disassemble, Irep, Literal};
