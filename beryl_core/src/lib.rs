//! Core data model for the Beryl virtual machine.
//!
//! This crate defines the pieces every other layer builds on:
//!
//! - [`Value`] - the tagged cell the interpreter shuffles between registers
//! - [`object`] - shared heap objects (strings, arrays, classes, procs, ...)
//! - [`Symbol`] / [`SymbolTable`] - interned method and variable names
//! - [`ErrorKind`] - the taxonomy of errors the core itself can raise
//!
//! Nothing here knows about bytecode or the interpreter; procedures refer
//! to their compiled bodies and native entry points by table index
//! ([`object::IrepId`], [`object::NativeId`]) so the dependency graph
//! stays one-directional.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod error;
pub mod object;
pub mod symbol;
pub mod value;

pub use error::{CoreError, ErrorKind};
pub use object::{ObjData, ObjRef, RObject};
pub use symbol::{Symbol, SymbolTable};
pub use value::{HashKey, Value, ValueType};
