//! Comparisons with the same type-pair dispatch as arithmetic.
//!
//! Fixnum/float pairs compare inline and write true/false into R(A);
//! anything else re-enters the send path with the operator symbol.

use crate::dispatch::ControlFlow;
use crate::ops::calls;
use crate::state::State;
use beryl_bytecode::Instruction;
use beryl_core::Value;

macro_rules! cmp_op {
    ($name:ident, $op:tt) => {
        pub(crate) fn $name(st: &mut State, inst: Instruction) -> ControlFlow {
            let a = inst.a() as usize;
            let (x, y) = (st.reg(a), st.reg(a + 1));
            let out = match (&x, &y) {
                (Value::Fixnum(i), Value::Fixnum(j)) => i $op j,
                (Value::Fixnum(i), Value::Float(f)) => (*i as f64) $op *f,
                (Value::Float(f), Value::Fixnum(i)) => *f $op (*i as f64),
                (Value::Float(f), Value::Float(g)) => f $op g,
                _ => return calls::send(st, inst),
            };
            st.set_reg(a, Value::bool(out));
            ControlFlow::Continue
        }
    };
}

cmp_op!(eq, ==);
cmp_op!(lt, <);
cmp_op!(le, <=);
cmp_op!(gt, >);
cmp_op!(ge, >=);
