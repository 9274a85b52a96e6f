//! End-to-end execution tests for straight-line and branching bytecode:
//! loads, arithmetic fast paths, jumps, containers, globals, and the
//! trace opcode.

use beryl_bytecode::{IrepBuilder, Opcode, ReturnMode};
use beryl_core::{ObjData, Value};
use beryl_vm::{State, TraceSink};
use std::sync::{Arc, Mutex};

#[test]
fn test_integer_add() {
    let mut st = State::new();
    let plus = st.intern("+");
    let mut b = IrepBuilder::new("main", 4);
    b.loadi(1, 2);
    b.loadi(2, 3);
    b.binop(Opcode::Add, 1, plus);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());

    let v = st.run_irep(&irep, Value::nil());
    assert_eq!(v.as_fixnum(), Some(5));
    assert!(st.exception().is_none());
}

#[test]
fn test_loadi_roundtrip() {
    for n in [-32767, -1, 0, 1, 17, 12345, 32767] {
        let mut st = State::new();
        let mut b = IrepBuilder::new("main", 2);
        b.loadi(1, n);
        b.ret(1, ReturnMode::Normal);
        let irep = st.register_irep(b.finish());
        let v = st.run_irep(&irep, Value::nil());
        assert_eq!(v.as_fixnum(), Some(n as i64), "LOADI {} did not round-trip", n);
    }
}

#[test]
fn test_mixed_arithmetic() {
    let mut st = State::new();
    let minus = st.intern("-");
    let times = st.intern("*");
    let mut b = IrepBuilder::new("main", 4);
    // (10 - 2.5) then * 2
    b.loadi(1, 10);
    let half = b.lit_float(2.5);
    b.loadl(2, half);
    b.binop(Opcode::Sub, 1, minus);
    b.loadi(2, 2);
    b.binop(Opcode::Mul, 1, times);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    assert_eq!(v.as_float(), Some(15.0));
}

#[test]
fn test_division_by_zero_raises() {
    let mut st = State::new();
    let slash = st.intern("/");
    let mut b = IrepBuilder::new("main", 4);
    b.loadi(1, 9);
    b.loadi(2, 0);
    b.binop(Opcode::Div, 1, slash);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    assert!(v.is_nil());
    assert_eq!(st.exception_class_name().as_deref(), Some("ZeroDivisionError"));
    assert_eq!(st.exception_message().as_deref(), Some("divided by 0"));
}

#[test]
fn test_add_imm_and_sub_imm() {
    let mut st = State::new();
    let plus = st.intern("+");
    let minus = st.intern("-");
    let mut b = IrepBuilder::new("main", 3);
    b.loadi(1, 40);
    b.binop_imm(Opcode::AddImm, 1, plus, 5);
    b.binop_imm(Opcode::SubImm, 1, minus, 3);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(42));
}

#[test]
fn test_comparison_and_branches() {
    let mut st = State::new();
    let lt = st.intern("<");
    let mut b = IrepBuilder::new("main", 4);
    let bigger = b.label();
    b.loadi(1, 3);
    b.loadi(2, 7);
    b.binop(Opcode::Lt, 1, lt);
    b.jump_if(1, bigger);
    b.loadi(3, 0);
    b.ret(3, ReturnMode::Normal);
    b.bind(bigger);
    b.loadi(3, 1);
    b.ret(3, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(1));
}

#[test]
fn test_backward_jump_loop() {
    // Count r1 down from 5, summing into r2; uses a backward branch.
    let mut st = State::new();
    let gt = st.intern(">");
    let plus = st.intern("+");
    let minus = st.intern("-");
    let mut b = IrepBuilder::new("main", 6);
    let top = b.label();
    let done = b.label();
    b.loadi(1, 5);
    b.loadi(2, 0);
    b.bind(top);
    b.move_(3, 1);
    b.loadi(4, 0);
    b.binop(Opcode::Gt, 3, gt);
    b.jump_not(3, done);
    b.move_(3, 2);
    b.move_(4, 1);
    b.binop(Opcode::Add, 3, plus);
    b.move_(2, 3);
    b.binop_imm(Opcode::SubImm, 1, minus, 1);
    b.jump(top);
    b.bind(done);
    b.ret(2, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(15));
}

#[test]
fn test_string_literal_concat_and_plus() {
    let mut st = State::new();
    let plus = st.intern("+");
    let mut b = IrepBuilder::new("main", 4);
    b.string(1, "foo");
    b.string(2, "bar");
    b.binop(Opcode::Add, 1, plus);
    b.string(2, "!");
    b.str_cat(1, 2);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    assert_eq!(st.str_contents(&v).as_deref(), Some("foobar!"));
}

#[test]
fn test_string_literals_are_fresh_copies() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 3);
    b.string(1, "x");
    b.string(2, "y");
    b.str_cat(1, 2);
    b.string(2, "x"); // reload of the same literal must be untouched
    b.ret(2, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    assert_eq!(st.str_contents(&v).as_deref(), Some("x"));
}

#[test]
fn test_array_construction_and_access() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 8);
    b.loadi(2, 10);
    b.loadi(3, 20);
    b.loadi(4, 30);
    b.make_array(1, 2, 3);
    b.loadi(2, 99);
    b.array_push(1, 2);
    b.array_ref(5, 1, 3);
    b.ret(5, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(99));
}

#[test]
fn test_array_cat_splats() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 8);
    b.loadi(2, 1);
    b.make_array(1, 2, 1);
    b.loadi(3, 2);
    b.loadi(4, 3);
    b.make_array(2, 3, 2);
    b.array_cat(1, 2); // [1] + [2, 3]
    b.loadi(3, 4);
    b.array_cat(1, 3); // splat of a non-array appends one element
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    let elems = st.ary_elems(&v).unwrap();
    let got: Vec<i64> = elems.iter().map(|e| e.as_fixnum().unwrap()).collect();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
fn test_array_post_destructure() {
    // *rest, tail1, tail2 := [1, 2, 3, 4, 5] with one leading element
    // consumed elsewhere.
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 10);
    for i in 0..5 {
        b.loadi(2 + i, 1 + i as i32);
    }
    b.make_array(1, 2, 5);
    b.array_post(1, 1, 2);
    // r1 = [2, 3], r2 = 4, r3 = 5
    b.make_array(4, 1, 3);
    b.ret(4, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    let elems = st.ary_elems(&v).unwrap();
    let rest = st.ary_elems(&elems[0]).unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].as_fixnum(), Some(2));
    assert_eq!(elems[1].as_fixnum(), Some(4));
    assert_eq!(elems[2].as_fixnum(), Some(5));
}

#[test]
fn test_array_post_short_source() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 8);
    b.loadi(2, 1);
    b.make_array(1, 2, 1);
    b.array_post(1, 1, 2);
    // source too short: rest empty, tail slots nil
    b.make_array(4, 1, 3);
    b.ret(4, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    let elems = st.ary_elems(&v).unwrap();
    assert_eq!(st.ary_elems(&elems[0]).unwrap().len(), 0);
    assert!(elems[1].is_nil());
    assert!(elems[2].is_nil());
}

#[test]
fn test_hash_and_range() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 8);
    b.loadi(2, 1);
    b.string(3, "one");
    b.make_hash(1, 2, 1);
    b.loadi(4, 5);
    b.loadi(5, 9);
    b.make_range(6, 4, true);
    b.make_array(7, 1, 1); // keep the hash live; return the range
    b.ret(6, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    match &v.as_object().unwrap().data {
        ObjData::Range(r) => {
            assert_eq!(r.begin.as_fixnum(), Some(5));
            assert_eq!(r.end.as_fixnum(), Some(9));
            assert!(r.exclusive);
        }
        _ => panic!("expected a range"),
    }
}

#[test]
fn test_hash_lookup_by_value() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 6);
    b.loadi(2, 7);
    b.string(3, "seven");
    b.make_hash(1, 2, 1);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let h = st.run_irep(&irep, Value::nil());
    let got = st.hash_get(&h, &Value::fixnum(7));
    assert_eq!(st.str_contents(&got).as_deref(), Some("seven"));
}

#[test]
fn test_globals_and_specials() {
    let mut st = State::new();
    let gsym = st.intern("$counter");
    let mut b = IrepBuilder::new("main", 4);
    b.loadi(1, 5);
    b.var_op(Opcode::SetGlobal, 1, gsym);
    b.var_op(Opcode::GetGlobal, 2, gsym);
    b.emit(beryl_bytecode::Instruction::abx(Opcode::SetSpecial, 2, 3));
    b.emit(beryl_bytecode::Instruction::abx(Opcode::GetSpecial, 3, 3));
    b.ret(3, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(5));
    assert_eq!(st.gv_get(gsym).as_fixnum(), Some(5));
}

#[test]
fn test_constants() {
    let mut st = State::new();
    let answer = st.intern("ANSWER");
    let mut b = IrepBuilder::new("main", 4);
    b.loadi(1, 42);
    b.var_op(Opcode::SetConst, 1, answer);
    b.var_op(Opcode::GetConst, 2, answer);
    b.ret(2, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(42));
}

#[test]
fn test_load_family() {
    let mut st = State::new();
    let sym = st.intern("token");
    let mut b = IrepBuilder::new("main", 8);
    b.loadself(1);
    b.loadt(2);
    b.loadf(3);
    b.loadnil(4);
    b.loadsym(5, sym);
    b.make_array(6, 1, 5);
    b.ret(6, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::fixnum(9));
    let elems = st.ary_elems(&v).unwrap();
    assert_eq!(elems[0].as_fixnum(), Some(9));
    assert!(elems[1].is_truthy());
    assert!(!elems[2].is_truthy());
    assert!(elems[3].is_nil());
    assert_eq!(elems[4].as_symbol(), Some(sym));
}

#[test]
fn test_stop_returns_nil() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("main", 2);
    b.loadi(1, 1);
    b.stop();
    let irep = st.register_irep(b.finish());
    assert!(st.run_irep(&irep, Value::nil()).is_nil());
    assert!(st.exception().is_none());
    assert_eq!(st.frame_depth(), 1);
}

struct Recorder(Arc<Mutex<Vec<(u32, u32, u32)>>>);

impl TraceSink for Recorder {
    fn debug(&mut self, a: u32, b: u32, c: u32) {
        self.0.lock().unwrap().push((a, b, c));
    }
}

#[test]
fn test_debug_routes_through_trace_sink() {
    let mut st = State::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    st.set_trace(Box::new(Recorder(log.clone())));

    let mut b = IrepBuilder::new("main", 2);
    b.emit(beryl_bytecode::Instruction::abc(Opcode::Debug, 1, 2, 3));
    b.loadnil(1);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    st.run_irep(&irep, Value::nil());
    assert_eq!(log.lock().unwrap().as_slice(), &[(1, 2, 3)]);
}

#[test]
fn test_stack_growth_preserves_registers() {
    // A callee that needs a few hundred registers forces operand-stack
    // growth; the caller's live registers must be bit-identical after.
    let mut st = State::new();
    let big = st.intern("big");

    let mut main = IrepBuilder::new("main", 8);
    main.root_class(4);
    main.lambda(5, 1, beryl_bytecode::LAMBDA_STRICT);
    main.def_method(4, big);
    main.loadi(1, 7);
    main.loadself(2);
    main.send(2, big, 0);
    main.ret(1, ReturnMode::Normal);

    let mut callee = IrepBuilder::new("big", 300);
    callee.enter(beryl_bytecode::ParamSpec::required(0));
    callee.loadi(299, 1);
    callee.ret(299, ReturnMode::Normal);

    let ireps = st.register_family(vec![main.finish(), callee.finish()]);
    let v = st.run_irep(&ireps[0], Value::nil());
    assert_eq!(v.as_fixnum(), Some(7));
}

#[test]
fn test_eq_falls_back_to_identity_send() {
    // Symbols take the generic send path through the default `==`.
    let mut st = State::new();
    let eqs = st.intern("==");
    let tok = st.intern("tok");
    let other = st.intern("other");

    let mut b = IrepBuilder::new("main", 6);
    b.loadsym(1, tok);
    b.loadsym(2, tok);
    b.binop(Opcode::Eq, 1, eqs);
    b.loadsym(3, tok);
    b.loadsym(4, other);
    b.binop(Opcode::Eq, 3, eqs);
    b.make_array(5, 1, 3);
    b.ret(5, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    let elems = st.ary_elems(&v).unwrap();
    assert!(elems[0].is_truthy());
    assert!(!elems[2].is_truthy());
}

#[test]
fn test_checkstack_forces_capacity() {
    let mut st = State::new();
    st.checkstack(5000);
    // A follow-up run still behaves.
    let mut b = IrepBuilder::new("main", 2);
    b.loadi(1, 3);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(3));
}
