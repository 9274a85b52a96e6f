//! Call-protocol tests: send, method_missing rewriting, super, tail
//! calls, packed arguments, class definition, and the host call API.

use beryl_bytecode::{ArgScope, IrepBuilder, Opcode, ParamSpec, ReturnMode, LAMBDA_STRICT};
use beryl_core::Value;
use beryl_vm::State;

/// Register `body` as a strict instance method of the root class.
fn define_on_object(st: &mut State, name: &str, body: beryl_bytecode::Irep) {
    let irep = st.register_irep(body);
    let p = st.proc_new(&irep, true);
    let mid = st.intern(name);
    let object = st.core.object.clone();
    st.define_method(&object, mid, &p).unwrap();
}

#[test]
fn test_send_returns_into_caller_register() {
    let mut st = State::new();
    let forty = st.intern("forty");

    let mut m = IrepBuilder::new("forty", 3);
    m.enter(ParamSpec::required(0));
    m.loadi(1, 40);
    m.ret(1, ReturnMode::Normal);
    define_on_object(&mut st, "forty", m.finish());

    let mut main = IrepBuilder::new("main", 5);
    main.loadi(1, 1);
    main.loadself(2);
    main.send(2, forty, 0);
    // r2 now holds the callee's result; r1 is untouched.
    let plus = st.intern("+");
    main.move_(3, 1);
    main.move_(4, 2);
    main.binop(Opcode::Add, 3, plus);
    main.ret(3, ReturnMode::Normal);
    let irep = st.register_irep(main.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(41));
}

#[test]
fn test_funcall_native_method() {
    fn triple(st: &mut State, _self: Value) -> Value {
        let n = st.args().first().and_then(Value::as_fixnum).unwrap_or(0);
        Value::fixnum(n * 3)
    }
    let mut st = State::new();
    let object = st.core.object.clone();
    st.define_native_method(&object, "triple", triple);
    let v = st.funcall(Value::nil(), "triple", &[Value::fixnum(4)]);
    assert_eq!(v.as_fixnum(), Some(12));
    assert_eq!(st.frame_depth(), 1);
}

#[test]
fn test_default_method_missing_raises() {
    let mut st = State::new();
    let v = st.funcall(Value::nil(), "no_such_method", &[]);
    assert!(v.is_nil());
    assert_eq!(st.exception_class_name().as_deref(), Some("NoMethodError"));
    assert!(st
        .exception_message()
        .unwrap()
        .contains("no_such_method"));
}

#[test]
fn test_custom_method_missing_receives_name_first() {
    fn mm(st: &mut State, _self: Value) -> Value {
        st.args().first().cloned().unwrap_or(Value::Nil)
    }
    let mut st = State::new();
    let nil_class = st.core.nil_class.clone();
    st.define_native_method(&nil_class, "method_missing", mm);
    let ghost = st.intern("ghost");
    let v = st.funcall(Value::nil(), "ghost", &[Value::fixnum(5)]);
    assert_eq!(v.as_symbol(), Some(ghost));
}

#[test]
fn test_method_missing_rewrite_in_bytecode_send() {
    fn mm(st: &mut State, _self: Value) -> Value {
        let args = st.args();
        // name, then the original arguments
        assert_eq!(args.len(), 3);
        let extra: i64 = args[1..]
            .iter()
            .map(|v| v.as_fixnum().unwrap_or(0))
            .sum();
        Value::fixnum(extra)
    }
    let mut st = State::new();
    let nil_class = st.core.nil_class.clone();
    st.define_native_method(&nil_class, "method_missing", mm);

    let ghost = st.intern("ghost");
    let mut b = IrepBuilder::new("main", 6);
    b.loadself(1);
    b.loadi(2, 30);
    b.loadi(3, 12);
    b.send(1, ghost, 2);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(42));
}

#[test]
fn test_packed_arguments_unpack_through_enter() {
    let mut st = State::new();
    let plus = st.intern("+");
    let padd = st.intern("padd");

    let mut m = IrepBuilder::new("padd", 4);
    m.enter(ParamSpec {
        m1: 2,
        ..ParamSpec::default()
    });
    m.binop(Opcode::Add, 1, plus);
    m.ret(1, ReturnMode::Normal);
    define_on_object(&mut st, "padd", m.finish());

    let mut main = IrepBuilder::new("main", 6);
    main.loadself(1);
    main.loadi(3, 10);
    main.loadi(4, 20);
    main.make_array(2, 3, 2);
    main.loadnil(3); // block slot after the packed array
    main.send(1, padd, beryl_bytecode::CALL_MAXARGS);
    main.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(main.finish());
    assert_eq!(st.run_irep(&irep, Value::nil()).as_fixnum(), Some(30));
}

#[test]
fn test_packed_method_missing_unshifts_name() {
    fn mm(st: &mut State, _self: Value) -> Value {
        let args = st.args();
        args.first().cloned().unwrap_or(Value::Nil)
    }
    let mut st = State::new();
    let nil_class = st.core.nil_class.clone();
    st.define_native_method(&nil_class, "method_missing", mm);

    let ghost = st.intern("ghost");
    let mut b = IrepBuilder::new("main", 5);
    b.loadself(1);
    b.loadi(3, 1);
    b.make_array(2, 3, 1);
    b.loadnil(3);
    b.send(1, ghost, beryl_bytecode::CALL_MAXARGS);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let v = st.run_irep(&irep, Value::nil());
    assert_eq!(v.as_symbol(), Some(ghost));
}

#[test]
fn test_super_dispatches_to_parent_definition() {
    fn base_m(_st: &mut State, _self: Value) -> Value {
        Value::fixnum(10)
    }
    let mut st = State::new();
    let object = st.core.object.clone();
    st.define_native_method(&object, "m", base_m);

    // NilClass#m calls super and adds one.
    let plus = st.intern("+");
    let mut b = IrepBuilder::new("m", 4);
    b.enter(ParamSpec::required(0));
    b.super_(1, 0);
    b.binop_imm(Opcode::AddImm, 1, plus, 1);
    b.ret(1, ReturnMode::Normal);
    let irep = st.register_irep(b.finish());
    let p = st.proc_new(&irep, true);
    let mid = st.intern("m");
    let nil_class = st.core.nil_class.clone();
    st.define_method(&nil_class, mid, &p).unwrap();

    assert_eq!(st.funcall(Value::nil(), "m", &[]).as_fixnum(), Some(11));
}

#[test]
fn test_tail_call_runs_in_constant_frames() {
    let mut st = State::new();
    let countdown = st.intern("countdown");
    let eqs = st.intern("==");
    let minus = st.intern("-");

    let mut b = IrepBuilder::new("countdown", 8);
    let recurse = b.label();
    b.enter(ParamSpec::required(1));
    b.move_(2, 1);
    b.loadi(3, 0);
    b.binop(Opcode::Eq, 2, eqs);
    b.jump_not(2, recurse);
    b.loadi(4, 42);
    b.ret(4, ReturnMode::Normal);
    b.bind(recurse);
    b.loadself(2);
    b.move_(3, 1);
    b.binop_imm(Opcode::SubImm, 3, minus, 1);
    b.tail_call(2, countdown, 1);
    define_on_object(&mut st, "countdown", b.finish());

    let v = st.funcall(Value::nil(), "countdown", &[Value::fixnum(10_000)]);
    assert_eq!(v.as_fixnum(), Some(42));
    assert_eq!(st.frame_depth(), 1);
}

#[test]
fn test_native_tail_call_flows_into_return() {
    fn ninety(_st: &mut State, _self: Value) -> Value {
        Value::fixnum(90)
    }
    let mut st = State::new();
    let object = st.core.object.clone();
    st.define_native_method(&object, "ninety", ninety);

    let ninety_sym = st.intern("ninety");
    let mut b = IrepBuilder::new("jumper", 4);
    b.enter(ParamSpec::required(0));
    b.loadself(1);
    b.tail_call(1, ninety_sym, 0);
    define_on_object(&mut st, "jumper", b.finish());

    assert_eq!(st.funcall(Value::nil(), "jumper", &[]).as_fixnum(), Some(90));
}

#[test]
fn test_class_definition_with_singleton_method() {
    let mut st = State::new();
    let point = st.intern("Point");
    let origin = st.intern("origin");

    // main: define Point, run its body, then call the class method.
    let mut main = IrepBuilder::new("main", 6);
    main.loadnil(1);
    main.loadnil(2);
    main.def_class(1, point);
    main.exec(1, 1);
    main.var_op(Opcode::GetConst, 3, point);
    main.send(3, origin, 0);
    main.ret(3, ReturnMode::Normal);

    // class body: define `origin` on the class's singleton.
    let mut body = IrepBuilder::new("point_body", 6);
    body.loadself(1);
    body.singleton_class(2, 1);
    body.lambda(3, 1, LAMBDA_STRICT);
    body.def_method(2, origin);
    body.loadnil(4);
    body.ret(4, ReturnMode::Normal);

    let mut origin_m = IrepBuilder::new("origin", 3);
    origin_m.enter(ParamSpec::required(0));
    origin_m.loadi(1, 77);
    origin_m.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![main.finish(), body.finish(), origin_m.finish()]);
    let v = st.run_irep(&ireps[0], Value::nil());
    assert_eq!(v.as_fixnum(), Some(77));
    assert!(st.exception().is_none());
}

#[test]
fn test_target_class_inside_method() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("who", 3);
    b.enter(ParamSpec::required(0));
    b.target_class(1);
    b.ret(1, ReturnMode::Normal);
    define_on_object(&mut st, "who", b.finish());

    let v = st.funcall(Value::fixnum(1), "who", &[]);
    let class = v.as_object().unwrap();
    assert!(std::sync::Arc::ptr_eq(class, &st.core.object));
}

#[test]
fn test_instance_variables_through_opcodes() {
    let mut st = State::new();
    let x = st.intern("@x");
    let mut b = IrepBuilder::new("setget", 4);
    b.enter(ParamSpec::required(0));
    b.loadi(1, 44);
    b.var_op(Opcode::SetIvar, 1, x);
    b.var_op(Opcode::GetIvar, 2, x);
    b.ret(2, ReturnMode::Normal);
    define_on_object(&mut st, "setget", b.finish());

    let inst = Value::Object(beryl_core::object::RObject::instance());
    let v = st.funcall(inst.clone(), "setget", &[]);
    assert_eq!(v.as_fixnum(), Some(44));
    assert_eq!(st.iv_get(&inst, x).as_fixnum(), Some(44));
}

#[test]
fn test_arg_array_gathers_scope() {
    let mut st = State::new();
    let mut b = IrepBuilder::new("ga", 5);
    b.enter(ParamSpec::required(1));
    b.arg_array(
        2,
        ArgScope {
            m1: 1,
            r: false,
            m2: 0,
            lv: 0,
        },
    );
    b.ret(2, ReturnMode::Normal);
    define_on_object(&mut st, "ga", b.finish());

    let v = st.funcall(Value::nil(), "ga", &[Value::fixnum(33)]);
    let elems = st.ary_elems(&v).unwrap();
    assert_eq!(elems.len(), 1);
    assert_eq!(elems[0].as_fixnum(), Some(33));
}

#[test]
fn test_block_push_and_call() {
    let mut st = State::new();
    let call = st.intern("call");

    // bp: fetch the block argument and invoke it.
    let mut b = IrepBuilder::new("bp", 4);
    b.enter(ParamSpec::required(0));
    b.block_push(
        1,
        ArgScope {
            m1: 0,
            r: false,
            m2: 0,
            lv: 0,
        },
    );
    b.send(1, call, 0);
    b.ret(1, ReturnMode::Normal);
    define_on_object(&mut st, "bp", b.finish());

    let mut blk = IrepBuilder::new("blk", 3);
    blk.loadi(1, 123);
    blk.ret(1, ReturnMode::Normal);
    let blk_irep = st.register_irep(blk.finish());
    let blk_proc = st.proc_new(&blk_irep, false);

    let v = st.funcall_with_block(Value::nil(), "bp", &[], Some(Value::Object(blk_proc)));
    assert_eq!(v.as_fixnum(), Some(123));
}

#[test]
fn test_yield_proc() {
    let mut st = State::new();
    let mut blk = IrepBuilder::new("blk", 3);
    blk.loadi(1, 55);
    blk.ret(1, ReturnMode::Normal);
    let blk_irep = st.register_irep(blk.finish());
    let blk_proc = Value::Object(st.proc_new(&blk_irep, false));

    assert_eq!(st.yield_proc(&blk_proc, &[], None).as_fixnum(), Some(55));
    assert!(st.yield_proc(&Value::Nil, &[], None).is_nil());
    assert_eq!(st.exception_class_name().as_deref(), Some("TypeError"));
}
