//! Closure, upvalue and environment-promotion tests.

use beryl_bytecode::{IrepBuilder, ReturnMode, LAMBDA_CAPTURE};
use beryl_core::Value;
use beryl_vm::State;

#[test]
fn test_closure_survives_creator_frame() {
    // outer: x = 7; return lambda { x }
    let mut st = State::new();

    let mut outer = IrepBuilder::new("outer", 4);
    outer.loadi(1, 7);
    outer.lambda(2, 1, LAMBDA_CAPTURE);
    outer.ret(2, ReturnMode::Normal);

    let mut inner = IrepBuilder::new("inner", 3);
    inner.getupvar(1, 1, 0);
    inner.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![outer.finish(), inner.finish()]);
    let closure = st.run_irep(&ireps[0], Value::nil());
    assert!(closure.as_object().is_some());
    assert_eq!(st.frame_depth(), 1);

    // The creating frame is long gone; the environment was promoted.
    let v = st.funcall(closure, "call", &[]);
    assert_eq!(v.as_fixnum(), Some(7));
}

#[test]
fn test_upvalue_store_through_detached_env() {
    // outer: x = 1; return [setter, getter]
    let mut st = State::new();

    let mut outer = IrepBuilder::new("outer", 6);
    outer.loadi(1, 1);
    outer.lambda(2, 1, LAMBDA_CAPTURE); // setter
    outer.lambda(3, 2, LAMBDA_CAPTURE); // getter
    outer.make_array(4, 2, 2);
    outer.ret(4, ReturnMode::Normal);

    let mut setter = IrepBuilder::new("setter", 3);
    setter.loadi(1, 5);
    setter.setupvar(1, 1, 0);
    setter.ret(1, ReturnMode::Normal);

    let mut getter = IrepBuilder::new("getter", 3);
    getter.getupvar(1, 1, 0);
    getter.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![outer.finish(), setter.finish(), getter.finish()]);
    let pair = st.run_irep(&ireps[0], Value::nil());
    let elems = st.ary_elems(&pair).unwrap();

    // Both closures share one environment; a store through the first is
    // visible through the second after promotion.
    st.funcall(elems[0].clone(), "call", &[]);
    let v = st.funcall(elems[1].clone(), "call", &[]);
    assert_eq!(v.as_fixnum(), Some(5));
    assert!(st.gc_hooks().barrier_hits() > 0);
}

#[test]
fn test_upvalue_access_while_creator_is_live() {
    // The block runs while the outer frame is still on the stack, so the
    // environment aliases the live register window.
    let mut st = State::new();
    let call = st.intern("call");

    let mut outer = IrepBuilder::new("outer", 5);
    outer.loadi(1, 20);
    outer.lambda(2, 1, LAMBDA_CAPTURE);
    outer.send(2, call, 0);
    outer.ret(2, ReturnMode::Normal);

    let mut inner = IrepBuilder::new("inner", 3);
    inner.getupvar(1, 1, 0);
    inner.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![outer.finish(), inner.finish()]);
    let v = st.run_irep(&ireps[0], Value::nil());
    assert_eq!(v.as_fixnum(), Some(20));
}

#[test]
fn test_nested_environment_chain() {
    // Level 0 binds x, level 1 closes over it, level 2 reads it through
    // two links of the environment chain.
    let mut st = State::new();
    let call = st.intern("call");

    let mut outer = IrepBuilder::new("outer", 5);
    outer.loadi(1, 33);
    outer.lambda(2, 1, LAMBDA_CAPTURE); // mid
    outer.send(2, call, 0);
    outer.ret(2, ReturnMode::Normal);

    let mut mid = IrepBuilder::new("mid", 5);
    mid.lambda(1, 1, LAMBDA_CAPTURE); // leaf, child of mid
    mid.send(1, call, 0);
    mid.ret(1, ReturnMode::Normal);

    let mut leaf = IrepBuilder::new("leaf", 3);
    leaf.getupvar(1, 1, 1);
    leaf.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![outer.finish(), mid.finish(), leaf.finish()]);
    let v = st.run_irep(&ireps[0], Value::nil());
    assert_eq!(v.as_fixnum(), Some(33));
}

#[test]
fn test_non_local_return_from_block() {
    // method: r = lambda { return 99 }; r.call; 0 - the non-local
    // return unwinds the whole method.
    let mut st = State::new();
    let call = st.intern("call");
    let m = st.intern("m");

    let mut method = IrepBuilder::new("m", 5);
    method.enter(beryl_bytecode::ParamSpec::required(0));
    method.lambda(1, 1, LAMBDA_CAPTURE);
    method.send(1, call, 0);
    method.loadi(2, 0);
    method.ret(2, ReturnMode::Normal);

    let mut block = IrepBuilder::new("block", 3);
    block.loadi(1, 99);
    block.ret(1, ReturnMode::Return);

    let ireps = st.register_family(vec![method.finish(), block.finish()]);
    let p = st.proc_new(&ireps[0], true);
    let object = st.core.object.clone();
    st.define_method(&object, m, &p).unwrap();

    let v = st.funcall(Value::nil(), "m", &[]);
    assert_eq!(v.as_fixnum(), Some(99));
    assert_eq!(st.frame_depth(), 1);
}

#[test]
fn test_break_from_dead_scope_is_local_jump_error() {
    let mut st = State::new();

    let mut outer = IrepBuilder::new("outer", 4);
    outer.loadi(1, 7);
    outer.lambda(2, 1, LAMBDA_CAPTURE);
    outer.ret(2, ReturnMode::Normal);

    let mut inner = IrepBuilder::new("inner", 3);
    inner.loadi(1, 1);
    inner.ret(1, ReturnMode::Break);

    let ireps = st.register_family(vec![outer.finish(), inner.finish()]);
    let closure = st.run_irep(&ireps[0], Value::nil());

    let v = st.funcall(closure, "call", &[]);
    assert!(v.is_nil());
    assert_eq!(st.exception_class_name().as_deref(), Some("LocalJumpError"));
    assert_eq!(st.exception_message().as_deref(), Some("unexpected break"));
}

#[test]
fn test_return_from_dead_scope_is_local_jump_error() {
    let mut st = State::new();

    let mut outer = IrepBuilder::new("outer", 4);
    outer.lambda(1, 1, LAMBDA_CAPTURE);
    outer.ret(1, ReturnMode::Normal);

    let mut inner = IrepBuilder::new("inner", 3);
    inner.loadi(1, 1);
    inner.ret(1, ReturnMode::Return);

    let ireps = st.register_family(vec![outer.finish(), inner.finish()]);
    let closure = st.run_irep(&ireps[0], Value::nil());

    let v = st.funcall(closure, "call", &[]);
    assert!(v.is_nil());
    assert_eq!(st.exception_message().as_deref(), Some("unexpected return"));
}

#[test]
fn test_plain_lambda_does_not_capture() {
    let mut st = State::new();

    let mut outer = IrepBuilder::new("outer", 4);
    outer.loadi(1, 7);
    outer.lambda(2, 1, 0); // no capture flag
    outer.ret(2, ReturnMode::Normal);

    let mut inner = IrepBuilder::new("inner", 3);
    inner.getupvar(1, 1, 0);
    inner.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![outer.finish(), inner.finish()]);
    let closure = st.run_irep(&ireps[0], Value::nil());

    // No environment chain: the upvalue read falls back to nil.
    let v = st.funcall(closure, "call", &[]);
    assert!(v.is_nil());
    assert!(st.exception().is_none());
}

#[test]
fn test_closure_keeps_original_self() {
    // A closure created in a method invoked on 41 sees that receiver
    // via slot 0 of the environment, even when called later on nil.
    let mut st = State::new();
    let maker = st.intern("maker");
    let plus = st.intern("+");

    let mut method = IrepBuilder::new("maker", 4);
    method.enter(beryl_bytecode::ParamSpec::required(0));
    method.lambda(1, 1, LAMBDA_CAPTURE);
    method.ret(1, ReturnMode::Normal);

    let mut block = IrepBuilder::new("block", 4);
    block.loadself(1);
    block.loadi(2, 1);
    block.binop(beryl_bytecode::Opcode::Add, 1, plus);
    block.ret(1, ReturnMode::Normal);

    let ireps = st.register_family(vec![method.finish(), block.finish()]);
    let p = st.proc_new(&ireps[0], true);
    let object = st.core.object.clone();
    st.define_method(&object, maker, &p).unwrap();

    let closure = st.funcall(Value::fixnum(41), "maker", &[]);
    let v = st.funcall(closure, "call", &[]);
    assert_eq!(v.as_fixnum(), Some(42));
}
