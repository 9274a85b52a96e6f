//! Core-class bootstrap and the built-in methods the dispatch engine
//! itself relies on.
//!
//! The bootstrap is deliberately small: the root class, the per-tag
//! primitive classes, the exception hierarchy, identity `==`, a default
//! `method_missing` that raises, and `Proc#call` - a one-instruction
//! body whose re-entry opcode swaps the procedure into the running
//! frame.

use crate::state::State;
use beryl_bytecode::IrepBuilder;
use beryl_core::object::{as_class, ObjRef, RObject};
use beryl_core::{ErrorKind, SymbolTable, Value};

/// The bootstrapped class set, one field per built-in.
pub struct CoreClasses {
    pub object: ObjRef,
    pub module_class: ObjRef,
    pub class_class: ObjRef,
    pub nil_class: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub fixnum_class: ObjRef,
    pub float_class: ObjRef,
    pub symbol_class: ObjRef,
    pub string_class: ObjRef,
    pub array_class: ObjRef,
    pub hash_class: ObjRef,
    pub range_class: ObjRef,
    pub proc_class: ObjRef,
    pub exception_class: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub zero_division_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub local_jump_error: ObjRef,
}

impl CoreClasses {
    /// Exception class a core error kind materialises as.
    pub fn class_for(&self, kind: ErrorKind) -> &ObjRef {
        match kind {
            ErrorKind::LocalJump => &self.local_jump_error,
            ErrorKind::Argument => &self.argument_error,
            ErrorKind::Runtime => &self.runtime_error,
            ErrorKind::NoMethod => &self.no_method_error,
            ErrorKind::ZeroDivision => &self.zero_division_error,
            ErrorKind::Type => &self.type_error,
        }
    }
}

/// Build the class graph. Constants for every class are registered on
/// the root so constant lookup can see them.
pub(crate) fn bootstrap_classes(symbols: &mut SymbolTable) -> CoreClasses {
    let object = RObject::class(Some(symbols.intern("Object")), None);
    let module_class = RObject::class(Some(symbols.intern("Module")), Some(object.clone()));
    let class_class = RObject::class(Some(symbols.intern("Class")), Some(module_class.clone()));

    let mut derive = |name: &str, sup: &ObjRef| {
        RObject::class(Some(symbols.intern(name)), Some(sup.clone()))
    };

    let nil_class = derive("NilClass", &object);
    let true_class = derive("TrueClass", &object);
    let false_class = derive("FalseClass", &object);
    let fixnum_class = derive("Fixnum", &object);
    let float_class = derive("Float", &object);
    let symbol_class = derive("Symbol", &object);
    let string_class = derive("String", &object);
    let array_class = derive("Array", &object);
    let hash_class = derive("Hash", &object);
    let range_class = derive("Range", &object);
    let proc_class = derive("Proc", &object);

    let exception_class = derive("Exception", &object);
    let standard_error = derive("StandardError", &exception_class);
    let runtime_error = derive("RuntimeError", &standard_error);
    let argument_error = derive("ArgumentError", &standard_error);
    let type_error = derive("TypeError", &standard_error);
    let zero_division_error = derive("ZeroDivisionError", &standard_error);
    let name_error = derive("NameError", &standard_error);
    let no_method_error = derive("NoMethodError", &name_error);
    let local_jump_error = derive("LocalJumpError", &standard_error);

    let core = CoreClasses {
        object,
        module_class,
        class_class,
        nil_class,
        true_class,
        false_class,
        fixnum_class,
        float_class,
        symbol_class,
        string_class,
        array_class,
        hash_class,
        range_class,
        proc_class,
        exception_class,
        standard_error,
        runtime_error,
        argument_error,
        type_error,
        zero_division_error,
        name_error,
        no_method_error,
        local_jump_error,
    };

    // Register each class as a constant on the root.
    let all: [&ObjRef; 23] = [
        &core.object,
        &core.module_class,
        &core.class_class,
        &core.nil_class,
        &core.true_class,
        &core.false_class,
        &core.fixnum_class,
        &core.float_class,
        &core.symbol_class,
        &core.string_class,
        &core.array_class,
        &core.hash_class,
        &core.range_class,
        &core.proc_class,
        &core.exception_class,
        &core.standard_error,
        &core.runtime_error,
        &core.argument_error,
        &core.type_error,
        &core.zero_division_error,
        &core.name_error,
        &core.no_method_error,
        &core.local_jump_error,
    ];
    if let Some(root) = as_class(&core.object) {
        let mut consts = root.consts.write();
        for class in all {
            if let Some(k) = as_class(class) {
                if let Some(name) = *k.name.read() {
                    consts.insert(name, Value::Object((*class).clone()));
                }
            }
        }
    }
    core
}

/// Default `method_missing`: raise NoMethodError naming the method.
fn native_method_missing(st: &mut State, _self_val: Value) -> Value {
    let args = st.args();
    let name = args
        .first()
        .and_then(Value::as_symbol)
        .and_then(|s| st.sym_name(s).map(str::to_owned))
        .unwrap_or_else(|| "?".to_string());
    st.raise_error(ErrorKind::NoMethod, format!("undefined method '{}'", name))
}

/// Default `==`: immediate equality, identity for heap objects.
fn native_eq(st: &mut State, self_val: Value) -> Value {
    let args = st.args();
    Value::bool(args.first().is_some_and(|o| self_val.eq_value(o)))
}

/// Install the built-in methods. Runs once from `State::new`.
pub(crate) fn install_builtins(st: &mut State) {
    let object = st.core.object.clone();
    st.define_native_method(&object, "method_missing", native_method_missing);
    st.define_native_method(&object, "==", native_eq);

    // Proc#call: a single re-entry instruction. The opcode replaces the
    // running frame with the receiver procedure, so the body never
    // advances past it.
    let mut b = IrepBuilder::new("call", 2);
    b.call(0);
    let call_irep = st.register_irep(b.finish());
    let proc_class = st.core.proc_class.clone();
    let call_proc = RObject::proc_obj(
        beryl_core::object::ProcBody::Irep(beryl_core::object::IrepId(call_irep.idx)),
        Some(proc_class.clone()),
        false,
        None,
    );
    let call_sym = st.intern("call");
    // The class and proc are well-formed by construction.
    let _ = st.define_method(&proc_class, call_sym, &call_proc);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        let st = State::new();
        let nme = &st.core.no_method_error;
        let sup = as_class(nme).unwrap().super_class.read().clone().unwrap();
        assert!(std::sync::Arc::ptr_eq(&sup, &st.core.name_error));
        let kind_class = st.core.class_for(ErrorKind::Argument);
        assert!(std::sync::Arc::ptr_eq(kind_class, &st.core.argument_error));
    }

    #[test]
    fn test_classes_registered_as_constants() {
        let mut st = State::new();
        let name = st.intern("StandardError");
        let v = st.const_get_from(&st.core.object.clone(), name);
        assert!(v.as_object().is_some());
    }

    #[test]
    fn test_method_missing_installed() {
        let mut st = State::new();
        let mm = st.intern("method_missing");
        assert!(st.method_search(&st.core.object.clone(), mm).is_some());
    }
}
