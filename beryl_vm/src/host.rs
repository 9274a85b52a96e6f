//! Host-side primitives the dispatch engine consumes.
//!
//! Class mapping, method resolution, the container constructors and
//! primitives behind the array/string/hash/range opcodes, and the
//! variable stores (globals, specials, instance/class variables,
//! constants). Everything that plants a reference inside a heap
//! container records the holder with the write barrier.

use crate::state::State;
use beryl_core::object::{as_class, as_proc, method_search, ObjRef, RObject};
use beryl_core::{CoreError, ErrorKind, HashKey, ObjData, Symbol, Value};

impl State {
    // =========================================================================
    // Classes
    // =========================================================================

    /// Type-to-class mapping for primitives and objects.
    pub fn class_of(&self, v: &Value) -> ObjRef {
        let core = &self.core;
        match v {
            Value::Nil => core.nil_class.clone(),
            Value::False => core.false_class.clone(),
            Value::True => core.true_class.clone(),
            Value::Fixnum(_) => core.fixnum_class.clone(),
            Value::Float(_) => core.float_class.clone(),
            Value::Symbol(_) => core.symbol_class.clone(),
            Value::Object(o) => {
                if let Some(c) = o.class.read().clone() {
                    return c;
                }
                match &o.data {
                    ObjData::String(_) => core.string_class.clone(),
                    ObjData::Array(_) => core.array_class.clone(),
                    ObjData::Hash(_) => core.hash_class.clone(),
                    ObjData::Range(_) => core.range_class.clone(),
                    ObjData::Class(c) if c.is_module => core.module_class.clone(),
                    ObjData::Class(_) => core.class_class.clone(),
                    ObjData::Proc(_) => core.proc_class.clone(),
                    ObjData::Exception(_) => core.exception_class.clone(),
                    ObjData::Env(_) | ObjData::Instance(_) => core.object.clone(),
                }
            }
        }
    }

    /// Walk the super chain of `class` for `mid`. Returns the callable
    /// and the class that defined it.
    pub fn method_search(&self, class: &ObjRef, mid: Symbol) -> Option<(ObjRef, ObjRef)> {
        method_search(class, mid)
    }

    /// Define (or reopen) a class named `name` under `outer`.
    pub fn define_class(
        &mut self,
        outer: &ObjRef,
        name: Symbol,
        super_class: Option<ObjRef>,
    ) -> Result<ObjRef, CoreError> {
        let outer_class = as_class(outer)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "class definition in a non-class"))?;
        if let Some(existing) = outer_class.consts.read().get(&name) {
            if let Some(o) = existing.as_object() {
                if as_class(o).is_some_and(|c| !c.is_module) {
                    return Ok(o.clone());
                }
            }
            return Err(CoreError::new(ErrorKind::Type, "constant is not a class"));
        }
        let sup = super_class.unwrap_or_else(|| self.core.object.clone());
        let c = RObject::class(Some(name), Some(sup));
        self.gc.protect(&c);
        outer_class.consts.write().insert(name, Value::Object(c.clone()));
        self.gc.write_barrier(outer);
        Ok(c)
    }

    /// Define (or reopen) a module named `name` under `outer`.
    pub fn define_module(&mut self, outer: &ObjRef, name: Symbol) -> Result<ObjRef, CoreError> {
        let outer_class = as_class(outer)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "module definition in a non-class"))?;
        if let Some(existing) = outer_class.consts.read().get(&name) {
            if let Some(o) = existing.as_object() {
                if as_class(o).is_some_and(|c| c.is_module) {
                    return Ok(o.clone());
                }
            }
            return Err(CoreError::new(ErrorKind::Type, "constant is not a module"));
        }
        let m = RObject::module(Some(name));
        self.gc.protect(&m);
        outer_class.consts.write().insert(name, Value::Object(m.clone()));
        self.gc.write_barrier(outer);
        Ok(m)
    }

    /// Install `proc` as method `mid` of `class`, stamping the proc's
    /// target class.
    pub fn define_method(
        &mut self,
        class: &ObjRef,
        mid: Symbol,
        proc: &ObjRef,
    ) -> Result<(), CoreError> {
        let k = as_class(class)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "method definition on a non-class"))?;
        let p = as_proc(proc)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "method body is not a procedure"))?;
        *p.target_class.write() = Some(class.clone());
        k.methods.write().insert(mid, proc.clone());
        self.gc.write_barrier(class);
        Ok(())
    }

    /// Register a host function as method `name` of `class`.
    pub fn define_native_method(
        &mut self,
        class: &ObjRef,
        name: &str,
        f: crate::state::NativeFn,
    ) {
        let mid = self.intern(name);
        let p = self.native_proc(f);
        // A class object plus a fresh proc: the only failure paths are
        // type mismatches, which cannot happen here.
        let _ = self.define_method(class, mid, &p);
    }

    /// The singleton class of `v`, creating and attaching it on demand.
    /// nil, true and false map to their regular classes; other
    /// primitives cannot carry one.
    pub fn singleton_class(&mut self, v: &Value) -> Result<ObjRef, CoreError> {
        match v {
            Value::Nil => Ok(self.core.nil_class.clone()),
            Value::True => Ok(self.core.true_class.clone()),
            Value::False => Ok(self.core.false_class.clone()),
            Value::Fixnum(_) | Value::Float(_) | Value::Symbol(_) => Err(CoreError::new(
                ErrorKind::Type,
                "can't define singleton class for this value",
            )),
            Value::Object(o) => {
                let current = self.class_of(v);
                if as_class(&current).is_some_and(|c| c.is_singleton) {
                    return Ok(current);
                }
                let sc = RObject::singleton_class(Some(current));
                self.gc.protect(&sc);
                *o.class.write() = Some(sc.clone());
                self.gc.write_barrier(o);
                Ok(sc)
            }
        }
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    pub fn ary_new(&mut self, elems: Vec<Value>) -> Value {
        let a = RObject::array(elems);
        self.gc.protect(&a);
        Value::Object(a)
    }

    pub fn ary_elems(&self, v: &Value) -> Option<Vec<Value>> {
        match v.as_object()?.data {
            ObjData::Array(ref elems) => Some(elems.read().clone()),
            _ => None,
        }
    }

    pub(crate) fn ary_push(&mut self, ary: &Value, v: Value) -> Result<(), CoreError> {
        let o = expect_array(ary)?;
        if let ObjData::Array(elems) = &o.data {
            elems.write().push(v);
        }
        self.gc.write_barrier(&o);
        Ok(())
    }

    pub(crate) fn ary_unshift(&mut self, ary: &Value, v: Value) -> Result<(), CoreError> {
        let o = expect_array(ary)?;
        if let ObjData::Array(elems) = &o.data {
            elems.write().insert(0, v);
        }
        self.gc.write_barrier(&o);
        Ok(())
    }

    pub(crate) fn ary_concat(&mut self, ary: &Value, other: &Value) -> Result<(), CoreError> {
        let o = expect_array(ary)?;
        let mut extra = self.ary_elems(other).unwrap_or_default();
        if let ObjData::Array(elems) = &o.data {
            elems.write().append(&mut extra);
        }
        self.gc.write_barrier(&o);
        Ok(())
    }

    /// The splat view of a value: arrays pass through, everything else
    /// becomes a one-element array.
    pub(crate) fn ary_splat(&mut self, v: &Value) -> Value {
        if self.ary_elems(v).is_some() {
            v.clone()
        } else {
            self.ary_new(vec![v.clone()])
        }
    }

    pub fn ary_ref(&self, v: &Value, idx: usize) -> Value {
        match self.ary_elems(v) {
            Some(elems) => elems.get(idx).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub(crate) fn ary_set(&mut self, ary: &Value, idx: usize, v: Value) -> Result<(), CoreError> {
        let o = expect_array(ary)?;
        if let ObjData::Array(elems) = &o.data {
            let mut elems = elems.write();
            if idx >= elems.len() {
                elems.resize(idx + 1, Value::Nil);
            }
            elems[idx] = v;
        }
        self.gc.write_barrier(&o);
        Ok(())
    }

    // =========================================================================
    // Strings
    // =========================================================================

    pub fn string_new(&mut self, s: String) -> Value {
        let o = RObject::string(s);
        self.gc.protect(&o);
        Value::Object(o)
    }

    pub fn str_contents(&self, v: &Value) -> Option<String> {
        match v.as_object()?.data {
            ObjData::String(ref s) => Some(s.read().clone()),
            _ => None,
        }
    }

    /// Fresh string holding `a + b`.
    pub(crate) fn str_plus(&mut self, a: &Value, b: &Value) -> Option<Value> {
        let mut s = self.str_contents(a)?;
        s.push_str(&self.str_contents(b)?);
        Some(self.string_new(s))
    }

    /// In-place append of `b` onto string `a`.
    pub(crate) fn str_concat(&mut self, a: &Value, b: &Value) -> Result<(), CoreError> {
        let tail = self
            .str_contents(b)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "can't concat a non-string"))?;
        let o = a
            .as_object()
            .filter(|o| matches!(o.data, ObjData::String(_)))
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "can't concat onto a non-string"))?;
        if let ObjData::String(s) = &o.data {
            s.write().push_str(&tail);
        }
        Ok(())
    }

    /// Materialise a literal-pool entry as a value. String literals
    /// produce a fresh object so pool data can never be mutated through
    /// a register.
    pub(crate) fn literal_value(&mut self, lit: &beryl_bytecode::Literal) -> Value {
        match lit {
            beryl_bytecode::Literal::Int(i) => Value::fixnum(*i),
            beryl_bytecode::Literal::Float(f) => Value::float(*f),
            beryl_bytecode::Literal::Str(s) => self.string_new(s.to_string()),
        }
    }

    // =========================================================================
    // Hashes and ranges
    // =========================================================================

    pub fn hash_new(&mut self) -> Value {
        let h = RObject::hash();
        self.gc.protect(&h);
        Value::Object(h)
    }

    pub(crate) fn hash_set(&mut self, hash: &Value, k: Value, v: Value) -> Result<(), CoreError> {
        let o = hash
            .as_object()
            .filter(|o| matches!(o.data, ObjData::Hash(_)))
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "not a hash"))?
            .clone();
        if let ObjData::Hash(entries) = &o.data {
            entries.write().insert(HashKey::of(&k), (k, v));
        }
        self.gc.write_barrier(&o);
        Ok(())
    }

    /// Value stored under `k`, or nil.
    pub fn hash_get(&self, hash: &Value, k: &Value) -> Value {
        let Some(o) = hash.as_object() else {
            return Value::Nil;
        };
        match &o.data {
            ObjData::Hash(entries) => entries
                .read()
                .get(&HashKey::of(k))
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    pub fn range_new(&mut self, begin: Value, end: Value, exclusive: bool) -> Value {
        let r = RObject::range(begin, end, exclusive);
        self.gc.protect(&r);
        Value::Object(r)
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Construct an exception instance of `class` with `message`.
    pub fn exception_new(&mut self, class: &ObjRef, message: String) -> ObjRef {
        let e = RObject::exception(message);
        *e.class.write() = Some(class.clone());
        self.gc.protect(&e);
        e
    }

    /// Set the exception slot from an error kind. Returns nil so native
    /// methods can `return st.raise_error(...)`.
    pub fn raise_error(&mut self, kind: ErrorKind, message: impl Into<String>) -> Value {
        let class = self.core.class_for(kind).clone();
        let exc = self.exception_new(&class, message.into());
        self.exc = Some(exc);
        Value::Nil
    }

    // =========================================================================
    // Variable stores
    // =========================================================================

    pub fn gv_get(&self, sym: Symbol) -> Value {
        self.globals.get(&sym).cloned().unwrap_or(Value::Nil)
    }

    pub fn gv_set(&mut self, sym: Symbol, v: Value) {
        self.globals.insert(sym, v);
    }

    pub fn special_get(&self, idx: u32) -> Value {
        self.specials.get(&idx).cloned().unwrap_or(Value::Nil)
    }

    pub fn special_set(&mut self, idx: u32, v: Value) {
        self.specials.insert(idx, v);
    }

    /// Instance variable of `recv` (the current `self` for the opcode
    /// forms). Values that cannot carry instance variables read nil and
    /// drop writes.
    pub fn iv_get(&self, recv: &Value, sym: Symbol) -> Value {
        match recv.as_object().map(|o| &o.data) {
            Some(ObjData::Instance(i)) => i.ivars.read().get(&sym).cloned().unwrap_or(Value::Nil),
            Some(ObjData::Exception(e)) => {
                e.ivars.read().get(&sym).cloned().unwrap_or(Value::Nil)
            }
            _ => Value::Nil,
        }
    }

    pub fn iv_set(&mut self, recv: &Value, sym: Symbol, v: Value) {
        let Some(o) = recv.as_object().cloned() else {
            return;
        };
        match &o.data {
            ObjData::Instance(i) => {
                i.ivars.write().insert(sym, v);
            }
            ObjData::Exception(e) => {
                e.ivars.write().insert(sym, v);
            }
            _ => return,
        }
        self.gc.write_barrier(&o);
    }

    /// Class variable lookup along the target-class super chain.
    pub fn cv_get(&self, sym: Symbol) -> Value {
        let mut cur = Some(self.ci().target_class.clone());
        while let Some(c) = cur {
            let next = match as_class(&c) {
                Some(k) => {
                    if let Some(v) = k.cvars.read().get(&sym) {
                        return v.clone();
                    }
                    k.super_class.read().clone()
                }
                None => None,
            };
            cur = next;
        }
        Value::Nil
    }

    /// Class variable store: updates the defining class if one exists in
    /// the chain, otherwise defines on the current target class.
    pub fn cv_set(&mut self, sym: Symbol, v: Value) {
        let target = self.ci().target_class.clone();
        let mut cur = Some(target.clone());
        while let Some(c) = cur {
            let next = match as_class(&c) {
                Some(k) => {
                    if k.cvars.read().contains_key(&sym) {
                        k.cvars.write().insert(sym, v);
                        self.gc.write_barrier(&c);
                        return;
                    }
                    k.super_class.read().clone()
                }
                None => None,
            };
            cur = next;
        }
        if let Some(k) = as_class(&target) {
            k.cvars.write().insert(sym, v);
            self.gc.write_barrier(&target);
        }
    }

    /// Constant lookup: the target-class chain, then the root class.
    pub fn const_get(&self, sym: Symbol) -> Value {
        let v = self.const_get_from(&self.ci().target_class, sym);
        if !v.is_nil() {
            return v;
        }
        self.const_get_from(&self.core.object, sym)
    }

    pub fn const_set(&mut self, sym: Symbol, v: Value) {
        let target = self.ci().target_class.clone();
        if let Some(k) = as_class(&target) {
            k.consts.write().insert(sym, v);
            self.gc.write_barrier(&target);
        }
    }

    /// Constant lookup starting at an explicit class or module.
    pub fn const_get_from(&self, class: &ObjRef, sym: Symbol) -> Value {
        let mut cur = Some(class.clone());
        while let Some(c) = cur {
            let next = match as_class(&c) {
                Some(k) => {
                    if let Some(v) = k.consts.read().get(&sym) {
                        return v.clone();
                    }
                    k.super_class.read().clone()
                }
                None => None,
            };
            cur = next;
        }
        Value::Nil
    }

    pub fn const_set_on(&mut self, class: &ObjRef, sym: Symbol, v: Value) -> Result<(), CoreError> {
        let k = as_class(class)
            .ok_or_else(|| CoreError::new(ErrorKind::Type, "constant target is not a class"))?;
        k.consts.write().insert(sym, v);
        self.gc.write_barrier(class);
        Ok(())
    }
}

/// The backing object of an array value, or a type error.
fn expect_array(v: &Value) -> Result<ObjRef, CoreError> {
    v.as_object()
        .filter(|o| matches!(o.data, ObjData::Array(_)))
        .cloned()
        .ok_or_else(|| CoreError::new(ErrorKind::Type, "not an array"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_of_primitives() {
        let st = State::new();
        let nil_class = st.class_of(&Value::Nil);
        assert!(std::sync::Arc::ptr_eq(&nil_class, &st.core.nil_class));
        let int_class = st.class_of(&Value::fixnum(3));
        assert!(std::sync::Arc::ptr_eq(&int_class, &st.core.fixnum_class));
    }

    #[test]
    fn test_array_primitives() {
        let mut st = State::new();
        let a = st.ary_new(vec![Value::fixnum(1)]);
        st.ary_push(&a, Value::fixnum(2)).unwrap();
        st.ary_unshift(&a, Value::fixnum(0)).unwrap();
        let elems = st.ary_elems(&a).unwrap();
        let got: Vec<i64> = elems.iter().map(|v| v.as_fixnum().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2]);

        assert_eq!(st.ary_ref(&a, 1).as_fixnum(), Some(1));
        assert!(st.ary_ref(&a, 9).is_nil());

        st.ary_set(&a, 5, Value::fixnum(9)).unwrap();
        assert_eq!(st.ary_elems(&a).unwrap().len(), 6);
    }

    #[test]
    fn test_splat() {
        let mut st = State::new();
        let a = st.ary_new(vec![Value::fixnum(1)]);
        let splatted = st.ary_splat(&a.clone());
        assert!(a.eq_value(&splatted));

        let wrapped = st.ary_splat(&Value::fixnum(7));
        assert_eq!(st.ary_elems(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_string_primitives() {
        let mut st = State::new();
        let a = st.string_new("foo".into());
        let b = st.string_new("bar".into());
        let c = st.str_plus(&a, &b).unwrap();
        assert_eq!(st.str_contents(&c).unwrap(), "foobar");
        st.str_concat(&a, &b).unwrap();
        assert_eq!(st.str_contents(&a).unwrap(), "foobar");
        assert!(st.str_concat(&a, &Value::fixnum(1)).is_err());
    }

    #[test]
    fn test_globals_default_nil() {
        let mut st = State::new();
        let g = st.intern("$x");
        assert!(st.gv_get(g).is_nil());
        st.gv_set(g, Value::fixnum(4));
        assert_eq!(st.gv_get(g).as_fixnum(), Some(4));
    }

    #[test]
    fn test_define_class_and_reopen() {
        let mut st = State::new();
        let name = st.intern("Widget");
        let object = st.core.object.clone();
        let c1 = st.define_class(&object, name, None).unwrap();
        let c2 = st.define_class(&object, name, None).unwrap();
        assert!(std::sync::Arc::ptr_eq(&c1, &c2));
        let found = st.const_get_from(&object, name);
        assert!(found.as_object().is_some());
    }

    #[test]
    fn test_singleton_class_for_primitive_fails() {
        let mut st = State::new();
        assert!(st.singleton_class(&Value::fixnum(1)).is_err());
        assert!(st.singleton_class(&Value::Nil).is_ok());
    }
}
