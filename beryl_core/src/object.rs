//! Shared heap objects.
//!
//! Every heap citizen is an `Arc<RObject>`: a class slot plus a data
//! variant. Interiors that mutate (string buffers, array elements, method
//! tables, environment homes) sit behind `parking_lot` locks so values
//! stay `Send + Sync` and clone by reference count.
//!
//! Procedures do not point at compiled code directly; they carry an
//! [`IrepId`] (slot in the interpreter's irep table) or a [`NativeId`]
//! (slot in its native-function registry). That keeps this crate free of
//! any bytecode dependency while preserving the table-indexed child
//! lookup the nested-procedure opcodes rely on.

use crate::symbol::Symbol;
use crate::value::{HashKey, Value, ValueType};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Shared reference to a heap object.
pub type ObjRef = Arc<RObject>;

/// Slot in the interpreter's irep table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IrepId(pub usize);

/// Slot in the interpreter's native-function registry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NativeId(pub usize);

/// A heap object: its class (lazily resolved for fresh containers) and
/// its payload.
pub struct RObject {
    /// `None` means "the built-in class for this payload"; the VM fills
    /// the slot when a singleton class is attached.
    pub class: RwLock<Option<ObjRef>>,
    pub data: ObjData,
}

/// Object payloads.
pub enum ObjData {
    String(RwLock<String>),
    Array(RwLock<Vec<Value>>),
    /// Key projection -> (original key, value).
    Hash(RwLock<FxHashMap<HashKey, (Value, Value)>>),
    Range(RRange),
    Class(RClass),
    Proc(RProc),
    Env(REnv),
    Exception(RException),
    Instance(RInstance),
}

impl ObjData {
    pub fn tag(&self) -> ValueType {
        match self {
            ObjData::String(_) => ValueType::String,
            ObjData::Array(_) => ValueType::Array,
            ObjData::Hash(_) => ValueType::Hash,
            ObjData::Range(_) => ValueType::Range,
            ObjData::Class(c) if c.is_module => ValueType::Module,
            ObjData::Class(_) => ValueType::Class,
            ObjData::Proc(_) => ValueType::Proc,
            ObjData::Env(_) => ValueType::Env,
            ObjData::Exception(_) => ValueType::Exception,
            ObjData::Instance(_) => ValueType::Object,
        }
    }
}

// =============================================================================
// Ranges
// =============================================================================

/// Immutable begin/end pair with an exclusivity flag.
pub struct RRange {
    pub begin: Value,
    pub end: Value,
    pub exclusive: bool,
}

// =============================================================================
// Classes and modules
// =============================================================================

/// A class or module. Modules are classes with `is_module` set and no
/// meaningful superclass; singleton classes additionally set
/// `is_singleton`.
pub struct RClass {
    pub name: RwLock<Option<Symbol>>,
    pub super_class: RwLock<Option<ObjRef>>,
    /// Method name -> procedure object.
    pub methods: RwLock<FxHashMap<Symbol, ObjRef>>,
    pub consts: RwLock<FxHashMap<Symbol, Value>>,
    pub cvars: RwLock<FxHashMap<Symbol, Value>>,
    pub is_module: bool,
    pub is_singleton: bool,
}

impl RClass {
    fn fresh(name: Option<Symbol>, super_class: Option<ObjRef>, is_module: bool) -> RClass {
        RClass {
            name: RwLock::new(name),
            super_class: RwLock::new(super_class),
            methods: RwLock::new(FxHashMap::default()),
            consts: RwLock::new(FxHashMap::default()),
            cvars: RwLock::new(FxHashMap::default()),
            is_module,
            is_singleton: false,
        }
    }
}

/// Walk the superclass chain looking for `mid`.
///
/// Returns the procedure and the class that defined it (the defining
/// class is what `super` dispatch starts below).
pub fn method_search(class: &ObjRef, mid: Symbol) -> Option<(ObjRef, ObjRef)> {
    let mut cur = Some(class.clone());
    while let Some(c) = cur {
        let next = match &c.data {
            ObjData::Class(k) => {
                if let Some(m) = k.methods.read().get(&mid) {
                    return Some((m.clone(), c.clone()));
                }
                k.super_class.read().clone()
            }
            _ => None,
        };
        cur = next;
    }
    None
}

/// Typed view of a class payload.
pub fn as_class(obj: &ObjRef) -> Option<&RClass> {
    match &obj.data {
        ObjData::Class(c) => Some(c),
        _ => None,
    }
}

/// Typed view of a procedure payload.
pub fn as_proc(obj: &ObjRef) -> Option<&RProc> {
    match &obj.data {
        ObjData::Proc(p) => Some(p),
        _ => None,
    }
}

/// Typed view of an environment payload.
pub fn as_env(obj: &ObjRef) -> Option<&REnv> {
    match &obj.data {
        ObjData::Env(e) => Some(e),
        _ => None,
    }
}

// =============================================================================
// Procedures
// =============================================================================

/// Compiled or native procedure body.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcBody {
    Irep(IrepId),
    Native(NativeId),
}

/// A callable.
///
/// `target_class` is the class the procedure was defined in (filled by
/// method definition and class-body execution; the starting point for
/// `super`). `strict` procedures enforce their declared arity; block
/// style procedures reconcile leniently.
pub struct RProc {
    pub body: ProcBody,
    pub target_class: RwLock<Option<ObjRef>>,
    pub strict: bool,
    /// Captured environment; present on closures.
    pub env: Option<ObjRef>,
}

impl RProc {
    pub fn is_native(&self) -> bool {
        matches!(self.body, ProcBody::Native(_))
    }
}

// =============================================================================
// Environments
// =============================================================================

/// Where an environment's register slots currently live.
pub enum EnvHome {
    /// Aliases a live frame's window on the operand stack.
    Open { cioff: usize, base: usize },
    /// Owns a private copy; the frame has returned.
    Detached { slots: Box<[Value]> },
}

/// A captured register window.
///
/// While the creating frame is alive the environment aliases its window
/// (`Open`); when that frame leaves, the interpreter copies the window
/// into a private buffer (`Detached`) so closures keep working. `parent`
/// is the environment of the enclosing procedure, forming the chain
/// upvalue access walks.
pub struct REnv {
    pub mid: Option<Symbol>,
    pub parent: Option<ObjRef>,
    pub len: usize,
    pub home: RwLock<EnvHome>,
}

impl REnv {
    /// Frame index while open, -1 once detached.
    pub fn cioff(&self) -> i64 {
        match &*self.home.read() {
            EnvHome::Open { cioff, .. } => *cioff as i64,
            EnvHome::Detached { .. } => -1,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(&*self.home.read(), EnvHome::Detached { .. })
    }

    /// Read a slot from a detached environment. Open environments are
    /// read through the interpreter, which owns the operand stack.
    pub fn detached_get(&self, idx: usize) -> Option<Value> {
        match &*self.home.read() {
            EnvHome::Detached { slots } => slots.get(idx).cloned(),
            EnvHome::Open { .. } => None,
        }
    }

    /// Replace the home with a private copy of the given slots.
    pub fn detach(&self, slots: Box<[Value]>) {
        *self.home.write() = EnvHome::Detached { slots };
    }
}

// =============================================================================
// Exceptions and plain instances
// =============================================================================

/// An exception payload: a message plus instance variables.
pub struct RException {
    pub message: RwLock<String>,
    pub ivars: RwLock<FxHashMap<Symbol, Value>>,
}

/// A generic object: just its instance variables.
pub struct RInstance {
    pub ivars: RwLock<FxHashMap<Symbol, Value>>,
}

// =============================================================================
// Constructors
// =============================================================================

impl RObject {
    fn wrap(data: ObjData) -> ObjRef {
        Arc::new(RObject {
            class: RwLock::new(None),
            data,
        })
    }

    pub fn string(s: String) -> ObjRef {
        Self::wrap(ObjData::String(RwLock::new(s)))
    }

    pub fn array(elems: Vec<Value>) -> ObjRef {
        Self::wrap(ObjData::Array(RwLock::new(elems)))
    }

    pub fn hash() -> ObjRef {
        Self::wrap(ObjData::Hash(RwLock::new(FxHashMap::default())))
    }

    pub fn range(begin: Value, end: Value, exclusive: bool) -> ObjRef {
        Self::wrap(ObjData::Range(RRange {
            begin,
            end,
            exclusive,
        }))
    }

    pub fn class(name: Option<Symbol>, super_class: Option<ObjRef>) -> ObjRef {
        Self::wrap(ObjData::Class(RClass::fresh(name, super_class, false)))
    }

    pub fn module(name: Option<Symbol>) -> ObjRef {
        Self::wrap(ObjData::Class(RClass::fresh(name, None, true)))
    }

    pub fn singleton_class(super_class: Option<ObjRef>) -> ObjRef {
        let mut c = RClass::fresh(None, super_class, false);
        c.is_singleton = true;
        Self::wrap(ObjData::Class(c))
    }

    pub fn proc_obj(
        body: ProcBody,
        target_class: Option<ObjRef>,
        strict: bool,
        env: Option<ObjRef>,
    ) -> ObjRef {
        Self::wrap(ObjData::Proc(RProc {
            body,
            target_class: RwLock::new(target_class),
            strict,
            env,
        }))
    }

    pub fn env(mid: Option<Symbol>, parent: Option<ObjRef>, len: usize, cioff: usize, base: usize) -> ObjRef {
        Self::wrap(ObjData::Env(REnv {
            mid,
            parent,
            len,
            home: RwLock::new(EnvHome::Open { cioff, base }),
        }))
    }

    pub fn exception(message: String) -> ObjRef {
        Self::wrap(ObjData::Exception(RException {
            message: RwLock::new(message),
            ivars: RwLock::new(FxHashMap::default()),
        }))
    }

    pub fn instance() -> ObjRef {
        Self::wrap(ObjData::Instance(RInstance {
            ivars: RwLock::new(FxHashMap::default()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_proc() -> ObjRef {
        RObject::proc_obj(ProcBody::Native(NativeId(0)), None, false, None)
    }

    #[test]
    fn test_method_search_walks_supers() {
        let mut t = crate::symbol::SymbolTable::new();
        let m = t.intern("m");
        let base = RObject::class(None, None);
        let derived = RObject::class(None, Some(base.clone()));

        let p = dummy_proc();
        as_class(&base).unwrap().methods.write().insert(m, p.clone());

        let (found, defining) = method_search(&derived, m).unwrap();
        assert!(Arc::ptr_eq(&found, &p));
        assert!(Arc::ptr_eq(&defining, &base));
        assert!(method_search(&derived, t.intern("absent")).is_none());
    }

    #[test]
    fn test_env_detach() {
        let e = RObject::env(None, None, 2, 5, 10);
        let env = as_env(&e).unwrap();
        assert_eq!(env.cioff(), 5);
        assert_eq!(env.detached_get(0), None);

        env.detach(vec![Value::fixnum(1), Value::fixnum(2)].into_boxed_slice());
        assert_eq!(env.cioff(), -1);
        assert!(env.is_detached());
        assert_eq!(env.detached_get(1).unwrap().as_fixnum(), Some(2));
        assert!(env.detached_get(2).is_none());
    }

    #[test]
    fn test_tags() {
        assert_eq!(RObject::string("".into()).data.tag(), ValueType::String);
        assert_eq!(RObject::module(None).data.tag(), ValueType::Module);
        assert_eq!(RObject::class(None, None).data.tag(), ValueType::Class);
    }
}
