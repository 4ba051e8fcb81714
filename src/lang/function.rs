use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;

use super::exception::ExcKind;
use super::value::Value;
use crate::bytecode::decode::decode;
use crate::bytecode::decode_error::DecodeError;
use crate::bytecode::op::Instr;
use crate::bytecode::raw::RawCode;
use crate::runtime::builtins::Builtin;

/// Global namespace shared by the functions of one host module.
///
/// Lookups fall back to builtins and builtin exception classes, the way the
/// host resolves a global that the module itself does not define.
#[derive(Debug, Default)]
pub struct Globals {
    names: RefCell<IndexMap<String, Value>>,
}

impl Globals {
    pub fn new() -> Rc<Self> {
        Rc::new(Globals::default())
    }

    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.names.borrow_mut().insert(name.into(), value);
    }

    /// Register a host function under its code object's name and return its
    /// wrapper.
    pub fn define_function(self: &Rc<Self>, code: RawCode) -> Rc<FunctionWrapper> {
        let name = code.name.clone();
        let host = Rc::new(HostFunction {
            code,
            globals: Rc::downgrade(self),
        });
        let wrapper = Rc::new(FunctionWrapper::new(host));
        self.define(name, Value::Function(wrapper.clone()));
        wrapper
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.names.borrow().get(name) {
            return Some(v.clone());
        }
        if let Some(b) = Builtin::from_name(name) {
            return Some(Value::Builtin(b));
        }
        ExcKind::from_name(name).map(Value::ExcType)
    }
}

/// The host callable: its raw code object and the namespace it closes over.
///
/// The namespace is held weakly; it owns the function values that point back
/// here.
#[derive(Debug)]
pub struct HostFunction {
    pub code: RawCode,
    pub globals: Weak<Globals>,
}

impl HostFunction {
    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub fn globals(&self) -> Option<Rc<Globals>> {
        self.globals.upgrade()
    }
}

/// Stable identity of a wrapped function, used as the translation-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

static NEXT_FUNCTION_ID: AtomicU32 = AtomicU32::new(0);

/// Associates a host callable with its (lazily produced) translated form.
///
/// Translated code is not stored here: it lives in the [`crate::env::Env`]
/// cache under this wrapper's [`FunctionId`], so independently constructed
/// environments never observe each other's translations.
#[derive(Debug)]
pub struct FunctionWrapper {
    id: FunctionId,
    py_func: Rc<HostFunction>,
}

impl FunctionWrapper {
    pub fn new(py_func: Rc<HostFunction>) -> Self {
        FunctionWrapper {
            id: FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed)),
            py_func,
        }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.py_func.name()
    }

    /// The underlying host callable, for callers that skip translation.
    pub fn py_func(&self) -> &Rc<HostFunction> {
        &self.py_func
    }

    pub fn decode(&self) -> Result<Function, DecodeError> {
        Function::decode(&self.py_func)
    }
}

/// Immutable, decoded description of a callable: its operations in byte
/// order plus its ordered formal parameters.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub ops: Vec<Instr>,
    pub host: Rc<HostFunction>,
}

impl Function {
    pub fn decode(host: &Rc<HostFunction>) -> Result<Function, DecodeError> {
        let ops = decode(&host.code)?;
        Ok(Function {
            name: host.code.name.clone(),
            params: host.code.params().to_vec(),
            ops,
            host: host.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Assembler;

    fn identity() -> RawCode {
        let mut asm = Assembler::new("identity", &["x"]);
        asm.load_fast("x").ret();
        asm.finish().unwrap()
    }

    #[test]
    fn test_define_function_registers_global() {
        let module = Globals::new();
        let f = module.define_function(identity());

        match module.lookup("identity") {
            Some(Value::Function(w)) => assert!(Rc::ptr_eq(&w, &f)),
            other => panic!("expected function, got {:?}", other),
        }
        assert_eq!(f.name(), "identity");
    }

    #[test]
    fn test_lookup_falls_back_to_builtins() {
        let module = Globals::new();
        assert_eq!(module.lookup("range"), Some(Value::Builtin(Builtin::Range)));
        assert_eq!(
            module.lookup("ValueError"),
            Some(Value::ExcType(ExcKind::ValueError))
        );
        assert_eq!(module.lookup("nope"), None);
    }

    #[test]
    fn test_module_definitions_shadow_builtins() {
        let module = Globals::new();
        module.define("range", Value::Int(3));
        assert_eq!(module.lookup("range"), Some(Value::Int(3)));
    }

    #[test]
    fn test_wrappers_get_distinct_ids() {
        let module = Globals::new();
        let a = module.define_function(identity());
        let b = module.define_function(identity());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_decode_keeps_parameter_order() {
        let mut asm = Assembler::new("f", &["a", "b"]);
        asm.load_fast("b").load_fast("a").binary(crate::bytecode::op::BinOp::Sub).ret();
        let module = Globals::new();
        let f = module.define_function(asm.finish().unwrap());

        let func = f.decode().unwrap();
        assert_eq!(func.params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(func.ops.len(), 4);
    }
}
