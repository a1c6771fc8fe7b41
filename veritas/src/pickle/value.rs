use std::{cell::RefCell, fmt, rc::Rc};

use crate::{Tensor, storage::TypedStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRef {
    pub module: String,
    pub name: String,
}

impl GlobalRef {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    pub fn is(
        &self,
        module: &str,
        name: &str,
    ) -> bool {
        self.module == module && self.name == name
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

pub type DictItems = Rc<RefCell<Vec<(Value, Value)>>>;
pub type ListItems = Rc<RefCell<Vec<Value>>>;

/// A decoded pickle object.
///
/// Lists and dicts are shared so that memo references observe later
/// `APPEND`/`SETITEM` mutations, matching Python's object identity.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(ListItems),
    Dict(DictItems),
    Global(GlobalRef),
    /// A call the machine does not evaluate itself.
    Reduce {
        callable: GlobalRef,
        args: Vec<Value>,
    },
    Storage(TypedStorage),
    Tensor(Rc<Tensor>),
}

impl Value {
    pub fn new_dict() -> Self {
        Value::Dict(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn new_list() -> Self {
        Value::List(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Global(_) => "global",
            Value::Reduce {
                ..
            } => "reduce",
            Value::Storage(_) => "storage",
            Value::Tensor(_) => "tensor",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_clones_share_items() {
        let dict = Value::new_dict();
        let alias = dict.clone();
        if let Value::Dict(items) = &dict {
            items.borrow_mut().push((Value::String("k".into()), Value::Int(1)));
        }
        let Value::Dict(items) = alias else {
            panic!("expected dict");
        };
        assert_eq!(items.borrow().len(), 1);
    }

    #[test]
    fn globals_render_dotted() {
        let global = GlobalRef::new("torch._utils", "_rebuild_tensor_v2");
        assert_eq!(global.to_string(), "torch._utils._rebuild_tensor_v2");
        assert!(global.is("torch._utils", "_rebuild_tensor_v2"));
    }
}
