//! Runtime value

use std::fmt;

use crate::vm::heap::{Heap, Object, ObjectId};

/// Value on the VM stack, in a constant pool or in a global slot. Objects are referred to by handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    Object(ObjectId),
}

/// Visible type tag of a [`Value`]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TypeTag {
    Number,
    Boolean,
    String,
    Code,
    Native,
    Function,
    Cell,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Number => "NUMBER",
            TypeTag::Boolean => "BOOLEAN",
            TypeTag::String => "STRING",
            TypeTag::Code => "CODE",
            TypeTag::Native => "NATIVE",
            TypeTag::Function => "FUNCTION",
            TypeTag::Cell => "CELL",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Number(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Self::Boolean(x)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

impl Value {
    pub fn type_tag(&self, heap: &Heap) -> TypeTag {
        match self {
            Value::Number(_) => TypeTag::Number,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Object(id) => heap[*id].type_tag(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns a formatter that renders the value with heap contents
    pub fn display<'a>(&self, heap: &'a Heap) -> ValueDisplay<'a> {
        ValueDisplay { value: *self, heap }
    }

    /// Renders as `EvaValue (<TYPE>): <value>`
    pub fn debug_string(&self, heap: &Heap) -> String {
        format!("EvaValue ({}): {}", self.type_tag(heap), self.display(heap))
    }
}

/// See [`Value::display`]
#[derive(Debug, Clone, Copy)]
pub struct ValueDisplay<'a> {
    value: Value,
    heap: &'a Heap,
}

impl<'a> fmt::Display for ValueDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            // `f64` prints without the fraction part when it's integral
            Value::Number(x) => write!(f, "{}", x),
            Value::Boolean(x) => write!(f, "{}", x),
            Value::Object(id) => match &self.heap[id] {
                Object::String(s) => write!(f, "\"{}\"", s),
                Object::Code(co) => write!(f, "<code {}>", co.name),
                Object::Native(native) => write!(f, "<native {}/{}>", native.name, native.arity),
                Object::Function(fun) => {
                    let co = self.heap.as_code(fun.code);
                    match co {
                        Some(co) => write!(f, "<fn {}/{}>", co.name, co.arity),
                        None => write!(f, "<fn ?>"),
                    }
                }
                Object::Cell(cell) => write!(f, "<cell {}>", cell.value.display(self.heap)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::code::CodeObject;

    #[test]
    fn value_size() {
        assert_eq!(16, std::mem::size_of::<Value>());
    }

    #[test]
    fn render() {
        let mut heap = Heap::default();
        let s = heap.alloc_string("hi");
        let co = heap.alloc(Object::Code(CodeObject::new("main", 0)));

        assert_eq!(Value::Number(15.0).display(&heap).to_string(), "15");
        assert_eq!(Value::Number(2.5).display(&heap).to_string(), "2.5");
        assert_eq!(Value::Boolean(true).display(&heap).to_string(), "true");
        assert_eq!(s.display(&heap).to_string(), "\"hi\"");
        assert_eq!(Value::Object(co).display(&heap).to_string(), "<code main>");
        assert_eq!(
            Value::Number(1.0).debug_string(&heap),
            "EvaValue (NUMBER): 1"
        );
        assert_eq!(s.type_tag(&heap), TypeTag::String);
    }
}
