/*!
Object arena

Objects are allocated during compilation (code objects, functions, string literals) and during
execution (concatenated strings, closures, cells). They are never freed individually; the arena is
dropped together with the engine that owns it.
*/

use std::ops;

use derivative::Derivative;
use smallvec::SmallVec;
use typed_index_collections::TiVec;

use crate::vm::{code::CodeObject, stack::Stack, value::{TypeTag, Value}, VmError};

/// Handle of an [`Object`] in the [`Heap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl From<usize> for ObjectId {
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}

impl From<ObjectId> for usize {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Host callback. Reads the arguments with [`Stack::peek`] and pushes exactly one result.
pub type NativeFn = Box<dyn Fn(&mut Stack) -> Result<(), VmError>>;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct NativeObject {
    pub name: String,
    pub arity: usize,
    #[derivative(Debug = "ignore")]
    pub function: NativeFn,
}

/// User-defined function or closure
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionObject {
    /// Handle of the [`CodeObject`]
    pub code: ObjectId,
    /// Captured cells in the order of the code object's free variables
    pub cells: SmallVec<[ObjectId; 4]>,
}

/// Heap-allocated variable shared between closures
#[derive(Debug, Clone, PartialEq)]
pub struct CellObject {
    pub value: Value,
}

#[derive(Debug)]
pub enum Object {
    String(String),
    Code(CodeObject),
    Native(NativeObject),
    Function(FunctionObject),
    Cell(CellObject),
}

impl Object {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Object::String(_) => TypeTag::String,
            Object::Code(_) => TypeTag::Code,
            Object::Native(_) => TypeTag::Native,
            Object::Function(_) => TypeTag::Function,
            Object::Cell(_) => TypeTag::Cell,
        }
    }
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: TiVec<ObjectId, Object>,
}

impl ops::Index<ObjectId> for Heap {
    type Output = Object;
    fn index(&self, id: ObjectId) -> &Self::Output {
        &self.objects[id]
    }
}

impl Heap {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, obj: Object) -> ObjectId {
        self.objects.push_and_get_key(obj)
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> Value {
        Value::Object(self.alloc(Object::String(s.into())))
    }

    pub fn alloc_cell(&mut self, value: Value) -> ObjectId {
        self.alloc(Object::Cell(CellObject { value }))
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(id)
    }

    pub fn as_string(&self, id: ObjectId) -> Option<&str> {
        match self.get(id)? {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the string if the value is a string object
    pub fn string_of(&self, value: Value) -> Option<&str> {
        self.as_string(value.as_object()?)
    }

    pub fn as_code(&self, id: ObjectId) -> Option<&CodeObject> {
        match self.get(id)? {
            Object::Code(co) => Some(co),
            _ => None,
        }
    }

    pub fn as_native(&self, id: ObjectId) -> Option<&NativeObject> {
        match self.get(id)? {
            Object::Native(native) => Some(native),
            _ => None,
        }
    }

    pub fn as_function(&self, id: ObjectId) -> Option<&FunctionObject> {
        match self.get(id)? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_cell_mut(&mut self, id: ObjectId) -> Option<&mut CellObject> {
        match self.get_mut(id)? {
            Object::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn cell_value(&self, id: ObjectId) -> Option<Value> {
        match self.get(id)? {
            Object::Cell(cell) => Some(cell.value),
            _ => None,
        }
    }

    /// Code objects in allocation order
    pub fn code_objects(&self) -> impl Iterator<Item = (ObjectId, &CodeObject)> + '_ {
        self.objects
            .iter_enumerated()
            .filter_map(|(id, obj)| match obj {
                Object::Code(co) => Some((id, co)),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_shared_by_handle() {
        let mut heap = Heap::default();
        let cell = heap.alloc_cell(Value::Number(1.0));

        if let Some(c) = heap.as_cell_mut(cell) {
            c.value = Value::Number(2.0);
        }

        assert_eq!(heap.cell_value(cell), Some(Value::Number(2.0)));
        assert_eq!(heap.as_string(cell), None);
    }

    #[test]
    fn native_debug_skips_callback() {
        let native = NativeObject {
            name: "nop".to_string(),
            arity: 0,
            function: Box::new(|_stack: &mut Stack| Ok(())),
        };
        let s = format!("{:?}", native);
        assert!(s.contains("nop"));
        assert!(!s.contains("function"));
    }
}
