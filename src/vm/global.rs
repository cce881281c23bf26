/*!
Global table shared by the compiler (writer of indices) and the VM (reader and writer of values)

Indices are stable once assigned.
*/

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::vm::{
    heap::{Heap, NativeFn, NativeObject, Object},
    stack::Stack,
    value::{TypeTag, Value},
    VmError,
};

/// Index into the [`Globals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(usize);

impl From<usize> for GlobalId {
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}

impl From<GlobalId> for usize {
    fn from(id: GlobalId) -> Self {
        id.0
    }
}

/// Ordered `(name, value)` list. A global defined by the compiler has no value until the VM runs
/// its declaration.
#[derive(Debug, Default)]
pub struct Globals {
    vars: IndexMap<String, Option<Value>, BuildHasherDefault<FxHasher>>,
}

impl Globals {
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<GlobalId> {
        self.vars.get_index_of(name).map(GlobalId)
    }

    /// Returns `(name, value)` at the index. The value is `None` until the global is assigned.
    pub fn get(&self, id: GlobalId) -> Option<(&str, Option<Value>)> {
        self.vars
            .get_index(id.0)
            .map(|(name, value)| (name.as_str(), *value))
    }

    pub fn name(&self, id: GlobalId) -> Option<&str> {
        self.get(id).map(|(name, _)| name)
    }

    /// Returns `None` if the index is out of range
    pub fn set(&mut self, id: GlobalId, value: Value) -> Option<()> {
        let (_name, slot) = self.vars.get_index_mut(id.0)?;
        *slot = Some(value);
        Some(())
    }

    /// Defines an unassigned global, or returns the existing index
    pub fn define(&mut self, name: &str) -> GlobalId {
        if let Some(id) = self.index_of(name) {
            return id;
        }

        let (ix, _) = self.vars.insert_full(name.to_string(), None);
        GlobalId(ix)
    }

    /// Forgets every global added after the first `len` ones
    pub fn truncate(&mut self, len: usize) {
        self.vars.truncate(len);
    }

    /// Adds a numeric constant unless the name exists
    pub fn add_const(&mut self, name: &str, value: f64) -> GlobalId {
        if let Some(id) = self.index_of(name) {
            return id;
        }

        let (ix, _) = self
            .vars
            .insert_full(name.to_string(), Some(Value::Number(value)));
        GlobalId(ix)
    }

    /// Adds a native function unless the name exists
    pub fn add_native(
        &mut self,
        heap: &mut Heap,
        name: &str,
        arity: usize,
        function: NativeFn,
    ) -> GlobalId {
        if let Some(id) = self.index_of(name) {
            return id;
        }

        let native = heap.alloc(Object::Native(NativeObject {
            name: name.to_string(),
            arity,
            function,
        }));

        let (ix, _) = self
            .vars
            .insert_full(name.to_string(), Some(Value::Object(native)));
        GlobalId(ix)
    }
}

/// Installs `VERSION` and the built-in native functions
pub fn install_builtins(globals: &mut Globals, heap: &mut Heap) {
    globals.add_const("VERSION", 1.0);

    globals.add_native(
        heap,
        "square",
        1,
        Box::new(|stack: &mut Stack| {
            let x = self::number_arg(stack, "square", 0)?;
            stack.push(Value::Number(x * x))
        }),
    );

    globals.add_native(
        heap,
        "abs",
        1,
        Box::new(|stack: &mut Stack| {
            let x = self::number_arg(stack, "abs", 0)?;
            stack.push(Value::Number(x.abs()))
        }),
    );

    globals.add_native(
        heap,
        "max",
        2,
        Box::new(|stack: &mut Stack| {
            let x = self::number_arg(stack, "max", 1)?;
            let y = self::number_arg(stack, "max", 0)?;
            stack.push(Value::Number(x.max(y)))
        }),
    );

    globals.add_native(
        heap,
        "min",
        2,
        Box::new(|stack: &mut Stack| {
            let x = self::number_arg(stack, "min", 1)?;
            let y = self::number_arg(stack, "min", 0)?;
            stack.push(Value::Number(x.min(y)))
        }),
    );
}

/// Peeks a numeric argument. Offset `0` is the last argument.
fn number_arg(stack: &Stack, name: &'static str, offset: usize) -> Result<f64, VmError> {
    match stack.peek(offset)? {
        Value::Number(x) => Ok(x),
        Value::Boolean(_) => Err(VmError::Type {
            op: name,
            expected: "NUMBER",
            found: TypeTag::Boolean,
        }),
        Value::Object(_) => Err(VmError::Native {
            name: name.to_string(),
            msg: "expected a number".to_string(),
        }),
    }
}
