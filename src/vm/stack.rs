//! Stack

use crate::vm::{value::Value, Result, VmError};

/// Bounded stack of [`Value`] s
#[derive(Debug, Clone)]
pub struct Stack {
    values: Vec<Value>,
    limit: usize,
}

impl Stack {
    pub fn new(limit: usize) -> Self {
        Self {
            values: Vec::with_capacity(limit.min(1024)),
            limit,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Stack pointer: index of the next free slot
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.values.len() >= self.limit {
            return Err(VmError::StackOverflow);
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    /// Returns the value `offset` slots below the top. `peek(0)` is the top.
    pub fn peek(&self, offset: usize) -> Result<Value> {
        let len = self.values.len();
        if offset >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.values[len - 1 - offset])
    }

    /// Pops `n` values
    pub fn drop_n(&mut self, n: usize) -> Result<()> {
        let len = self.values.len();
        let at = len.checked_sub(n).ok_or(VmError::StackUnderflow)?;
        self.values.truncate(at);
        Ok(())
    }

    pub fn get(&self, ix: usize) -> Result<Value> {
        self.values.get(ix).copied().ok_or(VmError::StackUnderflow)
    }

    pub fn set(&mut self, ix: usize, value: Value) -> Result<()> {
        let slot = self.values.get_mut(ix).ok_or(VmError::StackUnderflow)?;
        *slot = value;
        Ok(())
    }
}
