//! Compile-time call frame

use crate::vm::code::CodeObject;

/// Stack-allocated variable visible at the current point of code generation
#[derive(Debug, Clone)]
struct Local {
    name: String,
    /// Offset from the base pointer
    slot: usize,
    /// Block nesting level of the declaration
    level: usize,
}

/// Cell index visible at the current point of code generation
#[derive(Debug, Clone)]
struct VisibleCell {
    name: String,
    index: usize,
    level: usize,
}

/// Compile-time call frame information of the function being compiled
#[derive(Debug)]
pub struct CallFrame {
    pub co: CodeObject,
    /// Number of values above the base pointer, including the callee and the arguments
    pub depth: usize,
    /// Block nesting level. The function itself is at level zero.
    pub level: usize,
    locals: Vec<Local>,
    cells: Vec<VisibleCell>,
}

impl CallFrame {
    /// Creates a frame whose cells are all visible from the start
    pub fn new(co: CodeObject, depth: usize) -> Self {
        let cells = co
            .cell_names()
            .iter()
            .enumerate()
            .map(|(index, name)| VisibleCell {
                name: name.clone(),
                index,
                level: 0,
            })
            .collect();

        Self {
            co,
            depth,
            level: 0,
            locals: Vec::new(),
            cells,
        }
    }

    pub fn add_local(&mut self, name: &str, slot: usize) {
        self.co.add_local(name, slot);
        self.locals.push(Local {
            name: name.to_string(),
            slot,
            level: self.level,
        });
    }

    /// Slot of the innermost local with the name
    pub fn local_slot(&self, name: &str) -> Option<usize> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.slot)
    }

    /// Forgets the latest local
    pub fn drop_last_local(&mut self) {
        self.locals.pop();
    }

    /// Appends an own cell of the current block to the code object
    pub fn add_block_cell(&mut self, name: &str) -> usize {
        let index = self.co.add_cell(name);
        self.cells.push(VisibleCell {
            name: name.to_string(),
            index,
            level: self.level,
        });
        index
    }

    /// Index of the innermost cell with the name
    pub fn cell_index(&self, name: &str) -> Option<usize> {
        self.cells
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| c.index)
    }

    pub fn enter_block(&mut self) {
        self.level += 1;
    }

    /// Leaves the current block and returns the number of locals declared in it
    pub fn exit_block(&mut self) -> usize {
        let level = self.level;

        let n_locals = self.locals.iter().filter(|l| l.level == level).count();
        self.locals.retain(|l| l.level < level);
        self.cells.retain(|c| c.level < level);

        self.level = level.saturating_sub(1);
        n_locals
    }
}
