//! Bytecode virtual machine (stack-based)

pub mod code;
pub mod disasm;
pub mod global;
pub mod heap;
pub mod stack;
pub mod value;

use smallvec::SmallVec;
use thiserror::Error;

use crate::vm::{
    code::{CodeObject, CompareOp, Op},
    global::{GlobalId, Globals},
    heap::{FunctionObject, Heap, Object, ObjectId},
    stack::Stack,
    value::{TypeTag, Value},
};

pub type Result<T, E = VmError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VmError {
    #[error("type error: {op} expected {expected}, found {found}")]
    Type {
        op: &'static str,
        expected: &'static str,
        found: TypeTag,
    },
    #[error("reference error: `{name}` is not defined")]
    Reference { name: String },
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown opcode 0x{byte:02X} at 0x{at:04X}")]
    UnknownOpcode { byte: u8, at: usize },
    #[error("{found} is not callable")]
    NotCallable { found: TypeTag },
    #[error("`{name}` takes {expected} argument(s), given {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("bad compare operator")]
    BadCompareOp,
    #[error("corrupted bytecode")]
    Corrupted,
    #[error("native function `{name}` failed: {msg}")]
    Native { name: String, msg: String },
}

/// Resource limits of the [`Vm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum number of values on the stack
    pub stack_limit: usize,
    /// Maximum call depth
    pub frame_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_limit: 1024,
            frame_limit: 1024,
        }
    }
}

/// Saved state of the caller
#[derive(Debug, Clone)]
struct Frame {
    /// Return address
    ra: usize,
    bp: usize,
    code: ObjectId,
    cells: SmallVec<[ObjectId; 4]>,
}

/// Eva bytecode virtual machine
#[derive(Debug)]
pub struct Vm<'a> {
    heap: &'a mut Heap,
    globals: &'a mut Globals,
    stack: Stack,
    frames: Vec<Frame>,
    frame_limit: usize,
    /// Instruction pointer, index into the current code object's bytes
    ip: usize,
    /// Base pointer, stack index of the current callee
    bp: usize,
    /// Current code object
    code: ObjectId,
    /// Cells of the current activation: captured ones followed by own ones
    cells: SmallVec<[ObjectId; 4]>,
}

impl<'a> Vm<'a> {
    pub fn new(heap: &'a mut Heap, globals: &'a mut Globals, config: VmConfig) -> Self {
        Self {
            heap,
            globals,
            stack: Stack::new(config.stack_limit),
            frames: Vec::new(),
            frame_limit: config.frame_limit,
            ip: 0,
            bp: 0,
            code: ObjectId::from(0),
            cells: SmallVec::new(),
        }
    }

    /// Runs the `main` code object and returns the value left on the stack
    pub fn run_main(&mut self, main: ObjectId) -> Result<Value> {
        let own_cells = self.code_object(main)?.own_cell_count();

        let f = self.heap.alloc(Object::Function(FunctionObject {
            code: main,
            cells: SmallVec::new(),
        }));

        self.stack.push(Value::Object(f))?;
        self.frames.clear();
        self.ip = 0;
        self.bp = 0;
        self.code = main;
        self.cells = (0..own_cells)
            .map(|_| self.heap.alloc_cell(Value::Boolean(false)))
            .collect();

        self.run()
    }
}

/// Fetch
impl<'a> Vm<'a> {
    fn code_object(&self, id: ObjectId) -> Result<&CodeObject> {
        self.heap.as_code(id).ok_or(VmError::Corrupted)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let x = self
            .code_object(self.code)?
            .read_u8(self.ip)
            .ok_or(VmError::Corrupted)?;
        self.ip += 1;
        Ok(x)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let x = self
            .code_object(self.code)?
            .read_u16(self.ip)
            .ok_or(VmError::Corrupted)?;
        self.ip += 2;
        Ok(x)
    }

    fn read_op(&mut self) -> Result<Op> {
        let at = self.ip;
        let byte = self.read_u8()?;
        Op::try_from(byte).map_err(|byte| VmError::UnknownOpcode { byte, at })
    }

    fn cell(&self, ix: u8) -> Result<ObjectId> {
        self.cells.get(ix as usize).copied().ok_or(VmError::Corrupted)
    }

    fn type_of(&self, value: Value) -> TypeTag {
        value.type_tag(self.heap)
    }
}

/// Run
impl<'a> Vm<'a> {
    fn run(&mut self) -> Result<Value> {
        loop {
            let at = self.ip;
            let op = self.read_op()?;
            log::trace!("{:04X} {:<16} sp={} bp={}", at, op.as_str(), self.stack.len(), self.bp);

            match op {
                Op::Halt => {
                    // the `main` function sits below the result
                    let result = if self.stack.len() > 1 {
                        self.stack.pop()?
                    } else {
                        Value::Boolean(false)
                    };
                    return Ok(result);
                }

                Op::Const => {
                    let ix = self.read_u8()?;
                    let value = self
                        .code_object(self.code)?
                        .constant(ix as usize)
                        .ok_or(VmError::Corrupted)?;
                    self.stack.push(value)?;
                }

                Op::Add => self.add()?,
                Op::Sub => self.arithmetic(op, |x, y| x - y)?,
                Op::Mul => self.arithmetic(op, |x, y| x * y)?,
                Op::Div => self.arithmetic(op, |x, y| x / y)?,

                Op::Cmp => {
                    let cmp = self.read_u8()?;
                    let cmp = CompareOp::try_from(cmp).map_err(|_| VmError::BadCompareOp)?;
                    self.compare(cmp)?;
                }

                Op::Jmp => {
                    self.ip = self.read_u16()? as usize;
                }
                Op::JmpIfFalse => {
                    let target = self.read_u16()? as usize;
                    let test = self.stack.pop()?;
                    match test {
                        Value::Boolean(true) => {}
                        Value::Boolean(false) => self.ip = target,
                        _ => {
                            return Err(VmError::Type {
                                op: op.as_str(),
                                expected: TypeTag::Boolean.as_str(),
                                found: self.type_of(test),
                            })
                        }
                    }
                }

                Op::GetGlobal => {
                    let ix = self.read_u8()?;
                    let (name, value) = self
                        .globals
                        .get(GlobalId::from(ix as usize))
                        .ok_or(VmError::Corrupted)?;
                    let value = value.ok_or_else(|| VmError::Reference {
                        name: name.to_string(),
                    })?;
                    self.stack.push(value)?;
                }
                Op::SetGlobal => {
                    let ix = self.read_u8()?;
                    let value = self.stack.peek(0)?;
                    self.globals
                        .set(GlobalId::from(ix as usize), value)
                        .ok_or(VmError::Corrupted)?;
                }

                Op::Pop => {
                    self.stack.pop()?;
                }

                Op::GetLocal => {
                    let ix = self.read_u8()? as usize;
                    let value = self.stack.get(self.bp + ix)?;
                    self.stack.push(value)?;
                }
                Op::SetLocal => {
                    let ix = self.read_u8()? as usize;
                    let value = self.stack.peek(0)?;
                    self.stack.set(self.bp + ix, value)?;
                }

                Op::ScopeExit => {
                    let n = self.read_u8()? as usize;
                    if n > 0 {
                        // keep the block result on top
                        let result = self.stack.pop()?;
                        self.stack.drop_n(n)?;
                        self.stack.push(result)?;
                    }
                }

                Op::Call => {
                    let argc = self.read_u8()? as usize;
                    self.call(argc)?;
                }
                Op::Return => {
                    let frame = self.frames.pop().ok_or(VmError::Corrupted)?;
                    self.ip = frame.ra;
                    self.bp = frame.bp;
                    self.code = frame.code;
                    self.cells = frame.cells;
                }

                Op::GetCell => {
                    let cell = self.read_u8().and_then(|ix| self.cell(ix))?;
                    let value = self.heap.cell_value(cell).ok_or(VmError::Corrupted)?;
                    self.stack.push(value)?;
                }
                Op::SetCell => {
                    let cell = self.read_u8().and_then(|ix| self.cell(ix))?;
                    let value = self.stack.peek(0)?;
                    let cell = self.heap.as_cell_mut(cell).ok_or(VmError::Corrupted)?;
                    cell.value = value;
                }
                Op::LoadCell => {
                    let cell = self.read_u8().and_then(|ix| self.cell(ix))?;
                    self.stack.push(Value::Object(cell))?;
                }

                Op::MakeFunction => {
                    let n = self.read_u8()? as usize;
                    self.make_function(n)?;
                }
            }
        }
    }

    fn add(&mut self) -> Result<()> {
        let y = self.stack.pop()?;
        let x = self.stack.pop()?;

        if let (Value::Number(x), Value::Number(y)) = (x, y) {
            return self.stack.push(Value::Number(x + y));
        }

        let s = match (self.heap.string_of(x), self.heap.string_of(y)) {
            (Some(x), Some(y)) => format!("{}{}", x, y),
            (Some(_), None) => return Err(self.type_error(Op::Add, TypeTag::String, y)),
            (None, _) if matches!(x, Value::Number(_)) => {
                return Err(self.type_error(Op::Add, TypeTag::Number, y))
            }
            (None, _) => return Err(self.type_error(Op::Add, TypeTag::Number, x)),
        };

        let value = self.heap.alloc_string(s);
        self.stack.push(value)
    }

    fn arithmetic(&mut self, op: Op, apply: impl Fn(f64, f64) -> f64) -> Result<()> {
        let y = self.stack.pop()?;
        let x = self.stack.pop()?;

        match (x, y) {
            (Value::Number(x), Value::Number(y)) => self.stack.push(Value::Number(apply(x, y))),
            (Value::Number(_), _) => Err(self.type_error(op, TypeTag::Number, y)),
            _ => Err(self.type_error(op, TypeTag::Number, x)),
        }
    }

    fn compare(&mut self, cmp: CompareOp) -> Result<()> {
        let y = self.stack.pop()?;
        let x = self.stack.pop()?;

        let b = match (x, y) {
            (Value::Number(x), Value::Number(y)) => cmp.apply(&x, &y),
            (Value::Boolean(x), Value::Boolean(y)) if matches!(cmp, CompareOp::Eq | CompareOp::Ne) => {
                cmp.apply(&x, &y)
            }
            (Value::Boolean(_), _) => return Err(self.type_error(Op::Cmp, TypeTag::Number, x)),
            _ => match (self.heap.string_of(x), self.heap.string_of(y)) {
                (Some(x), Some(y)) => cmp.apply(x, y),
                (Some(_), None) => return Err(self.type_error(Op::Cmp, TypeTag::String, y)),
                (None, _) if matches!(x, Value::Number(_)) => {
                    return Err(self.type_error(Op::Cmp, TypeTag::Number, y))
                }
                (None, _) => return Err(self.type_error(Op::Cmp, TypeTag::Number, x)),
            },
        };

        self.stack.push(Value::Boolean(b))
    }

    fn type_error(&self, op: Op, expected: TypeTag, found: Value) -> VmError {
        VmError::Type {
            op: op.as_str(),
            expected: expected.as_str(),
            found: self.type_of(found),
        }
    }

    fn call(&mut self, argc: usize) -> Result<()> {
        let callee = self.stack.peek(argc)?;
        let id = match callee {
            Value::Object(id) => id,
            _ => {
                return Err(VmError::NotCallable {
                    found: self.type_of(callee),
                })
            }
        };

        match self.heap.get(id) {
            Some(Object::Native(native)) => {
                if native.arity != argc {
                    return Err(VmError::Arity {
                        name: native.name.clone(),
                        expected: native.arity,
                        found: argc,
                    });
                }

                let sp = self.stack.len();
                (native.function)(&mut self.stack)?;

                if self.stack.len() != sp + 1 {
                    return Err(VmError::Native {
                        name: native.name.clone(),
                        msg: "must push exactly one value".to_string(),
                    });
                }

                let result = self.stack.pop()?;
                self.stack.drop_n(argc + 1)?;
                self.stack.push(result)
            }
            Some(Object::Function(f)) => {
                let f = f.clone();
                self.call_function(f, argc)
            }
            _ => Err(VmError::NotCallable {
                found: self.type_of(callee),
            }),
        }
    }

    fn call_function(&mut self, f: FunctionObject, argc: usize) -> Result<()> {
        let co = self.code_object(f.code)?;
        if co.arity != argc {
            return Err(VmError::Arity {
                name: co.name.clone(),
                expected: co.arity,
                found: argc,
            });
        }
        let own_cells = co.own_cell_count();

        if self.frames.len() >= self.frame_limit {
            return Err(VmError::StackOverflow);
        }

        let mut cells = f.cells;
        for _ in 0..own_cells {
            cells.push(self.heap.alloc_cell(Value::Boolean(false)));
        }

        self.frames.push(Frame {
            ra: self.ip,
            bp: self.bp,
            code: self.code,
            cells: std::mem::replace(&mut self.cells, cells),
        });

        self.ip = 0;
        self.bp = self.stack.len() - argc - 1;
        self.code = f.code;

        Ok(())
    }

    /// Pops a code object and `n` cells, pushes a closure
    fn make_function(&mut self, n: usize) -> Result<()> {
        let code = self.stack.pop()?;
        let code = code
            .as_object()
            .filter(|id| self.heap.as_code(*id).is_some())
            .ok_or(VmError::Corrupted)?;

        let sp = self.stack.len();
        let base = sp.checked_sub(n).ok_or(VmError::StackUnderflow)?;
        let cells = self.stack.values()[base..]
            .iter()
            .map(|v| v.as_object().ok_or(VmError::Corrupted))
            .collect::<Result<SmallVec<[ObjectId; 4]>>>()?;
        self.stack.drop_n(n)?;

        let f = self.heap.alloc(Object::Function(FunctionObject { code, cells }));
        self.stack.push(Value::Object(f))
    }
}
