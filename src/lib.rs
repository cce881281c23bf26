/*!
Eva, a small Lisp-like language compiled to bytecode

```text
source ─ syntax::lex ─→ tokens ─ syntax::parse ─→ Ast ─ compile::scope ─→ ScopeMap
                                                   └────── compile ──────→ CodeObject ─ vm ─→ Value
```

The [`Eva`] engine owns the object [`Heap`](vm::heap::Heap) and the [`Globals`](vm::global::Globals),
which the compiler and the VM borrow for one compile + execute session. Globals survive across
[`Eva::exec`] calls.
*/

pub mod compile;
pub mod syntax;
pub mod util;
pub mod vm;

use thiserror::Error;

use crate::{
    compile::CompileError,
    syntax::{parse::ParseError, span::ByteSpan},
    util::diag::{self, Severity},
    vm::{
        disasm::{DisasmError, Disassembler},
        global::{self, GlobalId, Globals},
        heap::{Heap, ObjectId},
        stack::Stack,
        value::Value,
        Vm, VmConfig, VmError,
    },
};

/// Any error of the pipeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Vm(#[from] VmError),
    #[error("{0}")]
    Disasm(#[from] DisasmError),
}

impl EvaError {
    /// Diagnostic code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(ParseError::Lex(_)) => "lex",
            Self::Parse(_) => "parse",
            Self::Compile(CompileError::Reference { .. }) => "reference",
            Self::Vm(VmError::Reference { .. }) => "reference",
            Self::Compile(_) => "compile",
            Self::Vm(VmError::Type { .. }) => "type",
            Self::Vm(_) => "runtime",
            Self::Disasm(_) => "disasm",
        }
    }

    /// Source location, known for syntax errors only
    pub fn span(&self) -> Option<ByteSpan> {
        match self {
            Self::Parse(err) => Some(err.span()),
            _ => None,
        }
    }

    /// Renders a colored diagnostic pointing into the source text
    pub fn render(&self, src_file: &str, src: &str) -> String {
        let msg = self.to_string();
        let header = diag::Header {
            code: self.code(),
            severity: Severity::Error,
            msg: &msg,
        };

        let window = self
            .span()
            .map(|sp| diag::Window::new(Severity::Error, src_file, src, sp));

        diag::Render { header, window }.to_string()
    }
}

/// Compiler and VM sharing one heap and one global table
#[derive(Debug)]
pub struct Eva {
    heap: Heap,
    globals: Globals,
    config: VmConfig,
}

impl Default for Eva {
    fn default() -> Self {
        Self::new()
    }
}

impl Eva {
    /// Creates an engine with the built-in globals
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::default();
        let mut globals = Globals::default();
        global::install_builtins(&mut globals, &mut heap);

        Self {
            heap,
            globals,
            config,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Registers a host function. The callback reads its arguments with [`Stack::peek`] (offset `0`
    /// is the last argument) and pushes exactly one result.
    pub fn add_native(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&mut Stack) -> Result<(), VmError> + 'static,
    ) -> GlobalId {
        self.globals
            .add_native(&mut self.heap, name, arity, Box::new(f))
    }

    /// Looks up a global by name
    pub fn global(&self, name: &str) -> Option<Value> {
        let id = self.globals.index_of(name)?;
        self.globals.get(id).and_then(|(_, value)| value)
    }

    /// Parses and compiles a program, returning the `main` code object. On failure the global table
    /// is left as it was before the call.
    pub fn compile(&mut self, src: &str) -> Result<ObjectId, EvaError> {
        let ast = syntax::parse_program(src).map_err(|err| {
            log::debug!("{}", err.detailed_message(src));
            err
        })?;
        log::debug!("parsed {} expressions", ast.len());

        let n_globals = self.globals.len();
        match compile::compile_program(&ast, &mut self.heap, &mut self.globals) {
            Ok(main) => Ok(main),
            Err(err) => {
                self.globals.truncate(n_globals);
                Err(err.into())
            }
        }
    }

    /// Runs a compiled `main` code object
    pub fn run(&mut self, main: ObjectId) -> Result<Value, EvaError> {
        let mut vm = Vm::new(&mut self.heap, &mut self.globals, self.config);
        let value = vm.run_main(main)?;
        Ok(value)
    }

    /// Compiles and runs a program
    pub fn exec(&mut self, src: &str) -> Result<Value, EvaError> {
        let main = self.compile(src)?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("\n{}", self.disassemble(main)?);
        }

        self.run(main)
    }

    /// Disassembles the code object and every function nested in it
    pub fn disassemble(&self, code: ObjectId) -> Result<String, EvaError> {
        let s = Disassembler::new(&self.heap, &self.globals).disassemble_all(code)?;
        Ok(s)
    }

    /// Renders a value the way the disassembler does (strings quoted)
    pub fn display(&self, value: Value) -> String {
        value.display(&self.heap).to_string()
    }

    /// Renders a value for output (strings unquoted)
    pub fn to_string_lossy(&self, value: Value) -> String {
        match self.heap.string_of(value) {
            Some(s) => s.to_string(),
            None => self.display(value),
        }
    }
}
