//! Compiler (AST → bytecode)
//!
//! The compiler walks the AST with the [`ScopeMap`] computed beforehand and emits one
//! [`CodeObject`] per function, including the implicit `main` function. Code objects are moved into
//! the [`Heap`] when their function is finished.

pub mod frame;
pub mod scope;

use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    compile::{
        frame::CallFrame,
        scope::{AllocKind, ScopeId, ScopeKind, ScopeMap},
    },
    syntax::ast::{Ast, Exp, ExpData},
    vm::{
        code::{CodeObject, CompareOp, Op},
        global::{GlobalId, Globals},
        heap::{FunctionObject, Heap, Object, ObjectId},
        value::Value,
    },
};

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("reference error: `{name}` is not defined")]
    Reference { name: String },
    #[error("too many constants in `{function}`")]
    TooManyConstants { function: String },
    #[error("too many local variables in `{function}`")]
    TooManyLocals { function: String },
    #[error("too many global variables")]
    TooManyGlobals,
    #[error("jump target too far in `{function}`")]
    JumpTooFar { function: String },
    #[error("malformed `{form}`: {reason}")]
    Malformed { form: String, reason: &'static str },
    #[error("captured variable `{name}` is not in scope")]
    UnresolvedCell { name: String },
}

/// Analyzes the program and compiles it into the `main` code object
pub fn compile_program(ast: &Ast, heap: &mut Heap, globals: &mut Globals) -> Result<ObjectId> {
    let scopes = ScopeMap::analyze(ast);
    Compiler::new(ast, &scopes, heap, globals).compile_main()
}

/// What a form leaves on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// One result value
    Value,
    /// One value that is a live local at the slot
    Slot(usize),
    /// Nothing; the value was stored in the cell
    Stored(usize),
}

pub struct Compiler<'a> {
    ast: &'a Ast,
    scopes: &'a ScopeMap,
    heap: &'a mut Heap,
    globals: &'a mut Globals,
    /// Active scopes mirroring the AST traversal
    scope_stack: Vec<ScopeId>,
    /// Functions being compiled, innermost last
    frames: Vec<CallFrame>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        ast: &'a Ast,
        scopes: &'a ScopeMap,
        heap: &'a mut Heap,
        globals: &'a mut Globals,
    ) -> Self {
        Self {
            ast,
            scopes,
            heap,
            globals,
            scope_stack: vec![scopes.root()],
            frames: Vec::new(),
        }
    }

    /// Compiles the AST root as the body of `main`
    pub fn compile_main(mut self) -> Result<ObjectId> {
        // slot 0 holds the `main` function itself
        self.frames.push(CallFrame::new(CodeObject::new("main", 0), 1));

        self.gen(self.ast.root())?;
        self.emit(Op::Halt);

        let frame = self.pop_frame()?;
        log::debug!(
            "compiled `main`: {} bytes, {} constants",
            frame.co.bytes().len(),
            frame.co.constants().len()
        );

        Ok(self.heap.alloc(Object::Code(frame.co)))
    }
}

/// Emitter
impl<'a> Compiler<'a> {
    fn frame(&mut self) -> &mut CallFrame {
        // `frames` is never empty while generating code
        let i = self.frames.len() - 1;
        &mut self.frames[i]
    }

    fn pop_frame(&mut self) -> Result<CallFrame> {
        self.frames.pop().ok_or(CompileError::Malformed {
            form: String::new(),
            reason: "function nesting mismatch",
        })
    }

    fn function_name(&self) -> String {
        self.frames
            .last()
            .map(|f| f.co.name.clone())
            .unwrap_or_default()
    }

    fn current_scope(&self) -> ScopeId {
        self.scope_stack
            .last()
            .copied()
            .unwrap_or_else(|| self.scopes.root())
    }

    fn emit(&mut self, op: Op) {
        self.frame().co.write_code(op);
    }

    fn emit_u8(&mut self, op: Op, arg: u8) {
        let co = &mut self.frame().co;
        co.write_code(op);
        co.write_u8(arg);
    }

    /// Emits a jump with a placeholder target and returns the operand offset
    fn emit_jump(&mut self, op: Op) -> usize {
        let co = &mut self.frame().co;
        co.write_code(op);
        let at = co.offset();
        co.write_u16(0);
        at
    }

    fn address(&self, offset: usize) -> Result<u16> {
        u16::try_from(offset).map_err(|_| CompileError::JumpTooFar {
            function: self.function_name(),
        })
    }

    /// Patches the jump operand to the current offset
    fn patch_jump(&mut self, at: usize) -> Result<()> {
        let target = self.address(self.frames.last().map_or(0, |f| f.co.offset()))?;
        self.frame().co.patch_u16(at, target);
        Ok(())
    }

    fn push_depth(&mut self, n: usize) {
        self.frame().depth += n;
    }

    fn pop_depth(&mut self, n: usize) {
        let frame = self.frame();
        frame.depth = frame.depth.saturating_sub(n);
    }

    /// Emits `CONST` with a deduplicated constant index
    fn emit_const(&mut self, value: Value) -> Result<()> {
        let ix = self.constant_index(value)?;
        self.emit_u8(Op::Const, ix);
        self.push_depth(1);
        Ok(())
    }

    fn constant_index(&mut self, value: Value) -> Result<u8> {
        let heap = &*self.heap;
        let co = &self.frames[self.frames.len() - 1].co;

        let found = co.constants().iter().position(|c| match (c, &value) {
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Object(x), Value::Object(y)) if x == y => true,
            (Value::Object(x), Value::Object(y)) => {
                matches!((heap.as_string(*x), heap.as_string(*y)), (Some(a), Some(b)) if a == b)
            }
            _ => false,
        });

        let ix = match found {
            Some(ix) => ix,
            None => self.frame().co.push_constant(value),
        };

        u8::try_from(ix).map_err(|_| CompileError::TooManyConstants {
            function: self.function_name(),
        })
    }

    fn local_operand(&self, slot: usize) -> Result<u8> {
        u8::try_from(slot).map_err(|_| CompileError::TooManyLocals {
            function: self.function_name(),
        })
    }

    fn global_operand(&self, id: GlobalId) -> Result<u8> {
        u8::try_from(usize::from(id)).map_err(|_| CompileError::TooManyGlobals)
    }

    fn count_operand(&self, n: usize, form: Exp, reason: &'static str) -> Result<u8> {
        u8::try_from(n).map_err(|_| self.malformed(form, reason))
    }

    fn malformed(&self, exp: Exp, reason: &'static str) -> CompileError {
        CompileError::Malformed {
            form: self.ast.pretty(exp),
            reason,
        }
    }
}

/// Variable access
impl<'a> Compiler<'a> {
    fn resolve(&self, name: &str) -> AllocKind {
        self.scopes.resolve(self.current_scope(), name)
    }

    fn resolve_ref(&self, exp: Exp, name: &str) -> AllocKind {
        self.scopes.resolve_ref(exp, self.current_scope(), name)
    }

    /// Global index of a defined name. Names declared at top level are defined (unassigned) on first
    /// use so that functions can refer to globals defined later.
    fn global_index(&mut self, name: &str) -> Result<u8> {
        let id = match self.globals.index_of(name) {
            Some(id) => id,
            None if self.scopes.is_global_decl(name) => self.globals.define(name),
            None => {
                return Err(CompileError::Reference {
                    name: name.to_string(),
                })
            }
        };
        self.global_operand(id)
    }

    fn local_index(&mut self, name: &str) -> Result<u8> {
        let slot = self
            .frame()
            .local_slot(name)
            .ok_or_else(|| CompileError::Reference {
                name: name.to_string(),
            })?;
        self.local_operand(slot)
    }

    fn cell_index(&mut self, name: &str) -> Result<u8> {
        let ix = self
            .frame()
            .cell_index(name)
            .ok_or_else(|| CompileError::UnresolvedCell {
                name: name.to_string(),
            })?;
        self.local_operand(ix)
    }

    fn gen_get(&mut self, exp: Exp, name: &str) -> Result<()> {
        match self.resolve_ref(exp, name) {
            AllocKind::Global => {
                let ix = self.global_index(name)?;
                self.emit_u8(Op::GetGlobal, ix);
            }
            AllocKind::Local => {
                let ix = self.local_index(name)?;
                self.emit_u8(Op::GetLocal, ix);
            }
            AllocKind::Cell => {
                let ix = self.cell_index(name)?;
                self.emit_u8(Op::GetCell, ix);
            }
        }
        self.push_depth(1);
        Ok(())
    }

    /// Stores the top value into an existing variable, leaving it on the stack
    fn gen_set(&mut self, target: Exp, name: &str) -> Result<()> {
        match self.resolve_ref(target, name) {
            AllocKind::Global => {
                let ix = self.global_index(name)?;
                self.emit_u8(Op::SetGlobal, ix);
            }
            AllocKind::Local => {
                let ix = self.local_index(name)?;
                self.emit_u8(Op::SetLocal, ix);
            }
            AllocKind::Cell => {
                let ix = self.cell_index(name)?;
                self.emit_u8(Op::SetCell, ix);
            }
        }
        Ok(())
    }

    /// Binds the top value to a new variable declared in the current scope
    fn gen_declare(&mut self, exp: Exp, name: &str, stmt: bool) -> Result<Effect> {
        match self.resolve(name) {
            AllocKind::Global => {
                let id = self.globals.define(name);
                let ix = self.global_operand(id)?;
                self.emit_u8(Op::SetGlobal, ix);
                Ok(Effect::Value)
            }
            AllocKind::Cell => {
                let ix = self.cell_index(name)?;
                self.emit_u8(Op::SetCell, ix);
                self.emit(Op::Pop);
                self.pop_depth(1);

                if stmt {
                    Ok(Effect::Stored(ix as usize))
                } else {
                    self.emit_u8(Op::GetCell, ix);
                    self.push_depth(1);
                    Ok(Effect::Value)
                }
            }
            AllocKind::Local => {
                if !stmt {
                    return Err(self.malformed(exp, "local declaration must appear directly in a block"));
                }

                let frame = self.frame();
                let slot = frame.depth.saturating_sub(1);
                frame.add_local(name, slot);

                let ix = self.local_operand(slot)?;
                self.emit_u8(Op::SetLocal, ix);
                Ok(Effect::Slot(slot))
            }
        }
    }
}

/// Code generation
impl<'a> Compiler<'a> {
    /// Generates an expression that leaves exactly one value on the stack
    fn gen(&mut self, exp: Exp) -> Result<()> {
        self.gen_form(exp, false).map(|_| ())
    }

    /// Generates a direct child of a block, which may declare a stack local
    fn gen_stmt(&mut self, exp: Exp) -> Result<Effect> {
        self.gen_form(exp, true)
    }

    fn gen_form(&mut self, exp: Exp, stmt: bool) -> Result<Effect> {
        let ast = self.ast;

        let xs = match &ast[exp] {
            ExpData::Number(x) => {
                self.emit_const(Value::Number(*x))?;
                return Ok(Effect::Value);
            }
            ExpData::String(s) => {
                let value = self.heap.alloc_string(s.as_str());
                self.emit_const(value)?;
                return Ok(Effect::Value);
            }
            ExpData::Symbol(name) => {
                match name.as_str() {
                    "true" => self.emit_const(Value::Boolean(true))?,
                    "false" => self.emit_const(Value::Boolean(false))?,
                    _ => self.gen_get(exp, name)?,
                }
                return Ok(Effect::Value);
            }
            ExpData::List(xs) => xs.as_slice(),
        };

        let head = match xs.first() {
            Some(head) => *head,
            None => return Err(self.malformed(exp, "empty application")),
        };

        match ast[head].as_symbol() {
            Some("begin") => {
                self.gen_begin(exp, &xs[1..], false)?;
                Ok(Effect::Value)
            }
            Some("var") => self.gen_var(exp, xs, stmt),
            Some("set") => {
                self.gen_assign(exp, xs)?;
                Ok(Effect::Value)
            }
            Some("if") => {
                self.gen_if(exp, xs)?;
                Ok(Effect::Value)
            }
            Some("while") => {
                self.gen_while(exp, xs)?;
                Ok(Effect::Value)
            }
            Some("for") => {
                self.gen_for(exp, xs)?;
                Ok(Effect::Value)
            }
            Some("def") => self.gen_def(exp, xs, stmt),
            Some("lambda") => {
                let (params, body) = self.lambda_parts(exp, &xs[1..])?;
                self.gen_function(exp, "lambda", params, body)?;
                Ok(Effect::Value)
            }
            Some(op @ ("+" | "-" | "*" | "/")) => {
                let op = match op {
                    "+" => Op::Add,
                    "-" => Op::Sub,
                    "*" => Op::Mul,
                    _ => Op::Div,
                };
                self.gen_binary(exp, xs, op, None)?;
                Ok(Effect::Value)
            }
            Some(op) if CompareOp::from_symbol(op).is_some() => {
                let cmp = CompareOp::from_symbol(op);
                self.gen_binary(exp, xs, Op::Cmp, cmp)?;
                Ok(Effect::Value)
            }
            _ => {
                self.gen_call(exp, xs)?;
                Ok(Effect::Value)
            }
        }
    }

    fn gen_binary(&mut self, exp: Exp, xs: &[Exp], op: Op, cmp: Option<CompareOp>) -> Result<()> {
        if xs.len() != 3 {
            return Err(self.malformed(exp, "binary operator takes two operands"));
        }

        self.gen(xs[1])?;
        self.gen(xs[2])?;

        match cmp {
            Some(cmp) => self.emit_u8(op, cmp as u8),
            None => self.emit(op),
        }
        self.pop_depth(1);

        Ok(())
    }

    /// `(begin exp..)`
    fn gen_begin(&mut self, exp: Exp, body: &[Exp], fn_body: bool) -> Result<()> {
        let scopes = self.scopes;
        let scope = scopes
            .scope_for_exp(exp)
            .ok_or_else(|| self.malformed(exp, "block without scope"))?;

        let pushed = scope != self.current_scope();
        if pushed {
            self.scope_stack.push(scope);
        }

        self.frame().enter_block();
        let data = scopes.scope(scope);
        if data.kind == ScopeKind::Block {
            for name in data.cells() {
                self.frame().add_block_cell(name);
            }
        }

        if body.is_empty() {
            self.emit_const(Value::Boolean(false))?;
        }

        for (i, x) in body.iter().enumerate() {
            let last = i + 1 == body.len();
            match (self.gen_stmt(*x)?, last) {
                (Effect::Value, false) => {
                    self.emit(Op::Pop);
                    self.pop_depth(1);
                }
                (Effect::Value, true) => {}
                (Effect::Slot(_), false) | (Effect::Stored(_), false) => {}
                (Effect::Slot(slot), true) => {
                    let ix = self.local_operand(slot)?;
                    self.emit_u8(Op::GetLocal, ix);
                    self.push_depth(1);
                }
                (Effect::Stored(cell), true) => {
                    let ix = self.local_operand(cell)?;
                    self.emit_u8(Op::GetCell, ix);
                    self.push_depth(1);
                }
            }
        }

        self.scope_exit(exp, fn_body)?;

        if pushed {
            self.scope_stack.pop();
        }

        Ok(())
    }

    /// Drops the locals of the current block, keeping the block result on top
    fn scope_exit(&mut self, exp: Exp, fn_body: bool) -> Result<()> {
        let frame = self.frame();
        let mut n = frame.exit_block();
        if fn_body {
            n += frame.co.arity + 1;
        }

        if n > 0 {
            let arg = self.count_operand(n, exp, "too many locals in a block")?;
            self.emit_u8(Op::ScopeExit, arg);
            self.pop_depth(n);
        }

        Ok(())
    }

    /// `(var name value)`
    fn gen_var(&mut self, exp: Exp, xs: &[Exp], stmt: bool) -> Result<Effect> {
        let ast = self.ast;
        if xs.len() != 3 {
            return Err(self.malformed(exp, "expected `(var name value)`"));
        }

        let name = ast[xs[1]]
            .as_symbol()
            .ok_or_else(|| self.malformed(exp, "variable name must be a symbol"))?;

        let init = xs[2];
        if ast.is_tagged(init, "lambda") {
            let lambda = ast[init].as_list().unwrap_or(&[]);
            let (params, body) = self.lambda_parts(init, lambda.get(1..).unwrap_or(&[]))?;
            self.gen_function(init, name, params, body)?;
        } else {
            self.gen(init)?;
        }

        self.gen_declare(exp, name, stmt)
    }

    /// `(set name value)`
    fn gen_assign(&mut self, exp: Exp, xs: &[Exp]) -> Result<()> {
        if xs.len() != 3 {
            return Err(self.malformed(exp, "expected `(set name value)`"));
        }

        let ast = self.ast;
        let name = ast[xs[1]]
            .as_symbol()
            .ok_or_else(|| self.malformed(exp, "assignment target must be a symbol"))?;

        self.gen(xs[2])?;
        self.gen_set(xs[1], name)
    }

    /// `(if test consequent [alternate])`
    fn gen_if(&mut self, exp: Exp, xs: &[Exp]) -> Result<()> {
        if !(3..=4).contains(&xs.len()) {
            return Err(self.malformed(exp, "expected `(if test consequent [alternate])`"));
        }

        self.gen(xs[1])?;
        let else_jump = self.emit_jump(Op::JmpIfFalse);
        self.pop_depth(1);

        let depth = self.frame().depth;
        self.gen(xs[2])?;
        let end_jump = self.emit_jump(Op::Jmp);

        self.patch_jump(else_jump)?;
        self.frame().depth = depth;

        match xs.get(3) {
            Some(alt) => self.gen(*alt)?,
            None => self.emit_const(Value::Boolean(false))?,
        }

        self.patch_jump(end_jump)
    }

    /// `(while test body)`
    fn gen_while(&mut self, exp: Exp, xs: &[Exp]) -> Result<()> {
        if xs.len() != 3 {
            return Err(self.malformed(exp, "expected `(while test body)`"));
        }

        let start = self.frame().co.offset();
        self.gen_loop(start, xs[1], xs[2], None)
    }

    /// `(for init test modifier body)`
    fn gen_for(&mut self, exp: Exp, xs: &[Exp]) -> Result<()> {
        if xs.len() != 5 {
            return Err(self.malformed(exp, "expected `(for init test modifier body)`"));
        }

        let init = self.gen_stmt(xs[1])?;
        if init == Effect::Value {
            self.emit(Op::Pop);
            self.pop_depth(1);
        }

        let start = self.frame().co.offset();
        self.gen_loop(start, xs[2], xs[4], Some(xs[3]))?;

        // the loop variable lives until the end of the loop
        if let Effect::Slot(_) = init {
            self.emit_u8(Op::ScopeExit, 1);
            self.pop_depth(1);
            self.frame().drop_last_local();
        }

        Ok(())
    }

    /// Loop body shared by `while` and `for`. Evaluates to `false`.
    fn gen_loop(&mut self, start: usize, test: Exp, body: Exp, modifier: Option<Exp>) -> Result<()> {
        self.gen(test)?;
        let exit_jump = self.emit_jump(Op::JmpIfFalse);
        self.pop_depth(1);

        self.gen(body)?;
        self.emit(Op::Pop);
        self.pop_depth(1);

        if let Some(modifier) = modifier {
            self.gen(modifier)?;
            self.emit(Op::Pop);
            self.pop_depth(1);
        }

        let start = self.address(start)?;
        self.emit(Op::Jmp);
        self.frame().co.write_u16(start);

        self.patch_jump(exit_jump)?;
        self.emit_const(Value::Boolean(false))
    }

    /// `(def name (params..) body)`
    fn gen_def(&mut self, exp: Exp, xs: &[Exp], stmt: bool) -> Result<Effect> {
        if xs.len() != 4 {
            return Err(self.malformed(exp, "expected `(def name (params..) body)`"));
        }

        let ast = self.ast;
        let name = ast[xs[1]]
            .as_symbol()
            .ok_or_else(|| self.malformed(exp, "function name must be a symbol"))?;

        let (params, body) = self.lambda_parts(exp, &xs[2..])?;
        self.gen_function(exp, name, params, body)?;
        self.gen_declare(exp, name, stmt)
    }

    /// Splits `(params..) body`
    fn lambda_parts(&self, exp: Exp, xs: &[Exp]) -> Result<(&'a [Exp], Exp)> {
        let ast = self.ast;
        match xs {
            [params, body] => {
                let params = ast[*params]
                    .as_list()
                    .ok_or_else(|| self.malformed(exp, "parameters must be a list"))?;
                Ok((params, *body))
            }
            _ => Err(self.malformed(exp, "expected parameters and a body")),
        }
    }

    /// Compiles a function body into a new code object and pushes the function value
    fn gen_function(&mut self, exp: Exp, name: &str, params: &[Exp], body: Exp) -> Result<()> {
        let ast = self.ast;
        let scopes = self.scopes;
        let fn_scope = scopes
            .scope_for_exp(exp)
            .ok_or_else(|| self.malformed(exp, "function without scope"))?;
        let data = scopes.scope(fn_scope);

        let params = params
            .iter()
            .map(|p| ast[*p].as_symbol())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.malformed(exp, "parameter must be a symbol"))?;
        let arity = params.len();

        let mut co = CodeObject::new(name, arity);
        co.set_free_vars(data.free().iter().cloned());
        for cell in data.cells() {
            co.add_cell(cell.as_str());
        }

        let mut frame = CallFrame::new(co, arity + 1);
        frame.add_local(name, 0);
        for (i, param) in params.iter().enumerate() {
            frame.add_local(param, i + 1);
        }

        self.frames.push(frame);
        self.scope_stack.push(fn_scope);

        // move captured parameters (and the function itself) to their cells
        let own = std::iter::once(name).chain(params.iter().copied());
        for (slot, var) in own.enumerate() {
            if data.declares(var) && data.cells().contains(var) {
                let slot = self.local_operand(slot)?;
                let cell = self.cell_index(var)?;
                self.emit_u8(Op::GetLocal, slot);
                self.emit_u8(Op::SetCell, cell);
                self.emit(Op::Pop);
            }
        }

        if ast.is_tagged(body, "begin") {
            let xs = ast[body].as_list().unwrap_or(&[]);
            self.gen_begin(body, xs.get(1..).unwrap_or(&[]), true)?;
        } else {
            self.gen(body)?;
            let n = self.count_operand(arity + 1, exp, "too many parameters")?;
            self.emit_u8(Op::ScopeExit, n);
        }
        self.emit(Op::Return);

        self.scope_stack.pop();
        let frame = self.pop_frame()?;
        let co = frame.co;

        log::debug!(
            "compiled `{}/{}`: {} bytes, {} cells ({} free)",
            co.name,
            co.arity,
            co.bytes().len(),
            co.cell_names().len(),
            co.free_count()
        );

        let free = co.cell_names()[..co.free_count()].to_vec();
        let code = self.heap.alloc(Object::Code(co));

        if free.is_empty() {
            let f = self.heap.alloc(Object::Function(FunctionObject {
                code,
                cells: SmallVec::new(),
            }));
            return self.emit_const(Value::Object(f));
        }

        for var in &free {
            let ix = self.cell_index(var)?;
            self.emit_u8(Op::LoadCell, ix);
            self.push_depth(1);
        }

        self.emit_const(Value::Object(code))?;

        let n = self.count_operand(free.len(), exp, "too many captured variables")?;
        self.emit_u8(Op::MakeFunction, n);
        self.pop_depth(free.len());

        Ok(())
    }

    /// `(callee args..)`
    fn gen_call(&mut self, exp: Exp, xs: &[Exp]) -> Result<()> {
        for x in xs {
            self.gen(*x)?;
        }

        let argc = xs.len() - 1;
        let n = self.count_operand(argc, exp, "too many arguments")?;
        self.emit_u8(Op::Call, n);
        self.pop_depth(argc);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        syntax::parse_program,
        vm::disasm::{self, Instruction},
    };

    fn compile(src: &str) -> Result<(Heap, Globals, ObjectId)> {
        let ast = parse_program(src).unwrap_or_else(|err| panic!("{}", err));
        let mut heap = Heap::default();
        let mut globals = Globals::default();
        let main = compile_program(&ast, &mut heap, &mut globals)?;
        Ok((heap, globals, main))
    }

    fn ops(heap: &Heap, code: ObjectId) -> Vec<(Op, Option<u8>)> {
        let co = heap.as_code(code).unwrap();
        disasm::decode(co)
            .unwrap()
            .iter()
            .map(|i: &Instruction| (i.op, i.arg()))
            .collect()
    }

    #[test]
    fn constants_are_deduplicated() {
        let (heap, _globals, main) = compile(r#"(+ 1 1) (+ "a" "a") (== true true)"#).unwrap();
        let co = heap.as_code(main).unwrap();
        // 1, "a", true
        assert_eq!(co.constants().len(), 3);
    }

    #[test]
    fn global_var() {
        let (heap, globals, main) = compile("(var x 5) x").unwrap();
        let x = globals.index_of("x").unwrap();
        let x = usize::from(x) as u8;

        assert_eq!(
            ops(&heap, main),
            vec![
                (Op::Const, Some(0)),
                (Op::SetGlobal, Some(x)),
                (Op::Pop, None),
                (Op::GetGlobal, Some(x)),
                (Op::Halt, None),
            ]
        );
    }

    #[test]
    fn block_locals_are_dropped() {
        let (heap, _globals, main) = compile("(begin (var x 200) x)").unwrap();
        assert_eq!(
            ops(&heap, main),
            vec![
                (Op::Const, Some(0)),
                // slot 0 is `main` itself
                (Op::SetLocal, Some(1)),
                (Op::GetLocal, Some(1)),
                (Op::ScopeExit, Some(1)),
                (Op::Halt, None),
            ]
        );
    }

    #[test]
    fn local_slots_account_for_temporaries() {
        let (heap, _globals, main) = compile("(+ 1 (begin (var x 2) x))").unwrap();
        let ops = ops(&heap, main);
        assert!(ops.contains(&(Op::SetLocal, Some(2))));
        assert!(ops.contains(&(Op::GetLocal, Some(2))));
    }

    #[test]
    fn if_without_alternate() {
        let (heap, _globals, main) = compile("(if true 1)").unwrap();
        let co = heap.as_code(main).unwrap();
        let insts = disasm::decode(co).unwrap();

        let kinds = insts.iter().map(|i| i.op).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![Op::Const, Op::JmpIfFalse, Op::Const, Op::Jmp, Op::Const, Op::Halt]
        );

        // else branch starts at the `false` constant, end is `HALT`
        assert_eq!(insts[1].address(), Some(insts[4].offset as u16));
        assert_eq!(insts[3].address(), Some(insts[5].offset as u16));
    }

    #[test]
    fn function_without_free_variables_is_a_constant() {
        let (heap, _globals, main) = compile("(def square (x) (* x x))").unwrap();
        let co = heap.as_code(main).unwrap();

        let f = co
            .constants()
            .iter()
            .find_map(|c| heap.as_function(c.as_object()?))
            .unwrap();
        let body = heap.as_code(f.code).unwrap();

        assert_eq!(body.arity, 1);
        assert_eq!(
            ops(&heap, f.code),
            vec![
                (Op::GetLocal, Some(1)),
                (Op::GetLocal, Some(1)),
                (Op::Mul, None),
                (Op::ScopeExit, Some(2)),
                (Op::Return, None),
            ]
        );
    }

    #[test]
    fn closures_load_cells() {
        let src = r#"
            (def make (n)
              (lambda () n))
        "#;
        let (heap, _globals, _main) = compile(src).unwrap();

        let make = heap
            .code_objects()
            .find(|(_, co)| co.name == "make")
            .map(|(id, _)| id)
            .unwrap();

        assert_eq!(
            ops(&heap, make),
            vec![
                // move the captured parameter into its cell
                (Op::GetLocal, Some(1)),
                (Op::SetCell, Some(0)),
                (Op::Pop, None),
                (Op::LoadCell, Some(0)),
                (Op::Const, Some(0)),
                (Op::MakeFunction, Some(1)),
                (Op::ScopeExit, Some(2)),
                (Op::Return, None),
            ]
        );

        let lambda = heap
            .code_objects()
            .find(|(_, co)| co.name == "lambda")
            .map(|(_, co)| co)
            .unwrap();
        assert_eq!(lambda.cell_names(), &["n"]);
        assert_eq!(lambda.free_count(), 1);
    }

    #[test]
    fn reference_errors() {
        assert_eq!(
            compile("(set y 1)").err(),
            Some(CompileError::Reference {
                name: "y".to_string()
            })
        );
        assert_eq!(
            compile("(+ undefined 1)").err(),
            Some(CompileError::Reference {
                name: "undefined".to_string()
            })
        );
    }

    #[test]
    fn malformed_forms() {
        assert!(matches!(
            compile("(var)"),
            Err(CompileError::Malformed { .. })
        ));
        assert!(matches!(
            compile("(def f x)"),
            Err(CompileError::Malformed { .. })
        ));
        assert!(matches!(
            compile("(if)"),
            Err(CompileError::Malformed { .. })
        ));
        assert!(matches!(
            compile("()"),
            Err(CompileError::Malformed { .. })
        ));
        assert!(matches!(
            compile("(def f () (+ 1 (var x 2)))"),
            Err(CompileError::Malformed { .. })
        ));
    }

    #[test]
    fn too_many_constants() {
        let src = (0..300).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        assert!(matches!(
            compile(&src),
            Err(CompileError::TooManyConstants { .. })
        ));
    }
}
