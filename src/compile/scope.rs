//! Scope analysis: decides where each variable lives (global slot, stack slot or heap cell)
//!
//! The analyzer walks the AST once and builds a tree of [`ScopeData`] linked by parent index. Each
//! reference is bound to the declaration visible at that point of the walk, so a reference that
//! precedes a shadowing `var` in the same block still sees the outer variable. A reference that
//! crosses a function boundary before reaching its declaration promotes the variable to a cell:
//! the owning scope records it in `cells` and every scope on the way records it in `free`.

use std::hash::BuildHasherDefault;

use indexmap::IndexSet;
use la_arena::{Arena, Idx};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::syntax::ast::{Ast, Exp, ExpData};

pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

pub type ScopeId = Idx<ScopeData>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

/// Where a variable is stored at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    Global,
    Local,
    Cell,
}

#[derive(Debug, Clone)]
pub struct ScopeData {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    decls: FxHashSet<String>,
    /// Variables captured from enclosing scopes, in discovery order
    free: FxIndexSet<String>,
    /// Own variables captured by nested functions, in discovery order
    cells: FxIndexSet<String>,
}

impl ScopeData {
    fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            parent,
            decls: Default::default(),
            free: Default::default(),
            cells: Default::default(),
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.decls.contains(name)
    }

    pub fn free(&self) -> &FxIndexSet<String> {
        &self.free
    }

    pub fn cells(&self) -> &FxIndexSet<String> {
        &self.cells
    }
}

/// Result of scope analysis, consumed read-only by the compiler
#[derive(Debug, Clone)]
pub struct ScopeMap {
    scopes: Arena<ScopeData>,
    scope_by_exp: FxHashMap<Exp, ScopeId>,
    /// Symbol reference → declaring scope (`None` for undeclared names)
    owner_by_ref: FxHashMap<Exp, Option<ScopeId>>,
    root: ScopeId,
}

/// Special forms and operators. They are never looked up as variables in head position.
pub const RESERVED_HEADS: &[&str] = &[
    "var", "set", "begin", "if", "while", "for", "def", "lambda", "+", "-", "*", "/", "<", ">",
    "==", ">=", "<=", "!=",
];

/// Accessors
impl ScopeMap {
    pub fn analyze(ast: &Ast) -> Self {
        let mut scopes = Arena::default();
        let root = scopes.alloc(ScopeData::new(ScopeKind::Global, None));

        let mut map = Self {
            scopes,
            scope_by_exp: FxHashMap::default(),
            owner_by_ref: FxHashMap::default(),
            root,
        };

        Analyzer { ast, map: &mut map }.analyze_root(ast.root());

        log::debug!("analyzed {} scopes", map.scopes.len());
        map
    }

    /// The global scope
    pub fn root(&self) -> ScopeId {
        self.root
    }

    pub fn scope(&self, scope: ScopeId) -> &ScopeData {
        &self.scopes[scope]
    }

    /// Scope created by a `begin`, `def` or `lambda` expression
    pub fn scope_for_exp(&self, exp: Exp) -> Option<ScopeId> {
        self.scope_by_exp.get(&exp).copied()
    }

    pub fn scope_chain(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |&scope| self.scopes[scope].parent)
    }

    /// Returns true if the name is declared at top level
    pub fn is_global_decl(&self, name: &str) -> bool {
        self.scopes[self.root].declares(name)
    }

    /// Classifies a name declared in or visible from the given scope. Undeclared names are globals
    /// (natives or names defined by earlier programs).
    pub fn resolve(&self, scope: ScopeId, name: &str) -> AllocKind {
        let owner = self.scope_chain(scope).find(|&s| self.scopes[s].declares(name));
        self.alloc_kind(owner, name)
    }

    /// Classifies the symbol reference by the declaration it saw during analysis
    pub fn resolve_ref(&self, exp: Exp, scope: ScopeId, name: &str) -> AllocKind {
        match self.owner_by_ref.get(&exp) {
            Some(owner) => self.alloc_kind(*owner, name),
            None => self.resolve(scope, name),
        }
    }

    fn alloc_kind(&self, owner: Option<ScopeId>, name: &str) -> AllocKind {
        let owner = match owner {
            Some(owner) => &self.scopes[owner],
            None => return AllocKind::Global,
        };

        match owner.kind {
            ScopeKind::Global => AllocKind::Global,
            _ if owner.cells.contains(name) => AllocKind::Cell,
            _ => AllocKind::Local,
        }
    }
}

struct Analyzer<'a> {
    ast: &'a Ast,
    map: &'a mut ScopeMap,
}

impl<'a> Analyzer<'a> {
    fn analyze_root(&mut self, exp: Exp) {
        let root = self.map.root;
        if self.ast.is_tagged(exp, "begin") {
            self.map.scope_by_exp.insert(exp, root);
            self.analyze_children(exp, 1, root);
        } else {
            self.analyze(exp, root);
        }
    }

    fn analyze(&mut self, exp: Exp, scope: ScopeId) {
        let ast = self.ast;
        let xs = match &ast[exp] {
            ExpData::Number(_) | ExpData::String(_) => return,
            ExpData::Symbol(name) => {
                if name != "true" && name != "false" {
                    self.reference(exp, scope, name);
                }
                return;
            }
            ExpData::List(xs) => xs,
        };

        let head = xs.first().and_then(|x| ast[*x].as_symbol());

        match head {
            Some("begin") => {
                let block = self.new_scope(ScopeKind::Block, scope);
                self.map.scope_by_exp.insert(exp, block);
                self.analyze_children(exp, 1, block);
            }
            Some("var") => {
                if let Some(name) = self.symbol_at(exp, 1) {
                    self.declare(scope, name);
                }
                self.analyze_children(exp, 2, scope);
            }
            Some("set") => {
                // the target is a reference too
                self.analyze_children(exp, 1, scope);
            }
            Some("def") => {
                let name = self.symbol_at(exp, 1);
                if let Some(name) = name {
                    self.declare(scope, name);
                }

                let f = self.new_scope(ScopeKind::Function, scope);
                self.map.scope_by_exp.insert(exp, f);
                if let Some(name) = name {
                    self.declare(f, name);
                }
                self.declare_params(exp, 2, f);
                self.analyze_children(exp, 3, f);
            }
            Some("lambda") => {
                let f = self.new_scope(ScopeKind::Function, scope);
                self.map.scope_by_exp.insert(exp, f);
                self.declare_params(exp, 1, f);
                self.analyze_children(exp, 2, f);
            }
            Some(head) if RESERVED_HEADS.contains(&head) => {
                self.analyze_children(exp, 1, scope);
            }
            _ => {
                self.analyze_children(exp, 0, scope);
            }
        }
    }

    fn analyze_children(&mut self, exp: Exp, skip: usize, scope: ScopeId) {
        let ast = self.ast;
        if let Some(xs) = ast[exp].as_list() {
            for x in xs.iter().skip(skip) {
                self.analyze(*x, scope);
            }
        }
    }

    fn symbol_at(&self, exp: Exp, i: usize) -> Option<&'a str> {
        let ast = self.ast;
        let x = ast[exp].as_list()?.get(i)?;
        ast[*x].as_symbol()
    }

    fn declare_params(&mut self, exp: Exp, i: usize, f: ScopeId) {
        let ast = self.ast;
        let params = ast[exp]
            .as_list()
            .and_then(|xs| xs.get(i))
            .and_then(|x| ast[*x].as_list())
            .unwrap_or(&[]);

        for param in params.iter().filter_map(|x| ast[*x].as_symbol()) {
            self.declare(f, param);
        }
    }

    fn new_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        self.map.scopes.alloc(ScopeData::new(kind, Some(parent)))
    }

    fn declare(&mut self, scope: ScopeId, name: &str) {
        self.map.scopes[scope].decls.insert(name.to_string());
    }

    /// Binds the reference to the visible declaration and promotes the variable to a cell if the
    /// reference crosses a function boundary
    fn reference(&mut self, exp: Exp, scope: ScopeId, name: &str) {
        let map = &*self.map;
        let owner = map
            .scope_chain(scope)
            .find(|&s| map.scopes[s].declares(name));
        self.map.owner_by_ref.insert(exp, owner);

        let owner = match owner {
            Some(owner) if self.map.scopes[owner].kind != ScopeKind::Global => owner,
            _ => return,
        };

        let path = self
            .map
            .scope_chain(scope)
            .take_while(|&s| s != owner)
            .collect::<Vec<_>>();

        let crossed_function = path
            .iter()
            .any(|&s| self.map.scopes[s].kind == ScopeKind::Function);
        if !crossed_function {
            return;
        }

        self.map.scopes[owner].cells.insert(name.to_string());
        for s in path {
            self.map.scopes[s].free.insert(name.to_string());
        }
    }
}
