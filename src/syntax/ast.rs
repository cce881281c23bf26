/*!
S-expression AST

Nodes are allocated in an arena and referred to by [`Exp`] index. The index is the node identity
used by the scope analyzer to attach scope records without mutating the tree.
*/

use std::{fmt::Write, ops};

use la_arena::{Arena, Idx};

/// Index of an [`ExpData`] in the [`Ast`] arena
pub type Exp = Idx<ExpData>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExpData {
    Number(f64),
    /// String literal without the quotes
    String(String),
    Symbol(String),
    List(Vec<Exp>),
}

impl ExpData {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Exp]> {
        match self {
            Self::List(xs) => Some(xs),
            _ => None,
        }
    }
}

/// Parsed program
#[derive(Debug, Clone)]
pub struct Ast {
    pub(crate) exps: Arena<ExpData>,
    pub(crate) root: Exp,
}

impl ops::Index<Exp> for Ast {
    type Output = ExpData;
    fn index(&self, exp: Exp) -> &Self::Output {
        &self.exps[exp]
    }
}

impl Ast {
    pub fn root(&self) -> Exp {
        self.root
    }

    pub fn len(&self) -> usize {
        self.exps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exps.is_empty()
    }

    /// Returns the symbol at the head of a list, e.g. `var` for `(var x 1)`
    pub fn head_symbol(&self, exp: Exp) -> Option<&str> {
        let xs = self[exp].as_list()?;
        let head = xs.first()?;
        self[*head].as_symbol()
    }

    /// Returns true if the expression is a list headed by the given symbol
    pub fn is_tagged(&self, exp: Exp, tag: &str) -> bool {
        self.head_symbol(exp) == Some(tag)
    }

    /// Formats the expression back into S-expression text
    pub fn pretty(&self, exp: Exp) -> String {
        let mut s = String::new();
        self.pretty_into(exp, &mut s);
        s
    }

    fn pretty_into(&self, exp: Exp, s: &mut String) {
        match &self[exp] {
            ExpData::Number(x) => {
                write!(s, "{}", x).ok();
            }
            ExpData::String(x) => {
                write!(s, "\"{}\"", x).ok();
            }
            ExpData::Symbol(x) => s.push_str(x),
            ExpData::List(xs) => {
                s.push('(');
                for (i, x) in xs.iter().enumerate() {
                    if i != 0 {
                        s.push(' ');
                    }
                    self.pretty_into(*x, s);
                }
                s.push(')');
            }
        }
    }
}
