/*!
Table-driven shift-reduce parser: tokens → [`Ast`]

# Grammar

```text
$accept     : Exp
Exp         : Atom | List
Atom        : NUMBER | STRING | SYMBOL
List        : '(' ListEntries ')'
ListEntries : ε | ListEntries Exp
```

The LR table and the productions are constant data. The parser keeps a stack of states and a
parallel stack of values.
*/

use la_arena::Arena;
use thiserror::Error;

use crate::syntax::{
    ast::{Ast, Exp, ExpData},
    lex::{self, LexError, Token, TokenKind},
    span::{ByteSpan, LineColumn},
};

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("unexpected token `{text}` ({kind:?})")]
    UnexpectedToken {
        kind: TokenKind,
        text: String,
        sp: ByteSpan,
    },
    #[error("unexpected end of input")]
    UnexpectedEof { sp: ByteSpan },
}

impl ParseError {
    pub fn span(&self) -> ByteSpan {
        match self {
            Self::Lex(err) => ByteSpan::at(err.pos()),
            Self::UnexpectedToken { sp, .. } => *sp,
            Self::UnexpectedEof { sp } => *sp,
        }
    }

    /// Returns a message with line and column, useful for diagnostic header
    pub fn detailed_message(&self, src: &str) -> String {
        if let Self::Lex(err) = self {
            return err.detailed_message(src);
        }

        let ln_col = LineColumn::from_pos(self.span().lo, src);
        format!("{} at {}:{}", self, ln_col.line1(), ln_col.column1())
    }

    fn unexpected(tk: Token) -> Self {
        if tk.kind == TokenKind::Eof {
            Self::UnexpectedEof { sp: tk.sp }
        } else {
            Self::UnexpectedToken {
                kind: tk.kind,
                text: tk.text.to_string(),
                sp: tk.sp,
            }
        }
    }
}

/// Parses a program: a sequence of top-level forms wrapped in an implicit `(begin ..)`
pub fn parse_program(src: &str) -> Result<Ast> {
    let end = src.len();

    let head = [
        Ok(Token::synthetic(TokenKind::ParenOpen, "(", 0)),
        Ok(Token::synthetic(TokenKind::Symbol, "begin", 0)),
    ];

    let body = lex::tokenize(src).filter(|tk| !matches!(tk, Ok(tk) if tk.kind == TokenKind::Eof));

    let tail = [
        Ok(Token::synthetic(TokenKind::ParenClose, ")", end)),
        Ok(Token::synthetic(TokenKind::Eof, "", end)),
    ];

    let ast = Parser::default().parse(head.into_iter().chain(body).chain(tail))?;
    log::debug!("parsed program into {} expressions", ast.len());
    Ok(ast)
}

/// Parses a single expression
pub fn parse_exp(src: &str) -> Result<Ast> {
    Parser::default().parse(lex::tokenize(src))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Push the token and go to the state
    Shift(usize),
    /// Goto after a reduction
    Transit(usize),
    /// Reduce by the production
    Reduce(usize),
    Accept,
}

/// Column of the action table. Non-terminals come first, then token categories.
type Column = usize;

const EXP: Column = 0;
const ATOM: Column = 1;
const LIST: Column = 2;
const LIST_ENTRIES: Column = 3;

fn column(kind: TokenKind) -> Column {
    match kind {
        TokenKind::Num => 4,
        TokenKind::Str => 5,
        TokenKind::Symbol => 6,
        TokenKind::ParenOpen => 7,
        TokenKind::ParenClose => 8,
        TokenKind::Eof => 9,
    }
}

/// Value stack item
#[derive(Debug)]
enum Item<'s> {
    Token(Token<'s>),
    Exp(Exp),
    Entries(Vec<Exp>),
}

impl<'s> Item<'s> {
    fn into_token(self) -> Option<Token<'s>> {
        match self {
            Self::Token(tk) => Some(tk),
            _ => None,
        }
    }

    fn into_exp(self) -> Option<Exp> {
        match self {
            Self::Exp(exp) => Some(exp),
            _ => None,
        }
    }

    fn into_entries(self) -> Option<Vec<Exp>> {
        match self {
            Self::Entries(xs) => Some(xs),
            _ => None,
        }
    }
}

/// Semantic action: pops right-hand side items and builds the left-hand side item
type SemanticAction = for<'s> fn(&mut Arena<ExpData>, Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>>;

struct Production {
    lhs: Column,
    arity: usize,
    action: SemanticAction,
}

const PRODUCTIONS: [Production; 9] = [
    // $accept : Exp
    Production {
        lhs: usize::MAX,
        arity: 1,
        action: self::pass,
    },
    // Exp : Atom
    Production {
        lhs: EXP,
        arity: 1,
        action: self::pass,
    },
    // Exp : List
    Production {
        lhs: EXP,
        arity: 1,
        action: self::pass,
    },
    // Atom : NUMBER
    Production {
        lhs: ATOM,
        arity: 1,
        action: self::number,
    },
    // Atom : STRING
    Production {
        lhs: ATOM,
        arity: 1,
        action: self::string,
    },
    // Atom : SYMBOL
    Production {
        lhs: ATOM,
        arity: 1,
        action: self::symbol,
    },
    // List : '(' ListEntries ')'
    Production {
        lhs: LIST,
        arity: 3,
        action: self::list,
    },
    // ListEntries : ε
    Production {
        lhs: LIST_ENTRIES,
        arity: 0,
        action: self::no_entries,
    },
    // ListEntries : ListEntries Exp
    Production {
        lhs: LIST_ENTRIES,
        arity: 2,
        action: self::push_entry,
    },
];

fn pass<'s>(_exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    rhs.into_iter()
        .next()
        .ok_or(Token::synthetic(TokenKind::Eof, "", 0))
}

fn single_token<'s>(rhs: Vec<Item<'s>>) -> Token<'s> {
    rhs.into_iter()
        .next()
        .and_then(Item::into_token)
        .unwrap_or(Token::synthetic(TokenKind::Eof, "", 0))
}

fn number<'s>(exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    let tk = self::single_token(rhs);
    let x: f64 = tk.text.parse().map_err(|_| tk)?;
    Ok(Item::Exp(exps.alloc(ExpData::Number(x))))
}

fn string<'s>(exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    let tk = self::single_token(rhs);
    let s = tk
        .text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or(tk)?;
    Ok(Item::Exp(exps.alloc(ExpData::String(s.to_string()))))
}

fn symbol<'s>(exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    let tk = self::single_token(rhs);
    Ok(Item::Exp(exps.alloc(ExpData::Symbol(tk.text.to_string()))))
}

fn list<'s>(exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    let mut rhs = rhs.into_iter();
    let open = rhs.next().and_then(Item::into_token);
    let entries = rhs.next().and_then(Item::into_entries);
    match (open, entries) {
        (Some(_), Some(xs)) => Ok(Item::Exp(exps.alloc(ExpData::List(xs)))),
        (open, _) => Err(open.unwrap_or(Token::synthetic(TokenKind::Eof, "", 0))),
    }
}

fn no_entries<'s>(_exps: &mut Arena<ExpData>, _rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    Ok(Item::Entries(Vec::new()))
}

fn push_entry<'s>(_exps: &mut Arena<ExpData>, rhs: Vec<Item<'s>>) -> Result<Item<'s>, Token<'s>> {
    let mut rhs = rhs.into_iter();
    let entries = rhs.next().and_then(Item::into_entries);
    let exp = rhs.next().and_then(Item::into_exp);
    match (entries, exp) {
        (Some(mut xs), Some(x)) => {
            xs.push(x);
            Ok(Item::Entries(xs))
        }
        _ => Err(Token::synthetic(TokenKind::Eof, "", 0)),
    }
}

const N_STATES: usize = 11;
const N_COLUMNS: usize = 10;

/// LR action table indexed by `[state][column]`
const TABLE: [[Option<Action>; N_COLUMNS]; N_STATES] = {
    use Action::*;

    const fn reduce_on(p: usize, include_eof: bool) -> [Option<Action>; N_COLUMNS] {
        let mut row = [None; N_COLUMNS];
        let mut i = 4;
        while i < N_COLUMNS {
            row[i] = Some(Action::Reduce(p));
            i += 1;
        }
        if !include_eof {
            row[9] = None;
        }
        row
    }

    const EXP_START: [Option<Action>; N_COLUMNS] = [
        Some(Transit(1)),
        Some(Transit(2)),
        Some(Transit(3)),
        None,
        Some(Shift(4)),
        Some(Shift(5)),
        Some(Shift(6)),
        Some(Shift(7)),
        None,
        None,
    ];

    let mut s8 = EXP_START;
    s8[EXP] = Some(Transit(10));
    s8[8] = Some(Shift(9));

    let mut s7 = reduce_on(7, false);
    s7[LIST_ENTRIES] = Some(Transit(8));

    let mut s1 = [None; N_COLUMNS];
    s1[9] = Some(Accept);

    [
        EXP_START,
        s1,
        reduce_on(1, true),
        reduce_on(2, true),
        reduce_on(3, true),
        reduce_on(4, true),
        reduce_on(5, true),
        s7,
        s8,
        reduce_on(6, true),
        reduce_on(8, false),
    ]
};

#[derive(Debug, Default)]
struct Parser<'s> {
    states: Vec<usize>,
    values: Vec<Item<'s>>,
    exps: Arena<ExpData>,
}

impl<'s> Parser<'s> {
    fn parse(mut self, mut tks: impl Iterator<Item = lex::Result<Token<'s>>>) -> Result<Ast> {
        let mut next = move || -> Result<Token<'s>> {
            match tks.next() {
                Some(tk) => Ok(tk?),
                None => Err(ParseError::UnexpectedEof {
                    sp: ByteSpan::default(),
                }),
            }
        };

        self.states.push(0);
        let mut tk = next()?;

        loop {
            let state = self.states.last().copied().unwrap_or(0);

            match TABLE[state][self::column(tk.kind)] {
                Some(Action::Shift(to)) => {
                    self.values.push(Item::Token(tk));
                    self.states.push(to);
                    tk = next()?;
                }
                Some(Action::Reduce(p)) => {
                    self.reduce(p).map_err(ParseError::unexpected)?;
                }
                Some(Action::Accept) => {
                    let root = self
                        .values
                        .pop()
                        .and_then(Item::into_exp)
                        .ok_or_else(|| ParseError::unexpected(tk))?;

                    return Ok(Ast {
                        exps: self.exps,
                        root,
                    });
                }
                Some(Action::Transit(_)) | None => {
                    return Err(ParseError::unexpected(tk));
                }
            }
        }
    }

    fn reduce(&mut self, p: usize) -> Result<(), Token<'s>> {
        let prod = &PRODUCTIONS[p];
        let eof = Token::synthetic(TokenKind::Eof, "", 0);

        let at = self.values.len().checked_sub(prod.arity).ok_or(eof)?;
        let rhs = self.values.split_off(at);
        self.states
            .truncate(self.states.len().saturating_sub(prod.arity));

        let item = (prod.action)(&mut self.exps, rhs)?;

        let goto = self.states.last().copied().unwrap_or(0);
        match TABLE[goto].get(prod.lhs).copied().flatten() {
            Some(Action::Transit(to)) => {
                self.states.push(to);
                self.values.push(item);
                Ok(())
            }
            _ => Err(eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pretty(src: &str) -> String {
        let ast = parse_exp(src).unwrap_or_else(|err| panic!("{}", err));
        ast.pretty(ast.root())
    }

    #[test]
    fn atoms() {
        assert_eq!(pretty("42"), "42");
        assert_eq!(pretty(r#""hello""#), r#""hello""#);
        assert_eq!(pretty("foo"), "foo");
    }

    #[test]
    fn lists() {
        assert_eq!(pretty("()"), "()");
        assert_eq!(pretty("(+ 1 (* 2 3))"), "(+ 1 (* 2 3))");
        assert_eq!(pretty("((lambda (x) x) 2)"), "((lambda (x) x) 2)");
    }

    #[test]
    fn string_excludes_quotes() {
        let ast = parse_exp(r#""Hello, world!""#).unwrap();
        assert_eq!(ast[ast.root()], ExpData::String("Hello, world!".to_string()));
    }

    #[test]
    fn program_is_wrapped_in_begin() {
        let ast = parse_program("(var x 5) x").unwrap();
        assert_eq!(ast.pretty(ast.root()), "(begin (var x 5) x)");

        let ast = parse_program("").unwrap();
        assert_eq!(ast.pretty(ast.root()), "(begin)");
    }

    #[test]
    fn errors() {
        assert!(matches!(
            parse_program("(+ 1 2"),
            Err(ParseError::UnexpectedEof { .. })
        ));

        assert!(matches!(
            parse_program("(+ 1 2))"),
            Err(ParseError::UnexpectedToken {
                kind: TokenKind::ParenClose,
                ..
            })
        ));

        assert!(matches!(
            parse_exp("1 2"),
            Err(ParseError::UnexpectedToken {
                kind: TokenKind::Num,
                ..
            })
        ));

        assert!(matches!(
            parse_program("(x #)"),
            Err(ParseError::Lex(LexError::NoRuleMatches { pos: 3, .. }))
        ));
    }
}
