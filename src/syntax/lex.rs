/*!
Tokenizer: `&str` → lazy sequence of [`Token`] s

The lexer applies an ordered table of rules to the front of the remaining text. The first rule that
matches wins; comments and whitespace match but produce no token.
*/

use thiserror::Error;

use crate::syntax::span::{ByteSpan, LineColumn};

pub type Result<T, E = LexError> = std::result::Result<T, E>;

/// Lexical error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character `{ch}` at byte {pos}")]
    NoRuleMatches { pos: usize, ch: char },
}

impl LexError {
    pub fn pos(&self) -> usize {
        match self {
            LexError::NoRuleMatches { pos, .. } => *pos,
        }
    }

    /// Returns a message with line and column, useful for diagnostic header
    pub fn detailed_message(&self, src: &str) -> String {
        let ln_col = LineColumn::from_pos(self.pos(), src);
        match self {
            LexError::NoRuleMatches { ch, .. } => format!(
                "unexpected character `{}` at {}:{}",
                ch,
                ln_col.line1(),
                ln_col.column1()
            ),
        }
    }
}

/// Syntactic category of a [`Token`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// String literal, including the enclosing quotes
    Str,
    /// Decimal integer literal
    Num,
    /// Operator or identifier
    Symbol,
    /// End of input sentinel
    Eof,
}

/// Text span with syntactic kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub sp: ByteSpan,
    /// Matched lexeme
    pub text: &'s str,
}

impl<'s> Token<'s> {
    /// Creates a token that doesn't come from the source text
    pub fn synthetic(kind: TokenKind, text: &'s str, pos: usize) -> Self {
        Self {
            kind,
            sp: ByteSpan::at(pos),
            text,
        }
    }
}

/// Lexer state. Only the initial state is used by Eva.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexState {
    Initial,
}

impl LexState {
    /// Indices into [`LEX_RULES`] enabled in this state
    fn rules(self) -> &'static [usize] {
        match self {
            LexState::Initial => &[0, 1, 2, 3, 4, 5, 6, 7],
        }
    }
}

/// Returns the length of the match at the front of the input
type Matcher = fn(&[u8]) -> Option<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Emit(TokenKind),
    Skip,
}

/// Lexical rules in priority order
const LEX_RULES: [(Matcher, RuleAction); 8] = [
    (self::paren_open, RuleAction::Emit(TokenKind::ParenOpen)),
    (self::paren_close, RuleAction::Emit(TokenKind::ParenClose)),
    (self::line_comment, RuleAction::Skip),
    (self::block_comment, RuleAction::Skip),
    (self::whitespace, RuleAction::Skip),
    (self::string, RuleAction::Emit(TokenKind::Str)),
    (self::number, RuleAction::Emit(TokenKind::Num)),
    (self::symbol, RuleAction::Emit(TokenKind::Symbol)),
];

/// `^\(`
fn paren_open(s: &[u8]) -> Option<usize> {
    (s.first() == Some(&b'(')).then_some(1)
}

/// `^\)`
fn paren_close(s: &[u8]) -> Option<usize> {
    (s.first() == Some(&b')')).then_some(1)
}

/// `^//.*`
fn line_comment(s: &[u8]) -> Option<usize> {
    if !s.starts_with(b"//") {
        return None;
    }

    let len = s.iter().position(|&c| c == b'\n').unwrap_or(s.len());
    Some(len)
}

/// `^/\*[\s\S]*?\*/`
fn block_comment(s: &[u8]) -> Option<usize> {
    if !s.starts_with(b"/*") {
        return None;
    }

    let body = &s[2..];
    let end = body.windows(2).position(|w| w == b"*/")?;
    Some(2 + end + 2)
}

/// `^\s+`
fn whitespace(s: &[u8]) -> Option<usize> {
    let len = s.iter().take_while(|c| c.is_ascii_whitespace()).count();
    (len > 0).then_some(len)
}

/// `^"[^"]*"`, no escapes
fn string(s: &[u8]) -> Option<usize> {
    if s.first() != Some(&b'"') {
        return None;
    }

    let end = s[1..].iter().position(|&c| c == b'"')?;
    Some(1 + end + 1)
}

/// `^\d+`
fn number(s: &[u8]) -> Option<usize> {
    let len = s.iter().take_while(|c| c.is_ascii_digit()).count();
    (len > 0).then_some(len)
}

/// `^[\w\-+*=!<>/]+`
fn symbol(s: &[u8]) -> Option<usize> {
    fn is_symbol_body(c: u8) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'+' | b'*' | b'=' | b'!' | b'<' | b'>' | b'/')
    }

    let len = s.iter().take_while(|&&c| is_symbol_body(c)).count();
    (len > 0).then_some(len)
}

/// Converts text into a lazy stream of tokens terminated by [`TokenKind::Eof`]
pub fn tokenize(src: &str) -> Tokenizer<'_> {
    Tokenizer::new(src)
}

/// Stateful, non-restartable lexer. Yields `Eof` once, then `None`. It also stops after the first
/// error.
#[derive(Debug, Clone)]
pub struct Tokenizer<'s> {
    src: &'s str,
    pos: usize,
    state: LexState,
    done: bool,
}

impl<'s> Tokenizer<'s> {
    pub fn new(src: &'s str) -> Self {
        Self {
            src,
            pos: 0,
            state: LexState::Initial,
            done: false,
        }
    }

    pub fn src(&self) -> &'s str {
        self.src
    }

    /// Scans the next token, skipping trivia
    fn scan(&mut self) -> Result<Token<'s>> {
        loop {
            if self.pos >= self.src.len() {
                return Ok(Token::synthetic(TokenKind::Eof, "", self.src.len()));
            }

            let rest = &self.src.as_bytes()[self.pos..];

            let (len, action) = self
                .state
                .rules()
                .iter()
                .find_map(|&i| {
                    let (matcher, action) = LEX_RULES[i];
                    matcher(rest).map(|len| (len, action))
                })
                .ok_or_else(|| LexError::NoRuleMatches {
                    pos: self.pos,
                    ch: self.src[self.pos..].chars().next().unwrap_or('\0'),
                })?;

            let sp = ByteSpan::new(self.pos, self.pos + len);
            self.pos += len;

            match action {
                RuleAction::Skip => continue,
                RuleAction::Emit(kind) => {
                    return Ok(Token {
                        kind,
                        sp,
                        text: sp.slice(self.src),
                    });
                }
            }
        }
    }
}

impl<'s> Iterator for Tokenizer<'s> {
    type Item = Result<Token<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let res = self.scan();
        if matches!(res, Err(_) | Ok(Token { kind: TokenKind::Eof, .. })) {
            self.done = true;
        }

        Some(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn force_lex(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .map(|tk| tk.map(|tk| (tk.kind, tk.text)))
            .collect::<Result<Vec<_>>>()
            .unwrap_or_else(|err| panic!("{}", err))
    }

    #[test]
    fn one_byte_tokens() {
        assert_eq!(
            force_lex("()"),
            vec![
                (TokenKind::ParenOpen, "("),
                (TokenKind::ParenClose, ")"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn atoms() {
        assert_eq!(
            force_lex(r#"(+ 42 "Hello, world" x-1 <=)"#),
            vec![
                (TokenKind::ParenOpen, "("),
                (TokenKind::Symbol, "+"),
                (TokenKind::Num, "42"),
                (TokenKind::Str, "\"Hello, world\""),
                (TokenKind::Symbol, "x-1"),
                (TokenKind::Symbol, "<="),
                (TokenKind::ParenClose, ")"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn trivia() {
        let src = "// line comment\n(x /* block\n comment */ y)\t\n";
        assert_eq!(
            force_lex(src),
            vec![
                (TokenKind::ParenOpen, "("),
                (TokenKind::Symbol, "x"),
                (TokenKind::Symbol, "y"),
                (TokenKind::ParenClose, ")"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn number_then_symbol() {
        // `\d+` wins over the symbol rule, so the tail becomes a separate token
        assert_eq!(
            force_lex("12ab"),
            vec![
                (TokenKind::Num, "12"),
                (TokenKind::Symbol, "ab"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn spans() {
        let tks = tokenize("(* 1 3)")
            .collect::<Result<Vec<_>>>()
            .unwrap_or_else(|err| panic!("{}", err));

        assert_eq!(tks[1].sp, ByteSpan::new(1, 2));
        assert_eq!(tks[3].sp, ByteSpan::new(5, 6));
        assert_eq!(tks[5].sp, ByteSpan::at(7));
    }

    #[test]
    fn unterminated_string() {
        let errs = tokenize(r#"(+ "abc"#)
            .filter_map(|tk| tk.err())
            .collect::<Vec<_>>();
        assert_eq!(errs, vec![LexError::NoRuleMatches { pos: 3, ch: '"' }]);
    }

    #[test]
    fn stops_after_eof() {
        let mut tks = tokenize("x");
        assert!(tks.next().is_some());
        assert!(matches!(
            tks.next(),
            Some(Ok(Token {
                kind: TokenKind::Eof,
                ..
            }))
        ));
        assert!(tks.next().is_none());
    }
}
