//! Tokenizer and parser tests

use eva::syntax::{
    self,
    lex::{self, LexError, TokenKind},
    parse::ParseError,
    span::ByteSpan,
};

use crate::util::{self, Test, TestResult};

#[test]
fn syntax() {
    let src = include_str!("test_cases/syntax_test_cases.txt");
    util::run_tests(src, runner)
}

fn runner(test: Test) -> TestResult {
    let output = match syntax::parse_program(&test.code) {
        Ok(ast) => ast.pretty(ast.root()),
        Err(err) => format!("error: {}", err.detailed_message(&test.code)),
    };
    test.result(&output)
}

fn kinds(src: &str) -> Vec<TokenKind> {
    lex::tokenize(src)
        .map(|tk| tk.unwrap_or_else(|err| panic!("{}", err)).kind)
        .collect()
}

#[test]
fn token_stream_ends_with_eof() {
    assert_eq!(
        kinds(r#"(var s "x") // done"#),
        vec![
            TokenKind::ParenOpen,
            TokenKind::Symbol,
            TokenKind::Symbol,
            TokenKind::Str,
            TokenKind::ParenClose,
            TokenKind::Eof,
        ]
    );
    assert_eq!(kinds(""), vec![TokenKind::Eof]);
}

#[test]
fn token_spans() {
    let tks = lex::tokenize("(+ 12 x)")
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let spans = tks.iter().map(|tk| (tk.text, tk.sp)).collect::<Vec<_>>();
    assert_eq!(
        spans,
        vec![
            ("(", ByteSpan::new(0, 1)),
            ("+", ByteSpan::new(1, 2)),
            ("12", ByteSpan::new(3, 5)),
            ("x", ByteSpan::new(6, 7)),
            (")", ByteSpan::new(7, 8)),
            ("", ByteSpan::at(8)),
        ]
    );
}

#[test]
fn lex_error_location() {
    let src = "(var x 1)\n(+ x $)";
    let err = syntax::parse_program(src).unwrap_err();

    assert_eq!(err, ParseError::Lex(LexError::NoRuleMatches { pos: 15, ch: '$' }));
    assert_eq!(err.span(), ByteSpan::at(15));
    assert!(err.detailed_message(src).ends_with("at 2:6"), "{}", err.detailed_message(src));
}

#[test]
fn unterminated_forms() {
    assert!(matches!(
        syntax::parse_program("(+ 1 2"),
        Err(ParseError::UnexpectedEof { .. })
    ));
    assert!(matches!(
        syntax::parse_program("(+ 1 2))"),
        Err(ParseError::UnexpectedToken {
            kind: TokenKind::ParenClose,
            ..
        })
    ));
    // unterminated string falls through to the symbol rule and fails on the quote
    assert!(matches!(
        syntax::parse_program(r#"(+ "abc"#),
        Err(ParseError::Lex(LexError::NoRuleMatches { ch: '"', .. }))
    ));
}

#[test]
fn single_expression() {
    let ast = syntax::parse_exp("(max 1 2)").unwrap();
    assert_eq!(ast.pretty(ast.root()), "(max 1 2)");
    assert_eq!(ast.head_symbol(ast.root()), Some("max"));

    assert!(syntax::parse_exp("1 2").is_err());
}
