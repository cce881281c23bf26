//! Diagnostic rendering

use std::fmt;

use colored::Colorize;

use crate::syntax::span::{ByteSpan, LineColumn};

pub const QUOTE: colored::Color = colored::Color::BrightBlue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }

    pub fn color(&self) -> colored::Color {
        match self {
            Self::Error => colored::Color::Red,
            Self::Warning => colored::Color::Yellow,
        }
    }
}

/// ```text
/// <severity>[<code>]: <msg>
/// ```
#[derive(Debug)]
pub struct Header<'a> {
    pub code: &'a str,
    pub severity: Severity,
    pub msg: &'a str,
}

impl<'a> fmt::Display for Header<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity_code = format!("{}[{}]", self.severity.as_str(), self.code);
        writeln!(
            f,
            "{}: {}",
            severity_code.color(self.severity.color()).bold(),
            self.msg.bold()
        )
    }
}

/// ```text
///   --> <src_file>:<ln>:<col>
///      |
/// <ln> | <line_text>
///      |    ^^^^
/// ```
#[derive(Debug)]
pub struct Window<'a> {
    pub severity: Severity,
    pub src_file: &'a str,
    pub ln_col: LineColumn,
    pub line_text: &'a str,
    /// Span within the line
    pub line_span: ByteSpan,
}

impl<'a> Window<'a> {
    /// Locates the span in the source text
    pub fn new(severity: Severity, src_file: &'a str, src: &'a str, sp: ByteSpan) -> Self {
        let lo = usize::min(sp.lo, src.len());
        let ln_col = LineColumn::from_pos(lo, src);

        let line_start = src[..lo].rfind('\n').map_or(0, |i| i + 1);
        let line_end = src[lo..].find('\n').map_or(src.len(), |i| lo + i);
        let line_text = src[line_start..line_end].trim_end();

        let hi = usize::min(sp.hi.max(lo), line_end);
        let line_span = ByteSpan::new(lo - line_start, hi - line_start);

        Self {
            severity,
            src_file,
            ln_col,
            line_text,
            line_span,
        }
    }
}

impl<'a> fmt::Display for Window<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n_digits = self::n_digits(self.ln_col.line1());
        let indent = " ".repeat(n_digits);

        let vbar = "|".color(QUOTE).bold();
        let line = format!("{}", self.ln_col.line1());

        writeln!(
            f,
            "{indent}{} {}:{}:{}",
            "-->".color(QUOTE).bold(),
            self.src_file,
            self.ln_col.line1(),
            self.ln_col.column1()
        )?;
        writeln!(f, "{indent} {vbar}")?;
        writeln!(f, "{} {vbar} {}", line.color(QUOTE).bold(), self.line_text)?;
        writeln!(
            f,
            "{indent} {vbar} {}",
            self::underline(self.line_span)
                .color(self.severity.color())
                .bold(),
        )?;

        Ok(())
    }
}

/// Header and optional source window
#[derive(Debug)]
pub struct Render<'a> {
    pub header: Header<'a>,
    pub window: Option<Window<'a>>,
}

impl<'a> fmt::Display for Render<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // each part ends with a newline
        write!(f, "{}", self.header)?;
        if let Some(window) = &self.window {
            write!(f, "{}", window)?;
        }
        Ok(())
    }
}

fn underline(line_span: ByteSpan) -> String {
    let mut s = " ".repeat(line_span.lo);
    s.push_str(&"^".repeat(line_span.len().max(1)));
    s
}

fn n_digits(mut x: usize) -> usize {
    let mut n_digits = 0;

    loop {
        x /= 10;
        n_digits += 1;

        if x == 0 {
            break;
        }
    }

    n_digits
}
