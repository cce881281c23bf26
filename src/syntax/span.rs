/*!
Span of UTF-8 source text
*/

pub type TextPos = usize;
pub type TextLen = usize;

/// Span of source text in range `[lo, hi)` referred to as `sp`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ByteSpan {
    pub lo: TextPos,
    pub hi: TextPos,
}

impl ByteSpan {
    pub fn new(lo: TextPos, hi: TextPos) -> Self {
        Self { lo, hi }
    }

    /// Zero-length span, used for the end-of-input token
    pub fn at(pos: TextPos) -> Self {
        Self { lo: pos, hi: pos }
    }

    pub fn slice<'a>(&self, src: &'a str) -> &'a str {
        &src[self.lo..self.hi]
    }

    pub fn len(&self) -> TextLen {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.lo == self.hi
    }
}

/// Zero-based (line, column) location in UTF-8 text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LineColumn {
    pub ln: usize,
    pub col: usize,
}

impl LineColumn {
    /// TODO: Support UTF-16 columns for editor integration
    pub fn from_pos(pos: TextPos, src: &str) -> Self {
        let pos = usize::min(pos, src.len());
        let (ln, line_offset) = self::line(src, pos);
        let col = src[line_offset..pos].chars().count();
        Self { ln, col }
    }

    pub fn line1(&self) -> usize {
        self.ln + 1
    }

    pub fn column1(&self) -> usize {
        self.col + 1
    }
}

/// Returns the line given `pos` is at with byte offset (line, line_offset)
fn line(source: &str, pos: usize) -> (usize, usize) {
    let line_starts = self::line_starts(source).collect::<Vec<_>>();

    let nth_line = match line_starts.binary_search(&pos) {
        Ok(line) => line,
        Err(next_line) => next_line - 1,
    };

    (nth_line, line_starts[nth_line])
}

fn line_starts<'src>(source: &'src str) -> impl 'src + Iterator<Item = usize> {
    std::iter::once(0).chain(source.match_indices('\n').map(|(i, _pat)| i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_column() {
        let src = "(var x 1)\n(set x\n  2)";
        assert_eq!(LineColumn::from_pos(0, src), LineColumn { ln: 0, col: 0 });
        assert_eq!(LineColumn::from_pos(10, src), LineColumn { ln: 1, col: 0 });
        assert_eq!(LineColumn::from_pos(19, src), LineColumn { ln: 2, col: 2 });
    }
}
