use std::borrow::Cow;

pub const DELIMITER: u8 = b'|';

/// One protocol line split on the delimiter.
///
/// Fields borrow from the original line, and the start offset of each field
/// is kept so the tail of the line can be recovered exactly. Splitting and
/// re-joining would lose nothing for well-formed fields, but the last field
/// of a `data-line` record is message content and may hold any byte.
#[derive(Debug)]
pub struct Record<'a> {
    line: &'a [u8],
    starts: Vec<usize>,
    fields: Vec<&'a [u8]>,
}

impl<'a> Record<'a> {
    pub fn parse(line: &'a [u8]) -> Self {
        Self::parse_with(line, DELIMITER)
    }

    pub fn parse_with(line: &'a [u8], delimiter: u8) -> Self {
        let mut starts = vec![0];
        let mut fields = Vec::new();
        let mut start = 0;
        for (i, b) in line.iter().enumerate() {
            if *b == delimiter {
                fields.push(&line[start..i]);
                start = i + 1;
                starts.push(start);
            }
        }
        fields.push(&line[start..]);
        Self { line, starts, fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&'a [u8]> {
        self.fields.get(index).copied()
    }

    /// Field as text; identities and addresses are ASCII in practice, so a
    /// lossy conversion only matters for garbage input.
    pub fn text(&self, index: usize) -> Cow<'a, str> {
        match self.field(index) {
            Some(f) => String::from_utf8_lossy(f),
            None => Cow::Borrowed(""),
        }
    }

    /// The original line from the start of field `index` to the end,
    /// delimiters included.
    pub fn suffix(&self, index: usize) -> Option<&'a [u8]> {
        self.starts.get(index).map(|&start| &self.line[start..])
    }

    pub fn line(&self) -> &'a [u8] {
        self.line
    }
}

/// Strip one trailing `\n` and an optional `\r` before it.
pub fn trim_line_end(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
    }
    if let Some(rest) = line.strip_suffix(b"\r") {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter() {
        let r = Record::parse(b"report|0.7|1576146008.006099|smtp-in|tx-begin|7641df9771b4ed00|1ef1c203");
        assert_eq!(r.len(), 7);
        assert_eq!(r.field(0), Some(&b"report"[..]));
        assert_eq!(r.text(4), "tx-begin");
        assert_eq!(r.text(6), "1ef1c203");
        assert_eq!(r.field(7), None);
        assert_eq!(r.text(7), "");
    }

    #[test]
    fn suffix_keeps_embedded_delimiters() {
        let line = b"filter|0.7|1576146008.006099|smtp-in|data-line|7641df9771b4ed00|1ef1c203|a|b||c|";
        let r = Record::parse(line);
        assert_eq!(r.suffix(7), Some(&b"a|b||c|"[..]));
        assert_eq!(r.suffix(0), Some(&line[..]));
        assert_eq!(r.suffix(r.len()), None);
    }

    #[test]
    fn suffix_of_empty_last_field() {
        let r = Record::parse(b"filter|0.7|t|smtp-in|data-line|sid|tok|");
        assert_eq!(r.len(), 8);
        assert_eq!(r.suffix(7), Some(&b""[..]));
    }

    #[test]
    fn empty_line_is_one_empty_field() {
        let r = Record::parse(b"");
        assert_eq!(r.len(), 1);
        assert_eq!(r.field(0), Some(&b""[..]));
    }

    #[test]
    fn custom_delimiter() {
        let r = Record::parse_with(b"a:b:c", b':');
        assert_eq!(r.len(), 3);
        assert_eq!(r.suffix(1), Some(&b"b:c"[..]));
    }

    #[test]
    fn trims_line_terminators() {
        assert_eq!(trim_line_end(b"abc\n"), b"abc");
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
        assert_eq!(trim_line_end(b"a\rb\n"), b"a\rb");
        assert_eq!(trim_line_end(b"\n"), b"");
    }
}
