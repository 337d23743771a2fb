use std::sync::Arc;

use pl2_diagnostics::{Diagnostic, ErrorCode, SourceInfo, Span};

use super::ast::CmdPart;
use super::cursor::Cursor;

/// Punctuation allowed inside bare tokens, besides alphanumerics and
/// every non-ASCII byte.
const ID_PUNCTUATION: &[u8] = b"!$%^&*()-+_=[]{}|\\:;',<>/?~@.";

/// Whether `b` may appear in a bare token.
pub fn is_id_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b >= 0x80 || ID_PUNCTUATION.contains(&b)
}

/// Whether `b` opens a quoted string.
pub fn is_quote(b: u8) -> bool {
    b == b'"' || b == b'\''
}

/// A token read from the source, before it becomes part of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// The decoded part.
    pub part: CmdPart,
    /// Byte range of the raw token, quotes included.
    pub span: Span,
    /// Line the token starts on.
    pub line: u32,
}

/// Read a bare token. The cursor must sit on an identifier character.
pub fn bare(cursor: &mut Cursor<'_>) -> Fragment {
    let line = cursor.line();
    let start = cursor.eat_while(is_id_char);
    let end = cursor.pos();
    Fragment {
        part: CmdPart::bare(String::from_utf8_lossy(cursor.slice(start, end))),
        span: Span::new(start, end),
        line,
    }
}

/// Read a quoted string. The cursor must sit on the opening quote.
///
/// Either quote character closes the string. A backslash takes the next
/// character verbatim during the scan; escapes are decoded afterwards.
pub fn quoted(cursor: &mut Cursor<'_>, file: &Arc<str>) -> Result<Fragment, Diagnostic> {
    let line = cursor.line();
    let start = cursor.pos();
    cursor.bump();
    let unclosed = |cursor: &Cursor<'_>| {
        Diagnostic::error(ErrorCode::UNCLOSED_STRING, "unclosed string literal")
            .at(SourceInfo::new(Arc::clone(file), line))
            .with_span(Span::new(start, cursor.pos()))
    };
    loop {
        match cursor.peek() {
            None | Some(b'\n') => return Err(unclosed(cursor)),
            Some(b'\\') => {
                cursor.bump();
                match cursor.peek() {
                    None | Some(b'\n') => return Err(unclosed(cursor)),
                    Some(_) => {
                        cursor.bump();
                    }
                }
            }
            Some(b) if is_quote(b) => {
                cursor.bump();
                break;
            }
            Some(_) => {
                cursor.bump();
            }
        }
    }
    let end = cursor.pos();
    let body = cursor.slice(start + 1, end - 1);
    Ok(Fragment {
        part: CmdPart::string(decode_escapes(body)),
        span: Span::new(start, end),
        line,
    })
}

/// Apply escape sequences to the body of a quoted string.
///
/// Recognized: `\n \r \f \v \t \a \" \0`. A backslash before any other
/// byte is kept as is, and the byte after it is decoded on its own, so
/// `\q` stays `\q` and `\\n` becomes a backslash and a newline.
pub fn decode_escapes(body: &[u8]) -> String {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while let Some(&b) = body.get(i) {
        if b == b'\\'
            && let Some(decoded) = body.get(i + 1).copied().and_then(simple_escape)
        {
            out.push(decoded);
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

fn simple_escape(escaped: u8) -> Option<u8> {
    match escaped {
        b'n' => Some(b'\n'),
        b'r' => Some(b'\r'),
        b'f' => Some(0x0c),
        b'v' => Some(0x0b),
        b't' => Some(b'\t'),
        b'a' => Some(0x07),
        b'"' => Some(b'"'),
        b'0' => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> Arc<str> {
        Arc::from("t.pl2")
    }

    #[test]
    fn id_chars() {
        for b in b"aZ09!$%^&*()-+_=[]{}|\\:;',<>/?~@." {
            assert!(is_id_char(*b), "{} should be an id char", *b as char);
        }
        for b in b" \t\n\"#`\0" {
            assert!(!is_id_char(*b), "{:?} should not be an id char", *b as char);
        }
        assert!(is_id_char(0xc3));
    }

    #[test]
    fn bare_token_stops_at_whitespace() {
        let mut c = Cursor::new("print\"x\"");
        let f = bare(&mut c);
        assert_eq!(f.part, CmdPart::bare("print"));
        assert_eq!(f.span, Span::new(0, 5));
        assert_eq!(c.peek(), Some(b'"'));
    }

    #[test]
    fn bare_token_keeps_utf8() {
        let mut c = Cursor::new("héllo wörld");
        assert_eq!(bare(&mut c).part.text, "héllo");
    }

    #[test]
    fn quoted_string_with_escaped_quote() {
        let mut c = Cursor::new(r#""Hello \"world\"" foo"#);
        let f = quoted(&mut c, &src()).unwrap();
        assert_eq!(f.part, CmdPart::string("Hello \"world\""));
        assert_eq!(c.peek(), Some(b' '));
    }

    #[test]
    fn either_quote_closes() {
        let mut c = Cursor::new("'abc\"");
        assert_eq!(quoted(&mut c, &src()).unwrap().part.text, "abc");
        assert!(c.is_eof());
    }

    #[test]
    fn empty_string_is_a_part() {
        let mut c = Cursor::new("\"\"");
        let f = quoted(&mut c, &src()).unwrap();
        assert_eq!(f.part, CmdPart::string(""));
    }

    #[test]
    fn unclosed_at_end_of_line() {
        let mut c = Cursor::new("\"abc\nx\"");
        let err = quoted(&mut c, &src()).unwrap_err();
        assert_eq!(err.code, ErrorCode::UNCLOSED_STRING);
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn backslash_before_newline_is_unclosed() {
        let mut c = Cursor::new("\"abc\\\n\"");
        let err = quoted(&mut c, &src()).unwrap_err();
        assert_eq!(err.code, ErrorCode::UNCLOSED_STRING);
    }

    #[test]
    fn decode_known_escapes() {
        assert_eq!(
            decode_escapes(br#"\n\r\f\v\t\a\"\0"#),
            "\n\r\x0c\x0b\t\x07\"\0"
        );
    }

    #[test]
    fn decode_unknown_escapes_keep_the_backslash() {
        assert_eq!(decode_escapes(br"\q"), r"\q");
        assert_eq!(decode_escapes(br"c\'d"), r"c\'d");
        assert_eq!(decode_escapes(br"\\\'"), r"\\\'");
    }

    #[test]
    fn decode_rescans_the_byte_after_a_kept_backslash() {
        assert_eq!(decode_escapes(br"\\n"), "\\\n");
        assert_eq!(decode_escapes(b"trailing\\"), "trailing\\");
    }

    #[test]
    fn decode_is_identity_without_backslashes() {
        let plain = "plain text, no escapes";
        assert_eq!(decode_escapes(plain.as_bytes()), plain);
        assert_eq!(decode_escapes(decode_escapes(plain.as_bytes()).as_bytes()), plain);
    }
}
