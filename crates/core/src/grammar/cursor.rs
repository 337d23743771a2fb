/// Lexing mode of the current logical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every newline ends the logical line.
    Single,
    /// Inside `?begin` ... `?end`: newlines do not end the logical line.
    Multi,
}

/// Position, line number, and lexing mode over the source text.
///
/// All reads of the source go through the cursor so that the line counter
/// stays in step with the consumed newlines.
#[derive(Debug)]
pub struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    mode: Mode,
}

impl<'a> Cursor<'a> {
    /// A cursor at the start of `src`, on line 1, in single-line mode.
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            mode: Mode::Single,
        }
    }

    /// Byte offset of the next unread character.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 1-based line of the next unread character.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Current lexing mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch lexing mode.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Whether all input has been consumed.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Whether the cursor sits in column 0.
    pub fn at_line_start(&self) -> bool {
        self.pos == 0 || self.src.get(self.pos - 1) == Some(&b'\n')
    }

    /// The next unread byte.
    pub fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    /// Consume one byte, counting newlines.
    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    /// Consume bytes while `pred` holds. Returns the consumed range start.
    pub fn eat_while(&mut self, pred: impl Fn(u8) -> bool) -> usize {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.bump();
        }
        start
    }

    /// Skip horizontal whitespace (everything `is_ascii_whitespace` except `\n`).
    pub fn skip_whitespace(&mut self) {
        self.eat_while(|b| b != b'\n' && (b.is_ascii_whitespace() || b == 0x0b));
    }

    /// Skip to the end of the line, leaving the newline unread.
    pub fn skip_line(&mut self) {
        self.eat_while(|b| b != b'\n');
    }

    /// The raw bytes in `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.src[start..end]
    }
}
