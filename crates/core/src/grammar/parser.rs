use std::sync::Arc;

use pl2_diagnostics::{Diagnostic, ErrorCode, SourceInfo, Span};

use super::{
    ast::{CmdPart, Command, CommandId, Program},
    cursor::{Cursor, Mode},
    lexer::{self, Fragment, is_id_char, is_quote},
};
use crate::config::ParseConfig;

// ─── Public API ─────────────────────────────────────────────────────────────

/// Parse source text with default settings.
pub fn parse_str(input: &str) -> Result<Program, Diagnostic> {
    parse_with_config(input, &ParseConfig::default())
}

/// Parse source text.
///
/// Parsing stops at the first error; no partial program is returned.
pub fn parse_with_config(input: &str, config: &ParseConfig) -> Result<Program, Diagnostic> {
    let program = Parser::new(input, config).parse()?;
    tracing::debug!(
        file = %config.file_name,
        commands = program.len(),
        "parsed program"
    );
    Ok(program)
}

// ─── Parser Implementation ─────────────────────────────────────────────────

/// A `?` directive at the start of a line.
enum Directive {
    Begin,
    End,
}

struct Parser<'a> {
    cursor: Cursor<'a>,
    file: Arc<str>,
    capacity: usize,
    fragments: Vec<Fragment>,
    commands: Vec<Command>,
    /// Span and line of the `?begin` that opened the current block.
    block_start: Option<(Span, u32)>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, config: &ParseConfig) -> Self {
        Self {
            cursor: Cursor::new(input),
            file: Arc::clone(&config.file_name),
            capacity: config.fragment_capacity,
            fragments: Vec::new(),
            commands: Vec::new(),
            block_start: None,
        }
    }

    fn error_here(&self, code: ErrorCode, message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic::error(code, message)
            .at(SourceInfo::new(Arc::clone(&self.file), self.cursor.line()))
            .with_span(span)
    }

    // ── Main parse loop ─────────────────────────────────────────────────

    fn parse(mut self) -> Result<Program, Diagnostic> {
        loop {
            if self.cursor.at_line_start() && self.cursor.peek() == Some(b'?') {
                self.directive()?;
                continue;
            }

            self.cursor.skip_whitespace();
            match self.cursor.peek() {
                None => break,
                Some(b'\n') => {
                    self.cursor.bump();
                    if self.cursor.mode() == Mode::Single {
                        self.flush();
                    }
                }
                Some(b'#') => self.cursor.skip_line(),
                Some(b) if is_quote(b) => {
                    let fragment = lexer::quoted(&mut self.cursor, &self.file)?;
                    self.push(fragment)?;
                }
                Some(b) if is_id_char(b) => {
                    let fragment = lexer::bare(&mut self.cursor);
                    self.push(fragment)?;
                }
                Some(b) => {
                    let pos = self.cursor.pos();
                    return Err(self.error_here(
                        ErrorCode::UNEXPECTED_CHARACTER,
                        format!("unexpected character {:?}", b as char),
                        Span::new(pos, pos + 1),
                    ));
                }
            }
        }

        if self.cursor.mode() == Mode::Multi {
            let pos = self.cursor.pos();
            let (span, line) = self
                .block_start
                .unwrap_or((Span::empty(pos), self.cursor.line()));
            return Err(Diagnostic::error(
                ErrorCode::UNCLOSED_BLOCK,
                "unclosed `?begin` block at end of input",
            )
            .at(SourceInfo::new(Arc::clone(&self.file), line))
            .with_span(span));
        }
        self.flush();
        Ok(Program::from_commands(self.commands))
    }

    /// Handle `?begin` or `?end`. The cursor sits on the `?`.
    fn directive(&mut self) -> Result<(), Diagnostic> {
        let start = self.cursor.pos();
        self.cursor.bump();
        let name_start = self.cursor.eat_while(|b| b.is_ascii_alphanumeric());
        let name = self.cursor.slice(name_start, self.cursor.pos());
        let directive = match name {
            b"begin" => Directive::Begin,
            b"end" => Directive::End,
            _ => {
                let span = Span::new(start, self.cursor.pos());
                return Err(self.error_here(
                    ErrorCode::UNKNOWN_DIRECTIVE,
                    format!("unknown `?` operator `{}`", String::from_utf8_lossy(name)),
                    span,
                ));
            }
        };
        match directive {
            Directive::Begin => {
                if self.cursor.mode() == Mode::Single {
                    let span = Span::new(start, self.cursor.pos());
                    self.block_start = Some((span, self.cursor.line()));
                }
                self.cursor.set_mode(Mode::Multi);
            }
            Directive::End => {
                self.block_start = None;
                self.cursor.set_mode(Mode::Single);
                self.flush();
            }
        }
        Ok(())
    }

    fn push(&mut self, fragment: Fragment) -> Result<(), Diagnostic> {
        if self.fragments.len() + 1 >= self.capacity {
            return Err(self.error_here(
                ErrorCode::FRAGMENT_BUFFER_EXCEEDED,
                format!(
                    "command has more than {} parts",
                    self.capacity.saturating_sub(1)
                ),
                fragment.span,
            ));
        }
        self.fragments.push(fragment);
        Ok(())
    }

    /// Turn the accumulated fragments into a command, if there are any.
    fn flush(&mut self) {
        let mut fragments = std::mem::take(&mut self.fragments).into_iter();
        let Some(first) = fragments.next() else {
            return;
        };
        let line = first.line;
        let start = first.span.start;
        let mut end = first.span.end;
        let args: Vec<CmdPart> = fragments
            .map(|f| {
                end = f.span.end;
                f.part
            })
            .collect();
        let id = CommandId::new(self.commands.len());
        self.commands.push(Command::new(
            id,
            SourceInfo::new(Arc::clone(&self.file), line),
            Span::new(start, end),
            first.part,
            args,
        ));
    }
}
