/// Program model: commands, parts, and the command arena.
pub mod ast;
/// Position, line, and lexing-mode tracking over the source text.
pub mod cursor;
/// Text and JSON renderings of a parsed program.
pub mod dump;
/// Token scanning: bare tokens, quoted strings, escape decoding.
pub mod lexer;
/// Line-oriented parser with `?begin`/`?end` block mode.
pub mod parser;
