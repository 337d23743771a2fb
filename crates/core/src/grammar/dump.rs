use std::fmt::Write as _;

use pl2_diagnostics::Span;
use serde::Serialize;

use super::ast::{CmdPart, Program};

/// Serializable view of one command.
#[derive(Debug, Serialize)]
pub struct CommandDump<'a> {
    /// Position in file order.
    pub index: usize,
    /// 1-based source line.
    pub line: u32,
    /// Byte range in the source text.
    pub span: Span,
    /// Command name.
    pub name: &'a CmdPart,
    /// Arguments in order.
    pub args: &'a [CmdPart],
}

/// Serializable view of a whole program.
#[derive(Debug, Serialize)]
pub struct ProgramDump<'a> {
    /// Source file name, taken from the first command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<&'a str>,
    /// Commands in file order.
    pub commands: Vec<CommandDump<'a>>,
}

impl<'a> ProgramDump<'a> {
    /// Build the view for `program`.
    pub fn new(program: &'a Program) -> Self {
        Self {
            file: program.iter().next().map(|c| &*c.source().file),
            commands: program
                .iter()
                .map(|c| CommandDump {
                    index: c.id().index(),
                    line: c.line(),
                    span: c.span(),
                    name: c.name(),
                    args: c.args(),
                })
                .collect(),
        }
    }
}

/// Serialize a program to a pretty-printed JSON string.
pub fn to_pretty_json(program: &Program) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&ProgramDump::new(program))
}

/// Render a program as indented text, one command per line.
///
/// Bare tokens are shown in backticks and quoted strings in double quotes
/// with their decoded text escaped, e.g.
///
/// ```text
/// 3: `print` [`x`, "a \"b\""]
/// ```
pub fn to_text(program: &Program) -> String {
    let mut out = String::new();
    for cmd in program {
        let _ = write!(out, "{}: {} [", cmd.line(), render_part(cmd.name()));
        for (i, arg) in cmd.args().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&render_part(arg));
        }
        out.push_str("]\n");
    }
    out
}

fn render_part(part: &CmdPart) -> String {
    if part.is_string {
        format!("{:?}", part.text)
    } else {
        format!("`{}`", part.text)
    }
}
