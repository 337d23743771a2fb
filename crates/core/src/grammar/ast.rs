use std::any::Any;
use std::fmt;

use pl2_diagnostics::{SourceInfo, Span};
use serde::{Deserialize, Serialize};

use crate::language::PCallFn;

/// Index of a command inside its [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(usize);

impl CommandId {
    /// Id of the command at position `index`.
    ///
    /// Nothing checks that the index exists; the engine rejects jumps to
    /// missing commands with `INVALID_REDIRECT`.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the command in file order.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resolved token: its text plus whether it was quoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdPart {
    /// Decoded text. Quoted parts have their escapes applied.
    pub text: String,
    /// Whether the part came from a quoted string.
    pub is_string: bool,
}

impl CmdPart {
    /// A bare-token part.
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_string: false,
        }
    }

    /// A quoted-string part.
    pub fn string(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_string: true,
        }
    }

    /// The decoded text.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// What the engine remembered about a command on its first execution.
#[derive(Clone, Default)]
pub(crate) enum Resolution {
    /// Not executed yet, or only ever handled by simple-invoke or fallback.
    #[default]
    Unresolved,
    /// Bound to a program-call entry. `None` records an empty entry.
    Bound(Option<PCallFn>),
}

/// One command: a name, its arguments, and where it came from.
///
/// Everything except the extension slot is fixed once parsing finishes.
pub struct Command {
    id: CommandId,
    source: SourceInfo,
    span: Span,
    name: CmdPart,
    args: Vec<CmdPart>,
    extension: Option<Box<dyn Any>>,
    pub(crate) resolve: Resolution,
}

impl Command {
    pub(crate) fn new(
        id: CommandId,
        source: SourceInfo,
        span: Span,
        name: CmdPart,
        args: Vec<CmdPart>,
    ) -> Self {
        Self {
            id,
            source,
            span,
            name,
            args,
            extension: None,
            resolve: Resolution::Unresolved,
        }
    }

    /// This command's position in its program.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// File and line of the command's first fragment.
    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    /// 1-based line of the command's first fragment.
    pub fn line(&self) -> u32 {
        self.source.line
    }

    /// Byte range from the first fragment to the last.
    pub fn span(&self) -> Span {
        self.span
    }

    /// The command name (first fragment).
    pub fn name(&self) -> &CmdPart {
        &self.name
    }

    /// The arguments (remaining fragments).
    pub fn args(&self) -> &[CmdPart] {
        &self.args
    }

    /// Backend data attached to this command, if any.
    pub fn extension(&self) -> Option<&dyn Any> {
        self.extension.as_deref()
    }

    /// Typed view of the attached backend data.
    pub fn extension_as<T: Any>(&self) -> Option<&T> {
        self.extension.as_deref().and_then(|e| e.downcast_ref())
    }

    /// Mutable typed view of the attached backend data.
    pub fn extension_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.extension.as_deref_mut().and_then(|e| e.downcast_mut())
    }

    /// Attach backend data, returning whatever was attached before.
    pub fn set_extension(&mut self, data: Box<dyn Any>) -> Option<Box<dyn Any>> {
        self.extension.replace(data)
    }

    /// Detach the backend data.
    pub fn take_extension(&mut self) -> Option<Box<dyn Any>> {
        self.extension.take()
    }

    /// The name followed by every argument's text.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.name.as_str())
            .chain(self.args.iter().map(CmdPart::as_str))
            .collect()
    }

    pub(crate) fn clear_runtime_state(&mut self) {
        self.resolve = Resolution::Unresolved;
        self.extension = None;
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("line", &self.source.line)
            .field("name", &self.name)
            .field("args", &self.args)
            .field("has_extension", &self.extension.is_some())
            .finish_non_exhaustive()
    }
}

/// A parsed program: its commands in file order.
///
/// Commands live in one arena and are addressed by [`CommandId`];
/// "previous" and "next" are neighbouring indices.
#[derive(Debug, Default)]
pub struct Program {
    commands: Vec<Command>,
}

impl Program {
    pub(crate) fn from_commands(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the program has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The first command, if any.
    pub fn first(&self) -> Option<CommandId> {
        (!self.commands.is_empty()).then_some(CommandId(0))
    }

    /// The last command, if any.
    pub fn last(&self) -> Option<CommandId> {
        self.commands.len().checked_sub(1).map(CommandId)
    }

    /// The command after `id`, if any.
    pub fn next(&self, id: CommandId) -> Option<CommandId> {
        let next = id.0.checked_add(1)?;
        (next < self.commands.len()).then_some(CommandId(next))
    }

    /// The command before `id`, if any.
    pub fn prev(&self, id: CommandId) -> Option<CommandId> {
        if !self.contains(id) {
            return None;
        }
        id.0.checked_sub(1).map(CommandId)
    }

    /// Whether `id` names a command of this program.
    pub fn contains(&self, id: CommandId) -> bool {
        id.0 < self.commands.len()
    }

    /// The command with the given id.
    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(id.0)
    }

    /// Mutable access to a command (for its extension slot).
    pub fn get_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.commands.get_mut(id.0)
    }

    /// Iterate over the commands in file order.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Drop every resolve-cache entry and extension slot.
    pub(crate) fn clear_runtime_state(&mut self) {
        for cmd in &mut self.commands {
            cmd.clear_runtime_state();
        }
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
