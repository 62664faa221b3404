use std::collections::HashMap;
use std::sync::Arc;

use crate::convert::{Converter, MultiSpec};
use crate::model::{OptionName, Primitive, Value};

pub(crate) type Addr = usize;
pub(crate) type NodeId = usize;
pub(crate) type OptionId = usize;
pub(crate) type GroupId = usize;

/// One instruction of the linear grammar program.
///
/// The main program ends with `End`; option subprograms follow it and end
/// with `Return`.  Instructions split into two classes the interpreter cares
/// about: *opening* instructions execute immediately, while *consuming* and
/// *closing* instructions let pending options drain from the token stream
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Instruction {
    /// Push a pending invocation frame for `node`.
    EnterConverter { node: NodeId },
    /// Consume one positional token into the current frame.
    ConsumeArgument { primitive: Primitive, usage: String },
    /// Finalize the current frame into the parent's next argument slot.
    CallConverter { param: String },
    /// Make an option recognizable in the current scope.
    MapOption { option: OptionId },
    /// Provisionally map an option of a not-yet-committed group.
    EarlyMap { option: OptionId },
    /// Remove an option from the current scope, restoring any shadowed mapping.
    UnmapOption { option: OptionId },
    /// Open an optional argument group.
    GroupBegin { group: GroupId },
    /// Close an optional argument group.
    GroupEnd { group: GroupId },
    /// Jump to `target` when no positional tokens remain.
    BranchOnEmpty { target: Addr },
    /// Unconditional jump.
    Jump { target: Addr },
    /// End of an option subprogram.
    Return,
    /// End of the main program.
    End,
}

impl Instruction {
    /// Whether options drain from the stream before this instruction runs.
    pub(crate) fn drains(&self) -> bool {
        matches!(
            self,
            Instruction::ConsumeArgument { .. }
                | Instruction::CallConverter { .. }
                | Instruction::UnmapOption { .. }
                | Instruction::GroupEnd { .. }
                | Instruction::BranchOnEmpty { .. }
                | Instruction::End
        )
    }
}

/// Static description of a converter node referenced by the program.
pub(crate) struct NodeInfo {
    pub name: String,
    pub callable: Converter,
    pub kwargs: Vec<KwargInfo>,
}

/// Static description of one keyword parameter of a node.
pub(crate) struct KwargInfo {
    pub name: String,
    pub default: Value,
    pub multi: Option<Arc<dyn MultiSpec>>,
}

/// What invoking an option does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OptionAction {
    /// Print help and stop.
    Help,
    /// Print the version and stop.
    Version,
    /// Negate the boolean default; consumes no opargs.
    Toggle,
    /// Consume one primitive oparg.
    Single { addr: Addr },
    /// Run a converter subprogram; its frame receives the opargs.
    Tree { addr: Addr, node: NodeId },
    /// Append one oparg record to the option's accumulated state.
    Multi { addr: Addr },
}

/// One mapped option string: where it points and how it consumes.
pub(crate) struct OptionEntry {
    pub name: OptionName,
    /// Every string mapped for the same declaration, for diagnostics.
    pub siblings: Vec<OptionName>,
    pub owner: NodeId,
    pub param: String,
    pub action: OptionAction,
    /// The group committed by invoking this (early mapped) option.
    pub group: Option<GroupId>,
    pub min_args: usize,
    pub max_args: usize,
    /// Rendered oparg metavars for the usage line.
    pub oparg_usage: String,
}

/// One optional argument group.
pub(crate) struct GroupInfo {
    /// Where to resume when the group is skipped (its unmap/end sequence).
    pub skip: Addr,
    /// The value the parent slot receives when the group is skipped.
    pub default: Value,
}

/// The compiled grammar: a linear program over a node table, an option
/// table, and a group table.  Immutable once compiled; shared by every
/// processor driving it.
pub(crate) struct Program {
    pub instructions: Vec<Instruction>,
    pub nodes: Vec<NodeInfo>,
    pub options: Vec<OptionEntry>,
    pub groups: Vec<GroupInfo>,
    /// Child option string → the parent options which map it; consulted to
    /// explain out-of-scope option use.
    pub option_parents: HashMap<OptionName, Vec<OptionName>>,
    /// Length of the main program (the `End` instruction address + 1).
    pub main_length: usize,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Program[")?;
        for (address, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "  {address:>3}: {instruction:?}")?;
        }
        write!(f, "]")
    }
}
