use std::collections::{HashMap, VecDeque};

#[cfg(feature = "debug")]
use tracing::debug;

use crate::error::{CommandError, UsageError};
use crate::model::{OptionName, Primitive, Value};
use crate::program::{Addr, GroupId, Instruction, NodeId, OptionAction, OptionId, Program};

/// Internal failure channel of a single invocation.
///
/// `Help`/`Version` are not errors; threading them through the failure
/// channel lets a builtin option short-circuit out of arbitrarily nested
/// subprogram execution.
pub(crate) enum Failure {
    Usage { index: usize, error: UsageError },
    Command(CommandError),
    Help,
    Version,
}

/// How much of the token stream the program owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Consume every token; leftovers are an error.
    Complete,
    /// Consume leading options only; stop at the first positional token.
    Prefix,
}

/// The interpreter's verdict over a token stream.
pub(crate) enum Action {
    Bound(BoundTree),
    Help,
    Version,
}

/// The materialized tree of converter invocations bound to concrete tokens.
pub(crate) struct BoundTree {
    pub arena: Vec<InvocationNode>,
    pub root: usize,
    /// Unconsumed suffix, in prefix mode.
    pub remaining: Vec<String>,
}

/// One pending converter invocation.
pub(crate) struct InvocationNode {
    pub node: NodeId,
    pub args: Vec<ArgBinding>,
    pub kwargs: HashMap<String, KwargBinding>,
}

/// One bound positional argument.
pub(crate) enum ArgBinding {
    /// A token awaiting primitive conversion.
    Raw {
        primitive: Primitive,
        index: usize,
        text: String,
    },
    /// A nested invocation.
    Node(usize),
    /// A skipped optional group; carries the declared default.
    Absent(Value),
}

/// One bound keyword argument.
pub(crate) enum KwargBinding {
    /// Toggle state after some number of appearances.
    Toggled(bool),
    /// A single bound value.
    Arg(ArgBinding),
    /// Recorded MultiOption appearances: (option token index, oparg row).
    Multi(Vec<(usize, Vec<ArgBinding>)>),
}

/// Drive `tokens` against the program, producing the bound invocation tree.
pub(crate) fn interpret(
    program: &Program,
    tokens: &[&str],
    mode: Mode,
) -> Result<Action, Failure> {
    let mut interp = Interp {
        program,
        mode,
        stream: tokens
            .iter()
            .enumerate()
            .map(|(index, text)| Token {
                index,
                text: text.to_string(),
                literal: false,
            })
            .collect(),
        end_index: tokens.len(),
        pc: 0,
        frames: Vec::default(),
        bases: vec![0],
        arena: Vec::default(),
        statics: Vec::default(),
        dynamics: Vec::default(),
        groups: Vec::default(),
        active_nodes: HashMap::default(),
        pending: HashMap::default(),
        no_more_options: false,
        depth: 0,
        released: None,
    };

    match interp.run_loop(false) {
        Ok(()) => {}
        Err(Failure::Help) => return Ok(Action::Help),
        Err(Failure::Version) => return Ok(Action::Version),
        Err(failure) => return Err(failure),
    }

    let root = interp
        .released
        .take()
        .unwrap_or_else(|| unreachable!("internal error - the program must release its root"));

    Ok(Action::Bound(BoundTree {
        arena: interp.arena,
        root,
        remaining: interp.stream.into_iter().map(|token| token.text).collect(),
    }))
}

#[derive(Debug)]
struct Token {
    index: usize,
    text: String,
    /// Split-off oparg values are never option-recognized.
    literal: bool,
}

enum Frame {
    Node(usize),
    Record(Vec<ArgBinding>),
}

struct Layer {
    /// Execution depth which pushed this layer; a dispatch never pops
    /// layers owned by a shallower depth (they belong to an in-flight
    /// subprogram below it).
    depth: usize,
    bindings: Vec<OptionId>,
}

struct GroupState {
    group: GroupId,
    committed: bool,
    frame_depth: usize,
    depth: usize,
}

enum Location {
    Static,
    Dynamic(usize),
}

struct Interp<'p> {
    program: &'p Program,
    mode: Mode,
    stream: VecDeque<Token>,
    /// One past the final original token; where missing tokens are reported.
    end_index: usize,
    pc: Addr,
    frames: Vec<Frame>,
    /// Frame stack watermark per subprogram nesting; a converter finalizing
    /// onto its base releases its value to the subprogram owner.
    bases: Vec<usize>,
    arena: Vec<InvocationNode>,
    statics: Vec<OptionId>,
    dynamics: Vec<Layer>,
    groups: Vec<GroupState>,
    active_nodes: HashMap<NodeId, usize>,
    /// Kwargs bound by early-mapped options before their frame exists.
    pending: HashMap<NodeId, HashMap<String, KwargBinding>>,
    no_more_options: bool,
    depth: usize,
    released: Option<usize>,
}

impl<'p> Interp<'p> {
    fn run_loop(&mut self, until_return: bool) -> Result<(), Failure> {
        loop {
            let instruction = self.program.instructions[self.pc].clone();

            if instruction.drains() {
                self.drain()?;
            }

            match instruction {
                Instruction::EnterConverter { node } => {
                    let kwargs = self.pending.remove(&node).unwrap_or_default();
                    let id = self.arena.len();
                    self.arena.push(InvocationNode {
                        node,
                        args: Vec::default(),
                        kwargs,
                    });
                    self.frames.push(Frame::Node(id));
                    self.active_nodes.insert(node, id);
                    self.pc += 1;
                }
                Instruction::ConsumeArgument { primitive, usage } => {
                    match self.stream.pop_front() {
                        Some(token) => {
                            // An oparg consume must not commit groups it is
                            // not nested within.
                            let depth = self.depth;
                            for state in &mut self.groups {
                                if state.depth == depth {
                                    state.committed = true;
                                }
                            }
                            if self.depth == 0 {
                                self.pop_layers_to(0);
                            }
                            self.current_args().push(ArgBinding::Raw {
                                primitive,
                                index: token.index,
                                text: token.text,
                            });
                            self.pc += 1;
                        }
                        None => {
                            let skippable = matches!(
                                self.groups.last(),
                                Some(state) if !state.committed && state.depth == self.depth
                            );
                            if skippable {
                                self.skip_group();
                            } else {
                                return Err(self.fail_at_end(UsageError::MissingArgument(usage)));
                            }
                        }
                    }
                }
                Instruction::CallConverter { .. } => {
                    let frame = self
                        .frames
                        .pop()
                        .unwrap_or_else(|| unreachable!("internal error - call without a frame"));
                    let id = match frame {
                        Frame::Node(id) => id,
                        Frame::Record(_) => {
                            unreachable!("internal error - call finalizing a record frame")
                        }
                    };
                    let base = *self
                        .bases
                        .last()
                        .unwrap_or_else(|| unreachable!("internal error - empty base stack"));

                    if self.frames.len() > base {
                        self.current_args().push(ArgBinding::Node(id));
                    } else {
                        self.released.replace(id);
                    }
                    self.pc += 1;
                }
                Instruction::MapOption { option } | Instruction::EarlyMap { option } => {
                    self.map(option);
                    self.pc += 1;
                }
                Instruction::UnmapOption { option } => {
                    self.unmap(option);
                    self.pc += 1;
                }
                Instruction::GroupBegin { group } => {
                    self.groups.push(GroupState {
                        group,
                        committed: false,
                        frame_depth: self.frames.len(),
                        depth: self.depth,
                    });
                    self.pc += 1;
                }
                Instruction::GroupEnd { .. } => {
                    self.groups
                        .pop()
                        .unwrap_or_else(|| unreachable!("internal error - unbalanced group end"));
                    self.pc += 1;
                }
                Instruction::BranchOnEmpty { target } => {
                    if self.stream.is_empty() {
                        self.pc = target;
                    } else {
                        self.pc += 1;
                    }
                }
                Instruction::Jump { target } => {
                    self.pc = target;
                }
                Instruction::Return => {
                    if until_return {
                        return Ok(());
                    }
                    unreachable!("internal error - return outside a subprogram");
                }
                Instruction::End => {
                    if until_return {
                        unreachable!("internal error - subprogram ran into the main end");
                    }
                    if self.mode == Mode::Complete {
                        if let Some(token) = self.stream.front() {
                            return Err(Failure::Usage {
                                index: token.index,
                                error: UsageError::TooManyArguments(token.text.clone()),
                            });
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Recognize and dispatch options from the head of the stream.
    /// Runs before every consuming or closing instruction.
    fn drain(&mut self) -> Result<(), Failure> {
        loop {
            let front = match self.stream.front() {
                Some(front) => front,
                None => return Ok(()),
            };

            if front.literal || self.no_more_options {
                return Ok(());
            }
            if front.text == "--" {
                self.stream.pop_front();
                self.no_more_options = true;
                continue;
            }
            if front.text == "-" || !front.text.starts_with('-') {
                return Ok(());
            }

            let token = self
                .stream
                .pop_front()
                .unwrap_or_else(|| unreachable!("internal error - peeked token must pop"));
            self.dispatch_token(token.index, &token.text)?;
        }
    }

    fn dispatch_token(&mut self, index: usize, text: &str) -> Result<(), Failure> {
        #[cfg(feature = "debug")]
        {
            debug!("Dispatching option token '{text}'.");
        }

        if let Some(body) = text.strip_prefix("--") {
            let (name, split) = match body.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (body, None),
            };
            return self.dispatch_named(index, OptionName::Long(name.to_string()), split);
        }

        let body = text
            .strip_prefix('-')
            .unwrap_or_else(|| unreachable!("internal error - option token without a dash"));
        let mut chars = body.chars();
        let single = chars
            .next()
            .unwrap_or_else(|| unreachable!("internal error - empty short option"));
        let rest = chars.as_str();
        let name = OptionName::Short(single);

        if rest.is_empty() {
            return self.dispatch_named(index, name, None);
        }
        if let Some(value) = rest.strip_prefix('=') {
            return self.dispatch_named(index, name, Some(value.to_string()));
        }

        // A glued cluster: the head character decides how the rest reads.
        let program = self.program;
        let (_, option) = self
            .lookup(&name)
            .ok_or_else(|| self.unknown(index, &name))?;
        let entry = &program.options[option];

        if entry.max_args == 0 {
            // More short options; push them back as their own token.
            self.stream.push_front(Token {
                index,
                text: format!("-{rest}"),
                literal: false,
            });
            self.dispatch_named(index, name, None)
        } else if entry.min_args == 0 && entry.max_args == 1 {
            // The single-optional-oparg form: -Xvalue.
            self.dispatch_named(index, name, Some(rest.to_string()))
        } else {
            Err(Failure::Usage {
                index,
                error: UsageError::ShortOptionNotLast {
                    option: single,
                    remainder: rest.to_string(),
                },
            })
        }
    }

    fn dispatch_named(
        &mut self,
        index: usize,
        name: OptionName,
        split: Option<String>,
    ) -> Result<(), Failure> {
        let program = self.program;
        let (location, option) = self
            .lookup(&name)
            .ok_or_else(|| self.unknown(index, &name))?;
        let entry = &program.options[option];

        if let Some(value) = &split {
            if entry.max_args == 0 {
                return Err(Failure::Usage {
                    index,
                    error: UsageError::SuperfluousOparg {
                        option: name.to_string(),
                        value: value.clone(),
                    },
                });
            }
            if entry.max_args >= 2 {
                return Err(Failure::Usage {
                    index,
                    error: UsageError::CompoundOparg {
                        option: name.to_string(),
                        value: value.clone(),
                    },
                });
            }
        }

        // Using an option closes every option scope nested inside the one
        // which maps it.
        match location {
            Location::Dynamic(layer) => self.pop_layers_to(layer + 1),
            Location::Static => self.pop_layers_to(0),
        }

        let owner = entry.owner;
        let param = entry.param.clone();
        let action = entry.action.clone();
        let group = entry.group;

        if let Some(group) = group {
            self.commit_through(group);
        }

        match action {
            OptionAction::Help => Err(Failure::Help),
            OptionAction::Version => Err(Failure::Version),
            OptionAction::Toggle => {
                let default = self.toggle_default(owner, &param);
                let kwargs = self.kwargs_mut(owner);
                let current = match kwargs.get(&param) {
                    Some(KwargBinding::Toggled(state)) => *state,
                    _ => default,
                };
                kwargs.insert(param, KwargBinding::Toggled(!current));
                Ok(())
            }
            OptionAction::Single { addr } => {
                self.push_split(index, split);
                let mut record = self.run_record(addr)?;
                let arg = match record.pop() {
                    Some(arg) if record.is_empty() => arg,
                    _ => unreachable!("internal error - single option arity mismatch"),
                };
                self.kwargs_mut(owner).insert(param, KwargBinding::Arg(arg));
                Ok(())
            }
            OptionAction::Multi { addr } => {
                self.push_split(index, split);
                let record = self.run_record(addr)?;
                let kwargs = self.kwargs_mut(owner);
                match kwargs
                    .entry(param)
                    .or_insert_with(|| KwargBinding::Multi(Vec::default()))
                {
                    KwargBinding::Multi(rows) => rows.push((index, record)),
                    _ => unreachable!("internal error - multi option rebound"),
                }
                Ok(())
            }
            OptionAction::Tree { addr, .. } => {
                self.push_split(index, split);
                // The option's own scope: child options map into it and
                // survive until a later token closes it.
                self.dynamics.push(Layer {
                    depth: self.depth,
                    bindings: Vec::default(),
                });
                let released = self.run_subprogram(addr)?;
                self.kwargs_mut(owner)
                    .insert(param, KwargBinding::Arg(ArgBinding::Node(released)));
                Ok(())
            }
        }
    }

    fn push_split(&mut self, index: usize, split: Option<String>) {
        if let Some(value) = split {
            self.stream.push_front(Token {
                index,
                text: value,
                literal: true,
            });
        }
    }

    /// Run an oparg subprogram collecting into a record frame.
    fn run_record(&mut self, addr: Addr) -> Result<Vec<ArgBinding>, Failure> {
        let layers = self.dynamics.len();
        self.bases.push(self.frames.len());
        self.frames.push(Frame::Record(Vec::default()));
        self.dynamics.push(Layer {
            depth: self.depth,
            bindings: Vec::default(),
        });

        let result = self.run_nested(addr);

        self.dynamics.truncate(layers);
        self.bases.pop();
        result?;

        match self.frames.pop() {
            Some(Frame::Record(args)) => Ok(args),
            _ => unreachable!("internal error - record frame corrupted"),
        }
    }

    /// Run a converter subprogram; returns the released invocation.
    fn run_subprogram(&mut self, addr: Addr) -> Result<usize, Failure> {
        self.bases.push(self.frames.len());
        let result = self.run_nested(addr);
        self.bases.pop();
        result?;

        self.released
            .take()
            .ok_or_else(|| unreachable!("internal error - subprogram released nothing"))
    }

    fn run_nested(&mut self, addr: Addr) -> Result<(), Failure> {
        let saved = self.pc;
        self.pc = addr;
        self.depth += 1;
        let result = self.run_loop(true);
        self.depth -= 1;
        self.pc = saved;
        result
    }

    fn skip_group(&mut self) {
        let state = self
            .groups
            .last()
            .unwrap_or_else(|| unreachable!("internal error - skip without a group"));
        let info = &self.program.groups[state.group];
        let default = info.default.clone();
        let skip = info.skip;
        let frame_depth = state.frame_depth;

        #[cfg(feature = "debug")]
        {
            debug!("Skipping uncommitted group {group}.", group = state.group);
        }

        self.frames.truncate(frame_depth);
        self.current_args().push(ArgBinding::Absent(default));
        self.pc = skip;
    }

    fn pop_layers_to(&mut self, target: usize) {
        while self.dynamics.len() > target {
            match self.dynamics.last() {
                Some(layer) if layer.depth >= self.depth => {
                    self.dynamics.pop();
                }
                _ => break,
            }
        }
    }

    fn commit_through(&mut self, group: GroupId) {
        if let Some(position) = self.groups.iter().position(|state| state.group == group) {
            for state in &mut self.groups[..=position] {
                state.committed = true;
            }
        }
    }

    fn map(&mut self, option: OptionId) {
        if self.depth > 0 {
            self.dynamics
                .last_mut()
                .unwrap_or_else(|| unreachable!("internal error - no layer for a nested map"))
                .bindings
                .push(option);
        } else {
            self.statics.push(option);
        }
    }

    fn unmap(&mut self, option: OptionId) {
        let bindings = if self.depth > 0 {
            &mut self
                .dynamics
                .last_mut()
                .unwrap_or_else(|| unreachable!("internal error - no layer for a nested unmap"))
                .bindings
        } else {
            &mut self.statics
        };

        if let Some(position) = bindings.iter().rposition(|&bound| bound == option) {
            bindings.remove(position);
        }
    }

    fn lookup(&self, name: &OptionName) -> Option<(Location, OptionId)> {
        for (layer_index, layer) in self.dynamics.iter().enumerate().rev() {
            for &option in layer.bindings.iter().rev() {
                if &self.program.options[option].name == name {
                    return Some((Location::Dynamic(layer_index), option));
                }
            }
        }

        for &option in self.statics.iter().rev() {
            if &self.program.options[option].name == name {
                return Some((Location::Static, option));
            }
        }

        None
    }

    fn unknown(&self, index: usize, name: &OptionName) -> Failure {
        let error = match self.program.option_parents.get(name) {
            Some(parents) => UsageError::OptionScope {
                option: name.to_string(),
                parents: disjunction(parents),
            },
            None => UsageError::UnknownOption(name.to_string()),
        };

        Failure::Usage { index, error }
    }

    fn fail_at_end(&self, error: UsageError) -> Failure {
        Failure::Usage {
            index: self.end_index,
            error,
        }
    }

    fn toggle_default(&self, owner: NodeId, param: &str) -> bool {
        let info = self.program.nodes[owner]
            .kwargs
            .iter()
            .find(|kwarg| kwarg.name == param)
            .unwrap_or_else(|| unreachable!("internal error - toggle without a declaration"));

        match info.default {
            Value::Bool(default) => default,
            _ => unreachable!("internal error - toggle default must be boolean"),
        }
    }

    fn kwargs_mut(&mut self, owner: NodeId) -> &mut HashMap<String, KwargBinding> {
        match self.active_nodes.get(&owner) {
            Some(&id) => &mut self.arena[id].kwargs,
            None => self.pending.entry(owner).or_default(),
        }
    }

    fn current_args(&mut self) -> &mut Vec<ArgBinding> {
        match self
            .frames
            .last_mut()
            .unwrap_or_else(|| unreachable!("internal error - no frame to receive arguments"))
        {
            Frame::Node(id) => &mut self.arena[*id].args,
            Frame::Record(args) => args,
        }
    }
}

pub(crate) fn disjunction(names: &[OptionName]) -> String {
    let rendered: Vec<String> = names.iter().map(|name| name.to_string()).collect();

    match rendered.split_last() {
        None => String::default(),
        Some((only, [])) => only.clone(),
        Some((last, head)) => format!("{} or {last}", head.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjunction_formats() {
        assert_eq!(disjunction(&[OptionName::Short('v')]), "-v");
        assert_eq!(
            disjunction(&[
                OptionName::Long("option".to_string()),
                OptionName::Short('o'),
            ]),
            "--option or -o"
        );
        assert_eq!(
            disjunction(&[
                OptionName::Short('a'),
                OptionName::Short('b'),
                OptionName::Short('c'),
            ]),
            "-a, -b or -c"
        );
    }
}
