use std::collections::{HashMap, HashSet, VecDeque};

#[cfg(feature = "debug")]
use tracing::debug;

use crate::model::{OptionName, Primitive};
use crate::program::{
    Addr, GroupInfo, Instruction, KwargInfo, NodeId, NodeInfo, OptionAction, OptionEntry, OptionId,
    Program,
};
use crate::tree::{Child, OptionDecl, OptionDeclKind, Slot, TreeNode};

/// Builtin injections requested for a program.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Builtins {
    pub help: bool,
    pub version: bool,
}

/// Flatten a converter tree into its linear grammar program.
pub(crate) fn compile(tree: &TreeNode, builtins: Builtins) -> Program {
    let mut compiler = Compiler {
        instructions: Vec::default(),
        nodes: Vec::default(),
        options: Vec::default(),
        groups: Vec::default(),
        option_parents: HashMap::default(),
        ids: HashMap::default(),
        early: HashSet::default(),
        queue: VecDeque::default(),
    };

    compiler.index(tree);
    let main_length = compiler.emit_main(tree, builtins);
    compiler.emit_subprograms();
    compiler.peephole();

    #[cfg(feature = "debug")]
    {
        debug!(
            "Compiled {instructions} instructions over {nodes} nodes, {options} option mappings.",
            instructions = compiler.instructions.len(),
            nodes = compiler.nodes.len(),
            options = compiler.options.len(),
        );
    }

    Program {
        instructions: compiler.instructions,
        nodes: compiler.nodes,
        options: compiler.options,
        groups: compiler.groups,
        option_parents: compiler.option_parents,
        main_length,
    }
}

struct Subwork<'t> {
    entries: Vec<OptionId>,
    kind: SubworkKind<'t>,
    param: String,
    parents: Vec<OptionName>,
}

enum SubworkKind<'t> {
    Single(Primitive, String),
    Tree(&'t TreeNode),
    Multi(&'t [Slot]),
}

struct Compiler<'t> {
    instructions: Vec<Instruction>,
    nodes: Vec<NodeInfo>,
    options: Vec<OptionEntry>,
    groups: Vec<GroupInfo>,
    option_parents: HashMap<OptionName, Vec<OptionName>>,
    ids: HashMap<*const TreeNode, NodeId>,
    /// Declaration sites which were early mapped, keyed by (owner, index);
    /// suppressed at node entry so each option maps exactly once per scope.
    early: HashSet<(NodeId, usize)>,
    queue: VecDeque<Subwork<'t>>,
}

impl<'t> Compiler<'t> {
    /// Assign node ids in pre-order so early maps can reference descendants
    /// before their instructions are emitted.
    fn index(&mut self, node: &'t TreeNode) {
        let id = self.nodes.len();
        self.ids.insert(node as *const TreeNode, id);
        self.nodes.push(NodeInfo {
            name: node.name.clone(),
            callable: node.callable.clone(),
            kwargs: node
                .options
                .iter()
                .map(|decl| KwargInfo {
                    name: decl.param.clone(),
                    default: decl.default.clone(),
                    multi: match &decl.kind {
                        OptionDeclKind::Multi { spec, .. } => Some(spec.clone()),
                        _ => None,
                    },
                })
                .collect(),
        });

        for slot in &node.positionals {
            self.index_child(&slot.child);
        }
        if let Some(slot) = &node.variadic {
            self.index_child(&slot.child);
        }
        for decl in &node.options {
            match &decl.kind {
                OptionDeclKind::Tree(child) => self.index(child),
                OptionDeclKind::Multi { opargs, .. } => {
                    for slot in opargs {
                        self.index_child(&slot.child);
                    }
                }
                OptionDeclKind::Toggle | OptionDeclKind::Primitive(_) => {}
            }
        }
    }

    fn index_child(&mut self, child: &'t Child) {
        if let Child::Tree(node) = child {
            self.index(node);
        }
    }

    fn id(&self, node: &TreeNode) -> NodeId {
        *self
            .ids
            .get(&(node as *const TreeNode))
            .unwrap_or_else(|| unreachable!("internal error - node must be indexed"))
    }

    fn emit(&mut self, instruction: Instruction) -> Addr {
        let address = self.instructions.len();
        self.instructions.push(instruction);
        address
    }

    fn emit_main(&mut self, root: &'t TreeNode, builtins: Builtins) -> usize {
        let id = self.id(root);
        self.emit(Instruction::EnterConverter { node: id });

        let mut mapped = Vec::default();
        if builtins.help {
            mapped.extend(self.inject_builtin(
                root,
                id,
                vec![
                    OptionName::Short('h'),
                    OptionName::Long("help".to_string()),
                ],
                OptionAction::Help,
            ));
        }
        if builtins.version {
            mapped.extend(self.inject_builtin(
                root,
                id,
                vec![
                    OptionName::Short('v'),
                    OptionName::Long("version".to_string()),
                ],
                OptionAction::Version,
            ));
        }

        mapped.extend(self.emit_node_maps(root, id, &[]));
        self.emit_slots(&root.positionals, root.variadic.as_ref(), &[]);
        self.emit_unmaps(&mapped);
        self.emit(Instruction::CallConverter {
            param: String::default(),
        });
        self.emit(Instruction::End);
        self.instructions.len()
    }

    // Builtin options skip any name the user already claims at the root.
    fn inject_builtin(
        &mut self,
        root: &TreeNode,
        id: NodeId,
        names: Vec<OptionName>,
        action: OptionAction,
    ) -> Vec<OptionId> {
        let free: Vec<OptionName> = names
            .into_iter()
            .filter(|name| {
                !root
                    .options
                    .iter()
                    .any(|decl| decl.names.contains(name))
            })
            .collect();
        let mut mapped = Vec::default();

        for name in &free {
            let option = self.options.len();
            self.options.push(OptionEntry {
                name: name.clone(),
                siblings: free.clone(),
                owner: id,
                param: String::default(),
                action: action.clone(),
                group: None,
                min_args: 0,
                max_args: 0,
                oparg_usage: String::default(),
            });
            self.emit(Instruction::MapOption { option });
            mapped.push(option);
        }

        mapped
    }

    fn emit_node_maps(
        &mut self,
        node: &'t TreeNode,
        id: NodeId,
        parents: &[OptionName],
    ) -> Vec<OptionId> {
        let mut mapped = Vec::default();

        for (index, decl) in node.options.iter().enumerate() {
            if self.early.contains(&(id, index)) {
                continue;
            }
            for option in self.create_entries(decl, id, None, parents) {
                self.emit(Instruction::MapOption { option });
                mapped.push(option);
            }
        }

        mapped
    }

    fn emit_unmaps(&mut self, mapped: &[OptionId]) {
        for option in mapped.iter().rev() {
            self.emit(Instruction::UnmapOption { option: *option });
        }
    }

    fn emit_slots(
        &mut self,
        positionals: &'t [Slot],
        variadic: Option<&'t Slot>,
        parents: &[OptionName],
    ) {
        for slot in positionals {
            if slot.default.is_some() {
                self.emit_group(slot, parents);
            } else {
                self.emit_slot_child(slot, parents);
            }
        }

        if let Some(slot) = variadic {
            let branch = self.emit(Instruction::BranchOnEmpty { target: usize::MAX });
            self.emit_slot_child(slot, parents);
            self.emit(Instruction::Jump { target: branch });
            let exit = self.instructions.len();
            self.patch_target(branch, exit);
        }
    }

    fn emit_slot_child(&mut self, slot: &'t Slot, parents: &[OptionName]) {
        match &slot.child {
            Child::Primitive(primitive) => {
                self.emit(Instruction::ConsumeArgument {
                    primitive: *primitive,
                    usage: slot.usage.clone(),
                });
            }
            Child::Tree(node) => {
                let id = self.id(node);
                self.emit(Instruction::EnterConverter { node: id });
                let mapped = self.emit_node_maps(node, id, parents);
                self.emit_slots(&node.positionals, node.variadic.as_ref(), parents);
                self.emit_unmaps(&mapped);
                self.emit(Instruction::CallConverter {
                    param: slot.param.clone(),
                });
            }
        }
    }

    fn emit_group(&mut self, slot: &'t Slot, parents: &[OptionName]) {
        let group = self.groups.len();
        self.groups.push(GroupInfo {
            skip: usize::MAX,
            default: slot
                .default
                .clone()
                .unwrap_or_else(|| unreachable!("internal error - groups come from defaults")),
        });

        self.emit(Instruction::GroupBegin { group });
        let early = self.emit_early_maps(&slot.child, group, parents);
        self.emit_slot_child(slot, parents);
        self.groups[group].skip = self.instructions.len();
        self.emit_unmaps(&early);
        self.emit(Instruction::GroupEnd { group });
    }

    // Early mapping: every option on the positional descent of the group's
    // subtree becomes recognizable at group entry; consuming one commits
    // the group.
    fn emit_early_maps(
        &mut self,
        child: &'t Child,
        group: usize,
        parents: &[OptionName],
    ) -> Vec<OptionId> {
        let mut mapped = Vec::default();
        self.collect_early_maps(child, group, parents, &mut mapped);
        mapped
    }

    fn collect_early_maps(
        &mut self,
        child: &'t Child,
        group: usize,
        parents: &[OptionName],
        mapped: &mut Vec<OptionId>,
    ) {
        let node = match child {
            Child::Tree(node) => node,
            Child::Primitive(_) => return,
        };
        let id = self.id(node);

        for (index, decl) in node.options.iter().enumerate() {
            if !self.early.insert((id, index)) {
                continue;
            }
            for option in self.create_entries(decl, id, Some(group), parents) {
                self.emit(Instruction::EarlyMap { option });
                mapped.push(option);
            }
        }

        for slot in &node.positionals {
            self.collect_early_maps(&slot.child, group, parents, mapped);
        }
        if let Some(slot) = &node.variadic {
            self.collect_early_maps(&slot.child, group, parents, mapped);
        }
    }

    fn create_entries(
        &mut self,
        decl: &'t OptionDecl,
        owner: NodeId,
        group: Option<usize>,
        parents: &[OptionName],
    ) -> Vec<OptionId> {
        let (min_args, max_args) = decl.arity();
        let (action, kind) = match &decl.kind {
            OptionDeclKind::Toggle => (OptionAction::Toggle, None),
            OptionDeclKind::Primitive(primitive) => (
                OptionAction::Single { addr: usize::MAX },
                Some(SubworkKind::Single(*primitive, decl.usage.clone())),
            ),
            OptionDeclKind::Tree(node) => (
                OptionAction::Tree {
                    addr: usize::MAX,
                    node: self.id(node),
                },
                Some(SubworkKind::Tree(node.as_ref())),
            ),
            OptionDeclKind::Multi { opargs, .. } => (
                OptionAction::Multi { addr: usize::MAX },
                Some(SubworkKind::Multi(opargs.as_slice())),
            ),
        };
        let oparg_usage = oparg_shape(decl);
        let mut entries = Vec::default();

        for name in &decl.names {
            let option = self.options.len();
            self.options.push(OptionEntry {
                name: name.clone(),
                siblings: decl.names.clone(),
                owner,
                param: decl.param.clone(),
                action: action.clone(),
                group,
                min_args,
                max_args,
                oparg_usage: oparg_usage.clone(),
            });
            entries.push(option);

            if !parents.is_empty() {
                self.option_parents
                    .entry(name.clone())
                    .or_insert_with(|| parents.to_vec());
            }
        }

        if let Some(kind) = kind {
            self.queue.push_back(Subwork {
                entries: entries.clone(),
                kind,
                param: decl.param.clone(),
                parents: decl.names.clone(),
            });
        }

        entries
    }

    fn emit_subprograms(&mut self) {
        while let Some(work) = self.queue.pop_front() {
            let addr = self.instructions.len();

            match work.kind {
                SubworkKind::Single(primitive, usage) => {
                    self.emit(Instruction::ConsumeArgument { primitive, usage });
                    self.emit(Instruction::Return);
                }
                SubworkKind::Multi(opargs) => {
                    self.emit_slots(opargs, None, &work.parents);
                    self.emit(Instruction::Return);
                }
                SubworkKind::Tree(node) => {
                    let id = self.id(node);
                    self.emit(Instruction::EnterConverter { node: id });
                    self.emit_slots(&node.positionals, node.variadic.as_ref(), &work.parents);
                    // Child options map after the required opargs consume.
                    self.emit_node_maps(node, id, &work.parents);
                    self.emit(Instruction::CallConverter { param: work.param });
                    self.emit(Instruction::Return);
                }
            }

            for entry in work.entries {
                match &mut self.options[entry].action {
                    OptionAction::Single { addr: slot }
                    | OptionAction::Tree { addr: slot, .. }
                    | OptionAction::Multi { addr: slot } => *slot = addr,
                    _ => unreachable!("internal error - subwork for an immediate action"),
                }
            }
        }
    }

    fn patch_target(&mut self, address: Addr, target: Addr) {
        match &mut self.instructions[address] {
            Instruction::BranchOnEmpty { target: slot } | Instruction::Jump { target: slot } => {
                *slot = target;
            }
            _ => unreachable!("internal error - patching a non-branch instruction"),
        }
    }

    // One pass of jump-to-jump elimination.
    fn peephole(&mut self) {
        for address in 0..self.instructions.len() {
            let target = match &self.instructions[address] {
                Instruction::Jump { target } | Instruction::BranchOnEmpty { target } => *target,
                _ => continue,
            };
            let mut resolved = target;
            let mut hops = 0;

            while let Instruction::Jump { target: next } = &self.instructions[resolved] {
                resolved = *next;
                hops += 1;
                if hops > self.instructions.len() {
                    unreachable!("internal error - jump cycle in compiled program");
                }
            }

            if resolved != target {
                self.patch_target(address, resolved);
            }
        }
    }
}

fn oparg_shape(decl: &OptionDecl) -> String {
    match &decl.kind {
        OptionDeclKind::Toggle => String::default(),
        OptionDeclKind::Primitive(_) => decl.usage.clone(),
        OptionDeclKind::Tree(node) => node_shape(node),
        OptionDeclKind::Multi { opargs, .. } => slots_shape(opargs, None),
    }
}

fn node_shape(node: &TreeNode) -> String {
    slots_shape(&node.positionals, node.variadic.as_ref())
}

fn slots_shape(positionals: &[Slot], variadic: Option<&Slot>) -> String {
    let mut parts = Vec::default();

    for slot in positionals {
        let inner = child_shape(slot);
        if slot.default.is_some() {
            parts.push(format!("[{inner}]"));
        } else {
            parts.push(inner);
        }
    }
    if let Some(slot) = variadic {
        parts.push(format!("[{}]...", child_shape(slot)));
    }

    parts.join(" ")
}

fn child_shape(slot: &Slot) -> String {
    match &slot.child {
        Child::Primitive(_) => slot.usage.clone(),
        Child::Tree(node) => node_shape(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{Callable, Converter};
    use crate::model::Value;
    use crate::signature::{Param, Signature};
    use crate::tree::{build_tree, Overrides};
    use std::sync::Arc;

    fn tree_of(signature: Signature) -> TreeNode {
        let callable = Callable::new("subject", signature, |_| Ok(Value::Null));
        build_tree(&callable, &Overrides::default()).unwrap()
    }

    #[test]
    fn simple_shape() {
        // Setup
        let tree = tree_of(
            Signature::builder()
                .add(Param::required("a"))
                .add(Param::optional("b", Value::Null))
                .add(Param::keyword("flag", Value::Bool(false)))
                .build()
                .unwrap(),
        );

        // Execute
        let program = compile(&tree, Builtins::default());

        // Verify
        assert_eq!(
            program.instructions,
            vec![
                Instruction::EnterConverter { node: 0 },
                Instruction::MapOption { option: 0 },
                Instruction::MapOption { option: 1 },
                Instruction::ConsumeArgument {
                    primitive: Primitive::Str,
                    usage: "a".to_string(),
                },
                Instruction::GroupBegin { group: 0 },
                Instruction::ConsumeArgument {
                    primitive: Primitive::Str,
                    usage: "b".to_string(),
                },
                Instruction::GroupEnd { group: 0 },
                Instruction::UnmapOption { option: 1 },
                Instruction::UnmapOption { option: 0 },
                Instruction::CallConverter {
                    param: String::default(),
                },
                Instruction::End,
            ]
        );
        // The skip address lands on the group close.
        assert_eq!(program.groups[0].skip, 6);
        assert_eq!(program.options[0].name, OptionName::Long("flag".to_string()));
        assert_eq!(program.options[1].name, OptionName::Short('f'));
    }

    #[test]
    fn variadic_loop_shape() {
        // Setup
        let tree = tree_of(
            Signature::builder()
                .add(Param::variadic("items"))
                .build()
                .unwrap(),
        );

        // Execute
        let program = compile(&tree, Builtins::default());

        // Verify
        assert_eq!(
            program.instructions,
            vec![
                Instruction::EnterConverter { node: 0 },
                Instruction::BranchOnEmpty { target: 4 },
                Instruction::ConsumeArgument {
                    primitive: Primitive::Str,
                    usage: "items".to_string(),
                },
                Instruction::Jump { target: 1 },
                Instruction::CallConverter {
                    param: String::default(),
                },
                Instruction::End,
            ]
        );
    }

    #[test]
    fn early_map_precedes_group_child() {
        // Setup
        let child = Callable::new(
            "child",
            Signature::builder()
                .add(Param::required("x"))
                .add(Param::keyword("verbose", Value::Bool(false)))
                .build()
                .unwrap(),
            |_| Ok(Value::Null),
        );
        let tree = tree_of(
            Signature::builder()
                .add(Param::required("a"))
                .add(
                    Param::optional("b", Value::Null)
                        .converter(Converter::callable(Arc::clone(&child))),
                )
                .build()
                .unwrap(),
        );

        // Execute
        let program = compile(&tree, Builtins::default());

        // Verify
        let begin = program
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::GroupBegin { .. }))
            .unwrap();
        let enter_child = program
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::EnterConverter { node: 1 }))
            .unwrap();
        assert_matches!(
            program.instructions[begin + 1],
            Instruction::EarlyMap { .. }
        );
        assert_matches!(
            program.instructions[begin + 2],
            Instruction::EarlyMap { .. }
        );
        assert!(begin + 2 < enter_child);
        // The early mapped strings are suppressed at node entry.
        assert_eq!(
            program
                .instructions
                .iter()
                .filter(|i| matches!(i, Instruction::MapOption { .. }))
                .count(),
            0
        );
    }

    #[test]
    fn option_subprogram_addresses() {
        // Setup
        let tree = tree_of(
            Signature::builder()
                .add(Param::keyword("number", Value::Int(0)))
                .build()
                .unwrap(),
        );

        // Execute
        let program = compile(&tree, Builtins::default());

        // Verify
        let addr = match program.options[0].action {
            OptionAction::Single { addr } => addr,
            _ => panic!("unexpected action"),
        };
        assert!(addr >= program.main_length);
        assert_matches!(
            program.instructions[addr],
            Instruction::ConsumeArgument { primitive: Primitive::Int, .. }
        );
        assert_eq!(program.instructions[addr + 1], Instruction::Return);
    }

    #[test]
    fn nested_loop_peephole() {
        // Setup
        // Nested loops exercise the branch/jump addressing the hardest.
        let pair = Callable::new(
            "pair",
            Signature::builder()
                .add(Param::required("head"))
                .add(Param::variadic("tail"))
                .build()
                .unwrap(),
            |_| Ok(Value::Null),
        );
        let tree = tree_of(
            Signature::builder()
                .add(Param::variadic("pairs").converter(Converter::callable(pair)))
                .build()
                .unwrap(),
        );

        // Execute
        let program = compile(&tree, Builtins::default());

        // Verify
        // No branch may resolve onto a jump after the peephole pass.
        for instruction in &program.instructions {
            if let Instruction::BranchOnEmpty { target } | Instruction::Jump { target } =
                instruction
            {
                assert!(
                    !matches!(program.instructions[*target], Instruction::Jump { .. }),
                    "{program:?} retains a jump-to-jump"
                );
            }
        }
    }

    #[test]
    fn compile_idempotent() {
        // Setup
        let child = Callable::new(
            "child",
            Signature::builder()
                .add(Param::required("x"))
                .add(Param::keyword("verbose", Value::Bool(false)))
                .build()
                .unwrap(),
            |_| Ok(Value::Null),
        );
        let signature = Signature::builder()
            .add(Param::required("a"))
            .add(Param::optional("b", Value::Null).converter(Converter::callable(child)))
            .add(Param::variadic("rest"))
            .add(Param::keyword("number", Value::Int(0)))
            .build()
            .unwrap();
        let callable = Callable::new("subject", signature, |_| Ok(Value::Null));
        let tree = build_tree(&callable, &Overrides::default()).unwrap();

        // Execute
        let first = compile(&tree, Builtins { help: true, version: false });
        let second = compile(&tree, Builtins { help: true, version: false });

        // Verify
        assert_eq!(first.instructions, second.instructions);
        assert_eq!(first.main_length, second.main_length);
        assert_eq!(
            first
                .options
                .iter()
                .map(|entry| (entry.name.clone(), entry.action.clone()))
                .collect::<Vec<_>>(),
            second
                .options
                .iter()
                .map(|entry| (entry.name.clone(), entry.action.clone()))
                .collect::<Vec<_>>(),
        );
    }
}
