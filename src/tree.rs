use std::collections::HashMap;
use std::sync::Arc;

use crate::convert::{Callable, Converter, MultiSpec};
use crate::error::ConfigurationError;
use crate::model::{
    parameter_to_long_option, parameter_to_short_option, OptionName, Primitive, Value,
};
use crate::signature::Param;

/// Option and usage overrides registered against one command.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub command: String,
    pub options: HashMap<String, Vec<String>>,
    pub usage: HashMap<String, String>,
}

/// One converter in the tree: the callable to invoke plus the slots and
/// options describing how its arguments are consumed.
#[derive(Debug)]
pub(crate) struct TreeNode {
    pub name: String,
    pub callable: Converter,
    pub positionals: Vec<Slot>,
    pub variadic: Option<Slot>,
    pub options: Vec<OptionDecl>,
}

/// One positional consumption slot of a node.
#[derive(Debug)]
pub(crate) struct Slot {
    pub param: String,
    pub usage: String,
    pub default: Option<Value>,
    pub child: Child,
}

/// What a slot consumes: a single-token primitive, or a nested converter.
#[derive(Debug)]
pub(crate) enum Child {
    Primitive(Primitive),
    Tree(Box<TreeNode>),
}

/// One keyword-only parameter of a node, with its resolved option strings.
#[derive(Debug)]
pub(crate) struct OptionDecl {
    pub param: String,
    pub names: Vec<OptionName>,
    pub default: Value,
    pub usage: String,
    pub kind: OptionDeclKind,
}

pub(crate) enum OptionDeclKind {
    Toggle,
    Primitive(Primitive),
    Tree(Box<TreeNode>),
    Multi {
        spec: Arc<dyn MultiSpec>,
        opargs: Vec<Slot>,
    },
}

impl std::fmt::Debug for OptionDeclKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionDeclKind::Toggle => write!(f, "Toggle"),
            OptionDeclKind::Primitive(primitive) => {
                f.debug_tuple("Primitive").field(primitive).finish()
            }
            OptionDeclKind::Tree(node) => f.debug_tuple("Tree").field(node).finish(),
            OptionDeclKind::Multi { spec, opargs } => f
                .debug_struct("Multi")
                .field("spec", &spec.name())
                .field("opargs", opargs)
                .finish(),
        }
    }
}

impl Child {
    /// The minimum number of tokens this subtree must consume.
    pub(crate) fn min_tokens(&self) -> usize {
        match self {
            Child::Primitive(_) => 1,
            Child::Tree(node) => node.min_tokens(),
        }
    }

    /// The maximum number of tokens this subtree can consume
    /// (`usize::MAX` when a var-positional makes it unbounded).
    pub(crate) fn max_tokens(&self) -> usize {
        match self {
            Child::Primitive(_) => 1,
            Child::Tree(node) => node.max_tokens(),
        }
    }
}

impl TreeNode {
    pub(crate) fn min_tokens(&self) -> usize {
        self.positionals
            .iter()
            .filter(|slot| slot.default.is_none())
            .map(|slot| slot.child.min_tokens())
            .sum()
    }

    pub(crate) fn max_tokens(&self) -> usize {
        if self.variadic.is_some() {
            return usize::MAX;
        }

        self.positionals
            .iter()
            .map(|slot| slot.child.max_tokens())
            .fold(0usize, |total, max| total.saturating_add(max))
    }
}

impl OptionDecl {
    /// The token arity of this option's opargs.
    pub(crate) fn arity(&self) -> (usize, usize) {
        match &self.kind {
            OptionDeclKind::Toggle => (0, 0),
            OptionDeclKind::Primitive(_) => (1, 1),
            OptionDeclKind::Tree(node) => (node.min_tokens(), node.max_tokens()),
            OptionDeclKind::Multi { opargs, .. } => {
                let min = opargs.iter().map(|slot| slot.child.min_tokens()).sum();
                let max = opargs
                    .iter()
                    .map(|slot| slot.child.max_tokens())
                    .fold(0usize, |total, m| total.saturating_add(m));
                (min, max)
            }
        }
    }
}

/// Build the converter tree for a command callable, applying the command's
/// registered overrides at the root.
pub(crate) fn build_tree(
    callable: &Arc<Callable>,
    overrides: &Overrides,
) -> Result<TreeNode, ConfigurationError> {
    let mut ancestry = Vec::default();
    build_node(callable, Some(overrides), &mut ancestry)
}

fn build_node(
    callable: &Arc<Callable>,
    overrides: Option<&Overrides>,
    ancestry: &mut Vec<*const Callable>,
) -> Result<TreeNode, ConfigurationError> {
    let pointer = Arc::as_ptr(callable);

    if ancestry.contains(&pointer) {
        return Err(ConfigurationError::RecursiveConverter(
            callable.name.clone(),
        ));
    }

    ancestry.push(pointer);
    let result = build_node_inner(callable, overrides, ancestry);
    ancestry.pop();
    result
}

fn build_node_inner(
    callable: &Arc<Callable>,
    overrides: Option<&Overrides>,
    ancestry: &mut Vec<*const Callable>,
) -> Result<TreeNode, ConfigurationError> {
    let signature = &callable.signature;
    let mut positionals = Vec::default();
    let mut variadic = None;
    let mut options = Vec::default();
    let mut claimed: Vec<OptionName> = Vec::default();

    if let Some(overrides) = overrides {
        for parameter in overrides.usage.keys() {
            if !signature.parameters.iter().any(|p| &p.name == parameter) {
                return Err(ConfigurationError::UnknownParameter {
                    command: overrides.command.clone(),
                    parameter: parameter.clone(),
                });
            }
        }
    }

    for param in signature.positionals() {
        positionals.push(build_slot(param, overrides, ancestry)?);
    }

    if let Some(param) = signature.variadic() {
        let slot = build_slot(param, overrides, ancestry)?;
        if slot.child.min_tokens() == 0 {
            return Err(ConfigurationError::UnboundedVariadic(param.name.clone()));
        }
        variadic.replace(slot);
    }

    for param in signature.keywords() {
        let mut decl = build_option(param, overrides, ancestry)?;
        if decl.names.is_empty() {
            decl.names = generate_names(&param.name, &claimed);
        }
        claim_names(&decl, &mut claimed, &callable.name)?;
        options.push(decl);
    }

    // Options registered against parameter names the callable does not
    // declare land in the keyword bag, as plain strings.
    if let Some(overrides) = overrides {
        let mut extras: Vec<(&String, &Vec<String>)> = overrides
            .options
            .iter()
            .filter(|(name, _)| signature.parameters.iter().all(|p| &p.name != *name))
            .collect();
        extras.sort_by(|a, b| a.0.cmp(b.0));

        for (parameter, strings) in extras {
            let decl = OptionDecl {
                param: parameter.clone(),
                names: parse_names(strings)?,
                default: Value::Null,
                usage: parameter.clone(),
                kind: OptionDeclKind::Primitive(Primitive::Str),
            };
            claim_names(&decl, &mut claimed, &callable.name)?;
            options.push(decl);
        }
    }

    Ok(TreeNode {
        name: callable.name.clone(),
        callable: Converter::Callable(Arc::clone(callable)),
        positionals,
        variadic,
        options,
    })
}

fn build_slot(
    param: &Param,
    overrides: Option<&Overrides>,
    ancestry: &mut Vec<*const Callable>,
) -> Result<Slot, ConfigurationError> {
    let converter = effective_converter(param)?;
    let child = match converter {
        Converter::Primitive(primitive) => Child::Primitive(primitive),
        Converter::Callable(callable) => {
            Child::Tree(Box::new(build_node(&callable, None, ancestry)?))
        }
        other => {
            return Err(ConfigurationError::InvalidAnnotation {
                converter: other.description(),
                parameter: param.name.clone(),
            });
        }
    };

    Ok(Slot {
        param: param.name.clone(),
        usage: usage_for(param, overrides),
        default: param.default.clone(),
        child,
    })
}

fn build_option(
    param: &Param,
    overrides: Option<&Overrides>,
    ancestry: &mut Vec<*const Callable>,
) -> Result<OptionDecl, ConfigurationError> {
    let default = param
        .default
        .clone()
        .unwrap_or_else(|| unreachable!("internal error - keyword parameters carry defaults"));
    let converter = effective_converter(param)?;

    let kind = match converter {
        Converter::Toggle => {
            if !matches!(default, Value::Bool(_)) {
                return Err(ConfigurationError::InvalidAnnotation {
                    converter: "toggle".to_string(),
                    parameter: param.name.clone(),
                });
            }
            OptionDeclKind::Toggle
        }
        Converter::Primitive(primitive) => OptionDeclKind::Primitive(primitive),
        Converter::Callable(callable) => {
            OptionDeclKind::Tree(Box::new(build_node(&callable, None, ancestry)?))
        }
        Converter::Multi(spec) => {
            let mut opargs = Vec::default();
            let oparg_params: Vec<Param> = spec.signature().positionals().cloned().collect();
            for oparg in &oparg_params {
                opargs.push(build_slot(oparg, None, ancestry)?);
            }
            OptionDeclKind::Multi { spec, opargs }
        }
    };

    let explicit = overrides
        .and_then(|o| o.options.get(&param.name))
        .cloned()
        .unwrap_or_else(|| param.option_strings.clone());
    let names = if explicit.is_empty() {
        Vec::default()
    } else {
        parse_names(&explicit)?
    };

    Ok(OptionDecl {
        param: param.name.clone(),
        names,
        default,
        usage: usage_for(param, overrides),
        kind,
    })
}

// The default option generator: `--name-with-dashes` always, plus the
// first-letter short when unclaimed.  First-come first-served: earlier
// declarations win the contested short letter.
fn generate_names(parameter: &str, claimed: &[OptionName]) -> Vec<OptionName> {
    let mut names = vec![parameter_to_long_option(parameter)];

    if let Some(short) = parameter_to_short_option(parameter) {
        if !claimed.contains(&short) {
            names.push(short);
        }
    }

    names
}

fn claim_names(
    decl: &OptionDecl,
    claimed: &mut Vec<OptionName>,
    scope: &str,
) -> Result<(), ConfigurationError> {
    for name in &decl.names {
        if claimed.contains(name) {
            return Err(ConfigurationError::DuplicateOption(
                name.to_string(),
                scope.to_string(),
            ));
        }
        claimed.push(name.clone());
    }

    Ok(())
}

fn parse_names(strings: &[String]) -> Result<Vec<OptionName>, ConfigurationError> {
    strings
        .iter()
        .map(|text| {
            OptionName::parse(text)
                .map_err(|_| ConfigurationError::InvalidOptionString(text.clone()))
        })
        .collect()
}

fn usage_for(param: &Param, overrides: Option<&Overrides>) -> String {
    overrides
        .and_then(|o| o.usage.get(&param.name))
        .cloned()
        .unwrap_or_else(|| param.usage_name())
}

/// The effective converter for a parameter, by priority:
/// 1. the explicit annotation;
/// 2. the type of the default value (null reads as string; a boolean default
///    on a keyword parameter reads as the toggle);
/// 3. string.
fn effective_converter(param: &Param) -> Result<Converter, ConfigurationError> {
    if let Some(converter) = &param.converter {
        return Ok(converter.clone());
    }

    match &param.default {
        None | Some(Value::Null) => Ok(Converter::str()),
        Some(Value::Bool(_)) => {
            if param.kind == crate::signature::ParamKind::KeywordOnly {
                Ok(Converter::Toggle)
            } else {
                Ok(Converter::bool())
            }
        }
        Some(Value::Int(_)) => Ok(Converter::int()),
        Some(Value::Float(_)) => Ok(Converter::float()),
        Some(Value::Complex(_)) => Ok(Converter::complex()),
        Some(Value::Str(_)) => Ok(Converter::str()),
        Some(Value::List(_)) | Some(Value::Map(_)) => Err(
            ConfigurationError::UnderivableConverter(param.name.clone()),
        ),
    }
}
