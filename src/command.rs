use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::compile::{compile, Builtins};
use crate::convert::Callable;
use crate::error::{ConfigurationError, ErrorContext, RunError, UsageError};
use crate::exec::evaluate;
use crate::interface::{ConsoleInterface, UserInterface};
use crate::interp::{interpret, Action, Failure, Mode};
use crate::model::Value;
use crate::program::Program;
use crate::signature::Signature;
use crate::tree::{build_tree, Overrides};
use crate::usage::{commands_help, help_message, usage_line};

/// The root registration surface: bind callables to command names, then
/// [`Appeal::build`] freezes the configuration into an immutable [`App`].
///
/// ### Example
/// ```
/// use appeal::{Appeal, Callable, Param, Signature, Value};
///
/// let hello = Callable::new(
///     "hello",
///     Signature::builder().add(Param::required("name")).build().unwrap(),
///     |call| Ok(Value::from(format!("hello {}", call.arg(0).unwrap()))),
/// );
/// let app = Appeal::new("greeter").command("hello", hello).build().unwrap();
///
/// let value = app.processor().run(&["hello", "world"]).unwrap();
/// assert_eq!(value, Value::from("hello world"));
/// ```
pub struct Appeal {
    program: String,
    about: Option<String>,
    version: Option<String>,
    global: Option<Arc<Callable>>,
    root: SetNode,
    overrides: HashMap<String, Overrides>,
    deferred_error: Option<ConfigurationError>,
}

#[derive(Default)]
struct SetNode {
    command: Option<Arc<Callable>>,
    about: Option<String>,
    default: Option<Arc<Callable>>,
    subs: IndexMap<String, SetNode>,
}

impl Appeal {
    /// Create a registration surface for the named program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            about: None,
            version: None,
            global: None,
            root: SetNode::default(),
            overrides: HashMap::default(),
            deferred_error: None,
        }
    }

    /// Document the program's about message.
    /// If repeated, only the final message will apply.
    pub fn about(mut self, description: impl Into<String>) -> Self {
        self.about.replace(description.into());
        self
    }

    /// Declare the program version, enabling the `version` command and the
    /// `--version` option.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version.replace(version.into());
        self
    }

    /// Register a command at the root.
    pub fn command(self, name: impl Into<String>, callable: Arc<Callable>) -> Self {
        let name = name.into();
        let path = name.clone();
        self.register(&path, move |node| {
            if !node.subs.is_empty() {
                return Some(ConfigurationError::CommandWithSubcommands(name));
            }
            if node.command.replace(callable).is_some() {
                return Some(ConfigurationError::DuplicateCommand(name));
            }
            None
        })
    }

    /// Register a subcommand under an existing command path.
    /// Intermediate branch nodes are created as needed.
    pub fn subcommand(
        self,
        parent: impl Into<String>,
        name: impl Into<String>,
        callable: Arc<Callable>,
    ) -> Self {
        let path = join_path(&parent.into(), &name.into());
        self.command(path, callable)
    }

    /// Register the default command for a branch node (the empty path is the
    /// root).  Invoked when the node has subcommands and the user names none.
    pub fn default_command(self, parent: impl Into<String>, callable: Arc<Callable>) -> Self {
        let parent = parent.into();
        let path = parent.clone();
        self.register(&path, move |node| {
            if node.default.replace(callable).is_some() {
                return Some(ConfigurationError::DuplicateCommand(format!(
                    "{parent} (default)"
                )));
            }
            None
        })
    }

    /// Register the global command: its options precede the first command
    /// token and apply to every invocation.
    pub fn global_command(mut self, callable: Arc<Callable>) -> Self {
        self.global.replace(callable);
        self
    }

    /// Document the about message for a command path.
    pub fn describe(self, path: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        self.register(&path.into(), move |node| {
            node.about.replace(description);
            None
        })
    }

    /// Override the option strings bound to `parameter` of the command at
    /// `path`.  A parameter name the callable does not declare lands in the
    /// keyword bag as a plain string option.
    pub fn option<S: Into<String>>(
        mut self,
        path: impl Into<String>,
        parameter: impl Into<String>,
        strings: impl IntoIterator<Item = S>,
    ) -> Self {
        let path = path.into();
        let overrides = self
            .overrides
            .entry(path.clone())
            .or_insert_with(|| Overrides {
                command: path,
                ..Overrides::default()
            });
        overrides
            .options
            .insert(parameter.into(), strings.into_iter().map(Into::into).collect());
        self
    }

    /// Override the usage string (metavar) for `parameter` of the command at
    /// `path`.
    pub fn usage(
        mut self,
        path: impl Into<String>,
        parameter: impl Into<String>,
        usage: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let overrides = self
            .overrides
            .entry(path.clone())
            .or_insert_with(|| Overrides {
                command: path,
                ..Overrides::default()
            });
        overrides.usage.insert(parameter.into(), usage.into());
        self
    }

    fn register(
        mut self,
        path: &str,
        apply: impl FnOnce(&mut SetNode) -> Option<ConfigurationError>,
    ) -> Self {
        if self.deferred_error.is_some() {
            return self;
        }

        let mut node = &mut self.root;
        for segment in path.split(' ').filter(|segment| !segment.is_empty()) {
            if node.command.is_some() {
                self.deferred_error
                    .replace(ConfigurationError::CommandWithSubcommands(
                        path.to_string(),
                    ));
                return self;
            }
            node = node.subs.entry(segment.to_string()).or_default();
        }

        if let Some(error) = apply(node) {
            self.deferred_error.replace(error);
        }
        self
    }

    /// Freeze the configuration: build every converter tree, compile every
    /// grammar program, and check the registration for errors.
    pub fn build(self) -> Result<App, ConfigurationError> {
        if let Some(error) = self.deferred_error {
            return Err(error);
        }

        for path in self.overrides.keys() {
            if path.is_empty() {
                continue;
            }
            let mut node = Some(&self.root);
            for segment in path.split(' ') {
                node = node.and_then(|node| node.subs.get(segment));
            }
            match node {
                Some(node) if node.command.is_some() => {}
                _ => return Err(ConfigurationError::UnknownCommandPath(path.clone())),
            }
        }

        let global_callable = match &self.global {
            Some(callable) => {
                if callable.signature.positionals().count() > 0
                    || callable.signature.variadic().is_some()
                {
                    return Err(ConfigurationError::GlobalPositional(
                        callable.name.clone(),
                    ));
                }
                Arc::clone(callable)
            }
            None => Callable::new(self.program.clone(), Signature::empty(), |_| Ok(Value::Null)),
        };
        let empty = Overrides {
            command: self.program.clone(),
            ..Overrides::default()
        };
        let global_overrides = self.overrides.get("").unwrap_or(&empty);
        let global_tree = build_tree(&global_callable, global_overrides)?;
        let global = CompiledCommand {
            path: self.program.clone(),
            program: compile(
                &global_tree,
                Builtins {
                    help: true,
                    version: self.version.is_some(),
                },
            ),
            about: self.about.clone(),
        };

        let builtin_help = !self.root.subs.contains_key("help");
        let builtin_version = self.version.is_some() && !self.root.subs.contains_key("version");
        let root = compile_set(&self.root, &self.program, &self.overrides, String::default())?;

        Ok(App {
            program: self.program,
            about: self.about,
            version: self.version,
            global,
            root,
            builtin_help,
            builtin_version,
        })
    }
}

fn join_path(parent: &str, name: &str) -> String {
    match (parent.is_empty(), name.is_empty()) {
        (_, true) => parent.to_string(),
        (true, false) => name.to_string(),
        (false, false) => format!("{parent} {name}"),
    }
}

fn compile_set(
    node: &SetNode,
    program_name: &str,
    overrides: &HashMap<String, Overrides>,
    path: String,
) -> Result<CompiledSet, ConfigurationError> {
    let display_path = join_path(program_name, &path);

    let command = match &node.command {
        Some(callable) => {
            let empty = Overrides {
                command: path.clone(),
                ..Overrides::default()
            };
            let command_overrides = overrides.get(&path).unwrap_or(&empty);
            let tree = build_tree(callable, command_overrides)?;
            Some(CompiledCommand {
                path: display_path.clone(),
                program: compile(
                    &tree,
                    Builtins {
                        help: true,
                        version: false,
                    },
                ),
                about: node.about.clone(),
            })
        }
        None => None,
    };

    let default = match &node.default {
        Some(callable) => {
            if callable.signature.positionals().count() > 0
                || callable.signature.variadic().is_some()
            {
                return Err(ConfigurationError::DefaultPositional(callable.name.clone()));
            }
            let tree = build_tree(
                callable,
                &Overrides {
                    command: path.clone(),
                    ..Overrides::default()
                },
            )?;
            Some(CompiledCommand {
                path: display_path.clone(),
                program: compile(
                    &tree,
                    Builtins {
                        help: true,
                        version: false,
                    },
                ),
                about: None,
            })
        }
        None => None,
    };

    let mut subs = IndexMap::default();
    for (name, sub) in &node.subs {
        let sub_path = join_path(&path, name);
        subs.insert(
            name.clone(),
            compile_set(sub, program_name, overrides, sub_path)?,
        );
    }

    Ok(CompiledSet {
        command,
        about: node.about.clone(),
        default,
        subs,
    })
}

#[derive(Debug)]
struct CompiledCommand {
    path: String,
    program: Program,
    about: Option<String>,
}

#[derive(Debug)]
struct CompiledSet {
    command: Option<CompiledCommand>,
    about: Option<String>,
    default: Option<CompiledCommand>,
    subs: IndexMap<String, CompiledSet>,
}

impl CompiledSet {
    fn listing(&self) -> Vec<(String, Option<String>)> {
        self.subs
            .iter()
            .map(|(name, sub)| {
                let about = sub
                    .command
                    .as_ref()
                    .and_then(|command| command.about.clone())
                    .or_else(|| sub.about.clone());
                (name.clone(), about)
            })
            .collect()
    }
}

/// The frozen program: compiled grammars ready to drive.
///
/// Immutable and safe to share; each invocation runs on its own
/// [`Processor`].
#[derive(Debug)]
pub struct App {
    program: String,
    about: Option<String>,
    version: Option<String>,
    global: CompiledCommand,
    root: CompiledSet,
    builtin_help: bool,
    builtin_version: bool,
}

impl App {
    /// Create a processor holding the mutable state of one or more runs.
    pub fn processor(&self) -> Processor<'_> {
        self.processor_with_interface(Box::new(ConsoleInterface::default()))
    }

    pub(crate) fn processor_with_interface(
        &self,
        interface: Box<dyn UserInterface>,
    ) -> Processor<'_> {
        Processor {
            app: self,
            interface,
            path: Vec::default(),
            usage: None,
        }
    }

    /// Drive one token sequence to completion, printing errors and the usage
    /// line to the console, and produce the process exit code.
    pub fn execute(&self, tokens: &[&str]) -> i32 {
        self.processor().execute(tokens)
    }
}

/// One invocation driver over a frozen [`App`].
///
/// The compiled grammar is shared and read-only; all mutable runtime state
/// lives here.
pub struct Processor<'app> {
    app: &'app App,
    interface: Box<dyn UserInterface>,
    path: Vec<String>,
    usage: Option<String>,
}

impl<'app> Processor<'app> {
    /// Drive a token sequence against the program and produce the command's
    /// return value.
    ///
    /// Builtin help/version output is printed and yields `Value::Null`.
    pub fn run(&mut self, tokens: &[&str]) -> Result<Value, RunError> {
        let app = self.app;
        self.path = vec![app.program.clone()];
        self.usage
            .replace(usage_line(&app.program, &app.global.program));

        // 1. The global command's options prefix everything.
        let bound = match interpret(&app.global.program, tokens, Mode::Prefix)
            .map_err(|failure| self.fail(tokens, failure))?
        {
            Action::Help => {
                self.print_root_help();
                return Ok(Value::Null);
            }
            Action::Version => {
                self.print_version();
                return Ok(Value::Null);
            }
            Action::Bound(bound) => bound,
        };
        evaluate(&app.global.program, &bound).map_err(|failure| self.fail(tokens, failure))?;

        let remaining: Vec<&str> = bound.remaining.iter().map(AsRef::as_ref).collect();

        // 2. Builtin commands, unless shadowed by registration.
        match remaining.first() {
            Some(&"help") if app.builtin_help => {
                return self.run_help(&remaining[1..]);
            }
            Some(&"version") if app.builtin_version => {
                self.print_version();
                return Ok(Value::Null);
            }
            _ => {}
        }

        // 3. Resolve the command path.
        let mut node = &app.root;
        let mut index = 0;
        while index < remaining.len() {
            match node.subs.get(remaining[index]) {
                Some(sub) => {
                    self.path.push(remaining[index].to_string());
                    node = sub;
                    index += 1;
                }
                None => break,
            }
        }
        let rest = &remaining[index..];

        match &node.command {
            Some(command) => self.run_command(command, rest),
            None => {
                if let Some(first) = rest.first() {
                    Err(RunError::Usage {
                        error: UsageError::UnknownCommand(first.to_string()),
                        context: ErrorContext::new(0, rest),
                    })
                } else if let Some(default) = &node.default {
                    self.run_command(default, &[])
                } else {
                    // The builtin default: print this node's usage.
                    let path = self.path.join(" ");
                    self.interface.print(commands_help(&path, &node.listing()));
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Like [`Processor::run`], but report errors through the interface and
    /// produce the process exit code.
    pub fn execute(&mut self, tokens: &[&str]) -> i32 {
        match self.run(tokens) {
            Ok(value) => value.exit_code(),
            Err(RunError::Usage { error, context }) => {
                let path = self.path.join(" ");
                self.interface.print_error(format!("{path}: {error}"));
                self.interface.print_error(context.to_string());
                if let Some(usage) = &self.usage {
                    self.interface.print_error(usage.clone());
                }
                2
            }
            Err(RunError::Command(error)) => {
                let path = self.path.join(" ");
                self.interface
                    .print_error(format!("{path}: {}", error.message));
                error.code
            }
        }
    }

    fn run_command(&mut self, command: &CompiledCommand, tokens: &[&str]) -> Result<Value, RunError> {
        self.usage
            .replace(usage_line(&command.path, &command.program));

        match interpret(&command.program, tokens, Mode::Complete)
            .map_err(|failure| self.fail(tokens, failure))?
        {
            Action::Help => {
                self.interface.print(help_message(
                    &command.path,
                    &command.program,
                    command.about.as_deref(),
                ));
                Ok(Value::Null)
            }
            Action::Version => {
                self.print_version();
                Ok(Value::Null)
            }
            Action::Bound(bound) => evaluate(&command.program, &bound)
                .map_err(|failure| self.fail(tokens, failure)),
        }
    }

    fn run_help(&mut self, path: &[&str]) -> Result<Value, RunError> {
        let app = self.app;
        let mut node = &app.root;
        let mut display = vec![app.program.clone()];

        for (position, segment) in path.iter().enumerate() {
            match node.subs.get(*segment) {
                Some(sub) => {
                    display.push(segment.to_string());
                    node = sub;
                }
                None => {
                    return Err(RunError::Usage {
                        error: UsageError::UnknownCommand(segment.to_string()),
                        context: ErrorContext::new(position, path),
                    });
                }
            }
        }

        match &node.command {
            Some(command) => {
                self.interface.print(help_message(
                    &command.path,
                    &command.program,
                    command.about.as_deref(),
                ));
            }
            None => {
                if display.len() == 1 {
                    self.print_root_help();
                } else {
                    self.interface
                        .print(commands_help(&display.join(" "), &node.listing()));
                }
            }
        }

        Ok(Value::Null)
    }

    fn print_root_help(&self) {
        let mut message = help_message(
            &self.app.program,
            &self.app.global.program,
            self.app.about.as_deref(),
        );

        let listing = self.app.root.listing();
        if !listing.is_empty() {
            let rows: Vec<String> = listing
                .iter()
                .map(|(name, about)| match about {
                    Some(about) => format!(" {name}   {about}"),
                    None => format!(" {name}"),
                })
                .collect();
            message.push_str("\n\ncommands:\n");
            message.push_str(&rows.join("\n"));
        }

        self.interface.print(message);
    }

    fn print_version(&self) {
        let version = self
            .app
            .version
            .as_deref()
            .unwrap_or_else(|| unreachable!("internal error - version printed but never declared"));
        self.interface
            .print(format!("{} {version}", self.app.program));
    }

    fn fail(&self, tokens: &[&str], failure: Failure) -> RunError {
        match failure {
            Failure::Usage { index, error } => RunError::Usage {
                error,
                context: ErrorContext::new(index, tokens),
            },
            Failure::Command(error) => RunError::Command(error),
            Failure::Help | Failure::Version => {
                unreachable!("internal error - short circuit treated as failure")
            }
        }
    }
}
