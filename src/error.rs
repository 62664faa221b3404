use thiserror::Error;

/// Raised when the embedding API is used improperly.
///
/// These errors surface at registration/build time and are never caught by
/// the dispatcher; they indicate a programming mistake in the embedding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A command or subcommand name was registered twice.
    #[error("Cannot duplicate the command '{0}'.")]
    DuplicateCommand(String),

    /// An option string was registered twice at the same scope.
    #[error("Cannot duplicate the option '{0}' on '{1}'.")]
    DuplicateOption(String, String),

    /// An option string does not follow the `-x`/`--xxx` shape.
    #[error("Invalid option string '{0}'.")]
    InvalidOptionString(String),

    /// A parameter was declared twice on the same signature.
    #[error("Cannot duplicate the parameter '{0}'.")]
    DuplicateParameter(String),

    /// More than one var-positional parameter, or parameters declared after it.
    #[error("The var-positional parameter '{0}' must be the final positional parameter.")]
    MisplacedVariadic(String),

    /// A var-positional converter that can match zero tokens would loop forever.
    #[error("The var-positional parameter '{0}' uses a converter which consumes no tokens.")]
    UnboundedVariadic(String),

    /// The annotation kind is not usable at this parameter position.
    #[error("The converter '{converter}' cannot be used on the parameter '{parameter}'.")]
    InvalidAnnotation {
        /// Converter description.
        converter: String,
        /// The offending parameter name.
        parameter: String,
    },

    /// The effective converter could not be derived from the default value.
    #[error("Cannot derive a converter for the parameter '{0}' from its default value.")]
    UnderivableConverter(String),

    /// A converter appears within its own subtree.
    #[error("The converter '{0}' recursively includes itself.")]
    RecursiveConverter(String),

    /// An override referenced a command path that was never registered.
    #[error("Unknown command path '{0}'.")]
    UnknownCommandPath(String),

    /// A usage override referenced a parameter the callable does not declare.
    #[error("Unknown parameter '{parameter}' on command '{command}'.")]
    UnknownParameter {
        /// The command path.
        command: String,
        /// The parameter name.
        parameter: String,
    },

    /// The global command may only declare keyword (option) parameters.
    #[error("The global command '{0}' cannot declare positional parameters.")]
    GlobalPositional(String),

    /// A default command runs without tokens, so it cannot want positionals.
    #[error("The default command '{0}' cannot declare positional parameters.")]
    DefaultPositional(String),

    /// A command cannot live on a path that branches into subcommands.
    #[error("The command '{0}' cannot hold both a callable and subcommands.")]
    CommandWithSubcommands(String),
}

/// Raised when the user's command line is syntactically or semantically invalid.
///
/// The top level entry catches these, prints the usage line, and exits
/// nonzero.  The offending token position travels alongside as an
/// [`ErrorContext`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// The option is not recognized anywhere.
    #[error("unknown option {0}")]
    UnknownOption(String),

    /// The option exists, but deeper in the grammar than the current scope.
    #[error("{option} can't be used here, it must be used immediately after {parents}")]
    OptionScope {
        /// The offending option, denormalized.
        option: String,
        /// The parent options which map it, formatted as a disjunction.
        parents: String,
    },

    /// A required positional was never supplied.
    #[error("missing argument '{0}'")]
    MissingArgument(String),

    /// Tokens remain after the grammar completed.
    #[error("too many arguments, starting with '{0}'")]
    TooManyArguments(String),

    /// A token failed primitive conversion.
    #[error("'{token}' cannot convert to {target}")]
    InvalidValue {
        /// The offending token.
        token: String,
        /// The primitive type name.
        target: String,
    },

    /// `=value` supplied to an option which takes no opargs.
    #[error("{option}={value} isn't allowed, {option} doesn't take an oparg")]
    SuperfluousOparg {
        /// The offending option, denormalized.
        option: String,
        /// The attached value.
        value: String,
    },

    /// `=value` supplied to an option which takes several opargs.
    #[error("{option}={value} isn't allowed, {option} takes multiple opargs")]
    CompoundOparg {
        /// The offending option, denormalized.
        option: String,
        /// The attached value.
        value: String,
    },

    /// A short option with required opargs glued mid-cluster.
    #[error("-{option}{remainder} isn't allowed, -{option} must be last because it takes opargs")]
    ShortOptionNotLast {
        /// The mid-cluster short option character.
        option: char,
        /// The rest of the cluster.
        remainder: String,
    },

    /// The leading token does not select a known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A converter callable signalled failure; wrapped with its message.
    #[error("{converter}: {message}")]
    Converter {
        /// The converter name.
        converter: String,
        /// The converter's own message.
        message: String,
    },

    /// A failure raised from MultiOption state (ex: a repeated mapping key).
    #[error("{0}")]
    Custom(String),
}

/// Raised when a command function itself signals failure.
/// Surfaces as the process exit code.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    /// The exit code to surface.
    pub code: i32,
    /// The failure message.
    pub message: String,
}

impl CommandError {
    /// Create a command error with the given exit code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The command line neighbourhood of a usage error: the token stream with a
/// caret underneath the offending token.
///
/// The caret position is addressed by token index; an index one past the
/// final token points at the spot where a missing token was expected.
#[derive(Debug, PartialEq, Eq)]
pub struct ErrorContext {
    index: usize,
    tokens: Vec<String>,
}

impl ErrorContext {
    pub(crate) fn new(index: usize, tokens: &[&str]) -> Self {
        Self {
            index,
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = self.tokens.join(" ");
        // Each token before the offending one pushes the caret right by its
        // width plus the joining space.
        let caret = self
            .tokens
            .iter()
            .take(self.index)
            .map(|token| token.len() + 1)
            .sum::<usize>()
            .min(line.len());

        write!(f, "{line}\n{:caret$}^", "")
    }
}

/// The failure surface of a single invocation.
#[derive(Debug, Error)]
pub enum RunError {
    /// The command line was invalid.
    #[error("{error}")]
    Usage {
        /// The underlying usage error.
        error: UsageError,
        /// The offending token neighbourhood.
        context: ErrorContext,
    },

    /// The command function signalled failure.
    #[error("{0}")]
    Command(#[from] CommandError),
}
