//! `appeal` is a command line argument-processing framework for Rust.
//!
//! Instead of describing flags one by one, you declare the *signature* of a
//! callable and `appeal` derives the command line interface from it:
//! positional parameters become arguments, keyword parameters become
//! options.  Parameter annotations are themselves *converters* — callables
//! with signatures of their own — so a signature recursively declares a tree
//! of callables.  The tree compiles into a linear grammar program, and a
//! small interpreter drives the command line tokens against that program,
//! assembling every converter call with concrete values before finally
//! invoking your command function.
//!
//! # Usage
//!
//! ```
//! use appeal::{Appeal, Callable, Param, Signature, Value};
//!
//! let fgrep = Callable::new(
//!     "fgrep",
//!     Signature::builder()
//!         .add(Param::required("pattern"))
//!         .add(Param::variadic("filenames"))
//!         .add(Param::keyword("number", Value::Int(0)))
//!         .add(Param::keyword("ignore_case", Value::Bool(false)))
//!         .build()
//!         .unwrap(),
//!     |call| {
//!         // pattern, filenames..., number=.., ignore_case=..
//!         assert_eq!(call.arg(0), Some(&Value::from("WM_CREATE")));
//!         assert_eq!(call.kwarg("ignore_case"), Some(&Value::Bool(true)));
//!         Ok(Value::Null)
//!     },
//! );
//!
//! let app = Appeal::new("fgrep").command("fgrep", fgrep).build().unwrap();
//! app.processor()
//!     .run(&["fgrep", "-i", "WM_CREATE", "window.c"])
//!     .unwrap();
//! ```
//!
//! This declaration yields the command line grammar:
//!
//! ```console
//! usage: fgrep fgrep [-h|--help] [--number|-n number] [--ignore-case|-i] pattern [filenames]...
//! ```
//!
//! # Converters
//!
//! Every parameter has an *effective converter*: its explicit annotation
//! ([`Param::converter`]), or one derived from the type of its default
//! value, or the string primitive.  The builtin primitives (`bool`, `int`,
//! `float`, `complex`, `str`) each consume exactly one token.  A
//! [`Callable`] converter consumes tokens for each of its own parameters,
//! recursively; its keyword parameters become *child options* which may be
//! used immediately after the mapping option.
//!
//! A boolean default on a keyword parameter yields the *toggle*: an option
//! which consumes no tokens and negates the default.
//!
//! # Options
//!
//! - Long options: `--name`, `--name=value`.
//! - Short options: `-x`, `-x value`, `-x=value`, `-xvalue` (only when `-x`
//!   takes exactly one optional oparg), and `-xyz` meaning `-x -y -z`.
//! - `--` ends option recognition; every subsequent token is positional.
//!
//! Keyword parameters get generated options — `--name-with-dashes`, plus the
//! first letter short when unclaimed — unless explicit strings are given via
//! [`Param::options`] or [`Appeal::option`].
//!
//! # Optional argument groups
//!
//! A positional parameter with a default opens an *argument group*: its
//! whole subtree is either absent (the default applies) or committed, in
//! which case its required positions must all be filled.  Options reachable
//! inside the group are recognizable from group entry; using one commits
//! the group.
//!
//! # MultiOptions
//!
//! An option annotated with a [`MultiSpec`](prelude::MultiSpec) accumulates
//! state across repeated appearances: one state instance is created at first
//! use, fed every appearance, and rendered into the parameter value at frame
//! finalization.  [`counter`], [`accumulator`] and [`mapping`] are provided.
//!
//! # Commands
//!
//! An [`Appeal`] registers commands, subcommands, a per-node default
//! command, and at most one global command whose options precede the first
//! command token.  [`Appeal::build`] freezes everything into an [`App`];
//! an [`App`] hands out [`Processor`]s, which hold all per-invocation
//! mutable state — the compiled grammars are shared and read-only.
//!
//! Builtins `help`/`version` and `-h/--help`/`-v/--version` are injected
//! unless their names collide with your registrations.
//!
//! # Errors
//!
//! Three kinds, never conflated: [`ConfigurationError`] for embedding
//! mistakes (raised at build time), [`UsageError`] for invalid command
//! lines (reported with the usage line, exit code 2), and [`CommandError`]
//! for failures signalled by the command itself (its code becomes the exit
//! code).
//!
//! # Features
//! * `debug`: internal `tracing` events from the compiler and interpreter.
#![deny(missing_docs)]

mod command;
mod compile;
mod convert;
mod error;
mod exec;
mod interface;
mod interp;
mod model;
pub mod prelude;
mod program;
mod signature;
mod tree;
mod usage;

pub use command::{App, Appeal, Processor};
pub use convert::{accumulator, counter, mapping, Call, Callable, Converter};
pub use error::{CommandError, ConfigurationError, ErrorContext, RunError, UsageError};
pub use interface::ConsoleInterface;
pub use model::{Primitive, Value};
pub use signature::{Param, ParamKind, Signature, SignatureBuilder};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
