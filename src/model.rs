use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use num_complex::Complex64;

/// The dynamic value produced by converters and consumed by callables.
///
/// Command line tokens are parsed into `Value`s by the builtin primitives,
/// assembled into structures by user converters, and finally handed to the
/// command callable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absent value; also the parse-less default (ex: `filename=None`).
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A real number.
    Float(f64),
    /// A complex number (ex: `1+2i`).
    Complex(Complex64),
    /// A string.
    Str(String),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// A mapping, preserving insertion order.
    Map(IndexMap<String, Value>),
}

impl Value {
    /// The process exit code this value denotes when returned from a command.
    /// Integers surface directly; everything else is success.
    pub fn exit_code(&self) -> i32 {
        match self {
            Value::Int(code) => *code as i32,
            _ => 0,
        }
    }

    /// Borrow as `&str`, if this is a `Value::Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(inner) => Some(inner.as_str()),
            _ => None,
        }
    }

    /// Extract an `i64`, if this is a `Value::Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Extract an `f64`, if this is a `Value::Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Extract a `bool`, if this is a `Value::Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Whether this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(inner) => write!(f, "{inner}"),
            Value::Int(inner) => write!(f, "{inner}"),
            Value::Float(inner) => write!(f, "{inner}"),
            Value::Complex(inner) => write!(f, "{inner}"),
            Value::Str(inner) => write!(f, "{inner}"),
            Value::List(inner) => {
                write!(f, "[")?;
                for (i, item) in inner.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(inner) => {
                write!(f, "{{")?;
                for (i, (key, item)) in inner.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(inner: bool) -> Self {
        Value::Bool(inner)
    }
}

impl From<i64> for Value {
    fn from(inner: i64) -> Self {
        Value::Int(inner)
    }
}

impl From<f64> for Value {
    fn from(inner: f64) -> Self {
        Value::Float(inner)
    }
}

impl From<&str> for Value {
    fn from(inner: &str) -> Self {
        Value::Str(inner.to_string())
    }
}

impl From<String> for Value {
    fn from(inner: String) -> Self {
        Value::Str(inner)
    }
}

/// The builtin primitive converters.
/// Each consumes precisely one command line token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// `true`/`false` (also `yes`/`no`, `1`/`0`).
    Bool,
    /// A signed integer.
    Int,
    /// A real number.
    Float,
    /// A complex number, via the `a+bi` syntax.
    Complex,
    /// Any token, verbatim.
    Str,
}

impl Primitive {
    pub(crate) fn parse(&self, token: &str) -> Result<Value, ()> {
        match self {
            Primitive::Bool => match token.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(()),
            },
            Primitive::Int => i64::from_str(token).map(Value::Int).map_err(|_| ()),
            Primitive::Float => f64::from_str(token).map(Value::Float).map_err(|_| ()),
            Primitive::Complex => Complex64::from_str(token)
                .map(Value::Complex)
                .map_err(|_| ()),
            Primitive::Str => Ok(Value::Str(token.to_string())),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Complex => "complex",
            Primitive::Str => "str",
        }
    }
}

/// An option specifier in its canonical form.
///
/// Short options are a single character (`-v`); long options are a word
/// (`--verbose`).  Keeping the two shapes distinct makes glued short options
/// (ex: `-avc`) straightforward to process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OptionName {
    /// A single character option (ex: `-v`).
    Short(char),
    /// A word option (ex: `--verbose`).
    Long(String),
}

impl OptionName {
    /// Parse a user-supplied option string (`"-v"` or `"--verbose"`).
    pub(crate) fn parse(text: &str) -> Result<Self, ()> {
        if let Some(rest) = text.strip_prefix("--") {
            if rest.chars().count() >= 2 && !rest.starts_with('-') {
                return Ok(OptionName::Long(rest.to_string()));
            }
        } else if let Some(rest) = text.strip_prefix('-') {
            let mut chars = rest.chars();
            if let (Some(single), None) = (chars.next(), chars.next()) {
                if single != '-' {
                    return Ok(OptionName::Short(single));
                }
            }
        }

        Err(())
    }
}

impl fmt::Display for OptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionName::Short(single) => write!(f, "-{single}"),
            OptionName::Long(word) => write!(f, "--{word}"),
        }
    }
}

/// Derive the long option for a parameter name (ex: `ignore_case` becomes `--ignore-case`).
pub(crate) fn parameter_to_long_option(name: &str) -> OptionName {
    OptionName::Long(name.to_lowercase().replace('_', "-"))
}

/// Derive the short option for a parameter name (ex: `verbose` becomes `-v`).
pub(crate) fn parameter_to_short_option(name: &str) -> Option<OptionName> {
    name.chars().next().map(OptionName::Short)
}
