use crate::convert::Converter;
use crate::error::ConfigurationError;
use crate::model::Value;

/// The positional class of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Matched by command line position.
    Positional,
    /// Matched repeatedly by position; at most one per signature, and final.
    VarPositional,
    /// Matched by option specifier only; always carries a default.
    KeywordOnly,
}

/// One declared parameter of a [`Signature`].
///
/// Constructed through [`Param::required`], [`Param::optional`],
/// [`Param::variadic`] and [`Param::keyword`], then refined with the builder
/// methods.  Keyword parameters require a default by construction; there is
/// no way to declare one without.
#[derive(Clone)]
pub struct Param {
    pub(crate) name: String,
    pub(crate) kind: ParamKind,
    pub(crate) default: Option<Value>,
    pub(crate) converter: Option<Converter>,
    pub(crate) option_strings: Vec<String>,
    pub(crate) usage: Option<String>,
}

impl Param {
    fn new(name: impl Into<String>, kind: ParamKind, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            converter: None,
            option_strings: Vec::default(),
            usage: None,
        }
    }

    /// A required positional parameter.
    pub fn required(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Positional, None)
    }

    /// An optional positional parameter.
    /// Its subtree forms an argument group: all-or-none of the group's
    /// required positions must be filled.
    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self::new(name, ParamKind::Positional, Some(default))
    }

    /// The var-positional parameter, consuming the remaining positional tokens.
    pub fn variadic(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::VarPositional, None)
    }

    /// A keyword-only parameter, addressed on the command line by option.
    pub fn keyword(name: impl Into<String>, default: Value) -> Self {
        Self::new(name, ParamKind::KeywordOnly, Some(default))
    }

    /// Annotate with an explicit converter.
    /// Without an annotation, the converter derives from the default value.
    pub fn converter(mut self, converter: Converter) -> Self {
        self.converter.replace(converter);
        self
    }

    /// Declare explicit option strings (ex: `["-c", "--colour"]`), replacing
    /// the generated `--name-with-dashes`/`-first-letter` pair.
    /// Applies to keyword parameters only.
    pub fn options<S: Into<String>>(mut self, strings: impl IntoIterator<Item = S>) -> Self {
        self.option_strings = strings.into_iter().map(Into::into).collect();
        self
    }

    /// Override the usage string (metavar) for this parameter.
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage.replace(usage.into());
        self
    }

    pub(crate) fn usage_name(&self) -> String {
        self.usage.clone().unwrap_or_else(|| self.name.clone())
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .finish()
    }
}

/// The declared signature of a callable: ordered positional parameters, at
/// most one var-positional, and zero or more keyword-only parameters.
///
/// ### Example
/// ```
/// use appeal::{Param, Signature, Value};
///
/// let signature = Signature::builder()
///     .add(Param::required("pattern"))
///     .add(Param::variadic("filenames"))
///     .add(Param::keyword("ignore_case", Value::Bool(false)))
///     .build()
///     .unwrap();
/// assert_eq!(signature.positionals().count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub(crate) parameters: Vec<Param>,
}

impl Signature {
    /// Start declaring a signature.
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder {
            parameters: Vec::default(),
        }
    }

    /// The empty signature (no parameters at all).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The positional parameters, in declaration order.
    pub fn positionals(&self) -> impl Iterator<Item = &Param> {
        self.parameters
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
    }

    /// The var-positional parameter, if declared.
    pub fn variadic(&self) -> Option<&Param> {
        self.parameters
            .iter()
            .find(|p| p.kind == ParamKind::VarPositional)
    }

    /// The keyword-only parameters, in declaration order.
    pub fn keywords(&self) -> impl Iterator<Item = &Param> {
        self.parameters
            .iter()
            .filter(|p| p.kind == ParamKind::KeywordOnly)
    }
}

/// Builder for [`Signature`].
pub struct SignatureBuilder {
    parameters: Vec<Param>,
}

impl SignatureBuilder {
    /// Add a parameter declaration.
    pub fn add(mut self, param: Param) -> Self {
        self.parameters.push(param);
        self
    }

    /// Finalize the signature, checking the structural rules:
    /// unique names, and a single var-positional after every positional.
    pub fn build(self) -> Result<Signature, ConfigurationError> {
        let mut seen: Vec<&str> = Vec::default();
        let mut variadic: Option<&str> = None;

        for param in &self.parameters {
            if seen.contains(&param.name.as_str()) {
                return Err(ConfigurationError::DuplicateParameter(param.name.clone()));
            }
            seen.push(param.name.as_str());

            match param.kind {
                ParamKind::Positional => {
                    if let Some(existing) = variadic {
                        return Err(ConfigurationError::MisplacedVariadic(existing.to_string()));
                    }
                }
                ParamKind::VarPositional => {
                    if let Some(existing) = variadic {
                        return Err(ConfigurationError::MisplacedVariadic(existing.to_string()));
                    }
                    variadic.replace(param.name.as_str());
                }
                ParamKind::KeywordOnly => {
                    // Order insensitive.
                }
            }
        }

        Ok(Signature {
            parameters: self.parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build() {
        // Setup
        let builder = Signature::builder()
            .add(Param::required("pattern"))
            .add(Param::optional("filename", Value::Null))
            .add(Param::variadic("rest"))
            .add(Param::keyword("verbose", Value::Bool(false)));

        // Execute
        let signature = builder.build().unwrap();

        // Verify
        assert_eq!(signature.positionals().count(), 2);
        assert_eq!(signature.variadic().unwrap().name, "rest");
        assert_eq!(signature.keywords().count(), 1);
    }

    #[test]
    fn build_duplicate_parameter() {
        let result = Signature::builder()
            .add(Param::required("pattern"))
            .add(Param::keyword("pattern", Value::Null))
            .build();
        assert_matches!(result, Err(ConfigurationError::DuplicateParameter(name)) => {
            assert_eq!(name, "pattern");
        });
    }

    #[test]
    fn build_positional_after_variadic() {
        let result = Signature::builder()
            .add(Param::variadic("rest"))
            .add(Param::required("pattern"))
            .build();
        assert_matches!(result, Err(ConfigurationError::MisplacedVariadic(name)) => {
            assert_eq!(name, "rest");
        });
    }

    #[test]
    fn build_multiple_variadic() {
        let result = Signature::builder()
            .add(Param::variadic("rest"))
            .add(Param::variadic("more"))
            .build();
        assert_matches!(result, Err(ConfigurationError::MisplacedVariadic(_)));
    }

    #[test]
    fn usage_name() {
        assert_eq!(Param::required("pattern").usage_name(), "pattern");
        assert_eq!(
            Param::required("pattern").usage("PAT").usage_name(),
            "PAT"
        );
    }
}
