use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{CommandError, UsageError};
use crate::model::{Primitive, Value};
use crate::signature::{Param, Signature};

/// The arguments of one callable invocation.
///
/// Positional values arrive in declaration order, with var-positional values
/// appended at the end.  Keyword values are filled for every declared keyword
/// parameter; parameters the command line never mentioned carry their
/// declared defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Call {
    /// Positional argument values, in order.
    pub args: Vec<Value>,
    /// Keyword argument values, defaults filled.
    pub kwargs: HashMap<String, Value>,
}

impl Call {
    /// The positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// The keyword argument named `name`.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

type RunFn = dyn Fn(Call) -> Result<Value, CommandError>;

/// A user callable: a declared [`Signature`] paired with the function to run.
///
/// Callables serve as commands and as converters; the distinction is purely
/// positional in the tree.  When used as a converter, a returned
/// [`CommandError`] is reported as a usage error naming the converter.
pub struct Callable {
    pub(crate) name: String,
    pub(crate) signature: Signature,
    pub(crate) run: Box<RunFn>,
}

impl Callable {
    /// Bind a function to a name and signature.
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        run: impl Fn(Call) -> Result<Value, CommandError> + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            signature,
            run: Box::new(run),
        })
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callable[{}]", self.name)
    }
}

/// How the values of a single repeatedly-usable option accumulate.
///
/// One [`MultiState`] instance is created the first time the option appears;
/// every appearance calls [`MultiState::option`] with that appearance's
/// freshly-converted opargs; [`MultiState::render`] runs exactly once at
/// frame finalization and produces the parameter value.
pub trait MultiState {
    /// Record one appearance of the option.
    fn option(&mut self, opargs: Vec<Value>) -> Result<(), UsageError>;

    /// Produce the final parameter value.
    fn render(self: Box<Self>) -> Value;
}

/// A factory for [`MultiState`] instances, carrying the oparg shape.
pub trait MultiSpec {
    /// Display name, used in diagnostics.
    fn name(&self) -> &str;

    /// The oparg signature: one positional parameter per oparg.
    fn signature(&self) -> &Signature;

    /// Create the per-invocation state, seeded from the parameter default.
    fn instantiate(&self, default: &Value) -> Box<dyn MultiState>;
}

/// A converter: the recipe for consuming command line tokens into a [`Value`].
///
/// Annotations on parameters are converters; converters with [`Callable`]
/// signatures recursively declare further parameters, yielding the tree that
/// compiles into the grammar.
#[derive(Clone)]
pub enum Converter {
    /// A builtin primitive; consumes exactly one token.
    Primitive(Primitive),
    /// A user callable with its own parameters.
    Callable(Arc<Callable>),
    /// An option whose state accumulates across repeated appearances.
    Multi(Arc<dyn MultiSpec>),
    /// An option which consumes no tokens and negates its boolean default.
    Toggle,
}

impl Converter {
    /// The `str` primitive.
    pub fn str() -> Self {
        Converter::Primitive(Primitive::Str)
    }

    /// The `int` primitive.
    pub fn int() -> Self {
        Converter::Primitive(Primitive::Int)
    }

    /// The `float` primitive.
    pub fn float() -> Self {
        Converter::Primitive(Primitive::Float)
    }

    /// The `bool` primitive.
    pub fn bool() -> Self {
        Converter::Primitive(Primitive::Bool)
    }

    /// The `complex` primitive.
    pub fn complex() -> Self {
        Converter::Primitive(Primitive::Complex)
    }

    /// A user callable converter.
    pub fn callable(callable: Arc<Callable>) -> Self {
        Converter::Callable(callable)
    }

    pub(crate) fn description(&self) -> String {
        match self {
            Converter::Primitive(primitive) => primitive.type_name().to_string(),
            Converter::Callable(callable) => callable.name.clone(),
            Converter::Multi(spec) => spec.name().to_string(),
            Converter::Toggle => "toggle".to_string(),
        }
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Converter[{}]", self.description())
    }
}

impl From<Primitive> for Converter {
    fn from(primitive: Primitive) -> Self {
        Converter::Primitive(primitive)
    }
}

/// A counting option (ex: `-v -v -v` for increasing verbosity).
///
/// Each appearance moves the count by `step`, saturating at `max` when given.
/// The count starts from the parameter default.
pub fn counter(max: Option<i64>, step: i64) -> Converter {
    assert!(step != 0, "internal error - counter step cannot be 0");
    Converter::Multi(Arc::new(CounterSpec {
        max,
        step,
        signature: Signature::empty(),
    }))
}

struct CounterSpec {
    max: Option<i64>,
    step: i64,
    signature: Signature,
}

impl MultiSpec for CounterSpec {
    fn name(&self) -> &str {
        "counter"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn instantiate(&self, default: &Value) -> Box<dyn MultiState> {
        Box::new(CounterState {
            count: default.as_int().unwrap_or(0),
            max: self.max,
            step: self.step,
        })
    }
}

struct CounterState {
    count: i64,
    max: Option<i64>,
    step: i64,
}

impl MultiState for CounterState {
    fn option(&mut self, _opargs: Vec<Value>) -> Result<(), UsageError> {
        let next = self.count.saturating_add(self.step);
        self.count = match self.max {
            Some(max) if self.step > 0 => std::cmp::min(next, max),
            Some(max) if self.step < 0 => std::cmp::max(next, max),
            _ => next,
        };
        Ok(())
    }

    fn render(self: Box<Self>) -> Value {
        Value::Int(self.count)
    }
}

/// An accumulating option: every appearance appends one row to a list.
///
/// With a single oparg converter the row is the bare value; with several, the
/// row is a list of the converted opargs.  The list is seeded from the
/// parameter default when it is a `Value::List`.
pub fn accumulator(opargs: Vec<Converter>) -> Converter {
    let opargs = if opargs.is_empty() {
        vec![Converter::str()]
    } else {
        opargs
    };
    let signature = oparg_signature(&opargs, "arg");

    Converter::Multi(Arc::new(AccumulatorSpec {
        arity: opargs.len(),
        signature,
    }))
}

struct AccumulatorSpec {
    arity: usize,
    signature: Signature,
}

impl MultiSpec for AccumulatorSpec {
    fn name(&self) -> &str {
        "accumulator"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn instantiate(&self, default: &Value) -> Box<dyn MultiState> {
        let values = match default {
            Value::List(seed) => seed.clone(),
            _ => Vec::default(),
        };
        Box::new(AccumulatorState {
            arity: self.arity,
            values,
        })
    }
}

struct AccumulatorState {
    arity: usize,
    values: Vec<Value>,
}

impl MultiState for AccumulatorState {
    fn option(&mut self, mut opargs: Vec<Value>) -> Result<(), UsageError> {
        if self.arity == 1 {
            match opargs.pop() {
                Some(value) => self.values.push(value),
                None => unreachable!("internal error - accumulator arity mismatch"),
            }
        } else {
            self.values.push(Value::List(opargs));
        }
        Ok(())
    }

    fn render(self: Box<Self>) -> Value {
        Value::List(self.values)
    }
}

/// A key/value collecting option: every appearance inserts one entry.
///
/// Repeating a key is a usage error.  The rendered mapping preserves the
/// command line encounter order, seeded from the parameter default when it
/// is a `Value::Map`.
pub fn mapping(key: Converter, values: Vec<Converter>) -> Converter {
    let values = if values.is_empty() {
        vec![Converter::str()]
    } else {
        values
    };
    let mut builder = Signature::builder().add(Param::required("key").converter(key));

    for (i, value) in values.iter().enumerate() {
        let name = if values.len() == 1 {
            "value".to_string()
        } else {
            format!("value{i}")
        };
        builder = builder.add(Param::required(name).converter(value.clone()));
    }

    let signature = builder
        .build()
        .unwrap_or_else(|_| unreachable!("internal error - mapping signature must build"));

    Converter::Multi(Arc::new(MappingSpec {
        single: values.len() == 1,
        signature,
    }))
}

struct MappingSpec {
    single: bool,
    signature: Signature,
}

impl MultiSpec for MappingSpec {
    fn name(&self) -> &str {
        "mapping"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn instantiate(&self, default: &Value) -> Box<dyn MultiState> {
        let entries = match default {
            Value::Map(seed) => seed.clone(),
            _ => IndexMap::default(),
        };
        Box::new(MappingState {
            single: self.single,
            entries,
        })
    }
}

struct MappingState {
    single: bool,
    entries: IndexMap<String, Value>,
}

impl MultiState for MappingState {
    fn option(&mut self, mut opargs: Vec<Value>) -> Result<(), UsageError> {
        let values = opargs.split_off(1);
        let key = match opargs.pop() {
            Some(key) => key.to_string(),
            None => unreachable!("internal error - mapping arity mismatch"),
        };

        if self.entries.contains_key(&key) {
            return Err(UsageError::Custom(format!(
                "defined '{key}' more than once"
            )));
        }

        let value = if self.single {
            values
                .into_iter()
                .next()
                .unwrap_or_else(|| unreachable!("internal error - mapping arity mismatch"))
        } else {
            Value::List(values)
        };
        self.entries.insert(key, value);
        Ok(())
    }

    fn render(self: Box<Self>) -> Value {
        Value::Map(self.entries)
    }
}

fn oparg_signature(opargs: &[Converter], prefix: &str) -> Signature {
    let mut builder = Signature::builder();

    for (i, converter) in opargs.iter().enumerate() {
        let name = if opargs.len() == 1 {
            prefix.to_string()
        } else {
            format!("{prefix}{i}")
        };
        builder = builder.add(Param::required(name).converter(converter.clone()));
    }

    builder
        .build()
        .unwrap_or_else(|_| unreachable!("internal error - oparg signature must build"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appearances(spec: &Converter, default: &Value, rows: Vec<Vec<Value>>) -> Value {
        match spec {
            Converter::Multi(spec) => {
                let mut state = spec.instantiate(default);
                for row in rows {
                    state.option(row).unwrap();
                }
                state.render()
            }
            _ => unreachable!("test misuse"),
        }
    }

    #[test]
    fn counter_accumulates() {
        // Setup
        let converter = counter(None, 1);

        // Execute
        let value = appearances(&converter, &Value::Int(0), vec![vec![], vec![], vec![]]);

        // Verify
        assert_eq!(value, Value::Int(3));
    }

    #[test]
    fn counter_respects_max() {
        let converter = counter(Some(2), 1);
        let value = appearances(&converter, &Value::Int(0), vec![vec![], vec![], vec![]]);
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn counter_default_render() {
        let converter = counter(None, 1);
        let value = appearances(&converter, &Value::Int(7), vec![]);
        assert_eq!(value, Value::Int(7));
    }

    #[test]
    fn counter_negative_step() {
        let converter = counter(Some(-2), -1);
        let value = appearances(&converter, &Value::Int(0), vec![vec![], vec![], vec![]]);
        assert_eq!(value, Value::Int(-2));
    }

    #[test]
    #[should_panic]
    fn counter_zero_step() {
        counter(None, 0);
    }

    #[test]
    fn accumulator_single() {
        let converter = accumulator(vec![Converter::int()]);
        let value = appearances(
            &converter,
            &Value::Null,
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(value, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn accumulator_rows() {
        let converter = accumulator(vec![Converter::int(), Converter::str()]);
        let value = appearances(
            &converter,
            &Value::Null,
            vec![vec![Value::Int(1), Value::from("a")]],
        );
        assert_eq!(
            value,
            Value::List(vec![Value::List(vec![Value::Int(1), Value::from("a")])])
        );
    }

    #[test]
    fn accumulator_seeded() {
        let converter = accumulator(vec![]);
        let value = appearances(
            &converter,
            &Value::List(vec![Value::from("seed")]),
            vec![vec![Value::from("more")]],
        );
        assert_eq!(
            value,
            Value::List(vec![Value::from("seed"), Value::from("more")])
        );
    }

    #[test]
    fn mapping_inserts() {
        let converter = mapping(Converter::str(), vec![Converter::int()]);
        let value = appearances(
            &converter,
            &Value::Null,
            vec![
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("b"), Value::Int(2)],
            ],
        );
        assert_eq!(
            value,
            Value::Map(IndexMap::from([
                ("a".to_string(), Value::Int(1)),
                ("b".to_string(), Value::Int(2)),
            ]))
        );
    }

    #[test]
    fn mapping_duplicate_key() {
        let converter = mapping(Converter::str(), vec![]);
        match &converter {
            Converter::Multi(spec) => {
                let mut state = spec.instantiate(&Value::Null);
                state
                    .option(vec![Value::from("a"), Value::from("1")])
                    .unwrap();
                let result = state.option(vec![Value::from("a"), Value::from("2")]);
                assert_matches!(result, Err(UsageError::Custom(message)) => {
                    assert_eq!(message, "defined 'a' more than once");
                });
            }
            _ => unreachable!("test misuse"),
        }
    }

    #[test]
    fn mapping_multiple_values() {
        let converter = mapping(Converter::str(), vec![Converter::int(), Converter::int()]);
        let value = appearances(
            &converter,
            &Value::Null,
            vec![vec![Value::from("a"), Value::Int(1), Value::Int(2)]],
        );
        assert_eq!(
            value,
            Value::Map(IndexMap::from([(
                "a".to_string(),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            )]))
        );
    }

    #[test]
    fn oparg_signatures() {
        match accumulator(vec![Converter::int(), Converter::float()]) {
            Converter::Multi(spec) => {
                assert_eq!(spec.signature().positionals().count(), 2);
            }
            _ => unreachable!("test misuse"),
        }
        match counter(None, 1) {
            Converter::Multi(spec) => {
                assert_eq!(spec.signature().positionals().count(), 0);
            }
            _ => unreachable!("test misuse"),
        }
    }
}
