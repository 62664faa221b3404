use std::sync::Arc;

use assert_matches::assert_matches;
use indexmap::IndexMap;
use rand::{thread_rng, Rng};
use rstest::rstest;

use appeal::{
    accumulator, counter, mapping, App, Appeal, Callable, CommandError, Converter, Param,
    RunError, Signature, UsageError, Value,
};

fn run(app: &App, tokens: &[&str]) -> Result<Value, RunError> {
    app.processor().run(tokens)
}

fn usage_error(result: Result<Value, RunError>) -> UsageError {
    match result.unwrap_err() {
        RunError::Usage { error, .. } => error,
        RunError::Command(error) => panic!("expected a usage error, got: {error}"),
    }
}

fn hello_app() -> App {
    let hello = Callable::new(
        "hello",
        Signature::builder()
            .add(Param::required("name"))
            .build()
            .unwrap(),
        |call| Ok(call.arg(0).unwrap().clone()),
    );
    Appeal::new("hello").command("hello", hello).build().unwrap()
}

fn int_float() -> Arc<Callable> {
    Callable::new(
        "int_float",
        Signature::builder()
            .add(Param::required("i").converter(Converter::int()))
            .add(Param::required("f").converter(Converter::float()))
            .build()
            .unwrap(),
        |call| Ok(Value::List(call.args.clone())),
    )
}

fn my_converter() -> Arc<Callable> {
    Callable::new(
        "my_converter",
        Signature::builder()
            .add(Param::required("i_f").converter(Converter::callable(int_float())))
            .add(Param::required("s"))
            .add(Param::keyword("verbose", Value::Bool(false)))
            .build()
            .unwrap(),
        |call| {
            let mut items = call.args.clone();
            items.push(call.kwarg("verbose").unwrap().clone());
            Ok(Value::List(items))
        },
    )
}

// The stand-in for my_converter's value when the group never commits.
fn my_converter_default() -> Value {
    Value::List(vec![
        Value::List(vec![Value::Int(0), Value::Float(0.0)]),
        Value::from(""),
        Value::Bool(false),
    ])
}

#[test]
fn scenario_single_argument() {
    // S1: hello(name)
    let app = hello_app();
    assert_eq!(
        run(&app, &["hello", "world"]).unwrap(),
        Value::from("world")
    );
}

#[test]
fn scenario_optional_argument_defaults() {
    // S2: fgrep(pattern, filename=None)
    let fgrep = Callable::new(
        "fgrep",
        Signature::builder()
            .add(Param::required("pattern"))
            .add(Param::optional("filename", Value::Null))
            .build()
            .unwrap(),
        |call| Ok(Value::List(call.args.clone())),
    );
    let app = Appeal::new("fgrep").command("fgrep", fgrep).build().unwrap();

    assert_eq!(
        run(&app, &["fgrep", "WM_CREATE"]).unwrap(),
        Value::List(vec![Value::from("WM_CREATE"), Value::Null])
    );
    assert_eq!(
        run(&app, &["fgrep", "WM_CREATE", "window.c"]).unwrap(),
        Value::List(vec![Value::from("WM_CREATE"), Value::from("window.c")])
    );
}

fn fgrep_full_app() -> App {
    // S3: fgrep(pattern, *filenames, color="", number=0, ignore_case=False)
    let fgrep = Callable::new(
        "fgrep",
        Signature::builder()
            .add(Param::required("pattern"))
            .add(Param::variadic("filenames"))
            .add(Param::keyword("color", Value::from("")))
            .add(Param::keyword("number", Value::Int(0)))
            .add(Param::keyword("ignore_case", Value::Bool(false)))
            .build()
            .unwrap(),
        |call| {
            Ok(Value::List(vec![
                call.arg(0).unwrap().clone(),
                Value::List(call.args[1..].to_vec()),
                call.kwarg("color").unwrap().clone(),
                call.kwarg("number").unwrap().clone(),
                call.kwarg("ignore_case").unwrap().clone(),
            ]))
        },
    );
    Appeal::new("fgrep").command("fgrep", fgrep).build().unwrap()
}

#[rstest]
#[case(vec!["fgrep", "-i", "--number", "3", "--color", "blue", "WM_CREATE", "window.c"])]
#[case(vec!["fgrep", "WM_CREATE", "-i", "window.c", "--number", "3", "--color", "blue"])]
#[case(vec!["fgrep", "--color=blue", "--number=3", "-i", "WM_CREATE", "window.c"])]
#[case(vec!["fgrep", "WM_CREATE", "window.c", "--number", "3", "--color", "blue", "-i"])]
fn scenario_options_any_order(#[case] tokens: Vec<&str>) {
    let app = fgrep_full_app();

    assert_eq!(
        run(&app, tokens.as_slice()).unwrap(),
        Value::List(vec![
            Value::from("WM_CREATE"),
            Value::List(vec![Value::from("window.c")]),
            Value::from("blue"),
            Value::Int(3),
            Value::Bool(true),
        ])
    );
}

#[test]
fn scenario_recursive_converter() {
    // S4: recurse2(a, b: my_converter = ...)
    let recurse2 = Callable::new(
        "recurse2",
        Signature::builder()
            .add(Param::required("a"))
            .add(
                Param::optional("b", my_converter_default())
                    .converter(Converter::callable(my_converter())),
            )
            .build()
            .unwrap(),
        |call| Ok(Value::List(call.args.clone())),
    );
    let app = Appeal::new("recurse2")
        .command("recurse2", recurse2)
        .build()
        .unwrap();

    assert_eq!(
        run(&app, &["recurse2", "pdq", "1", "2", "xyz", "-v"]).unwrap(),
        Value::List(vec![
            Value::from("pdq"),
            Value::List(vec![
                Value::List(vec![Value::Int(1), Value::Float(2.0)]),
                Value::from("xyz"),
                Value::Bool(true),
            ]),
        ])
    );

    // The group never commits; the declared default applies.
    assert_eq!(
        run(&app, &["recurse2", "pdq"]).unwrap(),
        Value::List(vec![Value::from("pdq"), my_converter_default()])
    );

    // Consuming an early mapped option commits the group, making its
    // positionals required.
    assert_matches!(
        usage_error(run(&app, &["recurse2", "pdq", "-v"])),
        UsageError::MissingArgument(name) => {
            assert_eq!(name, "i");
        }
    );
}

fn counting_app() -> App {
    // S5: fgrep(*, verbose: counter() = 0)
    let fgrep = Callable::new(
        "fgrep",
        Signature::builder()
            .add(Param::keyword("verbose", Value::Int(0)).converter(counter(None, 1)))
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("verbose").unwrap().clone()),
    );
    Appeal::new("fgrep").command("fgrep", fgrep).build().unwrap()
}

#[test]
fn scenario_multi_option_counter() {
    let app = counting_app();

    assert_eq!(
        run(&app, &["fgrep", "-v", "--verbose", "-v"]).unwrap(),
        Value::Int(3)
    );
    assert_eq!(run(&app, &["fgrep"]).unwrap(), Value::Int(0));
}

#[test]
fn scenario_option_scope_violation() {
    // S6: inception(*, option: my_converter = ...)
    let inception = Callable::new(
        "inception",
        Signature::builder()
            .add(
                Param::keyword("option", my_converter_default())
                    .converter(Converter::callable(my_converter())),
            )
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("option").unwrap().clone()),
    );
    let app = Appeal::new("inception")
        .command("inception", inception)
        .build()
        .unwrap();

    // The child option cannot appear before its parent maps it.
    assert_matches!(
        usage_error(run(&app, &["inception", "-v", "--option", "3"])),
        UsageError::OptionScope { option, parents } => {
            assert_eq!(option, "-v");
            assert!(parents.contains("--option"), "parents: {parents}");
        }
    );

    // Immediately after the parent and its opargs, it applies.
    assert_eq!(
        run(&app, &["inception", "--option", "1", "2", "xyz", "-v"]).unwrap(),
        Value::List(vec![
            Value::List(vec![Value::Int(1), Value::Float(2.0)]),
            Value::from("xyz"),
            Value::Bool(true),
        ])
    );
}

#[test]
fn child_option_scope_closes_on_positional() {
    let scoped = Callable::new(
        "scoped",
        Signature::builder()
            .add(Param::required("a"))
            .add(
                Param::keyword("option", my_converter_default())
                    .converter(Converter::callable(my_converter())),
            )
            .build()
            .unwrap(),
        |call| Ok(call.arg(0).unwrap().clone()),
    );
    let app = Appeal::new("scoped").command("scoped", scoped).build().unwrap();

    // A top level positional closes the parent option's scope.
    assert_matches!(
        usage_error(run(
            &app,
            &["scoped", "--option", "1", "2", "xyz", "tail", "-v"]
        )),
        UsageError::OptionScope { option, .. } => {
            assert_eq!(option, "-v");
        }
    );
}

#[test]
fn property_positional_order_roundtrip() {
    // Compiled positional slots correspond one-to-one, order preserving,
    // with the declared positional parameters.
    let mut rng = thread_rng();

    for _ in 0..20 {
        let count = rng.gen_range(1..=5);
        let mut builder = Signature::builder();
        for i in 0..count {
            builder = builder.add(Param::required(format!("p{i}")));
        }
        let probe = Callable::new("probe", builder.build().unwrap(), |call| {
            Ok(Value::List(call.args.clone()))
        });
        let app = Appeal::new("probe").command("probe", probe).build().unwrap();

        let values: Vec<String> = (0..count).map(|i| format!("v{i}")).collect();
        let mut tokens = vec!["probe"];
        tokens.extend(values.iter().map(String::as_str));

        assert_eq!(
            run(&app, tokens.as_slice()).unwrap(),
            Value::List(values.iter().map(|value| Value::from(value.clone())).collect())
        );
    }
}

#[test]
fn property_option_uniqueness() {
    let colliding = Callable::new(
        "colliding",
        Signature::builder()
            .add(Param::keyword("first", Value::from("")).options(["--same"]))
            .add(Param::keyword("second", Value::from("")).options(["--same"]))
            .build()
            .unwrap(),
        |_| Ok(Value::Null),
    );
    let result = Appeal::new("program").command("colliding", colliding).build();

    assert!(result.is_err());
}

fn flags_app() -> App {
    let flags = Callable::new(
        "flags",
        Signature::builder()
            .add(Param::keyword("apple", Value::Bool(false)))
            .add(Param::keyword("banana", Value::Bool(false)))
            .add(Param::keyword("carrot", Value::Bool(false)))
            .build()
            .unwrap(),
        |call| {
            Ok(Value::List(vec![
                call.kwarg("apple").unwrap().clone(),
                call.kwarg("banana").unwrap().clone(),
                call.kwarg("carrot").unwrap().clone(),
            ]))
        },
    );
    Appeal::new("flags").command("flags", flags).build().unwrap()
}

#[test]
fn property_short_concatenation_equivalence() {
    let glued = run(&flags_app(), &["flags", "-abc"]).unwrap();
    let spelled = run(&flags_app(), &["flags", "-a", "-b", "-c"]).unwrap();

    assert_eq!(glued, spelled);
    assert_eq!(
        glued,
        Value::List(vec![
            Value::Bool(true),
            Value::Bool(true),
            Value::Bool(true),
        ])
    );
}

#[test]
fn property_short_concatenation_counter() {
    let app = counting_app();

    assert_eq!(
        run(&app, &["fgrep", "-vvv"]).unwrap(),
        run(&app, &["fgrep", "-v", "-v", "-v"]).unwrap()
    );
}

#[test]
fn property_double_dash_boundary() {
    let app = hello_app();

    // Without the boundary, a dashed token reads as an option.
    assert_matches!(
        usage_error(run(&app, &["hello", "-weird"])),
        UsageError::UnknownOption(option) => {
            assert_eq!(option, "-w");
        }
    );

    // With it, the token is positional.
    assert_eq!(
        run(&app, &["hello", "--", "-weird"]).unwrap(),
        Value::from("-weird")
    );
}

#[test]
fn lone_dash_is_positional() {
    let app = hello_app();
    assert_eq!(run(&app, &["hello", "-"]).unwrap(), Value::from("-"));
}

#[test]
fn error_missing_argument() {
    assert_matches!(
        usage_error(run(&hello_app(), &["hello"])),
        UsageError::MissingArgument(name) => {
            assert_eq!(name, "name");
        }
    );
}

#[test]
fn error_too_many_arguments() {
    assert_matches!(
        usage_error(run(&hello_app(), &["hello", "a", "b"])),
        UsageError::TooManyArguments(token) => {
            assert_eq!(token, "b");
        }
    );
}

#[test]
fn error_invalid_value() {
    let count = Callable::new(
        "count",
        Signature::builder()
            .add(Param::required("amount").converter(Converter::int()))
            .build()
            .unwrap(),
        |call| Ok(call.arg(0).unwrap().clone()),
    );
    let app = Appeal::new("count").command("count", count).build().unwrap();

    assert_matches!(
        usage_error(run(&app, &["count", "xyz"])),
        UsageError::InvalidValue { token, target } => {
            assert_eq!(token, "xyz");
            assert_eq!(target, "int");
        }
    );
}

#[test]
fn error_superfluous_oparg() {
    assert_matches!(
        usage_error(run(&flags_app(), &["flags", "--apple=1"])),
        UsageError::SuperfluousOparg { option, value } => {
            assert_eq!(option, "--apple");
            assert_eq!(value, "1");
        }
    );
}

#[test]
fn error_compound_oparg() {
    let composite = Callable::new(
        "composite",
        Signature::builder()
            .add(
                Param::keyword("option", my_converter_default())
                    .converter(Converter::callable(my_converter())),
            )
            .build()
            .unwrap(),
        |_| Ok(Value::Null),
    );
    let app = Appeal::new("composite")
        .command("composite", composite)
        .build()
        .unwrap();

    assert_matches!(
        usage_error(run(&app, &["composite", "--option=3"])),
        UsageError::CompoundOparg { option, .. } => {
            assert_eq!(option, "--option");
        }
    );
}

#[test]
fn error_short_option_not_last() {
    let count = Callable::new(
        "count",
        Signature::builder()
            .add(Param::keyword("number", Value::Int(0)))
            .build()
            .unwrap(),
        |_| Ok(Value::Null),
    );
    let app = Appeal::new("count").command("count", count).build().unwrap();

    // -n takes a required oparg; gluing a value is not the optional-oparg form.
    assert_matches!(
        usage_error(run(&app, &["count", "-n3"])),
        UsageError::ShortOptionNotLast { option, remainder } => {
            assert_eq!(option, 'n');
            assert_eq!(remainder, "3");
        }
    );
}

fn jobs_app() -> App {
    // The `make -j` shape: one *optional* oparg.
    let level = Callable::new(
        "level",
        Signature::builder()
            .add(Param::optional("level", Value::Int(0)))
            .build()
            .unwrap(),
        |call| Ok(call.arg(0).unwrap().clone()),
    );
    let build = Callable::new(
        "build",
        Signature::builder()
            .add(Param::keyword("jobs", Value::Int(1)).converter(Converter::callable(level)))
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("jobs").unwrap().clone()),
    );
    Appeal::new("build").command("build", build).build().unwrap()
}

#[rstest]
#[case(vec!["build"], 1)]
#[case(vec!["build", "-j"], 0)]
#[case(vec!["build", "-j2"], 2)]
#[case(vec!["build", "-j=2"], 2)]
#[case(vec!["build", "-j", "2"], 2)]
#[case(vec!["build", "--jobs", "2"], 2)]
#[case(vec!["build", "--jobs=2"], 2)]
fn optional_oparg_forms(#[case] tokens: Vec<&str>, #[case] expected: i64) {
    assert_eq!(
        run(&jobs_app(), tokens.as_slice()).unwrap(),
        Value::Int(expected)
    );
}

#[test]
fn multi_option_mapping() {
    let config = Callable::new(
        "config",
        Signature::builder()
            .add(
                Param::keyword("define", Value::Null)
                    .converter(mapping(Converter::str(), vec![Converter::str()])),
            )
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("define").unwrap().clone()),
    );
    let app = Appeal::new("config").command("config", config).build().unwrap();

    assert_eq!(
        run(&app, &["config", "-d", "a", "1", "--define", "b", "2"]).unwrap(),
        Value::Map(IndexMap::from([
            ("a".to_string(), Value::from("1")),
            ("b".to_string(), Value::from("2")),
        ]))
    );

    assert_matches!(
        usage_error(run(&app, &["config", "-d", "a", "1", "-d", "a", "2"])),
        UsageError::Custom(message) => {
            assert_eq!(message, "defined 'a' more than once");
        }
    );
}

#[test]
fn multi_option_accumulator() {
    let tags = Callable::new(
        "tags",
        Signature::builder()
            .add(
                Param::keyword("tag", Value::Null)
                    .converter(accumulator(vec![Converter::int()])),
            )
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("tag").unwrap().clone()),
    );
    let app = Appeal::new("tags").command("tags", tags).build().unwrap();

    assert_eq!(
        run(&app, &["tags", "-t", "1", "--tag", "2"]).unwrap(),
        Value::List(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(run(&app, &["tags"]).unwrap(), Value::List(Vec::default()));
}

#[test]
fn option_string_overrides() {
    let paint = Callable::new(
        "paint",
        Signature::builder()
            .add(Param::keyword("color", Value::from("plain")))
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("color").unwrap().clone()),
    );
    let app = Appeal::new("paint")
        .command("paint", paint)
        .option("paint", "color", ["-k", "--colour"])
        .build()
        .unwrap();

    assert_eq!(
        run(&app, &["paint", "--colour", "red"]).unwrap(),
        Value::from("red")
    );
    assert_eq!(run(&app, &["paint", "-k", "red"]).unwrap(), Value::from("red"));

    // The override replaces the generated strings.
    assert_matches!(
        usage_error(run(&app, &["paint", "--color", "red"])),
        UsageError::UnknownOption(option) => {
            assert_eq!(option, "--color");
        }
    );
}

#[test]
fn keyword_bag_option() {
    let plain = Callable::new(
        "plain",
        Signature::builder()
            .add(Param::required("x"))
            .build()
            .unwrap(),
        |call| {
            Ok(Value::List(vec![
                call.arg(0).unwrap().clone(),
                call.kwarg("extra").unwrap().clone(),
            ]))
        },
    );
    let app = Appeal::new("plain")
        .command("plain", plain)
        .option("plain", "extra", ["--extra"])
        .build()
        .unwrap();

    assert_eq!(
        run(&app, &["plain", "val", "--extra", "boom"]).unwrap(),
        Value::List(vec![Value::from("val"), Value::from("boom")])
    );
    assert_eq!(
        run(&app, &["plain", "val"]).unwrap(),
        Value::List(vec![Value::from("val"), Value::Null])
    );
}

#[test]
fn equals_empty_value() {
    let paint = Callable::new(
        "paint",
        Signature::builder()
            .add(Param::keyword("color", Value::from("plain")))
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("color").unwrap().clone()),
    );
    let app = Appeal::new("paint").command("paint", paint).build().unwrap();

    assert_eq!(run(&app, &["paint", "--color="]).unwrap(), Value::from(""));
}

#[test]
fn exit_codes() {
    let exiting = Callable::new("exiting", Signature::empty(), |_| Ok(Value::Int(5)));
    let failing = Callable::new("failing", Signature::empty(), |_| {
        Err(CommandError::new(4, "nope"))
    });
    let app = Appeal::new("program")
        .command("exit", exiting)
        .command("fail", failing)
        .build()
        .unwrap();

    assert_eq!(app.execute(&["exit"]), 5);
    assert_eq!(app.execute(&["fail"]), 4);
    // Usage errors conventionally exit 2.
    assert_eq!(app.execute(&["bogus"]), 2);
}

#[test]
fn repeated_single_option_last_wins() {
    let paint = Callable::new(
        "paint",
        Signature::builder()
            .add(Param::keyword("color", Value::from("plain")))
            .build()
            .unwrap(),
        |call| Ok(call.kwarg("color").unwrap().clone()),
    );
    let app = Appeal::new("paint").command("paint", paint).build().unwrap();

    assert_eq!(
        run(&app, &["paint", "--color", "red", "--color", "blue"]).unwrap(),
        Value::from("blue")
    );
}

#[test]
fn complex_primitive() {
    let wave = Callable::new(
        "wave",
        Signature::builder()
            .add(Param::required("z").converter(Converter::complex()))
            .build()
            .unwrap(),
        |call| Ok(call.arg(0).unwrap().clone()),
    );
    let app = Appeal::new("wave").command("wave", wave).build().unwrap();

    assert_eq!(
        run(&app, &["wave", "1+2i"]).unwrap(),
        Value::Complex(num_complex::Complex64::new(1.0, 2.0))
    );
}
