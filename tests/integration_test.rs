use std::{
    fs,
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use nubo::{
    cancel::CancellationToken, config::Config, value::types::Type, Engine, Error,
    ExecutionErrorKind, Level, Value,
};
use pretty_assertions::assert_eq;

/// Output sink shared with the engine.
#[derive(Debug, Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("output should be valid UTF-8")
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn engine_in(dir: &Path) -> (Arc<Engine>, Output) {
    let output = Output::default();
    let engine = Engine::with_options(Config::default(), dir, output.clone());
    (engine, output)
}

fn run(source: &str) -> Result<Option<Value>, Error> {
    let (engine, _) = engine_in(Path::new("."));
    engine.run_source(source, "test.nubo")
}

fn test_valid_program(source: &str, expected: Value) {
    let value = run(source)
        .expect("program should run")
        .expect("program should return a value");
    assert_eq!(value, expected);
}

fn test_output(source: &str, expected_output: &str) {
    let (engine, output) = engine_in(Path::new("."));
    engine
        .run_source(source, "test.nubo")
        .expect("program should run");
    assert_eq!(output.text(), expected_output);
}

fn execution_error(source: &str) -> nubo::ExecutionError {
    match run(source) {
        Err(Error::Execution(err)) => err,
        other => panic!("expected an execution error, got {other:?}"),
    }
}

fn render(source: &str) -> String {
    run(source)
        .expect("program should run")
        .expect("program should return an element")
        .to_string()
}

#[test]
fn test_arithmetic_precedence() {
    test_valid_program("let x = 2 + 3 * 4\nreturn x", Value::Int(14));
}

#[test]
fn test_string_method() {
    test_valid_program("let s = \"hi\"\nreturn s.length()", Value::Int(2));
}

#[test]
fn test_for_loop_sum() {
    test_valid_program(
        "let xs = [1,2,3]\nlet sum = 0\nfor _, v in xs { sum = sum + v }\nreturn sum",
        Value::Int(6),
    );
}

#[test]
fn test_dict_get() {
    test_valid_program(
        "const m = dict { \"a\": 1, \"b\": 2 }\nreturn m.get(\"b\")",
        Value::Int(2),
    );
}

#[test]
fn test_try_binds_error() {
    let value = run("try { let x = undefined_name } err\nreturn err.message")
        .unwrap()
        .unwrap();
    let Value::String(message) = value else {
        panic!("expected a string, got {value:?}");
    };
    assert!(message.contains("undefined_name"), "{message}");
}

#[test]
fn test_try_without_error_binds_nil() {
    test_valid_program("try { let x = 1 } err\nreturn isNil(err)", Value::Bool(true));
}

#[test]
fn test_event_handler_observes_payload() {
    test_output(
        "event tick(n: int)\nsub tick(v) { println(v) }\npub tick(7)",
        "7\n",
    );
}

#[test]
fn test_event_payload_is_type_checked() {
    let err = execution_error("event tick(n: int)\npub tick(\"seven\")");
    assert!(matches!(err.kind, ExecutionErrorKind::Event(_)), "{err:?}");
}

#[test]
fn test_typed_declaration() {
    test_valid_program("let x: int = 5\nreturn x", Value::Int(5));
    let err = execution_error("let x: int = \"five\"");
    assert_eq!(err.level(), Level::Type);
}

#[test]
fn test_const_reassignment_fails_at_assignment() {
    let err = execution_error("const x = 1; x = 2");
    assert!(matches!(err.kind, ExecutionErrorKind::ImmutableVariable(ref name) if name == "x"));
    assert_eq!(err.span.line, 1);
    assert!(err.span.column > 1);
}

#[test]
fn test_if_else() {
    test_valid_program("if true { return 1 } else { return 2 }", Value::Int(1));
    test_valid_program("if false { return 1 } else { return 2 }", Value::Int(2));
}

#[test]
fn test_void_function_returning_value() {
    let err = execution_error("fn f() -> void { return 1 }\nf()");
    assert_eq!(err.level(), Level::Type);
}

#[test]
fn test_closure_counter() {
    let source = r#"
    fn makeCounter() {
        let i = 0
        fn count() -> int {
            i++
            return i
        }
        return count
    }

    let counter = makeCounter()
    counter()
    return counter()
    "#;
    test_valid_program(source, Value::Int(2));
}

#[test]
fn test_recursion() {
    let source = r#"
    fn fib(n: int) -> int {
        if n <= 1 { return n }
        return fib(n - 1) + fib(n - 2)
    }
    return fib(15)
    "#;
    test_valid_program(source, Value::Int(610));
}

#[test]
fn test_struct_methods() {
    let source = r#"
    struct Point { x: int; y: int }
    impl Point {
        fn init(self, x: int, y: int) {
            self.x = x
            self.y = y
        }
        fn sum(self) -> int {
            return self.x + self.y
        }
    }
    let p = Point(2, 3)
    return p.sum()
    "#;
    test_valid_program(source, Value::Int(5));
}

#[test]
fn test_private_field_is_hidden() {
    let source = r#"
    struct Account {
        private balance: int
    }
    let a = Account()
    return a.balance
    "#;
    let err = execution_error(source);
    assert!(matches!(err.kind, ExecutionErrorKind::PrivateAccess(_)), "{err:?}");
}

#[test]
fn test_struct_field_assignment_is_type_checked() {
    let err = execution_error("struct P { x: int }\nlet p = P()\np.x = \"a\"");
    assert_eq!(err.level(), Level::Type);
}

#[test]
fn test_impl_in_nested_scope_outlives_the_scope() {
    for source in [
        "struct A {}\nif true { impl A { fn f(self: A) => 1 } }\nreturn A().f()",
        "struct A {}\nfn setup() { impl A { fn f(self: A) => 1 } }\nsetup()\nreturn A().f()",
        "struct A {}\ntry { impl A { fn f(self: A) => 1 } } err\nreturn A().f()",
    ] {
        test_valid_program(source, Value::Int(1));
    }
}

#[test]
fn test_method_sees_scope_of_its_impl() {
    let source = r#"
    struct A {}
    fn setup(base: int) {
        impl A {
            fn f(self: A) -> int => base + 1
        }
    }
    setup(10)
    return A().f()
    "#;
    test_valid_program(source, Value::Int(11));
}

#[test]
fn test_failed_impl_leaves_prototype_untouched() {
    let source = r#"
    struct A {}
    try {
        impl A {
            fn f(self: A) => 1
            fn init(self: A) -> int => 1
        }
    } err
    impl A {
        fn g(self: A) => 2
    }
    return A().g()
    "#;
    test_valid_program(source, Value::Int(2));

    let err = execution_error(
        "struct A {}\ntry { impl A {\nfn f(self: A) => 1\nfn init(self: A) -> int => 1\n} } err\nimpl A { fn g(self: A) => 2 }\nreturn A().f()",
    );
    assert!(
        matches!(&err.kind, ExecutionErrorKind::UnknownProperty { name, .. } if name == "f"),
        "{err:?}"
    );
}

#[test]
fn test_second_impl_is_rejected() {
    let err = execution_error(
        "struct A {}\nimpl A { fn f(self: A) => 1 }\nimpl A { fn g(self: A) => 2 }",
    );
    assert!(err.to_string().contains("already implemented"), "{err}");
}

#[test]
fn test_list_shared_reference_and_clone() {
    let source = r#"
    let a = [1, 2]
    let b = a
    let c = clone(a)
    b.push(3)
    return a.length() * 10 + c.length()
    "#;
    test_valid_program(source, Value::Int(32));
}

#[test]
fn test_break_and_continue() {
    let source = r#"
    let total = 0
    for i in 10 {
        if i == 2 { continue }
        if i == 5 { break }
        total = total + i
    }
    return total
    "#;
    test_valid_program(source, Value::Int(8));
}

#[test]
fn test_defer_runs_last() {
    test_output(
        "fn f() {\n  defer println(\"b\")\n  println(\"a\")\n}\nf()",
        "a\nb\n",
    );
}

#[test]
fn test_spawn_is_awaited() {
    test_output("spawn println(\"task\")", "task\n");
}

#[test]
fn test_division_by_zero() {
    let err = execution_error("return 1 / 0");
    assert!(matches!(err.kind, ExecutionErrorKind::DivisionByZero));
    assert_eq!(err.level(), Level::Value);
}

#[test]
fn test_element_rendering() {
    assert_eq!(render("return (<div :id=\"4\">Hello</div>)"), "<div id=\"4\">Hello</div>");
}

#[test]
fn test_navigation_attribute() {
    assert_eq!(
        render("return <a n-to=\"/x\">go</a>"),
        "<a href=\"/x\" n-to=\"\">go</a>"
    );
}

#[test]
fn test_dynamic_text_escaping() {
    assert_eq!(
        render("let t = \"<b>\"\nreturn <p>{t}</p>"),
        "<p>&lt;b&gt;</p>"
    );
    assert_eq!(render("let t = \"<b>\"\nreturn <p>!{t}</p>"), "<p><b></p>");
}

#[test]
fn test_component() {
    let source = r#"
    fn Card(ctx: Context) -> html {
        return <div class="card">{ctx.props.get("title")}</div>
    }
    return <Card title="Hi" />
    "#;
    assert_eq!(render(source), "<div class=\"card\">Hi</div>");
}

#[test]
fn test_template_literal() {
    test_valid_program(
        "let name = \"nubo\"\nreturn `hi ${name}!`",
        Value::string("hi nubo!"),
    );
}

#[test]
fn test_println_joins_arguments() {
    test_output("println(1, \"a\", true)\nprint(\"x\")", "1 a true\nx");
}

#[test]
fn test_host_globals() {
    let (engine, _) = engine_in(Path::new("."));
    let value = engine
        .run_source_with_globals(
            "return __params__ + 1",
            "host.nubo",
            &[("__params__", Value::Int(41))],
        )
        .unwrap();
    assert_eq!(value, Some(Value::Int(42)));
}

#[test]
fn test_host_package() {
    let (engine, _) = engine_in(Path::new("."));
    let request = Value::dict(
        vec![(Value::string("path"), Value::string("/home"))],
        Type::STRING,
        Type::STRING,
    )
    .unwrap();
    engine.provide_package("@server/request", request);
    let value = engine
        .run_source(
            "import request from \"@server/request\"\nreturn request.get(\"path\")",
            "host.nubo",
        )
        .unwrap();
    assert_eq!(value, Some(Value::string("/home")));
}

#[test]
fn test_disallowed_std_package() {
    let mut config = Config::default();
    config.runtime.std.disallow = "io".into();
    let engine = Engine::with_options(config, ".", Output::default());
    engine.provide_package("@std/io", Value::Nil);
    let err = engine
        .run_source("import io from \"@std/io\"", "host.nubo")
        .unwrap_err();
    assert_eq!(err.level(), Level::Import);
}

#[test]
fn test_cancellation_stops_loop() {
    let (engine, _) = engine_in(Path::new("."));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });
    let err = engine
        .run_source_with_cancel("while true {}", "loop.nubo", cancel)
        .unwrap_err();
    canceller.join().unwrap();
    assert_eq!(err.level(), Level::Fatal);
}

#[test]
fn test_cancellation_is_not_caught() {
    let (engine, _) = engine_in(Path::new("."));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .run_source_with_cancel("try { sleep(10) } err\nreturn 1", "loop.nubo", cancel)
        .unwrap_err();
    assert_eq!(err.level(), Level::Fatal);
}

#[test]
fn test_imports() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("lib.nubo"),
        "fn double(x: int) -> int => x * 2\nconst name = \"lib\"",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.nubo"),
        "import lib from \"./lib\"\nimport { double, name: libName } from \"./lib\"\nreturn lib.double(2) + double(3) + libName.length()",
    )
    .unwrap();

    let (engine, _) = engine_in(dir.path());
    let value = engine.run_file(&dir.path().join("main.nubo")).unwrap();
    assert_eq!(value, Some(Value::Int(13)));
}

#[test]
fn test_import_prefix() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("util.nubo"), "const answer = 42").unwrap();
    fs::write(
        dir.path().join("nested").join("main.nubo"),
        "import { answer } from \"~/util\"\nreturn answer",
    )
    .unwrap();

    let (engine, _) = engine_in(dir.path());
    let value = engine
        .run_file(&dir.path().join("nested").join("main.nubo"))
        .unwrap();
    assert_eq!(value, Some(Value::Int(42)));
}

#[test]
fn test_import_error_keeps_nested_location() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.nubo"), "let a = 1\nlet b = a / 0").unwrap();
    fs::write(dir.path().join("main.nubo"), "import from \"./broken\"").unwrap();

    let (engine, _) = engine_in(dir.path());
    let err = engine.run_file(&dir.path().join("main.nubo")).unwrap_err();
    let span = err.span().unwrap();
    assert!(span.file.ends_with("broken.nubo"), "{span}");
    assert_eq!(span.line, 2);
    assert!(!err.trace().is_empty());
}

#[test]
fn test_include_runs_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("part.nubo"), "println(\"included\")\nreturn 1").unwrap();
    fs::write(
        dir.path().join("main.nubo"),
        "include \"./part\"\nprintln(__entry__)",
    )
    .unwrap();

    let (engine, output) = engine_in(dir.path());
    engine.run_file(&dir.path().join("main.nubo")).unwrap();
    assert_eq!(output.text(), "included\ntrue\n");
}

#[test]
fn test_prepared_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let main = root.join("main.nubo");
    fs::write(&main, "return 1 + 1").unwrap();

    let (engine, _) = engine_in(&root);
    let written = engine.prepare_dir(&root).unwrap();
    assert_eq!(written, vec![root.join(".nubo/prepared/main.nuboc")]);
    assert!(written[0].exists());
    assert_eq!(engine.run_file(&main).unwrap(), Some(Value::Int(2)));

    fs::write(&main, "return 3").unwrap();
    assert_eq!(engine.run_file(&main).unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_error_render() {
    let err = run("let a = 1\nlet b = a / 0").unwrap_err();
    let rendered = err.render_with_source(false, Some("let a = 1\nlet b = a / 0"));
    assert!(rendered.starts_with("ValueError: division by zero at test.nubo:2:"), "{rendered}");
    assert!(rendered.contains("> 2 | let b = a / 0"));
}

#[test]
fn test_detach_drops_script_subscriptions() {
    let (engine, output) = engine_in(Path::new("."));
    engine
        .run_source("event tick(n: int)\nsub tick(v) { println(v) }\npub tick(1)", "events.nubo")
        .unwrap();
    assert_eq!(output.text(), "1\n");

    // The entry module is id 1, so its event is `1_tick`.
    engine.events().publish("1_tick", vec![Value::Int(2)]).unwrap();
    assert!(engine.events().wait_idle(Duration::from_secs(1)));
    assert_eq!(output.text(), "1\n");

    // With the script's handler gone the message was kept for the next subscriber.
    let (sender, receiver) = crossbeam_channel::unbounded();
    let _subscription = engine
        .events()
        .subscribe("1_tick", Arc::new(move |data| {
            let _ = sender.send(data);
        }))
        .unwrap();
    let data = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(data, vec![Value::Int(2)]);
}

#[test]
fn test_shutdown_stops_spawned_tasks() {
    let (engine, _) = engine_in(Path::new("."));
    let stopper = engine.clone();
    let shutdown = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stopper.shutdown();
    });
    let value = engine
        .run_source("fn spin() { while true {} }\nspawn spin()\nreturn 1", "spin.nubo")
        .unwrap();
    shutdown.join().unwrap();
    assert_eq!(value, Some(Value::Int(1)));
}

#[test]
fn test_detach_cascades_to_imports() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("lib.nubo"),
        "event tick(n: int)\nsub tick(v) { println(v) }",
    )
    .unwrap();
    fs::write(dir.path().join("main.nubo"), "import lib from \"./lib\"\npub lib.tick(1)").unwrap();

    let (engine, output) = engine_in(dir.path());
    engine.run_file(&dir.path().join("main.nubo")).unwrap();
    assert_eq!(output.text(), "1\n");

    // main is module 1 and lib module 2; lib went away with main.
    engine.events().publish("2_tick", vec![Value::Int(2)]).unwrap();
    assert!(engine.events().wait_idle(Duration::from_secs(1)));
    assert_eq!(output.text(), "1\n");
    let (sender, receiver) = crossbeam_channel::unbounded();
    let _subscription = engine
        .events()
        .subscribe("2_tick", Arc::new(move |data| {
            let _ = sender.send(data);
        }))
        .unwrap();
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(1)).unwrap(),
        vec![Value::Int(2)]
    );
}

#[test]
fn test_detach_releases_struct_methods() {
    let value = run("struct A {}\nimpl A { fn f(self: A) => 1 }\nreturn A")
        .unwrap()
        .expect("program should return the struct");
    match value {
        Value::StructDef(definition) => assert!(definition.prototype.names().is_empty()),
        other => panic!("expected a struct definition, got {other:?}"),
    }
}
