use super::*;
use crate::runtime::error::RuntimeError;

fn compile(compiler: &mut Compiler, name: &str, text: &str, deps: &[Module]) -> Module {
    compiler
        .compile(Unit::source(name, text), deps)
        .unwrap_or_else(|err| panic!("compile {name}: {err} (line {})", err.line))
}

fn call(compiler: &mut Compiler, module: &Module, name: &str, args: Vec<Value>) -> Value {
    let handle = module.function(name).expect("function");
    compiler.call(&handle, args).expect("call")
}

fn compile_err(text: &str) -> CompileError {
    Compiler::new()
        .compile(Unit::source("broken", text), &[])
        .expect_err("compile should fail")
}

#[test]
fn compiles_and_calls_a_function() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "math",
        "(fun add ((a i64) (b i64)) i64 (+ a b))",
        &[],
    );
    assert_eq!(module.name(), "math");
    let sum = call(&mut compiler, &module, "add", vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(sum, Value::Int(5));
}

#[test]
fn functions_may_be_called_before_their_definition() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "order",
        "(fun first () i64 (second 20)) (fun second ((x i64)) i64 (* x 2))",
        &[],
    );
    assert_eq!(call(&mut compiler, &module, "first", vec![]), Value::Int(40));
}

#[test]
fn own_definitions_shadow_dependencies() {
    let mut compiler = Compiler::new();
    let one = compile(&mut compiler, "one", "(fun which () i64 1)", &[]);
    let two = compile(
        &mut compiler,
        "two",
        "(fun which () i64 2) (fun only_two () i64 22)",
        &[],
    );
    let user = "(fun get () i64 (which)) (fun get_two () i64 (only_two))";

    let forward = compile(&mut compiler, "forward", user, &[one.clone(), two.clone()]);
    assert_eq!(call(&mut compiler, &forward, "get", vec![]), Value::Int(1));
    assert_eq!(call(&mut compiler, &forward, "get_two", vec![]), Value::Int(22));

    let backward = compile(&mut compiler, "backward", user, &[two.clone(), one.clone()]);
    assert_eq!(call(&mut compiler, &backward, "get", vec![]), Value::Int(2));

    let own = compile(
        &mut compiler,
        "own",
        "(fun which () i64 3) (fun get () i64 (which))",
        &[one, two],
    );
    assert_eq!(call(&mut compiler, &own, "get", vec![]), Value::Int(3));
}

#[test]
fn dependencies_shadow_the_base_library() {
    let mut compiler = Compiler::new();
    let fake = compile(
        &mut compiler,
        "fake_alloc",
        "(fun malloc ((size u64)) (ptr u8) (cast (ptr u8) 0))",
        &[],
    );
    let user = compile(
        &mut compiler,
        "user",
        "(fun grab () u64 (addr (malloc 8)))",
        &[fake],
    );
    assert_eq!(call(&mut compiler, &user, "grab", vec![]), Value::Int(0));
    assert_eq!(compiler.heap().live_blocks(), 0);
}

#[test]
fn structs_resolve_across_modules() {
    let mut compiler = Compiler::new();
    let shapes = compile(&mut compiler, "shapes", "(struct pair (a i64) (b i64))", &[]);
    let user = compile(
        &mut compiler,
        "user",
        "(fun second () i64 (. (make pair 4 9) b))",
        &[shapes.clone()],
    );
    assert_eq!(call(&mut compiler, &user, "second", vec![]), Value::Int(9));
    let pair = shapes.type_named("pair").expect("pair");
    assert_eq!(pair.size(), 16);
    assert!(shapes.type_named("triple").is_none());
    assert!(shapes.function("second").is_none());
}

#[test]
fn memory_forms_read_and_write_the_heap() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "points",
        r#"
        (struct point (x i64) (y i64))
        (fun roundtrip () i64
          (let p (cast (ptr point) (malloc (sizeof point))))
          (store (field p y) 7)
          (let v (load p))
          (free p)
          (. v y))
        (fun third () u8
          (let bytes (malloc 4))
          (seq_copy bytes (seq u8 10 20 30 40))
          (let value (load (offset bytes 2)))
          (free bytes)
          value)
        "#,
        &[],
    );
    assert_eq!(call(&mut compiler, &module, "roundtrip", vec![]), Value::Int(7));
    assert_eq!(call(&mut compiler, &module, "third", vec![]), Value::Int(30));
    assert_eq!(compiler.heap().live_blocks(), 0);
}

#[test]
fn loops_and_locals() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "loops",
        r#"
        (fun sum ((n i64)) i64
          (let total 0)
          (let i 0)
          (while (< i n)
            (set i (+ i 1))
            (set total (+ total i)))
          total)
        (fun sign ((n i64)) i64
          (if (< n 0) (- 1) (if (== n 0) 0 1)))
        "#,
        &[],
    );
    assert_eq!(call(&mut compiler, &module, "sum", vec![Value::Int(4)]), Value::Int(10));
    assert_eq!(call(&mut compiler, &module, "sign", vec![Value::Int(-5)]), Value::Int(-1));
    assert_eq!(call(&mut compiler, &module, "sign", vec![Value::Int(0)]), Value::Int(0));
}

#[test]
fn globals_are_initialised_once_and_persist_between_calls() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "state",
        "(global counter i64 10) (fun bump () i64 (set counter (+ counter 1)) counter)",
        &[],
    );
    assert_eq!(module.global("counter"), Some(Value::Int(10)));
    assert_eq!(call(&mut compiler, &module, "bump", vec![]), Value::Int(11));
    assert_eq!(call(&mut compiler, &module, "bump", vec![]), Value::Int(12));
    assert_eq!(module.global("counter"), Some(Value::Int(12)));
}

#[test]
fn unit_functions_discard_their_last_value() {
    let mut compiler = Compiler::new();
    let module = compile(&mut compiler, "unit", "(fun noop () unit (+ 1 2))", &[]);
    assert_eq!(call(&mut compiler, &module, "noop", vec![]), Value::Unit);
}

#[test]
fn arity_mismatches_are_compile_errors() {
    let err = compile_err("(fun f ((a i64)) i64 a)\n(fun g () i64 (f 1 2))");
    assert_eq!(err.message, "`f` takes 1 argument but 2 were supplied");
    assert_eq!(err.unit, "broken");
    assert_eq!(err.line, 2);
}

#[test]
fn unknown_names_point_at_the_symbol() {
    let text = "(fun f () i64 missing)";
    let err = compile_err(text);
    assert_eq!(err.message, "unknown name `missing`");
    assert_eq!(err.offset(), text.find("missing").expect("offset"));
}

#[test]
fn reserved_names_cannot_be_defined() {
    let err = compile_err("(fun let () i64 1)");
    assert!(err.message.contains("reserved"), "{}", err.message);
    let err = compile_err("(fun f () i64 (let seq 1) 2)");
    assert!(err.message.contains("reserved"), "{}", err.message);
}

#[test]
fn struct_containing_itself_by_value_is_rejected() {
    let err = compile_err("(struct node (next node))");
    assert!(err.message.contains("contains itself"), "{}", err.message);
    assert!(err.help_text().is_some());
    let diagnostic: &dyn miette::Diagnostic = &err;
    assert!(diagnostic.help().is_some());

    let mut compiler = Compiler::new();
    compile(
        &mut compiler,
        "list",
        "(struct node (value i64) (next (ptr node)))",
        &[],
    );
}

#[test]
fn type_errors_are_reported() {
    let err = compile_err("(fun f () i64 (+ 1 true))");
    assert_eq!(err.message, "expected an integer, found bool");
    let err = compile_err("(fun f () i64 \"text\")");
    assert!(err.message.contains("returns i64"), "{}", err.message);
}

#[test]
fn syntax_errors_become_compile_errors() {
    let err = compile_err("(fun f () i64");
    assert_eq!(err.message, "unclosed `(`");
    assert_eq!((err.line, err.column), (1, 1));
}

#[test]
fn failed_initialisers_fail_the_compile() {
    let err = compile_err("(global ratio i64 (/ 1 0))");
    assert!(err.message.contains("initialiser of global `ratio`"), "{}", err.message);
}

#[test]
fn failed_compile_leaves_existing_modules_untouched() {
    let mut compiler = Compiler::new();
    let good = compile(&mut compiler, "good", "(global hits i64 0) (fun ok () i64 1)", &[]);
    let result = compiler.compile(Unit::source("bad", "(fun f () i64 (missing))"), &[good.clone()]);
    assert!(result.is_err());
    assert_eq!(call(&mut compiler, &good, "ok", vec![]), Value::Int(1));
    assert_eq!(good.global("hits"), Some(Value::Int(0)));
}

#[test]
fn runtime_errors_surface_from_calls() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "fails",
        "(fun boom () unit (panic \"boom\"))",
        &[],
    );
    let handle = module.function("boom").expect("boom");
    assert_eq!(
        compiler.call(&handle, vec![]),
        Err(RuntimeError::Panic {
            message: "boom".into()
        })
    );
    assert!(matches!(
        compiler.call(&handle, vec![Value::Int(1)]),
        Err(RuntimeError::ArityMismatch { .. })
    ));
}

#[test]
fn diagnostics_name_the_source_file() {
    let path = std::path::Path::new("mods/bad.cld");
    let mut compiler = Compiler::new();
    let err = compiler
        .compile(Unit::file("bad", path, "(fun f () i64 (g))"), &[])
        .expect_err("unknown function");
    assert_eq!(err.unit, "bad");
    assert_eq!(err.source_name(), path.display().to_string());

    let err = compiler
        .compile(Unit::file("bad", path, "(fun f () i64"), &[])
        .expect_err("syntax error");
    assert_eq!(err.source_name(), path.display().to_string());
    assert_eq!(compile_err("(fun f () i64").source_name(), "broken");
}

#[test]
fn runaway_recursion_is_a_runtime_error() {
    let mut compiler = Compiler::new();
    let module = compile(
        &mut compiler,
        "loop",
        "(fun f ((n i64)) i64 (+ 1 (f n)))\n(fun ok () i64 (f2 3))\n(fun f2 ((n i64)) i64 (if (== n 0) 0 (+ 1 (f2 (- n 1)))))",
        &[],
    );
    let f = module.function("f").expect("f");
    let err = compiler.call(&f, vec![Value::Int(1)]).expect_err("overflow");
    assert!(matches!(err, RuntimeError::StackOverflow { .. }), "{err}");
    assert_eq!(call(&mut compiler, &module, "ok", vec![]), Value::Int(3));
}
