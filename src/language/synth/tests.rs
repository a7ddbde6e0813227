use super::*;
use crate::language::template::TemplateBindingError;
use crate::runtime::value::Value;

fn call(compiler: &mut Compiler, module: &Module, name: &str, args: Vec<Value>) -> Value {
    let handle = module
        .function(name)
        .unwrap_or_else(|| panic!("missing function {name}"));
    compiler.call(&handle, args).expect("call")
}

fn type_fragment(text: &str) -> Fragment {
    Fragment::parse_expr("inner", text).expect("fragment")
}

#[test]
fn rc_block_is_freed_after_one_release_per_owner() {
    let mut compiler = Compiler::new();
    let rc = compiler
        .declare_rc("rc_i64", type_fragment("i64"))
        .expect("declare rc");
    let user = compiler
        .compile(
            Unit::source("user", "(fun read ((r rc_i64)) i64 (load (rc_i64_deref r)))"),
            &[rc.clone()],
        )
        .expect("compile user");

    let first = call(&mut compiler, &rc, "rc_i64_new", vec![Value::Int(41)]);
    assert_eq!(compiler.heap().live_blocks(), 1);
    assert_eq!(call(&mut compiler, &rc, "rc_i64_count", vec![first.clone()]), Value::Int(1));
    assert_eq!(call(&mut compiler, &user, "read", vec![first.clone()]), Value::Int(41));

    let second = call(&mut compiler, &rc, "rc_i64_duplicate", vec![first.clone()]);
    let third = call(&mut compiler, &rc, "rc_i64_duplicate", vec![second.clone()]);
    assert_eq!(call(&mut compiler, &rc, "rc_i64_count", vec![first.clone()]), Value::Int(3));

    for owner in [first, second] {
        call(&mut compiler, &rc, "rc_i64_release", vec![owner]);
        assert_eq!(compiler.heap().live_blocks(), 1);
    }
    call(&mut compiler, &rc, "rc_i64_release", vec![third]);
    assert_eq!(compiler.heap().live_blocks(), 0);
}

#[test]
fn struct_fragment_is_spliced_as_the_payload_type() {
    let mut compiler = Compiler::new();
    let rc = compiler
        .declare_rc("rc_vec2", type_fragment("(struct vec2 (x i64) (y i64))"))
        .expect("declare rc");
    assert!(rc.type_named("vec2").is_some());
    assert!(rc.type_named("rc_vec2").is_some());

    let user = compiler
        .compile(
            Unit::source(
                "user",
                r#"
                (fun y_of_fresh () i64
                  (let r (rc_vec2_new (make vec2 3 4)))
                  (let y (load (field (rc_vec2_deref r) y)))
                  (rc_vec2_release r)
                  y)
                "#,
            ),
            &[rc],
        )
        .expect("compile user");
    assert_eq!(call(&mut compiler, &user, "y_of_fresh", vec![]), Value::Int(4));
    assert_eq!(compiler.heap().live_blocks(), 0);
}

#[test]
fn redeclaring_a_wrapper_is_an_error() {
    let mut compiler = Compiler::new();
    compiler
        .declare_rc("shared", type_fragment("u64"))
        .expect("first declaration");
    let err = compiler
        .declare_rc("shared", type_fragment("i64"))
        .expect_err("second declaration");
    assert!(matches!(err, SynthError::DuplicateDefinition { ref name } if name == "shared"));
}

#[test]
fn invalid_wrapper_names_and_payloads_are_rejected() {
    let mut compiler = Compiler::new();
    let err = compiler
        .declare_rc("not valid", type_fragment("i64"))
        .expect_err("bad name");
    assert!(matches!(
        err,
        SynthError::Template(TemplateBindingError::InvalidIdentifier { .. })
    ));
    let err = compiler
        .declare_rc("w", type_fragment("(+ 1 2)"))
        .expect_err("bad payload");
    assert!(matches!(err, SynthError::InvalidFragment { .. }));
}

#[test]
fn array_round_trips_its_elements() {
    let mut compiler = Compiler::new();
    let element = TypeRef::parse("i64").expect("type");
    let ops = compiler.declare_array(&element).expect("declare array");
    let rc = ops.dependencies()[0].clone();
    assert_eq!(rc.name(), "array_i64");
    assert_eq!(ops.global("array_i64_cached_offset"), Some(Value::Int(-1)));

    let user = compiler
        .compile(
            Unit::source(
                "user",
                r#"
                (fun build () array_i64 (array_i64_new (seq i64 1 2 3)))
                (fun total ((xs array_i64)) i64
                  (let sum 0)
                  (let i 0)
                  (while (< i (array_i64_length xs))
                    (set sum (+ sum (array_i64_index xs i)))
                    (set i (+ i 1)))
                  sum)
                "#,
            ),
            &[ops.clone(), rc.clone()],
        )
        .expect("compile user");

    let array = call(&mut compiler, &user, "build", vec![]);
    assert_eq!(compiler.heap().live_blocks(), 1);
    assert_eq!(ops.global("array_i64_cached_offset"), Some(Value::Int(16)));
    assert_eq!(
        call(&mut compiler, &ops, "array_i64_length", vec![array.clone()]),
        Value::Int(3)
    );
    for (index, expected) in [1, 2, 3].into_iter().enumerate() {
        let value = call(
            &mut compiler,
            &ops,
            "array_i64_index",
            vec![array.clone(), Value::Int(index as i64)],
        );
        assert_eq!(value, Value::Int(expected));
    }
    assert_eq!(call(&mut compiler, &user, "total", vec![array.clone()]), Value::Int(6));

    call(&mut compiler, &rc, "array_i64_release", vec![array]);
    assert_eq!(compiler.heap().live_blocks(), 0);
}

#[test]
fn byte_arrays_store_elements_after_the_header() {
    let mut compiler = Compiler::new();
    let ops = compiler
        .declare_array(&TypeRef::parse("u8").expect("type"))
        .expect("declare array");
    let items = Value::seq(
        crate::language::types::Type::U8,
        &[Value::Int(7), Value::Int(8), Value::Int(9)],
    )
    .expect("seq");
    let array = call(&mut compiler, &ops, "array_u8_new", vec![items]);
    assert_eq!(compiler.heap().live_bytes(), 24);
    let last = call(
        &mut compiler,
        &ops,
        "array_u8_index",
        vec![array, Value::Int(2)],
    );
    assert_eq!(last, Value::Int(9));
}

#[test]
fn array_names_are_derived_from_the_element_type() {
    let pointer = TypeRef::parse("(ptr u8)").expect("type");
    assert_eq!(array_name(&pointer), "array_ptr_u8");

    let mut compiler = Compiler::new();
    let ops = compiler.declare_array(&pointer).expect("declare array");
    assert!(ops.function("array_ptr_u8_new").is_some());
    assert_eq!(compiler.array_module(&pointer), Some(ops));
    assert!(compiler.rc_module("array_ptr_u8").is_some());
}

#[test]
fn redeclaring_an_array_is_an_error() {
    let mut compiler = Compiler::new();
    let element = TypeRef::parse("u64").expect("type");
    compiler.declare_array(&element).expect("first declaration");
    let err = compiler.declare_array(&element).expect_err("second declaration");
    assert!(matches!(err, SynthError::DuplicateDefinition { ref name } if name == "array_u64"));
}
