//! End-to-end interpreter tests: parse, instantiate, execute.

use rstest::rstest;
use wattle::ast::builders;
use wattle::ast::{NumberValue, Valtype};
use wattle::runtime::instance::create_instance;
use wattle::runtime::{
    create_stack_frame, execute_stack_frame, invoke, Allocator, ImportObject, Memory, Outcome, RuntimeError, Value,
};
use wattle::wat;

fn allocator() -> Allocator {
    Allocator::new(Memory::new(1, None).expect("memory"))
}

/// Parse a module source and instantiate it.
fn instantiate(source: &str, imports: ImportObject) -> (Allocator, wattle::runtime::ModuleInstance) {
    let program = wat::parse_str(source).expect("parse failed");
    let module = program.first_module().expect("no module");
    let mut alloc = allocator();
    let instance = create_instance(&mut alloc, module, imports).expect("instantiation failed");
    (alloc, instance)
}

// ============================================================================
// Raw stack frames
// ============================================================================

#[test]
fn add_two_locals() {
    let code = vec![
        builders::instr(
            "get_local",
            None,
            vec![builders::number_literal(NumberValue::I32(0), "0")],
            Default::default(),
        ),
        builders::instr(
            "get_local",
            None,
            vec![builders::number_literal(NumberValue::I32(1), "1")],
            Default::default(),
        ),
        builders::bare_instr("add", Some(Valtype::I32)),
    ];

    let mut alloc = allocator();
    let mut frame = create_stack_frame(code, vec![Value::I32(1), Value::I32(1)]);
    let outcome = execute_stack_frame(&mut alloc, &mut frame).expect("execution failed");
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(2))));
}

#[test]
fn f32_min_zero_signs_and_nan() {
    let code = vec![
        builders::instr(
            "get_local",
            None,
            vec![builders::number_literal(NumberValue::I32(0), "0")],
            Default::default(),
        ),
        builders::instr(
            "get_local",
            None,
            vec![builders::number_literal(NumberValue::I32(1), "1")],
            Default::default(),
        ),
        builders::bare_instr("min", Some(Valtype::F32)),
    ];

    let mut alloc = allocator();
    let mut frame = create_stack_frame(code.clone(), vec![Value::F32(0.0), Value::F32(-0.0)]);
    match execute_stack_frame(&mut alloc, &mut frame).unwrap() {
        Outcome::Done(Some(Value::F32(v))) => assert!(v == 0.0 && v.is_sign_negative()),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let mut frame = create_stack_frame(code, vec![Value::F32(f32::NAN), Value::F32(1234.0)]);
    match execute_stack_frame(&mut alloc, &mut frame).unwrap() {
        Outcome::Done(Some(Value::F32(v))) => assert!(v.is_nan()),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

// ============================================================================
// Whole modules
// ============================================================================

#[test]
fn invoke_exported_add() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "add") (param i32 i32) (result i32)
               (i32.add (get_local 0) (get_local 1))))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "add", vec![Value::I32(2), Value::I32(3)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(5))));
}

#[rstest]
#[case(vec![Value::I32(1), Value::I32(1)], Value::I32(2))]
#[case(vec![Value::I32(i32::MAX), Value::I32(1)], Value::I32(i32::MIN))]
#[case(vec![Value::I32(-5), Value::I32(3)], Value::I32(-2))]
fn exported_add_cases(#[case] args: Vec<Value>, #[case] expected: Value) {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "add") (param i32 i32) (result i32)
               (i32.add (get_local 0) (get_local 1))))"#,
        ImportObject::new(),
    );
    let outcome = invoke(&mut alloc, &instance, "add", args).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(expected)));
}

#[test]
fn data_segments_initialise_memory() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (memory $m 1)
             (data (i32.const 4) "hi")
             (func (export "first") (result i32)
               (i32.load (i32.const 4))))"#,
        ImportObject::new(),
    );

    assert_eq!(alloc.memory().read_byte(4).unwrap(), b'h');
    assert_eq!(alloc.memory().read_byte(5).unwrap(), b'i');

    // "hi" little-endian with two zero bytes above.
    let outcome = invoke(&mut alloc, &instance, "first", vec![]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(0x6968))));
}

#[test]
fn globals_initialise_and_mutate() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (global $counter (mut i32) (i32.const 10))
             (func (export "bump") (result i32)
               (set_global 0 (i32.add (get_global 0) (i32.const 1)))
               (get_global 0)))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "bump", vec![]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(11))));
    let outcome = invoke(&mut alloc, &instance, "bump", vec![]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(12))));
}

#[test]
fn imported_host_functions_are_called() {
    let mut imports = ImportObject::new();
    imports.add_function("math", "double", |args| {
        let v = args[0].as_i32().unwrap_or(0);
        Ok(Some(Value::I32(v * 2)))
    });

    let (mut alloc, instance) = instantiate(
        r#"(module
             (func $double (import "math" "double") (param i32) (result i32))
             (func (export "quad") (param i32) (result i32)
               (call $double (call $double (get_local 0)))))"#,
        imports,
    );

    let outcome = invoke(&mut alloc, &instance, "quad", vec![Value::I32(3)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(12))));
}

#[test]
fn missing_import_fails_instantiation() {
    let program = wat::parse_str(r#"(module (func $f (import "m" "gone") (param i32)))"#).unwrap();
    let module = program.first_module().unwrap();
    let mut alloc = allocator();
    let err = create_instance(&mut alloc, module, ImportObject::new()).unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownImport { .. }));
}

#[test]
fn blocks_and_ifs_produce_results() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "pick") (param i32) (result i32)
               (if (result i32) (get_local 0)
                 (then (block (result i32) (i32.const 1)))
                 (else (i32.const 2)))))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "pick", vec![Value::I32(1)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(1))));
    let outcome = invoke(&mut alloc, &instance, "pick", vec![Value::I32(0)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(2))));
}

#[rstest]
#[case(1, 1)]
#[case(5, 15)]
#[case(10, 55)]
fn loops_iterate_via_branches(#[case] n: i32, #[case] expected: i32) {
    // Sums n down to zero by re-entering the loop body through br_if.
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "sum") (param i32) (result i32)
               (local i32)
               (loop $top
                 (set_local 1 (i32.add (get_local 1) (get_local 0)))
                 (set_local 0 (i32.add (get_local 0) (i32.const -1)))
                 (br_if $top (get_local 0)))
               (get_local 1)))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "sum", vec![Value::I32(n)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(expected))));
}

#[test]
fn br_exits_an_outer_block_from_inside_a_loop() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "find") (param i32) (result i32)
               (block $found (result i32)
                 (loop $retry
                   (br_if $found (get_local 0) (get_local 0))
                   (set_local 0 (i32.const 7))
                   (br $retry)))))"#,
        ImportObject::new(),
    );

    // Nonzero input exits immediately; zero input is rewritten to 7 on the
    // second pass and then exits.
    let outcome = invoke(&mut alloc, &instance, "find", vec![Value::I32(3)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(3))));
    let outcome = invoke(&mut alloc, &instance, "find", vec![Value::I32(0)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(7))));
}

#[test]
fn traps_propagate_through_nested_frames() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func $inner (result i32)
               (block (result i32)
                 (i32.div (i32.const 1) (i32.const 0))))
             (func (export "outer") (result i32)
               (call $inner)))"#,
        ImportObject::new(),
    );

    match invoke(&mut alloc, &instance, "outer", vec![]).unwrap() {
        Outcome::Trap(trap) => assert!(trap.message.contains("divide by zero")),
        other => panic!("expected trap, got {:?}", other),
    }
}

#[test]
fn call_indirect_goes_through_the_table() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (table $t (elem $one $two))
             (func $one (result i32) (i32.const 1))
             (func $two (result i32) (i32.const 2))
             (func (export "dispatch") (param i32) (result i32)
               (call_indirect (result i32) (get_local 0))))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "dispatch", vec![Value::I32(0)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(1))));
    let outcome = invoke(&mut alloc, &instance, "dispatch", vec![Value::I32(1)]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(2))));

    match invoke(&mut alloc, &instance, "dispatch", vec![Value::I32(9)]).unwrap() {
        Outcome::Trap(trap) => assert!(trap.message.contains("element")),
        other => panic!("expected trap, got {:?}", other),
    }
}

#[test]
fn start_function_runs_at_instantiation() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (global $g (mut i32) (i32.const 0))
             (func $init (set_global 0 (i32.const 7)))
             (start $init)
             (func (export "read") (result i32) (get_global 0)))"#,
        ImportObject::new(),
    );

    let outcome = invoke(&mut alloc, &instance, "read", vec![]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(7))));
}

#[test]
fn locals_declared_in_the_body_are_usable() {
    let (mut alloc, instance) = instantiate(
        r#"(module
             (func (export "sum3") (param i32 i32 i32) (result i32)
               (local i32)
               (set_local 3 (i32.add (get_local 0) (get_local 1)))
               (i32.add (get_local 3) (get_local 2))))"#,
        ImportObject::new(),
    );

    let outcome = invoke(
        &mut alloc,
        &instance,
        "sum3",
        vec![Value::I32(1), Value::I32(2), Value::I32(3)],
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(6))));
}

#[test]
fn invoke_checks_argument_types() {
    let (mut alloc, instance) = instantiate(
        r#"(module (func (export "id") (param i32) (result i32) (get_local 0)))"#,
        ImportObject::new(),
    );

    assert!(matches!(
        invoke(&mut alloc, &instance, "id", vec![Value::F64(1.0)]),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    assert!(matches!(
        invoke(&mut alloc, &instance, "id", vec![]),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    assert!(matches!(
        invoke(&mut alloc, &instance, "missing", vec![]),
        Err(RuntimeError::UnknownExport(_))
    ));
}

#[test]
fn separate_modules_need_separate_allocators() {
    // Two instances sharing one allocator: addresses stay disjoint.
    let program = wat::parse_str(r#"(module (global $g i32 (i32.const 5)) (func (export "g") (result i32) (get_global 0)))"#)
        .unwrap();
    let module = program.first_module().unwrap();

    let mut alloc = allocator();
    let a = create_instance(&mut alloc, module, ImportObject::new()).unwrap();
    let b = create_instance(&mut alloc, module, ImportObject::new()).unwrap();
    assert_ne!(a.globaladdrs[0], b.globaladdrs[0]);

    let outcome = invoke(&mut alloc, &b, "g", vec![]).unwrap();
    assert_eq!(outcome, Outcome::Done(Some(Value::I32(5))));
}
