//! Cleanup transforms driven through the pipeline contract

use std::fs;
use std::path::PathBuf;

use unshade::jvm::code::{ConstValue, Instruction, InvokeKind, MethodRef, StackOp};
use unshade::jvm::model::{ClassModel, MethodModel};
use unshade::jvm::{ClassAccessFlags, MethodAccessFlags};
use unshade::pipeline::{Pipeline, StepError, Transform};
use unshade::table::ClassTable;
use unshade::transforms::{GuessParameterNames, Remap, SanitizeSignatures};

/// Unique scratch directory per test, removed on drop
struct Scratch(PathBuf);

impl Scratch {
    fn new(tag: &str) -> Scratch {
        let dir = std::env::temp_dir().join(format!(
            "unshade-{}-{}-{:?}",
            tag,
            std::process::id(),
            std::thread::current().id()
        ));
        fs::create_dir_all(&dir).unwrap();
        Scratch(dir)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn class_declaring_b(class_name: &str, callee_owner: &str) -> ClassModel {
    let mut class = ClassModel::new(class_name, ClassAccessFlags::PUBLIC);

    let mut declared = MethodModel::new("b", "()V", MethodAccessFlags::PUBLIC);
    declared.instructions = vec![Instruction::Return(None)];
    class.add_method(declared);

    let mut caller = MethodModel::new("caller", "()V", MethodAccessFlags::PUBLIC);
    caller.instructions = vec![
        Instruction::Invoke(
            InvokeKind::Static,
            MethodRef {
                owner: callee_owner.to_owned(),
                name: "b".to_owned(),
                descriptor: "()V".to_owned(),
            },
        ),
        Instruction::Return(None),
    ];
    class.add_method(caller);
    class
}

#[test]
fn remap_renames_across_unrelated_owners() {
    let scratch = Scratch::new("remap");
    fs::write(
        scratch.0.join("mappings.tiny"),
        "v1\tofficial\tnamed\n\
         CLASS\ta\tAlpha\n\
         METHOD\ta\t()V\tb\tbeta\n",
    )
    .unwrap();

    // Two unrelated classes both declare a method literally named "b"
    let mut table = ClassTable::from_classes(vec![
        class_declaring_b("a", "other"),
        class_declaring_b("other", "a"),
    ]);

    let summary = Remap::in_directory(&scratch.0)
        .run(&mut table, false)
        .expect("mappings file is present and valid");
    assert_eq!(summary.processed, 2);

    // The class rename took, and the old key is gone
    assert!(table.get("a").is_none());
    let alpha = table.get("Alpha").unwrap();
    let other = table.get("other").unwrap();

    // Both declarations renamed, despite unrelated owners
    assert_eq!(alpha.methods[0].name, "beta");
    assert_eq!(other.methods[0].name, "beta");

    // And every call site referencing the simple name "b"
    for class in [alpha, other] {
        match &class.methods[1].instructions[0] {
            Instruction::Invoke(_, mref) => {
                assert_eq!(mref.name, "beta");
                assert_ne!(mref.owner, "a", "class rename must reach call-site owners");
            }
            other => panic!("unexpected instruction {:?}", other),
        }
    }
}

#[test]
fn missing_mappings_abort_only_the_remap_step() {
    let scratch = Scratch::new("no-mappings");
    let mut table = ClassTable::from_classes(vec![class_declaring_b("a", "a")]);

    let result = Remap::in_directory(&scratch.0).run(&mut table, false);
    assert!(matches!(result, Err(StepError::Config(_))));

    // Nothing was renamed
    assert!(table.get("a").is_some());
    assert_eq!(table.get("a").unwrap().methods[0].name, "b");
}

#[test]
fn malformed_mappings_are_a_configuration_failure() {
    let scratch = Scratch::new("bad-mappings");
    fs::write(scratch.0.join("mappings.tiny"), "not a mappings header\n").unwrap();

    let mut table = ClassTable::from_classes(vec![class_declaring_b("a", "a")]);
    let result = Remap::in_directory(&scratch.0).run(&mut table, false);
    assert!(matches!(result, Err(StepError::Config(_))));
}

#[test]
fn pipeline_stops_at_the_failing_step_but_keeps_earlier_work() {
    let scratch = Scratch::new("pipeline");

    let mut class = class_declaring_b("a", "a");
    class.generic_signature = Some("garbage".to_owned());
    let mut table = ClassTable::from_classes(vec![class]);

    let mut pipeline = Pipeline::new();
    pipeline.push(SanitizeSignatures::new());
    // No mappings file: this step must fail and stop the run
    pipeline.push(Remap::in_directory(&scratch.0));
    pipeline.push(GuessParameterNames::new());

    assert!(!pipeline.run(&mut table, false));

    // The sanitation committed before the failure is preserved
    assert_eq!(table.get("a").unwrap().generic_signature, None);
    // The parameter pass never ran
    assert!(table.get("a").unwrap().methods[0].parameters.is_none());
}

#[test]
fn parameter_names_survive_the_full_pipeline() {
    let mut class = ClassModel::new("app", ClassAccessFlags::PUBLIC);
    let mut method = MethodModel::new("sum", "(II)I", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC);
    method.instructions = vec![
        Instruction::Const(ConstValue::Int(0)),
        Instruction::Return(Some(unshade::jvm::code::LocalKind::Int)),
    ];
    class.add_method(method);
    let mut table = ClassTable::from_classes(vec![class]);

    let mut pipeline = Pipeline::new();
    pipeline.push(GuessParameterNames::new());
    assert!(pipeline.run(&mut table, false));

    let method = table.get("app").unwrap().method("sum", "(II)I").unwrap();
    let parameters = method.parameters.as_ref().unwrap();
    assert_eq!(parameters[0].name, "int1");
    assert_eq!(parameters[1].name, "int2");
    assert_eq!(method.validate_labels(), Ok(()));

    // The synthesized span reuses the method-wide boundary labels
    let locals = method.local_variables.as_ref().unwrap();
    assert_eq!(locals.len(), 2);
    assert_eq!(locals[0].start, locals[1].start);
    assert_eq!(locals[0].end, locals[1].end);
}

#[test]
fn remap_preserves_unmapped_string_constants() {
    let scratch = Scratch::new("strings");
    fs::write(
        scratch.0.join("mappings.tiny"),
        "v1\tofficial\tnamed\nCLASS\ta\tAlpha\n",
    )
    .unwrap();

    let mut class = ClassModel::new("a", ClassAccessFlags::PUBLIC);
    let mut method = MethodModel::new("m", "()V", MethodAccessFlags::PUBLIC);
    method.instructions = vec![
        Instruction::Const(ConstValue::Str("a".to_owned())),
        Instruction::Stack(StackOp::Pop),
        Instruction::Return(None),
    ];
    class.add_method(method);
    let mut table = ClassTable::from_classes(vec![class]);

    Remap::in_directory(&scratch.0).run(&mut table, false).unwrap();

    // Renaming is structural, never inside string literals
    let method = table.get("Alpha").unwrap().method("m", "()V").unwrap();
    assert_eq!(
        method.instructions[0],
        Instruction::Const(ConstValue::Str("a".to_owned()))
    );
}
