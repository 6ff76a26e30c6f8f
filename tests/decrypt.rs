//! End-to-end coverage of the string-decryption transform

use unshade::jvm::code::{
    ArithOp, ConstValue, ConvOp, DynamicCallSite, FieldAccess, FieldRef, Instruction, InvokeKind,
    LocalKind, MethodRef, StackOp, TypeOp,
};
use unshade::jvm::model::{ClassModel, FieldModel, MethodModel};
use unshade::jvm::{names, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use unshade::pipeline::Transform;
use unshade::table::ClassTable;
use unshade::zkm::{self, StringDecrypt};

const SEED: i64 = 0x1122_3344_5566_7788;
const METHOD_SEED: i64 = 0x0A0B_0C0D_0E0F_1011u64 as i64;
/// The long the helper turns into "ok": 'o' in the low half, 'k' above it
const PLAIN_OPERAND: i64 = 0x006B_006F;

fn ldc_str(value: &str) -> Instruction {
    Instruction::Const(ConstValue::Str(value.to_owned()))
}

fn string_builder_ref(name: &str, descriptor: &str) -> MethodRef {
    MethodRef {
        owner: names::JAVA_LANG_STRING_BUILDER.to_owned(),
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
    }
}

/// The static initializer of an encrypted class: the three marker strings
/// once each, the seed field set, two array allocations, then a poison tail
/// that must never execute
fn victim_clinit(markers: &[&str]) -> MethodModel {
    let mut clinit = MethodModel::new(names::CLINIT, "()V", MethodAccessFlags::STATIC);
    for marker in markers {
        clinit.instructions.push(ldc_str(marker));
        clinit.instructions.push(Instruction::Stack(StackOp::Pop));
    }
    clinit.instructions.extend([
        Instruction::Const(ConstValue::Long(SEED)),
        Instruction::Field(
            FieldAccess::PutStatic,
            FieldRef {
                owner: "victim".to_owned(),
                name: "z".to_owned(),
                descriptor: "J".to_owned(),
            },
        ),
    ]);
    for field in ["a1", "a2"] {
        clinit.instructions.extend([
            Instruction::Const(ConstValue::Int(1)),
            Instruction::Type(TypeOp::ANewArray(names::JAVA_LANG_STRING.to_owned())),
            Instruction::Field(
                FieldAccess::PutStatic,
                FieldRef {
                    owner: "victim".to_owned(),
                    name: field.to_owned(),
                    descriptor: "[Ljava/lang/String;".to_owned(),
                },
            ),
        ]);
    }
    // Anything here would hit the sandbox whitelist and fail the class;
    // reduction must cut it away
    clinit.instructions.extend([
        Instruction::Invoke(
            InvokeKind::Static,
            MethodRef {
                owner: "java/lang/Runtime".to_owned(),
                name: "getRuntime".to_owned(),
                descriptor: "()Ljava/lang/Runtime;".to_owned(),
            },
        ),
        Instruction::Stack(StackOp::Pop),
        Instruction::Return(None),
    ]);
    clinit
}

/// The designated decrypt helper: builds a two-character string out of the
/// low 32 bits of its long argument
fn victim_helper() -> MethodModel {
    let mut helper = MethodModel::new(
        zkm::pattern::DECRYPT_HELPER_NAME,
        zkm::pattern::DECRYPT_HELPER_DESCRIPTOR,
        MethodAccessFlags::STATIC,
    );
    helper.instructions = vec![
        Instruction::Type(TypeOp::New(names::JAVA_LANG_STRING_BUILDER.to_owned())),
        Instruction::Stack(StackOp::Dup),
        Instruction::Invoke(InvokeKind::Special, string_builder_ref(names::INIT, "()V")),
        Instruction::Load(LocalKind::Long, 1),
        Instruction::Convert(ConvOp::L2I),
        Instruction::Convert(ConvOp::I2C),
        Instruction::Invoke(
            InvokeKind::Virtual,
            string_builder_ref("append", "(C)Ljava/lang/StringBuilder;"),
        ),
        Instruction::Load(LocalKind::Long, 1),
        Instruction::Const(ConstValue::Int(16)),
        Instruction::Arith(ArithOp::LUshr),
        Instruction::Convert(ConvOp::L2I),
        Instruction::Convert(ConvOp::I2C),
        Instruction::Invoke(
            InvokeKind::Virtual,
            string_builder_ref("append", "(C)Ljava/lang/StringBuilder;"),
        ),
        Instruction::Invoke(
            InvokeKind::Virtual,
            string_builder_ref("toString", "()Ljava/lang/String;"),
        ),
        Instruction::Return(Some(LocalKind::Ref)),
    ];
    helper
}

/// A method hiding one encrypted string behind a seeded dynamic call site
fn victim_method() -> MethodModel {
    let masked_operand = PLAIN_OPERAND ^ (SEED ^ METHOD_SEED);
    let mut method = MethodModel::new("m", "()V", MethodAccessFlags::STATIC);
    method.instructions = vec![
        Instruction::Field(
            FieldAccess::GetStatic,
            FieldRef {
                owner: "victim".to_owned(),
                name: "z".to_owned(),
                descriptor: "J".to_owned(),
            },
        ),
        Instruction::Const(ConstValue::Long(METHOD_SEED)),
        Instruction::Arith(ArithOp::LXor),
        Instruction::Store(LocalKind::Long, 0),
        Instruction::Const(ConstValue::Int(5)),
        Instruction::Const(ConstValue::Long(masked_operand)),
        Instruction::Load(LocalKind::Long, 0),
        Instruction::Arith(ArithOp::LXor),
        Instruction::InvokeDynamic(DynamicCallSite {
            name: "s".to_owned(),
            descriptor: zkm::DECRYPT_DESCRIPTOR.to_owned(),
            bootstrap: None,
        }),
        Instruction::Stack(StackOp::Pop),
        Instruction::Return(None),
    ];
    method
}

fn victim(markers: &[&str]) -> ClassModel {
    let mut class = ClassModel::new("victim", ClassAccessFlags::SUPER);
    class.add_field(FieldModel::new("z", "J", FieldAccessFlags::STATIC));
    class.add_field(FieldModel::new(
        "a1",
        "[Ljava/lang/String;",
        FieldAccessFlags::STATIC,
    ));
    class.add_field(FieldModel::new(
        "a2",
        "[Ljava/lang/String;",
        FieldAccessFlags::STATIC,
    ));
    class.add_method(victim_method());
    class.add_method(victim_clinit(markers));
    class.add_method(victim_helper());
    class
}

fn bystander() -> ClassModel {
    let mut class = ClassModel::new("bystander", ClassAccessFlags::PUBLIC);
    let mut method = MethodModel::new("greet", "()V", MethodAccessFlags::PUBLIC);
    method.instructions = vec![
        ldc_str("plain text"),
        Instruction::Stack(StackOp::Pop),
        Instruction::Return(None),
    ];
    class.add_method(method);
    class
}

#[test]
fn end_to_end_decrypt_replaces_the_span() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut table = ClassTable::from_classes(vec![
        victim(&zkm::MARKER_STRINGS),
        bystander(),
    ]);

    let summary = StringDecrypt::new()
        .run(&mut table, true)
        .expect("decrypt transform never aborts");
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);

    let class = table.get("victim").unwrap();
    let method = class.method("m", "()V").unwrap();

    // Net change: five instructions out, one constant load in
    assert_eq!(method.instructions.len(), 11 - 4);
    assert_eq!(
        method.instructions[4],
        Instruction::Const(ConstValue::Str("ok".to_owned()))
    );
    assert!(matches!(method.instructions[5], Instruction::Stack(StackOp::Pop)));
    assert_eq!(method.validate_labels(), Ok(()));
}

#[test]
fn untouched_classes_are_structurally_identical() {
    let mut table = ClassTable::from_classes(vec![
        victim(&zkm::MARKER_STRINGS),
        bystander(),
    ]);
    let before = format!("{:?}", table.get("bystander").unwrap());

    StringDecrypt::new().run(&mut table, false).unwrap();

    assert_eq!(format!("{:?}", table.get("bystander").unwrap()), before);
}

#[test]
fn two_or_four_marker_occurrences_yield_zero_sites() {
    for markers in [
        &["DES", "ISO-8859-1"][..],
        &["DES/CBC/PKCS5Padding", "DES", "DES", "ISO-8859-1"][..],
    ] {
        let mut table = ClassTable::from_classes(vec![victim(markers)]);
        let before = format!("{:?}", table.get("victim").unwrap());

        let summary = StringDecrypt::new().run(&mut table, false).unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(format!("{:?}", table.get("victim").unwrap()), before);
    }
}

#[test]
fn missing_helper_fails_the_site_and_leaves_the_method_alone() {
    let mut class = victim(&zkm::MARKER_STRINGS);
    class.methods.retain(|m| m.name != zkm::pattern::DECRYPT_HELPER_NAME);
    let mut table = ClassTable::from_classes(vec![class]);

    let summary = StringDecrypt::new().run(&mut table, false).unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);

    let method = table.get("victim").unwrap().method("m", "()V").unwrap();
    assert_eq!(method.instructions.len(), 11);
    assert!(matches!(method.instructions[8], Instruction::InvokeDynamic(_)));
    assert_eq!(method.validate_labels(), Ok(()));
}

#[test]
fn rerunning_the_transform_finds_nothing_left() {
    let mut table = ClassTable::from_classes(vec![victim(&zkm::MARKER_STRINGS)]);

    let first = StringDecrypt::new().run(&mut table, false).unwrap();
    assert_eq!((first.succeeded, first.failed), (1, 0));
    let after_first = format!("{:?}", table.get("victim").unwrap());

    // The call site is gone, so the scanner has nothing to match; the
    // eligibility check runs again but produces no sites
    let second = StringDecrypt::new().run(&mut table, false).unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!((second.succeeded, second.failed), (0, 0));
    assert_eq!(format!("{:?}", table.get("victim").unwrap()), after_first);
}
