//! Reduction of a class to the members one decrypt routine needs
//!
//! Running a full static initializer against the sandbox would execute
//! unrelated static setup that can fail, loop, or depend on library state
//! the sandbox refuses to provide. The reducer builds a copy that keeps
//! only what the decrypt routine touches, and truncates the initializer
//! at an empirically fixed boundary in this obfuscator's output: the
//! decryption tables are fully published right after the second
//! reference-array allocation.

use crate::jvm::code::{Instruction, TypeOp};
use crate::jvm::model::{ClassModel, MethodModel};
use std::collections::BTreeSet;

/// Build the minimal executable copy of a class
///
/// Retained members: the static initializer and every method declared at or
/// after it, all fields, and every method the initializer invokes on its own
/// class (matched by name and descriptor, one level deep - not transitively).
/// Returns `None` when the class has no static initializer.
pub fn reduce(class: &ClassModel) -> Option<ClassModel> {
    let clinit_index = class.clinit_index()?;

    let mut kept: BTreeSet<usize> = (clinit_index..class.methods.len()).collect();
    for instruction in &class.methods[clinit_index].instructions {
        let mref = match instruction {
            Instruction::Invoke(_, mref) => mref,
            _ => continue,
        };
        if mref.owner != class.name {
            continue;
        }
        for (index, method) in class.methods.iter().enumerate() {
            if method.name == mref.name && method.descriptor == mref.descriptor {
                kept.insert(index);
            }
        }
    }

    let mut reduced = ClassModel {
        name: class.name.clone(),
        super_name: class.super_name.clone(),
        interfaces: vec![],
        access_flags: class.access_flags,
        version: class.version,
        generic_signature: None,
        fields: class.fields.clone(),
        methods: kept
            .into_iter()
            .map(|index| class.methods[index].clone())
            .collect(),
    };

    if let Some(clinit_index) = reduced.clinit_index() {
        truncate_initializer(&mut reduced.methods[clinit_index]);
    }
    Some(reduced)
}

/// Cut the static initializer after the second reference-array allocation
///
/// One instruction past the allocation is kept - the store that publishes
/// the array - then an unconditional return replaces the rest.
fn truncate_initializer(clinit: &mut MethodModel) {
    let mut allocations = 0usize;
    let mut boundary = None;
    for (index, instruction) in clinit.instructions.iter().enumerate() {
        if matches!(instruction, Instruction::Type(TypeOp::ANewArray(_))) {
            if allocations == 1 {
                boundary = Some(index);
                break;
            }
            allocations += 1;
        }
    }

    if let Some(index) = boundary {
        let cut = (index + 2).min(clinit.instructions.len());
        clinit.instructions.truncate(cut);
        clinit.instructions.push(Instruction::Return(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::code::{ConstValue, FieldAccess, FieldRef, InvokeKind, MethodRef};
    use crate::jvm::model::FieldModel;
    use crate::jvm::{names, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

    fn sample_class() -> ClassModel {
        let mut class = ClassModel::new("victim", ClassAccessFlags::SUPER);
        class.add_field(FieldModel::new("z", "J", FieldAccessFlags::STATIC));

        // Declared before the initializer and never invoked by it: dropped
        class.add_method(MethodModel::new("unrelated", "()V", MethodAccessFlags::PUBLIC));

        // Declared before the initializer but invoked by it: kept
        let mut helper = MethodModel::new("fill", "()V", MethodAccessFlags::STATIC);
        helper.instructions = vec![Instruction::Return(None)];
        class.add_method(helper);

        let mut clinit = MethodModel::new(names::CLINIT, "()V", MethodAccessFlags::STATIC);
        clinit.instructions = vec![
            Instruction::Invoke(
                InvokeKind::Static,
                MethodRef {
                    owner: "victim".to_owned(),
                    name: "fill".to_owned(),
                    descriptor: "()V".to_owned(),
                },
            ),
            Instruction::Const(ConstValue::Int(2)),
            Instruction::Type(TypeOp::ANewArray("java/lang/String".to_owned())),
            Instruction::Field(
                FieldAccess::PutStatic,
                FieldRef {
                    owner: "victim".to_owned(),
                    name: "a1".to_owned(),
                    descriptor: "[Ljava/lang/String;".to_owned(),
                },
            ),
            Instruction::Const(ConstValue::Int(3)),
            Instruction::Type(TypeOp::ANewArray("java/lang/String".to_owned())),
            Instruction::Field(
                FieldAccess::PutStatic,
                FieldRef {
                    owner: "victim".to_owned(),
                    name: "a2".to_owned(),
                    descriptor: "[Ljava/lang/String;".to_owned(),
                },
            ),
            // Unrelated static setup past the boundary: discarded
            Instruction::Const(ConstValue::Str("side effect".to_owned())),
            Instruction::Stack(crate::jvm::code::StackOp::Pop),
            Instruction::Return(None),
        ];
        class.add_method(clinit);

        // Declared after the initializer: kept
        class.add_method(MethodModel::new("a", "(IJ)Ljava/lang/String;", MethodAccessFlags::STATIC));
        class
    }

    #[test]
    fn keeps_initializer_tail_fields_and_invoked_helpers() {
        let class = sample_class();
        let reduced = reduce(&class).unwrap();

        let method_names: Vec<&str> = reduced.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(method_names, vec!["fill", names::CLINIT, "a"]);
        assert_eq!(reduced.fields.len(), 1);
        assert!(reduced.interfaces.is_empty());
    }

    #[test]
    fn truncates_after_second_array_allocation() {
        let class = sample_class();
        let reduced = reduce(&class).unwrap();
        let clinit = reduced.clinit().unwrap();

        // Second allocation at index 5, its publishing store at 6, then the
        // inserted return; the side-effecting tail is gone
        assert_eq!(clinit.instructions.len(), 8);
        assert!(matches!(clinit.instructions[6], Instruction::Field(FieldAccess::PutStatic, _)));
        assert!(matches!(clinit.instructions[7], Instruction::Return(None)));
    }

    #[test]
    fn single_allocation_is_left_alone() {
        let mut class = sample_class();
        let clinit_index = class.clinit_index().unwrap();
        // Remove the second allocation and its store
        class.methods[clinit_index].instructions.drain(4..7);
        let before = class.methods[clinit_index].instructions.len();

        let reduced = reduce(&class).unwrap();
        assert_eq!(reduced.clinit().unwrap().instructions.len(), before);
    }

    #[test]
    fn classes_without_initializer_reduce_to_nothing() {
        let class = ClassModel::new("plain", ClassAccessFlags::PUBLIC);
        assert!(reduce(&class).is_none());
    }
}
