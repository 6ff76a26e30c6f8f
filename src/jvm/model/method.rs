use crate::jvm::code::{Instruction, Label, LabelGenerator};
use crate::jvm::MethodAccessFlags;
use std::collections::HashSet;

/// Debug metadata for one local variable
#[derive(Clone, Debug)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub generic_signature: Option<String>,
    /// First instruction (inclusive) the variable is live at
    pub start: Label,
    /// Last instruction (exclusive) the variable is live at
    pub end: Label,
    pub index: u16,
}

/// Declared parameter metadata (the `MethodParameters` attribute)
#[derive(Clone, Debug)]
pub struct ParameterMetadata {
    pub name: String,
    pub access_flags: u16,
}

/// In-memory representation of a method
///
/// The instruction sequence is the unit every transform works on: scanned by
/// the pattern matcher, truncated by the reducer, spliced by the decrypt
/// step, rewritten by the remapper.
#[derive(Clone, Debug)]
pub struct MethodModel {
    pub name: String,

    /// Raw JVM method descriptor, e.g. `(IJ)Ljava/lang/String;`
    pub descriptor: String,

    pub access_flags: MethodAccessFlags,

    /// Generic method signature
    ///
    /// [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.7.9.1)
    pub generic_signature: Option<String>,

    /// Ordered, mutable instruction sequence (empty for abstract methods)
    pub instructions: Vec<Instruction>,

    /// Local-variable debug table, if the class carried one
    pub local_variables: Option<Vec<LocalVariable>>,

    /// Declared parameter metadata, if the class carried it
    pub parameters: Option<Vec<ParameterMetadata>>,

    /// Source of labels that are fresh within this method
    pub labels: LabelGenerator,
}

impl MethodModel {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access_flags: MethodAccessFlags,
    ) -> MethodModel {
        MethodModel {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            generic_signature: None,
            instructions: vec![],
            local_variables: None,
            parameters: None,
            labels: LabelGenerator::new(),
        }
    }

    /// Mint a label no other instruction in this method uses
    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Check that every referenced label is placed in this method
    ///
    /// Covers branch targets, switch entries, and local-variable spans.
    /// Returns the first dangling label found.
    pub fn validate_labels(&self) -> Result<(), Label> {
        let placed: HashSet<Label> = self
            .instructions
            .iter()
            .filter_map(Instruction::placed_label)
            .collect();

        let mut dangling = None;
        for instruction in &self.instructions {
            instruction.for_each_target(|label| {
                if dangling.is_none() && !placed.contains(&label) {
                    dangling = Some(label);
                }
            });
        }
        if let Some(locals) = &self.local_variables {
            for local in locals {
                for label in [local.start, local.end] {
                    if dangling.is_none() && !placed.contains(&label) {
                        dangling = Some(label);
                    }
                }
            }
        }
        match dangling {
            None => Ok(()),
            Some(label) => Err(label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::code::{BranchOp, Instruction};

    #[test]
    fn validate_labels_finds_dangling_targets() {
        let mut method = MethodModel::new("m", "()V", MethodAccessFlags::STATIC);
        let placed = method.fresh_label();
        let dangling = method.fresh_label();
        method.instructions = vec![
            Instruction::Label(placed),
            Instruction::Branch(BranchOp::Goto(placed)),
            Instruction::Return(None),
        ];
        assert_eq!(method.validate_labels(), Ok(()));

        method
            .instructions
            .insert(1, Instruction::Branch(BranchOp::Goto(dangling)));
        assert_eq!(method.validate_labels(), Err(dangling));
    }
}
