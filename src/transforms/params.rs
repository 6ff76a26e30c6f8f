//! Readable parameter and local-variable names for stripped methods
//!
//! Obfuscators drop debug metadata wholesale; decompilers then render
//! `var1`, `var2`, ... everywhere. This pass synthesizes names from the
//! static parameter types for every method that lost its metadata, leaving
//! methods that still have any alone.

use crate::jvm::code::{Instruction, Label};
use crate::jvm::model::{LocalVariable, MethodModel, ParameterMetadata};
use crate::jvm::{names, FieldType, MethodDescriptor, ParseDescriptor, RenderDescriptor};
use crate::pipeline::{StepError, StepSummary, Transform};
use crate::table::ClassTable;
use std::collections::HashMap;

/// The parameter-naming transform
#[derive(Default)]
pub struct GuessParameterNames;

impl GuessParameterNames {
    pub fn new() -> GuessParameterNames {
        GuessParameterNames
    }
}

impl Transform for GuessParameterNames {
    fn name(&self) -> &'static str {
        "guess-parameter-names"
    }

    fn description(&self) -> &'static str {
        "Names method parameters after their types when debug metadata is missing"
    }

    fn run(&mut self, table: &mut ClassTable, _verbose: bool) -> Result<StepSummary, StepError> {
        let mut named = 0usize;
        let mut processed = 0usize;

        for class in table.iter_mut() {
            processed += 1;
            for method in &mut class.methods {
                named += name_parameters(method);
            }
        }

        log::info!("Added {} parameter names", named);
        Ok(StepSummary::new(processed, processed, 0))
    }
}

/// Synthesize names for one method; returns how many parameters got one
pub fn name_parameters(method: &mut MethodModel) -> usize {
    let add_parameters = method
        .parameters
        .as_ref()
        .map_or(true, |parameters| parameters.is_empty());
    let add_locals = method
        .local_variables
        .as_ref()
        .map_or(true, |locals| locals.is_empty());
    if !add_parameters && !add_locals {
        return 0;
    }

    let descriptor = match MethodDescriptor::parse(&method.descriptor) {
        Ok(descriptor) => descriptor,
        Err(_) => return 0,
    };
    if descriptor.parameters.is_empty() {
        return 0;
    }

    // Count type occurrences first: a type that shows up once keeps its bare
    // name, repeated types get a 1-based counter
    let mut type_counts: HashMap<&FieldType, usize> = HashMap::new();
    for parameter in &descriptor.parameters {
        *type_counts.entry(parameter).or_insert(0) += 1;
    }
    let mut type_indices: HashMap<&FieldType, usize> = HashMap::new();

    let start = start_label(method);
    let end = end_label(method);

    let mut index = if method.access_flags.is_static() { 0u16 } else { 1u16 };
    let mut parameters = vec![];
    let mut locals = vec![];
    for parameter in &descriptor.parameters {
        let mut name = derive_name(parameter);
        if type_counts[parameter] > 1 {
            let counter = type_indices.entry(parameter).or_insert(0);
            *counter += 1;
            name.push_str(&counter.to_string());
        }
        if names::is_reserved_identifier(&name) {
            name.insert(0, '_');
        }

        if add_parameters {
            parameters.push(ParameterMetadata {
                name: name.clone(),
                access_flags: 0,
            });
        }
        if add_locals {
            locals.push(LocalVariable {
                name,
                descriptor: parameter.render(),
                generic_signature: None,
                start,
                end,
                index,
            });
        }
        index += 1;
    }

    if add_parameters {
        method.parameters = Some(parameters);
    }
    if add_locals {
        method.local_variables = Some(locals);
    }
    descriptor.parameters.len()
}

/// Readable base name for a parameter type
///
/// Package qualifiers and nested-type markers are stripped, array suffixes
/// become a literal `Array`, and the first letter is lower-cased. The
/// reserved-identifier escape happens after any counter suffix is applied.
fn derive_name(parameter: &FieldType) -> String {
    let raw = parameter.display_name();
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            first.to_lowercase().collect::<String>() + chars.as_str()
        }
        _ => raw,
    }
}

/// Reuse the method's first label, or insert a fresh one at the front
fn start_label(method: &mut MethodModel) -> Label {
    if let Some(Instruction::Label(label)) = method.instructions.first() {
        return *label;
    }
    let label = method.fresh_label();
    method.instructions.insert(0, Instruction::Label(label));
    label
}

/// Reuse the method's last label, or append a fresh one
fn end_label(method: &mut MethodModel) -> Label {
    if let Some(Instruction::Label(label)) = method.instructions.last() {
        return *label;
    }
    let label = method.fresh_label();
    method.instructions.push(Instruction::Label(label));
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::MethodAccessFlags;

    #[test]
    fn two_ints_get_counted_names() {
        let mut method = MethodModel::new("m", "(II)V", MethodAccessFlags::STATIC);
        method.instructions = vec![Instruction::Return(None)];

        assert_eq!(name_parameters(&mut method), 2);
        let parameters = method.parameters.as_ref().unwrap();
        assert_eq!(parameters[0].name, "int1");
        assert_eq!(parameters[1].name, "int2");
        assert_ne!(parameters[0].name, parameters[1].name);
        assert!(!names::is_reserved_identifier(&parameters[0].name));

        let locals = method.local_variables.as_ref().unwrap();
        assert_eq!(locals[0].index, 0);
        assert_eq!(locals[1].index, 1);
        assert_eq!(method.validate_labels(), Ok(()));
    }

    #[test]
    fn single_occurrence_types_stay_bare_but_reserved_names_escape() {
        let mut method = MethodModel::new(
            "m",
            "(ILjava/lang/String;)V",
            MethodAccessFlags::STATIC,
        );
        method.instructions = vec![Instruction::Return(None)];

        name_parameters(&mut method);
        let parameters = method.parameters.as_ref().unwrap();
        assert_eq!(parameters[0].name, "_int");
        assert_eq!(parameters[1].name, "string");
    }

    #[test]
    fn array_types_and_instance_methods() {
        let mut method = MethodModel::new("m", "([[I)V", MethodAccessFlags::PUBLIC);
        method.instructions = vec![Instruction::Return(None)];

        name_parameters(&mut method);
        let locals = method.local_variables.as_ref().unwrap();
        assert_eq!(locals[0].name, "intArrayArray");
        // Slot 0 is the receiver
        assert_eq!(locals[0].index, 1);
    }

    #[test]
    fn existing_metadata_is_left_alone() {
        let mut method = MethodModel::new("m", "(I)V", MethodAccessFlags::STATIC);
        method.instructions = vec![Instruction::Return(None)];
        method.parameters = Some(vec![ParameterMetadata {
            name: "kept".to_owned(),
            access_flags: 0,
        }]);
        let mut with_locals = method.clone();

        // Parameters present, locals missing: locals are still synthesized
        assert_eq!(name_parameters(&mut method), 1);
        assert_eq!(method.parameters.as_ref().unwrap()[0].name, "kept");
        assert!(method.local_variables.is_some());

        // Both present: untouched
        with_locals.local_variables = Some(vec![LocalVariable {
            name: "kept".to_owned(),
            descriptor: "I".to_owned(),
            generic_signature: None,
            start: with_locals.fresh_label(),
            end: with_locals.fresh_label(),
            index: 0,
        }]);
        assert_eq!(name_parameters(&mut with_locals), 0);
    }

    #[test]
    fn boundary_labels_are_reused_when_present() {
        let mut method = MethodModel::new("m", "(I)V", MethodAccessFlags::STATIC);
        let existing = method.fresh_label();
        method.instructions = vec![
            Instruction::Label(existing),
            Instruction::Return(None),
        ];

        name_parameters(&mut method);
        let locals = method.local_variables.as_ref().unwrap();
        assert_eq!(locals[0].start, existing);
        // A fresh end label was appended
        assert!(matches!(
            method.instructions.last(),
            Some(Instruction::Label(label)) if *label == locals[0].end
        ));
        assert_eq!(method.validate_labels(), Ok(()));
    }
}
