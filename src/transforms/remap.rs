//! Bulk symbol renaming from an external rename table
//!
//! Renaming is pure textual substitution over the whole tree: declarations,
//! member references, descriptors, and signatures. There is no reference
//! re-resolution and no collision detection - two old names mapped to the
//! same new name simply collide. Each class is rewritten into a fresh model
//! and replaced in the table wholesale.

use crate::jvm::code::{ConstValue, Instruction, TypeOp};
use crate::jvm::model::{ClassModel, FieldModel, LocalVariable, MethodModel};
use crate::pipeline::{StepError, StepSummary, Transform};
use crate::table::ClassTable;
use crate::transforms::mappings::{self, RenameTable};
use std::path::PathBuf;

/// The remapping transform
///
/// Locates the rename table (`mappings.*` in the working directory unless
/// overridden), and aborts with a configuration failure when the file is
/// missing or malformed - no partial renaming is ever committed.
pub struct Remap {
    pub directory: PathBuf,
}

impl Remap {
    pub fn new() -> Remap {
        Remap {
            directory: PathBuf::from("."),
        }
    }

    pub fn in_directory(directory: impl Into<PathBuf>) -> Remap {
        Remap {
            directory: directory.into(),
        }
    }
}

impl Default for Remap {
    fn default() -> Remap {
        Remap::new()
    }
}

impl Transform for Remap {
    fn name(&self) -> &'static str {
        "remap"
    }

    fn description(&self) -> &'static str {
        "Renames classes, methods, and fields using a provided 'mappings.*' file"
    }

    fn run(&mut self, table: &mut ClassTable, verbose: bool) -> Result<StepSummary, StepError> {
        let path = mappings::locate(&self.directory)
            .map_err(|error| StepError::Config(error.to_string()))?;
        let renames =
            mappings::read(&path).map_err(|error| StepError::Config(error.to_string()))?;
        if verbose {
            log::debug!(
                "Read {} class, {} method, {} field mappings from {}",
                renames.classes.len(),
                renames.methods.len(),
                renames.fields.len(),
                path.display()
            );
        }

        let mut renamer = Renamer {
            renames: &renames,
            applied: 0,
        };
        let mut processed = 0usize;
        for name in table.names() {
            let old = table.remove(&name).expect("snapshotted name");
            let new = renamer.remap_class(&old);
            table.insert(new);
            processed += 1;
        }

        log::info!("Remapped {} names", renamer.applied);
        Ok(StepSummary::new(processed, processed, 0))
    }
}

/// Tree walker carrying the rename table and a count of applied renames
struct Renamer<'t> {
    renames: &'t RenameTable,
    applied: usize,
}

impl<'t> Renamer<'t> {
    fn class_name(&mut self, name: &str) -> String {
        match self.renames.classes.get(name) {
            Some(new) => {
                self.applied += 1;
                new.clone()
            }
            None => name.to_owned(),
        }
    }

    /// Class references in type operands may be array descriptors
    fn class_or_array(&mut self, name: &str) -> String {
        if name.starts_with('[') {
            self.descriptor(name)
        } else {
            self.class_name(name)
        }
    }

    fn method_name(&mut self, name: &str) -> String {
        match self.renames.methods.get(name) {
            Some(new) => {
                self.applied += 1;
                new.clone()
            }
            None => name.to_owned(),
        }
    }

    fn field_name(&mut self, name: &str) -> String {
        match self.renames.fields.get(name) {
            Some(new) => {
                self.applied += 1;
                new.clone()
            }
            None => name.to_owned(),
        }
    }

    /// Substitute class names inside `L...;` segments of a descriptor
    fn descriptor(&mut self, descriptor: &str) -> String {
        let mut out = String::with_capacity(descriptor.len());
        let mut rest = descriptor;
        while let Some(start) = rest.find('L') {
            match rest[start..].find(';') {
                Some(end) => {
                    out.push_str(&rest[..start + 1]);
                    out.push_str(&self.class_name(&rest[start + 1..start + end]));
                    out.push(';');
                    rest = &rest[start + end + 1..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }

    /// Substitute class names inside a generic signature
    ///
    /// Same textual scan as descriptors, except a name segment also ends at
    /// `<` (type arguments) - the remainder is re-scanned.
    fn signature(&mut self, signature: &str) -> String {
        let mut out = String::with_capacity(signature.len());
        let mut rest = signature;
        while let Some(start) = rest.find('L') {
            let tail = &rest[start + 1..];
            let end = tail.find(|c| c == ';' || c == '<');
            match end {
                Some(end) => {
                    out.push_str(&rest[..start + 1]);
                    out.push_str(&self.class_name(&tail[..end]));
                    rest = &tail[end..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }

    fn remap_class(&mut self, class: &ClassModel) -> ClassModel {
        ClassModel {
            name: self.class_name(&class.name),
            super_name: class.super_name.as_deref().map(|name| self.class_name(name)),
            interfaces: class
                .interfaces
                .iter()
                .map(|name| self.class_name(name))
                .collect(),
            access_flags: class.access_flags,
            version: class.version,
            generic_signature: class
                .generic_signature
                .as_deref()
                .map(|signature| self.signature(signature)),
            fields: class.fields.iter().map(|field| self.remap_field(field)).collect(),
            methods: class
                .methods
                .iter()
                .map(|method| self.remap_method(method))
                .collect(),
        }
    }

    fn remap_field(&mut self, field: &FieldModel) -> FieldModel {
        FieldModel {
            name: self.field_name(&field.name),
            descriptor: self.descriptor(&field.descriptor),
            access_flags: field.access_flags,
            generic_signature: field
                .generic_signature
                .as_deref()
                .map(|signature| self.signature(signature)),
            constant_value: field.constant_value.clone(),
        }
    }

    fn remap_method(&mut self, method: &MethodModel) -> MethodModel {
        MethodModel {
            name: self.method_name(&method.name),
            descriptor: self.descriptor(&method.descriptor),
            access_flags: method.access_flags,
            generic_signature: method
                .generic_signature
                .as_deref()
                .map(|signature| self.signature(signature)),
            instructions: method
                .instructions
                .iter()
                .map(|instruction| self.remap_instruction(instruction))
                .collect(),
            local_variables: method.local_variables.as_ref().map(|locals| {
                locals
                    .iter()
                    .map(|local| LocalVariable {
                        name: local.name.clone(),
                        descriptor: self.descriptor(&local.descriptor),
                        generic_signature: local
                            .generic_signature
                            .as_deref()
                            .map(|signature| self.signature(signature)),
                        start: local.start,
                        end: local.end,
                        index: local.index,
                    })
                    .collect()
            }),
            parameters: method.parameters.clone(),
            labels: method.labels.clone(),
        }
    }

    fn remap_instruction(&mut self, instruction: &Instruction) -> Instruction {
        match instruction {
            Instruction::Field(access, fref) => {
                let mut fref = fref.clone();
                fref.owner = self.class_or_array(&fref.owner);
                fref.name = self.field_name(&fref.name);
                fref.descriptor = self.descriptor(&fref.descriptor);
                Instruction::Field(*access, fref)
            }
            Instruction::Invoke(kind, mref) => {
                let mut mref = mref.clone();
                mref.owner = self.class_or_array(&mref.owner);
                mref.name = self.method_name(&mref.name);
                mref.descriptor = self.descriptor(&mref.descriptor);
                Instruction::Invoke(*kind, mref)
            }
            // Dynamic call-site names are deliberately left alone; only the
            // descriptor and bootstrap reference see class renames
            Instruction::InvokeDynamic(site) => {
                let mut site = site.clone();
                site.descriptor = self.descriptor(&site.descriptor);
                site.bootstrap = site.bootstrap.take().map(|mut bootstrap| {
                    bootstrap.owner = self.class_or_array(&bootstrap.owner);
                    bootstrap.descriptor = self.descriptor(&bootstrap.descriptor);
                    bootstrap
                });
                Instruction::InvokeDynamic(site)
            }
            Instruction::Type(op) => Instruction::Type(match op {
                TypeOp::New(name) => TypeOp::New(self.class_or_array(name)),
                TypeOp::ANewArray(name) => TypeOp::ANewArray(self.class_or_array(name)),
                TypeOp::NewArray(base) => TypeOp::NewArray(*base),
                TypeOp::CheckCast(name) => TypeOp::CheckCast(self.class_or_array(name)),
                TypeOp::InstanceOf(name) => TypeOp::InstanceOf(self.class_or_array(name)),
            }),
            Instruction::Const(ConstValue::Class(name)) => {
                Instruction::Const(ConstValue::Class(self.class_or_array(name)))
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::code::{FieldAccess, FieldRef, InvokeKind, MethodRef};
    use crate::jvm::ClassAccessFlags;

    fn renamer_with(renames: &RenameTable) -> Renamer<'_> {
        Renamer { renames, applied: 0 }
    }

    #[test]
    fn descriptor_substitution() {
        let mut renames = RenameTable::default();
        renames.classes.insert("a".to_owned(), "Alpha".to_owned());
        let mut renamer = renamer_with(&renames);
        assert_eq!(renamer.descriptor("(ILa;J)La;"), "(ILAlpha;J)LAlpha;");
        assert_eq!(renamer.descriptor("[[La;"), "[[LAlpha;");
        assert_eq!(renamer.descriptor("(I)V"), "(I)V");
        assert_eq!(renamer.applied, 3);
    }

    #[test]
    fn signature_substitution_stops_at_type_arguments() {
        let mut renames = RenameTable::default();
        renames.classes.insert("a".to_owned(), "Alpha".to_owned());
        let mut renamer = renamer_with(&renames);
        assert_eq!(
            renamer.signature("Ljava/util/List<La;>;"),
            "Ljava/util/List<LAlpha;>;"
        );
    }

    #[test]
    fn call_sites_and_declarations_both_rename() {
        let mut renames = RenameTable::default();
        renames.methods.insert("b".to_owned(), "beta".to_owned());
        let mut renamer = renamer_with(&renames);

        let mut class = ClassModel::new("owner", ClassAccessFlags::PUBLIC);
        let mut caller = MethodModel::new("caller", "()V", crate::jvm::MethodAccessFlags::PUBLIC);
        caller.instructions = vec![
            Instruction::Invoke(
                InvokeKind::Static,
                MethodRef {
                    owner: "elsewhere".to_owned(),
                    name: "b".to_owned(),
                    descriptor: "()V".to_owned(),
                },
            ),
            Instruction::Return(None),
        ];
        class.add_method(caller);
        class.add_method(MethodModel::new("b", "()V", crate::jvm::MethodAccessFlags::PUBLIC));

        let remapped = renamer.remap_class(&class);
        assert_eq!(remapped.methods[1].name, "beta");
        match &remapped.methods[0].instructions[0] {
            Instruction::Invoke(_, mref) => assert_eq!(mref.name, "beta"),
            other => panic!("unexpected instruction {:?}", other),
        }
    }

    #[test]
    fn field_owner_arrays_use_descriptor_form() {
        let mut renames = RenameTable::default();
        renames.classes.insert("a".to_owned(), "Alpha".to_owned());
        let mut renamer = renamer_with(&renames);
        let instruction = Instruction::Field(
            FieldAccess::GetStatic,
            FieldRef {
                owner: "[La;".to_owned(),
                name: "length".to_owned(),
                descriptor: "I".to_owned(),
            },
        );
        match renamer.remap_instruction(&instruction) {
            Instruction::Field(_, fref) => assert_eq!(fref.owner, "[LAlpha;"),
            other => panic!("unexpected instruction {:?}", other),
        }
    }
}
