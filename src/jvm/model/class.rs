use crate::jvm::model::{FieldModel, MethodModel};
use crate::jvm::{names, ClassAccessFlags};

/// Class-file version pair
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

impl ClassVersion {
    pub const JAVA8: ClassVersion = ClassVersion { major: 52, minor: 0 };
    pub const JAVA11: ClassVersion = ClassVersion { major: 55, minor: 0 };
}

impl Default for ClassVersion {
    fn default() -> ClassVersion {
        ClassVersion::JAVA8
    }
}

/// Semantic representation of one class
///
/// Every transform mutates this in place; a transform that needs a different
/// structural shape (the remapper) builds a fresh model and replaces the old
/// one wholesale in the table.
#[derive(Clone, Debug)]
pub struct ClassModel {
    /// Binary name, e.g. `foo/bar/Baz`
    pub name: String,

    /// Binary name of the superclass (`None` only for `java/lang/Object`
    /// and module-info artifacts)
    pub super_name: Option<String>,

    /// Binary names of directly implemented interfaces
    pub interfaces: Vec<String>,

    pub access_flags: ClassAccessFlags,

    pub version: ClassVersion,

    /// Generic class signature
    ///
    /// [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.7.9.1)
    pub generic_signature: Option<String>,

    /// Fields, in declaration order
    pub fields: Vec<FieldModel>,

    /// Methods, in declaration order
    pub methods: Vec<MethodModel>,
}

impl ClassModel {
    /// Create a new class extending `java/lang/Object`
    pub fn new(name: impl Into<String>, access_flags: ClassAccessFlags) -> ClassModel {
        ClassModel {
            name: name.into(),
            super_name: Some(names::JAVA_LANG_OBJECT.to_owned()),
            interfaces: vec![],
            access_flags,
            version: ClassVersion::default(),
            generic_signature: None,
            fields: vec![],
            methods: vec![],
        }
    }

    /// Add a field to the class
    pub fn add_field(&mut self, field: FieldModel) {
        self.fields.push(field);
    }

    /// Add a method to the class
    pub fn add_method(&mut self, method: MethodModel) {
        self.methods.push(method);
    }

    /// Position of the static initializer in the method list
    pub fn clinit_index(&self) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == names::CLINIT)
    }

    /// The static initializer, if the class has one
    pub fn clinit(&self) -> Option<&MethodModel> {
        self.clinit_index().map(|index| &self.methods[index])
    }

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodModel> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::MethodAccessFlags;

    #[test]
    fn clinit_lookup() {
        let mut class = ClassModel::new("a/b/C", ClassAccessFlags::PUBLIC);
        assert!(class.clinit().is_none());

        class.add_method(MethodModel::new("m", "()V", MethodAccessFlags::PUBLIC));
        class.add_method(MethodModel::new(
            names::CLINIT,
            "()V",
            MethodAccessFlags::STATIC,
        ));
        assert_eq!(class.clinit_index(), Some(1));
        assert_eq!(class.clinit().unwrap().name, names::CLINIT);
    }
}
