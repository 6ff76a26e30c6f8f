use crate::jvm::code::ConstValue;
use crate::jvm::FieldAccessFlags;

/// In-memory representation of a field
#[derive(Clone, Debug)]
pub struct FieldModel {
    pub name: String,

    /// Raw JVM type descriptor, e.g. `J` or `[Ljava/lang/String;`
    pub descriptor: String,

    pub access_flags: FieldAccessFlags,

    /// Generic field signature
    ///
    /// [Format](https://docs.oracle.com/javase/specs/jvms/se11/html/jvms-4.html#jvms-4.7.9.1)
    pub generic_signature: Option<String>,

    /// Constant initial value, for `static final` primitives and strings
    pub constant_value: Option<ConstValue>,
}

impl FieldModel {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access_flags: FieldAccessFlags) -> FieldModel {
        FieldModel {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            generic_signature: None,
            constant_value: None,
        }
    }
}
