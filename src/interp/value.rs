//! Runtime values of the sandboxed interpreter

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable heap object
pub type ObjRef = Rc<RefCell<Obj>>;

/// One operand-stack or local slot value
///
/// Category-2 values (`Long`, `Double`) occupy a single slot here; stack
/// shuffles consult [`Value::is_wide`] to get the JVM accounting right.
#[derive(Clone, Debug)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(ObjRef),
}

impl Value {
    /// Does this value occupy two JVM slots?
    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// Allocate a fresh string object
    pub fn string(s: impl Into<String>) -> Value {
        Value::Ref(new_obj(Obj::Str(s.into())))
    }

    /// Zero value for a field of the given descriptor
    pub fn default_for_descriptor(descriptor: &str) -> Value {
        match descriptor.chars().next() {
            Some('J') => Value::Long(0),
            Some('F') => Value::Float(0.0),
            Some('D') => Value::Double(0.0),
            Some('L') | Some('[') => Value::Null,
            _ => Value::Int(0),
        }
    }

    /// The string payload, if this is a string object
    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::Ref(obj) => match &*obj.borrow() {
                Obj::Str(s) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Wrap an object on the interpreter heap
pub fn new_obj(obj: Obj) -> ObjRef {
    Rc::new(RefCell::new(obj))
}

/// State of a cipher object between `getInstance`, `init`, and `doFinal`
#[derive(Clone, Debug)]
pub struct CipherState {
    pub transformation: String,
    /// `javax.crypto.Cipher` opmode; 2 is `DECRYPT_MODE`
    pub mode: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
}

/// Heap objects the sandbox can represent
///
/// This is the whole universe of the sandbox: strings, the array kinds, a
/// string builder, and the handful of crypto objects the targeted decrypt
/// routines construct. Anything else is refused at the call site.
pub enum Obj {
    Str(String),
    /// UTF-16 code units, as `char[]`
    CharArray(Vec<u16>),
    ByteArray(Vec<i8>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    RefArray {
        element: String,
        values: Vec<Value>,
    },
    Builder(String),
    /// `javax.crypto.spec.DESKeySpec` - raw key material
    KeySpec(Vec<u8>),
    /// `javax.crypto.SecretKeyFactory` for one algorithm
    KeyFactory(String),
    /// Generated secret key material
    SecretKey(Vec<u8>),
    /// `javax.crypto.spec.IvParameterSpec` bytes
    IvSpec(Vec<u8>),
    Cipher(CipherState),
    /// Allocated by `new`, constructor not yet run
    Blank(String),
}

impl Obj {
    /// Class-ish name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::Str(_) => "java/lang/String",
            Obj::CharArray(_) => "[C",
            Obj::ByteArray(_) => "[B",
            Obj::ShortArray(_) => "[S",
            Obj::IntArray(_) => "[I",
            Obj::LongArray(_) => "[J",
            Obj::FloatArray(_) => "[F",
            Obj::DoubleArray(_) => "[D",
            Obj::RefArray { .. } => "[L...;",
            Obj::Builder(_) => "java/lang/StringBuilder",
            Obj::KeySpec(_) => "javax/crypto/spec/DESKeySpec",
            Obj::KeyFactory(_) => "javax/crypto/SecretKeyFactory",
            Obj::SecretKey(_) => "javax/crypto/SecretKey",
            Obj::IvSpec(_) => "javax/crypto/spec/IvParameterSpec",
            Obj::Cipher(_) => "javax/crypto/Cipher",
            Obj::Blank(_) => "uninitialized",
        }
    }

    /// Element count, if this is an array
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Obj::CharArray(values) => Some(values.len()),
            Obj::ByteArray(values) => Some(values.len()),
            Obj::ShortArray(values) => Some(values.len()),
            Obj::IntArray(values) => Some(values.len()),
            Obj::LongArray(values) => Some(values.len()),
            Obj::FloatArray(values) => Some(values.len()),
            Obj::DoubleArray(values) => Some(values.len()),
            Obj::RefArray { values, .. } => Some(values.len()),
            _ => None,
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => write!(f, "Str({:?})", s),
            Obj::Builder(s) => write!(f, "Builder({:?})", s),
            other => f.write_str(other.kind_name()),
        }
    }
}
