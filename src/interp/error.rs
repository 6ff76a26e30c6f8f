use crate::jvm::code::Label;
use std::error;
use std::fmt;

/// Everything that can go wrong while executing untrusted code
///
/// Each variant is a per-site failure: the decrypt pass counts it, logs it,
/// and moves on to the next candidate. Nothing here ever aborts a whole
/// transform.
#[derive(Debug)]
pub enum SandboxError {
    /// The resolver could not supply a class with this name
    MissingClass(String),
    MissingField {
        owner: String,
        name: String,
    },
    MissingMethod {
        owner: String,
        name: String,
        descriptor: String,
    },
    /// Non-public member touched across classes without an active token
    IllegalAccess {
        owner: String,
        member: String,
    },
    /// Call to a library routine outside the whitelist
    ForbiddenCall {
        owner: String,
        name: String,
    },
    /// Field access on a class the sandbox does not materialize
    ForbiddenField {
        owner: String,
        name: String,
    },
    /// Instruction outside the supported subset
    Unsupported(&'static str),
    /// Operand stack or locals held a value of the wrong shape
    TypeConfusion(&'static str),
    StackUnderflow,
    BadLocal(u16),
    UndefinedLabel(Label),
    DuplicateLabel(Label),
    Arithmetic(&'static str),
    IndexOutOfBounds {
        index: i32,
        length: usize,
    },
    NegativeArraySize(i32),
    /// Interpreted code executed `athrow`
    Thrown(String),
    /// The cipher intrinsic rejected its input
    Cipher(String),
    /// The per-invocation deadline elapsed
    DeadlineExpired,
    /// The per-invocation instruction budget ran out
    FuelExhausted,
    CallDepthExceeded,
    /// Static initialization of a class failed
    InitFailure(String, Box<SandboxError>),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::MissingClass(name) => write!(f, "unresolvable class '{}'", name),
            SandboxError::MissingField { owner, name } => {
                write!(f, "no field '{}' on '{}'", name, owner)
            }
            SandboxError::MissingMethod {
                owner,
                name,
                descriptor,
            } => write!(f, "no method '{}{}' on '{}'", name, descriptor, owner),
            SandboxError::IllegalAccess { owner, member } => {
                write!(f, "access to non-public '{}' of '{}' without a capability token", member, owner)
            }
            SandboxError::ForbiddenCall { owner, name } => {
                write!(f, "call to '{}.{}' is not whitelisted", owner, name)
            }
            SandboxError::ForbiddenField { owner, name } => {
                write!(f, "field '{}.{}' is outside the sandbox", owner, name)
            }
            SandboxError::Unsupported(what) => write!(f, "unsupported operation: {}", what),
            SandboxError::TypeConfusion(what) => write!(f, "type confusion: {}", what),
            SandboxError::StackUnderflow => f.write_str("operand stack underflow"),
            SandboxError::BadLocal(index) => write!(f, "read of unset local {}", index),
            SandboxError::UndefinedLabel(label) => write!(f, "jump to unplaced label {:?}", label),
            SandboxError::DuplicateLabel(label) => write!(f, "label {:?} placed twice", label),
            SandboxError::Arithmetic(what) => write!(f, "arithmetic fault: {}", what),
            SandboxError::IndexOutOfBounds { index, length } => {
                write!(f, "array index {} out of bounds for length {}", index, length)
            }
            SandboxError::NegativeArraySize(size) => write!(f, "negative array size {}", size),
            SandboxError::Thrown(what) => write!(f, "interpreted code threw {}", what),
            SandboxError::Cipher(what) => write!(f, "cipher failure: {}", what),
            SandboxError::DeadlineExpired => f.write_str("invocation deadline elapsed"),
            SandboxError::FuelExhausted => f.write_str("instruction budget exhausted"),
            SandboxError::CallDepthExceeded => f.write_str("call depth limit exceeded"),
            SandboxError::InitFailure(class, cause) => {
                write!(f, "static initialization of '{}' failed: {}", class, cause)
            }
        }
    }
}

impl error::Error for SandboxError {}
