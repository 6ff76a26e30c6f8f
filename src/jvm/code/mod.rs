//! Instruction sequences and labels
//!
//! Method bodies are ordered, mutable sequences of [`Instruction`]s. Control
//! flow refers to [`Label`]s by identity; a label referenced anywhere in a
//! method must also be placed in that method's sequence, before and after
//! every transform (checked by
//! [`MethodModel::validate_labels`](crate::jvm::model::MethodModel::validate_labels)).

mod instruction;
mod label;

pub use instruction::*;
pub use label::*;
