//! In-memory model of JVM classes
//!
//! Everything a transform touches lives here: the mutable class model
//! ([`model`]), the instruction alphabet ([`code`]), descriptor parsing
//! ([`FieldType`], [`MethodDescriptor`]), access flags, and the strict
//! generic-signature grammar ([`signature`]).

mod access_flags;
pub mod code;
mod descriptors;
pub mod names;
pub mod model;
pub mod signature;

pub use access_flags::*;
pub use descriptors::*;
