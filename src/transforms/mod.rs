//! Cleanup and diagnostic transforms
//!
//! Everything here is execution-free: renaming from an external table,
//! cosmetic metadata synthesis, signature sanitation, and read-only
//! obfuscation diagnostics. The execution-driven string decryption lives in
//! [`crate::zkm`].

pub mod analysis;
pub mod mappings;
pub mod params;
pub mod remap;
pub mod signatures;

pub use analysis::{analyze, AnalysisReport, AnalysisThresholds, Analyze};
pub use mappings::{MappingsError, RenameTable};
pub use params::GuessParameterNames;
pub use remap::Remap;
pub use signatures::SanitizeSignatures;
