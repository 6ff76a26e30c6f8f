//! Sanitation of corrupted generic-signature attributes
//!
//! Obfuscated input routinely ships signatures no parser accepts. Each one
//! is checked against the strict grammar in [`crate::jvm::signature`]; a
//! failing attribute is cleared to absent so nothing downstream has to cope
//! with it. Processing never fails - clearing is the point.

use crate::jvm::signature;
use crate::pipeline::{StepError, StepSummary, Transform};
use crate::table::ClassTable;

/// The signature-sanitation transform
#[derive(Default)]
pub struct SanitizeSignatures;

impl SanitizeSignatures {
    pub fn new() -> SanitizeSignatures {
        SanitizeSignatures
    }
}

impl Transform for SanitizeSignatures {
    fn name(&self) -> &'static str {
        "sanitize-signatures"
    }

    fn description(&self) -> &'static str {
        "Clears generic signature attributes that fail strict parsing"
    }

    fn run(&mut self, table: &mut ClassTable, verbose: bool) -> Result<StepSummary, StepError> {
        let mut cleared = 0usize;
        let mut processed = 0usize;

        for class in table.iter_mut() {
            processed += 1;

            clear_if_invalid(
                &mut class.generic_signature,
                signature::validate_class_signature,
                &mut cleared,
            );
            for field in &mut class.fields {
                clear_if_invalid(
                    &mut field.generic_signature,
                    signature::validate_field_signature,
                    &mut cleared,
                );
            }
            for method in &mut class.methods {
                clear_if_invalid(
                    &mut method.generic_signature,
                    signature::validate_method_signature,
                    &mut cleared,
                );
                if let Some(locals) = &mut method.local_variables {
                    for local in locals {
                        clear_if_invalid(
                            &mut local.generic_signature,
                            signature::validate_field_signature,
                            &mut cleared,
                        );
                    }
                }
            }
        }

        if verbose {
            log::debug!("Cleared {} invalid signatures", cleared);
        }
        log::info!("Sanitized signatures in {} classes", processed);
        Ok(StepSummary::new(processed, processed, 0))
    }
}

fn clear_if_invalid(
    slot: &mut Option<String>,
    validate: impl Fn(&str) -> Result<(), signature::SignatureError>,
    cleared: &mut usize,
) {
    if let Some(signature) = slot {
        if validate(signature).is_err() {
            *slot = None;
            *cleared += 1;
        }
    }
}
