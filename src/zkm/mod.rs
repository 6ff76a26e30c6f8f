//! Removal of this obfuscator's string encryption
//!
//! The transform stitches the other two halves together: the [`pattern`]
//! scanner finds the hidden decryption calls, the [`reduce`]r builds a
//! minimal executable copy of the class, and the sandboxed interpreter runs
//! the copy's own decryption routine to recover each constant. Recovered
//! strings are spliced back over the call sites they came from.

pub mod pattern;
pub mod reduce;

pub use pattern::{scan, DecryptSite, DECRYPT_DESCRIPTOR, MARKER_STRINGS};
pub use reduce::reduce;

use crate::interp::{CapabilityScope, ClassResolver, Interpreter, InterpLimits, Value};
use crate::jvm::code::{ConstValue, Instruction};
use crate::pipeline::{StepError, StepSummary, Transform};
use crate::table::ClassTable;
use std::collections::HashMap;

/// The string-decryption removal transform
///
/// Classes are processed one at a time; within a class, every site is
/// decrypted against the same reduced copy before any splice is committed,
/// and the resolver reads the live table so later classes observe earlier
/// classes already transformed.
#[derive(Default)]
pub struct StringDecrypt {
    pub limits: InterpLimits,
}

impl StringDecrypt {
    pub fn new() -> StringDecrypt {
        StringDecrypt {
            limits: InterpLimits::default(),
        }
    }
}

impl Transform for StringDecrypt {
    fn name(&self) -> &'static str {
        "zkm-string-decrypt"
    }

    fn description(&self) -> &'static str {
        "Recovers string constants hidden behind seeded dynamic call sites"
    }

    fn run(&mut self, table: &mut ClassTable, verbose: bool) -> Result<StepSummary, StepError> {
        let mut processed = 0usize;
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for name in table.names() {
            let sites = {
                let class = table.get(&name).expect("snapshotted name");
                pattern::scan(class)
            };
            if sites.is_empty() {
                continue;
            }
            processed += 1;
            if verbose {
                log::debug!("{}: {} decrypt site(s)", name, sites.len());
            }

            let results = decrypt_sites(table, &name, &sites, self.limits);

            let class = table.get_mut(&name).expect("snapshotted name");
            let mut shifts: HashMap<usize, usize> = HashMap::new();
            for (site, result) in sites.iter().zip(results) {
                match result {
                    Some(decrypted) => {
                        let shift = shifts.entry(site.method).or_insert(0);
                        let start = site.span_start - *shift;
                        let method = &mut class.methods[site.method];
                        method.instructions.splice(
                            start..start + 5,
                            [Instruction::Const(ConstValue::Str(decrypted))],
                        );
                        *shift += 4;
                        succeeded += 1;
                    }
                    None => failed += 1,
                }
            }
        }

        log::info!(
            "Successfully decrypted {} strings and failed to decrypt {} strings",
            succeeded,
            failed
        );
        Ok(StepSummary::new(processed, succeeded, failed))
    }
}

/// Run every site of one class through the sandbox
///
/// Returns one entry per site, in order; `None` marks a sandbox failure for
/// that site alone. The span is never touched before its decrypt succeeds,
/// so a failed site leaves a structurally valid method behind.
fn decrypt_sites(
    table: &ClassTable,
    class_name: &str,
    sites: &[DecryptSite],
    limits: InterpLimits,
) -> Vec<Option<String>> {
    let resolver = move |name: &str| table.get(name).cloned();
    let mut interpreter = Interpreter::new(&resolver as &dyn ClassResolver, limits);
    let scope = CapabilityScope::grant();
    let token = scope.token();

    let reduced = match table.get(class_name).and_then(reduce::reduce) {
        Some(reduced) => reduced,
        None => {
            log::error!("{}: no static initializer to reduce", class_name);
            return vec![None; sites.len()];
        }
    };

    if let Err(error) = interpreter.preload(reduced, &token) {
        log::error!("{}: failed to load reduced class into the sandbox: {}", class_name, error);
        return vec![None; sites.len()];
    }

    sites
        .iter()
        .map(|site| match decrypt_one(&mut interpreter, class_name, site, &token) {
            Ok(decrypted) => Some(decrypted),
            Err(error) => {
                log::error!("{}: failed to decrypt string: {}", class_name, error);
                None
            }
        })
        .collect()
}

/// The decrypt invocation contract for one site
///
/// Read the seed field's current runtime value, derive the key with the
/// inline constant, unmask the call's long operand, and hand both operands
/// to the class's designated helper routine.
fn decrypt_one(
    interpreter: &mut Interpreter<'_>,
    class_name: &str,
    site: &DecryptSite,
    token: &crate::interp::CapabilityToken,
) -> Result<String, crate::interp::SandboxError> {
    use crate::interp::SandboxError;

    let seed = match interpreter.read_static(class_name, &site.seed_field, token)? {
        Value::Long(seed) => seed,
        _ => return Err(SandboxError::TypeConfusion("seed field is not a long")),
    };
    let key = seed ^ site.method_seed;
    let long_argument = site.long_operand ^ key;

    let returned = interpreter.invoke_static(
        class_name,
        pattern::DECRYPT_HELPER_NAME,
        pattern::DECRYPT_HELPER_DESCRIPTOR,
        vec![Value::Int(site.int_operand), Value::Long(long_argument)],
        token,
    )?;
    match returned.and_then(|value| value.as_str()) {
        Some(decrypted) => Ok(decrypted),
        None => Err(SandboxError::TypeConfusion(
            "decrypt helper did not return a string",
        )),
    }
}
