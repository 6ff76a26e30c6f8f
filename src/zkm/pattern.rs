//! Scanner for the string-encryption shapes this obfuscator emits
//!
//! Matching is deliberately rigid. Every rule below - the exact marker
//! count, the exact four-instruction method prefix, the exact backward
//! walk at the call site with no intervening instructions - mirrors the
//! code shape of one known obfuscator configuration. A miss at any
//! position is a detection miss, never an error: unrelated code that
//! happens to share a fragment of the shape must not match.

use crate::jvm::code::{ArithOp, ConstValue, FieldAccess, Instruction, LocalKind};
use crate::jvm::model::{ClassModel, MethodModel};

/// The three cipher-configuration constants that identify an encrypted class
///
/// Eligibility requires their combined occurrence count in the static
/// initializer to be exactly three - one sighting each. Fewer means some
/// other code referenced one of them; more means the class only embeds
/// look-alike strings.
pub const MARKER_STRINGS: [&str; 3] = ["DES/CBC/PKCS5Padding", "DES", "ISO-8859-1"];

/// Descriptor of the dynamic call sites the decryptor hides behind
pub const DECRYPT_DESCRIPTOR: &str = "(IJ)Ljava/lang/String;";

/// Name and descriptor of the helper routine invoked to decrypt one string
pub const DECRYPT_HELPER_NAME: &str = "a";
pub const DECRYPT_HELPER_DESCRIPTOR: &str = DECRYPT_DESCRIPTOR;

/// One recognized decryption call, with everything needed to execute it
///
/// Transient: produced here, consumed once by the decrypt step, then
/// discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptSite {
    /// Index of the owning method in the class's method list
    pub method: usize,
    /// Index of the first instruction of the five-instruction span
    pub span_start: usize,
    /// Static field read by the method prologue
    pub seed_field: String,
    /// Inline constant XORed against the seed field
    pub method_seed: i64,
    /// First operand of the hidden call
    pub int_operand: i32,
    /// Second operand of the hidden call, still XOR-masked
    pub long_operand: i64,
}

/// Scan one class for decryption call sites
///
/// Sites come back in forward instruction order within each method, and
/// methods in declaration order, so repeated runs over the same input
/// produce the same list.
pub fn scan(class: &ClassModel) -> Vec<DecryptSite> {
    if !is_eligible(class) {
        return vec![];
    }

    let mut sites = vec![];
    for (method_index, method) in class.methods.iter().enumerate() {
        let (seed_field, method_seed) = match seeded_prologue(method) {
            Some(seed) => seed,
            None => continue,
        };

        for (index, instruction) in method.instructions.iter().enumerate() {
            let is_decrypt_call = matches!(
                instruction,
                Instruction::InvokeDynamic(site) if site.descriptor == DECRYPT_DESCRIPTOR
            );
            if !is_decrypt_call || index < 4 {
                continue;
            }

            // Walk backward from the call; any intervening instruction, a
            // label included, breaks the match
            if !matches!(method.instructions[index - 1], Instruction::Arith(ArithOp::LXor)) {
                continue;
            }
            if !matches!(method.instructions[index - 2], Instruction::Load(LocalKind::Long, _)) {
                continue;
            }
            let long_operand = match &method.instructions[index - 3] {
                Instruction::Const(ConstValue::Long(value)) => *value,
                _ => continue,
            };
            let int_operand = match &method.instructions[index - 4] {
                Instruction::Const(ConstValue::Int(value)) => *value,
                _ => continue,
            };

            sites.push(DecryptSite {
                method: method_index,
                span_start: index - 4,
                seed_field: seed_field.clone(),
                method_seed,
                int_operand,
                long_operand,
            });
        }
    }
    sites
}

/// Eligibility gate: the static initializer mentions the three marker
/// strings exactly three times in total
fn is_eligible(class: &ClassModel) -> bool {
    let clinit = match class.clinit() {
        Some(clinit) => clinit,
        None => return false,
    };

    let mut occurrences = 0usize;
    for instruction in &clinit.instructions {
        if let Instruction::Const(ConstValue::Str(value)) = instruction {
            if MARKER_STRINGS.iter().any(|marker| marker == value) {
                occurrences += 1;
            }
        }
    }
    occurrences == 3
}

/// Match the seeded method prologue and extract (seed field, inline seed)
///
/// The first four instructions must be exactly: read a static field, push a
/// 64-bit constant, XOR them, store the result in a local.
fn seeded_prologue(method: &MethodModel) -> Option<(String, i64)> {
    if method.instructions.len() < 4 {
        return None;
    }
    let seed_field = match &method.instructions[0] {
        Instruction::Field(FieldAccess::GetStatic, fref) => fref.name.clone(),
        _ => return None,
    };
    let method_seed = match &method.instructions[1] {
        Instruction::Const(ConstValue::Long(value)) => *value,
        _ => return None,
    };
    if !matches!(method.instructions[2], Instruction::Arith(ArithOp::LXor)) {
        return None;
    }
    if !matches!(method.instructions[3], Instruction::Store(LocalKind::Long, _)) {
        return None;
    }
    Some((seed_field, method_seed))
}
