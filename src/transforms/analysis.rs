//! Read-only obfuscation diagnostics
//!
//! Six corpus-wide ratios, each against a named threshold. The thresholds
//! are empirically tuned constants for unobfuscated code; exceeding one is
//! a hint, not a verdict. Purely informational - the table is never
//! mutated.

use crate::jvm::code::{ConstValue, Instruction};
use crate::pipeline::{StepError, StepSummary, Transform};
use crate::table::ClassTable;

/// Thresholds the measured ratios are compared against
///
/// All overridable; the defaults describe typical compiler output.
#[derive(Copy, Clone, Debug)]
pub struct AnalysisThresholds {
    /// Jump instructions as a percentage of reference instructions
    pub jump_ratio_pct: f64,
    /// Dynamic call sites per method
    pub invoke_dynamic_avg: f64,
    /// Rare stack operations per method
    pub rare_stack_avg: f64,
    /// Average per-string character standard deviation
    pub string_sdev: f64,
    /// Percentage of high-code-point strings
    pub high_codepoint_pct: f64,
    /// No-ops per method
    pub nop_avg: f64,
}

impl Default for AnalysisThresholds {
    fn default() -> AnalysisThresholds {
        AnalysisThresholds {
            jump_ratio_pct: 11.0,
            invoke_dynamic_avg: 0.4,
            rare_stack_avg: 0.1,
            string_sdev: 40.0,
            high_codepoint_pct: 1.0,
            nop_avg: 0.1,
        }
    }
}

/// Measured ratios and the obfuscation categories they point at
///
/// A measure over an empty population is NaN and never raises a flag.
#[derive(Copy, Clone, Debug, Default)]
pub struct AnalysisReport {
    pub jump_ratio_pct: f64,
    pub invoke_dynamic_avg: f64,
    pub rare_stack_avg: f64,
    pub string_sdev: f64,
    pub high_codepoint_pct: f64,
    pub nop_avg: f64,
    pub likely_flow_obfuscation: bool,
    pub likely_reference_obfuscation: bool,
    pub likely_string_obfuscation: bool,
}

/// Compute the report over the whole table
pub fn analyze(table: &ClassTable, thresholds: &AnalysisThresholds) -> AnalysisReport {
    let mut jump_ratios = vec![];
    let mut invoke_dynamic_counts = vec![];
    let mut rare_stack_counts = vec![];
    let mut nop_counts = vec![];
    let mut string_sdevs = vec![];
    let mut high_codepoint_flags = vec![];

    for class in table.iter() {
        for method in &class.methods {
            let mut jumps = 0usize;
            let mut references = 0usize;
            let mut invoke_dynamics = 0usize;
            let mut rare_stack = 0usize;
            let mut nops = 0usize;

            for instruction in &method.instructions {
                if instruction.is_jump() {
                    jumps += 1;
                }
                if instruction.is_reference() {
                    references += 1;
                }
                if instruction.is_rare_stack_op() {
                    rare_stack += 1;
                }
                match instruction {
                    Instruction::InvokeDynamic(_) => invoke_dynamics += 1,
                    Instruction::Nop => nops += 1,
                    Instruction::Const(ConstValue::Str(value)) if value.chars().count() > 2 => {
                        string_sdevs.push(char_sdev(value));
                        high_codepoint_flags.push(is_high_codepoint(value));
                    }
                    _ => (),
                }
            }

            // A method without reference instructions has no meaningful
            // jump proportion
            if references > 0 {
                jump_ratios.push(jumps as f64 / references as f64);
            }
            invoke_dynamic_counts.push(invoke_dynamics as f64);
            rare_stack_counts.push(rare_stack as f64);
            nop_counts.push(nops as f64);
        }
    }

    let jump_ratio_pct = mean(&jump_ratios) * 100.0;
    let invoke_dynamic_avg = mean(&invoke_dynamic_counts);
    let rare_stack_avg = mean(&rare_stack_counts);
    let string_sdev = mean(&string_sdevs);
    let high_codepoint_pct = mean(
        &high_codepoint_flags
            .iter()
            .map(|flag| *flag as u8 as f64)
            .collect::<Vec<f64>>(),
    ) * 100.0;
    let nop_avg = mean(&nop_counts);

    AnalysisReport {
        jump_ratio_pct,
        invoke_dynamic_avg,
        rare_stack_avg,
        string_sdev,
        high_codepoint_pct,
        nop_avg,
        likely_flow_obfuscation: jump_ratio_pct > thresholds.jump_ratio_pct
            || rare_stack_avg > thresholds.rare_stack_avg,
        likely_reference_obfuscation: invoke_dynamic_avg > thresholds.invoke_dynamic_avg,
        likely_string_obfuscation: string_sdev > thresholds.string_sdev
            || high_codepoint_pct > thresholds.high_codepoint_pct,
    }
}

/// The diagnostics transform: computes the report and logs it
#[derive(Default)]
pub struct Analyze {
    pub thresholds: AnalysisThresholds,
    /// Report of the last run
    pub report: Option<AnalysisReport>,
}

impl Analyze {
    pub fn new() -> Analyze {
        Analyze::default()
    }
}

impl Transform for Analyze {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn description(&self) -> &'static str {
        "Reports instruction-level indicators of flow, reference, and string obfuscation"
    }

    fn run(&mut self, table: &mut ClassTable, _verbose: bool) -> Result<StepSummary, StepError> {
        let report = analyze(table, &self.thresholds);

        log::debug!(
            "Jumps in proportion to references: {:.2}% (threshold {}%)",
            report.jump_ratio_pct,
            self.thresholds.jump_ratio_pct
        );
        log::debug!(
            "Average dynamic call sites per method: {:.2} (threshold {})",
            report.invoke_dynamic_avg,
            self.thresholds.invoke_dynamic_avg
        );
        log::debug!(
            "Average rare stack operations per method: {:.2} (threshold {})",
            report.rare_stack_avg,
            self.thresholds.rare_stack_avg
        );
        log::debug!(
            "Average string character deviation: {:.2} (threshold {})",
            report.string_sdev,
            self.thresholds.string_sdev
        );
        log::debug!(
            "High code-point strings: {:.2}% (threshold {}%)",
            report.high_codepoint_pct,
            self.thresholds.high_codepoint_pct
        );
        log::debug!(
            "Average no-ops per method: {:.2} (threshold {})",
            report.nop_avg,
            self.thresholds.nop_avg
        );
        if report.likely_flow_obfuscation {
            log::info!("Indicators of flow obfuscation are present");
        }
        if report.likely_reference_obfuscation {
            log::info!("Indicators of reference obfuscation are present");
        }
        if report.likely_string_obfuscation {
            log::info!("Indicators of string obfuscation are present");
        }

        let processed = table.len();
        self.report = Some(report);
        Ok(StepSummary::new(processed, processed, 0))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation of the character values of a string
fn char_sdev(value: &str) -> f64 {
    let codes: Vec<f64> = value.chars().map(|c| c as u32 as f64).collect();
    let mean = codes.iter().sum::<f64>() / codes.len() as f64;
    let variance = codes
        .iter()
        .map(|code| (code - mean) * (code - mean))
        .sum::<f64>()
        / codes.len() as f64;
    variance.sqrt()
}

/// More than half the characters above U+00FF
fn is_high_codepoint(value: &str) -> bool {
    let total = value.chars().count();
    let high = value.chars().filter(|c| (*c as u32) > 0xFF).count();
    high * 2 > total
}
