//! Sequential transform pipeline
//!
//! Transforms run one at a time over the shared [`ClassTable`]. Each one
//! reports per-item counters; a transform that completes reports success
//! even if individual items failed. A configuration failure, an unexpected
//! error, or a panic stops the remainder of the run at the step boundary -
//! table entries committed by earlier transforms stay as they are.

use crate::table::ClassTable;
use std::error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Per-item counters reported by a completed transform
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// Items the transform looked at
    pub processed: usize,
    /// Items changed successfully
    pub succeeded: usize,
    /// Items that individually failed (the transform still completed)
    pub failed: usize,
}

impl StepSummary {
    pub fn new(processed: usize, succeeded: usize, failed: usize) -> StepSummary {
        StepSummary {
            processed,
            succeeded,
            failed,
        }
    }
}

impl fmt::Display for StepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, succeeded {}, failed {}",
            self.processed, self.succeeded, self.failed
        )
    }
}

/// Why a transform aborted
#[derive(Debug)]
pub enum StepError {
    /// A required external resource is missing or invalid
    Config(String),
    /// Anything else that stopped the transform
    Failed(String),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Config(msg) => write!(f, "configuration failure: {}", msg),
            StepError::Failed(msg) => write!(f, "transform failure: {}", msg),
        }
    }
}

impl error::Error for StepError {}

/// One named operation over the class table
pub trait Transform {
    /// Short stable name used in logs
    fn name(&self) -> &'static str;

    /// One-line description of what the transform does
    fn description(&self) -> &'static str;

    /// Run over the table, mutating it in place
    fn run(&mut self, table: &mut ClassTable, verbose: bool) -> Result<StepSummary, StepError>;
}

/// Ordered list of transforms applied to one table
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline { transforms: vec![] }
    }

    pub fn push(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(Box::new(transform));
    }

    /// Run every transform in order; `false` if the run was aborted
    pub fn run(&mut self, table: &mut ClassTable, verbose: bool) -> bool {
        for transform in &mut self.transforms {
            log::info!("Running '{}'", transform.name());

            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| transform.run(table, verbose)));
            match outcome {
                Ok(Ok(summary)) => {
                    log::info!("'{}' finished: {}", transform.name(), summary);
                }
                Ok(Err(error)) => {
                    log::error!("'{}' aborted: {}", transform.name(), error);
                    return false;
                }
                Err(payload) => {
                    log::error!(
                        "'{}' aborted: unexpected failure: {}",
                        transform.name(),
                        panic_message(payload.as_ref())
                    );
                    return false;
                }
            }
        }
        true
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        result: Option<Result<StepSummary, StepError>>,
        ran: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl Transform for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn description(&self) -> &'static str {
            "test transform"
        }

        fn run(&mut self, _table: &mut ClassTable, _verbose: bool) -> Result<StepSummary, StepError> {
            self.ran.set(self.ran.get() + 1);
            self.result.take().expect("run called twice")
        }
    }

    #[test]
    fn failing_step_aborts_the_rest() {
        let ran = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut pipeline = Pipeline::new();
        pipeline.push(Recorder {
            result: Some(Ok(StepSummary::new(1, 1, 0))),
            ran: ran.clone(),
        });
        pipeline.push(Recorder {
            result: Some(Err(StepError::Config("missing mappings".to_owned()))),
            ran: ran.clone(),
        });
        pipeline.push(Recorder {
            result: Some(Ok(StepSummary::default())),
            ran: ran.clone(),
        });

        let mut table = ClassTable::new();
        assert!(!pipeline.run(&mut table, false));
        assert_eq!(ran.get(), 2);
    }

    struct Panicker;

    impl Transform for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }

        fn description(&self) -> &'static str {
            "always panics"
        }

        fn run(&mut self, _table: &mut ClassTable, _verbose: bool) -> Result<StepSummary, StepError> {
            panic!("boom");
        }
    }

    #[test]
    fn panics_are_contained_at_the_step_boundary() {
        let mut pipeline = Pipeline::new();
        pipeline.push(Panicker);
        let mut table = ClassTable::new();
        assert!(!pipeline.run(&mut table, false));
    }
}
