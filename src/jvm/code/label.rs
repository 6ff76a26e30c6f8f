use std::fmt;

/// Opaque label, compared by identity
///
/// Labels number instruction positions only indirectly: branches and switch
/// entries refer to a label, and the label is itself an entry in the method's
/// instruction sequence. Moving instructions around never invalidates a
/// label, which is what lets transforms splice sequences freely.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Label(usize);

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Generates labels that are fresh within one method
///
/// Cloning does not split the generator source - the cloned generator will
/// produce the same sequence of labels as the original.
#[derive(Clone, Debug, Default)]
pub struct LabelGenerator(usize);

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator(0)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> Label {
        let to_return = Label(self.0);
        self.0 += 1;
        to_return
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let mut generator = LabelGenerator::new();
        let l0 = generator.fresh_label();
        let l1 = generator.fresh_label();
        assert_ne!(l0, l1);
        assert_eq!(l0, l0);
    }
}
