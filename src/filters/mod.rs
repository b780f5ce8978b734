//! filters
//!
//! The transformation stages. Each stage can look at the stream to decide
//! what to ask, and later rewrite the stream from the answers. Stages run in
//! the fixed order of [`pipeline`]; a stage sees the stream as left by the
//! stages before it.

use crate::command::RowError;
use crate::question::{Answers, Question};
use crate::stream::CommandStream;

mod chords;
mod cleanup;
mod highlight;
mod instruments;
mod metronome;
mod no_panning;
mod output_format;

pub use chords::StripChords;
pub use cleanup::Cleanup;
pub use highlight::HighlightTrack;
pub use instruments::ReplaceInstruments;
pub use metronome::AddMetronome;
pub use no_panning::NoPanning;
pub use output_format::OutputFormat;

#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    /// The song has a shape the stage cannot handle.
    #[error("unsupported {record}: {reason}")]
    Unsupported { record: String, reason: String },
    /// The answer could not have come from the stage's own question.
    #[error("malformed answer to `{question}`: {reason}")]
    MalformedAnswer { question: &'static str, reason: String },
    #[error(transparent)]
    Row(#[from] RowError),
}

impl FilterError {
    pub(crate) fn unsupported(record: impl ToString, reason: impl Into<String>) -> Self {
        FilterError::Unsupported { record: record.to_string(), reason: reason.into() }
    }

    pub(crate) fn malformed(question: &'static str, reason: impl Into<String>) -> Self {
        FilterError::MalformedAnswer { question, reason: reason.into() }
    }
}

pub trait Filter {
    /// Short name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Questions this stage wants answered. Depends on the stream only.
    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError>;

    /// Rewrite the stream. Answers to other stages' questions are ignored.
    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError>;
}

/// All stages, in the order they run.
pub fn pipeline() -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(Cleanup),
        Box::new(NoPanning),
        Box::new(HighlightTrack),
        Box::new(ReplaceInstruments),
        Box::new(StripChords),
        Box::new(AddMetronome),
        Box::new(OutputFormat),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::command::parse_rows;
    use crate::stream::CommandStream;

    pub fn stream(text: &str) -> CommandStream {
        let mut s = CommandStream::new();
        s.load(parse_rows(text).unwrap());
        s
    }

    pub fn rows(stream: &CommandStream) -> Vec<String> {
        stream.commands().iter().map(|c| c.to_line()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order_is_fixed() {
        let names: Vec<_> = pipeline().iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec![
                "cleanup",
                "no-panning",
                "highlight-track",
                "replace-instruments",
                "strip-chords",
                "add-metronome",
                "output-format",
            ]
        );
    }
}
