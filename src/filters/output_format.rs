//! output_format.rs

use tracing::debug;

use super::{Filter, FilterError};
use crate::question::{Answers, Choice, Question, Value};
use crate::stream::{CommandStream, ExportFormat};

pub const QUESTION: &str = "format";

/// Records how the result is exported. Leaves the commands alone.
pub struct OutputFormat;

impl Filter for OutputFormat {
    fn name(&self) -> &'static str {
        "output-format"
    }

    fn questions(&self, _stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        Ok(vec![Question::new(
            QUESTION,
            "Output format?",
            vec![
                Choice::new(ExportFormat::Midi.extension(), "midi"),
                Choice::new(ExportFormat::Audio.extension(), "audio (wav)"),
                Choice::new(ExportFormat::Rows.extension(), "text (csv)"),
            ],
        )])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        let format = match answers.get(QUESTION) {
            None | Some(Value::Nothing) => return Ok(()),
            Some(Value::Text(name)) => name
                .parse::<ExportFormat>()
                .map_err(|e| FilterError::malformed(QUESTION, e))?,
            Some(other) => {
                return Err(FilterError::malformed(QUESTION, format!("`{other}` is not a format")));
            }
        };
        debug!(%format, "export format");
        stream.set_export_format(format);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{rows, stream};
    use crate::question::Answer;

    const SONG: &str = "1, 0, Note_on_c, 0, 60, 90\n";

    fn choose(value: &str) -> Answers {
        [Answer::new(QUESTION, value)].into_iter().collect()
    }

    #[test]
    fn first_choice_is_midi() {
        let questions = OutputFormat.questions(&stream(SONG)).unwrap();
        assert_eq!(questions[0].choices[0].value, Value::Text("mid".into()));
        assert_eq!(questions[0].choices.len(), 3);
    }

    #[test]
    fn records_format_only() {
        let mut s = stream(SONG);
        OutputFormat.apply(&mut s, &choose("wav")).unwrap();
        assert_eq!(s.export_format(), ExportFormat::Audio);
        assert_eq!(rows(&s), vec!["1, 0, Note_on_c, 0, 60, 90"]);

        OutputFormat.apply(&mut s, &choose("csv")).unwrap();
        assert_eq!(s.export_format(), ExportFormat::Rows);
    }

    #[test]
    fn unanswered_keeps_default() {
        let mut s = stream(SONG);
        OutputFormat.apply(&mut s, &Answers::default()).unwrap();
        assert_eq!(s.export_format(), ExportFormat::Midi);
    }

    #[test]
    fn unknown_format_fails() {
        let mut s = stream(SONG);
        assert!(matches!(
            OutputFormat.apply(&mut s, &choose("mp4")),
            Err(FilterError::MalformedAnswer { .. })
        ));
    }
}
