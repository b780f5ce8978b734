//! no_panning.rs
//!
//! Drops the song's pan controllers.

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::{CONTROLLER_PAN, PAN_CENTER};
use crate::question::{Answers, Question};
use crate::stream::CommandStream;

pub const QUESTION: &str = "no_panning";

/// Removes the song's own panning, which would fight the volume changes.
///
/// Only asks when some pan controller is off center.
pub struct NoPanning;

impl NoPanning {
    fn has_panning(stream: &CommandStream) -> Result<bool, FilterError> {
        for cmd in stream.commands() {
            if cmd.is_controller(CONTROLLER_PAN)? && cmd.int_arg(2)? != PAN_CENTER {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Filter for NoPanning {
    fn name(&self) -> &'static str {
        "no-panning"
    }

    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        if !Self::has_panning(stream)? {
            return Ok(Vec::new());
        }
        Ok(vec![Question::yes_no(QUESTION, "Do you wish to remove original panning?")])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        if !answers.flag(QUESTION) {
            return Ok(());
        }
        let mut drop = Vec::new();
        for (i, cmd) in stream.commands().iter().enumerate() {
            if cmd.is_controller(CONTROLLER_PAN)? {
                drop.push(i);
            }
        }
        debug!(removed = drop.len(), "removing pan controllers");
        stream.remove_all(drop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Kind;
    use crate::filters::testing::{rows, stream};
    use crate::question::Answer;

    const PANNED: &str = "\
1, 0, Control_c, 0, 10, 64
1, 0, Control_c, 0, 7, 100
2, 0, Control_c, 1, 10, 20
2, 5, Note_on_c, 1, 60, 90
";

    fn yes() -> Answers {
        [Answer::new(QUESTION, 1)].into_iter().collect()
    }

    #[test]
    fn centered_panning_asks_nothing() {
        let s = stream("1, 0, Control_c, 0, 10, 64\n1, 0, Control_c, 0, 7, 100\n");
        assert!(NoPanning.questions(&s).unwrap().is_empty());
    }

    #[test]
    fn off_center_panning_asks() {
        let s = stream(PANNED);
        let questions = NoPanning.questions(&s).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, QUESTION);
    }

    #[test]
    fn yes_removes_every_pan_controller() {
        let mut s = stream(PANNED);
        NoPanning.apply(&mut s, &yes()).unwrap();
        assert_eq!(rows(&s), vec!["1, 0, Control_c, 0, 7, 100", "2, 5, Note_on_c, 1, 60, 90"]);
        assert!(
            s.commands()
                .iter()
                .all(|c| !(c.kind == Kind::ControlC && c.args[1] == "10"))
        );
    }

    #[test]
    fn centered_pans_go_too_whatever_the_channel() {
        let mut s = stream(
            "\
1, 0, Control_c, 0, 10, 100
1, 0, Control_c, 3, 10, 64
1, 0, Control_c, 3, 11, 64
2, 0, Control_c, 9, 10, 64
2, 0, Control_c, 9, 7, 90
",
        );
        assert_eq!(NoPanning.questions(&s).unwrap().len(), 1);
        NoPanning.apply(&mut s, &yes()).unwrap();
        assert_eq!(rows(&s), vec!["1, 0, Control_c, 3, 11, 64", "2, 0, Control_c, 9, 7, 90"]);
    }

    #[test]
    fn no_keeps_the_stream() {
        let mut s = stream(PANNED);
        let no: Answers = [Answer::new(QUESTION, 0)].into_iter().collect();
        NoPanning.apply(&mut s, &no).unwrap();
        assert_eq!(s.len(), 4);
    }
}
