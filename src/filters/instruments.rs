//! instruments.rs

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::Kind;
use crate::question::{Answers, Choice, Question, Value};
use crate::stream::CommandStream;

pub const QUESTION: &str = "instrument";

/// General MIDI presets offered, numbered 1..=128 as printed in the GM table.
const PRESETS: &[(u32, &str)] = &[(1, "Piano"), (53, "Choir Aahs"), (66, "Alt Sax")];

/// Swaps every program change for one instrument.
pub struct ReplaceInstruments;

impl Filter for ReplaceInstruments {
    fn name(&self) -> &'static str {
        "replace-instruments"
    }

    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        if !stream.commands().iter().any(|c| c.kind == Kind::ProgramC) {
            return Ok(Vec::new());
        }
        let mut choices = vec![Choice::new(0, "no")];
        choices.extend(PRESETS.iter().map(|&(program, name)| Choice::new(program, name)));
        Ok(vec![Question::new(
            QUESTION,
            "Do you wish to replace instruments? (MIDI instruments 1(piano)..128(gunshot))",
            choices,
        )])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        let program = match answers.get(QUESTION) {
            None | Some(Value::Nothing) | Some(Value::Number(0)) => return Ok(()),
            Some(Value::Number(n @ 1..=128)) => (n - 1).to_string(),
            Some(other) => {
                return Err(FilterError::malformed(QUESTION, format!("`{other}` is not an instrument 1..128")));
            }
        };

        let mut replaced = 0usize;
        for cmd in stream.commands_mut().iter_mut().filter(|c| c.kind == Kind::ProgramC) {
            cmd.args = vec![cmd.arg(0)?.to_string(), program.clone()];
            replaced += 1;
        }
        debug!(replaced, program = %program, "replacing instruments");
        Ok(())
    }
}
