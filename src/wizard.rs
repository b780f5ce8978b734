//! wizard.rs
//!
//! Front ends that turn the pipeline's questions into answers.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use crossterm::style::{style, StyledContent, Stylize};
use tracing::warn;

use crate::question::{Answer, Question};

pub trait Wizard {
    /// One answer per question, in question order.
    fn ask(&mut self, questions: &[Question]) -> Result<Vec<Answer>>;
}

/// Numbered menu on a line-based terminal. Choices are picked by number
/// (from 1) or by their exact label; anything else is asked again.
pub struct TerminalWizard<R, W> {
    input: R,
    output: W,
    styled: bool,
}

impl<R: BufRead, W: Write> TerminalWizard<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, styled: false }
    }

    /// Use terminal styling for prompts.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    fn ask_one(&mut self, question: &Question) -> Result<Answer> {
        let styled = self.styled;
        writeln!(self.output, "{}", emphasis(styled, &question.prompt))?;
        for (i, choice) in question.choices.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, choice.label)?;
        }

        loop {
            write!(self.output, "Your choice? ")?;
            self.output.flush()?;

            let mut line = String::new();
            let read = self.input.read_line(&mut line).context("reading answer")?;
            if read == 0 {
                bail!("input ended before `{}` was answered", question.id);
            }
            let picked = match line.trim().parse::<usize>() {
                Ok(n) if (1..=question.choices.len()).contains(&n) => {
                    Some(Answer::new(question.id, question.choices[n - 1].value.clone()))
                }
                _ => question.answer_by_label(line.trim()),
            };
            match picked {
                Some(answer) => {
                    writeln!(self.output)?;
                    return Ok(answer);
                }
                None => {
                    let hint = format!("Please enter a number from 1 to {}.", question.choices.len());
                    writeln!(self.output, "{}", warning(styled, &hint))?;
                }
            }
        }
    }
}

fn emphasis(styled: bool, text: &str) -> StyledContent<&str> {
    if styled { text.bold() } else { style(text) }
}

fn warning(styled: bool, text: &str) -> StyledContent<&str> {
    if styled { text.yellow() } else { style(text) }
}

impl<R: BufRead, W: Write> Wizard for TerminalWizard<R, W> {
    fn ask(&mut self, questions: &[Question]) -> Result<Vec<Answer>> {
        questions.iter().map(|q| self.ask_one(q)).collect()
    }
}

/// Answers given up front, e.g. on the command line. Questions left open
/// go to `fallback`, or take their first choice when there is none.
pub struct PresetWizard {
    presets: HashMap<String, Answer>,
    fallback: Option<Box<dyn Wizard>>,
}

impl PresetWizard {
    /// Later presets for the same question win.
    pub fn new(presets: impl IntoIterator<Item = Answer>, fallback: Option<Box<dyn Wizard>>) -> Self {
        let presets = presets.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self { presets, fallback }
    }
}

impl Wizard for PresetWizard {
    fn ask(&mut self, questions: &[Question]) -> Result<Vec<Answer>> {
        for id in self.presets.keys() {
            if !questions.iter().any(|q| q.id == id.as_str()) {
                warn!(question = %id, "answer given for a question that is not asked");
            }
        }

        let open: Vec<Question> = questions
            .iter()
            .filter(|q| !self.presets.contains_key(q.id))
            .cloned()
            .collect();
        let mut asked: HashMap<&str, Answer> = HashMap::new();
        if !open.is_empty() {
            let answers = match self.fallback.as_mut() {
                Some(wizard) => wizard.ask(&open)?,
                None => open
                    .iter()
                    .filter_map(|q| q.choices.first().map(|c| Answer::new(q.id, c.value.clone())))
                    .collect(),
            };
            for answer in answers {
                if let Some(q) = open.iter().find(|q| q.id == answer.id) {
                    asked.insert(q.id, answer);
                }
            }
        }

        Ok(questions
            .iter()
            .filter_map(|q| self.presets.get(q.id).cloned().or_else(|| asked.remove(q.id)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{Choice, Value};
    use std::io::Cursor;

    fn questions() -> Vec<Question> {
        vec![
            Question::yes_no("no_panning", "Do you wish to remove original panning?"),
            Question::new(
                "format",
                "Output format?",
                vec![Choice::new("mid", "midi"), Choice::new("csv", "text (csv)")],
            ),
        ]
    }

    #[test]
    fn terminal_asks_until_valid() {
        let input = Cursor::new("abc\n9\n2\n 2 \n");
        let mut out = Vec::new();
        let answers = TerminalWizard::new(input, &mut out).ask(&questions()).unwrap();
        assert_eq!(answers, vec![Answer::new("no_panning", 1), Answer::new("format", "csv")]);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Do you wish to remove original panning?\n1. no\n2. yes\n"));
        assert_eq!(text.matches("Please enter a number from 1 to 2.").count(), 2);
    }

    #[test]
    fn terminal_accepts_a_label() {
        let input = Cursor::new("yes\ntext (csv)\n");
        let answers = TerminalWizard::new(input, Vec::new()).ask(&questions()).unwrap();
        assert_eq!(answers, vec![Answer::new("no_panning", 1), Answer::new("format", "csv")]);
    }

    #[test]
    fn terminal_fails_at_end_of_input() {
        let err = TerminalWizard::new(Cursor::new("1\n"), Vec::new()).ask(&questions()).unwrap_err();
        assert!(err.to_string().contains("`format`"));
    }

    #[test]
    fn presets_with_defaults() {
        let mut wizard = PresetWizard::new([Answer::new("format", "csv")], None);
        let answers = wizard.ask(&questions()).unwrap();
        assert_eq!(answers, vec![Answer::new("no_panning", 0), Answer::new("format", "csv")]);
    }

    #[test]
    fn presets_fall_back_to_the_terminal() {
        let terminal = TerminalWizard::new(Cursor::new("2\n"), Vec::new());
        let mut wizard = PresetWizard::new(
            [Answer::new("no_panning", Value::Nothing), Answer::new("no_panning", 1)],
            Some(Box::new(terminal)),
        );
        let answers = wizard.ask(&questions()).unwrap();
        assert_eq!(answers, vec![Answer::new("no_panning", 1), Answer::new("format", "csv")]);
    }
}
