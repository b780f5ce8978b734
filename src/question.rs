//! question.rs
//!
//! Questions the filters ask and the answers that come back.
//!
//! A [`Question`] offers an ordered list of choices; whatever [`Value`] a
//! choice carries is echoed back verbatim in the [`Answer`]. The pipeline
//! only ever sees answers flattened into [`Answers`], a plain id → value map.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// The "leave it alone" choice.
    Nothing,
    Number(i64),
    Text(String),
}

impl Value {
    /// Truthiness: `Nothing`, `0` and `""` are false.
    pub fn is_set(&self) -> bool {
        match self {
            Value::Nothing => false,
            Value::Number(n) => *n != 0,
            Value::Text(s) => !s.is_empty(),
        }
    }
}

/// Form-style parsing: `None` or empty is [`Value::Nothing`], all digits is
/// a number, anything else is text.
impl FromStr for Value {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "None" {
            return Ok(Value::Nothing);
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = s.parse() {
                return Ok(Value::Number(n));
            }
        }
        Ok(Value::Text(s.to_string()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => f.write_str("None"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: Value,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<Value>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into() }
    }

    pub fn nothing(label: impl Into<String>) -> Self {
        Self { value: Value::Nothing, label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: &'static str,
    pub prompt: String,
    pub choices: Vec<Choice>,
}

impl Question {
    pub fn new(id: &'static str, prompt: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self { id, prompt: prompt.into(), choices }
    }

    /// The usual `no` / `yes` pair, valued 0 and 1.
    pub fn yes_no(id: &'static str, prompt: impl Into<String>) -> Self {
        Self::new(id, prompt, vec![Choice::new(0, "no"), Choice::new(1, "yes")])
    }

    /// Answer with the choice carrying `label`, if any.
    pub fn answer_by_label(&self, label: &str) -> Option<Answer> {
        self.choices
            .iter()
            .find(|c| c.label == label)
            .map(|c| Answer::new(self.id, c.value.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Answer {
    pub id: String,
    pub value: Value,
}

impl Answer {
    pub fn new(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { id: id.into(), value: value.into() }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.value)
    }
}

/// Parses `id=value`.
impl FromStr for Answer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected `id=value`, got `{s}`"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("missing question id in `{s}`"));
        }
        let value = value.parse::<Value>().unwrap_or_else(|never| match never {});
        Ok(Answer::new(id, value))
    }
}

/// Flat lookup of answers by question id. Later answers win.
#[derive(Debug, Clone, Default)]
pub struct Answers(HashMap<String, Value>);

impl Answers {
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Answered and truthy.
    pub fn flag(&self, id: &str) -> bool {
        self.get(id).is_some_and(Value::is_set)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'a> FromIterator<&'a Answer> for Answers {
    fn from_iter<I: IntoIterator<Item = &'a Answer>>(iter: I) -> Self {
        Answers(iter.into_iter().map(|a| (a.id.clone(), a.value.clone())).collect())
    }
}

impl FromIterator<Answer> for Answers {
    fn from_iter<I: IntoIterator<Item = Answer>>(iter: I) -> Self {
        Answers(iter.into_iter().map(|a| (a.id, a.value)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_parse_like_form_fields() {
        assert_eq!("None".parse::<Value>().unwrap(), Value::Nothing);
        assert_eq!("".parse::<Value>().unwrap(), Value::Nothing);
        assert_eq!("66".parse::<Value>().unwrap(), Value::Number(66));
        assert_eq!("2-1".parse::<Value>().unwrap(), Value::Text("2-1".into()));
        assert_eq!("mid".parse::<Value>().unwrap(), Value::Text("mid".into()));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nothing.is_set());
        assert!(!Value::Number(0).is_set());
        assert!(Value::Number(2).is_set());
        assert!(!Value::Text(String::new()).is_set());
        assert!(Value::Text("csv".into()).is_set());
    }

    #[test]
    fn answers_flatten_with_last_one_winning() {
        let answers: Answers = vec![
            Answer::new("metronome", 1),
            Answer::new("format", "csv"),
            Answer::new("metronome", 0),
        ]
        .into_iter()
        .collect();
        assert_eq!(answers.len(), 2);
        assert!(!answers.flag("metronome"));
        assert!(answers.flag("format"));
        assert!(!answers.flag("unknown"));
    }

    #[test]
    fn answer_parsing() {
        let a: Answer = "chord_tone=2-1".parse().unwrap();
        assert_eq!(a, Answer::new("chord_tone", "2-1"));
        assert_eq!(a.to_string(), "chord_tone=2-1");
        assert!("chord_tone".parse::<Answer>().is_err());
        assert!("=1".parse::<Answer>().is_err());
    }

    #[test]
    fn answer_by_label_echoes_choice_value() {
        let q = Question::yes_no("no_panning", "Remove panning?");
        assert_eq!(q.answer_by_label("yes"), Some(Answer::new("no_panning", 1)));
        assert_eq!(q.answer_by_label("maybe"), None);
    }
}
