//! chords.rs
//!
//! Chord reduction: one note left wherever a track plays several at once.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::Kind;
use crate::question::{Answers, Choice, Question, Value};
use crate::stream::CommandStream;

pub const QUESTION: &str = "chord_tone";

/// Position → ascending distinct notes starting there, chords only.
type Chords = BTreeMap<u32, Vec<u32>>;

/// Reduces the chords of one track to a single note, e.g. only the lowest
/// for a bass part.
///
/// Chords are found purely by onset position. A low note that starts while a
/// higher note of an earlier chord is still sounding is not taken into
/// account.
pub struct StripChords;

impl StripChords {
    /// Chords per track; tracks without chords are left out.
    pub fn find_chords(stream: &CommandStream) -> Result<BTreeMap<u32, Chords>, FilterError> {
        let mut onsets: BTreeMap<u32, Chords> = BTreeMap::new();
        for cmd in stream.commands().iter().filter(|c| c.kind == Kind::NoteOnC) {
            onsets
                .entry(cmd.track)
                .or_default()
                .entry(cmd.position)
                .or_default()
                .push(cmd.int_arg(1)?);
        }

        let mut chords = BTreeMap::new();
        for (track, by_position) in onsets {
            let track_chords: Chords = by_position
                .into_iter()
                .filter_map(|(position, mut notes)| {
                    notes.sort_unstable();
                    notes.dedup();
                    (notes.len() > 1).then_some((position, notes))
                })
                .collect();
            if !track_chords.is_empty() {
                chords.insert(track, track_chords);
            }
        }
        Ok(chords)
    }

    /// Largest chord per track, ascending by track.
    pub fn max_chord_sizes(stream: &CommandStream) -> Result<Vec<(u32, usize)>, FilterError> {
        Ok(Self::find_chords(stream)?
            .into_iter()
            .map(|(track, chords)| (track, chords.values().map(Vec::len).max().unwrap_or(0)))
            .collect())
    }

    fn parse_choice(value: &Value) -> Result<(u32, usize), FilterError> {
        let Value::Text(text) = value else {
            return Err(FilterError::malformed(QUESTION, format!("`{value}` is not `track-rank`")));
        };
        text.split_once('-')
            .and_then(|(track, rank)| Some((track.parse().ok()?, rank.parse().ok()?)))
            .ok_or_else(|| FilterError::malformed(QUESTION, format!("`{text}` is not `track-rank`")))
    }
}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

impl Filter for StripChords {
    fn name(&self) -> &'static str {
        "strip-chords"
    }

    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        let sizes = Self::max_chord_sizes(stream)?;
        if sizes.is_empty() {
            return Ok(Vec::new());
        }

        let mut choices = vec![Choice::nothing("no nothing")];
        for (track, size) in sizes {
            let title = stream.track_label(track);
            for rank in 0..size {
                choices.push(Choice::new(
                    format!("{track}-{rank}"),
                    format!("Reduce chords in {title} to the {} lowest note", ordinal(rank + 1)),
                ));
            }
        }
        Ok(vec![Question::new(QUESTION, "Do you wish to turn chords into a single note?", choices)])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        let value = match answers.get(QUESTION) {
            None | Some(Value::Nothing) => return Ok(()),
            Some(value) => value,
        };
        let (track, rank) = Self::parse_choice(value)?;

        let chords = Self::find_chords(stream)?
            .remove(&track)
            .ok_or_else(|| FilterError::malformed(QUESTION, format!("track {track} has no chords")))?;
        // The note each chord keeps; None when the chord is too small.
        let kept: BTreeMap<u32, Option<u32>> = chords
            .into_iter()
            .map(|(position, notes)| (position, notes.get(rank).copied()))
            .collect();

        let mut drop = Vec::new();
        let mut enabled = HashSet::new();
        for (i, cmd) in stream.commands().iter().enumerate() {
            if cmd.track != track {
                continue;
            }
            match cmd.kind {
                Kind::NoteOnC => {
                    let note = cmd.int_arg(1)?;
                    match kept.get(&cmd.position) {
                        Some(keep) if *keep != Some(note) => drop.push(i),
                        _ => {
                            enabled.insert(note);
                        }
                    }
                }
                Kind::NoteOffC => {
                    let note = cmd.int_arg(1)?;
                    if !enabled.remove(&note) {
                        drop.push(i);
                    }
                }
                _ => {}
            }
        }

        debug!(track, rank, dropped = drop.len(), "stripping chords");
        stream.remove_all(drop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{rows, stream};
    use crate::question::Answer;

    const SONG: &str = "\
1, 0, Start_track
1, 0, Title_t, \"Choir\"
1, 0, Note_on_c, 0, 64, 80
1, 0, Note_on_c, 0, 60, 80
1, 0, Note_on_c, 0, 67, 80
1, 96, Note_off_c, 0, 60, 0
1, 96, Note_off_c, 0, 64, 0
1, 96, Note_off_c, 0, 67, 0
1, 96, Note_on_c, 0, 62, 80
1, 96, Note_on_c, 0, 65, 80
1, 192, Note_off_c, 0, 62, 0
1, 192, Note_off_c, 0, 65, 0
1, 192, Note_on_c, 0, 59, 80
1, 288, Note_off_c, 0, 59, 0
1, 288, End_track
2, 0, Start_track
2, 0, Note_on_c, 1, 40, 80
2, 96, Note_off_c, 1, 40, 0
2, 96, End_track
";

    fn choose(value: &str) -> Answers {
        [Answer::new(QUESTION, value)].into_iter().collect()
    }

    fn note_ons_at(stream: &CommandStream, track: u32, position: u32) -> Vec<String> {
        stream
            .commands()
            .iter()
            .filter(|c| c.track == track && c.position == position && c.kind == Kind::NoteOnC)
            .map(|c| c.args[1].clone())
            .collect()
    }

    #[test]
    fn finds_chords_by_onset_position() {
        let s = stream(SONG);
        let chords = StripChords::find_chords(&s).unwrap();
        assert_eq!(chords.len(), 1);
        assert_eq!(chords[&1][&0], vec![60, 64, 67]);
        assert_eq!(chords[&1][&96], vec![62, 65]);
        assert!(!chords[&1].contains_key(&192));
        assert_eq!(StripChords::max_chord_sizes(&s).unwrap(), vec![(1, 3)]);
    }

    #[test]
    fn one_choice_per_rank() {
        let s = stream(SONG);
        let questions = StripChords.questions(&s).unwrap();
        let q = &questions[0];
        let labels: Vec<_> = q.choices.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "no nothing",
                "Reduce chords in \"Choir\" to the 1st lowest note",
                "Reduce chords in \"Choir\" to the 2nd lowest note",
                "Reduce chords in \"Choir\" to the 3rd lowest note",
            ]
        );
        assert_eq!(q.choices[2].value, Value::Text("1-1".into()));
    }

    #[test]
    fn no_chords_no_question() {
        let s = stream("2, 0, Note_on_c, 1, 40, 80\n2, 96, Note_off_c, 1, 40, 0\n");
        assert!(StripChords.questions(&s).unwrap().is_empty());
    }

    #[test]
    fn keeps_lowest_note() {
        let mut s = stream(SONG);
        StripChords.apply(&mut s, &choose("1-0")).unwrap();
        assert_eq!(
            rows(&s)[..10],
            [
                "1, 0, Start_track",
                "1, 0, Title_t, \"Choir\"",
                "1, 0, Note_on_c, 0, 60, 80",
                "1, 96, Note_off_c, 0, 60, 0",
                "1, 96, Note_on_c, 0, 62, 80",
                "1, 192, Note_off_c, 0, 62, 0",
                "1, 192, Note_on_c, 0, 59, 80",
                "1, 288, Note_off_c, 0, 59, 0",
                "1, 288, End_track",
                "2, 0, Start_track",
            ]
        );
        // Other tracks are untouched.
        assert_eq!(s.len(), 13);
    }

    #[test]
    fn each_rank_leaves_at_most_that_note() {
        for rank in 0..4 {
            let original = stream(SONG);
            let chords = StripChords::find_chords(&original).unwrap().remove(&1).unwrap();
            let mut s = stream(SONG);
            StripChords.apply(&mut s, &choose(&format!("1-{rank}"))).unwrap();
            for (position, notes) in chords {
                let expected: Vec<String> = notes.get(rank).map(|n| n.to_string()).into_iter().collect();
                assert_eq!(note_ons_at(&s, 1, position), expected, "rank {rank} at {position}");
            }
        }
    }

    #[test]
    fn bad_choices_fail() {
        let mut s = stream(SONG);
        assert!(matches!(
            StripChords.apply(&mut s, &choose("2-0")),
            Err(FilterError::MalformedAnswer { .. })
        ));
        assert!(matches!(
            StripChords.apply(&mut s, &choose("bass")),
            Err(FilterError::MalformedAnswer { .. })
        ));
        let numeric: Answers = [Answer::new(QUESTION, 3)].into_iter().collect();
        assert!(StripChords.apply(&mut s, &numeric).is_err());
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(22), "22nd");
    }
}
