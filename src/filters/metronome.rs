//! metronome.rs
//!
//! Adds a click track.
//!
//! ### Time signatures in a song
//! A `Time_signature` row carries four numbers: `nn, dd, cc, bb`.
//! - `nn` / `2^dd` is the signature as notated (`6, 3` is 6/8).
//! - `cc` is the number of MIDI clocks in a metronome click.
//! - `bb` is the number of notated 32nd notes in a quarter note; only the
//!   usual 8 is supported.
//!
//! With the Header's ticks-per-quarter `q`, a bar lasts `32 / 2^dd * nn`
//! 32nd notes, that is `4 * nn * q / 2^dd` ticks. Songs without a time
//! signature are 4/4.

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::{Command, Kind};
use crate::question::{Answers, Choice, Question, Value};
use crate::stream::CommandStream;

pub const QUESTION: &str = "metronome";

/// Drum channel (channel 10 counted from one).
const CHANNEL: &str = "9";
/// Closed hi-hat.
const CLICK_NOTE: &str = "42";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
    pub clocks_per_bar: u32,
}

impl TimeSignature {
    pub fn new(
        numerator: u32,
        denominator: u32,
        clocks_per_quarter: u32,
    ) -> Result<Self, FilterError> {
        let record = format!("time signature {numerator}/{denominator}");
        if numerator == 0 || denominator == 0 {
            return Err(FilterError::unsupported(record, "empty bar"));
        }
        let (num, den) = (u64::from(numerator), u64::from(denominator));
        let ticks = 4 * num * u64::from(clocks_per_quarter);
        if ticks % den != 0 || (ticks / den) % num != 0 {
            return Err(FilterError::unsupported(
                record,
                format!("{clocks_per_quarter} ticks per quarter do not divide into beats"),
            ));
        }
        let clocks_per_bar = u32::try_from(ticks / den)
            .map_err(|_| FilterError::unsupported(record, "bar is longer than the song can be"))?;
        Ok(Self { numerator, denominator, clocks_per_bar })
    }

    /// Accent velocity of every beat in a bar.
    pub fn velocities(&self) -> Result<&'static [u32], FilterError> {
        Ok(match (self.numerator, self.denominator) {
            (2, 2) => &[127, 100],
            (3, 4) => &[127, 80, 80],
            (2, 4) => &[127, 127],
            (4, 4) => &[127, 80, 100, 80],
            (6, 8) | (6, 4) => &[127, 80, 80, 127, 80, 80],
            (n, d) => {
                return Err(FilterError::unsupported(
                    format!("time signature {n}/{d}"),
                    "no metronome pattern",
                ));
            }
        })
    }

    /// `(offset in bar, velocity)` of each beat.
    pub fn clicks(&self) -> Result<Vec<(u32, u32)>, FilterError> {
        let beat = self.beat_length();
        Ok(self
            .velocities()?
            .iter()
            .enumerate()
            .map(|(i, &velocity)| (i as u32 * beat, velocity))
            .collect())
    }

    pub fn beat_length(&self) -> u32 {
        self.clocks_per_bar / self.numerator
    }

    /// Read the song's time signature.
    pub fn from_stream(stream: &CommandStream) -> Result<Self, FilterError> {
        let header = stream
            .commands()
            .first()
            .filter(|c| c.kind == Kind::Header)
            .ok_or_else(|| FilterError::unsupported("first row", "not a Header"))?;
        let clocks_per_quarter = header.int_arg(2)?;

        let records: Vec<&Command> =
            stream.commands().iter().filter(|c| c.kind == Kind::TimeSignature).collect();
        let Some(&first) = records.first() else {
            return Self::new(4, 4, clocks_per_quarter);
        };

        // Raw `(nn, dd)` pairs; 4/4 and 2/4 may alternate.
        let signature = |c: &Command| -> Result<(u32, u32), FilterError> {
            Ok((c.int_arg(0)?, c.int_arg(1)?))
        };
        let first_sig = signature(first)?;
        for &other in &records[1..] {
            let sig = signature(other)?;
            let both_common = [first_sig, sig].iter().all(|s| matches!(s, (4, 2) | (2, 2)));
            if sig != first_sig && !both_common {
                let reason = "cannot handle multiple time signatures";
                return Err(FilterError::unsupported(other, reason));
            }
        }

        if first.args.len() != 4 {
            return Err(FilterError::unsupported(first, "expected four values"));
        }
        if first.int_arg(3)? != 8 {
            return Err(FilterError::unsupported(first, "expected 8 32nd notes per quarter"));
        }
        let (numerator, power) = first_sig;
        let denominator = 1u32
            .checked_shl(power)
            .filter(|d| *d <= 64)
            .ok_or_else(|| FilterError::unsupported(first, "bad denominator"))?;
        Self::new(numerator, denominator, clocks_per_quarter)
    }
}

/// Click velocity at 70% of the accent.
fn click_velocity(accent: u32) -> String {
    (accent * 7 / 10).to_string()
}

/// The click track, `Start_track` to `End_track`, covering `0..end` in whole bars.
pub fn build_track(
    track: u32,
    end: u32,
    signature: &TimeSignature,
    high_precision: bool,
) -> Result<Vec<Command>, FilterError> {
    let clicks = signature.clicks()?;
    let beat = signature.beat_length();
    let half = beat / 2;
    let ring = (beat / 4).max(1);
    let low_velocity = clicks.last().map(|&(_, v)| v).unwrap_or(0);
    let at = |position: u32, offset: u32| {
        position
            .checked_add(offset)
            .ok_or_else(|| {
                FilterError::unsupported(format!("position {position}"), "click past the last tick")
            })
    };

    let mut notes = Vec::new();
    let mut push_click = |position: u32, accent: u32| -> Result<(), FilterError> {
        let velocity = click_velocity(accent);
        let off = at(position, ring)?;
        notes.push(Command::new(
            track,
            position,
            Kind::NoteOnC,
            [CHANNEL, CLICK_NOTE, velocity.as_str()],
        ));
        notes.push(Command::new(track, off, Kind::NoteOffC, [CHANNEL, CLICK_NOTE, "0"]));
        Ok(())
    };
    for bar in (0..end).step_by(signature.clocks_per_bar.max(1) as usize) {
        for &(offset, accent) in &clicks {
            let position = at(bar, offset)?;
            push_click(position, accent)?;
            if high_precision && half > 0 {
                push_click(at(position, half)?, low_velocity)?;
            }
        }
    }
    notes.sort_by_key(|c| c.position);

    let end_position = notes.last().map(|c| c.position).unwrap_or(0);
    let mut rows = vec![
        Command::new(track, 0, Kind::StartTrack, Vec::<String>::new()),
        Command::new(track, 0, Kind::TitleT, ["\"Metronome\""]),
        Command::new(track, 0, Kind::ControlC, [CHANNEL, "7", "120"]),
        Command::new(track, 0, Kind::ControlC, [CHANNEL, "10", "64"]),
    ];
    rows.extend(notes);
    rows.push(Command::new(track, end_position, Kind::EndTrack, Vec::<String>::new()));
    Ok(rows)
}

pub struct AddMetronome;

impl AddMetronome {
    fn last_note_on(stream: &CommandStream) -> Option<u32> {
        stream
            .commands()
            .iter()
            .filter(|c| c.kind == Kind::NoteOnC)
            .map(|c| c.position)
            .max()
    }
}

impl Filter for AddMetronome {
    fn name(&self) -> &'static str {
        "add-metronome"
    }

    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        if Self::last_note_on(stream).is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![Question::new(
            QUESTION,
            "Add metronome/hihat?",
            vec![Choice::new(0, "no"), Choice::new(1, "yes"), Choice::new(2, "high precision")],
        )])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        let high_precision = match answers.get(QUESTION) {
            None | Some(Value::Nothing) | Some(Value::Number(0)) => return Ok(()),
            Some(Value::Number(1)) => false,
            Some(Value::Number(2)) => true,
            Some(other) => {
                return Err(FilterError::malformed(QUESTION, format!("unknown choice `{other}`")));
            }
        };
        let Some(last_note) = Self::last_note_on(stream) else {
            debug!("no notes, no metronome");
            return Ok(());
        };

        let signature = TimeSignature::from_stream(stream)?;
        let free_track = stream.max_track() + 1;

        let header = &stream.commands()[0];
        if header.track != 0 || header.position != 0 || header.args.len() != 3 {
            return Err(FilterError::unsupported(header, "unexpected Header shape"));
        }
        if header.int_arg(1)? != free_track - 1 {
            let reason = format!("track count is not {}", free_track - 1);
            return Err(FilterError::unsupported(header, reason));
        }
        let header = Command::new(
            0,
            0,
            Kind::Header,
            [header.args[0].clone(), free_track.to_string(), header.args[2].clone()],
        );

        let eof = Command::new(0, 0, Kind::EndOfFile, Vec::<String>::new());
        match stream.commands().last() {
            Some(last) if *last == eof => {}
            Some(last) => return Err(FilterError::unsupported(last, "expected End_of_file last")),
            None => return Err(FilterError::unsupported("stream", "empty")),
        }

        let end = last_note
            .checked_add(1)
            .ok_or_else(|| {
                let record = format!("Note_on_c at {last_note}");
                FilterError::unsupported(record, "no tick left after it")
            })?;
        let track = build_track(free_track, end, &signature, high_precision)?;
        debug!(
            track = free_track,
            signature = %format!("{}/{}", signature.numerator, signature.denominator),
            rows = track.len(),
            high_precision,
            "adding metronome"
        );

        let commands = stream.commands_mut();
        commands[0] = header;
        commands.pop();
        commands.extend(track);
        commands.push(eof);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{rows, stream};
    use crate::question::Answer;

    fn song(time_signature: Option<&str>, last_note: u32) -> String {
        let mut text = String::from("0, 0, Header, 1, 1, 24\n1, 0, Start_track\n1, 0, Title_t, \"Lead\"\n");
        if let Some(sig) = time_signature {
            text.push_str(&format!("1, 0, Time_signature, {sig}\n"));
        }
        text.push_str("1, 0, Note_on_c, 0, 60, 90\n");
        text.push_str(&format!("1, {last_note}, Note_on_c, 0, 62, 90\n"));
        text.push_str(&format!("1, {last_note}, End_track\n0, 0, End_of_file\n"));
        text
    }

    fn choose(value: i64) -> Answers {
        [Answer::new(QUESTION, value)].into_iter().collect()
    }

    fn clicks_in(stream: &CommandStream, track: u32) -> Vec<(u32, String)> {
        stream
            .commands()
            .iter()
            .filter(|c| c.track == track && c.kind == Kind::NoteOnC)
            .map(|c| (c.position, c.args[2].clone()))
            .collect()
    }

    #[test]
    fn one_bar_of_four_four() {
        let mut s = stream(&song(None, 50));
        AddMetronome.apply(&mut s, &choose(1)).unwrap();
        assert_eq!(
            clicks_in(&s, 2),
            vec![(0, "88".into()), (24, "56".into()), (48, "70".into()), (72, "56".into())]
        );
    }

    #[test]
    fn high_precision_doubles_the_clicks() {
        let mut s = stream(&song(Some("4, 2, 24, 8"), 95));
        AddMetronome.apply(&mut s, &choose(2)).unwrap();
        let clicks = clicks_in(&s, 2);
        assert_eq!(clicks.len(), 8);
        assert_eq!(clicks[1], (12, "56".into()));
    }

    #[test]
    fn covers_every_bar_up_to_the_last_note() {
        let mut s = stream(&song(Some("3, 2, 24, 8"), 72));
        AddMetronome.apply(&mut s, &choose(1)).unwrap();
        // 3/4 at 24 ticks per quarter is 72 ticks a bar; a note at 72 opens bar two.
        assert_eq!(clicks_in(&s, 2).len(), 6);
    }

    #[test]
    fn appends_track_and_updates_header() {
        let mut s = stream(&song(None, 10));
        AddMetronome.apply(&mut s, &choose(1)).unwrap();
        let out = rows(&s);
        assert_eq!(out[0], "0, 0, Header, 1, 2, 24");
        assert_eq!(out.last().unwrap(), "0, 0, End_of_file");
        assert!(out.contains(&"2, 0, Start_track".to_string()));
        assert!(out.contains(&"2, 0, Title_t, \"Metronome\"".to_string()));
        assert_eq!(out[out.len() - 2], "2, 78, End_track");
        assert_eq!(s.tracks()[&2], "\"Metronome\"");

        // Every click is closed again.
        let ons = s.commands().iter().filter(|c| c.track == 2 && c.kind == Kind::NoteOnC).count();
        let offs = s.commands().iter().filter(|c| c.track == 2 && c.kind == Kind::NoteOffC).count();
        assert_eq!(ons, offs);
    }

    #[test]
    fn six_four_uses_six_eight_accents() {
        let sig = TimeSignature::new(6, 4, 24).unwrap();
        assert_eq!(sig.velocities().unwrap(), TimeSignature::new(6, 8, 24).unwrap().velocities().unwrap());
        assert_eq!(sig.clocks_per_bar, 144);
    }

    #[test]
    fn unsupported_signatures_fail() {
        let mut s = stream(&song(Some("5, 2, 24, 8"), 10));
        assert!(matches!(AddMetronome.apply(&mut s, &choose(1)), Err(FilterError::Unsupported { .. })));

        let mut s = stream(&song(Some("4, 2, 24, 12"), 10));
        assert!(AddMetronome.apply(&mut s, &choose(1)).is_err());
    }

    #[test]
    fn conflicting_signatures_fail() {
        let text = song(Some("3, 2, 24, 8"), 10).replace(
            "1, 0, Note_on_c",
            "1, 0, Time_signature, 6, 3, 24, 8\n1, 0, Note_on_c",
        );
        let mut s = stream(&text);
        assert!(matches!(AddMetronome.apply(&mut s, &choose(1)), Err(FilterError::Unsupported { .. })));
    }

    fn two_signatures(first: &str, second: &str) -> CommandStream {
        let text = song(Some(first), 10).replace(
            "1, 0, Note_on_c",
            &format!("1, 0, Time_signature, {second}\n1, 0, Note_on_c"),
        );
        stream(&text)
    }

    #[test]
    fn two_four_and_four_four_mix_uses_the_first() {
        let sig = TimeSignature::from_stream(&two_signatures("2, 2, 24, 8", "4, 2, 24, 8")).unwrap();
        assert_eq!((sig.numerator, sig.denominator), (2, 4));

        let sig = TimeSignature::from_stream(&two_signatures("4, 2, 24, 8", "2, 2, 24, 8")).unwrap();
        assert_eq!((sig.numerator, sig.denominator), (4, 4));
    }

    #[test]
    fn cut_time_does_not_mix_with_four_four() {
        let err = TimeSignature::from_stream(&two_signatures("2, 1, 24, 8", "4, 2, 24, 8")).unwrap_err();
        assert!(matches!(err, FilterError::Unsupported { .. }));
        assert!(err.to_string().contains("multiple time signatures"), "{err}");
    }

    #[test]
    fn high_precision_rounds_odd_beats_down() {
        // 3/4 at 30 ticks per quarter: beats of 30, half beats of 15, clicks ring for 7.
        let text = song(Some("3, 2, 24, 8"), 10).replace("Header, 1, 1, 24", "Header, 1, 1, 30");
        let mut s = stream(&text);
        AddMetronome.apply(&mut s, &choose(2)).unwrap();
        assert_eq!(
            clicks_in(&s, 2),
            vec![
                (0, "88".into()),
                (15, "56".into()),
                (30, "56".into()),
                (45, "56".into()),
                (60, "56".into()),
                (75, "56".into()),
            ]
        );
        let offs: Vec<u32> = s
            .commands()
            .iter()
            .filter(|c| c.track == 2 && c.kind == Kind::NoteOffC)
            .map(|c| c.position)
            .collect();
        assert_eq!(offs, vec![7, 22, 37, 52, 67, 82]);
        assert_eq!(rows(&s)[s.len() - 2], "2, 82, End_track");
    }

    #[test]
    fn positions_past_the_last_tick_fail() {
        let mut s = stream(&song(None, u32::MAX));
        assert!(matches!(AddMetronome.apply(&mut s, &choose(1)), Err(FilterError::Unsupported { .. })));

        // The second bar starts at 3 * 2^30; its second beat would not fit.
        let sig = TimeSignature::new(3, 4, 1 << 30).unwrap();
        assert!(matches!(build_track(2, u32::MAX, &sig, false), Err(FilterError::Unsupported { .. })));

        assert!(TimeSignature::new(4, 4, u32::MAX).is_err());
    }

    #[test]
    fn no_notes_no_question() {
        let s = stream("0, 0, Header, 1, 1, 24\n1, 0, Start_track\n1, 0, End_track\n0, 0, End_of_file\n");
        assert!(AddMetronome.questions(&s).unwrap().is_empty());
    }

    #[test]
    fn wrong_track_count_fails() {
        let mut s = stream(&song(None, 10).replace("Header, 1, 1, 24", "Header, 1, 5, 24"));
        assert!(AddMetronome.apply(&mut s, &choose(1)).is_err());
    }
}
