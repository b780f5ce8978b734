//! highlight.rs
//!
//! Makes one track stand out by volume, and optionally by panning.

use std::collections::HashMap;

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::{Command, Kind, CONTROLLER_VOLUME};
use crate::question::{Answers, Choice, Question, Value};
use crate::stream::CommandStream;

pub const TRACK: &str = "highlight_track";
pub const PAN: &str = "highlight_pan";
pub const INVERT: &str = "highlight_invert";

/// Volume inserted for channels that never set one.
const DEFAULT_VOLUME: &str = "127";

/// Turns down every track but one (or, inverted, only that one), and can
/// pan the highlighted track hard right and the rest hard left.
pub struct HighlightTrack;

/// Where the first note of a (track, channel) stands relative to its volume.
enum VolumeState {
    HasVolume,
    FirstNoteAt(usize),
}

/// `floor(volume * 0.35)`, exact for integer volumes.
pub fn reduced_volume(volume: u32) -> u32 {
    volume * 35 / 100
}

impl HighlightTrack {
    fn chosen_track(stream: &CommandStream, answers: &Answers) -> Result<Option<u32>, FilterError> {
        match answers.get(TRACK) {
            None | Some(Value::Nothing) => Ok(None),
            Some(Value::Number(n)) => {
                let track = u32::try_from(*n)
                    .ok()
                    .filter(|t| stream.tracks().contains_key(t))
                    .ok_or_else(|| FilterError::malformed(TRACK, format!("no titled track {n}")))?;
                Ok(Some(track))
            }
            Some(other) => Err(FilterError::malformed(TRACK, format!("`{other}` is not a track"))),
        }
    }

    /// Give every (track, channel) that plays notes a volume controller
    /// ahead of its first note.
    fn ensure_initial_volumes(stream: &mut CommandStream) -> Result<(), FilterError> {
        let mut state: HashMap<(u32, &str), VolumeState> = HashMap::new();
        for (i, cmd) in stream.commands().iter().enumerate() {
            if cmd.kind == Kind::NoteOnC {
                state.entry((cmd.track, cmd.arg(0)?)).or_insert(VolumeState::FirstNoteAt(i));
            } else if cmd.is_controller(CONTROLLER_VOLUME)? {
                state.entry((cmd.track, cmd.arg(0)?)).or_insert(VolumeState::HasVolume);
            }
        }

        let inserts: Vec<(usize, Command)> = state
            .into_iter()
            .filter_map(|((track, channel), st)| match st {
                VolumeState::FirstNoteAt(i) => Some((i, track, channel)),
                VolumeState::HasVolume => None,
            })
            .map(|(i, track, channel)| {
                let position = stream.commands()[i].position;
                let volume = Command::new(
                    track,
                    position,
                    Kind::ControlC,
                    [channel, "7", DEFAULT_VOLUME],
                );
                (i, volume)
            })
            .collect();

        debug!(added = inserts.len(), "adding initial volumes");
        stream.insert_all(inserts);
        Ok(())
    }
}

impl Filter for HighlightTrack {
    fn name(&self) -> &'static str {
        "highlight-track"
    }

    fn questions(&self, stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        let mut choices = vec![Choice::nothing("no nothing")];
        choices.extend(
            stream
                .tracks()
                .iter()
                .map(|(track, title)| Choice::new(*track, format!("Highlight track {track} {title}"))),
        );
        Ok(vec![
            Question::new(TRACK, "Do you wish to highlight a track?", choices),
            Question::yes_no(PAN, "Do you want to pan your track to the right?"),
            Question::yes_no(INVERT, "Reduce volume of the highlighted track instead?"),
        ])
    }

    fn apply(&self, stream: &mut CommandStream, answers: &Answers) -> Result<(), FilterError> {
        let chosen = Self::chosen_track(stream, answers)?;
        let pan = answers.flag(PAN);
        let invert = answers.flag(INVERT);

        let Some(chosen) = chosen else {
            if pan {
                return Err(FilterError::malformed(PAN, "panning requested without a highlighted track"));
            }
            return Ok(());
        };

        Self::ensure_initial_volumes(stream)?;

        let mut pan_inserts = Vec::new();
        let mut scaled = 0usize;
        for (i, cmd) in stream.commands_mut().iter_mut().enumerate() {
            if !cmd.is_controller(CONTROLLER_VOLUME)? {
                continue;
            }
            let selected = cmd.track == chosen;
            if selected == invert {
                let volume = reduced_volume(cmd.int_arg(2)?);
                cmd.args = vec![cmd.arg(0)?.to_string(), "7".to_string(), volume.to_string()];
                scaled += 1;
            }
            if pan {
                let value = if selected { "127" } else { "0" };
                pan_inserts.push((
                    i,
                    Command::new(cmd.track, cmd.position, Kind::ControlC, [cmd.arg(0)?, "10", value]),
                ));
            }
        }

        debug!(track = chosen, scaled, panned = pan_inserts.len(), "highlighting track");
        stream.insert_all(pan_inserts);
        Ok(())
    }
}
