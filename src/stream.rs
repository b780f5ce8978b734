//! stream.rs
//!
//! The single mutable artifact every filter works on: the ordered command
//! list of one song, plus what is derived from or recorded alongside it.
//!
//! Structural edits go through a plan-then-commit pair ([`CommandStream::insert_all`],
//! [`CommandStream::remove_all`]): a filter first scans and collects the
//! indices it wants to touch, then commits them in one step so no index is
//! shifted while it is still needed.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::command::{Command, Kind, TextEncoding};

/// Track number to its `Title_t` token (quotes included).
pub type TrackIndex = BTreeMap<u32, String>;

/// Representation the song is exported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Row text, one command per line.
    Rows,
    /// Standard MIDI file.
    #[default]
    Midi,
    /// Rendered audio.
    Audio,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Rows => "csv",
            ExportFormat::Midi => "mid",
            ExportFormat::Audio => "wav",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Rows => "text/csv",
            ExportFormat::Midi => "audio/midi",
            ExportFormat::Audio => "audio/wav",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Ok(ExportFormat::Rows),
            "mid" | "midi" => Ok(ExportFormat::Midi),
            "wav" => Ok(ExportFormat::Audio),
            other => Err(format!("unknown output format `{other}`")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Default)]
pub struct CommandStream {
    commands: Vec<Command>,
    encoding: TextEncoding,
    export_format: ExportFormat,
    tracks: OnceCell<TrackIndex>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole stream. Derived data is dropped.
    pub fn load(&mut self, commands: Vec<Command>) {
        self.commands = commands;
        self.invalidate();
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Mutable access to the list; the track index is rebuilt on next use.
    pub fn commands_mut(&mut self) -> &mut Vec<Command> {
        self.invalidate();
        &mut self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Titled tracks, built on first access after a load.
    pub fn tracks(&self) -> &TrackIndex {
        self.tracks.get_or_init(|| {
            self.commands
                .iter()
                .filter(|c| c.kind == Kind::TitleT)
                .filter_map(|c| c.args.first().map(|title| (c.track, title.clone())))
                .collect()
        })
    }

    /// Title of `track`, or a generic label for untitled tracks.
    pub fn track_label(&self, track: u32) -> String {
        self.tracks()
            .get(&track)
            .cloned()
            .unwrap_or_else(|| format!("track {track}"))
    }

    /// Highest track number present, 0 for an empty stream.
    pub fn max_track(&self) -> u32 {
        self.commands.iter().map(|c| c.track).max().unwrap_or(0)
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub fn export_format(&self) -> ExportFormat {
        self.export_format
    }

    pub fn set_export_format(&mut self, format: ExportFormat) {
        self.export_format = format;
    }

    /// Commit planned insertions. Each index refers to the stream as it was
    /// when the plan was made; several commands planned at the same index
    /// land in plan order, before the command that was there.
    pub fn insert_all(&mut self, mut inserts: Vec<(usize, Command)>) {
        if inserts.is_empty() {
            return;
        }
        inserts.sort_by_key(|(index, _)| *index);
        let commands = self.commands_mut();
        for (index, cmd) in inserts.into_iter().rev() {
            commands.insert(index, cmd);
        }
    }

    /// Commit planned removals, indices as of planning time.
    pub fn remove_all(&mut self, mut indices: Vec<usize>) {
        if indices.is_empty() {
            return;
        }
        indices.sort_unstable();
        indices.dedup();
        let commands = self.commands_mut();
        for index in indices.into_iter().rev() {
            commands.remove(index);
        }
    }

    fn invalidate(&mut self) {
        self.tracks = OnceCell::new();
    }
}
