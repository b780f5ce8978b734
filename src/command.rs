//! command.rs
//!
//! The row-text model of a MIDI performance.
//!
//! A song is an ordered list of [`Command`]s, one per line of text:
//!
//! ```text
//! 0, 0, Header, 1, 2, 480
//! 1, 0, Start_track
//! 1, 0, Title_t, "Bass"
//! 1, 480, Note_on_c, 0, 52, 75
//! ```
//!
//! Every line is `track, position, kind[, arg, ...]`. Track 0 holds the file
//! level Header and End_of_file; `position` is an absolute tick within the
//! track. Arguments are kept as the exact tokens that were read so a
//! load/export round trip reproduces the input byte for byte. Numeric views
//! of an argument are parsed on demand with [`Command::int_arg`].

use std::fmt;
use std::io::{self, Write};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("expected `track, position, kind`, got `{0}`")]
    TooFewFields(String),
    #[error("bad {field} `{value}`")]
    BadField { field: &'static str, value: String },
    #[error("unterminated string in `{0}`")]
    UnterminatedString(String),
    #[error("{kind} at {track}/{position}: missing argument {index}")]
    MissingArgument { kind: Kind, track: u32, position: u32, index: usize },
    #[error("{kind} at {track}/{position}: argument {index} `{value}` is not a number")]
    NotANumber { kind: Kind, track: u32, position: u32, index: usize, value: String },
    #[error("line {number}: {source}")]
    Line {
        number: usize,
        #[source]
        source: Box<RowError>,
    },
}

/// Command tag. The variants the filters inspect are spelled out; anything
/// else passes through untouched as [`Kind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Header,
    StartTrack,
    EndTrack,
    TitleT,
    Tempo,
    TimeSignature,
    ProgramC,
    ControlC,
    NoteOnC,
    NoteOffC,
    EndOfFile,
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Header => "Header",
            Kind::StartTrack => "Start_track",
            Kind::EndTrack => "End_track",
            Kind::TitleT => "Title_t",
            Kind::Tempo => "Tempo",
            Kind::TimeSignature => "Time_signature",
            Kind::ProgramC => "Program_c",
            Kind::ControlC => "Control_c",
            Kind::NoteOnC => "Note_on_c",
            Kind::NoteOffC => "Note_off_c",
            Kind::EndOfFile => "End_of_file",
            Kind::Other(name) => name,
        }
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        match name {
            "Header" => Kind::Header,
            "Start_track" => Kind::StartTrack,
            "End_track" => Kind::EndTrack,
            "Title_t" => Kind::TitleT,
            "Tempo" => Kind::Tempo,
            "Time_signature" => Kind::TimeSignature,
            "Program_c" => Kind::ProgramC,
            "Control_c" => Kind::ControlC,
            "Note_on_c" => Kind::NoteOnC,
            "Note_off_c" => Kind::NoteOffC,
            "End_of_file" => Kind::EndOfFile,
            other => Kind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller number for channel volume.
pub const CONTROLLER_VOLUME: u32 = 7;
/// Controller number for pan.
pub const CONTROLLER_PAN: u32 = 10;
/// Pan value for center.
pub const PAN_CENTER: u32 = 64;

/// One timed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub track: u32,
    pub position: u32,
    pub kind: Kind,
    pub args: Vec<String>,
}

impl Command {
    pub fn new<I, S>(track: u32, position: u32, kind: Kind, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { track, position, kind, args: args.into_iter().map(Into::into).collect() }
    }

    /// Parse a single row. Surrounding whitespace (including the newline) is ignored.
    pub fn from_line(line: &str) -> Result<Self, RowError> {
        let line = line.trim();
        let fields = split_fields(line)?;
        if fields.len() < 3 {
            return Err(RowError::TooFewFields(line.to_string()));
        }
        let track = parse_field("track", fields[0])?;
        let position = parse_field("position", fields[1])?;
        let kind = Kind::from(fields[2]);
        let args = fields[3..].iter().map(|s| s.to_string()).collect();
        Ok(Self { track, position, kind, args })
    }

    /// Render as a row, without the trailing newline.
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    pub fn arg(&self, index: usize) -> Result<&str, RowError> {
        self.args.get(index).map(String::as_str).ok_or_else(|| RowError::MissingArgument {
            kind: self.kind.clone(),
            track: self.track,
            position: self.position,
            index,
        })
    }

    pub fn int_arg(&self, index: usize) -> Result<u32, RowError> {
        let raw = self.arg(index)?;
        raw.trim().parse().map_err(|_| RowError::NotANumber {
            kind: self.kind.clone(),
            track: self.track,
            position: self.position,
            index,
            value: raw.to_string(),
        })
    }

    /// True for a `Control_c` addressing `controller`.
    pub fn is_controller(&self, controller: u32) -> Result<bool, RowError> {
        if self.kind != Kind::ControlC {
            return Ok(false);
        }
        Ok(self.int_arg(1)? == controller)
    }

    /// `(channel, note)` of a note command, kept as the raw tokens.
    pub fn note_key(&self) -> Result<(&str, &str), RowError> {
        Ok((self.arg(0)?, self.arg(1)?))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.track, self.position, self.kind)?;
        if !self.args.is_empty() {
            write!(f, ", {}", self.args.join(", "))?;
        }
        Ok(())
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<u32, RowError> {
    value
        .trim()
        .parse()
        .map_err(|_| RowError::BadField { field, value: value.to_string() })
}

/// Split on `", "`, keeping quoted strings (which may contain `", "`) whole.
/// A doubled quote inside a string toggles twice and so stays inside.
fn split_fields(line: &str) -> Result<Vec<&str>, RowError> {
    let bytes = line.as_bytes();
    let mut fields = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => quoted = !quoted,
            b',' if !quoted && bytes.get(i + 1) == Some(&b' ') => {
                fields.push(&line[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    if quoted {
        return Err(RowError::UnterminatedString(line.to_string()));
    }
    fields.push(&line[start..]);
    Ok(fields)
}

/// Byte encoding the row text was read with; reused when writing it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl TextEncoding {
    /// Decode as UTF-8, falling back to Latin-1 (which cannot fail).
    pub fn decode(bytes: &[u8]) -> (String, TextEncoding) {
        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_string(), TextEncoding::Utf8),
            Err(_) => (bytes.iter().map(|&b| b as char).collect(), TextEncoding::Latin1),
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Parse a whole row-text document. Blank lines are skipped.
pub fn parse_rows(text: &str) -> Result<Vec<Command>, RowError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            Command::from_line(line)
                .map_err(|e| RowError::Line { number: i + 1, source: Box::new(e) })
        })
        .collect()
}

/// Write one row per command, each terminated by `\n`.
pub fn write_rows<W: Write>(commands: &[Command], encoding: TextEncoding, out: &mut W) -> io::Result<()> {
    for cmd in commands {
        let mut line = cmd.to_line();
        line.push('\n');
        out.write_all(&encoding.encode(&line))?;
    }
    Ok(())
}
