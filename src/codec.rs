//! codec.rs
//!
//! Standard MIDI File <-> row text.
//!
//! ### Row vocabulary
//! Decoding produces one `Header` row on track 0, then each MIDI track as
//! track `1..=n` bracketed by `Start_track` / `End_track`, then a closing
//! `End_of_file`. Positions are absolute ticks within the track.
//!
//! Channel messages keep their MIDI numbers (`Note_on_c, channel, key,
//! velocity`, `Pitch_bend_c, channel, 0..16383`, ...). Text metas are written
//! as quoted strings where `"` and `\` are doubled and control bytes become
//! `\ooo` octal escapes; every other byte is the Latin-1 character with the
//! same value, so no text is lost whatever its real encoding was. Byte
//! payloads (`System_exclusive`, `Sequencer_specific`, `Unknown_meta_event`)
//! are written as a length followed by the bytes.
//!
//! Encoding is the inverse. Track numbers in the rows are not used: tracks are
//! written in the order their `Start_track` rows appear.

use std::fmt::Write as _;

use midly::{
    num::{u4, u7, u14, u15, u24, u28},
    Format, Fps, Header, MetaMessage, MidiMessage, PitchBend, Smf, SmpteTime, Timing, TrackEvent, TrackEventKind,
};
use tracing::{debug, warn};

use crate::command::{Command, Kind, RowError};

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("not a MIDI file: {0}")]
    Parse(String),
    #[error("no Header row")]
    MissingHeader,
    #[error("`{0}` is outside of a Start_track/End_track pair")]
    OutsideTrack(String),
    #[error("`{row}`: {reason}")]
    BadArgument { row: String, reason: String },
    #[error(transparent)]
    Row(#[from] RowError),
    #[error("writing MIDI: {0}")]
    Write(String),
}

impl CodecError {
    fn bad(row: &Command, reason: impl Into<String>) -> Self {
        CodecError::BadArgument { row: row.to_line(), reason: reason.into() }
    }
}

const NO_ARGS: [&str; 0] = [];

// Meta event types that travel as raw bytes.
const META_PROGRAM_NAME: u8 = 0x08;
const META_DEVICE_NAME: u8 = 0x09;
const META_SEQUENCER_SPECIFIC: u8 = 0x7F;

/// Parse a MIDI file into rows.
pub fn decode(bytes: &[u8]) -> Result<Vec<Command>, CodecError> {
    let smf = Smf::parse(bytes).map_err(|e| CodecError::Parse(e.to_string()))?;

    let format = match smf.header.format {
        Format::SingleTrack => 0,
        Format::Parallel => 1,
        Format::Sequential => 2,
    };
    let mut rows = vec![Command::new(
        0,
        0,
        Kind::Header,
        [format.to_string(), smf.tracks.len().to_string(), division(smf.header.timing).to_string()],
    )];

    for (i, events) in smf.tracks.iter().enumerate() {
        let track = i as u32 + 1;
        rows.push(Command::new(track, 0, Kind::StartTrack, NO_ARGS));
        let mut position = 0u32;
        let mut closed = false;
        for ev in events {
            position = position.saturating_add(ev.delta.as_int());
            if let TrackEventKind::Meta(MetaMessage::EndOfTrack) = ev.kind {
                closed = true;
                break;
            }
            rows.push(event_row(track, position, ev.kind));
        }
        if !closed {
            debug!(track, "track without end-of-track event");
        }
        rows.push(Command::new(track, position, Kind::EndTrack, NO_ARGS));
    }
    rows.push(Command::new(0, 0, Kind::EndOfFile, NO_ARGS));

    debug!(tracks = smf.tracks.len(), rows = rows.len(), "decoded MIDI file");
    Ok(rows)
}

/// Write rows as a MIDI file.
pub fn encode(commands: &[Command]) -> Result<Vec<u8>, CodecError> {
    let mut header = None;
    let mut tracks: Vec<Vec<(u32, Event)>> = Vec::new();
    let mut open: Option<Vec<(u32, Event)>> = None;

    for cmd in commands {
        match cmd.kind {
            Kind::Header => header = Some(parse_header(cmd)?),
            Kind::StartTrack => {
                if open.is_some() {
                    return Err(CodecError::OutsideTrack(cmd.to_line()));
                }
                open = Some(Vec::new());
            }
            Kind::EndTrack => {
                let mut events = open.take().ok_or_else(|| CodecError::OutsideTrack(cmd.to_line()))?;
                events.push((cmd.position, Event::Meta(MetaMessage::EndOfTrack)));
                tracks.push(events);
            }
            Kind::EndOfFile => {}
            _ => {
                let event = row_event(cmd)?;
                open.as_mut()
                    .ok_or_else(|| CodecError::OutsideTrack(cmd.to_line()))?
                    .push((cmd.position, event));
            }
        }
    }
    if let Some(mut events) = open {
        let end = events.last().map(|(position, _)| *position).unwrap_or(0);
        events.push((end, Event::Meta(MetaMessage::EndOfTrack)));
        tracks.push(events);
    }
    let (header, declared) = header.ok_or(CodecError::MissingHeader)?;
    if declared != tracks.len() {
        warn!(declared, found = tracks.len(), "Header track count does not match");
    }

    let mut smf = Smf::new(header);
    for events in &tracks {
        let mut last = 0u32;
        let track = events
            .iter()
            .map(|(position, event)| {
                let position = (*position).max(last);
                let delta = position - last;
                last = position;
                TrackEvent { delta: u28::from(delta), kind: event.kind() }
            })
            .collect();
        smf.tracks.push(track);
    }

    let mut out = Vec::new();
    smf.write(&mut out).map_err(|e| CodecError::Write(e.to_string()))?;
    debug!(tracks = smf.tracks.len(), bytes = out.len(), "encoded MIDI file");
    Ok(out)
}

/// A track event whose byte payloads are owned, so rows can be parsed
/// before the borrowing [`Smf`] is assembled.
enum Event {
    Midi(u4, MidiMessage),
    Meta(MetaMessage<'static>),
    Bytes(Payload, Vec<u8>),
}

#[derive(Clone, Copy)]
enum Payload {
    Meta(u8),
    SysEx,
    Escape,
}

impl Event {
    fn kind(&self) -> TrackEventKind<'_> {
        match self {
            Event::Midi(channel, message) => TrackEventKind::Midi { channel: *channel, message: *message },
            Event::Meta(meta) => TrackEventKind::Meta(*meta),
            Event::Bytes(Payload::SysEx, data) => TrackEventKind::SysEx(data),
            Event::Bytes(Payload::Escape, data) => TrackEventKind::Escape(data),
            Event::Bytes(Payload::Meta(ty), data) => TrackEventKind::Meta(meta_with_bytes(*ty, data)),
        }
    }
}

fn meta_with_bytes(ty: u8, data: &[u8]) -> MetaMessage<'_> {
    match ty {
        0x01 => MetaMessage::Text(data),
        0x02 => MetaMessage::Copyright(data),
        0x03 => MetaMessage::TrackName(data),
        0x04 => MetaMessage::InstrumentName(data),
        0x05 => MetaMessage::Lyric(data),
        0x06 => MetaMessage::Marker(data),
        0x07 => MetaMessage::CuePoint(data),
        META_PROGRAM_NAME => MetaMessage::ProgramName(data),
        META_DEVICE_NAME => MetaMessage::DeviceName(data),
        META_SEQUENCER_SPECIFIC => MetaMessage::SequencerSpecific(data),
        other => MetaMessage::Unknown(other, data),
    }
}

fn text_meta_type(kind: &str) -> Option<u8> {
    Some(match kind {
        "Text_t" => 0x01,
        "Copyright_t" => 0x02,
        "Title_t" => 0x03,
        "Instrument_name_t" => 0x04,
        "Lyric_t" => 0x05,
        "Marker_t" => 0x06,
        "Cue_point_t" => 0x07,
        _ => return None,
    })
}

/// Raw 16-bit division: ticks per quarter, or negative fps and ticks per frame.
pub fn division(timing: Timing) -> u16 {
    match timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(fps, per_frame) => (u16::from(fps.as_int().wrapping_neg()) << 8) | u16::from(per_frame),
    }
}

fn timing(raw: u16) -> Option<Timing> {
    if raw & 0x8000 == 0 {
        return Some(Timing::Metrical(u15::from(raw)));
    }
    let fps = Fps::from_int(((raw >> 8) as u8).wrapping_neg())?;
    Some(Timing::Timecode(fps, raw as u8))
}

fn fps_code(fps: Fps) -> u8 {
    match fps {
        Fps::Fps24 => 0,
        Fps::Fps25 => 1,
        Fps::Fps29 => 2,
        Fps::Fps30 => 3,
    }
}

fn fps_from_code(code: u8) -> Fps {
    match code & 0x03 {
        0 => Fps::Fps24,
        1 => Fps::Fps25,
        2 => Fps::Fps29,
        _ => Fps::Fps30,
    }
}

fn parse_header(cmd: &Command) -> Result<(Header, usize), CodecError> {
    let format = match cmd.int_arg(0)? {
        0 => Format::SingleTrack,
        1 => Format::Parallel,
        2 => Format::Sequential,
        other => return Err(CodecError::bad(cmd, format!("unknown format {other}"))),
    };
    let declared = cmd.int_arg(1)? as usize;
    let raw = u16::try_from(cmd.int_arg(2)?).map_err(|_| CodecError::bad(cmd, "division out of range"))?;
    let timing = timing(raw).ok_or_else(|| CodecError::bad(cmd, "bad SMPTE frame rate"))?;
    Ok((Header::new(format, timing), declared))
}

/// `"…"` with `"` and `\` doubled and control bytes as octal escapes.
pub fn quote(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len() + 2);
    text.push('"');
    for &b in bytes {
        match b {
            b'"' => text.push_str("\"\""),
            b'\\' => text.push_str("\\\\"),
            0x00..=0x1F | 0x7F => {
                let _ = write!(text, "\\{b:03o}");
            }
            _ => text.push(char::from(b)),
        }
    }
    text.push('"');
    text
}

/// Inverse of [`quote`]. Unquoted tokens are taken as is; characters
/// outside Latin-1 are kept as UTF-8. Fails on an octal escape above `\377`.
pub fn unquote(token: &str) -> Result<Vec<u8>, String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                chars.next_if_eq(&'"');
                bytes.push(b'"');
            }
            '\\' if chars.next_if_eq(&'\\').is_some() => bytes.push(b'\\'),
            '\\' if chars.peek().is_some_and(|d| d.is_digit(8)) => {
                let mut value = 0u32;
                for _ in 0..3 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                let byte = u8::try_from(value).map_err(|_| format!("escape \\{value:o} is not a byte"))?;
                bytes.push(byte);
            }
            c => match u8::try_from(u32::from(c)) {
                Ok(b) => bytes.push(b),
                Err(_) => bytes.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes()),
            },
        }
    }
    Ok(bytes)
}

fn with_length(bytes: &[u8]) -> Vec<String> {
    let mut args = Vec::with_capacity(bytes.len() + 1);
    args.push(bytes.len().to_string());
    args.extend(bytes.iter().map(u8::to_string));
    args
}

fn event_row(track: u32, position: u32, kind: TrackEventKind<'_>) -> Command {
    let row = |name: &str, args: Vec<String>| Command::new(track, position, Kind::from(name), args);
    let text = |name: &str, data: &[u8]| row(name, vec![quote(data)]);
    let unknown = |ty: u8, data: &[u8]| {
        let mut args = vec![ty.to_string()];
        args.extend(with_length(data));
        row("Unknown_meta_event", args)
    };

    match kind {
        TrackEventKind::Midi { channel, message } => {
            let ch = channel.as_int().to_string();
            match message {
                MidiMessage::NoteOn { key, vel } => {
                    row("Note_on_c", vec![ch, key.as_int().to_string(), vel.as_int().to_string()])
                }
                MidiMessage::NoteOff { key, vel } => {
                    row("Note_off_c", vec![ch, key.as_int().to_string(), vel.as_int().to_string()])
                }
                MidiMessage::Aftertouch { key, vel } => {
                    row("Poly_aftertouch_c", vec![ch, key.as_int().to_string(), vel.as_int().to_string()])
                }
                MidiMessage::Controller { controller, value } => {
                    row("Control_c", vec![ch, controller.as_int().to_string(), value.as_int().to_string()])
                }
                MidiMessage::ProgramChange { program } => row("Program_c", vec![ch, program.as_int().to_string()]),
                MidiMessage::ChannelAftertouch { vel } => {
                    row("Channel_aftertouch_c", vec![ch, vel.as_int().to_string()])
                }
                MidiMessage::PitchBend { bend } => row("Pitch_bend_c", vec![ch, bend.0.as_int().to_string()]),
            }
        }
        TrackEventKind::SysEx(data) => row("System_exclusive", with_length(data)),
        TrackEventKind::Escape(data) => row("System_exclusive_packet", with_length(data)),
        TrackEventKind::Meta(meta) => match meta {
            MetaMessage::TrackNumber(number) => {
                row("Sequence_number", number.map(|n| n.to_string()).into_iter().collect())
            }
            MetaMessage::Text(data) => text("Text_t", data),
            MetaMessage::Copyright(data) => text("Copyright_t", data),
            MetaMessage::TrackName(data) => text("Title_t", data),
            MetaMessage::InstrumentName(data) => text("Instrument_name_t", data),
            MetaMessage::Lyric(data) => text("Lyric_t", data),
            MetaMessage::Marker(data) => text("Marker_t", data),
            MetaMessage::CuePoint(data) => text("Cue_point_t", data),
            MetaMessage::ProgramName(data) => unknown(META_PROGRAM_NAME, data),
            MetaMessage::DeviceName(data) => unknown(META_DEVICE_NAME, data),
            MetaMessage::MidiChannel(channel) => row("Channel_prefix", vec![channel.as_int().to_string()]),
            MetaMessage::MidiPort(port) => row("MIDI_port", vec![port.as_int().to_string()]),
            MetaMessage::EndOfTrack => row("End_track", Vec::new()),
            MetaMessage::Tempo(tempo) => row("Tempo", vec![tempo.as_int().to_string()]),
            MetaMessage::SmpteOffset(time) => row(
                "SMPTE_offset",
                vec![
                    ((fps_code(time.fps()) << 5) | time.hour()).to_string(),
                    time.minute().to_string(),
                    time.second().to_string(),
                    time.frame().to_string(),
                    time.subframe().to_string(),
                ],
            ),
            MetaMessage::TimeSignature(num, den, clocks, per_quarter) => row(
                "Time_signature",
                vec![num.to_string(), den.to_string(), clocks.to_string(), per_quarter.to_string()],
            ),
            MetaMessage::KeySignature(sharps, minor) => row(
                "Key_signature",
                vec![sharps.to_string(), if minor { "\"minor\"" } else { "\"major\"" }.to_string()],
            ),
            MetaMessage::SequencerSpecific(data) => row("Sequencer_specific", with_length(data)),
            MetaMessage::Unknown(ty, data) => unknown(ty, data),
        },
    }
}

/// Numeric argument checked against `max`.
fn ranged(cmd: &Command, index: usize, max: u32) -> Result<u32, CodecError> {
    let value = cmd.int_arg(index)?;
    if value > max {
        return Err(CodecError::bad(cmd, format!("argument {index} is above {max}")));
    }
    Ok(value)
}

fn byte(cmd: &Command, index: usize) -> Result<u8, CodecError> {
    Ok(ranged(cmd, index, 0xFF)? as u8)
}

fn seven(cmd: &Command, index: usize) -> Result<u7, CodecError> {
    Ok(u7::from(ranged(cmd, index, 0x7F)? as u8))
}

/// Payload bytes following a length argument at `length_index`.
fn payload(cmd: &Command, length_index: usize) -> Result<Vec<u8>, CodecError> {
    let length = cmd.int_arg(length_index)? as usize;
    let bytes = (length_index + 1..cmd.args.len())
        .map(|i| byte(cmd, i))
        .collect::<Result<Vec<_>, _>>()?;
    if bytes.len() != length {
        return Err(CodecError::bad(cmd, format!("length {length} but {} bytes", bytes.len())));
    }
    Ok(bytes)
}

fn text_arg(cmd: &Command, index: usize) -> Result<Vec<u8>, CodecError> {
    unquote(cmd.arg(index)?).map_err(|e| CodecError::bad(cmd, e))
}

fn row_event(cmd: &Command) -> Result<Event, CodecError> {
    let name = cmd.kind.as_str();
    if let Some(ty) = text_meta_type(name) {
        return Ok(Event::Bytes(Payload::Meta(ty), text_arg(cmd, 0)?));
    }

    let channel = || -> Result<u4, CodecError> { Ok(u4::from(ranged(cmd, 0, 0x0F)? as u8)) };
    let midi = |message: MidiMessage| -> Result<Event, CodecError> { Ok(Event::Midi(channel()?, message)) };

    match name {
        "Note_on_c" => midi(MidiMessage::NoteOn { key: seven(cmd, 1)?, vel: seven(cmd, 2)? }),
        "Note_off_c" => midi(MidiMessage::NoteOff { key: seven(cmd, 1)?, vel: seven(cmd, 2)? }),
        "Poly_aftertouch_c" => midi(MidiMessage::Aftertouch { key: seven(cmd, 1)?, vel: seven(cmd, 2)? }),
        "Control_c" => midi(MidiMessage::Controller { controller: seven(cmd, 1)?, value: seven(cmd, 2)? }),
        "Program_c" => midi(MidiMessage::ProgramChange { program: seven(cmd, 1)? }),
        "Channel_aftertouch_c" => midi(MidiMessage::ChannelAftertouch { vel: seven(cmd, 1)? }),
        "Pitch_bend_c" => {
            let bend = u14::from(ranged(cmd, 1, 0x3FFF)? as u16);
            midi(MidiMessage::PitchBend { bend: PitchBend(bend) })
        }
        "Tempo" => Ok(Event::Meta(MetaMessage::Tempo(u24::from(ranged(cmd, 0, 0xFF_FFFF)?)))),
        "Time_signature" => Ok(Event::Meta(MetaMessage::TimeSignature(
            byte(cmd, 0)?,
            byte(cmd, 1)?,
            byte(cmd, 2)?,
            byte(cmd, 3)?,
        ))),
        "Key_signature" => {
            let sharps = cmd
                .arg(0)?
                .trim()
                .parse::<i8>()
                .map_err(|_| CodecError::bad(cmd, "key is not -7..7"))?;
            let minor = text_arg(cmd, 1)?.eq_ignore_ascii_case(b"minor");
            Ok(Event::Meta(MetaMessage::KeySignature(sharps, minor)))
        }
        "SMPTE_offset" => {
            let hour = byte(cmd, 0)?;
            let time = SmpteTime::new(
                hour & 0x1F,
                byte(cmd, 1)?,
                byte(cmd, 2)?,
                byte(cmd, 3)?,
                byte(cmd, 4)?,
                fps_from_code(hour >> 5),
            )
            .ok_or_else(|| CodecError::bad(cmd, "not a valid SMPTE time"))?;
            Ok(Event::Meta(MetaMessage::SmpteOffset(time)))
        }
        "Sequence_number" => {
            let number = match cmd.args.is_empty() {
                true => None,
                false => Some(ranged(cmd, 0, 0xFFFF)? as u16),
            };
            Ok(Event::Meta(MetaMessage::TrackNumber(number)))
        }
        "Channel_prefix" => Ok(Event::Meta(MetaMessage::MidiChannel(u4::from(ranged(cmd, 0, 0x0F)? as u8)))),
        "MIDI_port" => Ok(Event::Meta(MetaMessage::MidiPort(seven(cmd, 0)?))),
        "Sequencer_specific" => Ok(Event::Bytes(Payload::Meta(META_SEQUENCER_SPECIFIC), payload(cmd, 0)?)),
        "Unknown_meta_event" => Ok(Event::Bytes(Payload::Meta(byte(cmd, 0)?), payload(cmd, 1)?)),
        "System_exclusive" => Ok(Event::Bytes(Payload::SysEx, payload(cmd, 0)?)),
        "System_exclusive_packet" => Ok(Event::Bytes(Payload::Escape, payload(cmd, 0)?)),
        other => Err(CodecError::bad(cmd, format!("unknown row kind `{other}`"))),
    }
}
