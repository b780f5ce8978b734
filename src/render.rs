//! render.rs
//!
//! Offline audio rendering of a MIDI file.
//!
//! The file is flattened into a timeline of channel messages stamped with
//! absolute microseconds, fed to a FluidLite synth loaded with a General
//! MIDI SoundFont, and the synth output between two events is pulled in one
//! go. No sound device is involved; the result is a 16-bit stereo WAV file.
//!
//! ### Timing
//! MIDI positions are ticks. With a metrical division the length of a tick
//! follows the Tempo meta events (microseconds per quarter note, 500000 when
//! none is given); tempo changes apply to every track, whichever track
//! carries them. With an SMPTE division a tick is a fixed fraction of a
//! second and tempo is ignored.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use fluidlite::{Settings, Synth};
use hound::{SampleFormat, WavSpec, WavWriter};
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::{debug, info};

/// Turns a MIDI file into audio file bytes.
pub trait Render {
    fn render(&self, midi: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub sample_rate: u32,
    /// Silence rendered after the last event so notes can ring out.
    pub tail: Duration,
    /// FluidLite master gain.
    pub gain: f32,
    /// Peak level after normalization, 1.0 being full scale.
    pub headroom: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { sample_rate: 44_100, tail: Duration::from_secs(2), gain: 0.7, headroom: 0.89 }
    }
}

/// A channel message, reduced to what the synth takes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Msg {
    NoteOn(u8, u8, u8),
    NoteOff(u8, u8),
    Program(u8, u8),
    Control(u8, u8, u8),
    /// 0..16383, centered at 8192.
    PitchBend(u8, u16),
    AfterTouch(u8, u8, u8),
    ChannelAftertouch(u8, u8),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timed {
    pub t_us: u64,
    pub msg: Msg,
}

pub struct Timeline {
    /// All tracks merged, ordered by time.
    pub events: Vec<Timed>,
    pub last_t_us: u64,
}

const DEFAULT_US_PER_QN: f64 = 500_000.0;

#[derive(Clone, Copy)]
struct Segment {
    tick: u64,
    us: f64,
    us_per_tick: f64,
}

/// Ticks to microseconds, piecewise linear between tempo changes.
struct TempoMap {
    segments: Vec<Segment>,
}

impl TempoMap {
    fn new(smf: &Smf<'_>) -> Self {
        let ppq = match smf.header.timing {
            Timing::Metrical(ticks) => f64::from(ticks.as_int().max(1)),
            Timing::Timecode(fps, per_frame) => {
                let ticks_per_second = fps_value(fps) * f64::from(per_frame.max(1));
                let segment = Segment { tick: 0, us: 0.0, us_per_tick: 1_000_000.0 / ticks_per_second };
                return Self { segments: vec![segment] };
            }
        };

        let mut changes = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for ev in track {
                tick += u64::from(ev.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = ev.kind {
                    changes.push((tick, f64::from(tempo.as_int())));
                }
            }
        }
        changes.sort_by_key(|(tick, _)| *tick);

        let mut current = Segment { tick: 0, us: 0.0, us_per_tick: DEFAULT_US_PER_QN / ppq };
        let mut segments = vec![current];
        for (tick, us_per_qn) in changes {
            current = Segment {
                tick,
                us: current.us + (tick - current.tick) as f64 * current.us_per_tick,
                us_per_tick: us_per_qn / ppq,
            };
            segments.push(current);
        }
        Self { segments }
    }

    fn micros(&self, tick: u64) -> u64 {
        let i = self.segments.partition_point(|s| s.tick <= tick).saturating_sub(1);
        let s = self.segments[i];
        (s.us + (tick - s.tick) as f64 * s.us_per_tick).round() as u64
    }
}

fn fps_value(fps: Fps) -> f64 {
    match fps {
        Fps::Fps24 => 24.0,
        Fps::Fps25 => 25.0,
        Fps::Fps29 => 29.97,
        Fps::Fps30 => 30.0,
    }
}

/// Flatten every track into one chronological list of channel messages.
/// A Note On with velocity 0 becomes a Note Off.
pub fn build_timeline(smf: &Smf<'_>) -> Timeline {
    let tempo = TempoMap::new(smf);
    let mut events = Vec::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        for ev in track {
            tick += u64::from(ev.delta.as_int());
            let TrackEventKind::Midi { channel, message } = ev.kind else {
                continue;
            };
            let ch = channel.as_int();
            let msg = match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Msg::NoteOff(ch, key.as_int()),
                MidiMessage::NoteOn { key, vel } => Msg::NoteOn(ch, key.as_int(), vel.as_int()),
                MidiMessage::NoteOff { key, .. } => Msg::NoteOff(ch, key.as_int()),
                MidiMessage::ProgramChange { program } => Msg::Program(ch, program.as_int()),
                MidiMessage::Controller { controller, value } => Msg::Control(ch, controller.as_int(), value.as_int()),
                MidiMessage::PitchBend { bend } => Msg::PitchBend(ch, bend.0.as_int()),
                MidiMessage::Aftertouch { key, vel } => Msg::AfterTouch(ch, key.as_int(), vel.as_int()),
                MidiMessage::ChannelAftertouch { vel } => Msg::ChannelAftertouch(ch, vel.as_int()),
            };
            events.push(Timed { t_us: tempo.micros(tick), msg });
        }
    }

    // Stable, so events at the same instant keep their track order.
    events.sort_by_key(|e| e.t_us);
    let last_t_us = events.last().map(|e| e.t_us).unwrap_or(0);
    Timeline { events, last_t_us }
}

/// Format a microsecond timestamp as MM:SS.
pub fn format_duration(us: u64) -> String {
    let total_secs = us / 1_000_000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// FluidLite renderer for one SoundFont.
pub struct Renderer {
    soundfont: PathBuf,
    config: RenderConfig,
}

impl Renderer {
    pub fn new(soundfont: impl Into<PathBuf>, config: RenderConfig) -> Self {
        Self { soundfont: soundfont.into(), config }
    }

    fn synth(&self) -> Result<Synth> {
        let path = self
            .soundfont
            .to_str()
            .with_context(|| format!("soundfont path {} is not UTF-8", self.soundfont.display()))?;
        let settings = Settings::new()?;
        let synth = Synth::new(settings)?;
        synth.sfload(path, true).with_context(|| format!("loading soundfont {path}"))?;
        synth.set_sample_rate(self.config.sample_rate as f32);
        synth.set_gain(self.config.gain);
        for ch in 0..16u32 {
            let _ = synth.pitch_bend(ch, 8192);
            let _ = synth.cc(ch, 121, 0); // reset all controllers
        }
        Ok(synth)
    }

    /// Interleaved stereo samples for the whole timeline plus the tail.
    fn synthesize(&self, timeline: &Timeline) -> Result<Vec<f32>> {
        let synth = self.synth()?;
        let rate = u64::from(self.config.sample_rate);
        let frame_at = |t_us: u64| t_us * rate / 1_000_000;

        let mut samples = Vec::new();
        let mut pull = |frames: u64| -> Result<()> {
            if frames == 0 {
                return Ok(());
            }
            let start = samples.len();
            samples.resize(start + frames as usize * 2, 0.0f32);
            synth.write(&mut samples[start..]).context("synthesizing audio")
        };

        let mut done = 0u64;
        for ev in &timeline.events {
            let frame = frame_at(ev.t_us);
            pull(frame.saturating_sub(done))?;
            done = done.max(frame);
            let ch = |c: u8| u32::from(c);
            let _ = match ev.msg {
                Msg::NoteOn(c, key, vel) => synth.note_on(ch(c), key.into(), vel.into()),
                Msg::NoteOff(c, key) => synth.note_off(ch(c), key.into()),
                Msg::Program(c, program) => synth.program_change(ch(c), program.into()),
                Msg::Control(c, controller, value) => synth.cc(ch(c), controller.into(), value.into()),
                Msg::PitchBend(c, bend) => synth.pitch_bend(ch(c), bend.into()),
                Msg::AfterTouch(c, key, vel) => synth.key_pressure(ch(c), key.into(), vel.into()),
                Msg::ChannelAftertouch(c, vel) => synth.channel_pressure(ch(c), vel.into()),
            };
        }
        let tail_us = u64::try_from(self.config.tail.as_micros()).unwrap_or(u64::MAX);
        let end = frame_at(timeline.last_t_us.saturating_add(tail_us));
        pull(end.saturating_sub(done))?;
        Ok(samples)
    }
}

impl Render for Renderer {
    fn render(&self, midi: &[u8]) -> Result<Vec<u8>> {
        if !self.soundfont.is_file() {
            bail!("soundfont {} not found", self.soundfont.display());
        }
        let smf = Smf::parse(midi).map_err(|e| anyhow!("parsing MIDI for rendering: {e}"))?;
        let timeline = build_timeline(&smf);
        debug!(events = timeline.events.len(), "built timeline");

        let mut samples = self.synthesize(&timeline)?;
        let gain = normalize(&mut samples, self.config.headroom);
        info!(
            duration = %format_duration(timeline.last_t_us),
            gain,
            soundfont = %self.soundfont.display(),
            "rendered audio"
        );

        write_wav(self.config.sample_rate, &samples).context("writing WAV")
    }
}

/// Scale so the loudest sample sits at `headroom`. Returns the gain applied;
/// silence is left alone.
pub fn normalize(samples: &mut [f32], headroom: f32) -> f32 {
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak <= f32::EPSILON {
        return 1.0;
    }
    let gain = headroom / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
    gain
}

/// 16-bit PCM stereo RIFF/WAVE from interleaved samples in -1.0..=1.0.
pub fn write_wav(sample_rate: u32, samples: &[f32]) -> hound::Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
