//! session.rs
//!
//! One song on its way through the pipeline: load, collect the questions,
//! apply the answers, export.
//!
//! Questions are collected from every stage before any answer is known, so
//! what a stage asks depends on the loaded song only. Answers are then
//! applied stage by stage in pipeline order; each stage sees the song as
//! the stages before it left it.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::codec;
use crate::command::{parse_rows, write_rows, TextEncoding};
use crate::filters::{self, Filter};
use crate::question::{Answer, Answers, Question};
use crate::render::Render;
use crate::stream::{CommandStream, ExportFormat};

/// Question whose answer already shows in the file extension.
const FORMAT_QUESTION: &str = "format";

pub struct Session {
    stream: CommandStream,
    filters: Vec<Box<dyn Filter>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self { stream: CommandStream::new(), filters: filters::pipeline() }
    }

    pub fn stream(&self) -> &CommandStream {
        &self.stream
    }

    /// Load row text, UTF-8 or Latin-1.
    pub fn load_rows(&mut self, bytes: &[u8]) -> Result<()> {
        let (text, encoding) = TextEncoding::decode(bytes);
        let commands = parse_rows(&text).context("parsing row text")?;
        debug!(rows = commands.len(), ?encoding, "loaded row text");
        self.stream.load(commands);
        self.stream.set_encoding(encoding);
        Ok(())
    }

    /// Load a Standard MIDI File.
    pub fn load_midi(&mut self, bytes: &[u8]) -> Result<()> {
        let commands = codec::decode(bytes).context("decoding MIDI file")?;
        debug!(rows = commands.len(), "loaded MIDI file");
        self.stream.load(commands);
        self.stream.set_encoding(TextEncoding::Utf8);
        Ok(())
    }

    /// Every stage's questions, in pipeline order.
    pub fn questions(&self) -> Result<Vec<Question>> {
        let mut questions = Vec::new();
        for filter in &self.filters {
            let asked = filter
                .questions(&self.stream)
                .with_context(|| format!("filter `{}` failed", filter.name()))?;
            questions.extend(asked);
        }
        Ok(questions)
    }

    /// Run every stage with the given answers.
    pub fn process(&mut self, answers: &[Answer]) -> Result<()> {
        let answers: Answers = answers.iter().collect();
        debug!(answers = answers.len(), "resolved answers");
        for filter in &self.filters {
            let before = self.stream.len();
            filter
                .apply(&mut self.stream, &answers)
                .with_context(|| format!("filter `{}` failed", filter.name()))?;
            let after = self.stream.len();
            info!(
                filter = filter.name(),
                rows = after,
                delta = after as i64 - before as i64,
                "applied"
            );
        }
        Ok(())
    }

    /// Format picked by the answers, MIDI unless told otherwise.
    pub fn export_format(&self) -> ExportFormat {
        self.stream.export_format()
    }

    /// Write the song. Audio goes through `renderer`, which is required for
    /// that format only.
    pub fn export<W: Write>(&self, format: ExportFormat, out: &mut W, renderer: Option<&dyn Render>) -> Result<()> {
        let commands = self.stream.commands();
        match format {
            ExportFormat::Rows => {
                write_rows(commands, self.stream.encoding(), out).context("writing row text")?;
            }
            ExportFormat::Midi => {
                let midi = codec::encode(commands).context("encoding MIDI file")?;
                out.write_all(&midi).context("writing MIDI file")?;
            }
            ExportFormat::Audio => {
                let renderer = renderer.context("audio export needs a soundfont")?;
                let midi = codec::encode(commands).context("encoding MIDI file")?;
                let wav = renderer.render(&midi).context("rendering audio")?;
                out.write_all(&wav).context("writing audio file")?;
            }
        }
        debug!(%format, content_type = format.content_type(), "exported");
        Ok(())
    }

    /// `<stem>_<id>=<value>+....<ext>` next to `input`, listing the answers
    /// that change something.
    pub fn suggested_file_name(&self, input: &Path, answers: &[Answer]) -> PathBuf {
        let mut chosen: Vec<&Answer> = answers
            .iter()
            .filter(|a| a.value.is_set() && a.id != FORMAT_QUESTION)
            .collect();
        chosen.sort();
        let settings = chosen.iter().map(|a| a.to_string()).collect::<Vec<_>>().join("+");
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        input.with_file_name(format!("{stem}_{settings}.{}", self.export_format().extension()))
    }
}
