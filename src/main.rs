use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::tty::IsTty;
use std::{
    fs,
    io::{stdin, stdout},
    path::{Path, PathBuf},
};
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

mod codec;
mod command;
mod filters;
mod question;
mod render;
mod session;
mod stream;
mod wizard;

use question::{Answer, Question};
use render::{Render, RenderConfig, Renderer};
use session::Session;
use stream::ExportFormat;
use wizard::{PresetWizard, TerminalWizard, Wizard};

/// Rework a MIDI song for choir practice: highlight a voice, drop chords,
/// add a metronome, swap instruments.
#[derive(Parser, Debug)]
#[command(name = "harmony-helper", version)]
struct Opt {
    /// MIDI file (.mid) or row text (.csv) to rework
    input: PathBuf,
    /// Where to write the result; its extension (mid, csv, wav) picks the format
    output: Option<PathBuf>,
    /// Pre-answer a question, e.g. `-a metronome=1`
    #[arg(short, long = "answer", value_name = "ID=VALUE")]
    answers: Vec<Answer>,
    /// Take the first choice for every question not answered with -a
    #[arg(long)]
    defaults: bool,
    /// General MIDI SoundFont (.sf2), needed for wav output
    #[arg(long, env = "HARMONY_SOUNDFONT")]
    soundfont: Option<PathBuf>,
    /// Print the questions for the input and exit
    #[arg(long)]
    list: bool,
    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(default.into()).from_env_lossy())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_questions(questions: &[Question]) {
    for q in questions {
        println!("{}", q.prompt);
        for (i, choice) in q.choices.iter().enumerate() {
            println!("  {}. {}  [-a {}={}]", i + 1, choice.label, q.id, choice.value);
        }
    }
}

/// Export in memory first, so a failed export leaves no file behind.
fn write_output(
    session: &Session,
    format: ExportFormat,
    output: &Path,
    renderer: Option<&dyn Render>,
) -> Result<()> {
    let mut encoded = Vec::new();
    session.export(format, &mut encoded, renderer)?;
    println!("Writing file {}", output.display());
    fs::write(output, &encoded).with_context(|| format!("writing {}", output.display()))
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose);

    println!("Reading file {}", opt.input.display());
    let bytes = fs::read(&opt.input).with_context(|| format!("reading {}", opt.input.display()))?;

    // Format detector
    let mut session = Session::new();
    if bytes.starts_with(b"MThd") {
        debug!("input is a Standard MIDI File");
        session.load_midi(&bytes)?;
    } else {
        debug!("input is row text");
        session.load_rows(&bytes)?;
    }

    debug!(rows = session.stream().len(), tracks = session.stream().tracks().len(), "loaded");

    let questions = session.questions()?;
    if opt.list {
        print_questions(&questions);
        return Ok(());
    }

    let fallback: Option<Box<dyn Wizard>> = if opt.defaults {
        None
    } else {
        let styled = stdout().is_tty();
        Some(Box::new(TerminalWizard::new(stdin().lock(), stdout()).styled(styled)))
    };
    let answers = PresetWizard::new(opt.answers, fallback).ask(&questions)?;
    if !stdin().is_tty() {
        println!("Answers given:");
        for answer in &answers {
            println!("- {answer}");
        }
    }

    println!("Processing file {}", opt.input.display());
    session.process(&answers)?;

    let (format, output) = match opt.output {
        Some(path) => {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let Ok(format) = ext.parse::<ExportFormat>() else {
                bail!("cannot tell the output format of {} (use .mid, .csv or .wav)", path.display());
            };
            (format, path)
        }
        None => (session.export_format(), session.suggested_file_name(&opt.input, &answers)),
    };

    let renderer = opt.soundfont.map(|sf| Renderer::new(sf, RenderConfig::default()));
    if format == ExportFormat::Audio && renderer.is_none() {
        bail!("wav output needs a SoundFont: pass --soundfont or set HARMONY_SOUNDFONT");
    }

    write_output(&session, format, &output, renderer.as_ref().map(|r| r as &dyn Render))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const SONG: &[u8] = b"0, 0, Header, 1, 1, 96\n1, 0, Start_track\n1, 0, End_track\n0, 0, End_of_file\n";

    #[test]
    fn command_line_parses() {
        let opt = Opt::try_parse_from([
            "harmony-helper",
            "song.mid",
            "out.csv",
            "-a",
            "metronome=1",
            "--answer",
            "chord_tone=2-1",
            "--defaults",
        ])
        .unwrap();
        assert_eq!(opt.output, Some(PathBuf::from("out.csv")));
        assert_eq!(opt.answers, vec![Answer::new("metronome", 1), Answer::new("chord_tone", "2-1")]);
        assert!(opt.defaults && !opt.list);
    }

    #[test]
    fn answer_without_value_is_rejected() {
        assert!(Opt::try_parse_from(["harmony-helper", "song.mid", "-a", "metronome"]).is_err());
    }

    #[test]
    fn row_text_file_is_not_sniffed_as_midi() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SONG).unwrap();
        let bytes = fs::read(file.path()).unwrap();
        assert!(!bytes.starts_with(b"MThd"));

        let mut session = Session::new();
        session.load_rows(&bytes).unwrap();
        assert_eq!(session.stream().len(), 4);
    }

    #[test]
    fn failed_export_leaves_no_file() {
        let mut session = Session::new();
        session.load_rows(SONG).unwrap();
        let dir = tempdir().unwrap();

        let wav = dir.path().join("song.wav");
        assert!(write_output(&session, ExportFormat::Audio, &wav, None).is_err());
        assert!(!wav.exists());

        let csv = dir.path().join("song.csv");
        write_output(&session, ExportFormat::Rows, &csv, None).unwrap();
        assert_eq!(fs::read(&csv).unwrap(), SONG);
    }
}
