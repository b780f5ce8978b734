//! cleanup.rs
//!
//! Note-pairing repair. Runs on every song, unasked.

use std::collections::HashSet;

use tracing::debug;

use super::{Filter, FilterError};
use crate::command::{Command, Kind};
use crate::question::{Answers, Question};
use crate::stream::CommandStream;

/// Makes sure a note is never started twice without a stop in between.
///
/// A `Note_on_c` for a (channel, note) that is still sounding gets a
/// `Note_off_c` at the same position right before it. Stray offs are left
/// alone, and notes still open at the end of a track are accepted.
pub struct Cleanup;

impl Filter for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn questions(&self, _stream: &CommandStream) -> Result<Vec<Question>, FilterError> {
        Ok(Vec::new())
    }

    fn apply(&self, stream: &mut CommandStream, _answers: &Answers) -> Result<(), FilterError> {
        let mut inserts = Vec::new();
        let mut track = None;
        let mut open: HashSet<(&str, &str)> = HashSet::new();

        for (i, cmd) in stream.commands().iter().enumerate() {
            if track != Some(cmd.track) {
                open.clear();
                track = Some(cmd.track);
            }
            match cmd.kind {
                Kind::NoteOffC => {
                    open.remove(&cmd.note_key()?);
                }
                Kind::NoteOnC if cmd.int_arg(2)? == 0 => {
                    open.remove(&cmd.note_key()?);
                }
                Kind::NoteOnC => {
                    let key = cmd.note_key()?;
                    if !open.insert(key) {
                        let (channel, note) = key;
                        inserts.push((
                            i,
                            Command::new(cmd.track, cmd.position, Kind::NoteOffC, [channel, note, "0"]),
                        ));
                    }
                }
                _ => {}
            }
        }

        debug!(closed = inserts.len(), "closing re-started notes");
        stream.insert_all(inserts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{rows, stream};

    const OVERLAP: &str = "\
1, 0, Start_track
1, 0, Note_on_c, 0, 60, 90
1, 100, Note_on_c, 0, 60, 90
1, 100, Note_on_c, 1, 60, 90
1, 200, Note_off_c, 0, 60, 0
1, 200, Note_on_c, 0, 60, 90
1, 300, End_track
2, 0, Start_track
2, 0, Note_on_c, 0, 60, 90
2, 50, Note_on_c, 0, 60, 0
2, 60, Note_on_c, 0, 60, 90
2, 70, Note_off_c, 0, 61, 0
2, 80, End_track
";

    #[test]
    fn inserts_off_before_restarted_note() {
        let mut s = stream(OVERLAP);
        Cleanup.apply(&mut s, &Answers::default()).unwrap();
        assert_eq!(
            rows(&s),
            vec![
                "1, 0, Start_track",
                "1, 0, Note_on_c, 0, 60, 90",
                "1, 100, Note_off_c, 0, 60, 0",
                "1, 100, Note_on_c, 0, 60, 90",
                "1, 100, Note_on_c, 1, 60, 90",
                "1, 200, Note_off_c, 0, 60, 0",
                "1, 200, Note_on_c, 0, 60, 90",
                "1, 300, End_track",
                "2, 0, Start_track",
                "2, 0, Note_on_c, 0, 60, 90",
                "2, 50, Note_on_c, 0, 60, 0",
                "2, 60, Note_on_c, 0, 60, 90",
                "2, 70, Note_off_c, 0, 61, 0",
                "2, 80, End_track",
            ]
        );
    }

    #[test]
    fn open_notes_do_not_leak_across_tracks() {
        let mut s = stream(
            "1, 0, Note_on_c, 0, 60, 90\n1, 10, End_track\n2, 0, Note_on_c, 0, 60, 90\n",
        );
        Cleanup.apply(&mut s, &Answers::default()).unwrap();
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn running_twice_changes_nothing_more() {
        let mut s = stream(OVERLAP);
        Cleanup.apply(&mut s, &Answers::default()).unwrap();
        let once = rows(&s);
        Cleanup.apply(&mut s, &Answers::default()).unwrap();
        assert_eq!(rows(&s), once);
    }

    #[test]
    fn malformed_note_is_an_error() {
        let mut s = stream("1, 0, Note_on_c, 0\n");
        assert!(matches!(
            Cleanup.apply(&mut s, &Answers::default()),
            Err(FilterError::Row(_))
        ));
    }
}
