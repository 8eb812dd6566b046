use std::io::{BufRead, Write};
use tracing::{debug, info};

use crate::adapter::{IndexedViewer, ViewError, ViewResponse};

pub struct Keybinding {
    pub key: &'static str,
    pub desc: &'static str,
}

pub const KEYBINDINGS: &[Keybinding] = &[
    Keybinding { key: "n", desc: "Show the next frame (also an empty line)." },
    Keybinding { key: "p", desc: "Show the previous frame." },
    Keybinding { key: "g <i>", desc: "Jump to frame i (negative counts from the end)." },
    Keybinding { key: "r", desc: "Show the current frame again." },
    Keybinding { key: "h", desc: "List keybindings." },
    Keybinding { key: "q", desc: "Quit." },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Prev,
    Goto(i64),
    Redraw,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            None | Some("n") => Command::Next,
            Some("p") => Command::Prev,
            Some("g") => Command::Goto(words.next()?.parse().ok()?),
            Some("r") => Command::Redraw,
            Some("h") => Command::Help,
            Some("q") => Command::Quit,
            Some(_) => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavigateError {
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn print_keybindings<W: Write>(out: &mut W) -> std::io::Result<()> {
    for binding in KEYBINDINGS {
        writeln!(out, "{:<10} {}", binding.key, binding.desc)?;
    }
    Ok(())
}

/// Drive `viewer` from line commands on `input`, describing each shown
/// frame on `out`. Returns the number of requests made.
///
/// Stops on `q` or end of input. Unknown commands are reported and ignored.
pub fn run<R: BufRead, W: Write>(
    viewer: &mut IndexedViewer,
    start_index: i64,
    input: R,
    mut out: W,
) -> Result<usize, NavigateError> {
    let mut current = show(viewer, start_index, &mut out)?;
    let mut requests = 1;

    for line in input.lines() {
        let line = line?;
        let Some(command) = Command::parse(&line) else {
            writeln!(out, "unknown command {:?}, h for help", line.trim())?;
            continue;
        };
        debug!(?command, current, "navigation command");

        let target = match command {
            Command::Next => current as i64 + 1,
            Command::Prev => current as i64 - 1,
            Command::Goto(index) => index,
            Command::Redraw => current as i64,
            Command::Help => {
                print_keybindings(&mut out)?;
                continue;
            }
            Command::Quit => break,
        };
        current = show(viewer, target, &mut out)?;
        requests += 1;
    }

    info!(requests, last_index = current, "viewer closed");
    Ok(requests)
}

fn show<W: Write>(viewer: &mut IndexedViewer, target: i64, out: &mut W) -> Result<usize, NavigateError> {
    let ViewResponse { index, images } = viewer.request(target)?;
    let sizes: Vec<String> = images
        .iter()
        .map(|img| format!("{}x{}", img.width(), img.height()))
        .collect();
    writeln!(out, "frame {index}: {}", sizes.join(" + "))?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mapped::MappedFileSource;
    use rawview_common::frame::FrameFormat;
    use std::io::Cursor;

    fn viewer_with_frames(count: usize) -> (IndexedViewer, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0x80u8; count * 8]).unwrap();
        file.flush().unwrap();
        let format = FrameFormat::new(2, 2).unwrap();
        let source = MappedFileSource::open(file.path(), format).unwrap();
        (IndexedViewer::new(Box::new(source)), file)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(""), Some(Command::Next));
        assert_eq!(Command::parse("n"), Some(Command::Next));
        assert_eq!(Command::parse(" p "), Some(Command::Prev));
        assert_eq!(Command::parse("g -3"), Some(Command::Goto(-3)));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("g"), None);
        assert_eq!(Command::parse("g x"), None);
        assert_eq!(Command::parse("n 2"), None);
        assert_eq!(Command::parse("zoom"), None);
    }

    #[test]
    fn navigation_wraps_both_ways() {
        let (mut viewer, _file) = viewer_with_frames(3);
        let mut out = Vec::new();
        let requests = run(&mut viewer, 0, Cursor::new("p\nn\nn\nn\nn\nq\nn\n"), &mut out).unwrap();

        assert_eq!(requests, 6);
        let shown: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| l.split(':').next().unwrap().to_string())
            .collect();
        assert_eq!(
            shown,
            vec!["frame 0", "frame 2", "frame 0", "frame 1", "frame 2", "frame 0"]
        );
    }

    #[test]
    fn start_index_and_goto_are_wrapped() {
        let (mut viewer, _file) = viewer_with_frames(4);
        let mut out = Vec::new();
        run(&mut viewer, -1, Cursor::new("g 9\nr\n"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "frame 3: 2x2\nframe 0: 2x2\nframe 0: 2x2\n");
    }

    #[test]
    fn help_and_unknown_commands_do_not_request() {
        let (mut viewer, _file) = viewer_with_frames(2);
        let mut out = Vec::new();
        let requests = run(&mut viewer, 0, Cursor::new("h\nwat\n"), &mut out).unwrap();
        assert_eq!(requests, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("List keybindings."));
        assert!(text.contains("unknown command \"wat\""));
    }
}
