//! Operator commands read line by line (stdin in the binary):
//!
//! ```text
//! resize 1024 300
//! set {"palette": "inferno", "log_frequency": true}
//! capture out.png
//! quit
//! ```

use crate::config::ConfigUpdate;
use crate::coordinator::ControlMessage;
use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
pub enum Command {
    Resize { width: usize, height: usize },
    Set(ConfigUpdate),
    Capture(PathBuf),
    Quit,
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match verb {
        "resize" => {
            let mut dims = rest.split_whitespace().map(str::parse::<usize>);
            match (dims.next(), dims.next(), dims.next()) {
                (Some(Ok(width)), Some(Ok(height)), None) => {
                    Ok(Some(Command::Resize { width, height }))
                }
                _ => Err(format!("usage: resize WIDTH HEIGHT (got \"{}\")", rest)),
            }
        }
        "set" => {
            let (update, errors) = ConfigUpdate::from_json(rest);
            for e in &errors {
                warn!("set: {}", e);
            }
            if update.is_empty() && !errors.is_empty() {
                return Err("no recognized fields in update".into());
            }
            Ok(Some(Command::Set(update)))
        }
        "capture" if !rest.is_empty() => Ok(Some(Command::Capture(PathBuf::from(rest)))),
        "capture" => Err("usage: capture PATH".into()),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        other => Err(format!("unknown command \"{}\"", other)),
    }
}

/// Forward commands from `input` until EOF or `quit`.
pub fn run<R: BufRead>(input: R, control_tx: Sender<ControlMessage>) {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Control input error: {}", e);
                break;
            }
        };
        let cmd = match parse_command(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        let quit = cmd == Command::Quit;
        if !dispatch(cmd, &control_tx) || quit {
            break;
        }
    }
    info!("Control input closed");
}

/// Returns false once the coordinator is gone.
fn dispatch(cmd: Command, control_tx: &Sender<ControlMessage>) -> bool {
    let msg = match cmd {
        Command::Resize { width, height } => ControlMessage::Resize { width, height },
        Command::Set(update) => ControlMessage::Update(update),
        Command::Quit => ControlMessage::Stop,
        Command::Capture(path) => {
            let (reply_tx, reply_rx) = bounded(1);
            if control_tx.send(ControlMessage::Capture(reply_tx)).is_err() {
                return false;
            }
            match reply_rx.recv_timeout(CAPTURE_TIMEOUT) {
                Ok(capture) => match capture.save_png(&path) {
                    Ok(()) => info!(
                        "Captured {}x{} raster to {:?}",
                        capture.width, capture.height, path
                    ),
                    Err(e) => error!("Capture failed: {}", e),
                },
                Err(e) => error!("Capture timed out: {}", e),
            }
            return true;
        }
    };
    control_tx.send(msg).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::ColorScheme;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    #[test]
    fn test_parse_resize() {
        assert_eq!(
            parse_command("resize 640 240").unwrap(),
            Some(Command::Resize { width: 640, height: 240 })
        );
        assert!(parse_command("resize 640").is_err());
        assert!(parse_command("resize a b").is_err());
    }

    #[test]
    fn test_parse_set() {
        match parse_command(r#"set {"palette":"viridis"}"#).unwrap() {
            Some(Command::Set(u)) => assert_eq!(u.palette, Some(ColorScheme::Viridis)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_command(r#"set {"bogus": 1}"#).is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_command("capture shot.png").unwrap(),
            Some(Command::Capture("shot.png".into()))
        );
        assert!(parse_command("capture").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_run_forwards_until_quit() {
        let (tx, rx) = unbounded();
        let input = Cursor::new("resize 10 20\nnonsense\nquit\nresize 1 1\n");
        run(input, tx);
        let msgs: Vec<ControlMessage> = rx.try_iter().collect();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], ControlMessage::Resize { width: 10, height: 20 }));
        assert!(matches!(msgs[1], ControlMessage::Stop));
    }
}
