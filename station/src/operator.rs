//! Operator console input.
//!
//! One command per line:
//!
//! | Line          | Command                          |
//! |---------------|----------------------------------|
//! | `p`           | pause (laser off, pattern off)   |
//! | `r`           | resume into SEARCH               |
//! | `q`           | quit and run teardown            |
//! | `c <session>` | swap in a stored calibration     |

use std::io::BufRead;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Pause,
    Resume,
    Quit,
    LoadCalibration(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}' (expected p, r, q or c <session>)")]
    Unknown(String),
    #[error("'c' needs a session name")]
    MissingSession,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "p" | "pause" => OperatorCommand::Pause,
        "r" | "resume" => OperatorCommand::Resume,
        "q" | "quit" => OperatorCommand::Quit,
        "c" | "calibration" => match words.next() {
            Some(name) => OperatorCommand::LoadCalibration(name.to_string()),
            None => return Err(ParseError::MissingSession),
        },
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Read commands from `reader` on a thread and forward them to the control loop.
///
/// The thread ends at end of input or once the control loop has gone away.
/// End of input does not quit the sentry; it may be running without a console.
pub fn spawn_operator_input<R>(
    reader: R,
    commands: UnboundedSender<OperatorCommand>,
) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Operator input read failed: {}", e);
                        break;
                    }
                };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        info!("Operator command: {:?}", command);
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            debug!("Operator input closed");
        })
}
