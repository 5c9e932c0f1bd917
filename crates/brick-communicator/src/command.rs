//! Text commands accepted on the command socket.
//!
//! Prefixes are checked in a fixed order and matched literally, without
//! trimming:
//!
//! | Order | Input | Command |
//! |---|---|---|
//! | 1 | `keepalive…` | [`Command::Keepalive`] |
//! | 2 | `file:<name>:<contents>` | [`Command::WriteFile`] |
//! | 3 | `run:<path>` | [`Command::RunFile`] |
//! | 4 | `stop` (exactly) | [`Command::Stop`] |
//! | 5 | `direct:<code>` | [`Command::RunDirect`] |
//! | 6 | anything else | [`Command::Unknown`] |

use brick_types::BrickError;

const KEEPALIVE: &str = "keepalive";
const FILE: &str = "file:";
const RUN: &str = "run:";
const STOP: &str = "stop";
const DIRECT: &str = "direct:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Keepalive,
    WriteFile { name: String, contents: String },
    RunFile { path: String },
    Stop,
    RunDirect { code: String },
    Unknown,
}

impl Command {
    /// Decode one received message.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Protocol`] for a `file:` command with no
    /// separator between name and contents.
    pub fn parse(raw: &str) -> Result<Self, BrickError> {
        if raw.starts_with(KEEPALIVE) {
            return Ok(Command::Keepalive);
        }
        if let Some(rest) = raw.strip_prefix(FILE) {
            let (name, contents) = rest.split_once(':').ok_or_else(|| {
                BrickError::Protocol(format!("malformed 'file' command: missing ':' after name in {rest:?}"))
            })?;
            return Ok(Command::WriteFile {
                name: name.to_string(),
                contents: contents.to_string(),
            });
        }
        if let Some(path) = raw.strip_prefix(RUN) {
            return Ok(Command::RunFile {
                path: path.to_string(),
            });
        }
        if raw == STOP {
            return Ok(Command::Stop);
        }
        if let Some(code) = raw.strip_prefix(DIRECT) {
            return Ok(Command::RunDirect {
                code: code.to_string(),
            });
        }
        Ok(Command::Unknown)
    }

    /// Whether this is a heartbeat, which is kept out of normal logs.
    pub fn is_keepalive(&self) -> bool {
        matches!(self, Command::Keepalive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_command_splits_at_first_colon() {
        assert_eq!(
            Command::parse("file:foo.txt:hello").unwrap(),
            Command::WriteFile {
                name: "foo.txt".to_string(),
                contents: "hello".to_string()
            }
        );
        assert_eq!(
            Command::parse("file:a.js:var x = {a: 1};").unwrap(),
            Command::WriteFile {
                name: "a.js".to_string(),
                contents: "var x = {a: 1};".to_string()
            }
        );
    }

    #[test]
    fn file_command_without_separator_is_malformed() {
        assert!(matches!(
            Command::parse("file:foo.txt"),
            Err(BrickError::Protocol(_))
        ));
    }

    #[test]
    fn prefixes_follow_precedence() {
        assert_eq!(Command::parse("keepalive").unwrap(), Command::Keepalive);
        assert_eq!(Command::parse("keepalive:file:x:y").unwrap(), Command::Keepalive);
        assert_eq!(
            Command::parse("run:foo.js").unwrap(),
            Command::RunFile {
                path: "foo.js".to_string()
            }
        );
        assert_eq!(
            Command::parse("direct:brick.stop()").unwrap(),
            Command::RunDirect {
                code: "brick.stop()".to_string()
            }
        );
        assert_eq!(Command::parse("stop").unwrap(), Command::Stop);
    }

    #[test]
    fn stop_must_match_exactly() {
        assert_eq!(Command::parse("stop\n").unwrap(), Command::Unknown);
        assert_eq!(Command::parse("stopped").unwrap(), Command::Unknown);
        assert_eq!(Command::parse("").unwrap(), Command::Unknown);
        assert_eq!(Command::parse("runfoo").unwrap(), Command::Unknown);
    }
}
