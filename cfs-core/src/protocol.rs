//! Session control protocol.
//!
//! One command per line:
//!
//! ```text
//! init <container>
//! start <path> [param]
//! pause
//! resume
//! stop
//! done
//! ```
//!
//! `param` is the recording duration in seconds; a negative value means no
//! limit. `done` flows the other way, from a recorder or player to its
//! controller, once a session ends on its own.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::{CfsError, CfsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Init(String),
    Start { path: String, param: Option<u64> },
    Pause,
    Resume,
    Stop,
    Done,
}

impl ControlCommand {
    pub fn parse(line: &str) -> CfsResult<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CfsError::InvalidCommand("empty command".to_string()));
        };

        let command = match verb {
            "init" => {
                let name = words
                    .next()
                    .ok_or_else(|| CfsError::InvalidCommand("init needs a container name".to_string()))?;
                Self::Init(name.to_string())
            }
            "start" => {
                let path = words
                    .next()
                    .ok_or_else(|| CfsError::InvalidCommand("start needs a path".to_string()))?;
                let param = match words.next() {
                    None => None,
                    Some(token) => {
                        let value: i64 = token.parse().map_err(|_| {
                            CfsError::InvalidCommand(format!("invalid time specified '{}'", token))
                        })?;
                        u64::try_from(value).ok()
                    }
                };
                Self::Start {
                    path: path.to_string(),
                    param,
                }
            }
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "done" => Self::Done,
            other => return Err(CfsError::InvalidCommand(format!("unknown command '{}'", other))),
        };

        if let Some(extra) = words.next() {
            return Err(CfsError::InvalidCommand(format!(
                "unexpected argument '{}' to {}",
                extra, verb
            )));
        }
        Ok(command)
    }
}

impl FromStr for ControlCommand {
    type Err = CfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(name) => write!(f, "init {}", name),
            Self::Start { path, param: Some(p) } => write!(f, "start {} {}", path, p),
            Self::Start { path, param: None } => write!(f, "start {}", path),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Stop => write!(f, "stop"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Lifecycle shared by recorder and player sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No container announced yet.
    #[default]
    Nothing,
    /// Idle and ready to start.
    Init,
    Started,
    Paused,
    Finished,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Paused)
    }
}

/// Elapsed-time counter that only runs while started.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    banked: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.banked += now.saturating_duration_since(since);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.banked
            + self
                .running_since
                .map(|since| now.saturating_duration_since(since))
                .unwrap_or_default()
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        u64::try_from(self.elapsed(now).as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ControlCommand::parse("init store.cfs").unwrap(),
            ControlCommand::Init("store.cfs".to_string())
        );
        assert_eq!(
            ControlCommand::parse("start /FV0/clip 5\n").unwrap(),
            ControlCommand::Start {
                path: "/FV0/clip".to_string(),
                param: Some(5)
            }
        );
        assert_eq!(
            ControlCommand::parse("start /FV0/clip -1").unwrap(),
            ControlCommand::Start {
                path: "/FV0/clip".to_string(),
                param: None
            }
        );
        assert_eq!(ControlCommand::parse("pause").unwrap(), ControlCommand::Pause);
        assert_eq!("done".parse::<ControlCommand>().unwrap(), ControlCommand::Done);
    }

    #[test]
    fn test_parse_rejects() {
        for line in ["", "jump", "init", "start", "start /FV0/x soon", "pause now"] {
            assert!(
                matches!(ControlCommand::parse(line), Err(CfsError::InvalidCommand(_))),
                "{:?}",
                line
            );
        }
    }

    #[test]
    fn test_display_parses_back() {
        let commands = [
            ControlCommand::Init("a.cfs".to_string()),
            ControlCommand::Start {
                path: "/FV1/d/f".to_string(),
                param: Some(30),
            },
            ControlCommand::Start {
                path: "/FV1/f".to_string(),
                param: None,
            },
            ControlCommand::Resume,
            ControlCommand::Stop,
        ];
        for command in commands {
            assert_eq!(ControlCommand::parse(&command.to_string()).unwrap(), command);
        }
    }

    #[test]
    fn test_stopwatch_holds_while_paused() {
        let t0 = Instant::now();
        let mut watch = Stopwatch::default();
        watch.start(t0);
        watch.pause(t0 + Duration::from_millis(300));
        assert_eq!(watch.elapsed_ms(t0 + Duration::from_secs(10)), 300);
        watch.start(t0 + Duration::from_secs(10));
        assert_eq!(watch.elapsed_ms(t0 + Duration::from_millis(10_200)), 500);
        watch.reset();
        assert_eq!(watch.elapsed_ms(t0 + Duration::from_secs(20)), 0);
    }
}
