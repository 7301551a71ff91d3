//! Playback sessions: step through a file's frames in order.

use std::fmt;
use std::time::Instant;

use log::info;

use crate::error::{CfsError, CfsResult};
use crate::frame::Frame;
use crate::protocol::{ControlCommand, SessionState, Stopwatch};
use crate::session::Cfs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub path: String,
    pub frames: usize,
    pub elapsed_ms: u64,
}

impl fmt::Display for PlaybackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Finished playing {} and ran for {}ms",
            self.path, self.elapsed_ms
        )
    }
}

/// One step of playback.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackStep {
    Frame { number: usize, frame: Frame },
    /// Paused or not started.
    Idle,
    Finished(PlaybackSummary),
}

pub struct Player {
    cfs: Cfs,
    state: SessionState,
    path: Option<String>,
    played: usize,
    total: usize,
    clock: Stopwatch,
}

impl Player {
    pub fn new(cfs: Cfs) -> Self {
        Self {
            cfs,
            state: SessionState::Nothing,
            path: None,
            played: 0,
            total: 0,
            clock: Stopwatch::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames played so far and frames in the file.
    pub fn progress(&self) -> (usize, usize) {
        (self.played, self.total)
    }

    pub fn handle(&mut self, command: ControlCommand) -> CfsResult<Option<PlaybackSummary>> {
        self.handle_at(command, Instant::now())
    }

    pub fn handle_at(
        &mut self,
        command: ControlCommand,
        now: Instant,
    ) -> CfsResult<Option<PlaybackSummary>> {
        match (command, self.state) {
            (ControlCommand::Init(_), state) if !state.is_active() => {
                self.state = SessionState::Init;
                Ok(None)
            }
            (ControlCommand::Start { .. }, SessionState::Nothing) => Err(CfsError::NotMounted),
            (ControlCommand::Start { path, .. }, SessionState::Init | SessionState::Finished) => {
                let total = self.cfs.size(&path)?;
                let resolved = self.cfs.resolve(&path)?.to_string();
                info!("playing {} ({} frames)", resolved, total);
                self.path = Some(resolved);
                self.played = 0;
                self.total = total;
                self.clock.reset();
                self.clock.start(now);
                self.state = SessionState::Started;
                Ok(None)
            }
            (ControlCommand::Pause, SessionState::Started) => {
                self.clock.pause(now);
                self.state = SessionState::Paused;
                Ok(None)
            }
            (ControlCommand::Resume, SessionState::Started) => Ok(None),
            (ControlCommand::Resume, SessionState::Paused) => {
                self.clock.start(now);
                self.state = SessionState::Started;
                Ok(None)
            }
            (ControlCommand::Stop, state) if state.is_active() => {
                let summary = self.summary(now);
                self.clock.reset();
                self.state = SessionState::Init;
                Ok(Some(summary))
            }
            (command, state) => Err(CfsError::InvalidCommand(format!(
                "player cannot {} while {:?}",
                command, state
            ))),
        }
    }

    pub fn step(&mut self) -> CfsResult<PlaybackStep> {
        self.step_at(Instant::now())
    }

    /// Read the next frame, or finish once every frame has been played.
    pub fn step_at(&mut self, now: Instant) -> CfsResult<PlaybackStep> {
        if self.state != SessionState::Started {
            return Ok(PlaybackStep::Idle);
        }
        if self.played >= self.total {
            let summary = self.summary(now);
            info!("{}", summary);
            self.clock.reset();
            self.state = SessionState::Finished;
            return Ok(PlaybackStep::Finished(summary));
        }

        let number = self.played + 1;
        let frame = self
            .cfs
            .frame(self.path.as_deref().unwrap_or_default(), number)?;
        self.played = number;
        Ok(PlaybackStep::Frame { number, frame })
    }

    fn summary(&self, now: Instant) -> PlaybackSummary {
        PlaybackSummary {
            path: self.path.clone().unwrap_or_default(),
            frames: self.played,
            elapsed_ms: self.clock.elapsed_ms(now),
        }
    }
}
