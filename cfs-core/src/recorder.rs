//! Recording sessions: wire-format frames in, appended sectors out.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{CfsError, CfsResult};
use crate::frame::Frame;
use crate::protocol::{ControlCommand, SessionState, Stopwatch};
use crate::session::Cfs;

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    DurationElapsed,
    OutOfSpace,
}

/// Final report of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: String,
    pub frames: usize,
    pub elapsed_ms: u64,
    pub reason: StopReason,
}

impl fmt::Display for RecordingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason == StopReason::OutOfSpace {
            writeln!(f, "Ran out of space")?;
        }
        write!(
            f,
            "Recording saved to {} and ran for {}ms",
            self.path, self.elapsed_ms
        )
    }
}

/// Result of feeding one wire line to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Saved { frame: usize, elapsed_ms: u64 },
    /// Not recording (idle or paused); the line was dropped.
    Ignored,
    Finished(RecordingSummary),
}

/// Drives one file's recording through the session.
pub struct Recorder {
    cfs: Cfs,
    state: SessionState,
    container: Option<String>,
    path: Option<String>,
    limit: Option<Duration>,
    source: Option<(usize, usize)>,
    frames: usize,
    clock: Stopwatch,
}

impl Recorder {
    pub fn new(cfs: Cfs) -> Self {
        Self {
            cfs,
            state: SessionState::Nothing,
            container: None,
            path: None,
            limit: None,
            source: None,
            frames: 0,
            clock: Stopwatch::default(),
        }
    }

    /// Incoming lines describe a `width` x `height` grid smaller than a
    /// sector.
    pub fn with_source_size(mut self, width: usize, height: usize) -> Self {
        self.source = Some((width, height));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn handle(&mut self, command: ControlCommand) -> CfsResult<Option<RecordingSummary>> {
        self.handle_at(command, Instant::now())
    }

    /// Apply a control command. A summary is returned when it ends the
    /// recording.
    pub fn handle_at(
        &mut self,
        command: ControlCommand,
        now: Instant,
    ) -> CfsResult<Option<RecordingSummary>> {
        match (command, self.state) {
            (ControlCommand::Init(name), state) if !state.is_active() => {
                self.container = Some(name);
                self.state = SessionState::Init;
                self.clock.reset();
                Ok(None)
            }
            (ControlCommand::Start { .. }, SessionState::Nothing) => Err(CfsError::NotMounted),
            (ControlCommand::Start { path, param }, SessionState::Init | SessionState::Finished) => {
                self.begin(&path, param.map(Duration::from_secs), now)?;
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
                Ok(Some(self.finish(StopReason::Stopped, now)))
            }
            (command, state) => Err(CfsError::InvalidCommand(format!(
                "recorder cannot {} while {:?}",
                command, state
            ))),
        }
    }

    pub fn push_wire(&mut self, line: &str) -> CfsResult<RecordOutcome> {
        self.push_wire_at(line, Instant::now())
    }

    /// Feed one wire-format frame.
    ///
    /// Once the duration limit has passed the recording ends instead of
    /// saving. Running out of space ends it too.
    pub fn push_wire_at(&mut self, line: &str, now: Instant) -> CfsResult<RecordOutcome> {
        if self.state != SessionState::Started {
            return Ok(RecordOutcome::Ignored);
        }
        if self.limit.is_some_and(|limit| self.clock.elapsed(now) >= limit) {
            return Ok(RecordOutcome::Finished(
                self.finish(StopReason::DurationElapsed, now),
            ));
        }

        let layout = *self.cfs.layout();
        let frame = match self.source {
            Some((w, h)) => {
                Frame::from_wire_sized(line, w, h, layout.sector_width, layout.sector_height)?
            }
            None => Frame::from_wire(line, layout.sector_width, layout.sector_height)?,
        };

        let path = self.path.clone().unwrap_or_default();
        match self.cfs.append_frame(&path, &frame) {
            Ok(number) => {
                self.frames += 1;
                let elapsed_ms = self.clock.elapsed_ms(now);
                debug!("{}ms: saved frame {} of {}", elapsed_ms, number, path);
                Ok(RecordOutcome::Saved {
                    frame: number,
                    elapsed_ms,
                })
            }
            Err(CfsError::OutOfSpace { volume }) => {
                warn!("recording {} stopped: {} is full", path, volume);
                Ok(RecordOutcome::Finished(
                    self.finish(StopReason::OutOfSpace, now),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn begin(&mut self, path: &str, limit: Option<Duration>, now: Instant) -> CfsResult<()> {
        self.cfs.touch(path)?;
        let resolved = self.cfs.resolve(path)?.to_string();
        info!("recording to {}", resolved);

        self.path = Some(resolved);
        self.limit = limit.filter(|l| !l.is_zero());
        self.frames = 0;
        self.clock.reset();
        self.clock.start(now);
        self.state = SessionState::Started;
        Ok(())
    }

    fn finish(&mut self, reason: StopReason, now: Instant) -> RecordingSummary {
        let summary = RecordingSummary {
            path: self.path.clone().unwrap_or_default(),
            frames: self.frames,
            elapsed_ms: self.clock.elapsed_ms(now),
            reason,
        };
        info!("{}", summary);
        self.clock.reset();
        self.state = match reason {
            StopReason::Stopped => SessionState::Init,
            StopReason::DurationElapsed | StopReason::OutOfSpace => SessionState::Finished,
        };
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn cfs() -> Cfs {
        Cfs::in_memory(Layout {
            volume_count: 1,
            sectors_per_volume: 3,
            sector_width: 2,
            sector_height: 2,
            ..Layout::default()
        })
        .unwrap()
    }

    fn start(path: &str, param: Option<u64>) -> ControlCommand {
        ControlCommand::Start {
            path: path.to_string(),
            param,
        }
    }

    fn ready(cfs: &Cfs) -> Recorder {
        let mut rec = Recorder::new(cfs.clone());
        rec.handle(ControlCommand::Init("mem".to_string())).unwrap();
        rec
    }

    #[test]
    fn test_start_requires_init() {
        let mut rec = Recorder::new(cfs());
        assert!(matches!(
            rec.handle(start("/FV0/clip", None)),
            Err(CfsError::NotMounted)
        ));
    }

    #[test]
    fn test_records_frames() {
        let cfs = cfs();
        let mut rec = ready(&cfs);
        let t0 = Instant::now();
        rec.handle_at(start("/FV0/clip", None), t0).unwrap();
        assert_eq!(rec.state(), SessionState::Started);

        let out = rec.push_wire_at("1,0,0,1\n", t0 + Duration::from_millis(40)).unwrap();
        assert_eq!(out, RecordOutcome::Saved { frame: 1, elapsed_ms: 40 });
        rec.push_wire_at("0,1", t0 + Duration::from_millis(80)).unwrap();

        let summary = rec
            .handle_at(ControlCommand::Stop, t0 + Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.elapsed_ms, 100);
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.to_string(), "Recording saved to /FV0/clip and ran for 100ms");
        assert_eq!(rec.state(), SessionState::Init);

        assert_eq!(cfs.size("/FV0/clip").unwrap(), 2);
        assert_eq!(cfs.frame("/FV0/clip", 2).unwrap().cells(), &[0, 1, 0, 0]);
    }

    #[test]
    fn test_pause_drops_frames_and_holds_time() {
        let cfs = cfs();
        let mut rec = ready(&cfs);
        let t0 = Instant::now();
        rec.handle_at(start("/FV0/clip", None), t0).unwrap();
        rec.handle_at(ControlCommand::Pause, t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(
            rec.push_wire_at("1", t0 + Duration::from_millis(60)).unwrap(),
            RecordOutcome::Ignored
        );
        rec.handle_at(ControlCommand::Resume, t0 + Duration::from_secs(5)).unwrap();
        let out = rec.push_wire_at("1", t0 + Duration::from_millis(5_010)).unwrap();
        assert_eq!(out, RecordOutcome::Saved { frame: 1, elapsed_ms: 60 });
    }

    #[test]
    fn test_duration_limit() {
        let cfs = cfs();
        let mut rec = ready(&cfs);
        let t0 = Instant::now();
        rec.handle_at(start("/FV0/clip", Some(1)), t0).unwrap();
        rec.push_wire_at("1", t0 + Duration::from_millis(500)).unwrap();
        match rec.push_wire_at("1", t0 + Duration::from_millis(1_000)).unwrap() {
            RecordOutcome::Finished(summary) => {
                assert_eq!(summary.reason, StopReason::DurationElapsed);
                assert_eq!(summary.frames, 1);
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert_eq!(cfs.size("/FV0/clip").unwrap(), 1);
    }

    #[test]
    fn test_out_of_space_ends_session() {
        let cfs = cfs();
        let mut rec = ready(&cfs);
        let t0 = Instant::now();
        rec.handle_at(start("/FV0/clip", None), t0).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                rec.push_wire_at("1", t0).unwrap(),
                RecordOutcome::Saved { .. }
            ));
        }
        match rec.push_wire_at("1", t0 + Duration::from_millis(30)).unwrap() {
            RecordOutcome::Finished(summary) => {
                assert_eq!(summary.reason, StopReason::OutOfSpace);
                assert_eq!(summary.elapsed_ms, 30);
                assert!(summary.to_string().starts_with("Ran out of space\n"));
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert_eq!(rec.state(), SessionState::Finished);
        assert_eq!(cfs.size("/FV0/clip").unwrap(), 3);
    }

    #[test]
    fn test_start_rejects_existing_file() {
        let cfs = cfs();
        cfs.touch("/FV0/clip").unwrap();
        let mut rec = ready(&cfs);
        assert!(matches!(
            rec.handle(start("/FV0/clip", None)),
            Err(CfsError::PathConflict(_))
        ));
        assert_eq!(rec.state(), SessionState::Init);
    }

    #[test]
    fn test_smaller_source_grid() {
        let cfs = cfs();
        let mut rec = ready(&cfs).with_source_size(1, 1);
        rec.handle(start("/FV0/dot", None)).unwrap();
        rec.push_wire("7").unwrap();
        assert_eq!(cfs.frame("/FV0/dot", 1).unwrap().cells(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut rec = ready(&cfs());
        assert!(matches!(rec.handle(ControlCommand::Pause), Err(CfsError::InvalidCommand(_))));
        assert!(matches!(rec.handle(ControlCommand::Stop), Err(CfsError::InvalidCommand(_))));
        assert!(matches!(rec.handle(ControlCommand::Done), Err(CfsError::InvalidCommand(_))));
    }
}
