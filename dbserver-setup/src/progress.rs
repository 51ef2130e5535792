// Progress reporting
//
// A run reports byte-valued progress and ends with exactly one terminal `ResultCode`.
// `ProgressReporter` is the single writer; observers only receive.

use log::{debug, warn};
use serde::Serialize;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Terminal result of a run. Codes follow the Windows Installer convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    Cancelled,
    Failed,
    RebootRequired,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Cancelled => 1602,
            ResultCode::Failed => 1603,
            ResultCode::RebootRequired => 3010,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Success | ResultCode::RebootRequired)
    }
}

/// Receives progress for one run.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, value: u8);
    fn finished(&self, result: ResultCode);
}

/// `done` of `total` as a percentage byte. An empty run counts as complete.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[derive(Debug, Default)]
struct ReporterState {
    last: Option<u8>,
    result: Option<ResultCode>,
}

/// Fans progress out to observers and enforces the single-`finished` rule.
///
/// Reports after `finish` are dropped, as is any second `finish`. A decreasing value is
/// forwarded but logged. Observers are called while the reporter's lock is held, so events
/// from concurrent writers reach them in one order; an observer must not call back into the
/// reporter.
#[derive(Default)]
pub struct ProgressReporter {
    observers: Vec<Arc<dyn ProgressObserver>>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Returns false if the run already finished.
    pub fn report(&self, value: u8) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.result.is_some() {
            debug!("[PHASE: progress] [STEP: report] Dropping progress {} after finish", value);
            return false;
        }
        if let Some(last) = state.last {
            if value < last {
                warn!(
                    "[PHASE: progress] [STEP: report] Progress went backwards ({} -> {})",
                    last, value
                );
            }
        }
        state.last = Some(value);

        for o in &self.observers {
            o.on_progress(value);
        }
        true
    }

    /// Returns false if the run already finished.
    pub fn finish(&self, result: ResultCode) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = state.result {
            warn!(
                "[PHASE: progress] [STEP: finish] Ignoring second finish {:?} (already {:?})",
                result, previous
            );
            return false;
        }
        state.result = Some(result);

        for o in &self.observers {
            o.finished(result);
        }
        true
    }

    pub fn result(&self) -> Option<ResultCode> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(u8),
    Finished(ResultCode),
}

/// Forwards events over a channel, for a UI thread that polls between frames.
pub struct ChannelObserver {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, value: u8) {
        // Receiver gone means the UI closed; nothing to do.
        let _ = self.tx.send(ProgressEvent::Progress(value));
    }

    fn finished(&self, result: ResultCode) {
        let _ = self.tx.send(ProgressEvent::Finished(result));
    }
}
