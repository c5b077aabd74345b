//! Background narration jobs.
//!
//! A job walks a [`Range`] of parts through the [`SynthesisOrchestrator`],
//! turning per-unit milestones into job-level [`ProgressEvent`]s on a
//! channel. Cancellation is cooperative and only observed between units.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::document::{Document, OutputLayout, TextUnit};
use crate::encoder::AudioEncoder;
use crate::engines::SharedEngine;
use crate::error::{JobFailure, JobStartError};
use crate::orchestrator::SynthesisOrchestrator;
use crate::range::Range;
use crate::{SynthesisEngine, SynthesisParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SynthStart,
    EncodeStart,
    /// The encoder failed; the unit's waveform was kept.
    EncodeFailed,
    Cleanup,
    Done,
    PartComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Index of the part in the document.
    pub part_index: usize,
    /// Milestone within the unit, 0 to 100.
    pub sub_step_percent: f32,
    /// Share of the whole job done, 0 to 1. Never decreases within a job.
    pub overall_fraction: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum JobResult {
    Success,
    Cancelled,
    Failed(JobFailure),
}

impl JobResult {
    pub fn state(&self) -> JobState {
        match self {
            JobResult::Success => JobState::Completed,
            JobResult::Cancelled => JobState::Cancelled,
            JobResult::Failed(_) => JobState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Cooperative cancellation flag shared between a job and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(ProgressEvent),
    /// Last event of a job.
    Finished(JobResult),
}

/// Runs narration jobs.
///
/// Runners built over the same [`SharedEngine`] share its job slot, so only
/// one job runs against an engine at a time.
pub struct JobRunner<E, C> {
    orchestrator: Arc<SynthesisOrchestrator<E, C>>,
    state: Arc<Mutex<JobState>>,
    slot: Arc<AtomicBool>,
}

impl<E, C> Clone for JobRunner<E, C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            state: Arc::clone(&self.state),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<E: SynthesisEngine, C: AudioEncoder> JobRunner<E, C> {
    pub fn new(engine: Arc<SharedEngine<E>>, encoder: C, params: SynthesisParams) -> Self {
        let slot = engine.job_slot();
        Self {
            orchestrator: Arc::new(SynthesisOrchestrator::new(engine, encoder, params)),
            state: Arc::new(Mutex::new(JobState::Idle)),
            slot,
        }
    }

    /// State of the most recent job.
    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    /// Run a job on the calling thread.
    ///
    /// Fails without touching any part when a job is already running on the
    /// engine or when `range` does not fit the document.
    pub fn run(
        &self,
        document: &Document,
        range: Range,
        layout: &OutputLayout,
        cancel: &CancelHandle,
        events: &Sender<JobEvent>,
    ) -> Result<JobResult, JobStartError> {
        let parts = checked_parts(document, range)?;
        let mut claim = Claim::acquire(&self.state, &self.slot)?;
        claim.start();
        let result = self.drive(parts, range, layout, cancel, events);
        claim.finish(&result);
        Ok(result)
    }

    /// Run a job on a dedicated thread. `cancel` may be shared with other
    /// controllers, such as a signal handler.
    pub fn spawn(
        &self,
        document: Arc<Document>,
        range: Range,
        layout: OutputLayout,
        cancel: CancelHandle,
    ) -> Result<JobHandle, JobStartError>
    where
        E: Send + 'static,
        C: Send + Sync + 'static,
    {
        checked_parts(&document, range)?;
        let mut claim = Claim::acquire(&self.state, &self.slot)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_cancel = cancel.clone();
        let runner = self.clone();

        let thread = thread::Builder::new()
            .name("narration-job".to_string())
            .spawn(move || {
                claim.start();
                let result = match document.parts() {
                    Ok(parts) => runner.drive(parts, range, &layout, &worker_cancel, &tx),
                    Err(e) => JobResult::Failed(JobFailure::new(range.start(), e.into())),
                };
                claim.finish(&result);
                let _ = tx.send(JobEvent::Finished(result.clone()));
                result
            })?;

        Ok(JobHandle {
            events: rx,
            cancel,
            state: Arc::clone(&self.state),
            thread,
        })
    }

    fn drive(
        &self,
        parts: &[TextUnit],
        range: Range,
        layout: &OutputLayout,
        cancel: &CancelHandle,
        events: &Sender<JobEvent>,
    ) -> JobResult {
        let total = range.len();
        log::info!("Starting job over parts {range} ({total} parts)");

        for (offset, index) in range.indices().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Job cancelled before part {index}");
                return JobResult::Cancelled;
            }

            let current = offset + 1;
            let unit = &parts[index];
            let basename = layout.basename(index);
            log::debug!("Part {current}/{total}: {}", basename.display());

            let outcome = self
                .orchestrator
                .synthesize(&unit.text, &basename, |stage, percent, message| {
                    let overall =
                        ((current - 1) as f64 + f64::from(percent) / 100.0) / total as f64;
                    emit(
                        events,
                        ProgressEvent {
                            stage,
                            part_index: index,
                            sub_step_percent: percent,
                            overall_fraction: overall,
                            message: format!("Part {current}/{total}: {message}"),
                        },
                    );
                });

            if let Err(cause) = outcome {
                log::error!("Part {index} failed: {cause}");
                return JobResult::Failed(JobFailure::new(index, cause));
            }

            emit(
                events,
                ProgressEvent {
                    stage: Stage::PartComplete,
                    part_index: index,
                    sub_step_percent: 100.0,
                    overall_fraction: current as f64 / total as f64,
                    message: format!("Completed part {current}/{total}"),
                },
            );
        }

        log::info!("Job completed: {total} parts");
        JobResult::Success
    }
}

/// A job running on its own thread.
pub struct JobHandle {
    events: Receiver<JobEvent>,
    cancel: CancelHandle,
    state: Arc<Mutex<JobState>>,
    thread: JoinHandle<JobResult>,
}

impl JobHandle {
    /// Blocking iterator over the job's events; ends after
    /// [`JobEvent::Finished`].
    pub fn events(&self) -> crossbeam_channel::Iter<'_, JobEvent> {
        self.events.iter()
    }

    pub fn receiver(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Ask the job to stop before its next part.
    pub fn cancel(&self) {
        log::info!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the job ends. A panic on the job thread is resumed here.
    pub fn wait(self) -> JobResult {
        match self.thread.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Cancel and wait up to `grace` for the in-flight part to finish.
    ///
    /// Returns `None` when the job is still running after `grace`; the thread
    /// is then detached and dies with the process, possibly leaving a partial
    /// waveform or output file behind.
    pub fn shutdown(self, grace: Duration) -> Option<JobResult> {
        self.cancel();
        let deadline = Instant::now() + grace;
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(JobEvent::Finished(_)) | Err(RecvTimeoutError::Disconnected) => {
                    return Some(self.wait())
                }
                Ok(JobEvent::Progress(_)) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Job still running after {grace:?}, abandoning it; partial files may remain"
                    );
                    return None;
                }
            }
        }
    }
}

/// Parts of `document`, after checking that `range` fits them.
fn checked_parts(document: &Document, range: Range) -> Result<&[TextUnit], JobStartError> {
    let parts = document.parts()?;
    Range::new(range.start(), range.end(), parts.len())?;
    Ok(parts)
}

fn emit(events: &Sender<JobEvent>, event: ProgressEvent) {
    log::debug!("{:.3} {}", event.overall_fraction, event.message);
    // A controller that went away still lets the job finish.
    let _ = events.send(JobEvent::Progress(event));
}

fn lock(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the engine's job slot and marks the runner busy for one job.
struct Claim {
    state: Arc<Mutex<JobState>>,
    slot: Arc<AtomicBool>,
    previous: JobState,
    started: bool,
}

impl Claim {
    fn acquire(state: &Arc<Mutex<JobState>>, slot: &Arc<AtomicBool>) -> Result<Self, JobStartError> {
        if slot
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JobStartError::AlreadyRunning);
        }
        let previous = std::mem::replace(&mut *lock(state), JobState::Running);
        Ok(Self {
            state: Arc::clone(state),
            slot: Arc::clone(slot),
            previous,
            started: false,
        })
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn finish(self, result: &JobResult) {
        *lock(&self.state) = result.state();
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        {
            let mut current = lock(&self.state);
            // Still Running here means the job never reported a result.
            if *current == JobState::Running {
                *current = if self.started {
                    JobState::Failed
                } else {
                    self.previous
                };
            }
        }
        self.slot.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Claim, CancelHandle, JobEvent, JobResult, JobRunner, JobState, ProgressEvent, Stage,
    };
    use crate::document::{with_extension, Document, OutputLayout};
    use crate::encoder::AudioEncoder;
    use crate::engines::SharedEngine;
    use crate::error::{EncodeError, JobStartError, SynthesisError, UnitError};
    use crate::orchestrator::tests::{FakeEncoder, ScriptedEngine};
    use crate::range::Range;
    use crate::{AudioChunk, AudioStream, SynthesisEngine, SynthesisParams};
    use crossbeam_channel::Receiver;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn book(n: usize) -> Document {
        Document::from_texts("My Book!", (0..n).map(|i| format!("Part {i} text.")))
    }

    fn runner<C: AudioEncoder>(encoder: C) -> JobRunner<ScriptedEngine, C> {
        let engine = Arc::new(SharedEngine::preloaded(ScriptedEngine::default()));
        JobRunner::new(engine, encoder, SynthesisParams::default())
    }

    fn progress(events: &Receiver<JobEvent>) -> Vec<ProgressEvent> {
        events
            .try_iter()
            .filter_map(|event| match event {
                JobEvent::Progress(p) => Some(p),
                JobEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Requests cancellation while encoding the `after`-th unit.
    struct CancellingEncoder {
        inner: FakeEncoder,
        cancel: CancelHandle,
        after: usize,
    }

    impl AudioEncoder for CancellingEncoder {
        fn encode(&self, input_wav: &Path, output: &Path) -> Result<(), EncodeError> {
            self.inner.encode(input_wav, output)?;
            if self.inner.calls.lock().expect("calls").len() == self.after {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    /// Blocks each stream until the test releases it.
    struct GatedEngine {
        gate: Receiver<()>,
    }

    impl SynthesisEngine for GatedEngine {
        type ModelParams = ();

        fn load_model_with_params(&mut self, _: &Path, _: ()) -> Result<(), SynthesisError> {
            Ok(())
        }

        fn unload_model(&mut self) {}

        fn stream<'a>(
            &'a mut self,
            text: &str,
            _params: &SynthesisParams,
        ) -> Result<AudioStream<'a>, SynthesisError> {
            let _ = self.gate.recv();
            Ok(Box::new(std::iter::once(Ok(AudioChunk {
                text: text.to_string(),
                samples: Some(vec![0.0; 10]),
            }))))
        }
    }

    #[test]
    fn processes_range_in_order_with_part_fractions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = book(5);
        let layout = OutputLayout::new(dir.path(), document.title());
        let (tx, rx) = crossbeam_channel::unbounded();
        let range = Range::new(1, 3, 5).expect("range");

        let result = runner(FakeEncoder::default())
            .run(&document, range, &layout, &CancelHandle::default(), &tx)
            .expect("job should start");
        assert!(result.is_success());

        let events = progress(&rx);
        let completed: Vec<(usize, f64)> = events
            .iter()
            .filter(|e| e.stage == Stage::PartComplete)
            .map(|e| (e.part_index, e.overall_fraction))
            .collect();
        assert_eq!(completed.len(), 3);
        assert_eq!(
            completed.iter().map(|c| c.0).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert_eq!(completed[1].1, 2.0 / 3.0);
        assert_eq!(completed[2].1, 1.0);

        assert!(events
            .windows(2)
            .all(|w| w[0].overall_fraction <= w[1].overall_fraction));
        assert_eq!(events[0].message, "Part 1/3: Generating WAV...");
        assert!((events[0].overall_fraction - 0.05 / 3.0).abs() < 1e-12);

        for index in 1..=3 {
            let basename = layout.basename(index);
            assert!(with_extension(&basename, "opus").exists());
            assert!(!with_extension(&basename, "wav").exists());
        }
        assert!(!with_extension(&layout.basename(0), "opus").exists());
        assert!(dir.path().join("My_Book_part_002.opus").exists());
    }

    #[test]
    fn cancellation_is_observed_between_units() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = book(3);
        let layout = OutputLayout::new(dir.path(), document.title());
        let cancel = CancelHandle::default();
        let encoder = CancellingEncoder {
            inner: FakeEncoder::default(),
            cancel: cancel.clone(),
            after: 1,
        };
        let calls = Arc::clone(&encoder.inner.calls);
        let (tx, rx) = crossbeam_channel::unbounded();
        let runner = runner(encoder);

        let result = runner
            .run(&document, Range::full(3).expect("range"), &layout, &cancel, &tx)
            .expect("job should start");

        assert!(matches!(result, JobResult::Cancelled));
        assert_eq!(runner.state(), JobState::Cancelled);
        assert_eq!(calls.lock().expect("calls").len(), 1);
        assert!(with_extension(&layout.basename(0), "opus").exists());
        assert!(!with_extension(&layout.basename(1), "wav").exists());
        assert!(!with_extension(&layout.basename(1), "opus").exists());

        let last = progress(&rx).pop().expect("events");
        assert_eq!((last.stage, last.part_index), (Stage::PartComplete, 0));
    }

    #[test]
    fn unit_failure_stops_the_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = book(4);
        let layout = OutputLayout::new(dir.path(), document.title());
        let encoder = FakeEncoder {
            fail: true,
            ..Default::default()
        };
        let calls = Arc::clone(&encoder.calls);
        let (tx, rx) = crossbeam_channel::unbounded();
        let runner = runner(encoder);

        let result = runner
            .run(
                &document,
                Range::new(1, 3, 4).expect("range"),
                &layout,
                &CancelHandle::default(),
                &tx,
            )
            .expect("job should start");

        let failure = match result {
            JobResult::Failed(failure) => failure,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.cause.as_ref(), UnitError::Encode(_)));
        assert_eq!(runner.state(), JobState::Failed);
        assert_eq!(calls.lock().expect("calls").len(), 1);
        assert!(with_extension(&layout.basename(1), "wav").exists());

        let stages: Vec<Stage> = progress(&rx).iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            [Stage::SynthStart, Stage::EncodeStart, Stage::EncodeFailed]
        );
    }

    #[test]
    fn range_must_fit_the_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = book(2);
        let layout = OutputLayout::new(dir.path(), document.title());
        let (tx, _rx) = crossbeam_channel::unbounded();
        let runner = runner(FakeEncoder::default());

        let err = runner
            .run(
                &document,
                Range::new(0, 4, 5).expect("range"),
                &layout,
                &CancelHandle::default(),
                &tx,
            )
            .expect_err("range is too long");
        assert!(matches!(err, JobStartError::Range(_)));
        assert_eq!(runner.state(), JobState::Idle);
    }

    #[test]
    fn second_job_is_rejected_while_one_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (release, gate) = crossbeam_channel::unbounded();
        let engine = Arc::new(SharedEngine::preloaded(GatedEngine { gate }));
        let runner = JobRunner::new(engine, FakeEncoder::default(), SynthesisParams::default());
        let document = Arc::new(book(2));
        let layout = OutputLayout::new(dir.path(), document.title());
        let range = Range::full(2).expect("range");

        let handle = runner
            .spawn(Arc::clone(&document), range, layout.clone(), CancelHandle::default())
            .expect("first job starts");
        assert_eq!(handle.state(), JobState::Running);
        assert!(matches!(
            runner.spawn(Arc::clone(&document), range, layout.clone(), CancelHandle::default()),
            Err(JobStartError::AlreadyRunning)
        ));

        release.send(()).expect("release");
        release.send(()).expect("release");
        let finished = handle
            .events()
            .filter(|e| matches!(e, JobEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert!(handle.wait().is_success());
        assert_eq!(runner.state(), JobState::Completed);

        drop(release);
        let again = runner
            .spawn(document, range, layout, CancelHandle::default())
            .expect("runner is free again");
        assert!(again.wait().is_success());
    }

    #[test]
    fn shutdown_detaches_a_stuck_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (release, gate) = crossbeam_channel::unbounded::<()>();
        let engine = Arc::new(SharedEngine::preloaded(GatedEngine { gate }));
        let runner = JobRunner::new(engine, FakeEncoder::default(), SynthesisParams::default());
        let document = Arc::new(book(3));
        let layout = OutputLayout::new(dir.path(), document.title());

        let handle = runner
            .spawn(
                document,
                Range::full(3).expect("range"),
                layout,
                CancelHandle::default(),
            )
            .expect("job starts");
        assert!(handle.shutdown(Duration::from_millis(50)).is_none());
        assert_eq!(runner.state(), JobState::Running);

        // Let the detached thread run out before the tempdir goes away.
        drop(release);
        for _ in 0..500 {
            if runner.state().is_terminal() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(runner.state(), JobState::Cancelled);
    }

    #[test]
    fn shutdown_returns_cancelled_result_after_current_part() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (release, gate) = crossbeam_channel::unbounded();
        let engine = Arc::new(SharedEngine::preloaded(GatedEngine { gate }));
        let runner = JobRunner::new(engine, FakeEncoder::default(), SynthesisParams::default());
        let document = Arc::new(book(3));
        let layout = OutputLayout::new(dir.path(), document.title());

        let handle = runner
            .spawn(
                document,
                Range::full(3).expect("range"),
                layout,
                CancelHandle::default(),
            )
            .expect("job starts");
        handle.cancel();
        release.send(()).expect("release");
        drop(release);
        let result = handle
            .shutdown(Duration::from_secs(10))
            .expect("job stops within grace");
        assert!(matches!(result, JobResult::Cancelled));
        assert_eq!(runner.state(), JobState::Cancelled);
    }

    #[test]
    fn runners_sharing_an_engine_run_one_job_at_a_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (release, gate) = crossbeam_channel::unbounded();
        let engine = Arc::new(SharedEngine::preloaded(GatedEngine { gate }));
        let first = JobRunner::new(
            Arc::clone(&engine),
            FakeEncoder::default(),
            SynthesisParams::default(),
        );
        let second = JobRunner::new(
            Arc::clone(&engine),
            FakeEncoder::default(),
            SynthesisParams::default(),
        );
        let document = Arc::new(book(1));
        let layout = OutputLayout::new(dir.path(), document.title());
        let range = Range::full(1).expect("range");

        let handle = first
            .spawn(Arc::clone(&document), range, layout.clone(), CancelHandle::default())
            .expect("first job starts");
        assert!(engine.has_running_job());
        assert!(matches!(
            second.spawn(Arc::clone(&document), range, layout.clone(), CancelHandle::default()),
            Err(JobStartError::AlreadyRunning)
        ));
        let (tx, _rx) = crossbeam_channel::unbounded();
        assert!(matches!(
            second.run(&document, range, &layout, &CancelHandle::default(), &tx),
            Err(JobStartError::AlreadyRunning)
        ));
        assert_eq!(second.state(), JobState::Idle);

        drop(release);
        assert!(handle.wait().is_success());
        assert!(!engine.has_running_job());
        let result = second
            .run(&document, range, &layout, &CancelHandle::default(), &tx)
            .expect("engine is free again");
        assert!(result.is_success());
        assert_eq!(second.state(), JobState::Completed);
    }

    #[test]
    fn claim_that_never_starts_restores_previous_state() {
        let state = Arc::new(Mutex::new(JobState::Cancelled));
        let slot = Arc::new(AtomicBool::new(false));

        drop(Claim::acquire(&state, &slot).expect("claim"));
        assert_eq!(*state.lock().expect("state"), JobState::Cancelled);
        assert!(!slot.load(Ordering::SeqCst));

        let mut claim = Claim::acquire(&state, &slot).expect("claim");
        assert!(matches!(
            Claim::acquire(&state, &slot),
            Err(JobStartError::AlreadyRunning)
        ));
        claim.start();
        drop(claim);
        assert_eq!(*state.lock().expect("state"), JobState::Failed);
        assert!(!slot.load(Ordering::SeqCst));
    }
}
