use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::error::SynthesisError;

type Loader<E> = Box<dyn Fn() -> Result<E, SynthesisError> + Send + Sync>;

/// Process-wide engine that is loaded on first use and then reused.
///
/// Concurrent first callers block until the single load finishes. A failed
/// load leaves the cell empty, so the next caller tries again.
///
/// The engine also carries the job slot: every runner built over the same
/// engine shares it, so at most one narration job runs against it.
pub struct SharedEngine<E> {
    cell: OnceCell<Mutex<E>>,
    loader: Loader<E>,
    job_slot: Arc<AtomicBool>,
}

impl<E> SharedEngine<E> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<E, SynthesisError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
            job_slot: Arc::default(),
        }
    }

    /// Wrap an engine that is already loaded.
    pub fn preloaded(engine: E) -> Self {
        Self {
            cell: OnceCell::with_value(Mutex::new(engine)),
            loader: Box::new(|| {
                Err(SynthesisError::EngineInit(
                    "preloaded engine cannot be reloaded".to_string(),
                ))
            }),
            job_slot: Arc::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Whether a job is currently running against this engine.
    pub fn has_running_job(&self) -> bool {
        self.job_slot.load(Ordering::SeqCst)
    }

    pub(crate) fn job_slot(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.job_slot)
    }

    /// Run `f` with exclusive access to the engine, loading it first if needed.
    pub fn with<R, F>(&self, f: F) -> Result<R, SynthesisError>
    where
        F: FnOnce(&mut E) -> Result<R, SynthesisError>,
    {
        let engine = self.cell.get_or_try_init(|| {
            log::info!("Loading synthesis engine");
            let engine = (self.loader)().map_err(|e| match e {
                e @ SynthesisError::EngineInit(_) => e,
                other => SynthesisError::EngineInit(other.to_string()),
            })?;
            Ok::<_, SynthesisError>(Mutex::new(engine))
        })?;

        let mut guard = engine
            .lock()
            .map_err(|e| SynthesisError::Poisoned(e.to_string()))?;
        f(&mut guard)
    }
}

impl<E> fmt::Debug for SharedEngine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEngine")
            .field("initialized", &self.is_initialized())
            .field("running_job", &self.has_running_job())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SharedEngine;
    use crate::error::SynthesisError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn loads_once_across_threads() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let shared = Arc::new(SharedEngine::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0usize)
        }));
        assert!(!shared.is_initialized());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    shared
                        .with(|calls| {
                            *calls += 1;
                            Ok(())
                        })
                        .expect("engine should load")
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(shared.with(|calls| Ok(*calls)).expect("engine"), 8);
    }

    #[test]
    fn failed_load_is_reported_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let shared = SharedEngine::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SynthesisError::Io(std::io::Error::other("model missing")))
            } else {
                Ok("engine")
            }
        });

        let err = shared.with(|_| Ok(())).expect_err("first load fails");
        assert!(matches!(err, SynthesisError::EngineInit(msg) if msg.contains("model missing")));
        assert!(!shared.is_initialized());

        assert_eq!(shared.with(|e| Ok(*e)).expect("second load"), "engine");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_user_poisons_the_engine() {
        let shared = Arc::new(SharedEngine::preloaded(0u8));
        let poisoner = Arc::clone(&shared);
        let _ = thread::spawn(move || {
            let _ = poisoner.with(|_| -> Result<(), SynthesisError> { panic!("boom") });
        })
        .join();

        let err = shared.with(|_| Ok(())).expect_err("lock is poisoned");
        assert!(matches!(err, SynthesisError::Poisoned(_)));
    }
}
