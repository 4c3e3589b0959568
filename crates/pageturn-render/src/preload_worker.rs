use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::render_engine::{Advance, PreloadReport, ReadingSession, RenderEngineError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle for a submitted job.
pub type Completion<T> = Receiver<Result<T, RenderEngineError>>;

const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Fixed pool of threads that drive loads and preloads off the caller's
/// thread.
///
/// Jobs are queued on a bounded channel, so submitting blocks once every
/// worker is busy and the queue is full.
pub struct PreloadWorker {
    session: Arc<ReadingSession>,
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PreloadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadWorker")
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

impl PreloadWorker {
    /// Spawn `session.options().worker_threads` workers (at least one).
    pub fn new(session: Arc<ReadingSession>) -> Self {
        let threads = session.options().worker_threads.max(1);
        let (tx, rx) = sync_channel::<Job>(threads * QUEUE_DEPTH_PER_WORKER);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let rx = Arc::clone(&rx);
            let spawned = std::thread::Builder::new()
                .name(format!("pageturn-preload-{}", idx))
                .spawn(move || worker_loop(&rx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => log::warn!("failed to spawn preload worker {}: {}", idx, err),
            }
        }
        let sender = if workers.is_empty() { None } else { Some(tx) };
        log::debug!("preload worker started with {} threads", workers.len());
        Self {
            session,
            sender: Mutex::new(sender),
            workers: Mutex::new(workers),
        }
    }

    pub fn session(&self) -> &Arc<ReadingSession> {
        &self.session
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn submit<T, F>(&self, job: F) -> Result<Completion<T>, RenderEngineError>
    where
        T: Send + 'static,
        F: FnOnce(&ReadingSession) -> Result<T, RenderEngineError> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RenderEngineError::WorkerShutdown)?;
        let (done_tx, done_rx) = sync_channel(1);
        let session = Arc::clone(&self.session);
        let boxed: Job = Box::new(move || {
            let _ = done_tx.send(job(session.as_ref()));
        });
        sender
            .send(boxed)
            .map_err(|_| RenderEngineError::WorkerShutdown)?;
        Ok(done_rx)
    }

    /// Queue a preload window around `chapter` using the session options.
    pub fn submit_preload(
        &self,
        chapter: usize,
    ) -> Result<Completion<PreloadReport>, RenderEngineError> {
        self.submit(move |session| {
            let options = session.options();
            session.preload(chapter, options.preload_before, options.preload_behind)
        })
    }

    /// Queue a single chapter load.
    pub fn submit_load(&self, chapter: usize) -> Result<Completion<bool>, RenderEngineError> {
        self.submit(move |session| session.load(chapter))
    }

    /// Re-center the preload window after a cursor move that changed chapter.
    pub fn follow(
        &self,
        advance: &Advance,
    ) -> Result<Option<Completion<PreloadReport>>, RenderEngineError> {
        if !advance.chapter_changed {
            return Ok(None);
        }
        self.submit_preload(advance.chapter).map(Some)
    }

    /// Stop accepting work, let queued jobs finish, and join the workers.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            if handle.join().is_err() {
                log::warn!("preload worker panicked");
            }
        }
        log::debug!("preload worker shut down");
    }
}

impl Drop for PreloadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}
