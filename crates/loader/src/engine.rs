//! Execution engine seam and the single-threaded worker that owns it

use std::sync::Arc;

use hotload_errors::{EngineError, Error};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// The script engine modules are evaluated in.
///
/// Engines are not assumed to be `Send` or re-entrant: each one is created on
/// and only ever called from its own worker thread, see [`EngineHandle`].
pub trait ExecutionEngine {
    /// Evaluate one module's bytecode.
    ///
    /// # Errors
    /// Returns an error if the engine rejects the module.
    fn load_module(&mut self, bytecode: &[u8], module_id: &str) -> Result<(), Error>;

    /// Call the application's entry point once every module is loaded.
    ///
    /// # Errors
    /// Returns an error if the entry point fails.
    fn run_application(&mut self, main_module_id: &str, main_function: &str) -> Result<(), Error>;
}

/// Creates one engine per application load.
pub trait EngineFactory: Send + Sync {
    /// # Errors
    /// Returns an error if the engine cannot be started.
    fn create(&self, application_name: &str) -> Result<Box<dyn ExecutionEngine>, Error>;
}

impl<F> EngineFactory for F
where
    F: Fn(&str) -> Result<Box<dyn ExecutionEngine>, Error> + Send + Sync,
{
    fn create(&self, application_name: &str) -> Result<Box<dyn ExecutionEngine>, Error> {
        self(application_name)
    }
}

type Job = Box<dyn FnOnce(&mut dyn ExecutionEngine) + Send>;

/// Cloneable handle to an engine running on a dedicated thread.
///
/// Calls are queued and run one at a time in submission order. The worker
/// exits once every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    jobs: mpsc::UnboundedSender<Job>,
    application_name: Arc<str>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("application_name", &self.application_name)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Start a worker thread and create the engine on it.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned or the factory fails.
    pub async fn spawn(factory: Arc<dyn EngineFactory>, application_name: &str) -> Result<Self, Error> {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let (started_tx, started_rx) = oneshot::channel::<Result<(), Error>>();
        let name = application_name.to_string();

        std::thread::Builder::new()
            .name(format!("hotload-engine-{application_name}"))
            .spawn(move || {
                let mut engine = match factory.create(&name) {
                    Ok(engine) => {
                        let _ = started_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                while let Some(job) = queue.blocking_recv() {
                    job(engine.as_mut());
                }
                debug!(application = %name, "engine worker stopped");
            })
            .map_err(|e| EngineError::StartFailed {
                message: e.to_string(),
            })?;

        started_rx.await.map_err(|_| EngineError::WorkerGone)??;

        Ok(Self {
            jobs,
            application_name: application_name.into(),
        })
    }

    #[must_use]
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Run `f` against the engine on its worker thread.
    ///
    /// # Errors
    /// Returns [`EngineError::WorkerGone`] if the worker has stopped or `f`
    /// panicked.
    pub async fn call<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut dyn ExecutionEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |engine| {
                let _ = reply_tx.send(f(engine));
            }))
            .map_err(|_| EngineError::WorkerGone)?;
        reply_rx.await.map_err(|_| EngineError::WorkerGone.into())
    }

    /// # Errors
    /// Returns the engine's error, or [`EngineError::WorkerGone`].
    pub async fn load_module(&self, bytecode: Vec<u8>, module_id: &str) -> Result<(), Error> {
        let module_id = module_id.to_string();
        self.call(move |engine| engine.load_module(&bytecode, &module_id))
            .await?
    }

    /// # Errors
    /// Returns the engine's error, or [`EngineError::WorkerGone`].
    pub async fn run_application(&self, main_module_id: &str, main_function: &str) -> Result<(), Error> {
        let main_module_id = main_module_id.to_string();
        let main_function = main_function.to_string();
        self.call(move |engine| engine.run_application(&main_module_id, &main_function))
            .await?
    }
}
