//! Dependency-ordered module loading
//!
//! Every module gets its own task. Fetches run concurrently under the
//! download semaphore; a module is handed to the receiver only after every
//! module it depends on has been received. Each task's completion is a
//! shared future that downstream tasks await, so a failure propagates to
//! every dependent.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use hotload_errors::{Error, ManifestError};
use hotload_events::SharedEventListener;
use hotload_manifest::{Manifest, Module};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::fetcher::{fetch_first, Fetcher, ModuleRequest};
use crate::receiver::ModuleReceiver;

type Completion = Shared<BoxFuture<'static, Result<(), Error>>>;

/// State shared by every module task of one load.
pub(crate) struct ModuleRun {
    pub application_name: String,
    pub fetchers: Vec<Arc<dyn Fetcher>>,
    pub semaphore: Arc<Semaphore>,
    pub listener: SharedEventListener,
    pub receiver: Arc<dyn ModuleReceiver>,
}

impl ModuleRun {
    /// Load every module of `manifest`, returning the first failure.
    ///
    /// Remaining tasks are aborted as soon as one fails.
    pub(crate) async fn run(self, manifest: &Manifest) -> Result<(), Error> {
        let run = Arc::new(self);
        let base_url: Option<Arc<str>> = manifest.base_url().map(Arc::from);
        let mut completions: HashMap<&str, Completion> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (id, module) in manifest.modules().iter() {
            let upstreams = module
                .depends_on_ids
                .iter()
                .map(|dependency| {
                    completions.get(dependency.as_str()).cloned().ok_or_else(|| {
                        ManifestError::NotTopologicallySorted {
                            module_id: id.to_string(),
                            dependency: dependency.clone(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let job = ModuleJob {
                context: run.clone(),
                id: id.to_string(),
                module: module.clone(),
                base_url: base_url.clone(),
                upstreams,
            };
            let completion = job.run().boxed().shared();
            completions.insert(id, completion.clone());
            tasks.spawn(completion);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(Error::internal(format!("module task failed: {e}"))),
            }
        }
        Ok(())
    }
}

struct ModuleJob {
    context: Arc<ModuleRun>,
    id: String,
    module: Module,
    base_url: Option<Arc<str>>,
    upstreams: Vec<Completion>,
}

impl ModuleJob {
    async fn run(self) -> Result<(), Error> {
        let run = &self.context;
        let request = ModuleRequest {
            application_name: &run.application_name,
            id: &self.id,
            sha256: &self.module.sha256,
            base_url: self.base_url.as_deref(),
            url: &self.module.url,
        };

        let bytes = fetch_first(&run.fetchers, &run.semaphore, run.listener.as_ref(), &request)
            .await?
            .ok_or_else(|| Error::internal(format!("no source has module {}", self.id)))?;
        if let Err(e) = self.module.sha256.verify(&bytes) {
            debug!(module_id = %self.id, error = %e, "module content does not match its hash");
            return Err(e);
        }

        for upstream in self.upstreams {
            upstream.await?;
        }

        run.receiver
            .receive(bytes, &self.id, &self.module.sha256)
            .await
    }
}
