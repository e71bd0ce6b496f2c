//! Jobs that need the master secret to run.

use std::future::Future;
use std::sync::Arc;

use queue_core::{ContextDependent, InjectError, Job, JobContext, JobError, JobParameters};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::KeyCache;
use crate::requirement::SecretRequirement;
use crate::secret::MasterSecret;

/// A job whose work needs the unlocked master secret.
///
/// Wrap it in [`WithSecret`] to queue it.
pub trait SecretJob: Sized + Send + Sync + 'static {
    type State: Serialize + DeserializeOwned;

    const JOB_TYPE: &'static str;

    fn from_state(state: Self::State) -> Self;

    fn to_state(&self) -> Self::State;

    fn parameters(&self) -> JobParameters {
        JobParameters::default()
    }

    fn run_with_secret(
        &self,
        secret: &MasterSecret,
    ) -> impl Future<Output = Result<(), JobError>> + Send;

    fn should_retry(&self, error: &JobError) -> bool {
        error.is_transient()
    }

    fn on_added(&self) {}

    fn on_canceled(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        None
    }
}

/// Adapts a [`SecretJob`] into a [`Job`] gated on the key cache.
///
/// The wrapped job declares the `secret` requirement. If the cache locks
/// between scheduling and execution the run reports an unmet requirement,
/// which never counts against the retry budget.
pub struct WithSecret<J> {
    inner: J,
    cache: Option<Arc<KeyCache>>,
}

impl<J: SecretJob> WithSecret<J> {
    pub fn new(inner: J) -> Self {
        Self { inner, cache: None }
    }

    pub fn inner(&self) -> &J {
        &self.inner
    }
}

impl<J: SecretJob> Job for WithSecret<J> {
    type State = J::State;
    const JOB_TYPE: &'static str = J::JOB_TYPE;

    fn from_state(state: J::State) -> Self {
        Self::new(J::from_state(state))
    }

    fn to_state(&self) -> J::State {
        self.inner.to_state()
    }

    fn parameters(&self) -> JobParameters {
        self.inner
            .parameters()
            .with_requirement(SecretRequirement::NAME)
    }

    async fn run(&self) -> Result<(), JobError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| JobError::permanent("key cache not injected"))?;
        let secret = cache
            .try_get_secret()
            .ok_or_else(|| JobError::requirement_not_met("master secret is locked"))?;
        self.inner.run_with_secret(&secret).await
    }

    fn should_retry(&self, error: &JobError) -> bool {
        error.is_requirement_not_met() || self.inner.should_retry(error)
    }

    fn on_added(&self) {
        self.inner.on_added()
    }

    fn on_canceled(&self) -> impl Future<Output = ()> + Send {
        self.inner.on_canceled()
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl<J: SecretJob> ContextDependent for WithSecret<J> {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.cache = Some(context.require::<KeyCache>()?);
        if let Some(inner) = self.inner.context_dependent() {
            inner.set_context(context)?;
        }
        Ok(())
    }
}
