//! Requirement satisfied while the key cache is unlocked.

use std::sync::Arc;

use queue_core::{ContextDependent, InjectError, JobContext, JobRegistry, Requirement};

use crate::cache::KeyCache;

#[derive(Default)]
pub struct SecretRequirement {
    cache: Option<Arc<KeyCache>>,
}

impl SecretRequirement {
    pub const NAME: &'static str = "secret";
}

impl Requirement for SecretRequirement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_present(&self) -> bool {
        self.cache.as_ref().is_some_and(|cache| !cache.is_locked())
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for SecretRequirement {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.cache = Some(context.require::<KeyCache>()?);
        Ok(())
    }
}

/// Make the `secret` requirement available to jobs in `registry`.
pub fn register_secret_requirement(registry: &mut JobRegistry) {
    registry.register_requirement(SecretRequirement::NAME, || {
        Box::new(SecretRequirement::default())
    });
}
