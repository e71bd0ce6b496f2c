//! Requirement gate: predicates a job must satisfy before it may run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::{ContextDependent, JobContext};
use crate::error::InjectError;

/// A precondition evaluated on every scheduling attempt.
///
/// `is_present` must be side-effect free and cheap; it is called from the
/// scheduler for every pending job on every poll.
pub trait Requirement: Send + Sync + 'static {
    /// Registry name used to persist and reconstruct this requirement.
    fn name(&self) -> &'static str;

    fn is_present(&self) -> bool;

    /// Opt into late binding of runtime collaborators.
    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        None
    }
}

/// Connectivity as reported by the platform layer.
#[derive(Debug, Default)]
pub struct NetworkState {
    network_available: AtomicBool,
    service_reachable: AtomicBool,
}

impl NetworkState {
    pub fn new(network_available: bool, service_reachable: bool) -> Self {
        Self {
            network_available: AtomicBool::new(network_available),
            service_reachable: AtomicBool::new(service_reachable),
        }
    }

    pub fn set_network_available(&self, available: bool) {
        self.network_available.store(available, Ordering::Release);
    }

    pub fn set_service_reachable(&self, reachable: bool) {
        self.service_reachable.store(reachable, Ordering::Release);
    }

    pub fn is_network_available(&self) -> bool {
        self.network_available.load(Ordering::Acquire)
    }

    pub fn is_service_reachable(&self) -> bool {
        self.service_reachable.load(Ordering::Acquire)
    }
}

/// Satisfied while the device has network connectivity.
#[derive(Default)]
pub struct NetworkRequirement {
    network: Option<Arc<NetworkState>>,
}

impl NetworkRequirement {
    pub const NAME: &'static str = "network";
}

impl Requirement for NetworkRequirement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_present(&self) -> bool {
        self.network
            .as_ref()
            .is_some_and(|network| network.is_network_available())
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for NetworkRequirement {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.network = Some(context.require::<NetworkState>()?);
        Ok(())
    }
}

/// Satisfied while the platform push service is reachable.
#[derive(Default)]
pub struct ServiceRequirement {
    network: Option<Arc<NetworkState>>,
}

impl ServiceRequirement {
    pub const NAME: &'static str = "service";
}

impl Requirement for ServiceRequirement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_present(&self) -> bool {
        self.network
            .as_ref()
            .is_some_and(|network| network.is_service_reachable())
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for ServiceRequirement {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.network = Some(context.require::<NetworkState>()?);
        Ok(())
    }
}

/// Composite requirement, present when any member is present.
pub struct AnyRequirement {
    name: &'static str,
    members: Vec<Box<dyn Requirement>>,
}

impl AnyRequirement {
    pub fn new(name: &'static str, members: Vec<Box<dyn Requirement>>) -> Self {
        Self { name, members }
    }
}

impl Requirement for AnyRequirement {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_present(&self) -> bool {
        self.members.iter().any(|member| member.is_present())
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for AnyRequirement {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        for member in &mut self.members {
            if let Some(dependent) = member.context_dependent() {
                dependent.set_context(context)?;
            }
        }
        Ok(())
    }
}

/// Network OR push-service reachability.
pub struct NetworkOrServiceRequirement(AnyRequirement);

impl NetworkOrServiceRequirement {
    pub const NAME: &'static str = "network_or_service";

    pub fn new() -> Self {
        Self(AnyRequirement::new(
            Self::NAME,
            vec![
                Box::new(NetworkRequirement::default()),
                Box::new(ServiceRequirement::default()),
            ],
        ))
    }
}

impl Default for NetworkOrServiceRequirement {
    fn default() -> Self {
        Self::new()
    }
}

impl Requirement for NetworkOrServiceRequirement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_present(&self) -> bool {
        self.0.is_present()
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        self.0.context_dependent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(network: &Arc<NetworkState>) -> JobContext {
        JobContext::new().with(network.clone())
    }

    #[test]
    fn test_unbound_requirement_is_absent() {
        assert!(!NetworkRequirement::default().is_present());
    }

    #[test]
    fn test_network_or_service() -> Result<(), InjectError> {
        let network = Arc::new(NetworkState::new(false, false));
        let mut requirement = NetworkOrServiceRequirement::new();
        if let Some(dependent) = requirement.context_dependent() {
            dependent.set_context(&context_with(&network))?;
        }
        assert!(!requirement.is_present());

        network.set_service_reachable(true);
        assert!(requirement.is_present());

        network.set_service_reachable(false);
        network.set_network_available(true);
        assert!(requirement.is_present());
        Ok(())
    }

    #[test]
    fn test_missing_network_state_fails_injection() {
        let mut requirement = NetworkRequirement::default();
        let result = requirement
            .context_dependent()
            .map(|dependent| dependent.set_context(&JobContext::new()));
        assert!(matches!(
            result,
            Some(Err(InjectError::MissingCollaborator(_)))
        ));
    }
}
