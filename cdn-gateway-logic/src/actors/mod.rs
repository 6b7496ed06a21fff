//! The actors executed by the queue worker.

pub mod autoindex;
pub mod cache;
pub mod commit;
pub mod deploy;
pub mod janitor;

use std::sync::Arc;

use crate::{
    error::ServiceError,
    queue::registry::{ActorOptions, Registry},
    settings::Settings,
};

/// Declare every actor this service runs. The registry is fixed for the
/// process lifetime.
pub fn registry(settings: &Settings) -> Result<Registry, ServiceError> {
    let mut registry = Registry::new();
    let defaults = ActorOptions::from_settings(settings);

    registry.declare(settings, Arc::new(commit::CommitActor), defaults.clone())?;
    registry.declare(
        settings,
        Arc::new(cache::FlushCdnCacheActor),
        defaults.clone(),
    )?;
    registry.declare(
        settings,
        Arc::new(deploy::DeployConfigActor),
        defaults.clone(),
    )?;
    registry.declare(
        settings,
        Arc::new(deploy::CompleteDeployConfigActor),
        defaults.clone(),
    )?;
    registry.declare(
        settings,
        Arc::new(autoindex::AutoindexPartialActor),
        defaults.clone(),
    )?;
    registry.declare(
        settings,
        Arc::new(janitor::CleanupActor),
        defaults.scheduled(),
    )?;

    Ok(registry)
}
