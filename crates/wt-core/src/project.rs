//! Project validation with a TTL cache.
//!
//! The registry that owns projects lives outside this crate; the engine only
//! asks whether a project exists under a tenant. Positive answers are cached
//! for [`DEFAULT_PROJECT_TTL`] (configurable). A cached hit may therefore
//! trust a project/tenant relationship for up to one TTL after the registry
//! changed it; that staleness window is accepted. Negative answers are never
//! cached.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Missing, RegistryError, TimeError};
use crate::types::{ProjectId, TenantId};

/// Cache lifetime used when none is configured.
pub const DEFAULT_PROJECT_TTL: Duration = Duration::minutes(5);

/// A project known to belong to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub project_id: ProjectId,
    pub tenant_id: TenantId,
    pub title: String,
}

/// The external project registry.
pub trait ProjectRegistry: Send + Sync {
    /// Looks up a project scoped to a tenant. `Ok(None)` means it does not
    /// exist there.
    fn find_project(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
    ) -> Result<Option<ProjectRef>, RegistryError>;
}

/// A cache entry. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProject {
    pub project: ProjectRef,
    pub fetched_at: DateTime<Utc>,
}

type CacheKey = (ProjectId, TenantId);

/// Process-wide project cache keyed by `(project, tenant)`.
///
/// Entries are shared as `Arc`s and replaced wholesale on refresh, so readers
/// never observe a half-written entry.
#[derive(Debug)]
pub struct ProjectCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Arc<CachedProject>>>,
}

impl Default for ProjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECT_TTL)
    }
}

impl ProjectCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CachedProject, now: DateTime<Utc>) -> bool {
        now - entry.fetched_at < self.ttl
    }

    /// Returns a fresh entry, or `None` on a miss or an expired entry.
    pub fn get(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Option<Arc<CachedProject>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(project_id.clone(), tenant_id.clone()))
            .filter(|entry| self.is_fresh(entry, now))
            .cloned()
    }

    pub fn put(&self, project: ProjectRef, fetched_at: DateTime<Utc>) -> Arc<CachedProject> {
        let key = (project.project_id.clone(), project.tenant_id.clone());
        let entry = Arc::new(CachedProject {
            project,
            fetched_at,
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&entry));
        entry
    }

    /// Drops every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Confirms that a project belongs to a tenant, consulting the cache first.
pub struct ProjectValidator {
    registry: Arc<dyn ProjectRegistry>,
    cache: Arc<ProjectCache>,
    clock: Arc<dyn Clock>,
}

impl ProjectValidator {
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        cache: Arc<ProjectCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            cache,
            clock,
        }
    }

    /// The cache shared with the reaper's sweep.
    pub fn cache(&self) -> &Arc<ProjectCache> {
        &self.cache
    }

    pub fn validate(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
    ) -> Result<ProjectRef, TimeError> {
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(project_id, tenant_id, now) {
            tracing::trace!(project_id = %project_id, tenant_id = %tenant_id, "project cache hit");
            return Ok(entry.project.clone());
        }

        tracing::debug!(project_id = %project_id, tenant_id = %tenant_id, "project cache miss");
        match self.registry.find_project(project_id, tenant_id)? {
            Some(project) => {
                // Guard against a registry that ignores the tenant filter.
                if project.tenant_id != *tenant_id || project.project_id != *project_id {
                    return Err(not_found(project_id, tenant_id));
                }
                self.cache.put(project.clone(), now);
                Ok(project)
            }
            None => Err(not_found(project_id, tenant_id)),
        }
    }
}

fn not_found(project_id: &ProjectId, tenant_id: &TenantId) -> TimeError {
    TimeError::NotFound(Missing::Project {
        project_id: project_id.clone(),
        tenant_id: tenant_id.clone(),
    })
}

/// A registry backed by a fixed in-memory list. Handy for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    projects: RwLock<HashMap<CacheKey, ProjectRef>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: ProjectRef) {
        let key = (project.project_id.clone(), project.tenant_id.clone());
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, project);
    }

    pub fn remove(&self, project_id: &ProjectId, tenant_id: &TenantId) -> Option<ProjectRef> {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(project_id.clone(), tenant_id.clone()))
    }
}

impl ProjectRegistry for StaticRegistry {
    fn find_project(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
    ) -> Result<Option<ProjectRef>, RegistryError> {
        Ok(self
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(project_id.clone(), tenant_id.clone()))
            .cloned())
    }
}
