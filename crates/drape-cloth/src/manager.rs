//! Cloth manager
//!
//! Owns the collaborators every cloth process talks to (runtime handle,
//! registry, renderer manager, pre-build store, bone hierarchy) and a
//! directory of live processes used to resolve synchronization partners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use drape_core::limits::{BUILD_START_DELAY, MAX_TEAM_COUNT, SYNC_POLL_INTERVAL, SYNC_TIMEOUT_ATTEMPTS};
use drape_mesh::BoneHierarchy;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::definition::ClothDefinition;
use crate::listener::{BuildCompleteListener, BuildPhase, PhaseObserver};
use crate::prebuild::PreBuildStore;
use crate::process::ClothProcess;
use crate::registry::{ClothId, InMemoryRegistry, SimulationRegistry};
use crate::render::RenderManager;

/// Manager configuration
#[derive(Clone)]
pub struct ManagerSettings {
    /// Team slots of the built-in registry
    pub max_teams: usize,
    /// Delay before a runtime build starts
    pub build_start_delay: Duration,
    /// Partner sync polling attempts
    pub sync_attempts: u32,
    /// Partner sync polling interval
    pub sync_interval: Duration,
    /// Checkpoint callback
    pub observer: Option<PhaseObserver>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_teams: MAX_TEAM_COUNT,
            build_start_delay: BUILD_START_DELAY,
            sync_attempts: SYNC_TIMEOUT_ATTEMPTS,
            sync_interval: SYNC_POLL_INTERVAL,
            observer: None,
        }
    }
}

/// Services shared by every process of one manager
pub(crate) struct ClothContext {
    pub runtime: Handle,
    pub registry: Arc<dyn SimulationRegistry>,
    pub renderers: RenderManager,
    pub pre_build: PreBuildStore,
    pub bones: RwLock<BoneHierarchy>,
    pub settings: ManagerSettings,
    directory: RwLock<AHashMap<ClothId, Weak<ClothProcess>>>,
    names: RwLock<AHashMap<String, ClothId>>,
    next_id: AtomicU64,
}

impl ClothContext {
    pub fn process(&self, id: ClothId) -> Option<Arc<ClothProcess>> {
        let weak = self.directory.read().get(&id).cloned()?;
        weak.upgrade()
    }

    pub fn find(&self, name: &str) -> Option<ClothId> {
        self.names.read().get(name).copied()
    }

    /// Partner named by a process's definition
    pub fn partner_of(&self, id: ClothId) -> Option<ClothId> {
        let process = self.process(id)?;
        let name = process.definition().sync_partner.as_deref()?;
        self.find(name)
    }

    pub fn observe(&self, id: ClothId, phase: BuildPhase) {
        if let Some(observer) = &self.settings.observer {
            observer(id, phase);
        }
    }

    pub fn forget(&self, id: ClothId, name: &str) {
        self.directory.write().remove(&id);
        let mut names = self.names.write();
        if names.get(name) == Some(&id) {
            names.remove(name);
        }
    }
}

/// Entry point for hosts: creates and tracks cloth processes
pub struct ClothManager {
    ctx: Arc<ClothContext>,
}

impl ClothManager {
    /// Manager over an external registry
    pub fn new(runtime: Handle, registry: Arc<dyn SimulationRegistry>, settings: ManagerSettings) -> Self {
        Self {
            ctx: Arc::new(ClothContext {
                runtime,
                registry,
                renderers: RenderManager::new(),
                pre_build: PreBuildStore::new(),
                bones: RwLock::new(BoneHierarchy::default()),
                settings,
                directory: RwLock::new(AHashMap::new()),
                names: RwLock::new(AHashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Manager over a fresh [`InMemoryRegistry`] sized by `settings.max_teams`
    pub fn in_memory(runtime: Handle, settings: ManagerSettings) -> (Self, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new(settings.max_teams));
        let manager = Self::new(runtime, Arc::clone(&registry) as Arc<dyn SimulationRegistry>, settings);
        (manager, registry)
    }

    pub fn registry(&self) -> &Arc<dyn SimulationRegistry> {
        &self.ctx.registry
    }

    pub fn renderers(&self) -> &RenderManager {
        &self.ctx.renderers
    }

    pub fn pre_build_store(&self) -> &PreBuildStore {
        &self.ctx.pre_build
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.ctx.settings
    }

    /// Add bones to the scene hierarchy
    pub fn register_bones(&self, hierarchy: BoneHierarchy) {
        self.ctx.bones.write().bones.extend(hierarchy.bones);
    }

    /// Create a process; it stays uninitialized until [`ClothProcess::init`]
    pub fn create(&self, definition: ClothDefinition) -> Arc<ClothProcess> {
        let id = ClothId(self.ctx.next_id.fetch_add(1, Ordering::Relaxed));
        let name = definition.name.clone();
        let process = Arc::new(ClothProcess::new(id, definition, Arc::clone(&self.ctx)));

        self.ctx.directory.write().insert(id, Arc::downgrade(&process));
        if let Some(previous) = self.ctx.names.write().insert(name.clone(), id) {
            log::warn!("cloth name [{}] reused, {} no longer resolvable as partner", name, previous);
        }
        log::debug!("created {} [{}]", id, name);
        process
    }

    pub fn get(&self, id: ClothId) -> Option<Arc<ClothProcess>> {
        self.ctx.process(id)
    }

    pub fn find(&self, name: &str) -> Option<Arc<ClothProcess>> {
        self.ctx.find(name).and_then(|id| self.ctx.process(id))
    }

    /// Every live process, by id
    pub fn processes(&self) -> Vec<Arc<ClothProcess>> {
        let weak: Vec<Weak<ClothProcess>> = self.ctx.directory.read().values().cloned().collect();
        let mut live: Vec<Arc<ClothProcess>> = weak.iter().filter_map(Weak::upgrade).collect();
        live.sort_by_key(|p| p.id());
        live
    }

    /// Create, init, enable and auto build a set of cloths.
    ///
    /// Every process is created before any is initialized so partners can
    /// reference each other in any order.
    pub fn launch(
        &self,
        definitions: Vec<ClothDefinition>,
        listener: Option<Arc<dyn BuildCompleteListener>>,
    ) -> Vec<Arc<ClothProcess>> {
        let processes: Vec<Arc<ClothProcess>> = definitions.into_iter().map(|d| self.create(d)).collect();
        for process in &processes {
            if let Some(listener) = &listener {
                process.set_build_listener(Arc::clone(listener));
            }
            process.init();
            process.start_use();
        }
        for process in &processes {
            process.auto_build();
        }
        processes
    }

    /// Dispose every live process
    pub fn dispose_all(&self) {
        for process in self.processes() {
            process.dispose();
        }
    }
}
