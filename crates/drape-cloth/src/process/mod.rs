//! Cloth process
//!
//! One [`ClothProcess`] per cloth instance. It owns the lifecycle state,
//! drives init and the build pipeline, and holds every resource the build
//! registered with the simulation registry until it is disposed.
//!
//! Lock order is the instance mutex first, then the registry or the
//! renderer manager. Observers and listeners are never called with the
//! instance mutex held.

mod build;
mod init;
mod prebuild;

use std::sync::Arc;

use ahash::AHashSet;
use drape_constraints::ConstraintSet;
use drape_core::{CancellationToken, ResultCode, TransformId, TransformRecord};
use drape_mesh::{BoneSetup, RendererId, VertexAttribute, VirtualMesh, VirtualMeshContainer};
use parking_lot::{Mutex, RwLock};

use crate::definition::ClothDefinition;
use crate::listener::{BuildCompleteListener, BuildEvent, BuildPhase};
use crate::manager::ClothContext;
use crate::prebuild::PreBuildKey;
use crate::registry::{ClothId, MappingId, TeamId};
use crate::state::{ClothState, StateCell};

/// A render mesh owned by a process
pub(crate) struct RenderMeshEntry {
    pub renderer: RendererId,
    pub container: VirtualMeshContainer,
    /// Vertex offset inside the merged mesh
    pub merge_offset: Option<u32>,
    pub mapping: Option<MappingId>,
}

/// Public view of one render mesh
#[derive(Debug, Clone)]
pub struct RenderMeshInfo {
    pub renderer: RendererId,
    pub mesh: Option<Arc<VirtualMesh>>,
    pub mapping: Option<MappingId>,
    /// Came from pre-built data
    pub shared: bool,
}

#[derive(Default)]
pub(crate) struct ProcessInner {
    pub result: ResultCode,
    pub init_data_result: ResultCode,
    pub team: TeamId,
    pub cancel: CancellationToken,
    pub destroyed: bool,
    pub destroyed_internal: bool,
    pub building: bool,
    pub renderers: Vec<RendererId>,
    pub render_meshes: Vec<RenderMeshEntry>,
    pub bone_setup: Option<Arc<BoneSetup>>,
    pub bone_overrides: Vec<(TransformId, VertexAttribute)>,
    pub cloth_record: TransformRecord,
    pub normal_adjustment: Option<TransformRecord>,
    pub custom_skinning: Vec<TransformRecord>,
    pub proxy: Option<VirtualMeshContainer>,
    pub constraints: Option<Arc<ConstraintSet>>,
    pub sync_partner: Option<ClothId>,
    pub sync_top: Option<ClothId>,
    pub pre_build_key: Option<PreBuildKey>,
}

/// One cloth instance
pub struct ClothProcess {
    id: ClothId,
    definition: ClothDefinition,
    ctx: Arc<ClothContext>,
    state: StateCell,
    inner: Mutex<ProcessInner>,
    listener: RwLock<Option<Arc<dyn BuildCompleteListener>>>,
}

impl ClothProcess {
    pub(crate) fn new(id: ClothId, definition: ClothDefinition, ctx: Arc<ClothContext>) -> Self {
        Self {
            id,
            definition,
            ctx,
            state: StateCell::new(),
            inner: Mutex::new(ProcessInner::default()),
            listener: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ClothId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ClothDefinition {
        &self.definition
    }

    /// Snapshot of the state bits
    pub fn state(&self) -> ClothState {
        self.state.get()
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Valid, registered, and enabled in the registry
    pub fn is_enable(&self) -> bool {
        if !self.state.is_valid() {
            return false;
        }
        let team = self.inner.lock().team;
        team.is_some() && self.ctx.registry.is_enable(team)
    }

    pub fn has_proxy_mesh(&self) -> bool {
        let inner = self.inner.lock();
        self.state.is_valid()
            && inner.team.is_some()
            && inner.proxy.as_ref().is_some_and(|p| p.mesh().is_some())
    }

    pub fn team_id(&self) -> TeamId {
        self.inner.lock().team
    }

    /// Result of the last init or build
    pub fn result(&self) -> ResultCode {
        self.inner.lock().result
    }

    /// Outcome of applying captured init data
    pub fn init_data_result(&self) -> ResultCode {
        self.inner.lock().init_data_result
    }

    pub fn render_mesh_count(&self) -> usize {
        self.inner.lock().render_meshes.len()
    }

    pub fn render_mesh_info(&self, index: usize) -> Option<RenderMeshInfo> {
        let inner = self.inner.lock();
        let entry = inner.render_meshes.get(index)?;
        Some(RenderMeshInfo {
            renderer: entry.renderer,
            mesh: entry.container.shared(),
            mapping: entry.mapping,
            shared: entry.container.is_shared(),
        })
    }

    pub fn proxy_mesh(&self) -> Option<Arc<VirtualMesh>> {
        self.inner.lock().proxy.as_ref().and_then(|p| p.shared())
    }

    pub fn constraints(&self) -> Option<Arc<ConstraintSet>> {
        self.inner.lock().constraints.clone()
    }

    /// Suspend count held for this cloth by building partners
    pub fn suspend_counter(&self) -> u32 {
        self.ctx.registry.suspend_count(self.id)
    }

    pub fn sync_partner(&self) -> Option<ClothId> {
        self.inner.lock().sync_partner
    }

    /// Last cloth of the partner chain, resolved at init. Informational:
    /// the build waits on the direct partner and suspends the chain by
    /// walking it again, so partners created later are still seen.
    pub fn sync_top(&self) -> Option<ClothId> {
        self.inner.lock().sync_top
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    pub fn is_building(&self) -> bool {
        self.inner.lock().building
    }

    pub fn set_skip_writing(&self, skip: bool) {
        self.state.set(ClothState::SKIP_WRITING, skip);
    }

    pub fn set_camera_culling(&self, invisible: bool, keep: bool) {
        self.state.set(ClothState::CAMERA_CULLING_INVISIBLE, invisible);
        self.state.set(ClothState::CAMERA_CULLING_KEEP, keep);
    }

    pub fn set_distance_culling(&self, invisible: bool) {
        self.state.set(ClothState::DISTANCE_CULLING_INVISIBLE, invisible);
    }

    pub fn set_update_tangent(&self, update: bool) {
        self.state.set(ClothState::UPDATE_TANGENT, update);
    }

    /// The host component became active
    pub fn start_use(&self) {
        self.state.set(ClothState::COMPONENT, true);
        self.update_use();
    }

    /// The host component became inactive
    pub fn end_use(&self) {
        self.state.set(ClothState::COMPONENT, false);
        self.update_use();
    }

    /// Recompute `ENABLE` and push it to the registry and the renderers
    pub fn update_use(&self) {
        let enable = self.state.wants_enable();
        self.state.set(ClothState::ENABLE, enable);

        let inner = self.inner.lock();
        if inner.destroyed_internal {
            return;
        }
        if inner.team.is_some() {
            self.ctx.registry.set_enable(inner.team, enable);
        }
        for &renderer in &inner.renderers {
            if enable {
                self.ctx.renderers.start_use(self.id, renderer);
            } else {
                self.ctx.renderers.end_use(self.id, renderer);
            }
        }
    }

    pub fn increment_suspend_counter(&self) {
        self.ctx.registry.increment_suspend(self.id);
    }

    pub fn decrement_suspend_counter(&self) {
        self.ctx.registry.decrement_suspend(self.id);
    }

    pub fn set_build_listener(&self, listener: Arc<dyn BuildCompleteListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Cancel an in-flight build; the process stays usable
    pub fn cancel_build(&self) {
        self.inner.lock().cancel.cancel();
    }

    /// Dispose the process. Safe from any thread and idempotent; while a
    /// build is in flight the teardown runs in that build's cleanup.
    pub fn dispose(&self) {
        {
            let mut inner = self.inner.lock();
            inner.destroyed = true;
            inner.result.clear();
            inner.cancel.cancel();
            self.state.set(ClothState::VALID, false);
        }
        self.dispose_internal();
    }

    pub(crate) fn dispose_internal(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.destroyed_internal || inner.building {
                return;
            }
            inner.destroyed_internal = true;

            let team = std::mem::take(&mut inner.team);
            if team.is_some() {
                self.ctx.registry.exit_colliders(team);
                self.ctx.registry.remove_cloth(team);
            }
            for mut entry in inner.render_meshes.drain(..) {
                entry.container.dispose();
            }
            for renderer in std::mem::take(&mut inner.renderers) {
                self.ctx.renderers.end_use(self.id, renderer);
                self.ctx.renderers.remove_renderer(renderer);
            }
            if let Some(mut proxy) = inner.proxy.take() {
                proxy.dispose();
            }
            inner.constraints = None;
            inner.bone_setup = None;
            if let Some(key) = inner.pre_build_key.take() {
                self.ctx.pre_build.unregister(key);
            }
            self.ctx.registry.remove_suspend(self.id);
        }

        self.state.clear();
        self.ctx.forget(self.id, self.name());
        log::debug!("{} [{}] disposed", self.id, self.name());
        self.ctx.observe(self.id, BuildPhase::Teardown);
    }

    /// Walk the partner chain from `partner` to its last member
    pub(crate) fn resolve_sync_top(&self, partner: Option<ClothId>) -> Option<ClothId> {
        let mut visited = AHashSet::new();
        visited.insert(self.id);
        let mut top = None;
        let mut cursor = partner;
        while let Some(id) = cursor {
            if id == self.id {
                log::warn!("{} [{}]: partner chain loops back to itself", self.id, self.name());
                return None;
            }
            if !visited.insert(id) {
                log::warn!("{} [{}]: cyclic partner chain at {}", self.id, self.name(), id);
                break;
            }
            top = Some(id);
            cursor = self.ctx.partner_of(id);
        }
        top
    }

    /// Increment the suspend counter of every partner up the chain.
    /// Returns the cloths incremented.
    pub(crate) fn suspend_partner_chain(&self) -> Vec<ClothId> {
        let mut chain = Vec::new();
        let mut cursor = self.sync_partner();
        while let Some(id) = cursor {
            if id == self.id || chain.contains(&id) {
                break;
            }
            self.ctx.registry.increment_suspend(id);
            chain.push(id);
            cursor = self.ctx.partner_of(id);
        }
        chain
    }

    /// Send the build event. `success` is the outcome of the build call,
    /// not of the stored result.
    pub(crate) fn notify(&self, success: bool, result: ResultCode) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_build_complete(BuildEvent {
                cloth: self.id,
                name: self.definition.name.clone(),
                success,
                result,
            });
        }
    }
}

impl Drop for ClothProcess {
    fn drop(&mut self) {
        // no task can still hold the process here
        self.inner.get_mut().building = false;
        self.dispose();
    }
}

impl std::fmt::Debug for ClothProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClothProcess")
            .field("id", &self.id)
            .field("name", &self.definition.name)
            .field("state", &self.state.get())
            .finish()
    }
}
