//! Runtime build pipeline
//!
//! A build is one tokio task: a short start delay, a capture of everything
//! the workers need as plain values, mesh construction on a blocking
//! worker, the partner wait, constraint construction on a blocking worker,
//! and registration under the instance lock. Cleanup always runs.

use std::any::Any;
use std::sync::Arc;

use drape_constraints::ConstraintSet;
use drape_core::{
    BuildError, BuildResult, CancellationToken, ErrorCode, ReductionSettings, ResultCode, TransformId,
    TransformRecord,
};
use drape_mesh::{
    selection_margin, BoneSetup, PaintMapData, ProxySettings, RenderSetup, RendererId, SelectionData,
    VertexAttribute, VirtualMesh, VirtualMeshContainer,
};
use tracing::Instrument;

use super::{ClothProcess, RenderMeshEntry};
use crate::definition::ClothType;
use crate::listener::BuildPhase;
use crate::manager::ClothContext;
use crate::registry::ClothId;
use crate::state::ClothState;

/// Observer call plus cancellation check, usable from any thread
#[derive(Clone)]
pub(crate) struct Checkpoint {
    ctx: Arc<ClothContext>,
    cloth: ClothId,
    cancel: CancellationToken,
}

impl Checkpoint {
    pub fn new(ctx: Arc<ClothContext>, cloth: ClothId, cancel: CancellationToken) -> Self {
        Self { ctx, cloth, cancel }
    }

    pub fn at(&self, phase: BuildPhase) -> BuildResult<()> {
        self.ctx.observe(self.cloth, phase);
        self.cancel.check()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Resources a build owns until registration takes them
#[derive(Default)]
pub(crate) struct PendingBuild {
    /// Partners whose suspend counter this build incremented
    pub suspended: Vec<ClothId>,
    pub proxy: Option<VirtualMeshContainer>,
    pub render_meshes: Vec<RenderMeshEntry>,
    pub constraints: Option<Arc<ConstraintSet>>,
}

impl PendingBuild {
    /// Dispose whatever registration did not take. Returns the mesh count.
    pub fn release(&mut self) -> usize {
        let mut released = 0;
        if self.proxy.take().is_some_and(|mut proxy| proxy.dispose()) {
            released += 1;
        }
        for mut entry in self.render_meshes.drain(..) {
            if entry.container.dispose() {
                released += 1;
            }
        }
        self.constraints = None;
        released
    }
}

/// Value snapshot of everything the mesh worker reads
struct BuildCapture {
    cloth_type: ClothType,
    cloth: TransformRecord,
    renderers: Vec<Arc<RenderSetup>>,
    renderer_ids: Vec<RendererId>,
    vertex_attributes: Option<Vec<Vec<VertexAttribute>>>,
    paint_maps: Option<Vec<PaintMapData>>,
    selection: SelectionData,
    bone_setup: Option<Arc<BoneSetup>>,
    bone_overrides: Vec<(TransformId, VertexAttribute)>,
    uv_channel: usize,
    reduction: ReductionSettings,
    proxy_settings: ProxySettings,
}

struct MeshOutput {
    proxy: VirtualMesh,
    render_meshes: Vec<(RendererId, VirtualMesh, Option<u32>)>,
}

impl ClothProcess {
    /// Schedule a runtime build. Fails when the process is not valid and
    /// initialized, is already building or running, or uses pre-built data.
    pub fn start_runtime_build(self: &Arc<Self>) -> bool {
        let started = {
            let mut inner = self.inner.lock();
            if inner.destroyed || inner.building || !self.state.can_start_build() {
                let code = if inner.destroyed {
                    ErrorCode::AlreadyDestroyed
                } else {
                    ErrorCode::CanNotStartBuild
                };
                if !inner.result.is_error() {
                    inner.result.set_error(code);
                }
                None
            } else {
                if inner.cancel.is_cancelled() {
                    inner.cancel = CancellationToken::new();
                }
                inner.building = true;
                inner.result.set_process();
                self.state.set(ClothState::BUILD, true);
                Some(inner.cancel.clone())
            }
        };
        let Some(cancel) = started else {
            log::error!("{} [{}]: cannot start build: {}", self.id, self.name(), self.result());
            return false;
        };

        let process = Arc::clone(self);
        let span = tracing::debug_span!("runtime_build", cloth = %self.id, name = %self.name());
        self.ctx.runtime.spawn(
            async move {
                let mut pending = PendingBuild::default();
                let outcome = process.runtime_build(&cancel, &mut pending).await;
                process.finish_build(outcome, pending);
            }
            .instrument(span),
        );
        true
    }

    /// Build the way the process is configured: pre-built data
    /// synchronously, otherwise a scheduled runtime build. The build
    /// listener hears about the outcome exactly once.
    pub fn auto_build(self: &Arc<Self>) -> bool {
        if self.state.is(ClothState::DISABLE_AUTO_BUILD) {
            log::debug!("{} [{}]: auto build disabled", self.id, self.name());
            self.notify(false, self.result());
            return false;
        }
        if self.state.is(ClothState::USE_PRE_BUILD) {
            let built = self.pre_build_construction();
            self.notify(built, self.result());
            return built;
        }
        if self.start_runtime_build() {
            return true;
        }
        self.notify(false, self.result());
        false
    }

    async fn runtime_build(&self, cancel: &CancellationToken, pending: &mut PendingBuild) -> BuildResult<()> {
        let checkpoint = Checkpoint::new(Arc::clone(&self.ctx), self.id, cancel.clone());

        tokio::time::sleep(self.ctx.settings.build_start_delay).await;
        checkpoint.at(BuildPhase::Start)?;
        pending.suspended = self.suspend_partner_chain();

        checkpoint.at(BuildPhase::Capture)?;
        let capture = self.capture()?;

        let worker = checkpoint.clone();
        let output = join_blocking(move || build_meshes(&capture, &worker), ErrorCode::Exception).await?;
        pending.proxy = Some(VirtualMeshContainer::new(output.proxy));
        pending.render_meshes = output
            .render_meshes
            .into_iter()
            .map(|(renderer, mesh, merge_offset)| RenderMeshEntry {
                renderer,
                container: VirtualMeshContainer::new(mesh),
                merge_offset,
                mapping: None,
            })
            .collect();

        checkpoint.at(BuildPhase::Sync)?;
        self.wait_sync_partner(cancel).await?;
        if !self.state.is_valid() {
            return Err(ErrorCode::ProcessInvalid.into());
        }

        checkpoint.at(BuildPhase::Constraints)?;
        let mesh = pending
            .proxy
            .as_ref()
            .and_then(|p| p.shared())
            .ok_or(ErrorCode::ProcessInvalid)?;
        let params = self.definition.parameters;
        let token = cancel.clone();
        let constraints = join_blocking(
            move || ConstraintSet::build(&mesh, &params, &token),
            ErrorCode::ConstraintException,
        )
        .await?;
        pending.constraints = Some(Arc::new(constraints));

        checkpoint.at(BuildPhase::Registration)?;
        self.register(pending, cancel)?;
        self.update_use();
        Ok(())
    }

    /// Validate the definition against the acquired renderers and snapshot
    /// every input of the mesh worker.
    fn capture(&self) -> Result<BuildCapture, ErrorCode> {
        let def = &self.definition;
        let inner = self.inner.lock();

        let renderers = inner
            .renderers
            .iter()
            .map(|&id| self.ctx.renderers.get(id).ok_or(ErrorCode::RendererNotFound))
            .collect::<Result<Vec<_>, _>>()?;
        let is_mesh = def.cloth_type == ClothType::MeshCloth;

        let vertex_attributes = if is_mesh && !def.vertex_attributes.is_empty() {
            if def.vertex_attributes.len() != renderers.len() {
                return Err(ErrorCode::VertexAttributeListCountMismatch);
            }
            for (list, setup) in def.vertex_attributes.iter().zip(&renderers) {
                if list.is_empty() {
                    return Err(ErrorCode::VertexAttributeListIsEmpty);
                }
                if list.len() != setup.vertex_count() {
                    return Err(ErrorCode::VertexAttributeListDataMismatch);
                }
            }
            Some(def.vertex_attributes.clone())
        } else {
            None
        };

        let paint_maps = if is_mesh && def.paint_mode.uses_texture() {
            if def.paint_maps.len() != renderers.len() {
                return Err(ErrorCode::PaintMapCountMismatch);
            }
            let flags = def.paint_mode.read_flags();
            let maps = def
                .paint_maps
                .iter()
                .map(|texture| PaintMapData::decode(texture, flags))
                .collect::<Result<Vec<_>, _>>()?;
            Some(maps)
        } else {
            None
        };

        // per-renderer data replaces the authored selection
        let selection = if vertex_attributes.is_some() || paint_maps.is_some() {
            SelectionData::default()
        } else {
            def.selection.clone().unwrap_or_default()
        };

        Ok(BuildCapture {
            cloth_type: def.cloth_type,
            cloth: inner.cloth_record,
            renderer_ids: inner.renderers.clone(),
            renderers,
            vertex_attributes,
            paint_maps,
            selection,
            bone_setup: inner.bone_setup.clone(),
            bone_overrides: inner.bone_overrides.clone(),
            uv_channel: def.uv_channel,
            reduction: def.reduction,
            proxy_settings: ProxySettings {
                cloth: inner.cloth_record,
                normal_alignment: def.normal_alignment,
                normal_adjustment: inner.normal_adjustment,
                custom_skinning_bones: inner.custom_skinning.clone(),
            },
        })
    }

    /// Poll until the partner is enabled. A timeout only warns.
    async fn wait_sync_partner(&self, cancel: &CancellationToken) -> BuildResult<()> {
        let Some(partner) = self.sync_partner() else {
            return Ok(());
        };
        let settings = &self.ctx.settings;
        let mut remaining = settings.sync_attempts;
        loop {
            match self.ctx.process(partner) {
                None => {
                    log::warn!("{} [{}]: partner {} is gone", self.id, self.name(), partner);
                    return Ok(());
                }
                Some(p) if p.is_enable() => {
                    log::debug!("{} [{}]: partner {} ready", self.id, self.name(), partner);
                    return Ok(());
                }
                Some(_) => {}
            }
            if remaining == 0 {
                log::warn!(
                    "{} [{}]: timed out waiting for partner {}, continuing without it",
                    self.id,
                    self.name(),
                    partner
                );
                return Ok(());
            }
            remaining -= 1;
            tokio::time::sleep(settings.sync_interval).await;
            cancel.check()?;
        }
    }

    /// Hand the build output to the registry in one locked section.
    /// Nothing is registered once the build is cancelled.
    pub(crate) fn register(&self, pending: &mut PendingBuild, cancel: &CancellationToken) -> BuildResult<()> {
        let mut inner = self.inner.lock();
        cancel.check()?;
        if inner.destroyed {
            return Err(BuildError::Cancelled);
        }

        let mesh = pending
            .proxy
            .as_ref()
            .and_then(|p| p.shared())
            .ok_or(ErrorCode::ProcessInvalid)?;
        let registry = &self.ctx.registry;
        let team = registry.add_cloth(self.id, &self.definition.parameters);
        if !team.is_some() {
            return Err(ErrorCode::TeamOverflow.into());
        }

        registry.register_proxy_mesh(team, mesh);
        registry.register_colliders(team, &self.definition.colliders);
        if let Some(constraints) = &pending.constraints {
            registry.register_constraints(team, Arc::clone(constraints));
        }
        for mut entry in pending.render_meshes.drain(..) {
            if let Some(render) = entry.container.shared().filter(|m| m.mapping.is_some() && m.is_valid()) {
                entry.mapping = Some(registry.register_mapping_mesh(team, entry.renderer, render));
            }
            inner.render_meshes.push(entry);
        }

        inner.team = team;
        inner.proxy = pending.proxy.take();
        inner.constraints = pending.constraints.take();
        log::debug!(
            "{} [{}] registered as {} with {} mapping(s)",
            self.id,
            self.name(),
            team,
            inner.render_meshes.iter().filter(|e| e.mapping.is_some()).count()
        );
        Ok(())
    }

    /// Cleanup of every runtime build
    fn finish_build(&self, outcome: BuildResult<()>, mut pending: PendingBuild) {
        self.ctx.observe(self.id, BuildPhase::Cleanup);
        let released = pending.release();
        if released > 0 {
            log::debug!("{} [{}]: released {} unregistered mesh(es)", self.id, self.name(), released);
        }
        for partner in &pending.suspended {
            self.ctx.registry.decrement_suspend(*partner);
        }

        let (destroyed, result) = {
            let mut inner = self.inner.lock();
            match outcome {
                Ok(()) if !inner.destroyed => inner.result.set_success(),
                Ok(()) => inner.result.set_cancel(),
                Err(error) => inner.result.merge(error),
            }
            inner.building = false;
            self.state.set(ClothState::BUILD, false);
            if inner.result.is_success() {
                self.state.set(ClothState::RUNNING, true);
            }
            (inner.destroyed, inner.result)
        };

        if destroyed {
            self.dispose_internal();
            return;
        }
        match result {
            ResultCode::Error(code) => log::error!("{} [{}]: build failed: {}", self.id, self.name(), code),
            ResultCode::Cancelled => log::info!("{} [{}]: build cancelled", self.id, self.name()),
            _ => log::debug!("{} [{}]: build complete", self.id, self.name()),
        }
        self.notify(result.is_success(), result);
    }
}

/// Mesh construction, run on a blocking worker
fn build_meshes(capture: &BuildCapture, checkpoint: &Checkpoint) -> BuildResult<MeshOutput> {
    let mut proxy = VirtualMesh::new_proxy("Proxy", &capture.cloth);
    let mut selection = capture.selection.clone();
    let mut render_meshes = Vec::with_capacity(capture.renderers.len());

    match capture.cloth_type {
        ClothType::MeshCloth => {
            if capture.renderers.is_empty() {
                return Err(ErrorCode::InvalidRenderHandleList.into());
            }
            let margin = selection_margin(&capture.reduction);
            for (i, setup) in capture.renderers.iter().enumerate() {
                checkpoint.at(BuildPhase::Import)?;
                let mut mesh = VirtualMesh::new(format!("[{}]", setup.name));
                mesh.import_render(setup, capture.uv_channel)?;
                log::debug!("(IMPORT) {}", mesh);

                checkpoint.at(BuildPhase::Selection)?;
                let local = renderer_selection(capture, i, &mesh)?;
                if let Some(local) = &local {
                    selection.merge(local);
                }
                let crop = local.as_ref().unwrap_or(&capture.selection);
                if crop.is_valid() {
                    mesh.crop_to_selection(crop, &capture.cloth, margin)?;
                    log::debug!("(SELECTION) {}", mesh);
                }

                checkpoint.at(BuildPhase::Merge)?;
                let offset = proxy.add_mesh(&mesh)?;
                render_meshes.push((capture.renderer_ids[i], mesh, Some(offset)));
            }
            log::debug!("(MERGE) {}", proxy);
        }
        ClothType::BoneCloth | ClothType::BoneSpring => {
            checkpoint.at(BuildPhase::Import)?;
            let setup = capture.bone_setup.as_deref().ok_or(ErrorCode::NoRootBone)?;
            proxy.import_bones(setup, &capture.cloth)?;
            log::debug!("(IMPORT) {}", proxy);

            checkpoint.at(BuildPhase::Selection)?;
            if !selection.is_valid() {
                selection = SelectionData::from_mesh(&proxy);
                selection.fill(VertexAttribute::MOVE);
                for root in &setup.root_ids {
                    if let Some(i) = setup.transform_index(*root) {
                        selection.attributes[i] = VertexAttribute::FIXED;
                    }
                }
            }
            if !apply_bone_overrides(&mut selection, setup, &capture.bone_overrides) {
                log::warn!(
                    "{} bone attribute override(s) skipped: selection has {} points, proxy has {} bones",
                    capture.bone_overrides.len(),
                    selection.count(),
                    proxy.vertex_count()
                );
            }
        }
    }

    checkpoint.at(BuildPhase::Reduction)?;
    proxy.assign_join_indices()?;
    if capture.cloth_type == ClothType::MeshCloth && proxy.vertex_count() > 1 && capture.reduction.is_enabled() {
        proxy.reduction(&capture.reduction, checkpoint.token())?;
        log::debug!("(REDUCTION) {}", proxy);
    }

    checkpoint.at(BuildPhase::Optimize)?;
    proxy.optimize()?;
    log::debug!("(OPTIMIZE) {}", proxy);

    checkpoint.at(BuildPhase::Attribute)?;
    if selection.is_valid() {
        proxy.apply_selection_attribute(&selection)?;
    }

    checkpoint.at(BuildPhase::Proxy)?;
    proxy.convert_to_proxy(&capture.proxy_settings, checkpoint.token())?;
    proxy.check_proxy_capacity()?;
    log::debug!("(PROXY) {}", proxy);

    for (_, mesh, offset) in render_meshes.iter_mut() {
        checkpoint.at(BuildPhase::Mapping)?;
        mesh.mapping(&proxy, *offset)?;
        log::debug!("(MAPPING) {}", mesh);
    }

    Ok(MeshOutput { proxy, render_meshes })
}

/// Override attributes by bone identity. Overrides address bone indices,
/// which only line up with a selection holding one point per bone.
/// Returns false when overrides exist but could not be applied.
fn apply_bone_overrides(
    selection: &mut SelectionData,
    setup: &BoneSetup,
    overrides: &[(TransformId, VertexAttribute)],
) -> bool {
    if overrides.is_empty() {
        return true;
    }
    if selection.count() != setup.bone_count() {
        return false;
    }
    for (id, attribute) in overrides {
        if let Some(i) = setup.transform_index(*id) {
            selection.attributes[i] = *attribute;
        }
    }
    true
}

/// Selection from the explicit attributes and the paint map of one
/// renderer, merged when both exist
fn renderer_selection(
    capture: &BuildCapture,
    index: usize,
    mesh: &VirtualMesh,
) -> Result<Option<SelectionData>, ErrorCode> {
    let mut local: Option<SelectionData> = None;
    if let Some(lists) = &capture.vertex_attributes {
        let list = lists.get(index).ok_or(ErrorCode::VertexAttributeListCountMismatch)?;
        local = Some(SelectionData::from_vertex_attributes(&capture.cloth, mesh, list)?);
    }
    if let Some(maps) = &capture.paint_maps {
        let map = maps.get(index).ok_or(ErrorCode::PaintMapCountMismatch)?;
        let painted = SelectionData::from_paint_map(&capture.cloth, mesh, map)?;
        match local.as_mut() {
            Some(selection) => selection.merge(&painted),
            None => local = Some(painted),
        }
    }
    Ok(local)
}

/// Run `work` on the blocking pool. A panic is reported as `fault`.
async fn join_blocking<T, F>(work: F, fault: ErrorCode) -> BuildResult<T>
where
    F: FnOnce() -> BuildResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            log::error!("build worker panicked: {}", panic_message(e.into_panic()));
            Err(fault.into())
        }
        Err(e) => {
            log::error!("build worker aborted: {}", e);
            Err(fault.into())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
