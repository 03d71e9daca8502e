//! Pre-built fast path and pre-build export

use std::sync::Arc;

use drape_core::{BuildResult, ErrorCode};
use drape_mesh::{UniqueMeshData, VirtualMeshContainer};

use super::build::PendingBuild;
use super::{ClothProcess, RenderMeshEntry};
use crate::listener::BuildPhase;
use crate::prebuild::{PRE_BUILD_VERSION, PreBuildData, SharePreBuildData, UniquePreBuildData};
use crate::state::ClothState;

impl ClothProcess {
    /// Register the pre-built meshes and constraints without running the
    /// mesh pipeline. Synchronous.
    pub fn pre_build_construction(&self) -> bool {
        let ready = ClothState::VALID | ClothState::INIT_SUCCESS | ClothState::USE_PRE_BUILD;
        if !self.state.is(ready) || self.state.is_running() {
            let mut inner = self.inner.lock();
            if !inner.result.is_error() {
                inner.result.set_error(ErrorCode::CanNotStartBuild);
            }
            return false;
        }
        let _span = tracing::debug_span!("pre_build", cloth = %self.id, name = %self.name()).entered();
        self.ctx.observe(self.id, BuildPhase::PreBuild);

        let mut pending = PendingBuild::default();
        let outcome = self.attach_pre_build(&mut pending);
        pending.release();

        let success = {
            let mut inner = self.inner.lock();
            match outcome {
                Ok(()) => inner.result.set_success(),
                Err(error) => inner.result.merge(error),
            }
            if inner.result.is_success() {
                self.state.set(ClothState::RUNNING, true);
            }
            if let Some(code) = inner.result.error() {
                log::error!("{} [{}]: pre-build failed: {}", self.id, self.name(), code);
            }
            inner.result.is_success()
        };
        if success {
            self.update_use();
        }
        success
    }

    fn attach_pre_build(&self, pending: &mut PendingBuild) -> BuildResult<()> {
        let data = self.definition.pre_build.as_ref().ok_or(ErrorCode::PreBuildInvalid)?;
        let (shared, renderers, cancel) = {
            let inner = self.inner.lock();
            let key = inner.pre_build_key.ok_or(ErrorCode::PreBuildInvalid)?;
            let shared = self.ctx.pre_build.get(key).ok_or(ErrorCode::PreBuildInvalid)?;
            (shared, inner.renderers.clone(), inner.cancel.clone())
        };

        let proxy = VirtualMeshContainer::from_shared(Arc::clone(&shared.proxy_mesh), data.unique.proxy_mesh.clone());
        if !proxy.mesh().is_some_and(|m| m.is_proxy()) {
            return Err(ErrorCode::PreBuildDeserialization.into());
        }
        pending.proxy = Some(proxy);
        pending.constraints = Some(Arc::clone(&shared.constraints));

        for (i, mesh) in shared.render_meshes.iter().enumerate() {
            let renderer = *renderers.get(i).ok_or(ErrorCode::PreBuildRenderMismatch)?;
            let unique = data
                .unique
                .render_meshes
                .get(i)
                .cloned()
                .ok_or(ErrorCode::PreBuildRenderMismatch)?;
            pending.render_meshes.push(RenderMeshEntry {
                renderer,
                container: VirtualMeshContainer::from_shared(Arc::clone(mesh), unique),
                merge_offset: None,
                mapping: None,
            });
        }

        self.register(pending, &cancel)
    }

    /// Export the finished runtime build as pre-build data
    pub fn export_pre_build(&self) -> Result<PreBuildData, ErrorCode> {
        if !self.state.is_running() || self.state.is(ClothState::USE_PRE_BUILD) {
            return Err(ErrorCode::ProcessInvalid);
        }
        let inner = self.inner.lock();
        let container = inner.proxy.as_ref().ok_or(ErrorCode::ProcessInvalid)?;
        let proxy = container.mesh().ok_or(ErrorCode::ProcessInvalid)?;

        let mut render_meshes = Vec::with_capacity(inner.render_meshes.len());
        let mut unique_meshes = Vec::with_capacity(inner.render_meshes.len());
        for entry in &inner.render_meshes {
            let mesh = entry.container.mesh().ok_or(ErrorCode::ProcessInvalid)?;
            render_meshes.push(mesh.clone());
            unique_meshes.push(UniqueMeshData::from_mesh(mesh));
        }

        let share = SharePreBuildData {
            version: PRE_BUILD_VERSION,
            cloth_type: self.definition.cloth_type,
            build_scale: inner.cloth_record.scale,
            proxy_mesh: proxy.clone(),
            render_meshes,
            constraints: inner.constraints.as_deref().cloned().unwrap_or_default(),
        };
        let data = PreBuildData {
            shared: share.to_bytes()?,
            unique: UniquePreBuildData {
                version: PRE_BUILD_VERSION,
                proxy_mesh: UniqueMeshData::from_mesh(proxy),
                render_meshes: unique_meshes,
            },
        };
        log::debug!(
            "{} [{}]: exported pre-build {} ({} bytes)",
            self.id,
            self.name(),
            data.key(),
            data.shared.len()
        );
        Ok(data)
    }
}
