//! Process initialization

use std::sync::Arc;

use drape_core::{ErrorCode, NormalAlignment, ResultCode};
use drape_mesh::BoneSetup;

use super::ClothProcess;
use crate::definition::{ClothInitData, ClothType, INIT_DATA_VERSION};
use crate::listener::BuildPhase;
use crate::state::ClothState;

impl ClothProcess {
    /// Initialize from the definition. Never fails loudly: the outcome is
    /// returned and kept in [`ClothProcess::result`], and a failed process
    /// stays invalid.
    pub fn init(&self) -> ResultCode {
        let _span = tracing::debug_span!("cloth_init", cloth = %self.id, name = %self.name()).entered();
        self.ctx.observe(self.id, BuildPhase::Init);
        {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                inner.result.set_error(ErrorCode::AlreadyDestroyed);
                return inner.result;
            }
            if self.state.is(ClothState::INIT_COMPLETE) {
                return inner.result;
            }
            inner.result.set_process();
        }

        let outcome = self.init_resources();

        let mut inner = self.inner.lock();
        self.state.set(ClothState::INIT_COMPLETE, true);
        match outcome {
            Ok(()) => {
                inner.result.set_success();
                self.state.set(
                    ClothState::VALID | ClothState::INIT_SUCCESS | ClothState::VERIFICATION,
                    true,
                );
                log::debug!("{} [{}] initialized", self.id, self.name());
            }
            Err(code) => {
                inner.result.set_error(code);
                log::error!("{} [{}]: init failed: {}", self.id, self.name(), code);
            }
        }
        inner.result
    }

    fn init_resources(&self) -> Result<(), ErrorCode> {
        let def = &self.definition;
        def.validate()?;
        self.state.set(ClothState::DISABLE_AUTO_BUILD, def.disable_auto_build);

        let mut cloth_record = def.transform;
        let mut normal_adjustment = def.normal_adjustment;
        let mut custom_skinning = {
            let bones = self.ctx.bones.read();
            def.custom_skinning_bones
                .iter()
                .map(|id| bones.get(*id).map(|b| b.record).ok_or(ErrorCode::BoneNotFound))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut init_data_result = ResultCode::Empty;
        if let Some(init) = &def.init_data {
            match init.validate(def) {
                Ok(()) => {
                    cloth_record.restore_from(&init.cloth_transform);
                    if init.normal_adjustment.is_some() {
                        normal_adjustment = init.normal_adjustment;
                    }
                    for (record, captured) in custom_skinning.iter_mut().zip(&init.custom_skinning_bones) {
                        record.restore_from(captured);
                    }
                    init_data_result.set_success();
                }
                Err(code) => {
                    log::warn!("{} [{}]: init data ignored: {}", self.id, self.name(), code);
                    init_data_result.set_error(code);
                }
            }
        }
        self.inner.lock().init_data_result = init_data_result;

        if let Some(data) = def.pre_build.as_ref().filter(|p| p.has_data()) {
            data.validate()?;
            let shared = self.ctx.pre_build.register(data)?;
            {
                let mut inner = self.inner.lock();
                inner.pre_build_key = Some(data.key());
            }
            if shared.cloth_type != def.cloth_type {
                return Err(ErrorCode::PreBuildInvalid);
            }
            let renderer_count = match def.cloth_type {
                ClothType::MeshCloth => def.renderers.len(),
                _ => 0,
            };
            if shared.render_meshes.len() != renderer_count
                || data.unique.render_meshes.len() != shared.render_meshes.len()
            {
                return Err(ErrorCode::PreBuildRenderMismatch);
            }
            // pre-built geometry has the build scale baked in
            cloth_record.scale = shared.build_scale;
            self.state.set(ClothState::USE_PRE_BUILD, true);
        }

        match def.cloth_type {
            ClothType::MeshCloth => {
                for &renderer in &def.renderers {
                    let id = self.ctx.renderers.add_renderer(renderer)?;
                    self.inner.lock().renderers.push(id);
                }
            }
            ClothType::BoneCloth | ClothType::BoneSpring => {
                let bones = self.ctx.bones.read();
                let setup = BoneSetup::new(&bones, &def.root_bones, def.effective_connection_mode())?;
                let mut overrides = Vec::with_capacity(def.bone_attributes.len());
                for (name, attribute) in &def.bone_attributes {
                    match bones.find_by_name(name) {
                        Some(bone) => overrides.push((bone.id, *attribute)),
                        None => log::warn!("{} [{}]: no bone named [{}]", self.id, self.name(), name),
                    }
                }
                drop(bones);

                let mut inner = self.inner.lock();
                inner.bone_setup = Some(Arc::new(setup));
                inner.bone_overrides = overrides;
            }
        }

        if def.normal_alignment == NormalAlignment::Transform && normal_adjustment.is_none() {
            normal_adjustment = Some(cloth_record);
        }

        let partner = match &def.sync_partner {
            None => None,
            Some(name) => {
                let id = self.ctx.find(name).ok_or(ErrorCode::SyncPartnerNotFound)?;
                if id == self.id {
                    log::warn!("{} [{}]: cloth cannot synchronize with itself", self.id, self.name());
                    None
                } else {
                    Some(id)
                }
            }
        };
        let top = self.resolve_sync_top(partner);

        let mut inner = self.inner.lock();
        inner.cloth_record = cloth_record;
        inner.normal_adjustment = normal_adjustment;
        inner.custom_skinning = custom_skinning;
        inner.sync_partner = partner;
        inner.sync_top = top;
        Ok(())
    }

    /// Transform snapshots of this process, reusable as init data
    pub fn capture_init_data(&self) -> ClothInitData {
        let inner = self.inner.lock();
        ClothInitData {
            version: INIT_DATA_VERSION,
            cloth_transform: inner.cloth_record,
            normal_adjustment: inner.normal_adjustment,
            custom_skinning_bones: inner.custom_skinning.clone(),
            renderer_count: self.definition.renderers.len(),
            root_bone_count: self.definition.root_bones.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use drape_core::{TransformId, TransformRecord};
    use drape_mesh::{BoneHierarchy, BoneNode, RenderSetup, RendererId};
    use glam::Vec3;
    use tokio::runtime::Handle;

    use super::*;
    use crate::definition::ClothDefinition;
    use crate::manager::{ClothManager, ManagerSettings};

    fn triangle(id: u64) -> RenderSetup {
        RenderSetup {
            renderer_id: RendererId(id),
            name: format!("tri{id}"),
            transform: TransformRecord::IDENTITY,
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            triangles: vec![[0, 1, 2]],
            ..Default::default()
        }
    }

    fn manager() -> ClothManager {
        ClothManager::in_memory(Handle::current(), ManagerSettings::default()).0
    }

    #[tokio::test]
    async fn test_init_success() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let process = manager.create(ClothDefinition::mesh("a", vec![RendererId(1)]));

        assert!(process.init().is_success());
        assert!(process.state().contains(ClothState::VALID | ClothState::INIT_SUCCESS | ClothState::INIT_COMPLETE));
        assert_eq!(manager.renderers().ref_count(RendererId(1)), 1);

        // second init is a no-op
        assert!(process.init().is_success());
        assert_eq!(manager.renderers().ref_count(RendererId(1)), 1);
    }

    #[tokio::test]
    async fn test_init_failure_keeps_error() {
        let manager = manager();
        let process = manager.create(ClothDefinition::mesh("a", vec![RendererId(9)]));
        let result = process.init();
        assert_eq!(result.error(), Some(ErrorCode::RendererNotFound));
        assert!(!process.is_valid());
        assert!(process.state().contains(ClothState::INIT_COMPLETE));
    }

    #[tokio::test]
    async fn test_unknown_partner() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let mut def = ClothDefinition::mesh("a", vec![RendererId(1)]);
        def.sync_partner = Some("missing".into());
        let process = manager.create(def);
        assert_eq!(process.init().error(), Some(ErrorCode::SyncPartnerNotFound));
    }

    #[tokio::test]
    async fn test_partner_chain_top() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let mut a = ClothDefinition::mesh("a", vec![RendererId(1)]);
        a.sync_partner = Some("b".into());
        let mut b = ClothDefinition::mesh("b", vec![RendererId(1)]);
        b.sync_partner = Some("c".into());
        let c = ClothDefinition::mesh("c", vec![RendererId(1)]);
        let a = manager.create(a);
        let b = manager.create(b);
        let c = manager.create(c);

        assert!(a.init().is_success());
        assert_eq!(a.sync_partner(), Some(b.id()));
        assert_eq!(a.sync_top(), Some(c.id()));
    }

    #[tokio::test]
    async fn test_cyclic_and_self_partner_terminate() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let mut a = ClothDefinition::mesh("a", vec![RendererId(1)]);
        a.sync_partner = Some("b".into());
        let mut b = ClothDefinition::mesh("b", vec![RendererId(1)]);
        b.sync_partner = Some("a".into());
        let mut s = ClothDefinition::mesh("s", vec![RendererId(1)]);
        s.sync_partner = Some("s".into());
        let a = manager.create(a);
        let b = manager.create(b);
        let s = manager.create(s);

        assert!(a.init().is_success());
        assert!(b.init().is_success());
        assert_eq!(a.sync_partner(), Some(b.id()));
        assert_eq!(a.sync_top(), None);

        assert!(s.init().is_success());
        assert_eq!(s.sync_partner(), None);
        assert_eq!(s.sync_top(), None);
    }

    #[tokio::test]
    async fn test_bone_overrides_and_skinning() {
        let manager = manager();
        manager.register_bones(BoneHierarchy {
            bones: vec![
                BoneNode {
                    id: TransformId(1),
                    name: "root".into(),
                    parent: None,
                    record: TransformRecord::from_position(TransformId(1), Vec3::ZERO),
                },
                BoneNode {
                    id: TransformId(2),
                    name: "tip".into(),
                    parent: Some(TransformId(1)),
                    record: TransformRecord::from_position(TransformId(2), Vec3::NEG_Y),
                },
            ],
        });
        let mut def = ClothDefinition::bone("tail", vec![TransformId(1)]);
        def.bone_attributes.insert("tip".into(), drape_mesh::VertexAttribute::FIXED);
        def.bone_attributes.insert("ghost".into(), drape_mesh::VertexAttribute::FIXED);
        def.custom_skinning_bones = vec![TransformId(2)];
        let process = manager.create(def);

        assert!(process.init().is_success());
        let inner = process.inner.lock();
        assert_eq!(inner.bone_overrides, vec![(TransformId(2), drape_mesh::VertexAttribute::FIXED)]);
        assert_eq!(inner.custom_skinning.len(), 1);
        assert_eq!(inner.bone_setup.as_ref().map(|s| s.bone_count()), Some(2));
    }

    #[tokio::test]
    async fn test_init_data_overlay() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let mut def = ClothDefinition::mesh("a", vec![RendererId(1)]);
        def.init_data = Some(ClothInitData {
            version: INIT_DATA_VERSION,
            cloth_transform: TransformRecord::from_position(TransformId(0), Vec3::new(0.0, 2.0, 0.0)),
            renderer_count: 1,
            ..Default::default()
        });
        let process = manager.create(def);
        assert!(process.init().is_success());
        assert!(process.init_data_result().is_success());
        assert_eq!(process.capture_init_data().cloth_transform.position, Vec3::new(0.0, 2.0, 0.0));

        let mut stale = ClothDefinition::mesh("b", vec![RendererId(1)]);
        stale.init_data = Some(ClothInitData {
            version: INIT_DATA_VERSION,
            renderer_count: 3,
            ..Default::default()
        });
        let stale = manager.create(stale);
        assert!(stale.init().is_success());
        assert_eq!(stale.init_data_result().error(), Some(ErrorCode::InitDataMismatch));
    }

    #[tokio::test]
    async fn test_dispose_releases_renderers() {
        let manager = manager();
        manager.renderers().register_source(triangle(1)).unwrap();
        let process = manager.create(ClothDefinition::mesh("a", vec![RendererId(1)]));
        process.init();
        process.dispose();
        process.dispose();
        assert!(manager.renderers().is_empty());
        assert!(process.state().is_empty());
        assert_eq!(process.init().error(), Some(ErrorCode::AlreadyDestroyed));
    }
}
