//! End-to-end builds through the cloth manager

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::channel::Receiver;
use drape_cloth::{
    BuildEvent, BuildPhase, ChannelListener, ClothDefinition, ClothManager, ClothProcess, ClothState, ClothType,
    InMemoryRegistry, ManagerSettings, SimulationRegistry,
};
use drape_core::limits::{MAX_PROXY_EDGE_COUNT, MAX_PROXY_TRIANGLE_COUNT, MAX_PROXY_VERTEX_COUNT};
use drape_core::{ErrorCode, ErrorKind, ReductionSettings, ResultCode, TransformId, TransformRecord};
use drape_mesh::{
    BoneConnectionMode, BoneHierarchy, BoneNode, PaintMode, PaintTexture, RenderSetup, RendererId, VertexAttribute,
};
use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use tokio::runtime::Handle;

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        build_start_delay: Duration::from_millis(1),
        sync_attempts: 5,
        sync_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

/// `cols` x `rows` grid at 0.1 spacing; row `r` samples texel row `r`
fn grid(id: u64, cols: u32, rows: u32, offset: Vec3) -> RenderSetup {
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            positions.push(offset + Vec3::new(c as f32 * 0.1, -(r as f32) * 0.1, 0.0));
            uvs.push(Vec2::new((c as f32 + 0.5) / cols as f32, (r as f32 + 0.5) / rows as f32));
        }
    }
    let mut triangles = Vec::new();
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let i = r * cols + c;
            triangles.push([i, i + cols, i + 1]);
            triangles.push([i + 1, i + cols, i + cols + 1]);
        }
    }
    RenderSetup {
        renderer_id: RendererId(id),
        name: format!("grid{id}"),
        transform: TransformRecord::from_position(TransformId(100 + id), Vec3::ZERO),
        positions,
        uv_channels: vec![uvs],
        triangles,
        ..Default::default()
    }
}

/// One texel column, first row `top`, every other row `rest`
fn row_paint(rows: u32, top: [u8; 4], rest: [u8; 4]) -> PaintTexture {
    let mut pixels = vec![rest; rows as usize];
    pixels[0] = top;
    PaintTexture {
        name: "rows".into(),
        readable: true,
        width: 1,
        height: rows,
        mips: vec![pixels],
    }
}

fn mesh_cloth(name: &str, renderers: Vec<RendererId>, rows: u32) -> ClothDefinition {
    let mut def = ClothDefinition::mesh(name, renderers.clone());
    def.reduction = ReductionSettings::DISABLED;
    def.paint_mode = PaintMode::TextureFixedMove;
    def.paint_maps = renderers.iter().map(|_| row_paint(rows, RED, GREEN)).collect();
    def
}

fn manager_with(settings: ManagerSettings) -> (ClothManager, Arc<InMemoryRegistry>) {
    ClothManager::in_memory(Handle::current(), settings)
}

async fn next_event(rx: &Receiver<BuildEvent>) -> BuildEvent {
    let rx = rx.clone();
    tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .expect("build event")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_renderers_with_paint() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    let mut expected = 0;
    for i in 0..3 {
        let setup = grid(i + 1, 4, 5, Vec3::new(i as f32, 0.0, 0.0));
        expected += setup.vertex_count();
        manager.renderers().register_source(setup).unwrap();
    }

    let (listener, rx) = ChannelListener::new();
    let def = mesh_cloth("skirt", vec![RendererId(1), RendererId(2), RendererId(3)], 5);
    let processes = manager.launch(vec![def], Some(Arc::new(listener)));
    let event = next_event(&rx).await;

    assert!(event.success, "{:?}", event.result);
    assert_eq!(event.result, ResultCode::Success);
    let process = &processes[0];
    assert!(process.is_running());
    assert!(process.team_id().is_some());
    assert!(process.is_enable());
    assert!(process.has_proxy_mesh());

    let proxy = process.proxy_mesh().unwrap();
    assert_eq!(proxy.vertex_count(), expected);
    assert_eq!(proxy.fixed_count(), 12);
    assert!(proxy.vertex_count() <= MAX_PROXY_VERTEX_COUNT);
    assert!(proxy.triangle_count() <= MAX_PROXY_TRIANGLE_COUNT);
    assert!(proxy.proxy.as_ref().unwrap().edges.len() <= MAX_PROXY_EDGE_COUNT);

    assert_eq!(registry.mapping_count(), 3);
    assert_eq!(process.render_mesh_count(), 3);
    let info = process.render_mesh_info(1).unwrap();
    assert_eq!(info.renderer, RendererId(2));
    assert!(info.mapping.is_some());
    assert!(!info.shared);
    assert!(manager.renderers().is_in_use(RendererId(1)));

    let team = registry.team(process.team_id()).unwrap();
    assert!(team.enabled);
    assert!(team.constraints.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attribute_length_mismatch() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();

    let mut def = ClothDefinition::mesh("bad", vec![RendererId(1)]);
    def.vertex_attributes = vec![vec![VertexAttribute::MOVE; 4]];
    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![def], Some(Arc::new(listener)));
    let event = next_event(&rx).await;

    assert!(!event.success);
    assert_eq!(event.result.error(), Some(ErrorCode::VertexAttributeListDataMismatch));
    assert_eq!(event.result.kind(), Some(ErrorKind::DataMismatch));
    assert!(registry.is_empty());
    assert!(!processes[0].is_running());
    assert!(!processes[0].state().contains(ClothState::BUILD));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_paint_and_attributes_union() {
    init_logger();
    let (manager, _registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 4, 4, Vec3::ZERO)).unwrap();

    let mut def = ClothDefinition::mesh("union", vec![RendererId(1)]);
    def.reduction = ReductionSettings::DISABLED;
    def.paint_mode = PaintMode::TextureFixedMove;
    def.paint_maps = vec![row_paint(4, RED, BLACK)];
    def.vertex_attributes = vec![vec![VertexAttribute::MOVE; 16]];

    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![def], Some(Arc::new(listener)));
    assert!(next_event(&rx).await.success);

    let proxy = processes[0].proxy_mesh().unwrap();
    assert_eq!(proxy.vertex_count(), 16);
    assert_eq!(proxy.fixed_count(), 4);
    assert_eq!(proxy.move_count(), 12);
}

/// Start one cloth by hand so an observer can reach it through `slot`
fn start(
    manager: &ClothManager,
    def: ClothDefinition,
    slot: &Mutex<Option<Weak<ClothProcess>>>,
) -> (Arc<ClothProcess>, Receiver<BuildEvent>) {
    let process = manager.create(def);
    *slot.lock() = Some(Arc::downgrade(&process));
    let (listener, rx) = ChannelListener::new();
    process.set_build_listener(Arc::new(listener));
    process.init();
    process.start_use();
    process.auto_build();
    (process, rx)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_at_every_phase() {
    init_logger();
    let phases = [
        BuildPhase::Start,
        BuildPhase::Capture,
        BuildPhase::Import,
        BuildPhase::Selection,
        BuildPhase::Merge,
        BuildPhase::Reduction,
        BuildPhase::Optimize,
        BuildPhase::Attribute,
        BuildPhase::Proxy,
        BuildPhase::Mapping,
        BuildPhase::Sync,
        BuildPhase::Constraints,
        BuildPhase::Registration,
    ];
    for target in phases {
        let slot: Arc<Mutex<Option<Weak<ClothProcess>>>> = Arc::new(Mutex::new(None));
        let observed = Arc::clone(&slot);
        let settings = ManagerSettings {
            observer: Some(Arc::new(move |_, phase| {
                if phase != target {
                    return;
                }
                if let Some(process) = observed.lock().as_ref().and_then(Weak::upgrade) {
                    process.cancel_build();
                }
            })),
            ..fast_settings()
        };
        let (manager, registry) = manager_with(settings);
        manager.renderers().register_source(grid(1, 4, 4, Vec3::ZERO)).unwrap();

        let (process, rx) = start(&manager, mesh_cloth("cancel", vec![RendererId(1)], 4), &slot);
        let event = next_event(&rx).await;

        assert_eq!(event.result, ResultCode::Cancelled, "cancel at {target}");
        assert!(registry.is_empty(), "registry not empty after cancel at {target}");
        assert_eq!(registry.mapping_count(), 0);
        assert!(!process.is_running());
        assert!(!process.has_proxy_mesh());
        assert_eq!(process.render_mesh_count(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_during_build() {
    init_logger();
    let slot: Arc<Mutex<Option<Weak<ClothProcess>>>> = Arc::new(Mutex::new(None));
    let teardowns = Arc::new(Mutex::new(0usize));
    let observed = Arc::clone(&slot);
    let counter = Arc::clone(&teardowns);
    let settings = ManagerSettings {
        observer: Some(Arc::new(move |_, phase| match phase {
            BuildPhase::Constraints => {
                if let Some(process) = observed.lock().as_ref().and_then(Weak::upgrade) {
                    process.dispose();
                    assert!(process.is_building());
                }
            }
            BuildPhase::Teardown => *counter.lock() += 1,
            _ => {}
        })),
        ..fast_settings()
    };
    let (manager, registry) = manager_with(settings);
    manager.renderers().register_source(grid(1, 4, 4, Vec3::ZERO)).unwrap();

    let (process, _rx) = start(&manager, mesh_cloth("doomed", vec![RendererId(1)], 4), &slot);
    for _ in 0..500 {
        if *teardowns.lock() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(*teardowns.lock(), 1);
    assert!(process.is_destroyed());
    assert!(!process.is_building());
    assert!(registry.is_empty());
    assert!(manager.renderers().is_empty());

    process.dispose();
    assert_eq!(*teardowns.lock(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partner_pair_releases_suspend_counts() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();
    manager.renderers().register_source(grid(2, 3, 3, Vec3::X)).unwrap();

    let mut a = mesh_cloth("a", vec![RendererId(1)], 3);
    a.sync_partner = Some("b".into());
    let mut b = mesh_cloth("b", vec![RendererId(2)], 3);
    b.sync_partner = Some("a".into());
    let mut s = mesh_cloth("self", vec![RendererId(1)], 3);
    s.sync_partner = Some("self".into());

    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![a, b, s], Some(Arc::new(listener)));
    for _ in 0..3 {
        let event = next_event(&rx).await;
        assert!(event.success, "{} failed: {:?}", event.name, event.result);
    }

    for process in &processes {
        assert_eq!(registry.suspend_count(process.id()), 0);
        assert!(process.is_running());
    }
    assert_eq!(processes[0].sync_partner(), Some(processes[1].id()));
    assert_eq!(processes[0].sync_top(), None);
    assert_eq!(processes[2].sync_partner(), None);
    assert_eq!(registry.team_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pre_build_round_trip() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 4, 4, Vec3::ZERO)).unwrap();
    manager.renderers().register_source(grid(2, 4, 4, Vec3::X)).unwrap();

    let def = mesh_cloth("source", vec![RendererId(1), RendererId(2)], 4);
    let (listener, rx) = ChannelListener::new();
    let listener = Arc::new(listener);
    let source = manager.launch(vec![def.clone()], Some(listener.clone()));
    assert!(next_event(&rx).await.success);

    let data = source[0].export_pre_build().unwrap();
    assert!(data.has_data());
    let source_count = source[0].proxy_mesh().unwrap().vertex_count();

    let mut first = def.clone();
    first.name = "copy1".into();
    first.pre_build = Some(data.clone());
    let mut second = def;
    second.name = "copy2".into();
    second.pre_build = Some(data.clone());

    let copies = manager.launch(vec![first, second], Some(listener));
    for _ in 0..2 {
        assert!(next_event(&rx).await.success);
    }
    assert_eq!(manager.pre_build_store().ref_count(data.key()), 2);

    for copy in &copies {
        assert!(copy.state().contains(ClothState::USE_PRE_BUILD | ClothState::RUNNING));
        assert!(copy.has_proxy_mesh());
        assert_eq!(copy.proxy_mesh().unwrap().vertex_count(), source_count);
        let info = copy.render_mesh_info(0).unwrap();
        assert!(info.shared);
        assert!(info.mapping.is_some());
        assert!(!copy.start_runtime_build());
    }
    assert_eq!(registry.mapping_count(), 6);

    drop(copies);
    assert!(manager.pre_build_store().is_empty());
    assert_eq!(registry.team_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_pre_build() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();

    let mut def = ClothDefinition::mesh("corrupt", vec![RendererId(1)]);
    def.pre_build = Some(drape_cloth::PreBuildData {
        shared: vec![9, 9, 9],
        unique: drape_cloth::UniquePreBuildData {
            version: drape_cloth::prebuild::PRE_BUILD_VERSION,
            ..Default::default()
        },
    });
    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![def], Some(Arc::new(listener)));
    let event = next_event(&rx).await;

    assert!(!event.success);
    assert_eq!(event.result.error(), Some(ErrorCode::PreBuildDeserialization));
    assert!(!processes[0].is_valid());
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bone_cloth() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    let mut bones = Vec::new();
    let mut roots = Vec::new();
    for chain in 0..3u64 {
        for depth in 0..4u64 {
            let id = TransformId(chain * 10 + depth + 1);
            if depth == 0 {
                roots.push(id);
            }
            bones.push(BoneNode {
                id,
                name: format!("bone_{chain}_{depth}"),
                parent: (depth > 0).then(|| TransformId(chain * 10 + depth)),
                record: TransformRecord::from_position(id, Vec3::new(chain as f32 * 0.1, -(depth as f32) * 0.1, 0.0)),
            });
        }
    }
    manager.register_bones(BoneHierarchy { bones });

    let mut def = ClothDefinition::bone("hair", roots);
    def.connection_mode = BoneConnectionMode::SequentialNonLoopMesh;
    def.bone_attributes.insert("bone_1_3".into(), VertexAttribute::FIXED);
    let mut spring = def.clone();
    spring.name = "spring".into();
    spring.cloth_type = ClothType::BoneSpring;

    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![def, spring], Some(Arc::new(listener)));
    for _ in 0..2 {
        let event = next_event(&rx).await;
        assert!(event.success, "{} failed: {:?}", event.name, event.result);
    }

    let hair = processes[0].proxy_mesh().unwrap();
    assert_eq!(hair.vertex_count(), 12);
    assert_eq!(hair.fixed_count(), 4);
    assert!(hair.triangle_count() > 0);

    let spring = processes[1].proxy_mesh().unwrap();
    assert_eq!(spring.triangle_count(), 0);
    assert_eq!(processes[1].render_mesh_count(), 0);
    assert_eq!(registry.mapping_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_team_overflow() {
    init_logger();
    let settings = ManagerSettings {
        max_teams: 1,
        ..fast_settings()
    };
    let (manager, registry) = manager_with(settings);
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();

    let (listener, rx) = ChannelListener::new();
    let _processes = manager.launch(
        vec![
            mesh_cloth("first", vec![RendererId(1)], 3),
            mesh_cloth("second", vec![RendererId(1)], 3),
        ],
        Some(Arc::new(listener)),
    );
    let mut outcomes = vec![next_event(&rx).await, next_event(&rx).await];
    outcomes.sort_by_key(|e| !e.success);

    assert!(outcomes[0].success);
    assert_eq!(outcomes[1].result.error(), Some(ErrorCode::TeamOverflow));
    assert_eq!(outcomes[1].result.kind(), Some(ErrorKind::CapacityExceeded));
    assert_eq!(registry.team_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_auto_build_notifies() {
    init_logger();
    let (manager, registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();

    let mut def = mesh_cloth("manual", vec![RendererId(1)], 3);
    def.disable_auto_build = true;
    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(vec![def], Some(Arc::new(listener)));
    let event = rx.try_recv().unwrap();
    assert_eq!(event.name, "manual");
    assert!(!event.success);
    assert_eq!(event.result, ResultCode::Success);
    assert!(rx.try_recv().is_err());
    assert!(!processes[0].is_running());
    assert!(registry.is_empty());

    assert!(processes[0].start_runtime_build());
    assert!(next_event(&rx).await.success);
    assert!(processes[0].is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_auto_build_event_matches_return() {
    init_logger();
    let (manager, _registry) = manager_with(fast_settings());
    manager.renderers().register_source(grid(1, 3, 3, Vec3::ZERO)).unwrap();

    let def = mesh_cloth("source", vec![RendererId(1)], 3);
    let (listener, rx) = ChannelListener::new();
    let source = manager.launch(vec![def.clone()], Some(Arc::new(listener)));
    assert!(next_event(&rx).await.success);
    let data = source[0].export_pre_build().unwrap();

    let mut prebuilt = def.clone();
    prebuilt.name = "prebuilt".into();
    prebuilt.pre_build = Some(data);
    let mut disabled = def;
    disabled.name = "disabled".into();
    disabled.disable_auto_build = true;

    for def in [prebuilt, disabled] {
        let process = manager.create(def);
        let (listener, rx) = ChannelListener::new();
        process.set_build_listener(Arc::new(listener));
        process.init();
        process.start_use();
        let built = process.auto_build();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.success, built, "{}", event.name);
        assert_eq!(event.success, process.is_running(), "{}", event.name);
        assert!(rx.try_recv().is_err());
    }
}
