//! Simulation registry
//!
//! The registry is the team/resource allocator owned by the frame solver.
//! The cloth process only talks to it through [`SimulationRegistry`];
//! [`InMemoryRegistry`] is a complete implementation used by the CLI and
//! the tests.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use drape_constraints::ConstraintSet;
use drape_core::ClothParameters;
use drape_core::limits::MAX_TEAM_COUNT;
use drape_mesh::{RendererId, VirtualMesh};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Identity of one cloth instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClothId(pub u64);

impl fmt::Display for ClothId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cloth#{}", self.0)
    }
}

/// Simulation slot; 0 means unregistered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub u32);

impl TeamId {
    /// Unregistered
    pub const NONE: Self = Self(0);

    /// Whether a slot is assigned
    pub fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team#{}", self.0)
    }
}

/// Identity of a collider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColliderId(pub u64);

/// Handle of a registered mapping mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingId(pub u32);

/// Team and resource allocator consumed by the cloth process
pub trait SimulationRegistry: Send + Sync {
    /// Allocate a team; [`TeamId::NONE`] when every slot is taken
    fn add_cloth(&self, cloth: ClothId, params: &ClothParameters) -> TeamId;

    /// Release a team and everything registered under it
    fn remove_cloth(&self, team: TeamId);

    fn register_proxy_mesh(&self, team: TeamId, mesh: Arc<VirtualMesh>);

    fn register_mapping_mesh(&self, team: TeamId, renderer: RendererId, mesh: Arc<VirtualMesh>) -> MappingId;

    fn register_constraints(&self, team: TeamId, constraints: Arc<ConstraintSet>);

    fn register_colliders(&self, team: TeamId, colliders: &[ColliderId]);

    fn exit_colliders(&self, team: TeamId);

    /// Enable or disable a team; no-op for [`TeamId::NONE`]
    fn set_enable(&self, team: TeamId, enable: bool);

    fn is_enable(&self, team: TeamId) -> bool;

    fn increment_suspend(&self, cloth: ClothId);

    /// Decrement; the entry disappears at zero
    fn decrement_suspend(&self, cloth: ClothId);

    fn suspend_count(&self, cloth: ClothId) -> u32;

    fn remove_suspend(&self, cloth: ClothId);
}

/// Everything registered under one team
#[derive(Debug, Clone)]
pub struct TeamEntry {
    pub cloth: ClothId,
    pub params: ClothParameters,
    pub enabled: bool,
    pub proxy_mesh: Option<Arc<VirtualMesh>>,
    pub constraints: Option<Arc<ConstraintSet>>,
    pub mappings: Vec<(MappingId, RendererId, Arc<VirtualMesh>)>,
    pub colliders: Vec<ColliderId>,
}

#[derive(Default)]
struct RegistryInner {
    teams: AHashMap<TeamId, TeamEntry>,
    free: Vec<TeamId>,
    next_team: u32,
    next_mapping: u32,
    suspend: AHashMap<ClothId, u32>,
    removed: usize,
}

/// Registry keeping everything in memory behind one lock
pub struct InMemoryRegistry {
    max_teams: usize,
    inner: Mutex<RegistryInner>,
}

impl InMemoryRegistry {
    /// Registry with `max_teams` slots
    pub fn new(max_teams: usize) -> Self {
        Self {
            max_teams,
            inner: Mutex::new(RegistryInner {
                next_team: 1,
                ..Default::default()
            }),
        }
    }

    /// Number of live teams
    pub fn team_count(&self) -> usize {
        self.inner.lock().teams.len()
    }

    /// Snapshot of one team
    pub fn team(&self, team: TeamId) -> Option<TeamEntry> {
        self.inner.lock().teams.get(&team).cloned()
    }

    /// Team of a cloth, if registered
    pub fn team_of(&self, cloth: ClothId) -> Option<TeamId> {
        let inner = self.inner.lock();
        inner.teams.iter().find(|(_, e)| e.cloth == cloth).map(|(t, _)| *t)
    }

    /// Registered proxy meshes across all teams
    pub fn proxy_mesh_count(&self) -> usize {
        self.inner.lock().teams.values().filter(|e| e.proxy_mesh.is_some()).count()
    }

    /// Registered mapping meshes across all teams
    pub fn mapping_count(&self) -> usize {
        self.inner.lock().teams.values().map(|e| e.mappings.len()).sum()
    }

    /// Registered constraint sets across all teams
    pub fn constraint_count(&self) -> usize {
        self.inner.lock().teams.values().filter(|e| e.constraints.is_some()).count()
    }

    /// Registered colliders across all teams
    pub fn collider_count(&self) -> usize {
        self.inner.lock().teams.values().map(|e| e.colliders.len()).sum()
    }

    /// Number of `remove_cloth` calls that released a team
    pub fn removed_count(&self) -> usize {
        self.inner.lock().removed
    }

    /// Whether no resource of any kind is registered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().teams.is_empty()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(MAX_TEAM_COUNT)
    }
}

impl SimulationRegistry for InMemoryRegistry {
    fn add_cloth(&self, cloth: ClothId, params: &ClothParameters) -> TeamId {
        let mut inner = self.inner.lock();
        if inner.teams.len() >= self.max_teams {
            log::warn!("team slots exhausted ({})", self.max_teams);
            return TeamId::NONE;
        }
        let team = match inner.free.pop() {
            Some(team) => team,
            None => {
                let team = TeamId(inner.next_team);
                inner.next_team += 1;
                team
            }
        };
        inner.teams.insert(
            team,
            TeamEntry {
                cloth,
                params: *params,
                enabled: false,
                proxy_mesh: None,
                constraints: None,
                mappings: Vec::new(),
                colliders: Vec::new(),
            },
        );
        log::debug!("{} -> {}", cloth, team);
        team
    }

    fn remove_cloth(&self, team: TeamId) {
        let mut inner = self.inner.lock();
        if inner.teams.remove(&team).is_some() {
            inner.free.push(team);
            inner.removed += 1;
            log::debug!("{} released", team);
        }
    }

    fn register_proxy_mesh(&self, team: TeamId, mesh: Arc<VirtualMesh>) {
        if let Some(entry) = self.inner.lock().teams.get_mut(&team) {
            entry.proxy_mesh = Some(mesh);
        }
    }

    fn register_mapping_mesh(&self, team: TeamId, renderer: RendererId, mesh: Arc<VirtualMesh>) -> MappingId {
        let mut inner = self.inner.lock();
        inner.next_mapping += 1;
        let id = MappingId(inner.next_mapping);
        if let Some(entry) = inner.teams.get_mut(&team) {
            entry.mappings.push((id, renderer, mesh));
        }
        id
    }

    fn register_constraints(&self, team: TeamId, constraints: Arc<ConstraintSet>) {
        if let Some(entry) = self.inner.lock().teams.get_mut(&team) {
            entry.constraints = Some(constraints);
        }
    }

    fn register_colliders(&self, team: TeamId, colliders: &[ColliderId]) {
        if let Some(entry) = self.inner.lock().teams.get_mut(&team) {
            entry.colliders.extend_from_slice(colliders);
        }
    }

    fn exit_colliders(&self, team: TeamId) {
        if let Some(entry) = self.inner.lock().teams.get_mut(&team) {
            entry.colliders.clear();
        }
    }

    fn set_enable(&self, team: TeamId, enable: bool) {
        if let Some(entry) = self.inner.lock().teams.get_mut(&team) {
            entry.enabled = enable;
        }
    }

    fn is_enable(&self, team: TeamId) -> bool {
        self.inner.lock().teams.get(&team).is_some_and(|e| e.enabled)
    }

    fn increment_suspend(&self, cloth: ClothId) {
        *self.inner.lock().suspend.entry(cloth).or_insert(0) += 1;
    }

    fn decrement_suspend(&self, cloth: ClothId) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.suspend.get_mut(&cloth) {
            *count -= 1;
            if *count == 0 {
                inner.suspend.remove(&cloth);
            }
        }
    }

    fn suspend_count(&self, cloth: ClothId) -> u32 {
        self.inner.lock().suspend.get(&cloth).copied().unwrap_or(0)
    }

    fn remove_suspend(&self, cloth: ClothId) {
        self.inner.lock().suspend.remove(&cloth);
    }
}
