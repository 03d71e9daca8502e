//! Build notifications
//!
//! [`BuildCompleteListener`] receives exactly one call per auto build.
//! A [`PhaseObserver`] sees every checkpoint of every build.

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use drape_core::ResultCode;

use crate::registry::ClothId;

/// Receiver of build completion
pub trait BuildCompleteListener: Send + Sync {
    fn on_build_complete(&self, event: BuildEvent);
}

/// Outcome of one auto build
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEvent {
    pub cloth: ClothId,
    pub name: String,
    pub success: bool,
    pub result: ResultCode,
}

/// Listener forwarding events into a crossbeam channel
#[derive(Clone)]
pub struct ChannelListener {
    sender: Sender<BuildEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn new() -> (Self, Receiver<BuildEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl BuildCompleteListener for ChannelListener {
    fn on_build_complete(&self, event: BuildEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("build event dropped, receiver closed");
        }
    }
}

impl<F> BuildCompleteListener for F
where
    F: Fn(BuildEvent) + Send + Sync,
{
    fn on_build_complete(&self, event: BuildEvent) {
        self(event)
    }
}

/// Checkpoints of init, build and teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Init,
    Start,
    Capture,
    Import,
    Selection,
    Merge,
    Reduction,
    Optimize,
    Attribute,
    Proxy,
    Mapping,
    Sync,
    Constraints,
    Registration,
    Cleanup,
    PreBuild,
    Teardown,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Capture => "capture",
            Self::Import => "import",
            Self::Selection => "selection",
            Self::Merge => "merge",
            Self::Reduction => "reduction",
            Self::Optimize => "optimize",
            Self::Attribute => "attribute",
            Self::Proxy => "proxy",
            Self::Mapping => "mapping",
            Self::Sync => "sync",
            Self::Constraints => "constraints",
            Self::Registration => "registration",
            Self::Cleanup => "cleanup",
            Self::PreBuild => "pre_build",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host callback invoked at every checkpoint
pub type PhaseObserver = Arc<dyn Fn(ClothId, BuildPhase) + Send + Sync>;
