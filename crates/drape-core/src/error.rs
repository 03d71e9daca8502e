//! Errors and build results
//!
//! [`ErrorCode`] names every concrete failure, [`BuildError`] is what fallible
//! pipeline stages return, and [`ResultCode`] is the single result object a
//! build attempt reports into.

use thiserror::Error;

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input data or an unresolved required reference
    ConfigurationInvalid,
    /// Counts or sizes between parallel collections disagree
    DataMismatch,
    /// Mesh element counts or team slots exceed hard limits
    CapacityExceeded,
    /// Cooperative abort
    Cancelled,
    /// Unexpected fault
    Unknown,
}

/// Concrete failure codes
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[error("already destroyed components cannot be reinitialized")]
    AlreadyDestroyed,

    #[error("mesh cloth has no source renderer")]
    NoSourceRenderer,

    #[error("bone cloth has no root bone")]
    NoRootBone,

    #[error("invalid reduction settings")]
    InvalidReductionSettings,

    #[error("invalid cloth parameters")]
    InvalidParameters,

    #[error("referenced renderer is not registered")]
    RendererNotFound,

    #[error("failed to add renderer")]
    FailedAddRenderer,

    #[error("referenced bone is not part of the hierarchy")]
    BoneNotFound,

    #[error("render handle list is empty")]
    InvalidRenderHandleList,

    #[error("paint map is missing or malformed")]
    InvalidPaintMap,

    #[error("paint map is not readable")]
    PaintMapNotReadable,

    #[error("vertex attribute list contains an empty entry")]
    VertexAttributeListIsEmpty,

    #[error("invalid vertex attribute data")]
    InvalidVertexAttributeData,

    #[error("requested uv channel does not exist")]
    MissingUvChannel,

    #[error("mesh data is malformed")]
    InvalidMeshData,

    #[error("mesh has no vertices")]
    EmptyMesh,

    #[error("mesh operation applied out of pipeline order")]
    InvalidStage,

    #[error("synchronization partner is not registered")]
    SyncPartnerNotFound,

    #[error("runtime build cannot start")]
    CanNotStartBuild,

    #[error("cloth process is no longer valid")]
    ProcessInvalid,

    #[error("pre-build data is invalid")]
    PreBuildInvalid,

    #[error("pre-build setup data failed to deserialize")]
    PreBuildSetupDeserialization,

    #[error("pre-build shared data failed to deserialize")]
    PreBuildDeserialization,

    #[error("vertex attribute list count does not match renderer count")]
    VertexAttributeListCountMismatch,

    #[error("vertex attribute list length does not match renderer vertex count")]
    VertexAttributeListDataMismatch,

    #[error("paint map count does not match renderer count")]
    PaintMapCountMismatch,

    #[error("selection positions and attributes differ in length")]
    SelectionDataMismatch,

    #[error("pre-build render meshes do not match the registered renderers")]
    PreBuildRenderMismatch,

    #[error("init data does not match the cloth definition")]
    InitDataMismatch,

    #[error("proxy mesh exceeds 65535 vertices")]
    ProxyVertexOverflow,

    #[error("proxy mesh exceeds 65535 edges")]
    ProxyEdgeOverflow,

    #[error("proxy mesh exceeds 65535 triangles")]
    ProxyTriangleOverflow,

    #[error("team slots exhausted")]
    TeamOverflow,

    #[error("unexpected fault during cloth processing")]
    Exception,

    #[error("unexpected fault during constraint construction")]
    ConstraintException,

    #[error("unknown error")]
    Unknown,
}

impl ErrorCode {
    /// Category of this code
    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            VertexAttributeListCountMismatch
            | VertexAttributeListDataMismatch
            | PaintMapCountMismatch
            | SelectionDataMismatch
            | PreBuildRenderMismatch
            | InitDataMismatch => ErrorKind::DataMismatch,
            ProxyVertexOverflow | ProxyEdgeOverflow | ProxyTriangleOverflow | TeamOverflow => {
                ErrorKind::CapacityExceeded
            }
            Exception | ConstraintException | Unknown => ErrorKind::Unknown,
            _ => ErrorKind::ConfigurationInvalid,
        }
    }
}

/// Error returned by fallible pipeline stages
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] ErrorCode),
}

impl BuildError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Failed(code) => code.kind(),
        }
    }
}

/// Result type for pipeline stages
pub type BuildResult<T> = Result<T, BuildError>;

/// Outcome of one build or init attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultCode {
    /// Nothing attempted yet
    #[default]
    Empty,
    /// Attempt in progress
    Process,
    /// Attempt finished successfully
    Success,
    /// Attempt cancelled cooperatively
    Cancelled,
    /// Attempt failed
    Error(ErrorCode),
}

impl ResultCode {
    /// Reset to [`ResultCode::Empty`]
    pub fn clear(&mut self) {
        *self = Self::Empty;
    }

    /// Mark as in progress
    pub fn set_process(&mut self) {
        *self = Self::Process;
    }

    /// Mark as successful
    pub fn set_success(&mut self) {
        *self = Self::Success;
    }

    /// Mark as cancelled
    pub fn set_cancel(&mut self) {
        *self = Self::Cancelled;
    }

    /// Record an error code
    pub fn set_error(&mut self, code: ErrorCode) {
        *self = Self::Error(code);
    }

    /// Fold a stage failure into this result; the first hard error is kept.
    pub fn merge(&mut self, error: BuildError) {
        if self.is_error() {
            return;
        }
        match error {
            BuildError::Cancelled => self.set_cancel(),
            BuildError::Failed(code) => self.set_error(code),
        }
    }

    /// Nothing attempted yet
    pub fn is_none(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Attempt in progress
    pub fn is_process(&self) -> bool {
        matches!(self, Self::Process)
    }

    /// Attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Attempt was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Attempt failed with an error
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Attempt ended without success (error or cancel)
    pub fn is_failed(&self) -> bool {
        self.is_error() || self.is_cancelled()
    }

    /// Error code, if any
    pub fn error(&self) -> Option<ErrorCode> {
        match self {
            Self::Error(code) => Some(*code),
            _ => None,
        }
    }

    /// Error category, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Cancelled => Some(ErrorKind::Cancelled),
            Self::Error(code) => Some(code.kind()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Process => f.write_str("Process"),
            Self::Success => f.write_str("Success"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Error(code) => write!(f, "Error({:?}): {}", code, code),
        }
    }
}
