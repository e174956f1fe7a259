use thiserror::Error;

/// Error taxonomy for the graph core. Every fallible entry point in this
/// crate returns `GPResult<T>`; there is no local recovery attempted for any
/// of these — construction and planning are meant to see only well-formed
/// graphs, so failures are surfaced immediately.
#[derive(Error, Debug)]
pub enum GPError {
    /// A §3 structural invariant failed during `Graph::check_valid`.
    #[error("graph invariant violated: {0}")]
    InvariantViolation(String),

    /// Broadcasting or an operator's `infer_shape` found incompatible inputs.
    #[error("shape mismatch: {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// An axis fell outside `[-rank, rank-1]`, or a permutation was not a
    /// bijection over `[0, rank)`.
    #[error("bad axis {axis} for rank {rank}")]
    BadAxis { axis: i64, rank: usize },

    /// `topo_sort` made no progress with operators still unemitted.
    #[error("graph contains a cycle among operators {0:?}")]
    CyclicGraph(Vec<usize>),

    /// A tensor's runtime handle differs from the graph's.
    #[error("cross-runtime tensor: graph uses {graph_runtime}, tensor uses {tensor_runtime}")]
    CrossRuntime {
        graph_runtime: String,
        tensor_runtime: String,
    },

    /// `alloc`/`free` called on an `OffsetAllocator` after `get_ptr` froze it.
    #[error("allocator is frozen: get_ptr() was already called")]
    FrozenAllocator,

    /// The `Runtime` collaborator's `alloc` failed.
    #[error("runtime allocation of {bytes} bytes failed: {reason}")]
    RuntimeOom { bytes: usize, reason: String },

    /// Referenced a `TensorId`/`OperatorId` that does not exist in the graph.
    #[error("no such {kind} in graph: {id}")]
    NoSuchId { kind: &'static str, id: usize },
}

pub type GPResult<T> = Result<T, GPError>;
