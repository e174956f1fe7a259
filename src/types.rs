use serde::{Deserialize, Serialize};

/// Fingerprint unique identifier of a tensor, stable within a graph (FUID).
///
/// An index into `Graph`'s tensor vector, not an owning reference — tensors
/// are looked up through the graph, never through a lifetime-extending
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TensorId(pub usize);

/// Globally unique identifier of an operator within a graph (GUID).
///
/// An index into `Graph`'s operator vector, used for both the op's own
/// identity and for the predecessor/successor adjacency sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub usize);

/// Element type of a tensor's (absent) data, carrying only the byte width
/// the allocator needs — this core never reads or writes tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElemType {
    F32,
    F64,
    I32,
    I64,
    Bool,
}

impl ElemType {
    pub fn byte_width(self) -> usize {
        match self {
            ElemType::F32 => 4,
            ElemType::F64 => 8,
            ElemType::I32 => 4,
            ElemType::I64 => 8,
            ElemType::Bool => 1,
        }
    }
}

/// The shape of a tensor: an ordered sequence of non-negative extents.
///
/// A thin domain-specific wrapper, matching the role the teacher crate's own
/// `Shape` newtype plays, but over a plain `Vec<usize>` since the graph core
/// never needs `ndarray`'s dimensionality machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}
