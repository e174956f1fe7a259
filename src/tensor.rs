//! Tensor metadata: shape, element type, and the graph linkage a `Graph`
//! needs to keep its tensor↔operator adjacency consistent. Tensor *data* is
//! out of scope for this core — `DataBlob` is only ever a base pointer plus
//! an offset, bound once at `Graph::data_malloc` time.

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimePtr;
use crate::types::{ElemType, OperatorId, Shape, TensorId};

/// A bound view into the graph's single backing buffer, established by
/// `Graph::data_malloc`. Never reallocated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlob {
    pub base: RuntimePtr,
    pub offset: usize,
}

/// A node in the tensor side of the graph: shape, element type, and weak
/// back-references to the operators that produce and consume it.
///
/// `source`/`targets` are resolved through the owning `Graph`'s membership,
/// not through lifetime-extending pointers — they are plain `OperatorId`s,
/// matching the spec's requirement that removing an operator cannot leave a
/// dangling tensor reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    pub(crate) id: TensorId,
    shape: Shape,
    dtype: ElemType,
    source: Option<OperatorId>,
    targets: Vec<OperatorId>,
    /// Identity of the `Runtime` this tensor was created under (see
    /// `Runtime::identity`), checked by `Graph::add_tensor_existing` to
    /// reject cross-runtime mixing.
    runtime_tag: String,
    #[serde(skip)]
    data_blob: Option<DataBlob>,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, shape: Shape, dtype: ElemType, runtime_tag: String) -> Self {
        Self {
            id,
            shape,
            dtype,
            source: None,
            targets: Vec::new(),
            runtime_tag,
            data_blob: None,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn runtime_tag(&self) -> &str {
        &self.runtime_tag
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> ElemType {
        self.dtype
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    /// `product(shape) * element_width`.
    pub fn get_bytes(&self) -> usize {
        self.shape.numel() * self.dtype.byte_width()
    }

    pub fn source(&self) -> Option<OperatorId> {
        self.source
    }

    pub fn set_source(&mut self, op: OperatorId) {
        self.source = Some(op);
    }

    pub fn clear_source(&mut self) {
        self.source = None;
    }

    pub fn targets(&self) -> &[OperatorId] {
        &self.targets
    }

    pub fn add_target(&mut self, op: OperatorId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub fn remove_target(&mut self, op: OperatorId) {
        self.targets.retain(|&t| t != op);
    }

    pub(crate) fn clear_targets(&mut self) {
        self.targets.clear();
    }

    pub fn data_blob(&self) -> Option<DataBlob> {
        self.data_blob
    }

    pub fn set_data_blob(&mut self, blob: DataBlob) {
        self.data_blob = Some(blob);
    }

    /// Whether this tensor has neither a producer nor any consumer — such a
    /// tensor must never exist in a valid graph (spec §3).
    pub fn is_orphan(&self) -> bool {
        self.source.is_none() && self.targets.is_empty()
    }
}

/// Byte size convenience free function, used by tests and the memory
/// planner alike, for a shape known ahead of any `Tensor`.
pub fn bytes_for(shape: &Shape, dtype: ElemType) -> usize {
    shape.numel() * dtype.byte_width()
}
