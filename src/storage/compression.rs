//! Node id encodings for adjacency lists.

use crate::primitives::bytes::le;
use crate::types::{NodeId, TableId};

const TABLE_ID_BYTES: usize = 4;
const OFFSET_BYTES: usize = 8;

/// How node ids are stored inside an adjacency list.
///
/// Fixed when the structure is created; changing it means rebuilding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeIdCompression {
    /// Neighbours may live in any table: store `(table, offset)`.
    Heterogeneous,
    /// Every neighbour lives in `table`: store the offset only.
    Homogeneous {
        /// The implied table.
        table: TableId,
    },
}

impl NodeIdCompression {
    /// Picks the scheme for a list whose neighbours come from `tables`.
    pub fn for_tables(tables: &[TableId]) -> Self {
        match tables {
            [only] => NodeIdCompression::Homogeneous { table: *only },
            [first, rest @ ..] if rest.iter().all(|t| t == first) => {
                NodeIdCompression::Homogeneous { table: *first }
            }
            _ => NodeIdCompression::Heterogeneous,
        }
    }

    /// Bytes one compressed id occupies.
    pub fn num_bytes_for_compressed_id(&self) -> usize {
        match self {
            NodeIdCompression::Heterogeneous => TABLE_ID_BYTES + OFFSET_BYTES,
            NodeIdCompression::Homogeneous { .. } => OFFSET_BYTES,
        }
    }

    /// Encodes `id` into the first `num_bytes_for_compressed_id()` bytes of `dst`.
    pub fn write_node_id(&self, id: NodeId, dst: &mut [u8]) {
        match self {
            NodeIdCompression::Heterogeneous => {
                le::put_u32(dst, 0, id.table);
                le::put_u64(dst, TABLE_ID_BYTES, id.offset);
            }
            NodeIdCompression::Homogeneous { table } => {
                debug_assert_eq!(id.table, *table, "node id from a foreign table");
                le::put_u64(dst, 0, id.offset);
            }
        }
    }

    /// Inverse of [`Self::write_node_id`].
    pub fn read_node_id(&self, src: &[u8]) -> NodeId {
        match self {
            NodeIdCompression::Heterogeneous => {
                NodeId::new(le::get_u32(src, 0), le::get_u64(src, TABLE_ID_BYTES))
            }
            NodeIdCompression::Homogeneous { table } => NodeId::new(*table, le::get_u64(src, 0)),
        }
    }
}
