//! Element codecs: how one list element maps onto its fixed-size slot.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::primitives::bytes::le;
use crate::storage::compression::NodeIdCompression;
use crate::storage::overflow::{OverflowPtr, OverflowStore};
use crate::types::{NodeId, Result, StorageError};

/// Encodes values of one element type into fixed-size slots.
pub trait ElementCodec: Send + Sync {
    /// Decoded element type.
    type Value: Clone + Send + Sync + fmt::Debug;

    /// Slot width in bytes.
    fn element_size(&self) -> usize;

    /// Whether pages carry a null bitmap for this element type.
    fn has_null_bits(&self) -> bool {
        true
    }

    /// Whether encoding writes to an overflow store. The builder encodes
    /// such elements on one thread to keep overflow positions stable.
    fn uses_overflow(&self) -> bool {
        false
    }

    /// Encodes `value` into `dst`, which is exactly `element_size()` bytes.
    fn encode(&self, value: &Self::Value, dst: &mut [u8]) -> Result<()>;

    /// Decodes a slot.
    fn decode(&self, src: &[u8]) -> Result<Self::Value>;

    /// Makes any out-of-line bytes durable. Called before commit.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Primitive types stored by value.
pub trait FixedWidthValue: Copy + Send + Sync + fmt::Debug + 'static {
    /// Encoded width.
    const SIZE: usize;

    /// Little-endian encoding into `dst[..SIZE]`.
    fn put(&self, dst: &mut [u8]);

    /// Inverse of [`Self::put`].
    fn get(src: &[u8]) -> Result<Self>;
}

macro_rules! fixed_width_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedWidthValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put(&self, dst: &mut [u8]) {
                    dst[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn get(src: &[u8]) -> Result<Self> {
                    let bytes = src
                        .get(..Self::SIZE)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| {
                            StorageError::format(concat!("short slot for ", stringify!($ty)))
                        })?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

fixed_width_value!(u8, u16, u32, u64, i32, i64, f64);

/// Plain fixed-width property lists.
pub struct FixedWidth<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> FixedWidth<T> {
    /// Codec for `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FixedWidth<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FixedWidth<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedWidth<{}>", std::any::type_name::<T>())
    }
}

impl<T: FixedWidthValue> ElementCodec for FixedWidth<T> {
    type Value = T;

    fn element_size(&self) -> usize {
        T::SIZE
    }

    fn encode(&self, value: &T, dst: &mut [u8]) -> Result<()> {
        value.put(dst);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<T> {
        T::get(src)
    }
}

/// Adjacency lists: neighbour ids under a [`NodeIdCompression`] scheme.
#[derive(Clone, Copy, Debug)]
pub struct NodeIdCodec {
    scheme: NodeIdCompression,
}

impl NodeIdCodec {
    /// Codec using `scheme`.
    pub fn new(scheme: NodeIdCompression) -> Self {
        Self { scheme }
    }

    /// The compression scheme.
    pub fn scheme(&self) -> NodeIdCompression {
        self.scheme
    }
}

impl ElementCodec for NodeIdCodec {
    type Value = NodeId;

    fn element_size(&self) -> usize {
        self.scheme.num_bytes_for_compressed_id()
    }

    fn has_null_bits(&self) -> bool {
        false
    }

    fn encode(&self, value: &NodeId, dst: &mut [u8]) -> Result<()> {
        if let NodeIdCompression::Homogeneous { table } = self.scheme {
            if value.table != table {
                return Err(StorageError::Invalid(
                    "node id table differs from the list's homogeneous table",
                ));
            }
        }
        self.scheme.write_node_id(*value, dst);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<NodeId> {
        Ok(self.scheme.read_node_id(src))
    }
}

const STRING_SLOT: usize = 16;
const STRING_INLINE_MAX: usize = 12;
const STRING_PREFIX: usize = 4;

/// Strings: short ones inline, long ones as prefix plus overflow pointer.
///
/// ```text
/// len u32 | bytes[12]                        (len <= 12)
/// len u32 | prefix[4] | overflow ptr u64     (len > 12)
/// ```
#[derive(Clone)]
pub struct StringCodec {
    overflow: Arc<dyn OverflowStore>,
}

impl StringCodec {
    /// Codec spilling long strings into `overflow`.
    pub fn new(overflow: Arc<dyn OverflowStore>) -> Self {
        Self { overflow }
    }
}

impl fmt::Debug for StringCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringCodec").finish_non_exhaustive()
    }
}

impl ElementCodec for StringCodec {
    type Value = String;

    fn element_size(&self) -> usize {
        STRING_SLOT
    }

    fn uses_overflow(&self) -> bool {
        true
    }

    fn encode(&self, value: &String, dst: &mut [u8]) -> Result<()> {
        let bytes = value.as_bytes();
        let len = u32::try_from(bytes.len())
            .map_err(|_| StorageError::CapacityExceeded("string length"))?;
        dst[..STRING_SLOT].fill(0);
        le::put_u32(dst, 0, len);
        if bytes.len() <= STRING_INLINE_MAX {
            dst[4..4 + bytes.len()].copy_from_slice(bytes);
        } else {
            dst[4..4 + STRING_PREFIX].copy_from_slice(&bytes[..STRING_PREFIX]);
            let ptr = self.overflow.write_bytes(bytes)?;
            le::put_u64(dst, 8, ptr.0);
        }
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<String> {
        let len = le::read_u32_checked(src, 0)? as usize;
        let bytes = if len <= STRING_INLINE_MAX {
            src[4..4 + len].to_vec()
        } else {
            let ptr = OverflowPtr(le::read_u64_checked(src, 8)?);
            self.overflow.read_bytes(ptr, len)?
        };
        String::from_utf8(bytes)
            .map_err(|err| StorageError::format(format!("string element is not UTF-8: {err}")))
    }

    fn flush(&self) -> Result<()> {
        self.overflow.flush()
    }
}

/// Lists of `u64` lists, with the inner values packed in overflow.
///
/// Slot: `count u64 | overflow ptr u64`.
#[derive(Clone)]
pub struct NestedListCodec {
    overflow: Arc<dyn OverflowStore>,
}

impl NestedListCodec {
    /// Codec spilling inner lists into `overflow`.
    pub fn new(overflow: Arc<dyn OverflowStore>) -> Self {
        Self { overflow }
    }
}

impl fmt::Debug for NestedListCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedListCodec").finish_non_exhaustive()
    }
}

impl ElementCodec for NestedListCodec {
    type Value = Vec<u64>;

    fn element_size(&self) -> usize {
        16
    }

    fn uses_overflow(&self) -> bool {
        true
    }

    fn encode(&self, value: &Vec<u64>, dst: &mut [u8]) -> Result<()> {
        le::put_u64(dst, 0, value.len() as u64);
        let ptr = if value.is_empty() {
            0
        } else {
            let packed: Vec<u8> = value.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.overflow.write_bytes(&packed)?.0
        };
        le::put_u64(dst, 8, ptr);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<Vec<u64>> {
        let count = le::read_u64_checked(src, 0)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let len = usize::try_from(count.saturating_mul(8))
            .map_err(|_| StorageError::format(format!("nested list of {count} values")))?;
        let packed = self
            .overflow
            .read_bytes(OverflowPtr(le::read_u64_checked(src, 8)?), len)?;
        Ok(packed
            .chunks_exact(8)
            .map(|chunk| le::get_u64(chunk, 0))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        self.overflow.flush()
    }
}
