//! Pack wire format
//!
//! The encoding that bundles a function and its call arguments for transport
//! to the compute side. This is the only place the client and the compute
//! side must agree on a format: the client packs, the remote runner unpacks,
//! invokes, and serializes the return value to the agreed output file.
//!
//! Large buffers are split into `buffer_threshold`-sized chunks and long
//! argument lists are folded past `item_threshold` into a single tail buffer.
//! Both are transfer-size optimizations, not correctness requirements: an
//! unpack of any packed call reproduces the original call exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default maximum size of a single buffer before it is chunked.
pub const BUFFER_THRESHOLD: usize = 1024 * 1024;

/// Default maximum number of individually packed items per section.
pub const ITEM_THRESHOLD: usize = 1024;

/// Thresholds governing chunking and folding.
#[derive(Debug, Clone, Copy)]
pub struct PackLimits {
    pub buffer_threshold: usize,
    pub item_threshold: usize,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self {
            buffer_threshold: BUFFER_THRESHOLD,
            item_threshold: ITEM_THRESHOLD,
        }
    }
}

/// The code payload shipped to the remote interpreter.
///
/// The client only shapes the payload; execution belongs to the compute side,
/// which runs `source` against the unpacked arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub source: String,
}

/// A captured function invocation: code plus bound arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub function: FunctionDef,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// Errors raised while packing or unpacking a call.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("malformed pack envelope: {0}")]
    Malformed(&'static str),
}

/// Where one packed item lives inside the buffer sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ItemDesc {
    /// Number of consecutive chunks occupied by the item.
    pub chunks: usize,
}

/// Layout of one section (args or kwargs) of a packed call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionDesc {
    /// Individually packed items, in call order.
    pub items: Vec<ItemDesc>,
    /// Items past the threshold, folded into one collection buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folded: Option<ItemDesc>,
}

/// Self-describing header of a packed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackHeader {
    pub function: String,
    pub source: ItemDesc,
    pub args: SectionDesc,
    pub kwarg_names: Vec<String>,
    pub kwargs: SectionDesc,
}

/// A packed call: header plus the ordered chunk sequence it describes.
///
/// Buffer order is fixed: function source, inline args (then the folded args
/// tail), inline kwargs (then the folded kwargs tail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedCall {
    pub header: PackHeader,
    pub buffers: Vec<Vec<u8>>,
}

impl PackedCall {
    /// Serialize the packed call to bytes for staging and upload.
    pub fn encode(&self) -> Result<Vec<u8>, PackError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, PackError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Pack a captured call into a chunked, self-describing envelope.
pub fn pack_call(call: &RemoteCall, limits: &PackLimits) -> Result<PackedCall, PackError> {
    let mut buffers = Vec::new();

    let source = push_chunked(
        serde_json::to_vec(&call.function)?,
        limits.buffer_threshold,
        &mut buffers,
    );

    let inline = call.args.len().min(limits.item_threshold);
    let mut args = SectionDesc::default();
    for arg in &call.args[..inline] {
        args.items.push(push_chunked(
            serde_json::to_vec(arg)?,
            limits.buffer_threshold,
            &mut buffers,
        ));
    }
    if call.args.len() > inline {
        args.folded = Some(push_chunked(
            serde_json::to_vec(&call.args[inline..])?,
            limits.buffer_threshold,
            &mut buffers,
        ));
    }

    let pairs: Vec<(&String, &Value)> = call.kwargs.iter().collect();
    let inline = pairs.len().min(limits.item_threshold);
    let mut kwarg_names = Vec::with_capacity(inline);
    let mut kwargs = SectionDesc::default();
    for (name, value) in &pairs[..inline] {
        kwarg_names.push((*name).clone());
        kwargs.items.push(push_chunked(
            serde_json::to_vec(value)?,
            limits.buffer_threshold,
            &mut buffers,
        ));
    }
    if pairs.len() > inline {
        let tail: Map<String, Value> = pairs[inline..]
            .iter()
            .map(|(k, v)| ((*k).clone(), (*v).clone()))
            .collect();
        kwargs.folded = Some(push_chunked(
            serde_json::to_vec(&tail)?,
            limits.buffer_threshold,
            &mut buffers,
        ));
    }

    Ok(PackedCall {
        header: PackHeader {
            function: call.function.name.clone(),
            source,
            args,
            kwarg_names,
            kwargs,
        },
        buffers,
    })
}

/// Reassemble a packed call into the original function and arguments.
///
/// This is the compute-side half of the contract: unpack, invoke the function
/// with the recovered arguments, and serialize whatever it returns to the
/// agreed output file.
pub fn unpack_call(packed: &PackedCall) -> Result<RemoteCall, PackError> {
    let mut cursor = Cursor::new(&packed.buffers);

    let function: FunctionDef = cursor.take(packed.header.source)?;

    let mut args: Vec<Value> = Vec::with_capacity(packed.header.args.items.len());
    for item in &packed.header.args.items {
        args.push(cursor.take(*item)?);
    }
    if let Some(folded) = packed.header.args.folded {
        let tail: Vec<Value> = cursor.take(folded)?;
        args.extend(tail);
    }

    if packed.header.kwarg_names.len() != packed.header.kwargs.items.len() {
        return Err(PackError::Malformed("kwarg name/item count mismatch"));
    }
    let mut kwargs = Map::new();
    for (name, item) in packed
        .header
        .kwarg_names
        .iter()
        .zip(&packed.header.kwargs.items)
    {
        kwargs.insert(name.clone(), cursor.take(*item)?);
    }
    if let Some(folded) = packed.header.kwargs.folded {
        let tail: Map<String, Value> = cursor.take(folded)?;
        kwargs.extend(tail);
    }

    Ok(RemoteCall {
        function,
        args,
        kwargs,
    })
}

fn push_chunked(bytes: Vec<u8>, limit: usize, buffers: &mut Vec<Vec<u8>>) -> ItemDesc {
    if bytes.len() <= limit {
        buffers.push(bytes);
        return ItemDesc { chunks: 1 };
    }
    let mut chunks = 0;
    for chunk in bytes.chunks(limit.max(1)) {
        buffers.push(chunk.to_vec());
        chunks += 1;
    }
    ItemDesc { chunks }
}

/// Sequential reader over the chunk sequence.
struct Cursor<'a> {
    buffers: &'a [Vec<u8>],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buffers: &'a [Vec<u8>]) -> Self {
        Self { buffers, pos: 0 }
    }

    fn take<T: serde::de::DeserializeOwned>(&mut self, item: ItemDesc) -> Result<T, PackError> {
        // Chunk counts come straight from a decoded header and may be
        // arbitrarily large, so the add itself must be checked.
        let end = self
            .pos
            .checked_add(item.chunks)
            .filter(|&end| end <= self.buffers.len())
            .ok_or(PackError::Malformed("buffer sequence exhausted"))?;
        if item.chunks == 0 {
            return Err(PackError::Malformed("buffer sequence exhausted"));
        }
        let value = if item.chunks == 1 {
            serde_json::from_slice(&self.buffers[self.pos])?
        } else {
            let joined: Vec<u8> = self.buffers[self.pos..end].concat();
            serde_json::from_slice(&joined)?
        };
        self.pos = end;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_call() -> RemoteCall {
        let mut kwargs = Map::new();
        kwargs.insert("threshold".to_string(), json!(0.5));
        RemoteCall {
            function: FunctionDef {
                name: "analyze".to_string(),
                source: "def analyze(xs, threshold=0.5):\n    return sum(xs)\n".to_string(),
            },
            args: vec![json!([1, 2, 3])],
            kwargs,
        }
    }

    #[test]
    fn test_pack_unpack_preserves_call() {
        let call = sample_call();
        let packed = pack_call(&call, &PackLimits::default()).unwrap();
        assert_eq!(unpack_call(&packed).unwrap(), call);
    }

    #[test]
    fn test_oversized_buffer_is_chunked() {
        let mut call = sample_call();
        call.args = vec![json!("x".repeat(4096))];
        let limits = PackLimits {
            buffer_threshold: 256,
            item_threshold: ITEM_THRESHOLD,
        };

        let packed = pack_call(&call, &limits).unwrap();
        assert!(packed.header.args.items[0].chunks > 1);
        assert!(packed.buffers.iter().all(|b| b.len() <= 256));
        assert_eq!(unpack_call(&packed).unwrap(), call);
    }

    #[test]
    fn test_long_arg_list_is_folded() {
        let mut call = sample_call();
        call.args = (0..10).map(|i| json!(i)).collect();
        let limits = PackLimits {
            buffer_threshold: BUFFER_THRESHOLD,
            item_threshold: 4,
        };

        let packed = pack_call(&call, &limits).unwrap();
        assert_eq!(packed.header.args.items.len(), 4);
        assert!(packed.header.args.folded.is_some());
        assert_eq!(unpack_call(&packed).unwrap(), call);
    }

    #[test]
    fn test_encode_decode_bytes() {
        let call = sample_call();
        let packed = pack_call(&call, &PackLimits::default()).unwrap();
        let bytes = packed.encode().unwrap();
        let decoded = PackedCall::decode(&bytes).unwrap();
        assert_eq!(unpack_call(&decoded).unwrap(), call);
    }

    #[test]
    fn test_oversized_chunk_count_is_rejected() {
        // A decoded header is untrusted input; a chunk count near usize::MAX
        // must fail the bounds check, not overflow it.
        let call = sample_call();
        let mut packed = pack_call(&call, &PackLimits::default()).unwrap();
        packed.header.args.items[0].chunks = usize::MAX;
        assert!(matches!(
            unpack_call(&packed),
            Err(PackError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_envelope_is_rejected() {
        let call = sample_call();
        let mut packed = pack_call(&call, &PackLimits::default()).unwrap();
        packed.buffers.pop();
        assert!(matches!(
            unpack_call(&packed),
            Err(PackError::Malformed(_))
        ));
    }
}
