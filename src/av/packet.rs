use bytes::{Bytes, BytesMut};
use std::time::Duration;

use super::Caps;

/// One slice of elementary-stream payload, usually the payload of a single
/// transport packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub data: Bytes,
    /// Byte offset of the carrying transport packet in the input
    pub offset: u64,
    pub pts: Option<Duration>,
    pub dts: Option<Duration>,
}

impl Buffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            pts: None,
            dts: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The buffers making up one reassembled PES payload, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferList {
    pub buffers: Vec<Buffer>,
    pub caps: Option<Caps>,
}

impl BufferList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    pub fn push(&mut self, buffer: Buffer) {
        self.buffers.push(buffer);
    }

    /// Number of buffers in the list.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> usize {
        self.buffers.iter().map(Buffer::len).sum()
    }

    /// Timestamp of the list, carried by its first buffer.
    pub fn pts(&self) -> Option<Duration> {
        self.buffers.first().and_then(|b| b.pts)
    }

    pub fn dts(&self) -> Option<Duration> {
        self.buffers.first().and_then(|b| b.dts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    /// Copies every buffer into one contiguous payload.
    pub fn concat(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.size());
        for buffer in &self.buffers {
            out.extend_from_slice(&buffer.data);
        }
        out.freeze()
    }
}
