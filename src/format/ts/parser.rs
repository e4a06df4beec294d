use super::types::*;
use crate::error::{DemuxError, Result};
use bytes::{Bytes, BytesMut};

/// One synchronised transport packet with its header fields decoded.
///
/// `payload` is the part of the packet after the header and adaptation
/// field, `None` when the packet carries no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportPacket {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub transport_error: bool,
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
    /// Adaptation field flag byte, 0 when absent
    pub afc_flags: u8,
    pub pcr: Option<u64>,
    pub opcr: Option<u64>,
    pub payload: Option<Bytes>,
    /// Byte offset of the packet in the input
    pub offset: u64,
}

impl TransportPacket {
    /// Creates a payload-only packet.
    pub fn new(pid: u16, payload_unit_start: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            pid: pid & 0x1fff,
            payload_unit_start,
            transport_error: false,
            adaptation_field_control: 0x01,
            continuity_counter: 0,
            afc_flags: 0,
            pcr: None,
            opcr: None,
            payload: Some(payload.into()),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_pcr(mut self, pcr: u64) -> Self {
        self.adaptation_field_control |= 0x02;
        self.afc_flags |= AFC_PCR_FLAG;
        self.pcr = Some(pcr);
        self
    }

    pub fn with_opcr(mut self, opcr: u64) -> Self {
        self.adaptation_field_control |= 0x02;
        self.afc_flags |= AFC_OPCR_FLAG;
        self.opcr = Some(opcr);
        self
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    /// Parses a 188-byte packet.
    pub fn parse(data: Bytes, offset: u64) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(DemuxError::InvalidData("TS packet too short".into()));
        }
        if data[0] != TS_SYNC_BYTE {
            return Err(DemuxError::InvalidData("Invalid sync byte".into()));
        }

        let pid = (((data[1] & 0x1f) as u16) << 8) | data[2] as u16;
        let adaptation_field_control = (data[3] >> 4) & 0x03;
        let mut packet = Self {
            pid,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_error: (data[1] & 0x80) != 0,
            adaptation_field_control,
            continuity_counter: data[3] & 0x0f,
            afc_flags: 0,
            pcr: None,
            opcr: None,
            payload: None,
            offset,
        };

        let mut payload_offset = TS_HEADER_SIZE;
        if adaptation_field_control & 0x02 != 0 {
            let field = parse_adaptation_field(&data[..TS_PACKET_SIZE])?;
            packet.afc_flags = field.flags;
            packet.pcr = field.pcr;
            packet.opcr = field.opcr;
            payload_offset += 1 + field.length;
        }

        if adaptation_field_control & 0x01 != 0 && payload_offset < TS_PACKET_SIZE {
            packet.payload = Some(data.slice(payload_offset..TS_PACKET_SIZE));
        }

        Ok(packet)
    }
}

struct RawAdaptationField {
    length: usize,
    flags: u8,
    pcr: Option<u64>,
    opcr: Option<u64>,
}

fn parse_adaptation_field(data: &[u8]) -> Result<RawAdaptationField> {
    let length = data[TS_HEADER_SIZE] as usize;
    if TS_HEADER_SIZE + 1 + length > TS_PACKET_SIZE {
        return Err(DemuxError::InvalidData("Adaptation field too long".into()));
    }
    let mut field = RawAdaptationField {
        length,
        flags: 0,
        pcr: None,
        opcr: None,
    };
    if length == 0 {
        return Ok(field);
    }

    let end = TS_HEADER_SIZE + 1 + length;
    field.flags = data[TS_HEADER_SIZE + 1];
    let mut pos = TS_HEADER_SIZE + 2;

    if field.flags & AFC_PCR_FLAG != 0 {
        if pos + 6 > end {
            return Err(DemuxError::InvalidData("PCR data too short".into()));
        }
        field.pcr = read_pcr(&data[pos..pos + 6]);
        pos += 6;
    }

    if field.flags & AFC_OPCR_FLAG != 0 {
        if pos + 6 > end {
            return Err(DemuxError::InvalidData("OPCR data too short".into()));
        }
        field.opcr = read_pcr(&data[pos..pos + 6]);
    }

    Ok(field)
}

/// Outcome of [`Packetizer::next_packet`].
#[derive(Debug)]
pub enum PacketResult {
    Packet(TransportPacket),
    /// A synchronised packet whose header could not be parsed
    Bad(DemuxError),
    NeedMore,
}

/// Splits an arbitrary byte stream into transport packets, resynchronising
/// on the sync byte.
#[derive(Debug, Default)]
pub struct Packetizer {
    buffer: BytesMut,
    /// Input offset of `buffer[0]`
    offset: u64,
}

impl Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from `offset` in the input. A push that is not
    /// contiguous with the buffered bytes drops them first.
    pub fn push(&mut self, offset: u64, data: &[u8]) {
        if self.buffer.is_empty() || self.offset + self.buffer.len() as u64 != offset {
            if !self.buffer.is_empty() {
                log::trace!(
                    "dropping {} buffered bytes, new data at {}",
                    self.buffer.len(),
                    offset
                );
            }
            self.buffer.clear();
            self.offset = offset;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Drops all buffered data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.offset = 0;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_packet(&mut self) -> PacketResult {
        if !self.sync() {
            return PacketResult::NeedMore;
        }
        if self.buffer.len() < TS_PACKET_SIZE {
            return PacketResult::NeedMore;
        }

        let offset = self.offset;
        let data = self.buffer.split_to(TS_PACKET_SIZE).freeze();
        self.offset += TS_PACKET_SIZE as u64;
        match TransportPacket::parse(data, offset) {
            Ok(packet) => PacketResult::Packet(packet),
            Err(e) => PacketResult::Bad(e),
        }
    }

    /// Skips to the next sync byte that is followed by another one a packet
    /// later, or by the end of the buffered data.
    fn sync(&mut self) -> bool {
        let mut skip = 0;
        let found = loop {
            let Some(pos) = self.buffer[skip..].iter().position(|&b| b == TS_SYNC_BYTE) else {
                skip = self.buffer.len();
                break false;
            };
            let candidate = skip + pos;
            let next = candidate + TS_PACKET_SIZE;
            if next >= self.buffer.len() || self.buffer[next] == TS_SYNC_BYTE {
                skip = candidate;
                break true;
            }
            skip = candidate + 1;
        };
        if skip > 0 {
            log::trace!("skipping {} bytes to resync at offset {}", skip, self.offset);
            let _ = self.buffer.split_to(skip);
            self.offset += skip as u64;
        }
        found
    }
}
