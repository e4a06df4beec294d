use super::pes::PESPacket;
use super::psi::{write_pat_section, PatEntry, Program};
use super::types::*;
use crate::error::{DemuxError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest payload of a packet whose adaptation field carries a PCR
pub const MAX_PCR_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE - 8;

const MAX_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// Writes transport stream packets into an in-memory buffer.
///
/// Continuity counters are kept per PID. Short payloads are padded with
/// adaptation field stuffing, so every packet is exactly 188 bytes.
#[derive(Debug)]
pub struct TsBuilder {
    buf: BytesMut,
    ts_id: u16,
    continuity_counters: Vec<u8>,
}

impl Default for TsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TsBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            ts_id: 1,
            continuity_counters: vec![0; PID_COUNT],
        }
    }

    pub fn with_ts_id(mut self, ts_id: u16) -> Self {
        self.ts_id = ts_id;
        self
    }

    /// Number of packets written so far.
    pub fn packets(&self) -> usize {
        self.buf.len() / TS_PACKET_SIZE
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes a PAT listing `programs` followed by their PMTs.
    pub fn psi(&mut self, programs: &[&Program]) -> Result<&mut Self> {
        let entries: Vec<PatEntry> = programs
            .iter()
            .map(|p| PatEntry {
                program_number: p.program_number,
                pid: p.pmt_pid,
            })
            .collect();
        self.pat(&entries)?;
        for program in programs {
            self.pmt(program)?;
        }
        Ok(self)
    }

    pub fn pat(&mut self, entries: &[PatEntry]) -> Result<&mut Self> {
        let section = write_pat_section(self.ts_id, entries)?;
        self.section(PID_PAT, &section)
    }

    pub fn pmt(&mut self, program: &Program) -> Result<&mut Self> {
        let section = program.to_pmt_section()?;
        self.section(program.pmt_pid, &section)
    }

    /// Writes one section behind a zero pointer field, splitting it over as
    /// many packets as needed. The tail of the last packet is 0xff filled.
    pub fn section(&mut self, pid: u16, section: &[u8]) -> Result<&mut Self> {
        let mut data = Vec::with_capacity(section.len() + 1);
        data.push(0);
        data.extend_from_slice(section);

        let mut first = true;
        for chunk in data.chunks(MAX_PAYLOAD) {
            let mut payload = chunk.to_vec();
            payload.resize(MAX_PAYLOAD, 0xff);
            self.packet(pid, first, None, &payload)?;
            first = false;
        }
        Ok(self)
    }

    /// Writes a packet carrying only an adaptation field with a PCR.
    pub fn pcr(&mut self, pid: u16, ticks: u64) -> Result<&mut Self> {
        self.packet(pid, false, Some(ticks), &[])
    }

    /// Writes a whole PES packet, optionally with a PCR in the first
    /// transport packet.
    pub fn pes(&mut self, pid: u16, pes: &PESPacket, pcr: Option<u64>) -> Result<&mut Self> {
        let mut data = BytesMut::with_capacity(pes.len());
        pes.write_to(&mut data)?;

        let first_len = if pcr.is_some() { MAX_PCR_PAYLOAD } else { MAX_PAYLOAD };
        let split = first_len.min(data.len());
        self.packet(pid, true, pcr, &data[..split])?;
        for chunk in data[split..].chunks(MAX_PAYLOAD) {
            self.packet(pid, false, None, chunk)?;
        }
        Ok(self)
    }

    /// Writes raw bytes as the payload of one packet.
    pub fn payload(&mut self, pid: u16, payload_unit_start: bool, payload: &[u8]) -> Result<&mut Self> {
        self.packet(pid, payload_unit_start, None, payload)
    }

    pub fn null_packets(&mut self, count: usize) -> Result<&mut Self> {
        for _ in 0..count {
            self.packet(PID_NULL, false, None, &[0xff; MAX_PAYLOAD])?;
        }
        Ok(self)
    }

    /// Writes one 188-byte packet.
    pub fn packet(
        &mut self,
        pid: u16,
        payload_unit_start: bool,
        pcr: Option<u64>,
        payload: &[u8],
    ) -> Result<&mut Self> {
        let limit = if pcr.is_some() { MAX_PCR_PAYLOAD } else { MAX_PAYLOAD };
        if payload.len() > limit {
            return Err(DemuxError::InvalidData(format!(
                "payload of {} bytes does not fit a packet",
                payload.len()
            )));
        }

        let adaptation_size = MAX_PAYLOAD - payload.len();
        let contains_payload = !payload.is_empty();
        let header = TSHeader {
            payload_unit_start,
            pid,
            adaptation_field_exists: adaptation_size > 0,
            contains_payload,
            continuity_counter: self.next_continuity_counter(pid, contains_payload),
            ..Default::default()
        };

        let start = self.buf.len();
        header.write_to(&mut self.buf)?;
        if adaptation_size > 0 {
            self.write_adaptation_field(adaptation_size, pcr);
        }
        self.buf.put_slice(payload);
        debug_assert_eq!(self.buf.len() - start, TS_PACKET_SIZE);
        Ok(self)
    }

    /// Writes an adaptation field of `size` bytes, length byte included.
    fn write_adaptation_field(&mut self, size: usize, pcr: Option<u64>) {
        self.buf.put_u8((size - 1) as u8);
        if size == 1 {
            return;
        }
        let mut used = 2;
        match pcr {
            Some(ticks) => {
                self.buf.put_u8(AFC_PCR_FLAG);
                write_pcr(&mut self.buf, ticks);
                used += 6;
            }
            None => self.buf.put_u8(0),
        }
        self.buf.put_bytes(0xff, size - used);
    }

    fn next_continuity_counter(&mut self, pid: u16, contains_payload: bool) -> u8 {
        let counter = &mut self.continuity_counters[pid as usize & 0x1fff];
        let current = *counter;
        if contains_payload {
            *counter = (*counter + 1) & 0x0f;
        }
        current
    }
}
