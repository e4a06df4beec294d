use super::parser::TransportPacket;
use super::types::*;
use crate::error::{DemuxError, Result};
use crate::utils::Crc32Mpeg2;
use bitvec::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Section header bytes counted before `section_length` starts
const SECTION_PREFIX: usize = 3;
/// Largest section a PAT/PMT may declare
const MAX_SECTION_LENGTH: usize = 1021;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: StreamType,
    pub pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl ElementaryStreamInfo {
    pub fn new(stream_type: StreamType, pid: u16) -> Self {
        Self {
            stream_type,
            pid: pid & 0x1fff,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptor(&self, tag: u8) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.tag == tag)
    }
}

/// One program of a transport stream, as announced by its PMT.
///
/// PID membership is kept in a bitset over the whole 13-bit PID space, so
/// [`Program::carries_pid`] and [`Program::stream`] answer without hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub program_number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: u16,
    pub descriptors: Vec<Descriptor>,
    pub streams: Vec<ElementaryStreamInfo>,
    pids: BitVec<u64, Lsb0>,
}

impl Program {
    pub fn new(program_number: u16, pmt_pid: u16, pcr_pid: u16) -> Self {
        Self {
            program_number,
            pmt_pid: pmt_pid & 0x1fff,
            pcr_pid: pcr_pid & 0x1fff,
            descriptors: Vec::new(),
            streams: Vec::new(),
            pids: bitvec![u64, Lsb0; 0; PID_COUNT],
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn with_stream(mut self, info: ElementaryStreamInfo) -> Self {
        self.add_stream(info);
        self
    }

    /// Adds or replaces the stream carried on `info.pid`.
    pub fn add_stream(&mut self, info: ElementaryStreamInfo) {
        self.pids.set(info.pid as usize, true);
        match self.streams.iter_mut().find(|s| s.pid == info.pid) {
            Some(existing) => *existing = info,
            None => self.streams.push(info),
        }
    }

    pub fn remove_stream(&mut self, pid: u16) -> Option<ElementaryStreamInfo> {
        let index = self.streams.iter().position(|s| s.pid == pid)?;
        self.pids.set(pid as usize, false);
        Some(self.streams.remove(index))
    }

    pub fn carries_pid(&self, pid: u16) -> bool {
        self.pids.get(pid as usize).map(|bit| *bit).unwrap_or(false)
    }

    pub fn stream(&self, pid: u16) -> Option<&ElementaryStreamInfo> {
        if !self.carries_pid(pid) {
            return None;
        }
        self.streams.iter().find(|s| s.pid == pid)
    }

    pub fn descriptor(&self, tag: u8) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.tag == tag)
    }

    /// Format identifier of the program-level registration descriptor.
    pub fn registration_id(&self) -> Option<u32> {
        self.descriptor(DESC_REGISTRATION)
            .and_then(Descriptor::format_identifier)
    }

    /// Serialises the program as a complete PMT section, CRC included.
    pub fn to_pmt_section(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        body.put_u16(self.pcr_pid & 0x1fff | 7 << 13);
        write_descriptor_loop(&mut body, &self.descriptors)?;
        for info in &self.streams {
            body.put_u8(info.stream_type.as_u8());
            body.put_u16(info.pid & 0x1fff | 7 << 13);
            write_descriptor_loop(&mut body, &info.descriptors)?;
        }
        write_section(TABLE_ID_PMT, self.program_number, &body)
    }
}

/// Program association entry. Program number 0 points at the network PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pid: u16,
}

/// Serialises a PAT section for transport stream `ts_id`.
pub fn write_pat_section(ts_id: u16, entries: &[PatEntry]) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(entries.len() * 4);
    for entry in entries {
        body.put_u16(entry.program_number);
        body.put_u16(entry.pid & 0x1fff | 7 << 13);
    }
    write_section(TABLE_ID_PAT, ts_id, &body)
}

fn write_descriptor_loop(buf: &mut BytesMut, descriptors: &[Descriptor]) -> Result<()> {
    let length: usize = descriptors.iter().map(|d| 2 + d.data.len()).sum();
    if length > 0x3ff {
        return Err(DemuxError::InvalidData("descriptor loop too long".into()));
    }
    buf.put_u16(length as u16 | 0xf << 12);
    for desc in descriptors {
        let len = u8::try_from(desc.data.len())
            .map_err(|_| DemuxError::InvalidData("descriptor too long".into()))?;
        buf.put_u8(desc.tag);
        buf.put_u8(len);
        buf.put_slice(&desc.data);
    }
    Ok(())
}

fn write_section(table_id: u8, extension: u16, body: &[u8]) -> Result<Bytes> {
    // extension, version, section numbers, body and CRC
    let section_length = 5 + body.len() + 4;
    if section_length > MAX_SECTION_LENGTH {
        return Err(DemuxError::InvalidData("section too long".into()));
    }
    let mut buf = BytesMut::with_capacity(SECTION_PREFIX + section_length);
    buf.put_u8(table_id);
    buf.put_u16(0xb000 | section_length as u16);
    buf.put_u16(extension);
    buf.put_u8(0xc1);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&buf);
    buf.put_u32(crc);
    Ok(buf.freeze())
}

/// Checks framing and CRC of a long-form section and returns the table id,
/// table id extension and the body between the fixed header and the CRC.
pub fn parse_section(section: &[u8]) -> Result<(u8, u16, &[u8])> {
    if section.len() < SECTION_PREFIX + 9 {
        return Err(DemuxError::InvalidData("section too short".into()));
    }
    if section[1] & 0x80 == 0 {
        return Err(DemuxError::InvalidData("section syntax indicator not set".into()));
    }
    let section_length = (((section[1] & 0x0f) as usize) << 8) | section[2] as usize;
    let end = SECTION_PREFIX + section_length;
    if section_length < 9 || end > section.len() {
        return Err(DemuxError::InvalidData(format!(
            "bad section length {}",
            section_length
        )));
    }
    if !Crc32Mpeg2::new().verify(&section[..end]) {
        return Err(DemuxError::InvalidData("section CRC mismatch".into()));
    }
    let extension = u16::from_be_bytes([section[3], section[4]]);
    Ok((section[0], extension, &section[8..end - 4]))
}

pub fn parse_pat(section: &[u8]) -> Result<Vec<PatEntry>> {
    let (table_id, _, body) = parse_section(section)?;
    if table_id != TABLE_ID_PAT {
        return Err(DemuxError::InvalidData(format!("table id {:#x} is not a PAT", table_id)));
    }
    Ok(body
        .chunks_exact(4)
        .map(|entry| PatEntry {
            program_number: u16::from_be_bytes([entry[0], entry[1]]),
            pid: u16::from_be_bytes([entry[2] & 0x1f, entry[3]]),
        })
        .collect())
}

pub fn parse_pmt(section: &[u8], pmt_pid: u16) -> Result<Program> {
    let (table_id, program_number, body) = parse_section(section)?;
    if table_id != TABLE_ID_PMT {
        return Err(DemuxError::InvalidData(format!("table id {:#x} is not a PMT", table_id)));
    }
    if body.len() < 4 {
        return Err(DemuxError::InvalidData("PMT too short for PCR PID".into()));
    }

    let pcr_pid = u16::from_be_bytes([body[0] & 0x1f, body[1]]);
    let mut program = Program::new(program_number, pmt_pid, pcr_pid);
    let info_length = (((body[2] & 0x0f) as usize) << 8) | body[3] as usize;
    let mut pos = 4;
    if pos + info_length > body.len() {
        return Err(DemuxError::InvalidData("program info data too short".into()));
    }
    program.descriptors = parse_descriptors(&body[pos..pos + info_length])?;
    pos += info_length;

    while pos + 5 <= body.len() {
        let stream_type = StreamType::from_u8(body[pos]);
        let pid = u16::from_be_bytes([body[pos + 1] & 0x1f, body[pos + 2]]);
        let es_info_length = (((body[pos + 3] & 0x0f) as usize) << 8) | body[pos + 4] as usize;
        pos += 5;
        if pos + es_info_length > body.len() {
            return Err(DemuxError::InvalidData("ES info data too short".into()));
        }
        let mut info = ElementaryStreamInfo::new(stream_type, pid);
        info.descriptors = parse_descriptors(&body[pos..pos + es_info_length])?;
        pos += es_info_length;
        program.add_stream(info);
    }

    Ok(program)
}

fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;
    while pos + 2 <= data.len() {
        let tag = data[pos];
        let length = data[pos + 1] as usize;
        pos += 2;
        if pos + length > data.len() {
            return Err(DemuxError::InvalidData("descriptor data too short".into()));
        }
        descriptors.push(Descriptor::new(tag, &data[pos..pos + length]));
        pos += length;
    }
    Ok(descriptors)
}

/// Collects the payload of one PID into complete sections.
///
/// Only the first section starting in a payload unit is kept; PAT and PMT
/// fit in one section.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: BytesMut,
    expected: Option<usize>,
    active: bool,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.active = false;
    }

    /// Feeds one packet payload and returns a section once it is complete.
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool) -> Option<Bytes> {
        if payload_unit_start {
            self.reset();
            let pointer = *payload.first()? as usize;
            let start = 1 + pointer;
            if start > payload.len() {
                return None;
            }
            self.buffer.extend_from_slice(&payload[start..]);
            self.active = true;
        } else if self.active {
            self.buffer.extend_from_slice(payload);
        } else {
            return None;
        }

        if self.expected.is_none() && self.buffer.len() >= SECTION_PREFIX {
            let length = (((self.buffer[1] & 0x0f) as usize) << 8) | self.buffer[2] as usize;
            if length > MAX_SECTION_LENGTH {
                log::warn!("dropping section with bogus length {}", length);
                self.reset();
                return None;
            }
            self.expected = Some(SECTION_PREFIX + length);
        }

        match self.expected {
            Some(total) if self.buffer.len() >= total => {
                let section = self.buffer.split_to(total).freeze();
                self.reset();
                Some(section)
            }
            _ => None,
        }
    }
}

/// Minimal PAT/PMT acquisition: finds the requested program (or the first
/// one listed when none is requested) and builds its [`Program`].
#[derive(Debug)]
pub struct PsiScanner {
    requested: Option<u16>,
    pat: SectionAssembler,
    pmt: Option<(PatEntry, SectionAssembler)>,
    program: Option<Arc<Program>>,
    first_pat_offset: Option<u64>,
}

impl PsiScanner {
    pub fn new(requested: Option<u16>) -> Self {
        Self {
            requested,
            pat: SectionAssembler::new(),
            pmt: None,
            program: None,
            first_pat_offset: None,
        }
    }

    /// Feeds one packet. Returns the program the first time it is complete.
    pub fn push(&mut self, packet: &TransportPacket) -> Option<Arc<Program>> {
        let payload = packet.payload.as_ref()?;
        if packet.pid == PID_PAT {
            if self.first_pat_offset.is_none() && packet.payload_unit_start {
                self.first_pat_offset = Some(packet.offset);
            }
            if let Some(section) = self.pat.push(payload, packet.payload_unit_start) {
                self.handle_pat(&section);
            }
            return None;
        }

        let (entry, assembler) = self.pmt.as_mut()?;
        if packet.pid != entry.pid || self.program.is_some() {
            return None;
        }
        let section = assembler.push(payload, packet.payload_unit_start)?;
        let entry = *entry;
        match parse_pmt(&section, entry.pid) {
            Ok(program) if program.program_number == entry.program_number => {
                log::debug!(
                    "program {} found: PMT PID {:#06x}, PCR PID {:#06x}, {} streams",
                    program.program_number,
                    program.pmt_pid,
                    program.pcr_pid,
                    program.streams.len()
                );
                let program = Arc::new(program);
                self.program = Some(program.clone());
                Some(program)
            }
            Ok(program) => {
                log::trace!("ignoring PMT of program {}", program.program_number);
                None
            }
            Err(e) => {
                log::warn!("bad PMT on PID {:#06x}: {}", entry.pid, e);
                None
            }
        }
    }

    fn handle_pat(&mut self, section: &[u8]) {
        let entries = match parse_pat(section) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("bad PAT: {}", e);
                return;
            }
        };
        let selected = entries.into_iter().find(|e| match self.requested {
            Some(number) => e.program_number == number,
            None => e.program_number != 0,
        });
        let Some(entry) = selected else {
            log::trace!("PAT does not list program {:?}", self.requested);
            return;
        };
        if matches!(&self.pmt, Some((current, _)) if *current == entry) {
            return;
        }
        log::trace!(
            "PAT maps program {} to PID {:#06x}",
            entry.program_number,
            entry.pid
        );
        self.pmt = Some((entry, SectionAssembler::new()));
        self.program = None;
    }

    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    /// Offset of the first packet that started a PAT section.
    pub fn first_pat_offset(&self) -> Option<u64> {
        self.first_pat_offset
    }

    /// Forgets the current program so that a later scan starts from a
    /// fresh PAT.
    pub fn remove_program(&mut self) -> Option<Arc<Program>> {
        self.pat.reset();
        self.pmt = None;
        self.program.take()
    }

    pub fn reset(&mut self) {
        self.remove_program();
        self.first_pat_offset = None;
    }
}
