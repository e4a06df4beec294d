use super::clock::ClockRecorder;
use super::pes::{PESHeader, PesParse};
use crate::av::{Buffer, BufferList};
use bytes::{Bytes, BytesMut};
use std::time::Duration;

/// Most payload fragments held while a PES header is incomplete
pub const MAX_PENDING: usize = 256;

/// Reassembly state of one elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PesState {
    /// No PES in progress
    Empty,
    /// Collecting the bytes of a PES header
    Header,
    /// Header parsed, collecting payload
    Buffer,
    /// Lost sync, dropping payload until the next unit start
    Discont,
}

/// What [`PesReassembler::queue`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Dropped,
    Queued,
    /// The previous PES is complete and waits in [`PesReassembler::take_flush`]
    FlushReady,
}

/// One reassembled PES payload, header stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPes {
    pub stream_id: u8,
    pub pts: Option<Duration>,
    pub dts: Option<Duration>,
    pub list: BufferList,
}

/// Rebuilds PES packets of one PID from transport packet payloads.
#[derive(Debug)]
pub struct PesReassembler {
    pid: u16,
    state: PesState,
    /// Fragments of the PES whose header is being collected, with offsets
    pending: Vec<(u64, Bytes)>,
    current: Option<CompletedPes>,
    ready: Option<CompletedPes>,
    first_pts: Option<Duration>,
    last_pts: Option<Duration>,
}

impl PesReassembler {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            state: PesState::Empty,
            pending: Vec::with_capacity(MAX_PENDING),
            current: None,
            ready: None,
            first_pts: None,
            last_pts: None,
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn state(&self) -> PesState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// PTS of the first PES header parsed since the last reset.
    pub fn first_pts(&self) -> Option<Duration> {
        self.first_pts
    }

    pub fn last_pts(&self) -> Option<Duration> {
        self.last_pts
    }

    /// Feeds the payload of one transport packet.
    pub fn queue(
        &mut self,
        payload: Bytes,
        payload_unit_start: bool,
        offset: u64,
        recorder: &mut ClockRecorder,
    ) -> QueueOutcome {
        if payload_unit_start {
            let mut outcome = QueueOutcome::Queued;
            match self.state {
                PesState::Buffer => {
                    if self.ready.is_some() {
                        log::warn!("PID {:#06x}: unflushed PES replaced", self.pid);
                    }
                    self.ready = self.current.take();
                    outcome = QueueOutcome::FlushReady;
                }
                PesState::Header => {
                    log::warn!(
                        "PID {:#06x}: new PES started before header of previous one completed, dropping {} fragments",
                        self.pid,
                        self.pending.len()
                    );
                }
                PesState::Discont => {
                    log::trace!("PID {:#06x}: resync at offset {}", self.pid, offset);
                }
                PesState::Empty => {}
            }
            self.pending.clear();
            self.current = None;
            self.state = PesState::Header;
            self.pending.push((offset, payload));
            self.parse_header(recorder);
            return outcome;
        }

        match self.state {
            PesState::Empty => {
                log::warn!(
                    "PID {:#06x}: missing PES start at offset {}, dropping payload",
                    self.pid,
                    offset
                );
                self.state = PesState::Discont;
                QueueOutcome::Dropped
            }
            PesState::Discont => {
                log::trace!("PID {:#06x}: dropping payload in discont state", self.pid);
                QueueOutcome::Dropped
            }
            PesState::Header => {
                if self.pending.len() >= MAX_PENDING {
                    log::warn!(
                        "PID {:#06x}: {} fragments pending without a complete PES header, dropping them",
                        self.pid,
                        self.pending.len()
                    );
                    self.pending.clear();
                    self.state = PesState::Discont;
                    return QueueOutcome::Dropped;
                }
                self.pending.push((offset, payload));
                self.parse_header(recorder);
                QueueOutcome::Queued
            }
            PesState::Buffer => {
                if let Some(current) = self.current.as_mut() {
                    current.list.push(Buffer::new(payload).with_offset(offset));
                }
                QueueOutcome::Queued
            }
        }
    }

    /// Takes the PES completed by the last unit start or by [`Self::drain`].
    pub fn take_flush(&mut self) -> Option<CompletedPes> {
        self.ready.take()
    }

    /// Completes the PES in progress, if its header was parsed. Used at end
    /// of stream.
    pub fn drain(&mut self) -> Option<CompletedPes> {
        if self.state == PesState::Buffer {
            self.ready = self.current.take();
        }
        self.pending.clear();
        self.state = PesState::Empty;
        self.take_flush()
    }

    pub fn reset(&mut self) {
        self.state = PesState::Empty;
        self.pending.clear();
        self.current = None;
        self.ready = None;
        self.first_pts = None;
        self.last_pts = None;
    }

    fn parse_header(&mut self, recorder: &mut ClockRecorder) {
        let parsed = if let [(_, only)] = self.pending.as_slice() {
            PESHeader::parse(only)
        } else {
            let mut joined = BytesMut::new();
            for (_, fragment) in &self.pending {
                joined.extend_from_slice(fragment);
            }
            PESHeader::parse(&joined)
        };

        match parsed {
            PesParse::Incomplete => {}
            PesParse::Invalid(reason) => {
                log::warn!("PID {:#06x}: bad PES header: {}", self.pid, reason);
                self.pending.clear();
                self.state = PesState::Discont;
            }
            PesParse::Complete {
                header,
                header_size,
            } => self.start_payload(header, header_size, recorder),
        }
    }

    fn start_payload(&mut self, header: PESHeader, header_size: usize, recorder: &mut ClockRecorder) {
        let offset = self.pending.first().map(|(o, _)| *o).unwrap_or(0);
        let pts = header.pts_time();
        let dts = header.dts_time();
        if let Some(ticks) = header.pts {
            recorder.record_pts(self.pid, offset, ticks);
            if self.first_pts.is_none() {
                log::debug!("PID {:#06x}: first PTS {:?}", self.pid, pts);
                self.first_pts = pts;
            }
            self.last_pts = pts;
        }
        if let Some(ticks) = header.dts {
            recorder.record_dts(self.pid, offset, ticks);
        }

        let mut list = BufferList::new();
        let mut skip = header_size;
        for (offset, mut fragment) in self.pending.drain(..) {
            if skip >= fragment.len() {
                skip -= fragment.len();
                continue;
            }
            let _ = fragment.split_to(skip);
            skip = 0;
            let mut buffer = Buffer::new(fragment).with_offset(offset);
            if list.is_empty() {
                buffer.pts = pts;
                buffer.dts = dts;
            }
            list.push(buffer);
        }

        log::trace!(
            "PID {:#06x}: PES header of {} bytes parsed, stream id {:#04x}",
            self.pid,
            header_size,
            header.stream_id
        );
        self.current = Some(CompletedPes {
            stream_id: header.stream_id,
            pts,
            dts,
            list,
        });
        self.state = PesState::Buffer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::pes::PESPacket;
    use pretty_assertions::assert_eq;

    fn pes_bytes(payload: &[u8], pts: Option<Duration>) -> Bytes {
        let mut packet = PESPacket::new(0xe0, payload.to_vec());
        if let Some(pts) = pts {
            packet = packet.with_pts(pts);
        }
        let mut buf = BytesMut::new();
        packet.write_to(&mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_single_pes() {
        let mut recorder = ClockRecorder::default();
        let mut pes = PesReassembler::new(0x100);
        let data = pes_bytes(b"hello world", Some(Duration::from_secs(3)));

        assert_eq!(pes.queue(data.slice(..10), true, 0, &mut recorder), QueueOutcome::Queued);
        assert_eq!(pes.state(), PesState::Header);
        assert_eq!(pes.queue(data.slice(10..20), false, 188, &mut recorder), QueueOutcome::Queued);
        assert_eq!(pes.state(), PesState::Buffer);
        assert_eq!(pes.queue(data.slice(20..), false, 376, &mut recorder), QueueOutcome::Queued);

        let next = pes_bytes(b"next", None);
        assert_eq!(pes.queue(next, true, 564, &mut recorder), QueueOutcome::FlushReady);
        let done = pes.take_flush().unwrap();
        assert_eq!(&done.list.concat()[..], b"hello world");
        assert_eq!(done.pts, Some(Duration::from_secs(3)));
        assert_eq!(done.list.pts(), Some(Duration::from_secs(3)));
        // header fully contained in the first two fragments
        assert_eq!(done.list.buffers[0].offset, 188);
        assert_eq!(pes.first_pts(), Some(Duration::from_secs(3)));
        assert!(pes.take_flush().is_none());

        let last = pes.drain().unwrap();
        assert_eq!(&last.list.concat()[..], b"next");
        assert_eq!(pes.state(), PesState::Empty);
    }

    #[test]
    fn test_missing_start_goes_discont() {
        let mut recorder = ClockRecorder::default();
        let mut pes = PesReassembler::new(0x100);
        assert_eq!(
            pes.queue(Bytes::from_static(b"orphan"), false, 0, &mut recorder),
            QueueOutcome::Dropped
        );
        assert_eq!(pes.state(), PesState::Discont);
        assert_eq!(
            pes.queue(Bytes::from_static(b"more"), false, 188, &mut recorder),
            QueueOutcome::Dropped
        );
        assert_eq!(pes.state(), PesState::Discont);
        assert!(pes.drain().is_none());
    }

    #[test]
    fn test_bad_start_code_records_no_pts() {
        let mut recorder = ClockRecorder::default();
        let mut pes = PesReassembler::new(0x100);
        let mut data = pes_bytes(b"payload", Some(Duration::from_secs(1))).to_vec();
        data[2] = 0x02;
        pes.queue(Bytes::from(data), true, 0, &mut recorder);
        assert_eq!(pes.state(), PesState::Discont);
        assert_eq!(pes.first_pts(), None);

        // next unit start resyncs
        pes.queue(pes_bytes(b"ok", None), true, 188, &mut recorder);
        assert_eq!(pes.state(), PesState::Buffer);
        assert!(pes.take_flush().is_none());
    }

    #[test]
    fn test_pending_overflow() {
        let mut recorder = ClockRecorder::default();
        let mut pes = PesReassembler::new(0x100);
        let header = PESHeader::new(0xe0).with_stuffing(0xff);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf).unwrap();
        let data = buf.freeze();
        assert_eq!(data.len(), 9 + 255);

        pes.queue(data.slice(0..1), true, 0, &mut recorder);
        for i in 1..MAX_PENDING {
            assert_eq!(
                pes.queue(data.slice(i..i + 1), false, i as u64 * 188, &mut recorder),
                QueueOutcome::Queued
            );
        }
        assert_eq!(pes.state(), PesState::Header);
        assert_eq!(pes.pending_len(), MAX_PENDING);

        let outcome = pes.queue(data.slice(256..257), false, 256 * 188, &mut recorder);
        assert_eq!(outcome, QueueOutcome::Dropped);
        assert_eq!(pes.state(), PesState::Discont);
        assert_eq!(pes.pending_len(), 0);
    }

    #[test]
    fn test_reset() {
        let mut recorder = ClockRecorder::default();
        let mut pes = PesReassembler::new(0x100);
        pes.queue(pes_bytes(b"x", Some(Duration::from_secs(1))), true, 0, &mut recorder);
        assert_eq!(pes.state(), PesState::Buffer);
        pes.reset();
        assert_eq!(pes.state(), PesState::Empty);
        assert_eq!(pes.first_pts(), None);
        assert!(pes.drain().is_none());
    }
}
