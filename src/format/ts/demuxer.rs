use super::caps::handle_for_stream;
use super::clock::{ClockRecorder, StatsSink};
use super::parser::TransportPacket;
use super::psi::{ElementaryStreamInfo, Program};
use super::reassembler::{CompletedPes, PesReassembler, PesState, QueueOutcome};
use super::types::{StreamType, PID_COUNT};
use crate::av::{Event, FlowStatus, StreamHandle, StreamSink};
use crate::config::DemuxConfig;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Program table notifications delivered to a demuxer.
#[derive(Debug, Clone)]
pub enum ProgramEvent {
    Started(Arc<Program>),
    Stopped(Arc<Program>),
    StreamAdded {
        pid: u16,
        stream_type: StreamType,
        program: Arc<Program>,
    },
    StreamRemoved(u16),
}

/// Packet-driven demultiplexer interface.
pub trait Demux {
    /// Routes one transport packet to its stream.
    fn route(&mut self, packet: TransportPacket) -> FlowStatus;

    /// Pushes the completed PES of `pid` downstream, if any.
    fn flush(&mut self, pid: u16) -> FlowStatus;

    fn program_event(&mut self, event: ProgramEvent);
}

/// Aggregates per-stream statuses: the first one that is not
/// `NotLinked`, or `NotLinked` when every stream reports it.
pub fn combine_flows<I: IntoIterator<Item = FlowStatus>>(statuses: I) -> FlowStatus {
    statuses
        .into_iter()
        .find(|status| *status != FlowStatus::NotLinked)
        .unwrap_or(FlowStatus::NotLinked)
}

#[derive(Debug)]
struct Stream {
    info: ElementaryStreamInfo,
    handle: Option<StreamHandle>,
    pes: PesReassembler,
    flow: FlowStatus,
    active: bool,
    caps_sent: bool,
}

impl Stream {
    fn new(info: ElementaryStreamInfo, program: &Program) -> Self {
        let handle = handle_for_stream(&info, program);
        Self {
            pes: PesReassembler::new(info.pid),
            info,
            handle,
            flow: FlowStatus::Ok,
            active: false,
            caps_sent: false,
        }
    }
}

/// MPEG-TS demultiplexer for one program.
///
/// Packets are routed by PID to a per-stream [`PesReassembler`]; completed
/// PES payloads go to the [`StreamSink`]. The active program is only
/// referenced weakly: its owner announces it with
/// [`TsDemuxer::on_program_started`] and withdraws it with
/// [`TsDemuxer::on_program_stopped`].
///
/// ```
/// use std::sync::Arc;
/// use tsdemux::av::{FlowStatus, MemorySink};
/// use tsdemux::config::DemuxConfig;
/// use tsdemux::format::ts::{ElementaryStreamInfo, Program, StreamType, TransportPacket, TsDemuxer};
///
/// let sink = MemorySink::new();
/// let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
/// let program = Arc::new(
///     Program::new(1, 0x1000, 0x100)
///         .with_stream(ElementaryStreamInfo::new(StreamType::VideoH264, 0x100)),
/// );
/// demuxer.on_program_started(&program);
/// assert_eq!(sink.exposed()[0].name, "video_0100");
///
/// let status = demuxer.on_packet(TransportPacket::new(0x200, true, vec![0u8; 184]));
/// assert_eq!(status, FlowStatus::NotLinked);
/// ```
pub struct TsDemuxer<S: StreamSink> {
    sink: S,
    /// Indexed by PID
    streams: Box<[Option<Stream>]>,
    program: Weak<Program>,
    requested_program: Option<u16>,
    active_program: Option<u16>,
    recorder: ClockRecorder,
    need_segment: bool,
    duration: Option<Duration>,
}

impl<S: StreamSink> TsDemuxer<S> {
    pub fn new(config: DemuxConfig, sink: S) -> Self {
        Self {
            sink,
            streams: std::iter::repeat_with(|| None).take(PID_COUNT).collect(),
            program: Weak::new(),
            requested_program: config.program_number,
            active_program: None,
            recorder: ClockRecorder::new(config.emit_stats),
            need_segment: true,
            duration: None,
        }
    }

    pub fn with_stats_sink(mut self, sink: impl StatsSink + 'static) -> Self {
        self.recorder.set_sink(Some(Box::new(sink)));
        self
    }

    pub fn set_emit_stats(&mut self, enabled: bool) {
        self.recorder.set_enabled(enabled);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Estimated duration, once known.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Option<Duration>) {
        log::debug!("duration set to {:?}", duration);
        self.duration = duration;
    }

    /// Program number of the program being demuxed.
    pub fn active_program(&self) -> Option<u16> {
        self.current_program().map(|p| p.program_number)
    }

    pub fn stream_state(&self, pid: u16) -> Option<PesState> {
        self.stream(pid).map(|s| s.pes.state())
    }

    pub fn stream_flow(&self, pid: u16) -> Option<FlowStatus> {
        self.stream(pid).map(|s| s.flow)
    }

    pub fn stream_handle(&self, pid: u16) -> Option<&StreamHandle> {
        self.stream(pid).and_then(|s| s.handle.as_ref())
    }

    fn stream(&self, pid: u16) -> Option<&Stream> {
        self.streams.get(pid as usize).and_then(Option::as_ref)
    }

    fn stream_mut(&mut self, pid: u16) -> Option<&mut Stream> {
        self.streams.get_mut(pid as usize).and_then(Option::as_mut)
    }

    fn current_program(&self) -> Option<Arc<Program>> {
        self.program.upgrade()
    }

    /// Handles one synchronised transport packet.
    pub fn on_packet(&mut self, packet: TransportPacket) -> FlowStatus {
        if let Some(pcr) = packet.pcr {
            self.recorder.record_pcr(packet.pid, packet.offset, pcr);
        }
        if let Some(opcr) = packet.opcr {
            self.recorder.record_opcr(packet.pid, packet.offset, opcr);
        }

        if self.current_program().is_none() {
            if let Some(number) = self.active_program.take() {
                log::warn!("program {} went away without being stopped", number);
            }
            log::trace!("no active program, dropping packet on PID {:#06x}", packet.pid);
            return FlowStatus::NotLinked;
        }

        // active streams are exactly those of the current program, including
        // ones added after it started
        let pid = packet.pid;
        let Some(stream) = self.streams[pid as usize].as_mut().filter(|s| s.active) else {
            return FlowStatus::NotLinked;
        };
        let Some(payload) = packet.payload else {
            return stream.flow;
        };

        match stream
            .pes
            .queue(payload, packet.payload_unit_start, packet.offset, &mut self.recorder)
        {
            QueueOutcome::FlushReady => self.flush(pid),
            QueueOutcome::Queued | QueueOutcome::Dropped => stream.flow,
        }
    }

    /// Announces a program. Only the requested program, or the first one
    /// when none was requested, becomes active.
    pub fn on_program_started(&mut self, program: &Arc<Program>) {
        if let Some(requested) = self.requested_program {
            if requested != program.program_number {
                log::debug!(
                    "ignoring program {}, waiting for {}",
                    program.program_number,
                    requested
                );
                return;
            }
        }
        if let Some(current) = self.current_program() {
            if !Arc::ptr_eq(&current, program) {
                log::debug!(
                    "ignoring program {}, already demuxing {}",
                    program.program_number,
                    current.program_number
                );
                return;
            }
        }

        log::info!("program {} started", program.program_number);
        self.program = Arc::downgrade(program);
        self.active_program = Some(program.program_number);
        for info in &program.streams {
            if self.stream(info.pid).is_none() {
                self.streams[info.pid as usize] = Some(Stream::new(info.clone(), program));
            }
            self.activate(info.pid);
        }
    }

    /// Withdraws the active program and unexposes every active stream,
    /// including streams added after the program started. Other programs
    /// are ignored.
    pub fn on_program_stopped(&mut self, program: &Arc<Program>) {
        let is_current = self
            .program
            .upgrade()
            .map(|current| Arc::ptr_eq(&current, program))
            .unwrap_or(false);
        if !is_current {
            return;
        }

        log::info!("program {} stopped", program.program_number);
        let pids: Vec<u16> = self
            .streams
            .iter()
            .flatten()
            .filter(|s| s.active)
            .map(|s| s.info.pid)
            .collect();
        for pid in pids {
            self.remove_stream(pid);
        }
        self.program = Weak::new();
        self.active_program = None;
    }

    /// Creates the stream carried on `pid`. It is activated right away only
    /// if `program` is the one being demuxed.
    pub fn on_stream_added(&mut self, pid: u16, stream_type: StreamType, program: &Arc<Program>) {
        let pid = pid & 0x1fff;
        if self.stream(pid).is_some() {
            log::debug!("PID {:#06x} already has a stream, replacing it", pid);
            self.remove_stream(pid);
        }
        let info = program
            .stream(pid)
            .filter(|info| info.stream_type == stream_type)
            .cloned()
            .unwrap_or_else(|| ElementaryStreamInfo::new(stream_type, pid));
        log::debug!("stream added on PID {:#06x}, type {:#04x}", pid, stream_type.as_u8());
        self.streams[pid as usize] = Some(Stream::new(info, program));

        let is_current = self
            .program
            .upgrade()
            .map(|current| Arc::ptr_eq(&current, program))
            .unwrap_or(false);
        if is_current {
            self.activate(pid);
        }
    }

    pub fn on_stream_removed(&mut self, pid: u16) {
        log::debug!("stream removed on PID {:#06x}", pid);
        self.remove_stream(pid & 0x1fff);
    }

    fn activate(&mut self, pid: u16) {
        let Some(stream) = self.streams[pid as usize].as_mut() else {
            return;
        };
        stream.flow = FlowStatus::Ok;
        if stream.active {
            return;
        }
        stream.active = true;
        match &stream.handle {
            Some(handle) => {
                log::debug!("exposing {} for PID {:#06x}", handle.name, pid);
                self.sink.stream_exposed(handle);
            }
            None => log::warn!(
                "stream on PID {:#06x} (type {:#04x}) has no output",
                pid,
                stream.info.stream_type.as_u8()
            ),
        }
    }

    fn remove_stream(&mut self, pid: u16) {
        let Some(stream) = self.streams[pid as usize].take() else {
            return;
        };
        if let (true, Some(handle)) = (stream.active, &stream.handle) {
            log::debug!("unexposing {}", handle.name);
            self.sink.stream_unexposed(handle);
        }
    }

    /// Records `status` for `pid` and folds it with the other exposed
    /// streams of the active program. Streams without an output never
    /// push, so they take no part in the fold.
    pub fn combine_flows(&mut self, pid: u16, status: FlowStatus) -> FlowStatus {
        if let Some(stream) = self.stream_mut(pid) {
            stream.flow = status;
        }
        if status != FlowStatus::NotLinked {
            return status;
        }
        combine_flows(
            self.streams
                .iter()
                .flatten()
                .filter(|s| s.active && s.handle.is_some())
                .map(|s| s.flow),
        )
    }

    /// Flushes every stream holding a parsed PES and sends end of stream to
    /// every exposed output.
    pub fn finish(&mut self) -> FlowStatus {
        let mut result = FlowStatus::Ok;
        let pids: Vec<u16> = self
            .streams
            .iter()
            .flatten()
            .filter(|s| s.active)
            .map(|s| s.info.pid)
            .collect();
        for pid in pids {
            let completed = self.stream_mut(pid).and_then(|s| s.pes.drain());
            if let Some(completed) = completed {
                let status = self.dispatch(pid, completed);
                if result.is_ok() {
                    result = status;
                }
            }
        }
        self.broadcast(Event::EndOfStream);
        result
    }

    /// Drops all stream state; the active program stays.
    pub fn reset(&mut self) {
        for stream in self.streams.iter_mut().flatten() {
            stream.pes.reset();
            stream.flow = FlowStatus::Ok;
            stream.caps_sent = false;
        }
        self.need_segment = true;
    }

    fn broadcast(&mut self, event: Event) {
        for stream in self.streams.iter().flatten().filter(|s| s.active) {
            if let Some(handle) = &stream.handle {
                self.sink.push_event(handle, event);
            }
        }
    }

    fn send_segment_start(&mut self) {
        let start = self
            .streams
            .iter()
            .flatten()
            .filter(|s| s.active)
            .filter_map(|s| s.pes.first_pts())
            .min();
        let stop = match (start, self.duration) {
            (Some(start), Some(duration)) => Some(start + duration),
            _ => None,
        };
        log::debug!("sending segment start {:?} - {:?}", start, stop);
        self.broadcast(Event::SegmentStart { start, stop });
        self.need_segment = false;
    }

    fn dispatch(&mut self, pid: u16, completed: CompletedPes) -> FlowStatus {
        let has_handle = self.stream(pid).map(|s| s.handle.is_some()).unwrap_or(false);
        if !has_handle {
            log::trace!("PID {:#06x} has no output, dropping {} bytes", pid, completed.list.size());
            return FlowStatus::Ok;
        }
        if self.need_segment {
            self.send_segment_start();
        }

        let Some(stream) = self.streams[pid as usize].as_mut() else {
            return FlowStatus::NotLinked;
        };
        let Some(handle) = stream.handle.as_ref() else {
            return FlowStatus::Ok;
        };
        let mut list = completed.list;
        if !stream.caps_sent {
            list = list.with_caps(handle.caps.clone());
            stream.caps_sent = true;
        }
        log::debug!(
            "pushing {} buffers ({} bytes, pts {:?}) on {}",
            list.len(),
            list.size(),
            completed.pts,
            handle.name
        );
        let status = self.sink.push(handle, list);
        log::debug!("{} returned {}", handle.name, status);
        let combined = self.combine_flows(pid, status);
        log::trace!("combined flow {}", combined);
        combined
    }
}

impl<S: StreamSink> Demux for TsDemuxer<S> {
    fn route(&mut self, packet: TransportPacket) -> FlowStatus {
        self.on_packet(packet)
    }

    fn flush(&mut self, pid: u16) -> FlowStatus {
        match self.stream_mut(pid).and_then(|s| s.pes.take_flush()) {
            Some(completed) => self.dispatch(pid, completed),
            None => FlowStatus::Ok,
        }
    }

    fn program_event(&mut self, event: ProgramEvent) {
        match event {
            ProgramEvent::Started(program) => self.on_program_started(&program),
            ProgramEvent::Stopped(program) => self.on_program_stopped(&program),
            ProgramEvent::StreamAdded {
                pid,
                stream_type,
                program,
            } => self.on_stream_added(pid, stream_type, &program),
            ProgramEvent::StreamRemoved(pid) => self.on_stream_removed(pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::pes::PESPacket;
    use crate::av::MemorySink;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    fn pes_packet(pid: u16, stream_id: u8, secs: u64) -> TransportPacket {
        let mut buf = BytesMut::new();
        PESPacket::new(stream_id, vec![0x11; 32])
            .with_pts(Duration::from_secs(secs))
            .write_to(&mut buf)
            .unwrap();
        TransportPacket::new(pid, true, buf.freeze())
    }

    fn program() -> Arc<Program> {
        Arc::new(
            Program::new(1, 0x1000, 0x100)
                .with_stream(ElementaryStreamInfo::new(StreamType::VideoH264, 0x100))
                .with_stream(ElementaryStreamInfo::new(StreamType::AudioAac, 0x101))
                .with_stream(ElementaryStreamInfo::new(StreamType::AudioMpeg1, 0x102)),
        )
    }

    #[test]
    fn test_combine_flows_free() {
        use FlowStatus::*;
        assert_eq!(combine_flows([NotLinked, NotLinked, Ok]), Ok);
        assert_eq!(combine_flows([NotLinked, NotLinked]), NotLinked);
        assert_eq!(combine_flows([NotLinked, Flushing, Ok]), Flushing);
        assert_eq!(combine_flows(Vec::new()), NotLinked);
    }

    #[test]
    fn test_combine_flows_per_stream() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink);
        let program = program();
        demuxer.on_program_started(&program);

        assert_eq!(demuxer.combine_flows(0x100, FlowStatus::NotLinked), FlowStatus::Ok);
        assert_eq!(demuxer.combine_flows(0x101, FlowStatus::NotLinked), FlowStatus::Ok);
        assert_eq!(demuxer.combine_flows(0x102, FlowStatus::NotLinked), FlowStatus::NotLinked);
        assert_eq!(demuxer.combine_flows(0x101, FlowStatus::Error), FlowStatus::Error);
        assert_eq!(demuxer.stream_flow(0x101), Some(FlowStatus::Error));
    }

    #[test]
    fn test_requested_program_only() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default().with_program_number(2), sink.clone());
        demuxer.on_program_started(&program());
        assert_eq!(demuxer.active_program(), None);
        assert!(sink.exposed().is_empty());
    }

    #[test]
    fn test_program_lifecycle() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
        let program = program();

        demuxer.on_program_started(&program);
        assert_eq!(demuxer.active_program(), Some(1));
        let names: Vec<String> = sink.exposed().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["video_0100", "audio_0101", "audio_0102"]);
        assert_eq!(demuxer.stream_state(0x100), Some(PesState::Empty));

        // another program with the same number is not the active one
        let other = Arc::new(Program::new(1, 0x1000, 0x100));
        demuxer.on_program_stopped(&other);
        assert_eq!(demuxer.active_program(), Some(1));

        demuxer.on_program_stopped(&program);
        assert_eq!(demuxer.active_program(), None);
        assert_eq!(sink.unexposed().len(), 3);
        assert_eq!(demuxer.stream_state(0x100), None);
    }

    #[test]
    fn test_stream_added_before_program_start() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
        let program = program();

        demuxer.on_stream_added(0x100, StreamType::VideoH264, &program);
        assert!(sink.exposed().is_empty());
        assert_eq!(demuxer.stream_handle(0x100).map(|h| h.name.as_str()), Some("video_0100"));

        demuxer.on_program_started(&program);
        assert_eq!(sink.exposed().len(), 3);

        demuxer.on_stream_removed(0x101);
        assert_eq!(sink.unexposed()[0].name, "audio_0101");
        assert_eq!(demuxer.stream_state(0x101), None);
    }

    #[test]
    fn test_dropped_program_reference() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink);
        demuxer.on_program_started(&program());
        // the only strong reference was the temporary
        assert_eq!(demuxer.active_program(), None);
        assert_eq!(
            demuxer.on_packet(TransportPacket::new(0x100, true, vec![0u8; 10])),
            FlowStatus::NotLinked
        );
    }

    #[test]
    fn test_stream_added_on_unlisted_pid() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
        let program = Arc::new(
            Program::new(1, 0x1000, 0x100)
                .with_stream(ElementaryStreamInfo::new(StreamType::VideoH264, 0x100)),
        );
        demuxer.on_program_started(&program);
        demuxer.on_stream_added(0x200, StreamType::AudioAac, &program);
        let names: Vec<String> = sink.exposed().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["video_0100", "audio_0200"]);

        // routed even though the PMT never listed it
        assert_eq!(demuxer.on_packet(pes_packet(0x200, 0xc0, 1)), FlowStatus::Ok);
        assert_eq!(demuxer.stream_state(0x200), Some(PesState::Buffer));
        assert_eq!(demuxer.on_packet(pes_packet(0x200, 0xc0, 2)), FlowStatus::Ok);
        assert_eq!(sink.pushed_for(0x200).len(), 1);

        demuxer.on_program_stopped(&program);
        let names: Vec<String> = sink.unexposed().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["video_0100", "audio_0200"]);
        assert_eq!(demuxer.stream_state(0x200), None);
        assert_eq!(demuxer.stream_state(0x100), None);
    }

    #[test]
    fn test_stream_without_output_ignored_by_flow_fold() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink);
        let program = Arc::new(
            Program::new(1, 0x1000, 0x100)
                .with_stream(ElementaryStreamInfo::new(StreamType::VideoH264, 0x100))
                .with_stream(ElementaryStreamInfo::new(StreamType::Other(0x42), 0x101)),
        );
        demuxer.on_program_started(&program);
        assert!(demuxer.stream_handle(0x101).is_none());
        assert_eq!(demuxer.combine_flows(0x100, FlowStatus::NotLinked), FlowStatus::NotLinked);
    }

    #[test]
    fn test_reset_resends_caps() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
        let program = program();
        demuxer.on_program_started(&program);

        demuxer.on_packet(pes_packet(0x101, 0xc0, 1));
        demuxer.on_packet(pes_packet(0x101, 0xc0, 2));
        demuxer.reset();
        demuxer.on_packet(pes_packet(0x101, 0xc0, 3));
        demuxer.on_packet(pes_packet(0x101, 0xc0, 4));

        let pushed = sink.pushed_for(0x101);
        assert_eq!(pushed.len(), 2);
        assert!(pushed[0].caps.is_some());
        assert!(pushed[1].caps.is_some());
    }

    #[test]
    fn test_demux_trait_events_and_flush() {
        let sink = MemorySink::new();
        let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
        let program = program();

        demuxer.program_event(ProgramEvent::Started(program.clone()));
        assert_eq!(demuxer.active_program(), Some(1));
        demuxer.program_event(ProgramEvent::StreamAdded {
            pid: 0x103,
            stream_type: StreamType::BdAudioEac3,
            program: program.clone(),
        });
        assert_eq!(sink.exposed().len(), 4);

        assert_eq!(demuxer.route(pes_packet(0x100, 0xe0, 1)), FlowStatus::Ok);
        // nothing completed yet
        assert_eq!(Demux::flush(&mut demuxer, 0x100), FlowStatus::Ok);
        assert!(sink.pushed().is_empty());
        assert_eq!(demuxer.route(pes_packet(0x100, 0xe0, 2)), FlowStatus::Ok);
        assert_eq!(sink.pushed_for(0x100).len(), 1);
        // the completed PES was taken by the unit start
        assert_eq!(Demux::flush(&mut demuxer, 0x100), FlowStatus::Ok);
        assert_eq!(sink.pushed_for(0x100).len(), 1);
        assert_eq!(Demux::flush(&mut demuxer, 0x1ff0), FlowStatus::Ok);

        demuxer.program_event(ProgramEvent::StreamRemoved(0x103));
        assert_eq!(demuxer.stream_state(0x103), None);
        demuxer.program_event(ProgramEvent::Stopped(program));
        assert_eq!(demuxer.active_program(), None);
        assert_eq!(sink.unexposed().len(), 4);
    }
}
