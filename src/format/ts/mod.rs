//! # MPEG Transport Stream demuxing
//!
//! Everything needed to turn a transport stream into per-stream
//! elementary payloads:
//!
//! - TS packet synchronisation and parsing ([`Packetizer`], [`TransportPacket`])
//! - PAT/PMT acquisition ([`PsiScanner`], [`Program`])
//! - PES header parsing and payload reassembly ([`PESHeader`], [`PesReassembler`])
//! - Stream routing, flow aggregation and segment events ([`TsDemuxer`])
//! - Duration estimation from PCR samples ([`DurationEstimator`])
//! - Clock statistics ([`ClockRecorder`])
//!
//! ## Example
//!
//! ```rust
//! use tsdemux::av::MemorySink;
//! use tsdemux::config::DemuxConfig;
//! use tsdemux::format::ts::{
//!     ElementaryStreamInfo, PacketResult, Packetizer, PESPacket, Program, PsiScanner,
//!     StreamType, TsBuilder, TsDemuxer,
//! };
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let program = Program::new(1, 0x1000, 0x100)
//!     .with_stream(ElementaryStreamInfo::new(StreamType::AudioAac, 0x101));
//! let mut builder = TsBuilder::new();
//! builder.psi(&[&program])?;
//! builder.pes(0x101, &PESPacket::new(0xc0, vec![1, 2, 3]).with_pts(Duration::from_secs(1)), None)?;
//! let data = builder.finish();
//!
//! let sink = MemorySink::new();
//! let mut demuxer = TsDemuxer::new(DemuxConfig::default(), sink.clone());
//! let mut scanner = PsiScanner::new(None);
//! let mut packetizer = Packetizer::new();
//! packetizer.push(0, &data);
//! while let PacketResult::Packet(packet) = packetizer.next_packet() {
//!     if let Some(program) = scanner.push(&packet) {
//!         demuxer.on_program_started(&program);
//!     }
//!     demuxer.on_packet(packet);
//! }
//! demuxer.finish();
//! assert_eq!(&sink.pushed_for(0x101)[0].concat()[..], &[1, 2, 3]);
//! # Ok(())
//! # }
//! ```

/// Synthesis of transport streams
pub mod builder;

/// Output handles and caps for elementary streams
pub mod caps;

/// Clock statistics events
pub mod clock;

/// Per-PID routing and flow aggregation
pub mod demuxer;

/// PCR based duration estimation
pub mod duration;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES header parsing and serialisation
pub mod pes;

/// Program specific information tables
pub mod psi;

/// PES reassembly state machine
pub mod reassembler;

/// Core TS types and constants
pub mod types;

pub use builder::TsBuilder;
pub use caps::handle_for_stream;
pub use clock::{ClockKind, ClockRecorder, StatsEvent, StatsSink};
pub use demuxer::{combine_flows, Demux, ProgramEvent, TsDemuxer};
pub use duration::{
    spawn_duration_scan, ByteSource, DurationEstimator, DurationScan, FileSource, MemorySource,
    PcrCollector, PcrSample, PcrScan, PcrVerdict,
};
pub use parser::{PacketResult, Packetizer, TransportPacket};
pub use pes::{PESHeader, PESPacket, PesParse};
pub use psi::{ElementaryStreamInfo, PatEntry, Program, PsiScanner};
pub use reassembler::{CompletedPes, PesReassembler, PesState, QueueOutcome, MAX_PENDING};
pub use types::{
    Descriptor, StreamType, TSHeader, PCR_HZ, PID_NULL, PID_PAT, PTS_HZ, TS_PACKET_SIZE,
};
