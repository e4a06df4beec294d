//! Demuxes a transport stream file, or a generated one when no path is
//! given, and prints what each stream produced.
//!
//! ```text
//! cargo run --example ts_demux -- capture.ts
//! ```

use bytes::Bytes;
use std::time::Duration;
use tsdemux::av::MemorySink;
use tsdemux::config::DemuxConfig;
use tsdemux::format::ts::types::time_to_pcr;
use tsdemux::format::ts::{
    spawn_duration_scan, ElementaryStreamInfo, FileSource, MemorySource, PESPacket, PacketResult,
    Packetizer, Program, PsiScanner, StreamType, TsBuilder, TsDemuxer,
};

fn generated_stream() -> tsdemux::Result<Bytes> {
    let program = Program::new(1, 0x1000, 0x100)
        .with_stream(ElementaryStreamInfo::new(StreamType::VideoH264, 0x100))
        .with_stream(ElementaryStreamInfo::new(StreamType::AudioAac, 0x101));
    let mut builder = TsBuilder::new();
    for frame in 0..250u32 {
        let time = Duration::from_secs(1) + Duration::from_millis(40) * frame;
        if frame % 25 == 0 {
            builder.psi(&[&program])?;
        }
        let video = PESPacket::new(0xe0, vec![frame as u8; 1500]).with_pts(time);
        builder.pes(0x100, &video, Some(time_to_pcr(time)))?;
        let audio = PESPacket::new(0xc0, vec![0xaa; 300]).with_pts(time);
        builder.pes(0x101, &audio, None)?;
    }
    Ok(builder.finish())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = DemuxConfig::load();
    let path = std::env::args().nth(1);
    let data = match &path {
        Some(path) => Bytes::from(tokio::fs::read(path).await?),
        None => generated_stream()?,
    };
    println!("input: {} bytes", data.len());

    let duration = match &path {
        Some(path) => spawn_duration_scan(config.clone(), FileSource::open(path).await?).wait().await,
        None => spawn_duration_scan(config.clone(), MemorySource::new(data.clone())).wait().await,
    };
    match &duration {
        Ok(duration) => println!("duration: {:?}", duration),
        Err(e) => println!("duration unknown: {}", e),
    }

    let sink = MemorySink::new();
    let mut demuxer = TsDemuxer::new(config.clone(), sink.clone());
    demuxer.set_duration(duration.ok());
    let mut scanner = PsiScanner::new(config.program_number);
    let mut packetizer = Packetizer::new();
    packetizer.push(0, &data);

    loop {
        match packetizer.next_packet() {
            PacketResult::Packet(packet) => {
                if let Some(program) = scanner.push(&packet) {
                    demuxer.on_program_started(&program);
                }
                demuxer.on_packet(packet);
            }
            PacketResult::Bad(e) => println!("bad packet: {}", e),
            PacketResult::NeedMore => break,
        }
    }
    let status = demuxer.finish();
    println!("final flow: {}", status);

    for handle in sink.exposed() {
        let lists = sink.pushed_for(handle.pid);
        let bytes: usize = lists.iter().map(|l| l.size()).sum();
        println!(
            "{} [{}]: {} PES, {} bytes, first pts {:?}",
            handle.name,
            handle.caps,
            lists.len(),
            bytes,
            lists.first().and_then(|l| l.pts())
        );
    }
    for (pid, event) in sink.events() {
        println!("event on {:#06x}: {:?}", pid, event);
    }
    Ok(())
}
