use super::parser::{PacketResult, Packetizer};
use super::psi::{Program, PsiScanner};
use super::types::*;
use crate::config::DemuxConfig;
use crate::error::{DemuxError, Result};
use crate::utils::masked_scan_all;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Header word mask for PCR candidates: sync byte, TEI, PID and the
/// adaptation-field-present bit
pub const PCR_SCAN_MASK: u32 = 0xff9f_ff20;

/// Pattern matched under [`PCR_SCAN_MASK`] by packets of `pcr_pid` that
/// carry an adaptation field.
pub fn pcr_scan_pattern(pcr_pid: u16) -> u32 {
    0x4700_0020 | ((pcr_pid as u32 & 0x1fff) << 8)
}

/// Random-access input for the duration scan.
#[async_trait]
pub trait ByteSource: Send {
    /// Reads up to `length` bytes at `offset`. Short or empty results mean
    /// the end of the input was reached.
    async fn pull_range(&mut self, offset: u64, length: usize) -> Result<Bytes>;

    /// Total input size in bytes, `None` when unknown.
    async fn total_length(&mut self) -> Result<Option<u64>>;
}

/// Byte source over a file opened with tokio.
#[derive(Debug)]
pub struct FileSource {
    file: tokio::fs::File,
    length: u64,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        Ok(Self { file, length })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn pull_range(&mut self, offset: u64, length: usize) -> Result<Bytes> {
        if offset >= self.length {
            return Ok(Bytes::new());
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    async fn total_length(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.length))
    }
}

/// Byte source over bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    length_known: bool,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            length_known: true,
        }
    }

    /// Hides the total length, as a live or piped input would.
    pub fn without_length(mut self) -> Self {
        self.length_known = false;
        self
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn pull_range(&mut self, offset: u64, length: usize) -> Result<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    async fn total_length(&mut self) -> Result<Option<u64>> {
        Ok(self.length_known.then_some(self.data.len() as u64))
    }
}

/// A PCR value and the offset of the packet carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrSample {
    /// 27 MHz ticks
    pub ticks: u64,
    pub offset: u64,
}

impl PcrSample {
    pub fn time(&self) -> Duration {
        pcr_to_time(self.ticks)
    }
}

/// What [`PcrCollector::offer`] did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcrVerdict {
    Accepted,
    /// Same value as the last accepted sample
    Duplicate,
    /// Further ahead of the last accepted sample than allowed
    Jump,
    /// Behind the last accepted sample
    Backwards,
    /// Enough samples were already collected
    Full,
}

/// Collects PCR samples, screening each against the last accepted one.
#[derive(Debug, Clone)]
pub struct PcrCollector {
    samples: Vec<PcrSample>,
    capacity: usize,
    max_jump: u64,
    reject_duplicates: bool,
}

impl PcrCollector {
    pub fn new(capacity: usize, max_jump: Duration, reject_duplicates: bool) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            max_jump: time_to_pcr(max_jump),
            reject_duplicates,
        }
    }

    pub fn from_config(config: &DemuxConfig) -> Self {
        Self::new(
            config.pcr_samples,
            config.max_pcr_jump,
            config.reject_duplicate_pcr,
        )
    }

    pub fn offer(&mut self, sample: PcrSample) -> PcrVerdict {
        if self.is_full() {
            return PcrVerdict::Full;
        }
        if let Some(last) = self.samples.last() {
            if sample.ticks == last.ticks && self.reject_duplicates {
                return PcrVerdict::Duplicate;
            }
            if sample.ticks < last.ticks {
                return PcrVerdict::Backwards;
            }
            if sample.ticks - last.ticks > self.max_jump {
                return PcrVerdict::Jump;
            }
        }
        self.samples.push(sample);
        PcrVerdict::Accepted
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&PcrSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&PcrSample> {
        self.samples.last()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Hands out the accepted samples, leaving the collector empty.
    pub fn finish(&mut self) -> Option<PcrScan> {
        if self.samples.is_empty() {
            return None;
        }
        Some(PcrScan {
            samples: std::mem::take(&mut self.samples),
        })
    }
}

/// Accepted PCR samples of one scan pass, never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PcrScan {
    samples: Vec<PcrSample>,
}

impl PcrScan {
    pub fn samples(&self) -> &[PcrSample] {
        &self.samples
    }

    pub fn first(&self) -> PcrSample {
        self.samples[0]
    }

    pub fn last(&self) -> PcrSample {
        self.samples[self.samples.len() - 1]
    }

    /// Clock time between the first and last sample.
    pub fn span(&self) -> Duration {
        pcr_to_time(self.last().ticks - self.first().ticks)
    }

    pub fn byte_span(&self) -> u64 {
        self.last().offset - self.first().offset
    }

    /// Bytes per second between the first and last sample.
    pub fn bitrate(&self) -> Option<u64> {
        let nanos = self.span().as_nanos();
        if nanos == 0 {
            return None;
        }
        Some((self.byte_span() as u128 * 1_000_000_000 / nanos) as u64)
    }

    /// Average distance in bytes between samples.
    pub fn pcr_interval(&self) -> u64 {
        self.byte_span() / self.samples.len() as u64
    }
}

/// Decodes the PCR of the packet header found at `pos`, if the packet
/// really carries one.
pub fn decode_pcr_at(data: &[u8], pos: usize) -> Option<u64> {
    let header = data.get(pos..pos + 12)?;
    let adaptation_length = header[4];
    if adaptation_length < 7 || header[5] & AFC_PCR_FLAG == 0 {
        return None;
    }
    read_pcr(&header[6..12])
}

/// Estimates the duration of a transport stream from the PCRs near its
/// start and end.
///
/// The program (the configured one, or the first listed) is located from
/// the start of the input. Its PCR PID is then scanned from the first PAT
/// for an initial PCR. The same is repeated over the last
/// `tail_packets` packets for a final PCR. State is cleared on every exit
/// path, so one estimator can be reused.
#[derive(Debug)]
pub struct DurationEstimator {
    config: DemuxConfig,
    packetizer: Packetizer,
    scanner: PsiScanner,
    collector: PcrCollector,
}

impl DurationEstimator {
    pub fn new(config: DemuxConfig) -> Self {
        Self {
            packetizer: Packetizer::new(),
            scanner: PsiScanner::new(config.program_number),
            collector: PcrCollector::from_config(&config),
            config,
        }
    }

    pub async fn estimate<B: ByteSource + ?Sized>(&mut self, source: &mut B) -> Result<Duration> {
        self.reset();
        let result = self.run(source).await;
        self.reset();
        match &result {
            Ok(duration) => log::debug!("estimated duration {:?}", duration),
            Err(e) => log::warn!("duration estimation failed: {}", e),
        }
        result
    }

    async fn run<B: ByteSource + ?Sized>(&mut self, source: &mut B) -> Result<Duration> {
        let program = self.find_program(source, 0, None).await?;
        let start = self.scanner.first_pat_offset().unwrap_or(0);
        let initial = self.process_pcr(source, start, program.pcr_pid).await?.first();

        // a fresh PAT has to be found near the end
        self.remove_program();

        let total = source.total_length().await?.ok_or(DemuxError::UnknownLength)?;
        log::debug!("input is {} bytes", total);
        let tail_bytes = (self.config.tail_packets * TS_PACKET_SIZE) as u64;
        let tail_start = total.saturating_sub(tail_bytes);

        self.scanner = PsiScanner::new(Some(program.program_number));
        let tail_program = self.find_program(source, tail_start, Some(total)).await?;
        let last = self
            .process_pcr(source, tail_start, tail_program.pcr_pid)
            .await?
            .last();

        let (initial, last) = (initial.time(), last.time());
        last.checked_sub(initial)
            .ok_or(DemuxError::PcrRegression { initial, last })
    }

    /// Scans header windows from `start` until the PAT and PMT of the
    /// program are known.
    pub async fn find_program<B: ByteSource + ?Sized>(
        &mut self,
        source: &mut B,
        start: u64,
        end: Option<u64>,
    ) -> Result<Arc<Program>> {
        self.packetizer.clear();
        let window = self.config.header_scan_window * TS_PACKET_SIZE;
        let mut offset = start;

        for _ in 0..self.config.max_header_windows {
            if end.map(|end| offset >= end).unwrap_or(false) {
                break;
            }
            let data = source.pull_range(offset, window).await?;
            if data.is_empty() {
                break;
            }
            self.packetizer.push(offset, &data);
            offset += data.len() as u64;

            loop {
                match self.packetizer.next_packet() {
                    PacketResult::Packet(packet) => {
                        if let Some(program) = self.scanner.push(&packet) {
                            self.packetizer.clear();
                            return Ok(program);
                        }
                    }
                    PacketResult::Bad(e) => log::trace!("skipping bad packet: {}", e),
                    PacketResult::NeedMore => break,
                }
            }
        }

        self.packetizer.clear();
        Err(DemuxError::ProgramNotFound {
            scanned_bytes: offset - start,
        })
    }

    /// Collects PCRs of `pcr_pid` from raw windows starting at `start`.
    pub async fn process_pcr<B: ByteSource + ?Sized>(
        &mut self,
        source: &mut B,
        start: u64,
        pcr_pid: u16,
    ) -> Result<PcrScan> {
        self.collector.clear();
        let window = self.config.pcr_window * TS_PACKET_SIZE;
        let pattern = pcr_scan_pattern(pcr_pid);

        for i in 0..self.config.pcr_windows {
            if self.collector.is_full() {
                break;
            }
            let offset = start + (i * window) as u64;
            let data = source.pull_range(offset, window).await?;
            if data.is_empty() {
                break;
            }

            for pos in masked_scan_all(&data, PCR_SCAN_MASK, pattern) {
                let Some(ticks) = decode_pcr_at(&data, pos) else {
                    continue;
                };
                let sample = PcrSample {
                    ticks,
                    offset: offset + pos as u64,
                };
                match self.collector.offer(sample) {
                    PcrVerdict::Accepted => log::trace!(
                        "PCR {} ({:?}) at offset {}",
                        ticks,
                        sample.time(),
                        sample.offset
                    ),
                    PcrVerdict::Duplicate => {
                        log::warn!("same PCR {} found again at offset {}", ticks, sample.offset)
                    }
                    PcrVerdict::Jump | PcrVerdict::Backwards => log::warn!(
                        "ignoring PCR {} at offset {}: too far from previous {:?}",
                        ticks,
                        sample.offset,
                        self.collector.last().map(|s| s.ticks)
                    ),
                    PcrVerdict::Full => break,
                }
            }
        }

        let scan = self
            .collector
            .finish()
            .ok_or(DemuxError::NoPcr { offset: start })?;
        log::debug!(
            "found {} PCRs, span {:?} over {} bytes, bitrate {:?} B/s, average interval {} bytes",
            scan.samples().len(),
            scan.span(),
            scan.byte_span(),
            scan.bitrate(),
            scan.pcr_interval()
        );
        Ok(scan)
    }

    fn remove_program(&mut self) {
        self.packetizer.clear();
        if let Some(program) = self.scanner.remove_program() {
            log::trace!("removed program {}", program.program_number);
        }
    }

    /// Clears packetizer, program and PCR state.
    pub fn reset(&mut self) {
        self.packetizer.clear();
        self.scanner = PsiScanner::new(self.config.program_number);
        self.collector.clear();
    }

    /// Whether no state of a previous run is left.
    pub fn is_clean(&self) -> bool {
        self.packetizer.buffered() == 0
            && self.scanner.program().is_none()
            && self.scanner.first_pat_offset().is_none()
            && self.collector.is_empty()
    }
}

/// A duration estimation running on its own task.
#[derive(Debug)]
pub struct DurationScan {
    handle: JoinHandle<()>,
    result: oneshot::Receiver<Result<Duration>>,
}

impl DurationScan {
    /// Aborts the scan. A pending [`DurationScan::wait`] then returns
    /// [`DemuxError::Cancelled`].
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Returns the result if the scan is done, without waiting.
    pub fn try_result(&mut self) -> Option<Result<Duration>> {
        match self.result.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DemuxError::Cancelled)),
        }
    }

    pub async fn wait(self) -> Result<Duration> {
        self.result.await.map_err(|_| DemuxError::Cancelled)?
    }
}

/// Runs a [`DurationEstimator`] over `source` on a tokio task, bounded by
/// `config.scan_timeout` when set.
pub fn spawn_duration_scan<B>(config: DemuxConfig, mut source: B) -> DurationScan
where
    B: ByteSource + 'static,
{
    let (tx, rx) = oneshot::channel();
    let timeout = config.scan_timeout;
    let handle = tokio::spawn(async move {
        let mut estimator = DurationEstimator::new(config);
        let result = match timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, estimator.estimate(&mut source)).await;
                outcome.unwrap_or_else(|_| {
                    log::warn!("duration scan timed out after {:?}", limit);
                    estimator.reset();
                    Err(DemuxError::Timeout(limit))
                })
            }
            None => estimator.estimate(&mut source).await,
        };
        let _ = tx.send(result);
    });
    DurationScan { handle, result: rx }
}
