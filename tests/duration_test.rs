use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tsdemux::config::DemuxConfig;
use tsdemux::error::{DemuxError, Result};
use tsdemux::format::ts::types::time_to_pcr;
use tsdemux::format::ts::{
    spawn_duration_scan, ByteSource, DurationEstimator, ElementaryStreamInfo, FileSource,
    MemorySource, Program, StreamType, TsBuilder, TS_PACKET_SIZE,
};

const PCR_PID: u16 = 0x100;

fn program() -> Program {
    Program::new(1, 0x1000, PCR_PID)
        .with_stream(ElementaryStreamInfo::new(StreamType::VideoMpeg2, PCR_PID))
}

/// PSI and PCRs from `start` at the head, filler, then PSI and PCRs
/// ending exactly at `end` in the last 20 packets.
fn stream(start: Duration, end: Duration) -> Bytes {
    let step = Duration::from_millis(40);
    let program = program();
    let mut builder = TsBuilder::new();
    builder.psi(&[&program]).unwrap();
    for k in 0..15u32 {
        builder.pcr(PCR_PID, time_to_pcr(start + step * k)).unwrap();
    }
    builder.null_packets(300).unwrap();

    builder.null_packets(8).unwrap();
    builder.psi(&[&program]).unwrap();
    for k in (0..10u32).rev() {
        builder.pcr(PCR_PID, time_to_pcr(end - step * k)).unwrap();
    }
    builder.finish()
}

fn config() -> DemuxConfig {
    DemuxConfig {
        tail_packets: 20,
        ..DemuxConfig::default()
    }
}

/// Source that fails every pull after the first `ok_pulls`.
struct FailingSource {
    inner: MemorySource,
    ok_pulls: usize,
}

#[async_trait]
impl ByteSource for FailingSource {
    async fn pull_range(&mut self, offset: u64, length: usize) -> Result<Bytes> {
        if self.ok_pulls == 0 {
            return Err(DemuxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "pull failed",
            )));
        }
        self.ok_pulls -= 1;
        self.inner.pull_range(offset, length).await
    }

    async fn total_length(&mut self) -> Result<Option<u64>> {
        self.inner.total_length().await
    }
}

/// Source that never answers.
struct StalledSource;

#[async_trait]
impl ByteSource for StalledSource {
    async fn pull_range(&mut self, _offset: u64, _length: usize) -> Result<Bytes> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Bytes::new())
    }

    async fn total_length(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_duration_from_head_and_tail_pcr() {
    let data = stream(Duration::from_secs(2), Duration::from_secs(62));
    let mut source = MemorySource::new(data);
    let mut estimator = DurationEstimator::new(config());
    let duration = estimator.estimate(&mut source).await.unwrap();
    assert_eq!(duration, Duration::from_secs(60));
    assert!(estimator.is_clean());
}

#[tokio::test]
async fn test_duration_from_file() {
    let data = stream(Duration::from_secs(10), Duration::from_secs(25));
    let path = std::env::temp_dir().join(format!("tsdemux-duration-{}.ts", std::process::id()));
    tokio::fs::write(&path, &data).await.unwrap();

    let mut source = FileSource::open(&path).await.unwrap();
    assert_eq!(source.total_length().await.unwrap(), Some(data.len() as u64));
    let duration = DurationEstimator::new(config())
        .estimate(&mut source)
        .await
        .unwrap();
    assert_eq!(duration, Duration::from_secs(15));
    tokio::fs::remove_file(&path).await.unwrap();
}

#[tokio::test]
async fn test_io_failure_leaves_clean_state() {
    let data = stream(Duration::from_secs(2), Duration::from_secs(62));
    let mut estimator = DurationEstimator::new(config());

    // fails in the middle of the head PCR pass
    let mut failing = FailingSource {
        inner: MemorySource::new(data.clone()),
        ok_pulls: 1,
    };
    let err = estimator.estimate(&mut failing).await.unwrap_err();
    assert!(matches!(err, DemuxError::Io(_)), "{}", err);
    assert!(estimator.is_clean());

    // nothing of the failed run leaks into the next one
    let duration = estimator
        .estimate(&mut MemorySource::new(data))
        .await
        .unwrap();
    assert_eq!(duration, Duration::from_secs(60));
    assert!(estimator.is_clean());
}

#[tokio::test]
async fn test_unknown_length() {
    let data = stream(Duration::from_secs(2), Duration::from_secs(62));
    let mut source = MemorySource::new(data).without_length();
    let mut estimator = DurationEstimator::new(config());
    let err = estimator.estimate(&mut source).await.unwrap_err();
    assert!(matches!(err, DemuxError::UnknownLength), "{}", err);
    assert!(estimator.is_clean());
}

#[tokio::test]
async fn test_no_program() {
    let mut builder = TsBuilder::new();
    builder.null_packets(120).unwrap();
    let mut source = MemorySource::new(builder.finish());
    let err = DurationEstimator::new(config())
        .estimate(&mut source)
        .await
        .unwrap_err();
    match err {
        DemuxError::ProgramNotFound { scanned_bytes } => {
            assert_eq!(scanned_bytes, (120 * TS_PACKET_SIZE) as u64)
        }
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn test_no_pcr() {
    let mut builder = TsBuilder::new();
    builder.psi(&[&program()]).unwrap();
    builder.null_packets(30).unwrap();
    let mut source = MemorySource::new(builder.finish());
    let err = DurationEstimator::new(config())
        .estimate(&mut source)
        .await
        .unwrap_err();
    assert!(matches!(err, DemuxError::NoPcr { offset: 0 }), "{}", err);
}

#[tokio::test]
async fn test_tail_before_head_is_regression() {
    let data = stream(Duration::from_secs(100), Duration::from_secs(50));
    let err = DurationEstimator::new(config())
        .estimate(&mut MemorySource::new(data))
        .await
        .unwrap_err();
    assert!(matches!(err, DemuxError::PcrRegression { .. }), "{}", err);
}

#[tokio::test]
async fn test_background_scan() {
    let data = stream(Duration::from_secs(2), Duration::from_secs(62));
    let scan = spawn_duration_scan(config(), MemorySource::new(data));
    assert_eq!(scan.wait().await.unwrap(), Duration::from_secs(60));
}

#[tokio::test]
async fn test_background_scan_timeout() {
    let config = config().with_scan_timeout(Duration::from_millis(20));
    let scan = spawn_duration_scan(config, StalledSource);
    let err = scan.wait().await.unwrap_err();
    assert!(matches!(err, DemuxError::Timeout(_)), "{}", err);
}

#[tokio::test]
async fn test_background_scan_cancel() {
    let mut scan = spawn_duration_scan(config(), StalledSource);
    assert!(scan.try_result().is_none());
    scan.cancel();
    let err = scan.wait().await.unwrap_err();
    assert!(matches!(err, DemuxError::Cancelled), "{}", err);
}
