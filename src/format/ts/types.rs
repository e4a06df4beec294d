use crate::error::Result;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_NULL: u16 = 0x1fff;
/// Number of distinct 13-bit PIDs
pub const PID_COUNT: usize = 0x2000;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Stream IDs without the optional PES header (ISO/IEC 13818-1 table 2-21)
pub const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xbc;
pub const STREAM_ID_PADDING: u8 = 0xbe;
pub const STREAM_ID_PRIVATE_2: u8 = 0xbf;
pub const STREAM_ID_ECM: u8 = 0xf0;
pub const STREAM_ID_EMM: u8 = 0xf1;
pub const STREAM_ID_DSMCC: u8 = 0xf2;
pub const STREAM_ID_H222_1_E: u8 = 0xf8;
pub const STREAM_ID_DIRECTORY: u8 = 0xff;

// Descriptor tags
pub const DESC_REGISTRATION: u8 = 0x05;
pub const DESC_DVB_TELETEXT: u8 = 0x56;
pub const DESC_DVB_SUBTITLING: u8 = 0x59;
pub const DESC_DVB_AC3: u8 = 0x6a;
pub const DESC_DVB_ENHANCED_AC3: u8 = 0x7a;

// Registration format identifiers
pub const DRF_ID_HDMV: u32 = 0x4844_4d56;
pub const DRF_ID_VC1: u32 = 0x5643_2d31;
pub const DRF_ID_DIRAC: u32 = 0x6472_6163;

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

/// Adaptation field flag bits
pub const AFC_PCR_FLAG: u8 = 0x10;
pub const AFC_OPCR_FLAG: u8 = 0x08;

/// Elementary stream types carried in a PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    VideoMpeg1,
    VideoMpeg2,
    AudioMpeg1,
    AudioMpeg2,
    PrivateSections,
    PrivateData,
    Mheg,
    Dsmcc,
    DsmccA,
    DsmccB,
    DsmccC,
    DsmccD,
    AudioAac,
    VideoMpeg4,
    VideoH264,
    BdAudioLpcm,
    BdAudioAc3,
    BdAudioEac3,
    PsAudioDts,
    PsAudioLpcm,
    BdPgsSubpicture,
    HdvAuxA,
    HdvAuxV,
    VideoDirac,
    PrivateEa,
    /// 0xff, DVD sub-picture as carried by program streams
    PsDvdSubpicture,
    Other(u8),
}

impl StreamType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => StreamType::VideoMpeg1,
            0x02 => StreamType::VideoMpeg2,
            0x03 => StreamType::AudioMpeg1,
            0x04 => StreamType::AudioMpeg2,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivateData,
            0x07 => StreamType::Mheg,
            0x08 => StreamType::Dsmcc,
            0x0a => StreamType::DsmccA,
            0x0b => StreamType::DsmccB,
            0x0c => StreamType::DsmccC,
            0x0d => StreamType::DsmccD,
            0x0f => StreamType::AudioAac,
            0x10 => StreamType::VideoMpeg4,
            0x1b => StreamType::VideoH264,
            0x80 => StreamType::BdAudioLpcm,
            0x81 => StreamType::BdAudioAc3,
            0x87 => StreamType::BdAudioEac3,
            0x8a => StreamType::PsAudioDts,
            0x8b => StreamType::PsAudioLpcm,
            0x90 => StreamType::BdPgsSubpicture,
            0xa0 => StreamType::HdvAuxA,
            0xa1 => StreamType::HdvAuxV,
            0xd1 => StreamType::VideoDirac,
            0xea => StreamType::PrivateEa,
            0xff => StreamType::PsDvdSubpicture,
            other => StreamType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            StreamType::VideoMpeg1 => 0x01,
            StreamType::VideoMpeg2 => 0x02,
            StreamType::AudioMpeg1 => 0x03,
            StreamType::AudioMpeg2 => 0x04,
            StreamType::PrivateSections => 0x05,
            StreamType::PrivateData => 0x06,
            StreamType::Mheg => 0x07,
            StreamType::Dsmcc => 0x08,
            StreamType::DsmccA => 0x0a,
            StreamType::DsmccB => 0x0b,
            StreamType::DsmccC => 0x0c,
            StreamType::DsmccD => 0x0d,
            StreamType::AudioAac => 0x0f,
            StreamType::VideoMpeg4 => 0x10,
            StreamType::VideoH264 => 0x1b,
            StreamType::BdAudioLpcm => 0x80,
            StreamType::BdAudioAc3 => 0x81,
            StreamType::BdAudioEac3 => 0x87,
            StreamType::PsAudioDts => 0x8a,
            StreamType::PsAudioLpcm => 0x8b,
            StreamType::BdPgsSubpicture => 0x90,
            StreamType::HdvAuxA => 0xa0,
            StreamType::HdvAuxV => 0xa1,
            StreamType::VideoDirac => 0xd1,
            StreamType::PrivateEa => 0xea,
            StreamType::PsDvdSubpicture => 0xff,
            StreamType::Other(other) => other,
        }
    }

    /// Whether the stream carries PSI-style sections rather than PES.
    pub fn carries_sections(self) -> bool {
        matches!(
            self,
            StreamType::PrivateSections
                | StreamType::Mheg
                | StreamType::Dsmcc
                | StreamType::DsmccA
                | StreamType::DsmccB
                | StreamType::DsmccC
                | StreamType::DsmccD
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Descriptor {
    pub fn new(tag: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            data: data.into(),
        }
    }

    pub fn registration(format_identifier: u32) -> Self {
        Self::new(DESC_REGISTRATION, format_identifier.to_be_bytes().to_vec())
    }

    /// Format identifier of a registration descriptor.
    pub fn format_identifier(&self) -> Option<u32> {
        if self.tag != DESC_REGISTRATION || self.data.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]))
    }
}

#[derive(Debug)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(TS_SYNC_BYTE);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);

        Ok(())
    }
}

/// Combines the 33-bit base and 9-bit extension of a PCR into 27 MHz ticks.
pub fn pcr_ticks(base: u64, ext: u16) -> u64 {
    base * 300 + (ext as u64 % 300)
}

/// Decodes the six PCR/OPCR bytes of an adaptation field into 27 MHz ticks.
pub fn read_pcr(data: &[u8]) -> Option<u64> {
    if data.len() < 6 {
        return None;
    }
    let base = ((data[0] as u64) << 25)
        | ((data[1] as u64) << 17)
        | ((data[2] as u64) << 9)
        | ((data[3] as u64) << 1)
        | ((data[4] & 0x80) as u64 >> 7);
    let ext = (((data[4] & 0x01) as u16) << 8) | data[5] as u16;
    Some(pcr_ticks(base, ext))
}

/// Encodes 27 MHz ticks into the six PCR bytes of an adaptation field.
pub fn write_pcr(buf: &mut BytesMut, ticks: u64) {
    let base = (ticks / 300) & 0x1_ffff_ffff;
    let ext = (ticks % 300) as u16;
    buf.put_u32((base >> 1) as u32);
    buf.put_u8((((base & 1) as u8) << 7) | 0x7e | ((ext >> 8) as u8 & 0x01));
    buf.put_u8(ext as u8);
}

// Time conversion utilities
pub fn pcr_to_time(ticks: u64) -> Duration {
    Duration::from_nanos(((ticks as u128 * 1000) / 27) as u64)
}

pub fn time_to_pcr(time: Duration) -> u64 {
    ((time.as_nanos() * 27) / 1000) as u64
}

pub fn pts_to_time(pts: u64) -> Duration {
    Duration::from_nanos(((pts as u128 * 1_000_000_000) / PTS_HZ as u128) as u64)
}

pub fn time_to_pts(time: Duration) -> u64 {
    ((time.as_nanos() * PTS_HZ as u128) / 1_000_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_pcr_conversion() {
        assert_eq!(pcr_to_time(27_000_000), Duration::from_secs(1));
        assert_eq!(pcr_to_time(54_000_000), Duration::from_secs(2));
        assert_eq!(pcr_ticks(1, 299), 599);
        // extension values above 299 are folded back
        assert_eq!(pcr_ticks(1, 300), 300);
    }

    #[test]
    fn test_pts_conversion() {
        assert_eq!(pts_to_time(90_000), Duration::from_secs(1));
        assert_eq!(time_to_pts(Duration::from_millis(40)), 3600);
    }

    #[test]
    fn test_stream_type_mapping() {
        for value in 0..=255u8 {
            assert_eq!(StreamType::from_u8(value).as_u8(), value);
        }
        assert!(StreamType::Dsmcc.carries_sections());
        assert!(!StreamType::VideoH264.carries_sections());
    }

    #[test]
    fn test_registration_descriptor() {
        let desc = Descriptor::registration(DRF_ID_HDMV);
        assert_eq!(desc.data, b"HDMV".to_vec());
        assert_eq!(desc.format_identifier(), Some(DRF_ID_HDMV));
        assert_eq!(Descriptor::new(DESC_DVB_AC3, vec![1]).format_identifier(), None);
    }

    #[test]
    fn test_ts_header_write() {
        let header = TSHeader {
            payload_unit_start: true,
            pid: 0x1234 & 0x1fff,
            adaptation_field_exists: true,
            continuity_counter: 5,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x47, 0x52, 0x34, 0x35]);
    }

    #[quickcheck]
    fn prop_pcr_bytes_roundtrip(ticks: u64) -> bool {
        let ticks = ticks % ((1u64 << 33) * 300);
        let mut buf = BytesMut::new();
        write_pcr(&mut buf, ticks);
        read_pcr(&buf) == Some(ticks)
    }
}
