use super::types::*;
use crate::error::{DemuxError, Result};
use crate::utils::BitReader;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

/// Fixed part of a PES header carrying the optional fields
pub const PES_FIXED_HEADER_SIZE: usize = 9;

const PTS_SIZE: usize = 5;
const ESCR_SIZE: usize = 6;
const ES_RATE_SIZE: usize = 3;
const DSM_TRICK_MODE_SIZE: usize = 1;

/// Packetized Elementary Stream (PES) header structure
///
/// Contains fields defined in the MPEG-TS specification for PES headers,
/// including timing information and various control flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Length of the PES packet after this field, 0 when unbounded
    pub packet_length: u16,
    /// Control field for scrambling mode
    pub scrambling_control: u8,
    /// Priority flag for the packet
    pub priority: bool,
    /// Data alignment indicator
    pub data_alignment: bool,
    /// Copyright indicator
    pub copyright: bool,
    /// Original/copy indicator
    pub original: bool,
    /// ESCR (Extended System Clock Reference) flag
    pub escr_flag: bool,
    /// Elementary Stream rate flag
    pub es_rate_flag: bool,
    /// DSM trick mode flag
    pub dsm_trick_mode_flag: bool,
    /// Additional copy info flag
    pub additional_copy_info_flag: bool,
    /// CRC flag
    pub crc_flag: bool,
    /// Extension flag
    pub extension_flag: bool,
    /// Length of the header data following this field
    pub header_data_length: u8,
    /// Presentation Time Stamp (33 bits)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits)
    pub dts: Option<u64>,
    /// Stuffing bytes appended by [`PESHeader::write_to`]
    pub stuffing: u8,
}

impl Default for PESHeader {
    fn default() -> Self {
        Self {
            stream_id: 0,
            packet_length: 0,
            scrambling_control: 0,
            priority: false,
            data_alignment: false,
            copyright: false,
            original: false,
            escr_flag: false,
            es_rate_flag: false,
            dsm_trick_mode_flag: false,
            additional_copy_info_flag: false,
            crc_flag: false,
            extension_flag: false,
            header_data_length: 0,
            pts: None,
            dts: None,
            stuffing: 0,
        }
    }
}

/// Outcome of parsing the start of a PES packet.
#[derive(Debug, Clone, PartialEq)]
pub enum PesParse {
    /// Header parsed; `header_size` bytes precede the payload.
    Complete { header: PESHeader, header_size: usize },
    /// More bytes are needed to finish the header.
    Incomplete,
    /// The bytes cannot be the start of a PES packet.
    Invalid(&'static str),
}

/// Whether PES packets with this stream id carry the optional header.
pub fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        STREAM_ID_PROGRAM_STREAM_MAP
            | STREAM_ID_PADDING
            | STREAM_ID_PRIVATE_2
            | STREAM_ID_ECM
            | STREAM_ID_EMM
            | STREAM_ID_DSMCC
            | STREAM_ID_H222_1_E
            | STREAM_ID_DIRECTORY
    )
}

impl PESHeader {
    /// Creates a new PES header with a specific stream ID.
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            ..Default::default()
        }
    }

    /// Sets the Presentation Time Stamp (PTS) for the PES header.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(time_to_pts(pts));
        self
    }

    /// Sets the Decoding Time Stamp (DTS) for the PES header.
    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.dts = Some(time_to_pts(dts));
        self
    }

    pub fn with_stuffing(mut self, stuffing: u8) -> Self {
        self.stuffing = stuffing;
        self
    }

    pub fn pts_time(&self) -> Option<Duration> {
        self.pts.map(pts_to_time)
    }

    pub fn dts_time(&self) -> Option<Duration> {
        self.dts.map(pts_to_time)
    }

    fn pts_dts_flags(&self) -> u8 {
        match (self.pts.is_some(), self.dts.is_some()) {
            (true, true) => 0b11,
            (true, false) => 0b10,
            _ => 0b00,
        }
    }

    /// Bytes of optional fields announced by the flags.
    fn optional_fields_size(pts_dts_flags: u8, escr: bool, es_rate: bool, dsm: bool) -> usize {
        let mut size = match pts_dts_flags {
            0b10 => PTS_SIZE,
            0b11 => 2 * PTS_SIZE,
            _ => 0,
        };
        if escr {
            size += ESCR_SIZE;
        }
        if es_rate {
            size += ES_RATE_SIZE;
        }
        if dsm {
            size += DSM_TRICK_MODE_SIZE;
        }
        size
    }

    /// Parses a PES header from the start of `data`.
    ///
    /// ESCR, ES rate and DSM trick mode are skipped, not interpreted.
    pub fn parse(data: &[u8]) -> PesParse {
        let prefix_len = data.len().min(PES_START_CODE.len());
        if data[..prefix_len] != PES_START_CODE[..prefix_len] {
            return PesParse::Invalid("bad packet start code prefix");
        }
        if data.len() < 6 {
            return PesParse::Incomplete;
        }

        let mut header = PESHeader::new(data[3]);
        header.packet_length = u16::from_be_bytes([data[4], data[5]]);
        if !has_optional_header(header.stream_id) {
            return PesParse::Complete {
                header,
                header_size: 6,
            };
        }

        if data.len() > 6 && data[6] & 0xc0 != 0x80 {
            return PesParse::Invalid("missing '10' marker bits");
        }
        if data.len() < PES_FIXED_HEADER_SIZE {
            return PesParse::Incomplete;
        }

        let p1 = data[6];
        let p2 = data[7];
        header.scrambling_control = (p1 >> 4) & 0x03;
        header.priority = p1 & 0x08 != 0;
        header.data_alignment = p1 & 0x04 != 0;
        header.copyright = p1 & 0x02 != 0;
        header.original = p1 & 0x01 != 0;
        let pts_dts_flags = p2 >> 6;
        header.escr_flag = p2 & 0x20 != 0;
        header.es_rate_flag = p2 & 0x10 != 0;
        header.dsm_trick_mode_flag = p2 & 0x08 != 0;
        header.additional_copy_info_flag = p2 & 0x04 != 0;
        header.crc_flag = p2 & 0x02 != 0;
        header.extension_flag = p2 & 0x01 != 0;
        header.header_data_length = data[8];
        let header_data_length = header.header_data_length as usize;

        if pts_dts_flags == 0b01 {
            return PesParse::Invalid("DTS without PTS");
        }
        if header.packet_length != 0 && 3 + header_data_length > header.packet_length as usize {
            return PesParse::Invalid("header data length exceeds PES packet length");
        }
        let needed = Self::optional_fields_size(
            pts_dts_flags,
            header.escr_flag,
            header.es_rate_flag,
            header.dsm_trick_mode_flag,
        );
        if needed > header_data_length {
            return PesParse::Invalid("optional fields exceed header data length");
        }

        let header_size = PES_FIXED_HEADER_SIZE + header_data_length;
        if data.len() < header_size {
            return PesParse::Incomplete;
        }

        let mut pos = PES_FIXED_HEADER_SIZE;
        if pts_dts_flags & 0b10 != 0 {
            match read_timestamp(&data[pos..pos + PTS_SIZE]) {
                Ok(pts) => header.pts = Some(pts),
                Err(_) => return PesParse::Invalid("bad PTS marker bits"),
            }
            pos += PTS_SIZE;
        }
        if pts_dts_flags & 0b01 != 0 {
            match read_timestamp(&data[pos..pos + PTS_SIZE]) {
                Ok(dts) => header.dts = Some(dts),
                Err(_) => return PesParse::Invalid("bad DTS marker bits"),
            }
        }

        PesParse::Complete {
            header,
            header_size,
        }
    }

    /// Writes the PES header to a BytesMut buffer.
    ///
    /// `header_data_length` is derived from the optional fields and
    /// stuffing. Announced ESCR/ES rate/DSM trick mode fields are written
    /// as zeroes.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        if self.dts.is_some() && self.pts.is_none() {
            return Err(DemuxError::InvalidData("DTS without PTS".into()));
        }

        buf.put_slice(&PES_START_CODE);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);

        if !has_optional_header(self.stream_id) {
            return Ok(());
        }

        let mut flags = 0x80u8;
        flags |= (self.scrambling_control & 0x03) << 4;
        if self.priority {
            flags |= 0x08;
        }
        if self.data_alignment {
            flags |= 0x04;
        }
        if self.copyright {
            flags |= 0x02;
        }
        if self.original {
            flags |= 0x01;
        }
        buf.put_u8(flags);

        let pts_dts_flags = self.pts_dts_flags();
        let mut flags2 = pts_dts_flags << 6;
        if self.escr_flag {
            flags2 |= 0x20;
        }
        if self.es_rate_flag {
            flags2 |= 0x10;
        }
        if self.dsm_trick_mode_flag {
            flags2 |= 0x08;
        }
        if self.additional_copy_info_flag {
            flags2 |= 0x04;
        }
        if self.crc_flag {
            flags2 |= 0x02;
        }
        if self.extension_flag {
            flags2 |= 0x01;
        }
        buf.put_u8(flags2);

        let fields = Self::optional_fields_size(
            pts_dts_flags,
            self.escr_flag,
            self.es_rate_flag,
            self.dsm_trick_mode_flag,
        );
        let header_data_length = fields + self.stuffing as usize;
        if header_data_length > u8::MAX as usize {
            return Err(DemuxError::InvalidData("PES header data too long".into()));
        }
        buf.put_u8(header_data_length as u8);

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
        }
        if let Some(dts) = self.dts {
            write_timestamp(buf, 0x10, dts);
        }
        let zeroed = fields - PTS_SIZE * pts_dts_flags.count_ones() as usize;
        buf.put_bytes(0, zeroed);
        buf.put_bytes(0xff, self.stuffing as usize);

        Ok(())
    }
}

/// Represents a complete Packetized Elementary Stream (PES) packet.
#[derive(Debug)]
pub struct PESPacket {
    /// PES header containing metadata and flags
    pub header: PESHeader,
    /// Actual payload data of the PES packet
    pub payload: Vec<u8>,
}

impl PESPacket {
    pub fn new(stream_id: u8, payload: Vec<u8>) -> Self {
        let header = PESHeader::new(stream_id);
        Self { header, payload }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.header = self.header.with_pts(pts);
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.header = self.header.with_dts(dts);
        self
    }

    /// Writes the complete PES packet, filling in `packet_length` when it
    /// fits in 16 bits and leaving it unbounded otherwise.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let mut header = self.header.clone();
        let after_length = self.len() - 6;
        header.packet_length = u16::try_from(after_length).unwrap_or(0);
        header.write_to(buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Size in bytes of the complete PES packet.
    pub fn len(&self) -> usize {
        if !has_optional_header(self.header.stream_id) {
            return 6 + self.payload.len();
        }
        PES_FIXED_HEADER_SIZE
            + PESHeader::optional_fields_size(
                self.header.pts_dts_flags(),
                self.header.escr_flag,
                self.header.es_rate_flag,
                self.header.dsm_trick_mode_flag,
            )
            + self.header.stuffing as usize
            + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reads a 33-bit timestamp laid out as 4-bit prefix, 3 bits, marker,
/// 15 bits, marker, 15 bits, marker.
pub fn read_timestamp(data: &[u8]) -> Result<u64> {
    let mut reader = BitReader::new(data);
    reader.skip_bits(4)?;
    let high = reader.read_bits(3)? as u64;
    expect_marker(&mut reader)?;
    let mid = reader.read_bits(15)? as u64;
    expect_marker(&mut reader)?;
    let low = reader.read_bits(15)? as u64;
    expect_marker(&mut reader)?;
    Ok((high << 30) | (mid << 15) | low)
}

fn expect_marker(reader: &mut BitReader<'_>) -> Result<()> {
    if reader.read_bit()? {
        Ok(())
    } else {
        Err(DemuxError::Parser("timestamp marker bit not set".into()))
    }
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & 0x1_ffff_ffff;
    buf.put_u8(marker | ((ts >> 29) & 0x0e) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xfffe) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xfffe) | 0x01) as u16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn header_bytes(header: PESHeader) -> Vec<u8> {
        let mut buf = BytesMut::new();
        header.write_to(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_parse_pts_dts() {
        let header = PESHeader::new(0xe0)
            .with_pts(Duration::from_secs(2))
            .with_dts(Duration::from_secs(1));
        let data = header_bytes(header);
        assert_eq!(data.len(), 19);

        match PESHeader::parse(&data) {
            PesParse::Complete {
                header,
                header_size,
            } => {
                assert_eq!(header_size, 19);
                assert_eq!(header.stream_id, 0xe0);
                assert_eq!(header.pts, Some(180_000));
                assert_eq!(header.dts, Some(90_000));
                assert_eq!(header.pts_time(), Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_skip_escr_es_rate_dsm() {
        let mut header = PESHeader::new(0xc0).with_pts(Duration::from_millis(500));
        header.escr_flag = true;
        header.es_rate_flag = true;
        header.dsm_trick_mode_flag = true;
        let mut data = header_bytes(header.with_stuffing(2));
        data.extend_from_slice(&[0xde, 0xad]);

        match PESHeader::parse(&data) {
            PesParse::Complete {
                header,
                header_size,
            } => {
                assert_eq!(header.header_data_length as usize, 5 + 6 + 3 + 1 + 2);
                assert_eq!(header_size, 9 + 17);
                assert_eq!(&data[header_size..], &[0xde, 0xad]);
                assert_eq!(header.pts, Some(45_000));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_header() {
        let data = header_bytes(PESHeader::new(0xe0).with_pts(Duration::from_secs(1)));
        for len in 0..data.len() {
            assert_eq!(PESHeader::parse(&data[..len]), PesParse::Incomplete, "len {}", len);
        }
    }

    #[test]
    fn test_invalid_headers() {
        assert!(matches!(
            PESHeader::parse(&[0x00, 0x00, 0x02, 0xe0, 0, 0, 0x80, 0, 0]),
            PesParse::Invalid(_)
        ));
        assert!(matches!(PESHeader::parse(&[0x01]), PesParse::Invalid(_)));
        // marker bits '01' instead of '10'
        assert!(matches!(
            PESHeader::parse(&[0x00, 0x00, 0x01, 0xe0, 0, 0, 0x40, 0, 0]),
            PesParse::Invalid(_)
        ));
        // PTS announced but header data too short for it
        assert!(matches!(
            PESHeader::parse(&[0x00, 0x00, 0x01, 0xe0, 0, 0, 0x80, 0x80, 2, 0x21, 0x00]),
            PesParse::Invalid(_)
        ));
        // header data longer than the whole PES packet
        assert!(matches!(
            PESHeader::parse(&[0x00, 0x00, 0x01, 0xe0, 0, 4, 0x80, 0x00, 10]),
            PesParse::Invalid(_)
        ));
    }

    #[test]
    fn test_bad_pts_marker() {
        let mut data = header_bytes(PESHeader::new(0xe0).with_pts(Duration::from_secs(1)));
        data[13] &= 0xfe;
        assert_eq!(PESHeader::parse(&data), PesParse::Invalid("bad PTS marker bits"));
    }

    #[test]
    fn test_private_stream_2_has_no_optional_header() {
        let data = [0x00, 0x00, 0x01, 0xbf, 0x00, 0x02, 0xaa, 0xbb];
        match PESHeader::parse(&data) {
            PesParse::Complete {
                header,
                header_size,
            } => {
                assert_eq!(header_size, 6);
                assert_eq!(header.packet_length, 2);
                assert_eq!(header.pts, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pes_packet_writing() {
        let mut buf = BytesMut::new();
        let packet = PESPacket::new(0xe0, vec![0; 10]).with_pts(Duration::from_secs(1));
        packet.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), packet.len());
        assert_eq!(&buf[0..3], &[0x00, 0x00, 0x01]);
        assert_eq!(buf[3], 0xe0);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]) as usize, packet.len() - 6);
    }

    #[quickcheck]
    fn prop_timestamp_roundtrip(ts: u64) -> bool {
        let ts = ts & 0x1_ffff_ffff;
        let mut buf = BytesMut::new();
        write_timestamp(&mut buf, 0x20, ts);
        read_timestamp(&buf).ok() == Some(ts)
    }
}
