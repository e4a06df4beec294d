/// CRC32 for PSI sections (ITU-T H.222.0 / ISO/IEC 13818-1 annex A).
/// Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final XOR.
const CRC32_MPEG2: u32 = 0x04C1_1DB7;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = build_table();

/// MPEG-2 CRC32 calculator used for PAT/PMT validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    pub fn new() -> Self {
        Self
    }

    /// CRC32 of `data`.
    ///
    /// ```
    /// use tsdemux::utils::Crc32Mpeg2;
    ///
    /// assert_eq!(Crc32Mpeg2::new().calculate(&[0x01, 0x01]), 0xD66FB816);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        data.iter().fold(0xffff_ffff, |crc, &byte| {
            let index = ((crc >> 24) ^ byte as u32) & 0xff;
            (crc << 8) ^ TABLE[index as usize]
        })
    }

    /// Whether a section, including its trailing 4 CRC bytes, is intact.
    /// Running the CRC over the whole section yields zero when it is.
    pub fn verify(&self, section: &[u8]) -> bool {
        section.len() >= 4 && self.calculate(section) == 0
    }
}
