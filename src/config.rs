use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Config files probed by [`DemuxConfig::load`], in order.
pub const CONFIG_PATHS: [&str; 2] = ["./tsdemux.toml", "./tsdemux_config.toml"];

/// Demuxer and duration-scan settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxConfig {
    /// Program to demux. `None` picks the first program that starts.
    pub program_number: Option<u16>,
    /// Emit a statistics event for every PCR/OPCR/PTS/DTS.
    pub emit_stats: bool,
    /// Packets pulled per window while looking for PAT/PMT.
    pub header_scan_window: usize,
    /// Upper bound of header windows before giving up on finding a program.
    pub max_header_windows: usize,
    /// Packets pulled per window while looking for PCRs.
    pub pcr_window: usize,
    /// Number of PCR windows scanned per pass.
    pub pcr_windows: usize,
    /// PCR samples collected per pass.
    pub pcr_samples: usize,
    /// Packets from the end of the stream where the final pass starts.
    pub tail_packets: usize,
    /// Largest forward PCR step accepted between two samples.
    pub max_pcr_jump: Duration,
    /// Ignore a sample equal to the previous one.
    pub reject_duplicate_pcr: bool,
    /// Abort the duration scan after this long.
    pub scan_timeout: Option<Duration>,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            program_number: None,
            emit_stats: false,
            header_scan_window: 50,
            max_header_windows: 400,
            pcr_window: 500,
            pcr_windows: 20,
            pcr_samples: 10,
            tail_packets: 4000,
            max_pcr_jump: Duration::from_secs(10 * 60),
            reject_duplicate_pcr: true,
            scan_timeout: None,
        }
    }
}

impl DemuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from defaults, then environment variables, then the
    /// first readable file in [`CONFIG_PATHS`].
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env();
        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_file_content(&content);
                    break;
                }
            }
        }
        config
    }

    pub fn with_program_number(mut self, program_number: u16) -> Self {
        self.program_number = Some(program_number);
        self
    }

    pub fn with_emit_stats(mut self, emit_stats: bool) -> Self {
        self.emit_stats = emit_stats;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("TSDEMUX_PROGRAM_NUMBER") {
            self.set("program_number", &value);
        }
        if let Ok(value) = env::var("TSDEMUX_EMIT_STATS") {
            self.set("emit_stats", &value);
        }
        if let Ok(value) = env::var("TSDEMUX_SCAN_TIMEOUT_MS") {
            self.set("scan_timeout_ms", &value);
        }
    }

    /// Applies `key = value` lines. Unknown keys and unparsable values are
    /// ignored.
    pub fn apply_file_content(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.set(key.trim(), value);
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "program_number" => {
                // -1 keeps the "any program" behaviour
                self.program_number = match value.parse::<i32>() {
                    Ok(n) if (0..=u16::MAX as i32).contains(&n) => Some(n as u16),
                    Ok(_) => None,
                    Err(_) => self.program_number,
                };
            }
            "emit_stats" => {
                if let Ok(v) = value.parse::<bool>() {
                    self.emit_stats = v;
                }
            }
            "header_scan_window" => parse_into(value, &mut self.header_scan_window),
            "max_header_windows" => parse_into(value, &mut self.max_header_windows),
            "pcr_window" => parse_into(value, &mut self.pcr_window),
            "pcr_windows" => parse_into(value, &mut self.pcr_windows),
            "pcr_samples" => parse_into(value, &mut self.pcr_samples),
            "tail_packets" => parse_into(value, &mut self.tail_packets),
            "max_pcr_jump_secs" => {
                if let Ok(secs) = value.parse::<u64>() {
                    self.max_pcr_jump = Duration::from_secs(secs);
                }
            }
            "reject_duplicate_pcr" => {
                if let Ok(v) = value.parse::<bool>() {
                    self.reject_duplicate_pcr = v;
                }
            }
            "scan_timeout_ms" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.scan_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                }
            }
            _ => log::debug!("ignoring unknown config key {}", key),
        }
    }
}

fn parse_into(value: &str, target: &mut usize) {
    match value.parse::<usize>() {
        Ok(v) if v > 0 => *target = v,
        _ => log::warn!("ignoring invalid config value {:?}", value),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# tsdemux configuration
# Program to demux, -1 for the first program found
program_number = -1

# Emit statistics for every PCR/OPCR/PTS/DTS
emit_stats = false

# Duration scan
pcr_samples = 10
max_pcr_jump_secs = 600
reject_duplicate_pcr = true
scan_timeout_ms = 0
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DemuxConfig::default();
        assert_eq!(config.program_number, None);
        assert_eq!(config.tail_packets, 4000);
        assert_eq!(config.pcr_samples, 10);
        assert_eq!(config.max_pcr_jump, Duration::from_secs(600));
        assert!(config.reject_duplicate_pcr);
    }

    #[test]
    fn test_file_content() {
        let mut config = DemuxConfig::default();
        config.apply_file_content(
            "# comment\nprogram_number = 7\nemit_stats = true\nscan_timeout_ms = \"1500\"\nbogus = 1\npcr_window = 0\n",
        );
        assert_eq!(config.program_number, Some(7));
        assert!(config.emit_stats);
        assert_eq!(config.scan_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.pcr_window, 500);

        config.apply_file_content("program_number = -1");
        assert_eq!(config.program_number, None);
    }

    #[test]
    fn test_template_roundtrip() {
        let dir = std::env::temp_dir().join(format!("tsdemux-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tsdemux.toml");
        let _ = std::fs::remove_file(&path);
        create_default_config_template(&path).unwrap();

        let mut config = DemuxConfig::default().with_program_number(3);
        config.apply_file_content(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(config.program_number, None);
        assert_eq!(config.scan_timeout, None);
        std::fs::remove_file(&path).unwrap();
    }
}
