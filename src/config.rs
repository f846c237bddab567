use serde::{Deserialize, Serialize};
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub sink: SinkConfig,
    pub fingerprint: FingerprintConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Interfaces to sniff. Empty means every device that has an address.
    pub interfaces: Vec<String>,
    pub snaplen: u32,
    pub promiscuous: bool,
    pub filter: String,
    /// Traffic class: a frame is kept when either TCP port is listed here.
    pub ports: Vec<u16>,
    pub read_timeout_ms: u64,
    pub max_packets: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub text_log: String,
    pub trace_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    pub hex_run_threshold: usize,
    pub signatures: Vec<SignatureSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSeed {
    pub name: String,
    pub pattern: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                interfaces: vec![],
                snaplen: 65536,
                promiscuous: true,
                filter: "tcp port 80".to_string(),
                ports: vec![80],
                read_timeout_ms: 1000,
                max_packets: None,
            },
            sink: SinkConfig {
                text_log: "network_traffic.log".to_string(),
                trace_file: "captured_traffic.pcap".to_string(),
            },
            fingerprint: FingerprintConfig {
                hex_run_threshold: 10,
                signatures: default_signatures(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

fn default_signatures() -> Vec<SignatureSeed> {
    vec![
        SignatureSeed {
            name: "Google Ads".to_string(),
            pattern: r"googleads\.g\.doubleclick\.net/pagead/ads\?client=([^&#]*)".to_string(),
            fingerprint: "a4837e40726b33f6a638d293cdfb269743bed640e97c14c725593a8c0f31ad6c".to_string(),
        },
        SignatureSeed {
            name: "Google Analytics".to_string(),
            pattern: r"www\.google-analytics\.com/(analytics|ga)\.js".to_string(),
            fingerprint: "9ee414b09c47519632cfe12728ab767bc07739f21680718e75d0edca1131f827".to_string(),
        },
        SignatureSeed {
            name: "Google Tag Manager".to_string(),
            pattern: r"www\.googletagmanager\.com/(gtm\.js|gtag/js)\?id=([^&#]*)".to_string(),
            fingerprint: "6fafc56f9855a5f2c7bc3c722ff122f7d8079719e48e83b7b59b7c0ccc844f95".to_string(),
        },
    ]
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Loads `path` when it exists, otherwise the built-in defaults.
    ///
    /// Runs before logging is set up, so it does not log.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}
