use std::io::Write;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use pcap::{Active, Capture, Device, Linktype};
use serde::{Deserialize, Serialize};

use super::flow::{Classification, FlowClassifier, RawFrame};
use super::http;
use super::sink::{CaptureSink, TraceOutput};
use crate::config::CaptureConfig;
use crate::fingerprint::SignatureRegistry;
use crate::utils::timestamp_from_parts;
use crate::{Result, SniffError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
}

/// Live capture handle on one interface, read as a lazy frame sequence.
///
/// The sequence ends when the device goes away, the handle reports an
/// error, or the shared shutdown flag is raised. It never restarts.
pub struct PacketSource {
    interface: String,
    capture: Capture<Active>,
    shutdown: Arc<AtomicBool>,
    finished: bool,
}

impl PacketSource {
    pub fn open(interface: &str, config: &CaptureConfig, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let open_error = |e: pcap::Error| SniffError::CaptureOpen {
            interface: interface.to_string(),
            reason: e.to_string(),
        };

        let mut capture = Capture::from_device(interface)
            .map_err(open_error)?
            .snaplen(i32::try_from(config.snaplen).unwrap_or(i32::MAX))
            .promisc(config.promiscuous)
            .timeout(i32::try_from(config.read_timeout_ms).unwrap_or(i32::MAX))
            .open()
            .map_err(open_error)?;

        capture
            .filter(&config.filter, true)
            .map_err(|e| SniffError::CaptureOpen {
                interface: interface.to_string(),
                reason: format!("invalid filter {:?}: {}", config.filter, e),
            })?;
        info!("Filter set on device {}: {}", interface, config.filter);

        let linktype = capture.get_datalink();
        if linktype != Linktype::ETHERNET {
            warn!(
                "Device {} uses link type {:?}; only Ethernet frames are decoded",
                interface, linktype
            );
        }

        Ok(Self {
            interface: interface.to_string(),
            capture,
            shutdown,
            finished: false,
        })
    }

    pub fn list_interfaces() -> Result<Vec<InterfaceInfo>> {
        let devices = Device::list().map_err(|e| SniffError::CaptureOpen {
            interface: "*".to_string(),
            reason: e.to_string(),
        })?;

        Ok(devices
            .into_iter()
            .map(|device| InterfaceInfo {
                name: device.name,
                description: device.desc,
                addresses: device.addresses.iter().map(|a| a.addr).collect(),
            })
            .collect())
    }
}

impl Iterator for PacketSource {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        while !self.finished {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Shutdown requested, closing {}", self.interface);
                self.finished = true;
                break;
            }

            match self.capture.next_packet() {
                Ok(packet) => {
                    return Some(RawFrame {
                        timestamp: timestamp_from_parts(
                            packet.header.ts.tv_sec as i64,
                            packet.header.ts.tv_usec as u32,
                        ),
                        original_len: packet.header.len,
                        data: packet.data.to_vec(),
                    });
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => {
                    info!("No more packets on {}", self.interface);
                    self.finished = true;
                }
                Err(e) => {
                    warn!("Capture on {} ended: {}", self.interface, e);
                    self.finished = true;
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub received: usize,
    pub accepted: usize,
    pub out_of_scope: usize,
    pub malformed: usize,
    pub written: usize,
    pub lost: usize,
    pub identified: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub interface: String,
    pub stats: WorkerStats,
    pub error: Option<String>,
}

impl WorkerReport {
    fn failed(interface: &str, error: String) -> Self {
        Self {
            interface: interface.to_string(),
            stats: WorkerStats::default(),
            error: Some(error),
        }
    }
}

/// Drives one frame sequence through the classifier into the sink.
///
/// Malformed or out-of-scope frames are dropped and a failed write loses only
/// that frame; the sequence is read until it ends. When a registry is given,
/// HTTP requests seen in accepted payloads are checked against it.
pub fn process_frames<I, T, P>(
    interface: &str,
    frames: I,
    classifier: &FlowClassifier,
    sink: &CaptureSink<T, P>,
    registry: Option<&SignatureRegistry>,
) -> WorkerStats
where
    I: Iterator<Item = RawFrame>,
    T: Write,
    P: TraceOutput,
{
    let mut stats = WorkerStats::default();

    for raw in frames {
        stats.received += 1;

        let frame = match classifier.classify(raw) {
            Classification::Accepted(frame) => frame,
            Classification::OutOfScope => {
                stats.out_of_scope += 1;
                continue;
            }
            Classification::Malformed(reason) => {
                debug!("Dropping malformed frame on {}: {}", interface, reason);
                stats.malformed += 1;
                continue;
            }
        };
        stats.accepted += 1;

        match sink.append(&frame) {
            Ok(()) => stats.written += 1,
            Err(e) => {
                warn!("Frame from {} lost: {}", interface, e);
                stats.lost += 1;
            }
        }

        let (Some(registry), Some(payload)) = (registry, frame.payload.as_deref()) else {
            continue;
        };
        if let Some(url) = http::request_url(payload) {
            for hit in registry.match_signature(&url) {
                info!(
                    "{} requested {} (fingerprint {}) via {}",
                    frame.source_ip, hit.name, hit.fingerprint, url
                );
                stats.identified += 1;
            }
        }
    }

    stats
}

/// Runs one blocking capture worker per interface and joins them all.
pub struct CaptureSupervisor {
    config: CaptureConfig,
    classifier: Arc<FlowClassifier>,
    sink: Arc<CaptureSink>,
    registry: Arc<SignatureRegistry>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureSupervisor {
    pub fn new(config: CaptureConfig, sink: Arc<CaptureSink>, registry: Arc<SignatureRegistry>) -> Self {
        let classifier = Arc::new(FlowClassifier::new(&config.ports));
        Self {
            config,
            classifier,
            sink,
            registry,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raising this flag ends every worker at its next read timeout.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Configured interfaces, or every device that has an address.
    pub fn resolve_interfaces(&self) -> Result<Vec<String>> {
        if !self.config.interfaces.is_empty() {
            return Ok(self.config.interfaces.clone());
        }

        let names: Vec<String> = PacketSource::list_interfaces()?
            .into_iter()
            .filter(|iface| !iface.addresses.is_empty())
            .map(|iface| iface.name)
            .collect();

        if names.is_empty() {
            return Err(SniffError::CaptureOpen {
                interface: "*".to_string(),
                reason: "no devices with an address found; check capture permissions".to_string(),
            });
        }
        Ok(names)
    }

    pub async fn run(&self, interfaces: Vec<String>) -> Vec<WorkerReport> {
        let mut handles = Vec::with_capacity(interfaces.len());

        for interface in interfaces {
            info!("Device: {}", interface);
            let config = self.config.clone();
            let classifier = Arc::clone(&self.classifier);
            let sink = Arc::clone(&self.sink);
            let registry = Arc::clone(&self.registry);
            let shutdown = Arc::clone(&self.shutdown);
            let name = interface.clone();

            let handle = tokio::task::spawn_blocking(move || {
                run_worker(&name, &config, &classifier, &sink, &registry, shutdown)
            });
            handles.push((interface, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (interface, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Capture worker for {} aborted: {}", interface, e);
                    reports.push(WorkerReport::failed(&interface, e.to_string()));
                }
            }
        }
        reports
    }
}

fn run_worker(
    interface: &str,
    config: &CaptureConfig,
    classifier: &FlowClassifier,
    sink: &CaptureSink,
    registry: &SignatureRegistry,
    shutdown: Arc<AtomicBool>,
) -> WorkerReport {
    let source = match PacketSource::open(interface, config, shutdown) {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            return WorkerReport::failed(interface, e.to_string());
        }
    };

    let limit = config.max_packets.unwrap_or(usize::MAX);
    let stats = process_frames(interface, source.take(limit), classifier, sink, Some(registry));
    info!(
        "Capture on {} finished: {} frames read, {} written, {} lost",
        interface, stats.received, stats.written, stats.lost
    );

    WorkerReport {
        interface: interface.to_string(),
        stats,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::network::flow::test_frames::tcp_frame;
    use crate::network::flow::CapturedFrame;

    /// Fails any write that carries the marker bytes.
    struct FlakyWriter {
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.windows(6).any(|w| w == b"POISON") {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn memory_sink() -> CaptureSink<Vec<u8>, Vec<CapturedFrame>> {
        CaptureSink::new(Vec::new(), Vec::new())
    }

    fn registry() -> SignatureRegistry {
        SignatureRegistry::from_seeds(&Config::default().fingerprint.signatures).unwrap()
    }

    #[test]
    fn test_out_of_scope_frames_never_reach_the_sink() {
        let sink = memory_sink();
        let frames = vec![
            tcp_frame(51000, 443, b"tls"),
            tcp_frame(51000, 22, b"ssh"),
            tcp_frame(51000, 80, b"GET / HTTP/1.1\r\nHost: a.example\r\n\r\n"),
        ];

        let stats = process_frames("test0", frames.into_iter(), &FlowClassifier::new(&[80]), &sink, None);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.out_of_scope, 2);
        assert_eq!(stats.written, 1);

        let (text, trace) = sink.into_inner();
        let text = String::from_utf8(text).unwrap();
        assert_eq!(text.matches("Connection: ").count(), 1);
        assert!(!text.contains("tls") && !text.contains("ssh"));
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].dest_port, 80);
    }

    #[test]
    fn test_corrupted_frame_does_not_stop_the_stream() {
        let sink = memory_sink();
        let mut corrupted = tcp_frame(51000, 80, b"");
        corrupted.data.truncate(20);
        let frames = vec![tcp_frame(51000, 80, b"first"), corrupted, tcp_frame(51000, 80, b"second")];

        let stats = process_frames("test0", frames.into_iter(), &FlowClassifier::new(&[80]), &sink, None);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.written, 2);

        let text = String::from_utf8(sink.into_inner().0).unwrap();
        assert!(text.contains("Payload: first\n"));
        assert!(text.contains("Payload: second\n"));
    }

    #[test]
    fn test_failed_write_loses_only_that_frame() {
        let sink = CaptureSink::new(FlakyWriter { data: Vec::new() }, Vec::<CapturedFrame>::new());
        let frames = vec![
            tcp_frame(51000, 80, b"one"),
            tcp_frame(51000, 80, b"POISON"),
            tcp_frame(51000, 80, b"three"),
        ];

        let stats = process_frames("test0", frames.into_iter(), &FlowClassifier::new(&[80]), &sink, None);
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.lost, 1);

        let (text, _) = sink.into_inner();
        let text = String::from_utf8(text.data).unwrap();
        assert!(text.contains("Payload: one\n"));
        assert!(text.contains("Payload: three\n"));
    }

    #[test]
    fn test_observed_script_requests_are_identified() {
        let sink = memory_sink();
        let registry = registry();
        let request = b"GET /gtm.js?id=GTM-ABC123&l=dataLayer HTTP/1.1\r\nHost: www.googletagmanager.com\r\n\r\n";
        let frames = vec![tcp_frame(51000, 80, request), tcp_frame(80, 51000, b"HTTP/1.1 200 OK\r\n\r\n")];

        let stats = process_frames(
            "test0",
            frames.into_iter(),
            &FlowClassifier::new(&[80]),
            &sink,
            Some(&registry),
        );
        assert_eq!(stats.written, 2);
        assert_eq!(stats.identified, 1);
    }

    #[test]
    fn test_unavailable_interface_fails_only_its_worker() {
        let dir = std::env::temp_dir().join(format!("scriptsniff-{}", crate::utils::generate_session_id()));
        std::fs::create_dir_all(&dir).unwrap();
        let text_path = dir.join("traffic.log");
        let trace_path = dir.join("traffic.pcap");
        let sink = CaptureSink::open(text_path.to_str().unwrap(), trace_path.to_str().unwrap()).unwrap();

        let supervisor = CaptureSupervisor::new(
            Config::default().capture,
            Arc::new(sink),
            Arc::new(registry()),
        );

        let reports = tokio_test::block_on(supervisor.run(vec!["scriptsniff-missing0".to_string()]));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].interface, "scriptsniff-missing0");
        assert!(reports[0].error.is_some());
        assert_eq!(reports[0].stats, WorkerStats::default());

        assert!(tokio_test::block_on(supervisor.run(vec![])).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
