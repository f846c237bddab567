use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use log::{info, warn};
use pcap::{Capture, Linktype, Packet, PacketHeader, Savefile};

use super::flow::CapturedFrame;
use crate::{Result, SniffError};

/// Snapshot length libpcap records in the header of a dead-handle savefile.
pub const TRACE_SNAPLEN: u32 = 65535;

/// Destination of the binary trace records.
pub trait TraceOutput {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<()>;
}

/// libpcap savefile (Ethernet, microsecond timestamps) opened for append.
pub struct TraceFile {
    savefile: Savefile,
}

impl TraceFile {
    /// A new or empty file gets the global header; an existing trace must
    /// be an Ethernet pcap file and only receives records.
    pub fn open(path: &str) -> Result<Self> {
        let existing_len = std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        if existing_len > 0 {
            check_existing_trace(path)?;
            info!("Appending to existing trace file {}", path);
        }

        let savefile = Capture::dead(Linktype::ETHERNET)
            .and_then(|dead| dead.savefile_append(path))
            .map_err(|e| SniffError::TraceFormat(format!("{}: {}", path, e)))?;
        Ok(Self { savefile })
    }
}

impl TraceOutput for TraceFile {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<()> {
        let header = record_header(frame);
        let data = &frame.data[..header.caplen as usize];
        self.savefile.write(&Packet::new(&header, data));
        self.savefile
            .flush()
            .map_err(|e| SniffError::SinkWrite(format!("trace file: {}", e)))
    }
}

fn record_header(frame: &CapturedFrame) -> PacketHeader {
    let caplen = u32::try_from(frame.data.len()).unwrap_or(u32::MAX).min(TRACE_SNAPLEN);
    PacketHeader {
        ts: libc::timeval {
            tv_sec: frame.timestamp.timestamp() as libc::time_t,
            tv_usec: frame.timestamp.timestamp_subsec_micros().min(999_999) as libc::suseconds_t,
        },
        caplen,
        len: frame.original_len.max(caplen),
    }
}

fn check_existing_trace(path: &str) -> Result<()> {
    let existing = Capture::from_file(path)
        .map_err(|e| SniffError::TraceFormat(format!("{} is not a pcap trace file: {}", path, e)))?;
    let linktype = existing.get_datalink();
    if linktype != Linktype::ETHERNET {
        return Err(SniffError::TraceFormat(format!(
            "{} holds {:?} frames, expected Ethernet",
            path, linktype
        )));
    }
    Ok(())
}

/// Text line(s) for one frame, exactly as appended to the text log.
pub fn log_entry(frame: &CapturedFrame) -> String {
    let mut entry = format!(
        "Connection: SourceIP={} DestIP={} DestPort={}\n",
        frame.source_ip, frame.dest_ip, frame.dest_port
    );
    if let Some(ref payload) = frame.payload {
        entry.push_str("Payload: ");
        entry.push_str(&String::from_utf8_lossy(payload));
        entry.push('\n');
    }
    entry
}

struct SinkFiles<T: Write, P: TraceOutput> {
    text: T,
    trace: P,
}

/// Shared destination of every capture worker.
///
/// Both files sit behind one mutex so the text entry and the trace record of
/// a frame are written together, never interleaved with another worker's.
pub struct CaptureSink<T: Write = File, P: TraceOutput = TraceFile> {
    files: Mutex<SinkFiles<T, P>>,
}

impl CaptureSink<File, TraceFile> {
    /// Opens both logs in append mode.
    pub fn open(text_path: &str, trace_path: &str) -> Result<Self> {
        let text = OpenOptions::new()
            .create(true)
            .append(true)
            .open(text_path)
            .map_err(|source| SniffError::SinkOpen { path: text_path.to_string(), source })?;
        let trace = TraceFile::open(trace_path)?;
        Ok(Self::new(text, trace))
    }
}

impl<T: Write, P: TraceOutput> CaptureSink<T, P> {
    pub fn new(text: T, trace: P) -> Self {
        Self {
            files: Mutex::new(SinkFiles { text, trace }),
        }
    }

    /// Writes the trace record, then the text entry, of one frame.
    ///
    /// A failed trace write leaves the text log untouched.
    pub fn append(&self, frame: &CapturedFrame) -> Result<()> {
        let entry = log_entry(frame);
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let SinkFiles { text, trace } = &mut *files;

        trace.write_frame(frame)?;
        text.write_all(entry.as_bytes())
            .and_then(|_| text.flush())
            .map_err(|e| {
                warn!(
                    "Trace record for {}:{} has no text entry",
                    frame.source_ip, frame.source_port
                );
                SniffError::SinkWrite(format!("text log: {}", e))
            })
    }

    pub fn into_inner(self) -> (T, P) {
        let files = self.files.into_inner().unwrap_or_else(PoisonError::into_inner);
        (files.text, files.trace)
    }
}

#[cfg(test)]
impl TraceOutput for Vec<CapturedFrame> {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}
