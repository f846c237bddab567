pub mod packet_capture;
pub mod flow;
pub mod sink;
pub mod http;

pub use packet_capture::{CaptureSupervisor, InterfaceInfo, PacketSource, WorkerReport, WorkerStats};
pub use flow::{CapturedFrame, Classification, FlowClassifier, RawFrame};
pub use sink::{CaptureSink, TraceFile, TraceOutput};
