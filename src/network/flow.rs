use std::collections::HashSet;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;

/// One link-layer frame as read from a capture handle.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: DateTime<Utc>,
    /// Length on the wire; `data` may be shorter when truncated by snaplen.
    pub original_len: u32,
    pub data: Vec<u8>,
}

/// A decoded, in-scope IPv4/TCP frame on its way to the sink.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub original_len: u32,
    pub data: Vec<u8>,
    pub source_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_port: u16,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum Classification {
    Accepted(CapturedFrame),
    /// Decoded fine, but not IPv4/TCP or neither port is in the traffic class.
    OutOfScope,
    /// Truncated or inconsistent headers.
    Malformed(&'static str),
}

/// Decodes Ethernet/IPv4/TCP and keeps frames touching a watched port.
#[derive(Debug, Clone)]
pub struct FlowClassifier {
    ports: HashSet<u16>,
}

impl FlowClassifier {
    pub fn new(ports: &[u16]) -> Self {
        Self {
            ports: ports.iter().copied().collect(),
        }
    }

    pub fn is_watched(&self, source_port: u16, dest_port: u16) -> bool {
        self.ports.contains(&source_port) || self.ports.contains(&dest_port)
    }

    pub fn classify(&self, frame: RawFrame) -> Classification {
        let (source_ip, dest_ip, source_port, dest_port, payload) = {
            let ethernet = match EthernetPacket::new(&frame.data) {
                Some(packet) => packet,
                None => return Classification::Malformed("short ethernet header"),
            };
            if ethernet.get_ethertype() != EtherTypes::Ipv4 {
                return Classification::OutOfScope;
            }

            let ip_bytes = ethernet.payload();
            let ipv4 = match Ipv4Packet::new(ip_bytes) {
                Some(packet) => packet,
                None => return Classification::Malformed("short ipv4 header"),
            };
            let ip_header_len = ipv4.get_header_length() as usize * 4;
            let total_len = ipv4.get_total_length() as usize;
            if ipv4.get_version() != 4 || ip_header_len < 20 || ip_header_len > ip_bytes.len() {
                return Classification::Malformed("bad ipv4 header length");
            }
            if total_len < ip_header_len {
                return Classification::Malformed("bad ipv4 total length");
            }
            if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
                return Classification::OutOfScope;
            }

            // Ethernet padding and snaplen truncation both make the buffer
            // disagree with total_length; trust whichever is shorter.
            let segment_end = total_len.min(ip_bytes.len());
            let segment = &ip_bytes[ip_header_len..segment_end];
            let tcp = match TcpPacket::new(segment) {
                Some(packet) => packet,
                None => return Classification::Malformed("short tcp header"),
            };
            let tcp_header_len = tcp.get_data_offset() as usize * 4;
            if tcp_header_len < 20 || tcp_header_len > segment.len() {
                return Classification::Malformed("bad tcp data offset");
            }

            let source_port = tcp.get_source();
            let dest_port = tcp.get_destination();
            if !self.is_watched(source_port, dest_port) {
                return Classification::OutOfScope;
            }

            let body = &segment[tcp_header_len..];
            let payload = if body.is_empty() { None } else { Some(body.to_vec()) };
            (ipv4.get_source(), ipv4.get_destination(), source_port, dest_port, payload)
        };

        Classification::Accepted(CapturedFrame {
            timestamp: frame.timestamp,
            original_len: frame.original_len,
            data: frame.data,
            source_ip,
            dest_ip,
            source_port,
            dest_port,
            payload,
        })
    }
}
