use chrono::{DateTime, Utc};
use ring::digest;
use uuid::Uuid;

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()
}

/// Builds a UTC timestamp from a pcap `(seconds, microseconds)` pair.
pub fn timestamp_from_parts(secs: i64, micros: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, micros.saturating_mul(1000)).unwrap_or_else(Utc::now)
}

/// SHA-256 of `data`, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}
