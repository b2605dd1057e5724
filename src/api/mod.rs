/// Network structs and types, such as [BandwidthUsage](transport::BandwidthUsage).
pub mod transport;

/// Wraparound-aware comparison and unwrapping of sequence numbers and timestamps.
pub mod units;
