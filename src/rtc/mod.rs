mod rate_statistics;

pub use rate_statistics::*;
