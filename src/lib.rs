mod delay_based_bwe;
mod delay_increase_detector_interface;
mod error;
mod trendline_estimator;

pub use delay_based_bwe::*;
pub use delay_increase_detector_interface::*;
pub use error::*;
pub use trendline_estimator::*;

pub mod api;
pub mod experiments;
pub mod remote_bitrate_estimator;
pub mod rtc;

pub use experiments::FieldTrials;
