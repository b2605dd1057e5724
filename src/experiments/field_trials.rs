use std::str::FromStr;

use crate::{
    remote_bitrate_estimator::{
        AimdRateControlSettings, BweBackOffFactor, BweInitialBackOffInterval, InterArrivalSettings,
    },
    rtc::RateStatisticsSettings,
    Error, Result, TrendlineEstimatorSettings,
};

/// Current field trials for WebRTC that impact the delay based estimator.
///
/// Everything is kept type safe, which doubles as documentation. The WebRTC field trial string
/// format is still understood by [`FieldTrials::parse`] for the trials that have one.
#[derive(Clone, Debug)]
pub struct FieldTrials {
    /// Timestamp grouping of incoming packets.
    pub inter_arrival: InterArrivalSettings,

    /// WebRTC-BweWindowSizeInPackets
    pub trendline_estimator_settings: TrendlineEstimatorSettings,

    /// Window used to measure the acknowledged throughput.
    pub rate_statistics: RateStatisticsSettings,

    /// Bitrate bounds and the initial round-trip time.
    pub aimd_rate_control: AimdRateControlSettings,

    /// WebRTC-BweBackOffFactor
    pub bwe_back_off_factor: BweBackOffFactor,

    /// WebRTC-BweInitialBackOffInterval
    pub bwe_initial_back_off_interval: BweInitialBackOffInterval,

    /// WebRTC-AdaptiveBweThreshold
    pub adaptive_threshold: bool,

    /// WebRTC-Audio-BandwidthSmoothing
    pub bandwidth_smoothing: bool,
}

impl Default for FieldTrials {
    fn default() -> Self {
        Self {
            inter_arrival: InterArrivalSettings::default(),
            trendline_estimator_settings: TrendlineEstimatorSettings::default(),
            rate_statistics: RateStatisticsSettings::default(),
            aimd_rate_control: AimdRateControlSettings::default(),
            bwe_back_off_factor: BweBackOffFactor::default(),
            bwe_initial_back_off_interval: BweInitialBackOffInterval::default(),
            adaptive_threshold: true,
            bandwidth_smoothing: false,
        }
    }
}

impl FieldTrials {
    /// Parses a field trial string such as `"WebRTC-BweBackOffFactor/Enabled-0.5/"`.
    ///
    /// Trials that are not understood are skipped, as are values that fail to parse.
    pub fn parse(trials: &str) -> Result<Self> {
        let mut field_trials = Self::default();
        if trials.is_empty() {
            return Ok(field_trials);
        }

        let malformed = || Error::MalformedFieldTrials(trials.to_string());
        let tokens: Vec<&str> = trials.strip_suffix('/').ok_or_else(malformed)?.split('/').collect();
        if tokens.len() % 2 != 0 || tokens.iter().any(|token| token.is_empty()) {
            return Err(malformed());
        }

        for pair in tokens.chunks_exact(2) {
            field_trials.apply(pair[0], pair[1]);
        }

        Ok(field_trials)
    }

    fn apply(&mut self, name: &str, group: &str) {
        match name {
            "WebRTC-BweBackOffFactor" => {
                if let Some(backoff_factor) = enabled_value(name, group) {
                    self.bwe_back_off_factor = BweBackOffFactor { backoff_factor };
                }
            }
            "WebRTC-BweWindowSizeInPackets" => {
                if let Some(window_size) = enabled_value(name, group) {
                    self.trendline_estimator_settings.window_size = window_size;
                }
            }
            "WebRTC-BweInitialBackOffInterval" => {
                if let Some(interval_ms) = enabled_value(name, group) {
                    self.bwe_initial_back_off_interval = BweInitialBackOffInterval {
                        interval_ms: Some(interval_ms),
                    };
                }
            }
            "WebRTC-Audio-BandwidthSmoothing" => {
                self.bandwidth_smoothing = group.starts_with("Enabled");
            }
            "WebRTC-AdaptiveBweThreshold" => {
                self.adaptive_threshold = !group.starts_with("Disabled");
            }
            _ => tracing::debug!(name, group, "ignoring unknown field trial"),
        }
    }
}

// Reads the value of an "Enabled-<value>" group.
fn enabled_value<T: FromStr>(name: &str, group: &str) -> Option<T> {
    let value = group.strip_prefix("Enabled-")?;
    match value.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, group, "failed to parse field trial value, using default");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_string_is_default() {
        let field_trials = FieldTrials::parse("").unwrap();
        assert!(field_trials.adaptive_threshold);
        assert!(!field_trials.bandwidth_smoothing);
        assert_eq!(field_trials.bwe_back_off_factor, BweBackOffFactor::default());
        assert_eq!(
            field_trials.trendline_estimator_settings,
            TrendlineEstimatorSettings::default()
        );
    }

    #[test]
    fn parses_known_trials() {
        let field_trials = FieldTrials::parse(
            "WebRTC-BweBackOffFactor/Enabled-0.5/\
             WebRTC-BweWindowSizeInPackets/Enabled-40/\
             WebRTC-BweInitialBackOffInterval/Enabled-50/\
             WebRTC-Audio-BandwidthSmoothing/Enabled/\
             WebRTC-AdaptiveBweThreshold/Disabled/",
        )
        .unwrap();
        assert_eq!(field_trials.bwe_back_off_factor.backoff_factor, 0.5);
        assert_eq!(field_trials.trendline_estimator_settings.window_size, 40);
        assert_eq!(
            field_trials.bwe_initial_back_off_interval.interval_ms,
            Some(50)
        );
        assert!(field_trials.bandwidth_smoothing);
        assert!(!field_trials.adaptive_threshold);
    }

    #[test]
    fn ignores_unknown_trials_and_bad_values() {
        let field_trials = FieldTrials::parse(
            "WebRTC-SomethingElse/Enabled/\
             WebRTC-BweBackOffFactor/Enabled-abc/\
             WebRTC-BweWindowSizeInPackets/Disabled/",
        )
        .unwrap();
        assert_eq!(field_trials.bwe_back_off_factor, BweBackOffFactor::default());
        assert_eq!(
            field_trials.trendline_estimator_settings.window_size,
            TrendlineEstimatorSettings::DEFAULT_TRENDLINE_WINDOW_SIZE
        );
    }

    #[test]
    fn rejects_malformed_strings() {
        for trials in [
            "WebRTC-BweBackOffFactor/Enabled-0.5",
            "WebRTC-BweBackOffFactor/",
            "WebRTC-BweBackOffFactor//",
            "/Enabled/",
        ] {
            assert_eq!(
                FieldTrials::parse(trials).unwrap_err(),
                Error::MalformedFieldTrials(trials.to_string())
            );
        }
    }
}
