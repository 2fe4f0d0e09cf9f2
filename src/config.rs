//! Configuration types for pumps and resamplers.

use std::fmt;
use std::time::Duration;

use crate::EventCallback;

/// Resampler quality presets.
///
/// Higher values use longer interpolation filters. Any integer quality is
/// accepted by [`Resampler`](crate::Resampler); values above
/// [`Quality::MAX`] are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    /// Cheapest filter that is still fine for voice calls.
    Voip,
    /// Good enough for voice and general playback.
    #[default]
    Default,
    /// Desktop-grade quality.
    Desktop,
    /// Longest filter.
    Max,
}

impl Quality {
    /// Largest accepted quality value.
    pub const MAX: u32 = 10;

    /// Returns the numeric quality for this preset.
    #[must_use]
    pub fn value(&self) -> u32 {
        match self {
            Self::Voip => 3,
            Self::Default => 4,
            Self::Desktop => 5,
            Self::Max => Self::MAX,
        }
    }
}

impl From<Quality> for u32 {
    fn from(quality: Quality) -> Self {
        quality.value()
    }
}

/// Configuration for a [`PcmReader`](crate::PcmReader) or
/// [`PcmWriter`](crate::PcmWriter).
///
/// # Example
///
/// ```
/// use pcm_route::{PumpConfig, Quality};
///
/// let config = PumpConfig::default()
///     .with_quality(Quality::Desktop)
///     .with_event_callback(|event| tracing::warn!(?event, "route event"));
/// assert_eq!(config.resampler_quality, 5);
/// ```
#[derive(Clone)]
pub struct PumpConfig {
    /// Quality of resamplers attached to streams whose rate differs from
    /// the pump's rate.
    ///
    /// Default: [`Quality::Default`]
    pub resampler_quality: u32,

    /// Receives runtime events from the pump and its routing engine.
    ///
    /// Default: none
    pub event_callback: Option<EventCallback>,
}

impl PumpConfig {
    /// Sets the resampler quality.
    #[must_use]
    pub fn with_quality(mut self, quality: impl Into<u32>) -> Self {
        self.resampler_quality = quality.into();
        self
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::RouteEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(crate::event_callback(f));
        self
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            resampler_quality: Quality::Default.value(),
            event_callback: None,
        }
    }
}

impl fmt::Debug for PumpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpConfig")
            .field("resampler_quality", &self.resampler_quality)
            .field("event_callback", &self.event_callback.is_some())
            .finish()
    }
}

/// Bounded wait for the pull side of a [`BufferAdaptor`](crate::BufferAdaptor).
///
/// The adaptor never waits by default.
pub const ADAPTOR_PULL_TIMEOUT: Duration = Duration::from_millis(200);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_values() {
        assert_eq!(Quality::Voip.value(), 3);
        assert_eq!(Quality::Default.value(), 4);
        assert_eq!(Quality::Desktop.value(), 5);
        assert_eq!(Quality::Max.value(), 10);
    }

    #[test]
    fn test_quality_default() {
        assert_eq!(Quality::default(), Quality::Default);
    }

    #[test]
    fn test_pump_config_defaults() {
        let config = PumpConfig::default();
        assert_eq!(config.resampler_quality, 4);
        assert!(config.event_callback.is_none());
    }

    #[test]
    fn test_pump_config_builder() {
        let config = PumpConfig::default()
            .with_quality(7u32)
            .with_event_callback(|_| {});
        assert_eq!(config.resampler_quality, 7);
        assert!(config.event_callback.is_some());
        assert!(format!("{config:?}").contains("true"));
    }
}
