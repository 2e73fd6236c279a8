//! Pacing of token fetches among concurrent callers

use std::time::Duration;

use cloudcore_clock::DurationSecs;

/// Configuration for how concurrent callers coordinate token fetches
///
/// When no usable token exists, one caller claims the fetch and the others
/// poll every `poll_interval` until a token appears. A claim older than
/// `claim_timeout` is presumed abandoned and may be taken over.
///
/// When a token merely needs refreshing, the caller that starts the refresh
/// pushes the refresh time forward by `refresh_advance` so that others keep
/// using the cached token instead of starting their own refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchPacingConfig {
    poll_interval: Duration,
    claim_timeout: DurationSecs,
    refresh_advance: DurationSecs,
}

impl Default for FetchPacingConfig {
    /// Default pacing configuration
    ///
    /// Polls every 500 ms, presumes a claim abandoned after 60 seconds, and
    /// defers further refresh attempts by 60 seconds.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            claim_timeout: DurationSecs(60),
            refresh_advance: DurationSecs(60),
        }
    }
}

impl FetchPacingConfig {
    /// Constructs a new pacing configuration
    pub fn new(
        poll_interval: Duration,
        claim_timeout: DurationSecs,
        refresh_advance: DurationSecs,
    ) -> Self {
        Self {
            poll_interval,
            claim_timeout,
            refresh_advance,
        }
    }

    /// How long a waiting caller sleeps between checks
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// How long a fetch claim is honored
    #[inline]
    pub fn claim_timeout(&self) -> DurationSecs {
        self.claim_timeout
    }

    /// How far the refresh time moves when a refresh starts
    #[inline]
    pub fn refresh_advance(&self) -> DurationSecs {
        self.refresh_advance
    }
}
