//! The token lifecycle engine shared by every token service
//!
//! A [`TokenManager`] caches the most recent token from its [`TokenSource`]
//! and decides, on each call to [`get_token()`][TokenManager::get_token],
//! whether that token can be handed out as-is:
//!
//! * a _fresh_ token is returned without any I/O;
//! * a token that _needs refreshing_ is returned immediately, while a single
//!   background task fetches its replacement;
//! * an _expired_ token (or no token at all) makes callers wait. Exactly one
//!   caller claims the fetch; the others poll until a token appears, or until
//!   the claim is old enough to be presumed abandoned.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use cloudcore_clock::{Clock, System, UnixTime};

use crate::{
    pacing::FetchPacingConfig,
    tokens::{status_at, CachedToken, TokenLifetimeConfig, TokenResponse, TokenStatus},
    transport::HttpTransport,
    AccessToken, Error,
};

/// A service that can issue tokens
#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug + 'static {
    /// A short name for the token service, used in logs
    fn name(&self) -> &'static str;

    /// Obtains a new token from the token service
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error>;
}

/// The collaborators a token manager works with
#[derive(Clone)]
pub struct ManagerOptions {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock + Send + Sync>,
    lifetime: TokenLifetimeConfig,
    pacing: FetchPacingConfig,
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("transport", &self.transport)
            .field("lifetime", &self.lifetime)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "reqwest")]
impl Default for ManagerOptions {
    /// Uses a [`ReqwestTransport`][crate::transport::ReqwestTransport] and the system clock
    fn default() -> Self {
        Self::new(Arc::new(crate::transport::ReqwestTransport::new()))
    }
}

impl ManagerOptions {
    /// Options using the given transport, the system clock and default lifetime
    /// and pacing configurations
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            clock: Arc::new(System),
            lifetime: TokenLifetimeConfig::default(),
            pacing: FetchPacingConfig::default(),
        }
    }

    /// Replaces the clock used to judge token freshness
    pub fn with_clock<C: Clock + Send + Sync + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the lifetime configuration
    pub fn with_lifetime(mut self, lifetime: TokenLifetimeConfig) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Replaces the pacing configuration
    pub fn with_pacing(mut self, pacing: FetchPacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// The transport
    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }
}

#[derive(Debug)]
struct Claim {
    id: u64,
    at: UnixTime,
}

#[derive(Debug, Default)]
struct State {
    token: Option<Arc<CachedToken>>,
    // Starts as the token's refresh time and moves forward each time a
    // background refresh is started.
    refresh_at: UnixTime,
    claim: Option<Claim>,
    next_claim_id: u64,
    // Bumped whenever the caller supplies a token. Fetches started under an
    // older generation are discarded.
    generation: u64,
}

impl State {
    fn status_at(&self, now: UnixTime) -> Option<TokenStatus> {
        let token = self.token.as_ref()?;
        Some(match token.window() {
            None => TokenStatus::Fresh,
            Some(w) => status_at(now, self.refresh_at, w.expiry()),
        })
    }

    fn current(&self) -> Option<AccessToken> {
        self.token.as_ref().map(|t| t.access_token().to_owned())
    }
}

struct Shared<S> {
    source: S,
    options: ManagerOptions,
    state: Mutex<State>,
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Obtains tokens from a [`TokenSource`], caching them across calls
///
/// Clones share the same cache.
pub struct TokenManager<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for TokenManager<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for TokenManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("source", &self.shared.source)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

enum Next {
    Ready(AccessToken),
    RefreshInBackground(AccessToken),
    Fetch,
}

/// Releases a fetch claim when the claimant finishes or is cancelled
struct ClaimGuard<'a, S> {
    shared: &'a Shared<S>,
    id: u64,
}

impl<S> Drop for ClaimGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.claim.as_ref().is_some_and(|c| c.id == self.id) {
            state.claim = None;
        }
    }
}

impl<S: TokenSource> TokenManager<S> {
    /// Constructs a manager for an already validated `source`
    pub fn with_options(source: S, options: ManagerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                options,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// The token source
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// The most recently cached token, if any
    pub fn cached_token(&self) -> Option<Arc<CachedToken>> {
        self.shared.lock().token.clone()
    }

    /// Replaces the cached token with one supplied by the caller
    ///
    /// The token's lifetime is not tracked, so it is returned until replaced
    /// again.
    pub fn set_access_token(&self, token: AccessToken) {
        let mut state = self.shared.lock();
        state.token = Some(Arc::new(CachedToken::unmanaged(token)));
        state.refresh_at = UnixTime::MAX;
        state.generation += 1;
    }

    /// Gets a token that is valid now
    ///
    /// Callers only wait on the network when there is no unexpired token.
    #[tracing::instrument(skip(self), fields(token_service = self.shared.source.name()))]
    pub async fn get_token(&self) -> Result<AccessToken, Error> {
        match self.next_step() {
            Next::Ready(token) => {
                tracing::trace!("using cached token");
                Ok(token)
            }
            Next::RefreshInBackground(token) => {
                tracing::debug!("token needs refreshing, starting background refresh");
                self.spawn_refresh();
                Ok(token)
            }
            Next::Fetch => self.paced_fetch().await,
        }
    }

    fn next_step(&self) -> Next {
        let now = self.shared.options.clock.now();
        let mut state = self.shared.lock();

        let (Some(status), Some(token)) = (state.status_at(now), state.current()) else {
            return Next::Fetch;
        };

        match status {
            TokenStatus::Fresh => Next::Ready(token),
            TokenStatus::NeedsRefresh => {
                state.refresh_at = now + self.shared.options.pacing.refresh_advance();
                Next::RefreshInBackground(token)
            }
            TokenStatus::Expired => Next::Fetch,
        }
    }

    fn spawn_refresh(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(error) = manager.fetch_and_store().await {
                tracing::warn!(
                    token_service = manager.shared.source.name(),
                    error = (&error as &dyn std::error::Error),
                    "background token refresh failed, continuing to use cached token"
                );
            }
        });
    }

    async fn paced_fetch(&self) -> Result<AccessToken, Error> {
        let pacing = self.shared.options.pacing;

        loop {
            let claimed = {
                let now = self.shared.options.clock.now();
                let mut state = self.shared.lock();

                if let (Some(TokenStatus::Fresh | TokenStatus::NeedsRefresh), Some(token)) =
                    (state.status_at(now), state.current())
                {
                    return Ok(token);
                }

                let available = match &state.claim {
                    None => true,
                    Some(claim) if now >= claim.at + pacing.claim_timeout() => {
                        tracing::warn!(
                            claimed_at = %claim.at,
                            "token fetch claim timed out, taking over"
                        );
                        true
                    }
                    Some(_) => false,
                };

                if available {
                    let id = state.next_claim_id;
                    state.next_claim_id += 1;
                    state.claim = Some(Claim { id, at: now });
                    Some(id)
                } else {
                    None
                }
            };

            if let Some(id) = claimed {
                let _guard = ClaimGuard {
                    shared: &self.shared,
                    id,
                };
                let token = self.fetch_and_store().await?;
                return Ok(token.access_token().to_owned());
            }

            tracing::trace!("waiting for another caller to fetch a token");
            tokio::time::sleep(pacing.poll_interval()).await;
        }
    }

    async fn fetch_and_store(&self) -> Result<Arc<CachedToken>, Error> {
        let shared = &self.shared;
        let generation = shared.lock().generation;
        let response = shared
            .source
            .request_token(shared.options.transport.as_ref())
            .await?;

        let token = Arc::new(shared.options.lifetime.create_token(response));

        match token.window() {
            Some(w) => tracing::info!(
                issued = %w.issued(),
                refresh_at = %w.refresh_at(),
                expiry = %w.expiry(),
                "obtained new token"
            ),
            None => tracing::info!("obtained new token with untracked lifetime"),
        }

        let mut state = shared.lock();
        if state.generation != generation {
            tracing::debug!("token was replaced during the fetch, discarding fetched token");
            if let Some(current) = &state.token {
                return Ok(Arc::clone(current));
            }
        }
        state.refresh_at = token.window().map_or(UnixTime::MAX, |w| w.refresh_at());
        state.token = Some(Arc::clone(&token));

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use cloudcore_clock::{DurationSecs, ManualClock};

    use super::*;
    use crate::{
        mock::{jwt_with, MockResponse, MockTransport},
        transport::{self, RequestOptions, TokenRequest},
        TokenResponse,
    };

    #[derive(Debug, Default)]
    struct CountingSource {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn request_token(
            &self,
            transport: &dyn HttpTransport,
        ) -> Result<TokenResponse, Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let request = TokenRequest::builder(
                http::Method::POST,
                "https://tokens.example.com/token",
                &RequestOptions::default(),
            )
            .build()?;
            let response = transport::send(transport, request).await?;
            TokenResponse::from_json(&response.body, "access_token")
        }
    }

    fn manager(
        mock: &MockTransport,
        clock: &ManualClock,
    ) -> TokenManager<CountingSource> {
        let options = ManagerOptions::new(mock.shared())
            .with_clock(clock.clone())
            .with_pacing(FetchPacingConfig::new(
                Duration::from_millis(10),
                DurationSecs(60),
                DurationSecs(60),
            ));
        TokenManager::with_options(CountingSource::default(), options)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    mod when_unpopulated {
        use super::*;

        #[tokio::test]
        async fn fetches_once_and_caches() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);

            let first = manager.get_token().await.unwrap();
            let second = manager.get_token().await.unwrap();

            assert_eq!(first, second);
            assert_eq!(mock.calls(), 1);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_callers_share_one_fetch() {
            let mock = MockTransport::new();
            mock.push(
                MockResponse::token("access_token", 1_000, 4_600)
                    .with_delay(Duration::from_millis(100)),
            );
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.get_token().await })
                })
                .collect();

            let mut tokens = Vec::new();
            for handle in handles {
                tokens.push(handle.await.unwrap().unwrap());
            }

            assert_eq!(mock.calls(), 1);
            assert!(tokens.windows(2).all(|w| w[0] == w[1]));
        }

        #[tokio::test]
        async fn errors_reach_the_caller_and_release_the_claim() {
            let mock = MockTransport::new();
            mock.push(MockResponse::json(
                400,
                serde_json::json!({ "errorMessage": "bad apikey" }),
            ));
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);

            let err = manager.get_token().await.unwrap_err();
            assert_eq!(err.status_code(), Some(400));

            manager.get_token().await.unwrap();
            assert_eq!(mock.calls(), 2);
        }

        #[tokio::test]
        async fn abandoned_claims_are_taken_over() {
            let mock = MockTransport::new();
            mock.push(
                MockResponse::token("access_token", 1_000, 4_600)
                    .with_delay(Duration::from_secs(3_600)),
            );
            mock.push(MockResponse::token("access_token", 1_000, 4_700));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);

            let stuck = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token().await })
            };
            while mock.calls() == 0 {
                tokio::task::yield_now().await;
            }

            clock.advance(DurationSecs(61));
            let token = manager.get_token().await.unwrap();

            assert_eq!(mock.calls(), 2);
            assert_eq!(token.as_str(), jwt_with(1_000, 4_700));
            stuck.abort();
        }
    }

    mod when_populated {
        use super::*;

        #[tokio::test]
        async fn fresh_tokens_need_no_io() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            manager.get_token().await.unwrap();

            clock.set(UnixTime(3_000));
            for _ in 0..10 {
                manager.get_token().await.unwrap();
            }

            assert_eq!(mock.calls(), 1);
        }

        #[tokio::test]
        async fn stale_tokens_are_returned_while_refreshing_once() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(MockResponse::token("access_token", 4_000, 7_600));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            let original = manager.get_token().await.unwrap();

            clock.set(UnixTime(4_000));
            for _ in 0..5 {
                assert_eq!(manager.get_token().await.unwrap(), original);
            }
            settle().await;

            assert_eq!(mock.calls(), 2);
            assert_eq!(
                manager.get_token().await.unwrap().as_str(),
                jwt_with(4_000, 7_600)
            );
        }

        #[tokio::test]
        async fn failed_refreshes_keep_the_cached_token() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(MockResponse::send_error("connection refused"));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            let original = manager.get_token().await.unwrap();

            clock.set(UnixTime(4_000));
            assert_eq!(manager.get_token().await.unwrap(), original);
            settle().await;

            assert_eq!(manager.get_token().await.unwrap(), original);
            assert_eq!(mock.calls(), 2);
        }

        #[tokio::test]
        async fn refreshes_are_retried_after_the_advance() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(MockResponse::send_error("connection refused"));
            mock.push(MockResponse::send_error("connection refused"));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            manager.get_token().await.unwrap();

            clock.set(UnixTime(4_000));
            manager.get_token().await.unwrap();
            settle().await;

            clock.set(UnixTime(4_059));
            manager.get_token().await.unwrap();
            settle().await;
            assert_eq!(mock.calls(), 2);

            clock.set(UnixTime(4_060));
            manager.get_token().await.unwrap();
            settle().await;
            assert_eq!(mock.calls(), 3);
        }

        #[tokio::test]
        async fn expired_tokens_are_never_returned() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(MockResponse::token("access_token", 4_600, 8_200));
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            manager.get_token().await.unwrap();

            clock.set(UnixTime(4_600));
            let token = manager.get_token().await.unwrap();

            assert_eq!(token.as_str(), jwt_with(4_600, 8_200));
            assert_eq!(mock.calls(), 2);
        }

        #[tokio::test]
        async fn user_supplied_tokens_are_never_refreshed() {
            let mock = MockTransport::new();
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);

            manager.set_access_token(AccessToken::from_static("user-token"));
            clock.set(UnixTime::MAX);

            assert_eq!(manager.get_token().await.unwrap().as_str(), "user-token");
            assert_eq!(mock.calls(), 0);
            assert!(!manager.cached_token().unwrap().is_managed());
        }

        #[tokio::test]
        async fn user_supplied_tokens_outlast_refreshes_in_flight() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(
                MockResponse::token("access_token", 4_000, 7_600)
                    .with_delay(Duration::from_millis(100)),
            );
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            manager.get_token().await.unwrap();

            clock.set(UnixTime(4_000));
            manager.get_token().await.unwrap();
            while mock.calls() < 2 {
                tokio::task::yield_now().await;
            }
            manager.set_access_token(AccessToken::from_static("user-token"));
            tokio::time::sleep(Duration::from_millis(300)).await;

            assert_eq!(manager.get_token().await.unwrap().as_str(), "user-token");
            assert!(!manager.cached_token().unwrap().is_managed());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_callers_start_one_refresh() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            mock.push(
                MockResponse::token("access_token", 4_000, 7_600)
                    .with_delay(Duration::from_millis(100)),
            );
            let clock = ManualClock::new(UnixTime(1_000));
            let manager = manager(&mock, &clock);
            let original = manager.get_token().await.unwrap();

            clock.set(UnixTime(4_000));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.get_token().await })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.await.unwrap().unwrap(), original);
            }
            tokio::time::sleep(Duration::from_millis(300)).await;

            assert_eq!(mock.calls(), 2);
            assert_eq!(
                manager.get_token().await.unwrap().as_str(),
                jwt_with(4_000, 7_600)
            );
        }
    }
}
