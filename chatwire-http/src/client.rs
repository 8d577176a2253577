//! The REST engine (§4.4): composes a request, runs it through the
//! middleware pipeline, paces it through the rate-limiting crate's bucket
//! manager, and retries/backs off/circuit-breaks according to
//! [`RestOptions`].

use crate::{
    circuit::{Admission as CircuitAdmission, CircuitBreakers, CircuitSettings},
    error::{Error, ErrorType, Result},
    middleware::{Body, ErrorOutcome, Registry, RequestOutcome},
    routing::RouteTemplate,
};
use chatwire_ratelimiting::{BucketManager, Completion, Priority, RatelimitHeaders};
use hyper::{
    client::{Client as HyperClient, HttpConnector},
    header::{HeaderName, HeaderValue},
    Body as HyperBody, Request as HyperRequest, Response as HyperResponse, StatusCode,
};
use rand::Rng;
use std::{collections::HashSet, sync::Arc};
use tokio::time::{self, Duration, Instant};

#[cfg(feature = "rustls-native-roots")]
type Connector = hyper_rustls::HttpsConnector<HttpConnector>;
#[cfg(not(feature = "rustls-native-roots"))]
type Connector = HttpConnector;

/// Settings governing retries of retryable failures (§4.4).
#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
    pub retryable_statuses: HashSet<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            jitter_factor: 0.1,
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

/// Recognized REST engine settings (§4.4).
#[derive(Clone, Debug)]
pub struct RestOptions {
    pub api_version: u8,
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub circuit: CircuitSettings,
    pub rate_limit_requests_per_second: u64,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            api_version: 10,
            base_url: "https://discord.com/api".to_owned(),
            user_agent: concat!(
                "DiscordBot (https://chatwire.rs, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            )
            .to_owned(),
            timeout: Duration::from_secs(15),
            retry: RetrySettings::default(),
            circuit: CircuitSettings::default(),
            rate_limit_requests_per_second: 50,
        }
    }
}

/// A composed, not-yet-dispatched request.
pub struct OutboundRequest {
    pub route: RouteTemplate,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: Vec<(&'static str, String)>,
    pub priority: Priority,
    pub audit_log_reason: Option<String>,
}

/// The REST engine. Cheaply cloneable; internal state is reference-counted.
#[derive(Clone)]
pub struct Client {
    http: HyperClient<Connector>,
    token: Option<String>,
    options: Arc<RestOptions>,
    buckets: Arc<BucketManager>,
    breakers: Arc<CircuitBreakers>,
    registry: Arc<Registry>,
}

impl Client {
    /// Build a client from a bot token and the recognized [`RestOptions`].
    #[must_use]
    pub fn new(token: impl Into<String>, options: RestOptions) -> Self {
        Self::with_registry(token, options, Registry::new())
    }

    /// Build a client with a pre-populated middleware registry.
    #[must_use]
    pub fn with_registry(token: impl Into<String>, options: RestOptions, registry: Registry) -> Self {
        let breakers = CircuitBreakers::new(options.circuit);
        let buckets = BucketManager::new(options.rate_limit_requests_per_second);

        Self {
            http: build_connector(),
            token: Some(token.into()),
            options: Arc::new(options),
            buckets,
            breakers: Arc::new(breakers),
            registry: Arc::new(registry),
        }
    }

    /// Execute `outbound`, retrying and circuit-breaking per [`RestOptions`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::CircuitOpen`] if the route's breaker is open,
    /// [`ErrorType::AttemptsExhausted`] once `retry.max_attempts` is spent,
    /// or a classified error for a non-retryable response.
    pub async fn execute(&self, outbound: OutboundRequest) -> Result<HyperResponse<Body>> {
        let bucket_key = outbound.route.bucket_key();
        let mut attempt: u32 = 1;
        let mut retry_at_head = false;

        loop {
            match self.breakers.admit(&bucket_key, Instant::now()) {
                CircuitAdmission::Reject => {
                    return Err(Error::new(ErrorType::CircuitOpen {
                        route: bucket_key.clone(),
                    }));
                }
                CircuitAdmission::Allow | CircuitAdmission::Probe => {}
            }

            let ticket = if retry_at_head {
                self.buckets.enqueue_at_head(&bucket_key, outbound.priority)
            } else {
                self.buckets.enqueue(&bucket_key, outbound.priority)
            };
            let admitted = ticket
                .admitted()
                .await
                .map_err(|_| Error::new(ErrorType::Cancelled))?;

            let outcome = self.dispatch_once(&outbound).await;

            match outcome {
                Ok((response, completion)) => {
                    let _ = admitted.report(Some(completion));
                    self.breakers.record_success(&bucket_key);
                    return Ok(response);
                }
                Err(Retry::RateLimited { retry_after, completion }) => {
                    let _ = admitted.report(Some(completion));

                    if attempt >= self.options.retry.max_attempts {
                        return Err(Error::new(ErrorType::AttemptsExhausted { attempts: attempt }));
                    }

                    time::sleep(retry_after).await;
                    attempt += 1;
                    retry_at_head = true;
                    continue;
                }
                Err(Retry::Retryable(error)) => {
                    let _ = admitted.report(None);
                    self.breakers.record_failure(&bucket_key, Instant::now());

                    if attempt >= self.options.retry.max_attempts {
                        return Err(error);
                    }

                    let delay = self.backoff_delay(attempt);
                    time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(Retry::Fatal(error)) => {
                    let _ = admitted.report(None);
                    return Err(error);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let retry = &self.options.retry;
        let exponent = attempt.saturating_sub(1);
        let raw = retry.base_delay.as_secs_f64() * retry.backoff_factor.powi(exponent as i32);
        let capped = raw.min(retry.max_delay.as_secs_f64());

        let factor = if retry.jitter {
            rand::thread_rng().gen_range((1.0 - retry.jitter_factor)..=(1.0 + retry.jitter_factor))
        } else {
            1.0
        };

        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    async fn dispatch_once(&self, outbound: &OutboundRequest) -> std::result::Result<(HyperResponse<Body>, Completion), Retry> {
        let pipeline = self.registry.snapshot();

        let request = self
            .build_request(outbound)
            .map_err(|error| Retry::Fatal(error))?;

        let request = match pipeline.run_request(request).await {
            RequestOutcome::Continue(request) => request,
            RequestOutcome::ShortCircuit(response) => {
                let completion = Completion {
                    headers: RatelimitHeaders::None,
                    rate_limited: false,
                    retry_after: None,
                };
                return Ok((response, completion));
            }
        };

        let (parts, buffered) = request.into_parts();
        let hyper_request = HyperRequest::from_parts(parts, HyperBody::from(buffered));

        let sent = time::timeout(self.options.timeout, self.http.request(hyper_request)).await;

        let response = match sent {
            Err(_) => return Err(Retry::Retryable(Error::new(ErrorType::Timeout))),
            Ok(Err(source)) => return Err(Retry::Retryable(Error::with_source(ErrorType::Network, source))),
            Ok(Ok(response)) => response,
        };

        let headers = header_pairs(&response);
        let parsed = RatelimitHeaders::from_pairs(headers.iter().map(|(name, value)| (name.as_str(), value.as_slice())))
            .unwrap_or(RatelimitHeaders::None);

        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(|source| Retry::Retryable(Error::with_source(ErrorType::Network, source)))?;
        let response = HyperResponse::from_parts(parts, bytes.to_vec());
        let response = pipeline.run_response(response).await;

        if status.is_success() {
            let completion = Completion {
                headers: parsed,
                rate_limited: false,
                retry_after: None,
            };
            return Ok((response, completion));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_duration(&parsed, &bytes);

            let completion = Completion {
                headers: parsed,
                rate_limited: true,
                retry_after: Some(retry_after),
            };

            return Err(Retry::RateLimited { retry_after, completion });
        }

        let code = status.as_u16();

        if self.options.retry.retryable_statuses.contains(&code) || status.is_server_error() {
            let error = Error::new(ErrorType::Server { status: code });

            return match pipeline.run_error(error).await {
                ErrorOutcome::Recovered(recovered) => Ok((
                    recovered,
                    Completion {
                        headers: parsed,
                        rate_limited: false,
                        retry_after: None,
                    },
                )),
                ErrorOutcome::Propagate(error) => Err(Retry::Retryable(error)),
            };
        }

        let error = Error::new(ErrorType::Response { status: code });

        match pipeline.run_error(error).await {
            ErrorOutcome::Recovered(recovered) => Ok((
                recovered,
                Completion {
                    headers: parsed,
                    rate_limited: false,
                    retry_after: None,
                },
            )),
            ErrorOutcome::Propagate(error) => Err(Retry::Fatal(error)),
        }
    }

    fn build_request(&self, outbound: &OutboundRequest) -> Result<HyperRequest<Body>> {
        let url = format!(
            "{}/v{}{}",
            self.options.base_url, self.options.api_version, outbound.path
        );

        let mut builder = HyperRequest::builder()
            .method(outbound.route.method().clone())
            .uri(&url);

        if let Some(headers) = builder.headers_mut() {
            if let Some(token) = &self.token {
                let value = HeaderValue::from_str(token)
                    .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;
                headers.insert(hyper::header::AUTHORIZATION, value);
            }

            let user_agent = HeaderValue::from_str(&self.options.user_agent)
                .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;
            headers.insert(hyper::header::USER_AGENT, user_agent);

            if let Some(reason) = &outbound.audit_log_reason {
                let encoded = percent_encoding::utf8_percent_encode(
                    reason,
                    percent_encoding::NON_ALPHANUMERIC,
                )
                .to_string();
                if let Ok(value) = HeaderValue::from_str(&encoded) {
                    headers.insert(
                        HeaderName::from_static("x-audit-log-reason"),
                        value,
                    );
                }
            }

            if outbound.body.is_some() {
                headers.insert(
                    hyper::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }

            for (name, value) in &outbound.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }

        let body = outbound.body.clone().unwrap_or_default();

        builder
            .body(body)
            .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))
    }
}

enum Retry {
    RateLimited { retry_after: Duration, completion: Completion },
    Retryable(Error),
    Fatal(Error),
}

/// A 429's real retry delay: the bucket's own `retry-after` header when
/// present, the global lockout's when it's a global 429, falling back to the
/// JSON body's `retry_after` field, and only then to a 1s guess.
fn retry_after_duration(headers: &RatelimitHeaders, body: &[u8]) -> Duration {
    let seconds = match headers {
        RatelimitHeaders::GlobalLimited(global) => Some(global.retry_after() as f64),
        RatelimitHeaders::Present(present) => present.retry_after().map(|secs| secs as f64),
        RatelimitHeaders::None => None,
    }
    .or_else(|| retry_after_from_body(body));

    seconds.map_or(Duration::from_secs(1), Duration::from_secs_f64)
}

fn retry_after_from_body(body: &[u8]) -> Option<f64> {
    #[derive(serde::Deserialize)]
    struct RetryAfterBody {
        retry_after: f64,
    }

    serde_json::from_slice::<RetryAfterBody>(body)
        .ok()
        .map(|parsed| parsed.retry_after)
}

fn header_pairs(response: &HyperResponse<HyperBody>) -> Vec<(String, Vec<u8>)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
        .collect()
}

#[cfg(feature = "rustls-native-roots")]
fn build_connector() -> HyperClient<Connector> {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .build();
    HyperClient::builder().build(https)
}

#[cfg(not(feature = "rustls-native-roots"))]
fn build_connector() -> HyperClient<Connector> {
    HyperClient::new()
}

#[cfg(test)]
mod tests {
    use super::{retry_after_duration, RetrySettings};
    use chatwire_ratelimiting::RatelimitHeaders;
    use std::time::Duration;

    #[test]
    fn default_retryable_statuses_match_spec() {
        let retry = RetrySettings::default();
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(retry.retryable_statuses.contains(&status));
        }
        assert!(!retry.retryable_statuses.contains(&404));
    }

    #[test]
    fn retry_after_falls_back_to_the_response_body() {
        let duration = retry_after_duration(&RatelimitHeaders::None, br#"{"retry_after":2.5}"#);
        assert_eq!(duration, Duration::from_secs_f64(2.5));
    }

    #[test]
    fn retry_after_defaults_to_one_second_when_nothing_is_parseable() {
        let duration = retry_after_duration(&RatelimitHeaders::None, b"not json");
        assert_eq!(duration, Duration::from_secs(1));
    }
}
