//! The request/response/error middleware pipeline (§4.3): a classical onion
//! model assembled fresh for each call from a priority-sorted snapshot of
//! the registry, so stages registered mid-flight never apply to calls
//! already in progress.

use crate::error::Error;
use hyper::{Request as HyperRequest, Response};
use std::{cmp::Reverse, future::Future, pin::Pin, sync::Arc};

/// A fully buffered HTTP body, passed between stages.
pub type Body = Vec<u8>;

/// What a request stage may do: pass the (possibly modified) request on, or
/// short-circuit with a synthesized response.
pub enum RequestOutcome {
    Continue(HyperRequest<Body>),
    ShortCircuit(Response<Body>),
}

/// What an error stage may do: recover with a synthesized response, or let
/// the error keep propagating outward.
pub enum ErrorOutcome {
    Recovered(Response<Body>),
    Propagate(Error),
}

type RequestFuture = Pin<Box<dyn Future<Output = RequestOutcome> + Send>>;
type ResponseFuture = Pin<Box<dyn Future<Output = Response<Body>> + Send>>;
type ErrorFuture = Pin<Box<dyn Future<Output = ErrorOutcome> + Send>>;

/// A single stage in the pipeline.
pub enum Stage {
    Request {
        name: &'static str,
        priority: u8,
        enabled: bool,
        run: Arc<dyn Fn(HyperRequest<Body>) -> RequestFuture + Send + Sync>,
    },
    Response {
        name: &'static str,
        priority: u8,
        enabled: bool,
        run: Arc<dyn Fn(Response<Body>) -> ResponseFuture + Send + Sync>,
    },
    Error {
        name: &'static str,
        priority: u8,
        enabled: bool,
        run: Arc<dyn Fn(Error) -> ErrorFuture + Send + Sync>,
    },
}

impl Stage {
    const fn priority(&self) -> u8 {
        match self {
            Self::Request { priority, .. }
            | Self::Response { priority, .. }
            | Self::Error { priority, .. } => *priority,
        }
    }

    const fn enabled(&self) -> bool {
        match self {
            Self::Request { enabled, .. }
            | Self::Response { enabled, .. }
            | Self::Error { enabled, .. } => *enabled,
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Request { name, .. } | Self::Response { name, .. } | Self::Error { name, .. } => {
                name
            }
        }
    }
}

/// The registry of configured stages. Cloning is cheap (each stage's
/// closure is behind an `Arc`); [`Pipeline::snapshot`] captures the current
/// set for one call.
#[derive(Clone, Default)]
pub struct Registry {
    stages: Vec<Arc<Stage>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Stage) {
        self.stages.push(Arc::new(stage));
    }

    /// Capture a priority-sorted, enabled-only snapshot for one call.
    #[must_use]
    pub fn snapshot(&self) -> Pipeline {
        let mut stages: Vec<_> = self
            .stages
            .iter()
            .filter(|stage| stage.enabled())
            .cloned()
            .collect();

        stages.sort_by_key(|stage| Reverse(stage.priority()));

        Pipeline { stages }
    }
}

/// A snapshot of enabled stages, sorted descending by priority, ready to run
/// for exactly one call.
pub struct Pipeline {
    stages: Vec<Arc<Stage>>,
}

impl Pipeline {
    /// Run every request stage over `request`, stopping early on the first
    /// short-circuit.
    pub async fn run_request(&self, mut request: HyperRequest<Body>) -> RequestOutcome {
        for stage in &self.stages {
            if let Stage::Request { run, .. } = stage.as_ref() {
                match run(request).await {
                    RequestOutcome::Continue(next) => request = next,
                    outcome @ RequestOutcome::ShortCircuit(_) => return outcome,
                }
            }
        }

        RequestOutcome::Continue(request)
    }

    /// Run every response stage over `response`, in priority order.
    pub async fn run_response(&self, mut response: Response<Body>) -> Response<Body> {
        for stage in &self.stages {
            if let Stage::Response { run, .. } = stage.as_ref() {
                response = run(response).await;
            }
        }

        response
    }

    /// Offer `error` to each error stage in turn, in priority order; the
    /// first that recovers wins. If none recover, the original error (with
    /// its classification intact) is returned.
    pub async fn run_error(&self, mut error: Error) -> ErrorOutcome {
        for stage in &self.stages {
            if let Stage::Error { run, name, .. } = stage.as_ref() {
                match run(error).await {
                    recovered @ ErrorOutcome::Recovered(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(stage = name, "error stage recovered");
                        #[cfg(not(feature = "tracing"))]
                        let _ = name;

                        return recovered;
                    }
                    ErrorOutcome::Propagate(next) => error = next,
                }
            }
        }

        ErrorOutcome::Propagate(error)
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorOutcome, Registry, RequestOutcome, Stage};
    use crate::error::{Error, ErrorType};
    use hyper::{Request, Response};
    use std::sync::Arc;

    #[tokio::test]
    async fn stages_run_in_descending_priority_order() {
        let mut registry = Registry::new();

        registry.register(Stage::Request {
            name: "low",
            priority: 1,
            enabled: true,
            run: Arc::new(|request| {
                Box::pin(async move {
                    let (mut parts, body) = request.into_parts();
                    parts.headers.append("x-order", "low".parse().unwrap());
                    RequestOutcome::Continue(Request::from_parts(parts, body))
                })
            }),
        });
        registry.register(Stage::Request {
            name: "high",
            priority: 10,
            enabled: true,
            run: Arc::new(|request| {
                Box::pin(async move {
                    let (mut parts, body) = request.into_parts();
                    parts.headers.append("x-order", "high".parse().unwrap());
                    RequestOutcome::Continue(Request::from_parts(parts, body))
                })
            }),
        });

        let pipeline = registry.snapshot();
        let request = Request::builder().body(Vec::new()).unwrap();

        let RequestOutcome::Continue(request) = pipeline.run_request(request).await else {
            panic!("expected continue");
        };

        let order: Vec<_> = request
            .headers()
            .get_all("x-order")
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();

        assert_eq!(order, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn disabled_stage_is_skipped() {
        let mut registry = Registry::new();

        registry.register(Stage::Response {
            name: "disabled",
            priority: 50,
            enabled: false,
            run: Arc::new(|response| {
                Box::pin(async move {
                    let (mut parts, body) = response.into_parts();
                    parts.status = hyper::StatusCode::IM_A_TEAPOT;
                    Response::from_parts(parts, body)
                })
            }),
        });

        let pipeline = registry.snapshot();
        let response = Response::builder().body(Vec::new()).unwrap();
        let response = pipeline.run_response(response).await;

        assert_eq!(response.status(), hyper::StatusCode::OK);
    }

    #[tokio::test]
    async fn first_recovering_error_stage_wins() {
        let mut registry = Registry::new();

        registry.register(Stage::Error {
            name: "never-recovers",
            priority: 90,
            enabled: true,
            run: Arc::new(|error| Box::pin(async move { ErrorOutcome::Propagate(error) })),
        });
        registry.register(Stage::Error {
            name: "recovers",
            priority: 10,
            enabled: true,
            run: Arc::new(|_error| {
                Box::pin(async move {
                    ErrorOutcome::Recovered(Response::builder().body(Vec::new()).unwrap())
                })
            }),
        });

        let pipeline = registry.snapshot();
        let outcome = pipeline
            .run_error(Error::new(ErrorType::Network))
            .await;

        assert!(matches!(outcome, ErrorOutcome::Recovered(_)));
    }
}
