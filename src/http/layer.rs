//! Tower middleware that enforces rate limits on HTTP requests.
//!
//! Each request is classified, then decided, and ends either forwarded to
//! the inner service (with `X-RateLimit-*` headers on the way out) or
//! rejected with a 429.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, debug_span, error, instrument, warn, Instrument};

use crate::config::{RateLimitSettings, StorageFailurePolicy};
use crate::error::StoreError;
use crate::ratelimit::{CategoryRules, Decision, RateLimiter};

use super::identity::{is_privileged, AuthenticatedUser, CallerIdentity, IdentityResolver};
use super::response;

/// Per-request settings for the interceptor.
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// When false every request is forwarded untouched
    pub enabled: bool,
    /// Path prefixes that skip rate limiting entirely
    pub excluded_paths: Vec<String>,
    /// Path prefixes where privileged callers get the multiplier
    pub admin_paths: Vec<String>,
    /// Role value that marks a caller as privileged
    pub admin_role: String,
    /// Endpoint classification rules
    pub rules: CategoryRules,
    /// Behaviour when the counter store fails
    pub on_storage_error: StorageFailurePolicy,
}

impl InterceptorConfig {
    /// Build from loaded settings and classification rules.
    pub fn from_settings(settings: &RateLimitSettings, rules: CategoryRules) -> Self {
        Self {
            enabled: settings.enabled,
            excluded_paths: settings.excluded_paths.clone(),
            admin_paths: settings.admin_paths.clone(),
            admin_role: settings.admin_role.clone(),
            rules,
            on_storage_error: settings.on_storage_error,
        }
    }

    /// Whether `path` bypasses rate limiting.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self::from_settings(&RateLimitSettings::default(), CategoryRules::builtin())
    }
}

/// Rate limit inputs derived from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Caller identity key
    pub subject: String,
    /// Endpoint category
    pub category: String,
    /// Whether the privileged multiplier applies
    pub privileged: bool,
}

/// What the interceptor decided for one request.
#[derive(Debug)]
pub enum Admission {
    /// Within quota
    Forward(Decision),
    /// Over quota
    Reject(Decision),
    /// The counter store failed
    StoreFailed(StoreError),
}

/// Derives rate limit inputs from requests and asks the limiter.
pub struct Interceptor {
    limiter: Arc<RateLimiter>,
    config: InterceptorConfig,
    resolver: Option<Arc<dyn IdentityResolver>>,
}

impl Interceptor {
    /// Create an interceptor without an identity resolver.
    pub fn new(limiter: Arc<RateLimiter>, config: InterceptorConfig) -> Self {
        Self {
            limiter,
            config,
            resolver: None,
        }
    }

    /// Derive the rate limit target for `request`.
    ///
    /// Returns `None` when rate limiting is off or the path is excluded.
    pub fn classify(&self, request: &Request) -> Option<Target> {
        let path = request.uri().path();
        if !self.config.enabled || self.config.is_excluded(path) {
            return None;
        }

        let category = self.config.rules.classify(path).to_string();
        let identity = CallerIdentity::from_request(request, self.resolver.as_deref());
        let privileged = is_privileged(
            path,
            request.extensions().get::<AuthenticatedUser>(),
            &self.config.admin_paths,
            &self.config.admin_role,
        );

        debug!(
            subject = %identity.key,
            category = %category,
            privileged,
            "Classified request"
        );

        Some(Target {
            subject: identity.key,
            category,
            privileged,
        })
    }

    /// Ask the limiter whether `target` may proceed.
    #[instrument(level = "debug", skip(self))]
    pub async fn decide(&self, target: &Target) -> Admission {
        match self
            .limiter
            .check(&target.subject, &target.category, target.privileged, None)
            .await
        {
            Ok(decision) if decision.allowed => Admission::Forward(decision),
            Ok(decision) => Admission::Reject(decision),
            Err(err) => Admission::StoreFailed(err),
        }
    }

    /// The limiter behind this interceptor.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The interceptor settings.
    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }
}

/// Layer that wraps services with [`RateLimitService`].
#[derive(Clone)]
pub struct RateLimitLayer {
    interceptor: Arc<Interceptor>,
}

impl RateLimitLayer {
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<RateLimiter>, config: InterceptorConfig) -> Self {
        Self {
            interceptor: Arc::new(Interceptor::new(limiter, config)),
        }
    }

    /// Name callers with `resolver` before falling back to the request's
    /// [`AuthenticatedUser`] or address.
    pub fn with_identity_resolver<R>(self, resolver: R) -> Self
    where
        R: IdentityResolver + 'static,
    {
        let interceptor = Interceptor {
            limiter: Arc::clone(&self.interceptor.limiter),
            config: self.interceptor.config.clone(),
            resolver: Some(Arc::new(resolver)),
        };
        Self {
            interceptor: Arc::new(interceptor),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

/// Rate limiting service.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Use the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = Arc::clone(&self.interceptor);

        let span = debug_span!(
            "rate_limit",
            method = %request.method(),
            path = %request.uri().path()
        );

        Box::pin(
            async move {
                let Some(target) = interceptor.classify(&request) else {
                    return inner.call(request).await;
                };

                match interceptor.decide(&target).await {
                    Admission::Forward(decision) => {
                        let mut response = inner.call(request).await?;
                        response::apply_rate_limit_headers(response.headers_mut(), &decision);
                        Ok(response)
                    }
                    Admission::Reject(decision) => {
                        let now = interceptor.limiter().clock().now();
                        Ok(response::rejection(&decision, now))
                    }
                    Admission::StoreFailed(err) => match interceptor.config().on_storage_error {
                        StorageFailurePolicy::Open => {
                            warn!(error = %err, "Counter store failed, forwarding request");
                            inner.call(request).await
                        }
                        StorageFailurePolicy::Closed => {
                            error!(error = %err, "Counter store failed, rejecting request");
                            Ok(response::unavailable())
                        }
                    },
                }
            }
            .instrument(span),
        )
    }
}
