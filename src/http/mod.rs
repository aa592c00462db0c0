//! HTTP request interceptor and demo server.

mod identity;
mod layer;
mod response;
mod server;

pub use identity::{
    client_address, is_privileged, AuthenticatedUser, CallerIdentity, IdentityResolver,
    FORWARDED_FOR,
};
pub use layer::{Admission, Interceptor, InterceptorConfig, RateLimitLayer, RateLimitService, Target};
pub use response::{
    apply_rate_limit_headers, rejection, unavailable, RejectionBody, RATE_LIMIT_EXCEEDED,
    RATE_LIMIT_UNAVAILABLE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{router, HttpServer, StatusReport};
