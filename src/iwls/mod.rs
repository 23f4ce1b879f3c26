/// CHS IWLS tide-gauge API client.
///
/// Split by concern:
///   endpoint — the two API flavours (public/private) and their URL
///              templates
///   handler  — rate-limited, retrying, optionally disk-cached HTTP GETs
///   cache    — TTL-expiring in-memory cache for metadata lookups
///   api      — typed operations: stations, metadata, windowed
///              time-series retrieval with concurrent aggregation
///
/// The client never raises for remote failures: every operation returns a
/// structured `Response` whose `is_ok` and `errors` the caller inspects.

pub mod api;
pub mod cache;
pub mod endpoint;
pub mod handler;

pub use api::{ApiParameterError, IwlsApi};
pub use endpoint::{Endpoint, EndpointKind};
pub use handler::{QueryHandler, RateLimiter, Response, ResponseCache, RetryPolicy};
