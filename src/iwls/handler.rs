/// HTTP query plumbing for the IWLS client: structured responses, the
/// shared rate limiter, the retry policy and the optional disk cache.
///
/// Remote failures never raise. Every query resolves to a `Response`;
/// transport errors surface with status code 0 and the error message in
/// `errors`, so callers branch on `is_ok()` instead of unwinding.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Structured outcome of one API operation.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub data: Option<serde_json::Value>,
    pub message: Option<String>,
    pub errors: Vec<String>,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Response {
        Response {
            status_code: 200,
            data: Some(data),
            message: None,
            errors: Vec::new(),
        }
    }

    pub fn transport_failure(message: String) -> Response {
        Response {
            status_code: 0,
            data: None,
            message: Some(message.clone()),
            errors: vec![message],
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Data as a JSON array, empty when absent or of another shape.
    pub fn data_array(&self) -> &[serde_json::Value] {
        match &self.data {
            Some(serde_json::Value::Array(items)) => items,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter: at most `max_calls` acquisitions per
/// `period`. One instance is shared across every pool talking to the API,
/// so the process-wide request rate stays bounded no matter how many
/// workers fan out. `acquire` blocks the calling worker.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, period: Duration) -> RateLimiter {
        RateLimiter {
            max_calls: max_calls.max(1) as usize,
            period,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().expect("rate limiter lock");
                let now = Instant::now();
                while let Some(front) = timestamps.front() {
                    if now.duration_since(*front) >= self.period {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if timestamps.len() < self.max_calls {
                    timestamps.push_back(now);
                    None
                } else {
                    // Window is full; wait until the oldest call expires.
                    timestamps
                        .front()
                        .map(|front| self.period.saturating_sub(now.duration_since(*front)))
                }
            };

            match wait {
                None => return,
                Some(delay) => std::thread::sleep(delay.max(Duration::from_millis(1))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Statuses retried with exponential backoff, matching the upstream
/// service's throttling and transient-failure codes.
pub const RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Upper bound of the uniform jitter added to each backoff, seconds.
    pub max_jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            backoff_factor: 2.0,
            max_jitter: 3.0,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry_status(&self, status: u16) -> bool {
        RETRY_STATUS_CODES.contains(&status)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_factor * f64::from(1u32 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0.0..self.max_jitter);
        Duration::from_secs_f64(base + jitter)
    }
}

// ---------------------------------------------------------------------------
// Disk response cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status_code: u16,
    data: serde_json::Value,
}

/// Disk-backed cache for successful GETs, keyed by URL + query string.
/// Give each API profile its own directory so cached payloads from one
/// flavour never answer for another.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    directory: PathBuf,
    ttl: Duration,
}

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

impl ResponseCache {
    pub fn new(directory: PathBuf, ttl: Duration) -> ResponseCache {
        ResponseCache { directory, ttl }
    }

    fn entry_path(&self, url: &str, params: &[(String, String)]) -> PathBuf {
        let mut canonical = url.to_string();
        for (key, value) in params {
            canonical.push('&');
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(&urlencoding::encode(value));
        }

        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        self.directory.join(format!("{:016x}.json", hasher.finish()))
    }

    pub fn get(&self, url: &str, params: &[(String, String)]) -> Option<Response> {
        let path = self.entry_path(url, params);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        if age >= self.ttl {
            return None;
        }

        let contents = fs::read_to_string(&path).ok()?;
        let cached: CachedResponse = serde_json::from_str(&contents).ok()?;
        debug!("cache hit for {url}");
        Some(Response {
            status_code: cached.status_code,
            data: Some(cached.data),
            message: None,
            errors: Vec::new(),
        })
    }

    pub fn put(&self, url: &str, params: &[(String, String)], response: &Response) {
        if !response.is_ok() {
            return;
        }
        let Some(data) = &response.data else {
            return;
        };

        if let Err(error) = fs::create_dir_all(&self.directory) {
            warn!("response cache unavailable: {error}");
            return;
        }

        let entry = CachedResponse {
            status_code: response.status_code,
            data: data.clone(),
        };
        let path = self.entry_path(url, params);
        match serde_json::to_string(&entry) {
            Ok(serialized) => {
                if let Err(error) = fs::write(&path, serialized) {
                    warn!("failed to write cache entry {}: {error}", path.display());
                }
            }
            Err(error) => warn!("failed to serialize cache entry: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Query handler
// ---------------------------------------------------------------------------

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Rate-limited, retrying GET executor shared by every API operation.
#[derive(Clone)]
pub struct QueryHandler {
    client: reqwest::blocking::Client,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
}

impl QueryHandler {
    pub fn new(calls: u32, period: Duration) -> Result<QueryHandler, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        debug!(
            "query handler limited to {calls} requests per {}s",
            period.as_secs_f64()
        );

        Ok(QueryHandler {
            client,
            rate_limiter: Arc::new(RateLimiter::new(calls, period)),
            retry: RetryPolicy::default(),
            cache: None,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> QueryHandler {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> QueryHandler {
        self.cache = Some(cache);
        self
    }

    /// Performs one GET: cache probe, rate-limit acquire, send, retry on
    /// throttling/transient statuses and transport errors.
    pub fn query(&self, url: &str, params: &[(String, String)]) -> Response {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(url, params) {
                return cached;
            }
        }

        let mut last_failure: Option<Response> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.backoff_delay(attempt - 1);
                debug!("retry {attempt} for {url} after {:.1}s", delay.as_secs_f64());
                std::thread::sleep(delay);
            }

            self.rate_limiter.acquire();

            match self.client.get(url).query(params).send() {
                Ok(http_response) => {
                    let status = http_response.status().as_u16();
                    let response = decode_response(url, status, http_response);

                    if response.is_ok() {
                        if let Some(cache) = &self.cache {
                            cache.put(url, params, &response);
                        }
                        return response;
                    }

                    if !self.retry.should_retry_status(status) {
                        return response;
                    }
                    warn!("status {status} from {url}, will retry");
                    last_failure = Some(response);
                }
                Err(error) => {
                    warn!("transport error for {url}: {error}");
                    last_failure = Some(Response::transport_failure(error.to_string()));
                }
            }
        }

        last_failure.unwrap_or_else(|| {
            Response::transport_failure(format!("request to {url} failed without a response"))
        })
    }
}

fn decode_response(url: &str, status: u16, http_response: reqwest::blocking::Response) -> Response {
    let body = http_response.text().unwrap_or_default();

    if (200..300).contains(&status) {
        debug!("status {status}: {url}");
        let data = match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            // Some endpoints answer plain text; carry it as-is.
            Err(_) => Some(serde_json::Value::String(body)),
        };
        return Response {
            status_code: status,
            data,
            message: None,
            errors: Vec::new(),
        };
    }

    let mut message = None;
    let mut errors = Vec::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&body) {
        message = map
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(code) = map.get("code").and_then(|v| v.as_str()) {
            errors.push(code.to_string());
        }
        if let Some(serde_json::Value::Array(items)) = map.get("errors") {
            errors.extend(items.iter().filter_map(|v| v.as_str()).map(str::to_string));
        }
    }

    warn!(
        "status {status}: {} - {url}",
        message.as_deref().unwrap_or("Unknown error")
    );

    Response {
        status_code: status,
        data: None,
        message,
        errors,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
