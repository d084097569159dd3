use crate::config::Config;
use crate::errors::{BvcError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;

const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Fetches text bodies for the scrapers
#[async_trait]
pub trait Transport {
    /// GET `url` and return the body.
    async fn get_text(&self, url: &str) -> Result<String>;

    /// POST `fields` as a urlencoded form to `url` and return the body.
    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<String>;
}

/// reqwest-backed transport with a per-instance rate limit and retry on
/// rate-limiting and transient failures
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            // ASP.NET 页面的会话依赖 cookie
            .cookie_store(true)
            .build()
            .map_err(BvcError::RequestError)?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            request_interval: config.request_interval,
            last_request: Mutex::new(None),
        })
    }

    // 等待请求频率限制
    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(time) = *last {
            let elapsed = time.elapsed();
            if elapsed < self.request_interval {
                let wait = self.request_interval - elapsed;
                debug!("Waiting {:?} before next request", wait);
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;

        loop {
            self.wait_for_rate_limit().await;

            match send_once(build(), url).await {
                Ok(body) => return Ok(body),
                Err((err, retry_after)) if err.is_transient() && attempt < self.max_retries => {
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(self.retry_backoff, attempt));
                    attempt += 1;
                    warn!(
                        "Request to {} failed ({}), retry {}/{} in {:?}",
                        url, err, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((err, _)) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        self.send_with_retry(url, || self.client.get(url)).await
    }

    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<String> {
        debug!("POST {} ({} form fields)", url, fields.len());
        self.send_with_retry(url, || self.client.post(url).form(fields)).await
    }
}

async fn send_once(
    request: RequestBuilder,
    url: &str,
) -> std::result::Result<String, (BvcError, Option<Duration>)> {
    let response = request.send().await.map_err(|e| (BvcError::RequestError(e), None))?;
    let status = response.status();

    if status == StatusCode::FORBIDDEN {
        return Err((BvcError::Blocked(url.to_string()), None));
    }

    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, SystemTime::now()));

        return Err((
            BvcError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            },
            retry_after,
        ));
    }

    response.text().await.map_err(|e| (BvcError::RequestError(e), None))
}

/// `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// `Retry-After` as delta-seconds or an HTTP date, capped at two minutes.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();

    let delay = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            let at = httpdate::parse_http_date(value).ok()?;
            at.duration_since(now).unwrap_or(Duration::ZERO)
        }
    };

    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
pub mod mock {
    //! In-memory transport answering from canned bodies.

    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Recorded {
        pub method: &'static str,
        pub url: String,
        pub fields: Vec<(String, String)>,
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Vec<(Option<&'static str>, String, String)>,
        pub requests: StdMutex<Vec<Recorded>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer any request whose URL contains `pattern` with `body`.
        pub fn route(mut self, pattern: &str, body: &str) -> Self {
            self.routes.push((None, pattern.to_string(), body.to_string()));
            self
        }

        /// Like [`route`](Self::route) but only for form posts.
        pub fn route_post(mut self, pattern: &str, body: &str) -> Self {
            self.routes.push((Some("POST"), pattern.to_string(), body.to_string()));
            self
        }

        pub fn recorded(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }

        fn answer(&self, method: &'static str, url: &str, fields: &[(String, String)]) -> Result<String> {
            self.requests.lock().unwrap().push(Recorded {
                method,
                url: url.to_string(),
                fields: fields.to_vec(),
            });

            self.routes
                .iter()
                .find(|(only, pattern, _)| {
                    only.map_or(true, |m| m == method) && url.contains(pattern.as_str())
                })
                .map(|(_, _, body)| body.clone())
                .ok_or_else(|| BvcError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get_text(&self, url: &str) -> Result<String> {
            self.answer("GET", url, &[])
        }

        async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<String> {
            self.answer("POST", url, fields)
        }
    }
}
