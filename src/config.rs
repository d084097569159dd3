use chrono::NaiveDate;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct Config {
    pub medias24_base_url: String,
    pub bourse_base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub request_interval: Duration,
    pub history_start: NaiveDate,
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            medias24_base_url: "https://medias24.com/content/api".to_string(),
            bourse_base_url: "https://www.casablanca-bourse.com/bourseweb".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            request_interval: Duration::from_millis(500),
            // 价格历史接口最早的可用日期
            history_start: NaiveDate::from_ymd_opt(2011, 9, 18).unwrap_or_default(),
            data_dir: "data".to_string(),
        }
    }

    pub fn with_medias24_base_url(mut self, url: &str) -> Self {
        self.medias24_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_bourse_base_url(mut self, url: &str) -> Self {
        self.bourse_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_history_start(mut self, start: NaiveDate) -> Self {
        self.history_start = start;
        self
    }

    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = dir.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new()
            .with_medias24_base_url("http://localhost:8080/api/")
            .with_max_retries(0)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.medias24_base_url, "http://localhost:8080/api");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.history_start, NaiveDate::from_ymd_opt(2011, 9, 18).unwrap());
    }
}
