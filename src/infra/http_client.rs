use crate::app::ports::HttpClientPort;
use std::time::Duration;

/// Blocking reqwest client carrying the fetcher's user agent.
pub struct ReqwestHttp {
    client: reqwest::blocking::Client,
}

impl ReqwestHttp {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClientPort for ReqwestHttp {
    fn get(&self, url: &str, timeout: Duration) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        resp.text().map_err(|e| e.to_string())
    }
}
