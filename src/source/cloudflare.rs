use super::{ByteStream, LogSource, SourceError};
use crate::config::types::{AuthConfig, SourceConfig};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH};

/// Client for the zone request-log endpoint of the Enterprise Log Share API.
#[derive(Debug, Clone)]
pub struct CloudflareSource {
    api_base: String,
    client: reqwest::Client,
}

impl CloudflareSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        for (name, value) in auth_headers(&config.auth) {
            let mut value = HeaderValue::from_str(&value).map_err(|e| {
                SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid {name} header value: {e}"),
                ))
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn logs_url(&self, zone: &str) -> String {
        format!("{}/client/v4/zones/{}/logs/requests", self.api_base, zone)
    }
}

fn auth_headers(auth: &AuthConfig) -> Vec<(&'static str, String)> {
    match auth {
        AuthConfig::ServiceKey { service_key } => {
            vec![("x-user-service-key", service_key.clone())]
        }
        AuthConfig::ApiKey { api_key, email } => vec![
            ("x-auth-key", api_key.clone()),
            ("x-auth-email", email.clone()),
        ],
    }
}

#[async_trait]
impl LogSource for CloudflareSource {
    async fn fetch(&self, zone: &str, start: i64, end: i64) -> Result<ByteStream, SourceError> {
        let response = self
            .client
            .get(self.logs_url(zone))
            .query(&[("start", start), ("end", end)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let declared_empty = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");
        if declared_empty {
            return Err(SourceError::NoData);
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(tokio_util::io::StreamReader::new(Box::pin(stream))))
    }
}
