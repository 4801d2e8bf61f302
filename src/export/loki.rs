//! Loki push API client

use super::job::ExportJob;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("aggregator returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Destination of exported batches
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn push(&self, jobs: &[ExportJob]) -> Result<(), ExportError>;
}

#[derive(Debug, Serialize)]
struct PushRequest {
    streams: Vec<Stream>,
}

#[derive(Debug, Serialize)]
struct Stream {
    stream: BTreeMap<&'static str, String>,
    values: Vec<[String; 2]>,
}

/// Build the push body, grouping jobs with identical label sets into one stream
fn build_push_request(jobs: &[ExportJob]) -> PushRequest {
    let mut grouped: BTreeMap<BTreeMap<&'static str, String>, Vec<[String; 2]>> = BTreeMap::new();

    for job in jobs {
        grouped
            .entry(job.labels())
            .or_default()
            .push([job.timestamp_ns.to_string(), job.message.clone()]);
    }

    PushRequest {
        streams: grouped
            .into_iter()
            .map(|(stream, values)| Stream { stream, values })
            .collect(),
    }
}

/// Sends batches to `POST <loki_url>` as JSON
#[derive(Clone)]
pub struct LokiClient {
    http_client: reqwest::Client,
    url: String,
}

impl LokiClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl JobSink for LokiClient {
    async fn push(&self, jobs: &[ExportJob]) -> Result<(), ExportError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let body = build_push_request(jobs);
        let response = self.http_client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status { status, body });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Severity;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn job(message: &str, span_id: &str) -> ExportJob {
        ExportJob {
            severity: Severity::Info,
            message: message.to_string(),
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: span_id.to_string(),
            job: "test-job".to_string(),
            service: "test-service".to_string(),
            timestamp_ns: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn test_push_request_groups_by_labels() {
        let jobs = vec![
            job("first", "b7ad6b7169203331"),
            job("second", "b7ad6b7169203331"),
            job("third", "00f067aa0ba902b7"),
        ];

        let body = serde_json::to_value(build_push_request(&jobs)).unwrap();
        let streams = body["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);

        let grouped = streams
            .iter()
            .find(|s| s["stream"]["span_id"] == "b7ad6b7169203331")
            .unwrap();
        assert_eq!(grouped["stream"]["level"], "info");
        assert_eq!(grouped["stream"]["job"], "test-job");
        assert_eq!(grouped["stream"]["service"], "test-service");
        assert_eq!(grouped["values"][0][0], "1700000000000000000");
        assert_eq!(grouped["values"][0][1], "first");
        assert_eq!(grouped["values"][1][1], "second");
    }

    #[tokio::test]
    async fn test_loki_client_pushes_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = LokiClient::new(
            format!("{}/loki/api/v1/push", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        client.push(&[job("hello", "b7ad6b7169203331")]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["streams"][0]["values"][0][1], "hello");
    }

    #[tokio::test]
    async fn test_loki_client_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("ingester unavailable"))
            .mount(&server)
            .await;

        let client = LokiClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.push(&[job("hello", "b7ad6b7169203331")]).await.unwrap_err();

        match err {
            ExportError::Status { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "ingester unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = LokiClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        client.push(&[]).await.unwrap();
    }
}
