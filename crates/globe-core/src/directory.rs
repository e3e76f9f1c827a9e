//! radio-browser directory client.
//!
//! One read-only bulk call: `GET {mirror}/json/stations/search`, ordered by
//! votes descending with broken streams hidden.  Entries come back as raw JSON
//! values so that one malformed entry cannot fail the whole payload; the
//! catalog decides what is usable.

use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DirectoryConfig;
use crate::error::FetchError;

pub const SEARCH_PATH: &str = "/json/stations/search";

pub struct DirectoryClient {
    http: reqwest::Client,
    config: DirectoryConfig,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Query string for the search call.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("limit", self.config.limit.to_string()),
            ("hidebroken", self.config.hide_broken.to_string()),
            ("order", self.config.order.clone()),
            ("reverse", self.config.reverse.to_string()),
        ]
    }

    pub fn search_url(base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), SEARCH_PATH)
    }

    /// Random mirror, spreading load the way radio-browser asks clients to.
    pub fn pick_mirror(&self) -> Option<&str> {
        self.config
            .mirrors
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// Fetch the station list from a random mirror.
    pub async fn fetch_stations(&self) -> Result<Vec<Value>, FetchError> {
        let base = self.pick_mirror().ok_or(FetchError::NoMirror)?;
        self.fetch_from(base).await
    }

    pub async fn fetch_from(&self, base: &str) -> Result<Vec<Value>, FetchError> {
        let url = Self::search_url(base);
        info!("directory: fetching stations from {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&self.query())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        debug!("directory: received {} bytes", body.len());
        let entries = decode_station_list(&body)?;
        info!("directory: {} raw entries", entries.len());
        Ok(entries)
    }
}

/// The payload must be a JSON array; its elements are kept as-is.
pub fn decode_station_list(body: &[u8]) -> Result<Vec<Value>, FetchError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(entries)) => Ok(entries),
        Ok(other) => Err(FetchError::Decode(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(FetchError::Decode(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response and hand back the request head.
    async fn one_shot_server(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });
        (base, handle)
    }

    fn client() -> DirectoryClient {
        DirectoryClient::new(DirectoryConfig::default()).unwrap()
    }

    #[test]
    fn test_query_matches_config() {
        let q = client().query();
        assert_eq!(
            q,
            vec![
                ("limit", "1000".to_string()),
                ("hidebroken", "true".to_string()),
                ("order", "votes".to_string()),
                ("reverse", "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_search_url_trims_slash() {
        assert_eq!(
            DirectoryClient::search_url("https://de1.api.radio-browser.info/"),
            "https://de1.api.radio-browser.info/json/stations/search"
        );
    }

    #[test]
    fn test_pick_mirror() {
        let c = client();
        let picked = c.pick_mirror().unwrap();
        assert!(c.config().mirrors.iter().any(|m| m == picked));

        let empty = DirectoryClient::new(DirectoryConfig {
            mirrors: Vec::new(),
            ..DirectoryConfig::default()
        })
        .unwrap();
        assert!(empty.pick_mirror().is_none());
    }

    #[test]
    fn test_decode_station_list() {
        let entries = decode_station_list(br#"[{"name":"a"}, 3, null]"#).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(
            decode_station_list(br#"{"error":"nope"}"#),
            Err(FetchError::Decode(msg)) if msg.contains("an object")
        ));
        assert!(matches!(decode_station_list(b"<html>"), Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_from_sends_query_and_decodes() {
        let body = r#"[
            {"stationuuid":"1","name":"One","country":"Chile","geo_lat":-33.4,"geo_long":-70.6,"url_resolved":"http://one"},
            {"stationuuid":"2","name":"Two","country":"Chile","geo_lat":null,"geo_long":null,"url_resolved":"http://two"}
        ]"#;
        let (base, server) = one_shot_server("200 OK", body.to_string()).await;

        let entries = client().fetch_from(&base).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(crate::catalog::ingest(entries).len(), 1);

        let head = server.await.unwrap();
        let request_line = head.lines().next().unwrap();
        assert!(request_line.starts_with("GET /json/stations/search?"));
        assert!(request_line.contains("limit=1000"));
        assert!(request_line.contains("hidebroken=true"));
        assert!(request_line.contains("order=votes"));
        assert!(request_line.contains("reverse=true"));
        assert!(head.to_lowercase().contains("user-agent: radio-globe/"));
    }

    #[tokio::test]
    async fn test_fetch_from_reports_http_status() {
        let (base, server) = one_shot_server("503 Service Unavailable", "[]".to_string()).await;
        let err = client().fetch_from(&base).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_without_mirrors_fails_cleanly() {
        let c = DirectoryClient::new(DirectoryConfig {
            mirrors: Vec::new(),
            ..DirectoryConfig::default()
        })
        .unwrap();
        assert!(matches!(c.fetch_stations().await, Err(FetchError::NoMirror)));
    }
}
