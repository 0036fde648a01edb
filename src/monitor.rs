// ABOUTME: HTTP collaborator for managing monitors, the server-side objects push sessions bind to
// ABOUTME: Talks to the web services API with reqwest; XML for requests, JSON for responses

use std::sync::Arc;

use serde::Deserialize;

use crate::config::PushConfig;
use crate::error::MonitorError;

/// Parameters for creating a monitor, mirroring the web service's `Monitor`
/// document fields.
#[derive(Debug, Clone)]
pub struct MonitorDescriptor {
    pub topics: Vec<String>,
    pub batch_size: u32,
    pub batch_duration: u32,
    pub compression: Compression,
    pub format: Format,
}

impl MonitorDescriptor {
    pub fn new(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        MonitorDescriptor {
            topics: topics.into_iter().map(Into::into).collect(),
            batch_size: 1,
            batch_duration: 0,
            compression: Compression::Gzip,
            format: Format::Json,
        }
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_duration(mut self, batch_duration: u32) -> Self {
        self.batch_duration = batch_duration;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    fn as_str(self) -> &'static str {
        match self {
            Format::Xml => "xml",
            Format::Json => "json",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MonitorListResponse {
    #[serde(rename = "resultSize")]
    result_size: String,
    items: Vec<MonitorItem>,
}

#[derive(Debug, Deserialize)]
struct MonitorItem {
    #[serde(rename = "monId")]
    mon_id: String,
}

/// Thin HTTP client over the `/ws/Monitor` resource.
pub struct MonitorClient {
    http: reqwest::Client,
    config: Arc<PushConfig>,
}

impl MonitorClient {
    pub fn new(config: Arc<PushConfig>) -> Self {
        MonitorClient { http: reqwest::Client::new(), config }
    }

    fn base_url(&self) -> String {
        let scheme = if self.config.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.config.hostname)
    }

    /// Build the XML `Monitor` document posted by [`Self::create_monitor`].
    /// Pulled out as a pure function so the request shape is unit-testable
    /// without a live server.
    fn create_body(descriptor: &MonitorDescriptor) -> String {
        format!(
            "<Monitor>\
             <monTopic>{}</monTopic>\
             <monBatchSize>{}</monBatchSize>\
             <monBatchDuration>{}</monBatchDuration>\
             <monFormatType>{}</monFormatType>\
             <monTransportType>tcp</monTransportType>\
             <monCompression>{}</monCompression>\
             </Monitor>",
            descriptor.topics.join(","),
            descriptor.batch_size,
            descriptor.batch_duration,
            descriptor.format.as_str(),
            descriptor.compression.as_str(),
        )
    }

    /// Create a monitor and return its assigned id.
    pub async fn create_monitor(&self, descriptor: &MonitorDescriptor) -> Result<u32, MonitorError> {
        let body = Self::create_body(descriptor);

        let response = self
            .http
            .post(format!("{}/ws/Monitor", self.base_url()))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;

        if response.status().as_u16() != 201 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::UnexpectedStatus { status, body });
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(MonitorError::MissingLocation)?;

        parse_location_monitor_id(location).ok_or(MonitorError::MalformedResponse)
    }

    /// Delete a monitor by id.
    pub async fn delete_monitor(&self, monitor_id: u32) -> Result<(), MonitorError> {
        let response = self
            .http
            .delete(format!("{}/ws/Monitor/{monitor_id}", self.base_url()))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::UnexpectedStatus { status, body });
        }
        Ok(())
    }

    /// Find an existing monitor matching `topics` exactly, returning its id
    /// if one exists.
    pub async fn get_monitor(&self, topics: &[String]) -> Result<Option<u32>, MonitorError> {
        let condition = format!("monTopic='{}'", topics.join(","));
        let response = self
            .http
            .get(format!("{}/ws/Monitor/.json", self.base_url()))
            .query(&[("condition", condition)])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != 200 {
            return Err(MonitorError::UnexpectedStatus { status, body });
        }

        parse_monitor_list_body(&body)
    }
}

/// Extract the trailing path segment of a `Location` header and parse it as
/// a monitor id.
fn parse_location_monitor_id(location: &str) -> Option<u32> {
    location.rsplit('/').next().and_then(|id| id.parse::<u32>().ok())
}

/// Parse a `GET /ws/Monitor/.json` response body, returning `None` when
/// `resultSize` is `"0"` and the first item's id otherwise.
fn parse_monitor_list_body(body: &str) -> Result<Option<u32>, MonitorError> {
    let parsed: MonitorListResponse = serde_json::from_str(body).map_err(|_| MonitorError::MalformedResponse)?;

    if parsed.result_size == "0" {
        return Ok(None);
    }

    let first = parsed.items.first().ok_or(MonitorError::MalformedResponse)?;
    first.mon_id.parse::<u32>().map(Some).map_err(|_| MonitorError::MalformedResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_renders_all_monitor_elements() {
        let descriptor = MonitorDescriptor::new(["DeviceCore[U]", "FileDataCore"])
            .batch_size(5)
            .batch_duration(60)
            .compression(Compression::None)
            .format(Format::Xml);

        let body = MonitorClient::create_body(&descriptor);

        assert_eq!(
            body,
            "<Monitor><monTopic>DeviceCore[U],FileDataCore</monTopic><monBatchSize>5</monBatchSize>\
             <monBatchDuration>60</monBatchDuration><monFormatType>xml</monFormatType>\
             <monTransportType>tcp</monTransportType><monCompression>none</monCompression></Monitor>"
        );
    }

    #[test]
    fn create_body_defaults_to_gzip_json() {
        let descriptor = MonitorDescriptor::new(["DeviceCore[U]"]);
        let body = MonitorClient::create_body(&descriptor);
        assert!(body.contains("<monFormatType>json</monFormatType>"));
        assert!(body.contains("<monCompression>gzip</monCompression>"));
    }

    #[test]
    fn location_header_yields_trailing_monitor_id() {
        assert_eq!(parse_location_monitor_id("https://host/ws/Monitor/12345"), Some(12345));
        assert_eq!(parse_location_monitor_id("12345"), Some(12345));
    }

    #[test]
    fn location_header_with_non_numeric_segment_is_malformed() {
        assert_eq!(parse_location_monitor_id("https://host/ws/Monitor/not-a-number"), None);
    }

    #[test]
    fn zero_result_size_yields_no_monitor() {
        let body = r#"{"resultSize":"0","items":[]}"#;
        assert_eq!(parse_monitor_list_body(body).unwrap(), None);
    }

    #[test]
    fn nonzero_result_size_yields_first_monitor_id() {
        let body = r#"{"resultSize":"1","items":[{"monId":"9001"},{"monId":"9002"}]}"#;
        assert_eq!(parse_monitor_list_body(body).unwrap(), Some(9001));
    }

    #[test]
    fn malformed_json_body_is_reported() {
        let err = parse_monitor_list_body("not json").unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse));
    }
}
