// Live API Client Service
// Manages communication with the live-production backend

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    HtmlData, MediaData, MultiviewLayout, MultiviewSettings, MultiviewView, Production, StepReport,
};

const API_BASE_PATH: &str = "/api/v2";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Error from the live-production backend boundary. Non-2xx responses keep
/// the raw body so step messages can surface it verbatim.
#[derive(Debug, Error)]
pub enum LiveApiError {
    #[error("live backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to live backend failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl LiveApiError {
    /// Try to recover a structured step report from an error body
    pub fn step_report(&self) -> Option<StepReport> {
        match self {
            LiveApiError::Status { body, .. } => serde_json::from_str(body).ok(),
            LiveApiError::Transport(_) => None,
        }
    }
}

/// Request to provision one stream on one pipeline
#[derive(Debug, Clone, Serialize)]
pub struct CreateStreamRequest {
    pub ingest_name: String,
    pub ingest_source_name: String,
    pub pipeline_id: String,
    pub input_slot: u32,
    pub alignment_ms: u32,
    pub max_network_latency_ms: u32,
}

/// A stream created on the backend
#[derive(Debug, Clone, Deserialize)]
pub struct StreamCreated {
    pub stream_uuid: String,
    pub source_id: String,
}

/// Body of a stream delete. When the freed slot is still placed on a
/// multiview, the recomputed multiviews ride along so the backend can
/// update them in the same operation as the teardown.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteStreamRequest {
    #[serde(rename = "pipelineUUID")]
    pub pipeline_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiviews: Option<Vec<MultiviewSettings>>,
}

/// A multiview as reported by the backend for a pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineMultiview {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub layout: MultiviewLayout,
}

#[derive(Serialize)]
struct UpdateViewsBody<'a> {
    views: &'a [MultiviewView],
}

#[derive(Serialize)]
struct PatchStreamBody {
    alignment_ms: u32,
}

/// Client for the live-production backend REST API
pub struct LiveApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl LiveApiClient {
    /// Create a new client. `base_url` is the backend root without the
    /// API base path; `token` is sent as a bearer header on every call.
    pub fn new(base_url: String, token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_BASE_PATH, path)
    }

    /// Check if the live backend is reachable
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/"))
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, LiveApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LiveApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Provision a stream for one source on one pipeline
    pub async fn create_stream(
        &self,
        request: &CreateStreamRequest,
    ) -> Result<StreamCreated, LiveApiError> {
        let response = self
            .client
            .post(self.url("/streams"))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Tear down a stream. Returns the backend's step report; an empty
    /// 2xx body counts as a plain successful delete.
    pub async fn delete_stream(
        &self,
        stream_uuid: &str,
        request: &DeleteStreamRequest,
    ) -> Result<StepReport, LiveApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/streams/{stream_uuid}")))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let response = self.check(response).await?;
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(StepReport {
                success: true,
                steps: Vec::new(),
            });
        }
        serde_json::from_str(&text).map_err(|_| LiveApiError::Status {
            status: 200,
            body: text,
        })
    }

    /// Adjust the alignment of a running stream. The backend answers
    /// 204 No Content.
    pub async fn patch_stream(
        &self,
        stream_uuid: &str,
        alignment_ms: u32,
    ) -> Result<(), LiveApiError> {
        let response = self
            .client
            .patch(self.url(&format!("/streams/{stream_uuid}")))
            .bearer_auth(&self.token)
            .json(&PatchStreamBody { alignment_ms })
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    // =========================================================================
    // Multiviews (per pipeline)
    // =========================================================================

    /// List the multiviews currently running on a pipeline
    pub async fn get_multiviews(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<PipelineMultiview>, LiveApiError> {
        let response = self
            .client
            .get(self.url(&format!("/pipelines/{pipeline_id}/multiviews?expand=true")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Create a multiview on a pipeline. The output payload differs
    /// between SRT modes: a listener binds locally, a caller connects out
    /// and must not claim a local port.
    pub async fn create_multiview(
        &self,
        pipeline_id: &str,
        multiview: &MultiviewSettings,
    ) -> Result<PipelineMultiview, LiveApiError> {
        let output = &multiview.output;
        let output_payload = if output.srt_mode == "caller" {
            serde_json::json!({
                "frame_rate_n": output.frame_rate_n,
                "frame_rate_d": output.frame_rate_d,
                "local_ip": "0.0.0.0",
                "local_port": 0,
                "remote_ip": output.remote_ip,
                "remote_port": output.remote_port,
                "srt_mode": output.srt_mode,
                "srt_latency_ms": output.srt_latency_ms,
                "srt_passphrase": output.srt_passphrase,
                "video_format": output.video_format,
                "video_kilobit_rate": output.video_kilobit_rate,
            })
        } else {
            serde_json::json!({
                "frame_rate_n": output.frame_rate_n,
                "frame_rate_d": output.frame_rate_d,
                "local_ip": output.local_ip,
                "local_port": output.local_port,
                "srt_mode": output.srt_mode,
                "srt_latency_ms": output.srt_latency_ms,
                "srt_passphrase": output.srt_passphrase,
                "video_format": output.video_format,
                "video_kilobit_rate": output.video_kilobit_rate,
            })
        };
        let payload = serde_json::json!({
            "name": multiview.name,
            "layout": multiview.layout,
            "output": output_payload,
        });

        let response = self
            .client
            .post(self.url(&format!("/pipelines/{pipeline_id}/multiviews")))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Replace the full view array of a running multiview
    pub async fn update_multiview(
        &self,
        pipeline_id: &str,
        multiview_id: u32,
        views: &[MultiviewView],
    ) -> Result<(), LiveApiError> {
        log::info!("Updating multiview {multiview_id} for pipeline '{pipeline_id}'");
        let response = self
            .client
            .put(self.url(&format!(
                "/pipelines/{pipeline_id}/multiviews/{multiview_id}"
            )))
            .bearer_auth(&self.token)
            .json(&UpdateViewsBody { views })
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Remove a multiview from a pipeline
    pub async fn delete_multiview(
        &self,
        pipeline_id: &str,
        multiview_id: u32,
    ) -> Result<(), LiveApiError> {
        let response = self
            .client
            .delete(self.url(&format!(
                "/pipelines/{pipeline_id}/multiviews/{multiview_id}"
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    // =========================================================================
    // Rendering engine sources
    // =========================================================================

    /// Create an HTML browser source on a pipeline's rendering engine
    pub async fn create_html_source(
        &self,
        pipeline_id: &str,
        input_slot: u32,
        data: &HtmlData,
    ) -> Result<(), LiveApiError> {
        let payload = serde_json::json!({
            "url": data.url,
            "width": data.width,
            "height": data.height,
            "input_slot": input_slot,
        });
        let response = self
            .client
            .post(self.url(&format!("/pipelines/{pipeline_id}/renderingengine/html")))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Remove the HTML source bound to an input slot
    pub async fn delete_html_source(
        &self,
        pipeline_id: &str,
        input_slot: u32,
    ) -> Result<(), LiveApiError> {
        let response = self
            .client
            .delete(self.url(&format!(
                "/pipelines/{pipeline_id}/renderingengine/html/{input_slot}"
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Create a media player source on a pipeline's rendering engine
    pub async fn create_media_source(
        &self,
        pipeline_id: &str,
        input_slot: u32,
        data: &MediaData,
    ) -> Result<(), LiveApiError> {
        let payload = serde_json::json!({
            "filename": data.filename,
            "input_slot": input_slot,
        });
        let response = self
            .client
            .post(self.url(&format!("/pipelines/{pipeline_id}/renderingengine/media")))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Remove the media player source bound to an input slot
    pub async fn delete_media_source(
        &self,
        pipeline_id: &str,
        input_slot: u32,
    ) -> Result<(), LiveApiError> {
        let response = self
            .client
            .delete(self.url(&format!(
                "/pipelines/{pipeline_id}/renderingengine/media/{input_slot}"
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    // =========================================================================
    // Production workflow
    // =========================================================================

    /// Start the production workflow on the backend
    pub async fn start_production(
        &self,
        production: &Production,
    ) -> Result<StepReport, LiveApiError> {
        let response = self
            .client
            .post(self.url("/workflow/start"))
            .bearer_auth(&self.token)
            .json(production)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Stop the production workflow on the backend
    pub async fn stop_production(
        &self,
        production: &Production,
    ) -> Result<StepReport, LiveApiError> {
        let response = self
            .client
            .post(self.url("/workflow/stop"))
            .bearer_auth(&self.token)
            .json(production)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let client = LiveApiClient::new("http://127.0.0.1:8089".to_string(), String::new());
        assert_eq!(
            client.url("/streams/abc-123"),
            "http://127.0.0.1:8089/api/v2/streams/abc-123"
        );
    }

    #[test]
    fn test_multiview_url() {
        let client = LiveApiClient::new("http://live.example".to_string(), String::new());
        assert_eq!(
            client.url("/pipelines/p1/multiviews/3"),
            "http://live.example/api/v2/pipelines/p1/multiviews/3"
        );
    }

    #[test]
    fn test_error_body_recovers_step_report() {
        let err = LiveApiError::Status {
            status: 500,
            body: r#"{"success":false,"steps":[{"step":"delete_stream","success":false}]}"#
                .to_string(),
        };
        let report = err.step_report().unwrap();
        assert!(!report.success);
        assert_eq!(report.steps[0].step, "delete_stream");
    }

    #[test]
    fn test_error_body_without_structure() {
        let err = LiveApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(err.step_report().is_none());
    }
}
