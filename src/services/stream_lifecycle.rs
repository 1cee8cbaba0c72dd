// Stream Lifecycle Manager
// Orchestrates creation and teardown of backend streams tied to a
// production source, including the multiview updates that must accompany
// a stream change

use std::sync::Arc;

use futures_util::future::join_all;

use crate::models::{
    AddStreamResult, HtmlData, IngestSource, MediaData, MultiviewSettings, PipelineSettings,
    SourceReference, StepReport, StreamPair, TeardownOutcome, WorkflowStep,
};
use crate::services::live_client::{
    CreateStreamRequest, DeleteStreamRequest, LiveApiClient, LiveApiError,
};
use crate::services::view_sync::{clear_slot_views, slot_is_placed, MultiviewSynchronizer};

pub struct StreamLifecycleManager {
    client: Arc<LiveApiClient>,
    synchronizer: MultiviewSynchronizer,
}

impl StreamLifecycleManager {
    pub fn new(client: Arc<LiveApiClient>) -> Self {
        let synchronizer = MultiviewSynchronizer::new(client.clone());
        Self {
            client,
            synchronizer,
        }
    }

    pub fn synchronizer(&self) -> &MultiviewSynchronizer {
        &self.synchronizer
    }

    // =========================================================================
    // Ingest streams
    // =========================================================================

    /// Provision a source on every pipeline of the production.
    ///
    /// The same logical source must exist identically on each redundant
    /// pipeline, so creation is all-or-nothing: the per-pipeline requests
    /// fire concurrently, and if any fails the streams that did come up
    /// are deleted again before the aggregate failure is returned.
    pub async fn create_stream(
        &self,
        source: &IngestSource,
        pipelines: &[PipelineSettings],
        input_slot: u32,
    ) -> AddStreamResult {
        let targets: Vec<&PipelineSettings> = pipelines
            .iter()
            .filter(|p| p.pipeline_id.is_some())
            .collect();
        if targets.is_empty() {
            return AddStreamResult {
                success: false,
                steps: vec![WorkflowStep::failed(
                    "add_stream",
                    "production has no pipelines with a backend identity",
                )],
                streams: Vec::new(),
            };
        }

        let requests = targets.iter().map(|pipeline| {
            let request = CreateStreamRequest {
                ingest_name: source.ingest_name.clone(),
                ingest_source_name: source.ingest_source_name.clone(),
                pipeline_id: pipeline.pipeline_id.clone().unwrap_or_default(),
                input_slot,
                alignment_ms: pipeline.alignment_ms,
                max_network_latency_ms: pipeline.max_network_latency_ms,
            };
            async move { self.client.create_stream(&request).await }
        });
        let results = join_all(requests).await;

        let mut streams = Vec::new();
        let mut first_error: Option<LiveApiError> = None;
        for result in results {
            match result {
                Ok(created) => streams.push(StreamPair {
                    source_id: created.source_id,
                    stream_uuid: created.stream_uuid,
                }),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        let error = match first_error {
            None => {
                return AddStreamResult {
                    success: true,
                    steps: vec![WorkflowStep::ok("add_stream")],
                    streams,
                };
            }
            Some(error) => error,
        };

        // Compensate: the pipelines that did succeed must not keep a
        // stream the production will never reference.
        let pipeline_uuid = targets[0].pipeline_id.clone().unwrap_or_default();
        let rollbacks = streams.iter().map(|pair| {
            let request = DeleteStreamRequest {
                pipeline_uuid: pipeline_uuid.clone(),
                multiviews: None,
            };
            let uuid = pair.stream_uuid.clone();
            async move {
                if let Err(rollback_error) = self.client.delete_stream(&uuid, &request).await {
                    log::warn!("Rollback delete of stream {uuid} failed: {rollback_error}");
                }
            }
        });
        join_all(rollbacks).await;

        AddStreamResult {
            success: false,
            steps: vec![WorkflowStep::failed("add_stream", error.to_string())],
            streams: Vec::new(),
        }
    }

    /// Tear down a source's streams on every pipeline.
    ///
    /// When the freed slot is still placed on a multiview, the recomputed
    /// view arrays ride along in the delete body so the backend clears
    /// the tile in the same operation as the teardown; a removed stream
    /// must never leave a dangling black tile on a live monitor wall.
    pub async fn delete_stream(
        &self,
        stream_uuids: &[String],
        pipelines: &[PipelineSettings],
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
        input_slot: u32,
    ) -> TeardownOutcome {
        let pipeline_uuid = match pipelines.first().and_then(|p| p.pipeline_id.clone()) {
            Some(uuid) => uuid,
            None => {
                return TeardownOutcome::Failed(vec![WorkflowStep::unexpected(
                    "production has no pipelines with a backend identity",
                )])
            }
        };

        let request = build_delete_request(pipeline_uuid, multiviews, sources, input_slot);

        let deletes = stream_uuids.iter().map(|uuid| {
            let request = &request;
            async move { self.client.delete_stream(uuid, request).await }
        });
        let results = join_all(deletes).await;

        classify_teardown(results)
    }

    // =========================================================================
    // Rendering engine sources
    // =========================================================================

    /// Create an HTML source on every pipeline, then reconnect the slot's
    /// multiview tiles. The two phases report independently: a failed
    /// multiview sync does not retract a successful add.
    pub async fn create_html_source(
        &self,
        pipelines: &[PipelineSettings],
        input_slot: u32,
        data: &HtmlData,
        source: &SourceReference,
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
    ) -> StepReport {
        for pipeline in pipelines {
            let pipeline_id = match &pipeline.pipeline_id {
                Some(id) => id,
                None => continue,
            };
            if let Err(error) = self
                .client
                .create_html_source(pipeline_id, input_slot, data)
                .await
            {
                log::error!("Could not add html source: {error}");
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("add_html", error.to_string())],
                };
            }
        }

        self.sync_after_add("add_html", pipelines, multiviews, sources, input_slot, source)
            .await
    }

    /// Create a media player source on every pipeline, then reconnect the
    /// slot's multiview tiles.
    pub async fn create_media_source(
        &self,
        pipelines: &[PipelineSettings],
        input_slot: u32,
        data: &MediaData,
        source: &SourceReference,
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
    ) -> StepReport {
        for pipeline in pipelines {
            let pipeline_id = match &pipeline.pipeline_id {
                Some(id) => id,
                None => continue,
            };
            if let Err(error) = self
                .client
                .create_media_source(pipeline_id, input_slot, data)
                .await
            {
                log::error!("Could not add media source: {error}");
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("add_media", error.to_string())],
                };
            }
        }

        self.sync_after_add("add_media", pipelines, multiviews, sources, input_slot, source)
            .await
    }

    /// Remove the HTML source on every pipeline and clear its tiles
    pub async fn delete_html_source(
        &self,
        pipelines: &[PipelineSettings],
        input_slot: u32,
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
    ) -> StepReport {
        for pipeline in pipelines {
            let pipeline_id = match &pipeline.pipeline_id {
                Some(id) => id,
                None => continue,
            };
            if let Err(error) = self.client.delete_html_source(pipeline_id, input_slot).await {
                log::error!("Could not delete html source: {error}");
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("delete_html", error.to_string())],
                };
            }
        }

        self.sync_after_delete("delete_html", pipelines, multiviews, sources, input_slot)
            .await
    }

    /// Remove the media player source on every pipeline and clear its tiles
    pub async fn delete_media_source(
        &self,
        pipelines: &[PipelineSettings],
        input_slot: u32,
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
    ) -> StepReport {
        for pipeline in pipelines {
            let pipeline_id = match &pipeline.pipeline_id {
                Some(id) => id,
                None => continue,
            };
            if let Err(error) = self
                .client
                .delete_media_source(pipeline_id, input_slot)
                .await
            {
                log::error!("Could not delete media source: {error}");
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("delete_media", error.to_string())],
                };
            }
        }

        self.sync_after_delete("delete_media", pipelines, multiviews, sources, input_slot)
            .await
    }

    async fn sync_after_add(
        &self,
        add_step: &str,
        pipelines: &[PipelineSettings],
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
        input_slot: u32,
        source: &SourceReference,
    ) -> StepReport {
        let pipeline_id = match pipelines.first().and_then(|p| p.pipeline_id.as_deref()) {
            Some(id) => id,
            None => {
                return StepReport {
                    success: false,
                    steps: vec![
                        WorkflowStep::ok(add_step),
                        WorkflowStep::failed("update_multiview", "missing pipeline id"),
                    ],
                }
            }
        };

        match self
            .synchronizer
            .sync_running_views(pipeline_id, multiviews, sources, input_slot, Some(source.label()))
            .await
        {
            Ok(()) => StepReport {
                success: true,
                steps: vec![WorkflowStep::ok(add_step), WorkflowStep::ok("update_multiview")],
            },
            Err(step) => StepReport {
                success: false,
                steps: vec![WorkflowStep::ok(add_step), step],
            },
        }
    }

    async fn sync_after_delete(
        &self,
        delete_step: &str,
        pipelines: &[PipelineSettings],
        multiviews: &[MultiviewSettings],
        sources: &[SourceReference],
        input_slot: u32,
    ) -> StepReport {
        let pipeline_id = match pipelines.first().and_then(|p| p.pipeline_id.as_deref()) {
            Some(id) => id,
            None => {
                return StepReport {
                    success: false,
                    steps: vec![
                        WorkflowStep::ok(delete_step),
                        WorkflowStep::failed("update_multiview", "missing pipeline id"),
                    ],
                }
            }
        };

        match self
            .synchronizer
            .sync_running_views(pipeline_id, multiviews, sources, input_slot, None)
            .await
        {
            Ok(()) => StepReport {
                success: true,
                steps: vec![
                    WorkflowStep::ok(delete_step),
                    WorkflowStep::ok("update_multiview"),
                ],
            },
            Err(step) => StepReport {
                success: false,
                steps: vec![WorkflowStep::ok(delete_step), step],
            },
        }
    }
}

/// Build the delete body for a slot teardown. When no multiview places
/// the slot the backend gets a plain delete; otherwise every multiview's
/// views are recomputed with the freed slot cleared to its neutral label.
pub fn build_delete_request(
    pipeline_uuid: String,
    multiviews: &[MultiviewSettings],
    sources: &[SourceReference],
    input_slot: u32,
) -> DeleteStreamRequest {
    if !slot_is_placed(multiviews, input_slot) {
        return DeleteStreamRequest {
            pipeline_uuid,
            multiviews: None,
        };
    }

    let remaining: Vec<SourceReference> = sources
        .iter()
        .filter(|source| source.input_slot() != input_slot)
        .cloned()
        .collect();

    let updated = multiviews
        .iter()
        .map(|multiview| {
            let mut updated = multiview.clone();
            updated.layout.views =
                clear_slot_views(&multiview.layout.views, &remaining, input_slot);
            updated
        })
        .collect();

    DeleteStreamRequest {
        pipeline_uuid,
        multiviews: Some(updated),
    }
}

/// Classify the aggregate outcome of the per-pipeline delete calls.
///
/// Any unacknowledged delete keeps the source reference alive locally; a
/// response that confirms `delete_stream` succeeded while another step
/// failed releases the reference but reports the degradation.
pub fn classify_teardown(
    results: Vec<Result<StepReport, LiveApiError>>,
) -> TeardownOutcome {
    let mut reports = Vec::new();
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(error) => match error.step_report() {
                Some(report) => reports.push(report),
                None => {
                    return TeardownOutcome::Failed(vec![WorkflowStep::unexpected(
                        error.to_string(),
                    )])
                }
            },
        }
    }

    if let Some(failed) = reports.iter().find(|report| !report.success) {
        let steps = failed.steps.clone();
        if failed.step_succeeded("delete_stream") {
            return TeardownOutcome::Degraded(steps);
        }
        return TeardownOutcome::Failed(steps);
    }

    let steps = reports
        .into_iter()
        .next()
        .map(|report| report.steps)
        .filter(|steps| !steps.is_empty())
        .unwrap_or_else(|| vec![WorkflowStep::ok("delete_stream")]);
    TeardownOutcome::Complete(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        IngestSourceRef, MultiviewLayout, MultiviewOutput, MultiviewView, SourceReference,
    };

    fn ingest(id: &str, label: &str, slot: u32) -> SourceReference {
        SourceReference::IngestSource(IngestSourceRef {
            id: id.to_string(),
            label: label.to_string(),
            input_slot: slot,
            stream_uuids: None,
        })
    }

    fn view(slot: u32, label: &str) -> MultiviewView {
        MultiviewView {
            id: None,
            input_slot: slot,
            label: label.to_string(),
            x: 0,
            y: 0,
            width: 480,
            height: 270,
        }
    }

    fn multiview(views: Vec<MultiviewView>) -> MultiviewSettings {
        MultiviewSettings {
            id: None,
            multiview_id: Some(1),
            name: "mv".to_string(),
            for_pipeline_idx: Some(0),
            layout: MultiviewLayout {
                output_width: 1920,
                output_height: 1080,
                views,
            },
            output: MultiviewOutput {
                video_format: "AVC".to_string(),
                video_kilobit_rate: 5000,
                frame_rate_n: 50,
                frame_rate_d: 1,
                local_ip: "0.0.0.0".to_string(),
                local_port: 9900,
                remote_ip: None,
                remote_port: None,
                srt_mode: "listener".to_string(),
                srt_latency_ms: 120,
                srt_passphrase: None,
                srt_stream_id: None,
            },
        }
    }

    fn report(steps: Vec<WorkflowStep>) -> StepReport {
        StepReport::from_steps(steps)
    }

    #[test]
    fn test_unplaced_slot_deletes_without_multiviews() {
        let multiviews = vec![multiview(vec![view(1, "Cam1")])];
        let sources = vec![ingest("a", "Cam1", 1), ingest("b", "Cam2", 2)];
        let request = build_delete_request("p1".to_string(), &multiviews, &sources, 2);
        assert!(request.multiviews.is_none());
    }

    #[test]
    fn test_placed_slot_embeds_cleared_views() {
        let multiviews = vec![multiview(vec![view(1, "Cam1"), view(2, "Cam2")])];
        let sources = vec![ingest("a", "Cam1", 1), ingest("b", "Cam2", 2)];

        let request = build_delete_request("p1".to_string(), &multiviews, &sources, 2);
        let updated = request.multiviews.expect("multiviews must ride along");
        let views = &updated[0].layout.views;
        assert_eq!(views.len(), 2);
        let freed = views.iter().find(|v| v.input_slot == 2).unwrap();
        assert_eq!(freed.label, "Input 2");
        let kept = views.iter().find(|v| v.input_slot == 1).unwrap();
        assert_eq!(kept.label, "Cam1");
    }

    #[test]
    fn test_all_ok_is_complete() {
        let results = vec![
            Ok(report(vec![WorkflowStep::ok("delete_stream")])),
            Ok(report(vec![WorkflowStep::ok("delete_stream")])),
        ];
        let outcome = classify_teardown(results);
        assert!(matches!(outcome, TeardownOutcome::Complete(_)));
        assert!(outcome.stream_released());
    }

    #[test]
    fn test_delete_ok_multiview_failed_is_degraded() {
        let results = vec![Ok(report(vec![
            WorkflowStep::ok("delete_stream"),
            WorkflowStep::failed("update_multiview", "backend said no"),
        ]))];
        let outcome = classify_teardown(results);
        assert!(matches!(outcome, TeardownOutcome::Degraded(_)));
        assert!(outcome.stream_released());
    }

    #[test]
    fn test_delete_failed_keeps_reference() {
        let results = vec![Ok(report(vec![WorkflowStep::failed(
            "delete_stream",
            "stream busy",
        )]))];
        let outcome = classify_teardown(results);
        assert!(matches!(outcome, TeardownOutcome::Failed(_)));
        assert!(!outcome.stream_released());
    }

    #[test]
    fn test_structured_error_body_is_classified() {
        let results = vec![Err(LiveApiError::Status {
            status: 500,
            body: r#"{"success":false,"steps":[{"step":"delete_stream","success":true},{"step":"update_multiview","success":false}]}"#.to_string(),
        })];
        let outcome = classify_teardown(results);
        assert!(matches!(outcome, TeardownOutcome::Degraded(_)));
    }

    #[test]
    fn test_unstructured_error_is_unexpected_failure() {
        let results = vec![Err(LiveApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        })];
        let outcome = classify_teardown(results);
        match outcome {
            TeardownOutcome::Failed(steps) => {
                assert_eq!(steps[0].step, "unexpected");
                assert!(!steps[0].success);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
