// Production Workflow
// Start/stop orchestration against the live backend and incremental
// multiview reconciliation on a running production

use std::sync::Arc;

use crate::models::{MultiviewSettings, Production, StepReport, WorkflowStep};
use crate::services::live_client::LiveApiClient;
use crate::services::multiview_diff::diff_multiviews;

pub struct ProductionWorkflow {
    client: Arc<LiveApiClient>,
}

impl ProductionWorkflow {
    pub fn new(client: Arc<LiveApiClient>) -> Self {
        Self { client }
    }

    /// Start the production on the backend and reconcile its multiviews
    /// onto the running pipeline. The production is marked active once
    /// the backend acknowledges the start, even if the multiview sync
    /// reports a failure; the sync is its own step.
    pub async fn start(&self, production: &mut Production) -> StepReport {
        log::info!("Starting production '{}'", production.name);

        let report = match self.client.start_production(production).await {
            Ok(report) => report,
            Err(error) => {
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("start_production", error.to_string())],
                }
            }
        };
        if !report.success {
            return report;
        }

        let mut steps = if report.steps.is_empty() {
            vec![WorkflowStep::ok("start_production")]
        } else {
            report.steps
        };

        production.is_active = true;

        match self.reconcile_running_multiviews(production).await {
            Ok(()) => steps.push(WorkflowStep::ok("sync_multiviews")),
            Err(message) => {
                log::error!("Multiview sync after start failed: {message}");
                steps.push(WorkflowStep::failed("sync_multiviews", message));
            }
        }

        StepReport::from_steps(steps)
    }

    /// Stop the production on the backend. On acknowledgement the local
    /// document is marked inactive and the backend multiview identities
    /// are cleared; the next start recreates them.
    pub async fn stop(&self, production: &mut Production) -> StepReport {
        log::info!("Stopping production '{}'", production.name);

        let report = match self.client.stop_production(production).await {
            Ok(report) => report,
            Err(error) => {
                return StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("stop_production", error.to_string())],
                }
            }
        };
        if !report.success {
            return report;
        }

        production.is_active = false;
        for multiview in &mut production.multiviews {
            multiview.multiview_id = None;
        }

        if report.steps.is_empty() {
            StepReport {
                success: true,
                steps: vec![WorkflowStep::ok("stop_production")],
            }
        } else {
            report
        }
    }

    /// Replace a production's multiview set.
    ///
    /// The diff against the previous set is keyed by `multiview_id`. On
    /// an inactive production the new set is simply returned for
    /// storage. On an active one the three sets are pushed to the
    /// backend - create for additions, full view PUT for updates, delete
    /// for removals - and every call is awaited: a failed sync fails the
    /// save rather than leaving the running layout half-applied. A
    /// running production is never torn down to change its monitoring.
    pub async fn apply_multiview_update(
        &self,
        production: &Production,
        mut new_multiviews: Vec<MultiviewSettings>,
    ) -> Result<Vec<MultiviewSettings>, StepReport> {
        let diff = diff_multiviews(&production.multiviews, &new_multiviews);
        if !production.is_active || diff.is_empty() {
            return Ok(new_multiviews);
        }

        let pipeline_id = match production.multiview_pipeline().and_then(|p| p.pipeline_id.clone())
        {
            Some(id) => id,
            None => {
                return Err(StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed(
                        "update_multiview",
                        "production has no pipeline with a backend identity",
                    )],
                })
            }
        };

        let mut steps = Vec::new();
        let old = &production.multiviews;

        for multiview in &mut new_multiviews {
            let known = multiview
                .multiview_id
                .map(|id| old.iter().any(|m| m.multiview_id == Some(id)))
                .unwrap_or(false);

            if !known {
                match self.client.create_multiview(&pipeline_id, multiview).await {
                    Ok(created) => {
                        multiview.multiview_id = Some(created.id);
                        steps.push(WorkflowStep::ok("create_multiview"));
                    }
                    Err(error) => {
                        steps.push(WorkflowStep::failed("create_multiview", error.to_string()));
                    }
                }
            } else if diff
                .updates
                .iter()
                .any(|m| m.multiview_id == multiview.multiview_id)
            {
                let multiview_id = multiview.multiview_id.unwrap();
                match self
                    .client
                    .update_multiview(&pipeline_id, multiview_id, &multiview.layout.views)
                    .await
                {
                    Ok(()) => steps.push(WorkflowStep::ok("update_multiview")),
                    Err(error) => {
                        steps.push(WorkflowStep::failed("update_multiview", error.to_string()));
                    }
                }
            }
        }

        for removed in &diff.removals {
            let multiview_id = match removed.multiview_id {
                Some(id) => id,
                None => continue,
            };
            match self.client.delete_multiview(&pipeline_id, multiview_id).await {
                Ok(()) => steps.push(WorkflowStep::ok("delete_multiview")),
                Err(error) => {
                    steps.push(WorkflowStep::failed("delete_multiview", error.to_string()));
                }
            }
        }

        if steps.iter().all(|step| step.success) {
            Ok(new_multiviews)
        } else {
            Err(StepReport::from_steps(steps))
        }
    }

    /// Bring the backend's multiview set for the production's pipeline in
    /// line with the configured one: create what is missing, re-push the
    /// views of what exists, delete what is no longer configured.
    async fn reconcile_running_multiviews(&self, production: &mut Production) -> Result<(), String> {
        let pipeline_id = match production.multiview_pipeline().and_then(|p| p.pipeline_id.clone())
        {
            Some(id) => id,
            None => return Err("production has no pipeline with a backend identity".to_string()),
        };

        let running = self
            .client
            .get_multiviews(&pipeline_id)
            .await
            .map_err(|e| e.to_string())?;
        let running_ids: Vec<u32> = running.iter().map(|m| m.id).collect();

        for multiview in &mut production.multiviews {
            match multiview.multiview_id {
                Some(id) if running_ids.contains(&id) => {
                    self.client
                        .update_multiview(&pipeline_id, id, &multiview.layout.views)
                        .await
                        .map_err(|e| e.to_string())?;
                }
                _ => {
                    let created = self
                        .client
                        .create_multiview(&pipeline_id, multiview)
                        .await
                        .map_err(|e| e.to_string())?;
                    multiview.multiview_id = Some(created.id);
                }
            }
        }

        let configured_ids: Vec<u32> = production
            .multiviews
            .iter()
            .filter_map(|m| m.multiview_id)
            .collect();
        for running_id in running_ids {
            if !configured_ids.contains(&running_id) {
                self.client
                    .delete_multiview(&pipeline_id, running_id)
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(())
    }
}
