//! Fixed-interval pipeline schedules

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use super::{Orchestrator, OrchestratorError};

/// Trigger every scheduled pipeline whose last run is older than its interval
pub async fn trigger_due(orchestrator: &Orchestrator) -> Result<Vec<Uuid>, OrchestratorError> {
    let now = Utc::now();
    let mut triggered = Vec::new();

    for pipeline in orchestrator.pipelines().list_pipelines().await? {
        let Some(schedule) = pipeline.config.schedule else {
            continue;
        };

        let due = match orchestrator.engine().store.latest_run(&pipeline.name).await? {
            None => true,
            Some(last) => (now - last.triggered_at)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= schedule.interval()),
        };
        if !due {
            continue;
        }

        match orchestrator.trigger_run(&pipeline.name, HashMap::new()).await {
            Ok(run_id) => {
                tracing::info!(pipeline = %pipeline.name, %run_id, "Scheduled run triggered");
                triggered.push(run_id);
            }
            Err(OrchestratorError::AlreadyRunning(_)) => {
                tracing::debug!(pipeline = %pipeline.name, "Schedule due but a run is active");
            }
            Err(err) => {
                tracing::warn!(pipeline = %pipeline.name, error = %err, "Scheduled trigger failed");
            }
        }
    }

    Ok(triggered)
}

pub async fn run_schedule_loop(orchestrator: Orchestrator, tick: Duration) {
    loop {
        if let Err(err) = trigger_due(&orchestrator).await {
            tracing::warn!(error = %err, "Schedule evaluation failed");
        }
        sleep(tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Harness, PIPELINE, Scripts, config};
    use tributary_core::domain::pipeline::Schedule;
    use tributary_core::domain::run::RunState;

    #[tokio::test(start_paused = true)]
    async fn test_due_pipeline_is_triggered_once() {
        let harness = Harness::new(Scripts::new().clients());
        let mut config = config();
        config.schedule = Some(Schedule { every_secs: 3600 });
        harness.add_pipeline(config).await;

        let triggered = trigger_due(&harness.orchestrator).await.unwrap();
        assert_eq!(triggered.len(), 1);
        assert_eq!(
            harness.wait_finished(triggered[0]).await.run.state,
            RunState::Succeeded
        );

        // The last run is recent, so nothing is due yet
        assert!(trigger_due(&harness.orchestrator).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unscheduled_pipelines_are_left_alone() {
        let harness = Harness::new(Scripts::new().clients());
        harness.add_pipeline(config()).await;

        assert!(trigger_due(&harness.orchestrator).await.unwrap().is_empty());
        let runs = harness.orchestrator.list_runs(PIPELINE, 10).await.unwrap();
        assert!(runs.is_empty());
    }
}
