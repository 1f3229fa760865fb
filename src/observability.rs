use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
    pub succeeded_stages: u64,
    pub failed_stages: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
    pub last_exit_code: Option<i32>,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            exit_code: None,
            failed: false,
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

/// Records one stage execution when dropped.
pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    exit_code: Option<i32>,
    failed: bool,
    recorded: bool,
}

impl StageTimer {
    pub fn set_exit_code(&mut self, code: Option<i32>) {
        self.exit_code = code;
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            if self.failed {
                guard.failed_stages += 1;
            } else {
                guard.succeeded_stages += 1;
            }
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
            if self.exit_code.is_some() {
                metrics.last_exit_code = self.exit_code;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms,
            failed = self.failed,
            "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        succeeded = snapshot.succeeded_stages,
        failed = snapshot.failed_stages,
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            exit_code = ?metrics.last_exit_code,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP demo_pipeline_stages_succeeded_total Stages that completed\n");
        output.push_str("# TYPE demo_pipeline_stages_succeeded_total counter\n");
        output.push_str(&format!(
            "demo_pipeline_stages_succeeded_total {}\n",
            self.succeeded_stages
        ));
        output.push_str("# HELP demo_pipeline_stages_failed_total Stages that failed\n");
        output.push_str("# TYPE demo_pipeline_stages_failed_total counter\n");
        output.push_str(&format!(
            "demo_pipeline_stages_failed_total {}\n",
            self.failed_stages
        ));
        output.push_str("# HELP demo_pipeline_stage_duration_seconds Stage wall-clock duration\n");
        output.push_str("# TYPE demo_pipeline_stage_duration_seconds gauge\n");
        output.push_str("# HELP demo_pipeline_stage_exit_code Exit code of the stage's process\n");
        output.push_str("# TYPE demo_pipeline_stage_exit_code gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "demo_pipeline_stage_duration_seconds{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.total_duration_ms / 1_000.0
            ));
            if let Some(code) = metrics.last_exit_code {
                output.push_str(&format!(
                    "demo_pipeline_stage_exit_code{{stage=\"{}\"}} {}\n",
                    stage, code
                ));
            }
        }
        output.push_str("# HELP demo_pipeline_duration_seconds Total pipeline duration\n");
        output.push_str("# TYPE demo_pipeline_duration_seconds gauge\n");
        output.push_str(&format!(
            "demo_pipeline_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        let collector = MetricsCollector::new();
        {
            let mut timer = collector.start_stage("package:Win64");
            timer.set_exit_code(Some(0));
        }
        {
            let mut timer = collector.start_stage("package:Android");
            timer.set_exit_code(Some(6));
            timer.mark_failed();
        }
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.succeeded_stages, 1);
        assert_eq!(snapshot.failed_stages, 1);
        assert_eq!(snapshot.stages["package:Android"].failures, 1);
        assert_eq!(snapshot.stages["package:Android"].last_exit_code, Some(6));

        let prom = snapshot.to_prometheus();
        assert!(prom.contains("demo_pipeline_stage_exit_code{stage=\"package:Android\"} 6"));
        assert!(prom.contains("demo_pipeline_stages_failed_total 1"));

        collector.reset();
        assert!(collector.snapshot().stages.is_empty());
    }
}
