use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info};

use crate::reference::Verdict;

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub pipelines: u64,
    pub total_duration_ms: f64,
    pub sanity_passes: u64,
    pub sanity_failures: u64,
    pub cache_hits: u64,
    pub performance_passes: u64,
    pub performance_failures: u64,
    pub performance_unchecked: u64,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    /// Process-wide collector shared by every pipeline the CLI runs.
    pub fn global() -> &'static MetricsCollector {
        static INSTANCE: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);
        &INSTANCE
    }

    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    /// Adds one finished pipeline and its wall time.
    pub fn record_total_duration(&self, duration: Duration) {
        self.update(|s| {
            s.pipelines += 1;
            s.total_duration_ms += duration.as_secs_f64() * 1_000.0;
        });
    }

    pub fn record_sanity_pass(&self) {
        self.update(|s| s.sanity_passes += 1);
    }

    pub fn record_sanity_failure(&self) {
        self.update(|s| s.sanity_failures += 1);
    }

    pub fn record_cache_hit(&self) {
        self.update(|s| s.cache_hits += 1);
    }

    pub fn record_verdict(&self, verdict: Verdict) {
        self.update(|s| match verdict {
            Verdict::Pass => s.performance_passes += 1,
            Verdict::Fail => s.performance_failures += 1,
            Verdict::Unchecked => s.performance_unchecked += 1,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut guard) = self.inner.lock() {
            apply(&mut guard);
        }
    }
}

pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms, "Stage duration recorded"
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
        pipelines = snapshot.pipelines,
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        sanity_passes = snapshot.sanity_passes,
        sanity_failures = snapshot.sanity_failures,
        cache_hits = snapshot.cache_hits,
        performance_passes = snapshot.performance_passes,
        performance_failures = snapshot.performance_failures,
        performance_unchecked = snapshot.performance_unchecked,
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP benchstage_{name} {help}");
    let _ = writeln!(output, "# TYPE benchstage_{name} counter");
    let _ = writeln!(output, "benchstage_{name} {value}");
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        counter(
            &mut output,
            "pipelines_total",
            "Pipelines executed",
            self.pipelines,
        );
        counter(
            &mut output,
            "sanity_passes_total",
            "Stages whose sanity checks passed",
            self.sanity_passes,
        );
        counter(
            &mut output,
            "sanity_failures_total",
            "Stages failed by a missing artifact or sanity check",
            self.sanity_failures,
        );
        counter(
            &mut output,
            "cache_hits_total",
            "Stages short-circuited by the artifact cache",
            self.cache_hits,
        );
        let _ = writeln!(
            output,
            "# HELP benchstage_performance_results_total Performance values by verdict"
        );
        let _ = writeln!(
            output,
            "# TYPE benchstage_performance_results_total counter"
        );
        for (verdict, value) in [
            ("pass", self.performance_passes),
            ("fail", self.performance_failures),
            ("unchecked", self.performance_unchecked),
        ] {
            let _ = writeln!(
                output,
                "benchstage_performance_results_total{{verdict=\"{verdict}\"}} {value}"
            );
        }

        output.push_str("# HELP benchstage_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE benchstage_stage_calls_total counter\n");
        output.push_str(
            "# HELP benchstage_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE benchstage_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP benchstage_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE benchstage_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            let _ = writeln!(
                output,
                "benchstage_stage_calls_total{{stage=\"{}\"}} {}",
                stage, metrics.calls
            );
            let _ = writeln!(
                output,
                "benchstage_stage_duration_seconds_total{{stage=\"{}\"}} {:.6}",
                stage,
                metrics.total_duration_ms / 1_000.0
            );
            let _ = writeln!(
                output,
                "benchstage_stage_duration_seconds_max{{stage=\"{}\"}} {:.6}",
                stage,
                metrics.max_duration_ms / 1_000.0
            );
        }
        output.push_str("# HELP benchstage_pipeline_duration_seconds Total pipeline duration\n");
        output.push_str("# TYPE benchstage_pipeline_duration_seconds gauge\n");
        let _ = writeln!(
            output,
            "benchstage_pipeline_duration_seconds {:.6}",
            self.total_duration_ms / 1_000.0
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_are_counted_separately() {
        let metrics = MetricsCollector::new();
        metrics.record_verdict(Verdict::Pass);
        metrics.record_verdict(Verdict::Pass);
        metrics.record_verdict(Verdict::Unchecked);
        metrics.record_cache_hit();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.performance_passes, 2);
        assert_eq!(snapshot.performance_unchecked, 1);
        assert_eq!(snapshot.cache_hits, 1);

        let text = snapshot.to_prometheus();
        assert!(text.contains("benchstage_performance_results_total{verdict=\"pass\"} 2"));
        assert!(text.contains("benchstage_cache_hits_total 1"));
    }

    #[test]
    fn stage_timer_records_on_drop() {
        let metrics = MetricsCollector::new();
        {
            let _timer = metrics.start_stage("stream-run");
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stages["stream-run"].calls, 1);
    }
}
