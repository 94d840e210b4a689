//! Host CPU and memory statistics for the dashboard status widget

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::time::MissedTickBehavior;

use crate::relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStats {
    pub percent: f64,
    /// Bytes
    pub used: u64,
    /// Bytes
    pub total: u64,
}

/// One sample, as sent in `{type: "system_stats", cpu, memory}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemStats {
    /// Average over all cores, in percent
    pub cpu: f64,
    pub memory: MemoryStats,
}

impl SystemStats {
    pub fn new(cpu: f64, used: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            cpu,
            memory: MemoryStats { percent, used, total },
        }
    }

    pub fn to_body(&self) -> Map<String, Value> {
        let mut body = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        body.insert("type".into(), Value::String("system_stats".into()));
        body
    }
}

/// Reads host counters. CPU usage is relative to the previous sample.
pub struct StatsSampler {
    system: System,
}

impl StatsSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }

    pub fn sample(&mut self) -> SystemStats {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        let cpu = f64::from(self.system.global_cpu_info().cpu_usage());
        SystemStats::new(
            if cpu.is_finite() { cpu } else { 0.0 },
            self.system.used_memory(),
            self.system.total_memory(),
        )
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically samples the host and pushes the result to audio dashboards
pub struct StatsReporter {
    relay: Arc<Relay>,
    period: Duration,
}

impl StatsReporter {
    pub fn new(relay: Arc<Relay>, period: Duration) -> Self {
        Self { relay, period }
    }

    pub async fn run(self) {
        let mut sampler = StatsSampler::new();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick is immediate; wait one period so the CPU delta has a baseline
        ticker.tick().await;

        tracing::info!(period_ms = self.period.as_millis() as u64, "System stats reporter started");
        loop {
            ticker.tick().await;
            let sampled = tokio::task::spawn_blocking(move || {
                let stats = sampler.sample();
                (sampler, stats)
            })
            .await;

            let stats = match sampled {
                Ok((returned, stats)) => {
                    sampler = returned;
                    stats
                }
                Err(e) => {
                    tracing::error!("System stats sampling failed: {}", e);
                    return;
                }
            };

            let delivered = self.relay.system_stats(&stats);
            tracing::trace!(cpu = stats.cpu, memory = stats.memory.percent, delivered, "System stats");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::{Outbound, PeerRegistry};
    use crate::protocol::ConnectParams;
    use crate::settings::SettingsStore;
    use tokio::sync::mpsc;

    #[test]
    fn test_body_shape() {
        let body = SystemStats::new(12.5, 1 << 30, 4 << 30).to_body();
        assert_eq!(body["type"], "system_stats");
        assert_eq!(body["cpu"], 12.5);
        assert_eq!(body["memory"]["percent"], 25.0);
        assert_eq!(body["memory"]["total"], 4u64 << 30);
    }

    #[test]
    fn test_zero_total_memory() {
        assert_eq!(SystemStats::new(0.0, 0, 0).memory.percent, 0.0);
    }

    #[test]
    fn test_sampler_reports_consistent_memory() {
        let stats = StatsSampler::new().sample();
        assert!(stats.memory.used <= stats.memory.total);
        assert!((0.0..=100.0).contains(&stats.memory.percent));
        assert!(stats.cpu >= 0.0);
    }

    #[tokio::test]
    async fn test_reporter_pushes_to_audio_dashboard() {
        let relay = Arc::new(Relay::new(
            Arc::new(PeerRegistry::default()),
            Arc::new(SettingsStore::default()),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _dashboard = relay.connect(tx, &ConnectParams::default());

        let reporter = tokio::spawn(StatsReporter::new(relay.clone(), Duration::from_millis(20)).run());

        let stats = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let Some(Outbound::Text(text)) = rx.recv().await else {
                    continue;
                };
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "system_stats" {
                    return value;
                }
            }
        })
        .await
        .expect("no system_stats message");

        assert!(stats["cpu"].is_number());
        assert!(stats["memory"]["total"].is_u64());
        reporter.abort();
    }
}
