//! Metric sinks receiving the named scalars of a training run.

use std::collections::BTreeMap;

use tracing::info;

/// Destination for named scalar metrics
pub trait MetricSink {
    /// Record `value` under `name`, optionally tagged with a training step
    fn log_scalar(&mut self, name: &str, value: f64, step: Option<usize>);
}

/// Emits every scalar as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: Option<usize>) {
        match step {
            Some(step) => info!(metric = name, step, "{} = {:.6}", name, value),
            None => info!(metric = name, "{} = {:.6}", name, value),
        }
    }
}

/// Keeps every scalar in memory, grouped by name in logging order
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    series: BTreeMap<String, Vec<(Option<usize>, f64)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values logged under `name`
    pub fn series(&self, name: &str) -> &[(Option<usize>, f64)] {
        self.series.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recent value logged under `name`
    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|&(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl MetricSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, step: Option<usize>) {
        self.series
            .entry(name.to_string())
            .or_default()
            .push((step, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_groups_by_name() {
        let mut sink = MemorySink::new();
        sink.log_scalar("forward_kl", 1.5, None);
        sink.log_scalar("learning_rate", 1e-3, Some(5));
        sink.log_scalar("forward_kl", 0.5, None);

        assert_eq!(sink.series("forward_kl").len(), 2);
        assert_eq!(sink.last("forward_kl"), Some(0.5));
        assert_eq!(sink.series("learning_rate"), &[(Some(5), 1e-3)]);
        assert!(sink.series("reverse_kl").is_empty());
        assert_eq!(sink.names().count(), 2);
    }

    #[test]
    fn test_tracing_sink_accepts_scalars() {
        let mut sink = TracingSink;
        sink.log_scalar("moving_sym_kl", 0.25, Some(0));
        sink.log_scalar("moving_sym_kl", 0.20, None);
    }
}
