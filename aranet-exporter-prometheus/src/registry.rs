//! Pull-based metric registry.
//!
//! Collectors are asked for their metrics on every scrape; nothing is cached
//! between scrapes. The registry merges default labels into each series and
//! renders the Prometheus text format (version 0.0.4).

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::mapping::{MetricType, escape_help, format_labels, format_value};

/// One sample of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    /// Label pairs, sorted by name when rendered.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            metric_type: MetricType::Gauge,
            labels: Vec::new(),
            value,
        }
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self {
            metric_type: MetricType::Counter,
            ..Self::gauge(name, help, value)
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    pub fn with_labels(mut self, labels: &[(String, String)]) -> Self {
        self.labels.extend_from_slice(labels);
        self
    }

    /// Value of label `name`, if set.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Source of metrics, queried on every scrape.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Vec<Metric>;
}

/// Set of collectors rendered together on the metrics endpoint.
#[derive(Default)]
pub struct Registry {
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
    default_labels: Vec<(String, String)>,
}

/// Shareable registry handle.
pub type SharedRegistry = Arc<Registry>;

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that adds `labels` to every series that lacks them.
    pub fn with_default_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut default_labels: Vec<(String, String)> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        default_labels.sort();

        Self {
            collectors: RwLock::new(Vec::new()),
            default_labels,
        }
    }

    pub fn register(&self, collector: Arc<dyn Collector>) {
        self.collectors.write().push(collector);
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.read().len()
    }

    /// Collect from every registered collector.
    pub async fn gather(&self) -> Vec<Metric> {
        let collectors: Vec<_> = self.collectors.read().clone();
        let mut metrics = Vec::new();

        for collector in collectors {
            metrics.extend(collector.collect().await);
        }

        for metric in &mut metrics {
            for (k, v) in &self.default_labels {
                if metric.label(k).is_none() {
                    metric.labels.push((k.clone(), v.clone()));
                }
            }
            metric.labels.sort_by(|a, b| a.0.cmp(&b.0));
        }

        trace!(count = metrics.len(), "Gathered metrics");
        metrics
    }

    /// Collect and render in the Prometheus text format.
    pub async fn render(&self) -> String {
        let metrics = self.gather().await;
        render_metrics(&metrics)
    }
}

/// Render metrics grouped by name, names sorted.
pub fn render_metrics(metrics: &[Metric]) -> String {
    let mut by_name: BTreeMap<&str, Vec<&Metric>> = BTreeMap::new();
    for metric in metrics {
        by_name.entry(&metric.name).or_default().push(metric);
    }

    let mut output = Vec::with_capacity(metrics.len() * 120);
    for (name, series) in by_name {
        let first = series[0];
        writeln!(output, "# HELP {} {}", name, escape_help(&first.help)).ok();
        writeln!(output, "# TYPE {} {}", name, first.metric_type.as_str()).ok();

        for metric in series {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(&metric.labels),
                format_value(metric.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Metric>);

    #[async_trait]
    impl Collector for Fixed {
        async fn collect(&self) -> Vec<Metric> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_empty_registry_renders_nothing() {
        let registry = Registry::new();
        assert_eq!(registry.render().await, "");
    }

    #[tokio::test]
    async fn test_render_groups_and_sorts() {
        let registry = Registry::new();
        registry.register(Arc::new(Fixed(vec![
            Metric::gauge("b_metric", "B things", 2.0).with_label("x", "1"),
            Metric::gauge("a_metric", "A things", 1.5),
            Metric::gauge("b_metric", "B things", 3.0).with_label("x", "2"),
        ])));

        let output = registry.render().await;

        assert_eq!(
            output,
            "# HELP a_metric A things\n\
             # TYPE a_metric gauge\n\
             a_metric 1.5\n\
             # HELP b_metric B things\n\
             # TYPE b_metric gauge\n\
             b_metric{x=\"1\"} 2\n\
             b_metric{x=\"2\"} 3\n"
        );
    }

    #[tokio::test]
    async fn test_counter_type_line() {
        let registry = Registry::new();
        registry.register(Arc::new(Fixed(vec![Metric::counter(
            "aranet4_read_attempts_total",
            "Attempts",
            3.0,
        )])));

        let output = registry.render().await;

        assert!(output.contains("# TYPE aranet4_read_attempts_total counter\n"));
        assert!(output.contains("aranet4_read_attempts_total 3\n"));
    }

    #[tokio::test]
    async fn test_default_labels_do_not_override() {
        let registry = Registry::with_default_labels([("room", "kitchen"), ("name", "ignored")]);
        registry.register(Arc::new(Fixed(vec![
            Metric::gauge("aranet4_co2", "CO2", 650.0).with_label("name", "Aranet4 1A2B3"),
        ])));

        let metrics = registry.gather().await;

        assert_eq!(metrics[0].label("name"), Some("Aranet4 1A2B3"));
        assert_eq!(metrics[0].label("room"), Some("kitchen"));
        assert_eq!(metrics[0].labels[0].0, "name");
    }

    #[tokio::test]
    async fn test_multiple_collectors() {
        let registry = Registry::new();
        registry.register(Arc::new(Fixed(vec![Metric::gauge("one", "1", 1.0)])));
        registry.register(Arc::new(Fixed(vec![Metric::gauge("two", "2", 2.0)])));

        assert_eq!(registry.collector_count(), 2);
        assert_eq!(registry.gather().await.len(), 2);
    }
}
