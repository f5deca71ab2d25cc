//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use connpool::{Options, Pool};
/// use std::net::{TcpListener, TcpStream};
///
/// let listener = TcpListener::bind("127.0.0.1:0").unwrap();
/// let addr = listener.local_addr().unwrap();
/// let pool = Pool::new(Options::default(), move || TcpStream::connect(addr)).unwrap();
///
/// let conn = pool.get().unwrap();
/// assert!(pool.put(conn));
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.misses, 1);
/// assert_eq!(metrics.returned, 1);
/// assert_eq!(metrics.available, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// `get` calls served from the pool
    pub hits: usize,

    /// `get` calls that had to dial a new connection
    pub misses: usize,

    /// Dials that failed
    pub dial_failures: usize,

    /// Connections accepted back by `put`
    pub returned: usize,

    /// Connections rejected by `put` and closed
    pub rejected: usize,

    /// Connections closed by the reaper for being idle
    pub reaped: usize,

    /// Close calls that returned an error
    pub close_failures: usize,

    /// Connections currently idle in the pool
    pub available: usize,

    /// Maximum number of idle connections kept
    pub max_capacity: usize,
}

impl PoolMetrics {
    /// Fraction of `get` calls served from the pool (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("hits".to_string(), self.hits.to_string());
        metrics.insert("misses".to_string(), self.misses.to_string());
        metrics.insert("dial_failures".to_string(), self.dial_failures.to_string());
        metrics.insert("returned".to_string(), self.returned.to_string());
        metrics.insert("rejected".to_string(), self.rejected.to_string());
        metrics.insert("reaped".to_string(), self.reaped.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics.insert("hit_ratio".to_string(), format!("{:.2}", self.hit_ratio()));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use connpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let metrics = PoolMetrics { available: 3, max_capacity: 10, ..Default::default() };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("upstream".to_string(), "db".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&metrics, "backend", Some(&tags));
    /// assert!(output.contains("connpool_connections_available{pool=\"backend\",upstream=\"db\"} 3"));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges: [(&str, &str, String); 3] = [
            ("connpool_connections_available", "Idle connections in the pool", metrics.available.to_string()),
            ("connpool_max_capacity", "Maximum idle connections kept", metrics.max_capacity.to_string()),
            ("connpool_hit_ratio", "Fraction of gets served from the pool", format!("{:.2}", metrics.hit_ratio())),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, help, "gauge", &labels, &value);
        }

        let counters = [
            ("connpool_hits_total", "Gets served from the pool", metrics.hits),
            ("connpool_misses_total", "Gets that dialed a new connection", metrics.misses),
            ("connpool_dial_failures_total", "Failed dials", metrics.dial_failures),
            ("connpool_returned_total", "Connections accepted back", metrics.returned),
            ("connpool_rejected_total", "Connections rejected and closed", metrics.rejected),
            ("connpool_reaped_total", "Idle connections reaped", metrics.reaped),
            ("connpool_close_failures_total", "Failed connection closes", metrics.close_failures),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, help, "counter", &labels, &value.to_string());
        }

        output
    }

    fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: &str) {
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} {}\n", name, kind));
        out.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub dial_failures: AtomicUsize,
    pub returned: AtomicUsize,
    pub rejected: AtomicUsize,
    pub reaped: AtomicUsize,
    pub close_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, available: usize, capacity: usize) -> PoolMetrics {
        PoolMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            available,
            max_capacity: capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = PoolMetrics {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(metrics.hit_ratio(), 0.75);
        assert_eq!(PoolMetrics::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_tracker_snapshot() {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.hits);
        MetricsTracker::add(&tracker.reaped, 4);

        let metrics = tracker.get_metrics(2, 10);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.reaped, 4);
        assert_eq!(metrics.available, 2);
        assert_eq!(metrics.export().get("reaped").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_prometheus_counters() {
        let metrics = PoolMetrics {
            rejected: 2,
            ..Default::default()
        };
        let output = MetricsExporter::export_prometheus(&metrics, "p", None);
        assert!(output.contains("# TYPE connpool_rejected_total counter"));
        assert!(output.contains("connpool_rejected_total{pool=\"p\"} 2"));
    }
}
