//! Optional alert enrichment hook: additional context attached to an alert
//! at raise time, beyond the bare threshold breach that triggered it.
use crate::alert::{Category, Severity};
use crate::sampler::Sample;

/// Context available to an enricher when an alert is about to be raised.
pub struct AlertContext<'a> {
    /// Severity the alert is being raised at.
    pub severity: Severity,
    /// Category that triggered the alert.
    pub category: Category,
    /// The source identifier (mount point, "cpu", a service name).
    pub source: &'a str,
    /// The host sample that triggered the threshold breach.
    pub sample: Sample,
}

/// Produces supplementary human-readable context for an alert. Enrichment
/// is best-effort: a `None` return means the alert is raised without it,
/// never that raising the alert fails.
pub trait AlertEnricher: Send + Sync {
    /// Returns optional supplementary text describing the alert's context.
    fn enrich(&self, context: &AlertContext) -> Option<String>;
}

/// An enricher that never produces supplementary text. Used when
/// `alerts.enricher_enabled` is `false`, so alerts carry only their basic
/// threshold-breach message.
pub struct NoopEnricher;

impl AlertEnricher for NoopEnricher {
    fn enrich(&self, _context: &AlertContext) -> Option<String> {
        None
    }
}

/// An enricher that appends the numeric sample values driving the alert,
/// used when no richer enrichment source is configured.
pub struct SampleSummaryEnricher;

impl AlertEnricher for SampleSummaryEnricher {
    fn enrich(&self, context: &AlertContext) -> Option<String> {
        let value = match context.category {
            Category::Cpu => context.sample.cpu_percent,
            Category::Memory => context.sample.memory_percent,
            Category::Disk => context.sample.disk_percent,
            Category::Service | Category::Apt | Category::Cve | Category::System => return None,
        };
        Some(format!("{value:.1}% at time of alert"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_summary_enricher_formats_cpu_percent() {
        let enricher = SampleSummaryEnricher;
        let context = AlertContext {
            severity: Severity::Warning,
            category: Category::Cpu,
            source: "cpu",
            sample: Sample {
                cpu_percent: 87.25,
                memory_percent: 10.0,
                disk_percent: 10.0,
                uptime_secs: 100,
                ..Sample::default()
            },
        };
        assert_eq!(enricher.enrich(&context).as_deref(), Some("87.2% at time of alert"));
    }

    #[test]
    fn noop_enricher_never_produces_text() {
        let enricher = NoopEnricher;
        let context = AlertContext {
            severity: Severity::Critical,
            category: Category::Disk,
            source: "/",
            sample: Sample {
                disk_percent: 99.0,
                ..Sample::default()
            },
        };
        assert!(enricher.enrich(&context).is_none());
    }

    #[test]
    fn sample_summary_enricher_skips_service_category() {
        let enricher = SampleSummaryEnricher;
        let context = AlertContext {
            severity: Severity::Info,
            category: Category::Service,
            source: "sshd",
            sample: Sample::default(),
        };
        assert!(enricher.enrich(&context).is_none());
    }
}
