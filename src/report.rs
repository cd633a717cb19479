//! 错误上报
//!
//! 核心把监听器故障、特化失败、被拒绝的调度等旁路问题以结构化的
//! (来源, 上下文, 错误) 形式交给上报接收方，自身不生成面向用户的文本。

use std::fmt;

use tracing::{debug, error, info, warn};

/// 上报级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// 一条结构化上报
#[derive(Debug)]
pub struct ErrorReport {
    pub source: String,
    pub context: String,
    pub severity: Severity,
    pub error: Option<anyhow::Error>,
    pub details: Vec<(String, String)>,
}

impl ErrorReport {
    pub fn new(source: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            context: context.into(),
            severity: Severity::Error,
            error: None,
            details: Vec::new(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }
}

/// 上报接收方
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// 通过 tracing 输出上报
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: ErrorReport) {
        let details = report
            .details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let cause = report
            .error
            .as_ref()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();

        match report.severity {
            Severity::Debug => debug!(source = %report.source, details = %details, error = %cause, "{}", report.context),
            Severity::Info => info!(source = %report.source, details = %details, error = %cause, "{}", report.context),
            Severity::Warning => warn!(source = %report.source, details = %details, error = %cause, "{}", report.context),
            Severity::Error => error!(source = %report.source, details = %details, error = %cause, "{}", report.context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<ErrorReport>>);

    impl ErrorReporter for Collecting {
        fn report(&self, report: ErrorReport) {
            self.0.lock().push(report);
        }
    }

    #[test]
    fn test_report_builder() {
        let sink = Collecting::default();
        sink.report(
            ErrorReport::new("plugin-a", "Listener failed")
                .severity(Severity::Warning)
                .error(anyhow::anyhow!("boom"))
                .detail("type", "PLAY/OUT/chat"),
        );
        let reports = sink.0.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Warning);
        assert_eq!(reports[0].details[0].1, "PLAY/OUT/chat");
        assert_eq!(reports[0].error.as_ref().unwrap().to_string(), "boom");

        // tracing 接收方不应 panic
        TracingErrorReporter.report(ErrorReport::new("core", "noop").severity(Severity::Debug));
    }
}
