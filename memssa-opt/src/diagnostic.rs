use std::fmt;

use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub pass: &'static str,
    pub func: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.pass, self.func, self.message)
    }
}

// パスは自分で出力せず、必ずここを通す
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Debug => log::debug!("{}", diagnostic),
            Severity::Info => log::info!("{}", diagnostic),
            Severity::Warning => log::warn!("{}", diagnostic),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VecSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, severity: Severity) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == severity)
            .map(|diagnostic| diagnostic.message.as_str())
            .collect()
    }
}

impl DiagnosticSink for VecSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

pub struct Reporter<'a> {
    sink: &'a mut dyn DiagnosticSink,
    pass: &'static str,
    func: String,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a mut dyn DiagnosticSink, pass: &'static str, func: impl Into<String>) -> Self {
        Self {
            sink,
            pass,
            func: func.into(),
        }
    }

    pub fn report(&mut self, severity: Severity, message: impl Into<String>) {
        self.sink.report(Diagnostic {
            severity,
            pass: self.pass,
            func: self.func.clone(),
            message: message.into(),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.report(Severity::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.report(Severity::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.report(Severity::Warning, message);
    }
}
