#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `EnvFilter`, scoped to this crate so dependency noise
    /// stays at `warn`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "warn,gdrive_dl=debug",
            LogLevel::Info => "warn,gdrive_dl=info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
