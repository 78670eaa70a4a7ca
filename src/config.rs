use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable naming the trace destination.
pub const TRACE_VAR: &str = "SEGALLOC_TRACE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceTarget {
    Stdout,
    File(PathBuf),
}

/// Settings read once, when a heap is first set up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub trace: Option<TraceTarget>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::parse(env::var_os(TRACE_VAR))
    }

    fn parse(trace: Option<OsString>) -> Self {
        let trace = trace.filter(|value| !value.is_empty()).map(|value| {
            if value == "-" {
                TraceTarget::Stdout
            } else {
                TraceTarget::File(PathBuf::from(value))
            }
        });

        Self { trace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset() {
        assert_eq!(Config::parse(None), Config::default());
        assert_eq!(Config::parse(Some(OsString::new())).trace, None);
    }

    #[test]
    fn stdout() {
        assert_eq!(Config::parse(Some("-".into())).trace, Some(TraceTarget::Stdout));
    }

    #[test]
    fn file() {
        let config = Config::parse(Some("trace.csv".into()));

        assert_eq!(config.trace, Some(TraceTarget::File("trace.csv".into())));
    }
}
