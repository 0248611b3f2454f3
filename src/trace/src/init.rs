use std::str::FromStr;

use tracing_subscriber::{filter::LevelFilter, prelude::*, Registry};

use super::error::Error;

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
    pub _metrics_endpoint: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            level: "info".to_string(),
            format: "plain".to_string(),
            file: None,
            _metrics_endpoint: None,
        }
    }
}

/// Unknown levels fall back to info.
pub fn level_filter(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO)
}

pub fn prepare_tracing(conf: TraceConfig) -> Result<(), Error> {
    let filter = level_filter(&conf.level);
    let file = match conf.file.as_ref() {
        Some(path) => Some(std::fs::File::create(path).map_err(|e| Error::LogFile {
            path: path.clone(),
            source: e,
        })?),
        None => None,
    };
    let file_layer = file.map(|f| {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(false)
            .with_writer(f)
    });

    if conf.format == "json" {
        Registry::default()
            .with(file_layer)
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true).json())
            .with(filter)
            .try_init()
            .map_err(|e| Error::Init(e.to_string()))
    } else {
        Registry::default()
            .with(file_layer)
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true))
            .with(filter)
            .try_init()
            .map_err(|e| Error::Init(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_level_filter() {
        assert_eq!(LevelFilter::DEBUG, level_filter("debug"));
        assert_eq!(LevelFilter::WARN, level_filter("WARN"));
        assert_eq!(LevelFilter::INFO, level_filter("verbose"));
    }
}
