use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use vlbd_kubernetes::controller::{config::Config, error::ConfigError, server};
use vlbd_trace::init::TraceConfig;

use crate::controller::ControllerCmd;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cmd {
    #[arg(
        short,
        long,
        global = true,
        required = false,
        default_value = "info",
        help = "Log level(trace, debug, info, warn, error)"
    )]
    pub level: String,

    #[arg(
        value_enum,
        short = 'd',
        long,
        global = true,
        required = false,
        default_value = "plain",
        help = "Log display format"
    )]
    pub format: Format,

    #[arg(short = 'o', long = "log-file", global = true, help = "Log output file path")]
    pub log_file: Option<String>,

    #[clap(subcommand)]
    pub sub: SubCmd,
}

#[derive(Debug, Clone, Parser, ValueEnum)]
pub enum Format {
    Plain,
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Plain => write!(f, "plain"),
            Format::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum SubCmd {
    Controller(ControllerCmd),
    Version,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),

    #[error("Controller Error: {0}")]
    Controller(#[from] vlbd_kubernetes::controller::error::Error),
}

pub fn run() -> Result<(), Error> {
    let command = Cmd::parse();

    let trace_conf = TraceConfig {
        level: command.level,
        format: command.format.to_string(),
        file: command.log_file,
        _metrics_endpoint: None,
    };

    match command.sub {
        SubCmd::Version => println!("{}", env!("CARGO_PKG_VERSION")),
        SubCmd::Controller(c) => {
            let mut config = match c.file.as_ref() {
                None => Config::default(),
                Some(file) => Config::load(file)?,
            };
            c.apply(&mut config);

            server::start(config, trace_conf)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_parse_controller() {
        let cmd = Cmd::try_parse_from([
            "vlbd",
            "-l",
            "debug",
            "controller",
            "--https-port",
            "9443",
            "--requeue-interval",
            "60",
            "-d",
            "json",
        ])
        .unwrap();
        assert_eq!("debug", cmd.level);
        assert_eq!("json", cmd.format.to_string());
        let SubCmd::Controller(c) = cmd.sub else {
            panic!("expected controller subcommand");
        };

        let mut config = Config::default();
        c.apply(&mut config);
        assert_eq!(9443, config.https_port);
        assert_eq!(8080, config.http_port);
        assert_eq!(60, config.requeue_interval);
    }
}
