use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct ControllerCmd {
    #[arg(long = "http-port", help = "HTTP server serving port [default: 8080]")]
    pub http_port: Option<u32>,

    #[arg(long = "https-port", help = "HTTPS server serving port for webhooks [default: 8443]")]
    pub https_port: Option<u32>,

    #[arg(short = 'f', long, help = "Config file path for the controller")]
    pub file: Option<String>,

    #[arg(long = "tls-cert", help = "path to TLS Certificate for webhooks")]
    pub tls_cert: Option<String>,

    #[arg(long = "tls-key", help = "path to TLS Key for webhooks")]
    pub tls_key: Option<String>,

    #[arg(
        long = "requeue-interval",
        help = "Interval in seconds to resync ready objects [default: 1800]"
    )]
    pub requeue_interval: Option<u64>,
}

impl ControllerCmd {
    /// Applies the flags given on the command line on top of `config`.
    pub fn apply(self, config: &mut vlbd_kubernetes::controller::config::Config) {
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.https_port {
            config.https_port = port;
        }
        if let Some(cert) = self.tls_cert {
            config.tls.cert = cert;
        }
        if let Some(key) = self.tls_key {
            config.tls.key = key;
        }
        if let Some(interval) = self.requeue_interval {
            config.requeue_interval = interval;
        }
    }
}
