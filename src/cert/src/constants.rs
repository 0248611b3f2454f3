pub const DEFAULT_TLS_CERT: &str = "/etc/vlbd/cert/tls.crt";
pub const DEFAULT_TLS_KEY: &str = "/etc/vlbd/cert/tls.key";
