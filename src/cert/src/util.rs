use std::{fs::File, io::BufReader};

use rustls::{Certificate, PrivateKey, ServerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in {0}")]
    NoCertificate(String),

    #[error("No PKCS8-encoded private key found in {0}")]
    NoPrivateKey(String),

    #[error("More than one PKCS8-encoded private key found in {0}")]
    TooManyPrivateKeys(String),

    #[error("Invalid TLS configuration: {0}")]
    Tls(#[source] rustls::Error),
}

fn open(path: &str) -> Result<BufReader<File>, Error> {
    let file = File::open(path).map_err(|e| Error::Io {
        path: path.to_string(),
        source: e,
    })?;
    Ok(BufReader::new(file))
}

pub fn load_certificates_from_pem(path: &str) -> Result<Vec<Certificate>, Error> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader).map_err(|e| Error::Io {
        path: path.to_string(),
        source: e,
    })?;
    if certs.is_empty() {
        return Err(Error::NoCertificate(path.to_string()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

pub fn load_private_key_from_file(path: &str) -> Result<PrivateKey, Error> {
    let mut reader = open(path)?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(|e| Error::Io {
        path: path.to_string(),
        source: e,
    })?;

    match keys.len() {
        0 => Err(Error::NoPrivateKey(path.to_string())),
        1 => Ok(PrivateKey(keys.remove(0))),
        _ => Err(Error::TooManyPrivateKeys(path.to_string())),
    }
}

/// Server configuration for the webhook listener.
pub fn server_config(cert: &str, key: &str) -> Result<ServerConfig, Error> {
    let certs = load_certificates_from_pem(cert)?;
    let key = load_private_key_from_file(key)?;
    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(Error::Tls)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("vlbd-cert-{}-{name}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn works_server_config() {
        let cert = rcgen::generate_simple_self_signed(vec!["vlbd-webhook.kube-system.svc".to_string()]).unwrap();
        let cert_path = write_temp("tls.crt", &cert.serialize_pem().unwrap());
        let key_path = write_temp("tls.key", &cert.serialize_private_key_pem());

        assert_eq!(1, load_certificates_from_pem(&cert_path).unwrap().len());
        load_private_key_from_file(&key_path).unwrap();
        server_config(&cert_path, &key_path).unwrap();
    }

    #[test]
    fn fails_load_missing_files() {
        assert!(matches!(
            load_certificates_from_pem("/nonexistent/tls.crt"),
            Err(Error::Io { .. })
        ));
        let empty = write_temp("empty.pem", "");
        assert!(matches!(
            load_certificates_from_pem(&empty),
            Err(Error::NoCertificate(_))
        ));
        assert!(matches!(
            load_private_key_from_file(&empty),
            Err(Error::NoPrivateKey(_))
        ));
    }
}
