//! Bearer-authenticated product download.
//!
//! Redirects are chased by hand so the `Authorization` header is re-sent on
//! every hop; the transport itself never follows them.

use crate::types::{ProductDescriptor, SpratError, SpratResult, TransferReason, TransferTicket};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport policy for product transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Redirect hops followed before giving up
    pub max_redirects: usize,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, body included
    pub read_timeout_secs: u64,
    /// Turning this off accepts any certificate; legacy servers only
    pub verify_tls: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            connect_timeout_secs: 30,
            read_timeout_secs: 600,
            verify_tls: true,
        }
    }
}

pub(crate) fn build_client(options: &TransferOptions) -> SpratResult<Client> {
    if !options.verify_tls {
        log::warn!("TLS certificate verification is disabled for product transfers");
    }

    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
        .timeout(Duration::from_secs(options.read_timeout_secs))
        .danger_accept_invalid_certs(!options.verify_tls)
        .user_agent(concat!("sprat/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SpratError::transfer(TransferReason::Network, format!("failed to create HTTP client: {}", e)))
}

pub(crate) fn classify(e: &reqwest::Error) -> TransferReason {
    if e.is_timeout() {
        TransferReason::Timeout
    } else {
        TransferReason::Network
    }
}

/// Reason for a failed body read; reqwest wraps its own error in `ErrorKind::Other`
pub(crate) fn classify_read(e: &std::io::Error) -> TransferReason {
    let timed_out = e.kind() == std::io::ErrorKind::TimedOut
        || e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .map_or(false, |r| r.is_timeout());
    if timed_out {
        TransferReason::Timeout
    } else {
        TransferReason::Network
    }
}

/// Maps a terminal non-success status to its transfer reason
pub(crate) fn check_status(response: &Response) -> SpratResult<()> {
    let status = response.status();
    let code = status.as_u16();
    if code == 401 || code == 403 {
        return Err(SpratError::transfer(
            TransferReason::Unauthorized(code),
            format!("{} rejected the bearer token", response.url()),
        ));
    }
    if !status.is_success() {
        return Err(SpratError::transfer(
            TransferReason::HttpStatus(code),
            format!("HTTP {} from {}", code, response.url()),
        ));
    }
    Ok(())
}

fn is_redirect(code: u16) -> bool {
    matches!(code, 301 | 302 | 303 | 307 | 308)
}

/// Downloads product archives into a fixed output directory
pub struct TransferClient {
    client: Client,
    options: TransferOptions,
    base_url: String,
    output_dir: PathBuf,
}

impl TransferClient {
    /// `base_url` is the OData root serving `/Products({id})/$value`
    pub fn new(
        base_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> SpratResult<Self> {
        Ok(Self {
            client: build_client(&options)?,
            options,
            base_url: base_url.into(),
            output_dir: output_dir.into(),
        })
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Where `product` lands once fetched
    pub fn destination(&self, product: &ProductDescriptor) -> PathBuf {
        self.output_dir.join(format!("{}.zip", product.file_stem()))
    }

    /// Download a product's content to `<output_dir>/<sanitized name>.zip`
    pub fn fetch(&self, ticket: &TransferTicket, product: &ProductDescriptor) -> SpratResult<PathBuf> {
        let url = format!(
            "{}/Products({})/$value",
            self.base_url.trim_end_matches('/'),
            product.id
        );
        log::info!("Downloading product {} ({})", product.name, product.id);
        self.fetch_url(ticket, &url, &self.destination(product))
    }

    /// GET `url` with the ticket, following redirects by hand, and persist the body
    pub fn fetch_url(&self, ticket: &TransferTicket, url: &str, dest: &Path) -> SpratResult<PathBuf> {
        let mut current = Url::parse(url)
            .map_err(|e| SpratError::transfer(TransferReason::BadRedirect, format!("invalid URL {}: {}", url, e)))?;
        let mut hops = 0;

        let response = loop {
            let response = self
                .client
                .get(current.clone())
                .header(AUTHORIZATION, ticket.authorization())
                .send()
                .map_err(|e| SpratError::transfer(classify(&e), format!("GET {}: {}", current, e)))?;

            let code = response.status().as_u16();
            if !is_redirect(code) {
                break response;
            }

            if hops >= self.options.max_redirects {
                return Err(SpratError::transfer(
                    TransferReason::RedirectLoop,
                    format!("more than {} redirects starting at {}", self.options.max_redirects, url),
                ));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    SpratError::transfer(
                        TransferReason::BadRedirect,
                        format!("HTTP {} from {} without Location", code, current),
                    )
                })?;
            let next = current.join(location).map_err(|e| {
                SpratError::transfer(TransferReason::BadRedirect, format!("bad Location '{}': {}", location, e))
            })?;

            hops += 1;
            log::debug!("Redirect {} ({}) -> {}", hops, code, next);
            current = next;
        };

        check_status(&response)?;
        let bytes = persist_body(response, dest)?;
        log::info!("Saved {} bytes to {}", bytes, dest.display());
        Ok(dest.to_path_buf())
    }
}

/// Stream a body into `dest` via a temporary sibling, renamed only on success
pub(crate) fn persist_body<R: Read>(mut body: R, dest: &Path) -> SpratResult<u64> {
    let io_err = |e: std::io::Error| SpratError::transfer(TransferReason::Io, format!("{}: {}", dest.display(), e));

    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".sprat-")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(io_err)?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SpratError::transfer(classify_read(&e), format!("reading body: {}", e))),
        };
        tmp.write_all(&buf[..n]).map_err(io_err)?;
        total += n as u64;
    }

    tmp.flush().map_err(io_err)?;
    tmp.persist(dest).map_err(|e| io_err(e.error))?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options_verify_tls() {
        let options = TransferOptions::default();
        assert!(options.verify_tls);
        assert!(options.max_redirects > 0);
    }

    #[test]
    fn test_destination_uses_sanitized_name() {
        let client = TransferClient::new("https://host/odata/v1", "/data/out", TransferOptions::default()).unwrap();
        let product = ProductDescriptor {
            id: "1".into(),
            name: "S2A MSIL2A/2024".into(),
            collection: "SENTINEL-2".into(),
            product_type: "L2A".into(),
        };
        assert_eq!(client.destination(&product), PathBuf::from("/data/out/S2A_MSIL2A_2024.zip"));
    }

    #[test]
    fn test_persist_body_overwrites_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("p.zip");
        std::fs::write(&dest, b"old contents that are longer").unwrap();

        let n = persist_body(&b"new"[..], &dest).unwrap();
        assert_eq!(n, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "stalled"))
        }
    }

    #[test]
    fn test_classify_read_errors() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "stalled");
        assert_eq!(classify_read(&timed_out), TransferReason::Timeout);
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify_read(&reset), TransferReason::Network);
    }

    #[test]
    fn test_persist_body_failure_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("p.zip");

        let err = persist_body(FailingReader, &dest).unwrap_err();
        assert!(matches!(err, SpratError::Transfer { reason: TransferReason::Timeout, .. }));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
