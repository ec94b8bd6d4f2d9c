use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use shelfscan_core::error::AppError;
use shelfscan_core::traits::{ContextProvider, PageSnapshot};
use url::Url;

/// Page context backed by a single HTTP GET.
///
/// The document is complete once the body has been read, so readiness is
/// immediate. Pages that build their content with JavaScript need the
/// browser provider instead.
///
/// By default, SSRF protection is **enabled**: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct HttpContextProvider {
    client: Client,
    timeout: Duration,
    ssrf_protection: bool,
}

/// A loaded page held by [`HttpContextProvider`].
#[derive(Debug)]
pub struct HttpPage {
    locator: String,
    final_url: String,
    html: String,
}

impl HttpContextProvider {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; shelfscan/0.1)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl ContextProvider for HttpContextProvider {
    type Handle = HttpPage;

    async fn open(&self, locator: &str) -> Result<HttpPage, AppError> {
        if self.ssrf_protection {
            validate_url(locator).await?;
        }

        let response = self.client.get(locator).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::LoadTimeout(self.timeout.as_millis() as u64)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                locator
            )));
        }

        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        tracing::debug!(%locator, %final_url, bytes = html.len(), "Page loaded over HTTP");
        Ok(HttpPage {
            locator: locator.to_string(),
            final_url,
            html,
        })
    }

    async fn wait_until_ready(&self, _handle: &HttpPage, _timeout: Duration) -> Result<(), AppError> {
        Ok(())
    }

    async fn snapshot(&self, handle: &HttpPage) -> Result<PageSnapshot, AppError> {
        Ok(PageSnapshot {
            locator: handle.locator.clone(),
            final_url: handle.final_url.clone(),
            html: handle.html.clone(),
        })
    }

    async fn close(&self, _handle: HttpPage) -> Result<(), AppError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::HttpError(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16 (cloud metadata)
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("fc00::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_private_hosts() {
        let err = validate_url("http://127.0.0.1/admin").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));

        let err = validate_url("http://[::1]:8080/").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_bad_scheme() {
        let err = validate_url("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_open_blocks_private_locator() {
        let provider = HttpContextProvider::new().unwrap();
        let err = provider.open("http://10.1.2.3/products/1").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
    }

    #[tokio::test]
    async fn test_serves_local_page_when_private_allowed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "<html><title>Local Mug</title></html>";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let provider = HttpContextProvider::new().unwrap().allow_private_urls();
        let locator = format!("http://{addr}/products/mug");
        let page = provider.open(&locator).await.unwrap();
        provider
            .wait_until_ready(&page, Duration::from_secs(1))
            .await
            .unwrap();
        let snapshot = provider.snapshot(&page).await.unwrap();
        assert_eq!(snapshot.locator, locator);
        assert!(snapshot.html.contains("Local Mug"));
        provider.close(page).await.unwrap();
    }
}
