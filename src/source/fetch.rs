//! Image download from a user-supplied URL
//!
//! Destinations are checked before every request, redirects included:
//! loopback, private, link-local and unspecified addresses are refused
//! unless the fetcher was built with `allow_private`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response};
use url::Url;

use super::ImageSource;
use crate::config::FetchConfig;
use crate::{Error, Result};

/// Filename used when the URL has no usable last path segment
pub const DEFAULT_URL_FILENAME: &str = "downloaded-image";

/// Most redirects followed for one image
pub const MAX_REDIRECTS: usize = 10;

/// Fetches images over HTTP(S)
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
    allow_private: bool,
}

impl ImageFetcher {
    /// Create a fetcher with the given timeout, size limit and address policy
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &FetchConfig) -> Result<Self> {
        // Redirects are followed by hand so each hop is checked
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("Vista/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
            allow_private: config.allow_private,
        })
    }

    /// Load an image from `url`
    ///
    /// The URL is validated before any network access.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `InvalidUrl` if `url` is malformed or not http(s)
    /// - `Fetch` if the destination is a blocked address, the request fails,
    ///   the status is not successful, or the body is too large
    /// - `NotAnImage` if the declared content type is not an image
    pub async fn load_from_url(&self, url: &str) -> Result<ImageSource> {
        let parsed = parse_image_url(url)?;
        let filename = filename_from_url(&parsed);

        let mut response = self.follow(parsed).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{url} responded with {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(Error::NotAnImage(format!(
                "{url} has content type {content_type:?}"
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(Error::Fetch(format!("{url} exceeds {} bytes", self.max_bytes)));
        }

        let bytes = self.read_limited(&mut response, url).await?;

        tracing::debug!(url, content_type, len = bytes.len(), "fetched image");

        ImageSource::from_bytes(bytes, &content_type, filename)
    }

    /// Send a GET, following redirects and checking every destination
    async fn follow(&self, mut url: Url) -> Result<Response> {
        for _ in 0..=MAX_REDIRECTS {
            self.check_destination(&url).await?;

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::Fetch(format!("request failed: {e}")))?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            else {
                return Ok(response);
            };

            let next = url
                .join(&location)
                .map_err(|e| Error::Fetch(format!("bad redirect from {url}: {e}")))?;
            tracing::debug!(from = %url, to = %next, "following redirect");
            url = parse_image_url(next.as_str())
                .map_err(|e| Error::Fetch(format!("bad redirect from {url}: {e}")))?;
        }

        Err(Error::Fetch(format!("more than {MAX_REDIRECTS} redirects")))
    }

    /// Refuse hosts that are or resolve to internal addresses
    async fn check_destination(&self, url: &Url) -> Result<()> {
        if self.allow_private {
            return Ok(());
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: missing host")))?;
        let port = url.port_or_known_default().unwrap_or(80);

        // Literal addresses come back bracketed for IPv6
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return reject_blocked(host, ip);
        }

        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Fetch(format!("failed to resolve {host}: {e}")))?;

        for addr in addrs {
            reject_blocked(host, addr.ip())?;
        }

        Ok(())
    }

    /// Read the body, stopping as soon as it passes the size limit
    async fn read_limited(&self, response: &mut Response, url: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Fetch(format!("failed to read body: {e}")))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(Error::Fetch(format!("{url} exceeds {} bytes", self.max_bytes)));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

fn reject_blocked(host: &str, ip: IpAddr) -> Result<()> {
    if is_blocked_ip(ip) {
        return Err(Error::Fetch(format!(
            "blocked: {host} resolves to internal address {ip}"
        )));
    }
    Ok(())
}

/// Whether `ip` is loopback, private, link-local or otherwise internal
///
/// Blocks:
/// - IPv4: 0.0.0.0/8, 127.0.0.0/8, 10.0.0.0/8, 172.16.0.0/12,
///   192.168.0.0/16, 169.254.0.0/16 (incl. cloud metadata), 100.64.0.0/10
/// - IPv6: `::`, `::1`, `fc00::/7`, `fe80::/10`, and IPv4-mapped forms of the above
#[must_use]
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        // 100.64.0.0/10 - carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }

    let first = ip.segments()[0];

    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 - unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 - link-local
        || (first & 0xffc0) == 0xfe80
}

/// Parse and validate an image URL
fn parse_image_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme {other}; only http and https are allowed"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("{url}: missing host")));
    }

    Ok(parsed)
}

/// Last non-empty path segment, percent-decoded, or the default name
fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| urlencoding::decode(s).map_or_else(|_| s.to_string(), |d| d.into_owned()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_URL_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_urls() {
        assert!(matches!(parse_image_url("not-a-url"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_image_url(""), Err(Error::InvalidUrl(_))));
        assert!(matches!(
            parse_image_url("ftp://example.com/a.png"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_image_url("file:///tmp/a.png"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn accepts_http_urls() {
        assert!(parse_image_url("https://example.com/cat.png").is_ok());
        assert!(parse_image_url("  http://example.com/  ").is_ok());
    }

    #[test]
    fn filename_from_last_segment() {
        let url = Url::parse("https://example.com/images/cat.png?size=large").unwrap();
        assert_eq!(filename_from_url(&url), "cat.png");

        let url = Url::parse("https://example.com/images/dir/").unwrap();
        assert_eq!(filename_from_url(&url), "dir");

        let url = Url::parse("https://example.com/red%20apple.jpg").unwrap();
        assert_eq!(filename_from_url(&url), "red apple.jpg");
    }

    #[test]
    fn blocks_internal_ipv4() {
        for ip in [
            "127.0.0.1",
            "127.255.255.255",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
        ] {
            assert!(is_blocked_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn allows_public_ipv4() {
        for ip in ["8.8.8.8", "172.32.0.1", "1.1.1.1", "100.128.0.1"] {
            assert!(!is_blocked_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn blocks_internal_ipv6() {
        for ip in ["::1", "::", "fc00::1", "fd12:3456::1", "fe80::1", "::ffff:127.0.0.1", "::ffff:10.0.0.1"] {
            assert!(is_blocked_ip(ip.parse().unwrap()), "{ip}");
        }
        assert!(!is_blocked_ip("2606:4700:4700::1111".parse().unwrap()));
    }

    #[tokio::test]
    async fn refuses_internal_destinations_by_default() {
        let fetcher = ImageFetcher::new(&FetchConfig::default()).unwrap();

        for url in [
            "http://127.0.0.1/a.png",
            "http://[::1]/a.png",
            "http://169.254.169.254/latest/meta-data/",
            "http://localhost:8080/a.png",
        ] {
            let parsed = parse_image_url(url).unwrap();
            let err = fetcher.check_destination(&parsed).await.unwrap_err();
            assert!(matches!(err, Error::Fetch(_)), "{url}: {err:?}");
        }
    }

    #[tokio::test]
    async fn allow_private_skips_the_check() {
        let fetcher = ImageFetcher::new(&FetchConfig {
            allow_private: true,
            ..FetchConfig::default()
        })
        .unwrap();

        let parsed = parse_image_url("http://127.0.0.1/a.png").unwrap();
        assert!(fetcher.check_destination(&parsed).await.is_ok());
    }

    #[test]
    fn filename_falls_back_to_default() {
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(filename_from_url(&url), DEFAULT_URL_FILENAME);

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), DEFAULT_URL_FILENAME);
    }
}
