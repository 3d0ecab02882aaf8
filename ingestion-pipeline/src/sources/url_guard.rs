//! SSRF protection for web ingestion URLs.
//!
//! Validation runs twice per fetch: once when a URL enters the system and
//! again immediately before the HTTP request, so a DNS record that changes
//! between the two cannot redirect the fetch into an internal network.

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;
use tracing::warn;
use url::Url;

use super::SourceError;

/// Validates that a URL is safe to fetch: HTTP(S) scheme, a resolvable
/// hostname, and no resolved address in a private or reserved range.
///
/// Hostnames are IDNA-normalized by URL parsing; malformed Unicode hosts
/// fail to parse and are rejected. Error messages include the original URL
/// and the offending resolved IP for diagnostics.
pub async fn validate_url(url_str: &str) -> Result<Url, SourceError> {
    let url = Url::parse(url_str).map_err(|e| {
        warn!(url = url_str, "Rejected unparseable ingestion URL");
        SourceError::Invalid(format!("Invalid hostname encoding or URL: {url_str}: {e}"))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        _ => {
            warn!(url = url_str, scheme = url.scheme(), "Rejected URL scheme");
            return Err(SourceError::Invalid(format!(
                "Only HTTP(S) URLs are allowed: {url_str}"
            )));
        }
    }

    let Some(host) = url.host_str() else {
        return Err(SourceError::Invalid(format!("URL has no hostname: {url_str}")));
    };

    let port = url.port_or_known_default().unwrap_or(443);

    // Literal IPs skip DNS; hostnames resolve to every address they map to
    let addresses: Vec<IpAddr> = if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        vec![ip]
    } else {
        let resolved: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| {
                warn!(url = url_str, host, "DNS resolution failed");
                SourceError::Invalid(format!("Cannot resolve hostname {host} in {url_str}: {e}"))
            })?
            .collect();
        if resolved.is_empty() {
            return Err(SourceError::Invalid(format!(
                "Cannot resolve hostname {host} in {url_str}"
            )));
        }
        resolved.into_iter().map(|a| a.ip()).collect()
    };

    for ip in addresses {
        if let Some(reason) = restricted_range(ip) {
            warn!(url = url_str, %ip, reason, "Rejected URL in restricted range");
            return Err(SourceError::Invalid(format!(
                "URL {url_str} resolves to {reason} {ip}"
            )));
        }
    }

    Ok(url)
}

/// Returns the rejection reason when an address falls in a range that must
/// never be fetched, or None when it is publicly routable.
fn restricted_range(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
            {
                Some("private/reserved IP")
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            // fec0::/10 was site-local before deprecation; still routable
            // inside old networks, so still rejected
            if (seg0 & 0xffc0) == 0xfec0 {
                Some("deprecated IPv6 site-local")
            } else if v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
            {
                Some("private/reserved IP")
            } else {
                None
            }
        }
    }
}
