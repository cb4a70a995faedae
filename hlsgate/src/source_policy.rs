//! Source URL admission.
//!
//! The transcoder fetches whatever `src` names, so by default only public
//! http(s) hosts are allowed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use url::{Host, Url};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("src is not a valid URL: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("src scheme must be http or https, got {0:?}")]
    Scheme(String),
    #[error("src has no host")]
    MissingHost,
    #[error("src host {host} could not be resolved")]
    Unresolvable { host: String },
    #[error("src host {host} resolves to non-public address {addr}")]
    NonPublic { host: String, addr: IpAddr },
}

#[async_trait]
pub trait SourcePolicy: Send + Sync {
    async fn check(&self, src: &str) -> Result<(), SourceError>;
}

/// Accepts every source. For tests and trusted deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllSources;

#[async_trait]
impl SourcePolicy for AllowAllSources {
    async fn check(&self, _src: &str) -> Result<(), SourceError> {
        Ok(())
    }
}

/// http(s) only, and every address the host resolves to must be public.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicSourcePolicy;

#[async_trait]
impl SourcePolicy for PublicSourcePolicy {
    async fn check(&self, src: &str) -> Result<(), SourceError> {
        let url = Url::parse(src)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::Scheme(url.scheme().to_string()));
        }

        let host = url.host().ok_or(SourceError::MissingHost)?;
        let host_str = host.to_string();
        let addrs: Vec<IpAddr> = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => {
                let port = url.port_or_known_default().unwrap_or(80);
                tokio::net::lookup_host((domain, port))
                    .await
                    .map_err(|e| {
                        tracing::debug!(host = domain, error = %e, "Source host lookup failed");
                        SourceError::Unresolvable {
                            host: host_str.clone(),
                        }
                    })?
                    .map(|sa| sa.ip())
                    .collect()
            }
        };
        if addrs.is_empty() {
            return Err(SourceError::Unresolvable { host: host_str });
        }

        match addrs.into_iter().find(|addr| !is_public(addr)) {
            Some(addr) => Err(SourceError::NonPublic {
                host: host_str,
                addr,
            }),
            None => Ok(()),
        }
    }
}

pub fn is_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b);
    let reserved = a >= 240;
    let benchmarking = a == 198 && (b == 18 || b == 19);
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        || a == 0
        || shared
        || reserved
        || benchmarking)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
        || documentation)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn check(src: &str) -> Result<(), SourceError> {
        PublicSourcePolicy.check(src).await
    }

    #[tokio::test]
    async fn public_ip_literals_are_allowed() {
        check("http://93.184.216.34/video.mp4").await.unwrap();
        check("https://[2606:2800:220:1:248:1893:25c8:1946]/v.mp4")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_http_schemes_are_rejected() {
        for src in ["file:///etc/passwd", "ftp://93.184.216.34/a", "rtmp://93.184.216.34/live"] {
            assert!(
                matches!(check(src).await, Err(SourceError::Scheme(_))),
                "{src} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn malformed_urls_are_rejected() {
        assert!(matches!(
            check("not a url").await,
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn internal_addresses_are_rejected() {
        for src in [
            "http://127.0.0.1/a.mp4",
            "http://10.0.0.5/a.mp4",
            "http://172.16.1.1/a.mp4",
            "http://192.168.1.1/a.mp4",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/a.mp4",
            "http://0.0.0.0/a.mp4",
            "http://224.0.0.1/a.mp4",
            "http://[::1]/a.mp4",
            "http://[fd00::1]/a.mp4",
            "http://[fe80::1]/a.mp4",
            "http://[::ffff:127.0.0.1]/a.mp4",
        ] {
            assert!(
                matches!(check(src).await, Err(SourceError::NonPublic { .. })),
                "{src} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn localhost_name_is_rejected() {
        let err = check("http://localhost:8080/a.mp4").await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::NonPublic { .. } | SourceError::Unresolvable { .. }
        ));
    }

    #[tokio::test]
    async fn allow_all_accepts_anything() {
        AllowAllSources.check("file:///tmp/x").await.unwrap();
    }

    #[test]
    fn public_classification() {
        assert!(is_public(&"8.8.8.8".parse().unwrap()));
        assert!(!is_public(&"192.0.2.10".parse().unwrap()));
        assert!(!is_public(&"255.255.255.255".parse().unwrap()));
        assert!(!is_public(&"2001:db8::1".parse().unwrap()));
    }
}
