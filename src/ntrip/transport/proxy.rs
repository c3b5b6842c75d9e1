//! HTTP proxy transport: GET through a bridge that relays to the caster.
//!
//! The bridge takes the caster coordinates as query parameters, so the
//! client never speaks to the caster itself — useful when the caster is
//! unreachable from a secure context.

use url::Url;

use crate::error::{Result, RtkError};

use super::HttpSession;
use crate::ntrip::NtripConfig;

pub(super) async fn open(cfg: &NtripConfig, http: &reqwest::Client) -> Result<HttpSession> {
    let base = cfg
        .proxy_base
        .as_deref()
        .ok_or_else(|| RtkError::Config("proxy_url not configured".into()))?;

    let stream_url = proxied_url(base, &cfg.mountpoint, "", cfg)?;
    let gga_url = proxied_url(base, &cfg.mountpoint, "/gga", cfg)?;
    // Credentials travel in the query string; no Authorization header.
    HttpSession::open_stream(http, stream_url, gga_url, None).await
}

/// `<base>/<mountpoint><suffix>?host=…&port=…[&user=…&password=…]`
fn proxied_url(base: &str, mountpoint: &str, suffix: &str, cfg: &NtripConfig) -> Result<Url> {
    let mut url = Url::parse(&format!(
        "{}/{}{}",
        base.trim_end_matches('/'),
        mountpoint,
        suffix
    ))?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("host", &cfg.caster_host);
        q.append_pair("port", &cfg.caster_port.to_string());
        if !cfg.username.is_empty() {
            q.append_pair("user", &cfg.username);
            q.append_pair("password", &cfg.password);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxied_urls_carry_caster_coordinates() {
        let cfg = NtripConfig {
            caster_host: "caster.example.com".into(),
            caster_port: 2101,
            mountpoint:  "MOUNT1".into(),
            username:    "user".into(),
            password:    "p&ss".into(),
            ..NtripConfig::default()
        };

        let url = proxied_url("https://bridge.example/ntrip/", "MOUNT1", "", &cfg).unwrap();
        assert_eq!(
            url.as_str(),
            "https://bridge.example/ntrip/MOUNT1?host=caster.example.com&port=2101&user=user&password=p%26ss"
        );

        let gga = proxied_url("https://bridge.example/ntrip", "MOUNT1", "/gga", &cfg).unwrap();
        assert!(gga.path().ends_with("/MOUNT1/gga"));
    }

    #[test]
    fn anonymous_proxy_urls_omit_credentials() {
        let cfg = NtripConfig {
            caster_host: "caster.example.com".into(),
            mountpoint:  "MOUNT1".into(),
            ..NtripConfig::default()
        };
        let url = proxied_url("https://bridge.example", "MOUNT1", "", &cfg).unwrap();
        assert!(!url.as_str().contains("user"));
        assert!(!url.as_str().contains("password"));
    }
}
