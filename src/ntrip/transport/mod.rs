//! NTRIP caster transports.
//!
//! Three variants share one session surface: open a corrections stream,
//! read byte chunks, push GGA sentences upstream, close.  A session is an
//! owned value — dropping or closing it releases the underlying stream on
//! every exit path, so a dead transport can never leak its reader.

pub mod direct;
pub mod proxy;
pub mod websocket;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::error::{Result, RtkError};

use super::{NtripConfig, TransportKind};

pub const NTRIP_USER_AGENT: &str = "NTRIP WebGNSS Client";

/// An open corrections session over one of the transport variants.
pub enum NtripSession {
    Http { kind: TransportKind, session: HttpSession },
    WebSocket(websocket::WsSession),
}

/// Open a session over the given transport.  Each attempt is atomic: it
/// either returns an owned session or fails without side effects.
pub async fn open(
    kind: TransportKind,
    cfg:  &NtripConfig,
    http: &reqwest::Client,
) -> Result<NtripSession> {
    match kind {
        TransportKind::Direct => Ok(NtripSession::Http {
            kind,
            session: direct::open(cfg, http).await?,
        }),
        TransportKind::Proxy => Ok(NtripSession::Http {
            kind,
            session: proxy::open(cfg, http).await?,
        }),
        TransportKind::WebSocket => {
            Ok(NtripSession::WebSocket(websocket::open(cfg).await?))
        }
    }
}

impl NtripSession {
    pub fn kind(&self) -> TransportKind {
        match self {
            NtripSession::Http { kind, .. } => *kind,
            NtripSession::WebSocket(_)      => TransportKind::WebSocket,
        }
    }

    /// Next chunk of raw stream bytes.  `Ok(None)` is a clean end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            NtripSession::Http { session, .. } => session.next_chunk().await,
            NtripSession::WebSocket(ws)        => ws.next_chunk().await,
        }
    }

    pub async fn send_gga(&mut self, line: &str) -> Result<()> {
        match self {
            NtripSession::Http { session, .. } => session.send_gga(line).await,
            NtripSession::WebSocket(ws)        => ws.send_gga(line).await,
        }
    }

    pub async fn close(self) {
        match self {
            // Dropping the response stream tears the connection down.
            NtripSession::Http { .. }   => {}
            NtripSession::WebSocket(ws) => ws.close().await,
        }
    }
}

// ── Shared HTTP plumbing (direct + proxy) ────────────────────────────────────

type ChunkStream = BoxStream<'static, std::result::Result<Vec<u8>, reqwest::Error>>;

/// A streamed HTTP GET carrying corrections, plus the sibling POST target
/// for GGA pushes.
pub struct HttpSession {
    stream:  ChunkStream,
    http:    reqwest::Client,
    gga_url: Url,
    auth:    Option<String>,
}

impl HttpSession {
    pub(super) async fn open_stream(
        http:    &reqwest::Client,
        url:     Url,
        gga_url: Url,
        auth:    Option<String>,
    ) -> Result<Self> {
        let mut req = http
            .get(url)
            .header(USER_AGENT, NTRIP_USER_AGENT)
            .header(ACCEPT, "application/octet-stream");
        if let Some(a) = &auth {
            req = req.header(AUTHORIZATION, a.clone());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(RtkError::Transport(format!(
                "caster answered HTTP {}",
                resp.status()
            )));
        }
        let stream = resp.bytes_stream().map(|c| c.map(|b| b.to_vec())).boxed();
        Ok(Self { stream, http: http.clone(), gga_url, auth })
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.stream.next().await {
            None           => Ok(None),
            Some(Ok(b))    => Ok(Some(b)),
            Some(Err(e))   => Err(e.into()),
        }
    }

    /// Out-of-band GGA push.  Best effort: a non-2xx answer is logged, not
    /// escalated; a transport-level failure is returned so the caller can
    /// schedule its retry pushes.
    async fn send_gga(&mut self, line: &str) -> Result<()> {
        let mut req = self
            .http
            .post(self.gga_url.clone())
            .header(USER_AGENT, NTRIP_USER_AGENT)
            .header(CONTENT_TYPE, "text/plain")
            .body(line.to_string());
        if let Some(a) = &self.auth {
            req = req.header(AUTHORIZATION, a.clone());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            debug!("GGA push answered HTTP {}", resp.status());
        }
        Ok(())
    }
}

// ── URL and header helpers ────────────────────────────────────────────────────

/// Caster stream URL: HTTPS exactly when the caster port is 443.
pub(super) fn caster_url(cfg: &NtripConfig) -> String {
    let scheme = if cfg.caster_port == 443 { "https" } else { "http" };
    format!(
        "{scheme}://{}:{}/{}",
        cfg.caster_host, cfg.caster_port, cfg.mountpoint
    )
}

/// `Basic` authorization header value, when credentials are configured.
pub(super) fn basic_auth(cfg: &NtripConfig) -> Option<String> {
    if cfg.username.is_empty() {
        return None;
    }
    let token = BASE64.encode(format!("{}:{}", cfg.username, cfg.password));
    Some(format!("Basic {token}"))
}

/// True when a secure ambient context forbids contacting a plain-HTTP
/// caster directly.
pub(super) fn mixed_content_blocked(cfg: &NtripConfig) -> bool {
    cfg.secure_context && cfg.caster_port != 443
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NtripConfig {
        NtripConfig {
            caster_host: "caster.example.com".into(),
            mountpoint:  "MOUNT1".into(),
            username:    "user".into(),
            password:    "pass".into(),
            ..NtripConfig::default()
        }
    }

    #[test]
    fn caster_url_scheme_follows_port() {
        assert_eq!(
            caster_url(&cfg()),
            "http://caster.example.com:2101/MOUNT1"
        );
        let mut tls = cfg();
        tls.caster_port = 443;
        assert_eq!(caster_url(&tls), "https://caster.example.com:443/MOUNT1");
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        // base64("user:pass")
        assert_eq!(basic_auth(&cfg()).unwrap(), "Basic dXNlcjpwYXNz");

        let mut anon = cfg();
        anon.username.clear();
        assert_eq!(basic_auth(&anon), None);
    }

    #[test]
    fn mixed_content_requires_secure_context() {
        assert!(!mixed_content_blocked(&cfg()));

        let mut secure = cfg();
        secure.secure_context = true;
        assert!(mixed_content_blocked(&secure));

        secure.caster_port = 443;
        assert!(!mixed_content_blocked(&secure));
    }
}
