//! Direct HTTP(S) transport: GET straight against the caster.

use url::Url;

use crate::error::{Result, RtkError};

use super::{basic_auth, caster_url, mixed_content_blocked, HttpSession};
use crate::ntrip::NtripConfig;

/// Open the corrections stream directly against `host:port/mountpoint`.
///
/// Refuses to run when the ambient context is secure and the caster is
/// plain HTTP; the caller escalates to WebSocket or proxy instead.
pub(super) async fn open(cfg: &NtripConfig, http: &reqwest::Client) -> Result<HttpSession> {
    if mixed_content_blocked(cfg) {
        return Err(RtkError::Transport(
            "mixed content: plain-HTTP caster from a secure context".into(),
        ));
    }
    let url = Url::parse(&caster_url(cfg))?;
    // GGA goes back as a POST to the same URL.
    HttpSession::open_stream(http, url.clone(), url, basic_auth(cfg)).await
}
