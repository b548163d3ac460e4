//! Playback endpoint resolution

use std::net::IpAddr;

use reqwest::Url;

use super::{NegotiationError, PreviewConfig};

/// Where and how a preview is played
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEndpoint {
    /// Embed the URL directly over HTTP; nothing to negotiate
    DirectEmbed(Url),
    /// POST an offer to the URL and play the answered session
    Negotiated(Url),
}

impl PlaybackEndpoint {
    pub fn url(&self) -> &Url {
        match self {
            PlaybackEndpoint::DirectEmbed(url) | PlaybackEndpoint::Negotiated(url) => url,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, PlaybackEndpoint::DirectEmbed(_))
    }
}

/// Resolve the playback endpoint of a device
///
/// In priority order:
/// 1. publish endpoint on an HTTP-only host: direct embed, push suffix stripped
/// 2. publish endpoint path ending in the push suffix: suffix swapped for the pull suffix
/// 3. `{base}/{room}/{id}{pull}` on the local or public base
pub fn resolve_endpoint(
    config: &PreviewConfig,
    room: &str,
    device_id: &str,
    publish_endpoint: Option<&str>,
) -> Result<PlaybackEndpoint, NegotiationError> {
    if let Some(mut url) = publish_endpoint.and_then(|e| Url::parse(e.trim()).ok()) {
        let http_only = url.host_str().is_some_and(|host| {
            config
                .http_only_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
        });

        if http_only {
            if let Some(stripped) = url.path().strip_suffix(config.push_suffix.as_str()) {
                let stripped = stripped.to_string();
                url.set_path(&stripped);
            }
            return Ok(PlaybackEndpoint::DirectEmbed(url));
        }

        if let Some(prefix) = url.path().strip_suffix(config.push_suffix.as_str()) {
            let path = format!("{}{}", prefix, config.pull_suffix);
            url.set_path(&path);
            return Ok(PlaybackEndpoint::Negotiated(url));
        }
    }

    let base = match config.origin {
        Some(ref origin) if is_local_origin(origin) => &config.local_base,
        _ => &config.public_base,
    };
    let raw = format!(
        "{}/{}/{}{}",
        base.trim_end_matches('/'),
        room,
        device_id,
        config.pull_suffix
    );

    Url::parse(&raw)
        .map(PlaybackEndpoint::Negotiated)
        .map_err(|e| NegotiationError::InvalidEndpoint(format!("{raw}: {e}")))
}

/// Whether an origin is on a private, loopback or link-local network
pub fn is_local_origin(origin: &Url) -> bool {
    let Some(host) = origin.host_str() else {
        return false;
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        Err(_) => {
            let host = host.to_ascii_lowercase();
            host == "localhost" || host.ends_with(".local")
        }
    }
}
