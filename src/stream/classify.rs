//! Playability classifier
//!
//! Pure, synchronous decision: can the browser play this container natively,
//! or does it need a transcode session? The mapping is intentionally
//! conservative: any matroska-family container is always transcoded because
//! browser-native support for that container is inconsistent, regardless of
//! the inner codec. Unrecognized inputs fail open as `Native` and let the
//! player surface a playback error if the guess was wrong.

use crate::models::{Playability, PlayabilityVerdict};

/// Matroska-family extensions: always transcoded
const MATROSKA_EXTENSIONS: &[&str] = &["mkv", "mk3d", "mka", "mks"];

/// Containers browsers decode natively with browser-safe codecs
const NATIVE_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm"];

/// Content types browsers decode natively
const NATIVE_CONTENT_TYPES: &[&str] = &["video/mp4", "video/webm"];

/// Content types that mark a matroska payload even behind a neutral extension
const MATROSKA_CONTENT_TYPES: &[&str] = &["video/x-matroska", "video/matroska"];

/// Classify a stream URL (and optionally a probed content type) for browser
/// playability.
pub fn classify(url: &str, probed_content_type: Option<&str>) -> PlayabilityVerdict {
    let ext = extension_of(url);
    let mime = probed_content_type.map(|s| {
        // strip parameters like "; charset=utf-8"
        s.split(';').next().unwrap_or(s).trim().to_ascii_lowercase()
    });

    // Matroska always transcodes, whatever the declared content type says
    if let Some(ref e) = ext {
        if MATROSKA_EXTENSIONS.contains(&e.as_str()) {
            return verdict(ext, mime, Playability::Transcode, "matroska-container");
        }
    }
    if let Some(ref m) = mime {
        if MATROSKA_CONTENT_TYPES.contains(&m.as_str()) {
            return verdict(ext, mime, Playability::Transcode, "matroska-content-type");
        }
    }

    // Static allow-list for native playback
    if let Some(ref m) = mime {
        if NATIVE_CONTENT_TYPES.contains(&m.as_str()) {
            return verdict(ext, mime, Playability::Native, "native-content-type");
        }
    }
    if let Some(ref e) = ext {
        if NATIVE_EXTENSIONS.contains(&e.as_str()) {
            return verdict(ext, mime, Playability::Native, "native-container");
        }
    }

    // Fail open: let the player try direct playback first
    verdict(ext, mime, Playability::Native, "unknown-optimistic")
}

fn verdict(
    container_ext: Option<String>,
    mime_type: Option<String>,
    decision: Playability,
    reason: &'static str,
) -> PlayabilityVerdict {
    PlayabilityVerdict {
        container_ext,
        mime_type,
        decision,
        reason,
    }
}

/// Extract the lowercase file extension from a URL path, ignoring query
/// strings and fragments.
fn extension_of(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
