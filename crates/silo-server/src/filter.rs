use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Which uploads a node takes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadFilterConfig {
    /// Largest accepted `Content-Length`. When set, uploads must declare one.
    pub max_size: Option<u64>,
    /// MIME patterns to accept: `type/subtype`, `type/*` or `*/*`.
    pub accept: Vec<String>,
    /// MIME patterns to refuse, checked before `accept`.
    pub reject: Vec<String>,
}

impl Default for UploadFilterConfig {
    fn default() -> Self {
        Self { max_size: None, accept: vec!["*/*".into()], reject: Vec::new() }
    }
}

/// Upload policy, applied twice: on the declared length before any
/// bytes are read, and on the sniffed MIME type before commit.
#[derive(Clone, Debug, Default)]
pub struct UploadFilter {
    config: UploadFilterConfig,
}

impl UploadFilter {
    pub fn new(config: UploadFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UploadFilterConfig {
        &self.config
    }

    pub fn check_length(&self, content_length: Option<u64>) -> ServerResult<()> {
        let Some(max) = self.config.max_size else { return Ok(()) };
        match content_length {
            None => Err(ServerError::rejected(StatusCode::LENGTH_REQUIRED, "Content-Length required")),
            Some(len) if len > max => Err(ServerError::rejected(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Content exceeds maximum size of {max} bytes"),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn check_mime(&self, mime: &str) -> ServerResult<()> {
        let hit = |patterns: &[String]| patterns.iter().any(|p| mime_matches(p, mime));
        if hit(&self.config.reject) || !hit(&self.config.accept) {
            return Err(ServerError::rejected(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Content type {mime} is not accepted"),
            ));
        }
        Ok(())
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" || pattern == "*/*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(kind) => mime
            .split_once('/')
            .is_some_and(|(top, _)| top.eq_ignore_ascii_case(kind)),
        None => pattern.eq_ignore_ascii_case(mime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(max_size: Option<u64>, accept: &[&str], reject: &[&str]) -> UploadFilter {
        UploadFilter::new(UploadFilterConfig {
            max_size,
            accept: accept.iter().map(|s| s.to_string()).collect(),
            reject: reject.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn status(result: ServerResult<()>) -> Option<StatusCode> {
        result.err().map(|e| e.status())
    }

    #[test]
    fn default_accepts_everything() {
        let f = UploadFilter::default();
        assert!(f.check_length(None).is_ok());
        assert!(f.check_mime("application/octet-stream").is_ok());
    }

    #[test]
    fn length_limits() {
        let f = filter(Some(100), &["*/*"], &[]);
        assert_eq!(status(f.check_length(None)), Some(StatusCode::LENGTH_REQUIRED));
        assert_eq!(status(f.check_length(Some(101))), Some(StatusCode::PAYLOAD_TOO_LARGE));
        assert!(f.check_length(Some(100)).is_ok());
    }

    #[test]
    fn mime_patterns() {
        let f = filter(None, &["image/*", "video/mp4"], &["image/gif"]);
        assert!(f.check_mime("image/png").is_ok());
        assert!(f.check_mime("IMAGE/JPEG").is_ok());
        assert!(f.check_mime("video/mp4").is_ok());
        assert_eq!(status(f.check_mime("image/gif")), Some(StatusCode::UNSUPPORTED_MEDIA_TYPE));
        assert_eq!(status(f.check_mime("video/webm")), Some(StatusCode::UNSUPPORTED_MEDIA_TYPE));
        assert_eq!(
            status(f.check_mime("application/octet-stream")),
            Some(StatusCode::UNSUPPORTED_MEDIA_TYPE)
        );
    }

    #[test]
    fn wildcard_needs_a_slash() {
        assert!(!mime_matches("image/*", "imagepng"));
        assert!(mime_matches("*", "anything/at-all"));
    }
}
