//! Deployment requests and the attachments they carry.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// A task brief as submitted to the intake endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub email: String,
    /// Shared secret checked at intake. Never logged.
    #[serde(default, skip_serializing)]
    pub secret: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// An attachment descriptor; `url` is normally a base64 `data:` URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub url: String,
}

/// A decoded attachment, published verbatim under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Fields that tie a run to its request in logs and in the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correlation {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
}

impl DeploymentRequest {
    /// Check the invariants intake must enforce before accepting a request.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.round < 1 {
            return Err("round must be >= 1");
        }
        if self.task.trim().is_empty() {
            return Err("task must not be empty");
        }
        Ok(())
    }

    /// Repository name for this round.
    pub fn target_name(&self) -> String {
        format!("{}-round{}", self.task, self.round)
    }

    /// Repository name of the round being revised, if any.
    pub fn previous_target_name(&self) -> Option<String> {
        (self.round > 1).then(|| format!("{}-round{}", self.task, self.round - 1))
    }

    pub fn correlation(&self) -> Correlation {
        Correlation {
            email: self.email.clone(),
            task: self.task.clone(),
            round: self.round,
            nonce: self.nonce.clone(),
        }
    }
}

/// Paths the generated bundle always writes.
const RESERVED_PATHS: [&str; 3] = ["index.html", "README.md", "LICENSE"];

/// Decode every `data:<mime>;base64,<payload>` attachment.
///
/// Anything else is skipped with a warning, as is any name that would
/// collide with a generated file or escape the repository root.
/// Attachments never fail a run.
pub fn decode_attachments(refs: &[AttachmentRef]) -> Vec<Attachment> {
    refs.iter()
        .filter(|att| match check_path(&att.name) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(name = %att.name, "Skipping attachment: {reason}");
                false
            }
        })
        .filter_map(|att| match decode_data_uri(&att.url) {
            Ok(bytes) => {
                tracing::debug!(name = %att.name, size = bytes.len(), "Decoded attachment");
                Some(Attachment {
                    name: att.name.clone(),
                    bytes,
                })
            }
            Err(reason) => {
                tracing::warn!(name = %att.name, "Skipping attachment: {reason}");
                None
            }
        })
        .collect()
}

fn check_path(name: &str) -> Result<(), &'static str> {
    if RESERVED_PATHS.iter().any(|p| p.eq_ignore_ascii_case(name)) {
        return Err("name collides with a generated file");
    }
    if name.starts_with('/') || name.contains('\\') {
        return Err("name is not a relative path");
    }
    if name.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err("name has an empty, '.' or '..' component");
    }
    Ok(())
}

fn decode_data_uri(url: &str) -> Result<Vec<u8>, String> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| "not a data: URI".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data: URI has no payload".to_string())?;
    let (mime, encoding) = meta
        .rsplit_once(';')
        .ok_or_else(|| "data: URI is not base64".to_string())?;
    if mime.is_empty() || encoding != "base64" {
        return Err("data: URI is not base64".to_string());
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64: {e}"))
}
