//! Voice selection with an explicit, documented precedence.

use serde::{Deserialize, Serialize};

/// One synthesizer voice as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Provider-unique identifier.
    pub id: String,
    pub name: String,
    /// BCP-47 tag, e.g. "vi-VN".
    pub language: String,
}

/// Pick a voice from `available`. Precedence, first match wins:
///
/// 1. exact `preferred_id`
/// 2. exact `preferred_language` tag
/// 3. same primary language ("vi" matches "vi-VN")
/// 4. first available voice
pub fn resolve_voice(
    preferred_id: Option<&str>,
    preferred_language: Option<&str>,
    available: &[VoiceInfo],
) -> Option<VoiceInfo> {
    if let Some(id) = preferred_id {
        if let Some(v) = available.iter().find(|v| v.id == id) {
            return Some(v.clone());
        }
    }
    if let Some(lang) = preferred_language {
        if let Some(v) = available.iter().find(|v| v.language == lang) {
            return Some(v.clone());
        }
        let primary = lang.split('-').next().unwrap_or(lang);
        if let Some(v) = available
            .iter()
            .find(|v| v.language.split('-').next() == Some(primary))
        {
            return Some(v.clone());
        }
    }
    available.first().cloned()
}
