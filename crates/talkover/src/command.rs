//! Spoken command recognition over finalized transcripts.
//!
//! A finalized voice input is matched against a small phrase table before it
//! is treated as chat input; anything unrecognized flows through as
//! [`VoiceCommand::FreeText`].

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Wipe the live conversation.
    ClearConversation,
    /// Halt any in-progress reply playback.
    StopSpeaking,
    /// Not a command; send to the backend as a normal chat message.
    FreeText(String),
}

impl VoiceCommand {
    pub fn parse(text: &str) -> VoiceCommand {
        let trimmed = text.trim();
        match trimmed.to_lowercase().as_str() {
            "xóa hội thoại" | "xóa cuộc trò chuyện" | "clear conversation" | "clear chat" => {
                VoiceCommand::ClearConversation
            }
            "dừng đọc" | "dừng nói" | "stop speaking" | "stop talking" => {
                VoiceCommand::StopSpeaking
            }
            _ => VoiceCommand::FreeText(trimmed.to_string()),
        }
    }
}
