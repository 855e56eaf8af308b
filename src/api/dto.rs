use serde::{Deserialize, Serialize};

// ==================== REQUEST DTOs ====================

/// Body of both chat endpoints. Parsed leniently from raw JSON so a
/// missing or non-string `question` maps to a 400 rather than a framework
/// rejection; see `routes::extract_chat_request`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub model: Option<String>,
}

// ==================== RESPONSE DTOs ====================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
