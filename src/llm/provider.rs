//! Provider detection.
//!
//! Maps a configured base URL to the provider behind it so that
//! [`LlmProtocol::Auto`](super::LlmProtocol::Auto) can pick a wire protocol.

use super::LlmProtocol;

/// Known LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Google Generative Language API (generativelanguage.googleapis.com)
    Gemini,
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Generic OpenAI-compatible provider
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chaat_gpt::llm::Provider;
    ///
    /// let provider = Provider::detect_from_url("https://generativelanguage.googleapis.com");
    /// assert_eq!(provider, Provider::Gemini);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("generativelanguage.googleapis.com") {
            Self::Gemini
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Protocol this provider speaks natively.
    #[must_use]
    pub fn native_protocol(self) -> LlmProtocol {
        match self {
            Self::Gemini => LlmProtocol::Gemini,
            Self::OpenAI | Self::OpenRouter | Self::Groq | Self::Generic => LlmProtocol::Chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_gemini() {
        let provider = Provider::detect_from_url("https://GenerativeLanguage.googleapis.com/");
        assert_eq!(provider, Provider::Gemini);
        assert_eq!(provider.native_protocol(), LlmProtocol::Gemini);
    }

    #[test]
    fn test_detect_openai() {
        let provider = Provider::detect_from_url("https://api.openai.com");
        assert_eq!(provider, Provider::OpenAI);
    }

    #[test]
    fn test_detect_openrouter() {
        let provider = Provider::detect_from_url("https://openrouter.ai/api");
        assert_eq!(provider, Provider::OpenRouter);
    }

    #[test]
    fn test_detect_groq() {
        let provider = Provider::detect_from_url("https://api.groq.com");
        assert_eq!(provider, Provider::Groq);
    }

    #[test]
    fn test_local_server_is_generic_chat() {
        let provider = Provider::detect_from_url("http://127.0.0.1:11434");
        assert_eq!(provider, Provider::Generic);
        assert_eq!(provider.native_protocol(), LlmProtocol::Chat);
    }
}
