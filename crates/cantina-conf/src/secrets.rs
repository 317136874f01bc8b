//! External collaborator secrets (§6.5): "Configured via environment
//! variables for external secrets (LLM, speech API keys)... No core
//! behavior depends on specific vendor identities." These never appear in
//! a config file and are never logged or serialized back out.

use std::env;

/// Vendor API keys read straight from the environment. The core never
/// inspects which vendor is behind a key; it only needs to know whether
/// one is configured before handing work to the collaborator.
#[derive(Clone)]
pub struct Secrets {
    pub stt_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("stt_api_key", &self.stt_api_key.as_ref().map(|_| "<redacted>"))
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .field("tts_api_key", &self.tts_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            stt_api_key: env::var("CANTINA_OS_STT_API_KEY").ok(),
            llm_api_key: env::var("CANTINA_OS_LLM_API_KEY").ok(),
            tts_api_key: env::var("CANTINA_OS_TTS_API_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_key_values() {
        let secrets = Secrets {
            stt_api_key: Some("super-secret".to_string()),
            llm_api_key: None,
            tts_api_key: None,
        };
        let debugged = format!("{secrets:?}");
        assert!(!debugged.contains("super-secret"));
    }
}
