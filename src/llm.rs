//! Language-model provider boundary.
//!
//! Out of scope for this crate: no bundled network client. The engine only
//! ever needs a pure `prompt -> text` function, and that function may be
//! unavailable entirely — reflection and consolidation both treat `None`
//! as a first-class, tested state rather than an error.

use crate::error::Result;

/// A `prompt -> text` completion function.
pub trait LanguageModelProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Deterministic stand-in used by reflection/consolidation tests: it
    /// never calls a network, and its output is a function of the prompt
    /// alone so assertions stay reproducible.
    pub struct EchoProvider;

    impl LanguageModelProvider for EchoProvider {
        fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("salient question") {
                Ok("What does the agent keep asking about?\nWhat changed recently?".to_string())
            } else if prompt.contains("1-2 sentence") || prompt.contains("1–2 sentence") {
                Ok("A brief summary grounded in recent observations.".to_string())
            } else {
                Ok(format!("insight: {}", prompt.chars().take(40).collect::<String>()))
            }
        }
    }
}
