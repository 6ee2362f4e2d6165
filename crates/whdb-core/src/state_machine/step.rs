use serde::{Deserialize, Serialize};

/// Paso del protocolo de configuración interactiva.
///
/// Se construye sólo con `prompting` o `completed`, de modo que siempre se
/// cumple exactamente uno de `needs_input` / `complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineStep {
    pub needs_input: bool,
    pub complete: bool,
    pub output: String,
    pub prompt: Option<String>,
    pub prompt_is_secret: bool,
    pub post_to_url: Option<String>,
    pub error_code: Option<String>,
}

impl StateMachineStep {
    /// Pide un valor que debe enviarse a `post_to_url`.
    pub fn prompting(prompt: impl Into<String>, post_to_url: impl Into<String>) -> Self {
        Self { needs_input: true,
               complete: false,
               output: String::new(),
               prompt: Some(prompt.into()),
               prompt_is_secret: false,
               post_to_url: Some(post_to_url.into()),
               error_code: None }
    }

    pub fn completed() -> Self {
        Self { needs_input: false,
               complete: true,
               output: String::new(),
               prompt: None,
               prompt_is_secret: false,
               post_to_url: None,
               error_code: None }
    }

    pub fn secret(mut self) -> Self {
        self.prompt_is_secret = true;
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Completo y sin error.
    pub fn successful(&self) -> bool {
        self.complete && self.error_code.is_none()
    }

    /// Campo que espera el paso (último segmento de `post_to_url`).
    pub fn field(&self) -> Option<&str> {
        self.post_to_url.as_deref().and_then(|u| u.rsplit('/').next())
    }
}
