/// Code Transformer
///
/// Turns a submission into a program that prints timing markers: either by
/// injecting it into a cached wrapper template, or by asking the generator
/// for a full boilerplate.

use bigo_common::Language;
use std::sync::Arc;
use tracing::debug;

use crate::llm::{CodeGenerator, GenerationError};

/// Placeholder a wrapper template must contain exactly where user code goes
pub const USER_CODE_MARKER: &str = "{{USER_CODE}}";

pub struct CodeTransformer {
    generator: Arc<dyn CodeGenerator>,
}

impl CodeTransformer {
    pub fn new(generator: Arc<dyn CodeGenerator>) -> Self {
        Self { generator }
    }

    /// With a template: pure substitution. Without: one generator call.
    pub async fn transform(
        &self,
        language: Language,
        code: &str,
        template: Option<&str>,
    ) -> Result<String, GenerationError> {
        match template {
            Some(template) => Ok(inject(template, code)),
            None => {
                debug!(%language, "Generating boilerplate");
                self.generator.generate_boilerplate(language, code).await
            }
        }
    }
}

/// Replace the first marker with the user's code verbatim
pub fn inject(template: &str, code: &str) -> String {
    template.replacen(USER_CODE_MARKER, code, 1)
}
