/// Prompt constraints that keep protected tokens intact through the model
///
/// Models are told which tokens to copy, that they may move them to fit the
/// target grammar, and that nothing inside them is translatable.

/// Token-handling rules rendered into the system prompt
#[derive(Debug, Clone)]
pub struct TranslationConstraints {
    pub preserve_tokens: bool,
    /// Tokens may move when target word order requires it
    pub allow_reordering: bool,
    /// Ask the model to keep digits as digits
    pub keep_numbers: bool,
    pub extra_constraints: Vec<String>,
}

impl Default for TranslationConstraints {
    fn default() -> Self {
        Self {
            preserve_tokens: true,
            allow_reordering: true,
            keep_numbers: true,
            extra_constraints: Vec::new(),
        }
    }
}

impl TranslationConstraints {
    pub fn to_prompt(&self, protected_tokens: &[String]) -> String {
        let mut constraints = Vec::new();

        if self.preserve_tokens {
            constraints.push(
                "CRITICAL: Copy every placeholder token into your translation exactly as written."
                    .to_string(),
            );
            if !protected_tokens.is_empty() {
                constraints.push(format!(
                    "Tokens in this text: {}",
                    protected_tokens.join(", ")
                ));
                constraints.push(
                    "Each of these tokens MUST appear exactly once. Never invent new tokens.".to_string(),
                );
            }
            constraints.push(
                "Tokens stand for formatting codes and variables; never translate or split them."
                    .to_string(),
            );
        }

        if self.allow_reordering {
            constraints.push(
                "You may move tokens so the sentence reads naturally, but keep the text they wrap between them."
                    .to_string(),
            );
        } else {
            constraints.push("Keep the tokens in their original order.".to_string());
        }

        if self.keep_numbers {
            constraints.push("Keep numbers as digits; do not spell them out.".to_string());
        }

        constraints.extend(self.extra_constraints.iter().cloned());
        constraints.join("\n")
    }

    pub fn with_custom_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.extra_constraints.push(constraint.into());
        self
    }
}

pub fn build_system_prompt(
    source_lang: &str,
    target_lang: &str,
    constraints: &TranslationConstraints,
    protected_tokens: &[String],
) -> String {
    format!(
        "You are a professional translator specializing in e-learning content.\n\
        Your task is to translate course text from {} to {}.\n\n\
        IMPORTANT CONSTRAINTS:\n\
        {}\n\n\
        Provide ONLY the translated text, without any explanations or notes.",
        source_lang,
        target_lang,
        constraints.to_prompt(protected_tokens)
    )
}
