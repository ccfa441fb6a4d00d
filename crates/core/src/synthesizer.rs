use crate::models::{SamplingParameters, ScoredChunk};
use crate::traits::TextGenerator;
use crate::UpstreamServiceError;
use tracing::debug;

pub const CANNOT_DETERMINE_ANSWER: &str = "I cannot determine the answer to that.";
pub const UNKNOWN_ANSWER: &str = "I do not know the answer to that.";

const PROMPT_TEMPLATE: &str = r#"SYSTEM: You are an intelligent assistant helping the users of
Cymbal Bank with their questions on services offered by the bank.

Question: {question}

Strictly Use ONLY the following pieces of context to answer the question at the end.
Think step-by-step and then answer.
Give a detailed and elaborate answer.
Do not try to make up an answer:
- If the answer to the question cannot be determined from the context alone,
say "I cannot determine the answer to that."
- If the context is empty, just say "I do not know the answer to that."

=============
{context}
=============

Question: {question}
Helpful Answer:"#;

/// Fills the template in a single pass, so placeholder-like text inside the
/// question or the context is copied verbatim.
pub fn render_prompt(question: &str, context: &str) -> String {
    let mut prompt =
        String::with_capacity(PROMPT_TEMPLATE.len() + context.len() + 2 * question.len());
    let mut rest = PROMPT_TEMPLATE;

    while let Some(open) = rest.find('{') {
        prompt.push_str(&rest[..open]);
        let tail = &rest[open..];
        if let Some(after) = tail.strip_prefix("{question}") {
            prompt.push_str(question);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{context}") {
            prompt.push_str(context);
            rest = after;
        } else {
            prompt.push('{');
            rest = &tail[1..];
        }
    }
    prompt.push_str(rest);
    prompt
}

/// Joins retrieved chunk texts the way they are stuffed into the prompt.
pub fn stuff_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// True for the literal sentences the model is told to fall back to.
pub fn is_fallback_answer(answer: &str) -> bool {
    let trimmed = answer.trim();
    trimmed == CANNOT_DETERMINE_ANSWER || trimmed == UNKNOWN_ANSWER
}

pub struct AnswerSynthesizer<G> {
    generator: G,
    parameters: SamplingParameters,
}

impl<G> AnswerSynthesizer<G>
where
    G: TextGenerator + Send + Sync,
{
    pub fn new(generator: G, parameters: SamplingParameters) -> Self {
        Self {
            generator,
            parameters,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn parameters(&self) -> &SamplingParameters {
        &self.parameters
    }

    /// Answers `question` from `context` alone. An empty context never
    /// reaches the model.
    pub async fn synthesize(
        &self,
        question: &str,
        context: &str,
    ) -> Result<String, UpstreamServiceError> {
        if context.trim().is_empty() {
            debug!("empty context, answering with the fallback");
            return Ok(UNKNOWN_ANSWER.to_string());
        }

        let prompt = render_prompt(question, context);
        self.generator.generate(&prompt, &self.parameters).await
    }
}
