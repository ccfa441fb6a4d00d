use crate::models::{FormattedAnswer, QaResult, RetrievedReference, SamplingParameters, ScoredChunk};
use crate::synthesizer::is_fallback_answer;
use crate::traits::TextGenerator;
use crate::UpstreamServiceError;
use tracing::debug;

pub const WRAP_WIDTH: usize = 120;

const REFORMAT_TEMPLATE: &str = "
Given the input text {answer}, reformat it to make it clean and representable to be
shown in HTML as search result on a website.
";

/// Greedy word wrap. Whitespace runs collapse to single spaces and a word
/// longer than `width` gets a line to itself instead of being split.
pub fn wrap(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(word);
        } else if line.chars().count() + 1 + word.chars().count() <= width {
            line.push(' ');
            line.push_str(word);
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }

    lines.join("\n")
}

/// One reference per hit, numbered in retrieval order.
pub fn build_references(hits: &[ScoredChunk]) -> Vec<RetrievedReference> {
    hits.iter()
        .enumerate()
        .map(|(ordinal, hit)| RetrievedReference {
            id: Some(ordinal),
            matching_score: Some(hit.score),
            document_source: Some(hit.chunk.source.clone()).filter(|source| !source.is_empty()),
            document_name: hit.chunk.title.clone(),
            page_content: wrap(&hit.chunk.text, WRAP_WIDTH),
        })
        .collect()
}

/// Drops the ordinal ids and then exact duplicates. First occurrence wins.
pub fn dedup_references(references: Vec<RetrievedReference>) -> Vec<RetrievedReference> {
    let mut unique: Vec<RetrievedReference> = Vec::with_capacity(references.len());
    for mut reference in references {
        reference.id = None;
        if !unique.contains(&reference) {
            unique.push(reference);
        }
    }
    unique
}

pub fn references_json(references: &[RetrievedReference]) -> Result<String, UpstreamServiceError> {
    Ok(serde_json::to_string(references)?)
}

pub struct AnswerFormatter<G> {
    generator: G,
    parameters: SamplingParameters,
}

impl<G> AnswerFormatter<G>
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

    /// Asks the model for a display-ready version of `answer`. The fallback
    /// sentences are returned untouched.
    pub async fn reformat(&self, answer: &str) -> Result<String, UpstreamServiceError> {
        if is_fallback_answer(answer) {
            debug!("fallback answer, skipping reformat");
            return Ok(answer.trim().to_string());
        }

        let prompt = REFORMAT_TEMPLATE.replace("{answer}", answer);
        self.generator.generate(&prompt, &self.parameters).await
    }

    pub async fn format(&self, result: &QaResult) -> Result<FormattedAnswer, UpstreamServiceError> {
        let references = dedup_references(build_references(&result.source_chunks));
        let answer = self.reformat(&result.answer).await?;
        Ok(FormattedAnswer { answer, references })
    }
}
