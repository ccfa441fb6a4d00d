use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The Cymbal Bank site pages that make up the answerable corpus.
pub const CYMBAL_BANK_PAGES: [&str; 20] = [
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/upi",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/imps",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/neft",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/credit_card",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/recharge",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/electricity",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/insurance_premium",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/saving/terms_and_condition",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/saving",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/current",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/salary",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/fixed_deposit",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/recurring_deposit",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/stocks",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/ipo",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/mutual_funds",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/loans",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/loans/terms_and_condition",
    "https://cymbal-bank-web-deployed-n3zk63yvta-uc.a.run.app/loans/agreement",
];

pub const DEFAULT_QUESTION: &str = "Why should I choose Cymbal Bank?";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub source: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source: String,
    pub title: Option<String>,
    pub chunk_index: u64,
    /// Number of leading characters repeated from the previous chunk of the
    /// same document.
    pub overlap_chars: usize,
    pub text: String,
}

/// A chunk returned by the index together with the similarity it was matched at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub score: f64,
    pub chunk: Chunk,
}

/// One citation shown next to an answer.
///
/// `id` only exists while references are being assembled and never reaches
/// the serialized output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedReference {
    #[serde(skip)]
    pub id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    pub page_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaResult {
    pub query: String,
    pub answer: String,
    pub source_chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedAnswer {
    pub answer: String,
    pub references: Vec<RetrievedReference>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub separators: Vec<String>,
    pub requests_per_second: f64,
    pub embedding_batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 50,
            separators: ["\n\n", "\n", ".", "!", "?", ",", " ", ""]
                .into_iter()
                .map(str::to_string)
                .collect(),
            requests_per_second: 1.0,
            embedding_batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub distance_threshold: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            distance_threshold: 0.6,
        }
    }
}

/// Decoding parameters sent with every text-generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingParameters {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            max_output_tokens: 1_024,
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_serialization_drops_id_and_absent_fields() {
        let reference = RetrievedReference {
            id: Some(3),
            matching_score: Some(0.71),
            document_source: Some("https://example.com/neft".to_string()),
            document_name: None,
            page_content: "NEFT transfers".to_string(),
        };

        let value = serde_json::to_value(&reference).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("id"));
        assert!(!object.contains_key("document_name"));
        assert_eq!(object["matching_score"], 0.71);
        assert_eq!(object["page_content"], "NEFT transfers");
    }

    #[test]
    fn sampling_parameters_use_vertex_field_names() {
        let value = serde_json::to_value(SamplingParameters::default()).unwrap();
        assert_eq!(value["maxOutputTokens"], 1024);
        assert_eq!(value["topK"], 40);
    }
}
