use crate::error::IngestError;
use crate::models::{Chunk, Document, IngestionOptions};
use sha2::{Digest, Sha256};
use std::ops::Range;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    /// Split delimiters, coarsest first. An empty delimiter means a hard
    /// character split.
    pub separators: Vec<String>,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            separators: value.separators.clone(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub overlap_chars: usize,
}

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// Every chunk after the first begins with the last `overlap_chars`
/// characters of its predecessor, so the source is recovered by appending
/// each chunk minus its leading overlap.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestError> {
    config.validate()?;

    let budget = config.max_chars - config.overlap_chars;
    let mut pieces = Vec::new();
    collect_pieces(text, 0, budget, &config.separators, &mut pieces);

    let mut chunks = Vec::new();
    let mut fresh: Option<Range<usize>> = None;
    let mut overlap_start = 0usize;
    let mut overlap_chars = 0usize;

    for piece in pieces {
        let Some(current) = fresh.as_mut() else {
            overlap_start = piece.start;
            fresh = Some(piece);
            continue;
        };

        let current_len = overlap_chars + char_len(&text[current.clone()]);
        if current_len + char_len(&text[piece.clone()]) <= config.max_chars {
            current.end = piece.end;
            continue;
        }

        let closed = &text[overlap_start..current.end];
        chunks.push(TextChunk {
            text: closed.to_string(),
            overlap_chars,
        });

        let (tail_offset, tail_chars) = overlap_tail(closed, config.overlap_chars);
        overlap_start += tail_offset;
        overlap_chars = tail_chars;
        fresh = Some(piece);
    }

    if let Some(current) = fresh {
        chunks.push(TextChunk {
            text: text[overlap_start..current.end].to_string(),
            overlap_chars,
        });
    }

    Ok(chunks)
}

/// Chunks every document and numbers the chunks globally in traversal order.
pub fn chunk_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for document in documents {
        for piece in split_text(&document.text, config)? {
            chunks.push(Chunk {
                chunk_id: make_chunk_id(&document.source, cursor, &piece.text),
                source: document.source.clone(),
                title: document.title.clone(),
                chunk_index: cursor,
                overlap_chars: piece.overlap_chars,
                text: piece.text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    info!(
        documents = documents.len(),
        chunks = chunks.len(),
        "documents chunked"
    );
    Ok(chunks)
}

fn collect_pieces(
    text: &str,
    offset: usize,
    budget: usize,
    separators: &[String],
    out: &mut Vec<Range<usize>>,
) {
    if text.is_empty() {
        return;
    }

    if char_len(text) <= budget {
        out.push(offset..offset + text.len());
        return;
    }

    let Some((separator, finer)) = separators.split_first() else {
        hard_split(text, offset, budget, out);
        return;
    };

    if separator.is_empty() {
        hard_split(text, offset, budget, out);
        return;
    }

    let segments = text.split_inclusive(separator.as_str()).collect::<Vec<_>>();
    if segments.len() <= 1 {
        collect_pieces(text, offset, budget, finer, out);
        return;
    }

    let mut cursor = offset;
    for segment in segments {
        if char_len(segment) <= budget {
            out.push(cursor..cursor + segment.len());
        } else {
            collect_pieces(segment, cursor, budget, finer, out);
        }
        cursor += segment.len();
    }
}

fn hard_split(text: &str, offset: usize, budget: usize, out: &mut Vec<Range<usize>>) {
    let mut start = 0;
    let mut count = 0;

    for (index, _) in text.char_indices() {
        if count == budget {
            out.push(offset + start..offset + index);
            start = index;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        out.push(offset + start..offset + text.len());
    }
}

/// Byte offset and character count of the trailing `overlap` characters.
fn overlap_tail(chunk: &str, overlap: usize) -> (usize, usize) {
    if overlap == 0 {
        return (chunk.len(), 0);
    }
    match chunk.char_indices().rev().nth(overlap - 1) {
        Some((index, _)) => (index, overlap),
        None => (0, char_len(chunk)),
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn make_chunk_id(source: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
