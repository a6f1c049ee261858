//! Sentence-accumulation text chunker.
//!
//! Splits a document body into size-bounded, overlapping chunks. Text is
//! divided into sentence-like units on `.`, `!`, and `?` terminators,
//! then sentences accumulate greedily until adding the next one would
//! exceed `chunk_size`. Each emitted chunk seeds the next with its
//! trailing sentences until `chunk_overlap` characters are covered, so
//! neighboring chunks share context.
//!
//! Accumulations shorter than `min_chunk_size` are merged forward into
//! the next chunk instead of being emitted standalone; a sub-threshold
//! trailing remainder is dropped unless it is the document's only
//! content. Identical input and configuration always produce an
//! identical chunk list.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, Metadata};

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split the document body into ordered chunks.
    ///
    /// Returns [`Error::Validation`] for an empty or whitespace-only body.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let body = document.body.trim();
        if body.is_empty() {
            return Err(Error::validation(format!(
                "document {} has an empty body",
                document.doc_key()
            )));
        }

        let sentences = split_sentences(body);
        let metadata = chunk_metadata(document);
        let document_id = document.doc_key();

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let would_be = if current.is_empty() {
                sentence.len()
            } else {
                current_len + 1 + sentence.len()
            };

            if would_be > self.config.chunk_size && !current.is_empty() {
                if current_len >= self.config.min_chunk_size {
                    let content = current.join(" ");
                    let mut seed = overlap_tail(&current, self.config.chunk_overlap);
                    // The seeded chunk must still respect the size bound:
                    // shed seed sentences from the front until the
                    // incoming sentence fits. Overlap is best-effort when
                    // sentences dwarf the configured overlap.
                    while !seed.is_empty()
                        && joined_len(&seed) + 1 + sentence.len() > self.config.chunk_size
                    {
                        seed.remove(0);
                    }
                    chunks.push(self.make_chunk(&document_id, chunks.len(), content, &metadata));
                    current = seed;
                    current_len = joined_len(&current);
                }
                // Under min_chunk_size the accumulation is carried
                // forward into the next chunk rather than emitted.
            }

            if current.is_empty() {
                current_len = sentence.len();
            } else {
                current_len += 1 + sentence.len();
            }
            current.push(sentence);
        }

        if current_len >= self.config.min_chunk_size || chunks.is_empty() {
            // A document shorter than min_chunk_size still produces
            // exactly one chunk; otherwise sub-min remainders are dropped.
            let content = current.join(" ");
            chunks.push(self.make_chunk(&document_id, chunks.len(), content, &metadata));
        }

        Ok(chunks)
    }

    fn make_chunk(
        &self,
        document_id: &str,
        index: usize,
        content: String,
        metadata: &Metadata,
    ) -> Chunk {
        Chunk {
            document_id: document_id.to_string(),
            chunk_index: index,
            content,
            section: None,
            page: None,
            metadata: metadata.clone(),
        }
    }
}

/// Metadata propagated onto every chunk so it stays self-describing:
/// the document title plus whatever the connector recorded (year,
/// venue, authors, ...).
fn chunk_metadata(document: &Document) -> Metadata {
    let mut metadata = document.metadata.clone();
    if !document.title.is_empty() {
        metadata.insert(
            "title".to_string(),
            serde_json::Value::String(document.title.clone()),
        );
    }
    metadata
}

/// Split on sentence terminators, keeping the terminator run attached
/// to its sentence. Whitespace-only fragments are discarded.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut in_terminator = false;

    for ch in text.chars() {
        let is_terminator = matches!(ch, '.' | '!' | '?');
        if in_terminator && !is_terminator {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
            in_terminator = false;
        }
        current.push(ch);
        if is_terminator {
            in_terminator = true;
        }
    }

    let sentence = current.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }

    sentences
}

/// Trailing sentences of an emitted chunk totaling at least `overlap`
/// characters, used to seed the next chunk.
fn overlap_tail(sentences: &[String], overlap: usize) -> Vec<String> {
    if overlap == 0 {
        return Vec::new();
    }

    let mut tail: Vec<String> = Vec::new();
    let mut covered = 0usize;
    for sentence in sentences.iter().rev() {
        if covered >= overlap {
            break;
        }
        covered += sentence.len();
        tail.push(sentence.clone());
    }
    tail.reverse();
    tail
}

fn joined_len(sentences: &[String]) -> usize {
    if sentences.is_empty() {
        return 0;
    }
    sentences.iter().map(String::len).sum::<usize>() + sentences.len() - 1
}
