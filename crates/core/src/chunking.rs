use crate::error::IngestError;
use crate::models::{Chunk, ChunkKind, ChunkMetadata, Document};
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Domain vocabulary scanned for per-chunk keywords, in relevance order.
pub const SECURITY_VOCABULARY: [&str; 25] = [
    "magerit",
    "octave",
    "vulnerability",
    "threat",
    "risk",
    "impact",
    "control",
    "safeguard",
    "asset",
    "confidentiality",
    "integrity",
    "availability",
    "iso",
    "nist",
    "cybersecurity",
    "framework",
    "methodology",
    "analysis",
    "management",
    "assessment",
    "mitigation",
    "compliance",
    "audit",
    "incident",
    "contingency",
];

const MAX_KEYWORDS_PER_CHUNK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakSide {
    /// Split point sits before the separator (headers lead the next piece).
    Before,
    /// Split point sits after the separator (sentence ends stay attached).
    After,
}

/// Separator ladder tried in priority order: section headers, subsection
/// headers, emphasis markers, blank lines, newlines, sentence ends, spaces.
const SEPARATORS: [(&str, BreakSide); 8] = [
    ("\n\n# ", BreakSide::Before),
    ("\n\n## ", BreakSide::Before),
    ("\n\n### ", BreakSide::Before),
    ("\n\n**", BreakSide::Before),
    ("\n\n", BreakSide::After),
    ("\n", BreakSide::After),
    (". ", BreakSide::After),
    (" ", BreakSide::After),
];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Budget for indivisible pieces; keeps `overlap + piece <= chunk_size`.
    fn piece_budget(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A chunk of text plus the char offset of its first character in the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_offset: usize,
}

/// Split `text` into chunks of at most `chunk_size` characters, preferring
/// breaks at the separator ladder and re-applying `overlap` characters of
/// trailing context at every boundary.
pub fn split_text(text: &str, options: ChunkingOptions) -> Result<Vec<TextChunk>, IngestError> {
    options.validate()?;

    let chars: Vec<char> = text.chars().collect();
    if chars.iter().all(|c| c.is_whitespace()) {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    split_span(&chars, 0, chars.len(), options.piece_budget(), 0, &mut pieces);

    Ok(assemble_chunks(&chars, &pieces, options))
}

/// Recursively split `[start, end)` into pieces of at most `budget` chars,
/// trying separators from `level` downward and falling back to a hard
/// character split when none remains.
fn split_span(
    chars: &[char],
    start: usize,
    end: usize,
    budget: usize,
    level: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if end - start <= budget {
        out.push((start, end));
        return;
    }

    if level >= SEPARATORS.len() {
        let mut cursor = start;
        while cursor < end {
            let piece_end = (cursor + budget).min(end);
            out.push((cursor, piece_end));
            cursor = piece_end;
        }
        return;
    }

    let (separator, side) = SEPARATORS[level];
    let needle: Vec<char> = separator.chars().collect();

    let mut points = vec![start];
    let mut cursor = start;
    while cursor + needle.len() <= end {
        if chars[cursor..cursor + needle.len()] == needle[..] {
            let point = match side {
                BreakSide::Before => cursor,
                BreakSide::After => cursor + needle.len(),
            };
            if point > start && point < end && point > *points.last().unwrap_or(&start) {
                points.push(point);
            }
            cursor += needle.len();
        } else {
            cursor += 1;
        }
    }

    if points.len() == 1 {
        split_span(chars, start, end, budget, level + 1, out);
        return;
    }

    points.push(end);
    for window in points.windows(2) {
        let (piece_start, piece_end) = (window[0], window[1]);
        if piece_end - piece_start <= budget {
            out.push((piece_start, piece_end));
        } else {
            split_span(chars, piece_start, piece_end, budget, level + 1, out);
        }
    }
}

/// Greedily pack contiguous pieces into chunks of at most `chunk_size`
/// characters. Each chunk after the first starts with the last `overlap`
/// characters of its predecessor, so adjacent chunks share exactly that
/// much context whenever the predecessor is long enough.
fn assemble_chunks(
    chars: &[char],
    pieces: &[(usize, usize)],
    options: ChunkingOptions,
) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let Some(&(first_start, _)) = pieces.first() else {
        return chunks;
    };

    let mut chunk_start = first_start;
    let mut content_end = first_start;

    for &(_, piece_end) in pieces {
        if piece_end - chunk_start > options.chunk_size && content_end > chunk_start {
            push_chunk(chars, chunk_start, content_end, &mut chunks);
            let carry = options.overlap.min(content_end - chunk_start);
            chunk_start = content_end - carry;
        }
        content_end = piece_end;
    }

    if content_end > chunk_start {
        push_chunk(chars, chunk_start, content_end, &mut chunks);
    }

    chunks
}

fn push_chunk(chars: &[char], start: usize, end: usize, chunks: &mut Vec<TextChunk>) {
    let text: String = chars[start..end].iter().collect();
    if text.trim().is_empty() {
        return;
    }
    chunks.push(TextChunk {
        text,
        start_offset: start,
    });
}

/// Ordered intersection of the text against the domain vocabulary,
/// capped at ten keywords per chunk.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    SECURITY_VOCABULARY
        .iter()
        .filter(|term| lowered.contains(*term))
        .take(MAX_KEYWORDS_PER_CHUNK)
        .map(|term| (*term).to_string())
        .collect()
}

/// Classify a chunk by the strongest keyword group it contains.
pub fn classify_chunk(text: &str) -> ChunkKind {
    let lowered = text.to_lowercase();
    let contains_any = |terms: &[&str]| terms.iter().any(|term| lowered.contains(term));

    if contains_any(&["vulnerability", "threat", "exploit"]) {
        ChunkKind::Vulnerability
    } else if contains_any(&["control", "safeguard", "mitigation"]) {
        ChunkKind::Control
    } else if contains_any(&["impact", "damage", "consequence"]) {
        ChunkKind::Impact
    } else if contains_any(&["methodology", "framework", "process"]) {
        ChunkKind::Methodology
    } else if contains_any(&["iso", "nist", "magerit", "octave"]) {
        ChunkKind::FrameworkReference
    } else {
        ChunkKind::Conceptual
    }
}

/// Split every document into chunks with enriched metadata.
pub fn split_documents(
    documents: &[Document],
    options: ChunkingOptions,
) -> Result<Vec<Chunk>, IngestError> {
    let mut all_chunks = Vec::new();

    for document in documents {
        let spans = split_text(&document.text, options)?;
        let total = spans.len();

        for (index, span) in spans.into_iter().enumerate() {
            let chunk_id = make_chunk_id(&document.filename, index, &span.text);
            all_chunks.push(Chunk {
                chunk_id,
                metadata: ChunkMetadata {
                    filename: document.filename.clone(),
                    document_type: document.document_type,
                    chunk_index: index,
                    total_chunks: total,
                    keywords: extract_keywords(&span.text),
                    chunk_kind: classify_chunk(&span.text),
                    start_offset: span.start_offset,
                    language: document.language.clone(),
                },
                text: span.text,
            });
        }
    }

    tracing::info!(
        chunks = all_chunks.len(),
        documents = documents.len(),
        "split documents into chunks"
    );
    Ok(all_chunks)
}

fn make_chunk_id(filename: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
