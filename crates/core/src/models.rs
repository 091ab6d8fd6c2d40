use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Document classes the corpus is sorted into, inferred from file names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    RiskMethodology,
    SecurityPrinciples,
    ItRiskManagement,
    RegulatoryFramework,
    Compliance,
    General,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::RiskMethodology => "risk_methodology",
            DocumentType::SecurityPrinciples => "security_principles",
            DocumentType::ItRiskManagement => "it_risk_management",
            DocumentType::RegulatoryFramework => "regulatory_framework",
            DocumentType::Compliance => "compliance",
            DocumentType::General => "general",
        }
    }

    /// Human-readable name used in prompt headers.
    pub fn display_name(&self) -> &'static str {
        match self {
            DocumentType::RiskMethodology => "Risk Methodology",
            DocumentType::SecurityPrinciples => "Security Principles",
            DocumentType::ItRiskManagement => "IT Risk Management",
            DocumentType::RegulatoryFramework => "Regulatory Framework",
            DocumentType::Compliance => "Compliance",
            DocumentType::General => "General",
        }
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "risk_methodology" => Ok(DocumentType::RiskMethodology),
            "security_principles" => Ok(DocumentType::SecurityPrinciples),
            "it_risk_management" => Ok(DocumentType::ItRiskManagement),
            "regulatory_framework" => Ok(DocumentType::RegulatoryFramework),
            "compliance" => Ok(DocumentType::Compliance),
            "general" => Ok(DocumentType::General),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// Semantic class of a chunk, inferred from keyword presence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Vulnerability,
    Control,
    Impact,
    Methodology,
    FrameworkReference,
    Conceptual,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Vulnerability => "vulnerability",
            ChunkKind::Control => "control",
            ChunkKind::Impact => "impact",
            ChunkKind::Methodology => "methodology",
            ChunkKind::FrameworkReference => "framework_reference",
            ChunkKind::Conceptual => "conceptual",
        }
    }
}

/// A loaded source file, immutable once read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source_path: PathBuf,
    pub filename: String,
    pub document_type: DocumentType,
    pub content_length: usize,
    pub language: String,
    pub domain: String,
}

/// Metadata carried by every chunk and persisted alongside its vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub filename: String,
    pub document_type: DocumentType,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub keywords: Vec<String>,
    pub chunk_kind: ChunkKind,
    pub start_offset: usize,
    pub language: String,
}

/// A contiguous sub-span of a document prepared for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One ranked retrieval result. Query-scoped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub relevance_rank: usize,
    pub score: Option<f32>,
    pub matched_keywords: Vec<String>,
}

/// Outcome of a context search.
///
/// `Results` may be empty — a successful search with nothing relevant.
/// `Degraded` means the embedding provider failed at query time and the
/// caller should proceed without enrichment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RetrievalOutcome {
    Results { hits: Vec<SearchHit> },
    Degraded { reason: String },
}

impl RetrievalOutcome {
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            RetrievalOutcome::Results { hits } => hits,
            RetrievalOutcome::Degraded { .. } => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, RetrievalOutcome::Degraded { .. })
    }
}

/// Metadata fields a filter can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    DocumentType,
    Filename,
    ChunkKind,
    Language,
}

/// A scalar filter means equality, a collection means membership.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Equals(String),
    AnyOf(Vec<String>),
}

impl FieldFilter {
    fn matches(&self, value: &str) -> bool {
        match self {
            FieldFilter::Equals(expected) => expected == value,
            FieldFilter::AnyOf(allowed) => allowed.iter().any(|entry| entry == value),
        }
    }
}

/// Conjunction of per-field filters resolved against [`ChunkMetadata`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    entries: Vec<(MetadataField, FieldFilter)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: MetadataField, filter: FieldFilter) -> Self {
        self.entries.push((field, filter));
        self
    }

    /// Membership filter over document types.
    pub fn document_types(types: &[DocumentType]) -> Self {
        Self::new().with(
            MetadataField::DocumentType,
            FieldFilter::AnyOf(types.iter().map(|t| t.as_str().to_string()).collect()),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.entries.iter().all(|(field, filter)| {
            let value = match field {
                MetadataField::DocumentType => metadata.document_type.as_str(),
                MetadataField::Filename => metadata.filename.as_str(),
                MetadataField::ChunkKind => metadata.chunk_kind.as_str(),
                MetadataField::Language => metadata.language.as_str(),
            };
            filter.matches(value)
        })
    }
}

/// Summary of a loaded document set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentStats {
    pub total_documents: usize,
    pub total_characters: usize,
    pub avg_document_length: usize,
    pub document_types: HashMap<String, usize>,
    pub languages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(doc_type: DocumentType, filename: &str) -> ChunkMetadata {
        ChunkMetadata {
            filename: filename.to_string(),
            document_type: doc_type,
            chunk_index: 0,
            total_chunks: 1,
            keywords: Vec::new(),
            chunk_kind: ChunkKind::Conceptual,
            start_offset: 0,
            language: "en".to_string(),
        }
    }

    #[test]
    fn scalar_filter_means_equality() {
        let filter = MetadataFilter::new().with(
            MetadataField::Filename,
            FieldFilter::Equals("magerit.txt".to_string()),
        );

        assert!(filter.matches(&metadata(DocumentType::RiskMethodology, "magerit.txt")));
        assert!(!filter.matches(&metadata(DocumentType::RiskMethodology, "octave.txt")));
    }

    #[test]
    fn collection_filter_means_membership() {
        let filter = MetadataFilter::document_types(&[
            DocumentType::Compliance,
            DocumentType::RegulatoryFramework,
        ]);

        assert!(filter.matches(&metadata(DocumentType::Compliance, "a.txt")));
        assert!(filter.matches(&metadata(DocumentType::RegulatoryFramework, "b.txt")));
        assert!(!filter.matches(&metadata(DocumentType::General, "c.txt")));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = MetadataFilter::new();
        assert!(filter.matches(&metadata(DocumentType::General, "any.txt")));
    }

    #[test]
    fn document_type_round_trips_through_str() {
        for doc_type in [
            DocumentType::RiskMethodology,
            DocumentType::SecurityPrinciples,
            DocumentType::ItRiskManagement,
            DocumentType::RegulatoryFramework,
            DocumentType::Compliance,
            DocumentType::General,
        ] {
            assert_eq!(doc_type.as_str().parse::<DocumentType>(), Ok(doc_type));
        }
    }

    #[test]
    fn degraded_outcome_exposes_no_hits() {
        let outcome = RetrievalOutcome::Degraded {
            reason: "provider timeout".to_string(),
        };
        assert!(outcome.is_degraded());
        assert!(outcome.hits().is_empty());
    }
}
