use crate::error::IngestError;
use crate::models::{Document, DocumentStats, DocumentType};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DOCUMENT_LANGUAGE: &str = "en";
const DOCUMENT_DOMAIN: &str = "cybersecurity";

/// Recursively list `*.txt` files under `folder`, sorted for determinism.
pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Load every text document under `docs_dir` with enriched metadata.
pub fn load_all_documents(docs_dir: &Path) -> Result<Vec<Document>, IngestError> {
    if !docs_dir.is_dir() {
        return Err(IngestError::DocsDirNotFound(
            docs_dir.display().to_string(),
        ));
    }

    let files = discover_text_files(docs_dir);
    if files.is_empty() {
        return Err(IngestError::EmptyCorpus(docs_dir.display().to_string()));
    }

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(&path)?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();

        let document_type = classify_document(&filename);
        documents.push(Document {
            content_length: text.chars().count(),
            text,
            source_path: path,
            filename,
            document_type,
            language: DOCUMENT_LANGUAGE.to_string(),
            domain: DOCUMENT_DOMAIN.to_string(),
        });
    }

    tracing::info!(count = documents.len(), dir = %docs_dir.display(), "loaded documents");
    Ok(documents)
}

/// Classify a document by file name. Pure; first match in priority order
/// wins, specific methodology names before generic framework terms.
pub fn classify_document(filename: &str) -> DocumentType {
    let name = filename.to_lowercase();

    if name.contains("magerit") || name.contains("risk_measurement") || name.contains("risk-measurement")
    {
        DocumentType::RiskMethodology
    } else if name.contains("principles") {
        DocumentType::SecurityPrinciples
    } else if name.contains("risk") {
        DocumentType::ItRiskManagement
    } else if name.contains("framework") || name.contains("regulatory") {
        DocumentType::RegulatoryFramework
    } else if name.contains("compliance") {
        DocumentType::Compliance
    } else {
        DocumentType::General
    }
}

/// Aggregate statistics over a loaded document set.
pub fn document_stats(documents: &[Document]) -> DocumentStats {
    if documents.is_empty() {
        return DocumentStats::default();
    }

    let total_characters: usize = documents.iter().map(|doc| doc.content_length).sum();
    let mut document_types: HashMap<String, usize> = HashMap::new();
    let mut languages: Vec<String> = Vec::new();

    for document in documents {
        *document_types
            .entry(document.document_type.as_str().to_string())
            .or_insert(0) += 1;
        if !languages.contains(&document.language) {
            languages.push(document.language.clone());
        }
    }

    DocumentStats {
        total_documents: documents.len(),
        total_characters,
        avg_document_length: total_characters / documents.len(),
        document_types,
        languages,
    }
}
