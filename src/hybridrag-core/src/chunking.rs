use std::path::Path;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::config::IngestionConfig;
use crate::models::Chunk;
use crate::{Error, Result};

/// Turns a file into an ordered chunk sequence
#[async_trait::async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, path: &Path) -> Result<Vec<Chunk>>;
}

/// Token-window splitter using the cl100k_base encoding
pub struct TokenChunker {
    bpe: CoreBPE,
    chunk_size: usize,
    overlap: usize,
}

impl TokenChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be positive".into()));
        }
        let bpe = cl100k_base().map_err(|e| Error::Conversion(e.to_string()))?;
        Ok(Self {
            bpe,
            chunk_size,
            // Overlap must leave room to advance
            overlap: overlap.min(chunk_size - 1),
        })
    }

    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(vec![]);
        }

        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= self.chunk_size {
            return Ok(vec![text.to_string()]);
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < tokens.len() {
            let end = std::cmp::min(start + self.chunk_size, tokens.len());
            let chunk_text = self
                .bpe
                .decode(tokens[start..end].to_vec())
                .map_err(|e| Error::Conversion(e.to_string()))?;
            chunks.push(chunk_text);

            if end >= tokens.len() {
                break;
            }
            start = end - self.overlap;
        }

        Ok(chunks)
    }
}

/// Converter for plain-text formats; binary formats need an external converter
pub struct TextDocumentConverter {
    chunker: TokenChunker,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "html", "htm", "rst"];

impl TextDocumentConverter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        Ok(Self {
            chunker: TokenChunker::new(chunk_size, overlap)?,
        })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split already-loaded text; blank pieces are dropped and indexes stay dense
    pub fn chunk_text(&self, text: &str, source_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .chunker
            .split(text)?
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .enumerate()
            .map(|(index, piece)| Chunk::new(piece, source_id, index))
            .collect())
    }
}

#[async_trait::async_trait]
impl DocumentConverter for TextDocumentConverter {
    async fn convert(&self, path: &Path) -> Result<Vec<Chunk>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(Error::UnsupportedDocument(format!(
                "{} (supported: {})",
                path.display(),
                TEXT_EXTENSIONS.join(", ")
            )));
        }

        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::Conversion(format!("{} is not valid UTF-8", path.display())))?;

        self.chunk_text(&text, &path.to_string_lossy())
    }
}
