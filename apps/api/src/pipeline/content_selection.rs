//! Content Selection — resolves which source content a job runs against.
//!
//! Three origins: a previously uploaded file (fetched from blob storage,
//! text extracted), the caller's most recent stored document, or an
//! explicit stored-document id. Guests are restricted to file upload; the
//! submission path validates this too, but the stage enforces it again
//! since the payload is attacker-controlled data by the time a worker
//! sees it.

use sqlx::PgPool;
use tracing::debug;

use crate::pipeline::{StageError, StageKind};
use crate::queue::job::ContentSource;
use crate::results::ArtifactStore;

const STAGE: StageKind = StageKind::ContentSelection;

/// Extensions the extractor understands. Checked at submission as well.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

#[derive(Debug, Clone)]
pub struct SelectedContent {
    pub text: String,
    /// Which origin produced the text: "upload", "stored", or "document".
    pub origin: &'static str,
}

pub struct ContentSelector {
    pool: PgPool,
    artifacts: ArtifactStore,
}

impl ContentSelector {
    pub fn new(pool: PgPool, artifacts: ArtifactStore) -> Self {
        Self { pool, artifacts }
    }

    pub async fn select(
        &self,
        identity_key: &str,
        is_registered: bool,
        source: &ContentSource,
    ) -> Result<SelectedContent, StageError> {
        if !is_registered && !matches!(source, ContentSource::Upload { .. }) {
            return Err(StageError::unrecoverable(
                STAGE,
                "guests may only generate from an uploaded file",
            ));
        }

        match source {
            ContentSource::Upload { file_key, filename } => {
                let bytes = self
                    .artifacts
                    .fetch_upload(file_key)
                    .await
                    .map_err(|e| StageError::upstream(STAGE, e.to_string()))?;
                debug!(file_key = %file_key, size = bytes.len(), "Fetched uploaded source file");
                let text = extract_text(filename, &bytes).await?;
                non_empty(text, "upload")
            }
            ContentSource::Stored => {
                let body: Option<String> = sqlx::query_scalar(
                    r#"
                    SELECT body FROM source_documents
                    WHERE identity_key = $1
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(identity_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StageError::upstream(STAGE, e.to_string()))?;

                let body = body.ok_or_else(|| {
                    StageError::unrecoverable(STAGE, "no stored content for this identity")
                })?;
                non_empty(body, "stored")
            }
            ContentSource::Document { document_id } => {
                let body: Option<String> = sqlx::query_scalar(
                    "SELECT body FROM source_documents WHERE id = $1 AND identity_key = $2",
                )
                .bind(document_id)
                .bind(identity_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StageError::upstream(STAGE, e.to_string()))?;

                let body = body.ok_or_else(|| {
                    StageError::unrecoverable(STAGE, format!("document {document_id} not found"))
                })?;
                non_empty(body, "document")
            }
        }
    }
}

/// Extracts plain text from an uploaded file. PDF extraction is CPU-bound,
/// so it runs on the blocking pool.
pub async fn extract_text(filename: &str, bytes: &[u8]) -> Result<String, StageError> {
    let extension = extension_of(filename).map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => {
            let owned = bytes.to_vec();
            let text = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&owned)
            })
            .await
            .map_err(|e| StageError::upstream(STAGE, format!("extraction task failed: {e}")))?
            .map_err(|e| {
                // A PDF the extractor cannot read will not read better on
                // retry — the input itself is bad.
                StageError::unrecoverable(STAGE, format!("could not extract text from PDF: {e}"))
            })?;
            Ok(text)
        }
        Some("txt") | Some("md") => String::from_utf8(bytes.to_vec()).map_err(|_| {
            StageError::unrecoverable(STAGE, "uploaded text file is not valid UTF-8")
        }),
        _ => Err(StageError::unrecoverable(
            STAGE,
            format!("unsupported file type: {filename}"),
        )),
    }
}

pub fn extension_of(filename: &str) -> Option<&str> {
    filename.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| {
        SUPPORTED_EXTENSIONS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ext))
    })
}

fn non_empty(text: String, origin: &'static str) -> Result<SelectedContent, StageError> {
    if text.trim().is_empty() {
        return Err(StageError::unrecoverable(
            STAGE,
            "source content has no extractable text",
        ));
    }
    Ok(SelectedContent { text, origin })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions_match_case_insensitively() {
        assert_eq!(extension_of("resume.pdf"), Some("pdf"));
        assert_eq!(extension_of("resume.PDF"), Some("PDF"));
        assert_eq!(extension_of("notes.txt"), Some("txt"));
        assert_eq!(extension_of("notes.md"), Some("md"));
        assert_eq!(extension_of("archive.docx"), None);
        assert_eq!(extension_of("no_extension"), None);
    }

    #[tokio::test]
    async fn test_plain_text_upload_extracts_verbatim() {
        let text = extract_text("resume.txt", b"Rust engineer, 8 years").await.unwrap();
        assert_eq!(text, "Rust engineer, 8 years");
    }

    #[tokio::test]
    async fn test_unsupported_file_type_is_unrecoverable() {
        let err = extract_text("resume.docx", b"...").await.unwrap_err();
        assert!(err.is_unrecoverable());
        assert_eq!(err.stage, StageKind::ContentSelection);
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_file_is_unrecoverable() {
        let err = extract_text("resume.txt", &[0xff, 0xfe, 0x00]).await.unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_unrecoverable() {
        // Not a PDF at all — the extractor must reject it, and a retry
        // would see the same bytes.
        let err = extract_text("resume.pdf", b"plainly not a pdf").await.unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[test]
    fn test_empty_content_is_unrecoverable() {
        let err = non_empty("   \n".to_string(), "stored").unwrap_err();
        assert!(err.is_unrecoverable());
    }
}
