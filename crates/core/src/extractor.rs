use crate::error::IndexingError;
use crate::traits::{AnalyzedPage, AnalyzedTable, BlobStore, DocumentAnalyzer, FileRecordStore};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Looks up the file, downloads its blob and renders the analyzer output as
/// markdown. Analyzer errors are returned unchanged.
pub async fn extract_content(
    records: &dyn FileRecordStore,
    blobs: &dyn BlobStore,
    analyzer: &dyn DocumentAnalyzer,
    file_id: &str,
) -> Result<String, IndexingError> {
    let record = records
        .get(file_id)
        .await?
        .ok_or_else(|| IndexingError::not_found("file", file_id))?;

    let bytes = blobs.download(&record.blob_reference).await?;
    info!(file_id, size = bytes.len(), "downloaded file from blob storage");

    let pages = analyzer.analyze(&bytes, &record.filename).await?;
    let content = render_markdown(&pages);
    info!(file_id, pages = pages.len(), length = content.len(), "extracted content");

    Ok(content)
}

pub fn render_markdown(pages: &[AnalyzedPage]) -> String {
    pages
        .iter()
        .filter_map(|page| {
            let blocks = page
                .paragraphs
                .iter()
                .cloned()
                .chain(page.tables.iter().filter_map(render_table))
                .collect::<Vec<_>>();

            if blocks.is_empty() {
                None
            } else {
                Some(blocks.join("\n\n"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_table(table: &AnalyzedTable) -> Option<String> {
    if table.row_count == 0 || table.column_count == 0 {
        return None;
    }

    let mut lines = Vec::with_capacity(table.row_count + 1);
    for row in 0..table.row_count {
        let cells = (0..table.column_count)
            .map(|column| {
                table
                    .cells
                    .get(&(row, column))
                    .map(String::as_str)
                    .unwrap_or("")
            })
            .collect::<Vec<_>>();
        lines.push(format!("| {} |", cells.join(" | ")));

        if row == 0 {
            lines.push(format!(
                "| {} |",
                vec!["---"; table.column_count].join(" | ")
            ));
        }
    }

    Some(lines.join("\n"))
}

#[derive(Debug, Clone, Serialize)]
struct LayoutRequest<'a> {
    document_base64: String,
    filename: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutResponse {
    #[serde(default)]
    pages: Vec<LayoutPage>,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutPage {
    #[serde(default)]
    paragraphs: Vec<String>,
    #[serde(default)]
    tables: Vec<LayoutTable>,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutTable {
    row_count: usize,
    column_count: usize,
    #[serde(default)]
    cells: Vec<LayoutCell>,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutCell {
    row_index: usize,
    column_index: usize,
    #[serde(default)]
    content: Option<String>,
}

impl From<LayoutPage> for AnalyzedPage {
    fn from(page: LayoutPage) -> Self {
        Self {
            paragraphs: page.paragraphs,
            tables: page
                .tables
                .into_iter()
                .map(|table| AnalyzedTable {
                    row_count: table.row_count,
                    column_count: table.column_count,
                    cells: table
                        .cells
                        .into_iter()
                        .map(|cell| {
                            (
                                (cell.row_index, cell.column_index),
                                cell.content.unwrap_or_default(),
                            )
                        })
                        .collect::<BTreeMap<_, _>>(),
                })
                .collect(),
        }
    }
}

/// Remote structured-layout analysis service.
pub struct HttpLayoutAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLayoutAnalyzer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for HttpLayoutAnalyzer {
    async fn analyze(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Vec<AnalyzedPage>, IndexingError> {
        let payload = LayoutRequest {
            document_base64: STANDARD.encode(bytes),
            filename,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(IndexingError::upstream(
                "document analyzer",
                format!("{} returned {}", self.endpoint, response.status()),
            ));
        }

        let payload: LayoutResponse = response.json().await?;
        Ok(payload.pages.into_iter().map(AnalyzedPage::from).collect())
    }
}

/// Offline analyzer: PDF page text through lopdf, anything else read as
/// UTF-8 text with blank-line separated paragraphs. It never reports tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAnalyzer;

#[async_trait]
impl DocumentAnalyzer for LocalAnalyzer {
    async fn analyze(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Vec<AnalyzedPage>, IndexingError> {
        let is_pdf = filename.to_ascii_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF");

        if is_pdf {
            let owned = bytes.to_vec();
            let name = filename.to_string();
            return tokio::task::spawn_blocking(move || pdf_pages(&owned, &name))
                .await
                .map_err(|error| IndexingError::PdfParse(error.to_string()))?;
        }

        let text = std::str::from_utf8(bytes).map_err(|error| {
            IndexingError::Validation(format!("{filename} is not utf-8 text: {error}"))
        })?;

        Ok(vec![AnalyzedPage {
            paragraphs: split_paragraphs(text),
            tables: Vec::new(),
        }])
    }
}

fn pdf_pages(bytes: &[u8], filename: &str) -> Result<Vec<AnalyzedPage>, IndexingError> {
    let document =
        Document::load_mem(bytes).map_err(|error| IndexingError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IndexingError::PdfParse(error.to_string()))?;

        let paragraphs = split_paragraphs(&text);
        if !paragraphs.is_empty() {
            pages.push(AnalyzedPage {
                paragraphs,
                tables: Vec::new(),
            });
        }
    }

    if pages.is_empty() {
        return Err(IndexingError::PdfParse(format!(
            "pdf had no readable page text: {filename}"
        )));
    }

    Ok(pages)
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(|paragraph| paragraph.trim().to_string())
        .filter(|paragraph| !paragraph.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileRecord;
    use crate::stores::{MemoryBlobStore, MemoryFileRecordStore};
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn table(rows: usize, columns: usize, cells: &[((usize, usize), &str)]) -> AnalyzedTable {
        AnalyzedTable {
            row_count: rows,
            column_count: columns,
            cells: cells
                .iter()
                .map(|(position, text)| (*position, text.to_string()))
                .collect(),
        }
    }

    #[test]
    fn tables_render_as_markdown_with_header_separator() {
        let rendered = render_table(&table(
            3,
            2,
            &[
                ((0, 0), "Part"),
                ((0, 1), "Torque"),
                ((1, 0), "Bolt A"),
                ((1, 1), "12 Nm"),
                ((2, 0), "Bolt B"),
            ],
        ))
        .expect("table should render");

        assert_eq!(
            rendered,
            "| Part | Torque |\n| --- | --- |\n| Bolt A | 12 Nm |\n| Bolt B |  |"
        );
    }

    #[test]
    fn empty_tables_are_skipped() {
        assert!(render_table(&table(0, 3, &[])).is_none());
        assert!(render_table(&table(2, 0, &[])).is_none());
    }

    #[test]
    fn pages_and_blocks_are_joined_with_blank_lines() {
        let pages = vec![
            AnalyzedPage {
                paragraphs: vec!["Intro".to_string(), "Details".to_string()],
                tables: vec![table(1, 1, &[((0, 0), "Only")])],
            },
            AnalyzedPage::default(),
            AnalyzedPage {
                paragraphs: vec!["Closing".to_string()],
                tables: Vec::new(),
            },
        ];

        assert_eq!(
            render_markdown(&pages),
            "Intro\n\nDetails\n\n| Only |\n| --- |\n\nClosing"
        );
    }

    #[tokio::test]
    async fn local_analyzer_reads_text_paragraphs() {
        let pages = LocalAnalyzer
            .analyze(b"First paragraph.\r\n\r\nSecond one.\n\n\n", "notes.md")
            .await
            .expect("text should be analyzed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].paragraphs, vec!["First paragraph.", "Second one."]);
    }

    #[tokio::test]
    async fn local_analyzer_rejects_broken_pdf() {
        let result = LocalAnalyzer.analyze(b"%PDF-1.4\n%broken", "broken.pdf").await;
        assert!(matches!(result, Err(IndexingError::PdfParse(_))));
    }

    #[tokio::test]
    async fn http_analyzer_decodes_layout_pages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(200).json_body(json!({
                    "pages": [
                        {
                            "paragraphs": ["Heading"],
                            "tables": [{
                                "row_count": 2,
                                "column_count": 2,
                                "cells": [
                                    {"row_index": 0, "column_index": 0, "content": "k"},
                                    {"row_index": 0, "column_index": 1, "content": "v"},
                                    {"row_index": 1, "column_index": 0, "content": null}
                                ]
                            }]
                        }
                    ]
                }));
            })
            .await;

        let analyzer = HttpLayoutAnalyzer::new(format!("{}/analyze", server.base_url()), None);
        let pages = analyzer.analyze(b"bytes", "a.pdf").await.expect("analysis");

        mock.assert_async().await;
        assert_eq!(
            render_markdown(&pages),
            "Heading\n\n| k | v |\n| --- | --- |\n|  |  |"
        );
    }

    #[tokio::test]
    async fn http_analyzer_surfaces_service_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(503);
            })
            .await;

        let analyzer = HttpLayoutAnalyzer::new(format!("{}/analyze", server.base_url()), None);
        let result = analyzer.analyze(b"bytes", "a.pdf").await;
        assert!(matches!(result, Err(IndexingError::Upstream { .. })));
    }

    #[tokio::test]
    async fn extraction_fails_for_unknown_file() {
        let records = MemoryFileRecordStore::default();
        let blobs = MemoryBlobStore::default();
        let result = extract_content(&records, &blobs, &LocalAnalyzer, "missing").await;
        assert!(matches!(result, Err(IndexingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn extraction_renders_stored_blob() -> Result<(), IndexingError> {
        let records = MemoryFileRecordStore::default();
        let blobs = MemoryBlobStore::default();
        records
            .insert(FileRecord::new("f-1", "owner", "notes.txt", "owner/f-1_notes.txt"))
            .await?;
        blobs
            .upload("owner/f-1_notes.txt", b"Alpha\n\nBeta".to_vec())
            .await?;

        let content = extract_content(&records, &blobs, &LocalAnalyzer, "f-1").await?;
        assert_eq!(content, "Alpha\n\nBeta");
        Ok(())
    }
}
