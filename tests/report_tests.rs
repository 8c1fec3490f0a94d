#![cfg(feature = "inmem-store")]

mod common;

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use common::*;
use quire::auth::AdminContext;
use quire::error::ApiError;
use quire::models::Post;
use quire::report::{self, build_blocks, ImageError, ImageFetcher, ReportBlock};
use quire::repo::Snapshot;

/// Serves canned bytes per URL; anything else fails like a timeout would.
struct StubFetcher(HashMap<String, Vec<u8>>);

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        self.0.get(url).cloned().ok_or(ImageError::DataUrl)
    }
}

fn png() -> Vec<u8> {
    base64::engine::general_purpose::STANDARD.decode(PNG_1X1).unwrap()
}

fn fetcher() -> StubFetcher {
    StubFetcher(HashMap::from([
        ("https://img.example/ok.png".to_string(), png()),
        ("https://img.example/html".to_string(), b"<html>nope</html>".to_vec()),
    ]))
}

fn post_with(content: &str) -> Post {
    post(1, 2, "Images", content, None)
}

#[tokio::test]
async fn layout_per_post() {
    let posts = vec![post(1, 2, "First", "<p>one</p><p>two</p>", None), post(2, 1, "Second", "<p>three</p>", None)];
    let blocks = build_blocks(&posts, &fetcher()).await;
    assert_eq!(blocks[0], ReportBlock::Title(report::REPORT_TITLE.into()));
    assert_eq!(blocks[1], ReportBlock::Heading("First".into()));
    assert_eq!(blocks[2], ReportBlock::Paragraph("Posted: 2024-01-02 09:30".into()));
    assert_eq!(blocks[3], ReportBlock::Paragraph(String::new()));
    assert_eq!(blocks[4], ReportBlock::Paragraph("one".into()));
    assert_eq!(blocks[5], ReportBlock::Paragraph("two".into()));
    assert_eq!(blocks[6], ReportBlock::PageBreak);
    assert_eq!(blocks.iter().filter(|b| **b == ReportBlock::PageBreak).count(), 2);
    assert_eq!(blocks.last(), Some(&ReportBlock::PageBreak));
}

#[tokio::test]
async fn inline_and_remote_images_embed() {
    let content = format!(
        r#"<p>before</p><img src="data:image/png;base64,{PNG_1X1}"><img src="https://img.example/ok.png"><p>after</p>"#
    );
    let blocks = build_blocks(&[post_with(&content)], &fetcher()).await;
    let images: Vec<_> = blocks.iter().filter_map(|b| match b { ReportBlock::Image(i) => Some(i), _ => None }).collect();
    assert_eq!(images.len(), 2);
    assert_eq!((images[0].width_px, images[0].height_px), (1, 1));
    assert!(images[1].png.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn failed_images_become_placeholders() {
    let content = r#"<img src="data:image/png;base64,!!!"><img src="https://img.example/missing.png"><img src="https://img.example/html"><img src="/relative.png"><p>tail</p>"#;
    let blocks = build_blocks(&[post_with(content)], &fetcher()).await;
    let placeholders: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b { ReportBlock::Placeholder(t) => Some(t.as_str()), _ => None })
        .collect();
    assert_eq!(placeholders.len(), 3);
    assert!(placeholders[0].starts_with("[Image could not be decoded:"));
    assert_eq!(placeholders[1], "[Image could not be downloaded: https://img.example/missing.png]");
    assert_eq!(placeholders[2], "[Image could not be downloaded: https://img.example/html]");
    // relative sources are skipped, the rest of the post still renders
    assert!(blocks.contains(&ReportBlock::Paragraph("tail".into())));
}

#[tokio::test]
async fn renders_a_docx_package() {
    let content = format!(r#"<p>line<br>break</p><img src="data:image/png;base64,{PNG_1X1}">"#);
    let blocks = build_blocks(&[post_with(&content)], &fetcher()).await;
    let bytes = report::render(blocks).unwrap();
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn export_requires_admin_and_covers_every_post() {
    let repo = seeded(blog()).await;
    let err = report::export_document(&repo, &AdminContext::anonymous(), &fetcher()).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let bytes = report::export_document(&repo, &AdminContext::admin("admin"), &fetcher()).await.unwrap();
    assert!(bytes.starts_with(b"PK"));

    let empty = seeded(Snapshot::default()).await;
    let bytes = report::export_document(&empty, &AdminContext::admin("admin"), &fetcher()).await.unwrap();
    assert!(bytes.starts_with(b"PK"));
}
