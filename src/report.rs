//! Word-processor backup report of every post, images included.
//!
//! Building happens in two steps: [`build_blocks`] walks the posts and
//! materializes images (the only part that touches the network), then
//! [`render`] lays the blocks out as a `.docx` package.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use docx_rs::{BreakType, Docx, Paragraph, Pic, Run, Style, StyleType};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::warn;

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::models::Post;
use crate::repo::{PostFilter, Repo};
use crate::text;

pub const REPORT_TITLE: &str = "Blog Backup Report";
pub const REPORT_FILENAME: &str = "blog_backup.docx";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const EMU_PER_INCH: u64 = 914_400;
const IMAGE_WIDTH_EMU: u64 = 4 * EMU_PER_INCH;

static CONTENT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("p, img").expect("static selector"));

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("not a base64 data url")]
    DataUrl,
    #[error("bad base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("not an image ({0})")]
    NotImage(String),
    #[error("{0}")]
    Decode(#[from] image::ImageError),
}

/// Source of remote image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Image re-encoded as PNG, with its pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

impl EmbeddedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        if let Some(kind) = infer::get(bytes) {
            if kind.matcher_type() != infer::MatcherType::Image {
                return Err(ImageError::NotImage(kind.mime_type().to_string()));
            }
        }
        let img = image::load_from_memory(bytes)?;
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(Self { png, width_px: img.width(), height_px: img.height() })
    }

    /// Display size in EMU: fixed width, height keeps the aspect ratio.
    fn size_emu(&self) -> (u32, u32) {
        let w = u64::from(self.width_px.max(1));
        let h = IMAGE_WIDTH_EMU * u64::from(self.height_px) / w;
        (IMAGE_WIDTH_EMU as u32, u32::try_from(h).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportBlock {
    Title(String),
    Heading(String),
    Paragraph(String),
    Image(EmbeddedImage),
    /// Stands in for an image that could not be materialized.
    Placeholder(String),
    PageBreak,
}

#[derive(Debug, Clone, PartialEq)]
enum ContentItem {
    Text(String),
    Image(String),
}

/// Paragraph texts and image sources in document order.
fn content_items(rich_text: &str) -> Vec<ContentItem> {
    let fragment = Html::parse_fragment(rich_text);
    let mut items = Vec::new();
    for el in fragment.select(&CONTENT_SELECTOR) {
        if el.value().name() == "img" {
            if let Some(src) = el.value().attr("src").filter(|s| !s.is_empty()) {
                items.push(ContentItem::Image(src.to_string()));
            }
        } else {
            let text = text::element_text(el);
            if !text.is_empty() {
                items.push(ContentItem::Text(text));
            }
        }
    }
    items
}

pub fn decode_data_url(src: &str) -> Result<Vec<u8>, ImageError> {
    let (_, data) = src.split_once(',').ok_or(ImageError::DataUrl)?;
    let data: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

async fn materialize(src: &str, fetcher: &dyn ImageFetcher) -> Option<ReportBlock> {
    if src.starts_with("data:image") {
        let block = match decode_data_url(src).and_then(|bytes| EmbeddedImage::decode(&bytes)) {
            Ok(img) => ReportBlock::Image(img),
            Err(e) => {
                warn!(error = %e, "inline image could not be decoded");
                ReportBlock::Placeholder(format!("[Image could not be decoded: {e}]"))
            }
        };
        Some(block)
    } else if src.starts_with("http") {
        let fetched = match fetcher.fetch(src).await {
            Ok(bytes) => EmbeddedImage::decode(&bytes),
            Err(e) => Err(e),
        };
        let block = match fetched {
            Ok(img) => ReportBlock::Image(img),
            Err(e) => {
                warn!(src, error = %e, "remote image could not be downloaded");
                ReportBlock::Placeholder(format!("[Image could not be downloaded: {src}]"))
            }
        };
        Some(block)
    } else {
        None
    }
}

/// Lays out `posts` in the given order; image failures become placeholders.
pub async fn build_blocks(posts: &[Post], fetcher: &dyn ImageFetcher) -> Vec<ReportBlock> {
    let mut blocks = vec![ReportBlock::Title(REPORT_TITLE.to_string())];
    for post in posts {
        blocks.push(ReportBlock::Heading(post.title.clone()));
        blocks.push(ReportBlock::Paragraph(format!("Posted: {}", post.date_posted.format("%Y-%m-%d %H:%M"))));
        blocks.push(ReportBlock::Paragraph(String::new()));
        for item in content_items(&post.content) {
            match item {
                ContentItem::Text(t) => blocks.push(ReportBlock::Paragraph(t)),
                ContentItem::Image(src) => blocks.extend(materialize(&src, fetcher).await),
            }
        }
        blocks.push(ReportBlock::PageBreak);
    }
    blocks
}

fn text_run(text: &str) -> Run {
    let mut run = Run::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(line);
    }
    run
}

pub fn render(blocks: Vec<ReportBlock>) -> Result<Vec<u8>, ApiError> {
    let mut docx = Docx::new()
        .add_style(Style::new("Title", StyleType::Paragraph).name("Title").size(52).bold())
        .add_style(Style::new("Heading1", StyleType::Paragraph).name("Heading 1").size(32).bold());
    for block in blocks {
        let paragraph = match block {
            ReportBlock::Title(t) => Paragraph::new().style("Title").add_run(text_run(&t)),
            ReportBlock::Heading(t) => Paragraph::new().style("Heading1").add_run(text_run(&t)),
            ReportBlock::Paragraph(t) => Paragraph::new().add_run(text_run(&t)),
            ReportBlock::Image(img) => {
                let (w, h) = img.size_emu();
                let pic = Pic::new_with_dimensions(img.png, img.width_px, img.height_px).size(w, h);
                Paragraph::new().add_run(Run::new().add_image(pic))
            }
            ReportBlock::Placeholder(t) => Paragraph::new().add_run(text_run(&t).italic()),
            ReportBlock::PageBreak => Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
        };
        docx = docx.add_paragraph(paragraph);
    }
    let mut out = Cursor::new(Vec::new());
    docx.build().pack(&mut out).map_err(|e| {
        tracing::error!("failed to pack report: {e}");
        ApiError::Internal
    })?;
    Ok(out.into_inner())
}

/// Every post, newest first, as one `.docx` file.
pub async fn export_document(
    repo: &dyn Repo,
    ctx: &AdminContext,
    fetcher: &dyn ImageFetcher,
) -> Result<Vec<u8>, ApiError> {
    ctx.ensure_admin()?;
    let posts: Vec<Post> = repo
        .list_posts(&PostFilter::default(), None)
        .await?
        .posts
        .into_iter()
        .map(|v| v.post)
        .collect();
    let blocks = build_blocks(&posts, fetcher).await;
    let placeholders = blocks.iter().filter(|b| matches!(b, ReportBlock::Placeholder(_))).count();
    tracing::info!(posts = posts.len(), placeholders, "backup report built");
    render(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_paragraphs_and_images_in_order() {
        let items = content_items(r#"<p>first <b>bold</b></p><p>  </p><img src="a.png"><img><p>last</p>"#);
        assert_eq!(
            items,
            vec![
                ContentItem::Text("first bold".into()),
                ContentItem::Image("a.png".into()),
                ContentItem::Text("last".into()),
            ]
        );
    }

    #[test]
    fn data_url_tolerates_line_breaks() {
        assert_eq!(decode_data_url("data:image/png;base64,aGVs\nbG8=").unwrap(), b"hello");
        assert!(matches!(decode_data_url("data:image/png;base64"), Err(ImageError::DataUrl)));
    }

    #[test]
    fn rejects_non_image_bytes() {
        assert!(EmbeddedImage::decode(b"%PDF-1.4 not an image").is_err());
        assert!(EmbeddedImage::decode(b"plain text").is_err());
    }
}
