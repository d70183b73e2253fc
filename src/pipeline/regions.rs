//! Page analysis: call the vision client and turn its reply into [`Block`]s.
//!
//! ── Response recovery ──
//!
//! The reply should be a bare JSON array but models wrap it in prose or
//! markdown fences. Two attempts are made: the span from the first `[` to
//! the last `]`, then the whole reply with fence markers stripped. If
//! neither parses as an array the page fails.
//!
//! ── Region shapes ──
//!
//! Elements arrive in two shapes, captured by [`RegionPayload`]:
//!
//! ```text
//! Flat    {"type": "text", "bbox": [x1,y1,x2,y2], "text": "...", "html": "...", "description": "..."}
//! Nested  {"label": "table", "bbox": [...], "attributes": {"text": "...", "html": "...", "vlm_description": "..."}}
//! ```
//!
//! Both map to one canonical [`Block`]. Boxes are on a 0–1000 scale and are
//! descaled to the page's pixel size. An element without a usable box is
//! rejected rather than guessed at; a malformed element is skipped without
//! failing the rest of the page.

use crate::error::PageError;
use crate::model::{Block, BlockKind, BoundingBox, ATTR_DESCRIPTION, ATTR_HTML};
use crate::pipeline::encode::EncodedPage;
use crate::pipeline::vision::VisionClient;
use crate::prompts::BBOX_SCALE;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Confidence given to every region; the remote model reports none.
pub const REGION_CONFIDENCE: f32 = 1.0;

/// First `[` through last `]`, across lines.
static RE_ARRAY_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// Markdown code-fence markers, with or without a `json` tag.
static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());

/// A box as the model wrote it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawBox {
    List(Vec<f64>),
    Corners { x1: f64, y1: f64, x2: f64, y2: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NestedAttributes {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub vlm_description: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NestedRegion {
    #[serde(default, alias = "type")]
    pub label: Option<String>,
    #[serde(default, alias = "coordinate")]
    pub bbox: Option<RawBox>,
    pub attributes: NestedAttributes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlatRegion {
    #[serde(default, rename = "type", alias = "label")]
    pub kind: Option<String>,
    #[serde(default, alias = "coordinate")]
    pub bbox: Option<RawBox>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default, alias = "vlm_description")]
    pub description: Option<String>,
}

/// One region from the model, in either observed shape.
///
/// `Nested` is tried first because it requires an `attributes` object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RegionPayload {
    Nested(NestedRegion),
    Flat(FlatRegion),
}

/// Why a decoded region did not become a block.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionRejection {
    MissingBox,
    WrongArity(usize),
    NonFinite,
}

impl fmt::Display for RegionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionRejection::MissingBox => f.write_str("no bounding box"),
            RegionRejection::WrongArity(n) => write!(f, "bounding box has {n} coordinates, expected 4"),
            RegionRejection::NonFinite => f.write_str("bounding box has non-finite coordinates"),
        }
    }
}

impl RawBox {
    fn corners(&self) -> Result<[f64; 4], RegionRejection> {
        match self {
            RawBox::List(v) => <[f64; 4]>::try_from(v.as_slice()).map_err(|_| RegionRejection::WrongArity(v.len())),
            RawBox::Corners { x1, y1, x2, y2 } => Ok([*x1, *y1, *x2, *y2]),
        }
    }

    /// Map from the 0–1000 scale onto a `width` x `height` page.
    pub fn descale(&self, width: u32, height: u32) -> Result<BoundingBox, RegionRejection> {
        let [xmin, ymin, xmax, ymax] = self.corners()?;
        let (w, h) = (width as f64, height as f64);
        BoundingBox::from_corners(
            (xmin / BBOX_SCALE) * w,
            (ymin / BBOX_SCALE) * h,
            (xmax / BBOX_SCALE) * w,
            (ymax / BBOX_SCALE) * h,
        )
        .ok_or(RegionRejection::NonFinite)
    }
}

fn insert_non_empty(attrs: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        attrs.insert(key.to_string(), v);
    }
}

impl RegionPayload {
    /// Canonicalise into a [`Block`] on a `width` x `height` page.
    pub fn into_block(self, width: u32, height: u32) -> Result<Block, RegionRejection> {
        let (kind, bbox, text, html, description) = match self {
            RegionPayload::Nested(n) => (
                n.label,
                n.bbox,
                n.attributes.text,
                n.attributes.html,
                n.attributes.vlm_description,
            ),
            RegionPayload::Flat(f) => (f.kind, f.bbox, f.text, f.html, f.description),
        };
        let bounding_box = bbox.ok_or(RegionRejection::MissingBox)?.descale(width, height)?;

        let mut attributes = BTreeMap::new();
        insert_non_empty(&mut attributes, ATTR_HTML, html);
        insert_non_empty(&mut attributes, ATTR_DESCRIPTION, description);

        Ok(Block {
            kind: BlockKind::from(kind.as_deref().unwrap_or_default()),
            text: text.unwrap_or_default(),
            bounding_box: Some(bounding_box),
            confidence: REGION_CONFIDENCE,
            attributes,
        })
    }
}

/// Locate and parse the JSON array in a model reply.
pub fn extract_json_array(raw: &str) -> Result<Vec<Value>, String> {
    let first_err = match RE_ARRAY_SPAN.find(raw) {
        Some(span) => match serde_json::from_str::<Vec<Value>>(span.as_str()) {
            Ok(items) => return Ok(items),
            Err(e) => e.to_string(),
        },
        None => "no bracketed span".to_string(),
    };

    let stripped = RE_FENCE.replace_all(raw, "");
    serde_json::from_str::<Vec<Value>>(stripped.trim())
        .map_err(|e| format!("bracket span: {first_err}; fence-stripped: {e}"))
}

/// Turn a raw reply for page `page` (`width` x `height` px) into blocks in
/// detection order.
pub fn parse_regions(raw: &str, page: usize, width: u32, height: u32) -> Result<Vec<Block>, PageError> {
    if raw.trim().is_empty() {
        return Err(PageError::EmptyResponse { page });
    }
    let items = extract_json_array(raw).map_err(|detail| PageError::UnparseableResponse { page, detail })?;

    let total = items.len();
    let mut blocks = Vec::with_capacity(total);
    for (idx, item) in items.into_iter().enumerate() {
        let payload = match serde_json::from_value::<RegionPayload>(item) {
            Ok(p) => p,
            Err(e) => {
                debug!("Page {}: skipping malformed region {}: {}", page, idx, e);
                continue;
            }
        };
        match payload.into_block(width, height) {
            Ok(block) => blocks.push(block),
            Err(reason) => debug!("Page {}: rejecting region {}: {}", page, idx, reason),
        }
    }
    if blocks.len() < total {
        warn!("Page {}: kept {}/{} regions", page, blocks.len(), total);
    }
    Ok(blocks)
}

/// Analyses single pages through a [`VisionClient`] under a time bound.
pub struct PageAnalyzer {
    client: Arc<dyn VisionClient>,
    timeout: Duration,
}

impl PageAnalyzer {
    pub fn new(client: Arc<dyn VisionClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Analyse one encoded page. Blocks come back in detection order.
    pub async fn analyze(&self, page: &EncodedPage) -> Result<Vec<Block>, PageError> {
        let raw = tokio::time::timeout(self.timeout, self.client.extract_regions(page))
            .await
            .map_err(|_| PageError::Timeout {
                page: page.page_number,
                secs: self.timeout.as_secs(),
            })??;
        parse_regions(&raw, page.page_number, page.width, page.height)
    }
}
