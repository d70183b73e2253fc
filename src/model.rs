//! Result types: blocks, pages and the assembled document.
//!
//! Everything here is a plain serialisable value. Blocks and boxes are
//! created once by the page analyser and never mutated afterwards; the
//! orchestrator is the only code that assembles [`Page`] and [`Document`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Attribute key for rendered table markup.
pub const ATTR_HTML: &str = "html";
/// Attribute key for a natural-language description of the region. Flat
/// replies send it as `description`; it is always stored under this key.
pub const ATTR_DESCRIPTION: &str = "vlm_description";

/// Axis-aligned rectangle in page-pixel space.
///
/// Fields are private so the `x1 ≤ x2`, `y1 ≤ y2` invariant holds for every
/// value in existence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl BoundingBox {
    /// Build a box from two opposite corners, ordering each axis.
    ///
    /// Returns `None` if any coordinate is NaN or infinite.
    pub fn from_corners(xa: f64, ya: f64, xb: f64, yb: f64) -> Option<Self> {
        if ![xa, ya, xb, yb].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            x1: xa.min(xb),
            y1: ya.min(yb),
            x2: xa.max(xb),
            y2: ya.max(yb),
        })
    }

    pub fn x1(&self) -> f64 {
        self.x1
    }

    pub fn y1(&self) -> f64 {
        self.y1
    }

    pub fn x2(&self) -> f64 {
        self.x2
    }

    pub fn y2(&self) -> f64 {
        self.y2
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// Region type tag reported by the vision model.
///
/// The set is open: anything the model invents that is not one of the
/// well-known tags is kept verbatim in [`BlockKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockKind {
    Title,
    Text,
    Header,
    Footer,
    Table,
    Image,
    Diagram,
    Other(String),
}

impl BlockKind {
    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::Title => "title",
            BlockKind::Text => "text",
            BlockKind::Header => "header",
            BlockKind::Footer => "footer",
            BlockKind::Table => "table",
            BlockKind::Image => "image",
            BlockKind::Diagram => "diagram",
            BlockKind::Other(s) => s,
        }
    }
}

impl From<&str> for BlockKind {
    fn from(s: &str) -> Self {
        let tag = s.trim().to_lowercase();
        match tag.as_str() {
            "title" => BlockKind::Title,
            "text" | "paragraph" => BlockKind::Text,
            "header" => BlockKind::Header,
            "footer" => BlockKind::Footer,
            "table" => BlockKind::Table,
            "image" | "figure" => BlockKind::Image,
            "diagram" | "chart" | "flowchart" => BlockKind::Diagram,
            "" => BlockKind::Text,
            _ => BlockKind::Other(tag),
        }
    }
}

impl From<String> for BlockKind {
    fn from(s: String) -> Self {
        BlockKind::from(s.as_str())
    }
}

impl From<BlockKind> for String {
    fn from(k: BlockKind) -> Self {
        k.as_str().to_string()
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected content region on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub text: String,
    /// Absent boxes sort first, as if anchored at `(0, 0)`.
    pub bounding_box: Option<BoundingBox>,
    /// In `[0, 1]`. Regions from the vision model always carry `1.0`.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Block {
    pub fn is_table(&self) -> bool {
        self.kind == BlockKind::Table
    }
}

/// Page size as analysed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
    pub unit: String,
}

impl Dimension {
    pub fn pixels(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            unit: "pixel".to_string(),
        }
    }
}

/// One analysed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-based, assigned when the document is split.
    pub page_number: usize,
    pub dimension: Dimension,
    /// Deskew rotation applied before analysis, in degrees. Informational.
    pub orientation: f32,
    /// Blocks in reading order.
    pub blocks: Vec<Block>,
    /// `data:image/png;base64,…` rendering of the analysed page image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Page {
    /// Block texts in reading order joined by a blank line.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Denormalised view of one block, tagged with the page it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualElement {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    pub page_number: usize,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Cell of a reconstructed table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCell {
    pub text: String,
    pub row_span: u32,
    pub col_span: u32,
    pub bounding_box: Option<BoundingBox>,
}

/// Row of a reconstructed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

/// A table detected on a page.
///
/// Row structure is left empty by this crate; only location and confidence
/// are carried over from the detecting block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    pub page_number: usize,
    pub header_rows: Vec<TableRow>,
    pub body_rows: Vec<TableRow>,
}

/// The assembled document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Page texts in page order joined by the configured page break.
    pub text: String,
    /// Strictly increasing by `page_number`.
    pub pages: Vec<Page>,
    pub visual_elements: Vec<VisualElement>,
    pub tables: Vec<Table>,
}

/// Terminal status of a job that produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
}

/// Per-job counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Pages produced by the split step.
    pub total_pages: usize,
    /// Pages that made it into the document.
    pub analyzed_pages: usize,
    /// Pages dropped because their analysis failed.
    pub failed_pages: usize,
    pub total_blocks: usize,
    pub duration_ms: u64,
}

/// What a caller receives for one submitted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub document: Document,
    pub stats: AnalysisStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_orders_swapped_corners() {
        let b = BoundingBox::from_corners(30.0, 40.0, 10.0, 5.0).unwrap();
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (10.0, 5.0, 30.0, 40.0));
        assert_eq!(b.width(), 20.0);
        assert_eq!(b.height(), 35.0);
    }

    #[test]
    fn bounding_box_rejects_non_finite() {
        assert!(BoundingBox::from_corners(f64::NAN, 0.0, 1.0, 1.0).is_none());
        assert!(BoundingBox::from_corners(0.0, 0.0, f64::INFINITY, 1.0).is_none());
    }

    #[test]
    fn block_kind_parses_known_and_unknown_tags() {
        assert_eq!(BlockKind::from("Title"), BlockKind::Title);
        assert_eq!(BlockKind::from(" table "), BlockKind::Table);
        assert_eq!(BlockKind::from("figure"), BlockKind::Image);
        assert_eq!(BlockKind::from(""), BlockKind::Text);
        assert_eq!(
            BlockKind::from("Signature"),
            BlockKind::Other("signature".into())
        );
    }

    #[test]
    fn block_kind_serialises_as_plain_string() {
        let json = serde_json::to_string(&BlockKind::Diagram).unwrap();
        assert_eq!(json, "\"diagram\"");
        let back: BlockKind = serde_json::from_str("\"seal\"").unwrap();
        assert_eq!(back, BlockKind::Other("seal".into()));
    }

    #[test]
    fn page_text_joins_blocks_with_blank_line() {
        let block = |t: &str| Block {
            kind: BlockKind::Text,
            text: t.to_string(),
            bounding_box: None,
            confidence: 1.0,
            attributes: BTreeMap::new(),
        };
        let page = Page {
            page_number: 1,
            dimension: Dimension::pixels(10, 10),
            orientation: 0.0,
            blocks: vec![block("a"), block(""), block("c")],
            image: None,
        };
        assert_eq!(page.text(), "a\n\n\n\nc");
    }

    #[test]
    fn job_status_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
