//! Instructions sent to the vision model with every page.
//!
//! The response contract the page analyser relies on lives here: a JSON
//! array of `{type, bbox, text}` objects with boxes on a 0–1000 scale. The
//! analyser tolerates stray prose and code fences around the array, but the
//! prompt still asks for neither.

/// Scale of the `bbox` coordinates the model is asked to emit.
pub const BBOX_SCALE: f64 = 1000.0;

/// Region-extraction instruction for one page image.
pub const REGION_EXTRACTION_PROMPT: &str = r#"Analyze the document image, including complex layouts such as DIAGRAMS, CHARTS and FLOWCHARTS.
Identify ALL layout elements (title, text, header, footer, table, image, diagram).

Perform OCR on ALL text content, including text inside charts, diagrams and shapes.

Return a JSON list of objects. Each object must have:
- "type": one of [title, text, header, footer, table, image, diagram]
- "bbox": [xmin, ymin, xmax, ymax] on a 0-1000 scale relative to the image size
- "text": the extracted text content. For a diagram, the labels inside it.
Optional fields:
- "html": for a table, the table rendered as HTML
- "description": for an image or diagram, one sentence describing it

Example:
[
  {"type": "title", "bbox": [10, 10, 500, 50], "text": "System Architecture"},
  {"type": "diagram", "bbox": [10, 100, 900, 900], "text": "Input Node -> Parser", "description": "Flowchart of the parser."},
  {"type": "text", "bbox": [50, 920, 950, 990], "text": "Figure 1."}
]

Return ONLY the JSON list. Do not wrap it in ```json fences and do not add commentary."#;
