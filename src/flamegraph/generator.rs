//! SVG rendering of a built flamegraph.
//!
//! Hand-written SVG output:
//! - Frame width proportional to call duration
//! - Root at the bottom, callees stacked above their callers
//! - Warm palette keyed by frame name, so a callsite keeps its color

use super::builder::FlameFrame;
use crate::utils::error::FlamegraphError;
use log::info;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: usize,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Callstack Flamegraph".to_string(),
            width: 1200,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
}

const HEIGHT_PER_LEVEL: usize = 20;
const TITLE_MARGIN: usize = 30;
const LEGEND_HEIGHT: usize = 80;

/// Generate an SVG flamegraph from a built tree
///
/// **Public** - main entry point for SVG rendering
///
/// # Arguments
/// * `root` - Root frame returned by the builder
/// * `config` - Optional title and width (defaults when `None`)
///
/// # Errors
/// * `FlamegraphError::EmptyGraph` - the root has no children
pub fn generate_flamegraph(
    root: &FlameFrame,
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    if root.children.is_empty() {
        return Err(FlamegraphError::EmptyGraph);
    }

    let config = config.cloned().unwrap_or_default();
    let frame_count = root.descendant_count();
    info!("Rendering flamegraph with {} frames", frame_count);

    // The root carries no duration of its own; it spans its children.
    let total: u64 = root
        .children
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.value));

    let width = config.width;
    let graph_height = (root.depth() + 1) * HEIGHT_PER_LEVEL;
    let total_height = graph_height + LEGEND_HEIGHT;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
        width, total_height, width, total_height
    ));
    svg.push_str(
        r#"<style>.func { font: 12px sans-serif; } .func:hover { stroke: black; stroke-width: 1; cursor: pointer; opacity: 0.9; }</style>"#,
    );
    svg.push_str(&format!(
        r#"<text x="{}" y="20" font-size="16" text-anchor="middle" font-weight="bold">{}</text>"#,
        width / 2,
        escape_xml(&config.title)
    ));

    let frame = Frame {
        level: 0,
        x: 0.0,
        w: width as f64,
        graph_height,
    };
    render_root(root, total, &frame, &mut svg);
    render_legend(&mut svg, graph_height, total, frame_count);

    svg.push_str("</svg>");

    info!("Flamegraph rendered ({} bytes)", svg.len());
    Ok(svg)
}

/// Placement of one frame in the drawing
struct Frame {
    level: usize,
    x: f64,
    w: f64,
    graph_height: usize,
}

impl Frame {
    fn y(&self) -> usize {
        self.graph_height - (self.level + 1) * HEIGHT_PER_LEVEL + TITLE_MARGIN
    }

    fn child(&self, x: f64, w: f64) -> Frame {
        Frame {
            level: self.level + 1,
            x,
            w,
            graph_height: self.graph_height,
        }
    }
}

fn render_root(root: &FlameFrame, total: u64, frame: &Frame, out: &mut String) {
    draw_rect(
        out,
        frame,
        "rgb(100, 149, 237)",
        &format!("{} ({} ns)", root.name, total),
        &root.name,
    );

    let mut pending = Vec::new();
    push_children(root, total, frame, &mut pending);
    while let Some((node, frame)) = pending.pop() {
        if frame.w < 0.5 {
            continue;
        }
        let tooltip = format!(
            "{} ({} ns total, {} ns self)",
            node.name, node.value, node.self_value
        );
        draw_rect(out, &frame, &node_color(&node.name), &tooltip, &node.name);
        push_children(node, node.value, &frame, &mut pending);
    }
}

/// Lay children out left to right in start-time order
///
/// Placements are pushed in reverse so the leftmost child is drawn first.
fn push_children<'a>(
    node: &'a FlameFrame,
    span: u64,
    frame: &Frame,
    pending: &mut Vec<(&'a FlameFrame, Frame)>,
) {
    if span == 0 {
        return;
    }
    let mut current_x = frame.x;
    let mut placed = Vec::with_capacity(node.children.len());
    for child in &node.children {
        // Overlapping children are clipped to the parent's width.
        let share = (child.value as f64 / span as f64).min(1.0);
        let child_w = (share * frame.w).min(frame.x + frame.w - current_x).max(0.0);
        placed.push((child, frame.child(current_x, child_w)));
        current_x += child_w;
    }
    pending.extend(placed.into_iter().rev());
}

fn draw_rect(out: &mut String, frame: &Frame, color: &str, tooltip: &str, name: &str) {
    let y = frame.y();
    out.push_str(&format!(
        r#"<rect x="{:.2}" y="{}" width="{:.2}" height="{}" fill="{}" class="func"><title>{}</title></rect>"#,
        frame.x,
        y,
        frame.w,
        HEIGHT_PER_LEVEL,
        color,
        escape_xml(tooltip)
    ));

    if frame.w > 35.0 {
        let char_width = 7.0;
        let max_chars = (frame.w / char_width) as usize;
        let display_name = if name.chars().count() > max_chars && max_chars > 3 {
            let head: String = name.chars().take(max_chars - 3).collect();
            format!("{}...", head)
        } else {
            name.to_string()
        };

        if !display_name.is_empty() {
            out.push_str(&format!(
                r#"<text x="{:.2}" y="{}" dx="4" dy="14" font-size="12" fill="black" pointer-events="none">{}</text>"#,
                frame.x,
                y,
                escape_xml(&display_name)
            ));
        }
    }
}

/// Warm color derived from a hash of the frame name
fn node_color(name: &str) -> String {
    // FNV-1a
    let hash = name
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    let r = 205 + (hash % 50);
    let g = (hash >> 8) % 230;
    let b = (hash >> 16) % 55;
    format!("rgb({}, {}, {})", r, g, b)
}

fn render_legend(out: &mut String, graph_height: usize, total: u64, frame_count: usize) {
    let legend_y = graph_height + 50;

    out.push_str(&format!(
        r#"<text x="10" y="{}" font-size="14" font-weight="bold">Legend:</text>"#,
        legend_y
    ));
    out.push_str(&format!(
        r#"<text x="80" y="{}" font-size="12">Width = call duration | {} calls | {} ns at top level</text>"#,
        legend_y, frame_count, total
    ));
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::CallRecord;
    use crate::flamegraph::builder::build;
    use crate::parser::Value;

    fn record(name: &str, start: u64, end: u64) -> CallRecord {
        CallRecord {
            entry_name: name.to_string(),
            exit_name: name.to_string(),
            track: Value::UInt(0),
            label: Value::Null,
            start_ts: start,
            end_ts: end,
            duration: end - start,
        }
    }

    #[test]
    fn test_generate_flamegraph() {
        let graph = build(&[record("inner", 10, 20), record("outer", 0, 100)]);
        let config = FlamegraphConfig::new().with_title("Test <Trace>").with_width(800);
        let svg = generate_flamegraph(&graph.root, Some(&config)).unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains(r#"width="800""#));
        assert!(svg.contains("Test &lt;Trace&gt;"));
        assert!(svg.contains("outer (100 ns total, 90 ns self)"));
        assert!(svg.contains("inner"));
    }

    #[test]
    fn test_empty_graph_is_error() {
        let graph = build(&[]);
        let result = generate_flamegraph(&graph.root, None);
        assert!(matches!(result, Err(FlamegraphError::EmptyGraph)));
    }

    #[test]
    fn test_deep_graph_renders() {
        let n = 100_000u64;
        let records: Vec<CallRecord> = (0..n).map(|i| record("deep", i, 2 * n - i)).collect();
        let graph = build(&records);

        let svg = generate_flamegraph(&graph.root, None).unwrap();
        assert!(svg.ends_with("</svg>"));
        // Wide outer levels are drawn, the sliver at the bottom is culled.
        assert!(svg.contains("deep (200000 ns total, 2 ns self)"));
        assert!(!svg.contains("deep (2 ns total, 2 ns self)"));
    }

    #[test]
    fn test_node_color_is_stable() {
        assert_eq!(node_color("func"), node_color("func"));
        assert!(node_color("func").starts_with("rgb("));
    }

    #[test]
    fn test_config_builder() {
        let config = FlamegraphConfig::new().with_title("Custom").with_width(640);
        assert_eq!(config.title, "Custom");
        assert_eq!(config.width, 640);
    }
}
