//! Span tree construction for the single-trace read path.
//!
//! Takes the flat span set of one trace and produces ordered roots with
//! nested children, synthetic tool-use nodes, display sub-types, and
//! per-node descendant rollups. Synthetic nodes are derived purely here and
//! never persisted.

use lens_core::{Span, SpanStatus, SpanSubType, SpanType};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A span plus its ordered children, as rendered by the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: Span,
    /// True for synthetic children derived from an LLM span's tool-use
    /// blocks.
    pub is_tool_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollup: Option<NodeRollup>,
    pub children: Vec<SpanNode>,
}

/// Descendant sums for LLM and parent nodes. A node is never its own
/// descendant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRollup {
    pub descendant_tokens: u64,
    pub descendant_cost_usd: f64,
    pub llm_descendants: u64,
    pub tool_descendants: u64,
}

/// Build the tree for one trace's span set.
///
/// Spans sort by (started_at, id); a span whose parent does not resolve
/// within the trace becomes a root and the dangling reference is logged,
/// never dropped.
pub fn build_tree(spans: &[Span]) -> Vec<SpanNode> {
    let mut sorted: Vec<&Span> = spans.iter().collect();
    sorted.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let known_ids: HashSet<&str> = sorted.iter().map(|s| s.id.as_str()).collect();

    // Children adjacency in sorted order; roots keep their sorted position.
    let mut children_of: HashMap<&str, Vec<&Span>> = HashMap::new();
    let mut roots: Vec<&Span> = Vec::new();
    for &span in &sorted {
        match span.parent_span_id.as_deref() {
            Some(parent) if known_ids.contains(parent) => {
                children_of.entry(parent).or_default().push(span);
            }
            Some(parent) => {
                warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.id,
                    parent_span_id = %parent,
                    "dangling parent reference, treating span as root"
                );
                roots.push(span);
            }
            None => roots.push(span),
        }
    }

    roots
        .into_iter()
        .map(|span| build_node(span, &children_of))
        .collect()
}

fn build_node(span: &Span, children_of: &HashMap<&str, Vec<&Span>>) -> SpanNode {
    let mut children: Vec<SpanNode> = children_of
        .get(span.id.as_str())
        .into_iter()
        .flatten()
        .map(|&child| build_node(child, children_of))
        .collect();

    // Tool-use blocks become synthetic child nodes, appended after the real
    // children in declared order.
    for (index, tool_use) in span.tool_uses.iter().enumerate() {
        children.push(synthetic_tool_node(span, index, tool_use));
    }

    let mut node = SpanNode {
        span: span.clone(),
        is_tool_use: false,
        rollup: None,
        children,
    };

    // Re-derive the display sub-type when the stored span has none.
    if node.span.span_type == SpanType::Llm && node.span.sub_type.is_none() {
        node.span.sub_type = if !node.span.tool_uses.is_empty() {
            Some(SpanSubType::Planning)
        } else if node.span.output.is_some() {
            Some(SpanSubType::Response)
        } else {
            None
        };
    }

    if node.span.span_type == SpanType::Llm || !node.children.is_empty() {
        node.rollup = Some(compute_rollup(&node));
    }
    node
}

fn synthetic_tool_node(parent: &Span, index: usize, tool_use: &lens_core::ToolUse) -> SpanNode {
    let id = if tool_use.id.is_empty() {
        format!("{}:tool:{}", parent.id, index)
    } else {
        tool_use.id.clone()
    };
    SpanNode {
        span: Span {
            id,
            trace_id: parent.trace_id.clone(),
            parent_span_id: Some(parent.id.clone()),
            span_type: SpanType::Tool,
            name: tool_use.name.clone(),
            input: Some(tool_use.input.clone()),
            output: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            cost_usd: None,
            duration_ms: None,
            first_token_ms: None,
            status: SpanStatus::Success,
            stop_reason: None,
            error_message: None,
            model: None,
            provider: None,
            thinking: None,
            tool_uses: vec![],
            sub_type: None,
            metadata: serde_json::Map::new(),
            started_at: parent.started_at,
            ended_at: None,
        },
        is_tool_use: true,
        rollup: None,
        children: Vec::new(),
    }
}

/// Sum over strict descendants (synthetic nodes included in the tool
/// count, contributing no tokens or cost).
fn compute_rollup(node: &SpanNode) -> NodeRollup {
    let mut rollup = NodeRollup::default();
    for child in &node.children {
        accumulate(child, &mut rollup);
    }
    rollup
}

fn accumulate(node: &SpanNode, rollup: &mut NodeRollup) {
    rollup.descendant_tokens += node.span.total_tokens();
    rollup.descendant_cost_usd += node.span.cost_usd.unwrap_or(0.0);
    match node.span.span_type {
        SpanType::Llm => rollup.llm_descendants += 1,
        SpanType::Tool => rollup.tool_descendants += 1,
        _ => {}
    }
    for child in &node.children {
        accumulate(child, rollup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lens_core::ToolUse;
    use serde_json::json;

    fn span(id: &str, parent: Option<&str>, span_type: SpanType, offset_ms: i64) -> Span {
        Span {
            id: id.into(),
            trace_id: "T".into(),
            parent_span_id: parent.map(Into::into),
            span_type,
            name: id.into(),
            input: None,
            output: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            reasoning_tokens: None,
            cost_usd: None,
            duration_ms: None,
            first_token_ms: None,
            status: SpanStatus::Success,
            stop_reason: None,
            error_message: None,
            model: None,
            provider: None,
            thinking: None,
            tool_uses: vec![],
            sub_type: None,
            metadata: serde_json::Map::new(),
            started_at: Utc::now() + Duration::milliseconds(offset_ms),
            ended_at: None,
        }
    }

    #[test]
    fn builds_nested_hierarchy() {
        let spans = vec![
            span("A", None, SpanType::Agent, 0),
            span("L", Some("A"), SpanType::Llm, 10),
            span("T", Some("L"), SpanType::Tool, 20),
        ];
        let tree = build_tree(&spans);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].span.id, "A");
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].span.id, "L");
        assert_eq!(tree[0].children[0].children[0].span.id, "T");
    }

    #[test]
    fn siblings_order_by_start_then_id() {
        let mut b = span("b", None, SpanType::Llm, 0);
        let a = span("a", None, SpanType::Llm, 0);
        b.started_at = a.started_at;
        let tree = build_tree(&[b, a]);
        assert_eq!(tree[0].span.id, "a");
        assert_eq!(tree[1].span.id, "b");
    }

    #[test]
    fn dangling_parent_becomes_root_not_dropped() {
        let spans = vec![
            span("A", None, SpanType::Agent, 0),
            span("X", Some("ghost"), SpanType::Llm, 10),
        ];
        let tree = build_tree(&spans);
        assert_eq!(tree.len(), 2);
        assert!(tree.iter().any(|n| n.span.id == "X"));
    }

    #[test]
    fn synthesizes_tool_use_children_last_in_declared_order() {
        let mut llm = span("L", None, SpanType::Llm, 0);
        llm.tool_uses = vec![
            ToolUse {
                id: "toolu_1".into(),
                name: "search_products".into(),
                input: json!({"q": "desk"}),
            },
            ToolUse {
                id: String::new(),
                name: "fetch_page".into(),
                input: json!({}),
            },
        ];
        let real_child = span("C", Some("L"), SpanType::Tool, 5);

        let tree = build_tree(&[llm, real_child]);
        let children = &tree[0].children;
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].span.id, "C");
        assert!(!children[0].is_tool_use);
        assert_eq!(children[1].span.id, "toolu_1");
        assert!(children[1].is_tool_use);
        assert_eq!(children[1].span.name, "search_products");
        // Missing tool ids get a stable synthesized one.
        assert_eq!(children[2].span.id, "L:tool:1");
    }

    #[test]
    fn rederives_sub_type_for_llm_spans() {
        let mut planning = span("P", None, SpanType::Llm, 0);
        planning.tool_uses = vec![ToolUse {
            id: "t".into(),
            name: "f".into(),
            input: json!({}),
        }];
        let mut response = span("R", None, SpanType::Llm, 1);
        response.output = Some(json!("answer"));

        let tree = build_tree(&[planning, response]);
        assert_eq!(tree[0].span.sub_type, Some(SpanSubType::Planning));
        assert_eq!(tree[1].span.sub_type, Some(SpanSubType::Response));
    }

    #[test]
    fn rollup_excludes_self_and_counts_descendants() {
        let mut root = span("A", None, SpanType::Agent, 0);
        root.input_tokens = Some(7777);
        let mut llm = span("L", Some("A"), SpanType::Llm, 10);
        llm.input_tokens = Some(100);
        llm.output_tokens = Some(50);
        llm.cost_usd = Some(0.01);
        let tool = span("T", Some("L"), SpanType::Tool, 20);

        let tree = build_tree(&[root, llm, tool]);
        let rollup = tree[0].rollup.unwrap();
        // Root's own tokens are not its own descendant.
        assert_eq!(rollup.descendant_tokens, 150);
        assert_eq!(rollup.llm_descendants, 1);
        assert_eq!(rollup.tool_descendants, 1);
        assert!((rollup.descendant_cost_usd - 0.01).abs() < 1e-12);

        let llm_rollup = tree[0].children[0].rollup.unwrap();
        assert_eq!(llm_rollup.descendant_tokens, 0);
        assert_eq!(llm_rollup.tool_descendants, 1);
    }

    #[test]
    fn leaf_non_llm_nodes_carry_no_rollup() {
        let tree = build_tree(&[span("T", None, SpanType::Tool, 0)]);
        assert!(tree[0].rollup.is_none());
    }

    #[test]
    fn node_serializes_flat_with_children() {
        let tree = build_tree(&[span("A", None, SpanType::Llm, 0)]);
        let json = serde_json::to_value(&tree[0]).unwrap();
        assert_eq!(json["id"], "A");
        assert_eq!(json["isToolUse"], false);
        assert!(json["children"].as_array().unwrap().is_empty());
    }
}
