//! Decision-tree blob encoding.
//!
//! The tree kernel walks fixed-size 20-byte node records. A node with
//! `feature < 0` is a leaf; interior nodes compare `input[feature]` against
//! a Q16 threshold and jump to `left` or `right`. Trees are laid out back to
//! back at a fixed stride so the guest can index tree `t` at `t * stride`.

use serde_json::Value;

use crate::quant::Q16;
use crate::CodecError;

/// Encoded size of one node record.
pub const NODE_BYTES: usize = 20;

/// One decoded tree node, thresholds and values still in float form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeNode {
    pub feature: i32,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
}

impl TreeNode {
    /// A leaf holding value zero. Placeholder blobs are tiled with this so
    /// the kernel terminates instead of chasing uninitialized children.
    pub fn leaf_sentinel() -> Self {
        TreeNode {
            feature: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value: 0.0,
        }
    }

    fn from_json(node: &Value) -> Result<Self, CodecError> {
        let Some(obj) = node.as_object() else {
            return Err(CodecError::input("node must be an object"));
        };
        let int = |key: &str, default: i64| -> i64 {
            obj.get(key).and_then(Value::as_i64).unwrap_or(default)
        };
        let num = |key: &str| -> f64 { obj.get(key).and_then(Value::as_f64).unwrap_or(0.0) };
        Ok(TreeNode {
            feature: int("feature", -1) as i32,
            threshold: num("threshold"),
            left: int("left", -1) as i32,
            right: int("right", -1) as i32,
            value: num("value"),
        })
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let threshold_q16 = (self.threshold * Q16 as f64)
            .round_ties_even()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        let value_q16 = (self.value * Q16 as f64)
            .round_ties_even()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        for field in [self.feature, threshold_q16, self.left, self.right, value_q16] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
    }
}

/// Parse the tree list out of a tensor map: `trees` (list of trees) or
/// `nodes` (a single tree).
pub fn parse_trees(data: &serde_json::Map<String, Value>) -> Result<Vec<Vec<TreeNode>>, CodecError> {
    let trees: Vec<&Value> = match data.get("trees") {
        Some(Value::Array(trees)) if !trees.is_empty() => trees.iter().collect(),
        Some(_) => return Err(CodecError::input("trees must be a non-empty list")),
        None => match data.get("nodes") {
            Some(nodes) => vec![nodes],
            None => return Err(CodecError::input("tree input requires 'nodes' or 'trees'")),
        },
    };
    trees
        .into_iter()
        .map(|tree| {
            let Some(nodes) = tree.as_array() else {
                return Err(CodecError::input("each tree must be a list of nodes"));
            };
            nodes.iter().map(TreeNode::from_json).collect()
        })
        .collect()
}

/// Encode trees into the packed node blob.
///
/// Each tree occupies exactly `tree_stride` bytes (default
/// `node_count * 20`); the gap past the node records is zero padding, which
/// the on-chain verifier also requires.
pub fn encode_trees(
    trees: &[Vec<TreeNode>],
    node_count: usize,
    tree_stride: Option<usize>,
) -> Result<Vec<u8>, CodecError> {
    let node_bytes = node_count * NODE_BYTES;
    let tree_stride = tree_stride.unwrap_or(node_bytes);
    if tree_stride == 0 {
        return Err(CodecError::input("tree_stride must be a positive integer when provided"));
    }
    if tree_stride < node_bytes {
        return Err(CodecError::input("tree_stride must be >= node_count * 20"));
    }
    if tree_stride % 4 != 0 {
        return Err(CodecError::input("tree_stride must be 4-byte aligned"));
    }

    let mut buf = Vec::with_capacity(trees.len() * tree_stride);
    for tree in trees {
        if tree.len() != node_count {
            return Err(CodecError::input("tree node count mismatch"));
        }
        for node in tree {
            node.encode_into(&mut buf);
        }
        buf.resize(buf.len() + (tree_stride - node_bytes), 0);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(feature: i32, threshold: f64, left: i32, right: i32, value: f64) -> TreeNode {
        TreeNode { feature, threshold, left, right, value }
    }

    #[test]
    fn test_node_encoding() {
        let tree = vec![node(2, 1.5, 1, 2, 0.0), node(-1, 0.0, -1, -1, 0.25)];
        let blob = encode_trees(&[tree], 2, None).unwrap();
        assert_eq!(blob.len(), 40);
        assert_eq!(&blob[0..4], &2i32.to_le_bytes());
        assert_eq!(&blob[4..8], &98304i32.to_le_bytes()); // 1.5 * 65536
        assert_eq!(&blob[8..12], &1i32.to_le_bytes());
        assert_eq!(&blob[12..16], &2i32.to_le_bytes());
        assert_eq!(&blob[20..24], &(-1i32).to_le_bytes());
        assert_eq!(&blob[36..40], &16384i32.to_le_bytes()); // 0.25 * 65536
    }

    #[test]
    fn test_stride_padding_is_zero() {
        let tree = vec![node(-1, 0.0, -1, -1, 1.0)];
        let blob = encode_trees(&[tree.clone(), tree], 1, Some(32)).unwrap();
        assert_eq!(blob.len(), 64);
        assert!(blob[20..32].iter().all(|&b| b == 0));
        assert_eq!(&blob[32..36], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_stride_constraints() {
        let tree = vec![node(-1, 0.0, -1, -1, 0.0); 2];
        assert!(encode_trees(&[tree.clone()], 2, Some(20)).is_err()); // < node bytes
        assert!(encode_trees(&[tree.clone()], 2, Some(42)).is_err()); // unaligned
        assert!(encode_trees(&[tree.clone()], 3, None).is_err()); // count mismatch
        assert!(encode_trees(&[tree], 2, Some(40)).is_ok());
    }

    #[test]
    fn test_parse_trees_single_nodes_key() {
        let data = serde_json::from_value(json!({
            "nodes": [
                {"feature": 0, "threshold": 2.0, "left": 1, "right": 2},
                {"value": 1.0},
                {"value": -1.0}
            ]
        }))
        .unwrap();
        let trees = parse_trees(&data).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].len(), 3);
        // defaults fill absent fields
        assert_eq!(trees[0][1].feature, -1);
        assert_eq!(trees[0][1].left, -1);
    }

    #[test]
    fn test_parse_trees_requires_input() {
        let data = serde_json::from_value(json!({"w": [1.0]})).unwrap();
        let err = parse_trees(&data).unwrap_err();
        assert!(err.to_string().contains("'nodes' or 'trees'"));
    }
}
