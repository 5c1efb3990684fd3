//! Model templates and layout-string inference.

use std::fmt;
use std::str::FromStr;

/// The guest kernel families `convert` can emit weights for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Template {
    Linear,
    Softmax,
    NaiveBayes,
    Mlp,
    Mlp2,
    Mlp3,
    Cnn1d,
    TinyCnn,
    TwoTower,
    Tree,
}

impl Template {
    pub fn as_str(self) -> &'static str {
        match self {
            Template::Linear => "linear",
            Template::Softmax => "softmax",
            Template::NaiveBayes => "naive_bayes",
            Template::Mlp => "mlp",
            Template::Mlp2 => "mlp2",
            Template::Mlp3 => "mlp3",
            Template::Cnn1d => "cnn1d",
            Template::TinyCnn => "tiny_cnn",
            Template::TwoTower => "two_tower",
            Template::Tree => "tree",
        }
    }

    pub fn all() -> [Template; 10] {
        [
            Template::Linear,
            Template::Softmax,
            Template::NaiveBayes,
            Template::Mlp,
            Template::Mlp2,
            Template::Mlp3,
            Template::Cnn1d,
            Template::TinyCnn,
            Template::TwoTower,
            Template::Tree,
        ]
    }
}

impl FromStr for Template {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Template::Linear),
            "softmax" => Ok(Template::Softmax),
            "naive_bayes" => Ok(Template::NaiveBayes),
            "mlp" => Ok(Template::Mlp),
            "mlp2" => Ok(Template::Mlp2),
            "mlp3" => Ok(Template::Mlp3),
            "cnn1d" => Ok(Template::Cnn1d),
            "tiny_cnn" => Ok(Template::TinyCnn),
            "two_tower" => Ok(Template::TwoTower),
            "tree" => Ok(Template::Tree),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the template from a `weights.layout` string.
///
/// Substring matching, most specific first: `mlp3` must win over `mlp`,
/// `cnn1d` over `linear` (a layout like `cnn1d_linear_q8` names both).
pub fn infer_template(layout: Option<&str>) -> Option<Template> {
    let layout = layout?.to_lowercase();
    if layout.is_empty() {
        return None;
    }
    if layout.contains("cnn1d") || layout.contains("conv1d") {
        return Some(Template::Cnn1d);
    }
    if layout.contains("tiny_cnn") || layout.contains("cnn2d") || layout.contains("tinycnn") {
        return Some(Template::TinyCnn);
    }
    if layout.contains("mlp3") {
        return Some(Template::Mlp3);
    }
    if layout.contains("mlp2") {
        return Some(Template::Mlp2);
    }
    if layout.contains("softmax") || layout.contains("logreg") || layout.contains("logistic") {
        return Some(Template::Softmax);
    }
    if layout.contains("naive") || layout.contains("bayes") {
        return Some(Template::NaiveBayes);
    }
    if layout.contains("two_tower") || layout.contains("twotower") || layout.contains("two-tower") {
        return Some(Template::TwoTower);
    }
    if layout.contains("tree") || layout.contains("gbdt") {
        return Some(Template::Tree);
    }
    if layout.contains("linear") {
        return Some(Template::Linear);
    }
    if layout.contains("mlp") {
        return Some(Template::Mlp);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_layouts_win() {
        assert_eq!(infer_template(Some("mlp3_q8")), Some(Template::Mlp3));
        assert_eq!(infer_template(Some("mlp2_q8")), Some(Template::Mlp2));
        assert_eq!(infer_template(Some("mlp_q8")), Some(Template::Mlp));
        assert_eq!(infer_template(Some("cnn1d_linear_q8")), Some(Template::Cnn1d));
        assert_eq!(infer_template(Some("linear_q8")), Some(Template::Linear));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(infer_template(Some("logreg_q8")), Some(Template::Softmax));
        assert_eq!(infer_template(Some("naive_bayes_q8")), Some(Template::NaiveBayes));
        assert_eq!(infer_template(Some("twotower_v1")), Some(Template::TwoTower));
        assert_eq!(infer_template(Some("gbdt_i32")), Some(Template::Tree));
        assert_eq!(infer_template(Some("tree_gbdt_v1")), Some(Template::Tree));
        assert_eq!(infer_template(Some("CNN2D_Q8")), Some(Template::TinyCnn));
    }

    #[test]
    fn test_unknown_layout() {
        assert_eq!(infer_template(Some("transformer_v9")), None);
        assert_eq!(infer_template(Some("")), None);
        assert_eq!(infer_template(None), None);
    }
}
