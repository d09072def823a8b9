//! Random-forest classifier evaluated from a JSON export.
//!
//! The export mirrors scikit-learn's fitted `tree_` arrays:
//!
//! ```json
//! {
//!   "classes": [0, 1, 2, 3],
//!   "n_features": 1404,
//!   "trees": [{
//!     "children_left": [1, -1, -1],
//!     "children_right": [2, -1, -1],
//!     "feature": [17, -2, -2],
//!     "threshold": [0.42, -2.0, -2.0],
//!     "value": [[10, 4, 0, 1], [9, 0, 0, 1], [1, 4, 0, 0]]
//!   }]
//! }
//! ```
//!
//! Prediction averages each tree's leaf class distribution and picks the
//! first class with the highest mean probability, as scikit-learn does.

use std::{fs::File, io::BufReader, path::Path};

use serde::Deserialize;

use crate::{
    landmarks::FeatureVector,
    model::{Label, LevelClassifier, ModelError},
};

const TREE_LEAF: i64 = -1;

#[derive(Debug, Deserialize)]
struct ForestExport {
    classes: Vec<u32>,
    n_features: usize,
    trees: Vec<TreeExport>,
}

#[derive(Debug, Deserialize)]
struct TreeExport {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    value: Vec<Vec<f64>>,
}

#[derive(Debug)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        proba: Vec<f64>,
    },
}

#[derive(Debug)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf_proba(&self, features: &[f32]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if f64::from(features[*feature]) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { proba } => return proba,
            }
        }
    }
}

/// Forest of decision trees voting by averaged class probability.
#[derive(Debug)]
pub struct ForestClassifier {
    classes: Vec<Label>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl ForestClassifier {
    /// Load and validate a forest export from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let load_error = |source: anyhow::Error| ModelError::Load {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(|err| load_error(err.into()))?;
        let export: ForestExport = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| load_error(err.into()))?;
        Self::from_export(export)
    }

    /// Parse and validate a forest export held in memory.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let export: ForestExport = serde_json::from_str(json)
            .map_err(|err| ModelError::InvalidModel(format!("malformed forest export: {err}")))?;
        Self::from_export(export)
    }

    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Mean class probabilities across all trees, indexed like [`Self::classes`].
    pub fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        if features.len() != self.n_features {
            return Err(ModelError::FeatureLength {
                expected: self.n_features,
                actual: features.len(),
            });
        }
        let values = features.as_slice();
        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (total, p) in totals.iter_mut().zip(tree.leaf_proba(values)) {
                *total += p;
            }
        }
        let count = self.trees.len() as f64;
        totals.iter_mut().for_each(|total| *total /= count);
        Ok(totals)
    }

    fn from_export(export: ForestExport) -> Result<Self, ModelError> {
        if export.classes.is_empty() {
            return Err(ModelError::InvalidModel("forest has no classes".into()));
        }
        if export.trees.is_empty() {
            return Err(ModelError::InvalidModel("forest has no trees".into()));
        }
        let n_classes = export.classes.len();
        let trees = export
            .trees
            .into_iter()
            .enumerate()
            .map(|(index, tree)| build_tree(tree, export.n_features, n_classes).map_err(|msg| {
                ModelError::InvalidModel(format!("tree #{index}: {msg}"))
            }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            classes: export.classes.into_iter().map(Label).collect(),
            n_features: export.n_features,
            trees,
        })
    }
}

impl LevelClassifier for ForestClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<Label, ModelError> {
        let proba = self.predict_proba(features)?;
        let mut best = 0;
        for (index, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = index;
            }
        }
        Ok(self.classes[best])
    }
}

fn build_tree(
    tree: TreeExport,
    n_features: usize,
    n_classes: usize,
) -> Result<DecisionTree, String> {
    let len = tree.children_left.len();
    if len == 0 {
        return Err("tree has no nodes".into());
    }
    if tree.children_right.len() != len
        || tree.feature.len() != len
        || tree.threshold.len() != len
        || tree.value.len() != len
    {
        return Err("node arrays differ in length".into());
    }

    let mut nodes = Vec::with_capacity(len);
    for (index, value) in tree.value.into_iter().enumerate() {
        let left = tree.children_left[index];
        let right = tree.children_right[index];
        if left == TREE_LEAF && right == TREE_LEAF {
            if value.len() != n_classes {
                return Err(format!(
                    "leaf {index} has {} class counts, expected {n_classes}",
                    value.len()
                ));
            }
            let total: f64 = value.iter().sum();
            let proba = if total > 0.0 {
                value.iter().map(|v| v / total).collect()
            } else {
                value
            };
            nodes.push(Node::Leaf { proba });
            continue;
        }

        // Children always come after their parent, which rules out cycles.
        let child = |c: i64| -> Result<usize, String> {
            usize::try_from(c)
                .ok()
                .filter(|&c| c > index && c < len)
                .ok_or_else(|| format!("node {index} has invalid child {c}"))
        };
        let feature = usize::try_from(tree.feature[index])
            .ok()
            .filter(|&f| f < n_features)
            .ok_or_else(|| {
                format!(
                    "node {index} splits on feature {} outside 0..{n_features}",
                    tree.feature[index]
                )
            })?;
        nodes.push(Node::Split {
            feature,
            threshold: tree.threshold[index],
            left: child(left)?,
            right: child(right)?,
        });
    }

    Ok(DecisionTree { nodes })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::landmarks::{LandmarkSet, Point3};
    use approx::assert_relative_eq;
    use rstest::rstest;

    // One landmark -> three features. Tree A splits on x, tree B on z.
    const FOREST: &str = r#"{
        "classes": [0, 1, 2],
        "n_features": 3,
        "trees": [
            {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [0, -2, -2],
                "threshold": [0.5, -2.0, -2.0],
                "value": [[4, 4, 2], [4, 0, 0], [0, 4, 2]]
            },
            {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [2, -2, -2],
                "threshold": [0.0, -2.0, -2.0],
                "value": [[5, 0, 5], [0, 0, 5], [5, 0, 0]]
            }
        ]
    }"#;

    fn features(x: f32, y: f32, z: f32) -> FeatureVector {
        LandmarkSet::new(vec![Point3::new(x, y, z)])
            .to_feature_vector(1)
            .unwrap()
    }

    #[test]
    fn exposes_export_metadata() {
        let forest = ForestClassifier::from_json(FOREST).unwrap();
        assert_eq!(forest.classes(), &[Label(0), Label(1), Label(2)]);
        assert_eq!(forest.n_features(), 3);
        assert_eq!(forest.tree_count(), 2);
    }

    #[test]
    fn averages_leaf_distributions() {
        let forest = ForestClassifier::from_json(FOREST).unwrap();
        let proba = forest.predict_proba(&features(0.9, 0.0, -0.3)).unwrap();
        // Tree A right leaf [0, 2/3, 1/3], tree B left leaf [0, 0, 1].
        assert_relative_eq!(proba[0], 0.0);
        assert_relative_eq!(proba[1], 1.0 / 3.0);
        assert_relative_eq!(proba[2], 2.0 / 3.0);
    }

    #[rstest]
    #[case(0.9, -0.3, Label(2))]
    #[case(0.1, 0.3, Label(0))]
    #[case(0.5, 0.0, Label(0))]
    fn classifies_by_highest_mean_probability(
        #[case] x: f32,
        #[case] z: f32,
        #[case] expected: Label,
    ) {
        let forest = ForestClassifier::from_json(FOREST).unwrap();
        assert_eq!(forest.classify(&features(x, 0.0, z)).unwrap(), expected);
    }

    #[test]
    fn ties_resolve_to_the_first_class() {
        let forest = ForestClassifier::from_json(
            r#"{"classes": [3, 7], "n_features": 3, "trees": [{
                "children_left": [-1], "children_right": [-1],
                "feature": [-2], "threshold": [-2.0], "value": [[2, 2]]
            }]}"#,
        )
        .unwrap();
        assert_eq!(forest.classify(&features(0.2, 0.4, 0.1)).unwrap(), Label(3));
    }

    #[test]
    fn rejects_wrong_feature_length() {
        let forest = ForestClassifier::from_json(FOREST).unwrap();
        let two_points = LandmarkSet::new(vec![Point3::default(); 2])
            .to_feature_vector(2)
            .unwrap();
        assert!(matches!(
            forest.classify(&two_points),
            Err(ModelError::FeatureLength {
                expected: 3,
                actual: 6
            })
        ));
    }

    #[rstest]
    #[case::backwards_child(FOREST.replacen("[1, -1, -1]", "[0, -1, -1]", 1))]
    #[case::child_out_of_range(FOREST.replacen("[2, -1, -1]", "[9, -1, -1]", 1))]
    #[case::feature_out_of_range(FOREST.replacen("[0, -2, -2]", "[3, -2, -2]", 1))]
    #[case::short_leaf(FOREST.replacen("[4, 0, 0]", "[4, 0]", 1))]
    #[case::no_trees(r#"{"classes": [0], "n_features": 3, "trees": []}"#.to_string())]
    fn rejects_inconsistent_exports(#[case] json: String) {
        assert!(matches!(
            ForestClassifier::from_json(&json),
            Err(ModelError::InvalidModel(_))
        ));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FOREST.as_bytes()).unwrap();
        let forest = ForestClassifier::load(file.path()).unwrap();
        assert_eq!(forest.tree_count(), 2);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ForestClassifier::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
    }
}
