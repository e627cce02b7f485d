//! Position encoding for steps within a flow.
//!
//! A step is addressed by the string `"<outer>/<inner>"`, where `outer` is the
//! row (branch) index and `inner` the step index inside that row. The encoded
//! string is what travels through template annotations and the status tree, so
//! lookups always compare encoded strings and never decode them.
//!
//! Positions are only unique within a flow. [`StepKey`] bundles the flow name,
//! the encoded position and the test definition name into the join key used by
//! both the compiler and the status synchronizer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PositionError;

/// Annotation / position-map key holding the encoded position.
pub const ANNOTATION_POSITION: &str = "position";

/// Annotation / position-map key holding the flow name.
pub const ANNOTATION_FLOW: &str = "flow";

/// Annotation key holding the test definition name.
pub const ANNOTATION_TESTDEF_NAME: &str = "testdefinition-name";

/// Location of a step within its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub outer: usize,
    pub inner: usize,
}

impl Position {
    pub fn new(outer: usize, inner: usize) -> Self {
        Self { outer, inner }
    }

    /// Encode as `"<outer>/<inner>"`.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a position string.
    ///
    /// Only the canonical form produced by [`Position::encode`] is accepted:
    /// no signs, whitespace or leading zeros. A successfully parsed value
    /// therefore re-encodes to exactly the input.
    pub fn parse(s: &str) -> Result<Self, PositionError> {
        let (outer, inner) = s
            .split_once('/')
            .ok_or_else(|| PositionError::Malformed(s.to_string()))?;
        let outer = parse_index(outer).ok_or_else(|| PositionError::Malformed(s.to_string()))?;
        let inner = parse_index(inner).ok_or_else(|| PositionError::Malformed(s.to_string()))?;
        Ok(Self { outer, inner })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.outer, self.inner)
    }
}

impl FromStr for Position {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_index(s: &str) -> Option<usize> {
    let canonical = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'));
    if !canonical {
        return None;
    }
    s.parse().ok()
}

/// The `(flow, position, testdefinition-name)` triple identifying a step.
///
/// Two steps are the same step iff their keys are equal. The position is kept
/// in its encoded form so comparisons are exact string matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepKey {
    pub flow: String,
    pub position: String,
    pub testdefinition: String,
}

impl StepKey {
    pub fn new(
        flow: impl Into<String>,
        position: impl Into<String>,
        testdefinition: impl Into<String>,
    ) -> Self {
        Self {
            flow: flow.into(),
            position: position.into(),
            testdefinition: testdefinition.into(),
        }
    }

    /// Build the key for a step at `position` of `flow`.
    pub fn at(flow: &str, position: Position, testdefinition: &str) -> Self {
        Self::new(flow, position.encode(), testdefinition)
    }

    /// Read the key back from a template annotation map.
    ///
    /// Returns `None` unless all three join annotations are present.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            flow: annotations.get(ANNOTATION_FLOW)?.clone(),
            position: annotations.get(ANNOTATION_POSITION)?.clone(),
            testdefinition: annotations.get(ANNOTATION_TESTDEF_NAME)?.clone(),
        })
    }

    /// Write the three join annotations into `annotations`.
    pub fn annotate(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(ANNOTATION_POSITION.to_string(), self.position.clone());
        annotations.insert(ANNOTATION_FLOW.to_string(), self.flow.clone());
        annotations.insert(
            ANNOTATION_TESTDEF_NAME.to_string(),
            self.testdefinition.clone(),
        );
    }

    /// The `position`/`flow` map stored on a step status.
    pub fn position_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ANNOTATION_POSITION.to_string(), self.position.clone()),
            (ANNOTATION_FLOW.to_string(), self.flow.clone()),
        ])
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.testdefinition, self.flow, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        assert_eq!(Position::new(0, 0).encode(), "0/0");
        assert_eq!(Position::new(12, 3).encode(), "12/3");
    }

    #[test]
    fn test_parse_canonical() {
        assert_eq!(Position::parse("1/2").unwrap(), Position::new(1, 2));
        assert_eq!("10/0".parse::<Position>().unwrap(), Position::new(10, 0));
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        for bad in ["", "1", "1/", "/1", "01/0", "0/00", "+1/0", " 0/0", "0/0 ", "a/b", "1/2/3"] {
            assert!(Position::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_parse_reencodes_identically() {
        for s in ["0/0", "3/14", "100/7"] {
            assert_eq!(Position::parse(s).unwrap().encode(), s);
        }
    }

    #[test]
    fn test_step_key_annotations() {
        let key = StepKey::at("testflow", Position::new(1, 0), "integration");
        let mut annotations = BTreeMap::new();
        annotations.insert("other".to_string(), "x".to_string());
        key.annotate(&mut annotations);

        assert_eq!(annotations["position"], "1/0");
        assert_eq!(annotations["flow"], "testflow");
        assert_eq!(annotations["testdefinition-name"], "integration");
        assert_eq!(StepKey::from_annotations(&annotations), Some(key));
    }

    #[test]
    fn test_step_key_requires_all_annotations() {
        let annotations = BTreeMap::from([
            ("position".to_string(), "0/0".to_string()),
            ("flow".to_string(), "testflow".to_string()),
        ]);
        assert!(StepKey::from_annotations(&annotations).is_none());
    }

    #[test]
    fn test_step_key_distinguishes_flows() {
        let a = StepKey::new("testflow", "0/0", "smoke");
        let b = StepKey::new("exit", "0/0", "smoke");
        assert_ne!(a, b);
    }
}
