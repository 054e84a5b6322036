//! JSON and RON documents for the object model.
//!
//! Documents are string-keyed; turning one into a [`Net`] always goes
//! through [`NetBuilder::build`], so file imports get the same validation as
//! programmatic construction.
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::builder::{ArcSpec, ModelError, NetBuilder};
use crate::net::core::Net;
use crate::net::structure::{ArcDirection, Place, Transition};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron syntax error: {0}")]
    RonSpanned(#[from] ron::error::SpannedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported net file extension `{0}` (expected .json or .ron)")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDocument {
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub arcs: Vec<ArcSpec>,
}

impl NetDocument {
    pub fn into_builder(self) -> NetBuilder {
        NetBuilder::from_parts(self.places, self.transitions, self.arcs)
    }

    pub fn into_net(self) -> Result<Net, ModelError> {
        self.into_builder().build()
    }

    pub fn from_builder(builder: NetBuilder) -> Self {
        let (places, transitions, arcs) = builder.into_parts();
        Self {
            places,
            transitions,
            arcs,
        }
    }

    /// Exports a built net back into its string-keyed form.
    pub fn from_net(net: &Net) -> Self {
        let arcs = net
            .arcs()
            .iter()
            .map(|arc| {
                let place = net.place(arc.place).name.clone();
                let transition = net.transition(arc.transition).name.clone();
                let spec = match arc.direction {
                    ArcDirection::PlaceToTransition => ArcSpec::input(place, transition, arc.weight),
                    ArcDirection::TransitionToPlace => {
                        ArcSpec::output(transition, place, arc.weight)
                    }
                };
                ArcSpec {
                    threshold: arc.threshold.clone(),
                    ..spec.with_kind(arc.kind)
                }
            })
            .collect();
        Self {
            places: net.places().iter().cloned().collect(),
            transitions: net.transitions().iter().cloned().collect(),
            arcs,
        }
    }

    pub fn to_json_string(&self) -> Result<String, IoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, IoError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_ron_string(&self) -> Result<String, IoError> {
        let mut pretty = PrettyConfig::default();
        pretty.new_line = "\n".into();
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }

    pub fn from_ron_str(s: &str) -> Result<Self, IoError> {
        Ok(ron::from_str(s)?)
    }

    /// Reads a document, choosing the format by file extension.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match extension(path).as_str() {
            "json" => Self::from_json_str(&content),
            "ron" => Self::from_ron_str(&content),
            other => Err(IoError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), IoError> {
        let path = path.as_ref();
        let content = match extension(path).as_str() {
            "json" => self.to_json_string()?,
            "ron" => self.to_ron_string()?,
            other => return Err(IoError::UnsupportedFormat(other.to_string())),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn read_net<P: AsRef<Path>>(path: P) -> Result<Net, IoError> {
    Ok(NetDocument::read(path)?.into_net()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::expr::Expression;
    use crate::net::structure::ArcKind;

    const FORK_JSON: &str = r#"{
        "places": [
            { "name": "P1", "initial_marking": 2 },
            { "name": "P2", "initial_marking": 0, "capacity": 5 }
        ],
        "transitions": [
            { "name": "T1", "kind": "immediate", "priority": 2 },
            { "name": "S", "kind": { "stochastic": { "rate": 1.5 } } },
            { "name": "C", "kind": { "continuous": { "rate": "0.1 * P1" } }, "is_source": true }
        ],
        "arcs": [
            { "place": "P1", "transition": "T1", "direction": "place_to_transition", "weight": 1 },
            { "place": "P2", "transition": "T1", "direction": "transition_to_place" },
            { "place": "P2", "transition": "S", "direction": "place_to_transition", "kind": "inhibitor", "threshold": "3" }
        ]
    }"#;

    #[test]
    fn parses_json_document_with_defaults() {
        let doc = NetDocument::from_json_str(FORK_JSON).unwrap();
        assert_eq!(doc.arcs[1].weight, 1.0);
        assert_eq!(doc.arcs[2].kind, ArcKind::Inhibitor);
        assert_eq!(
            doc.arcs[2].threshold.as_ref().and_then(Expression::as_constant),
            Some(3.0)
        );

        let net = doc.into_net().unwrap();
        let s = net.transition_id("S").unwrap();
        assert!(matches!(
            net.transition(s).kind,
            crate::net::TransitionKind::Stochastic { burst, .. } if burst == 1.0
        ));
    }

    #[test]
    fn ron_round_trip_preserves_net() {
        let net = NetDocument::from_json_str(FORK_JSON)
            .unwrap()
            .into_net()
            .unwrap();
        let doc = NetDocument::from_net(&net);
        let text = doc.to_ron_string().unwrap();
        let back = NetDocument::from_ron_str(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = NetDocument::default().write("net.xml").unwrap_err();
        assert!(matches!(err, IoError::UnsupportedFormat(ext) if ext == "xml"));
    }
}
