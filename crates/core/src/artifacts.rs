//! The artifact naming contract with the external conversion toolkit.
//!
//! File names are bit-exact: the toolkit writes `{key}{extension}` into its
//! output directory and the shared output area uses the same names.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::submission::SubmissionKey;

/// The fixed set of artifacts a successful conversion may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Structured JSON extracted from the spreadsheet.
    #[serde(rename = "json")]
    StructuredData,
    /// The OpenDocument text rendition.
    #[serde(rename = "odt")]
    PrimaryDocument,
    /// The Word rendition.
    #[serde(rename = "docx")]
    ConvertedFormat,
    /// PDF rendered from the OpenDocument file.
    #[serde(rename = "pdf")]
    RenderedPdf,
}

impl ArtifactKind {
    /// Every kind, in the order the toolkit produces them.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::StructuredData,
        ArtifactKind::PrimaryDocument,
        ArtifactKind::ConvertedFormat,
        ArtifactKind::RenderedPdf,
    ];

    /// Key used for this kind in a [`ResultManifest`].
    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::StructuredData => "json",
            Self::PrimaryDocument => "odt",
            Self::ConvertedFormat => "docx",
            Self::RenderedPdf => "pdf",
        }
    }

    /// File-name suffix appended to the submission key.
    pub fn extension(self) -> &'static str {
        match self {
            Self::StructuredData => ".json",
            Self::PrimaryDocument => ".odt",
            Self::ConvertedFormat => ".docx",
            Self::RenderedPdf => ".odt.pdf",
        }
    }

    pub fn file_name(self, key: &SubmissionKey) -> String {
        format!("{}{}", key.as_str(), self.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// Published artifacts of a succeeded job: kind -> servable relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultManifest(BTreeMap<ArtifactKind, String>);

impl ResultManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ArtifactKind, path: impl Into<String>) {
        self.0.insert(kind, path.into());
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SubmissionKey {
        SubmissionKey::parse("budget-2024").unwrap()
    }

    #[test]
    fn file_names_follow_toolkit_contract() {
        let names: Vec<String> = ArtifactKind::ALL.iter().map(|k| k.file_name(&key())).collect();
        assert_eq!(
            names,
            [
                "budget-2024.json",
                "budget-2024.odt",
                "budget-2024.docx",
                "budget-2024.odt.pdf",
            ]
        );
    }

    #[test]
    fn manifest_serializes_with_short_keys() {
        let mut manifest = ResultManifest::new();
        manifest.insert(ArtifactKind::RenderedPdf, "out/budget-2024.odt.pdf");
        manifest.insert(ArtifactKind::StructuredData, "out/budget-2024.json");

        let json = serde_json::to_value(&manifest).expect("serialize");
        assert_eq!(json["json"], "out/budget-2024.json");
        assert_eq!(json["pdf"], "out/budget-2024.odt.pdf");
        assert!(json.get("docx").is_none());

        let back: ResultManifest = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, manifest);
    }
}
