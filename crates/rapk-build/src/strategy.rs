use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Copy the decoded template tree, edit sources, recompile.
    Decompile,
    /// Rewrite two entries of the prebuilt template archive in place.
    #[default]
    BinaryPatch,
    /// Delegate the whole build to the cold-build script.
    Script,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Decompile, Strategy::BinaryPatch, Strategy::Script];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Decompile => "decompile",
            Strategy::BinaryPatch => "binary-patch",
            Strategy::Script => "script",
        }
    }

    pub fn template_kind(self) -> Option<TemplateKind> {
        match self {
            Strategy::Decompile => Some(TemplateKind::Decompiled),
            Strategy::BinaryPatch => Some(TemplateKind::Prebuilt),
            Strategy::Script => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "decompile" | "compatible" => Ok(Strategy::Decompile),
            "binary-patch" | "binary_patch" | "patch" | "fast" => Ok(Strategy::BinaryPatch),
            "script" | "full" => Ok(Strategy::Script),
            other => Err(format!(
                "unknown strategy {other:?} (expected decompile, binary-patch or script)"
            )),
        }
    }
}

/// Which pre-built template form a strategy consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Decoded source tree, consumed by `Strategy::Decompile`.
    Decompiled,
    /// Compiled archive carrying the name sentinel, consumed by `Strategy::BinaryPatch`.
    Prebuilt,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Decompiled => f.write_str("decompiled"),
            TemplateKind::Prebuilt => f.write_str("prebuilt"),
        }
    }
}
