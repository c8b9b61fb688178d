//! Target API levels and per-file compile options

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host platform SDK level a script is compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiLevel(pub u32);

impl ApiLevel {
    pub const HC: ApiLevel = ApiLevel(11);
    pub const HC_MR1: ApiLevel = ApiLevel(12);
    pub const HC_MR2: ApiLevel = ApiLevel(13);
    pub const ICS: ApiLevel = ApiLevel(14);
    pub const ICS_MR1: ApiLevel = ApiLevel(15);
    pub const JB: ApiLevel = ApiLevel(16);
    pub const JB_MR1: ApiLevel = ApiLevel(17);
    pub const JB_MR2: ApiLevel = ApiLevel(18);
    pub const KK: ApiLevel = ApiLevel(19);

    pub const MIN: ApiLevel = ApiLevel::HC;
    pub const MAX: ApiLevel = ApiLevel::KK;

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_supported(self) -> bool {
        self >= Self::MIN && self <= Self::MAX
    }

    /// Level immediately below this one, saturating at zero.
    pub fn previous(self) -> ApiLevel {
        ApiLevel(self.0.saturating_sub(1))
    }

    /// Every supported level, lowest first.
    pub fn all() -> impl Iterator<Item = ApiLevel> {
        (Self::MIN.0..=Self::MAX.0).map(ApiLevel)
    }
}

impl Default for ApiLevel {
    fn default() -> Self {
        ApiLevel::MAX
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerWidth {
    #[default]
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl PointerWidth {
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            32 => Some(PointerWidth::Bits32),
            64 => Some(PointerWidth::Bits64),
            _ => None,
        }
    }
}

/// Options fixed for the duration of one compiled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetOptions {
    pub api: ApiLevel,
    /// Reduced (Filterscript) dialect.
    pub strict_dialect: bool,
    pub pointer_width: PointerWidth,
}

impl TargetOptions {
    pub fn new(api: ApiLevel) -> Self {
        Self {
            api,
            ..Self::default()
        }
    }

    pub fn strict(mut self, strict_dialect: bool) -> Self {
        self.strict_dialect = strict_dialect;
        self
    }

    pub fn with_pointer_width(mut self, pointer_width: PointerWidth) -> Self {
        self.pointer_width = pointer_width;
        self
    }
}
