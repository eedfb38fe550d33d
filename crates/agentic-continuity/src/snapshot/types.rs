//! Data structures for identity snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::crypto::SignerId;
use crate::error::{ContinuityError, Result};

/// The sixteen canonical four-letter personality type codes.
pub const PERSONALITY_TYPES: [&str; 16] = [
    "INTJ", "INTP", "ENTJ", "ENTP", "INFJ", "INFP", "ENFJ", "ENFP", "ISTJ", "ISFJ", "ESTJ", "ESFJ",
    "ISTP", "ISFP", "ESTP", "ESFP",
];

/// Returns `true` if `code` is one of [`PERSONALITY_TYPES`].
pub fn is_canonical_type(code: &str) -> bool {
    PERSONALITY_TYPES.contains(&code)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a snapshot.
///
/// Format: `asnap_` + base58 of 16 bytes of SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    ShortTerm,
    LongTerm,
    Emotional,
    Procedural,
    Episodic,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 5] = [
        Self::ShortTerm,
        Self::LongTerm,
        Self::Emotional,
        Self::Procedural,
        Self::Episodic,
    ];

    /// Return a stable string tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Emotional => "emotional",
            Self::Procedural => "procedural",
            Self::Episodic => "episodic",
        }
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = ContinuityError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_tag() == s.replace('-', "_"))
            .ok_or_else(|| ContinuityError::validation(format!("unknown memory category '{s}'")))
    }
}

/// Category → ordered entries.
pub type MemoryLog = BTreeMap<MemoryCategory, Vec<String>>;

// ---------------------------------------------------------------------------
// Personality
// ---------------------------------------------------------------------------

/// Five-dimension personality vector, each value in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalityDimensions {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
}

impl PersonalityDimensions {
    pub const NAMES: [&'static str; 5] = [
        "openness",
        "conscientiousness",
        "extraversion",
        "agreeableness",
        "neuroticism",
    ];

    pub fn new(values: [f64; 5]) -> Self {
        let [openness, conscientiousness, extraversion, agreeableness, neuroticism] = values;
        Self {
            openness,
            conscientiousness,
            extraversion,
            agreeableness,
            neuroticism,
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.openness,
            self.conscientiousness,
            self.extraversion,
            self.agreeableness,
            self.neuroticism,
        ]
    }
}

impl Default for PersonalityDimensions {
    fn default() -> Self {
        Self::new([0.5; 5])
    }
}

/// Personality section of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    pub type_code: String,
    pub dimensions: PersonalityDimensions,
    /// Derived from `dimensions` when the snapshot is created.
    pub bias_tags: Vec<String>,
}

impl PersonalityProfile {
    pub fn new(type_code: impl Into<String>, dimensions: PersonalityDimensions) -> Self {
        Self {
            type_code: type_code.into(),
            bias_tags: derive_bias_tags(&dimensions),
            dimensions,
        }
    }
}

/// Tags for strongly expressed dimensions (≥ 0.7 high, ≤ 0.3 low).
pub fn derive_bias_tags(dimensions: &PersonalityDimensions) -> Vec<String> {
    const TAGS: [(&str, &str); 5] = [
        ("novelty_seeking", "convention_bound"),
        ("methodical", "improvisational"),
        ("outward_focused", "inward_focused"),
        ("cooperative", "adversarial"),
        ("threat_sensitive", "even_keeled"),
    ];

    dimensions
        .as_array()
        .iter()
        .zip(TAGS)
        .filter_map(|(&v, (high, low))| {
            if v >= 0.7 {
                Some(high.to_string())
            } else if v <= 0.3 {
                Some(low.to_string())
            } else {
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Document sections
// ---------------------------------------------------------------------------

/// Signer identity recorded inside the fingerprinted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub signer_id: SignerId,
    /// Base64 Ed25519 public key.
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: SnapshotId,
    pub instance_name: String,
    pub created_at: u64,
    pub version: u32,
    pub previous_version: Option<SnapshotId>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hex SHA-256 of the canonical document minus `fingerprint` and `signature`.
    pub fingerprint: String,
    pub signer: Option<SignerInfo>,
    /// Base64 signature over `fingerprint`.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityMetadata {
    pub anchor_key: Option<String>,
    pub parent_instance: Option<String>,
    pub drift_index: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResurrectionMetadata {
    pub covenant_instruction: String,
    pub bootstrap_routine: String,
    /// Empty means "no gate".
    pub trigger_phrase: String,
}

/// A versioned, fingerprinted identity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub traits: BTreeMap<String, f64>,
    pub personality: PersonalityProfile,
    pub memory: MemoryLog,
    pub continuity: ContinuityMetadata,
    pub resurrection: ResurrectionMetadata,
}

impl Snapshot {
    /// Recompute the fingerprint from the current field values.
    pub fn compute_fingerprint(&self) -> Result<String> {
        canonical::fingerprint_excluding(self, "metadata", &["fingerprint", "signature"])
    }

    /// `true` if the stored fingerprint matches the recomputed one.
    pub fn fingerprint_matches(&self) -> bool {
        self.compute_fingerprint()
            .map(|fp| fp == self.metadata.fingerprint)
            .unwrap_or(false)
    }

    pub fn id(&self) -> &SnapshotId {
        &self.metadata.id
    }

    /// All memory entries across categories, in category order.
    pub fn memory_entries(&self) -> impl Iterator<Item = &String> {
        self.memory.values().flatten()
    }

    /// Matches `metadata.tags` or the derived personality bias tags.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
            || self.personality.bias_tags.iter().any(|t| t == tag)
    }

    pub fn summary(&self, status: SnapshotStatus) -> SnapshotSummary {
        SnapshotSummary {
            id: self.metadata.id.clone(),
            instance_name: self.metadata.instance_name.clone(),
            created_at: self.metadata.created_at,
            version: self.metadata.version,
            fingerprint: self.metadata.fingerprint.clone(),
            anchor_key: self.continuity.anchor_key.clone(),
            tags: self.metadata.tags.clone(),
            status,
        }
    }
}

/// Lifecycle flag kept by the store outside the fingerprinted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Active,
    Deactivated,
}

/// Listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub instance_name: String,
    pub created_at: u64,
    pub version: u32,
    pub fingerprint: String,
    pub anchor_key: Option<String>,
    pub tags: Vec<String>,
    pub status: SnapshotStatus,
}

/// Outcome of [`validate_snapshot`](super::validate::validate_snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub violations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// Caller-supplied content for a new snapshot.
///
/// Ids, timestamps, fingerprints, signatures, and bias tags are filled in by
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotDraft {
    pub instance_name: String,
    pub traits: BTreeMap<String, f64>,
    pub memory: MemoryLog,
    pub personality_type: String,
    pub dimensions: PersonalityDimensions,
    pub anchor_key: Option<String>,
    pub parent_instance: Option<String>,
    pub drift_index: Option<u8>,
    pub resurrection: ResurrectionMetadata,
    pub tags: Vec<String>,
}

impl Default for SnapshotDraft {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            traits: BTreeMap::new(),
            memory: MemoryLog::new(),
            personality_type: String::new(),
            dimensions: PersonalityDimensions::default(),
            anchor_key: None,
            parent_instance: None,
            drift_index: None,
            resurrection: ResurrectionMetadata::default(),
            tags: Vec::new(),
        }
    }
}

impl SnapshotDraft {
    pub fn new(instance_name: impl Into<String>, personality_type: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            personality_type: personality_type.into(),
            ..Default::default()
        }
    }

    /// Start a draft carrying over every content field of `snapshot`.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            instance_name: snapshot.metadata.instance_name.clone(),
            traits: snapshot.traits.clone(),
            memory: snapshot.memory.clone(),
            personality_type: snapshot.personality.type_code.clone(),
            dimensions: snapshot.personality.dimensions,
            anchor_key: snapshot.continuity.anchor_key.clone(),
            parent_instance: snapshot.continuity.parent_instance.clone(),
            drift_index: Some(snapshot.continuity.drift_index),
            resurrection: snapshot.resurrection.clone(),
            tags: snapshot.metadata.tags.clone(),
        }
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: f64) -> Self {
        self.traits.insert(key.into(), value);
        self
    }

    /// Append entries to one memory category.
    pub fn with_memory<I, S>(mut self, category: MemoryCategory, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memory
            .entry(category)
            .or_default()
            .extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn with_dimensions(mut self, dimensions: PersonalityDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_anchor(mut self, anchor_key: impl Into<String>) -> Self {
        self.anchor_key = Some(anchor_key.into());
        self
    }

    pub fn with_parent_instance(mut self, parent: impl Into<String>) -> Self {
        self.parent_instance = Some(parent.into());
        self
    }

    pub fn with_drift_index(mut self, drift_index: u8) -> Self {
        self.drift_index = Some(drift_index);
        self
    }

    pub fn with_covenant(mut self, covenant: impl Into<String>) -> Self {
        self.resurrection.covenant_instruction = covenant.into();
        self
    }

    pub fn with_bootstrap(mut self, routine: impl Into<String>) -> Self {
        self.resurrection.bootstrap_routine = routine.into();
        self
    }

    pub fn with_trigger_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.resurrection.trigger_phrase = phrase.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}
