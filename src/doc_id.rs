use std::cmp::Ordering;

/// A stable document identifier derived from a document's dedup key.
///
/// Serialized as the full 16-character hex form of `numeric`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables and the lexical index.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a dedup key.
    ///
    /// Uses the first eight bytes of the key's BLAKE3 digest, so the value
    /// does not depend on the toolchain or platform.
    pub fn from_key(key: &str) -> Self {
        let digest = blake3::hash(key.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        Self::from_numeric(u64::from_be_bytes(bytes))
    }

    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    /// Parse the full hex form produced by [`DocumentId::hex`].
    pub fn parse_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self::from_numeric)
    }

    pub fn hex(&self) -> String {
        format!("{:016x}", self.numeric)
    }

    fn short_hex(value: u64, len: usize) -> String {
        let full = format!("{value:016x}");
        full[..len].to_string()
    }
}

impl PartialEq for DocumentId {
    fn eq(&self, other: &Self) -> bool {
        self.numeric == other.numeric
    }
}

impl Eq for DocumentId {}

impl PartialOrd for DocumentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric.cmp(&other.numeric)
    }
}

impl std::hash::Hash for DocumentId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.numeric.hash(state);
    }
}

impl TryFrom<String> for DocumentId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse_hex(&value)
            .ok_or_else(|| format!("invalid document id: {value}"))
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.hex()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}
