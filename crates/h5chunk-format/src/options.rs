//! Configuration for opening chunk indexes.

/// Options controlling how strictly index structures are validated.
///
/// Follows the builder style of the dataset property lists: start from
/// [`ChunkIndexOptions::new`] (or `default()`) and chain setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndexOptions {
    /// Verify the lookup3 checksum trailer of every checksummed block.
    pub verify_checksums: bool,
    /// Require each block's client ID and header address to match the
    /// header that owns it.
    pub validate_back_references: bool,
}

impl Default for ChunkIndexOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            validate_back_references: true,
        }
    }
}

impl ChunkIndexOptions {
    /// Default options: all validation enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable checksum verification.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Enable or disable client ID / header address validation.
    pub fn validate_back_references(mut self, enabled: bool) -> Self {
        self.validate_back_references = enabled;
        self
    }
}
