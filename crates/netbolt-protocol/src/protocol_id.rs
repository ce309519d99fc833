//! Protocol identity.
//!
//! Every packet carries a 32-bit id derived from an application-chosen
//! protocol name; endpoints silently drop packets whose id differs from
//! their own, which keeps foreign traffic from ever reaching connection
//! state.

/// 32-bit protocol identity carried in every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(u32);

impl ProtocolId {
    /// Derives the id from a protocol name using FNV-1a. The hash is stable
    /// across platforms and releases, so both sides only have to agree on
    /// the name.
    pub fn from_name(name: &str) -> Self {
        const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;

        let mut hash = FNV_OFFSET_BASIS;
        for byte in name.bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Self(hash)
    }

    /// Wraps a raw id read from the wire.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw 32-bit value.
    pub fn value(&self) -> u32 {
        self.0
    }
}
