/// Separator between compressed point commitments (and share indexes) in the
/// persisted polynomial encoding.
pub const WIRE_SEPARATOR: &str = "|";

/// Sentinel splitting a serialized polynomial's commitment list from its
/// sorted share-index list. A reader must locate this marker before
/// splitting; it never appears in hex-encoded points or indexes.
pub const WIRE_SENTINEL: &str = "0x0";

/// Default sharing policy: 2-of-2, one device share and one backup share.
pub const DEFAULT_THRESHOLD: usize = 2;
pub const DEFAULT_SHARE_COUNT: usize = 2;

/// General-store domain holding per-index share descriptions.
pub const SHARE_DESCRIPTIONS_DOMAIN: &str = "shareDescriptions";

/// Scoped-store domain holding self-addressed encrypted share backups,
/// keyed by the share commitment's x-coordinate.
pub const ENCRYPTED_SHARES_DOMAIN: &str = "encryptedShares";

/// General-store domain holding the share-transfer store pointer.
pub const SHARE_TRANSFER_DOMAIN: &str = "shareTransfer";

/// Storage address prefix for the service provider's encrypted device share.
pub const PROVIDER_SHARE_PREFIX: &str = "provider-share";

/// Storage address prefix for versioned metadata, suffixed by the key's
/// compressed public key.
pub const METADATA_PREFIX: &str = "metadata";
