/// Default length of a randomly generated channel name.
pub const DEFAULT_CHANNEL_NAME_LEN: usize = 10;

/// Default prefix for counter-derived channel names (`C1`, `C2`, ...).
pub const DEFAULT_CHANNEL_PREFIX: &str = "C";

/// Alphabet used for random channel names.
pub const CHANNEL_NAME_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts at drawing a random name before giving up on uniqueness and
/// falling back to a counter-suffixed name.
pub const MAX_NAME_ATTEMPTS: usize = 64;

/// Snapshot wire format version.
pub const SNAPSHOT_VERSION: &str = "1";
