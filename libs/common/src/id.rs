use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = nexora_common::id::prefixed_ulid("evt");
/// assert!(id.starts_with("evt_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Marker trait for types that represent a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate() -> String {
        prefixed_ulid(Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const ORGANIZATION: &str = "org";
    pub const MEMBERSHIP: &str = "mem";
    pub const API_KEY: &str = "key";
    pub const EVENT: &str = "evt";
    pub const CONNECTION: &str = "conn";
}
