use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Ordered privilege tier. A caller may invoke a method when its level is `>=` the
/// method's required level. Unauthenticated callers are always `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    None = 0,
    ReadOnly = 1,
    Normal = 5,
    Admin = 10,
}

impl AuthLevel {
    /// Tier applied to exported methods that do not declare one.
    pub const DEFAULT: AuthLevel = AuthLevel::Normal;

    pub fn as_i32(self) -> i32 { self as i32 }

    pub fn allows(self, required: AuthLevel) -> bool { self >= required }

    /// Accepts the numeric value or the snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Some(AuthLevel::None),
            "1" | "read_only" | "readonly" => Some(AuthLevel::ReadOnly),
            "5" | "normal" => Some(AuthLevel::Normal),
            "10" | "admin" => Some(AuthLevel::Admin),
            _ => None,
        }
    }
}

impl Default for AuthLevel {
    fn default() -> Self { AuthLevel::DEFAULT }
}

impl Display for AuthLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthLevel::None => "none",
            AuthLevel::ReadOnly => "read_only",
            AuthLevel::Normal => "normal",
            AuthLevel::Admin => "admin",
        };
        write!(f, "{}", name)
    }
}
