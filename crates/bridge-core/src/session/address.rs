//! Recipient address normalization and network addresses

use crate::error::{BridgeError, Result};
use std::fmt;

/// Server part used for individual user chats
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Keep only ASCII digits. At least one digit must remain.
pub fn normalize_address(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(BridgeError::InvalidAddress(format!(
            "'{}' contains no digits",
            raw
        )));
    }

    Ok(digits)
}

/// A `user@server` address on the messaging network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatAddress {
    pub user: String,
    pub server: String,
}

impl ChatAddress {
    /// Build a user address from a phone-like string
    pub fn from_phone(raw: &str) -> Result<Self> {
        Ok(Self {
            user: normalize_address(raw)?,
            server: DEFAULT_USER_SERVER.to_string(),
        })
    }

    /// Parse `user[:device]@server`. The device suffix is dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let (user, server) = raw.trim().split_once('@')?;
        let user = user.split(':').next().unwrap_or_default();

        if user.is_empty() || server.is_empty() {
            return None;
        }

        Some(Self {
            user: user.to_string(),
            server: server.to_string(),
        })
    }

    /// Individual chat, as opposed to groups or broadcast lists
    pub fn is_user(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}
