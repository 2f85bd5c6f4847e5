// TgDL - Chat Media Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Chat reference parsing
//!
//! Accepted forms:
//! - `https://t.me/<name>` (also `t.me/<name>`, `telegram.me/<name>`, `t.me/s/<name>`)
//! - `https://t.me/+<hash>` and `https://t.me/joinchat/<hash>` invite links
//! - `https://t.me/c/<id>/...` private channel links
//! - `@handle` or a bare handle
//! - a raw numeric id, possibly negative
//!
//! Parsing only normalizes the input. Resolving it to an entity is left to the
//! messaging collaborator.

use crate::error::{DownloaderError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

lazy_static! {
    static ref HANDLE_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]{3,31}$").unwrap();
}

const LINK_HOSTS: &[&str] = &["t.me", "telegram.me", "www.t.me", "www.telegram.me"];

/// Normalized chat reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ChatRef {
    /// Public username, stored without the leading `@`
    Username(String),
    /// Numeric peer id
    Id(i64),
    /// Private invite hash
    Invite(String),
}

impl ChatRef {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DownloaderError::InvalidChatReference(
                "chat reference is empty".to_string(),
            ));
        }

        if let Some(handle) = trimmed.strip_prefix('@') {
            return Self::username(handle, input);
        }

        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(ChatRef::Id(id));
        }

        if Self::looks_like_link(trimmed) {
            return Self::parse_link(trimmed, input);
        }

        Self::username(trimmed, input)
    }

    fn looks_like_link(s: &str) -> bool {
        let lower = s.to_ascii_lowercase();
        lower.starts_with("http://")
            || lower.starts_with("https://")
            || LINK_HOSTS.iter().any(|h| lower.starts_with(&format!("{}/", h)))
    }

    fn parse_link(link: &str, original: &str) -> Result<Self> {
        let with_scheme = if link.contains("://") {
            link.to_string()
        } else {
            format!("https://{}", link)
        };
        let url = Url::parse(&with_scheme)?;

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !LINK_HOSTS.contains(&host.as_str()) {
            return Err(DownloaderError::InvalidChatReference(format!(
                "{} (unsupported host '{}')",
                original.trim(),
                host
            )));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [first, ..] if first.starts_with('+') && first.len() > 1 => {
                Ok(ChatRef::Invite(first[1..].to_string()))
            }
            ["joinchat", hash, ..] => Ok(ChatRef::Invite(hash.to_string())),
            ["c", id, ..] => {
                let id: i64 = id.parse().map_err(|_| {
                    DownloaderError::InvalidChatReference(original.trim().to_string())
                })?;
                // Private channel links carry the bare channel id
                Ok(ChatRef::Id(-1_000_000_000_000 - id))
            }
            ["s", name, ..] => Self::username(name, original),
            [name, ..] => Self::username(name, original),
            [] => Err(DownloaderError::InvalidChatReference(format!(
                "{} (link has no chat name)",
                original.trim()
            ))),
        }
    }

    fn username(handle: &str, original: &str) -> Result<Self> {
        if HANDLE_RE.is_match(handle) {
            Ok(ChatRef::Username(handle.to_string()))
        } else {
            Err(DownloaderError::InvalidChatReference(original.trim().to_string()))
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Username(name) => write!(f, "@{}", name),
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Invite(hash) => write!(f, "https://t.me/+{}", hash),
        }
    }
}

impl FromStr for ChatRef {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        ChatRef::parse(s)
    }
}

impl From<ChatRef> for String {
    fn from(value: ChatRef) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ChatRef {
    type Error = DownloaderError;

    fn try_from(value: String) -> Result<Self> {
        ChatRef::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_forms() {
        assert_eq!(
            ChatRef::parse("https://t.me/rustlang").unwrap(),
            ChatRef::Username("rustlang".into())
        );
        assert_eq!(
            ChatRef::parse("t.me/rustlang/123").unwrap(),
            ChatRef::Username("rustlang".into())
        );
        assert_eq!(
            ChatRef::parse("https://t.me/s/rustlang").unwrap(),
            ChatRef::Username("rustlang".into())
        );
        assert_eq!(
            ChatRef::parse("https://t.me/+AbCdEf123").unwrap(),
            ChatRef::Invite("AbCdEf123".into())
        );
        assert_eq!(
            ChatRef::parse("https://telegram.me/joinchat/XyZ").unwrap(),
            ChatRef::Invite("XyZ".into())
        );
        assert_eq!(
            ChatRef::parse("https://t.me/c/1234567/89").unwrap(),
            ChatRef::Id(-1_000_001_234_567)
        );
    }

    #[test]
    fn test_parse_handles_and_ids() {
        assert_eq!(
            ChatRef::parse("  @media_dump ").unwrap(),
            ChatRef::Username("media_dump".into())
        );
        assert_eq!(
            ChatRef::parse("media_dump").unwrap(),
            ChatRef::Username("media_dump".into())
        );
        assert_eq!(ChatRef::parse("-1001234").unwrap(), ChatRef::Id(-1001234));
        assert_eq!(ChatRef::parse("777").unwrap(), ChatRef::Id(777));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ChatRef::parse("").is_err());
        assert!(ChatRef::parse("   ").is_err());
        assert!(ChatRef::parse("@a").is_err());
        assert!(ChatRef::parse("has space").is_err());
        assert!(ChatRef::parse("https://example.com/rustlang").is_err());
        assert!(ChatRef::parse("https://t.me/").is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for r in [
            ChatRef::Username("rustlang".into()),
            ChatRef::Id(-100200),
            ChatRef::Invite("AbC".into()),
        ] {
            assert_eq!(ChatRef::parse(&r.to_string()).unwrap(), r);
        }
    }
}
