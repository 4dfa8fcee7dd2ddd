//! Prefix-tagged opaque identifiers.
//!
//! Every entity id is a string of the form `<prefix>_<suffix>` where the
//! suffix is 12 characters of lowercase Crockford base32 derived from random
//! UUID bytes. Consumers never parse the suffix; the prefix makes ids
//! self-describing in logs and across tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lowercase Crockford base32 alphabet (no i, l, o, u).
const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Length of the random suffix.
const SUFFIX_LEN: usize = 12;

fn random_suffix() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes[..SUFFIX_LEN]
        .iter()
        .map(|b| ALPHABET[(b & 0x1f) as usize] as char)
        .collect()
}

/// Error returned when parsing an id string with the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id `{value}`: expected `{prefix}_` prefix")]
pub struct ParseIdError {
    pub value: String,
    pub prefix: &'static str,
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The id prefix for this entity kind.
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh id.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, random_suffix()))
            }

            /// Parse an id string, validating the prefix.
            pub fn parse(value: &str) -> Result<Self, ParseIdError> {
                let rest = value
                    .strip_prefix($prefix)
                    .and_then(|r| r.strip_prefix('_'));
                match rest {
                    Some(suffix) if !suffix.is_empty() => Ok(Self(value.to_string())),
                    _ => Err(ParseIdError {
                        value: value.to_string(),
                        prefix: $prefix,
                    }),
                }
            }

            /// View as the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifies a workflow (`wf_`).
    WorkflowId, "wf");
define_id!(
    /// Identifies a task (`tk_`).
    TaskId, "tk");
define_id!(
    /// Identifies a checkpoint (`cp_`).
    CheckpointId, "cp");
define_id!(
    /// Identifies a workspace (`ws_`).
    WorkspaceId, "ws");
define_id!(
    /// Identifies a registered source repository (`rp_`).
    RepoId, "rp");
define_id!(
    /// Identifies a plan template (`tmpl_`).
    TemplateId, "tmpl");
define_id!(
    /// Identifies an agent (`ag_`).
    AgentId, "ag");
define_id!(
    /// Identifies a message (`msg_`).
    MessageId, "msg");
define_id!(
    /// Identifies a session (`ss_`).
    SessionId, "ss");
define_id!(
    /// Identifies a memory record (`mem_`).
    MemoryId, "mem");
define_id!(
    /// Identifies a message thread (`thr_`).
    ThreadId, "thr");
