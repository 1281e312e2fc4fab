use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::codec::{hex_bytes, HexError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is not valid hex: {0}")]
    Hex(#[from] HexError),
    #[error("address must be 20 bytes, got {0}")]
    Length(usize),
}

/// 20-byte account identifier. Parsing is case-insensitive; output is
/// always lowercase `0x` hex, which is also the normalized map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex_bytes::decode(s.trim())?;
        let raw: [u8; 20] = bytes.as_slice().try_into().map_err(|_| AddressError::Length(bytes.len()))?;
        Ok(Self(raw))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_bytes::encode(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataField {
    Email,
    X,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
}

impl UserMetadata {
    pub fn get(&self, field: MetadataField) -> Option<&str> {
        match field {
            MetadataField::Email => self.email.as_deref(),
            MetadataField::X => self.x.as_deref(),
        }
    }

    pub fn set(&mut self, field: MetadataField, value: String) {
        match field {
            MetadataField::Email => self.email = Some(value),
            MetadataField::X => self.x = Some(value),
        }
    }
}

/// A metadata change that waits for the account owner's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdateRequest {
    pub metadata_field: MetadataField,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub task_index: usize,
    pub points: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub metadata: UserMetadata,
    #[serde(default)]
    pub metadata_update_requests: Vec<MetadataUpdateRequest>,
    #[serde(default)]
    pub completed_tasks: Vec<CompletedTask>,
}

impl User {
    pub fn score(&self) -> u128 {
        self.completed_tasks.iter().map(|t| t.points as u128).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub points: u64,
}

/// Pending OAuth login, keyed by its state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XRequest {
    pub code_verifier: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroplistEntry {
    pub address: Address,
    pub registered_at: DateTime<Utc>,
    /// Signature that authorized the registration.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

pub type TasksDocument = Vec<Task>;
pub type UsersDocument = BTreeMap<Address, User>;
pub type XRequestsDocument = HashMap<String, XRequest>;
pub type DroplistDocument = Vec<DroplistEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub position: usize,
    pub address: Address,
    #[serde(with = "crate::storage::codec::wide_int")]
    pub score: u128,
}
