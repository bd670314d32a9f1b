// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fingerprint records and tables.
//!
//! A [`FingerprintRecord`] names a file by its path under the storage root,
//! pins its content digest, and lists every host known to hold a copy.
//! Host sets only ever grow by union; nothing here removes a holder.
//!
//! # Wire Format
//!
//! ```text
//! {"path": "media/a.png", "crc64": 1234567890, "hosts": ["10.0.0.1:8080"]}
//! ```
//!
//! A [`FingerprintTable`] is a JSON object keyed by path. The same encoding
//! is used for the on-disk snapshot, NOTIFY bodies and QUERY_INDEX replies.

use crate::error::{FingerprintError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Component, Path};

/// Mapping path → record. Ordered so encodings and iteration are stable.
pub type FingerprintTable = BTreeMap<String, FingerprintRecord>;

/// A file fingerprint: path, content digest and known holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Relative, `/`-separated path under the storage root.
    pub path: String,

    /// Digest of the file content when the record was created.
    #[serde(rename = "crc64")]
    pub checksum: u64,

    /// Hosts known to hold a copy.
    #[serde(default, deserialize_with = "nullable_hosts")]
    pub hosts: BTreeSet<String>,
}

fn nullable_hosts<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeSet<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl FingerprintRecord {
    /// Create a record held by the given hosts.
    pub fn new<I, S>(path: impl Into<String>, checksum: u64, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            checksum,
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    /// Union `hosts` into this record. Returns `true` if the set grew.
    pub fn add_hosts<I, S>(&mut self, hosts: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.hosts.len();
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self.hosts.len() != before
    }

    /// Check whether `host` is a known holder.
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Holders that are still cluster members, in the record's host order.
    pub fn alive_hosts(&self, members: &[String]) -> Vec<String> {
        let members: HashSet<&str> = members.iter().map(String::as_str).collect();
        self.hosts
            .iter()
            .filter(|h| members.contains(h.as_str()))
            .cloned()
            .collect()
    }
}

/// Merge `incoming` into `acc` by host-set union per path.
///
/// The first record seen for a path keeps its checksum.
pub fn merge_tables(acc: &mut FingerprintTable, incoming: FingerprintTable) {
    for (path, record) in incoming {
        match acc.get_mut(&path) {
            Some(existing) => {
                existing.add_hosts(record.hosts);
            }
            None => {
                acc.insert(path, record);
            }
        }
    }
}

/// Split `records` into one batch per destination.
///
/// A destination receives a record when the record names at least one
/// alive holder other than the destination itself. Destinations with an
/// empty batch are omitted. Destination order is preserved.
pub fn partition_by_destination(
    records: &FingerprintTable,
    destinations: &[String],
    alive: &HashSet<String>,
) -> Vec<(String, FingerprintTable)> {
    let mut batches = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let batch: FingerprintTable = records
            .iter()
            .filter(|(_, record)| {
                record
                    .hosts
                    .iter()
                    .any(|h| h != destination && alive.contains(h))
            })
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect();
        if !batch.is_empty() {
            batches.push((destination.clone(), batch));
        }
    }
    batches
}

/// Canonical form of a root-relative path: `.` components, repeated
/// separators and trailing slashes are dropped, segments are joined by `/`.
///
/// Fails on paths that are absolute, climb out with `..`, or name nothing.
/// Two spellings of the same file always canonicalize to the same key.
pub fn canonical_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(segment) => match segment.to_str() {
                Some(segment) => segments.push(segment),
                None => return Err(FingerprintError::InvalidPath(path.to_string())),
            },
            Component::CurDir => {}
            _ => return Err(FingerprintError::InvalidPath(path.to_string())),
        }
    }
    if segments.is_empty() {
        return Err(FingerprintError::InvalidPath(format!("empty path {:?}", path)));
    }
    Ok(segments.join("/"))
}

/// Accept only canonical, root-relative paths (see [`canonical_path`]).
pub fn validate_path(path: &str) -> Result<()> {
    if canonical_path(path)? != path {
        return Err(FingerprintError::InvalidPath(path.to_string()));
    }
    Ok(())
}
