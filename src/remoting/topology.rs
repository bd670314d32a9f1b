// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster topology as seen by this node.
//!
//! The membership provider pushes changes through [`TopologyHandle::update`];
//! every reader sees a consistent [`Topology`] snapshot from a `watch`
//! channel, so a request never mixes the coordinator of one view with the
//! host list of another.
//!
//! # Target Resolution
//!
//! | Role | Query targets | Report targets |
//! |------|---------------|----------------|
//! | Follower | coordinator | coordinator |
//! | Coordinator | every host | every host + self |
//!
//! Report targets are de-duplicated, first occurrence wins.

use std::collections::HashSet;
use tokio::sync::watch;

/// Whether this node coordinates the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    Coordinator,
    #[default]
    Follower,
}

impl Role {
    pub fn from_flag(is_coordinator: bool) -> Self {
        if is_coordinator {
            Role::Coordinator
        } else {
            Role::Follower
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// One consistent view of cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Known cluster hosts, in provider order.
    pub hosts: Vec<String>,
    /// Coordinator address.
    pub coordinator: String,
    /// This node's own address.
    pub local: String,
    pub role: Role,
}

impl Topology {
    pub fn new(
        hosts: Vec<String>,
        coordinator: impl Into<String>,
        local: impl Into<String>,
        is_coordinator: bool,
    ) -> Self {
        Self {
            hosts,
            coordinator: coordinator.into(),
            local: local.into(),
            role: Role::from_flag(is_coordinator),
        }
    }

    /// Hosts to fetch tables from, in order.
    pub fn query_targets(&self) -> Vec<String> {
        match self.role {
            Role::Follower => single(&self.coordinator),
            Role::Coordinator => dedup(self.hosts.iter()),
        }
    }

    /// Hosts to push learned records to.
    pub fn report_targets(&self) -> Vec<String> {
        match self.role {
            Role::Follower => single(&self.coordinator),
            Role::Coordinator => dedup(self.hosts.iter().chain(std::iter::once(&self.local))),
        }
    }

    /// Known members plus this node.
    pub fn alive_set(&self) -> HashSet<String> {
        let mut alive: HashSet<String> = self.hosts.iter().cloned().collect();
        if !self.local.is_empty() {
            alive.insert(self.local.clone());
        }
        alive
    }
}

fn single(host: &str) -> Vec<String> {
    if host.is_empty() {
        Vec::new()
    } else {
        vec![host.to_string()]
    }
}

fn dedup<'a>(hosts: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .filter(|h| !h.is_empty() && seen.insert(h.as_str()))
        .cloned()
        .collect()
}

/// Shared, updatable topology.
///
/// Cloning is cheap; every clone sees the same updates.
#[derive(Debug, Clone)]
pub struct TopologyHandle {
    tx: std::sync::Arc<watch::Sender<Topology>>,
}

impl TopologyHandle {
    pub fn new(initial: Topology) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Replace the whole view. Called by the membership provider.
    pub fn update(
        &self,
        hosts: Vec<String>,
        coordinator: impl Into<String>,
        current: impl Into<String>,
        is_coordinator: bool,
    ) {
        let next = Topology::new(hosts, coordinator, current, is_coordinator);
        self.tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    /// Current view.
    pub fn current(&self) -> Topology {
        self.tx.borrow().clone()
    }
}

impl Default for TopologyHandle {
    fn default() -> Self {
        Self::new(Topology::default())
    }
}
