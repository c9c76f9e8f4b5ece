//! Probe registry and dependency ordering.
//!
//! Capabilities are kept in declaration order; that order is the emission
//! order and the tie-breaker for every graph traversal, so no result ever
//! depends on hash iteration. An edge `A → B` means "B depends on A".
//!
//! Ordering is computed with Kahn's algorithm; waves of the algorithm form
//! [`ProbeRegistry::evaluation_levels`], whose members are mutually
//! independent and may be probed concurrently.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::capability::Capability;
use crate::error::{ConfigureError, Result};

/// Ordered collection of declared capabilities.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    capabilities: Vec<Capability>,
    index: HashMap<String, usize>,
}

impl ProbeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from capabilities in declaration order.
    pub fn from_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Result<Self> {
        let mut registry = Self::new();
        for capability in capabilities {
            registry.register(capability)?;
        }
        Ok(registry)
    }

    /// Add a capability at the end of the declaration order.
    ///
    /// Returns [`ConfigureError::DuplicateCapability`] if the name is taken
    /// and [`ConfigureError::InvalidCapability`] if the declaration is
    /// incomplete. Dependencies may name capabilities registered later.
    pub fn register(&mut self, capability: Capability) -> Result<()> {
        if self.index.contains_key(&capability.name) {
            return Err(ConfigureError::DuplicateCapability {
                name: capability.name,
            });
        }
        capability
            .validate()
            .map_err(|reason| ConfigureError::InvalidCapability {
                name: capability.name.clone(),
                reason,
            })?;

        self.index
            .insert(capability.name.clone(), self.capabilities.len());
        self.capabilities.push(capability);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Capabilities in declaration order.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Check that every dependency exists and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        self.evaluation_levels().map(|_| ())
    }

    /// Capabilities with dependencies before dependents; independent
    /// capabilities keep their declaration order.
    pub fn topological_order(&self) -> Result<Vec<&Capability>> {
        Ok(self.evaluation_levels()?.into_iter().flatten().collect())
    }

    /// Kahn waves: wave `n` holds every capability whose deepest
    /// dependency chain has length `n`. Each wave is in declaration order.
    pub fn evaluation_levels(&self) -> Result<Vec<Vec<&Capability>>> {
        let upstream = self.upstream_indices()?;

        let mut in_degree: Vec<usize> = upstream.iter().map(|deps| deps.len()).collect();
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.capabilities.len()];
        for (dependent, deps) in upstream.iter().enumerate() {
            for &dep in deps {
                downstream[dep].push(dependent);
            }
        }

        let mut wave: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut levels = Vec::new();
        let mut placed = 0usize;

        while !wave.is_empty() {
            let mut next = BTreeSet::new();
            for &i in &wave {
                for &dependent in &downstream[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.insert(dependent);
                    }
                }
            }
            placed += wave.len();
            levels.push(wave.iter().map(|&i| &self.capabilities[i]).collect());
            wave = next;
        }

        if placed != self.capabilities.len() {
            let cycle = self.find_cycle(&upstream).unwrap_or_else(|| {
                self.capabilities
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| in_degree[*i] > 0)
                    .map(|(_, c)| c.name.clone())
                    .collect()
            });
            return Err(ConfigureError::CyclicDependency { cycle });
        }

        Ok(levels)
    }

    /// Direct dependencies of every capability as declaration indices.
    fn upstream_indices(&self) -> Result<Vec<BTreeSet<usize>>> {
        self.capabilities
            .iter()
            .map(|cap| {
                cap.dependencies
                    .iter()
                    .map(|dep| {
                        self.index
                            .get(dep)
                            .copied()
                            .ok_or_else(|| ConfigureError::UnknownDependency {
                                capability: cap.name.clone(),
                                dependency: dep.clone(),
                            })
                    })
                    .collect::<Result<BTreeSet<usize>>>()
            })
            .collect()
    }

    /// DFS along dependency edges; returns the first cycle found as a path
    /// that starts and ends at the same capability.
    fn find_cycle(&self, upstream: &[BTreeSet<usize>]) -> Option<Vec<String>> {
        let mut finished = HashSet::new();
        let mut path = Vec::new();
        for start in 0..self.capabilities.len() {
            if self.dfs_cycle(start, upstream, &mut finished, &mut path) {
                return Some(path.iter().map(|&i| self.capabilities[i].name.clone()).collect());
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: usize,
        upstream: &[BTreeSet<usize>],
        finished: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> bool {
        if let Some(pos) = path.iter().position(|&n| n == node) {
            path.drain(..pos);
            path.push(node);
            return true;
        }
        if finished.contains(&node) {
            return false;
        }
        path.push(node);
        for &dep in &upstream[node] {
            if self.dfs_cycle(dep, upstream, finished, path) {
                return true;
            }
        }
        path.pop();
        finished.insert(node);
        false
    }
}
