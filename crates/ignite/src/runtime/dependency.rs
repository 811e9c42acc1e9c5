//! Dependency graph construction and layered topological sorting

use indexmap::{IndexMap, IndexSet};

/// Dependency graph for the members of one group
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Member name -> direct dependencies, in declaration order
    nodes: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    /// Build a dependency graph, checking that every dependency is a known node
    pub fn new<I, N, D>(nodes: I) -> Result<Self, DependencyError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let nodes: IndexMap<String, IndexSet<String>> = nodes
            .into_iter()
            .map(|(name, deps)| (name.into(), deps.into_iter().map(Into::into).collect()))
            .collect();

        for (name, deps) in &nodes {
            for dep in deps {
                if !nodes.contains_key(dep) {
                    return Err(DependencyError::UnknownDependency {
                        node: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self { nodes })
    }

    /// Group nodes into layers: every node's dependencies live in earlier layers.
    ///
    /// Within a layer nodes keep declaration order.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, DependencyError> {
        let mut sequenced: IndexSet<&str> = IndexSet::with_capacity(self.nodes.len());
        let mut layers = Vec::new();

        while sequenced.len() < self.nodes.len() {
            let layer: Vec<&str> = self
                .nodes
                .iter()
                .filter(|(name, _)| !sequenced.contains(name.as_str()))
                .filter(|(_, deps)| deps.iter().all(|dep| sequenced.contains(dep.as_str())))
                .map(|(name, _)| name.as_str())
                .collect();

            if layer.is_empty() {
                // Nothing is ready but nodes remain: they sit on or behind a cycle
                let cycle_nodes: Vec<String> = self
                    .nodes
                    .keys()
                    .filter(|name| !sequenced.contains(name.as_str()))
                    .cloned()
                    .collect();

                return Err(DependencyError::CyclicDependency(cycle_nodes));
            }

            sequenced.extend(layer.iter().copied());
            layers.push(layer.into_iter().map(str::to_string).collect());
        }

        Ok(layers)
    }

    /// Flattened layers: the startup order
    pub fn startup_sequence(&self) -> Result<Vec<String>, DependencyError> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Program '{node}' depends on undefined program '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("Cyclic dependency detected involving programs: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}
