use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

/// Dependency edges `dependent → dependency`, indexed by dependency.
///
/// Edges stay registered after an invalidation, so a dependent that is
/// written again later without dependencies is still cascaded to.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependents: RwLock<HashMap<String, HashSet<String>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `dependent` as depending on each of `dependencies`.
    pub fn add<I, S>(&self, dependent: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = self
            .dependents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for dep in dependencies {
            map.entry(dep.as_ref().to_string())
                .or_default()
                .insert(dependent.to_string());
        }
    }

    /// Direct dependents of `key`.
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        let map = self
            .dependents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out: Vec<String> = map
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// `root` followed by every transitive dependent, breadth first, each once.
    pub fn cascade(&self, root: &str) -> Vec<String> {
        let map = self
            .dependents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key) {
                continue;
            }
            order.push(key.to_string());
            if let Some(next) = map.get(key) {
                let mut next: Vec<&str> = next.iter().map(String::as_str).collect();
                next.sort_unstable();
                queue.extend(next.into_iter().filter(|k| !visited.contains(k)));
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.dependents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(HashSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
