//! Container dependency graph: link resolution, restart closure and the
//! order containers are replaced in.
//!
//! An edge `a -> b` means "`a` depends on `b`": `b` is replaced first and
//! `a` must be restarted whenever `b` is.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};

use crate::container::Container;

/// Resolved dependency edges, indexed like the container slice they were
/// built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    depends_on: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Resolves every container's links. A compose service name resolves
    /// to all of its replicas.
    pub fn build(containers: &[Container]) -> Self {
        let mut by_identity: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, container) in containers.iter().enumerate() {
            for identity in container.identities() {
                let indices = by_identity.entry(identity).or_default();
                if !indices.contains(&index) {
                    indices.push(index);
                }
            }
        }

        let depends_on = containers
            .iter()
            .enumerate()
            .map(|(index, container)| {
                let project = container.compose_identity().map(|c| c.project);
                let mut targets = Vec::new();
                for link in container.links() {
                    let name = link.trim_start_matches('/');
                    let qualified = project.as_ref().map(|p| format!("{}-{}", p, name));
                    let resolved = by_identity
                        .get(name)
                        .or_else(|| qualified.as_ref().and_then(|q| by_identity.get(q)));
                    let Some(resolved) = resolved else {
                        debug!("{} links to unknown container {}", container.name(), name);
                        continue;
                    };
                    for &target in resolved {
                        if target != index && !targets.contains(&target) {
                            targets.push(target);
                        }
                    }
                }
                targets
            })
            .collect();

        Self { depends_on }
    }

    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.depends_on[index]
    }

    /// Every container that transitively depends on one in `roots`.
    pub fn dependents_closure(&self, roots: &[usize]) -> Vec<usize> {
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.depends_on.len()];
        for (from, targets) in self.depends_on.iter().enumerate() {
            for &to in targets {
                dependents[to].push(from);
            }
        }

        let mut reached = vec![false; self.depends_on.len()];
        let mut queue: VecDeque<usize> = roots.iter().copied().collect();
        for &root in roots {
            reached[root] = true;
        }
        while let Some(next) = queue.pop_front() {
            for &dependent in &dependents[next] {
                if !reached[dependent] {
                    reached[dependent] = true;
                    queue.push_back(dependent);
                }
            }
        }
        (0..reached.len()).filter(|&i| reached[i]).collect()
    }

    /// Indices ordered so every container comes after everything it
    /// depends on. Cycle members keep input order and are logged.
    pub fn sorted(&self, containers: &[Container]) -> Vec<usize> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }

        fn visit(
            index: usize,
            graph: &DependencyGraph,
            containers: &[Container],
            marks: &mut [Mark],
            order: &mut Vec<usize>,
        ) {
            match marks[index] {
                Mark::Done => return,
                Mark::Visiting => {
                    warn!(
                        "Dependency cycle involving {}, replacing in listing order",
                        containers[index].name()
                    );
                    return;
                }
                Mark::New => {}
            }
            marks[index] = Mark::Visiting;
            for &dependency in graph.dependencies(index) {
                visit(dependency, graph, containers, marks, order);
            }
            marks[index] = Mark::Done;
            order.push(index);
        }

        let mut marks = vec![Mark::New; containers.len()];
        let mut order = Vec::with_capacity(containers.len());
        for index in 0..containers.len() {
            visit(index, self, containers, &mut marks, &mut order);
        }
        order
    }
}

/// Marks every container depending on a stale one as linked-to-restarting.
pub fn mark_linked_to_restarting(containers: &mut [Container], graph: &DependencyGraph) {
    let stale: Vec<usize> = containers
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_stale())
        .map(|(i, _)| i)
        .collect();
    for index in graph.dependents_closure(&stale) {
        let container = &mut containers[index];
        if !container.is_stale() {
            debug!(
                "{} will be restarted because a dependency is updated",
                container.name()
            );
            container.mark_linked_to_restarting();
        }
    }
}
