//! Transition graph analysis.
//!
//! Uses `petgraph` to model states as nodes and every possible transition
//! (`Next`, choice targets, `Default`, catcher targets) as edges. Cycles are
//! legal, so the analysis only reports: states that can never be entered,
//! and strongly connected components that form loops.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::model::{Definition, StateKind};

/// Structural findings about a definition and its branches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphReport {
    /// States not reachable from `StartAt`. Branch states are qualified
    /// with the branch name (`Outer/Parallel[0]/State`).
    pub unreachable: Vec<String>,
    /// Groups of states that can transition back to themselves.
    pub loops: Vec<Vec<String>>,
}

impl GraphReport {
    pub fn is_clean(&self) -> bool {
        self.unreachable.is_empty()
    }
}

/// Analyze a definition and, recursively, every `Parallel` branch.
pub fn analyze(definition: &Definition) -> GraphReport {
    let mut report = GraphReport::default();
    analyze_scope(definition, None, &mut report);
    report
}

fn analyze_scope(definition: &Definition, qualifier: Option<&str>, report: &mut GraphReport) {
    let qualify = |name: &str| match qualifier {
        Some(scope) => format!("{scope}/{name}"),
        None => name.to_string(),
    };

    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, NodeIndex> = definition
        .states
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();

    for (name, state) in &definition.states {
        for target in state.targets() {
            // Targets were validated at compile time; a miss here means a
            // hand-built definition and is simply skipped.
            if let Some(&to) = nodes.get(target) {
                graph.add_edge(nodes[name.as_str()], to, ());
            }
        }
    }

    if let Some(&start) = nodes.get(definition.start_at.as_str()) {
        let mut reached = vec![false; graph.node_count()];
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            reached[node.index()] = true;
        }
        for node in graph.node_indices() {
            if !reached[node.index()] {
                report.unreachable.push(qualify(graph[node]));
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let is_loop = component.len() > 1
            || component
                .first()
                .is_some_and(|&node| graph.contains_edge(node, node));
        if is_loop {
            let mut names: Vec<String> = component.iter().map(|&n| qualify(graph[n])).collect();
            names.sort();
            report.loops.push(names);
        }
    }
    report.loops.sort();

    for state in definition.states.values() {
        if let StateKind::Parallel(parallel) = &state.kind {
            for (index, branch) in parallel.branches.iter().enumerate() {
                let scope = qualify(&format!("{}[{index}]", state.name));
                analyze_scope(branch, Some(&scope), report);
            }
        }
    }
}
