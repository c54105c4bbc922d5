// src/core/graph.rs

//! # Dependency Graph
//!
//! A small directed graph whose edges mean "must run before". Vertices keep
//! their insertion order so that every traversal, and therefore every serial
//! configure run, is deterministic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

/// The graph does not admit a topological order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle detected through {} vertices", .members.len())]
pub struct CycleError<V: Debug> {
    /// The vertices of one concrete cycle, in edge order.
    pub members: Vec<V>,
}

/// A directed graph over copyable vertex ids.
#[derive(Debug, Clone)]
pub struct DependencyGraph<V> {
    vertices: Vec<V>,
    /// vertex -> the vertices that depend on it.
    out_edges: HashMap<V, Vec<V>>,
    /// vertex -> the vertices it depends on.
    in_edges: HashMap<V, Vec<V>>,
}

impl<V> Default for DependencyGraph<V> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
        }
    }
}

impl<V: Copy + Eq + Hash + Debug> DependencyGraph<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `vertex` if it is not already present.
    pub fn add_vertex(&mut self, vertex: V) {
        if self.out_edges.contains_key(&vertex) {
            return;
        }
        self.vertices.push(vertex);
        self.out_edges.insert(vertex, Vec::new());
        self.in_edges.insert(vertex, Vec::new());
    }

    /// Records that every vertex in `dependencies` must run before `dependent`.
    /// Missing vertices are added; repeated edges collapse.
    pub fn add_edges(&mut self, dependent: V, dependencies: &[V]) {
        self.add_vertex(dependent);
        for &dependency in dependencies {
            self.add_vertex(dependency);
            let outs = self.out_edges.entry(dependency).or_default();
            if !outs.contains(&dependent) {
                outs.push(dependent);
            }
            let ins = self.in_edges.entry(dependent).or_default();
            if !ins.contains(&dependency) {
                ins.push(dependency);
            }
        }
    }

    pub fn contains(&self, vertex: V) -> bool {
        self.out_edges.contains_key(&vertex)
    }

    /// All vertices, in insertion order.
    pub fn vertices(&self) -> &[V] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// The vertices that depend on `vertex`.
    pub fn out_edges(&self, vertex: V) -> &[V] {
        self.out_edges.get(&vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The vertices `vertex` depends on.
    pub fn in_edges(&self, vertex: V) -> &[V] {
        self.in_edges.get(&vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Vertices with no dependencies: the initial execution frontier.
    pub fn roots(&self) -> Vec<V> {
        self.vertices
            .iter()
            .copied()
            .filter(|v| self.in_edges(*v).is_empty())
            .collect()
    }

    /// Returns an order in which every dependency precedes its dependents.
    ///
    /// Kahn's algorithm seeded with the roots in insertion order, so the result
    /// is stable for a given construction sequence.
    pub fn topological_sort(&self) -> Result<Vec<V>, CycleError<V>> {
        let mut remaining: HashMap<V, usize> = self
            .vertices
            .iter()
            .map(|v| (*v, self.in_edges(*v).len()))
            .collect();
        let mut ready: VecDeque<V> = self.roots().into();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(vertex) = ready.pop_front() {
            order.push(vertex);
            for &dependent in self.out_edges(vertex) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() == self.vertices.len() {
            return Ok(order);
        }

        let blocked: HashSet<V> = self
            .vertices
            .iter()
            .copied()
            .filter(|v| remaining.get(v).is_some_and(|c| *c > 0))
            .collect();
        Err(CycleError {
            members: self.find_cycle(&blocked),
        })
    }

    /// Returns `start` followed by every vertex that transitively depends on it.
    pub fn depth_first_visit(&self, start: V) -> Vec<V> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(vertex) = stack.pop() {
            if !self.contains(vertex) || !visited.insert(vertex) {
                continue;
            }
            order.push(vertex);
            // Reverse so that dependents are visited in insertion order.
            stack.extend(self.out_edges(vertex).iter().rev().copied());
        }
        order
    }

    /// Walks dependency edges inside `blocked` (every vertex there has an
    /// unresolved dependency also in `blocked`) until a vertex repeats.
    fn find_cycle(&self, blocked: &HashSet<V>) -> Vec<V> {
        let Some(&start) = self.vertices.iter().find(|v| blocked.contains(v)) else {
            return Vec::new();
        };
        let mut path: Vec<V> = Vec::new();
        let mut current = start;
        loop {
            if let Some(position) = path.iter().position(|v| *v == current) {
                let mut cycle = path.split_off(position);
                // Report in "runs before" order.
                cycle.reverse();
                return cycle;
            }
            path.push(current);
            match self.in_edges(current).iter().find(|d| blocked.contains(d)) {
                Some(&next) => current = next,
                None => return path,
            }
        }
    }
}
