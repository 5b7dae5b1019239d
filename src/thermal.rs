//! Thermal master/slave aggregation.
//!
//! A slave receiver searches its platform's part graph for a nearby master
//! thermal receiver and registers with it. Each tick the master folds the
//! slaves' provided thermal power into its own available power, draws from
//! the pool on their behalf and hands its supply ratio back to them.

use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};

use crate::error::{BeamError, BeamResult};
use crate::network::ReceiverId;
use crate::receiver::Receiver;

pub const MAX_THERMAL_SLAVES: usize = 8;
const MAX_SEARCH_QUEUE: usize = 64;

/// How a part hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachKind {
    #[default]
    Stack,
    Surface,
}

/// Link budgets for the master search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDepth {
    pub stack: u8,
    pub parent: u8,
    pub surface: u8,
}

impl Default for SearchDepth {
    fn default() -> Self {
        Self {
            stack: 4,
            parent: 2,
            surface: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartNode {
    pub name: String,
    pub parent: Option<usize>,
    pub attach: AttachKind,
}

/// Parts of one platform as a tree; index 0 is the root.
#[derive(Debug, Clone, Default)]
pub struct PartGraph {
    parts: alloc::vec::Vec<PartNode>,
}

impl PartGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&mut self, name: &str, parent: Option<usize>, attach: AttachKind) -> BeamResult<usize> {
        if let Some(p) = parent {
            if p >= self.parts.len() {
                return Err(BeamError::config(format!("part '{name}' has unknown parent {p}")));
            }
        }
        self.parts.push(PartNode {
            name: name.into(),
            parent,
            attach,
        });
        Ok(self.parts.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part(&self, index: usize) -> Option<&PartNode> {
        self.parts.get(index)
    }

    fn children(&self, index: usize) -> impl Iterator<Item = (usize, &PartNode)> {
        self.parts
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.parent == Some(index))
    }
}

#[derive(Debug, Clone, Copy)]
struct SearchNode {
    part: usize,
    stack: u8,
    parent: u8,
    surface: u8,
}

/// Bounded breadth-first search from `start`.
///
/// Crossing a stack joint spends stack budget, climbing a surface joint to
/// the parent spends parent budget, descending into surface-attached
/// children spends surface budget.
pub fn breadth_first_search<F>(
    graph: &PartGraph,
    start: usize,
    depth: SearchDepth,
    skip_start: bool,
    mut predicate: F,
) -> Option<usize>
where
    F: FnMut(usize) -> bool,
{
    if start >= graph.len() {
        return None;
    }

    let mut visited = alloc::vec![false; graph.len()];
    let mut queue: Deque<SearchNode, MAX_SEARCH_QUEUE> = Deque::new();
    visited[start] = true;
    let _ = queue.push_back(SearchNode {
        part: start,
        stack: depth.stack,
        parent: depth.parent,
        surface: depth.surface,
    });

    while let Some(node) = queue.pop_front() {
        if !(skip_start && node.part == start) && predicate(node.part) {
            return Some(node.part);
        }

        let mut next: Vec<SearchNode, MAX_SEARCH_QUEUE> = Vec::new();
        if let Some(parent) = graph.parts[node.part].parent {
            let step = match graph.parts[node.part].attach {
                AttachKind::Stack if node.stack > 0 => Some(SearchNode { part: parent, stack: node.stack - 1, ..node }),
                AttachKind::Surface if node.parent > 0 => Some(SearchNode { part: parent, parent: node.parent - 1, ..node }),
                _ => None,
            };
            if let Some(step) = step {
                let _ = next.push(step);
            }
        }
        for (child, child_node) in graph.children(node.part) {
            let step = match child_node.attach {
                AttachKind::Stack if node.stack > 0 => Some(SearchNode { part: child, stack: node.stack - 1, ..node }),
                AttachKind::Surface if node.surface > 0 => Some(SearchNode { part: child, surface: node.surface - 1, ..node }),
                _ => None,
            };
            if let Some(step) = step {
                let _ = next.push(step);
            }
        }

        for step in next {
            if visited[step.part] {
                continue;
            }
            visited[step.part] = true;
            if queue.push_back(step).is_err() {
                break;
            }
        }
    }
    None
}

/// Master/slave bookkeeping carried by every receiver.
#[derive(Debug, Clone, Default)]
pub struct ThermalLink {
    master: Option<ReceiverId>,
    slaves: Vec<ReceiverId, MAX_THERMAL_SLAVES>,
    slaves_power: f64,
}

impl ThermalLink {
    pub fn master(&self) -> Option<ReceiverId> {
        self.master
    }

    pub fn set_master(&mut self, master: Option<ReceiverId>) {
        self.master = master;
    }

    pub fn slaves(&self) -> &[ReceiverId] {
        &self.slaves
    }

    pub fn has_slaves(&self) -> bool {
        !self.slaves.is_empty()
    }

    pub fn register_slave(&mut self, slave: ReceiverId) -> BeamResult<()> {
        if self.slaves.contains(&slave) {
            return Ok(());
        }
        self.slaves.push(slave).map_err(|_| BeamError::CapacityExceeded {
            what: "thermal slave list",
            capacity: MAX_THERMAL_SLAVES,
        })
    }

    pub fn unregister_slave(&mut self, slave: ReceiverId) {
        self.slaves.retain(|s| *s != slave);
    }

    /// Thermal power the slaves contributed on the last tick.
    pub fn slaves_power(&self) -> f64 {
        self.slaves_power
    }

    pub(crate) fn set_slaves_power(&mut self, power: f64) {
        self.slaves_power = power;
    }
}

/// Sums `thermal_power_provided` over the master's registered slaves.
pub fn collect_slaves_power(master: &Receiver, receivers: &[Option<Receiver>]) -> f64 {
    master
        .thermal_link()
        .slaves()
        .iter()
        .filter_map(|id| receivers.get(id.index()).and_then(Option::as_ref))
        .filter(|slave| slave.is_enabled())
        .map(|slave| slave.output().thermal_power_provided)
        .sum()
}

/// Looks for a master for `slave` among `receivers` on the same platform.
pub fn find_thermal_master(
    graph: &PartGraph,
    slave: &Receiver,
    receivers: &[Option<Receiver>],
) -> Option<ReceiverId> {
    let candidate_on = |part: usize| {
        receivers.iter().flatten().find(|r| {
            r.id() != slave.id()
                && r.platform() == slave.platform()
                && r.part() == part
                && r.config().is_thermal_receiver
                && !r.config().is_thermal_slave
        })
    };

    let part = breadth_first_search(graph, slave.part(), slave.config().thermal_search, false, |part| {
        candidate_on(part).is_some()
    })?;
    candidate_on(part).map(Receiver::id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(len: usize, attach: AttachKind) -> PartGraph {
        let mut graph = PartGraph::new();
        graph.add_part("root", None, AttachKind::Stack).unwrap();
        for i in 1..len {
            graph.add_part("segment", Some(i - 1), attach).unwrap();
        }
        graph
    }

    #[test]
    fn test_stack_budget_limits_reach() {
        let graph = chain(7, AttachKind::Stack);
        let depth = SearchDepth::default();
        assert_eq!(breadth_first_search(&graph, 6, depth, true, |p| p == 2), Some(2));
        assert_eq!(breadth_first_search(&graph, 6, depth, true, |p| p == 1), None);
    }

    #[test]
    fn test_surface_parent_budget() {
        let graph = chain(4, AttachKind::Surface);
        let depth = SearchDepth::default();
        // climbing surface joints spends parent budget (2)
        assert_eq!(breadth_first_search(&graph, 3, depth, true, |p| p == 1), Some(1));
        assert_eq!(breadth_first_search(&graph, 3, depth, true, |p| p == 0), None);
        // descending spends surface budget (2)
        assert_eq!(breadth_first_search(&graph, 0, depth, true, |p| p == 2), Some(2));
        assert_eq!(breadth_first_search(&graph, 0, depth, true, |p| p == 3), None);
    }

    #[test]
    fn test_skip_start() {
        let graph = chain(2, AttachKind::Stack);
        let depth = SearchDepth::default();
        assert_eq!(breadth_first_search(&graph, 0, depth, false, |_| true), Some(0));
        assert_eq!(breadth_first_search(&graph, 0, depth, true, |_| true), Some(1));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut graph = PartGraph::new();
        assert!(graph.add_part("orphan", Some(3), AttachKind::Stack).is_err());
    }

    #[test]
    fn test_slave_registration_is_idempotent_and_bounded() {
        let mut link = ThermalLink::default();
        link.register_slave(ReceiverId(1)).unwrap();
        link.register_slave(ReceiverId(1)).unwrap();
        assert_eq!(link.slaves().len(), 1);
        for i in 2..=MAX_THERMAL_SLAVES as u32 {
            link.register_slave(ReceiverId(i)).unwrap();
        }
        assert!(link.register_slave(ReceiverId(99)).is_err());
        link.unregister_slave(ReceiverId(1));
        assert_eq!(link.slaves().len(), MAX_THERMAL_SLAVES - 1);
    }
}
