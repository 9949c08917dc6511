//! Full-tree consistency audit.
//!
//! Intended for periodic operational checks, not the placement hot path:
//! it scans every node and reports each broken linkage invariant it finds.

use crate::error::Result;
use crate::node::{Node, NodeId, NodeSide, Side};
use crate::store::TreeStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of an integrity scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub nodes_scanned: usize,
}

/// Scan the whole store and enumerate invariant violations.
pub fn check_integrity<S: TreeStore + ?Sized>(store: &S) -> Result<IntegrityReport> {
    let nodes = store.scan()?;
    let mut errors = Vec::new();

    let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
    let roots: Vec<&Node> = nodes.iter().filter(|n| n.parent_id.is_none()).collect();

    if !nodes.is_empty() && roots.is_empty() {
        errors.push("tree has no root node".to_string());
    }
    if roots.len() > 1 {
        let ids: Vec<String> = roots.iter().map(|n| n.id.to_string()).collect();
        errors.push(format!("tree has {} roots: {}", roots.len(), ids.join(", ")));
    }

    let mut users: HashMap<&str, NodeId> = HashMap::new();
    let mut codes: HashMap<&str, NodeId> = HashMap::new();

    for node in &nodes {
        if let Some(other) = users.insert(node.user_id.as_str(), node.id) {
            errors.push(format!(
                "user {:?} owns both {} and {}",
                node.user_id, other, node.id
            ));
        }
        if let Some(other) = codes.insert(node.referral_code.as_str(), node.id) {
            errors.push(format!(
                "referral code {:?} owned by both {} and {}",
                node.referral_code, other, node.id
            ));
        }

        check_upward(node, &by_id, &mut errors);
        check_downward(node, &by_id, &mut errors);
    }

    if let [root] = roots.as_slice() {
        let reachable = reachable_from(root.id, &by_id);
        if reachable < nodes.len() {
            errors.push(format!(
                "{} of {} nodes are unreachable from root {}",
                nodes.len() - reachable,
                nodes.len(),
                root.id
            ));
        }
    }

    Ok(IntegrityReport {
        valid: errors.is_empty(),
        errors,
        nodes_scanned: nodes.len(),
    })
}

/// Parent-facing invariants: parent exists, points back, level and side agree.
fn check_upward(node: &Node, by_id: &HashMap<NodeId, &Node>, errors: &mut Vec<String>) {
    let Some(parent_id) = node.parent_id else {
        if node.side != NodeSide::Root {
            errors.push(format!("root {} has side {}", node.id, node.side));
        }
        if node.level != 0 {
            errors.push(format!("root {} has level {}", node.id, node.level));
        }
        return;
    };

    let Some(parent) = by_id.get(&parent_id) else {
        errors.push(format!(
            "node {}: parent {} does not exist",
            node.id, parent_id
        ));
        return;
    };

    let Some(side) = node.side.side() else {
        errors.push(format!(
            "node {} has a parent {} but is marked root",
            node.id, parent_id
        ));
        return;
    };

    match parent.child_id(side) {
        Some(id) if id == node.id => {}
        Some(id) => errors.push(format!(
            "node {}: parent {} {} pointer is {}",
            node.id, parent_id, side, id
        )),
        None => errors.push(format!(
            "node {}: parent {} {} pointer is empty",
            node.id, parent_id, side
        )),
    }

    if node.level != parent.level + 1 {
        errors.push(format!(
            "node {}: level {} but parent {} is at level {}",
            node.id, node.level, parent_id, parent.level
        ));
    }
}

/// Child-facing invariants: each child pointer resolves and points back.
fn check_downward(node: &Node, by_id: &HashMap<NodeId, &Node>, errors: &mut Vec<String>) {
    if node.left_child_id.is_some() && node.left_child_id == node.right_child_id {
        errors.push(format!("node {}: both sides point at the same child", node.id));
    }

    for side in Side::BOTH {
        let Some(child_id) = node.child_id(side) else {
            continue;
        };
        match by_id.get(&child_id) {
            None => errors.push(format!(
                "node {}: {} child {} does not exist",
                node.id, side, child_id
            )),
            Some(child) => {
                if child.parent_id != Some(node.id) {
                    errors.push(format!(
                        "node {}: {} child {} has parent {:?}",
                        node.id,
                        side,
                        child_id,
                        child.parent_id.map(|p| p.value())
                    ));
                }
                if child.side != NodeSide::from(side) {
                    errors.push(format!(
                        "node {}: {} child {} is marked {}",
                        node.id, side, child_id, child.side
                    ));
                }
            }
        }
    }
}

fn reachable_from(root: NodeId, by_id: &HashMap<NodeId, &Node>) -> usize {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    seen.insert(root);

    while let Some(id) = queue.pop_front() {
        let Some(node) = by_id.get(&id) else { continue };
        for child in [node.left_child_id, node.right_child_id].into_iter().flatten() {
            if by_id.contains_key(&child) && seen.insert(child) {
                queue.push_back(child);
            }
        }
    }
    seen.len()
}
