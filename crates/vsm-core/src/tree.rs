use vsm_lang::ast::Expr;

use crate::ruleset::RuleId;

// ---------------------------------------------------------------------------
// Node ids & kinds
// ---------------------------------------------------------------------------

/// Stable index into the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Monitor window attached to a condition: the inner condition must become
/// true before `start_ms` and stay true until `stop_ms`, both measured from
/// the moment the parent condition became true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    pub start_ms: u64,
    pub stop_ms: u64,
}

/// Outbound signal description carried by an `emit` node or an inline emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitSpec {
    pub signal: String,
    pub value: String,
    pub delay_ms: Option<u64>,
}

/// A condition node: compiled expression plus its runtime monitor state.
#[derive(Debug)]
pub struct ConditionNode {
    /// Verbatim condition text from the ruleset, used in log lines.
    pub source: String,
    pub expr: Expr,
    /// Signals referenced by the expression.
    pub signals: Vec<String>,
    /// The compiled rule built around this condition.
    pub rule: Option<RuleId>,
    pub monitor: Option<MonitorWindow>,
    // runtime fields
    pub met: bool,
    pub monitor_init_ms: Option<u64>,
    /// True while start/stop timers are outstanding for this node.
    pub timers_armed: bool,
    /// Bumped on every arm; stale timer callbacks carry an old epoch and
    /// are ignored.
    pub monitor_epoch: u64,
}

#[derive(Debug)]
pub enum NodeKind {
    Root,
    /// Groups the children of one ruleset list item.
    Block,
    Parallel,
    /// Sequence wrapper; `next_block` is the index of the block whose
    /// condition is currently allowed to run.
    Sequence { next_block: usize },
    Condition(Box<ConditionNode>),
    Emit(EmitSpec),
}

#[derive(Debug)]
pub struct TreeNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

// ---------------------------------------------------------------------------
// RuleTree — arena of nodes
// ---------------------------------------------------------------------------

/// The parsed ruleset as a rooted tree.
///
/// Nodes live in an arena and refer to each other by [`NodeId`], so parent
/// links are plain indices rather than cyclic references.
#[derive(Debug)]
pub struct RuleTree {
    nodes: Vec<TreeNode>,
}

impl Default for RuleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTree {
    pub fn new() -> Self {
        let root = TreeNode {
            id: NodeId(0),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Root,
        };
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append a new node under `parent` and return its id.
    pub fn add_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            id,
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0]
    }

    pub fn condition(&self, id: NodeId) -> Option<&ConditionNode> {
        match &self.node(id).kind {
            NodeKind::Condition(c) => Some(c),
            _ => None,
        }
    }

    pub fn condition_mut(&mut self, id: NodeId) -> Option<&mut ConditionNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::Condition(c) => Some(c),
            _ => None,
        }
    }

    fn is_wrapper(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).kind,
            NodeKind::Parallel | NodeKind::Sequence { .. }
        )
    }

    /// All children of `id`'s parent except `id` itself.
    pub fn siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.node(id).parent {
            Some(parent) => self
                .node(parent)
                .children
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect(),
            None => Vec::new(),
        }
    }

    // -- Subconditions -------------------------------------------------------

    /// Conditions governed by the condition `id`.
    ///
    /// Subconditions are not direct descendants: they are the condition
    /// grandchildren of a sibling `parallel`/`sequence` wrapper, found via
    /// the wrapper's single block child, and so on recursively.
    pub fn subconditions(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !matches!(self.node(id).kind, NodeKind::Condition(_)) {
            return out;
        }
        for sibling in self.siblings(id) {
            if !self.is_wrapper(sibling) {
                continue;
            }
            let Some(&block) = self.node(sibling).children.first() else {
                continue;
            };
            for &grandchild in &self.node(block).children {
                if matches!(self.node(grandchild).kind, NodeKind::Condition(_)) {
                    out.push(grandchild);
                    out.extend(self.subconditions(grandchild));
                }
            }
        }
        out
    }

    // -- Ancestor conditions -------------------------------------------------

    /// Conditions governing `id`, nearest first, excluding `id` itself.
    ///
    /// Walking up from a wrapper node jumps to the wrapper's sibling
    /// conditions: inside a `parallel`/`sequence` block the governing
    /// condition is the wrapper's sibling, not its ancestor.
    pub fn ancestor_conditions(&self, id: NodeId) -> Vec<NodeId> {
        if !matches!(self.node(id).kind, NodeKind::Condition(_)) || self.node(id).parent.is_none() {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.collect_ancestor_conditions(id, &mut out);
        out.retain(|&n| n != id);
        out
    }

    fn collect_ancestor_conditions(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if matches!(self.node(id).kind, NodeKind::Condition(_)) {
            out.push(id);
        }
        let Some(parent) = self.node(id).parent else {
            return;
        };
        if self.is_wrapper(parent) {
            for parent_sibling in self.siblings(parent) {
                if matches!(self.node(parent_sibling).kind, NodeKind::Condition(_)) {
                    self.collect_ancestor_conditions(parent_sibling, out);
                }
            }
        } else {
            self.collect_ancestor_conditions(parent, out);
        }
    }

    // -- Rule lookup ---------------------------------------------------------

    /// Condition nodes whose compiled rule is `rule`.
    pub fn conditions_by_rule(&self, rule: RuleId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| match &n.kind {
                NodeKind::Condition(c) => c.rule == Some(rule),
                _ => false,
            })
            .map(|n| n.id)
            .collect()
    }

    // -- Sequence gating -----------------------------------------------------

    /// The `sequence` grandparent of a condition node, if any.
    pub fn sequence_grandparent(&self, id: NodeId) -> Option<NodeId> {
        if !matches!(self.node(id).kind, NodeKind::Condition(_)) {
            return None;
        }
        let block = self.node(id).parent?;
        let grandparent = self.node(block).parent?;
        match self.node(grandparent).kind {
            NodeKind::Sequence { .. } => Some(grandparent),
            _ => None,
        }
    }

    /// True when `id` is the condition of the sequence's current block.
    pub fn is_sequence_next(&self, id: NodeId) -> bool {
        let Some(seq) = self.sequence_grandparent(id) else {
            return false;
        };
        let NodeKind::Sequence { next_block } = self.node(seq).kind else {
            return false;
        };
        let Some(&block) = self.node(seq).children.get(next_block) else {
            return false;
        };
        self.node(block)
            .children
            .iter()
            .find(|&&c| matches!(self.node(c).kind, NodeKind::Condition(_)))
            == Some(&id)
    }

    /// True when `id` sits under a sequence whose turn has not come up.
    pub fn is_sequence_blocked(&self, id: NodeId) -> bool {
        self.sequence_grandparent(id).is_some() && !self.is_sequence_next(id)
    }

    /// Advance the enclosing sequence past `id`, wrapping modulo the block
    /// count. No-op unless `id` is currently sequence-next.
    pub fn sequence_advance(&mut self, id: NodeId) {
        if !self.is_sequence_next(id) {
            return;
        }
        let Some(seq) = self.sequence_grandparent(id) else {
            return;
        };
        let block_count = self.node(seq).children.len();
        if let NodeKind::Sequence { next_block } = &mut self.node_mut(seq).kind {
            *next_block = (*next_block + 1) % block_count.max(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(source: &str) -> NodeKind {
        NodeKind::Condition(Box::new(ConditionNode {
            source: source.to_string(),
            expr: Expr::Bool(true),
            signals: vec![],
            rule: None,
            monitor: None,
            met: false,
            monitor_init_ms: None,
            timers_armed: false,
            monitor_epoch: 0,
        }))
    }

    /// root → block → [condition A, parallel → block → condition B]
    fn parent_child_tree() -> (RuleTree, NodeId, NodeId) {
        let mut tree = RuleTree::new();
        let root = tree.root();
        let block = tree.add_child(root, NodeKind::Block);
        let wrapper = tree.add_child(block, NodeKind::Parallel);
        let cond_a = tree.add_child(block, condition("A"));
        let inner_block = tree.add_child(wrapper, NodeKind::Block);
        let cond_b = tree.add_child(inner_block, condition("B"));
        (tree, cond_a, cond_b)
    }

    #[test]
    fn subconditions_found_through_sibling_wrapper() {
        let (tree, cond_a, cond_b) = parent_child_tree();
        assert_eq!(tree.subconditions(cond_a), vec![cond_b]);
        assert!(tree.subconditions(cond_b).is_empty());
    }

    #[test]
    fn ancestor_walk_jumps_to_wrapper_sibling_condition() {
        let (tree, cond_a, cond_b) = parent_child_tree();
        assert_eq!(tree.ancestor_conditions(cond_b), vec![cond_a]);
        assert!(tree.ancestor_conditions(cond_a).is_empty());
    }

    #[test]
    fn nested_wrappers_collect_recursively() {
        // A ∥ [ B, sequence [ D ] ] — B and D are subconditions of A,
        // and A is an ancestor of D via two wrapper hops.
        let mut tree = RuleTree::new();
        let root = tree.root();
        let block = tree.add_child(root, NodeKind::Block);
        let cond_a = tree.add_child(block, condition("A"));
        let par = tree.add_child(block, NodeKind::Parallel);
        let par_block = tree.add_child(par, NodeKind::Block);
        let cond_b = tree.add_child(par_block, condition("B"));
        let seq = tree.add_child(par_block, NodeKind::Sequence { next_block: 0 });
        let seq_block = tree.add_child(seq, NodeKind::Block);
        let cond_d = tree.add_child(seq_block, condition("D"));

        assert_eq!(tree.subconditions(cond_a), vec![cond_b, cond_d]);
        assert_eq!(tree.ancestor_conditions(cond_d), vec![cond_b, cond_a]);
    }

    /// root → block → sequence → [block → condition P, block → condition I]
    fn sequence_tree() -> (RuleTree, NodeId, NodeId) {
        let mut tree = RuleTree::new();
        let root = tree.root();
        let outer = tree.add_child(root, NodeKind::Block);
        let seq = tree.add_child(outer, NodeKind::Sequence { next_block: 0 });
        let b0 = tree.add_child(seq, NodeKind::Block);
        let cond_p = tree.add_child(b0, condition("P"));
        let b1 = tree.add_child(seq, NodeKind::Block);
        let cond_i = tree.add_child(b1, condition("I"));
        (tree, cond_p, cond_i)
    }

    #[test]
    fn sequence_gating_blocks_out_of_order_condition() {
        let (tree, cond_p, cond_i) = sequence_tree();
        assert!(tree.is_sequence_next(cond_p));
        assert!(!tree.is_sequence_next(cond_i));
        assert!(tree.is_sequence_blocked(cond_i));
        assert!(!tree.is_sequence_blocked(cond_p));
    }

    #[test]
    fn sequence_advance_wraps_modulo_block_count() {
        let (mut tree, cond_p, cond_i) = sequence_tree();
        tree.sequence_advance(cond_p);
        assert!(tree.is_sequence_next(cond_i));
        tree.sequence_advance(cond_i);
        // wrapped back to the first block — sequences are cyclic
        assert!(tree.is_sequence_next(cond_p));
    }

    #[test]
    fn sequence_advance_ignores_blocked_condition() {
        let (mut tree, cond_p, cond_i) = sequence_tree();
        tree.sequence_advance(cond_i);
        assert!(tree.is_sequence_next(cond_p));
    }

    #[test]
    fn conditions_outside_sequences_are_never_blocked() {
        let (tree, cond_a, cond_b) = parent_child_tree();
        assert!(!tree.is_sequence_blocked(cond_a));
        assert!(!tree.is_sequence_blocked(cond_b));
    }
}
