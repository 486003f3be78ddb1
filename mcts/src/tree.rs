use generational_arena::{Arena, Index};

use crate::node::SearchNode;

/// Arena-backed search tree for one request. Parents are stored as arena
/// indices so child-to-parent references never form an ownership cycle.
/// The tree lives for a single request and is dropped with it.
#[derive(Debug)]
pub struct SearchTree {
    arena: Arena<SearchNode>,
    root: Index,
}

impl SearchTree {
    pub fn new(question: impl Into<String>) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(SearchNode::new(question.into(), None, None));

        Self { arena, root }
    }

    pub fn root(&self) -> Index {
        self.root
    }

    pub fn get(&self, node: Index) -> &SearchNode {
        &self.arena[node]
    }

    pub fn get_mut(&mut self, node: Index) -> &mut SearchNode {
        &mut self.arena[node]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Appends a child unless the parent already has one with the same
    /// state text. Returns the new child's index, or `None` when the state
    /// was a duplicate.
    pub fn add_child(&mut self, parent: Index, action: String, state: String) -> Option<Index> {
        let duplicate = self.arena[parent]
            .children()
            .iter()
            .any(|&child| self.arena[child].state() == state);

        if duplicate {
            return None;
        }

        let child = self
            .arena
            .insert(SearchNode::new(state, Some(action), Some(parent)));
        self.arena[parent].push_child(child);

        Some(child)
    }

    /// Adds `reward` to every node from `node` up to the root, inclusive,
    /// incrementing each visit count once.
    pub fn backpropagate(&mut self, node: Index, reward: f32) {
        let mut current = Some(node);

        while let Some(index) = current {
            let node = &mut self.arena[index];
            node.apply_reward(reward);
            current = node.parent();
        }
    }

    /// All root-to-leaf paths rendered as trajectory text, via iterative
    /// depth-first traversal.
    pub fn trajectories(&self) -> Vec<String> {
        let mut trajectories = Vec::new();
        let mut stack = vec![(self.root, String::new())];

        while let Some((index, path)) = stack.pop() {
            let node = &self.arena[index];

            if node.children().is_empty() {
                trajectories.push(format!("{}{}", path, node.state()));
            } else {
                for &child in node.children() {
                    let action = self.arena[child].action().unwrap_or_default();
                    stack.push((child, format!("{}{} -> {}: ", path, node.state(), action)));
                }
            }
        }

        trajectories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_has_no_parent_or_action() {
        let tree = SearchTree::new("question");
        let root = tree.get(tree.root());

        assert_eq!(root.state(), "question");
        assert!(root.action().is_none());
        assert!(root.parent().is_none());
        assert_eq!(root.visits(), 0);
        assert_eq!(root.value(), 0.0);
    }

    #[test]
    fn test_add_child_rejects_duplicate_states() {
        let mut tree = SearchTree::new("q");
        let root = tree.root();

        let first = tree.add_child(root, "a".to_string(), "s1".to_string());
        assert!(first.is_some());

        let duplicate = tree.add_child(root, "b".to_string(), "s1".to_string());
        assert!(duplicate.is_none());

        let second = tree.add_child(root, "b".to_string(), "s2".to_string());
        assert!(second.is_some());
        assert_eq!(tree.get(root).children().len(), 2);
    }

    #[test]
    fn test_backpropagate_updates_every_ancestor_once() {
        let mut tree = SearchTree::new("q");
        let root = tree.root();
        let child = tree.add_child(root, "a".to_string(), "s1".to_string()).unwrap();
        let grandchild = tree
            .add_child(child, "b".to_string(), "s2".to_string())
            .unwrap();

        tree.backpropagate(grandchild, 0.5);
        tree.backpropagate(child, 0.25);

        assert_eq!(tree.get(grandchild).visits(), 1);
        assert_eq!(tree.get(child).visits(), 2);
        assert_eq!(tree.get(root).visits(), 2);
        assert!((tree.get(root).value() - 0.75).abs() < f32::EPSILON);
        assert!((tree.get(child).value() - 0.75).abs() < f32::EPSILON);
        assert!((tree.get(grandchild).value() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mean_value_bounded_by_max_reward() {
        let mut tree = SearchTree::new("q");
        let root = tree.root();
        let child = tree.add_child(root, "a".to_string(), "s1".to_string()).unwrap();

        for reward in [0.2, 0.9, 0.4] {
            tree.backpropagate(child, reward);
        }

        let node = tree.get(root);
        assert!(node.value() / node.visits() as f32 <= 0.9);
    }

    #[test]
    fn test_trajectories_concatenate_states_and_actions() {
        let mut tree = SearchTree::new("q");
        let root = tree.root();
        let child = tree.add_child(root, "a".to_string(), "s1".to_string()).unwrap();
        tree.add_child(child, "b".to_string(), "s2".to_string())
            .unwrap();
        tree.add_child(root, "c".to_string(), "s3".to_string())
            .unwrap();

        let mut trajectories = tree.trajectories();
        trajectories.sort();

        assert_eq!(
            trajectories,
            vec!["q -> a: s1 -> b: s2".to_string(), "q -> c: s3".to_string()]
        );
    }

    #[test]
    fn test_single_node_tree_has_one_trajectory() {
        let tree = SearchTree::new("only");

        assert_eq!(tree.trajectories(), vec!["only".to_string()]);
    }
}
