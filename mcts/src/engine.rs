use std::sync::Arc;

use anyhow::{anyhow, Result};
use generational_arena::Index;
use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::thread_rng;
use regex::Regex;

use model::ReasoningModel;
use protocol::ChatMessage;

use crate::stats::SearchStats;
use crate::tree::SearchTree;

pub const DEFAULT_EXPLORATION: f32 = 1.414;

/// States longer than this are compressed in place during descent.
const STATE_CHAR_LIMIT: usize = 750;

static TERMINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(The answer is:|Final result:) \S+").unwrap());

/// True once a reasoning state carries an extractable final-answer marker.
pub fn is_terminal(state: &str) -> bool {
    TERMINAL_RE.is_match(state)
}

/// Monte-Carlo tree search over reasoning states, with the model supplying
/// both the candidate actions and the evaluations.
///
/// The tree mutex is only ever held across synchronous mutations; every
/// model call happens with the lock released, so concurrent rollouts
/// interleave freely without observing a torn tree.
pub struct MctsEngine<M> {
    model: Arc<M>,
    exploration: f32,
    stats: SearchStats,
}

enum Descent {
    Expand,
    Found(Index),
    Into { child: Index, oversized: bool },
}

impl<M> MctsEngine<M>
where
    M: ReasoningModel,
{
    pub fn new(model: Arc<M>) -> Self {
        Self::with_exploration(model, DEFAULT_EXPLORATION)
    }

    pub fn with_exploration(model: Arc<M>, exploration: f32) -> Self {
        Self {
            model,
            exploration,
            stats: SearchStats::default(),
        }
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Walks down from `node` to the next node worth simulating: an
    /// unvisited child when one exists, otherwise the UCT-best child, and
    /// expands when a node has nothing to descend into.
    pub async fn select(
        &self,
        tree: &Mutex<SearchTree>,
        context: &[ChatMessage],
        node: Index,
    ) -> Result<Index> {
        self.stats.record_node_explored();
        let mut current = node;

        loop {
            let step = {
                let tree = tree.lock();
                let children = tree.get(current).children();

                if children.is_empty() {
                    Descent::Expand
                } else {
                    let unvisited: Vec<Index> = children
                        .iter()
                        .copied()
                        .filter(|&child| tree.get(child).visits() == 0)
                        .collect();

                    if let Some(&child) = unvisited.choose(&mut thread_rng()) {
                        Descent::Found(child)
                    } else if !children.iter().all(|&child| tree.get(child).visits() > 0) {
                        Descent::Expand
                    } else {
                        let child = self.best_child(&tree, current);
                        let oversized =
                            tree.get(child).state().chars().count() > STATE_CHAR_LIMIT;
                        Descent::Into { child, oversized }
                    }
                }
            };

            match step {
                Descent::Expand => return self.expand(tree, context, current).await,
                Descent::Found(child) => return Ok(child),
                Descent::Into { child, oversized } => {
                    if oversized {
                        let state = tree.lock().get(child).state().to_string();
                        let summary = self.model.summarize(context, &state).await;
                        tree.lock().get_mut(child).set_state(summary);
                    }

                    current = child;
                }
            }
        }
    }

    fn best_child(&self, tree: &SearchTree, node: Index) -> Index {
        let parent_visits = tree.get(node).visits() as f32;

        tree.get(node)
            .children()
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let a = self.uct(tree, a, parent_visits);
                let b = self.uct(tree, b, parent_visits);
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("best_child requires at least one child")
    }

    fn uct(&self, tree: &SearchTree, child: Index, parent_visits: f32) -> f32 {
        let child = tree.get(child);
        let visits = child.visits() as f32;

        child.value() / visits + self.exploration * (parent_visits.ln() / visits).sqrt()
    }

    /// Asks the model for candidate actions and applies them all, but adds
    /// at most one child: the first whose state is not already present.
    /// When every candidate duplicates an existing child the node is
    /// returned unchanged.
    pub async fn expand(
        &self,
        tree: &Mutex<SearchTree>,
        context: &[ChatMessage],
        node: Index,
    ) -> Result<Index> {
        let state = tree.lock().get(node).state().to_string();

        let actions = self.model.dynamic_actions(context, &state).await;
        let new_states = futures::future::try_join_all(
            actions
                .iter()
                .map(|action| self.model.apply_action(context, &state, action)),
        )
        .await?;

        let mut tree = tree.lock();
        for (action, new_state) in actions.into_iter().zip(new_states) {
            if let Some(child) = tree.add_child(node, action, new_state) {
                self.stats.record_action_taken();
                return Ok(child);
            }
        }

        Ok(node)
    }

    /// Stochastic rollout from `node`'s state. Never touches the tree:
    /// actions are sampled proportionally to their evaluated scores and the
    /// visited states' evaluations are averaged over the rollout length.
    pub async fn simulate(
        &self,
        tree: &Mutex<SearchTree>,
        context: &[ChatMessage],
        node: Index,
        remaining_depth: usize,
    ) -> Result<f32> {
        let mut state = tree.lock().get(node).state().to_string();
        let mut total_value = 0.0_f32;
        let mut depth = 0;

        while !is_terminal(&state) && depth < remaining_depth {
            let actions = self.model.dynamic_actions(context, &state).await;
            let action_values = self.model.evaluate_actions(context, &state, &actions).await;
            let action = sample_action(&actions, &action_values)?;

            state = self.model.apply_action(context, &state, &action).await?;
            total_value += self.model.evaluate_state(context, &state).await;
            depth += 1;
        }

        self.stats.record_simulation(depth);

        Ok(total_value / (depth + 1) as f32)
    }

    pub fn backpropagate(&self, tree: &Mutex<SearchTree>, node: Index, value: f32) {
        debug!("Backpropagating value {}", value);
        tree.lock().backpropagate(node, value);
    }
}

/// Samples an action with probability proportional to its score; uniform
/// when every score is zero.
fn sample_action(actions: &[String], action_values: &[f32]) -> Result<String> {
    if actions.is_empty() {
        return Err(anyhow!("No actions available to sample"));
    }

    let mut rng = thread_rng();
    let len = actions.len().min(action_values.len());
    if len == 0 {
        return Ok(actions
            .choose(&mut rng)
            .expect("actions is non-empty")
            .clone());
    }

    let actions = &actions[..len];
    let action_values = &action_values[..len];

    let total: f32 = action_values.iter().sum();
    if total == 0.0 {
        return Ok(actions
            .choose(&mut rng)
            .expect("actions is non-empty")
            .clone());
    }

    match WeightedIndex::new(action_values) {
        Ok(weights) => Ok(actions[weights.sample(&mut rng)].clone()),
        Err(err) => {
            warn!("Invalid action scores, selecting uniformly: {}", err);
            Ok(actions
                .choose(&mut rng)
                .expect("actions is non-empty")
                .clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedModel;
    use assert_approx_eq::assert_approx_eq;

    fn engine(model: ScriptedModel) -> MctsEngine<ScriptedModel> {
        MctsEngine::new(Arc::new(model))
    }

    #[test]
    fn test_is_terminal_matches_answer_markers() {
        assert!(is_terminal("The answer is: 42"));
        assert!(is_terminal("Final result: done"));
        assert!(is_terminal("so THE ANSWER IS: seven"));
        assert!(!is_terminal("Still thinking about the answer"));
        assert!(!is_terminal("The answer is: "));
    }

    #[tokio::test]
    async fn test_select_on_childless_node_expands() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let selected = engine.select(&tree, &[], root).await.unwrap();

        let tree = tree.lock();
        assert_ne!(selected, root);
        assert_eq!(tree.get(root).children(), &[selected]);
        assert_eq!(tree.get(selected).state(), "q -> A");
    }

    #[tokio::test]
    async fn test_select_prefers_unvisited_children() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let (root, visited, unvisited) = {
            let mut tree = tree.lock();
            let root = tree.root();
            let visited = tree.add_child(root, "a".into(), "s1".into()).unwrap();
            let unvisited = tree.add_child(root, "b".into(), "s2".into()).unwrap();
            tree.backpropagate(visited, 0.5);
            (root, visited, unvisited)
        };

        let selected = engine.select(&tree, &[], root).await.unwrap();

        assert_ne!(selected, visited);
        assert_eq!(selected, unvisited);
    }

    #[tokio::test]
    async fn test_select_descends_into_best_child_and_expands_it() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let (root, strong) = {
            let mut tree = tree.lock();
            let root = tree.root();
            let weak = tree.add_child(root, "a".into(), "s1".into()).unwrap();
            let strong = tree.add_child(root, "b".into(), "s2".into()).unwrap();
            tree.backpropagate(weak, 0.1);
            tree.backpropagate(strong, 0.9);
            (root, strong)
        };

        let selected = engine.select(&tree, &[], root).await.unwrap();

        let tree = tree.lock();
        assert_eq!(tree.get(selected).parent(), Some(strong));
        assert_eq!(tree.get(root).visits(), 2);
    }

    #[tokio::test]
    async fn test_select_compresses_oversized_states_in_place() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let (root, big) = {
            let mut tree = tree.lock();
            let root = tree.root();
            let big = tree
                .add_child(root, "a".into(), "x".repeat(800))
                .unwrap();
            tree.backpropagate(big, 0.5);
            (root, big)
        };

        engine.select(&tree, &[], root).await.unwrap();

        let tree = tree.lock();
        assert_eq!(tree.get(big).state(), "condensed");
    }

    #[tokio::test]
    async fn test_expand_adds_first_candidate_only() {
        let engine = engine(ScriptedModel::appending(&["A", "B"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let child = engine.expand(&tree, &[], root).await.unwrap();

        let tree = tree.lock();
        assert_eq!(tree.get(root).children().len(), 1);
        assert_eq!(tree.get(child).state(), "q -> A");
        assert_eq!(tree.get(child).action(), Some("A"));
    }

    #[tokio::test]
    async fn test_expand_never_duplicates_child_states() {
        let engine = engine(ScriptedModel::collapsing(&["A", "B"], 0.8));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let first = engine.expand(&tree, &[], root).await.unwrap();
        assert_ne!(first, root);

        // Every further candidate collapses to the same state, so the node
        // comes back unchanged.
        let second = engine.expand(&tree, &[], root).await.unwrap();
        assert_eq!(second, root);
        assert_eq!(tree.lock().get(root).children().len(), 1);
    }

    #[tokio::test]
    async fn test_simulate_stops_at_terminal_state() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8).terminal_after(1));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let value = engine.simulate(&tree, &[], root, 3).await.unwrap();

        assert_approx_eq!(value, 0.4);
        assert_eq!(engine.stats().snapshot().simulations_run, 1);
        assert_eq!(tree.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_simulate_respects_depth_bound() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.6));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let value = engine.simulate(&tree, &[], root, 2).await.unwrap();

        // Two steps of 0.6 averaged over depth + 1.
        assert_approx_eq!(value, 1.2 / 3.0);
    }

    #[tokio::test]
    async fn test_single_rollout_scenario_reaches_terminal() {
        let engine = engine(ScriptedModel::appending(&["A"], 0.8).terminal_after(2));
        let tree = Mutex::new(SearchTree::new("q"));
        let root = tree.lock().root();

        let node = engine.select(&tree, &[], root).await.unwrap();
        let value = engine.simulate(&tree, &[], node, 2).await.unwrap();
        engine.backpropagate(&tree, node, value);

        // The second application carries the answer marker, so the rollout
        // ends on a terminal state after a single step.
        assert_approx_eq!(value, 0.4);

        let tree = tree.lock();
        assert_eq!(tree.get(root).visits(), 1);
        assert_eq!(tree.get(node).visits(), 1);
        assert_approx_eq!(tree.get(node).value(), 0.4);
    }

    #[test]
    fn test_sample_action_uniform_when_scores_are_zero() {
        let actions = vec!["a".to_string(), "b".to_string()];

        let sampled = sample_action(&actions, &[0.0, 0.0]).unwrap();
        assert!(actions.contains(&sampled));
    }

    #[test]
    fn test_sample_action_truncates_mismatched_scores() {
        let actions = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let sampled = sample_action(&actions, &[0.0, 1.0]).unwrap();
        assert_eq!(sampled, "b");
    }

    #[test]
    fn test_sample_action_requires_actions() {
        assert!(sample_action(&[], &[]).is_err());
    }
}
