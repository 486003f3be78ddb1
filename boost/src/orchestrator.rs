use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use mcts::{is_terminal, MctsEngine, SearchTree};
use model::{created_now, ChatCompletionClient, ReasoningModel};
use protocol::{BoostRequest, ChatCompletionChunk, ChatMessage};

use crate::interrupt::Interrupt;
use crate::options::BoostOptions;
use crate::trajectory::{is_consistent, score_trajectory, strip_root_segment, verification_prefix};

pub fn new_request_id() -> String {
    format!("chat-{}", Uuid::new_v4())
}

/// Outcome of one concurrent rollout, reported as progress.
#[derive(Debug)]
pub struct RolloutResult {
    pub rollout_id: usize,
    pub depth: usize,
    pub elapsed: Duration,
}

/// Sending half of the chunk stream handed to `process`.
pub struct BoostOutput {
    tx: mpsc::UnboundedSender<ChatCompletionChunk>,
}

impl BoostOutput {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatCompletionChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, chunk: ChatCompletionChunk) {
        if self.tx.send(chunk).is_err() {
            warn!("Chunk receiver dropped, discarding output");
        }
    }
}

enum Flow {
    Completed,
    NoSolution,
    Interrupted,
}

/// Drives one boosted request end to end: concurrent rollouts over a shared
/// tree, trajectory verification, and the ordered chunk stream back to the
/// caller. Every path through `process` ends the stream with exactly one
/// terminal chunk (`stop`, `interrupted`, or `error`), or a plain
/// no-solution notice.
pub struct BoostOrchestrator<M> {
    client: ChatCompletionClient,
    model: Arc<M>,
    engine: MctsEngine<M>,
    options: BoostOptions,
    interrupt: Interrupt,
}

impl<M> BoostOrchestrator<M>
where
    M: ReasoningModel,
{
    pub fn new(client: ChatCompletionClient, model: Arc<M>, options: BoostOptions) -> Self {
        let engine = MctsEngine::with_exploration(model.clone(), options.exploration);

        Self {
            client: client.with_status_tag("BOOST-"),
            model,
            engine,
            options,
            interrupt: Interrupt::new(),
        }
    }

    /// Handle for cancelling this orchestrator's in-flight request.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub async fn process(&self, request: &BoostRequest, request_id: &str, output: &BoostOutput) {
        let created = created_now();

        let question = match request.question() {
            Some(message) => message.content.clone(),
            None => {
                output.send(self.client.status_chunk(
                    "An error occurred: request carried no messages",
                    request_id,
                    created,
                    Some("error"),
                ));
                return;
            }
        };

        info!("Starting to solve question: {}", question);

        let num_rollouts = request.num_rollouts.unwrap_or(self.options.num_rollouts);
        let max_depth = request.max_depth.unwrap_or(self.options.max_depth);
        let context = request.context().to_vec();
        let tree = Mutex::new(SearchTree::new(question));

        output.send(self.client.status_chunk(
            "Starting PulsarBoost process...",
            request_id,
            created,
            None,
        ));

        let flow = self
            .run(
                &tree,
                &context,
                num_rollouts,
                max_depth,
                request_id,
                created,
                output,
            )
            .await;

        match flow {
            Ok(Flow::Completed) | Ok(Flow::NoSolution) => {
                info!("Search stats: {:?}", self.engine.stats().snapshot());
            }
            Ok(Flow::Interrupted) => {
                info!("Main process was cancelled. Cleaning up...");
                output.send(self.client.status_chunk(
                    "Process was interrupted.",
                    request_id,
                    created,
                    Some("interrupted"),
                ));
            }
            Err(err) => {
                error!("An error occurred during processing: {}", err);
                output.send(self.client.status_chunk(
                    &format!("An error occurred: {}", err),
                    request_id,
                    created,
                    Some("error"),
                ));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        tree: &Mutex<SearchTree>,
        context: &[ChatMessage],
        num_rollouts: usize,
        max_depth: usize,
        request_id: &str,
        created: i64,
        output: &BoostOutput,
    ) -> Result<Flow> {
        output.send(self.client.status_chunk(
            &format!("Starting {} concurrent rollouts", num_rollouts),
            request_id,
            created,
            None,
        ));

        let mut rollouts: FuturesUnordered<_> = (0..num_rollouts)
            .map(|rollout_id| self.single_rollout(tree, max_depth, rollout_id, context))
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = self.interrupt.wait() => {
                    info!("Rollouts were cancelled.");
                    return Ok(Flow::Interrupted);
                }
                next = rollouts.next() => match next {
                    Some(result) => {
                        let result = result?;
                        debug!(
                            "Rollout {} reached depth {} in {:?}",
                            result.rollout_id, result.depth, result.elapsed
                        );
                        output.send(self.client.status_chunk(
                            &format!("Completed rollout {}/{}", result.rollout_id, num_rollouts),
                            request_id,
                            created,
                            None,
                        ));
                    }
                    None => break,
                }
            }
        }
        drop(rollouts);

        let trajectories = tree.lock().trajectories();
        output.send(self.client.status_chunk(
            &format!("Validating {} trajectories", trajectories.len()),
            request_id,
            created,
            None,
        ));

        let total = trajectories.len();
        let mut verifications: FuturesUnordered<_> = trajectories
            .iter()
            .enumerate()
            .map(|(index, trajectory)| async move {
                (index, self.verify_trajectory(context, trajectory, index).await)
            })
            .collect();

        let mut valid_trajectories: Vec<&String> = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = self.interrupt.wait() => {
                    info!("Trajectory verification was cancelled.");
                    return Ok(Flow::Interrupted);
                }
                next = verifications.next() => match next {
                    Some((index, is_valid)) => {
                        output.send(self.client.status_chunk(
                            &format!(
                                "Verified trajectory {}/{}: {}",
                                index + 1,
                                total,
                                if is_valid { "Valid" } else { "Invalid" }
                            ),
                            request_id,
                            created,
                            None,
                        ));
                        if is_valid {
                            valid_trajectories.push(&trajectories[index]);
                        }
                    }
                    None => break,
                }
            }
        }
        drop(verifications);

        if valid_trajectories.is_empty() {
            output.send(self.client.status_chunk(
                "No valid solutions found.",
                request_id,
                created,
                None,
            ));
            return Ok(Flow::NoSolution);
        }

        output.send(self.client.status_chunk(
            &format!("Found {} valid trajectories", valid_trajectories.len()),
            request_id,
            created,
            None,
        ));

        // Ties keep the first trajectory encountered.
        let mut best: &String = valid_trajectories[0];
        let mut best_score = score_trajectory(best);
        for trajectory in valid_trajectories.iter().skip(1) {
            let score = score_trajectory(trajectory);
            if score > best_score {
                best = trajectory;
                best_score = score;
            }
        }

        let final_content = strip_root_segment(best);
        output.send(self.client.status_chunk(&final_content, request_id, created, Some("stop")));

        Ok(Flow::Completed)
    }

    async fn single_rollout(
        &self,
        tree: &Mutex<SearchTree>,
        max_depth: usize,
        rollout_id: usize,
        context: &[ChatMessage],
    ) -> Result<RolloutResult> {
        let start = Instant::now();
        let mut depth = 0;
        let mut node = tree.lock().root();

        loop {
            let state = tree.lock().get(node).state().to_string();
            if is_terminal(&state) || depth >= max_depth {
                break;
            }

            depth += 1;
            node = self.engine.select(tree, context, node).await?;
            let value = self
                .engine
                .simulate(tree, context, node, max_depth - depth)
                .await?;
            self.engine.backpropagate(tree, node, value);
        }

        Ok(RolloutResult {
            rollout_id,
            depth,
            elapsed: start.elapsed(),
        })
    }

    /// Regenerates the trajectory's tail from its first 70% and accepts the
    /// trajectory only when both versions extract the same answer.
    async fn verify_trajectory(
        &self,
        context: &[ChatMessage],
        trajectory: &str,
        trajectory_index: usize,
    ) -> bool {
        let prefix = verification_prefix(trajectory);
        let mut messages = context.to_vec();
        messages.push(ChatMessage::user(format!(
            "Given the following partial reasoning, complete the solution:\
             \n\n{}\n\nComplete solution:",
            prefix
        )));

        match self.model.complete(messages).await {
            Ok(completion) => {
                let is_valid = is_consistent(trajectory, &completion);
                debug!(
                    "Trajectory {} validation result: {}",
                    trajectory_index, is_valid
                );
                is_valid
            }
            Err(err) => {
                error!("Error verifying trajectory {}: {}", trajectory_index, err);
                false
            }
        }
    }
}
