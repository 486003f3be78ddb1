use once_cell::sync::Lazy;
use regex::Regex;

static ANSWER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"The answer is: (\d+)").unwrap());

pub fn extract_answer(trajectory: &str) -> Option<&str> {
    ANSWER_RE
        .captures(trajectory)
        .map(|captures| captures.get(1).unwrap().as_str())
}

/// A trajectory agrees with an independent completion when both carry the
/// same extractable answer. A missing answer on either side is a
/// disagreement.
pub fn is_consistent(original: &str, completion: &str) -> bool {
    matches!(
        (extract_answer(original), extract_answer(completion)),
        (Some(a), Some(b)) if a == b
    )
}

/// Longer trajectories score higher, with a flat bonus for actually
/// carrying an answer.
pub fn score_trajectory(trajectory: &str) -> usize {
    let steps = trajectory.split('\n').count();
    let has_answer = usize::from(extract_answer(trajectory).is_some());

    steps + has_answer * 10
}

/// The first 70% of the trajectory (by characters, at least one), used as
/// the prompt prefix for independent regeneration.
pub fn verification_prefix(trajectory: &str) -> String {
    let total = trajectory.chars().count();
    let split_point = ((total as f32) * 0.7) as usize;

    trajectory.chars().take(split_point.max(1)).collect()
}

/// Drops the root segment (the restated question) from a trajectory,
/// leaving the reasoning steps as the answer content.
pub fn strip_root_segment(trajectory: &str) -> String {
    trajectory
        .split("->")
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
