//! Round prompts and the consensus synthesis text.

use super::round::RoundResult;

/// Characters kept from each previous response in a follow-up prompt.
pub const SUMMARY_EXCERPT_CHARS: usize = 300;
/// Characters kept from each final response in the synthesis.
pub const SYNTHESIS_EXCERPT_CHARS: usize = 500;

/// First `max_chars` characters of `text`, with `...` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Prompt for round 1: the question, its context and the answer format.
pub fn opening_prompt(question: &str, context: &str) -> String {
    let context = if context.trim().is_empty() {
        "N/A"
    } else {
        context.trim()
    };
    format!(
        "# DEBATE ROUND 1\n\n\
         ## QUESTION\n{question}\n\n\
         ## CONTEXT\n{context}\n\n\
         ## YOUR TASK\nAnalyse the question, propose a solution and justify it.\n\n\
         ## FORMAT\nAnalysis, Proposal, Justification. End with your vote on its own line \
         as `[VOTE: <short label>]`."
    )
}

/// Prompt for round `round_number` > 1, condensing the previous round.
pub fn follow_up_prompt(question: &str, round_number: u32, previous: &RoundResult) -> String {
    let mut prompt = format!(
        "# DEBATE ROUND {round_number}\n\n## QUESTION\n{question}\n\n## PREVIOUS ROUND SUMMARY\n"
    );
    let mut any = false;
    for response in previous.successful() {
        any = true;
        prompt.push_str(&format!(
            "\n- {}: {}\n",
            response.agent_name,
            excerpt(&response.text, SUMMARY_EXCERPT_CHARS)
        ));
    }
    if !any {
        prompt.push_str("\n(no successful responses)\n");
    }
    prompt.push_str(
        "\n## YOUR TASK\nEvaluate the positions above, refine your own and work towards \
         consensus. End with your vote as `[VOTE: <short label>]`.",
    );
    prompt
}

/// Prompt for the given round.
pub fn round_prompt(
    question: &str,
    context: &str,
    round_number: u32,
    previous: Option<&RoundResult>,
) -> String {
    match previous {
        Some(prev) if round_number > 1 => follow_up_prompt(question, round_number, prev),
        _ => opening_prompt(question, context),
    }
}

/// Concatenated excerpts of the final round's successful responses.
pub fn synthesize(round: &RoundResult, reason: &str) -> String {
    let mut text = format!("Consensus reached by {reason}.\n\nSynthesis of the converging proposals:\n");
    for response in round.successful() {
        text.push_str(&format!(
            "\n--- {} ({}) ---\n{}\n",
            response.agent_name,
            response.model,
            excerpt(&response.text, SYNTHESIS_EXCERPT_CHARS)
        ));
    }
    text
}
