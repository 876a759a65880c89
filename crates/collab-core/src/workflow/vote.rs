use crate::provider::{Provider, PROVIDER_ORDER};

const VOTE_KEYWORDS: [&str; 5] = ["vote", "choose", "select", "prefer", "pick"];
const VOTE_WINDOW_CHARS: usize = 50;

/// Extracts which candidate a voter's free-text response votes for (round-table
/// vote phase, brainstorm-swarm vote phase).
///
/// Scans for the first occurrence of any other agent's identifier within
/// [`VOTE_WINDOW_CHARS`] of a vote keyword; falls back to the first-mentioned
/// other agent. Ties break by provider enumeration order.
pub fn extract_vote(voter_text: &str, candidates: &[Provider], self_provider: Provider) -> Option<Provider> {
    let lower = voter_text.to_lowercase();
    let others: Vec<Provider> = PROVIDER_ORDER
        .into_iter()
        .filter(|p| candidates.contains(p) && *p != self_provider)
        .collect();
    if others.is_empty() {
        return None;
    }

    let keyword_positions: Vec<usize> = VOTE_KEYWORDS
        .iter()
        .flat_map(|kw| lower.match_indices(kw).map(|(i, _)| i))
        .collect();

    let mut best: Option<(usize, Provider)> = None;
    for provider in &others {
        for (i, _) in lower.match_indices(provider.as_str()) {
            let near_keyword = keyword_positions.iter().any(|&kw_pos| {
                i.abs_diff(kw_pos) <= VOTE_WINDOW_CHARS
            });
            if !near_keyword {
                continue;
            }
            match best {
                Some((best_pos, _)) if i >= best_pos => {}
                _ => best = Some((i, *provider)),
            }
        }
    }
    if let Some((_, provider)) = best {
        return Some(provider);
    }

    let mut first: Option<(usize, Provider)> = None;
    for provider in &others {
        if let Some(i) = lower.find(provider.as_str()) {
            match first {
                Some((first_pos, _)) if first_pos <= i => {}
                _ => first = Some((i, *provider)),
            }
        }
    }
    first.map(|(_, p)| p).or_else(|| others.first().copied())
}

/// Tallies votes and returns the winner, breaking ties by provider
/// enumeration order.
pub fn tally_votes(votes: &[Provider]) -> Option<Provider> {
    let mut counts: Vec<(Provider, usize)> = Vec::new();
    for &v in votes {
        match counts.iter_mut().find(|(p, _)| *p == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    // Walk in enumeration order and only replace the incumbent on a strictly
    // higher count, so an earlier-enumerated provider keeps the win on a tie
    // (`Iterator::max_by_key` would instead keep the *last* equal maximum).
    let mut best: Option<(Provider, usize)> = None;
    for p in PROVIDER_ORDER.into_iter() {
        let Some((_, n)) = counts.iter().find(|(cp, _)| *cp == p) else {
            continue;
        };
        match best {
            Some((_, best_n)) if *n <= best_n => {}
            _ => best = Some((p, *n)),
        }
    }
    best.map(|(p, _)| p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_extraction_prefers_keyword_adjacent_mention() {
        let winner = extract_vote(
            "I pick claude because it covers every edge case.",
            &[Provider::Claude, Provider::Gemini],
            Provider::Gemini,
        );
        assert_eq!(winner, Some(Provider::Claude));
    }

    #[test]
    fn vote_extraction_falls_back_to_first_mention() {
        let winner = extract_vote(
            "Reading through these answers, claude's draft stood out to me.",
            &[Provider::Claude, Provider::Chatgpt],
            Provider::Chatgpt,
        );
        assert_eq!(winner, Some(Provider::Claude));
    }

    #[test]
    fn vote_extraction_excludes_self() {
        // "claude" appears first in the text, but claude is the voter here,
        // so chatgpt is the only eligible candidate.
        let winner = extract_vote(
            "I think claude made the best case here, not my own draft.",
            &[Provider::Claude, Provider::Chatgpt],
            Provider::Claude,
        );
        assert_eq!(winner, Some(Provider::Chatgpt));
    }

    #[test]
    fn tally_votes_breaks_ties_by_enumeration_order() {
        let winner = tally_votes(&[Provider::Grok, Provider::Chatgpt]);
        assert_eq!(winner, Some(Provider::Chatgpt));
    }

    #[test]
    fn tally_votes_counts_majority() {
        let winner = tally_votes(&[Provider::Gemini, Provider::Gemini, Provider::Claude]);
        assert_eq!(winner, Some(Provider::Gemini));
    }
}
