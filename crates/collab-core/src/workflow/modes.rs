use super::agent_call::{call_agent_step, RunContext};
use super::phase_runner::{
    assign_roles, emit_progress, emit_vote, finish_aborted, finish_ok, parallel_phase, sequential_phase,
    split_final_and_rationale,
};
use super::types::{AbortReason, Artifact, CollaborationMode, CollaborationResult, StepOutcome};
use super::vote::{extract_vote, tally_votes};
use crate::prompt::PromptAssembler;
use crate::provider::{largest_context_agent, Provider};

pub(crate) async fn dispatch(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    match ctx.options.mode {
        CollaborationMode::Individual => run_individual(ctx, agents).await,
        CollaborationMode::RoundTable => run_round_table(ctx, agents).await,
        CollaborationMode::SequentialCritiqueChain => run_sequential_critique_chain(ctx, agents).await,
        CollaborationMode::ValidatedConsensus => run_validated_consensus(ctx, agents).await,
        CollaborationMode::CreativeBrainstormSwarm => run_creative_brainstorm_swarm(ctx, agents).await,
        CollaborationMode::HybridGuardedBraintrust => run_hybrid_guarded_braintrust(ctx, agents).await,
        CollaborationMode::CodeArchitect => run_code_architect(ctx, agents).await,
        CollaborationMode::AdversarialDebate => run_adversarial_debate(ctx, agents).await,
        CollaborationMode::ExpertPanel => run_expert_panel(ctx, agents).await,
        CollaborationMode::ScenarioAnalysis => run_scenario_analysis(ctx, agents).await,
    }
}

fn history(ctx: &RunContext<'_>) -> String {
    ctx.options.context_history.clone()
}

fn successes<'a>(artifacts: &'a [Artifact], phase: &str) -> impl Iterator<Item = &'a Artifact> {
    artifacts.iter().filter(move |a| a.phase == phase && a.error.is_none())
}

async fn single_call(
    ctx: &RunContext<'_>,
    provider: Provider,
    phase: &str,
    purpose: &str,
    system_prompt: String,
    user_prompt: String,
) -> StepOutcome {
    let model = ctx.options.model_for(provider);
    call_agent_step(ctx, provider, &model, phase, purpose, system_prompt, user_prompt).await
}

// ---------------------------------------------------------------------
// individual — no collaboration, each agent answers independently.
// ---------------------------------------------------------------------
async fn run_individual(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let style = ctx.options.collaboration_style;
    let hist = history(ctx);

    let (artifacts, abort) = parallel_phase(ctx, agents, "individual", "a response", |provider| {
        let assembled = PromptAssembler::assemble(provider, "Answer the user's question directly.", style, &prompt, &[], &hist);
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;

    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let final_text = artifacts
        .iter()
        .map(|a| format!("## {}\n\n{}", a.producer.map(|p| p.display_name()).unwrap_or("system"), a.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    finish_ok(ctx, final_text, None, artifacts)
}

// ---------------------------------------------------------------------
// round_table — draft, critique, vote, synthesis.
// ---------------------------------------------------------------------
async fn run_round_table(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let style = ctx.options.collaboration_style;
    let hist = history(ctx);

    let (drafts, abort) = sequential_phase(ctx, agents, "draft", "an initial draft", |_, provider, _| {
        let assembled = PromptAssembler::assemble(
            provider,
            "Produce your own independent initial draft answer to the user's question.",
            style,
            &prompt,
            &[],
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    if let Some(reason) = abort {
        return finish_aborted(ctx, drafts, reason);
    }

    let surviving: Vec<Provider> = successes(&drafts, "draft").filter_map(|a| a.producer).collect();
    if surviving.is_empty() {
        return finish_aborted(ctx, drafts, AbortReason::NoAgents);
    }

    let mut artifacts = drafts;
    let (critiques, abort) = parallel_phase(ctx, &surviving, "critique", "a critique", |provider| {
        let others: Vec<(&str, &str)> = successes(&artifacts, "draft")
            .filter(|a| a.producer != Some(provider))
            .map(|a| (a.producer.unwrap().as_str(), a.content.as_str()))
            .collect();
        let assembled = PromptAssembler::assemble(
            provider,
            "Critique every other agent's draft below: note strengths, weaknesses and factual problems.",
            style,
            &prompt,
            &others,
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    artifacts.extend(critiques);
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let (votes, abort) = parallel_phase(ctx, &surviving, "vote", "a vote", |provider| {
        let others: Vec<(&str, &str)> = successes(&artifacts, "draft")
            .filter(|a| a.producer != Some(provider))
            .map(|a| (a.producer.unwrap().as_str(), a.content.as_str()))
            .collect();
        let assembled = PromptAssembler::assemble(
            provider,
            "Vote for the single best draft among your peers, never your own. State your pick by name explicitly.",
            style,
            &prompt,
            &others,
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let ballots: Vec<Provider> = votes
        .iter()
        .filter(|a| a.error.is_none())
        .filter_map(|a| {
            let voter = a.producer.unwrap();
            let choice = extract_vote(&a.content, &surviving, voter);
            emit_vote(ctx, voter, choice);
            choice
        })
        .collect();
    artifacts.extend(votes);
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let winner = tally_votes(&ballots).or_else(|| surviving.first().copied());
    let synthesizer = largest_context_agent(&surviving).unwrap_or(surviving[0]);
    let winning_draft = artifacts
        .iter()
        .find(|a| a.phase == "draft" && a.producer == winner)
        .map(|a| a.content.as_str())
        .unwrap_or("");
    let mut embedded: Vec<(&str, &str)> = vec![("winning_draft", winning_draft)];
    embedded.extend(successes(&artifacts, "critique").map(|a| (a.producer.unwrap().as_str(), a.content.as_str())));

    let directive = "Synthesize a final answer from the winning draft and the critiques below. \
        Respond in two clearly labeled sections: FINAL ANSWER and RATIONALE.";
    let assembled = PromptAssembler::assemble(synthesizer, directive, style, &prompt, &embedded, &hist);
    match single_call(ctx, synthesizer, "synthesis", "a synthesis", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let (final_text, rationale) = split_final_and_rationale(&artifact.content);
            artifacts.push(artifact);
            finish_ok(ctx, final_text, rationale, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// sequential_critique_chain — initial answer, rotating refinements, synthesis.
// ---------------------------------------------------------------------
async fn run_sequential_critique_chain(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    use super::types::SequentialStyle;

    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    let total_steps = agents.len() as u32 + 1;

    let mut artifacts = Vec::new();
    for (i, &provider) in agents.iter().enumerate() {
        let (directive, style) = if i == 0 {
            ("Produce an initial answer to the user's question.".to_string(), None)
        } else {
            let seq_style = ctx.options.sequential_style.unwrap_or_else(|| SequentialStyle::at_step(i - 1));
            (seq_style.directive().to_string(), None)
        };
        let embedded: Vec<(&str, &str)> = if i == 0 {
            vec![]
        } else {
            vec![("previous_answer", artifacts.last().map(|a: &Artifact| a.content.as_str()).unwrap_or(""))]
        };
        let assembled = PromptAssembler::assemble(provider, &directive, style, &prompt, &embedded, &hist);
        let phase = if i == 0 { "initial_answer" } else { "refine" };
        match single_call(ctx, provider, phase, "an answer", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => artifacts.push(artifact),
            StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
        }
        emit_progress(ctx, phase, i as u32 + 1, total_steps);
    }

    let surviving: Vec<Provider> = artifacts.iter().filter(|a| a.error.is_none()).filter_map(|a| a.producer).collect();
    if surviving.is_empty() {
        return finish_aborted(ctx, artifacts, AbortReason::NoAgents);
    }
    let synthesizer = largest_context_agent(&surviving).unwrap_or(surviving[0]);
    let latest = artifacts.last().map(|a| a.content.as_str()).unwrap_or("");
    let embedded = [("latest_refinement", latest)];
    let directive = "Synthesize the final answer from the refinement chain below. \
        Respond in two clearly labeled sections: FINAL ANSWER and RATIONALE.";
    let assembled = PromptAssembler::assemble(synthesizer, directive, None, &prompt, &embedded, &hist);
    let outcome = single_call(ctx, synthesizer, "synthesis", "a synthesis", assembled.system_prompt, assembled.user_prompt).await;
    emit_progress(ctx, "synthesis", total_steps, total_steps);
    match outcome {
        StepOutcome::Continue(artifact) => {
            let (final_text, rationale) = split_final_and_rationale(&artifact.content);
            artifacts.push(artifact);
            finish_ok(ctx, final_text, rationale, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// validated_consensus — co-draft, merge, verify, conditional rewrite.
// ---------------------------------------------------------------------
const ISSUE_KEYWORDS: [&str; 7] = [
    "incorrect",
    "false",
    "misleading",
    "unsupported",
    "citation needed",
    "inaccurate",
    "error",
];

async fn run_validated_consensus(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    if agents.len() < 3 {
        return finish_aborted(
            ctx,
            vec![],
            AbortReason::InsufficientAgents { required: 3, available: agents.len() },
        );
    }
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    let co_drafters = &agents[..2];

    let (drafts, abort) = parallel_phase(ctx, co_drafters, "co_draft", "a co-draft", |provider| {
        let assembled = PromptAssembler::assemble(provider, "Draft an answer to the user's question.", None, &prompt, &[], &hist);
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let mut artifacts = drafts;
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let valid_drafts: Vec<&Artifact> = successes(&artifacts, "co_draft").collect();
    let merged_content = if valid_drafts.len() == 1 {
        valid_drafts[0].content.clone()
    } else if valid_drafts.is_empty() {
        return finish_aborted(ctx, artifacts, AbortReason::NoAgents);
    } else {
        let merger = largest_context_agent(agents).unwrap_or(agents[0]);
        let embedded: Vec<(&str, &str)> = valid_drafts.iter().map(|a| (a.producer.unwrap().as_str(), a.content.as_str())).collect();
        let assembled = PromptAssembler::assemble(merger, "Merge the two drafts below into one coherent answer.", None, &prompt, &embedded, &hist);
        match single_call(ctx, merger, "merge", "a merged draft", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => {
                let content = artifact.content.clone();
                artifacts.push(artifact);
                content
            }
            StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
        }
    };

    let (verifications, abort) = parallel_phase(ctx, agents, "verify", "a fact-check", |provider| {
        let embedded = [("merged_draft", merged_content.as_str())];
        let assembled = PromptAssembler::assemble(
            provider,
            "Fact-check the merged draft below. Call out anything incorrect, false, misleading, unsupported, in need of a citation, inaccurate, or otherwise an error.",
            None,
            &prompt,
            &embedded,
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let verifier_count = verifications.iter().filter(|a| a.error.is_none()).count().max(1);
    let total_issue_mentions: usize = verifications
        .iter()
        .filter(|a| a.error.is_none())
        .map(|a| {
            let lower = a.content.to_lowercase();
            ISSUE_KEYWORDS.iter().map(|kw| lower.matches(kw).count()).sum::<usize>()
        })
        .sum();
    let average_issues = total_issue_mentions as f64 / verifier_count as f64;
    artifacts.extend(verifications.clone());
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    if average_issues >= 3.0 {
        let rewriter = largest_context_agent(agents).unwrap_or(agents[0]);
        let mut embedded: Vec<(&str, &str)> = vec![("merged_draft", merged_content.as_str())];
        embedded.extend(successes(&artifacts, "verify").map(|a| (a.producer.unwrap().as_str(), a.content.as_str())));
        let assembled = PromptAssembler::assemble(
            rewriter,
            "Rewrite the merged draft to resolve the issues the verifiers raised below.",
            None,
            &prompt,
            &embedded,
            &hist,
        );
        return match single_call(ctx, rewriter, "rewrite", "a rewrite", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => {
                let final_text = artifact.content.clone();
                artifacts.push(artifact);
                finish_ok(ctx, final_text, Some("Rewritten after verifiers raised an average of 3 or more issues per review.".to_string()), artifacts)
            }
            StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
        };
    }

    finish_ok(ctx, merged_content, Some("Verifiers raised fewer than 3 issues on average; the merged draft stands unchanged.".to_string()), artifacts)
}

// ---------------------------------------------------------------------
// creative_brainstorm_swarm — ideation, fusion, vote, amplification.
// ---------------------------------------------------------------------
async fn run_creative_brainstorm_swarm(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);

    let (ideas, abort) = parallel_phase(ctx, agents, "ideation", "a set of ideas", |provider| {
        let assembled = PromptAssembler::assemble(
            provider,
            "Brainstorm 3 to 5 distinct ideas that address the user's question. List them clearly.",
            None,
            &prompt,
            &[],
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let mut artifacts = ideas;
    let surviving: Vec<Provider> = successes(&artifacts, "ideation").filter_map(|a| a.producer).collect();
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }
    if surviving.is_empty() {
        return finish_aborted(ctx, artifacts, AbortReason::NoAgents);
    }

    let pool: Vec<(&str, &str)> = successes(&artifacts, "ideation").map(|a| (a.producer.unwrap().as_str(), a.content.as_str())).collect();
    let (fusions, abort) = parallel_phase(ctx, &surviving, "fusion", "a mega-idea", |provider| {
        let assembled = PromptAssembler::assemble(
            provider,
            "Merge at least two ideas from the pool below into a single stronger \"mega-idea\".",
            None,
            &prompt,
            &pool,
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    artifacts.extend(fusions);
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let (votes, abort) = parallel_phase(ctx, &surviving, "vote", "a vote", |provider| {
        let others: Vec<(&str, &str)> = successes(&artifacts, "fusion")
            .filter(|a| a.producer != Some(provider))
            .map(|a| (a.producer.unwrap().as_str(), a.content.as_str()))
            .collect();
        let assembled = PromptAssembler::assemble(
            provider,
            "Vote for the strongest mega-idea among your peers' below, never your own.",
            None,
            &prompt,
            &others,
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let ballots: Vec<Provider> = votes
        .iter()
        .filter(|a| a.error.is_none())
        .filter_map(|a| {
            let voter = a.producer.unwrap();
            let choice = extract_vote(&a.content, &surviving, voter);
            emit_vote(ctx, voter, choice);
            choice
        })
        .collect();
    artifacts.extend(votes);
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let winner = tally_votes(&ballots).or_else(|| surviving.first().copied());
    let amplifier = largest_context_agent(&surviving).unwrap_or(surviving[0]);
    let winning_idea = artifacts
        .iter()
        .find(|a| a.phase == "fusion" && a.producer == winner)
        .map(|a| a.content.as_str())
        .unwrap_or("");
    let embedded = [("winning_mega_idea", winning_idea)];
    let assembled = PromptAssembler::assemble(
        amplifier,
        "Amplify and flesh out the winning mega-idea below into a complete answer to the user's question.",
        None,
        &prompt,
        &embedded,
        &hist,
    );
    match single_call(ctx, amplifier, "amplification", "an amplification", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let final_text = artifact.content.clone();
            artifacts.push(artifact);
            finish_ok(ctx, final_text, None, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// hybrid_guarded_braintrust — ideation, ranking, validation, elaboration.
// ---------------------------------------------------------------------
async fn run_hybrid_guarded_braintrust(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);

    let (ideas, abort) = parallel_phase(ctx, agents, "ideation", "an idea", |provider| {
        let assembled = PromptAssembler::assemble(
            provider,
            "Propose a creative approach to the user's question.",
            None,
            &prompt,
            &[],
            &hist,
        );
        (assembled.system_prompt, assembled.user_prompt)
    })
    .await;
    let mut artifacts = ideas;
    let surviving: Vec<Provider> = successes(&artifacts, "ideation").filter_map(|a| a.producer).collect();
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }
    if surviving.is_empty() {
        return finish_aborted(ctx, artifacts, AbortReason::NoAgents);
    }

    let ranker = surviving[0];
    let pool: Vec<(&str, &str)> = successes(&artifacts, "ideation").map(|a| (a.producer.unwrap().as_str(), a.content.as_str())).collect();
    let assembled = PromptAssembler::assemble(
        ranker,
        "Rank the ideas below from strongest to weakest and name the winner explicitly.",
        None,
        &prompt,
        &pool,
        &hist,
    );
    let winner_idea = match single_call(ctx, ranker, "ranking", "a ranking", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let winner = extract_vote(&artifact.content, &surviving, ranker).unwrap_or(surviving[0]);
            let content = artifact.content.clone();
            artifacts.push(artifact);
            (winner, content)
        }
        StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
    };
    let (winning_provider, ranking_text) = winner_idea;
    let winning_idea_content = artifacts
        .iter()
        .find(|a| a.phase == "ideation" && a.producer == Some(winning_provider))
        .map(|a| a.content.clone())
        .unwrap_or(ranking_text);

    let validators: Vec<Provider> = surviving.iter().copied().filter(|&p| p != ranker).take(2).collect();
    let (validations, abort) = if validators.is_empty() {
        (Vec::new(), None)
    } else {
        parallel_phase(ctx, &validators, "validation", "a validation", |provider| {
            let embedded = [("candidate_idea", winning_idea_content.as_str())];
            let assembled = PromptAssembler::assemble(
                provider,
                "Validate the candidate idea below for factual accuracy, feasibility, risks, and supporting evidence.",
                None,
                &prompt,
                &embedded,
                &hist,
            );
            (assembled.system_prompt, assembled.user_prompt)
        })
        .await
    };
    artifacts.extend(validations.clone());
    if let Some(reason) = abort {
        return finish_aborted(ctx, artifacts, reason);
    }

    let elaborator = largest_context_agent(&surviving).unwrap_or(surviving[0]);
    let mut embedded: Vec<(&str, &str)> = vec![("candidate_idea", winning_idea_content.as_str())];
    embedded.extend(validations.iter().filter(|a| a.error.is_none()).map(|a| (a.producer.unwrap().as_str(), a.content.as_str())));
    let assembled = PromptAssembler::assemble(
        elaborator,
        "Elaborate the validated idea below into a complete, actionable answer to the user's question.",
        None,
        &prompt,
        &embedded,
        &hist,
    );
    match single_call(ctx, elaborator, "elaboration", "an elaboration", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let final_text = artifact.content.clone();
            artifacts.push(artifact);
            finish_ok(ctx, final_text, None, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// code_architect — architect, developer, reviewer, tester.
// ---------------------------------------------------------------------
const CODE_ROLES: [&str; 4] = ["architect", "developer", "reviewer", "tester"];

async fn run_code_architect(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    let assignment = assign_roles(&CODE_ROLES, agents);

    let mut artifacts: Vec<Artifact> = Vec::new();
    for (role, provider) in &assignment {
        let directive = match *role {
            "architect" => "Design the architecture that solves the user's request: components, responsibilities, and how they fit together.",
            "developer" => "Implement the architecture described below.",
            "reviewer" => "Review the implementation below for correctness, style and risk.",
            "tester" => "Write tests that exercise the implementation below.",
            _ => unreachable!(),
        };
        let prior: Vec<(&str, &str)> = artifacts
            .last()
            .map(|a: &Artifact| vec![(a.phase.as_str(), a.content.as_str())])
            .unwrap_or_default();
        let assembled = PromptAssembler::assemble(*provider, directive, None, &prompt, &prior, &hist);
        match single_call(ctx, *provider, role, "a contribution", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => artifacts.push(artifact),
            StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
        }
    }

    let section = |phase: &str, heading: &str| {
        artifacts
            .iter()
            .find(|a| a.phase == phase)
            .map(|a| format!("## {heading}\n\n{}", a.content))
            .unwrap_or_default()
    };
    let final_text = [
        section("architect", "Architecture"),
        section("developer", "Implementation"),
        section("reviewer", "Review"),
        section("tester", "Tests"),
    ]
    .join("\n\n");
    finish_ok(ctx, final_text, None, artifacts)
}

// ---------------------------------------------------------------------
// adversarial_debate — proponent, opponent, rebuttal, synthesis.
// ---------------------------------------------------------------------
async fn run_adversarial_debate(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    if agents.is_empty() {
        return finish_aborted(ctx, vec![], AbortReason::NoAgents);
    }
    let proponent = agents[0];
    let opponent = agents.get(1).copied().unwrap_or(proponent);
    let synthesizer = agents.get(2).copied().unwrap_or(proponent);

    let mut artifacts = Vec::new();
    let assembled = PromptAssembler::assemble(proponent, "Argue for the best answer to the user's question.", None, &prompt, &[], &hist);
    let opening = match single_call(ctx, proponent, "proponent_opening", "an opening argument", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let content = artifact.content.clone();
            artifacts.push(artifact);
            content
        }
        StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
    };

    let embedded = [("proponent_argument", opening.as_str())];
    let assembled = PromptAssembler::assemble(opponent, "Argue against the position below; find its weak points.", None, &prompt, &embedded, &hist);
    let rebuttal_in = match single_call(ctx, opponent, "opponent_rebuttal", "a rebuttal", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let content = artifact.content.clone();
            artifacts.push(artifact);
            content
        }
        StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
    };

    let embedded = [("opponent_rebuttal", rebuttal_in.as_str())];
    let assembled = PromptAssembler::assemble(proponent, "Respond to the opposing rebuttal below and defend or refine your position.", None, &prompt, &embedded, &hist);
    let rebuttal_out = match single_call(ctx, proponent, "proponent_rebuttal", "a rebuttal", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let content = artifact.content.clone();
            artifacts.push(artifact);
            content
        }
        StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
    };

    let embedded = [("proponent_argument", opening.as_str()), ("opponent_rebuttal", rebuttal_in.as_str()), ("proponent_rebuttal", rebuttal_out.as_str())];
    let directive = "Synthesize a final answer from the debate below. Respond in two clearly labeled sections: FINAL ANSWER and RATIONALE.";
    let assembled = PromptAssembler::assemble(synthesizer, directive, None, &prompt, &embedded, &hist);
    match single_call(ctx, synthesizer, "synthesis", "a synthesis", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let (final_text, rationale) = split_final_and_rationale(&artifact.content);
            artifacts.push(artifact);
            finish_ok(ctx, final_text, rationale, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// expert_panel — fixed expert roles, then a moderated integration.
// ---------------------------------------------------------------------
const EXPERT_ROLES: [&str; 4] = ["Technical Expert", "Business Strategist", "UX Specialist", "Risk & Compliance Analyst"];

async fn run_expert_panel(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    let roles = &EXPERT_ROLES[..EXPERT_ROLES.len().min(agents.len())];
    let assignment = assign_roles(roles, agents);

    let mut artifacts = Vec::new();
    for (role, provider) in &assignment {
        let directive = format!("Speak from the perspective of a {role}. Address the user's question from that lens only.");
        let assembled = PromptAssembler::assemble(*provider, &directive, None, &prompt, &[], &hist);
        match single_call(ctx, *provider, "panel", "a panel perspective", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => artifacts.push(Artifact { phase: format!("panel:{role}"), ..artifact }),
            StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
        }
    }

    let moderator = largest_context_agent(&artifacts.iter().filter_map(|a| a.producer).collect::<Vec<_>>()).unwrap_or(agents[0]);
    let embedded: Vec<(&str, &str)> = artifacts.iter().map(|a| (a.phase.as_str(), a.content.as_str())).collect();
    let directive = "Simulate a dialogue between the panelists below, then issue one integrated recommendation.";
    let assembled = PromptAssembler::assemble(moderator, directive, None, &prompt, &embedded, &hist);
    match single_call(ctx, moderator, "moderation", "a moderated recommendation", assembled.system_prompt, assembled.user_prompt).await {
        StepOutcome::Continue(artifact) => {
            let final_text = artifact.content.clone();
            artifacts.push(artifact);
            finish_ok(ctx, final_text, None, artifacts)
        }
        StepOutcome::Abort(reason) => finish_aborted(ctx, artifacts, reason),
    }
}

// ---------------------------------------------------------------------
// scenario_analysis — trends analyst, scenario builder, strategist.
// ---------------------------------------------------------------------
const SCENARIO_ROLES: [&str; 3] = ["trends analyst", "scenario builder", "strategist"];

async fn run_scenario_analysis(ctx: &RunContext<'_>, agents: &[Provider]) -> CollaborationResult {
    let prompt = ctx.options.prompt.clone();
    let hist = history(ctx);
    let assignment = assign_roles(&SCENARIO_ROLES, agents);

    let mut artifacts: Vec<Artifact> = Vec::new();
    for (role, provider) in &assignment {
        let directive = match *role {
            "trends analyst" => "Identify the key trends relevant to the user's question.".to_string(),
            "scenario builder" => "Build plausible future scenarios from the trends below.".to_string(),
            "strategist" => "Recommend a strategy given the scenarios below.".to_string(),
            _ => unreachable!(),
        };
        let prior: Vec<(&str, &str)> = artifacts
            .last()
            .map(|a: &Artifact| vec![(a.phase.as_str(), a.content.as_str())])
            .unwrap_or_default();
        let assembled = PromptAssembler::assemble(*provider, &directive, None, &prompt, &prior, &hist);
        let phase = match *role {
            "trends analyst" => "trends",
            "scenario builder" => "scenarios",
            _ => "strategy",
        };
        match single_call(ctx, *provider, phase, "an analysis", assembled.system_prompt, assembled.user_prompt).await {
            StepOutcome::Continue(artifact) => artifacts.push(artifact),
            StepOutcome::Abort(reason) => return finish_aborted(ctx, artifacts, reason),
        }
    }

    let final_text = artifacts.last().map(|a| a.content.clone()).unwrap_or_default();
    let rationale = artifacts
        .iter()
        .find(|a| a.phase == "trends")
        .map(|a| format!("Grounded in these trends:\n\n{}", a.content));
    finish_ok(ctx, final_text, rationale, artifacts)
}
