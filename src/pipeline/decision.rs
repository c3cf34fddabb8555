//! Final decision synthesis.
//!
//! Deterministic: the same stage results always give the same decision.
//!
//! - Synthesizer succeeded: its verdict, with confidence discounted by the
//!   share of failed analysts.
//! - Synthesizer failed: average the scores of successful analysts and map
//!   the average onto buy/hold/sell.
//!
//! Confidence never drops below `MIN_CONFIDENCE`.

use std::collections::HashSet;

use crate::constants::decision::{
    BUY_THRESHOLD, DEFAULT_SYNTH_CONFIDENCE, FACTORS_PER_AGENT, FALLBACK_CONFIDENCE_SCALE,
    HOLD_THRESHOLD, MIN_CONFIDENCE, NEUTRAL_SCORE,
};
use crate::types::{AgentResult, FinalDecision, Recommendation, StageResult};

/// Combine every stage result and the synthesizer's output into the decision
pub fn synthesize_decision(stages: &[StageResult], synthesizer: &AgentResult) -> FinalDecision {
    let analysts: Vec<&AgentResult> = stages.iter().flat_map(|s| s.results.iter()).collect();
    let total = analysts.len() + 1;
    let failed_agents: Vec<String> = analysts
        .iter()
        .copied()
        .chain(std::iter::once(synthesizer))
        .filter(|r| !r.success)
        .map(|r| r.agent_name.clone())
        .collect();
    let failed = failed_agents.len();

    if synthesizer.success {
        from_synthesizer(synthesizer, &analysts, total, failed_agents)
    } else {
        score_average_fallback(&analysts, total, failed, failed_agents)
    }
}

fn from_synthesizer(
    synthesizer: &AgentResult,
    analysts: &[&AgentResult],
    total: usize,
    failed_agents: Vec<String>,
) -> FinalDecision {
    let failure_rate = failed_agents.len() as f64 / total as f64;
    let base = synthesizer.confidence.unwrap_or(DEFAULT_SYNTH_CONFIDENCE);
    let confidence = (base * (1.0 - failure_rate)).clamp(MIN_CONFIDENCE, 1.0);

    let overall_score = synthesizer
        .score
        .or_else(|| average_score(analysts))
        .unwrap_or(NEUTRAL_SCORE);
    let recommendation = synthesizer
        .recommendation
        .unwrap_or_else(|| recommendation_for(overall_score));

    let mut key_decision_factors = synthesizer.key_insights.clone();
    let mut risk_assessment = synthesizer.risks.clone();
    if !failed_agents.is_empty() {
        key_decision_factors.push(failure_notice(&failed_agents, total));
        risk_assessment.push(format!(
            "Decision made without input from: {}",
            failed_agents.join(", ")
        ));
    }

    let action_plan = synthesizer
        .supporting_data
        .get("action_plan")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|plan| !plan.trim().is_empty())
        .unwrap_or_else(|| default_action_plan(recommendation));

    FinalDecision {
        overall_score,
        recommendation,
        confidence,
        key_decision_factors,
        risk_assessment,
        action_plan,
        degraded: false,
        failed_agents,
    }
}

fn score_average_fallback(
    analysts: &[&AgentResult],
    total: usize,
    failed: usize,
    failed_agents: Vec<String>,
) -> FinalDecision {
    let (overall_score, recommendation) = match average_score(analysts) {
        Some(avg) => (avg, recommendation_for(avg)),
        None => (NEUTRAL_SCORE, Recommendation::Hold),
    };

    let availability = (total - failed) as f64 / total as f64;
    let confidence = (FALLBACK_CONFIDENCE_SCALE * availability).clamp(MIN_CONFIDENCE, 1.0);

    let successful: Vec<&AgentResult> = analysts.iter().copied().filter(|r| r.success).collect();
    let mut key_decision_factors: Vec<String> = successful
        .iter()
        .flat_map(|r| {
            r.key_insights
                .iter()
                .take(FACTORS_PER_AGENT)
                .map(move |insight| format!("{}: {}", r.agent_name, insight))
        })
        .collect();
    key_decision_factors.push(failure_notice(&failed_agents, total));

    let mut seen = HashSet::new();
    let mut risk_assessment: Vec<String> = successful
        .iter()
        .flat_map(|r| r.risks.iter())
        .filter(|risk| seen.insert(risk.as_str()))
        .cloned()
        .collect();
    risk_assessment.push(
        "Decision synthesizer unavailable; verdict is a score average of the remaining analysts"
            .to_string(),
    );

    FinalDecision {
        overall_score,
        recommendation,
        confidence,
        key_decision_factors,
        risk_assessment,
        action_plan: default_action_plan(recommendation),
        degraded: true,
        failed_agents,
    }
}

/// Mean score over successful analysts that reported one
fn average_score(analysts: &[&AgentResult]) -> Option<f64> {
    let scores: Vec<f64> = analysts
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.score)
        .collect();
    (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64)
}

fn recommendation_for(score: f64) -> Recommendation {
    if score >= BUY_THRESHOLD {
        Recommendation::Buy
    } else if score >= HOLD_THRESHOLD {
        Recommendation::Hold
    } else {
        Recommendation::Sell
    }
}

fn failure_notice(failed_agents: &[String], total: usize) -> String {
    format!(
        "{} of {} analysts failed ({}); confidence reduced accordingly",
        failed_agents.len(),
        total,
        failed_agents.join(", ")
    )
}

fn default_action_plan(recommendation: Recommendation) -> String {
    match recommendation {
        Recommendation::StrongBuy | Recommendation::Buy => {
            "Build a position in tranches and review on the next earnings release"
        }
        Recommendation::Hold => "Keep existing exposure and wait for a clearer signal",
        Recommendation::Sell | Recommendation::StrongSell => {
            "Reduce exposure and reassess once the risks listed above abate"
        }
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentType;
    use proptest::prelude::*;
    use serde_json::json;

    fn ok(name: &str, score: f64) -> AgentResult {
        let mut result = AgentResult::new(name, AgentType::Technical)
            .with_score(score)
            .with_confidence(0.7);
        result.key_insights = vec![format!("{} insight a", name), format!("{} insight b", name), "extra".into()];
        result.risks = vec!["liquidity".into()];
        result
    }

    fn failed(name: &str) -> AgentResult {
        AgentResult::failed(name, AgentType::Risk, "boom")
    }

    fn synth(confidence: f64) -> AgentResult {
        let mut result = AgentResult::new("Chief", AgentType::ChiefDecision)
            .with_score(68.0)
            .with_recommendation(Recommendation::Buy)
            .with_confidence(confidence);
        result.key_insights = vec!["earnings momentum".into()];
        result.risks = vec!["rich valuation".into()];
        result
            .supporting_data
            .insert("action_plan".into(), json!("Accumulate below 12"));
        result
    }

    fn stages(results: Vec<AgentResult>) -> Vec<StageResult> {
        vec![StageResult::new("analysis", results, 10)]
    }

    #[test]
    fn test_two_of_seven_failed_discounts_confidence() {
        let stages = stages(vec![
            ok("a", 60.0),
            ok("b", 70.0),
            ok("c", 80.0),
            ok("d", 50.0),
            failed("e"),
            failed("f"),
        ]);
        let decision = synthesize_decision(&stages, &synth(0.8));

        assert!((decision.confidence - 0.8 * 5.0 / 7.0).abs() < 1e-9);
        assert!((decision.confidence - 0.571).abs() < 1e-3);
        assert_eq!(decision.recommendation, Recommendation::Buy);
        assert_eq!(decision.overall_score, 68.0);
        assert_eq!(decision.action_plan, "Accumulate below 12");
        assert!(!decision.degraded);
        assert_eq!(decision.failed_agents, vec!["e", "f"]);
        assert_eq!(decision.key_decision_factors[0], "earnings momentum");
        assert!(decision.key_decision_factors.last().unwrap().contains("2 of 7"));
        assert!(decision.risk_assessment.iter().any(|r| r.contains("e, f")));
    }

    #[test]
    fn test_no_failures_keeps_synthesizer_lists() {
        let decision = synthesize_decision(&stages(vec![ok("a", 60.0)]), &synth(0.8));
        assert_eq!(decision.confidence, 0.8);
        assert_eq!(decision.key_decision_factors, vec!["earnings momentum"]);
        assert_eq!(decision.risk_assessment, vec!["rich valuation"]);
    }

    #[test]
    fn test_synthesizer_without_confidence_uses_default() {
        let mut chief = synth(0.8);
        chief.confidence = None;
        let decision = synthesize_decision(&stages(vec![ok("a", 60.0)]), &chief);
        assert_eq!(decision.confidence, DEFAULT_SYNTH_CONFIDENCE);
    }

    #[test]
    fn test_fallback_averages_successful_scores() {
        let stages = stages(vec![ok("a", 80.0), ok("b", 70.0), failed("c")]);
        let decision = synthesize_decision(&stages, &failed("Chief"));

        assert!(decision.degraded);
        assert_eq!(decision.overall_score, 75.0);
        assert_eq!(decision.recommendation, Recommendation::Buy);
        // 2 of 4 available
        assert!((decision.confidence - 0.3).abs() < 1e-9);
        assert_eq!(decision.failed_agents, vec!["c", "Chief"]);
        // Two insights per successful analyst, plus the notice
        assert_eq!(decision.key_decision_factors.len(), 5);
        assert_eq!(decision.key_decision_factors[0], "a: a insight a");
        assert_eq!(decision.risk_assessment.len(), 2);
    }

    #[test]
    fn test_fallback_thresholds() {
        let hold = synthesize_decision(&stages(vec![ok("a", 40.0)]), &failed("Chief"));
        assert_eq!(hold.recommendation, Recommendation::Hold);
        let sell = synthesize_decision(&stages(vec![ok("a", 39.9)]), &failed("Chief"));
        assert_eq!(sell.recommendation, Recommendation::Sell);
    }

    #[test]
    fn test_everything_failed_is_neutral_and_floored() {
        let stages = stages(vec![failed("a"), failed("b")]);
        let decision = synthesize_decision(&stages, &failed("Chief"));
        assert_eq!(decision.overall_score, NEUTRAL_SCORE);
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.confidence, MIN_CONFIDENCE);
    }

    proptest! {
        #[test]
        fn prop_confidence_bounds(
            synth_confidence in 0.1f64..=1.0,
            outcomes in proptest::collection::vec(any::<bool>(), 1..12),
            synth_ok in any::<bool>(),
        ) {
            let results: Vec<AgentResult> = outcomes
                .iter()
                .enumerate()
                .map(|(i, &ok_)| if ok_ { ok(&format!("a{i}"), 55.0) } else { failed(&format!("a{i}")) })
                .collect();
            let any_failed = outcomes.iter().any(|o| !o) || !synth_ok;
            let chief = if synth_ok { synth(synth_confidence) } else { failed("Chief") };

            let decision = synthesize_decision(&stages(results), &chief);

            prop_assert!(decision.confidence >= MIN_CONFIDENCE);
            prop_assert!(decision.confidence <= 1.0);
            prop_assert!((0.0..=100.0).contains(&decision.overall_score));
            if synth_ok && any_failed {
                prop_assert!(decision.confidence <= synth_confidence);
            }
        }
    }
}
