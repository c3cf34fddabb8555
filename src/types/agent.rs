//! Analyst result types shared by the pipeline, decision synthesis and store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ai::provider::TokenUsage;
use crate::constants::fallback;
use crate::types::utils::ParseWithDefault;

// =============================================================================
// Agent Type
// =============================================================================

/// Closed set of analyst roles. Also the partitioning key of the execution store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    // Stage 1: consume raw market data
    Technical,
    Fundamental,
    Sentiment,
    FundFlow,
    // Stage 2: consume stage-1 results
    Risk,
    Industry,
    Valuation,
    // Stage 3: synthesizer
    ChiefDecision,
}

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        AgentType::Technical,
        AgentType::Fundamental,
        AgentType::Sentiment,
        AgentType::FundFlow,
        AgentType::Risk,
        AgentType::Industry,
        AgentType::Valuation,
        AgentType::ChiefDecision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Technical => "technical",
            AgentType::Fundamental => "fundamental",
            AgentType::Sentiment => "sentiment",
            AgentType::FundFlow => "fund_flow",
            AgentType::Risk => "risk",
            AgentType::Industry => "industry",
            AgentType::Valuation => "valuation",
            AgentType::ChiefDecision => "chief_decision",
        }
    }

    /// Pipeline stage (1-3) the role belongs to
    pub fn stage(&self) -> u8 {
        match self {
            AgentType::Technical
            | AgentType::Fundamental
            | AgentType::Sentiment
            | AgentType::FundFlow => 1,
            AgentType::Risk | AgentType::Industry | AgentType::Valuation => 2,
            AgentType::ChiefDecision => 3,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::Technical => "Technical Analyst",
            AgentType::Fundamental => "Fundamental Analyst",
            AgentType::Sentiment => "Sentiment Analyst",
            AgentType::FundFlow => "Fund Flow Analyst",
            AgentType::Risk => "Risk Manager",
            AgentType::Industry => "Industry Analyst",
            AgentType::Valuation => "Valuation Analyst",
            AgentType::ChiefDecision => "Chief Decision Officer",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| {
                format!(
                    "Unknown agent type: {}. Valid values: {}",
                    s,
                    AgentType::ALL.map(|t| t.as_str()).join(", ")
                )
            })
    }
}

// =============================================================================
// Recommendation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "strong_buy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Sell => "sell",
            Recommendation::StrongSell => "strong_sell",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "Strong Buy",
            Recommendation::Buy => "Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Sell => "Sell",
            Recommendation::StrongSell => "Strong Sell",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ParseWithDefault for Recommendation {
    fn type_name() -> &'static str {
        "Recommendation"
    }

    fn default_value() -> Self {
        Recommendation::Hold
    }

    fn try_parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "strong_buy" => Some(Recommendation::StrongBuy),
            "buy" => Some(Recommendation::Buy),
            "hold" => Some(Recommendation::Hold),
            "sell" => Some(Recommendation::Sell),
            "strong_sell" => Some(Recommendation::StrongSell),
            _ => None,
        }
    }
}

// =============================================================================
// Agent Result
// =============================================================================

/// Output of one analyst invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub agent_type: AgentType,
    pub analysis: String,
    /// 0-100
    pub score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    /// 0.0-1.0
    pub confidence: Option<f64>,
    pub key_insights: Vec<String>,
    pub risks: Vec<String>,
    pub supporting_data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl AgentResult {
    /// Empty successful result, filled in by the analyst
    pub fn new(agent_name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            agent_name: agent_name.into(),
            agent_type,
            analysis: String::new(),
            score: None,
            recommendation: None,
            confidence: None,
            key_insights: Vec::new(),
            risks: Vec::new(),
            supporting_data: Map::new(),
            timestamp: Utc::now(),
            processing_time_ms: 0,
            success: true,
            error_message: None,
            usage: None,
            model: None,
            cost_usd: None,
        }
    }

    /// Neutral fallback for a failed invocation.
    ///
    /// Never carries a score and never looks confident.
    pub fn failed(
        agent_name: impl Into<String>,
        agent_type: AgentType,
        error: impl Into<String>,
    ) -> Self {
        let agent_name = agent_name.into();
        let error = error.into();
        Self {
            analysis: format!("{} unavailable: {}", agent_name, error),
            recommendation: Some(Recommendation::Hold),
            confidence: Some(fallback::FAILED_CONFIDENCE),
            key_insights: vec![fallback::INSIGHT.to_string()],
            risks: fallback::RISKS.iter().map(|r| r.to_string()).collect(),
            success: false,
            error_message: Some(error),
            ..Self::new(agent_name, agent_type)
        }
    }

    /// Score clamped to 0-100
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 100.0));
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = Some(recommendation);
        self
    }

    /// Confidence clamped to 0.0-1.0
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = analysis.into();
        self
    }

    /// Ranges hold and failures look unconfident
    pub fn is_well_formed(&self) -> bool {
        let score_ok = self.score.is_none_or(|s| (0.0..=100.0).contains(&s));
        let confidence_ok = self.confidence.is_none_or(|c| (0.0..=1.0).contains(&c));
        let failure_ok = self.success
            || (self.recommendation == Some(Recommendation::Hold)
                && self
                    .confidence
                    .is_some_and(|c| c <= fallback::MAX_FAILED_CONFIDENCE));
        score_ok && confidence_ok && failure_ok
    }
}

// =============================================================================
// Stage Result
// =============================================================================

/// One pipeline stage's output. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub results: Vec<AgentResult>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage_name: impl Into<String>, results: Vec<AgentResult>, elapsed_ms: u64) -> Self {
        Self {
            stage_name: stage_name.into(),
            results,
            processing_time_ms: elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn successful(&self) -> impl Iterator<Item = &AgentResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &AgentResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

// =============================================================================
// Final Decision
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalDecision {
    /// 0-100
    pub overall_score: f64,
    pub recommendation: Recommendation,
    /// 0.0-1.0
    pub confidence: f64,
    pub key_decision_factors: Vec<String>,
    pub risk_assessment: Vec<String>,
    pub action_plan: String,
    /// The synthesizer failed and the score-averaging fallback was used
    pub degraded: bool,
    pub failed_agents: Vec<String>,
}
