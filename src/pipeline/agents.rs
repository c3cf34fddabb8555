//! Analysts
//!
//! Stage 1 analysts read raw market data sections. Stage 2 analysts read the
//! stage 1 results. The chief decision analyst reads everything before it,
//! failures included. All of them share one LLM-backed runner that differs
//! only in role, focus, and inputs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::data::{DataSection, MarketData};
use crate::ai::{
    ChatMessage, GenerationConfig, MetricsCollector, ModelClient, ParsedAnalysis, ResponseParser,
};
use crate::types::{AgentResult, AgentType, LensError, Result};

/// What an analyst sees for one run
pub struct AnalysisContext<'a> {
    pub stock_code: &'a str,
    pub data: &'a MarketData,
    /// Results of earlier stages, failed ones included
    pub prior: &'a [AgentResult],
    pub metrics: Option<&'a MetricsCollector>,
}

#[async_trait]
pub trait Analyst: Send + Sync {
    fn name(&self) -> &str;

    fn agent_type(&self) -> AgentType;

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> Result<AgentResult>;
}

pub type SharedAnalyst = Arc<dyn Analyst>;

/// Analysts grouped by the stage that runs them
#[derive(Clone)]
pub struct Roster {
    pub stage1: Vec<SharedAnalyst>,
    pub stage2: Vec<SharedAnalyst>,
    pub synthesizer: SharedAnalyst,
}

// =============================================================================
// LLM Analyst
// =============================================================================

/// Role description for one LLM-backed analyst
#[derive(Debug, Clone)]
pub struct AnalystProfile {
    pub agent_type: AgentType,
    pub focus: &'static str,
    /// Raw data read by stage 1 analysts; empty for later stages
    pub sections: Vec<DataSection>,
}

pub struct LlmAnalyst {
    profile: AnalystProfile,
    client: Arc<ModelClient>,
    generation: GenerationConfig,
    parser: Arc<ResponseParser>,
}

impl LlmAnalyst {
    pub fn new(
        profile: AnalystProfile,
        client: Arc<ModelClient>,
        generation: GenerationConfig,
        parser: Arc<ResponseParser>,
    ) -> Self {
        Self {
            profile,
            client,
            generation,
            parser,
        }
    }

    fn system_prompt(&self) -> String {
        let fields = if self.profile.agent_type == AgentType::ChiefDecision {
            r#"{"analysis": str, "overall_score": 0-100, "recommendation": "strong_buy|buy|hold|sell|strong_sell", "confidence": 0-1, "key_decision_factors": [str], "risk_assessment": [str], "action_plan": str}"#
        } else {
            r#"{"analysis": str, "score": 0-100, "recommendation": "strong_buy|buy|hold|sell|strong_sell", "confidence": 0-1, "key_insights": [str], "risks": [str]}"#
        };
        format!(
            "You are the {} of an equity research team. Focus: {}.\n\
             Answer with a single JSON object: {}",
            self.profile.agent_type.display_name(),
            self.profile.focus,
            fields
        )
    }

    async fn user_prompt(&self, ctx: &AnalysisContext<'_>) -> Result<String> {
        let mut inputs = serde_json::Map::new();
        for &section in &self.profile.sections {
            inputs.insert(section.as_str().to_string(), ctx.data.get(section).await.clone());
        }
        if !ctx.prior.is_empty() {
            let prior: Vec<Value> = ctx.prior.iter().map(prior_summary).collect();
            inputs.insert("prior_analyses".to_string(), Value::Array(prior));
        }

        Ok(format!(
            "Stock: {}\n\nInputs:\n{}",
            ctx.stock_code,
            serde_json::to_string_pretty(&Value::Object(inputs))?
        ))
    }
}

/// Compact view of an earlier result; failures say so explicitly
fn prior_summary(result: &AgentResult) -> Value {
    if result.success {
        json!({
            "agent": result.agent_name,
            "type": result.agent_type.as_str(),
            "score": result.score,
            "recommendation": result.recommendation.map(|r| r.as_str()),
            "confidence": result.confidence,
            "key_insights": result.key_insights,
            "risks": result.risks,
            "analysis": result.analysis,
        })
    } else {
        json!({
            "agent": result.agent_name,
            "type": result.agent_type.as_str(),
            "failed": true,
            "error": result.error_message,
        })
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    fn name(&self) -> &str {
        self.profile.agent_type.display_name()
    }

    fn agent_type(&self) -> AgentType {
        self.profile.agent_type
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> Result<AgentResult> {
        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_prompt(ctx).await?),
        ];

        let response = self
            .client
            .generate(&messages, &self.generation, ctx.metrics)
            .await?;
        if response.content.trim().is_empty() {
            return Err(LensError::agent(self.name(), "empty model response"));
        }

        let parsed = self.parser.parse(&response.content);
        debug!(
            agent = self.name(),
            from_json = parsed.from_json,
            score = ?parsed.score,
            "Analyst response parsed"
        );

        let mut result = into_result(self.name(), self.profile.agent_type, parsed);
        result.usage = Some(response.usage);
        result.model = Some(response.model);
        result.cost_usd = response.cost_usd;
        Ok(result)
    }
}

fn into_result(name: &str, agent_type: AgentType, parsed: ParsedAnalysis) -> AgentResult {
    let mut result = AgentResult::new(name, agent_type).with_analysis(parsed.analysis);
    if let Some(score) = parsed.score {
        result = result.with_score(score);
    }
    if let Some(recommendation) = parsed.recommendation {
        result = result.with_recommendation(recommendation);
    }
    if let Some(confidence) = parsed.confidence {
        result = result.with_confidence(confidence);
    }
    result.key_insights = parsed.key_insights;
    result.risks = parsed.risks;
    result.supporting_data = parsed.extra;
    result
}

// =============================================================================
// Default Roster
// =============================================================================

pub fn default_profiles() -> Vec<AnalystProfile> {
    use DataSection::*;

    let profile = |agent_type: AgentType, focus: &'static str, sections: &[DataSection]| {
        AnalystProfile {
            agent_type,
            focus,
            sections: sections.to_vec(),
        }
    };

    vec![
        profile(
            AgentType::Technical,
            "price trend, momentum, support and resistance, volume",
            &[RealtimeData, PriceHistory],
        ),
        profile(
            AgentType::Fundamental,
            "profitability, growth, balance sheet strength, cash flow quality",
            &[BasicInfo, FinancialData, IndustryData],
        ),
        profile(
            AgentType::Sentiment,
            "news flow, market mood, event risk",
            &[BasicInfo, News],
        ),
        profile(
            AgentType::FundFlow,
            "institutional and retail capital flows, turnover",
            &[RealtimeData, FundFlow],
        ),
        profile(
            AgentType::Risk,
            "downside scenarios, volatility, leverage, concentration",
            &[],
        ),
        profile(
            AgentType::Industry,
            "sector cycle, competitive position, policy environment",
            &[],
        ),
        profile(
            AgentType::Valuation,
            "relative and intrinsic valuation against the analyses so far",
            &[],
        ),
        profile(
            AgentType::ChiefDecision,
            "weigh every prior analysis, discount failed ones, decide",
            &[],
        ),
    ]
}

/// Four data analysts, three second-opinion analysts, one decision maker
pub fn default_roster(client: Arc<ModelClient>, generation: GenerationConfig) -> Result<Roster> {
    let parser = Arc::new(ResponseParser::new()?);
    let mut stage1: Vec<SharedAnalyst> = Vec::new();
    let mut stage2: Vec<SharedAnalyst> = Vec::new();
    let mut synthesizer: Option<SharedAnalyst> = None;

    for profile in default_profiles() {
        let stage = profile.agent_type.stage();
        let analyst: SharedAnalyst = Arc::new(LlmAnalyst::new(
            profile,
            client.clone(),
            generation.clone(),
            parser.clone(),
        ));
        match stage {
            1 => stage1.push(analyst),
            2 => stage2.push(analyst),
            _ => synthesizer = Some(analyst),
        }
    }

    let synthesizer = synthesizer
        .ok_or_else(|| LensError::Config("roster has no decision analyst".to_string()))?;
    Ok(Roster {
        stage1,
        stage2,
        synthesizer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{GenerationResponse, ModelBackend, ModelRegistry, RetryPolicy};
    use crate::config::SegmentationConfig;
    use crate::pipeline::data::MarketDataSource;
    use crate::types::Recommendation;
    use std::sync::Mutex;

    struct ScriptedBackend {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            config: &GenerationConfig,
        ) -> Result<GenerationResponse> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            Ok(GenerationResponse::content_only(self.reply.clone(), &config.model))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct StaticSource;

    #[async_trait]
    impl MarketDataSource for StaticSource {
        async fn fetch(&self, _stock_code: &str, section: DataSection) -> Result<Value> {
            Ok(json!({ "section": section.as_str(), "price": 12.5 }))
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn client(reply: &str) -> (Arc<ModelClient>, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let client = ModelClient::new(
            backend.clone(),
            Arc::new(ModelRegistry::with_overrides(vec![])),
            SegmentationConfig::default(),
            RetryPolicy::default().with_max_retries(0),
        );
        (Arc::new(client), backend)
    }

    #[test]
    fn test_default_roster_shape() {
        let (client, _) = client("{}");
        let roster = default_roster(client, GenerationConfig::new("gpt-4o-mini")).unwrap();
        assert_eq!(roster.stage1.len(), 4);
        assert_eq!(roster.stage2.len(), 3);
        assert_eq!(roster.synthesizer.agent_type(), AgentType::ChiefDecision);
        assert!(roster.stage1.iter().all(|a| a.agent_type().stage() == 1));
    }

    #[tokio::test]
    async fn test_llm_analyst_reads_sections_and_parses() {
        let (client, backend) = client(
            r#"{"analysis": "uptrend intact", "score": 74, "recommendation": "buy", "confidence": 0.7, "key_insights": ["higher lows"], "risks": ["overbought"]}"#,
        );
        let profile = default_profiles().remove(0);
        let analyst = LlmAnalyst::new(
            profile,
            client,
            GenerationConfig::new("gpt-4o-mini"),
            Arc::new(ResponseParser::new().unwrap()),
        );
        let data = MarketData::new("000001", Arc::new(StaticSource));
        let ctx = AnalysisContext {
            stock_code: "000001",
            data: &data,
            prior: &[],
            metrics: None,
        };

        let result = analyst.analyze(&ctx).await.unwrap();
        assert_eq!(result.score, Some(74.0));
        assert_eq!(result.recommendation, Some(Recommendation::Buy));
        assert_eq!(result.key_insights, vec!["higher lows".to_string()]);
        assert_eq!(result.model.as_deref(), Some("gpt-4o-mini"));

        let prompt = backend.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("realtime_data"));
        assert!(prompt.contains("price_history"));
        assert!(!prompt.contains("financial_data"));
    }

    #[tokio::test]
    async fn test_prior_failures_are_visible_to_later_stages() {
        let (client, backend) = client("Score: 55\nRecommendation: hold");
        let profile = default_profiles()
            .into_iter()
            .find(|p| p.agent_type == AgentType::Risk)
            .unwrap();
        let analyst = LlmAnalyst::new(
            profile,
            client,
            GenerationConfig::new("gpt-4o-mini"),
            Arc::new(ResponseParser::new().unwrap()),
        );
        let data = MarketData::new("000001", Arc::new(StaticSource));
        let prior = vec![AgentResult::failed(
            "Technical Analyst",
            AgentType::Technical,
            "timeout",
        )];
        let ctx = AnalysisContext {
            stock_code: "000001",
            data: &data,
            prior: &prior,
            metrics: None,
        };

        let result = analyst.analyze(&ctx).await.unwrap();
        assert_eq!(result.score, Some(55.0));

        let prompt = backend.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("\"failed\": true"));
        assert!(prompt.contains("timeout"));
        // Stage 2 reads no raw sections
        assert!(!prompt.contains("realtime_data"));
        assert!(!prompt.contains("\"price\": 12.5"));
    }

    #[tokio::test]
    async fn test_empty_response_is_an_error() {
        let (client, _) = client("   ");
        let analyst = LlmAnalyst::new(
            default_profiles().remove(4),
            client,
            GenerationConfig::new("gpt-4o-mini"),
            Arc::new(ResponseParser::new().unwrap()),
        );
        let data = MarketData::new("000001", Arc::new(StaticSource));
        let ctx = AnalysisContext {
            stock_code: "000001",
            data: &data,
            prior: &[],
            metrics: None,
        };
        assert!(analyst.analyze(&ctx).await.is_err());
    }
}
