//! Best-effort extraction of analyst fields from model text.
//!
//! JSON is tried first. When the model answered in prose, a handful of
//! keyword patterns (English and Chinese) pull out score, recommendation,
//! confidence, and bulleted insights/risks. Fields that cannot be found stay
//! unset.

use regex::Regex;
use serde_json::{Map, Value};

use super::json_repair::JsonRepairer;
use crate::types::{
    LensError, ParseWithDefault, Recommendation, Result, json_f64, json_string,
    json_string_array,
};

/// Fields recovered from one model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnalysis {
    /// Prose summary, or the whole response when no summary field exists
    pub analysis: String,
    /// 0-100
    pub score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    /// 0.0-1.0
    pub confidence: Option<f64>,
    pub key_insights: Vec<String>,
    pub risks: Vec<String>,
    /// Remaining JSON members (e.g. `action_plan`)
    pub extra: Map<String, Value>,
    pub from_json: bool,
}

const INSIGHT_KEYS: &[&str] = &["key_insights", "insights", "key_decision_factors"];
const RISK_KEYS: &[&str] = &["risks", "risk_assessment", "key_risks"];
const SCORE_KEYS: &[&str] = &["score", "overall_score"];
const SUMMARY_KEYS: &[&str] = &["analysis", "summary"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Insights,
    Risks,
}

pub struct ResponseParser {
    repairer: JsonRepairer,
    score: Regex,
    confidence: Regex,
    recommendation: Regex,
    bullet: Regex,
}

impl ResponseParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| LensError::Config(format!("invalid extraction pattern: {}", e)))
        };
        Ok(Self {
            repairer: JsonRepairer::new(),
            score: compile(
                r"(?i)(?:overall\s+score|score|综合评分|评分|得分)\s*[:：=]?\s*(\d{1,3}(?:\.\d+)?)",
            )?,
            confidence: compile(r"(?i)(?:confidence|置信度|信心)\s*[:：=]?\s*(\d+(?:\.\d+)?)\s*(%)?")?,
            recommendation: compile(
                r"(?i)(?:recommendation|rating|投资建议|建议|评级)\s*[:：=]?\s*\**\s*(strong[\s_-]*buy|strong[\s_-]*sell|buy|hold|sell|强烈买入|强烈卖出|买入|增持|持有|中性|减持|卖出)",
            )?,
            bullet: compile(r"^\s*(?:[-*•]|\d+[.)、])\s+(.+?)\s*$")?,
        })
    }

    pub fn parse(&self, content: &str) -> ParsedAnalysis {
        if let Ok((Value::Object(object), _)) = self.repairer.parse_or_repair(content) {
            return Self::from_object(object, content);
        }
        self.from_text(content)
    }

    fn from_object(mut object: Map<String, Value>, raw: &str) -> ParsedAnalysis {
        let value = Value::Object(object.clone());
        let first_list = |keys: &[&str]| {
            keys.iter()
                .map(|k| json_string_array(&value, k))
                .find(|list| !list.is_empty())
                .unwrap_or_default()
        };

        let parsed = ParsedAnalysis {
            analysis: SUMMARY_KEYS
                .iter()
                .find_map(|k| json_string(&value, k))
                .unwrap_or_else(|| raw.trim().to_string()),
            score: SCORE_KEYS
                .iter()
                .find_map(|k| json_f64(&value, k))
                .filter(|s| (0.0..=100.0).contains(s)),
            recommendation: json_string(&value, "recommendation")
                .and_then(|r| parse_recommendation(&r)),
            confidence: json_f64(&value, "confidence").and_then(normalize_confidence),
            key_insights: first_list(INSIGHT_KEYS),
            risks: first_list(RISK_KEYS),
            extra: Map::new(),
            from_json: true,
        };

        for key in INSIGHT_KEYS
            .iter()
            .chain(RISK_KEYS)
            .chain(SCORE_KEYS)
            .chain(SUMMARY_KEYS)
            .chain(&["recommendation", "confidence"])
        {
            object.remove(*key);
        }

        ParsedAnalysis {
            extra: object,
            ..parsed
        }
    }

    fn from_text(&self, content: &str) -> ParsedAnalysis {
        let score = self
            .score
            .captures(content)
            .and_then(|c| c[1].parse::<f64>().ok())
            .filter(|s| (0.0..=100.0).contains(s));

        let confidence = self.confidence.captures(content).and_then(|c| {
            let value = c[1].parse::<f64>().ok()?;
            if c.get(2).is_some() {
                normalize_confidence(value / 100.0)
            } else {
                normalize_confidence(value)
            }
        });

        let recommendation = self
            .recommendation
            .captures(content)
            .and_then(|c| parse_recommendation(&c[1]));

        let (key_insights, risks) = self.bulleted_sections(content);

        ParsedAnalysis {
            analysis: content.trim().to_string(),
            score,
            recommendation,
            confidence,
            key_insights,
            risks,
            extra: Map::new(),
            from_json: false,
        }
    }

    /// Bullets under an insight-like heading vs a risk-like heading
    fn bulleted_sections(&self, content: &str) -> (Vec<String>, Vec<String>) {
        let mut insights = Vec::new();
        let mut risks = Vec::new();
        let mut section = None;

        for line in content.lines() {
            if let Some(caps) = self.bullet.captures(line) {
                let item = caps[1].trim_matches('*').trim().to_string();
                match section {
                    Some(Section::Insights) if !item.is_empty() => insights.push(item),
                    Some(Section::Risks) if !item.is_empty() => risks.push(item),
                    _ => {}
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let is_heading = trimmed.starts_with('#')
                || trimmed.ends_with(':')
                || trimmed.ends_with('：')
                || (trimmed.starts_with("**") && trimmed.ends_with("**"));
            if is_heading {
                section = classify_heading(trimmed);
            }
        }

        (insights, risks)
    }
}

fn classify_heading(heading: &str) -> Option<Section> {
    let lower = heading.to_lowercase();
    if lower.contains("risk") || heading.contains("风险") {
        Some(Section::Risks)
    } else if lower.contains("insight")
        || lower.contains("highlight")
        || lower.contains("factor")
        || heading.contains("要点")
        || heading.contains("亮点")
        || heading.contains("因素")
    {
        Some(Section::Insights)
    } else {
        None
    }
}

/// English variants go through the enum's own parser; Chinese rating words map by meaning
fn parse_recommendation(raw: &str) -> Option<Recommendation> {
    match raw.trim() {
        "强烈买入" => Some(Recommendation::StrongBuy),
        "买入" | "增持" => Some(Recommendation::Buy),
        "持有" | "中性" => Some(Recommendation::Hold),
        "减持" | "卖出" => Some(Recommendation::Sell),
        "强烈卖出" => Some(Recommendation::StrongSell),
        other => {
            let normalized: String = other
                .to_lowercase()
                .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("_");
            Recommendation::try_parse(&normalized)
        }
    }
}

/// Accept 0-1 or 0-100 scales
fn normalize_confidence(value: f64) -> Option<f64> {
    match value {
        v if (0.0..=1.0).contains(&v) => Some(v),
        v if v > 1.0 && v <= 100.0 => Some(v / 100.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::new().unwrap()
    }

    #[test]
    fn test_json_response() {
        let parsed = parser().parse(
            r#"```json
{"analysis": "Margins are widening.", "score": 78, "recommendation": "Strong Buy",
 "confidence": "85%", "key_insights": ["ROE 18%"], "risks": ["rate cuts"],
 "action_plan": "Accumulate below 12"}
```"#,
        );
        assert!(parsed.from_json);
        assert_eq!(parsed.analysis, "Margins are widening.");
        assert_eq!(parsed.score, Some(78.0));
        assert_eq!(parsed.recommendation, Some(Recommendation::StrongBuy));
        assert_eq!(parsed.confidence, Some(0.85));
        assert_eq!(parsed.key_insights, vec!["ROE 18%"]);
        assert_eq!(parsed.risks, vec!["rate cuts"]);
        assert_eq!(parsed.extra["action_plan"], "Accumulate below 12");
        assert!(!parsed.extra.contains_key("score"));
    }

    #[test]
    fn test_json_synthesizer_keys() {
        let parsed = parser().parse(
            r#"{"overall_score": 61, "key_decision_factors": ["valuation"], "risk_assessment": ["policy"]}"#,
        );
        assert_eq!(parsed.score, Some(61.0));
        assert_eq!(parsed.key_insights, vec!["valuation"]);
        assert_eq!(parsed.risks, vec!["policy"]);
        assert_eq!(parsed.recommendation, None);
    }

    #[test]
    fn test_prose_response() {
        let text = "## Summary\nThe trend is intact.\n\
                    Score: 72/100\nRecommendation: **buy**\nConfidence: 0.7\n\n\
                    ### Key Insights\n- Volume expanding\n- MACD crossed up\n\n\
                    ### Risks\n1. Overbought RSI\n2) Sector rotation\n";
        let parsed = parser().parse(text);
        assert!(!parsed.from_json);
        assert_eq!(parsed.score, Some(72.0));
        assert_eq!(parsed.recommendation, Some(Recommendation::Buy));
        assert_eq!(parsed.confidence, Some(0.7));
        assert_eq!(parsed.key_insights, vec!["Volume expanding", "MACD crossed up"]);
        assert_eq!(parsed.risks, vec!["Overbought RSI", "Sector rotation"]);
    }

    #[test]
    fn test_chinese_prose() {
        let text = "综合评分：65分\n投资建议：增持\n置信度：80%\n风险提示：\n- 行业政策变化";
        let parsed = parser().parse(text);
        assert_eq!(parsed.score, Some(65.0));
        assert_eq!(parsed.recommendation, Some(Recommendation::Buy));
        assert_eq!(parsed.confidence, Some(0.8));
        assert_eq!(parsed.risks, vec!["行业政策变化"]);
    }

    #[test]
    fn test_missing_fields_stay_unset() {
        let parsed = parser().parse("Nothing structured here at all.");
        assert_eq!(parsed.score, None);
        assert_eq!(parsed.recommendation, None);
        assert_eq!(parsed.confidence, None);
        assert!(parsed.key_insights.is_empty());
        assert_eq!(parsed.analysis, "Nothing structured here at all.");
    }

    #[test]
    fn test_out_of_range_score_ignored() {
        let parsed = parser().parse("Score: 250");
        assert_eq!(parsed.score, None);
    }

    #[test]
    fn test_strong_sell_variants() {
        assert_eq!(
            parse_recommendation("Strong-Sell"),
            Some(Recommendation::StrongSell)
        );
        assert_eq!(parse_recommendation("strong buy"), Some(Recommendation::StrongBuy));
        assert_eq!(parse_recommendation("accumulate"), None);
    }
}
