//! Market data for one run.
//!
//! Sections are fetched lazily and at most once through `safe_fetch`, so a
//! stage-1 analyst that needs `realtime_data` and the gate that checks it
//! share one request. A failed fetch yields `Value::Null`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use super::safe_call::safe_fetch;
use crate::types::{LensError, Result, ResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSection {
    BasicInfo,
    RealtimeData,
    FinancialData,
    PriceHistory,
    News,
    FundFlow,
    IndustryData,
}

impl DataSection {
    pub const COUNT: usize = 7;

    pub const ALL: [DataSection; Self::COUNT] = [
        DataSection::BasicInfo,
        DataSection::RealtimeData,
        DataSection::FinancialData,
        DataSection::PriceHistory,
        DataSection::News,
        DataSection::FundFlow,
        DataSection::IndustryData,
    ];

    /// Sections the gate inspects
    pub const ESSENTIAL: [DataSection; 3] = [
        DataSection::BasicInfo,
        DataSection::RealtimeData,
        DataSection::FinancialData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSection::BasicInfo => "basic_info",
            DataSection::RealtimeData => "realtime_data",
            DataSection::FinancialData => "financial_data",
            DataSection::PriceHistory => "price_history",
            DataSection::News => "news",
            DataSection::FundFlow => "fund_flow",
            DataSection::IndustryData => "industry_data",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for DataSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where raw market data comes from
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(&self, stock_code: &str, section: DataSection) -> Result<Value>;

    fn name(&self) -> &str;
}

pub type SharedDataSource = Arc<dyn MarketDataSource>;

/// Per-run memo of fetched sections
pub struct MarketData {
    stock_code: String,
    source: SharedDataSource,
    cells: [OnceCell<Value>; DataSection::COUNT],
}

impl MarketData {
    pub fn new(stock_code: impl Into<String>, source: SharedDataSource) -> Self {
        Self {
            stock_code: stock_code.into(),
            source,
            cells: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    pub fn stock_code(&self) -> &str {
        &self.stock_code
    }

    /// Fetch on first use; concurrent callers wait for the same fetch
    pub async fn get(&self, section: DataSection) -> &Value {
        self.cells[section.slot()]
            .get_or_init(|| {
                safe_fetch(
                    section.as_str(),
                    self.source.fetch(&self.stock_code, section),
                    Value::Null,
                )
            })
            .await
    }

    pub async fn prefetch(&self, sections: &[DataSection]) {
        join_all(sections.iter().map(|&section| self.get(section))).await;
    }
}

/// Reads `<root>/<stock_code>/<section>.json`
pub struct SnapshotDirSource {
    root: PathBuf,
}

impl SnapshotDirSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn section_path(&self, stock_code: &str, section: DataSection) -> PathBuf {
        self.root
            .join(stock_code)
            .join(format!("{}.json", section.as_str()))
    }
}

#[async_trait]
impl MarketDataSource for SnapshotDirSource {
    async fn fetch(&self, stock_code: &str, section: DataSection) -> Result<Value> {
        if stock_code.is_empty() || stock_code.contains(['/', '\\', '.']) {
            return Err(LensError::Config(format!("invalid stock code '{}'", stock_code)));
        }
        let path = self.section_path(stock_code, section);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context_fn(|| format!("Failed to read snapshot {}", path.display()))?;
        debug!(path = %path.display(), bytes = raw.len(), "Snapshot loaded");
        Ok(serde_json::from_str(&raw)?)
    }

    fn name(&self) -> &str {
        "snapshot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for CountingSource {
        async fn fetch(&self, _stock_code: &str, section: DataSection) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            match section {
                DataSection::News => Err(LensError::Storage("feed offline".into())),
                _ => Ok(json!({ "section": section.as_str() })),
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_section_fetched_once_under_concurrency() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let data = MarketData::new("000001", source.clone());

        let (a, b, c) = tokio::join!(
            data.get(DataSection::RealtimeData),
            data.get(DataSection::RealtimeData),
            data.get(DataSection::RealtimeData),
        );
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_yields_null() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let data = MarketData::new("000001", source.clone());
        data.prefetch(&DataSection::ALL).await;
        assert_eq!(data.get(DataSection::News).await, &Value::Null);
        assert_eq!(data.get(DataSection::FundFlow).await["section"], "fund_flow");
        // Failures are cached too, not refetched
        assert_eq!(source.calls.load(Ordering::SeqCst), DataSection::ALL.len());
    }

    #[tokio::test]
    async fn test_snapshot_dir_source() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("000001")).unwrap();
        std::fs::write(
            dir.path().join("000001").join("realtime_data.json"),
            r#"{"price": 12.5}"#,
        )
        .unwrap();

        let source = SnapshotDirSource::new(dir.path());
        let value = source
            .fetch("000001", DataSection::RealtimeData)
            .await
            .unwrap();
        assert_eq!(value["price"], 12.5);

        assert!(source.fetch("000001", DataSection::News).await.is_err());
        assert!(source.fetch("../etc", DataSection::News).await.is_err());
    }
}
