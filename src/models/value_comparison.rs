use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::generate_id;
use crate::plugins::traits::BestDirection;

/// Snapshot of every source's current value for a product at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueComparison {
    pub id: String,
    pub product_id: String,
    pub sources: Vec<SourceComparison>,
    pub best_source_id: String,
    pub best_value: serde_json::Value,
    pub worst_source_id: Option<String>,
    pub worst_value: Option<serde_json::Value>,
    pub average: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceComparison {
    pub source_id: String,
    pub store_name: String,
    pub value: serde_json::Value,
    pub formatted_value: String,
    pub scalar: Option<f64>,
    pub url: String,
}

impl ValueComparison {
    /// `best_source_id` comes from the tracker's own pairwise reduction; worst and average
    /// are derived from the plugin-provided scalars.
    pub fn new(
        product_id: String,
        sources: Vec<SourceComparison>,
        best_source_id: &str,
        direction: BestDirection,
    ) -> Result<Self, String> {
        let best = sources
            .iter()
            .find(|s| s.source_id == best_source_id)
            .ok_or_else(|| format!("Best source {} is not part of the comparison", best_source_id))?;
        let best_value = best.value.clone();

        let scored: Vec<(&SourceComparison, f64)> = sources
            .iter()
            .filter_map(|s| s.scalar.map(|v| (s, v)))
            .collect();

        let worst = match direction {
            BestDirection::Lowest => scored
                .iter()
                .fold(None::<&(&SourceComparison, f64)>, |acc, item| match acc {
                    Some(current) if current.1 >= item.1 => Some(current),
                    _ => Some(item),
                }),
            BestDirection::Highest => scored
                .iter()
                .fold(None::<&(&SourceComparison, f64)>, |acc, item| match acc {
                    Some(current) if current.1 <= item.1 => Some(current),
                    _ => Some(item),
                }),
        };

        let average = if scored.is_empty() {
            None
        } else {
            Some(scored.iter().map(|(_, v)| v).sum::<f64>() / scored.len() as f64)
        };

        Ok(Self {
            id: generate_id(),
            product_id,
            best_source_id: best_source_id.to_string(),
            best_value,
            worst_source_id: worst.map(|(s, _)| s.source_id.clone()),
            worst_value: worst.map(|(s, _)| s.value.clone()),
            average,
            sources,
            timestamp: Utc::now(),
        })
    }

    fn scalar_of(&self, source_id: &str) -> Option<f64> {
        self.sources
            .iter()
            .find(|s| s.source_id == source_id)
            .and_then(|s| s.scalar)
    }

    /// Distance between the worst and best scalar.
    pub fn savings(&self) -> Option<f64> {
        let worst = self.scalar_of(self.worst_source_id.as_deref()?)?;
        let best = self.scalar_of(&self.best_source_id)?;
        Some((worst - best).abs())
    }

    pub fn savings_percentage(&self) -> Option<f64> {
        let savings = self.savings()?;
        let worst = self.scalar_of(self.worst_source_id.as_deref()?)?;
        if worst.abs() > f64::EPSILON {
            Some(savings / worst.abs() * 100.0)
        } else {
            None
        }
    }
}
