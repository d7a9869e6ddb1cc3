//! Cumulative monthly batches over a normalized message stream.

use crate::error::{Error, Result};
use crate::types::Message;
use std::collections::{BTreeMap, BTreeSet};

/// Months with fewer distinct titles than this are skipped.
pub const MIN_TITLES: usize = 2;

/// Display title of one `(chat_name, branch_id)` group.
pub fn display_title(chat_name: &str, branch_id: &str) -> String {
    format!("{} (Branch {})", chat_name, branch_id)
}

/// Everything up to and including one month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthBatch {
    pub month_year: String,
    /// Every message with `month_year <= self.month_year`, input order
    pub messages: Vec<Message>,
    /// Distinct group titles, ordered by `(chat_name, branch_id)`
    pub titles: Vec<String>,
}

impl MonthBatch {
    pub fn total_conversations(&self) -> usize {
        self.titles.len()
    }

    /// Too few titles to cluster
    pub fn is_sparse(&self) -> bool {
        self.titles.len() < MIN_TITLES
    }
}

/// Splits messages into ascending cumulative month batches.
pub struct MonthlyBatcher {
    messages: Vec<Message>,
    months: Vec<String>,
}

impl MonthlyBatcher {
    /// Fails with [`Error::NoData`] when there is no message to batch.
    pub fn new(messages: Vec<Message>) -> Result<Self> {
        let months: BTreeSet<String> = messages.iter().map(Message::month_year).collect();
        if months.is_empty() {
            return Err(Error::NoData("export contains no timestamped messages".to_string()));
        }
        Ok(Self {
            messages,
            months: months.into_iter().collect(),
        })
    }

    /// Distinct months, ascending
    pub fn months(&self) -> &[String] {
        &self.months
    }

    pub fn total_months(&self) -> usize {
        self.months.len()
    }

    /// Cumulative batch for one month key.
    pub fn batch(&self, month_year: &str) -> MonthBatch {
        let messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.month_year().as_str() <= month_year)
            .cloned()
            .collect();

        let groups: BTreeSet<(&str, &str)> = messages
            .iter()
            .map(|m| (m.chat_name.as_str(), m.branch_id.as_str()))
            .collect();
        let titles = groups
            .into_iter()
            .map(|(name, branch)| display_title(name, branch))
            .collect();

        MonthBatch {
            month_year: month_year.to_string(),
            messages,
            titles,
        }
    }

    /// All batches in ascending month order.
    pub fn batches(&self) -> impl Iterator<Item = MonthBatch> + '_ {
        self.months.iter().map(|m| self.batch(m))
    }
}

/// Messages per month key; used for reporting.
pub fn month_counts(messages: &[Message]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for m in messages {
        *counts.entry(m.month_year()).or_insert(0) += 1;
    }
    counts
}
