//! Expense-by-category chart model.

use indexmap::IndexMap;
use ratatui::style::Color;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::state::{Transaction, TxnKind};

pub const TITLE: &str = "Expense Summary by Category";

/// Slice colours, reused in order when there are more categories than colours.
pub const PALETTE: [Color; 6] = [
    Color::Rgb(0xFF, 0x63, 0x84),
    Color::Rgb(0x36, 0xA2, 0xEB),
    Color::Rgb(0xFF, 0xCE, 0x56),
    Color::Rgb(0x4B, 0xC0, 0xC0),
    Color::Rgb(0x99, 0x66, 0xFF),
    Color::Rgb(0xFF, 0x9F, 0x40),
];

/// Sum of expense amounts per category name, in order of first appearance.
/// Revenue is ignored.
pub fn expense_summary(txns: &[Transaction]) -> IndexMap<String, Decimal> {
    let mut summary: IndexMap<String, Decimal> = IndexMap::new();
    for t in txns.iter().filter(|t| t.kind == TxnKind::Expense) {
        *summary.entry(t.category.0.clone()).or_insert(Decimal::ZERO) += t.amount.0;
    }
    summary
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub label: String,
    pub value: Decimal,
    /// Percentage of the total, 0..=100.
    pub share: f64,
    pub color: Color,
}

/// One rendered chart. Rebuilt from scratch on every transaction reload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseChart {
    pub slices: Vec<Slice>,
    pub total: Decimal,
}

impl ExpenseChart {
    pub fn from_transactions(txns: &[Transaction]) -> Self {
        Self::from_summary(&expense_summary(txns))
    }

    pub fn from_summary(summary: &IndexMap<String, Decimal>) -> Self {
        let total: Decimal = summary.values().copied().sum();
        let slices = summary
            .iter()
            .enumerate()
            .map(|(i, (label, value))| Slice {
                label: label.clone(),
                value: *value,
                share: share_of(*value, total),
                color: PALETTE[i % PALETTE.len()],
            })
            .collect();
        Self { slices, total }
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

fn share_of(value: Decimal, total: Decimal) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    (value / total * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}
