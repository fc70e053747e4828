//! Annotation Ledger - merged set of price-level lines
//!
//! Two owners share the chart: the user, who edits a free-form list, and
//! system sources (one namespace each) that publish one line per key.
//! Ownership lives in the id variant, so a user edit can never name,
//! replace or delete a system line.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::aggregator::AggregatedIntervalResult;

/// Namespace of the prediction-market lines
pub const POLYMARKET_NAMESPACE: &str = "polymarket";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "owner", rename_all = "snake_case")]
pub enum LineId {
    User { id: String },
    System { namespace: String, key: String },
}

impl LineId {
    pub fn user(id: impl Into<String>) -> Self {
        LineId::User { id: id.into() }
    }

    pub fn system(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        LineId::System {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Fresh id for a user-created line
    pub fn new_user() -> Self {
        Self::user(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, LineId::System { .. })
    }

    pub fn in_namespace(&self, ns: &str) -> bool {
        matches!(self, LineId::System { namespace, .. } if namespace == ns)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineId::User { id } => write!(f, "user:{}", id),
            LineId::System { namespace, key } => write!(f, "system:{}:{}", namespace, key),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationLine {
    pub id: LineId,
    pub price: Decimal,
    pub color: String,
    pub style: LineStyle,
    pub label: String,
    pub width: u8,
}

impl AnnotationLine {
    /// System line for one aggregated interval, drawn at its open price
    pub fn from_result(result: &AggregatedIntervalResult) -> Self {
        Self {
            id: LineId::system(POLYMARKET_NAMESPACE, result.label),
            price: result.open_price,
            color: result.color.to_string(),
            style: LineStyle::Dashed,
            label: format!("{} {}%", result.label, result.traded_probability),
            width: 1,
        }
    }
}

/// Subsets touched by a ledger operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerChange {
    pub user: bool,
    pub system: bool,
}

impl LedgerChange {
    pub const NONE: Self = Self {
        user: false,
        system: false,
    };
    pub const USER: Self = Self {
        user: true,
        system: false,
    };
    pub const SYSTEM: Self = Self {
        user: false,
        system: true,
    };

    pub fn any(&self) -> bool {
        self.user || self.system
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            user: self.user || other.user,
            system: self.system || other.system,
        }
    }
}

/// Result of a user edit after correction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEditReport {
    pub accepted: usize,
    /// System ids present in the edit; ignored, the ledger keeps its own copy
    pub ignored_system: Vec<LineId>,
    pub change: LedgerChange,
}

#[derive(Debug, Default)]
pub struct AnnotationLedger {
    user: Vec<AnnotationLine>,
    system: Vec<AnnotationLine>,
}

impl AnnotationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one system line
    pub fn upsert_system(&mut self, line: AnnotationLine) -> LedgerChange {
        if !line.id.is_system() {
            debug!(id = %line.id, "Refusing user-owned line on the system path");
            return LedgerChange::NONE;
        }
        match self.system.iter_mut().find(|l| l.id == line.id) {
            Some(existing) if *existing == line => LedgerChange::NONE,
            Some(existing) => {
                *existing = line;
                LedgerChange::SYSTEM
            }
            None => {
                self.system.push(line);
                LedgerChange::SYSTEM
            }
        }
    }

    /// Replace every line of `namespace` with `lines`
    ///
    /// Keys missing from `lines` disappear; lines outside the namespace are
    /// dropped, and a duplicated key keeps its last occurrence.
    pub fn replace_namespace(&mut self, namespace: &str, lines: Vec<AnnotationLine>) -> LedgerChange {
        let mut incoming: Vec<AnnotationLine> = Vec::with_capacity(lines.len());
        for line in lines.into_iter().filter(|l| l.id.in_namespace(namespace)) {
            match incoming.iter_mut().find(|l| l.id == line.id) {
                Some(existing) => *existing = line,
                None => incoming.push(line),
            }
        }

        let current: Vec<&AnnotationLine> = self
            .system
            .iter()
            .filter(|l| l.id.in_namespace(namespace))
            .collect();
        if current.len() == incoming.len() && current.iter().zip(&incoming).all(|(a, b)| *a == b) {
            return LedgerChange::NONE;
        }

        self.system.retain(|l| !l.id.in_namespace(namespace));
        self.system.extend(incoming);
        LedgerChange::SYSTEM
    }

    /// Remove one system line
    pub fn remove_system(&mut self, id: &LineId) -> LedgerChange {
        let before = self.system.len();
        self.system.retain(|l| &l.id != id);
        if self.system.len() != before {
            LedgerChange::SYSTEM
        } else {
            LedgerChange::NONE
        }
    }

    /// Remove a whole namespace at once
    pub fn remove_system_namespace(&mut self, namespace: &str) -> LedgerChange {
        let before = self.system.len();
        self.system.retain(|l| !l.id.in_namespace(namespace));
        if self.system.len() != before {
            LedgerChange::SYSTEM
        } else {
            LedgerChange::NONE
        }
    }

    /// Replace the user lines with an edited list
    ///
    /// The edit may echo back system lines it was shown, altered or not, and
    /// may omit them; either way the system set comes out unchanged.
    pub fn set_user_lines(&mut self, lines: Vec<AnnotationLine>) -> UserEditReport {
        let mut report = UserEditReport::default();
        let mut user: Vec<AnnotationLine> = Vec::with_capacity(lines.len());

        for line in lines {
            if line.id.is_system() {
                report.ignored_system.push(line.id);
                continue;
            }
            match user.iter_mut().find(|l| l.id == line.id) {
                Some(existing) => *existing = line,
                None => user.push(line),
            }
        }

        report.accepted = user.len();
        if user != self.user {
            self.user = user;
            report.change = LedgerChange::USER;
        }
        if !report.ignored_system.is_empty() {
            debug!(ignored = report.ignored_system.len(), "System lines in user edit kept as-is");
        }
        report
    }

    /// User lines first, then system lines
    pub fn visible_lines(&self) -> Vec<AnnotationLine> {
        self.user.iter().chain(self.system.iter()).cloned().collect()
    }

    pub fn user_lines(&self) -> &[AnnotationLine] {
        &self.user
    }

    pub fn system_lines(&self) -> &[AnnotationLine] {
        &self.system
    }

    pub fn get(&self, id: &LineId) -> Option<&AnnotationLine> {
        self.user
            .iter()
            .chain(self.system.iter())
            .find(|l| &l.id == id)
    }

    pub fn len(&self) -> usize {
        self.user.len() + self.system.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
