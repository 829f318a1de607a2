//! Lock module - table locks held by the caller's transaction while DDL runs.
//!
//! The system manager never locks tables itself. Every operation that scans a table or changes
//! its schema takes a [`TableGuard`] and checks that it covers the table with the required mode.

use std::fmt;

/// Identifier of the transaction a lock (or an index insert) is performed on behalf of.
pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Returns `true` if holding lock in this mode is enough for an operation requiring `required`.
    pub fn covers(self, required: LockMode) -> bool {
        self == LockMode::Exclusive || required == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Lock on a single table granted to transaction `txn` by the caller's lock manager.
/// The lock is held for as long as the caller keeps it, the system manager only inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGuard {
    txn: TransactionId,
    table_name: String,
    mode: LockMode,
}

impl TableGuard {
    pub fn new(txn: TransactionId, table_name: impl Into<String>, mode: LockMode) -> Self {
        TableGuard {
            txn,
            table_name: table_name.into(),
            mode,
        }
    }

    pub fn shared(txn: TransactionId, table_name: impl Into<String>) -> Self {
        Self::new(txn, table_name, LockMode::Shared)
    }

    pub fn exclusive(txn: TransactionId, table_name: impl Into<String>) -> Self {
        Self::new(txn, table_name, LockMode::Exclusive)
    }

    pub fn txn(&self) -> TransactionId {
        self.txn
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Returns `true` if the guard locks `table_name` at least in `required` mode.
    pub fn covers(&self, table_name: &str, required: LockMode) -> bool {
        self.table_name == table_name && self.mode.covers(required)
    }
}
