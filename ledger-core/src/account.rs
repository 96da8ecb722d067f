//! Account balance guard
//!
//! The account record is owned elsewhere; this core consumes it through
//! exactly two balance mutators, `deposit` and `withdraw`, so the
//! no-overdraft invariant is enforced in one place.

use crate::money::Money;
use crate::types::AccountId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Open and transferable
    Active,
    /// Temporarily blocked
    Frozen,
    /// Permanently closed
    Closed,
}

/// Account with a guarded balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub account_id: AccountId,

    /// Current balance
    pub balance: Money,

    /// Lifecycle status
    pub status: AccountStatus,
}

impl Account {
    /// Create an active account with an opening balance
    pub fn open(account_id: AccountId, balance: Money) -> Self {
        Self {
            account_id,
            balance,
            status: AccountStatus::Active,
        }
    }

    /// Whether transfers may touch this account
    pub fn can_transfer(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Increase the balance; bounded only by the minor-unit range
    pub fn deposit(&mut self, amount: Money) -> Result<()> {
        self.balance = self.balance.add(amount)?;
        Ok(())
    }

    /// Decrease the balance; fails instead of overdrafting
    pub fn withdraw(&mut self, amount: Money) -> Result<()> {
        if amount.greater_than(self.balance) {
            return Err(Error::InsufficientBalance {
                requested: amount.minor_units(),
                available: self.balance.minor_units(),
            });
        }
        self.balance = self.balance.subtract(amount)?;
        Ok(())
    }
}
