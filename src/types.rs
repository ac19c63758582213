//! Common types for bridge transfers
//!
//! Direction and status enums shared by the store, the journal and the
//! command surface. Both carry sqlx::Type so they can be bound directly in
//! journal queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which way a transfer moves value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
pub enum Direction {
    /// Lock on Ethereum, mint wrapped tokens on Solana
    EthToSol,
    /// Burn wrapped tokens on Solana, release on Ethereum
    SolToEth,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::EthToSol => "eth_to_sol",
            Direction::SolToEth => "sol_to_eth",
        }
    }

    /// Prefix used when minting transaction ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Direction::EthToSol => "eth_sol",
            Direction::SolToEth => "sol_eth",
        }
    }

    /// Terminal status reached when the destination step succeeds
    pub fn success_status(&self) -> Status {
        match self {
            Direction::EthToSol => Status::Minted,
            Direction::SolToEth => Status::Released,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth_to_sol" => Ok(Direction::EthToSol),
            "sol_to_eth" => Ok(Direction::SolToEth),
            other => Err(format!("unknown bridge direction: {}", other)),
        }
    }
}

/// Lifecycle status of a bridge transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Locked,
    Recovering,
    Stuck,
    AdminReview,
    Minted,
    Released,
    Failed,
    Cancelled,
}

impl Status {
    /// Get the status as a snake_case string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Locked => "locked",
            Status::Recovering => "recovering",
            Status::Stuck => "stuck",
            Status::AdminReview => "admin_review",
            Status::Minted => "minted",
            Status::Released => "released",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Minted | Status::Released | Status::Failed | Status::Cancelled
        )
    }

    /// Transitions the orchestrator, detector and recovery engine may make.
    pub fn can_advance_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (*self, next),
            (Pending, Locked)
                | (Pending, Stuck)
                | (Pending, Failed)
                | (Locked, Minted)
                | (Locked, Released)
                | (Locked, Stuck)
                | (Stuck, Recovering)
                | (Stuck, AdminReview)
                | (Recovering, Minted)
                | (Recovering, Released)
                | (Recovering, Stuck)
                | (Recovering, AdminReview)
                | (Recovering, Failed)
        )
    }

    /// Transitions only an operator override may force.
    ///
    /// RECOVERING is excluded: an attempt is in flight and owns the record.
    pub fn can_override_to(&self, next: Status) -> bool {
        if self.is_terminal() || *self == Status::Recovering {
            return false;
        }
        matches!(
            next,
            Status::Cancelled
                | Status::Minted
                | Status::Released
                | Status::Stuck
                | Status::AdminReview
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "locked" => Ok(Status::Locked),
            "recovering" => Ok(Status::Recovering),
            "stuck" => Ok(Status::Stuck),
            "admin_review" => Ok(Status::AdminReview),
            "minted" => Ok(Status::Minted),
            "released" => Ok(Status::Released),
            "failed" => Ok(Status::Failed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(format!("unknown bridge status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 9] = [
        Status::Pending,
        Status::Locked,
        Status::Recovering,
        Status::Stuck,
        Status::AdminReview,
        Status::Minted,
        Status::Released,
        Status::Failed,
        Status::Cancelled,
    ];

    #[test]
    fn test_status_as_str_round_trips() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("unknown".parse::<Status>().is_err());
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_advance_to(to), "{} -> {}", from, to);
                assert!(!from.can_override_to(to), "{} -> {} (override)", from, to);
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(Status::Pending.can_advance_to(Status::Locked));
        assert!(Status::Locked.can_advance_to(Status::Minted));
        assert!(Status::Locked.can_advance_to(Status::Released));
        assert!(!Status::Pending.can_advance_to(Status::Minted));
    }

    #[test]
    fn test_recovery_transitions() {
        assert!(Status::Locked.can_advance_to(Status::Stuck));
        assert!(Status::Stuck.can_advance_to(Status::Recovering));
        assert!(Status::Recovering.can_advance_to(Status::Stuck));
        assert!(Status::Recovering.can_advance_to(Status::AdminReview));
        assert!(Status::Stuck.can_advance_to(Status::AdminReview));
        assert!(!Status::AdminReview.can_advance_to(Status::Stuck));
        assert!(!Status::Locked.can_advance_to(Status::Failed));
    }

    #[test]
    fn test_override_transitions() {
        assert!(Status::AdminReview.can_override_to(Status::Cancelled));
        assert!(Status::Stuck.can_override_to(Status::Minted));
        assert!(Status::Locked.can_override_to(Status::Cancelled));
        assert!(Status::AdminReview.can_override_to(Status::Stuck));
        assert!(!Status::Recovering.can_override_to(Status::Cancelled));
        assert!(!Status::Stuck.can_override_to(Status::Failed));
        assert!(!Status::Stuck.can_override_to(Status::Recovering));
    }

    #[test]
    fn test_direction_success_status() {
        assert_eq!(Direction::EthToSol.success_status(), Status::Minted);
        assert_eq!(Direction::SolToEth.success_status(), Status::Released);
        assert_eq!(format!("{}", Direction::SolToEth), "sol_to_eth");
    }
}
