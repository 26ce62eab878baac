//! Loss-pair to tunnel-condition mapping.
//!
//! Pure function, no I/O: given a [`LossPair`] and the configured loss
//! threshold, decide which of the five measured statuses applies. Mirrors
//! the coordinator's `scheduler.py::check_tunnel` classification half.

use crate::probe::LossPair;
use crate::state::TunnelStatus;

/// One loss value counts as "ok" when it is strictly below `loss_ok_percent`.
fn ok_loss(loss: f64, loss_ok_percent: f64) -> bool {
    loss < loss_ok_percent
}

/// Result of classifying one probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: TunnelStatus,
    /// Whether this round should increment the confirm counter rather than
    /// reset it. Only `PUBLIC_OK_GRE_BAD` accumulates bad rounds — the other
    /// outcomes reset the counter to zero.
    pub increments_bad_rounds: bool,
}

/// Classify one round's loss measurements per the 2x2 truth table:
///
/// | public ok | gre ok | status                 |
/// |-----------|--------|-------------------------|
/// | yes       | yes    | `OK`                    |
/// | no        | no     | `FILTERED_OR_DOWN`      |
/// | yes       | no     | `PUBLIC_OK_GRE_BAD`     |
/// | no        | yes    | `WEIRD_PUBLIC_BAD_GRE_OK` |
pub fn classify(loss: LossPair, loss_ok_percent: f64) -> Classification {
    let pub_ok = ok_loss(loss.public_loss, loss_ok_percent);
    let gre_ok = ok_loss(loss.gre_loss, loss_ok_percent);

    match (pub_ok, gre_ok) {
        (true, true) => Classification {
            status: TunnelStatus::Ok,
            increments_bad_rounds: false,
        },
        (false, false) => Classification {
            status: TunnelStatus::FilteredOrDown,
            increments_bad_rounds: false,
        },
        (true, false) => Classification {
            status: TunnelStatus::PublicOkGreBad,
            increments_bad_rounds: true,
        },
        (false, true) => Classification {
            status: TunnelStatus::WeirdPublicBadGreOk,
            increments_bad_rounds: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss(public_loss: f64, gre_loss: f64) -> LossPair {
        LossPair {
            public_loss,
            gre_loss,
        }
    }

    #[test]
    fn both_ok_is_ok() {
        let c = classify(loss(0.0, 0.0), 20.0);
        assert_eq!(c.status, TunnelStatus::Ok);
        assert!(!c.increments_bad_rounds);
    }

    #[test]
    fn both_bad_is_filtered_or_down() {
        let c = classify(loss(100.0, 100.0), 20.0);
        assert_eq!(c.status, TunnelStatus::FilteredOrDown);
        assert!(!c.increments_bad_rounds);
    }

    #[test]
    fn public_ok_gre_bad_accumulates() {
        let c = classify(loss(0.0, 100.0), 20.0);
        assert_eq!(c.status, TunnelStatus::PublicOkGreBad);
        assert!(c.increments_bad_rounds);
    }

    #[test]
    fn weird_case_does_not_accumulate() {
        let c = classify(loss(100.0, 0.0), 20.0);
        assert_eq!(c.status, TunnelStatus::WeirdPublicBadGreOk);
        assert!(!c.increments_bad_rounds);
    }

    #[test]
    fn threshold_is_strict_below() {
        // exactly at the threshold counts as bad, not ok
        let c = classify(loss(20.0, 0.0), 20.0);
        assert_eq!(c.status, TunnelStatus::WeirdPublicBadGreOk);
    }
}
