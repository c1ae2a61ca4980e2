//! Payment settlement for action results
//!
//! Sign convention: a positive amount charges the caller, a negative amount
//! pays the caller. The caller authorizes a bound with the invocation and the
//! settled amount may never exceed it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PaymentError {
    #[error("payment amount {0} is not a finite number")]
    NotFinite(f64),

    #[error("payment {requested} exceeds the authorized amount {authorized}")]
    ExceedsAuthorization { requested: f64, authorized: f64 },

    #[error("payment {0} charges the caller but no payment was authorized")]
    Unauthorized(f64),
}

/// Direction of a settled amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Charge,
    Payout,
    None,
}

pub fn direction(amount: f64) -> Direction {
    if amount > 0.0 {
        Direction::Charge
    } else if amount < 0.0 {
        Direction::Payout
    } else {
        Direction::None
    }
}

/// Check a handler's requested amount against what the caller authorized.
///
/// With an authorization `a`, any `requested <= a` is accepted: a positive
/// `a` caps the charge, a negative `a` is the minimum payout the caller asked
/// for. Without one, only payouts are accepted. Zero always settles: no
/// money moves.
pub fn settle(authorized: Option<f64>, requested: f64) -> Result<f64, PaymentError> {
    if !requested.is_finite() {
        return Err(PaymentError::NotFinite(requested));
    }
    if requested == 0.0 {
        return Ok(0.0);
    }
    match authorized {
        Some(a) if a.is_finite() => {
            if requested > a {
                Err(PaymentError::ExceedsAuthorization {
                    requested,
                    authorized: a,
                })
            } else {
                Ok(requested)
            }
        }
        Some(a) => Err(PaymentError::NotFinite(a)),
        None if requested > 0.0 => Err(PaymentError::Unauthorized(requested)),
        None => Ok(requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction() {
        assert_eq!(direction(0.25), Direction::Charge);
        assert_eq!(direction(-3.0), Direction::Payout);
        assert_eq!(direction(0.0), Direction::None);
    }

    #[test]
    fn test_charge_within_authorization() {
        assert_eq!(settle(Some(1.0), 0.5), Ok(0.5));
        assert_eq!(settle(Some(1.0), 1.0), Ok(1.0));
    }

    #[test]
    fn test_charge_over_authorization() {
        assert_eq!(
            settle(Some(1.0), 1.5),
            Err(PaymentError::ExceedsAuthorization {
                requested: 1.5,
                authorized: 1.0
            })
        );
    }

    #[test]
    fn test_negative_authorization_is_minimum_payout() {
        // Caller asked to be paid at least 2
        assert_eq!(settle(Some(-2.0), -2.0), Ok(-2.0));
        assert_eq!(settle(Some(-2.0), -5.0), Ok(-5.0));
        assert!(settle(Some(-2.0), -1.0).is_err());
        // Declining the deal moves no money
        assert_eq!(settle(Some(-2.0), 0.0), Ok(0.0));
    }

    #[test]
    fn test_no_authorization() {
        assert_eq!(settle(None, 0.0), Ok(0.0));
        assert_eq!(settle(None, -1.0), Ok(-1.0));
        assert_eq!(settle(None, 0.1), Err(PaymentError::Unauthorized(0.1)));
    }

    #[test]
    fn test_non_finite() {
        assert!(matches!(settle(Some(1.0), f64::NAN), Err(PaymentError::NotFinite(_))));
        assert!(matches!(settle(None, f64::INFINITY), Err(PaymentError::NotFinite(_))));
        assert!(matches!(settle(Some(f64::NAN), 0.5), Err(PaymentError::NotFinite(_))));
    }
}
