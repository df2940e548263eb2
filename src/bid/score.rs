//! Bid scoring.
//!
//! `score = alpha * price + beta / (response_time_seconds + 1) + gamma * weight`
//!
//! The first term rewards higher bids, the second rewards earliness (it is
//! strictly decreasing in response time), the third rewards reputation.
//! The coefficients are session-scoped and immutable once a session starts,
//! so a bidder's score only ever changes through their own resubmission.

/// Pure and deterministic: equal inputs yield bitwise-equal outputs.
pub fn bid_score(
    alpha: f64,
    beta: f64,
    gamma: f64,
    price: f64,
    response_time_seconds: f64,
    weight: f64,
) -> f64 {
    alpha * price + beta / (response_time_seconds + 1.0) + gamma * weight
}
