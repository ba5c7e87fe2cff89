//! Position Ledger
//!
//! Netting, valuation, and square-off arithmetic for a single position.
//! Every function here is a pure transformation of the [`Position`] state it
//! is handed plus its inputs; persistence and locking live elsewhere
//! (coordinator + store). Callers must hold exclusive access to the position.

use crate::types::Position;
use thiserror::Error;

/// Arithmetic/state-invariant violations. These are never swallowed: a
/// duplicate fill must surface rather than silently re-apply.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Order {order_id} already applied to position")]
    DuplicateFill { order_id: String },

    #[error("Position is closed")]
    PositionClosed,

    #[error("Invalid fill: {0}")]
    InvalidFill(String),
}

/// Apply a fill to the position, netting it into the signed quantity and
/// volume-weighted average price.
///
/// Total value is carried *signed* through the intermediate computation and
/// converted back to a magnitude at the end, which makes direction flips
/// (long 10, sell 15 -> short 5) come out with a freshly derived average
/// price instead of a stale one.
pub fn apply_fill(
    position: &mut Position,
    delta_quantity: f64,
    price: f64,
    order_id: &str,
    now: i64,
) -> Result<(), LedgerError> {
    if position.is_squared_off || position.converted_to_holding {
        return Err(LedgerError::PositionClosed);
    }
    if delta_quantity == 0.0 {
        return Err(LedgerError::InvalidFill("zero quantity".to_string()));
    }
    if price < 0.0 {
        return Err(LedgerError::InvalidFill(format!("negative price {price}")));
    }
    if position.order_ids.iter().any(|id| id == order_id) {
        return Err(LedgerError::DuplicateFill {
            order_id: order_id.to_string(),
        });
    }

    let signed_total_value = if position.quantity >= 0.0 {
        position.total_value
    } else {
        -position.total_value
    };

    let new_quantity = position.quantity + delta_quantity;
    let new_total_value = signed_total_value + delta_quantity * price;

    position.total_value = new_total_value.abs();
    if new_quantity != 0.0 {
        position.average_price = (new_total_value / new_quantity).abs();
    }
    position.quantity = new_quantity;
    position.order_ids.push(order_id.to_string());
    position.updated_at = now;

    Ok(())
}

/// Revalue the position at a new market price.
pub fn mark_price(position: &mut Position, current_price: f64, now: i64) {
    position.current_price = current_price;
    position.current_value = position.quantity.abs() * current_price;

    position.unrealized_pnl = if position.quantity > 0.0 {
        position.current_value - position.total_value
    } else {
        position.total_value - position.current_value
    };

    position.unrealized_pnl_pct = if position.total_value != 0.0 {
        position.unrealized_pnl / position.total_value.abs() * 100.0
    } else {
        0.0
    };

    position.updated_at = now;
}

/// Close the position. Quantity is zeroed; average price and total value are
/// kept as the historical record of the entry.
pub fn square_off(position: &mut Position, order_id: &str, now: i64) {
    position.is_squared_off = true;
    position.quantity = 0.0;
    position.square_off_order_id = Some(order_id.to_string());
    position.updated_at = now;
}

/// Whether the position's lifecycle window has elapsed. Inclusive: a
/// position expiring at exactly `now` is expired.
pub fn is_expired(position: &Position, now: i64) -> bool {
    now >= position.expires_at
}
