//! Netting and valuation properties of the position ledger over fill
//! sequences.

use squareoff::services::ledger;
use squareoff::types::{Exchange, Position, PositionType};

fn position() -> Position {
    Position::open(
        "user-1".to_string(),
        "wallet-1".to_string(),
        "ACME".to_string(),
        Exchange::Primary,
        PositionType::Delivery,
        10_000_000,
        1_000,
    )
}

#[test]
fn test_total_value_consistency_over_fill_sequences() {
    // For all fill sequences: total_value == |quantity| * average_price
    // whenever quantity != 0.
    let sequences: Vec<Vec<(f64, f64)>> = vec![
        vec![(10.0, 100.0), (5.0, 120.0), (-8.0, 110.0)],
        vec![(-20.0, 50.0), (5.0, 55.0), (30.0, 48.0), (-15.0, 52.0)],
        vec![(1.0, 999.75), (-2.0, 1_000.25), (1.0, 998.5), (4.0, 1_001.0)],
        vec![(100.0, 10.0), (-99.0, 12.0), (40.0, 11.0)],
    ];

    for (s, fills) in sequences.iter().enumerate() {
        let mut position = position();
        for (f, (quantity, price)) in fills.iter().enumerate() {
            ledger::apply_fill(
                &mut position,
                *quantity,
                *price,
                &format!("seq{s}-fill{f}"),
                2_000 + f as i64,
            )
            .unwrap();

            if position.quantity != 0.0 {
                let expected = position.quantity.abs() * position.average_price;
                assert!(
                    (position.total_value - expected).abs() < 1e-9,
                    "sequence {s} fill {f}: total_value {} vs |qty|*avg {}",
                    position.total_value,
                    expected
                );
            }
            assert!(position.average_price >= 0.0);
            assert!(position.total_value >= 0.0);
        }
    }
}

#[test]
fn test_flip_example_from_long_to_short() {
    let mut position = position();
    ledger::apply_fill(&mut position, 10.0, 100.0, "o1", 2_000).unwrap();
    ledger::apply_fill(&mut position, -15.0, 110.0, "o2", 2_100).unwrap();

    assert_eq!(position.quantity, -5.0);
    assert_eq!(position.total_value, 650.0);
    assert_eq!(position.average_price, 130.0);
}

#[test]
fn test_pnl_sign_property_from_single_price() {
    // Long and short of the same size see opposite P&L from one mark.
    let mut long = position();
    ledger::apply_fill(&mut long, 10.0, 100.0, "o1", 2_000).unwrap();
    let mut short = position();
    ledger::apply_fill(&mut short, -10.0, 100.0, "o1", 2_000).unwrap();

    for mark in [80.0, 95.0, 100.0, 105.0, 140.0] {
        ledger::mark_price(&mut long, mark, 3_000);
        ledger::mark_price(&mut short, mark, 3_000);

        assert_eq!(long.unrealized_pnl, long.current_value - long.total_value);
        assert_eq!(
            short.unrealized_pnl,
            short.total_value - short.current_value
        );
        assert!(
            (long.unrealized_pnl + short.unrealized_pnl).abs() < 1e-9,
            "long and short P&L must mirror at mark {mark}"
        );
    }
}

#[test]
fn test_close_to_flat_keeps_residual_as_realized_record() {
    // Selling the full long at a higher price leaves quantity 0 and the
    // residual (realized P&L magnitude) in total_value.
    let mut position = position();
    ledger::apply_fill(&mut position, 10.0, 100.0, "o1", 2_000).unwrap();
    ledger::apply_fill(&mut position, -10.0, 110.0, "o2", 2_100).unwrap();

    assert_eq!(position.quantity, 0.0);
    assert_eq!(position.total_value, 100.0);
    // Average price is not rederived at zero quantity.
    assert_eq!(position.average_price, 100.0);
}

#[test]
fn test_expiry_boundary_is_inclusive() {
    let position = position();
    assert!(!ledger::is_expired(&position, position.expires_at - 1));
    assert!(ledger::is_expired(&position, position.expires_at));
}
