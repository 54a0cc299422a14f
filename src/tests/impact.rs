use crate::{
    config::{ImpactConfig, ImpactModelConfig},
    impact::{AlmgrenChriss, Impact, ImpactModel, ImpactRecord, Linear, MarketImpact, SquareRoot},
    types::Side,
};

fn almgren_chriss() -> AlmgrenChriss {
    AlmgrenChriss {
        eta: 0.01,
        gamma: 0.001,
        epsilon: 0.0,
        horizon: 1.0,
    }
}

#[test]
fn test_almgren_chriss_components() {
    let impact = almgren_chriss().impact(Side::Bid, 100, 0.02);
    assert!((impact.temporary - 0.02).abs() < 1e-12);
    assert!((impact.permanent - 0.002).abs() < 1e-12);

    // Sells push the price down
    let impact = almgren_chriss().impact(Side::Ask, 100, 0.02);
    assert!(impact.temporary < 0.0);
    assert!(impact.permanent < 0.0);
}

#[test]
fn test_zero_volume_has_no_impact() {
    let model = AlmgrenChriss {
        epsilon: 0.5,
        ..almgren_chriss()
    };
    assert_eq!(model.impact(Side::Bid, 0, 0.02), Impact::default());
}

#[test]
fn test_square_root_is_concave() {
    let model = SquareRoot {
        beta: 1.0,
        daily_volume: 10_000.0,
        permanent_fraction: 0.5,
    };
    let small = model.impact(Side::Bid, 100, 0.02).temporary;
    let large = model.impact(Side::Bid, 400, 0.02).temporary;

    assert!((large / small - 2.0).abs() < 1e-9);
    assert!((model.impact(Side::Bid, 100, 0.02).permanent - small / 2.0).abs() < 1e-12);
}

#[test]
fn test_linear_split() {
    let model = Linear {
        alpha: 0.001,
        permanent_fraction: 0.25,
    };
    let impact = model.impact(Side::Ask, 1000, 0.5);
    assert!((impact.temporary + 0.75).abs() < 1e-12);
    assert!((impact.permanent + 0.25).abs() < 1e-12);
}

#[test]
fn test_execution_cost_is_positive_for_both_sides() {
    let model = almgren_chriss();
    let buy = model.execution_cost(Side::Bid, 100, 0.02);
    let sell = model.execution_cost(Side::Ask, 100, 0.02);

    // 100 * (0.02 + 0.002 / 2)
    assert!((buy - 2.1).abs() < 1e-9);
    assert!((buy - sell).abs() < 1e-12);
}

#[test]
fn test_temporary_impact_decays() {
    let mut impact = MarketImpact::new(Box::new(almgren_chriss()), 0.5);
    impact.on_trade(0.0, Side::Bid, 100, 0.02);

    let mut previous = impact.temporary_offset(0.0);
    assert!(previous > 0.0);
    for step in 1..20 {
        let current = impact.temporary_offset(step as f64 * 0.25);
        assert!(current < previous);
        assert!(current > 0.0);
        previous = current;
    }

    // Permanent part stays put
    assert!((impact.permanent_offset() - 0.002).abs() < 1e-12);
}

#[test]
fn test_record_value_matches_exponential() {
    let record = ImpactRecord {
        origin: 2.0,
        magnitude: 1.0,
        decay_rate: 0.5,
    };
    assert_eq!(record.value_at(2.0), 1.0);
    assert!((record.value_at(4.0) - (-1.0f64).exp()).abs() < 1e-12);
    // Before the trade the contribution is at full strength
    assert_eq!(record.value_at(1.0), 1.0);
}

#[test]
fn test_decayed_records_are_pruned() {
    let mut impact = MarketImpact::new(Box::new(almgren_chriss()), 5.0);
    impact.on_trade(0.0, Side::Bid, 100, 0.02);
    impact.on_trade(0.0, Side::Ask, 50, 0.02);
    assert_eq!(impact.records().count(), 2);

    let offset = impact.current_offset(100.0);
    assert_eq!(impact.records().count(), 0);
    assert!((offset - impact.permanent_offset()).abs() < 1e-12);
}

#[test]
fn test_offset_at_does_not_prune() {
    let mut impact = MarketImpact::new(Box::new(almgren_chriss()), 5.0);
    impact.on_trade(0.0, Side::Bid, 100, 0.02);

    let _ = impact.offset_at(100.0);
    assert_eq!(impact.records().count(), 1);
}

#[test]
fn test_records_are_bounded() {
    let config = ImpactConfig {
        max_records: 3,
        decay_rate: 0.0,
        ..ImpactConfig::default()
    };
    let mut impact = MarketImpact::from_config(&config);
    for step in 0..10 {
        impact.on_trade(step as f64, Side::Bid, 10, 0.02);
    }

    let origins: Vec<_> = impact.records().map(|record| record.origin).collect();
    assert_eq!(origins, vec![7.0, 8.0, 9.0]);
}

#[test]
fn test_disabled_impact_is_inert() {
    let config = ImpactConfig {
        enabled: false,
        ..ImpactConfig::default()
    };
    let mut impact = MarketImpact::from_config(&config);

    assert_eq!(impact.on_trade(0.0, Side::Bid, 1000, 0.5), Impact::default());
    assert_eq!(impact.current_offset(1.0), 0.0);
}

#[test]
fn test_reset_clears_state() {
    let config = ImpactConfig {
        model: ImpactModelConfig::Linear {
            alpha: 0.01,
            permanent_fraction: 0.5,
        },
        ..ImpactConfig::default()
    };
    let mut impact = MarketImpact::from_config(&config);
    impact.on_trade(0.0, Side::Ask, 10, 0.0);
    assert!(impact.current_offset(0.0) < 0.0);

    impact.reset();
    assert_eq!(impact.current_offset(0.0), 0.0);
    assert_eq!(impact.records().count(), 0);
}
