/// IHO S-44 order qualification.
///
/// Each graded order allows a depth-dependent maximum TVU
/// (sqrt(a² + (b·depth)²)) and THU (constant + coefficient·depth). A
/// sounding is classified vertically and horizontally against the orders
/// from strictest to loosest; its assigned order is the worse of the two.
/// The dataset summary is cumulative: a Special-order sounding also
/// counts toward 1a, 1b and 2.

use log::debug;

use crate::model::{IhoOrder, Sounding};

/// (a, b) of the maximum-TVU formula per graded order.
fn tvu_limits(order: IhoOrder) -> (f64, f64) {
    match order {
        IhoOrder::Exclusive => (0.15, 0.0075),
        IhoOrder::Special => (0.25, 0.0075),
        IhoOrder::Order1a => (0.5, 0.013),
        IhoOrder::Order1b => (0.5, 0.013),
        IhoOrder::Order2 => (1.0, 0.023),
        IhoOrder::NotMet => (f64::INFINITY, f64::INFINITY),
    }
}

/// (constant, depth coefficient) of the maximum-THU formula.
fn thu_limits(order: IhoOrder) -> (f64, f64) {
    match order {
        IhoOrder::Exclusive => (1.0, 0.0),
        IhoOrder::Special => (2.0, 0.0),
        IhoOrder::Order1a => (5.0, 0.05),
        IhoOrder::Order1b => (5.0, 0.05),
        IhoOrder::Order2 => (20.0, 0.1),
        IhoOrder::NotMet => (f64::INFINITY, f64::INFINITY),
    }
}

pub fn tvu_max(order: IhoOrder, depth: f64) -> f64 {
    let (a, b) = tvu_limits(order);
    (a * a + (b * depth) * (b * depth)).sqrt()
}

pub fn thu_max(order: IhoOrder, depth: f64) -> f64 {
    let (constant, coefficient) = thu_limits(order);
    constant + coefficient * depth
}

/// Strictest order whose vertical budget admits this sounding.
pub fn vertical_order(depth: f64, tvu: f64) -> IhoOrder {
    IhoOrder::GRADED
        .into_iter()
        .find(|order| tvu_max(*order, depth) >= tvu)
        .unwrap_or(IhoOrder::NotMet)
}

/// Strictest order whose horizontal budget admits this sounding.
pub fn horizontal_order(depth: f64, thu: f64) -> IhoOrder {
    IhoOrder::GRADED
        .into_iter()
        .find(|order| thu_max(*order, depth) >= thu)
        .unwrap_or(IhoOrder::NotMet)
}

/// Assigned order: the worse of the vertical and horizontal results.
pub fn classify(depth: f64, tvu: f64, thu: f64) -> IhoOrder {
    vertical_order(depth, tvu).max(horizontal_order(depth, thu))
}

/// Classifies every sounding carrying both uncertainties.
pub fn classify_soundings(soundings: &mut [Sounding]) {
    debug!("classifying {} soundings against IHO orders", soundings.len());

    for sounding in soundings.iter_mut() {
        if let (Some(tvu), Some(thu)) = (sounding.uncertainty_m, sounding.thu_m) {
            sounding.iho_order = Some(classify(sounding.depth_raw_m, tvu, thu));
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderStatistics {
    pub sounding_count: usize,
    pub sounding_percentage: f64,
    pub min_depth: Option<f64>,
    pub max_depth: Option<f64>,
    pub mean_depth: Option<f64>,
    pub min_tvu: Option<f64>,
    pub max_tvu: Option<f64>,
    pub mean_tvu: Option<f64>,
    pub min_thu: Option<f64>,
    pub max_thu: Option<f64>,
    pub mean_thu: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQualification {
    pub exclusive: OrderStatistics,
    pub special: OrderStatistics,
    pub order_1a: OrderStatistics,
    pub order_1b: OrderStatistics,
    pub order_2: OrderStatistics,
    pub not_met: OrderStatistics,
}

fn spread(values: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None, None);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (Some(min), Some(max), Some(mean))
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Statistics of the soundings whose assigned order satisfies `order`
/// (cumulative membership: any order at least as strict qualifies).
fn statistics_for(
    soundings: &[Sounding],
    order: IhoOrder,
    total: usize,
    decimal_precision: u32,
) -> OrderStatistics {
    let members: Vec<&Sounding> = soundings
        .iter()
        .filter(|s| s.iho_order.is_some_and(|assigned| assigned <= order))
        .collect();

    if members.is_empty() {
        return OrderStatistics::default();
    }

    let depths: Vec<f64> = members.iter().filter_map(|s| s.depth_processed_m).collect();
    let tvus: Vec<f64> = members.iter().filter_map(|s| s.uncertainty_m).collect();
    let thus: Vec<f64> = members.iter().filter_map(|s| s.thu_m).collect();

    let (min_depth, max_depth, mean_depth) = spread(&depths);
    let (min_tvu, max_tvu, mean_tvu) = spread(&tvus);
    let (min_thu, max_thu, mean_thu) = spread(&thus);

    OrderStatistics {
        sounding_count: members.len(),
        sounding_percentage: round_to(
            members.len() as f64 / total as f64 * 100.0,
            decimal_precision,
        ),
        min_depth,
        max_depth,
        mean_depth: mean_depth.map(|v| round_to(v, decimal_precision)),
        min_tvu,
        max_tvu,
        mean_tvu: mean_tvu.map(|v| round_to(v, decimal_precision)),
        min_thu,
        max_thu,
        mean_thu: mean_thu.map(|v| round_to(v, decimal_precision)),
    }
}

/// Tabulates the cumulative per-order summary of a classified dataset.
pub fn qualification_summary(
    soundings: &[Sounding],
    decimal_precision: u32,
) -> OrderQualification {
    let total = soundings.iter().filter(|s| s.iho_order.is_some()).count();
    if total == 0 {
        return OrderQualification::default();
    }

    OrderQualification {
        exclusive: statistics_for(soundings, IhoOrder::Exclusive, total, decimal_precision),
        special: statistics_for(soundings, IhoOrder::Special, total, decimal_precision),
        order_1a: statistics_for(soundings, IhoOrder::Order1a, total, decimal_precision),
        order_1b: statistics_for(soundings, IhoOrder::Order1b, total, decimal_precision),
        order_2: statistics_for(soundings, IhoOrder::Order2, total, decimal_precision),
        not_met: statistics_for(soundings, IhoOrder::NotMet, total, decimal_precision),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
