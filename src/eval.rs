use log::{debug, trace};
use serde_json::Value;

use crate::context::Context;
use crate::strategy::Strategy;

/// Finds the first strategy in `strategies` whose percentage gate and attribute predicates both
/// pass for `context`.
///
/// Strategies are tried strictly in order and the first full match wins, even if a later one
/// would also pass. The context's rollout bucket is computed once per call.
pub fn matching_strategy<'a>(strategies: &'a [Strategy], context: &Context) -> Option<&'a Strategy> {
    let bucket = context.percentage();

    for strategy in strategies {
        trace!("checking strategy id={}", strategy.id);

        if !strategy.matches_percentage(bucket) {
            trace!("strategy id={} failed percentage, trying next strategy", strategy.id);
            continue;
        }

        if !strategy.matches_attributes(context) {
            trace!("strategy id={} failed attributes, trying next strategy", strategy.id);
            continue;
        }

        debug!("matched strategy id={} name={}", strategy.id, strategy.name);
        return Some(strategy);
    }

    None
}

/// Evaluate an ordered list of strategies for the specified [Context], returning the value of the
/// first matching strategy or None if no strategy matches.
///
/// The evaluator performs no I/O and never blocks. A predicate whose field or operands cannot be
/// interpreted as its declared type simply does not match.
pub fn evaluate<'a>(strategies: &'a [Strategy], context: &Context) -> Option<&'a Value> {
    matching_strategy(strategies, context).map(|strategy| &strategy.value)
}
