//! Selector blocks: multiplexers, case tables and priority encoders.

use super::value_to_bool;

/// Pick `values[index]`, clamping `index` into the populated range.
/// An empty value list yields 0.
pub fn select(values: &[i32], index: i32) -> i32 {
    if values.is_empty() {
        return 0;
    }
    let index = index.clamp(0, values.len() as i32 - 1) as usize;
    values[index]
}

/// Return the output of the first `(match, output)` pair whose match equals
/// `input`, else `default`.
pub fn case(input: i32, cases: &[(i32, i32)], default: i32) -> i32 {
    cases
        .iter()
        .find(|(matched, _)| *matched == input)
        .map(|(_, output)| *output)
        .unwrap_or(default)
}

/// Threshold decoder: returns `outputs[i]` for the last `thresholds[i]` not
/// exceeding `input`. Thresholds are sorted ascending and pair up with
/// `outputs` by index; an input below the first threshold yields 0.
pub fn range_case(input: i32, thresholds: &[i32], outputs: &[i32]) -> i32 {
    let len = thresholds.len().min(outputs.len());
    let taken = thresholds[..len].partition_point(|&t| t <= input);
    if taken == 0 {
        0
    } else {
        outputs[taken - 1]
    }
}

/// Return the output paired with the first true condition, else `default`.
/// Conditions and outputs pair up by index.
pub fn mux(conditions: &[i32], outputs: &[i32], default: i32) -> i32 {
    let len = conditions.len().min(outputs.len());
    conditions[..len]
        .iter()
        .position(|&c| value_to_bool(c))
        .map(|at| outputs[at])
        .unwrap_or(default)
}

/// Index of the first true input, or -1 when none is true.
pub fn priority(inputs: &[i32]) -> i32 {
    inputs
        .iter()
        .position(|&v| value_to_bool(v))
        .map(|at| at as i32)
        .unwrap_or(-1)
}

/// `condition ? if_true : if_false`.
pub fn ternary(condition: i32, if_true: i32, if_false: i32) -> i32 {
    if value_to_bool(condition) {
        if_true
    } else {
        if_false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_clamps_index() {
        let values = [10, 20, 30];
        assert_eq!(select(&values, 1), 20);
        assert_eq!(select(&values, -5), 10);
        assert_eq!(select(&values, 99), 30);
        assert_eq!(select(&[], 0), 0);
    }

    #[test]
    fn case_first_match_else_default() {
        let cases = [(1, 100), (2, 200), (2, 999)];
        assert_eq!(case(2, &cases, -1), 200);
        assert_eq!(case(3, &cases, -1), -1);
        assert_eq!(case(0, &[], 7), 7);
    }

    #[test]
    fn range_case_picks_last_threshold() {
        let thresholds = [0, 100, 200];
        let outputs = [1, 2, 3];
        assert_eq!(range_case(-1, &thresholds, &outputs), 0);
        assert_eq!(range_case(0, &thresholds, &outputs), 1);
        assert_eq!(range_case(150, &thresholds, &outputs), 2);
        assert_eq!(range_case(200, &thresholds, &outputs), 3);
        assert_eq!(range_case(5000, &thresholds, &outputs), 3);
    }

    #[test]
    fn mux_first_true() {
        assert_eq!(mux(&[0, 1, 1], &[10, 20, 30], -1), 20);
        assert_eq!(mux(&[0, 0, 0], &[10, 20, 30], -1), -1);
        assert_eq!(mux(&[], &[], 5), 5);
    }

    #[test]
    fn priority_encoder() {
        assert_eq!(priority(&[0, 0, 7, 1]), 2);
        assert_eq!(priority(&[0, 0]), -1);
        assert_eq!(priority(&[]), -1);
    }

    #[test]
    fn ternary_select() {
        assert_eq!(ternary(1, 10, 20), 10);
        assert_eq!(ternary(0, 10, 20), 20);
    }
}
