use crate::ops::stats::{ewm_alpha, ewm_mean, WindowBivariateMoments, WindowMoments};
use crate::ops::OpCode;
use crate::plan::LogicalParam;
use crate::state::{IntradayEma, IntradayMoments, PairWindowState, RuntimeScratch, WindowState};

const VAR_NUM_EPS: f64 = 1e-12;

#[inline]
fn set_valid_or_invalid(out: &mut [f64], instrument_idx: usize, value: Option<f64>) {
    out[instrument_idx] = match value {
        Some(v) if v.is_finite() => v,
        _ => f64::NAN,
    };
}

/// Folds the batch into the running day and evaluates a single-input time-series operator.
pub fn eval_window(
    op: OpCode,
    param: LogicalParam,
    state: &mut WindowState,
    x: &[f64],
    out: &mut [f64],
    scratch: &mut RuntimeScratch,
) {
    debug_assert_eq!(x.len(), out.len());
    state.fold_batch(x);

    if let Some(lag) = param.lag() {
        debug_assert!(lag > 0, "lag operators require lag > 0");
        for instrument_idx in 0..out.len() {
            let value = lagged_value(op, state, instrument_idx, lag);
            set_valid_or_invalid(out, instrument_idx, value);
        }
        return;
    }

    let window = param.window().unwrap_or(0);
    debug_assert!(window > 0, "window operators require window > 0");
    let mut values = scratch.take_tmp_f64(window);
    for instrument_idx in 0..out.len() {
        let value = if state.collect_window(instrument_idx, window, &mut values) {
            window_value(op, window, &mut values)
        } else {
            None
        };
        set_valid_or_invalid(out, instrument_idx, value);
    }
    scratch.put_tmp_f64(values);
}

fn lagged_value(op: OpCode, state: &WindowState, instrument_idx: usize, lag: usize) -> Option<f64> {
    let past = state.history[instrument_idx].get_lag(lag - 1)?;
    match op {
        OpCode::TsDelay => Some(past),
        OpCode::TsDiff => Some(state.current(instrument_idx)? - past),
        OpCode::TsRet => {
            let current = state.current(instrument_idx)?;
            if past == 0.0 {
                return None;
            }
            Some(current / past - 1.0)
        }
        _ => None,
    }
}

/// `values` is ordered newest first; `values[0]` is the running day.
fn window_value(op: OpCode, window: usize, values: &mut [f64]) -> Option<f64> {
    match op {
        OpCode::TsMean => WindowMoments::collect(values).map(WindowMoments::mean),
        OpCode::TsSum => WindowMoments::collect(values).map(|m| m.sum),
        OpCode::TsStd => WindowMoments::collect(values).map(WindowMoments::std),
        OpCode::TsZscore => {
            let latest = values[0];
            let moments = WindowMoments::collect(values)?;
            let std = moments.std();
            if !std.is_finite() || std <= 0.0 {
                return Some(0.0);
            }
            Some((latest - moments.mean()) / std)
        }
        OpCode::TsEma => ewm_mean(values, window),
        OpCode::TsRank => ts_rank(values),
        OpCode::TsMax => fold_finite(values, f64::NEG_INFINITY, f64::max),
        OpCode::TsMin => fold_finite(values, f64::INFINITY, f64::min),
        _ => None,
    }
}

fn fold_finite(values: &[f64], init: f64, f: fn(f64, f64) -> f64) -> Option<f64> {
    let mut out = init;
    for &v in values {
        if !v.is_finite() {
            return None;
        }
        out = f(out, v);
    }
    Some(out)
}

/// Average-tie rank of the running value within the window, scaled to `[0, 1]`.
fn ts_rank(values: &mut [f64]) -> Option<f64> {
    let latest = values[0];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let window = values.len();
    values.sort_by(f64::total_cmp);
    let lower = values.partition_point(|v| *v < latest);
    let upper = values.partition_point(|v| *v <= latest);
    let avg_rank = ((lower + 1 + upper) as f64) * 0.5;
    Some(if window > 1 {
        (avg_rank - 1.0) / (window as f64 - 1.0)
    } else {
        0.0
    })
}

/// Folds both operands into their running days and evaluates a bivariate window operator.
pub fn eval_pair(
    op: OpCode,
    window: usize,
    state: &mut PairWindowState,
    x: &[f64],
    y: &[f64],
    out: &mut [f64],
    scratch: &mut RuntimeScratch,
) {
    debug_assert_eq!(x.len(), out.len());
    debug_assert_eq!(y.len(), out.len());
    debug_assert!(window > 0, "bivariate operators require window > 0");
    state.lhs.fold_batch(x);
    state.rhs.fold_batch(y);

    let mut lhs_values = scratch.take_tmp_f64(window);
    let mut rhs_values = scratch.take_pair_f64(window);
    for instrument_idx in 0..out.len() {
        let ready = state.lhs.collect_window(instrument_idx, window, &mut lhs_values)
            && state.rhs.collect_window(instrument_idx, window, &mut rhs_values);
        let value = if ready {
            WindowBivariateMoments::collect(&lhs_values, &rhs_values)
                .and_then(|m| bivariate_value(op, m))
        } else {
            None
        };
        set_valid_or_invalid(out, instrument_idx, value);
    }
    scratch.put_tmp_f64(lhs_values);
    scratch.put_pair_f64(rhs_values);
}

fn bivariate_value(op: OpCode, m: WindowBivariateMoments) -> Option<f64> {
    match op {
        OpCode::TsCov => {
            if m.n <= 1.0 {
                return None;
            }
            Some(m.cov_num() / (m.n - 1.0))
        }
        OpCode::TsCorr => {
            let var_x_num = m.var_x_num();
            let var_y_num = m.var_y_num();
            if var_x_num <= VAR_NUM_EPS || var_y_num <= VAR_NUM_EPS {
                return None;
            }
            Some(m.cov_num() / (var_x_num.sqrt() * var_y_num.sqrt()))
        }
        _ => None,
    }
}

/// Pushes finite batch values into the day's running moments and emits the statistic.
pub fn eval_intraday(op: OpCode, moments: &mut [IntradayMoments], x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(moments.len(), x.len());
    debug_assert_eq!(x.len(), out.len());
    for (instrument_idx, (m, &value)) in moments.iter_mut().zip(x).enumerate() {
        if value.is_finite() {
            m.push(value);
        }
        let stat = match op {
            OpCode::InTsMean => m.mean(),
            OpCode::InTsStd => m.std(),
            OpCode::InTsSum if m.n > 0 => m.sum,
            _ => f64::NAN,
        };
        set_valid_or_invalid(out, instrument_idx, Some(stat));
    }
}

/// Exponential average over the day's finite batch values, `alpha = 2 / (window + 1)`.
pub fn eval_intraday_ema(window: usize, emas: &mut [IntradayEma], x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(emas.len(), x.len());
    debug_assert_eq!(x.len(), out.len());
    let alpha = ewm_alpha(window);
    for (instrument_idx, (ema, &value)) in emas.iter_mut().zip(x).enumerate() {
        if value.is_finite() {
            ema.push(alpha, value);
        }
        let current = (ema.count > 0).then_some(ema.value);
        set_valid_or_invalid(out, instrument_idx, current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::DayFold;
    use approx::assert_relative_eq;

    /// Runs one batch per day through a window operator, returning the output of each day.
    fn run_daily(op: OpCode, fold: DayFold, param: LogicalParam, days: &[f64]) -> Vec<f64> {
        let mut state = WindowState::new(fold, param.history_len(), 1);
        let mut scratch = RuntimeScratch::default();
        let mut outputs = Vec::new();
        for &value in days {
            state.begin_day();
            let mut out = [0.0];
            eval_window(op, param, &mut state, &[value], &mut out, &mut scratch);
            outputs.push(out[0]);
            state.close_day();
        }
        outputs
    }

    #[test]
    fn ts_mean_waits_for_window_minus_one_closed_days() {
        let out = run_daily(
            OpCode::TsMean,
            DayFold::Mean,
            LogicalParam::Window(3),
            &[1.0, 2.0, 3.0, 4.0],
        );
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_relative_eq!(out[2], 2.0);
        assert_relative_eq!(out[3], 3.0);
    }

    #[test]
    fn running_day_value_is_the_mean_of_its_batches() {
        let mut state = WindowState::new(DayFold::Mean, 2, 1);
        let mut scratch = RuntimeScratch::default();
        state.begin_day();
        let mut out = [0.0];
        eval_window(OpCode::TsSum, LogicalParam::Window(2), &mut state, &[4.0], &mut out, &mut scratch);
        state.close_day();

        state.begin_day();
        eval_window(OpCode::TsSum, LogicalParam::Window(2), &mut state, &[1.0], &mut out, &mut scratch);
        assert_relative_eq!(out[0], 5.0);
        eval_window(OpCode::TsSum, LogicalParam::Window(2), &mut state, &[3.0], &mut out, &mut scratch);
        assert_relative_eq!(out[0], 6.0);
    }

    #[test]
    fn lag_family_reads_closed_days() {
        let days = [10.0, 11.0, 12.1];
        let delay = run_daily(OpCode::TsDelay, DayFold::Last, LogicalParam::Lag(1), &days);
        let diff = run_daily(OpCode::TsDiff, DayFold::Last, LogicalParam::Lag(1), &days);
        let ret = run_daily(OpCode::TsRet, DayFold::Last, LogicalParam::Lag(2), &days);
        assert!(delay[0].is_nan());
        assert_relative_eq!(delay[1], 10.0);
        assert_relative_eq!(diff[2], 1.1, epsilon = 1e-12);
        assert!(ret[1].is_nan());
        assert_relative_eq!(ret[2], 0.21, epsilon = 1e-12);
    }

    #[test]
    fn window_extrema_rank_and_zscore() {
        let days = [3.0, 1.0, 2.0];
        let max = run_daily(OpCode::TsMax, DayFold::Max, LogicalParam::Window(3), &days);
        let min = run_daily(OpCode::TsMin, DayFold::Min, LogicalParam::Window(3), &days);
        let rank = run_daily(OpCode::TsRank, DayFold::Mean, LogicalParam::Window(3), &days);
        let z = run_daily(OpCode::TsZscore, DayFold::Mean, LogicalParam::Window(3), &days);
        assert_eq!(max[2], 3.0);
        assert_eq!(min[2], 1.0);
        assert_relative_eq!(rank[2], 0.5);
        assert_relative_eq!(z[2], 0.0);

        let flat = run_daily(OpCode::TsZscore, DayFold::Mean, LogicalParam::Window(2), &[5.0, 5.0]);
        assert_eq!(flat[1], 0.0);
    }

    #[test]
    fn nan_day_invalidates_only_windows_that_contain_it() {
        let out = run_daily(
            OpCode::TsMean,
            DayFold::Mean,
            LogicalParam::Window(2),
            &[1.0, f64::NAN, 3.0, 5.0],
        );
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert_relative_eq!(out[3], 4.0);
    }

    #[test]
    fn pair_corr_and_cov() {
        let mut state = PairWindowState::new(DayFold::Mean, 3, 1);
        let mut scratch = RuntimeScratch::default();
        let mut out = [0.0];
        let xs = [1.0, 2.0, 3.0];
        let ys = [2.0, 4.0, 6.0];
        for (x, y) in xs.iter().zip(&ys) {
            state.lhs.begin_day();
            state.rhs.begin_day();
            eval_pair(OpCode::TsCorr, 3, &mut state, &[*x], &[*y], &mut out, &mut scratch);
            state.lhs.close_day();
            state.rhs.close_day();
        }
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-12);

        let mut cov_state = PairWindowState::new(DayFold::Mean, 3, 1);
        for (x, y) in xs.iter().zip(&ys) {
            cov_state.lhs.begin_day();
            cov_state.rhs.begin_day();
            eval_pair(OpCode::TsCov, 3, &mut cov_state, &[*x], &[*y], &mut out, &mut scratch);
            cov_state.lhs.close_day();
            cov_state.rhs.close_day();
        }
        assert_relative_eq!(out[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn intraday_moments_skip_nan_batches() {
        let mut moments = vec![IntradayMoments::default(); 1];
        let mut out = [0.0];
        eval_intraday(OpCode::InTsSum, &mut moments, &[f64::NAN], &mut out);
        assert!(out[0].is_nan());
        eval_intraday(OpCode::InTsSum, &mut moments, &[2.0], &mut out);
        eval_intraday(OpCode::InTsSum, &mut moments, &[5.0], &mut out);
        assert_eq!(out[0], 7.0);
        eval_intraday(OpCode::InTsMean, &mut moments, &[f64::NAN], &mut out);
        assert_relative_eq!(out[0], 3.5);
    }

    #[test]
    fn intraday_ema_weights_recent_batches() {
        let mut emas = vec![IntradayEma::default(); 2];
        let mut out = [0.0; 2];
        eval_intraday_ema(3, &mut emas, &[f64::NAN, 2.0], &mut out);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 2.0);
        eval_intraday_ema(3, &mut emas, &[4.0, 6.0], &mut out);
        assert_eq!(out[0], 4.0);
        // alpha = 0.5
        assert_relative_eq!(out[1], 4.0);
        eval_intraday_ema(3, &mut emas, &[f64::INFINITY, 0.0], &mut out);
        assert_eq!(out[0], 4.0);
        assert_relative_eq!(out[1], 2.0);
    }
}
