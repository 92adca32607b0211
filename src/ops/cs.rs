use crate::ops::OpCode;
use crate::state::RuntimeScratch;

#[inline]
fn set_all_invalid(out: &mut [f64]) {
    out.fill(f64::NAN);
}

/// Evaluates a cross-sectional operator over one batch.
///
/// Only finite inputs take part in the reduction; other instruments output NaN.
pub fn eval(op: OpCode, x: &[f64], out: &mut [f64], scratch: &mut RuntimeScratch) {
    debug_assert_eq!(x.len(), out.len());
    match op {
        OpCode::CsRank => cs_rank(x, out, scratch),
        OpCode::CsZscore => cs_zscore(x, out),
        OpCode::CsDemean => cs_demean(x, out),
        OpCode::CsMean | OpCode::CsSum | OpCode::CsStd => cs_broadcast(op, x, out),
        _ => set_all_invalid(out),
    }
}

/// Normalized average-tie rank in `[0, 1]`.
fn cs_rank(x: &[f64], out: &mut [f64], scratch: &mut RuntimeScratch) {
    let mut rank_pairs = scratch.take_rank_pairs(x.len());
    for (instrument_idx, &value) in x.iter().enumerate() {
        if value.is_finite() {
            rank_pairs.push((instrument_idx, value));
        } else {
            out[instrument_idx] = f64::NAN;
        }
    }

    rank_pairs.sort_by(|a, b| a.1.total_cmp(&b.1));
    let n = rank_pairs.len() as f64;
    let mut i = 0usize;
    while i < rank_pairs.len() {
        let mut j = i + 1;
        while j < rank_pairs.len() && rank_pairs[j].1 == rank_pairs[i].1 {
            j += 1;
        }
        let avg_rank = ((i + 1 + j) as f64) * 0.5;
        let rank = if n > 1.0 {
            (avg_rank - 1.0) / (n - 1.0)
        } else {
            0.0
        };
        for (instrument_idx, _) in rank_pairs.iter().take(j).skip(i) {
            out[*instrument_idx] = rank;
        }
        i = j;
    }
    scratch.put_rank_pairs(rank_pairs);
}

#[derive(Debug, Clone, Copy)]
struct CsMoments {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl CsMoments {
    fn collect(x: &[f64]) -> Self {
        let mut m = Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
        };
        for &value in x.iter().filter(|v| v.is_finite()) {
            m.count += 1;
            m.sum += value;
            m.sum_sq += value * value;
        }
        m
    }

    fn mean(self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }

    /// Sample standard deviation; NaN below two observations.
    fn std(self) -> f64 {
        if self.count < 2 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let m2 = self.sum_sq - (self.sum * self.sum) / n;
        (m2 / (n - 1.0)).max(0.0).sqrt()
    }
}

fn cs_zscore(x: &[f64], out: &mut [f64]) {
    let m = CsMoments::collect(x);
    if m.count == 0 {
        set_all_invalid(out);
        return;
    }
    let mean = m.mean();
    let std = m.std();
    for (instrument_idx, &value) in x.iter().enumerate() {
        out[instrument_idx] = if !value.is_finite() {
            f64::NAN
        } else if std.is_finite() && std > 0.0 {
            (value - mean) / std
        } else {
            0.0
        };
    }
}

fn cs_demean(x: &[f64], out: &mut [f64]) {
    let m = CsMoments::collect(x);
    if m.count == 0 {
        set_all_invalid(out);
        return;
    }
    let mean = m.mean();
    for (instrument_idx, &value) in x.iter().enumerate() {
        out[instrument_idx] = if value.is_finite() {
            value - mean
        } else {
            f64::NAN
        };
    }
}

/// Reductions broadcast to every instrument with a finite input.
fn cs_broadcast(op: OpCode, x: &[f64], out: &mut [f64]) {
    let m = CsMoments::collect(x);
    let value = match op {
        OpCode::CsMean => m.mean(),
        OpCode::CsSum if m.count > 0 => m.sum,
        OpCode::CsStd => m.std(),
        _ => f64::NAN,
    };
    let value = if value.is_finite() { value } else { f64::NAN };
    for (instrument_idx, &input) in x.iter().enumerate() {
        out[instrument_idx] = if input.is_finite() { value } else { f64::NAN };
    }
}
