use crate::ops::{DayFold, OpMeta, OperatorRegistry, StateSpec};
use crate::plan::{LogicalParam, NodeKind, TreePlan};
use tracing::warn;

/// Fixed-capacity FIFO of closed-day summaries; lag 0 is the most recent day.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f64>,
    cap: usize,
    len: usize,
    write: usize,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: vec![f64::NAN; cap.max(1)],
            cap: cap.max(1),
            len: 0,
            write: 0,
        }
    }

    /// Rebuilds a ring from values ordered oldest first.
    pub fn from_oldest_first(cap: usize, values: &[f64]) -> Option<Self> {
        if values.len() > cap.max(1) {
            return None;
        }
        let mut ring = Self::new(cap);
        for value in values {
            ring.push(*value);
        }
        Some(ring)
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        self.data[self.write] = value;
        self.write += 1;
        if self.write == self.cap {
            self.write = 0;
        }
        if self.len < self.cap {
            self.len += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub fn get_lag(&self, lag: usize) -> Option<f64> {
        if lag >= self.len {
            return None;
        }
        let last = if self.write == 0 {
            self.cap - 1
        } else {
            self.write - 1
        };
        let idx = if last >= lag {
            last - lag
        } else {
            self.cap + last - lag
        };
        Some(self.data[idx])
    }

    pub fn iter_oldest_first(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len)
            .rev()
            .filter_map(move |lag| self.get_lag(lag))
    }
}

/// Equal when capacity and stored values match bit for bit, regardless of
/// where the write cursor sits.
impl PartialEq for RingBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.cap == other.cap
            && self.len == other.len
            && self
                .iter_oldest_first()
                .zip(other.iter_oldest_first())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Running value of the current day for one instrument.
///
/// For `DayFold::Mean` the accumulator holds the sum of the day's batch
/// values; the other folds hold the folded value directly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayAccumulator {
    pub acc: f64,
    pub count: u64,
}

impl DayAccumulator {
    #[inline]
    pub fn fold(&mut self, fold: DayFold, value: f64) {
        if self.count == 0 {
            self.acc = value;
            self.count = 1;
            return;
        }
        self.acc = match fold {
            DayFold::Mean => self.acc + value,
            DayFold::Last => value,
            // f64::max/min skip NaN, but a NaN batch must poison the day.
            DayFold::Max if self.acc.is_nan() || value.is_nan() => f64::NAN,
            DayFold::Min if self.acc.is_nan() || value.is_nan() => f64::NAN,
            DayFold::Max => self.acc.max(value),
            DayFold::Min => self.acc.min(value),
        };
        self.count += 1;
    }

    #[inline]
    pub fn value(&self, fold: DayFold) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(match fold {
            DayFold::Mean => self.acc / self.count as f64,
            DayFold::Max | DayFold::Min | DayFold::Last => self.acc,
        })
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Day accumulator plus closed-day history for each instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub fold: DayFold,
    pub running: Vec<DayAccumulator>,
    pub history: Vec<RingBuffer>,
}

impl WindowState {
    pub fn new(fold: DayFold, history_len: usize, nstock: usize) -> Self {
        Self {
            fold,
            running: vec![DayAccumulator::default(); nstock],
            history: (0..nstock).map(|_| RingBuffer::new(history_len)).collect(),
        }
    }

    #[inline]
    pub fn fold_batch(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.running.len());
        for (acc, value) in self.running.iter_mut().zip(values) {
            acc.fold(self.fold, *value);
        }
    }

    #[inline]
    pub fn current(&self, instrument_idx: usize) -> Option<f64> {
        self.running[instrument_idx].value(self.fold)
    }

    /// Fills `out` newest first with the running value followed by the last
    /// `window - 1` closed days. Returns false when history is too short.
    pub fn collect_window(&self, instrument_idx: usize, window: usize, out: &mut Vec<f64>) -> bool {
        out.clear();
        let ring = &self.history[instrument_idx];
        if window == 0 || ring.len() + 1 < window {
            return false;
        }
        let Some(current) = self.current(instrument_idx) else {
            return false;
        };
        out.push(current);
        for lag in 0..window - 1 {
            match ring.get_lag(lag) {
                Some(value) => out.push(value),
                None => return false,
            }
        }
        true
    }

    pub fn begin_day(&mut self) {
        for acc in &mut self.running {
            acc.reset();
        }
    }

    pub fn close_day(&mut self) {
        for (acc, ring) in self.running.iter().zip(self.history.iter_mut()) {
            if let Some(summary) = acc.value(self.fold) {
                ring.push(summary);
            }
        }
    }
}

/// Two aligned windows for bivariate operators.
#[derive(Debug, Clone, PartialEq)]
pub struct PairWindowState {
    pub lhs: WindowState,
    pub rhs: WindowState,
}

impl PairWindowState {
    pub fn new(fold: DayFold, history_len: usize, nstock: usize) -> Self {
        Self {
            lhs: WindowState::new(fold, history_len, nstock),
            rhs: WindowState::new(fold, history_len, nstock),
        }
    }
}

/// Running moments of the batches seen since the day began.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntradayMoments {
    pub n: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl IntradayMoments {
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            return f64::NAN;
        }
        self.sum / self.n as f64
    }

    #[inline]
    pub fn std(&self) -> f64 {
        if self.n <= 1 {
            return f64::NAN;
        }
        let n = self.n as f64;
        let m2 = self.sum_sq - (self.sum * self.sum) / n;
        if !m2.is_finite() {
            return f64::NAN;
        }
        (m2 / (n - 1.0)).max(0.0).sqrt()
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Exponential average of the finite batch values seen since the day began.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntradayEma {
    pub value: f64,
    pub count: u64,
}

impl Default for IntradayEma {
    fn default() -> Self {
        Self {
            value: f64::NAN,
            count: 0,
        }
    }
}

impl IntradayEma {
    #[inline]
    pub fn push(&mut self, alpha: f64, value: f64) {
        self.value = if self.count == 0 {
            value
        } else {
            alpha * value + (1.0 - alpha) * self.value
        };
        self.count += 1;
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Stateless,
    Window(WindowState),
    PairWindow(PairWindowState),
    Intraday(Vec<IntradayMoments>),
    IntradayEma(Vec<IntradayEma>),
}

impl NodeState {
    pub fn from_meta(meta: &OpMeta, param: LogicalParam, nstock: usize) -> Self {
        let fold = meta.day_fold.unwrap_or(DayFold::Mean);
        match meta.state_spec {
            StateSpec::Stateless => Self::Stateless,
            StateSpec::Window => Self::Window(WindowState::new(fold, param.history_len(), nstock)),
            StateSpec::PairWindow => {
                Self::PairWindow(PairWindowState::new(fold, param.history_len(), nstock))
            }
            StateSpec::Intraday => Self::Intraday(vec![IntradayMoments::default(); nstock]),
            StateSpec::IntradayEma => Self::IntradayEma(vec![IntradayEma::default(); nstock]),
        }
    }

    pub fn begin_day(&mut self) {
        match self {
            Self::Stateless => {}
            Self::Window(window) => window.begin_day(),
            Self::PairWindow(pair) => {
                pair.lhs.begin_day();
                pair.rhs.begin_day();
            }
            Self::Intraday(moments) => {
                for m in moments {
                    m.reset();
                }
            }
            Self::IntradayEma(emas) => {
                for ema in emas {
                    ema.reset();
                }
            }
        }
    }

    pub fn close_day(&mut self) {
        match self {
            Self::Window(window) => window.close_day(),
            Self::PairWindow(pair) => {
                pair.lhs.close_day();
                pair.rhs.close_day();
            }
            Self::Stateless | Self::Intraday(_) | Self::IntradayEma(_) => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeScratch {
    rank_pairs: Option<Vec<(usize, f64)>>,
    tmp_f64: Option<Vec<f64>>,
    pair_f64: Option<Vec<f64>>,
}

impl RuntimeScratch {
    pub fn with_capacity(instrument_count: usize) -> Self {
        Self {
            rank_pairs: Some(Vec::with_capacity(instrument_count)),
            tmp_f64: Some(Vec::with_capacity(instrument_count)),
            pair_f64: None,
        }
    }

    pub fn take_rank_pairs(&mut self, min_capacity: usize) -> Vec<(usize, f64)> {
        take_buffer(&mut self.rank_pairs, min_capacity)
    }

    pub fn put_rank_pairs(&mut self, mut buf: Vec<(usize, f64)>) {
        put_buffer(&mut self.rank_pairs, &mut buf);
    }

    pub fn take_tmp_f64(&mut self, min_capacity: usize) -> Vec<f64> {
        take_buffer(&mut self.tmp_f64, min_capacity)
    }

    pub fn put_tmp_f64(&mut self, mut buf: Vec<f64>) {
        put_buffer(&mut self.tmp_f64, &mut buf);
    }

    pub fn take_pair_f64(&mut self, min_capacity: usize) -> Vec<f64> {
        take_buffer(&mut self.pair_f64, min_capacity)
    }

    pub fn put_pair_f64(&mut self, mut buf: Vec<f64>) {
        put_buffer(&mut self.pair_f64, &mut buf);
    }

    #[cfg(test)]
    pub fn tmp_f64_capacity(&self) -> Option<usize> {
        self.tmp_f64.as_ref().map(Vec::capacity)
    }
}

#[inline]
fn take_buffer<T>(slot: &mut Option<Vec<T>>, min_capacity: usize) -> Vec<T> {
    let mut buf = slot
        .take()
        .unwrap_or_else(|| Vec::with_capacity(min_capacity.max(1)));
    if buf.capacity() < min_capacity {
        buf.reserve(min_capacity - buf.capacity());
    }
    buf.clear();
    buf
}

#[inline]
fn put_buffer<T>(slot: &mut Option<Vec<T>>, buf: &mut Vec<T>) {
    buf.clear();
    *slot = Some(std::mem::take(buf));
}

/// Mutable state of a built tree: node outputs and per-node rolling state.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub nstock: usize,
    /// Node-major matrix: `outputs[node_id * nstock + instrument_idx]`.
    pub outputs: Vec<f64>,
    pub node_states: Vec<NodeState>,
    pub scratch: RuntimeScratch,
}

impl RuntimeState {
    pub fn from_plan(plan: &TreePlan, nstock: usize) -> Self {
        let node_states = plan
            .nodes
            .iter()
            .map(|node| match &node.kind {
                NodeKind::Op { op, param } => match OperatorRegistry::get_by_op(*op) {
                    Some(meta) => NodeState::from_meta(meta, *param, nstock),
                    None => {
                        warn!(?op, "operator missing from registry, node left stateless");
                        NodeState::Stateless
                    }
                },
                NodeKind::Field(_) | NodeKind::Literal(_) => NodeState::Stateless,
            })
            .collect();
        Self {
            nstock,
            outputs: vec![f64::NAN; plan.nodes.len() * nstock],
            node_states,
            scratch: RuntimeScratch::with_capacity(nstock),
        }
    }

    #[inline]
    pub fn node_output(&self, node_id: usize) -> &[f64] {
        let start = node_id * self.nstock;
        &self.outputs[start..start + self.nstock]
    }

    pub fn begin_day(&mut self) {
        for state in &mut self.node_states {
            state.begin_day();
        }
    }

    pub fn close_day(&mut self) {
        for state in &mut self.node_states {
            state.close_day();
        }
    }
}
