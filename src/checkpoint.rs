//! Versioned checkpoint container.
//!
//! Layout: 8-byte magic, little-endian `u32` version, an rkyv archive of
//! [`TreeSnapshot`], then a CRC32 over every preceding byte.

use crate::error::CheckpointError;
use crate::ops::DayFold;
use crate::plan::TreePlan;
use crate::state::{
    DayAccumulator, IntradayEma, IntradayMoments, NodeState, RingBuffer, RuntimeState,
    WindowState,
};
use crate::types::{DayPhase, InitArgs};
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

pub const CHECKPOINT_MAGIC: &[u8; 8] = b"FTREECKP";
pub const CHECKPOINT_VERSION: u32 = 1;

const PREFIX_LEN: usize = CHECKPOINT_MAGIC.len() + 4;
const CRC_LEN: usize = 4;
const SCRATCH_SPACE: usize = 4096;

/// Everything needed to resume a tree: lifecycle counters plus one record per
/// node in table order.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct TreeSnapshot {
    /// Canonical expression text.
    pub expression: String,
    pub nstock: u64,
    pub batch_per_day: u64,
    pub day_index: u64,
    pub batch_in_day: u64,
    pub phase: u8,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct NodeSnapshot {
    pub output: Vec<f64>,
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) enum StateSnapshot {
    Stateless,
    Window(WindowSnapshot),
    PairWindow {
        lhs: WindowSnapshot,
        rhs: WindowSnapshot,
    },
    Intraday(Vec<MomentsSnapshot>),
    IntradayEma(Vec<EmaSnapshot>),
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct WindowSnapshot {
    pub fold: u8,
    pub running: Vec<AccumulatorSnapshot>,
    pub history: Vec<RingSnapshot>,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct AccumulatorSnapshot {
    pub acc: f64,
    pub count: u64,
}

/// Closed-day summaries, oldest first.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct RingSnapshot {
    pub capacity: u64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct MomentsSnapshot {
    pub n: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub(crate) struct EmaSnapshot {
    pub value: f64,
    pub count: u64,
}

impl TreeSnapshot {
    pub(crate) fn capture_nodes(runtime: &RuntimeState) -> Vec<NodeSnapshot> {
        runtime
            .node_states
            .iter()
            .enumerate()
            .map(|(node_id, state)| NodeSnapshot {
                output: runtime.node_output(node_id).to_vec(),
                state: StateSnapshot::capture(state),
            })
            .collect()
    }

    pub(crate) fn init_args(&self) -> Result<InitArgs, CheckpointError> {
        let to_usize = |value: u64, what: &str| {
            usize::try_from(value)
                .map_err(|_| CheckpointError::corrupt(format!("{what} {value} does not fit usize")))
        };
        Ok(InitArgs::new(
            to_usize(self.nstock, "nstock")?,
            to_usize(self.batch_per_day, "batch_per_day")?,
        ))
    }

    /// Only `Idle` and `DayOpen` are ever written; `DayClosing` never outlives `on_day_end`.
    pub(crate) fn phase(&self) -> Result<DayPhase, CheckpointError> {
        match DayPhase::from_tag(self.phase) {
            Some(phase @ (DayPhase::Idle | DayPhase::DayOpen)) => Ok(phase),
            Some(DayPhase::DayClosing) | None => {
                Err(CheckpointError::corrupt(format!("invalid day phase {}", self.phase)))
            }
        }
    }

    /// Rebuilds node state into a fresh runtime for `plan`. Every record must
    /// match the node shape the plan implies.
    pub(crate) fn restore_runtime(
        &self,
        plan: &TreePlan,
        nstock: usize,
    ) -> Result<RuntimeState, CheckpointError> {
        if self.nodes.len() != plan.node_count() {
            return Err(CheckpointError::corrupt(format!(
                "node count {} does not match expression ({} nodes)",
                self.nodes.len(),
                plan.node_count()
            )));
        }
        let mut staged = RuntimeState::from_plan(plan, nstock);
        let RuntimeState {
            outputs,
            node_states,
            ..
        } = &mut staged;

        for (node_id, (record, state)) in self.nodes.iter().zip(node_states.iter_mut()).enumerate() {
            if record.output.len() != nstock {
                return Err(CheckpointError::corrupt(format!(
                    "node {node_id}: {} output values, expected {nstock}",
                    record.output.len()
                )));
            }
            let start = node_id * nstock;
            outputs[start..start + nstock].copy_from_slice(&record.output);
            record
                .state
                .restore_into(state, nstock)
                .map_err(|reason| CheckpointError::corrupt(format!("node {node_id}: {reason}")))?;
        }
        Ok(staged)
    }
}

impl StateSnapshot {
    fn capture(state: &NodeState) -> Self {
        match state {
            NodeState::Stateless => Self::Stateless,
            NodeState::Window(window) => Self::Window(WindowSnapshot::capture(window)),
            NodeState::PairWindow(pair) => Self::PairWindow {
                lhs: WindowSnapshot::capture(&pair.lhs),
                rhs: WindowSnapshot::capture(&pair.rhs),
            },
            NodeState::Intraday(moments) => Self::Intraday(
                moments
                    .iter()
                    .map(|m| MomentsSnapshot {
                        n: m.n,
                        sum: m.sum,
                        sum_sq: m.sum_sq,
                    })
                    .collect(),
            ),
            NodeState::IntradayEma(emas) => Self::IntradayEma(
                emas.iter()
                    .map(|e| EmaSnapshot {
                        value: e.value,
                        count: e.count,
                    })
                    .collect(),
            ),
        }
    }

    fn restore_into(&self, state: &mut NodeState, nstock: usize) -> Result<(), String> {
        match (self, state) {
            (Self::Stateless, NodeState::Stateless) => Ok(()),
            (Self::Window(snapshot), NodeState::Window(window)) => {
                snapshot.restore_into(window, nstock)
            }
            (Self::PairWindow { lhs, rhs }, NodeState::PairWindow(pair)) => {
                lhs.restore_into(&mut pair.lhs, nstock)?;
                rhs.restore_into(&mut pair.rhs, nstock)
            }
            (Self::Intraday(stored), NodeState::Intraday(moments)) => {
                check_len("intraday moments", stored.len(), nstock)?;
                for (m, s) in moments.iter_mut().zip(stored) {
                    *m = IntradayMoments {
                        n: s.n,
                        sum: s.sum,
                        sum_sq: s.sum_sq,
                    };
                }
                Ok(())
            }
            (Self::IntradayEma(stored), NodeState::IntradayEma(emas)) => {
                check_len("intraday ema", stored.len(), nstock)?;
                for (e, s) in emas.iter_mut().zip(stored) {
                    *e = IntradayEma {
                        value: s.value,
                        count: s.count,
                    };
                }
                Ok(())
            }
            (stored, _) => Err(format!(
                "stored {} state does not match the expression",
                stored.kind()
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::Window(_) => "window",
            Self::PairWindow { .. } => "pair window",
            Self::Intraday(_) => "intraday",
            Self::IntradayEma(_) => "intraday ema",
        }
    }
}

impl WindowSnapshot {
    fn capture(window: &WindowState) -> Self {
        Self {
            fold: window.fold.tag(),
            running: window
                .running
                .iter()
                .map(|acc| AccumulatorSnapshot {
                    acc: acc.acc,
                    count: acc.count,
                })
                .collect(),
            history: window
                .history
                .iter()
                .map(|ring| RingSnapshot {
                    capacity: ring.capacity() as u64,
                    values: ring.iter_oldest_first().collect(),
                })
                .collect(),
        }
    }

    fn restore_into(&self, window: &mut WindowState, nstock: usize) -> Result<(), String> {
        let fold = DayFold::from_tag(self.fold).ok_or_else(|| format!("invalid day fold {}", self.fold))?;
        if fold != window.fold {
            return Err(format!("day fold {fold:?}, expected {:?}", window.fold));
        }
        check_len("day accumulators", self.running.len(), nstock)?;
        check_len("rings", self.history.len(), nstock)?;
        for (acc, stored) in window.running.iter_mut().zip(&self.running) {
            *acc = DayAccumulator {
                acc: stored.acc,
                count: stored.count,
            };
        }
        for (ring, stored) in window.history.iter_mut().zip(&self.history) {
            let cap = ring.capacity();
            if stored.capacity != cap as u64 {
                return Err(format!(
                    "ring capacity {}, expected {cap}",
                    stored.capacity
                ));
            }
            *ring = RingBuffer::from_oldest_first(cap, &stored.values)
                .ok_or_else(|| format!("ring holds {} values, capacity {cap}", stored.values.len()))?;
        }
        Ok(())
    }
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), String> {
    if actual != expected {
        return Err(format!("{actual} {what}, expected {expected}"));
    }
    Ok(())
}

/// Frames a snapshot: magic, version, archive, CRC32.
pub(crate) fn encode(snapshot: &TreeSnapshot) -> Result<Vec<u8>, CheckpointError> {
    let archive = rkyv::to_bytes::<_, SCRATCH_SPACE>(snapshot).map_err(|err| {
        CheckpointError::Encode {
            reason: err.to_string(),
        }
    })?;
    let mut out = Vec::with_capacity(PREFIX_LEN + archive.len() + CRC_LEN);
    out.extend_from_slice(CHECKPOINT_MAGIC);
    out.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
    out.extend_from_slice(&archive);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Checks magic, version and CRC, then validates and deserializes the archive.
pub(crate) fn decode(bytes: &[u8]) -> Result<TreeSnapshot, CheckpointError> {
    if bytes.len() < PREFIX_LEN + CRC_LEN {
        return Err(CheckpointError::corrupt(format!(
            "checkpoint too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[..CHECKPOINT_MAGIC.len()] != CHECKPOINT_MAGIC {
        return Err(CheckpointError::corrupt("bad magic"));
    }
    let mut version_raw = [0u8; 4];
    version_raw.copy_from_slice(&bytes[CHECKPOINT_MAGIC.len()..PREFIX_LEN]);
    let version = u32::from_le_bytes(version_raw);
    if version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            found: version,
            expected: CHECKPOINT_VERSION,
        });
    }

    let (body, crc_raw) = bytes.split_at(bytes.len() - CRC_LEN);
    let mut stored = [0u8; CRC_LEN];
    stored.copy_from_slice(crc_raw);
    let stored = u32::from_le_bytes(stored);
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(CheckpointError::corrupt(format!(
            "crc mismatch: stored {stored:#010x}, computed {actual:#010x}"
        )));
    }

    // The archive sits at offset 12 in the file; rkyv needs it aligned.
    let payload = &body[PREFIX_LEN..];
    let mut aligned = AlignedVec::with_capacity(payload.len());
    aligned.extend_from_slice(payload);
    let archived = rkyv::check_archived_root::<TreeSnapshot>(&aligned[..])
        .map_err(|err| CheckpointError::corrupt(format!("invalid snapshot archive: {err}")))?;
    let snapshot: Result<TreeSnapshot, _> = archived.deserialize(&mut rkyv::Infallible);
    snapshot.map_err(|err| CheckpointError::corrupt(format!("snapshot deserialize failed: {err:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::build;
    use crate::compile_expr::parse_expression;

    fn sample() -> (TreeSnapshot, TreePlan) {
        let ast = parse_expression("ts_corr(@a, @b, 3) + in_ts_std(@a) * in_ts_ema(@b, 4)")
            .expect("parse");
        let (plan, _) = build(&ast).expect("build");
        let mut runtime = RuntimeState::from_plan(&plan, 2);
        runtime.begin_day();
        runtime.outputs[0] = 1.5;
        let snapshot = TreeSnapshot {
            expression: plan.render(plan.root),
            nstock: 2,
            batch_per_day: 4,
            day_index: 3,
            batch_in_day: 1,
            phase: DayPhase::DayOpen.tag(),
            nodes: TreeSnapshot::capture_nodes(&runtime),
        };
        (snapshot, plan)
    }

    #[test]
    fn encode_then_decode_restores_every_node() {
        let (snapshot, plan) = sample();
        let bytes = encode(&snapshot).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.expression, snapshot.expression);
        assert_eq!(decoded.init_args().expect("args"), InitArgs::new(2, 4));
        assert_eq!(decoded.phase().expect("phase"), DayPhase::DayOpen);
        assert_eq!(decoded.day_index, 3);

        let restored = decoded.restore_runtime(&plan, 2).expect("state");
        assert_eq!(restored.outputs[0], 1.5);
        assert!(restored.outputs[1].is_nan());
        let recaptured = TreeSnapshot {
            nodes: TreeSnapshot::capture_nodes(&restored),
            ..decoded
        };
        assert_eq!(encode(&recaptured).expect("re-encode"), bytes);
    }

    #[test]
    fn flipped_byte_fails_crc() {
        let (snapshot, _) = sample();
        let mut bytes = encode(&snapshot).expect("encode");
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = decode(&bytes).expect_err("crc must catch the flip");
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn other_version_is_reported() {
        let (snapshot, _) = sample();
        let mut bytes = encode(&snapshot).expect("encode");
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CheckpointError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn truncation_is_corrupt() {
        let (snapshot, _) = sample();
        let bytes = encode(&snapshot).expect("encode");
        for len in [0, 5, 12, bytes.len() - 1] {
            let err = decode(&bytes[..len]).expect_err("truncated input");
            assert!(err.is_corrupt(), "len {len}: {err}");
        }
    }

    #[test]
    fn empty_archive_with_valid_crc_is_corrupt() {
        let mut bytes = CHECKPOINT_MAGIC.to_vec();
        bytes.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        let err = decode(&bytes).expect_err("no archive");
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn shape_mismatch_is_rejected_after_decode() {
        let (mut snapshot, plan) = sample();
        snapshot.nodes.pop();
        let decoded = decode(&encode(&snapshot).expect("encode")).expect("decode");
        assert!(decoded.restore_runtime(&plan, 2).is_err());

        let (mut snapshot, plan) = sample();
        let stateful = snapshot
            .nodes
            .iter()
            .position(|node| !matches!(node.state, StateSnapshot::Stateless))
            .expect("sample has stateful nodes");
        snapshot.nodes.swap(0, stateful);
        let err = snapshot
            .restore_runtime(&plan, 2)
            .expect_err("state kinds are out of order");
        assert!(err.is_corrupt(), "{err}");

        let (mut snapshot, _) = sample();
        snapshot.phase = DayPhase::DayClosing.tag();
        assert!(snapshot.phase().is_err());
    }
}
