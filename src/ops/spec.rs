#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Per-instrument pure function of the current child values.
    Elem,
    /// Cross-sectional reduction over all instruments of one batch.
    Cs,
    /// Day-granularity rolling window over closed days plus the running day.
    Ts,
    /// Running statistic over the batches of the current day only.
    Intraday,
}

/// Rule that turns a day's batch values into the single summary a window
/// operator stores when the day closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayFold {
    Mean,
    Max,
    Min,
    Last,
}

impl DayFold {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Mean => 0,
            Self::Max => 1,
            Self::Min => 2,
            Self::Last => 3,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Mean),
            1 => Some(Self::Max),
            2 => Some(Self::Min),
            3 => Some(Self::Last),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    ElemAbs,
    ElemNeg,
    ElemSign,
    ElemSqrt,
    ElemLog,
    ElemLog1p,
    ElemExp,
    ElemRelu,
    ElemInv,
    ElemSquare,
    ElemAdd,
    ElemSub,
    ElemMul,
    ElemDiv,
    ElemPow,
    ElemMin,
    ElemMax,
    ElemLess,
    ElemGreater,
    CsRank,
    CsZscore,
    CsDemean,
    CsMean,
    CsSum,
    CsStd,
    TsMean,
    TsSum,
    TsStd,
    TsZscore,
    TsEma,
    TsRank,
    TsMax,
    TsMin,
    TsDelay,
    TsDiff,
    TsRet,
    TsCorr,
    TsCov,
    InTsMean,
    InTsStd,
    InTsEma,
    InTsSum,
}

impl OpCode {
    pub const COUNT: usize = Self::InTsSum as usize + 1;

    #[inline]
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}
