//! Two-bin quantities and draw planning.

use serde::{Deserialize, Deserializer, Serialize};

/// One of the two sub-locations a lot's quantity is split across.
///
/// Serialized as `"a"` / `"b"`; decoding accepts any spelling
/// [`Bin::from_tag`] understands, since tags arrive as operator input.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Bin {
    #[serde(rename = "a")]
    A,
    #[serde(rename = "b")]
    B,
}

impl Bin {
    pub fn other(self) -> Bin {
        match self {
            Bin::A => Bin::B,
            Bin::B => Bin::A,
        }
    }

    /// Lenient parse for tags typed by operators ("A", "bin b", ...).
    pub fn from_tag(tag: &str) -> Option<Bin> {
        let t: String = tag
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match t.as_str() {
            "a" | "bina" => Some(Bin::A),
            "b" | "binb" => Some(Bin::B),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Bin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Bin::from_tag(&raw).ok_or_else(|| serde::de::Error::custom(format!("unknown bin tag {raw:?}")))
    }
}

impl core::fmt::Display for Bin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Bin::A => f.write_str("A"),
            Bin::B => f.write_str("B"),
        }
    }
}

/// Per-bin quantities of a lot.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinQuantities {
    pub bin_a: i64,
    pub bin_b: i64,
}

impl BinQuantities {
    pub const ZERO: BinQuantities = BinQuantities { bin_a: 0, bin_b: 0 };

    pub fn new(bin_a: i64, bin_b: i64) -> Self {
        Self { bin_a, bin_b }
    }

    /// All of `qty` placed in a single bin.
    pub fn single(bin: Bin, qty: i64) -> Self {
        match bin {
            Bin::A => Self::new(qty, 0),
            Bin::B => Self::new(0, qty),
        }
    }

    pub fn get(&self, bin: Bin) -> i64 {
        match bin {
            Bin::A => self.bin_a,
            Bin::B => self.bin_b,
        }
    }

    pub fn total(&self) -> i64 {
        self.bin_a + self.bin_b
    }

    pub fn is_non_negative(&self) -> bool {
        self.bin_a >= 0 && self.bin_b >= 0
    }
}

/// Order in which bins are drawn from.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinPreference {
    /// Draw from bin A, overflow into bin B.
    #[default]
    PreferA,
    /// Draw from bin B, overflow into bin A.
    PreferB,
}

impl BinPreference {
    /// First tag present wins: line tag, then document tag, then the default.
    pub fn resolve(line_tag: Option<Bin>, document_tag: Option<Bin>) -> Self {
        match line_tag.or(document_tag) {
            Some(bin) => Self::from(bin),
            None => Self::default(),
        }
    }

    pub fn primary(self) -> Bin {
        match self {
            BinPreference::PreferA => Bin::A,
            BinPreference::PreferB => Bin::B,
        }
    }
}

impl From<Bin> for BinPreference {
    fn from(bin: Bin) -> Self {
        match bin {
            Bin::A => BinPreference::PreferA,
            Bin::B => BinPreference::PreferB,
        }
    }
}

/// How much to take from each bin, plus what could not be satisfied.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawPlan {
    pub from_a: i64,
    pub from_b: i64,
    /// Requested quantity neither bin could cover.
    pub short: i64,
}

impl DrawPlan {
    pub fn drawn(&self) -> i64 {
        self.from_a + self.from_b
    }

    pub fn is_noop(&self) -> bool {
        self.drawn() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.short == 0
    }

    /// Bin deltas to feed into `Lot::adjust_bins`.
    pub fn deltas(&self) -> (i64, i64) {
        (-self.from_a, -self.from_b)
    }
}

/// Plan a draw of `requested` units against `available`.
///
/// The primary bin is drained first and the remainder overflows into the
/// other bin up to its availability. Never plans more than is available;
/// anything left over is reported as `short`.
pub fn plan_draw(available: BinQuantities, requested: i64, preference: BinPreference) -> DrawPlan {
    if requested <= 0 {
        return DrawPlan::default();
    }

    let primary = preference.primary();
    let from_primary = available.get(primary).max(0).min(requested);
    let from_secondary = available.get(primary.other()).max(0).min(requested - from_primary);
    let short = requested - from_primary - from_secondary;

    match primary {
        Bin::A => DrawPlan {
            from_a: from_primary,
            from_b: from_secondary,
            short,
        },
        Bin::B => DrawPlan {
            from_a: from_secondary,
            from_b: from_primary,
            short,
        },
    }
}

/// A draw spread over several lots treated as one stock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDraw {
    /// One plan per member, in member order. Member plans carry no shortfall.
    pub plans: Vec<DrawPlan>,
    pub short: i64,
}

impl GroupDraw {
    pub fn drawn(&self) -> i64 {
        self.plans.iter().map(DrawPlan::drawn).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.drawn() == 0
    }

    /// Every member's draw folded into one plan.
    pub fn combined(&self) -> DrawPlan {
        DrawPlan {
            from_a: self.plans.iter().map(|p| p.from_a).sum(),
            from_b: self.plans.iter().map(|p| p.from_b).sum(),
            short: self.short,
        }
    }
}

/// Plan a draw of `requested` units across several lots.
///
/// The primary bin is drained across every member, in order, before any
/// member's other bin is touched. With a single member this is the same
/// draw as [`plan_draw`].
pub fn plan_group_draw(available: &[BinQuantities], requested: i64, preference: BinPreference) -> GroupDraw {
    let mut plans = vec![DrawPlan::default(); available.len()];
    let mut left = requested.max(0);

    let primary = preference.primary();
    for bin in [primary, primary.other()] {
        for (plan, avail) in plans.iter_mut().zip(available) {
            let take = avail.get(bin).max(0).min(left);
            match bin {
                Bin::A => plan.from_a += take,
                Bin::B => plan.from_b += take,
            }
            left -= take;
        }
    }

    GroupDraw { plans, short: left }
}
