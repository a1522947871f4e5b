//! Session-scoped lot indices, rebuilt from scratch on every lots snapshot.

use std::collections::HashMap;

use lotledger_core::normalize_key;
use lotledger_inventory::{Lot, LotFilter, LotId};

/// Outcome of matching a sale line against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Unique (product name, lot number) match.
    Exact(LotId),
    /// No usable lot number, but exactly one lot carries the product name.
    NameOnly(LotId),
    /// Every candidate descends from one lot through transfers. Drawn as a
    /// single stock; the source comes first, then its derived lots.
    Family(Vec<LotId>),
    Ambiguous(Vec<LotId>),
    NoMatch,
}

impl Resolution {
    /// Lots a deduction may draw from, in draw order.
    pub fn lot_ids(&self) -> &[LotId] {
        match self {
            Resolution::Exact(id) | Resolution::NameOnly(id) => std::slice::from_ref(id),
            Resolution::Family(ids) => ids,
            Resolution::Ambiguous(_) | Resolution::NoMatch => &[],
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LotIndex {
    lots: HashMap<LotId, Lot>,
    by_key: HashMap<(String, String), Vec<LotId>>,
    by_name: HashMap<String, Vec<LotId>>,
}

impl LotIndex {
    /// Index every lot that satisfies the two-bin invariant. Corrupt lots are
    /// left out (and logged) so they can never be matched.
    pub fn build(lots: impl IntoIterator<Item = Lot>) -> Self {
        let mut index = Self::default();

        for lot in lots {
            if let Err(e) = lot.check_invariant() {
                tracing::warn!(lot_id = %lot.id(), error = %e, "skipping lot that violates the bin invariant");
                continue;
            }
            let (name, number) = lot.match_key();
            index.by_key.entry((name.clone(), number)).or_default().push(lot.id());
            index.by_name.entry(name).or_default().push(lot.id());
            index.lots.insert(lot.id(), lot);
        }

        // Candidate order must not depend on snapshot order.
        for ids in index.by_key.values_mut().chain(index.by_name.values_mut()) {
            ids.sort();
        }
        index
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn get(&self, id: LotId) -> Option<&Lot> {
        self.lots.get(&id)
    }

    pub fn lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.values()
    }

    /// Match a sale line. An exact (name, lot number) hit wins; otherwise,
    /// when allowed, a name-only lookup resolves only a single candidate.
    /// Several candidates resolve only when they form one transfer family.
    pub fn resolve(&self, product_name: &str, lot_number: Option<&str>, allow_name_only: bool) -> Resolution {
        let name = normalize_key(product_name);

        if let Some(number) = lot_number.map(normalize_key).filter(|n| !n.is_empty()) {
            match self.by_key.get(&(name.clone(), number)).map(Vec::as_slice) {
                Some([id]) => return Resolution::Exact(*id),
                Some(ids) if ids.len() > 1 => return self.group(ids),
                _ => {}
            }
        }

        if !allow_name_only {
            return Resolution::NoMatch;
        }

        match self.by_name.get(&name).map(Vec::as_slice) {
            Some([id]) => Resolution::NameOnly(*id),
            Some(ids) if ids.len() > 1 => self.group(ids),
            _ => Resolution::NoMatch,
        }
    }

    fn group(&self, ids: &[LotId]) -> Resolution {
        let Some(&first) = ids.first() else {
            return Resolution::NoMatch;
        };
        let root = self.family_root(first);
        if ids.iter().any(|id| self.family_root(*id) != root) {
            return Resolution::Ambiguous(ids.to_vec());
        }
        let mut members = ids.to_vec();
        members.sort_by_key(|id| (*id != root, *id));
        Resolution::Family(members)
    }

    /// The lot `id` was ultimately split from by transfers. A source that is
    /// no longer indexed still names the family.
    fn family_root(&self, id: LotId) -> LotId {
        let mut current = id;
        // Bounded walk: a corrupt cycle must not hang the pass.
        for _ in 0..=self.lots.len() {
            let parent = self
                .lots
                .get(&current)
                .and_then(Lot::transfer_meta)
                .map(|meta| meta.source_lot_id);
            match parent {
                Some(parent) if parent != current => current = parent,
                _ => break,
            }
        }
        current
    }

    /// Filtered read model, ordered by product name, lot number, then id.
    pub fn filter(&self, filter: &LotFilter) -> Vec<Lot> {
        let mut out: Vec<Lot> = self.lots.values().filter(|l| filter.matches(l)).cloned().collect();
        out.sort_by(|a, b| a.match_key().cmp(&b.match_key()).then(a.id().cmp(&b.id())));
        out
    }
}
