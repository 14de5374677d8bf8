//! Pairing fetched records across the two sides.
//!
//! Exact matching follows cross-references stored in metadata. Records left
//! without a counterpart may then be paired by title under an explicit
//! [`TitleMatchPolicy`]; those pairs are flagged as heuristic.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{MatchConfidence, Record, Side};

/// Normalisation and threshold for title-based matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleMatchPolicy {
    pub enabled: bool,
    pub case_insensitive: bool,
    pub collapse_whitespace: bool,
    /// Minimum Jaccard similarity of normalised word sets, in (0, 1].
    pub min_similarity: f64,
}

impl Default for TitleMatchPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            case_insensitive: true,
            collapse_whitespace: true,
            min_similarity: 1.0,
        }
    }
}

impl TitleMatchPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn normalize(&self, title: &str) -> String {
        let mut out = title.trim().to_string();
        if self.case_insensitive {
            out = out.to_lowercase();
        }
        if self.collapse_whitespace {
            out = out.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        out
    }

    /// 1.0 for identical normalised titles, else the Jaccard index of their
    /// word sets. Blank titles never match.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let (a, b) = (self.normalize(a), self.normalize(b));
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        let wa: BTreeSet<&str> = a.split_whitespace().collect();
        let wb: BTreeSet<&str> = b.split_whitespace().collect();
        let union = wa.union(&wb).count();
        if union == 0 {
            return 0.0;
        }
        wa.intersection(&wb).count() as f64 / union as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub a: Record,
    pub b: Record,
    pub confidence: MatchConfidence,
    pub similarity: f64,
}

impl MatchedPair {
    /// A points at B.
    pub fn a_linked(&self) -> bool {
        self.a.xref() == Some(self.b.id())
    }

    /// B points at A.
    pub fn b_linked(&self) -> bool {
        self.b.xref() == Some(self.a.id())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub pairs: Vec<MatchedPair>,
    pub unmatched_a: Vec<Record>,
    pub unmatched_b: Vec<Record>,
    /// A records referencing a counterpart that was not in this fetch.
    pub linked_elsewhere_a: Vec<Record>,
    pub linked_elsewhere_b: Vec<Record>,
}

impl MatchOutcome {
    pub fn linked_elsewhere(&self, side: Side) -> &[Record] {
        match side {
            Side::A => &self.linked_elsewhere_a,
            Side::B => &self.linked_elsewhere_b,
        }
    }

    pub fn linked_elsewhere_count(&self) -> usize {
        self.linked_elsewhere_a.len() + self.linked_elsewhere_b.len()
    }

    /// Pair `side`'s linked-elsewhere records with counterparts fetched
    /// separately from the other side.
    ///
    /// A counterpart is used only when it was not part of the original
    /// fetch and does not reference some other record. Returns how many
    /// pairs were added; the rest stay linked elsewhere.
    pub fn attach_counterparts(&mut self, side: Side, counterparts: Vec<Record>) -> usize {
        let other = side.other();
        let mut seen: HashSet<String> = self
            .pairs
            .iter()
            .map(|p| match other {
                Side::A => p.a.id().to_string(),
                Side::B => p.b.id().to_string(),
            })
            .collect();
        let (unmatched_other, elsewhere_other) = match other {
            Side::A => (&self.unmatched_a, &self.linked_elsewhere_a),
            Side::B => (&self.unmatched_b, &self.linked_elsewhere_b),
        };
        seen.extend(
            unmatched_other
                .iter()
                .chain(elsewhere_other.iter())
                .map(|r| r.id().to_string()),
        );

        let mut by_id: HashMap<String, Record> = counterparts
            .into_iter()
            .filter(|r| !seen.contains(r.id()))
            .map(|r| (r.id().to_string(), r))
            .collect();

        let waiting = match side {
            Side::A => std::mem::take(&mut self.linked_elsewhere_a),
            Side::B => std::mem::take(&mut self.linked_elsewhere_b),
        };
        let mut still_waiting = Vec::new();
        let mut attached = 0;
        for record in waiting {
            let counterpart_id = record
                .xref()
                .and_then(|x| by_id.get(x))
                .filter(|c| c.xref().map_or(true, |x| x == record.id()))
                .map(|c| c.id().to_string());
            let counterpart = counterpart_id.and_then(|id| by_id.remove(&id));
            match counterpart {
                Some(counterpart) => {
                    let (a, b) = match side {
                        Side::A => (record, counterpart),
                        Side::B => (counterpart, record),
                    };
                    self.pairs.push(MatchedPair {
                        a,
                        b,
                        confidence: MatchConfidence::Exact,
                        similarity: 1.0,
                    });
                    attached += 1;
                }
                None => still_waiting.push(record),
            }
        }
        match side {
            Side::A => self.linked_elsewhere_a = still_waiting,
            Side::B => self.linked_elsewhere_b = still_waiting,
        }
        attached
    }
}

/// Pair records from both sides. Fetch order is preserved throughout.
pub fn match_records(a: Vec<Record>, b: Vec<Record>, policy: &TitleMatchPolicy) -> MatchOutcome {
    let a_index: HashMap<&str, usize> = a.iter().enumerate().map(|(i, r)| (r.id(), i)).collect();
    let b_index: HashMap<&str, usize> = b.iter().enumerate().map(|(i, r)| (r.id(), i)).collect();

    let mut a_taken = vec![false; a.len()];
    let mut b_taken = vec![false; b.len()];
    let mut pairs: Vec<(usize, usize, MatchConfidence, f64)> = Vec::new();

    // Mutual references first, so a stale one-way reference never steals a
    // record that is linked back to someone else.
    for (ai, ra) in a.iter().enumerate() {
        let Some(&bi) = ra.xref().and_then(|x| b_index.get(x)) else {
            continue;
        };
        if !b_taken[bi] && b[bi].xref() == Some(ra.id()) {
            a_taken[ai] = true;
            b_taken[bi] = true;
            pairs.push((ai, bi, MatchConfidence::Exact, 1.0));
        }
    }

    // One-way references whose target is free and not pointing elsewhere.
    for (ai, ra) in a.iter().enumerate() {
        if a_taken[ai] {
            continue;
        }
        let Some(&bi) = ra.xref().and_then(|x| b_index.get(x)) else {
            continue;
        };
        if !b_taken[bi] && b[bi].xref().map_or(true, |x| x == ra.id()) {
            a_taken[ai] = true;
            b_taken[bi] = true;
            pairs.push((ai, bi, MatchConfidence::Exact, 1.0));
        }
    }
    for (bi, rb) in b.iter().enumerate() {
        if b_taken[bi] {
            continue;
        }
        let Some(&ai) = rb.xref().and_then(|x| a_index.get(x)) else {
            continue;
        };
        if !a_taken[ai] && a[ai].xref().is_none() {
            a_taken[ai] = true;
            b_taken[bi] = true;
            pairs.push((ai, bi, MatchConfidence::Exact, 1.0));
        }
    }

    let mut elsewhere_a = vec![false; a.len()];
    let mut elsewhere_b = vec![false; b.len()];
    for (taken, elsewhere, records) in [
        (&mut a_taken, &mut elsewhere_a, &a),
        (&mut b_taken, &mut elsewhere_b, &b),
    ] {
        for (i, r) in records.iter().enumerate() {
            if !taken[i] && r.xref().is_some() {
                taken[i] = true;
                elsewhere[i] = true;
            }
        }
    }

    if policy.enabled {
        for (ai, ra) in a.iter().enumerate() {
            if a_taken[ai] || ra.deleted {
                continue;
            }
            let best = b
                .iter()
                .enumerate()
                .filter(|(bi, rb)| !b_taken[*bi] && !rb.deleted)
                .map(|(bi, rb)| (bi, policy.similarity(&ra.title, &rb.title)))
                .filter(|(_, s)| *s >= policy.min_similarity)
                .fold(None, |best: Option<(usize, f64)>, (bi, s)| match best {
                    Some((_, bs)) if bs >= s => best,
                    _ => Some((bi, s)),
                });
            if let Some((bi, similarity)) = best {
                debug!(a = %ra.origin, b = %b[bi].origin, similarity, "heuristic title match");
                a_taken[ai] = true;
                b_taken[bi] = true;
                pairs.push((ai, bi, MatchConfidence::Heuristic, similarity));
            }
        }
    }

    pairs.sort_by_key(|(ai, _, _, _)| *ai);

    let mut a_slots: Vec<Option<Record>> = a.into_iter().map(Some).collect();
    let mut b_slots: Vec<Option<Record>> = b.into_iter().map(Some).collect();
    let mut outcome = MatchOutcome::default();
    for (ai, bi, confidence, similarity) in pairs {
        if let (Some(ra), Some(rb)) = (a_slots[ai].take(), b_slots[bi].take()) {
            outcome.pairs.push(MatchedPair {
                a: ra,
                b: rb,
                confidence,
                similarity,
            });
        }
    }
    for (i, slot) in a_slots.into_iter().enumerate() {
        match slot {
            Some(r) if elsewhere_a[i] => outcome.linked_elsewhere_a.push(r),
            Some(r) if !a_taken[i] => outcome.unmatched_a.push(r),
            _ => {}
        }
    }
    for (i, slot) in b_slots.into_iter().enumerate() {
        match slot {
            Some(r) if elsewhere_b[i] => outcome.linked_elsewhere_b.push(r),
            Some(r) if !b_taken[i] => outcome.unmatched_b.push(r),
            _ => {}
        }
    }
    outcome
}
