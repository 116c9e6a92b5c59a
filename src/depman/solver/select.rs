//! Constraint-set bookkeeping, tie-break ordering, and version-queue
//! construction (§4.8 steps 4a/4b).

use std::collections::BTreeMap;

use crate::version::{sort_for_upgrade, Constraint, PairedVersion, Revision};

/// The constraint accumulated against one project so far, together with
/// whichever frame (by stack index) last tightened it. `contributor = None`
/// means the constraint came from the initial set built in `Prepare` and
/// can never be blamed during a backjump — a conflict on a root constraint
/// is unsolvable, not a reason to look further back.
#[derive(Debug, Clone)]
pub struct ConstraintEntry {
    pub constraint: Constraint,
    pub source_override: Option<String>,
    pub contributor: Option<usize>,
}

/// The accumulated constraint on every project mentioned so far.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet(pub BTreeMap<String, ConstraintEntry>);

impl ConstraintSet {
    /// Merge `constraint` into whatever this project already has,
    /// recording `contributor` as the most recent frame to touch it.
    /// Returns `true` if this created a new entry (the project needs to be
    /// queued if it has no decision yet).
    pub fn tighten(
        &mut self,
        project: &str,
        constraint: Constraint,
        source_override: Option<String>,
        contributor: Option<usize>,
    ) -> bool {
        match self.0.get_mut(project) {
            Some(entry) => {
                entry.constraint = entry.constraint.intersect(&constraint);
                if source_override.is_some() {
                    entry.source_override = source_override;
                }
                entry.contributor = contributor;
                false
            }
            None => {
                self.0.insert(
                    project.to_string(),
                    ConstraintEntry {
                        constraint,
                        source_override,
                        contributor,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, project: &str) -> Option<&ConstraintEntry> {
        self.0.get(project)
    }
}

/// Pick the next project to decide from `candidates`, per the tie-break
/// rules: ascending remaining-candidate count (which also handles "single
/// candidate first" since 1 is the smallest nonzero count), then
/// lexicographic ProjectRoot order.
pub fn pick_next<'a>(candidates: &'a [(String, usize)]) -> Option<&'a str> {
    candidates
        .iter()
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(root, _)| root.as_str())
}

/// Build the ordered version queue for a project: the lock hint first (if
/// any), then the preferred hint, then the sorted upstream list, with
/// `downgrade` reversing the semver ordering. Hints that don't actually
/// appear in the upstream list are dropped rather than fabricated.
pub fn build_version_queue(
    upstream: &[PairedVersion],
    lock_hint: Option<&Revision>,
    preferred_hint: Option<&Revision>,
    downgrade: bool,
) -> Vec<PairedVersion> {
    let mut sorted = upstream.to_vec();
    sort_for_upgrade(&mut sorted, downgrade);

    let mut queue = Vec::with_capacity(sorted.len());
    let mut used = std::collections::HashSet::new();

    for hint in [lock_hint, preferred_hint].into_iter().flatten() {
        if let Some(pos) = sorted.iter().position(|v| v.revision() == hint) {
            if used.insert(sorted[pos].revision().clone()) {
                queue.push(sorted[pos].clone());
            }
        }
    }
    for v in sorted {
        if used.insert(v.revision().clone()) {
            queue.push(v);
        }
    }
    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_next_prefers_fewest_candidates_then_lexicographic() {
        let candidates = vec![
            ("b".to_string(), 2),
            ("a".to_string(), 2),
            ("z".to_string(), 1),
        ];
        assert_eq!(pick_next(&candidates), Some("z"));

        let tie = vec![("b".to_string(), 2), ("a".to_string(), 2)];
        assert_eq!(pick_next(&tie), Some("a"));
    }

    #[test]
    fn lock_hint_takes_priority_over_sort_order() {
        use crate::version::UnpairedVersion;
        let v = |s: &str, r: &str| PairedVersion::new(UnpairedVersion::Semver(s.parse().unwrap()), Revision(r.into()));
        let upstream = vec![v("1.0.0", "rev1"), v("1.1.0", "rev2")];
        let queue = build_version_queue(&upstream, Some(&Revision("rev1".into())), None, false);
        assert_eq!(queue[0].revision(), &Revision("rev1".into()));
    }
}
