//! The DPLL-style backtracking loop itself (§4.8 steps 1-5).

use std::collections::{BTreeSet, HashMap};

use depman_schemas::{Lock, LockedProject, Manifest};

use super::failure::Failure;
use super::select::{build_version_queue, pick_next, ConstraintSet};
use crate::pkgtree::ReachMap;
use crate::version::{Constraint, PairedVersion, Revision};

/// Everything the solver needs from the rest of the system: version lists
/// and manifests, reached through whatever source manager is in play.
/// Decoupled from a concrete type so the solver's constructor takes this
/// explicitly, per §9's "avoid a hidden singleton" note.
pub trait ProjectProvider: Send + Sync {
    fn list_versions(&self, project_root: &str) -> anyhow::Result<Vec<PairedVersion>>;
    fn manifest_for(&self, project_root: &str, revision: &Revision) -> anyhow::Result<Manifest>;
    fn project_root_for_import(&self, import_path: &str) -> anyhow::Result<String>;
}

/// Inputs to a solve (§4.8 step 1).
pub struct SolveParams {
    pub root_project_root: String,
    pub root_reach: ReachMap,
    pub ignored: BTreeSet<String>,
    pub required: BTreeSet<String>,
    pub manifest: Manifest,
    pub lock: Option<Lock>,
    pub update_list: BTreeSet<String>,
    pub downgrade: bool,
    pub input_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("invalid solver input: {0}")]
    Input(String),
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
    #[error("no solution satisfies the given constraints")]
    NoSolution(Failure),
}

/// A successful solve's output (§4.8 step 5).
pub struct Solution {
    pub projects: Vec<LockedProject>,
    pub attempt_count: usize,
    pub input_hash: String,
    pub analyzer_name: String,
    pub analyzer_version: String,
    pub solver_identity: String,
}

/// An unresolvable constraint, flagged by the standalone ineffectual check
/// (§4.8, final paragraph): its ProjectRoot prefix matches no import the
/// root tree (or its required list) actually needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IneffectualConstraint {
    pub project_root: String,
}

struct Frame {
    project: String,
    version: PairedVersion,
    source_override: Option<String>,
    remaining: Vec<PairedVersion>,
    touched: Vec<String>,
    /// Whether this project had more than one candidate when the round that
    /// produced this frame began. Projects unit-propagated from a single
    /// remaining candidate don't count as a solver "attempt" (§8's worked
    /// scenarios only count decisions with a real choice).
    multi_candidate: bool,
}

pub struct Solver<P: ProjectProvider> {
    provider: P,
    analyzer_name: String,
    analyzer_version: String,
}

const SOLVER_IDENTITY: &str = "depman-solver-1";

impl<P: ProjectProvider> Solver<P> {
    pub fn new(provider: P, analyzer_name: impl Into<String>, analyzer_version: impl Into<String>) -> Solver<P> {
        Solver {
            provider,
            analyzer_name: analyzer_name.into(),
            analyzer_version: analyzer_version.into(),
        }
    }

    /// Run a full solve (§4.8 steps 1-5).
    pub fn solve(&self, params: SolveParams) -> Result<Solution, SolveError> {
        if params.root_project_root.is_empty() {
            return Err(SolveError::Input("root project root must not be empty".into()));
        }
        let overlap: Vec<&String> = params.ignored.intersection(&params.required).collect();
        if !overlap.is_empty() {
            return Err(SolveError::Input(format!(
                "ignored and required sets overlap: {overlap:?}"
            )));
        }
        for updated in &params.update_list {
            if params.lock.is_none() {
                return Err(SolveError::Input(format!(
                    "`{updated}` named in the update list but no lock is present"
                )));
            }
        }

        // Step 1: external import list -> initial constraint set.
        let mut imports: BTreeSet<String> = params
            .root_reach
            .all_external_imports()
            .into_iter()
            .filter(|p| !params.ignored.contains(p))
            .collect();
        imports.extend(params.required.iter().cloned());

        let mut constraints = ConstraintSet::default();
        let mut project_roots = BTreeSet::new();
        for import in &imports {
            let root = self.provider.project_root_for_import(import)?;
            project_roots.insert(root);
        }
        for root in &project_roots {
            constraints.tighten(root, Constraint::Any, None, None);
        }
        for (root, props) in &params.manifest.dependencies {
            let c = props
                .constraint
                .as_deref()
                .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                .unwrap_or(Constraint::Any);
            constraints.tighten(root, c, props.source.clone(), None);
        }

        // Step 2: overrides replace unconditionally.
        for (root, props) in &params.manifest.overrides {
            let c = props
                .constraint
                .as_deref()
                .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                .unwrap_or(Constraint::Any);
            constraints.0.insert(
                root.clone(),
                super::select::ConstraintEntry {
                    constraint: c,
                    source_override: props.source.clone(),
                    contributor: None,
                },
            );
        }

        // Step 3: lock intersection.
        let mut lock_hints: HashMap<String, Revision> = HashMap::new();
        let mut preferred_hints: HashMap<String, Revision> = HashMap::new();
        if let Some(lock) = &params.lock {
            if lock.input_hash == params.input_hash {
                for locked in &lock.projects {
                    if params.update_list.contains(&locked.name) {
                        continue;
                    }
                    lock_hints.insert(locked.name.clone(), Revision(locked.revision.clone()));
                }
            } else {
                for locked in &lock.projects {
                    preferred_hints.insert(locked.name.clone(), Revision(locked.revision.clone()));
                }
            }
        }

        let mut stack: Vec<Frame> = Vec::new();
        let mut failure = Failure::default();
        let mut version_cache: HashMap<String, Vec<PairedVersion>> = HashMap::new();
        let mut attempts: usize = 0;

        loop {
            let selected: BTreeSet<&str> = stack.iter().map(|f| f.project.as_str()).collect();
            let unselected: Vec<String> = constraints
                .0
                .keys()
                .filter(|p| !selected.contains(p.as_str()))
                .cloned()
                .collect();

            if unselected.is_empty() {
                let mut projects: Vec<LockedProject> = stack
                    .iter()
                    .map(|f| LockedProject::new(f.project.clone(), f.version.revision().0.clone()))
                    .collect();
                projects.sort_by(|a, b| a.name.cmp(&b.name));
                return Ok(Solution {
                    projects,
                    attempt_count: attempts,
                    input_hash: params.input_hash,
                    analyzer_name: self.analyzer_name.clone(),
                    analyzer_version: self.analyzer_version.clone(),
                    solver_identity: SOLVER_IDENTITY.to_string(),
                });
            }

            let mut candidate_counts = Vec::with_capacity(unselected.len());
            for project in &unselected {
                let versions = self.versions_for(project, &mut version_cache)?;
                let entry = constraints.get(project).expect("just filtered from constraints");
                let count = versions
                    .iter()
                    .filter(|v| entry.constraint.matches(&crate::version::Version::Paired((*v).clone())))
                    .count();
                candidate_counts.push((project.clone(), count));
            }
            let next = pick_next(&candidate_counts).expect("unselected is non-empty").to_string();

            let entry = constraints.get(&next).expect("picked from constraints").clone();
            let upstream = self.versions_for(&next, &mut version_cache)?;
            let queue = build_version_queue(&upstream, lock_hints.get(&next), preferred_hints.get(&next), params.downgrade);

            let mut accepted = Vec::with_capacity(queue.len());
            for v in queue {
                if entry.constraint.matches(&crate::version::Version::Paired(v.clone())) {
                    accepted.push(v);
                } else {
                    failure.record(&next, v.to_string(), entry.constraint.clone());
                }
            }
            let multi_candidate = accepted.len() > 1;

            match self.try_candidates(
                &next,
                accepted,
                &entry.source_override,
                &mut constraints,
                stack.len(),
                multi_candidate,
                &mut attempts,
                &mut failure,
            ) {
                Some(frame) => stack.push(frame),
                None => {
                    match self.backjump(&params, &project_roots, &mut stack, entry.contributor, &mut attempts, &mut failure)? {
                        Some(new_constraints) => constraints = new_constraints,
                        None => return Err(SolveError::NoSolution(failure)),
                    }
                }
            }
        }
    }

    /// Pop the stack back to (and re-decide) `contributor`, replaying every
    /// surviving frame's dependency manifest to rebuild the constraint set
    /// exactly as it stood right before `contributor` was originally
    /// selected (§4.8 step 4d's "conflict-directed backjumping"). If
    /// `contributor`'s own candidates are exhausted too, this keeps walking
    /// back through whichever frame introduced *its* constraint, falling
    /// back to chronological backtracking only when no earlier contributor
    /// is recorded.
    #[allow(clippy::too_many_arguments)]
    fn backjump(
        &self,
        params: &SolveParams,
        initial_roots: &BTreeSet<String>,
        stack: &mut Vec<Frame>,
        contributor: Option<usize>,
        attempts: &mut usize,
        failure: &mut Failure,
    ) -> Result<Option<ConstraintSet>, SolveError> {
        let Some(mut idx) = contributor else {
            return Ok(None);
        };

        loop {
            if idx >= stack.len() {
                return Ok(None);
            }
            stack.truncate(idx + 1);
            let culprit = stack.pop().expect("idx < original stack length");
            let mut constraints = self.replay(params, initial_roots, stack)?;
            let multi_candidate = culprit.multi_candidate;

            match self.try_candidates(
                &culprit.project,
                culprit.remaining,
                &culprit.source_override,
                &mut constraints,
                stack.len(),
                multi_candidate,
                attempts,
                failure,
            ) {
                Some(frame) => {
                    stack.push(frame);
                    return Ok(Some(constraints));
                }
                None => {
                    let next_contributor = constraints.get(&culprit.project).and_then(|e| e.contributor);
                    match next_contributor {
                        Some(earlier) if earlier < idx => idx = earlier,
                        _ => {
                            if idx == 0 {
                                return Ok(None);
                            }
                            idx -= 1;
                        }
                    }
                }
            }
        }
    }

    fn versions_for<'a>(
        &self,
        project: &str,
        cache: &'a mut HashMap<String, Vec<PairedVersion>>,
    ) -> Result<Vec<PairedVersion>, SolveError> {
        if !cache.contains_key(project) {
            let versions = self.provider.list_versions(project)?;
            cache.insert(project.to_string(), versions);
        }
        Ok(cache[project].clone())
    }

    /// Try each candidate for `project` in order until one merges cleanly
    /// with the accumulated constraint set, or all are exhausted. Each trial
    /// counts toward `attempts` only when `multi_candidate` is set — a
    /// project unit-propagated from its one remaining candidate isn't a
    /// solver decision.
    #[allow(clippy::too_many_arguments)]
    fn try_candidates(
        &self,
        project: &str,
        mut candidates: Vec<PairedVersion>,
        source_override: &Option<String>,
        constraints: &mut ConstraintSet,
        frame_index: usize,
        multi_candidate: bool,
        attempts: &mut usize,
        failure: &mut Failure,
    ) -> Option<Frame> {
        while !candidates.is_empty() {
            let candidate = candidates.remove(0);
            if multi_candidate {
                *attempts += 1;
            }
            let manifest = match self.provider.manifest_for(project, candidate.revision()) {
                Ok(m) => m,
                Err(_) => {
                    failure.record(project, candidate.to_string(), Constraint::None);
                    continue;
                }
            };

            let mut touched = Vec::new();
            let mut ok = true;
            let mut applied: Vec<(String, super::select::ConstraintEntry)> = Vec::new();
            for (dep_root, props) in manifest.dependencies.iter().chain(manifest.overrides.iter()) {
                let c = props
                    .constraint
                    .as_deref()
                    .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                    .unwrap_or(Constraint::Any);
                let prior = constraints.get(dep_root).cloned();
                let merged = match &prior {
                    Some(p) => p.constraint.intersect(&c),
                    None => c.clone(),
                };
                if merged == Constraint::None {
                    ok = false;
                    break;
                }
                applied.push((
                    dep_root.clone(),
                    super::select::ConstraintEntry {
                        constraint: merged,
                        source_override: props.source.clone().or_else(|| prior.as_ref().and_then(|p| p.source_override.clone())),
                        contributor: Some(frame_index),
                    },
                ));
                touched.push(dep_root.clone());
            }

            if !ok {
                failure.record(project, candidate.to_string(), Constraint::None);
                continue;
            }

            for (root, entry) in applied {
                constraints.0.insert(root, entry);
            }

            return Some(Frame {
                project: project.to_string(),
                version: candidate,
                source_override: source_override.clone(),
                remaining: candidates,
                touched,
                multi_candidate,
            });
        }
        None
    }

    /// Rebuild the constraint set from the root-derived initial set plus
    /// every surviving frame's dependency manifest, in order. Frames'
    /// manifests are re-fetched rather than cached per-frame: the provider
    /// is expected to serve them from its own cache, and re-deriving keeps
    /// this function a pure function of `stack` instead of needing to carry
    /// a parallel manifest list alongside it.
    fn replay(&self, params: &SolveParams, initial_roots: &BTreeSet<String>, stack: &[Frame]) -> Result<ConstraintSet, SolveError> {
        let mut constraints = ConstraintSet::default();
        for root in initial_roots {
            constraints.tighten(root, Constraint::Any, None, None);
        }
        for (root, props) in &params.manifest.dependencies {
            let c = props
                .constraint
                .as_deref()
                .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                .unwrap_or(Constraint::Any);
            constraints.tighten(root, c, props.source.clone(), None);
        }
        for (root, props) in &params.manifest.overrides {
            let c = props
                .constraint
                .as_deref()
                .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                .unwrap_or(Constraint::Any);
            constraints.0.insert(
                root.clone(),
                super::select::ConstraintEntry {
                    constraint: c,
                    source_override: props.source.clone(),
                    contributor: None,
                },
            );
        }

        for (idx, frame) in stack.iter().enumerate() {
            let manifest = self.provider.manifest_for(&frame.project, frame.version.revision())?;
            for (dep_root, props) in manifest.dependencies.iter().chain(manifest.overrides.iter()) {
                let c = props
                    .constraint
                    .as_deref()
                    .map(|s| s.parse::<Constraint>().unwrap_or(Constraint::Any))
                    .unwrap_or(Constraint::Any);
                constraints.tighten(dep_root, c, props.source.clone(), Some(idx));
            }
        }
        Ok(constraints)
    }

    /// The standalone ineffectual-constraints check (§4.8, final paragraph).
    pub fn ineffectual_constraints(
        &self,
        reach: &ReachMap,
        required: &BTreeSet<String>,
        manifest: &Manifest,
    ) -> anyhow::Result<Vec<IneffectualConstraint>> {
        let mut needed_roots = BTreeSet::new();
        for import in reach.all_external_imports().into_iter().chain(required.iter().cloned()) {
            needed_roots.insert(self.provider.project_root_for_import(&import)?);
        }

        let mut declared: BTreeSet<String> = BTreeSet::new();
        declared.extend(manifest.dependencies.keys().cloned());
        declared.extend(manifest.overrides.keys().cloned());
        declared.extend(manifest.ignored.iter().cloned());

        Ok(declared
            .into_iter()
            .filter(|root| !needed_roots.iter().any(|n| n == root || n.starts_with(&format!("{root}/"))))
            .map(|project_root| IneffectualConstraint { project_root })
            .collect())
    }
}
