//! Worker filtering, scoring and greedy work assignment.
//!
//! Filters are pure: they borrow the worker collection and return a new list
//! of references in input order. The pipeline applies locality, gender,
//! skill and availability in that fixed order.

use servmatch_core::{GenderPreference, ServiceRequest, WorkRef, Worker};
use tracing::debug;

/// Criteria a worker must meet to be considered for a request.
#[derive(Debug, Clone, Copy)]
pub struct FilterCriteria<'r> {
    pub locality: &'r str,
    pub gender: GenderPreference,
    pub requested_works: &'r [WorkRef],
    pub require_available: bool,
}

impl<'r> FilterCriteria<'r> {
    pub fn for_request(request: &'r ServiceRequest, require_available: bool) -> Self {
        Self {
            locality: &request.locality,
            gender: request.gender_preference,
            requested_works: &request.requested_works,
            require_available,
        }
    }
}

pub fn filter_by_locality<'a>(workers: &[&'a Worker], locality: &str) -> Vec<&'a Worker> {
    workers
        .iter()
        .copied()
        .filter(|w| w.locality == locality)
        .collect()
}

pub fn filter_by_gender<'a>(workers: &[&'a Worker], preference: GenderPreference) -> Vec<&'a Worker> {
    workers
        .iter()
        .copied()
        .filter(|w| preference.admits(w.gender))
        .collect()
}

/// Keeps workers capable of at least one requested work.
pub fn filter_by_skills<'a>(workers: &[&'a Worker], requested: &[WorkRef]) -> Vec<&'a Worker> {
    workers
        .iter()
        .copied()
        .filter(|w| requested.iter().any(|work| w.can_perform(work)))
        .collect()
}

pub fn filter_by_availability<'a>(workers: &[&'a Worker], require_available: bool) -> Vec<&'a Worker> {
    workers
        .iter()
        .copied()
        .filter(|w| !require_available || w.available)
        .collect()
}

pub fn filter_workers<'a>(workers: &'a [Worker], criteria: &FilterCriteria<'_>) -> Vec<&'a Worker> {
    let all: Vec<&Worker> = workers.iter().collect();
    let filtered = filter_by_locality(&all, criteria.locality);
    let filtered = filter_by_gender(&filtered, criteria.gender);
    let filtered = filter_by_skills(&filtered, criteria.requested_works);
    filter_by_availability(&filtered, criteria.require_available)
}

/// A worker paired with its overlap count for one scoring pass.
#[derive(Debug, Clone, Copy)]
pub struct ScoredWorker<'a> {
    pub worker: &'a Worker,
    pub matching_count: usize,
}

pub fn score_workers<'a>(workers: &[&'a Worker], requested: &[WorkRef]) -> Vec<ScoredWorker<'a>> {
    workers
        .iter()
        .copied()
        .map(|worker| ScoredWorker {
            worker,
            matching_count: worker.matching_count(requested),
        })
        .collect()
}

/// Highest score first; ties keep their previous order.
pub fn sort_by_matching_count(workers: &mut [ScoredWorker<'_>]) {
    workers.sort_by(|a, b| b.matching_count.cmp(&a.matching_count));
}

/// Works given to each worker, in the order workers first received work.
#[derive(Debug, Clone, Default)]
pub struct WorkAssignment<'a> {
    entries: Vec<(&'a Worker, Vec<WorkRef>)>,
}

impl<'a> WorkAssignment<'a> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a Worker, &[WorkRef])> + '_ {
        self.entries.iter().map(|(w, works)| (*w, works.as_slice()))
    }

    pub fn works_for(&self, worker_id: &str) -> Option<&[WorkRef]> {
        self.entries
            .iter()
            .find(|(w, _)| w.id == worker_id)
            .map(|(_, works)| works.as_slice())
    }

    pub fn load_of(&self, worker_id: &str) -> usize {
        self.works_for(worker_id).map_or(0, <[WorkRef]>::len)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.entries.iter().map(|(w, _)| w.id.clone()).collect()
    }

    fn push(&mut self, worker: &'a Worker, work: WorkRef) {
        match self.entries.iter_mut().find(|(w, _)| w.id == worker.id) {
            Some((_, works)) => works.push(work),
            None => self.entries.push((worker, vec![work])),
        }
    }

    pub fn covers(&self, work: &WorkRef) -> bool {
        self.entries
            .iter()
            .any(|(_, works)| works.iter().any(|w| w.same_as(work)))
    }

    /// Requested works nobody received, in request order without repeats.
    pub fn uncovered(&self, requested: &[WorkRef]) -> Vec<WorkRef> {
        let mut missing: Vec<WorkRef> = Vec::new();
        for work in requested {
            if !self.covers(work) && !missing.iter().any(|m| m.same_as(work)) {
                missing.push(work.clone());
            }
        }
        missing
    }

    /// Longest per-worker total; workers run in parallel, their own works in sequence.
    pub fn longest_duration_minutes(&self) -> u32 {
        self.entries
            .iter()
            .map(|(_, works)| {
                works
                    .iter()
                    .fold(0u32, |total, w| total.saturating_add(w.duration_minutes))
            })
            .max()
            .unwrap_or(0)
    }
}

/// Greedy set-cover heuristic: each work in turn goes to the capable worker
/// with the fewest works so far, ties to the earlier worker in `eligible`.
/// Works no eligible worker can do are left out; callers check coverage.
pub fn assign_workers<'a>(requested: &[WorkRef], eligible: &[&'a Worker]) -> WorkAssignment<'a> {
    let mut assignment = WorkAssignment::default();
    for work in requested {
        let chosen = eligible
            .iter()
            .copied()
            .filter(|w| w.can_perform(work))
            .min_by_key(|w| assignment.load_of(&w.id));
        match chosen {
            Some(worker) => assignment.push(worker, work.clone()),
            None => debug!(work = %work.name, "no eligible worker can perform work"),
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use servmatch_core::{Gender, Work, WorkCatalog};

    fn catalog() -> WorkCatalog {
        WorkCatalog::from_works([
            Work::new(1, "Sweeping", 30, 200.0),
            Work::new(2, "Mopping", 40, 300.0),
            Work::new(3, "Window Cleaning", 60, 600.0),
            Work::new(4, "Dish Washing", 20, 150.0),
        ])
        .0
    }

    fn works(catalog: &WorkCatalog, names: &[&str]) -> Vec<WorkRef> {
        names.iter().map(|n| catalog.get(n).unwrap()).collect()
    }

    fn worker(id: &str, gender: Gender, locality: &str, capable: Vec<WorkRef>, available: bool) -> Worker {
        Worker {
            id: id.into(),
            credential: "pw".into(),
            name: id.into(),
            gender,
            locality: locality.into(),
            capable_works: capable,
            available,
            bookings: vec![],
        }
    }

    fn ids(workers: &[&Worker]) -> Vec<String> {
        workers.iter().map(|w| w.id.clone()).collect()
    }

    fn roster(c: &WorkCatalog) -> Vec<Worker> {
        vec![
            worker("W1", Gender::Male, "Patamata", works(c, &["Sweeping", "Mopping"]), true),
            worker("W2", Gender::Female, "Patamata", works(c, &["Mopping"]), false),
            worker("W3", Gender::Female, "Benz Circle", works(c, &["Sweeping"]), true),
            worker("W4", Gender::Female, "Patamata", works(c, &["Dish Washing"]), true),
            worker("W5", Gender::Female, "Patamata", works(c, &["Sweeping", "Window Cleaning"]), true),
        ]
    }

    #[test]
    fn pipeline_applies_every_stage() {
        let c = catalog();
        let workers = roster(&c);
        let requested = works(&c, &["Sweeping", "Mopping"]);

        let any_gender = FilterCriteria {
            locality: "Patamata",
            gender: GenderPreference::NoPreference,
            requested_works: &requested,
            require_available: false,
        };
        assert_eq!(ids(&filter_workers(&workers, &any_gender)), vec!["W1", "W2", "W5"]);

        let female_available = FilterCriteria {
            gender: GenderPreference::Female,
            require_available: true,
            ..any_gender
        };
        assert_eq!(ids(&filter_workers(&workers, &female_available)), vec!["W5"]);
    }

    #[test]
    fn filtering_is_repeatable_and_leaves_input_untouched() {
        let c = catalog();
        let workers = roster(&c);
        let before = workers.clone();
        let requested = works(&c, &["Mopping"]);
        let criteria = FilterCriteria {
            locality: "Patamata",
            gender: GenderPreference::NoPreference,
            requested_works: &requested,
            require_available: true,
        };
        let first = ids(&filter_workers(&workers, &criteria));
        let second = ids(&filter_workers(&workers, &criteria));
        assert_eq!(first, second);
        assert_eq!(first, vec!["W1"]);
        assert_eq!(workers, before);
    }

    #[test]
    fn gender_preference_excludes_otherwise_eligible_workers() {
        let c = catalog();
        let workers = roster(&c);
        let all: Vec<&Worker> = workers.iter().collect();
        assert_eq!(filter_by_gender(&all, GenderPreference::NoPreference).len(), 5);
        assert_eq!(ids(&filter_by_gender(&all, GenderPreference::Male)), vec!["W1"]);
        assert_eq!(filter_by_gender(&all, GenderPreference::Female).len(), 4);
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let c = catalog();
        let workers = vec![
            worker("A", Gender::Male, "X", works(&c, &["Sweeping"]), true),
            worker("B", Gender::Male, "X", works(&c, &["Sweeping", "Mopping"]), true),
            worker("C", Gender::Male, "X", works(&c, &["Mopping"]), true),
            worker("D", Gender::Male, "X", works(&c, &["Sweeping", "Mopping", "Dish Washing"]), true),
        ];
        let refs: Vec<&Worker> = workers.iter().collect();
        let requested = works(&c, &["Sweeping", "Mopping"]);

        let mut scored = score_workers(&refs, &requested);
        sort_by_matching_count(&mut scored);
        let order: Vec<(&str, usize)> = scored
            .iter()
            .map(|s| (s.worker.id.as_str(), s.matching_count))
            .collect();
        assert_eq!(order, vec![("B", 2), ("D", 2), ("A", 1), ("C", 1)]);
    }

    #[test]
    fn greedy_spreads_works_across_equal_workers() {
        let c = catalog();
        let workers = vec![
            worker("W1", Gender::Male, "X", works(&c, &["Sweeping", "Mopping"]), true),
            worker("W2", Gender::Male, "X", works(&c, &["Sweeping", "Mopping"]), true),
        ];
        let refs: Vec<&Worker> = workers.iter().collect();
        let requested = works(&c, &["Sweeping", "Mopping"]);

        let assignment = assign_workers(&requested, &refs);
        assert_eq!(assignment.worker_ids(), vec!["W1", "W2"]);
        assert_eq!(assignment.load_of("W1"), 1);
        assert_eq!(assignment.load_of("W2"), 1);
        assert!(assignment.uncovered(&requested).is_empty());
    }

    #[test]
    fn greedy_respects_capability_and_reports_gaps() {
        let c = catalog();
        let workers = vec![
            worker("W1", Gender::Male, "X", works(&c, &["Sweeping", "Mopping"]), true),
            worker("W2", Gender::Male, "X", works(&c, &["Mopping"]), true),
        ];
        let refs: Vec<&Worker> = workers.iter().collect();
        let requested = works(&c, &["Mopping", "Sweeping", "Window Cleaning", "Window Cleaning"]);

        let assignment = assign_workers(&requested, &refs);
        // Mopping -> W1 (tie, first listed); Sweeping -> W1 (only capable worker).
        assert_eq!(assignment.worker_ids(), vec!["W1"]);
        let names: Vec<&str> = assignment
            .works_for("W1")
            .unwrap()
            .iter()
            .map(|w| w.name.as_str())
            .collect();
        assert_eq!(names, vec!["Mopping", "Sweeping"]);
        assert_eq!(assignment.longest_duration_minutes(), 70);

        let missing: Vec<String> = assignment
            .uncovered(&requested)
            .iter()
            .map(|w| w.name.clone())
            .collect();
        assert_eq!(missing, vec!["Window Cleaning"]);
    }

    #[test]
    fn empty_eligible_set_assigns_nothing() {
        let c = catalog();
        let requested = works(&c, &["Sweeping"]);
        let assignment = assign_workers(&requested, &[]);
        assert!(assignment.is_empty());
        assert_eq!(assignment.longest_duration_minutes(), 0);
        assert_eq!(assignment.uncovered(&requested).len(), 1);
    }

    #[test]
    fn huge_durations_saturate_instead_of_overflowing() {
        let (c, _) = WorkCatalog::from_works([
            Work::new(1, "Deep Clean", u32::MAX - 10, 100.0),
            Work::new(2, "Polish", 60, 100.0),
        ]);
        let requested = works(&c, &["Deep Clean", "Polish"]);
        let solo = worker("W1", Gender::Male, "Patamata", requested.clone(), true);
        let refs = vec![&solo];

        let assignment = assign_workers(&requested, &refs);
        assert_eq!(assignment.longest_duration_minutes(), u32::MAX);
    }
}
