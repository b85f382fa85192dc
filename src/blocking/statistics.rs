//! Objective function of the blocking: unmet selections, course size differences and the penalty of courses sharing
//! a lane.

use super::course::Course;
use super::lane::Lane;
use super::student::Student;
use super::subject_group::SubjectGroup;
use super::{CourseIndex, GroupIndex};

use ndarray::Array2;
use std::cmp::Ordering;

/// Penalty for two courses of the same subject group sharing a lane
pub const SAME_GROUP_PENALTY: i64 = 10_000_000;
/// Scale of the penalty for two subject groups sharing a lane, if both have only a single course
pub const SINGLE_COURSE_PAIR_FACTOR: i64 = 1_000_000;
/// Scale of the penalty for two subject groups sharing a lane. It is divided by the number of alternative courses.
pub const PAIR_FACTOR: i64 = 100;
/// Penalty for two courses forbidden to share a lane (rule types 7 and 10) sharing a lane anyway
pub const FORBIDDEN_PAIR_PENALTY: i64 = 1_000_000_000;
/// Bonus (negative penalty) for two courses, which should be grouped (rule type 8), sharing a lane
pub const GROUPED_PAIR_BONUS: i64 = 1_000;

/// Result of comparing the current state with a saved state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Worse,
    Equal,
    Better,
}

impl Comparison {
    /// Convert the ordering of two "lower is better" values (current compared to saved)
    fn from_costs(ordering: Ordering) -> Comparison {
        match ordering {
            Ordering::Less => Comparison::Better,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Worse,
        }
    }

    /// Chain comparisons: the second one is only considered, if the first one is equal
    fn then(self, other: Comparison) -> Comparison {
        match self {
            Comparison::Equal => other,
            x => x,
        }
    }
}

/// Priority order of the rating's components in comparisons
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Unmet selections, then course size differences, then subject group pairs
    UnmetFirst,
    /// Subject group pairs, then unmet selections, then course size differences
    PairsFirst,
    /// Unmet selections and course size differences only (used for the student snapshot S)
    StudentsOnly,
}

/// The rating of a blocking state. All components are costs: lower is better.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rating {
    /// Number of selections without an assigned course
    pub unmet: usize,
    /// Histogram of course size differences: entry `d` is the number of subject groups, whose largest and smallest
    /// course differ by `d` students
    pub course_differences: Vec<usize>,
    /// Sum of penalties of all pairs of courses sharing a lane
    pub pair_penalty: i64,
}

impl Rating {
    /// Largest course size difference of any subject group
    pub fn max_course_difference(&self) -> usize {
        self.course_differences
            .iter()
            .rposition(|n| *n > 0)
            .unwrap_or(0)
    }

    /// Compare this (current) rating with a saved rating
    pub fn compare(&self, saved: &Rating, priority: Priority) -> Comparison {
        let unmet = Comparison::from_costs(self.unmet.cmp(&saved.unmet));
        let differences = compare_differences(&self.course_differences, &saved.course_differences);
        let pairs = Comparison::from_costs(self.pair_penalty.cmp(&saved.pair_penalty));
        match priority {
            Priority::UnmetFirst => unmet.then(differences).then(pairs),
            Priority::PairsFirst => pairs.then(unmet).then(differences),
            Priority::StudentsOnly => unmet.then(differences),
        }
    }
}

/// Compare two course difference histograms, starting with the largest difference. Fewer groups with a large
/// difference is better.
fn compare_differences(current: &[usize], saved: &[usize]) -> Comparison {
    let len = current.len().max(saved.len());
    for d in (0..len).rev() {
        let a = current.get(d).copied().unwrap_or(0);
        let b = saved.get(d).copied().unwrap_or(0);
        if a != b {
            return Comparison::from_costs(a.cmp(&b));
        }
    }
    Comparison::Equal
}

/// Checks whether a lane distribution, given as (lanes used, maximum lane crowding), is better than a saved one:
/// fewer lanes are better, for an equal number of lanes a lower maximum crowding is better.
pub fn is_lane_distribution_better(current: (usize, usize), saved: (usize, usize)) -> bool {
    current < saved
}

/// Penalty matrices of the blocking, created once at construction
#[derive(Clone, Debug)]
pub struct Statistics {
    /// Penalty of two subject groups sharing a lane
    group_pairs: Array2<i64>,
    /// Additional penalty (or bonus) of two courses sharing a lane, from rules 7, 8 and 10
    course_pairs: Array2<i64>,
    forbidden: Array2<bool>,
    /// All forbidden course pairs in the order they have been recorded. May contain duplicates.
    forbidden_pairs: Vec<(CourseIndex, CourseIndex)>,
    grouped_pairs: Vec<(CourseIndex, CourseIndex)>,
}

impl Statistics {
    /// Build the subject group pair matrix from the students' selections.
    ///
    /// The penalty of two groups is the number of students choosing both, scaled by `PAIR_FACTOR / (k1 + k2 - 2)`
    /// where k1 and k2 are the numbers of courses of the groups. The fewer alternative courses exist, the worse it is
    /// to place the groups into the same lane. If both groups have a single course, `SINGLE_COURSE_PAIR_FACTOR` is
    /// used instead. Groups without any course never cause a penalty.
    pub fn new(groups: &[SubjectGroup], students: &[Student], course_count: usize) -> Statistics {
        let n = groups.len();
        let mut group_pairs = Array2::<i64>::zeros((n, n));
        for student in students {
            for g1 in student.groups() {
                for g2 in student.groups() {
                    if g1 != g2 {
                        group_pairs[(*g1, *g2)] += 1;
                    }
                }
            }
        }
        for ((g1, g2), value) in group_pairs.indexed_iter_mut() {
            let k1 = groups[g1].course_count() as i64;
            let k2 = groups[g2].course_count() as i64;
            if k1 == 0 || k2 == 0 {
                *value = 0;
            } else if k1 + k2 == 2 {
                *value *= SINGLE_COURSE_PAIR_FACTOR;
            } else {
                *value *= PAIR_FACTOR / (k1 + k2 - 2);
            }
            if g1 == g2 {
                *value += SAME_GROUP_PENALTY;
            }
        }

        Statistics {
            group_pairs,
            course_pairs: Array2::zeros((course_count, course_count)),
            forbidden: Array2::from_elem((course_count, course_count), false),
            forbidden_pairs: Vec::new(),
            grouped_pairs: Vec::new(),
        }
    }

    pub fn group_pair_penalty(&self, g1: GroupIndex, g2: GroupIndex) -> i64 {
        self.group_pairs[(g1, g2)]
    }

    /// Penalty for the two courses sharing a lane
    pub fn pair_penalty(&self, a: &Course, b: &Course) -> i64 {
        self.group_pairs[(a.group, b.group)] + self.course_pairs[(a.index, b.index)]
    }

    /// Forbid the two courses to share a lane (rule types 7 and 10). The pair is recorded again, if it has already
    /// been forbidden.
    pub(super) fn record_forbidden_course_pair(&mut self, a: CourseIndex, b: CourseIndex) {
        self.forbidden[(a, b)] = true;
        self.forbidden[(b, a)] = true;
        self.course_pairs[(a, b)] += FORBIDDEN_PAIR_PENALTY;
        self.course_pairs[(b, a)] += FORBIDDEN_PAIR_PENALTY;
        self.forbidden_pairs.push((a, b));
    }

    /// Make the two courses attract each other during lane placement (rule type 8)
    pub(super) fn record_grouped_course_pair(&mut self, a: CourseIndex, b: CourseIndex) {
        self.course_pairs[(a, b)] -= GROUPED_PAIR_BONUS;
        self.course_pairs[(b, a)] -= GROUPED_PAIR_BONUS;
        self.grouped_pairs.push((a, b));
    }

    pub fn is_forbidden_pair(&self, a: CourseIndex, b: CourseIndex) -> bool {
        self.forbidden[(a, b)]
    }

    pub fn forbidden_pairs(&self) -> &[(CourseIndex, CourseIndex)] {
        &self.forbidden_pairs
    }

    pub fn grouped_pairs(&self) -> &[(CourseIndex, CourseIndex)] {
        &self.grouped_pairs
    }

    /// Number of distinct courses, the course may not share a lane with
    pub fn forbidden_partner_count(&self, course: CourseIndex) -> usize {
        self.forbidden.row(course).iter().filter(|f| **f).count()
    }

    /// Calculate the rating of the given state
    pub fn rate(
        &self,
        lanes: &[Lane],
        courses: &[Course],
        groups: &[SubjectGroup],
        students: &[Student],
        course_sizes: &[usize],
    ) -> Rating {
        let unmet = students.iter().map(|s| s.unmet_count()).sum();

        let mut course_differences = Vec::new();
        for group in groups {
            let sizes = group.courses().iter().map(|c| course_sizes[*c]);
            if let (Some(min), Some(max)) = (sizes.clone().min(), sizes.max()) {
                let diff = max - min;
                if course_differences.len() <= diff {
                    course_differences.resize(diff + 1, 0);
                }
                course_differences[diff] += 1;
            }
        }

        let mut pair_penalty = 0;
        for lane in lanes {
            for (i, a) in lane.courses().iter().enumerate() {
                for b in &lane.courses()[i + 1..] {
                    pair_penalty += self.pair_penalty(&courses[*a], &courses[*b]);
                }
            }
        }

        Rating {
            unmet,
            course_differences,
            pair_penalty,
        }
    }
}
