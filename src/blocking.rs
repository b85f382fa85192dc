//! The blocking engine: it places courses into lanes and students into courses, using a number of randomized
//! strategies.
//!
//! The engine holds the complete state of a blocking (lanes, courses, subject groups, students and their assignments)
//! in flat arrays, which reference each other by index. It does not optimize on its own: an external driver calls
//! the distribution actions repeatedly, compares the resulting rating with one of the three saved snapshots (S, K, G)
//! and either keeps the new state or restores the snapshot.

mod course;
mod lane;
mod statistics;
mod student;
mod subject_group;

pub use self::course::Course;
pub use self::lane::{Lane, LaneIndex};
pub use self::statistics::{Comparison, Priority, Rating, Statistics};
pub use self::student::Student;
pub use self::subject_group::SubjectGroup;

use self::student::StudentContext;
use crate::rules::Rule;
use crate::{BlockingError, BlockingInput, BlockingResult, CourseId, CourseInput, StudentId, SubjectId};
use crate::{CourseTypeId, RawRule};

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Index of a course in the engine's course list
pub type CourseIndex = usize;
/// Index of a subject group in the engine's group list
pub type GroupIndex = usize;
/// Index of a student in the engine's student list
pub type StudentIndex = usize;

/// Identity of a saved state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SnapshotKey {
    /// Working checkpoint of the student distribution
    S,
    /// Working checkpoint of the combined course and student distribution
    K,
    /// Best state found so far
    G,
}

impl SnapshotKey {
    fn slot(self) -> usize {
        match self {
            SnapshotKey::S => 0,
            SnapshotKey::K => 1,
            SnapshotKey::G => 2,
        }
    }
}

/// Distribution phase of the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Only fixed courses are placed, no students are assigned
    Cleared,
    /// All courses are placed, no students are assigned
    LaneDistributed,
    /// All courses are placed and the students have been distributed
    FullyDistributed,
}

/// Order of the subject groups for the lane filling strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupOrder {
    Random,
    /// Groups with the most restricted courses first
    Degree,
}

/// Strategy for placing courses into lanes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneStrategy {
    /// Courses in random order, each into random legal lanes
    Random,
    /// Courses with the most blocked lanes and forbidden partners first, each into the legal lanes with the lowest
    /// penalty
    ByDegree,
    /// Fill one lane after another with at most one course per subject group
    LaneFilling(GroupOrder),
}

impl LaneStrategy {
    pub const ALL: [LaneStrategy; 4] = [
        LaneStrategy::Random,
        LaneStrategy::ByDegree,
        LaneStrategy::LaneFilling(GroupOrder::Random),
        LaneStrategy::LaneFilling(GroupOrder::Degree),
    ];
}

/// Strategy for assigning students to courses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StudentStrategy {
    /// Random legal course for each selection
    Random,
    /// Maximum cardinality matching of subject groups to lanes
    Matching,
    /// Maximum cardinality matching, preferring the smallest courses
    WeightedMatching,
}

/// A saved copy of the engine's mutable state
#[derive(Clone, Debug)]
struct Snapshot {
    phase: Phase,
    lanes_used: usize,
    max_crowding: usize,
    courses: Vec<Vec<LaneIndex>>,
    students: Vec<Vec<Option<CourseIndex>>>,
    rating: Rating,
}

/// The blocking engine. See module documentation.
pub struct Engine {
    rng: StdRng,
    /// Number of requested lanes
    lane_count: usize,
    /// Requested lanes, followed by the lanes opened by the lane strategies
    lanes: Vec<Lane>,
    courses: Vec<Course>,
    groups: Vec<SubjectGroup>,
    students: Vec<Student>,
    /// Current number of students in each course
    course_sizes: Vec<usize>,
    statistics: Statistics,
    phase: Phase,
    snapshots: [Snapshot; 3],
}

impl Engine {
    /// Build the engine from the input data, using a random generator seeded with `seed`.
    ///
    /// # Errors
    ///
    /// See [`Engine::with_rng`].
    pub fn new(input: &BlockingInput, seed: u64) -> Result<Engine, BlockingError> {
        Engine::with_rng(input, StdRng::seed_from_u64(seed))
    }

    /// Build the engine from the input data, using the given random generator for all random decisions.
    ///
    /// All rules are validated and applied. Afterwards, only the fixed courses are placed and all three snapshots
    /// contain this initial state.
    ///
    /// # Errors
    ///
    /// * `Integrity`, if the input is malformed: no lanes, no courses or no selections, duplicated ids, invalid lane
    ///   counts of courses, malformed rules or rules referring to unknown courses or students
    /// * `Conflict`, if the input contradicts itself: a student choosing the same subject group twice, a course which
    ///   cannot be placed because too many lanes are locked, a course fixed in a locked lane, two forbidden courses
    ///   fixed in the same lane, or contradicting student rules
    pub fn with_rng(input: &BlockingInput, mut rng: StdRng) -> Result<Engine, BlockingError> {
        let lane_count = input.lane_count;
        check_input(input)?;
        let rules = parse_rules(&input.rules, lane_count)?;
        for course_type in unused_course_types(&rules, &input.courses) {
            warn!(
                "No course has course type {}, which is referred to by a lane rule.",
                course_type
            );
        }

        let course_index: HashMap<CourseId, CourseIndex> =
            input.courses.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        let student_index: HashMap<StudentId, StudentIndex> =
            input.students.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        for rule in rules.iter() {
            for course in rule.courses() {
                if !course_index.contains_key(&course) {
                    return Err(BlockingError::integrity(format!(
                        "Rule {} refers to unknown course {}.",
                        rule, course
                    )));
                }
            }
            if let Some(student) = rule.student() {
                if !student_index.contains_key(&student) {
                    return Err(BlockingError::integrity(format!(
                        "Rule {} refers to unknown student {}.",
                        rule, student
                    )));
                }
            }
        }

        let mut groups = build_groups(input)?;
        let group_index: HashMap<(SubjectId, CourseTypeId), GroupIndex> = groups
            .iter()
            .map(|g| ((g.subject(), g.course_type()), g.index()))
            .collect();

        let mut students = Vec::with_capacity(input.students.len());
        for (index, s) in input.students.iter().enumerate() {
            let mut desired = Vec::with_capacity(s.selections.len());
            for selection in s.selections.iter() {
                let group = group_index[&(selection.subject, selection.course_type)];
                if desired.contains(&group) {
                    return Err(BlockingError::conflict(format!(
                        "Student {} chose subject {} with course type {} more than once.",
                        s.id, selection.subject, selection.course_type
                    )));
                }
                desired.push(group);
            }
            students.push(Student::new(index, s.id, desired, input.courses.len()));
        }

        let mut statistics = Statistics::new(&groups, &students, input.courses.len());

        let mut courses = Vec::with_capacity(input.courses.len());
        for (index, c) in input.courses.iter().enumerate() {
            let group = group_index[&(c.subject, c.course_type)];
            let course = build_course(index, group, c, lane_count, &rules, &mut rng)?;
            groups[group].add_course(index, course.required_lanes());
            courses.push(course);
        }

        for rule in rules.iter() {
            match rule {
                Rule::ForceStudentInCourse { student, course } => {
                    let s = student_index[student];
                    let k = course_index[course];
                    let group = courses[k].group;
                    if !students[s].groups().contains(&group) {
                        return Err(BlockingError::conflict(format!(
                            "Student {} is fixed in course {}, but did not choose its subject.",
                            student, course
                        )));
                    }
                    students[s].force_course(k);
                    for other in groups[group].courses() {
                        if *other != k {
                            students[s].forbid_course(*other);
                        }
                    }
                }
                Rule::ForbidStudentInCourse { student, course } => {
                    students[student_index[student]].forbid_course(course_index[course]);
                }
                Rule::ForbidCourseWithCourse(a, b) => {
                    statistics.record_forbidden_course_pair(course_index[a], course_index[b]);
                }
                Rule::GroupCourseWithCourse(a, b) => {
                    statistics.record_grouped_course_pair(course_index[a], course_index[b]);
                }
                Rule::FillCourseWithPlaceholders { course } => {
                    warn!(
                        "Rule {} is not supported and will be ignored for course {}.",
                        rule, course
                    );
                }
                Rule::RespectTeachers => {
                    for a in 0..courses.len() {
                        for b in (a + 1)..courses.len() {
                            for teacher in courses[a].teachers.iter() {
                                if courses[b].teachers.contains(teacher) {
                                    statistics.record_forbidden_course_pair(a, b);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        for student in students.iter() {
            if let Some(k) = student.forced_courses().iter().find(|k| student.is_forbidden(**k)) {
                return Err(BlockingError::conflict(format!(
                    "Student {} is fixed in course {}, but also forbidden in it.",
                    student.id(),
                    courses[*k].id
                )));
            }
            // Courses forced on the same student may not share a lane
            let forced = student.forced_courses();
            for (i, a) in forced.iter().enumerate() {
                for b in &forced[i + 1..] {
                    if !statistics.is_forbidden_pair(*a, *b) {
                        statistics.record_forbidden_course_pair((*a).min(*b), (*a).max(*b));
                    }
                }
            }
        }

        for &(a, b) in statistics.forbidden_pairs() {
            if let Some(lane) = courses[a]
                .fixed_lanes()
                .iter()
                .find(|l| courses[b].fixed_lanes().contains(l))
            {
                return Err(BlockingError::conflict(format!(
                    "Courses {} and {} may not share a lane, but are both fixed in lane {}.",
                    courses[a].id,
                    courses[b].id,
                    lane + 1
                )));
            }
        }

        debug!(
            "Built blocking with {} lanes, {} courses, {} subject groups, {} students and {} rules.",
            lane_count,
            courses.len(),
            groups.len(),
            students.len(),
            rules.len()
        );

        let course_sizes = vec![0; courses.len()];
        let initial = Snapshot {
            phase: Phase::Cleared,
            lanes_used: 0,
            max_crowding: 0,
            courses: Vec::new(),
            students: Vec::new(),
            rating: Rating::default(),
        };
        let mut engine = Engine {
            rng,
            lane_count,
            lanes: Vec::new(),
            courses,
            groups,
            students,
            course_sizes,
            statistics,
            phase: Phase::Cleared,
            snapshots: [initial.clone(), initial.clone(), initial],
        };
        engine.rebuild_lanes();
        engine.save_state(SnapshotKey::S);
        engine.save_state(SnapshotKey::K);
        engine.save_state(SnapshotKey::G);
        Ok(engine)
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Number of lanes occupied by courses: the highest occupied lane index + 1
    pub fn lanes_used(&self) -> usize {
        self.lanes
            .iter()
            .rposition(|l| l.crowding() > 0)
            .map_or(0, |l| l + 1)
    }

    /// Number of courses in each used lane
    pub fn lane_load(&self) -> Vec<usize> {
        self.lanes[..self.lanes_used()]
            .iter()
            .map(|l| l.crowding())
            .collect()
    }

    fn max_crowding(&self) -> usize {
        self.lanes.iter().map(|l| l.crowding()).max().unwrap_or(0)
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn groups(&self) -> &[SubjectGroup] {
        &self.groups
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    /// Number of courses, whose placement may be changed at all
    pub fn free_course_count(&self) -> usize {
        self.courses.iter().filter(|c| c.has_degrees_of_freedom()).count()
    }

    /// Current number of students in the course
    pub fn course_size(&self, course: CourseIndex) -> usize {
        self.course_sizes[course]
    }

    pub fn course_by_id(&self, id: CourseId) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn student_by_id(&self, id: StudentId) -> Option<&Student> {
        self.students.iter().find(|s| s.id() == id)
    }

    /// Rating of the current state
    pub fn rating(&self) -> Rating {
        self.statistics.rate(
            &self.lanes,
            &self.courses,
            &self.groups,
            &self.students,
            &self.course_sizes,
        )
    }

    // ---------------------------------------------------------------------------------------------------------------
    // Lane distribution

    /// Remove all students and all non-fixed courses from their lanes
    pub fn clear(&mut self) {
        self.clear_students();
        for course in self.courses.iter_mut() {
            course.clear();
        }
        self.rebuild_lanes();
        self.phase = Phase::Cleared;
    }

    /// Recreate the lanes' course lists from the courses' placement
    fn rebuild_lanes(&mut self) {
        let needed = self
            .courses
            .iter()
            .flat_map(|c| c.lanes().iter().map(|l| l + 1))
            .max()
            .unwrap_or(0)
            .max(self.lane_count);
        self.lanes.truncate(needed);
        for lane in self.lanes.iter_mut() {
            lane.clear();
        }
        while self.lanes.len() < needed {
            self.lanes.push(Lane::new(self.lanes.len()));
        }
        for course in self.courses.iter() {
            for lane in course.lanes() {
                self.lanes[*lane].add_course(course.index);
            }
        }
    }

    /// Checks whether the course may be placed into the lane: the lane must not be locked for the course and there
    /// must not be a forbidden partner of the course in the lane.
    pub fn can_place(&self, course: CourseIndex, lane: LaneIndex) -> bool {
        lane < self.lanes.len()
            && self.courses[course].accepts_lane(lane)
            && self.lanes[lane]
                .courses()
                .iter()
                .all(|other| !self.statistics.is_forbidden_pair(course, *other))
    }

    fn place(&mut self, course: CourseIndex, lane: LaneIndex) -> bool {
        if !self.can_place(course, lane) {
            return false;
        }
        let placed = self.courses[course].place_into_lane(lane);
        if placed {
            self.lanes[lane].add_course(course);
        }
        placed
    }

    /// Penalty for adding the course to the lane, given the courses already in it
    fn lane_penalty(&self, course: CourseIndex, lane: LaneIndex) -> i64 {
        self.lanes[lane]
            .courses()
            .iter()
            .map(|other| {
                self.statistics
                    .pair_penalty(&self.courses[course], &self.courses[*other])
            })
            .sum()
    }

    /// Requested lanes the course could be placed into right now
    fn legal_free_lanes(&self, course: CourseIndex) -> Vec<LaneIndex> {
        self.courses[course]
            .free_lanes()
            .iter()
            .copied()
            .filter(|l| self.can_place(course, *l))
            .collect()
    }

    /// Number of restrictions of the course: requested lanes it may not use and courses it may not share a lane with
    fn course_degree(&self, course: CourseIndex) -> usize {
        self.lane_count - self.courses[course].allowed_lane_count()
            + self.statistics.forbidden_partner_count(course)
    }

    /// Place the remaining lanes of the course into the opened lanes (index >= lane count), reusing an opened lane
    /// if the course may be placed there and opening a new lane otherwise.
    fn place_into_opened_lanes(&mut self, course: CourseIndex) -> Result<(), BlockingError> {
        while !self.courses[course].is_placed() {
            if let Some(lane) = (self.lane_count..self.lanes.len()).find(|l| self.can_place(course, *l)) {
                self.place(course, lane);
                continue;
            }
            let lane = self.lanes.len();
            self.lanes.push(Lane::new(lane));
            debug!(
                "Opened lane {} for course {}, since no other lane is left.",
                lane + 1,
                self.courses[course].id
            );
            if self.courses[course].lanes().is_empty() {
                self.courses[course].place_into_new_lane(lane)?;
            } else if !self.courses[course].place_into_lane(lane) {
                return Err(BlockingError::integrity(format!(
                    "Course {} could not be placed into the new lane {}.",
                    self.courses[course].id,
                    lane + 1
                )));
            }
            self.lanes[lane].add_course(course);
        }
        Ok(())
    }

    /// Place the course into its legal lanes with the lowest penalty (then lowest crowding). Lanes, which cannot be
    /// filled this way, are placed into opened lanes.
    fn place_greedily(&mut self, course: CourseIndex) -> Result<(), BlockingError> {
        while !self.courses[course].is_placed() {
            let best = self
                .legal_free_lanes(course)
                .into_iter()
                .min_by_key(|l| (self.lane_penalty(course, *l), self.lanes[*l].crowding()));
            match best {
                Some(lane) => {
                    self.place(course, lane);
                }
                None => break,
            }
        }
        self.place_into_opened_lanes(course)
    }

    /// Place the course into random legal lanes. Lanes, which cannot be filled this way, are placed into opened
    /// lanes.
    fn place_randomly(&mut self, course: CourseIndex) -> Result<(), BlockingError> {
        while !self.courses[course].is_placed() {
            let legal = self.legal_free_lanes(course);
            if legal.is_empty() {
                break;
            }
            let lane = legal[self.rng.random_range(0..legal.len())];
            self.place(course, lane);
        }
        self.place_into_opened_lanes(course)
    }

    fn finish_lane_distribution(&mut self, strategy: LaneStrategy) {
        self.phase = Phase::LaneDistributed;
        debug!(
            "Lane distribution {:?} uses {} lanes (maximum crowding {}).",
            strategy,
            self.lanes_used(),
            self.max_crowding()
        );
    }

    /// Clear the engine and place all courses with the given strategy. Afterwards, every course occupies exactly its
    /// required number of lanes. If that is not possible within the requested lanes, additional lanes are opened.
    pub fn distribute_courses(&mut self, strategy: LaneStrategy) -> Result<(), BlockingError> {
        match strategy {
            LaneStrategy::Random => self.distribute_courses_randomly(),
            LaneStrategy::ByDegree => self.distribute_courses_by_degree(),
            LaneStrategy::LaneFilling(order) => self.distribute_courses_lane_filling(order),
        }
    }

    /// Place the courses in random order into random legal lanes
    pub fn distribute_courses_randomly(&mut self) -> Result<(), BlockingError> {
        self.clear();
        let mut order: Vec<CourseIndex> = (0..self.courses.len()).collect();
        order.shuffle(&mut self.rng);
        for course in order {
            self.place_randomly(course)?;
        }
        self.finish_lane_distribution(LaneStrategy::Random);
        Ok(())
    }

    /// Place the courses with the highest degree (blocked lanes + forbidden partners) first, each into its legal
    /// lanes with the lowest penalty. Courses with an equal degree are placed in random order.
    pub fn distribute_courses_by_degree(&mut self) -> Result<(), BlockingError> {
        self.clear();
        let mut order: Vec<CourseIndex> = (0..self.courses.len()).collect();
        order.shuffle(&mut self.rng);
        order.sort_by_key(|c| std::cmp::Reverse(self.course_degree(*c)));
        for course in order {
            self.place_greedily(course)?;
        }
        self.finish_lane_distribution(LaneStrategy::ByDegree);
        Ok(())
    }

    /// Fill the requested lanes one after another. Each lane receives at most one course of every subject group and
    /// no more than its fair share of all course lanes. Courses left over are placed greedily afterwards.
    pub fn distribute_courses_lane_filling(&mut self, order: GroupOrder) -> Result<(), BlockingError> {
        self.clear();
        let mut group_order: Vec<GroupIndex> = (0..self.groups.len()).collect();
        group_order.shuffle(&mut self.rng);
        if order == GroupOrder::Degree {
            group_order.sort_by_key(|g| {
                std::cmp::Reverse(
                    self.groups[*g]
                        .courses()
                        .iter()
                        .map(|c| self.course_degree(*c))
                        .sum::<usize>(),
                )
            });
        }
        let mut course_order = Vec::with_capacity(self.courses.len());
        for g in group_order {
            let mut courses = self.groups[g].courses().to_vec();
            courses.shuffle(&mut self.rng);
            course_order.extend(courses);
        }

        let slots: usize = self.courses.iter().map(|c| c.required_lanes()).sum();
        let capacity = (slots + self.lane_count - 1) / self.lane_count;
        for lane in 0..self.lane_count {
            for course in course_order.iter().copied() {
                if self.lanes[lane].crowding() >= capacity {
                    break;
                }
                let group = self.courses[course].group;
                let group_in_lane = self.lanes[lane]
                    .courses()
                    .iter()
                    .any(|c| self.courses[*c].group == group);
                if !group_in_lane {
                    self.place(course, lane);
                }
            }
        }
        for course in course_order {
            self.place_greedily(course)?;
        }
        self.finish_lane_distribution(LaneStrategy::LaneFilling(order));
        Ok(())
    }

    /// Move one non-fixed lane of the course to another random legal lane. Students are removed from their courses,
    /// as their assignment may have become invalid. Returns true, if the course has been moved.
    fn relocate_course(&mut self, course: CourseIndex) -> bool {
        let movable: Vec<LaneIndex> = self.courses[course]
            .lanes()
            .iter()
            .copied()
            .filter(|l| !self.courses[course].fixed_lanes().contains(l))
            .collect();
        if movable.is_empty() {
            return false;
        }
        let from = movable[self.rng.random_range(0..movable.len())];
        self.courses[course].remove_from_lane(from);
        self.lanes[from].remove_course(course);
        let targets: Vec<LaneIndex> = self
            .legal_free_lanes(course)
            .into_iter()
            .filter(|l| *l != from)
            .collect();
        let to = if targets.is_empty() {
            from
        } else {
            targets[self.rng.random_range(0..targets.len())]
        };
        let placed = self.courses[course].place_into_lane(to);
        debug_assert!(placed);
        self.lanes[to].add_course(course);
        to != from
    }

    fn check_lanes_distributed(&self, action: &str) -> Result<(), BlockingError> {
        if self.phase == Phase::Cleared {
            return Err(BlockingError::integrity(format!(
                "Courses must be distributed before {}.",
                action
            )));
        }
        Ok(())
    }

    /// Move one lane of a random course with degrees of freedom to another legal lane. All students are removed
    /// from their courses. Returns false, if no course could be moved.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the courses have not been distributed yet.
    pub fn relocate_random_course(&mut self) -> Result<bool, BlockingError> {
        self.check_lanes_distributed("relocating a course")?;
        self.clear_students();
        let candidates: Vec<CourseIndex> = self
            .courses
            .iter()
            .filter(|c| c.has_degrees_of_freedom())
            .map(|c| c.index)
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        let course = candidates[self.rng.random_range(0..candidates.len())];
        Ok(self.relocate_course(course))
    }

    /// Apply the move of `relocate_random_course()` to all single-lane courses with degrees of freedom, in random
    /// order. Returns the number of moved courses.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the courses have not been distributed yet.
    pub fn relocate_single_lane_courses(&mut self) -> Result<usize, BlockingError> {
        self.check_lanes_distributed("relocating courses")?;
        self.clear_students();
        let mut candidates: Vec<CourseIndex> = self
            .courses
            .iter()
            .filter(|c| c.required_lanes() == 1 && c.has_degrees_of_freedom())
            .map(|c| c.index)
            .collect();
        candidates.shuffle(&mut self.rng);
        Ok(candidates
            .into_iter()
            .filter(|c| self.relocate_course(*c))
            .count())
    }

    /// Place every course with degrees of freedom anew into random legal lanes, one course after another in random
    /// order. Fixed lanes are kept. All students are removed from their courses.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the courses have not been distributed yet.
    pub fn relocate_free_courses(&mut self) -> Result<(), BlockingError> {
        self.check_lanes_distributed("relocating courses")?;
        self.clear_students();
        let mut candidates: Vec<CourseIndex> = self
            .courses
            .iter()
            .filter(|c| c.has_degrees_of_freedom())
            .map(|c| c.index)
            .collect();
        candidates.shuffle(&mut self.rng);
        for course in candidates {
            for lane in self.courses[course].lanes().to_vec() {
                if !self.courses[course].fixed_lanes().contains(&lane) {
                    self.lanes[lane].remove_course(course);
                }
            }
            self.courses[course].clear();
            self.place_randomly(course)?;
        }
        debug!(
            "Relocated all free courses, now using {} lanes.",
            self.lanes_used()
        );
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------------------------
    // Student distribution

    /// Remove all students from their courses
    pub fn clear_students(&mut self) {
        for student in self.students.iter_mut() {
            student.clear_all_assignments(&mut self.course_sizes);
        }
        if self.phase == Phase::FullyDistributed {
            self.phase = Phase::LaneDistributed;
        }
    }

    /// Assign all students to courses with the given strategy, visiting the students in random order.
    ///
    /// Each student is assigned to their forced courses first, then to the courses of subject groups spanning
    /// multiple lanes (randomly). The remaining selections are handled by the strategy. Selections, which cannot be
    /// fulfilled, stay unmet.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the courses have not been distributed yet.
    pub fn distribute_students(&mut self, strategy: StudentStrategy) -> Result<(), BlockingError> {
        self.check_lanes_distributed("distributing students")?;
        self.clear_students();
        let mut order: Vec<StudentIndex> = (0..self.students.len()).collect();
        order.shuffle(&mut self.rng);
        for s in order {
            self.distribute_student(s, strategy)?;
        }

        self.phase = Phase::FullyDistributed;
        debug!(
            "Student distribution {:?} left {} selections unmet.",
            strategy,
            self.students.iter().map(|s| s.unmet_count()).sum::<usize>()
        );
        Ok(())
    }

    /// Assign one (unassigned) student: forced courses first, then multi-lane subject groups, then the rest with the
    /// given strategy.
    fn distribute_student(&mut self, s: StudentIndex, strategy: StudentStrategy) -> Result<(), BlockingError> {
        let Engine {
            rng,
            lanes,
            courses,
            groups,
            students,
            course_sizes,
            ..
        } = self;
        let mut ctx = StudentContext {
            courses: courses.as_slice(),
            groups: groups.as_slice(),
            course_sizes: course_sizes.as_mut_slice(),
            lanes_used: lanes.len(),
        };
        let student = &mut students[s];
        student.distribute_forced_courses(&mut ctx)?;
        student.distribute_multi_lane_groups_randomly(&mut ctx, rng)?;
        match strategy {
            StudentStrategy::Random => student.distribute_remaining_randomly(&mut ctx, rng)?,
            StudentStrategy::Matching => {
                student.distribute_single_course_groups(&mut ctx)?;
                student.distribute_remaining_via_matching(&mut ctx, rng, false)?;
            }
            StudentStrategy::WeightedMatching => {
                student.distribute_single_course_groups(&mut ctx)?;
                student.distribute_remaining_via_matching(&mut ctx, rng, true)?;
            }
        }
        Ok(())
    }

    /// Distribute the students like `distribute_students(StudentStrategy::Matching)`, but change the course placement
    /// in favor of each student: whenever a selection of the student stays unmet, a single-lane course of that
    /// subject group is moved into a lane the student has not occupied yet, so the student can join it.
    ///
    /// A course is only moved to a requested lane, which is not locked for it, holds no forbidden partner and is
    /// free for all students already in the course. Thus, no assignment becomes invalid, and every move fulfils one
    /// more selection. Returns true, if any course has been moved.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the courses have not been distributed yet.
    pub fn distribute_courses_by_student_wish(&mut self) -> Result<bool, BlockingError> {
        self.check_lanes_distributed("moving courses by student wish")?;
        self.clear_students();
        let mut order: Vec<StudentIndex> = (0..self.students.len()).collect();
        order.shuffle(&mut self.rng);

        let mut moved = false;
        for s in order {
            self.distribute_student(s, StudentStrategy::Matching)?;
            let open: Vec<GroupIndex> = self.students[s]
                .groups()
                .iter()
                .zip(self.students[s].assignments())
                .filter(|(_, assigned)| assigned.is_none())
                .map(|(group, _)| *group)
                .collect();
            for group in open {
                let mut candidates = self.groups[group].courses().to_vec();
                candidates.shuffle(&mut self.rng);
                let wish = candidates.into_iter().find_map(|c| self.find_wish_lane(s, c).map(|l| (c, l)));
                if let Some((course, to)) = wish {
                    let from = self.courses[course].lanes()[0];
                    self.move_course(course, from, to);
                    debug!(
                        "Moved course {} from lane {} to lane {} for student {}.",
                        self.courses[course].id,
                        from + 1,
                        to + 1,
                        self.students[s].id()
                    );
                    let mut ctx = StudentContext {
                        courses: &self.courses,
                        groups: &self.groups,
                        course_sizes: &mut self.course_sizes,
                        lanes_used: self.lanes.len(),
                    };
                    self.students[s].assign_to_course(group, course, &mut ctx)?;
                    moved = true;
                }
            }
        }

        self.phase = Phase::FullyDistributed;
        Ok(moved)
    }

    /// A lane, the single-lane course could be moved to, so that the student can join it without invalidating any
    /// other assignment
    fn find_wish_lane(&self, s: StudentIndex, course: CourseIndex) -> Option<LaneIndex> {
        let student = &self.students[s];
        let c = &self.courses[course];
        if c.required_lanes() != 1 || !c.fixed_lanes().is_empty() || !c.is_placed() || student.is_forbidden(course) {
            return None;
        }
        let occupied = student.occupied_lanes(&self.courses);
        let members: Vec<&Student> = self
            .students
            .iter()
            .filter(|t| t.assignments().contains(&Some(course)))
            .collect();
        c.free_lanes().iter().copied().find(|lane| {
            !occupied.contains(lane)
                && self.lanes[*lane]
                    .courses()
                    .iter()
                    .all(|other| !self.statistics.is_forbidden_pair(course, *other))
                && members
                    .iter()
                    .all(|t| !t.occupied_lanes(&self.courses).contains(lane))
        })
    }

    /// Move a non-fixed lane of the course to another lane, which must be one of its free lanes
    fn move_course(&mut self, course: CourseIndex, from: LaneIndex, to: LaneIndex) {
        self.courses[course].remove_from_lane(from);
        self.lanes[from].remove_course(course);
        let placed = self.courses[course].place_into_lane(to);
        debug_assert!(placed);
        self.lanes[to].add_course(course);
    }

    /// Assign a single student to a course of one of their chosen subject groups.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the student or course is unknown, the student did not choose the course's
    /// subject group, is already assigned within that group or the course cannot be joined by the student.
    pub fn assign_student(&mut self, student: StudentId, course: CourseId) -> Result<(), BlockingError> {
        self.check_lanes_distributed("assigning students")?;
        let s = self
            .students
            .iter()
            .position(|s| s.id() == student)
            .ok_or_else(|| BlockingError::integrity(format!("Unknown student {}.", student)))?;
        let k = self
            .courses
            .iter()
            .position(|c| c.id == course)
            .ok_or_else(|| BlockingError::integrity(format!("Unknown course {}.", course)))?;
        if !self.courses[k].is_placed() || !self.students[s].can_join(k, &self.courses) {
            return Err(BlockingError::integrity(format!(
                "Student {} cannot join course {}.",
                student, course
            )));
        }
        let group = self.courses[k].group;
        let mut ctx = StudentContext {
            courses: &self.courses,
            groups: &self.groups,
            course_sizes: &mut self.course_sizes,
            lanes_used: self.lanes.len(),
        };
        self.students[s].assign_to_course(group, k, &mut ctx)
    }

    // ---------------------------------------------------------------------------------------------------------------
    // Snapshots

    /// Save the current state under the given key
    pub fn save_state(&mut self, key: SnapshotKey) {
        self.snapshots[key.slot()] = Snapshot {
            phase: self.phase,
            lanes_used: self.lanes_used(),
            max_crowding: self.max_crowding(),
            courses: self.courses.iter().map(|c| c.snapshot()).collect(),
            students: self.students.iter().map(|s| s.snapshot()).collect(),
            rating: self.rating(),
        };
    }

    fn restore_courses(&mut self, key: SnapshotKey) {
        let snapshot = &self.snapshots[key.slot()];
        for (course, placed) in self.courses.iter_mut().zip(snapshot.courses.iter()) {
            course.restore(placed);
        }
        self.rebuild_lanes();
    }

    /// Restore the state saved under the given key. The students are removed first, then the course placement and
    /// finally the student assignments are restored.
    pub fn load_state(&mut self, key: SnapshotKey) {
        self.clear_students();
        self.restore_courses(key);
        let snapshot = &self.snapshots[key.slot()];
        for (student, assigned) in self.students.iter_mut().zip(snapshot.students.iter()) {
            student.restore(assigned);
        }
        self.phase = snapshot.phase;
        self.recount_course_sizes();
    }

    /// Restore only the course placement saved under the given key. All students are removed from their courses.
    pub fn load_state_course_only(&mut self, key: SnapshotKey) {
        self.clear_students();
        self.restore_courses(key);
        self.phase = match self.snapshots[key.slot()].phase {
            Phase::Cleared => Phase::Cleared,
            _ => Phase::LaneDistributed,
        };
    }

    fn recount_course_sizes(&mut self) {
        self.course_sizes.iter_mut().for_each(|s| *s = 0);
        for student in self.students.iter() {
            for course in student.assignments().iter().flatten() {
                self.course_sizes[*course] += 1;
            }
        }
    }

    /// Rating of the state saved under the given key
    pub fn saved_rating(&self, key: SnapshotKey) -> &Rating {
        &self.snapshots[key.slot()].rating
    }

    /// Compare the current rating with the rating saved under the given key
    pub fn compare_with(&self, key: SnapshotKey, priority: Priority) -> Comparison {
        self.rating().compare(self.saved_rating(key), priority)
    }

    /// Compare the current student distribution (unmet selections and course differences) with snapshot S
    pub fn compare_s(&self) -> Comparison {
        self.compare_with(SnapshotKey::S, Priority::StudentsOnly)
    }

    /// Checks whether the current lane distribution is better than the one saved under the given key: fewer lanes
    /// used, or an equal number of lanes with a lower maximum crowding.
    pub fn is_lane_distribution_better(&self, key: SnapshotKey) -> bool {
        let saved = &self.snapshots[key.slot()];
        statistics::is_lane_distribution_better(
            (self.lanes_used(), self.max_crowding()),
            (saved.lanes_used, saved.max_crowding),
        )
    }

    // ---------------------------------------------------------------------------------------------------------------
    // Export

    /// Export the current state. Every selection is either listed in its course or counted as unmet, never both.
    /// Students, who are fixed in a course by a rule but could not be assigned to it, are only reported with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the students have not been distributed.
    pub fn export_result(&self) -> Result<BlockingResult, BlockingError> {
        if self.phase != Phase::FullyDistributed {
            return Err(BlockingError::integrity(
                "Students must be distributed before exporting the result.",
            ));
        }
        let lanes: Vec<Vec<CourseId>> = self.lanes[..self.lanes_used()]
            .iter()
            .map(|l| {
                let mut ids: Vec<CourseId> = l.courses().iter().map(|c| self.courses[*c].id).collect();
                ids.sort_unstable();
                ids
            })
            .collect();

        let mut courses: BTreeMap<CourseId, Vec<StudentId>> =
            self.courses.iter().map(|c| (c.id, Vec::new())).collect();
        let mut assigned = HashSet::new();
        for student in self.students.iter() {
            for course in student.assignments().iter().flatten() {
                assigned.insert((student.index(), *course));
                if let Some(list) = courses.get_mut(&self.courses[*course].id) {
                    list.push(student.id());
                }
            }
        }
        for student in self.students.iter() {
            for course in student.forced_courses() {
                if !assigned.contains(&(student.index(), *course)) {
                    warn!(
                        "Student {} is fixed in course {}, but could not be assigned.",
                        student.id(),
                        self.courses[*course].id
                    );
                }
            }
        }

        Ok(BlockingResult {
            lanes,
            courses,
            unmet_selections: self.students.iter().map(|s| s.unmet_count()).sum(),
        })
    }
}

/// Course types of the lane rules (types 1 and 6), which no course has
fn unused_course_types(rules: &[Rule], courses: &[CourseInput]) -> Vec<CourseTypeId> {
    rules
        .iter()
        .filter_map(|rule| match *rule {
            Rule::CourseTypeLockLanes { course_type, .. } | Rule::CourseTypeExclusiveLanes { course_type, .. } => {
                Some(course_type)
            }
            _ => None,
        })
        .filter(|t| !courses.iter().any(|c| c.course_type == *t))
        .collect()
}

/// Check the input for malformed data, which is not covered by the rules
fn check_input(input: &BlockingInput) -> Result<(), BlockingError> {
    if input.lane_count == 0 {
        return Err(BlockingError::integrity("The number of lanes must be positive."));
    }
    if input.courses.is_empty() {
        return Err(BlockingError::integrity("There are no courses."));
    }
    if input.students.iter().all(|s| s.selections.is_empty()) {
        return Err(BlockingError::integrity("There are no selections."));
    }
    let mut course_ids = HashSet::new();
    for course in input.courses.iter() {
        if !course_ids.insert(course.id) {
            return Err(BlockingError::integrity(format!(
                "Course {} exists more than once.",
                course.id
            )));
        }
        if course.lanes == 0 || course.lanes > input.lane_count {
            return Err(BlockingError::integrity(format!(
                "Course {} requires {} lanes, but there are only {} lanes.",
                course.id, course.lanes, input.lane_count
            )));
        }
    }
    let mut student_ids = HashSet::new();
    for student in input.students.iter() {
        if !student_ids.insert(student.id) {
            return Err(BlockingError::integrity(format!(
                "Student {} exists more than once.",
                student.id
            )));
        }
    }
    Ok(())
}

fn parse_rules(raw: &[RawRule], lane_count: usize) -> Result<Vec<Rule>, BlockingError> {
    let mut ids = HashSet::new();
    let mut rules = Vec::with_capacity(raw.len());
    for r in raw {
        if !ids.insert(r.id) {
            return Err(BlockingError::integrity(format!("Rule {} exists more than once.", r.id)));
        }
        let rule = Rule::parse(r, lane_count)?;
        debug!("Applying rule {}.", rule);
        rules.push(rule);
    }
    Ok(rules)
}

/// Create the subject groups from the courses and the students' selections, in the order of their first appearance
fn build_groups(input: &BlockingInput) -> Result<Vec<SubjectGroup>, BlockingError> {
    let mut groups: Vec<SubjectGroup> = Vec::new();
    let mut index: HashMap<(SubjectId, CourseTypeId), GroupIndex> = HashMap::new();
    let mut get_or_create = |subject: SubjectId, course_type: CourseTypeId, groups: &mut Vec<SubjectGroup>| {
        *index.entry((subject, course_type)).or_insert_with(|| {
            groups.push(SubjectGroup::new(groups.len(), subject, course_type));
            groups.len() - 1
        })
    };
    for course in input.courses.iter() {
        let g = get_or_create(course.subject, course.course_type, &mut groups);
        groups[g].increment_courses();
    }
    for student in input.students.iter() {
        for selection in student.selections.iter() {
            let g = get_or_create(selection.subject, selection.course_type, &mut groups);
            groups[g].increment_students();
        }
    }
    let counted: usize = groups.iter().map(|g| g.course_count()).sum();
    if counted != input.courses.len() {
        return Err(BlockingError::integrity(format!(
            "Subject groups contain {} courses instead of {}.",
            counted,
            input.courses.len()
        )));
    }
    Ok(groups)
}

/// Create a course and determine its fixed and candidate lanes from the lane rules (types 1, 2, 3 and 6)
fn build_course(
    index: CourseIndex,
    group: GroupIndex,
    input: &CourseInput,
    lane_count: usize,
    rules: &[Rule],
    rng: &mut StdRng,
) -> Result<Course, BlockingError> {
    let mut candidates: Vec<LaneIndex> = (0..lane_count).collect();
    candidates.shuffle(rng);

    for rule in rules {
        match *rule {
            Rule::CourseTypeLockLanes { course_type, from, to } if course_type == input.course_type => {
                candidates.retain(|l| *l < from || *l > to);
            }
            Rule::CourseTypeExclusiveLanes { course_type, from, to } => {
                let own_type = course_type == input.course_type;
                candidates.retain(|l| (from..=to).contains(l) == own_type);
            }
            Rule::ForbidCourseInLane { course, lane } if course == input.id => {
                candidates.retain(|l| *l != lane);
            }
            _ => {}
        }
    }

    let mut fixed = Vec::new();
    for rule in rules {
        if let Rule::FixCourseInLane { course, lane } = *rule {
            if course != input.id {
                continue;
            }
            if fixed.contains(&lane) {
                debug!("Course {} is fixed in lane {} more than once.", course, lane + 1);
                continue;
            }
            if !candidates.contains(&lane) {
                return Err(BlockingError::conflict(format!(
                    "Course {} cannot be fixed in lane {}, since the lane is locked for it.",
                    course,
                    lane + 1
                )));
            }
            candidates.retain(|l| *l != lane);
            fixed.push(lane);
        }
    }

    if fixed.len() > input.lanes {
        return Err(BlockingError::integrity(format!(
            "Course {} is fixed in {} lanes, but only requires {} lanes.",
            input.id,
            fixed.len(),
            input.lanes
        )));
    }
    if fixed.len() + candidates.len() < input.lanes {
        return Err(BlockingError::conflict(format!(
            "Course {} requires {} lanes, but only {} lanes are not locked for it.",
            input.id,
            input.lanes,
            fixed.len() + candidates.len()
        )));
    }

    Ok(Course::new(
        index,
        input.id,
        group,
        input.course_type,
        input.teachers.clone(),
        input.lanes,
        lane_count,
        fixed,
        candidates,
    ))
}
