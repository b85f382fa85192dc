use super::course::Course;
use super::lane::LaneIndex;
use super::subject_group::SubjectGroup;
use super::{CourseIndex, GroupIndex, StudentIndex};
use crate::matching;
use crate::{BlockingError, StudentId};

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

/// Read access to the course placement and write access to the course sizes, which a student needs for choosing
/// courses. The engine lends this to one student at a time.
pub(super) struct StudentContext<'a> {
    pub courses: &'a [Course],
    pub groups: &'a [SubjectGroup],
    pub course_sizes: &'a mut [usize],
    pub lanes_used: usize,
}

/// A student, their chosen subject groups and their current course assignment
#[derive(Clone, Debug)]
pub struct Student {
    index: StudentIndex,
    id: StudentId,
    /// Chosen subject groups ("Fachwahlen") in selection order
    groups: Vec<GroupIndex>,
    /// Assigned course for each chosen subject group (same order as `groups`)
    assigned: Vec<Option<CourseIndex>>,
    /// Courses the student may not be assigned to (rule 5, and siblings of courses forced by rule 4)
    forbidden: Vec<bool>,
    /// Courses forced by rule 4
    forced: Vec<CourseIndex>,
}

impl Student {
    pub(super) fn new(index: StudentIndex, id: StudentId, groups: Vec<GroupIndex>, course_count: usize) -> Student {
        let assigned = vec![None; groups.len()];
        Student {
            index,
            id,
            groups,
            assigned,
            forbidden: vec![false; course_count],
            forced: Vec::new(),
        }
    }

    pub fn index(&self) -> StudentIndex {
        self.index
    }

    pub fn id(&self) -> StudentId {
        self.id
    }

    pub fn groups(&self) -> &[GroupIndex] {
        &self.groups
    }

    /// Assigned course for each chosen subject group, in the order of `groups()`
    pub fn assignments(&self) -> &[Option<CourseIndex>] {
        &self.assigned
    }

    pub fn assigned_course(&self, group: GroupIndex) -> Option<CourseIndex> {
        self.groups
            .iter()
            .position(|g| *g == group)
            .and_then(|slot| self.assigned[slot])
    }

    pub fn forced_courses(&self) -> &[CourseIndex] {
        &self.forced
    }

    pub fn is_forbidden(&self, course: CourseIndex) -> bool {
        self.forbidden[course]
    }

    /// Number of chosen subject groups without an assigned course
    pub fn unmet_count(&self) -> usize {
        self.assigned.iter().filter(|a| a.is_none()).count()
    }

    pub(super) fn forbid_course(&mut self, course: CourseIndex) {
        self.forbidden[course] = true;
    }

    pub(super) fn force_course(&mut self, course: CourseIndex) {
        if !self.forced.contains(&course) {
            self.forced.push(course);
        }
    }

    /// All lanes occupied by the student's assigned courses
    pub fn occupied_lanes(&self, courses: &[Course]) -> Vec<LaneIndex> {
        self.assigned
            .iter()
            .flatten()
            .flat_map(|c| courses[*c].lanes().iter().copied())
            .collect()
    }

    /// Checks whether the student could currently join the course: it must not be forbidden and all of its lanes
    /// must not be occupied by another course of the student.
    pub fn can_join(&self, course: CourseIndex, courses: &[Course]) -> bool {
        if self.forbidden[course] {
            return false;
        }
        let occupied = self.occupied_lanes(courses);
        courses[course].lanes().iter().all(|l| !occupied.contains(l))
    }

    /// Assign the student to a course of one of their chosen subject groups.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the student did not choose the group, the course does not belong to the
    /// group or the student has already been assigned to a course of this group.
    pub(super) fn assign_to_course(
        &mut self,
        group: GroupIndex,
        course: CourseIndex,
        ctx: &mut StudentContext,
    ) -> Result<(), BlockingError> {
        let slot = self.groups.iter().position(|g| *g == group).ok_or_else(|| {
            BlockingError::integrity(format!(
                "Student {} did not choose subject group {}.",
                self.id, group
            ))
        })?;
        if ctx.courses[course].group != group {
            return Err(BlockingError::integrity(format!(
                "Course {} does not belong to subject group {}.",
                ctx.courses[course].id, group
            )));
        }
        if let Some(existing) = self.assigned[slot] {
            return Err(BlockingError::integrity(format!(
                "Student {} is already assigned to course {} in subject group {}.",
                self.id, ctx.courses[existing].id, group
            )));
        }
        self.assigned[slot] = Some(course);
        ctx.course_sizes[course] += 1;
        Ok(())
    }

    /// Remove the student from all of their courses
    pub(super) fn clear_all_assignments(&mut self, course_sizes: &mut [usize]) {
        for a in self.assigned.iter_mut() {
            if let Some(c) = a.take() {
                course_sizes[c] -= 1;
            }
        }
    }

    /// Unassigned slots (indexes into `groups`) for which `filter` holds for their group
    fn open_slots<F: Fn(&SubjectGroup) -> bool>(&self, groups: &[SubjectGroup], filter: F) -> Vec<usize> {
        (0..self.groups.len())
            .filter(|s| self.assigned[*s].is_none() && filter(&groups[self.groups[*s]]))
            .collect()
    }

    /// All placed courses of the group, the student could currently join
    fn joinable_courses(&self, group: GroupIndex, ctx: &StudentContext) -> Vec<CourseIndex> {
        ctx.groups[group]
            .courses()
            .iter()
            .copied()
            .filter(|c| ctx.courses[*c].is_placed() && self.can_join(*c, ctx.courses))
            .collect()
    }

    /// Assign the student randomly to one of the joinable courses of each open slot, visiting the slots in random
    /// order. Slots without any joinable course stay open.
    fn distribute_slots_randomly<R: Rng>(
        &mut self,
        mut slots: Vec<usize>,
        ctx: &mut StudentContext,
        rng: &mut R,
    ) -> Result<(), BlockingError> {
        slots.shuffle(rng);
        for slot in slots {
            let group = self.groups[slot];
            let candidates = self.joinable_courses(group, ctx);
            if candidates.is_empty() {
                continue;
            }
            let course = candidates[rng.random_range(0..candidates.len())];
            self.assign_to_course(group, course, ctx)?;
        }
        Ok(())
    }

    /// Assign the student to the courses they are fixed in (rule type 4), as far as the courses' lanes allow
    pub(super) fn distribute_forced_courses(&mut self, ctx: &mut StudentContext) -> Result<(), BlockingError> {
        for course in self.forced.clone() {
            let group = ctx.courses[course].group;
            if self.assigned_course(group).is_none()
                && ctx.courses[course].is_placed()
                && self.can_join(course, ctx.courses)
            {
                self.assign_to_course(group, course, ctx)?;
            }
        }
        Ok(())
    }

    /// Distribute the subject groups with courses spanning multiple lanes randomly among the joinable courses. These
    /// are handled first, as they occupy the most lanes and cannot be handled by the matching.
    pub(super) fn distribute_multi_lane_groups_randomly<R: Rng>(
        &mut self,
        ctx: &mut StudentContext,
        rng: &mut R,
    ) -> Result<(), BlockingError> {
        let slots = self.open_slots(ctx.groups, |g| g.is_multi_lane());
        self.distribute_slots_randomly(slots, ctx, rng)
    }

    /// Assign subject groups with exactly one course directly to that course, if possible.
    pub(super) fn distribute_single_course_groups(&mut self, ctx: &mut StudentContext) -> Result<(), BlockingError> {
        for slot in self.open_slots(ctx.groups, |g| g.courses().len() == 1) {
            let group = self.groups[slot];
            let course = ctx.groups[group].courses()[0];
            if ctx.courses[course].is_placed() && self.can_join(course, ctx.courses) {
                self.assign_to_course(group, course, ctx)?;
            }
        }
        Ok(())
    }

    /// Distribute all remaining subject groups randomly among their joinable courses
    pub(super) fn distribute_remaining_randomly<R: Rng>(
        &mut self,
        ctx: &mut StudentContext,
        rng: &mut R,
    ) -> Result<(), BlockingError> {
        let slots = self.open_slots(ctx.groups, |_| true);
        self.distribute_slots_randomly(slots, ctx, rng)
    }

    /// Distribute the remaining single-lane subject groups using a bipartite matching of groups (rows) and the lanes
    /// not yet occupied by the student (columns).
    ///
    /// A row and a column are connected, if the group has a joinable course in that lane. Without `weighted`, a
    /// maximum cardinality matching is used and one of the group's courses in the matched lane is chosen randomly.
    /// With `weighted`, the smallest course of the group in each lane is used as the edge and its current size as
    /// the edge weight, so among all matchings with the most assigned groups, the one filling the smallest courses
    /// is chosen.
    pub(super) fn distribute_remaining_via_matching<R: Rng>(
        &mut self,
        ctx: &mut StudentContext,
        rng: &mut R,
        weighted: bool,
    ) -> Result<(), BlockingError> {
        let slots = self.open_slots(ctx.groups, |g| !g.is_multi_lane());
        if slots.is_empty() {
            return Ok(());
        }
        let occupied = self.occupied_lanes(ctx.courses);
        let lanes: Vec<LaneIndex> = (0..ctx.lanes_used).filter(|l| !occupied.contains(l)).collect();

        // Chosen course for each (slot, lane) combination
        let mut chosen: Array2<Option<CourseIndex>> = Array2::from_elem((slots.len(), lanes.len()), None);
        for (r, slot) in slots.iter().enumerate() {
            let mut candidates = self.joinable_courses(self.groups[*slot], ctx);
            candidates.shuffle(rng);
            for (c, lane) in lanes.iter().enumerate() {
                let mut in_lane = candidates
                    .iter()
                    .copied()
                    .filter(|k| ctx.courses[*k].required_lanes() == 1 && ctx.courses[*k].is_in_lane(*lane));
                chosen[(r, c)] = if weighted {
                    in_lane.min_by_key(|k| ctx.course_sizes[*k])
                } else {
                    in_lane.next()
                };
            }
        }

        let result = if weighted {
            let weights = chosen.mapv(|k| k.map_or(0i64, |k| ctx.course_sizes[k] as i64));
            let edges = chosen.mapv(|k| k.is_some());
            matching::min_weight_max_cardinality_matching(&weights, &edges)
        } else {
            let edges = chosen.mapv(|k| if k.is_some() { 1i64 } else { 0 });
            matching::max_cardinality_matching(&edges)
        };

        for (r, c) in result.iter().enumerate() {
            if let Some(c) = c {
                if let Some(course) = chosen[(r, *c)] {
                    let group = self.groups[slots[r]];
                    self.assign_to_course(group, course, ctx)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn snapshot(&self) -> Vec<Option<CourseIndex>> {
        self.assigned.clone()
    }

    /// Restore an assignment from a snapshot. The course sizes must be recounted by the caller.
    pub(super) fn restore(&mut self, assigned: &[Option<CourseIndex>]) {
        self.assigned = assigned.to_vec();
    }
}
