use super::lane::LaneIndex;
use super::{CourseIndex, GroupIndex};
use crate::{BlockingError, CourseId, CourseTypeId, TeacherId};

/// Lane placement state of a single course.
///
/// A course must occupy exactly `required_lanes` different lanes. Fixed lanes (rule type 2) are always part of its
/// placement ("Lage"). The remaining candidate lanes ("Frei") are the requested lanes, which are not locked by any
/// rule and not yet occupied by this course. Lanes, which have been opened in addition to the requested lanes
/// (index >= `first_opened_lane`), are not restricted by any rule and may always be used.
#[derive(Clone, Debug)]
pub struct Course {
    pub(super) index: CourseIndex,
    pub(super) id: CourseId,
    pub(super) group: GroupIndex,
    pub(super) course_type: CourseTypeId,
    pub(super) teachers: Vec<TeacherId>,
    required_lanes: usize,
    first_opened_lane: LaneIndex,
    fixed: Vec<LaneIndex>,
    /// All lanes, the course may be placed into besides its fixed lanes, in random order
    candidates: Vec<LaneIndex>,
    placed: Vec<LaneIndex>,
    free: Vec<LaneIndex>,
}

impl Course {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        index: CourseIndex,
        id: CourseId,
        group: GroupIndex,
        course_type: CourseTypeId,
        teachers: Vec<TeacherId>,
        required_lanes: usize,
        first_opened_lane: LaneIndex,
        fixed: Vec<LaneIndex>,
        candidates: Vec<LaneIndex>,
    ) -> Course {
        Course {
            index,
            id,
            group,
            course_type,
            teachers,
            required_lanes,
            first_opened_lane,
            placed: fixed.clone(),
            free: candidates.clone(),
            fixed,
            candidates,
        }
    }

    pub fn index(&self) -> CourseIndex {
        self.index
    }

    pub fn id(&self) -> CourseId {
        self.id
    }

    pub fn group(&self) -> GroupIndex {
        self.group
    }

    pub fn course_type(&self) -> CourseTypeId {
        self.course_type
    }

    pub fn teachers(&self) -> &[TeacherId] {
        &self.teachers
    }

    pub fn required_lanes(&self) -> usize {
        self.required_lanes
    }

    /// Lanes, the course is currently placed into (fixed lanes first)
    pub fn lanes(&self) -> &[LaneIndex] {
        &self.placed
    }

    pub fn fixed_lanes(&self) -> &[LaneIndex] {
        &self.fixed
    }

    /// Requested lanes, the course could still be placed into
    pub fn free_lanes(&self) -> &[LaneIndex] {
        &self.free
    }

    /// Number of requested lanes, the course may be placed into at all (fixed lanes included)
    pub fn allowed_lane_count(&self) -> usize {
        self.fixed.len() + self.candidates.len()
    }

    /// True while there are candidate lanes left, which the course is not placed into
    pub fn is_free(&self) -> bool {
        !self.free.is_empty()
    }

    /// True, if the course's placement can be changed at all, i.e. it has lanes to fill besides its fixed lanes and
    /// more candidate lanes than those.
    pub fn has_degrees_of_freedom(&self) -> bool {
        let open = self.required_lanes - self.fixed.len();
        open > 0 && self.candidates.len() > open
    }

    pub fn is_placed(&self) -> bool {
        self.placed.len() == self.required_lanes
    }

    /// Number of lanes which still need to be assigned
    pub fn missing_lanes(&self) -> usize {
        self.required_lanes - self.placed.len()
    }

    pub fn is_in_lane(&self, lane: LaneIndex) -> bool {
        self.placed.contains(&lane)
    }

    /// Checks whether the course could be placed into the given lane, regarding its own lane locks only
    pub fn accepts_lane(&self, lane: LaneIndex) -> bool {
        !self.is_placed()
            && !self.is_in_lane(lane)
            && (lane >= self.first_opened_lane || self.free.contains(&lane))
    }

    /// Place the course into the lane. Returns false (and does not change anything), if the lane is locked for this
    /// course, the course is already in that lane or the course already occupies all of its lanes.
    ///
    /// Lane conflicts with other courses are checked by the engine before calling this method.
    pub(super) fn place_into_lane(&mut self, lane: LaneIndex) -> bool {
        if !self.accepts_lane(lane) {
            return false;
        }
        self.free.retain(|l| *l != lane);
        self.placed.push(lane);
        true
    }

    /// Place the course into a lane which has just been opened.
    ///
    /// # Errors
    ///
    /// Fails with an integrity error, if the course has already been placed into any lane or the lane is not an
    /// opened lane.
    pub(super) fn place_into_new_lane(&mut self, lane: LaneIndex) -> Result<(), BlockingError> {
        if !self.placed.is_empty() {
            return Err(BlockingError::integrity(format!(
                "Course {} is already placed into lanes {:?} and cannot be placed into a new lane.",
                self.id, self.placed
            )));
        }
        if lane < self.first_opened_lane {
            return Err(BlockingError::integrity(format!(
                "Lane {} is not a newly opened lane.",
                lane
            )));
        }
        self.placed.push(lane);
        Ok(())
    }

    /// Remove the course from the lane. Fixed lanes cannot be removed. Returns true, if the course has been removed.
    pub(super) fn remove_from_lane(&mut self, lane: LaneIndex) -> bool {
        if self.fixed.contains(&lane) || !self.is_in_lane(lane) {
            return false;
        }
        self.placed.retain(|l| *l != lane);
        if self.candidates.contains(&lane) {
            self.free.push(lane);
        }
        true
    }

    /// Remove the course from all but its fixed lanes
    pub(super) fn clear(&mut self) {
        self.placed = self.fixed.clone();
        self.free = self.candidates.clone();
    }

    /// Copy of the current placement, for saving a snapshot
    pub(super) fn snapshot(&self) -> Vec<LaneIndex> {
        self.placed.clone()
    }

    /// Restore a placement from a snapshot, created by `snapshot()` of this course
    pub(super) fn restore(&mut self, placed: &[LaneIndex]) {
        self.placed = placed.to_vec();
        self.free = self
            .candidates
            .iter()
            .copied()
            .filter(|l| !placed.contains(l))
            .collect();
    }
}
