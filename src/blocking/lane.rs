use super::CourseIndex;

/// Index of a lane. Lanes `0..lane_count` are the requested lanes, higher indexes are lanes, which have been opened
/// by a lane distribution strategy.
pub type LaneIndex = usize;

/// A lane and the courses currently placed into it
#[derive(Clone, Debug, Default)]
pub struct Lane {
    index: LaneIndex,
    courses: Vec<CourseIndex>,
}

impl Lane {
    pub fn new(index: LaneIndex) -> Lane {
        Lane {
            index,
            courses: Vec::new(),
        }
    }

    pub fn index(&self) -> LaneIndex {
        self.index
    }

    pub fn courses(&self) -> &[CourseIndex] {
        &self.courses
    }

    pub fn contains(&self, course: CourseIndex) -> bool {
        self.courses.contains(&course)
    }

    /// Number of courses in this lane. This is the lane's crowding, used for comparing lane distributions.
    pub fn crowding(&self) -> usize {
        self.courses.len()
    }

    pub(super) fn add_course(&mut self, course: CourseIndex) {
        debug_assert!(!self.contains(course));
        self.courses.push(course);
    }

    pub(super) fn remove_course(&mut self, course: CourseIndex) {
        self.courses.retain(|c| *c != course);
    }

    pub(super) fn clear(&mut self) {
        self.courses.clear();
    }
}
