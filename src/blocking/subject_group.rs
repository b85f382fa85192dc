use super::{CourseIndex, GroupIndex};
use crate::{CourseTypeId, SubjectId};

/// A subject group ("Fachart"): all courses offering the same subject with the same course type. Students choose
/// subject groups and get assigned to one of the group's courses.
#[derive(Clone, Debug)]
pub struct SubjectGroup {
    index: GroupIndex,
    subject: SubjectId,
    course_type: CourseTypeId,
    courses: Vec<CourseIndex>,
    max_courses: usize,
    max_students: usize,
    multi_lane: bool,
}

impl SubjectGroup {
    pub(super) fn new(index: GroupIndex, subject: SubjectId, course_type: CourseTypeId) -> SubjectGroup {
        SubjectGroup {
            index,
            subject,
            course_type,
            courses: Vec::new(),
            max_courses: 0,
            max_students: 0,
            multi_lane: false,
        }
    }

    pub fn index(&self) -> GroupIndex {
        self.index
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn course_type(&self) -> CourseTypeId {
        self.course_type
    }

    pub fn courses(&self) -> &[CourseIndex] {
        &self.courses
    }

    /// Number of courses offered for this group, as counted while scanning the input courses
    pub fn course_count(&self) -> usize {
        self.max_courses
    }

    /// Number of students, who chose this group
    pub fn student_count(&self) -> usize {
        self.max_students
    }

    /// True, if any course of this group spans more than one lane
    pub fn is_multi_lane(&self) -> bool {
        self.multi_lane
    }

    pub(super) fn increment_courses(&mut self) {
        self.max_courses += 1;
    }

    pub(super) fn increment_students(&mut self) {
        self.max_students += 1;
    }

    pub(super) fn add_course(&mut self, course: CourseIndex, required_lanes: usize) {
        self.courses.push(course);
        if required_lanes > 1 {
            self.multi_lane = true;
        }
    }
}
