//! Course blocking for the upper secondary level: courses are distributed onto a number of parallel lanes
//! ("Schienen") and students are distributed onto the courses of their chosen subjects afterwards.
//!
//! The entry point is [`blocking::Engine`], which is built from a [`BlockingInput`] and a random seed. Its actions
//! are meant to be driven by an external optimization loop, which saves, compares and restores the engine's
//! snapshots and finally exports the best state as [`BlockingResult`].

pub mod blocking;
pub mod io;
pub mod matching;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Database id of a course
pub type CourseId = u64;
/// Database id of a student
pub type StudentId = u64;
/// Database id of a subject
pub type SubjectId = u64;
/// Database id of a teacher
pub type TeacherId = u64;
/// Id of a course type (e.g. regular or advanced course)
pub type CourseTypeId = u32;

/// Representation of an offered course's data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourseInput {
    /// Course's id in the database
    pub id: CourseId,
    /// Subject, the course is offered in
    pub subject: SubjectId,
    /// Type of the course. Together with the subject, it defines the subject group
    pub course_type: CourseTypeId,
    /// Number of lanes the course occupies
    #[serde(default = "default_lane_count")]
    pub lanes: usize,
    /// Ids of the course's teachers
    #[serde(default)]
    pub teachers: Vec<TeacherId>,
}

fn default_lane_count() -> usize {
    1
}

/// A single subject choice of a student
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub subject: SubjectId,
    pub course_type: CourseTypeId,
}

/// Representation of a student's data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudentInput {
    /// Student's id in the database
    pub id: StudentId,
    /// The chosen subject groups in the order of the student's selection
    pub selections: Vec<Selection>,
}

/// A blocking rule in its raw form, as it is stored in the database.
///
/// `kind` is the numeric rule type (1 to 10). Lane numbers within `parameters` are 1-indexed. See
/// [`rules::Rule`] for the meaning of the parameters of each rule type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    pub id: u64,
    pub kind: u8,
    #[serde(default)]
    pub parameters: Vec<i64>,
}

/// Everything, the engine needs to know to create a blocking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockingInput {
    /// Number of available lanes
    pub lane_count: usize,
    pub courses: Vec<CourseInput>,
    pub students: Vec<StudentInput>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
}

/// Read-only projection of a fully distributed engine state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingResult {
    /// Course ids for each lane (index = 0-based lane number). Lanes, which have been opened in addition to the
    /// requested lane count, are included.
    pub lanes: Vec<Vec<CourseId>>,
    /// Ids of the assigned students for each course
    pub courses: BTreeMap<CourseId, Vec<StudentId>>,
    /// Number of selections, which could not be fulfilled
    pub unmet_selections: usize,
}

impl BlockingResult {
    /// Returns the lanes (0-based), the given course has been placed into
    pub fn lanes_of_course(&self, course: CourseId) -> Vec<usize> {
        self.lanes
            .iter()
            .enumerate()
            .filter(|(_, courses)| courses.contains(&course))
            .map(|(lane, _)| lane)
            .collect()
    }

    /// Returns the course of the given student within the given list of courses (e.g. the courses of one subject
    /// group), if any.
    pub fn course_of_student(&self, student: StudentId, candidates: &[CourseId]) -> Option<CourseId> {
        candidates.iter().copied().find(|c| {
            self.courses
                .get(c)
                .map_or(false, |students| students.contains(&student))
        })
    }
}

/// Errors raised while building the engine or executing one of its actions
#[derive(Debug, Error, PartialEq)]
pub enum BlockingError {
    /// The caller violated the engine's contract (malformed rules, dangling ids, broken invariants). Such errors are
    /// bugs in the calling code and must not be shown to the user as something they could fix.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// The input data contradicts itself. The message is meant to be shown to the user.
    #[error("{0}")]
    Conflict(String),
}

impl BlockingError {
    pub(crate) fn integrity<S: Into<String>>(message: S) -> Self {
        BlockingError::Integrity(message.into())
    }

    pub(crate) fn conflict<S: Into<String>>(message: S) -> Self {
        BlockingError::Conflict(message.into())
    }
}

#[cfg(test)]
mod test {
    use super::{BlockingResult, CourseInput};
    use std::collections::BTreeMap;

    #[test]
    fn course_defaults_to_one_lane() {
        let course: CourseInput =
            serde_json::from_str(r#"{"id": 5, "subject": 1, "course_type": 2}"#).unwrap();
        assert_eq!(course.lanes, 1);
        assert!(course.teachers.is_empty());
    }

    #[test]
    fn result_queries() {
        let mut courses = BTreeMap::new();
        courses.insert(10, vec![1, 2]);
        courses.insert(11, vec![3]);
        let result = BlockingResult {
            lanes: vec![vec![10], vec![11, 10]],
            courses,
            unmet_selections: 0,
        };
        assert_eq!(result.lanes_of_course(10), vec![0, 1]);
        assert_eq!(result.lanes_of_course(12), Vec::<usize>::new());
        assert_eq!(result.course_of_student(3, &[10, 11]), Some(11));
        assert_eq!(result.course_of_student(4, &[10, 11]), None);
    }
}
