//! The ten rule types of a blocking, parsed from their raw database representation.
//!
//! Parsing checks the parameter count and the value range of lane numbers. Whether referenced courses and students
//! exist, is checked by the engine, which knows the course and student universe.

use crate::{BlockingError, CourseId, CourseTypeId, RawRule, StudentId};
use std::fmt;

/// A single blocking rule. Lanes are stored 0-indexed, in contrast to the 1-indexed raw representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Type 1: Courses of the course type may not be placed into the lanes `from..=to`
    CourseTypeLockLanes {
        course_type: CourseTypeId,
        from: usize,
        to: usize,
    },
    /// Type 2: The course is fixed in the lane
    FixCourseInLane { course: CourseId, lane: usize },
    /// Type 3: The course may not be placed into the lane
    ForbidCourseInLane { course: CourseId, lane: usize },
    /// Type 4: The student must be assigned to the course
    ForceStudentInCourse { student: StudentId, course: CourseId },
    /// Type 5: The student may not be assigned to the course
    ForbidStudentInCourse { student: StudentId, course: CourseId },
    /// Type 6: The lanes `from..=to` are reserved for courses of the course type, which in turn may not be placed
    /// outside of these lanes
    CourseTypeExclusiveLanes {
        course_type: CourseTypeId,
        from: usize,
        to: usize,
    },
    /// Type 7: The two courses may not share a lane
    ForbidCourseWithCourse(CourseId, CourseId),
    /// Type 8: The two courses should share their lanes
    GroupCourseWithCourse(CourseId, CourseId),
    /// Type 9: The course should be filled up with placeholder students. Not implemented by the engine.
    FillCourseWithPlaceholders { course: CourseId },
    /// Type 10: Courses sharing a teacher may not share a lane
    RespectTeachers,
}

impl Rule {
    /// Parse and check a raw rule. `lane_count` is the number of lanes of the blocking, used for checking lane
    /// numbers.
    ///
    /// # Errors
    ///
    /// * `Integrity`, if the rule type is unknown, the number of parameters does not match the rule type, an id is
    ///   negative or a lane number is outside of `1..=lane_count`
    /// * `Conflict`, if rule 7 or 8 combines a course with itself
    pub fn parse(raw: &RawRule, lane_count: usize) -> Result<Rule, BlockingError> {
        let expected = match raw.kind {
            1 | 6 => 3,
            2 | 3 | 4 | 5 | 7 | 8 => 2,
            9 => 1,
            10 => 0,
            k => {
                return Err(BlockingError::integrity(format!(
                    "Rule {} has unknown type {}.",
                    raw.id, k
                )))
            }
        };
        let name = kind_name(raw.kind);
        if raw.parameters.len() != expected {
            return Err(BlockingError::integrity(format!(
                "Rule {} ({}) has {} parameters instead of {}.",
                raw.id,
                name,
                raw.parameters.len(),
                expected
            )));
        }
        let p = &raw.parameters;
        let id = |i: usize| -> Result<u64, BlockingError> {
            u64::try_from(p[i]).map_err(|_| {
                BlockingError::integrity(format!("Rule {} ({}) has negative id {}.", raw.id, name, p[i]))
            })
        };
        let lane = |i: usize| -> Result<usize, BlockingError> {
            if p[i] >= 1 && (p[i] as u64) <= lane_count as u64 {
                Ok(p[i] as usize - 1)
            } else {
                Err(BlockingError::integrity(format!(
                    "Rule {} ({}) refers to lane {}, but there are only {} lanes.",
                    raw.id, name, p[i], lane_count
                )))
            }
        };
        let course_type = |i: usize| -> Result<CourseTypeId, BlockingError> {
            CourseTypeId::try_from(p[i]).map_err(|_| {
                BlockingError::integrity(format!(
                    "Rule {} ({}) has invalid course type {}.",
                    raw.id, name, p[i]
                ))
            })
        };

        let rule = match raw.kind {
            1 | 6 => {
                let course_type = course_type(0)?;
                let from = lane(1)?;
                let to = lane(2)?;
                if from > to {
                    return Err(BlockingError::integrity(format!(
                        "Rule {} ({}) has an empty lane range {}..{}.",
                        raw.id, name, p[1], p[2]
                    )));
                }
                if raw.kind == 1 {
                    Rule::CourseTypeLockLanes { course_type, from, to }
                } else {
                    Rule::CourseTypeExclusiveLanes { course_type, from, to }
                }
            }
            2 => Rule::FixCourseInLane {
                course: id(0)?,
                lane: lane(1)?,
            },
            3 => Rule::ForbidCourseInLane {
                course: id(0)?,
                lane: lane(1)?,
            },
            4 => Rule::ForceStudentInCourse {
                student: id(0)?,
                course: id(1)?,
            },
            5 => Rule::ForbidStudentInCourse {
                student: id(0)?,
                course: id(1)?,
            },
            7 | 8 => {
                let (a, b) = (id(0)?, id(1)?);
                if a == b {
                    return Err(BlockingError::conflict(format!(
                        "The rule '{}' combines course {} with itself.",
                        name, a
                    )));
                }
                if raw.kind == 7 {
                    Rule::ForbidCourseWithCourse(a, b)
                } else {
                    Rule::GroupCourseWithCourse(a, b)
                }
            }
            9 => Rule::FillCourseWithPlaceholders { course: id(0)? },
            _ => Rule::RespectTeachers,
        };
        Ok(rule)
    }

    /// Numeric rule type, as used in the raw representation
    pub fn kind(&self) -> u8 {
        match self {
            Rule::CourseTypeLockLanes { .. } => 1,
            Rule::FixCourseInLane { .. } => 2,
            Rule::ForbidCourseInLane { .. } => 3,
            Rule::ForceStudentInCourse { .. } => 4,
            Rule::ForbidStudentInCourse { .. } => 5,
            Rule::CourseTypeExclusiveLanes { .. } => 6,
            Rule::ForbidCourseWithCourse(..) => 7,
            Rule::GroupCourseWithCourse(..) => 8,
            Rule::FillCourseWithPlaceholders { .. } => 9,
            Rule::RespectTeachers => 10,
        }
    }

    /// All course ids, the rule refers to
    pub fn courses(&self) -> Vec<CourseId> {
        match self {
            Rule::FixCourseInLane { course, .. }
            | Rule::ForbidCourseInLane { course, .. }
            | Rule::ForceStudentInCourse { course, .. }
            | Rule::ForbidStudentInCourse { course, .. }
            | Rule::FillCourseWithPlaceholders { course } => vec![*course],
            Rule::ForbidCourseWithCourse(a, b) | Rule::GroupCourseWithCourse(a, b) => vec![*a, *b],
            _ => Vec::new(),
        }
    }

    /// The student id, the rule refers to
    pub fn student(&self) -> Option<StudentId> {
        match self {
            Rule::ForceStudentInCourse { student, .. } | Rule::ForbidStudentInCourse { student, .. } => {
                Some(*student)
            }
            _ => None,
        }
    }
}

fn kind_name(kind: u8) -> &'static str {
    match kind {
        1 => "KURSART_SPERRE_SCHIENEN_VON_BIS",
        2 => "KURS_FIXIERE_IN_SCHIENE",
        3 => "KURS_SPERRE_IN_SCHIENE",
        4 => "SCHUELER_FIXIEREN_IN_KURS",
        5 => "SCHUELER_VERBIETEN_IN_KURS",
        6 => "KURSART_ALLEIN_IN_SCHIENEN_VON_BIS",
        7 => "KURS_VERBIETEN_MIT_KURS",
        8 => "KURS_ZUSAMMEN_MIT_KURS",
        9 => "KURS_MIT_DUMMY_SUS_AUFFUELLEN",
        10 => "LEHRKRAEFTE_BEACHTEN",
        _ => "UNDEFINIERT",
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", kind_name(self.kind()))?;
        match self {
            Rule::CourseTypeLockLanes { course_type, from, to }
            | Rule::CourseTypeExclusiveLanes { course_type, from, to } => {
                write!(f, "({}, {}, {})", course_type, from + 1, to + 1)
            }
            Rule::FixCourseInLane { course, lane } | Rule::ForbidCourseInLane { course, lane } => {
                write!(f, "({}, {})", course, lane + 1)
            }
            Rule::ForceStudentInCourse { student, course }
            | Rule::ForbidStudentInCourse { student, course } => write!(f, "({}, {})", student, course),
            Rule::ForbidCourseWithCourse(a, b) | Rule::GroupCourseWithCourse(a, b) => {
                write!(f, "({}, {})", a, b)
            }
            Rule::FillCourseWithPlaceholders { course } => write!(f, "({})", course),
            Rule::RespectTeachers => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Rule;
    use crate::{BlockingError, RawRule};

    fn raw(kind: u8, parameters: Vec<i64>) -> RawRule {
        RawRule {
            id: 1,
            kind,
            parameters,
        }
    }

    #[test]
    fn parse_all_kinds() {
        assert_eq!(
            Rule::parse(&raw(1, vec![2, 1, 3]), 5).unwrap(),
            Rule::CourseTypeLockLanes {
                course_type: 2,
                from: 0,
                to: 2
            }
        );
        assert_eq!(
            Rule::parse(&raw(2, vec![17, 5]), 5).unwrap(),
            Rule::FixCourseInLane { course: 17, lane: 4 }
        );
        assert_eq!(
            Rule::parse(&raw(3, vec![17, 1]), 5).unwrap(),
            Rule::ForbidCourseInLane { course: 17, lane: 0 }
        );
        assert_eq!(
            Rule::parse(&raw(4, vec![3, 17]), 5).unwrap(),
            Rule::ForceStudentInCourse { student: 3, course: 17 }
        );
        assert_eq!(
            Rule::parse(&raw(5, vec![3, 17]), 5).unwrap(),
            Rule::ForbidStudentInCourse { student: 3, course: 17 }
        );
        assert_eq!(
            Rule::parse(&raw(6, vec![1, 4, 5]), 5).unwrap(),
            Rule::CourseTypeExclusiveLanes {
                course_type: 1,
                from: 3,
                to: 4
            }
        );
        assert_eq!(
            Rule::parse(&raw(7, vec![1, 2]), 5).unwrap(),
            Rule::ForbidCourseWithCourse(1, 2)
        );
        assert_eq!(
            Rule::parse(&raw(8, vec![1, 2]), 5).unwrap(),
            Rule::GroupCourseWithCourse(1, 2)
        );
        assert_eq!(
            Rule::parse(&raw(9, vec![8]), 5).unwrap(),
            Rule::FillCourseWithPlaceholders { course: 8 }
        );
        assert_eq!(Rule::parse(&raw(10, vec![]), 5).unwrap(), Rule::RespectTeachers);
    }

    #[test]
    fn wrong_arity_is_integrity_error() {
        for (kind, params) in [(1, vec![1, 2]), (2, vec![1]), (9, vec![]), (10, vec![1])] {
            match Rule::parse(&raw(kind, params), 5) {
                Err(BlockingError::Integrity(_)) => (),
                other => panic!("Unexpected result for type {}: {:?}", kind, other),
            }
        }
        assert!(matches!(
            Rule::parse(&raw(11, vec![]), 5),
            Err(BlockingError::Integrity(_))
        ));
    }

    #[test]
    fn lane_range_checks() {
        assert!(matches!(
            Rule::parse(&raw(2, vec![1, 0]), 5),
            Err(BlockingError::Integrity(_))
        ));
        assert!(matches!(
            Rule::parse(&raw(2, vec![1, 6]), 5),
            Err(BlockingError::Integrity(_))
        ));
        assert!(matches!(
            Rule::parse(&raw(1, vec![1, 4, 2]), 5),
            Err(BlockingError::Integrity(_))
        ));
        assert!(matches!(
            Rule::parse(&raw(4, vec![-1, 2]), 5),
            Err(BlockingError::Integrity(_))
        ));
    }

    #[test]
    fn course_combined_with_itself_is_conflict() {
        assert!(matches!(
            Rule::parse(&raw(7, vec![4, 4]), 5),
            Err(BlockingError::Conflict(_))
        ));
        assert!(matches!(
            Rule::parse(&raw(8, vec![4, 4]), 5),
            Err(BlockingError::Conflict(_))
        ));
    }

    #[test]
    fn display_uses_one_indexed_lanes() {
        let rule = Rule::FixCourseInLane { course: 3, lane: 0 };
        assert_eq!(rule.to_string(), "KURS_FIXIERE_IN_SCHIENE(3, 1)");
    }
}
