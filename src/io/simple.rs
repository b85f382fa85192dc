use crate::{BlockingInput, BlockingResult, CourseInput, RawRule, StudentInput};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

/// Read the lane count, courses, students and rules from the simple JSON representation (canonical serde_json
/// serialization of `CourseInput`, `StudentInput` and `RawRule` objects). The `rules` field is optional.
pub fn read<R: std::io::Read>(reader: R) -> Result<BlockingInput, String> {
    let mut data: serde_json::Value = serde_json::from_reader(reader).map_err(|err| err.to_string())?;

    let lane_count = data["lane_count"]
        .as_u64()
        .ok_or("No valid 'lane_count' field found.")? as usize;
    let courses: Vec<CourseInput> =
        serde_json::from_value(data["courses"].take()).map_err(|e| format!("Invalid courses: {}", e))?;
    let students: Vec<StudentInput> =
        serde_json::from_value(data["students"].take()).map_err(|e| format!("Invalid students: {}", e))?;
    let rules: Vec<RawRule> = if data["rules"].is_null() {
        Vec::new()
    } else {
        serde_json::from_value(data["rules"].take()).map_err(|e| format!("Invalid rules: {}", e))?
    };

    Ok(BlockingInput {
        lane_count,
        courses,
        students,
        rules,
    })
}

/// Write the calculated blocking as simple JSON representation (canonical serde_json serialization of the
/// `BlockingResult` fields) to a Writer (e.g. an output file).
pub fn write<W: std::io::Write>(writer: W, result: &BlockingResult) -> Result<(), String> {
    let lanes: serde_json::Value = serde_json::to_value(&result.lanes).map_err(|e| format!("{}", e))?;
    let courses: serde_json::Value = serde_json::to_value(&result.courses).map_err(|e| format!("{}", e))?;
    let data = json!({
        "format": "X-kursblockung-simple",
        "version": "1.0",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false),
        "lanes": lanes,
        "courses": courses,
        "unmet_selections": result.unmet_selections,
    });
    serde_json::to_writer(writer, &data).map_err(|e| format!("{}", e))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use crate::blocking::{Engine, LaneStrategy, StudentStrategy};
    use crate::BlockingResult;
    use std::collections::BTreeMap;

    #[test]
    fn parse_simple_file() {
        let data = include_bytes!("test_ressources/simple_input.json");
        let input = super::read(&data[..]).unwrap();

        assert_eq!(input.lane_count, 3);
        assert_eq!(input.courses.len(), 5);
        assert_eq!(input.students.len(), 6);
        assert_eq!(input.rules.len(), 2);
        assert_eq!(input.courses[0].teachers, vec![21]);
        assert_eq!(input.courses[4].lanes, 2);
        assert_eq!(input.courses[1].lanes, 1);
        assert_eq!(input.students[2].selections.len(), 3);
        assert_eq!(input.students[2].selections[2].course_type, 2);
        assert_eq!(input.rules[1].kind, 7);
        assert_eq!(input.rules[1].parameters, vec![11, 13]);

        // The file describes a valid blocking
        let mut engine = Engine::new(&input, 1).unwrap();
        engine.distribute_courses(LaneStrategy::ByDegree).unwrap();
        engine.distribute_students(StudentStrategy::WeightedMatching).unwrap();
        let result = engine.export_result().unwrap();
        assert_eq!(result.courses.len(), 5);
        assert_eq!(result.lanes_of_course(15).len(), 2);
    }

    #[test]
    fn missing_fields() {
        let result = super::read(&br#"{"courses": [], "students": []}"#[..]);
        assert!(result.is_err());
        let result = super::read(&br#"{"lane_count": 2, "students": []}"#[..]);
        assert!(result.is_err());
        let input = super::read(&br#"{"lane_count": 2, "courses": [], "students": []}"#[..]).unwrap();
        assert!(input.rules.is_empty());
    }

    #[test]
    fn write_simple_file() {
        let mut courses = BTreeMap::new();
        courses.insert(11, vec![1, 2]);
        courses.insert(12, vec![3]);
        let result = BlockingResult {
            lanes: vec![vec![11], vec![12]],
            courses,
            unmet_selections: 1,
        };
        let mut buffer = Vec::<u8>::new();
        let written = super::write(&mut buffer, &result);
        assert!(written.is_ok());

        // Parse buffer as JSON file
        let mut data: serde_json::Value = serde_json::from_reader(&buffer[..]).unwrap();
        assert_eq!(data["format"], "X-kursblockung-simple");
        assert!(data["timestamp"].is_string());
        let lanes = serde_json::from_value::<Vec<Vec<u64>>>(data["lanes"].take()).unwrap();
        assert_eq!(lanes, result.lanes);
        let courses = serde_json::from_value::<BTreeMap<u64, Vec<u64>>>(data["courses"].take()).unwrap();
        assert_eq!(courses, result.courses);
        assert_eq!(data["unmet_selections"], 1);
    }
}
