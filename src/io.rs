pub mod simple;

use super::{BlockingInput, BlockingResult};

/// Format the calculated blocking into a human readable String (e.g. to print it to stdout).
///
/// The output format will look like
/// ```text
/// ===== Lane 1 =====
/// Course 11 (subject 1, type 1): 21 students
/// Course 14 (subject 3, type 2): 17 students
///
/// ===== Lane 2 =====
/// …
///
/// Unmet selections: 2
/// ```
pub fn format_result(result: &BlockingResult, input: &BlockingInput) -> String {
    let mut output = String::new();
    for (lane, courses) in result.lanes.iter().enumerate() {
        output.push_str(&format!("\n===== Lane {} =====\n", lane + 1));
        for id in courses.iter() {
            let size = result.courses.get(id).map_or(0, |students| students.len());
            match input.courses.iter().find(|c| c.id == *id) {
                Some(c) => output.push_str(&format!(
                    "Course {} (subject {}, type {}): {} students\n",
                    id, c.subject, c.course_type, size
                )),
                None => output.push_str(&format!("Course {}: {} students\n", id, size)),
            }
        }
    }
    if result.lanes.len() > input.lane_count {
        output.push_str(&format!(
            "\n{} lanes have been added to the requested {} lanes.\n",
            result.lanes.len() - input.lane_count,
            input.lane_count
        ));
    }
    output.push_str(&format!("\nUnmet selections: {}\n", result.unmet_selections));
    output
}
