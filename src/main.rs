use kursblockung::blocking::{Comparison, Engine, LaneStrategy, Priority, SnapshotKey, StudentStrategy};
use kursblockung::{io, BlockingError, BlockingInput};

use clap::{value_parser, Arg};
use log::{debug, error, info};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let args = clap::command!()
        .arg(
            Arg::new("INPUT")
                .help("Input JSON file with lanes, courses, students and rules. Use '-' to read from STDIN.")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("OUTPUT")
                .help("Output JSON file. If omitted, a human readable overview is printed to STDOUT.")
                .index(2),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .help("Seed of the random generator. Equal seeds and inputs give equal results.")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("restarts")
                .short('r')
                .long("restarts")
                .help("Number of randomized restarts")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("20"),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .help("Number of rounds without improvement, after which a restart is finished")
                .value_parser(value_parser!(u64))
                .default_value("200"),
        )
        .arg(
            Arg::new("time")
                .short('t')
                .long("time")
                .help("Wall clock budget in seconds. No new round is started after it elapsed.")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    // Read input
    let input_file = args.get_one::<String>("INPUT").map(String::as_str).unwrap_or("-");
    let input = match read_input(input_file) {
        Ok(input) => input,
        Err((message, code)) => {
            error!("{}", message);
            std::process::exit(code);
        }
    };
    info!(
        "Read {} courses, {} students and {} rules for {} lanes.",
        input.courses.len(),
        input.students.len(),
        input.rules.len(),
        input.lane_count
    );

    let seed = args.get_one::<u64>("seed").copied().unwrap_or(0);
    let mut engine = match Engine::new(&input, seed) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Could not create the blocking: {}", e);
            std::process::exit(exit_code(&e));
        }
    };

    let options = DriverOptions {
        restarts: args.get_one::<u64>("restarts").copied().unwrap_or(1),
        rounds: args.get_one::<u64>("rounds").copied().unwrap_or(0),
        deadline: args
            .get_one::<u64>("time")
            .map(|secs| Instant::now() + Duration::from_secs(*secs)),
    };
    let result = optimize(&mut engine, &options).and_then(|_| engine.export_result());
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!("Blocking failed: {}", e);
            std::process::exit(exit_code(&e));
        }
    };
    info!(
        "Found blocking with {} lanes and {} unmet selections.",
        result.lanes.len(),
        result.unmet_selections
    );

    // Write output
    match args.get_one::<String>("OUTPUT") {
        Some(path) => {
            let file = match std::fs::File::create(path) {
                Ok(f) => f,
                Err(e) => {
                    error!("Could not open output file {}: {}", path, e);
                    std::process::exit(exitcode::CANTCREAT);
                }
            };
            if let Err(e) = io::simple::write(file, &result) {
                error!("Could not write result: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        }
        None => print!("{}", io::format_result(&result, &input)),
    }
    std::process::exit(exitcode::OK);
}

/// Read the input data from the given file or from STDIN, if the file is '-'. Returns an error message and the
/// matching exit code on failure.
fn read_input(path: &str) -> Result<BlockingInput, (String, exitcode::ExitCode)> {
    let parsed = if path == "-" {
        io::simple::read(std::io::stdin())
    } else {
        let file = std::fs::File::open(path)
            .map_err(|e| (format!("Could not open input file {}: {}", path, e), exitcode::NOINPUT))?;
        io::simple::read(std::io::BufReader::new(file))
    };
    parsed.map_err(|e| (format!("Could not parse input data: {}", e), exitcode::DATAERR))
}

fn exit_code(error: &BlockingError) -> exitcode::ExitCode {
    match error {
        BlockingError::Conflict(_) => exitcode::DATAERR,
        BlockingError::Integrity(_) => exitcode::SOFTWARE,
    }
}

struct DriverOptions {
    restarts: u64,
    rounds: u64,
    deadline: Option<Instant>,
}

impl DriverOptions {
    fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Simple hill climbing on top of the engine's actions.
///
/// Every restart starts with a fresh lane distribution (cycling through the lane strategies) and lets the students
/// move courses into lanes they can join. Then it keeps relocating random courses, as long as this does not make the
/// rating worse compared to snapshot K. A restart ends after `rounds` rounds without improvement. The best result of all restarts is kept in snapshot G and loaded at the
/// end. At least one restart is done, even if the deadline has already passed.
fn optimize(engine: &mut Engine, options: &DriverOptions) -> Result<(), BlockingError> {
    for restart in 0..options.restarts {
        if restart > 0 && options.expired() {
            info!("Time is up after {} restarts.", restart);
            break;
        }
        let strategy = LaneStrategy::ALL[restart as usize % LaneStrategy::ALL.len()];
        engine.distribute_courses(strategy)?;
        if engine.distribute_courses_by_student_wish()? {
            debug!("Restart {}: courses moved by student wish.", restart);
        }
        engine.distribute_students(StudentStrategy::WeightedMatching)?;
        engine.save_state(SnapshotKey::K);

        let mut unchanged = 0;
        while unchanged < options.rounds && !options.expired() {
            engine.relocate_random_course()?;
            engine.distribute_students(StudentStrategy::WeightedMatching)?;
            match engine.compare_with(SnapshotKey::K, Priority::UnmetFirst) {
                Comparison::Better => {
                    engine.save_state(SnapshotKey::K);
                    unchanged = 0;
                }
                Comparison::Equal => {
                    engine.save_state(SnapshotKey::K);
                    unchanged += 1;
                }
                Comparison::Worse => {
                    engine.load_state(SnapshotKey::K);
                    unchanged += 1;
                }
            }
        }

        engine.load_state(SnapshotKey::K);
        let rating = engine.rating();
        debug!(
            "Restart {} ({:?}): {} unmet selections, maximum course difference {}.",
            restart,
            strategy,
            rating.unmet,
            rating.max_course_difference()
        );
        if restart == 0 || engine.compare_with(SnapshotKey::G, Priority::UnmetFirst) == Comparison::Better {
            info!(
                "Restart {} found a better blocking with {} unmet selections.",
                restart, rating.unmet
            );
            engine.save_state(SnapshotKey::G);
        }
    }
    engine.load_state(SnapshotKey::G);
    Ok(())
}
