//! Command-line front end.
//!
//! Runs a YAML input file through the solver:
//!
//! ```text
//! fem-cli -i input.yml [--verbose N] [--no-colors]
//!         [--restart-from FILE] [--perf-log FILE] [--log-file FILE]
//! ```

use chrono::Local;
use fem_io::{ExecutionerBlock, InputFile, OutputBlock, RestartField};
use fem_solver::{NativeBackend, NonlinearConfig, TransientSolver, solve_nonlinear};
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() {
    eprintln!("usage:");
    eprintln!("  fem-cli -i FILE [options]");
    eprintln!("  fem-cli --version");
    eprintln!("  fem-cli -h | --help");
    eprintln!();
    eprintln!("options:");
    eprintln!("  -i FILE              run the given input file");
    eprintln!("  --verbose N          verbosity level (0-9)");
    eprintln!("  --no-colors          disable terminal coloring");
    eprintln!("  --restart-from FILE  continue from a restart file");
    eprintln!("  --perf-log FILE      write a performance log");
    eprintln!("  --log-file FILE      mirror log messages into a file");
}

#[derive(Default)]
struct Options {
    input: Option<PathBuf>,
    verbose: u8,
    colors: bool,
    restart_from: Option<PathBuf>,
    perf_log: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

enum Command {
    Run(Options),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut opts = Options {
        colors: true,
        verbose: 1,
        ..Options::default()
    };
    let mut i = 0;
    let take_value = |args: &[String], i: &mut usize, flag: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("missing value for '{}'", flag))
    };
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--version" => return Ok(Command::Version),
            "-i" => opts.input = Some(PathBuf::from(take_value(args, &mut i, "-i")?)),
            "--verbose" => {
                let v = take_value(args, &mut i, "--verbose")?;
                opts.verbose = v
                    .parse::<u8>()
                    .ok()
                    .filter(|&n| n <= 9)
                    .ok_or_else(|| format!("'--verbose' expects a level 0-9, got '{}'", v))?;
            }
            "--no-colors" => opts.colors = false,
            "--restart-from" => {
                opts.restart_from = Some(PathBuf::from(take_value(args, &mut i, "--restart-from")?))
            }
            "--perf-log" => {
                opts.perf_log = Some(PathBuf::from(take_value(args, &mut i, "--perf-log")?))
            }
            "--log-file" => {
                opts.log_file = Some(PathBuf::from(take_value(args, &mut i, "--log-file")?))
            }
            other => return Err(format!("unknown option '{}'", other)),
        }
        i += 1;
    }
    if opts.input.is_none() {
        return Err("no input file given (use -i FILE)".to_string());
    }
    Ok(Command::Run(opts))
}

/// Console logger honoring the verbosity level and color switch
struct ConsoleLogger {
    level: LevelFilter,
    colors: bool,
    file: Option<Mutex<File>>,
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2..=4 => LevelFilter::Info,
        5..=8 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => ("error", "\x1b[31m"),
            Level::Warn => ("warn", "\x1b[33m"),
            Level::Info => ("info", "\x1b[32m"),
            Level::Debug => ("debug", "\x1b[36m"),
            Level::Trace => ("trace", "\x1b[90m"),
        };
        let line = if self.colors {
            format!("{}[{}]\x1b[0m {}", tag.1, tag.0, record.args())
        } else {
            format!("[{}] {}", tag.0, record.args())
        };
        eprintln!("{}", line);
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "[{}] {}", tag.0, record.args());
            }
        }
    }

    fn flush(&self) {}
}

struct PerfLog {
    file: Option<File>,
    start: std::time::Instant,
}

impl PerfLog {
    fn open(path: Option<&PathBuf>) -> Self {
        let file = path.and_then(|p| File::create(p).ok());
        PerfLog {
            file,
            start: std::time::Instant::now(),
        }
    }

    fn mark(&mut self, what: &str) {
        if let Some(f) = &mut self.file {
            let _ = writeln!(
                f,
                "{} {:>10.3}ms {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                self.start.elapsed().as_secs_f64() * 1e3,
                what
            );
        }
    }
}

fn run(opts: Options) -> Result<(), String> {
    let logger = ConsoleLogger {
        level: level_filter(opts.verbose),
        colors: opts.colors,
        file: opts
            .log_file
            .as_ref()
            .and_then(|p| File::create(p).ok())
            .map(Mutex::new),
    };
    let max = logger.level;
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max);
    }
    let mut perf = PerfLog::open(opts.perf_log.as_ref());

    let input_path = opts.input.expect("validated by parse_args");
    let input = InputFile::parse_file(&input_path).map_err(|e| e.to_string())?;
    perf.mark("input parsed");

    let (mesh, mut problem) = input.build_problem().map_err(|e| e.to_string())?;
    problem.create().map_err(|e| e.to_string())?;
    log::info!(
        "mesh: {} cells, {} vertices; {} dofs",
        mesh.num_cells(),
        mesh.num_vertices(),
        problem.get_dof_count()
    );
    perf.mark("problem created");

    let restart_fields: Vec<RestartField> = vec![RestartField {
        name: "u".into(),
        order: input.problem.p_order(),
    }];
    let mut start_time = 0.0;
    if let Some(path) = &opts.restart_from {
        start_time = fem_io::load_restart(path, &mut problem, &restart_fields)
            .map_err(|e| e.to_string())?;
        log::info!("restarted from {} at t = {}", path.display(), start_time);
    }

    let backend = NativeBackend::new();
    let newton = NonlinearConfig::default();
    match input
        .executioner
        .as_ref()
        .map(ExecutionerBlock::transient_config)
        .transpose()
        .map_err(|e| e.to_string())?
        .flatten()
    {
        Some(mut config) => {
            config.start_time = start_time.max(config.start_time);
            let mut ts = TransientSolver::new(config, newton).map_err(|e| e.to_string())?;
            ts.solve(&mut problem, &backend).map_err(|e| e.to_string())?;
            log::info!(
                "time march finished at t = {} after {} steps ({:?})",
                ts.time(),
                ts.steps_taken(),
                ts.converged_reason()
            );
            if !ts.converged_reason().is_converged() {
                return Err(format!(
                    "time integration stopped: {:?}",
                    ts.converged_reason()
                ));
            }
        }
        None => {
            let results = solve_nonlinear(&mut problem, start_time, None, &newton, &backend)
                .map_err(|e| e.to_string())?;
            log::info!(
                "solve finished in {} iterations (|r| = {:.3e})",
                results.num_iterations,
                results.residual_norm
            );
            if results.status != fem_solver::ConvergenceStatus::Converged {
                return Err(format!("nonlinear solve did not converge: {:?}", results.status));
            }
        }
    }
    perf.mark("solved");

    if !input.output.is_empty() {
        let local = problem.compute_solution_vector_local();
        let space = problem.space(0);
        let values: Vec<f64> = mesh
            .vertex_range()
            .map(|v| local[space.vertex_local_slot(v)])
            .collect();
        for out in &input.output {
            let OutputBlock::VTKOutput(b) = out;
            fem_io::write_vtk(&b.file, &mesh, "u", &values).map_err(|e| e.to_string())?;
            log::info!("wrote {}", b.file);
        }
    }
    perf.mark("outputs written");
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args) {
        Ok(Command::Help) => {
            usage();
            ExitCode::SUCCESS
        }
        Ok(Command::Version) => {
            println!("fem-cli {}", VERSION);
            ExitCode::SUCCESS
        }
        Ok(Command::Run(opts)) => match run(opts) {
            Ok(()) => ExitCode::SUCCESS,
            Err(msg) => {
                eprintln!("error: {}", msg);
                ExitCode::from(1)
            }
        },
        Err(msg) => {
            eprintln!("error: {}", msg);
            usage();
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_run_options() {
        let cmd = parse_args(&strs(&[
            "-i",
            "run.yml",
            "--verbose",
            "7",
            "--no-colors",
            "--perf-log",
            "perf.txt",
        ]))
        .unwrap();
        match cmd {
            Command::Run(opts) => {
                assert_eq!(opts.input.unwrap(), PathBuf::from("run.yml"));
                assert_eq!(opts.verbose, 7);
                assert!(!opts.colors);
                assert_eq!(opts.perf_log.unwrap(), PathBuf::from("perf.txt"));
            }
            _ => panic!("expected a run command"),
        }
    }

    #[test]
    fn help_and_version() {
        assert!(matches!(parse_args(&strs(&["--help"])), Ok(Command::Help)));
        assert!(matches!(parse_args(&strs(&["-h"])), Ok(Command::Help)));
        assert!(matches!(
            parse_args(&strs(&["--version"])),
            Ok(Command::Version)
        ));
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(&strs(&[])).is_err());
        assert!(parse_args(&strs(&["-i"])).is_err());
        assert!(parse_args(&strs(&["-i", "a.yml", "--verbose", "12"])).is_err());
        assert!(parse_args(&strs(&["--frobnicate"])).is_err());
    }

    #[test]
    fn verbosity_mapping() {
        assert_eq!(level_filter(0), LevelFilter::Error);
        assert_eq!(level_filter(2), LevelFilter::Info);
        assert_eq!(level_filter(6), LevelFilter::Debug);
        assert_eq!(level_filter(9), LevelFilter::Trace);
    }
}
