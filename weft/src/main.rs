use clap::{crate_description, crate_name, crate_version, App, Arg};
use compiler::Command;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::io::Write;
use std::{fs, process, str::FromStr};

fn main() {
    let matches = App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("files")
                .required(true)
                .multiple_values(true)
                .help("weft source files to compile"),
        )
        .arg(
            Arg::new("globals")
                .short('g')
                .long("globals")
                .takes_value(false)
                .help("Print every global with its inferred type"),
        )
        .arg(
            Arg::new("stop-after-parse")
                .long("stop-after-parse")
                .takes_value(false)
                .help("Print the surface tree and stop before resolution"),
        )
        .arg(
            Arg::new("stop-after-type-check")
                .long("stop-after-type-check")
                .takes_value(false)
                .help("Print the resolved tree and stop before anything else"),
        )
        .arg(
            Arg::new("no-prelude")
                .long("no-prelude")
                .takes_value(false)
                .help("Compile without the built-in prelude"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .takes_value(true)
                .possible_values(["off", "error", "warn", "info", "debug", "trace"])
                .default_value("error"),
        )
        .get_matches();

    let loglevel = LevelFilter::from_str(
        matches.value_of("loglevel").expect("loglevel has a default"),
    )
    .expect("loglevel values are fixed");
    let _ = TermLogger::init(
        loglevel,
        ConfigBuilder::new()
            .set_time_level(LevelFilter::Off)
            .set_thread_level(LevelFilter::Off)
            .set_target_level(LevelFilter::Off)
            .build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let command = if matches.is_present("stop-after-parse") {
        Command::PrintAst
    } else if matches.is_present("stop-after-type-check") {
        Command::PrintTypedAst
    } else if matches.is_present("globals") {
        Command::Globals
    } else {
        Command::Check
    };
    let use_prelude = !matches.is_present("no-prelude");

    let mut files = Vec::new();
    for name in matches.values_of("files").expect("files are required") {
        match fs::read_to_string(name) {
            Ok(src) => files.push((name.to_string(), src)),
            Err(e) => {
                eprintln!("{name}: {e}");
                process::exit(1);
            }
        }
    }

    let out = compiler::run(files, command, use_prelude);
    print!("{}", out.stdout);
    let _ = std::io::stderr().write_all(out.diagnostics.as_bytes());
    if !out.ok {
        eprintln!(">>> Aborting without execution <<<");
        process::exit(1);
    }
}
