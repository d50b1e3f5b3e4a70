//! The CLI front-end (§6 "CLI surface"). Deliberately thin: parse `argv`,
//! initialize logging, bootstrap a [`javacore::vm::Vm`], hand it the main
//! class and program args, and translate the result into a process exit
//! code. All of the actual engineering lives in the library crate.

mod args;

use std::process::ExitCode;

fn main() -> ExitCode {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_env("RUST_LOG")
        .init();

    let parsed = match args::parse_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("javacore: {}", err);
            eprintln!("usage: javacore [-cp <path-list>] <mainclass> [args...]");
            return ExitCode::from(2);
        }
    };

    log::info!("launching {} with classpath {:?}", parsed.main_class, parsed.config.classpath);

    let vm = match javacore::vm::Vm::bootstrap(&parsed.config) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("javacore: failed to start: {}", err);
            return ExitCode::from(1);
        }
    };

    let status = vm.run_main(&parsed.main_class, &parsed.program_args);
    ExitCode::from(status as u8)
}
