//! CLI argument parsing (§6 "CLI surface"): `<program> [options] <mainclass>
//! [args...]`. Kept as a small hand-rolled parser in the teacher's own style
//! (`java/src/main.rs`'s `ManualOpts`) rather than pulling in an argument
//! parsing crate the teacher's dependency table doesn't carry.

use std::env;
use std::fmt;

use crate::vm::LaunchConfig;

#[derive(Debug)]
pub struct ParsedArgs {
    pub config: LaunchConfig,
    pub main_class: String,
    pub program_args: Vec<String>,
}

#[derive(Debug)]
pub struct ArgsError(pub String);

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgsError {}

/// Parses `argv` (excluding the program name) per §6. `-cp`/`-classpath`/
/// `--class-path` each take the following argument as a colon-separated
/// path list; `--` ends option parsing so a main class name that happens to
/// start with `-` can still be passed. The first non-option argument is the
/// main class; everything after it is forwarded verbatim as program args.
pub fn parse(argv: impl Iterator<Item = String>) -> Result<ParsedArgs, ArgsError> {
    let mut classpath_parts: Vec<String> = Vec::new();
    let mut native_libraries: Vec<String> = Vec::new();
    let mut main_class: Option<String> = None;
    let mut program_args: Vec<String> = Vec::new();
    let mut end_of_options = false;

    let mut args = argv.peekable();
    while let Some(arg) = args.next() {
        if main_class.is_some() {
            program_args.push(arg);
            continue;
        }

        if !end_of_options && arg == "--" {
            end_of_options = true;
            continue;
        }

        if !end_of_options && matches!(arg.as_str(), "-cp" | "-classpath" | "--class-path") {
            let value = args
                .next()
                .ok_or_else(|| ArgsError(format!("{} requires a path-list argument", arg)))?;
            classpath_parts.push(value);
            continue;
        }

        if !end_of_options && arg == "--lib" {
            let value = args
                .next()
                .ok_or_else(|| ArgsError("--lib requires a directory argument".to_string()))?;
            native_libraries.push(value);
            continue;
        }

        if !end_of_options && arg.starts_with('-') && arg != "-" {
            return Err(ArgsError(format!("unrecognized option: {}", arg)));
        }

        main_class = Some(arg);
    }

    let main_class = main_class.ok_or_else(|| ArgsError("no main class given".to_string()))?;

    let mut config = LaunchConfig::default();
    if !classpath_parts.is_empty() {
        config.classpath = classpath_parts.join(":");
    }
    config.native_libraries = native_libraries;

    Ok(ParsedArgs {
        config,
        main_class: main_class.replace('.', "/"),
        program_args,
    })
}

/// Convenience wrapper over [`parse`] reading straight from `std::env::args`.
pub fn parse_env() -> Result<ParsedArgs, ArgsError> {
    parse(env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(args: &[&str]) -> ParsedArgs {
        parse(args.iter().map(|s| s.to_string())).unwrap()
    }

    #[test]
    fn plain_main_class() {
        let parsed = a(&["Main"]);
        assert_eq!(parsed.main_class, "Main");
        assert!(parsed.program_args.is_empty());
    }

    #[test]
    fn classpath_flag_forms() {
        for flag in ["-cp", "-classpath", "--class-path"] {
            let parsed = a(&[flag, "a.jar:b", "Main"]);
            assert_eq!(parsed.config.classpath, "a.jar:b");
        }
    }

    #[test]
    fn dotted_class_name_becomes_internal_name() {
        let parsed = a(&["com.example.Main"]);
        assert_eq!(parsed.main_class, "com/example/Main");
    }

    #[test]
    fn program_args_pass_through() {
        let parsed = a(&["-cp", "out", "Main", "one", "two"]);
        assert_eq!(parsed.main_class, "Main");
        assert_eq!(parsed.program_args, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn end_of_options_lets_dash_prefixed_main_class_through() {
        let parsed = a(&["--", "-WeirdClassName"]);
        assert_eq!(parsed.main_class, "-WeirdClassName");
    }

    #[test]
    fn missing_main_class_is_an_error() {
        assert!(parse(["-cp", "out"].iter().map(|s| s.to_string())).is_err());
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(parse(["--bogus", "Main"].iter().map(|s| s.to_string())).is_err());
    }
}
