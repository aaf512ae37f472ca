// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result, bail};
use config::Config;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tabula_app::{TableController, shell_channel};
use tabula_tui::{Shell, WorkerRuntime};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `tabula --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;
    logging::init(config.log_level()?, &config.log_path()?)?;

    let session = runtime::open_session(&config, options.demo)?;
    tracing::info!(
        source = %session.source,
        tables = session.schemas.len(),
        "session opened"
    );

    if options.check_only {
        let report = runtime::check_tables(
            session.backend.as_ref(),
            &session.schemas,
            config.page_size(),
            config.cache_pages(),
        );
        println!("{}", session.source);
        for check in &report {
            println!("  {}", check.summary());
            for warning in &check.warnings {
                println!("       warning: {warning}");
            }
        }
        let failed = report.iter().filter(|check| check.error.is_some()).count();
        if failed > 0 {
            bail!("{failed} of {} tables failed to load", report.len());
        }
        return Ok(());
    }

    let controllers = session
        .schemas
        .into_iter()
        .map(|schema| {
            TableController::with_options(schema, config.page_size(), config.cache_pages())
        })
        .collect();
    let mut shell = Shell::new(controllers);
    let mut runtime = WorkerRuntime::new(Arc::clone(&session.backend));
    // The handle keeps the command channel open for the whole session.
    let (_signals, commands) = shell_channel();
    tabula_tui::run_app(&mut shell, &mut runtime, &commands)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow::anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("tabula: browse and edit database tables in the terminal");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --demo                   Launch with seeded demo data (in-memory)");
    println!("  --check                  Load every configured table once and report");
    println!("  --help                   Show this help");
}

#[cfg(test)]
mod tests {
    use super::{CliOptions, parse_cli_args};
    use anyhow::Result;
    use std::path::PathBuf;

    fn fallback() -> PathBuf {
        PathBuf::from("/tmp/tabula-config.toml")
    }

    fn parse(args: &[&str]) -> Result<CliOptions> {
        parse_cli_args(args.iter().copied(), fallback())
    }

    #[test]
    fn no_arguments_launch_with_the_resolved_config() -> Result<()> {
        let options = parse(&[])?;
        assert_eq!(
            options,
            CliOptions {
                config_path: fallback(),
                print_config_path: false,
                demo: false,
                print_example: false,
                check_only: false,
                show_help: false,
            }
        );
        Ok(())
    }

    #[test]
    fn last_config_flag_wins() -> Result<()> {
        let options = parse(&["--config", "/etc/tabula.toml", "--config", "./local.toml"])?;
        assert_eq!(options.config_path, PathBuf::from("./local.toml"));
        Ok(())
    }

    #[test]
    fn config_flag_needs_a_value() {
        let error = parse(&["--demo", "--config"]).expect_err("dangling --config should fail");
        assert!(error.to_string().contains("--config requires a file path"));
    }

    #[test]
    fn unknown_flags_point_at_help() {
        for flag in ["--print-path", "-v", "demo"] {
            let error = parse(&[flag]).expect_err("unknown flag should fail");
            let message = error.to_string();
            assert!(message.contains(&format!("{flag:?}")), "unexpected message: {message}");
            assert!(message.contains("--help"));
        }
    }

    #[test]
    fn demo_check_combination_is_accepted() -> Result<()> {
        let options = parse(&["--demo", "--check"])?;
        assert!(options.demo);
        assert!(options.check_only);
        assert!(!options.print_example);
        assert!(!options.print_config_path);
        Ok(())
    }

    #[test]
    fn print_flags_and_help_variants() -> Result<()> {
        let options = parse(&["--print-config-path", "--print-example-config"])?;
        assert!(options.print_config_path);
        assert!(options.print_example);
        assert!(!options.show_help);

        assert!(parse(&["--help"])?.show_help);
        assert!(parse(&["-h"])?.show_help);
        Ok(())
    }
}
