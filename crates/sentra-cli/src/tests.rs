use super::*;

#[test]
fn parses_db_ping_command() {
    let cli = Cli::try_parse_from(["sentra-cli", "db", "ping"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn parses_db_migrate_command() {
    let cli =
        Cli::try_parse_from(["sentra-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["sentra-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn run_defaults_date_to_none() {
    let cli = Cli::try_parse_from(["sentra-cli", "run", "--report-type", "premarket"])
        .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            report_type: ReportType::Premarket,
            date: None
        })
    ));
}

#[test]
fn run_parses_explicit_date() {
    let cli = Cli::try_parse_from([
        "sentra-cli",
        "run",
        "--report-type",
        "end_of_day",
        "--date",
        "2026-03-02",
    ])
    .expect("expected valid cli args");
    let expected = NaiveDate::from_ymd_opt(2026, 3, 2);
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            report_type: ReportType::EndOfDay,
            date,
        }) if date == expected
    ));
}

#[test]
fn run_rejects_unknown_report_type() {
    let result = Cli::try_parse_from(["sentra-cli", "run", "--report-type", "overnight"]);
    assert!(result.is_err());
}

#[test]
fn status_requires_report_type() {
    let result = Cli::try_parse_from(["sentra-cli", "status", "--date", "2026-03-02"]);
    assert!(result.is_err());
}

#[test]
fn runs_limit_defaults_to_twenty() {
    let cli = Cli::try_parse_from(["sentra-cli", "runs"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Runs { limit: 20 })));
}

#[test]
fn stages_parses_run_id() {
    let run_id = Uuid::new_v4();
    let raw = run_id.to_string();
    let cli = Cli::try_parse_from(["sentra-cli", "stages", raw.as_str()])
        .expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Stages { run_id: parsed }) if parsed == run_id));
}

#[test]
fn parses_sweep_command() {
    let cli = Cli::try_parse_from(["sentra-cli", "sweep"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Sweep)));
}
