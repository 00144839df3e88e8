use anyhow::bail;
use dimjoin_rs::config::{
    ConfigOverrides, GeneratorOverrides, JoinOverrides, PathOverrides, PipelineConfig,
};
use dimjoin_rs::{io, summarize_categories, Pipeline, PipelineError};
use tracing::warn;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"dimjoin - Temporal dimension dedup and point-in-time transaction join

USAGE:
    dimjoin <COMMAND> [OPTIONS]

COMMANDS:
    generate                Write synthetic users, transactions and agreements
    dedup                   Compact the agreement dimension
    join                    Enrich transactions with user flags and agreement terms
    summary                 Join, then write only the per-category summary

OPTIONS:
    -c, --config <FILE>         Path to config file (TOML)
        --agreements <FILE>     Agreement dimension CSV
        --users <FILE>          Users CSV
        --transactions <FILE>   Transactions CSV
    -o, --output <FILE>         Output CSV
        --partitions <N>        Group-key shards resolved in parallel [default: 1]
        --no-window             Skip the rolling transaction count
        --overwrite             Replace output files that already exist
        --seed <N>              Generator seed [default: 42]
    -h, --help                  Print help

ENVIRONMENT:
    DIMJOIN_CONFIG              Path to config file
    DIMJOIN_<SECTION>__<KEY>    Any config key, e.g. DIMJOIN_JOIN__PARTITIONS=4
    RUST_LOG                    Log filter [default: info]

CONFIG FILE (dimjoin.toml):
    [schema]
    end_dates = "inclusive"     # or "exclusive"

    [join]
    partitions = 4
"#
    );
}

fn report_failures(failures: &[PipelineError]) {
    for failure in failures {
        warn!(error = %failure, "Record skipped");
    }
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Some(command) = std::env::args().nth(1) else {
        print_help();
        bail!("missing command");
    };

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut path_overrides = PathOverrides::default();
    let mut join_overrides = JoinOverrides::default();

    path_overrides.agreements = parse_arg("--agreements").map(Into::into);
    path_overrides.users = parse_arg("--users").map(Into::into);
    path_overrides.transactions = parse_arg("--transactions").map(Into::into);
    path_overrides.output = parse_arg("--output")
        .or_else(|| parse_arg("-o"))
        .map(Into::into);
    if has_flag("--overwrite") {
        path_overrides.overwrite = Some(true);
    }
    if let Some(partitions) = parse_arg("--partitions") {
        join_overrides.partitions = Some(partitions.parse()?);
    }
    if has_flag("--no-window") {
        join_overrides.rolling_window = Some(false);
    }
    if let Some(seed) = parse_arg("--seed") {
        overrides.generator = Some(GeneratorOverrides {
            seed: Some(seed.parse()?),
        });
    }

    if path_overrides.agreements.is_some()
        || path_overrides.users.is_some()
        || path_overrides.transactions.is_some()
        || path_overrides.output.is_some()
        || path_overrides.overwrite.is_some()
    {
        overrides.paths = Some(path_overrides);
    }
    if join_overrides.partitions.is_some() || join_overrides.rolling_window.is_some() {
        overrides.join = Some(join_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("DIMJOIN_CONFIG").ok());
    let mut config = PipelineConfig::load(config_path.as_deref(), overrides)?;

    match command.as_str() {
        "generate" => {
            let dataset = Pipeline::new(config).generate_files()?;
            println!(
                "Generated {} users, {} transactions, {} agreement versions",
                dataset.users.len(),
                dataset.transactions.len(),
                dataset.agreements.len()
            );
        }
        "dedup" => {
            if let Some(output) = parse_arg("--output").or_else(|| parse_arg("-o")) {
                config.paths.dedup_output = output.into();
            }
            let (outcome, skipped) = Pipeline::new(config).dedup_file()?;
            report_failures(&skipped);
            report_failures(&outcome.failures);
            println!(
                "Compacted {} versions into {} ({} removed, {} entities rejected)",
                outcome.stats.input_records,
                outcome.stats.output_records,
                outcome.stats.removed(),
                outcome.stats.rejected_entities
            );
        }
        "join" => {
            let report = Pipeline::new(config).run_files()?;
            report_failures(&report.failures);
            println!(
                "Enriched {} transactions ({} matched, {} unmatched, {} skipped)",
                report.join.stats.emitted,
                report.join.stats.matched,
                report.join.stats.unmatched,
                report.failures.len()
            );
        }
        "summary" => {
            if let Some(output) = parse_arg("--output").or_else(|| parse_arg("-o")) {
                config.paths.summary_output = output.into();
            }
            let pipeline = Pipeline::new(config);
            let paths = &pipeline.config().paths;
            let records = io::read_interval_records(&paths.agreements, &pipeline.config().schema)?;
            let users = io::read_active_users(&paths.users)?;
            let transactions = io::open_transactions(&paths.transactions)?;
            let report = pipeline.run(records.value, &users.value, transactions)?;
            report_failures(&records.failures);
            report_failures(&users.failures);
            report_failures(&report.failures);

            let summary = summarize_categories(&report.join.rows);
            io::write_category_summary(
                io::create_output(&paths.summary_output, paths.overwrite)?,
                &summary,
            )?;
            for row in &summary {
                println!(
                    "category {:>3}  sum {:>8}  users {:>5}",
                    row.category_id, row.total_amount, row.distinct_users
                );
            }
        }
        other => {
            print_help();
            bail!("unknown command `{other}`");
        }
    }

    Ok(())
}
