use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ksr_relocate::{ArchiveRelocator, LogLevel, RelocationConfig};
use ksr_rules::RuleSet;

#[derive(Parser, Debug)]
#[command(name = "ksr")]
#[command(about = "Relocate namespaces inside jars, Kotlin metadata included", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rewrite the archive in place
    Relocate {
        /// Jar to relocate
        archive: PathBuf,
        #[command(flatten)]
        rules: RuleArgs,
        /// Leave string constants alone even when they look like type names
        #[arg(long)]
        no_string_literals: bool,
    },
    /// Validate relocation rules without touching any archive
    Check {
        #[command(flatten)]
        rules: RuleArgs,
    },
}

#[derive(Args, Debug)]
struct RuleArgs {
    /// TOML file with `[[relocate]]` tables
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Relocation as FROM=TO; repeatable, applied after the config file
    #[arg(short = 'r', long = "relocate", value_name = "FROM=TO", value_parser = parse_relocation)]
    relocations: Vec<(String, String)>,
    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<LogLevel>,
}

fn parse_relocation(value: &str) -> Result<(String, String), String> {
    let (from, to) = value
        .split_once('=')
        .ok_or_else(|| format!("expected FROM=TO, got '{value}'"))?;
    Ok((from.trim().to_string(), to.trim().to_string()))
}

fn main() {
    if let Err(error) = real_main() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Relocate {
            archive,
            rules,
            no_string_literals,
        } => {
            let config = load_config(&rules)?;
            init_tracing(config.log_level);
            relocate(&archive, &config, no_string_literals)
        }
        Commands::Check { rules } => {
            let config = load_config(&rules)?;
            init_tracing(config.log_level);
            let rules = build_rules(&config)?;
            for rule in rules.iter() {
                println!("{} -> {}", rule.source_package(), rule.dest_package());
            }
            Ok(())
        }
    }
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(level))
        .with_writer(std::io::stderr)
        .init();
}

/// Config file first, then command line flags on top of it.
fn load_config(args: &RuleArgs) -> Result<RelocationConfig> {
    let mut config = match &args.config {
        Some(path) => RelocationConfig::load(path)?,
        None => RelocationConfig::default(),
    };
    for (from, to) in &args.relocations {
        config.push(from, to);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    Ok(config)
}

fn build_rules(config: &RelocationConfig) -> Result<RuleSet> {
    let rules = config.rule_set().context("invalid relocation rules")?;
    if rules.is_empty() {
        bail!("no relocation rules given; pass --relocate FROM=TO or a --config file");
    }
    Ok(rules)
}

fn relocate(archive: &Path, config: &RelocationConfig, no_string_literals: bool) -> Result<()> {
    let rules = build_rules(config)?;
    let mut options = config.options();
    if no_string_literals {
        options.string_literals = false;
    }

    let report = ArchiveRelocator::new(&rules, options)
        .relocate(archive)
        .with_context(|| format!("failed to relocate {}", archive.display()))?;
    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_relocations() {
        let cli = Cli::try_parse_from([
            "ksr",
            "relocate",
            "app.jar",
            "-r",
            "com.foo=shadow.com.foo",
            "--relocate",
            "org/bar/ = shadow/org/bar/",
            "--log-level",
            "DEBUG",
            "--no-string-literals",
        ])
        .unwrap();

        let Commands::Relocate {
            archive,
            rules,
            no_string_literals,
        } = cli.command
        else {
            panic!("expected relocate");
        };
        assert_eq!(archive, PathBuf::from("app.jar"));
        assert!(no_string_literals);
        assert_eq!(rules.log_level, Some(LogLevel::Debug));
        assert_eq!(
            rules.relocations,
            vec![
                ("com.foo".to_string(), "shadow.com.foo".to_string()),
                ("org/bar/".to_string(), "shadow/org/bar/".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_relocation_flags() {
        assert!(Cli::try_parse_from(["ksr", "check", "-r", "com.foo"]).is_err());
        assert!(Cli::try_parse_from(["ksr", "check", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn flags_extend_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ksr.toml");
        fs::write(
            &path,
            "log_level = \"warn\"\n[[relocate]]\npattern = \"com.foo\"\ndestination = \"shadow.com.foo\"\n",
        )
        .unwrap();

        let args = RuleArgs {
            config: Some(path),
            relocations: vec![("org.bar".into(), "shadow.org.bar".into())],
            log_level: None,
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
        let rules = build_rules(&config).unwrap();
        let sources: Vec<_> = rules.iter().map(|rule| rule.source_package()).collect();
        assert_eq!(sources, ["com.foo", "org.bar"]);
    }

    #[test]
    fn empty_or_conflicting_rules_are_errors() {
        assert!(build_rules(&RelocationConfig::default()).is_err());

        let mut config = RelocationConfig::default();
        config.push("a/b/", "x/");
        config.push("a/b/c/", "y/");
        let error = build_rules(&config).unwrap_err();
        assert!(error.to_string().contains("invalid relocation rules"));
    }
}
