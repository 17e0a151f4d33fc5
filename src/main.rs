use clap::{Arg, ArgAction, Command, builder::PossibleValuesParser};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rootwalk::config::ResolverConfig;
use rootwalk::dns::enums::DNSResourceType;
use rootwalk::dnssec::{DnsSecValidator, DnssecOutcome, SecureResolver, TrustAnchorStore};
use rootwalk::error::ConfigError;
use rootwalk::output::{QueryStats, render_answer, render_secure};
use rootwalk::resolver::IterativeResolver;

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn cli() -> Command {
    Command::new("resolve")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Iterative DNS resolver with optional DNSSEC chain-of-trust validation")
        .arg(
            Arg::new("hostname")
                .value_name("HOSTNAME")
                .help("Name to resolve")
                .required(true),
        )
        .arg(
            Arg::new("type")
                .value_name("TYPE")
                .help("Record type")
                .required(true)
                .ignore_case(true)
                .value_parser(PossibleValuesParser::new(["A", "NS", "MX"])),
        )
        .arg(
            Arg::new("dnssec")
                .value_name("+dnssec")
                .help("Validate the answer with DNSSEC (A and NS only)")
                .value_parser(PossibleValuesParser::new(["+dnssec"])),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .value_name("MILLIS")
                .help("Per-query timeout, plain and DNSSEC lookups alike")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("NUMBER")
                .help("Seed for the name server tie-break")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More log output on stderr (repeatable)")
                .action(ArgAction::Count),
        )
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load_config(matches: &clap::ArgMatches) -> Result<ResolverConfig, ConfigError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ResolverConfig::from_file(path)?,
        None => ResolverConfig::default(),
    }
    .with_env_overrides()?;

    if let Some(ms) = matches.get_one::<u64>("timeout-ms") {
        config.hop_timeout = Duration::from_millis(*ms);
        config.dnssec_timeout = config.hop_timeout;
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.rng_seed = Some(*seed);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(matches.get_count("verbose"));

    let hostname = matches
        .get_one::<String>("hostname")
        .cloned()
        .unwrap_or_default();
    let qtype = matches
        .get_one::<String>("type")
        .and_then(|t| DNSResourceType::from_str(t).ok())
        .unwrap_or(DNSResourceType::A);
    let dnssec = matches.contains_id("dnssec");

    if dnssec && !matches!(qtype, DNSResourceType::A | DNSResourceType::NS) {
        eprintln!("+dnssec supports only A and NS queries");
        return ExitCode::from(EXIT_USAGE);
    }

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    debug!("Using {} root servers", config.root_servers.len());

    let resolver = Arc::new(IterativeResolver::with_udp(config));
    let start = Instant::now();

    if dnssec {
        let validator = DnsSecValidator::new(Arc::new(TrustAnchorStore::new()));
        let secure = SecureResolver::new(resolver, validator);
        match secure.resolve(&hostname, qtype).await {
            Ok(resolution) => {
                let stats = QueryStats::new(start.elapsed());
                print!("{}", render_secure(&resolution, &stats));
                match resolution.outcome {
                    DnssecOutcome::VerifyFail { .. } => ExitCode::from(EXIT_FAILED),
                    outcome if !outcome.query().is_answered() => ExitCode::from(EXIT_FAILED),
                    _ => ExitCode::SUCCESS,
                }
            }
            Err(e) => {
                error!("{}", e);
                eprintln!("{}", e);
                ExitCode::from(EXIT_FAILED)
            }
        }
    } else {
        match resolver.resolve(&hostname, qtype).await {
            Ok(query) => {
                let stats = QueryStats::new(start.elapsed());
                print!("{}", render_answer(&query, &stats));
                if query.is_answered() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(EXIT_FAILED)
                }
            }
            Err(e) => {
                error!("{}", e);
                eprintln!("{}", e);
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}
