use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use github::{ALL_AFFILIATIONS, Affiliation, GithubClient, RemoteSource};

mod archive;
mod cache;
mod config;
mod github;
mod loc;
mod svg;
mod utils;

const OWNER_ONLY: [Affiliation; 1] = [Affiliation::Owner];

#[derive(Parser)]
#[command(name = "octocard")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Discard the LOC cache and recompute every repository from scratch
    #[arg(long)]
    force_rebuild: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Output the aggregated totals as JSON instead of rewriting the SVGs
    Stats(StatsArgs),
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct StatsArgs {
    /// Pretty-print JSON instead of a single line
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (username, token, birthday, cache-dir, header-size, archive)
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Everything one run produces, shared by the card renderer and `stats`.
#[derive(Debug, Serialize)]
struct RunTotals {
    lines_added: u64,
    lines_deleted: u64,
    net_loc: i64,
    cache_hit: bool,
    authored_commits: u64,
    stars: u64,
    owned_repos: u64,
    contributed_repos: u64,
    followers: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        None => {
            if let Err(e) = run_card(cli.force_rebuild).await {
                eprintln!("Error generating card: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Stats(args)) => {
            if let Err(e) = run_stats(args, cli.force_rebuild).await {
                eprintln!("Error generating JSON stats: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Config(config_args)) => {
            handle_config_subcommand(config_args);
        }
    }
}

fn load_required_config() -> Result<config::Config> {
    match config::Config::load()? {
        Some(config) if config.is_configured() => Ok(config),
        Some(_) => anyhow::bail!(
            "Configuration incomplete: set a username with 'octocard config set username ...'"
        ),
        None => anyhow::bail!("No configuration found. Run 'octocard config init' first."),
    }
}

async fn timed<T>(fut: impl Future<Output = T>) -> (T, Duration) {
    let start = Instant::now();
    (fut.await, start.elapsed())
}

/// Aggregate LOC, commit, and profile metrics for the configured account,
/// folding in the static archive when one exists.
async fn collect_totals(
    client: &GithubClient,
    config: &config::Config,
    force_rebuild: bool,
    timings: &mut Vec<(String, Duration)>,
) -> Result<RunTotals> {
    let username = &config.github.username;

    let (author, t_author) = timed(client.resolve_author(username)).await;
    let author = author.context("failed to resolve account identity")?;
    timings.push(("account data".to_string(), t_author));

    let store = cache::CacheStore::new(
        &config.cache.directory,
        username,
        config.cache.header_size,
    );
    let (agg, t_loc) = timed(loc::aggregate(
        client,
        &store,
        username,
        &author,
        &ALL_AFFILIATIONS,
        force_rebuild,
    ))
    .await;
    let agg = agg?;
    let loc_label = if agg.cache_hit {
        "LOC (cached)"
    } else {
        "LOC (no cache)"
    };
    timings.push((loc_label.to_string(), t_loc));

    let (commits, t_commits) = timed(async { loc::authored_commit_total(&store) }).await;
    let authored_commits = commits?;
    timings.push(("commit counter".to_string(), t_commits));

    let (stars, t_stars) = timed(client.star_count(username, &OWNER_ONLY)).await;
    let stars = stars.context("failed to count stars")?;
    timings.push(("star counter".to_string(), t_stars));

    let (owned, t_owned) = timed(client.repo_count(username, &OWNER_ONLY)).await;
    let owned_repos = owned.context("failed to count owned repositories")?;
    timings.push(("my repositories".to_string(), t_owned));

    let (contributed, t_contributed) =
        timed(client.repo_count(username, &ALL_AFFILIATIONS)).await;
    let contributed_repos = contributed.context("failed to count contributed repositories")?;
    timings.push(("contributed repos".to_string(), t_contributed));

    let (followers, t_followers) = timed(client.follower_count(username)).await;
    let followers = followers.context("failed to count followers")?;
    timings.push(("follower counter".to_string(), t_followers));

    let mut totals = RunTotals {
        lines_added: agg.lines_added,
        lines_deleted: agg.lines_deleted,
        net_loc: agg.net_loc,
        cache_hit: agg.cache_hit,
        authored_commits,
        stars,
        owned_repos,
        contributed_repos,
        followers,
    };

    if let Some(archive_path) = &config.cache.archive {
        if let Some(archived) = archive::read_archive(archive_path)? {
            merge_archive(&mut totals, &archived);
        }
    }

    Ok(totals)
}

/// Fold the static archive into the live totals. Purely additive; the
/// archive is never recomputed.
fn merge_archive(totals: &mut RunTotals, archived: &archive::ArchiveTotals) {
    totals.lines_added += archived.lines_added;
    totals.lines_deleted += archived.lines_deleted;
    totals.net_loc += archived.net_loc;
    totals.authored_commits += archived.authored_commits;
    totals.contributed_repos += archived.repos;
}

async fn run_card(force_rebuild: bool) -> Result<()> {
    let config = load_required_config()?;
    let token = config.resolve_token()?;
    let client = GithubClient::new(token)?;

    println!("Calculation times:");

    let run_start = Instant::now();
    let mut timings = Vec::new();
    let totals = collect_totals(&client, &config, force_rebuild, &mut timings).await?;

    let age = config
        .card
        .birthday
        .map(|birthday| utils::format_age(birthday, chrono::Local::now().date_naive()));

    for (label, elapsed) in &timings {
        println!("{}", utils::format_elapsed(label, *elapsed));
    }
    println!(
        "{}",
        utils::format_elapsed("total", run_start.elapsed())
    );

    let card = svg::CardData {
        age,
        commits: totals.authored_commits,
        stars: totals.stars,
        repos: totals.owned_repos,
        contributed: totals.contributed_repos,
        followers: totals.followers,
        loc_added: totals.lines_added,
        loc_deleted: totals.lines_deleted,
        loc_net: totals.net_loc,
    };
    for template in &config.card.templates {
        svg::render_card(template, &card)
            .with_context(|| format!("failed to render {}", template.display()))?;
    }

    let counters = client.counters();
    println!(
        "\nTotal GitHub GraphQL API calls: {:>3}",
        counters.total()
    );
    for (name, count) in counters.snapshot() {
        println!("{:<28}{:>6}", format!("   {name}:"), count);
    }

    Ok(())
}

async fn run_stats(args: StatsArgs, force_rebuild: bool) -> Result<()> {
    let config = load_required_config()?;
    let token = config.resolve_token()?;
    let client = GithubClient::new(token)?;

    let mut timings = Vec::new();
    let totals = collect_totals(&client, &config, force_rebuild, &mut timings).await?;

    if args.pretty {
        let json = simd_json::to_string_pretty(&totals)?;
        println!("{json}");
    } else {
        let json = simd_json::to_string(&totals)?;
        println!("{json}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_totals_fold_into_the_run() {
        let mut totals = RunTotals {
            lines_added: 40,
            lines_deleted: 10,
            net_loc: 30,
            cache_hit: false,
            authored_commits: 3,
            stars: 12,
            owned_repos: 4,
            contributed_repos: 2,
            followers: 8,
        };
        let archived = archive::ArchiveTotals {
            lines_added: 100,
            lines_deleted: 20,
            net_loc: 80,
            authored_commits: 7,
            repos: 3,
        };

        merge_archive(&mut totals, &archived);

        assert_eq!(totals.lines_added, 140);
        assert_eq!(totals.lines_deleted, 30);
        assert_eq!(totals.net_loc, 110);
        assert_eq!(totals.authored_commits, 10);
        assert_eq!(totals.contributed_repos, 5);
        // Live-only figures stay untouched.
        assert_eq!(totals.stars, 12);
        assert_eq!(totals.owned_repos, 4);
        assert_eq!(totals.followers, 8);
        assert!(!totals.cache_hit);
    }
}

fn handle_config_subcommand(config_args: ConfigArgs) {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            if let Err(e) = config::create_default_config(overwrite) {
                eprintln!("Error creating config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Show => {
            if let Err(e) = config::show_config() {
                eprintln!("Error showing config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Set { key, value } => {
            if let Err(e) = config::set_config_value(&key, &value) {
                eprintln!("Error setting config: {e}");
                std::process::exit(1);
            }
        }
    }
}
