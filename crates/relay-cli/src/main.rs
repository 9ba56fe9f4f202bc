//! gerrit-relay - Gerrit to GitHub change dispatcher
//!
//! ## Commands
//!
//! - `dispatch`: mirror new Gerrit patchsets as `changes/..` branches on the
//!   target repository and start CI workflows for them
//! - `report`: post a CI verdict back to Gerrit as a label vote
//!
//! Exit status is non-zero when any fetch, push or workflow trigger failed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use relay_core::github::DEFAULT_API_URL;
use relay_core::{
    render_run_summary_md, report_verdict, write_run_summary_json, ChangeQuery, DispatchConfig,
    DispatchRun, GerritClient, GerritConfig, GitCli, GithubConfig, GithubDispatcher, MaxAge,
    RepoLock, RunSummary, Verdict, WatermarkStore, DEFAULT_LABEL, DEFAULT_RETEST_PHRASE,
};
use relay_state::{GithubVariableStore, GithubVariablesConfig, DEFAULT_WATERMARK_VARIABLE};

#[derive(Parser)]
#[command(name = "gerrit-relay")]
#[command(version = relay_core::VERSION)]
#[command(about = "Mirror Gerrit changes to GitHub and dispatch CI workflows", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines on the console
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror new patchsets and trigger CI for them
    Dispatch(DispatchArgs),

    /// Vote on a Gerrit change with the result of a CI run
    Report(ReportArgs),
}

#[derive(Args)]
struct DispatchArgs {
    /// Gerrit REST API root, e.g. https://review.example.org/a
    #[arg(long)]
    gerrit_api_url: String,

    #[arg(long)]
    gerrit_username: Option<String>,

    #[arg(long, env = "GERRIT_PASSWORD", hide_env_values = true)]
    gerrit_password: Option<String>,

    /// Events-log plugin endpoint; enables retest requests
    #[arg(long)]
    gerrit_events_log_url: Option<String>,

    /// GitHub Actions variables collection URL used to keep the watermark
    #[arg(long)]
    gh_variables_url: Option<String>,

    #[arg(long, default_value = DEFAULT_API_URL)]
    github_api_url: String,

    /// Repository holding the workflows, owner/name
    #[arg(long, env = "GITHUB_REPOSITORY")]
    github_repository: String,

    #[arg(long, env = "GHPA_TOKEN", hide_env_values = true)]
    github_token: String,

    /// Local clone with both remotes configured
    #[arg(long, default_value = ".")]
    git_repository_path: PathBuf,

    #[arg(long, default_value = "gerrit")]
    git_remote_gerrit_name: String,

    #[arg(long, default_value = "target")]
    git_remote_target_name: String,

    /// Workflow file to dispatch (repeatable)
    #[arg(long = "workflow", required = true)]
    workflows: Vec<String>,

    /// Ref the workflows run on
    #[arg(long, default_value = "main")]
    dispatch_ref: String,

    #[arg(long)]
    project: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    /// Ignore changes not updated within this age (Gerrit syntax: 90m, 1d, 2w)
    #[arg(long, default_value = "1d")]
    max_age: String,

    /// Skip changes carrying this label vote (repeatable)
    #[arg(long = "exclude-label")]
    exclude_labels: Vec<String>,

    /// Skip changes whose message contains this text (repeatable)
    #[arg(long = "exclude-subject")]
    exclude_subjects: Vec<String>,

    /// Raw Gerrit query replacing the filters above
    #[arg(long)]
    query: Option<String>,

    /// Most changes read from Gerrit
    #[arg(long, default_value_t = relay_core::MAX_LIMIT)]
    query_limit: usize,

    /// Most branches pushed per run (1-500)
    #[arg(long, default_value_t = 5)]
    limit: usize,

    #[arg(long, default_value = DEFAULT_WATERMARK_VARIABLE)]
    watermark_variable: String,

    #[arg(long, default_value = DEFAULT_RETEST_PHRASE)]
    retest_phrase: String,

    /// Log file receiving every event as JSON
    #[arg(long, default_value = "./gc.log")]
    log: PathBuf,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    gerrit_api_url: String,

    #[arg(long)]
    gerrit_username: String,

    #[arg(long, env = "GERRIT_PASSWORD", hide_env_values = true)]
    gerrit_password: String,

    /// Mirror branch the CI run tested, changes/<shard>/<change>/<patchset>
    #[arg(long)]
    branch: String,

    /// pass or fail
    #[arg(long)]
    verdict: Verdict,

    #[arg(long, default_value = DEFAULT_LABEL)]
    label: String,

    /// CI run link, posted as the review message
    #[arg(long)]
    run_url: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    match cli.command {
        Commands::Dispatch(args) => {
            relay_core::init_tracing(cli.json, level, Some(&args.log))
                .with_context(|| format!("open log file {:?}", args.log))?;
            cmd_dispatch(args).await
        }
        Commands::Report(args) => {
            relay_core::init_tracing(cli.json, level, None)?;
            cmd_report(args).await
        }
    }
}

fn dispatch_config(args: &DispatchArgs) -> Result<DispatchConfig> {
    let mut query = ChangeQuery::new();
    if let Some(project) = &args.project {
        query = query.project(project);
    }
    if let Some(branch) = &args.branch {
        query = query.branch(branch);
    }
    for label in &args.exclude_labels {
        query = query.exclude_label(label);
    }
    for text in &args.exclude_subjects {
        query = query.exclude_subject(text);
    }
    if let Some(raw) = &args.query {
        query = query.raw(raw);
    }

    let config = DispatchConfig {
        gerrit_remote: args.git_remote_gerrit_name.clone(),
        target_remote: args.git_remote_target_name.clone(),
        workflows: args.workflows.clone(),
        dispatch_ref: args.dispatch_ref.clone(),
        query,
        max_age: Some(MaxAge::parse(&args.max_age)?),
        query_limit: args.query_limit,
        limit: args.limit,
        retest_phrase: args.retest_phrase.clone(),
    };
    config.validate()?;
    Ok(config)
}

fn gerrit_config(api_url: &str, username: Option<&str>, password: Option<&str>) -> GerritConfig {
    let config = GerritConfig::new(api_url);
    match (username, password) {
        (Some(user), Some(password)) => config.with_credentials(user, password),
        (Some(user), None) => config.with_credentials(user, ""),
        _ => config,
    }
}

/// Mirror new patchsets and dispatch CI
async fn cmd_dispatch(args: DispatchArgs) -> Result<ExitCode> {
    let config = dispatch_config(&args).context("invalid dispatch configuration")?;

    let mut gerrit = gerrit_config(
        &args.gerrit_api_url,
        args.gerrit_username.as_deref(),
        args.gerrit_password.as_deref(),
    );
    if let Some(url) = &args.gerrit_events_log_url {
        gerrit = gerrit.with_events_log(url);
    }
    let gerrit = Arc::new(GerritClient::new(gerrit)?);

    let workflows = Arc::new(GithubDispatcher::new(GithubConfig::new(
        &args.github_api_url,
        &args.github_repository,
        &args.github_token,
    ))?);

    let git = Arc::new(GitCli::new(&args.git_repository_path));
    let git_dir = git
        .git_dir()
        .await
        .with_context(|| format!("{:?} is not a git repository", args.git_repository_path))?;
    let _lock = RepoLock::acquire(&git_dir).context("another relay run holds the repository")?;

    let mut run = DispatchRun::new(config, gerrit.clone(), git, workflows);
    if let Some(url) = &args.gh_variables_url {
        let store = GithubVariableStore::new(GithubVariablesConfig::new(url, &args.github_token))?;
        run = run.with_watermark(WatermarkStore::new(
            Arc::new(store),
            args.watermark_variable.as_str(),
        ));
    }
    if args.gerrit_events_log_url.is_some() {
        run = run.with_events_log(gerrit);
    }

    let summary = run.execute().await.context("dispatch run failed")?;

    if let Some(path) = &args.summary {
        write_run_summary_json(path, &summary)?;
        info!(path = %path.display(), "run summary written");
    }
    if let Some(path) = std::env::var_os("GITHUB_STEP_SUMMARY") {
        append_step_summary(Path::new(&path), &summary)?;
    }

    print_counts(&summary);
    if summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_counts(summary: &RunSummary) {
    let c = &summary.counts;
    println!(
        "listed {} | pushed {} | skipped {} | deferred {} | failed {} | triggered {} | trigger failures {}",
        c.listed, c.pushed, c.skipped, c.deferred, c.failed, c.triggered, c.trigger_failed
    );
    for mirror in &summary.untriggered {
        println!("✗ {} pushed but not triggered", mirror);
    }
}

/// Append the markdown summary to the CI job page.
fn append_step_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {:?}", path))?;
    file.write_all(render_run_summary_md(summary).as_bytes())
        .with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Post a CI verdict to Gerrit
async fn cmd_report(args: ReportArgs) -> Result<ExitCode> {
    let gerrit = GerritClient::new(gerrit_config(
        &args.gerrit_api_url,
        Some(&args.gerrit_username),
        Some(&args.gerrit_password),
    ))?;

    let mirror = report_verdict(
        &gerrit,
        &args.branch,
        &args.label,
        args.verdict,
        &args.run_url,
    )
    .await
    .with_context(|| format!("report verdict for {}", args.branch))?;

    println!(
        "✓ {} {:+} on change {} patchset {}",
        args.label,
        args.verdict.vote(),
        mirror.change_number(),
        mirror.patchset()
    );
    Ok(ExitCode::SUCCESS)
}
