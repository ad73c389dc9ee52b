use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use is_terminal::IsTerminal;

mod context;
mod diff;
mod exact;
mod git;
mod lexer;
mod locate;
mod logging;
mod orchestrate;
mod patch;
mod reconcile;
mod relocate;
mod report;
mod settings;
mod text;

use context::{ClassifyContext, DriftPolicy};
use exact::ApplyOutcome;
use git::{ApplyAttempt, run_git_apply};
use logging::ResolutionLog;
use orchestrate::{HunkRecord, Orchestrator, SuccessfulCandidate};
use patch::PatchFile;
use relocate::TreeRelocator;
use report::{ApprovalDecision, CommandStats, Console, prompt_approval};
use settings::Settings;
use text::{EncodingStrategy, TargetText, WriteOptions, join_lines};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Apply(cmd) => handle_apply(cmd),
        Command::Inspect(cmd) => handle_inspect(cmd),
        Command::Log(cmd) => handle_log(cmd),
    }
}

fn handle_apply(cmd: ApplyCommand) -> Result<ExitCode> {
    let console = Console { json: cmd.json };
    let root = resolve_root(cmd.root.as_ref())?;
    let settings = cmd.tuning.settings()?;
    let strategy = EncodingStrategy::new(cmd.tuning.encoding.as_deref())?;
    let interactive = io::stdin().is_terminal() && !cmd.json;
    let dry_run = cmd.dry_run || (!cmd.auto_apply && !interactive);
    let log = ResolutionLog::default();

    let mut patch = PatchFile::load(&cmd.patch)?;
    if cmd.reverse {
        patch = patch.reversed();
    }
    let details = vec![
        format!("root: {}", root.display()),
        format!(
            "mode: {}{}",
            if dry_run { "dry-run" } else { "apply" },
            if cmd.auto_apply { " (auto-approve)" } else { "" }
        ),
        format!("encoding strategy: {}", strategy.describe()),
        format!("git apply: {}", if cmd.no_git { "disabled" } else { "enabled" }),
    ];
    report::print_header(&console, &patch, &details);
    if patch.hunks.is_empty() {
        console.say("no hunks found in patch.");
        return Ok(ExitCode::SUCCESS);
    }
    let list_hunks = cmd.show_hunks
        || (interactive
            && report::confirm(&format!("List the {} hunks? [y/N]: ", patch.hunks.len()))?);
    if list_hunks {
        report::print_hunks(&console, &patch.hunks);
    }

    patch.attempt = if cmd.no_git {
        ApplyAttempt::skipped()
    } else {
        match run_git_apply(&cmd.patch, &root, cmd.reverse, dry_run) {
            Ok(attempt) => attempt,
            Err(err) => {
                console.say(format!("git apply unavailable ({err:#}); reconciling every hunk"));
                ApplyAttempt::skipped()
            }
        }
    };

    let relocator = TreeRelocator::with_default_excludes(&root, strategy.clone())?;
    let policy = DriftPolicy {
        max_missing_context: settings.max_missing_context,
    };
    let orchestrator = Orchestrator::new(&root, &settings, &strategy, &relocator, &policy);
    let resolution = orchestrator.resolve(&patch);

    if resolution.applied_by_git {
        let _ = log.record(
            "apply",
            &patch.source,
            "*",
            "applied_by_git",
            if dry_run { "check passed" } else { "" },
        );
        console.event("applied_by_git", Default::default());
        report::print_resolution(&console, &resolution);
        return Ok(ExitCode::SUCCESS);
    }
    for record in &resolution.records {
        console.classification(record);
        log_record(&log, record);
    }

    let options = WriteOptions {
        backup: !cmd.no_backup,
        undo_dir: cmd.undo_log.clone(),
    };
    let mut stats = CommandStats::default();
    let mut apply_all = cmd.auto_apply;
    let mut unconfirmed = 0usize;

    for (idx, success) in resolution.successful.iter().enumerate() {
        let path = &success.candidate.path;
        console.say(format!(
            "--- {} ({}) ---",
            success.name,
            if success.rewritten {
                "context rewritten"
            } else {
                "applies as written"
            }
        ));
        for message in &success.messages {
            console.say(format!("  {message}"));
        }
        if let Some(preview) = preview_candidate(&root, success, &strategy)? {
            console.say(preview.trim_end());
        }

        if dry_run {
            stats.dry_run += 1;
            console.hunk_action("dry_run", &success.name, path, true);
            continue;
        }
        if !apply_all {
            match prompt_approval(&success.name)? {
                ApprovalDecision::Apply => {}
                ApprovalDecision::ApplyAll => apply_all = true,
                ApprovalDecision::Skip => {
                    stats.skipped += 1;
                    unconfirmed += 1;
                    console.hunk_action("skipped", &success.name, path, false);
                    let _ = log.record("apply", path, &success.name, "skipped", "declined");
                    continue;
                }
                ApprovalDecision::Quit => {
                    let remaining = resolution.successful.len() - idx;
                    stats.skipped += remaining;
                    unconfirmed += remaining;
                    console.say("aborting at user request.");
                    break;
                }
            }
        }

        let (outcome, receipt) = orchestrator.apply(success, &options)?;
        match outcome {
            ApplyOutcome::Applied => {
                stats.applied += 1;
                if let Some(receipt) = receipt {
                    if let Some(backup) = receipt.backup {
                        console.say(format!("  backup: {}", backup.display()));
                    }
                    if let Some(undo) = receipt.undo_patch {
                        console.say(format!("  undo patch: {}", undo.display()));
                    }
                }
                console.hunk_action("applied", &success.name, path, false);
                let _ = log.record("apply", path, &success.name, "applied", "");
            }
            ApplyOutcome::AlreadyPresent => {
                stats.no_op += 1;
                console.say("  already present, nothing written");
            }
            other => {
                stats.skipped += 1;
                unconfirmed += 1;
                console.say(format!("  no longer applies: {other:?}"));
                let _ = log.record(
                    "apply",
                    path,
                    &success.name,
                    "skipped",
                    &format!("{other:?}"),
                );
            }
        }
    }

    report::print_resolution(&console, &resolution);
    stats.print(&console, "apply");
    if resolution.fully_resolved() && unconfirmed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn handle_inspect(cmd: InspectCommand) -> Result<ExitCode> {
    let console = Console { json: cmd.json };
    let settings = cmd.tuning.settings()?;
    let strategy = EncodingStrategy::new(cmd.tuning.encoding.as_deref())?;
    let mut patch = PatchFile::load(&cmd.patch)?;
    if cmd.reverse {
        patch = patch.reversed();
    }
    let file = TargetText::read(&cmd.file, &strategy)?;
    let policy = DriftPolicy {
        max_missing_context: settings.max_missing_context,
    };

    if patch.hunks.is_empty() {
        console.say("no hunks found in patch.");
    }
    for hunk in &patch.hunks {
        let report = reconcile::reconcile(hunk, &file, &settings);
        report::print_report(&console, hunk, &report);
        if report.is_match() && !report.is_clean() {
            let decision = policy.classify(&report);
            console.say(format!("rewrite verdict: {:?}", decision.verdict));
            for message in &decision.messages {
                console.say(format!("  {message}"));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_log(cmd: LogCommand) -> Result<ExitCode> {
    let entries = ResolutionLog::default().tail(cmd.tail)?;
    if entries.is_empty() {
        println!("resolution log is empty.");
        return Ok(ExitCode::SUCCESS);
    }
    for entry in entries {
        println!(
            "[{}] {:<8} {:<16} {:<24} {}",
            entry.timestamp,
            entry.command,
            entry.action,
            entry.hunk,
            entry.path.display()
        );
        if !entry.detail.is_empty() {
            println!("    {}", entry.detail);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn log_record(log: &ResolutionLog, record: &HunkRecord) {
    let _ = log.record(
        "apply",
        &record.path,
        &record.name,
        record.outcome.as_str(),
        &record.detail,
    );
}

/// What applying `success` would change in its file right now, or `None` if it no longer
/// applies.
fn preview_candidate(
    root: &Path,
    success: &SuccessfulCandidate,
    strategy: &EncodingStrategy,
) -> Result<Option<String>> {
    let file = TargetText::read(&root.join(&success.candidate.path), strategy)?;
    let mut lines = file.lines.clone();
    if !exact::apply_to_lines(&success.candidate, &mut lines).is_applied() {
        return Ok(None);
    }
    let mut preview = String::new();
    if file.had_errors {
        preview.push_str(&format!(
            "warning: {} did not decode cleanly as {}\n",
            success.candidate.path.display(),
            file.encoding.name()
        ));
    }
    preview.push_str(&diff::render_preview(&file.joined(), &join_lines(&lines), 3));
    Ok(Some(preview))
}

fn resolve_root(root: Option<&PathBuf>) -> Result<PathBuf> {
    match root {
        Some(path) => {
            fs::canonicalize(path).with_context(|| format!("resolving root {}", path.display()))
        }
        None => std::env::current_dir().context("determining working directory"),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "patchmend",
    version,
    about = "Reconciles patches that no longer apply cleanly"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Apply(ApplyCommand),
    Inspect(InspectCommand),
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct TuningArgs {
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long = "retry-times", value_name = "N")]
    retry_times: Option<usize>,
    #[arg(long = "retry-interval", value_name = "N")]
    retry_interval: Option<usize>,
}

impl TuningArgs {
    /// Config file first, then command-line flags on top.
    fn settings(&self) -> Result<Settings> {
        let base = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        let settings = base.with_retry(self.retry_times, self.retry_interval);
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Args)]
struct ApplyCommand {
    #[arg(value_name = "PATCH", value_hint = ValueHint::FilePath)]
    patch: PathBuf,
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    reverse: bool,
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    auto_apply: bool,
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[arg(long = "no-backup", action = ArgAction::SetTrue)]
    no_backup: bool,
    #[arg(long = "undo-log", value_name = "DIR", value_hint = ValueHint::DirPath)]
    undo_log: Option<PathBuf>,
    #[arg(long = "no-git", action = ArgAction::SetTrue)]
    no_git: bool,
    #[arg(long = "show-hunks", action = ArgAction::SetTrue)]
    show_hunks: bool,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Debug, Args)]
struct InspectCommand {
    #[arg(value_name = "PATCH", value_hint = ValueHint::FilePath)]
    patch: PathBuf,
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    file: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    reverse: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long = "tail", default_value_t = 20)]
    tail: usize,
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use crate::patch::parse_hunks;
    use tempfile::tempdir;

    #[test]
    fn apply_flags_parse() {
        let cli = Cli::try_parse_from([
            "patchmend",
            "apply",
            "fix.patch",
            "--root",
            "repo",
            "--reverse",
            "--yes",
            "--no-git",
            "--retry-times",
            "4",
        ])
        .expect("parse");
        let Command::Apply(cmd) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(cmd.patch, PathBuf::from("fix.patch"));
        assert!(cmd.reverse && cmd.auto_apply && cmd.no_git);
        assert!(!cmd.dry_run);
        assert_eq!(cmd.tuning.retry_times, Some(4));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempdir().expect("temp dir");
        let config = dir.path().join("patchmend.yaml");
        fs::write(&config, "similarity_ratio: 0.9\nlocator:\n  retry:\n    times: 3\n    interval: 50\n")
            .expect("config");
        let tuning = TuningArgs {
            encoding: None,
            config: Some(config),
            retry_times: None,
            retry_interval: Some(20),
        };
        let settings = tuning.settings().expect("settings");
        assert_eq!(settings.similarity_ratio, 0.9);
        let retry = settings.locator.retry.expect("retry");
        assert_eq!((retry.times, retry.interval), (3, 20));
    }

    #[test]
    fn preview_shows_the_pending_change() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("a.c"), "int a;\nfoo();\nreturn 0;\n").expect("seed");
        let hunk = parse_hunks("--- a/a.c\n+++ b/a.c\n@@ -1,3 +1,3 @@\n int a;\n-foo();\n+bar();\n return 0;\n")
            .remove(0);
        let success = SuccessfulCandidate {
            name: hunk.name(),
            candidate: hunk,
            rewritten: false,
            messages: Vec::new(),
        };
        let preview = preview_candidate(dir.path(), &success, &EncodingStrategy::default())
            .expect("preview")
            .expect("applies");
        assert!(preview.contains("- foo();"));
        assert!(preview.contains("+ bar();"));

        fs::write(dir.path().join("a.c"), "unrelated\n").expect("drift");
        let stale = preview_candidate(dir.path(), &success, &EncodingStrategy::default())
            .expect("preview");
        assert!(stale.is_none());
    }
}
