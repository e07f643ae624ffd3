// UI layer: renders upload progress and results for the terminal, or a
// JSON report when `--json` is set. The pipeline never prints; it hands
// results and progress callbacks to the functions here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use dialoguer::Confirm;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::json;

use crate::summary::BatchSummary;
use crate::types::{file_name_of, AttachmentRecord, UploadResult, ValidatedAttachment};
use crate::upload::{OutputMode, SilentObserver, UploadObserver, UploadOptions};
use crate::validate::BatchValidationError;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg:24} [{bar:32.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Draws one byte progress bar per file and prints a result line when the
/// file finishes. Verbose result lines add the asset URL, the failed stage
/// and the attempt count.
pub struct ConsoleObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
    quiet: bool,
    verbose: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            quiet,
            verbose,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl UploadObserver for ConsoleObserver {
    fn file_started(&self, index: usize, file: &ValidatedAttachment) {
        if self.quiet {
            return;
        }
        let bar = self.multi.add(ProgressBar::new(file.size));
        bar.set_style(Self::style());
        bar.set_message(file.request.file_name());
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(index, bar);
        }
    }

    fn bytes_sent(&self, index: usize, sent: u64, _total: u64) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(&index) {
                bar.set_position(sent);
            }
        }
    }

    fn file_finished(&self, index: usize, result: &UploadResult) {
        if let Some(bar) = self.bars.lock().ok().and_then(|mut bars| bars.remove(&index)) {
            bar.finish_and_clear();
        }
        if self.quiet && result.success {
            return;
        }
        let line = result_line(result, self.verbose);
        self.multi.suspend(|| println!("{line}"));
    }
}

/// Progress rendering only makes sense for interactive human output.
pub fn observer_for(options: &UploadOptions) -> Arc<dyn UploadObserver> {
    match options.output {
        OutputMode::Human => Arc::new(ConsoleObserver::new(options.quiet, options.verbose)),
        OutputMode::Json => Arc::new(SilentObserver),
    }
}

pub fn result_line(result: &UploadResult, verbose: bool) -> String {
    let name = file_name_of(&result.path);
    let attempts = match result.attempts {
        1 => "1 attempt".to_string(),
        n => format!("{n} attempts"),
    };
    match (&result.attachment, &result.error) {
        (Some(record), _) if result.success => {
            let line = format!("✓ {name} attached as \"{}\" ({})", record.title, record.id);
            if verbose {
                format!("{line} -> {} [{attempts}]", record.url)
            } else if result.attempts > 1 {
                format!("{line} after {attempts}")
            } else {
                line
            }
        }
        (_, Some(error)) if verbose => {
            let stage = result.failed_stage.unwrap_or("unknown");
            format!("✗ {name}: {error} [stage {stage}, {attempts}]")
        }
        (_, Some(error)) => format!("✗ {name}: {error}"),
        _ => format!("✗ {name}: unknown error"),
    }
}

pub fn format_summary(summary: &BatchSummary) -> String {
    let mut out = format!(
        "{} of {} files attached, {} failed\n",
        summary.succeeded_count,
        summary.total(),
        summary.failed_count
    );
    if !summary.failures.is_empty() {
        out.push_str("Failed files:\n");
        for failure in &summary.failures {
            out.push_str(&format!("  {}: {}\n", failure.path.display(), failure.reason));
        }
    }
    out
}

pub fn format_validation_failures(err: &BatchValidationError) -> String {
    let mut out = format!(
        "{} of {} files failed validation; nothing was uploaded:\n",
        err.failures.len(),
        err.total
    );
    for outcome in &err.failures {
        let reason = outcome
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        out.push_str(&format!("  {}: {}\n", outcome.path.display(), reason));
    }
    out
}

pub fn print_summary(summary: &BatchSummary, options: &UploadOptions) -> Result<()> {
    match options.output {
        OutputMode::Json => print_json(summary),
        OutputMode::Human => {
            print!("{}", format_summary(summary));
            Ok(())
        }
    }
}

pub fn print_validation_failures(err: &BatchValidationError, options: &UploadOptions) -> Result<()> {
    match options.output {
        OutputMode::Json => {
            let failures: Vec<_> = err
                .failures
                .iter()
                .map(|outcome| {
                    json!({
                        "path": outcome.path,
                        "kind": outcome.error.as_ref().map(|e| e.kind()),
                        "reason": outcome.error.as_ref().map(ToString::to_string),
                    })
                })
                .collect();
            print_json(&json!({ "validationFailures": failures }))
        }
        OutputMode::Human => {
            eprint!("{}", format_validation_failures(err));
            Ok(())
        }
    }
}

pub fn print_record(verb: &str, record: &AttachmentRecord, options: &UploadOptions) -> Result<()> {
    match options.output {
        OutputMode::Json => print_json(record),
        OutputMode::Human => {
            if !options.quiet {
                println!("{verb} \"{}\" ({}) -> {}", record.title, record.id, record.url);
            }
            Ok(())
        }
    }
}

pub fn print_deleted(attachment_id: &str, options: &UploadOptions) -> Result<()> {
    match options.output {
        OutputMode::Json => print_json(&json!({ "id": attachment_id, "deleted": true })),
        OutputMode::Human => {
            print_message(&format!("Deleted attachment {attachment_id}"), options);
            Ok(())
        }
    }
}

pub fn print_message(message: &str, options: &UploadOptions) {
    if options.output == OutputMode::Human && !options.quiet {
        println!("{message}");
    }
}

/// Ask before deleting. JSON mode never prompts and requires `--yes`.
pub fn confirm_delete(attachment_id: &str, options: &UploadOptions) -> Result<bool> {
    if options.output == OutputMode::Json {
        anyhow::bail!("refusing to prompt in --json mode; pass --yes to delete");
    }
    Confirm::new()
        .with_prompt(format!("Delete attachment {attachment_id}?"))
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON report")?;
    println!("{text}");
    Ok(())
}
