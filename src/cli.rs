// Command-line surface: clap definitions, turning repeated `--file` flag
// groups into an ordered request list, and dispatching each subcommand to
// the API client or the upload orchestrator.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgMatches, Args, Parser, Subcommand};
use tracing::debug;

use crate::api::{ApiClient, AttachmentApi};
use crate::config::Config;
use crate::transfer::{CancelToken, RetryPolicy, TransferExecutor};
use crate::types::{
    parse_metadata, AttachmentUpdate, FileAttachmentRequest, Metadata, NewAttachment,
};
use crate::ui;
use crate::upload::{OutputMode, UploadOptions, UploadOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "linear", version, about = "Attach files and links to issues")]
pub struct Cli {
    /// Print a JSON report instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Only print failures and the final summary
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload one or more files and attach them to an issue
    Attach(AttachArgs),
    /// Attach an external URL to an issue
    Link(LinkArgs),
    /// Change the title, subtitle, icon or metadata of an attachment
    Update(UpdateArgs),
    /// Delete an attachment
    Delete(DeleteArgs),
}

/// Each `--file` starts a group; `--title`, `--subtitle`, `--icon` and
/// `--metadata` apply to the closest `--file` before them.
#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Issue identifier, e.g. ENG-123
    pub issue: String,

    #[arg(short = 'f', long = "file", value_name = "PATH", required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short = 't', long = "title")]
    pub titles: Vec<String>,

    #[arg(long = "subtitle")]
    pub subtitles: Vec<String>,

    #[arg(long = "icon", value_name = "URL")]
    pub icons: Vec<String>,

    /// Comma-separated key=value pairs
    #[arg(short = 'm', long = "metadata", value_name = "K=V,...", value_parser = metadata_arg)]
    pub metadata: Vec<Metadata>,
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    pub issue: String,
    pub url: String,

    #[arg(short = 't', long)]
    pub title: String,

    #[arg(long)]
    pub subtitle: Option<String>,

    #[arg(long = "icon", value_name = "URL")]
    pub icon_url: Option<String>,

    #[arg(short = 'm', long, value_name = "K=V,...", value_parser = metadata_arg)]
    pub metadata: Option<Metadata>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub attachment_id: String,

    #[arg(short = 't', long)]
    pub title: Option<String>,

    #[arg(long)]
    pub subtitle: Option<String>,

    #[arg(long = "icon", value_name = "URL")]
    pub icon_url: Option<String>,

    #[arg(short = 'm', long, value_name = "K=V,...", value_parser = metadata_arg)]
    pub metadata: Option<Metadata>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub attachment_id: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

fn metadata_arg(s: &str) -> Result<Metadata, String> {
    parse_metadata(s).map_err(|e| e.to_string())
}

impl Cli {
    pub fn upload_options(&self, cancel: CancelToken) -> UploadOptions {
        UploadOptions {
            output: if self.json {
                OutputMode::Json
            } else {
                OutputMode::Human
            },
            quiet: self.quiet,
            verbose: self.verbose,
            cancel,
        }
    }
}

/// Rebuild the per-file groups from argument positions. clap hands us each
/// flag's values separately, so the position of every value is compared
/// with the positions of the `--file` flags.
pub fn file_requests(matches: &ArgMatches) -> Result<Vec<FileAttachmentRequest>> {
    let files: Vec<(usize, PathBuf)> = values_with_indices(matches, "files");
    if files.is_empty() {
        bail!("at least one --file is required");
    }
    let mut requests: Vec<FileAttachmentRequest> = files
        .iter()
        .map(|(_, path)| FileAttachmentRequest::new(path.clone(), String::new()))
        .collect();

    let owner = |flag: &str, index: usize| -> Result<usize> {
        files
            .iter()
            .rposition(|(file_index, _)| *file_index < index)
            .with_context(|| format!("--{flag} must follow the --file it belongs to"))
    };

    for (index, title) in values_with_indices::<String>(matches, "titles") {
        let req = &mut requests[owner("title", index)?];
        if !req.title.is_empty() {
            bail!("--title given twice for {}", req.path.display());
        }
        req.title = title;
    }
    for (index, subtitle) in values_with_indices::<String>(matches, "subtitles") {
        let req = &mut requests[owner("subtitle", index)?];
        if req.subtitle.replace(subtitle).is_some() {
            bail!("--subtitle given twice for {}", req.path.display());
        }
    }
    for (index, icon) in values_with_indices::<String>(matches, "icons") {
        let req = &mut requests[owner("icon", index)?];
        if req.icon_url.replace(icon).is_some() {
            bail!("--icon given twice for {}", req.path.display());
        }
    }
    for (index, metadata) in values_with_indices::<Metadata>(matches, "metadata") {
        let req = &mut requests[owner("metadata", index)?];
        if req.metadata.replace(metadata).is_some() {
            bail!("--metadata given twice for {}", req.path.display());
        }
    }

    debug!(files = requests.len(), "parsed file groups");
    Ok(requests)
}

fn values_with_indices<T>(matches: &ArgMatches, id: &str) -> Vec<(usize, T)>
where
    T: Clone + Send + Sync + 'static,
{
    match (matches.indices_of(id), matches.get_many::<T>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Execute the parsed command. `Ok(false)` means the command ran but did
/// not fully succeed (for example, some files failed to upload).
pub fn run(cli: Cli, matches: &ArgMatches, config: &Config, cancel: CancelToken) -> Result<bool> {
    let options = cli.upload_options(cancel);
    if config.api_key.is_none() {
        bail!("no API key found: set LINEAR_API_KEY or write it to ~/.linear_token");
    }
    let api = ApiClient::from_config(config).context("Failed to build API client")?;

    match &cli.command {
        Command::Attach(args) => {
            let sub = matches
                .subcommand_matches("attach")
                .context("missing attach arguments")?;
            let requests = file_requests(sub)?;
            attach(&api, config, &args.issue, &requests, options)
        }
        Command::Link(args) => {
            let attachment = NewAttachment {
                title: args.title.clone(),
                url: args.url.clone(),
                subtitle: args.subtitle.clone(),
                icon_url: args.icon_url.clone(),
                metadata: args.metadata.clone(),
            };
            let record = api
                .register_attachment(&args.issue, &attachment)
                .context("Failed to link URL")?;
            ui::print_record("Linked", &record, &options)?;
            Ok(true)
        }
        Command::Update(args) => {
            let update = AttachmentUpdate {
                title: args.title.clone(),
                subtitle: args.subtitle.clone(),
                icon_url: args.icon_url.clone(),
                metadata: args.metadata.clone(),
            };
            if update.is_empty() {
                bail!("nothing to update: pass at least one of --title, --subtitle, --icon, --metadata");
            }
            let record = api
                .update_attachment(&args.attachment_id, &update)
                .context("Failed to update attachment")?;
            ui::print_record("Updated", &record, &options)?;
            Ok(true)
        }
        Command::Delete(args) => {
            if !args.yes && !ui::confirm_delete(&args.attachment_id, &options)? {
                ui::print_message("Aborted.", &options);
                return Ok(false);
            }
            api.delete_attachment(&args.attachment_id)
                .context("Failed to delete attachment")?;
            ui::print_deleted(&args.attachment_id, &options)?;
            Ok(true)
        }
    }
}

/// Process exit status for an outcome of [`run`]: 0 only when the command
/// fully succeeded.
pub fn exit_status(outcome: &Result<bool>) -> i32 {
    match outcome {
        Ok(true) => 0,
        Ok(false) | Err(_) => 1,
    }
}

fn attach(
    api: &dyn AttachmentApi,
    config: &Config,
    issue: &str,
    requests: &[FileAttachmentRequest],
    options: UploadOptions,
) -> Result<bool> {
    let transfer = TransferExecutor::new(
        config.transfer_timeout,
        RetryPolicy::default(),
        options.cancel.clone(),
    )
    .context("Failed to build upload client")?;

    let observer = ui::observer_for(&options);
    let orchestrator =
        UploadOrchestrator::new(api, &transfer, options.clone()).with_observer(observer);

    match orchestrator.run(issue, requests) {
        Ok(summary) => {
            ui::print_summary(&summary, &options)?;
            Ok(summary.is_success())
        }
        Err(err) => {
            ui::print_validation_failures(&err, &options)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn attach_matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["linear", "attach", "ENG-1"];
        argv.extend_from_slice(args);
        let matches = Cli::command().try_get_matches_from(argv).unwrap();
        matches.subcommand_matches("attach").unwrap().clone()
    }

    #[test]
    fn test_flag_groups_bind_to_preceding_file() {
        let matches = attach_matches(&[
            "--file", "a.png", "--title", "Screenshot", "--subtitle", "before fix",
            "--file", "b.log", "--metadata", "job=42,env=ci", "--title", "Log",
            "-f", "c.txt", "-t", "Notes", "--icon", "https://icons.test/n.png",
        ]);

        let requests = file_requests(&matches).unwrap();
        assert_eq!(requests.len(), 3);

        assert_eq!(requests[0].path, PathBuf::from("a.png"));
        assert_eq!(requests[0].title, "Screenshot");
        assert_eq!(requests[0].subtitle.as_deref(), Some("before fix"));

        assert_eq!(requests[1].title, "Log");
        let meta = requests[1].metadata.as_ref().unwrap();
        assert_eq!(meta["job"], "42");
        assert_eq!(meta["env"], "ci");

        assert_eq!(requests[2].title, "Notes");
        assert_eq!(requests[2].icon_url.as_deref(), Some("https://icons.test/n.png"));
        assert!(requests[2].subtitle.is_none());
    }

    #[test]
    fn test_missing_title_left_for_validation() {
        let matches = attach_matches(&["--file", "a.png"]);
        let requests = file_requests(&matches).unwrap();
        assert_eq!(requests[0].title, "");
    }

    #[test]
    fn test_title_before_file_rejected() {
        let matches = attach_matches(&["--title", "Orphan", "--file", "a.png"]);
        let err = file_requests(&matches).unwrap_err();
        assert!(err.to_string().contains("--title must follow"));
    }

    #[test]
    fn test_duplicate_title_rejected() {
        let matches = attach_matches(&["--file", "a.png", "-t", "One", "-t", "Two"]);
        let err = file_requests(&matches).unwrap_err();
        assert!(err.to_string().contains("--title given twice"));
    }

    #[test]
    fn test_bad_metadata_is_a_parse_error() {
        let result = Cli::command().try_get_matches_from([
            "linear", "attach", "ENG-1", "--file", "a.png", "--metadata", "novalue",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_build_options() {
        let cli = Cli::try_parse_from(["linear", "delete", "att_1", "--json", "-q", "--yes"]).unwrap();
        let options = cli.upload_options(CancelToken::new());
        assert_eq!(options.output, OutputMode::Json);
        assert!(options.quiet);
        assert!(!options.verbose);
        assert!(matches!(cli.command, Command::Delete(DeleteArgs { yes: true, .. })));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
