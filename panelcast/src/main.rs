//! `panelcast` command-line entry point.

use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};

use panelcast::archive::ZipArchiveReader;
use panelcast::cancellation::CancellationToken;
use panelcast::config::PipelineConfig;
use panelcast::core::{ArtifactStatus, ErrorKind, PipelineRun, RunId, RunStatus, SourceRef, StageName};
use panelcast::corpus::ReferenceCorpus;
use panelcast::events::LoggingEventSink;
use panelcast::inference::OpenAiClient;
use panelcast::pipeline::PipelineCoordinator;
use panelcast::report::render_report;
use panelcast::store::{ArtifactStore, FileArtifactStore};
use panelcast::telemetry::init_tracing;

const USAGE: &str = "\
usage:
  panelcast run <archive> <competitors.csv> <api-key> [duration]
  panelcast extract <archive> <api-key> [duration]
  panelcast review <run-id> <competitors.csv> <api-key>
  panelcast integrate <run-id> <api-key>
  panelcast resume <run-id> <competitors.csv> <api-key>
  panelcast report <run-id>";

const EXIT_FAILED: u8 = 1;
const EXIT_PARTIAL: u8 = 2;
const EXIT_USAGE: u8 = 64;
const EXIT_ABORTED: u8 = 130;

#[derive(Debug)]
enum Command {
    Run {
        archive: PathBuf,
        corpus: PathBuf,
        api_key: String,
        duration: Option<u32>,
    },
    Extract {
        archive: PathBuf,
        api_key: String,
        duration: Option<u32>,
    },
    Review {
        run_id: RunId,
        corpus: PathBuf,
        api_key: String,
    },
    Integrate {
        run_id: RunId,
        api_key: String,
    },
    Resume {
        run_id: RunId,
        corpus: PathBuf,
        api_key: String,
    },
    Report {
        run_id: RunId,
    },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let (name, rest) = args.split_first().ok_or("missing command")?;
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        let command = match (name.as_str(), rest.as_slice()) {
            ("run", [archive, corpus, key, tail @ ..]) if tail.len() <= 1 => Self::Run {
                archive: PathBuf::from(archive),
                corpus: PathBuf::from(corpus),
                api_key: (*key).to_string(),
                duration: parse_duration(tail.first().copied())?,
            },
            ("extract", [archive, key, tail @ ..]) if tail.len() <= 1 => Self::Extract {
                archive: PathBuf::from(archive),
                api_key: (*key).to_string(),
                duration: parse_duration(tail.first().copied())?,
            },
            ("review", [run_id, corpus, key]) => Self::Review {
                run_id: parse_run_id(run_id)?,
                corpus: PathBuf::from(corpus),
                api_key: (*key).to_string(),
            },
            ("integrate", [run_id, key]) => Self::Integrate {
                run_id: parse_run_id(run_id)?,
                api_key: (*key).to_string(),
            },
            ("resume", [run_id, corpus, key]) => Self::Resume {
                run_id: parse_run_id(run_id)?,
                corpus: PathBuf::from(corpus),
                api_key: (*key).to_string(),
            },
            ("report", [run_id]) => Self::Report {
                run_id: parse_run_id(run_id)?,
            },
            ("run" | "extract" | "review" | "integrate" | "resume" | "report", _) => {
                return Err(format!("wrong arguments for '{name}'"));
            }
            _ => return Err(format!("unknown command '{name}'")),
        };
        Ok(command)
    }
}

fn parse_duration(raw: Option<&str>) -> Result<Option<u32>, String> {
    raw.map(|s| match s.parse::<u32>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(format!("duration must be a positive number of seconds, got '{s}'")),
    })
    .transpose()
}

fn parse_run_id(raw: &str) -> Result<RunId, String> {
    raw.parse()
        .map_err(|e| format!("invalid run id '{raw}': {e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}\n\n{USAGE}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    init_tracing(config.log_format);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, aborting");
                cancel.cancel("operator abort");
            }
        })
    };

    let result = execute(command, config, &cancel).await;
    watcher.abort();
    match result {
        Ok(_) if cancel.is_cancelled() => ExitCode::from(EXIT_ABORTED),
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn coordinator(
    config: &PipelineConfig,
    api_key: String,
    corpus: Option<&PathBuf>,
) -> anyhow::Result<PipelineCoordinator> {
    let config = config.clone().with_api_key(api_key);
    let client = OpenAiClient::new(config.openai_config()?)
        .context("failed to build inference client")?;
    let corpus = match corpus {
        Some(path) => ReferenceCorpus::load_csv(path)
            .with_context(|| format!("failed to load reference scripts from {}", path.display()))?,
        None => ReferenceCorpus::empty(),
    };
    info!(scripts = corpus.len(), "reference corpus loaded");

    Ok(PipelineCoordinator::new(
        Arc::new(client),
        Arc::new(FileArtifactStore::new(&config.artifact_dir)),
        Arc::new(ZipArchiveReader::new()),
    )
    .with_corpus(Arc::new(corpus))
    .with_sink(Arc::new(LoggingEventSink::new(Level::INFO)))
    .with_config(config))
}

async fn execute(
    command: Command,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run {
            archive,
            corpus,
            api_key,
            duration,
        } => {
            let coordinator = coordinator(&config, api_key, Some(&corpus))?;
            let target = duration.unwrap_or(config.target_duration_secs);
            let run = coordinator
                .run_with_cancel(SourceRef::new(archive), target, cancel)
                .await?;
            println!("{}", coordinator.report(run.run_id).await?);
            Ok(run_exit_code(&run))
        }
        Command::Extract {
            archive,
            api_key,
            duration,
        } => {
            let coordinator = coordinator(&config, api_key, None)?;
            let target = duration.unwrap_or(config.target_duration_secs);
            let run = coordinator.start(SourceRef::new(archive), target).await?;
            println!("{}", run.run_id);
            let run = coordinator
                .run_stage(run.run_id, StageName::Extract, cancel)
                .await?;
            Ok(stage_exit_code(&run, StageName::Extract))
        }
        Command::Review {
            run_id,
            corpus,
            api_key,
        } => {
            let coordinator = coordinator(&config, api_key, Some(&corpus))?;
            let run = coordinator
                .run_stage(run_id, StageName::Review, cancel)
                .await?;
            Ok(stage_exit_code(&run, StageName::Review))
        }
        Command::Integrate { run_id, api_key } => {
            let coordinator = coordinator(&config, api_key, None)?;
            let run = coordinator
                .run_stage(run_id, StageName::Integrate, cancel)
                .await?;
            println!("{}", coordinator.report(run_id).await?);
            Ok(stage_exit_code(&run, StageName::Integrate))
        }
        Command::Resume {
            run_id,
            corpus,
            api_key,
        } => {
            let coordinator = coordinator(&config, api_key, Some(&corpus))?;
            let run = coordinator.resume_with_cancel(run_id, cancel).await?;
            println!("{}", coordinator.report(run.run_id).await?);
            Ok(run_exit_code(&run))
        }
        Command::Report { run_id } => {
            let store = FileArtifactStore::new(&config.artifact_dir);
            let report = match store.load_report(run_id).await? {
                Some(report) => report,
                None => {
                    let run = store
                        .load_run(run_id)
                        .await?
                        .ok_or_else(|| anyhow!("run {run_id} not found"))?;
                    render_report(&run, &store.list(run_id).await?)
                }
            };
            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_exit_code(run: &PipelineRun) -> ExitCode {
    match run.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(EXIT_PARTIAL),
        _ if aborted(run) => ExitCode::from(EXIT_ABORTED),
        _ => ExitCode::from(EXIT_FAILED),
    }
}

fn stage_exit_code(run: &PipelineRun, stage: StageName) -> ExitCode {
    if aborted(run) {
        return ExitCode::from(EXIT_ABORTED);
    }
    match run.outcome(stage).map(|o| o.status) {
        Some(ArtifactStatus::Ok) => ExitCode::SUCCESS,
        Some(ArtifactStatus::Degraded) => ExitCode::from(EXIT_PARTIAL),
        _ => {
            if let Some(failure) = &run.failure {
                eprintln!("{failure}");
            }
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn aborted(run: &PipelineRun) -> bool {
    run.failure
        .as_ref()
        .is_some_and(|f| f.kind == ErrorKind::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_run_with_duration() {
        let command = Command::parse(&args(&["run", "a.cbz", "c.csv", "sk", "90"])).unwrap();
        match command {
            Command::Run { duration, api_key, .. } => {
                assert_eq!(duration, Some(90));
                assert_eq!(api_key, "sk");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Command::parse(&args(&[])).is_err());
        assert!(Command::parse(&args(&["render", "x"])).is_err());
        assert!(Command::parse(&args(&["report"])).is_err());
        assert!(Command::parse(&args(&["report", "not-a-uuid"])).is_err());
        assert!(Command::parse(&args(&["extract", "a.cbz", "sk", "0"])).is_err());
        assert!(Command::parse(&args(&["integrate", "a", "b", "c"])).is_err());
    }

    #[test]
    fn test_parse_report() {
        let id = RunId::new();
        let command = Command::parse(&args(&["report", &id.to_string()])).unwrap();
        assert!(matches!(command, Command::Report { run_id } if run_id == id));
    }
}
