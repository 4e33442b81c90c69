use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use rapk_build::Strategy;
use rapk_core::{BuildParams, Forge, ForgeConfig, JobHistory, JobStatus};
use rapk_toolchain::android;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "rapk", version, about = "Template-based redirect APK builder")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build the template a strategy needs, if it is missing
    Prepare {
        #[arg(long)]
        strategy: Option<Strategy>,
    },
    /// Build one redirect app and wait for it
    Build {
        #[arg(long)]
        url: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        strategy: Option<Strategy>,
        /// Print the final job record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved path of a toolchain executable
    Locate { tool: String },
    /// Print where a published artifact lives
    Artifact { name: String },
    /// Copy an artifact out; it is deleted after the grace period
    Fetch {
        name: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Check alignment and signature of a package
    Verify { apk: PathBuf },
    /// Show recently finished jobs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rapk_util::init_tracing()?;
    let cli = Cli::parse();
    let config = ForgeConfig::load();
    info!(
        "core={} work={} output={}",
        config.core_dir.display(),
        config.work_dir.display(),
        config.output_dir.display()
    );

    match cli.cmd {
        Cmd::Prepare { strategy } => {
            let forge = Forge::new(config);
            let strategy = strategy.unwrap_or(forge.config().strategy);
            match forge.prepare(strategy).await? {
                Some(template) => println!("template={}", template.path().display()),
                None => println!("template=none strategy={strategy}"),
            }
        }
        Cmd::Build {
            url,
            name,
            strategy,
            json,
        } => {
            let forge = Forge::new(config);
            let mut params = BuildParams::new(url, name);
            params.strategy = strategy;
            let job_id = forge.coordinator().submit(params)?;
            println!("job_id={job_id}");

            let mut last = None;
            let job = loop {
                let job = forge.coordinator().poll(&job_id)?;
                let seen = (job.progress, job.phase.clone());
                if last.as_ref() != Some(&seen) {
                    println!("progress={} phase={}", job.progress, job.phase);
                    last = Some(seen);
                }
                if job.status.is_terminal() {
                    break job;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            match (job.status, &job.artifact, &job.error) {
                (JobStatus::Completed, Some(artifact), _) => {
                    println!("artifact={}", artifact.path.display());
                    println!("size={} sha256={}", artifact.size_bytes, artifact.sha256);
                }
                (_, _, Some(failure)) => {
                    return Err(format!("build failed ({}): {}", failure.kind, failure.message).into())
                }
                _ => return Err(format!("build ended as {:?}", job.status).into()),
            }
        }
        Cmd::Locate { tool } => {
            let forge = Forge::new(config);
            match forge.context().locator().resolve(&tool) {
                Some(path) => println!("{}", path.display()),
                None => {
                    return Err(format!(
                        "{tool} not found under {} or {}",
                        forge.context().locator().build_tools_root().display(),
                        forge.context().locator().jdk_dir().join("bin").display()
                    )
                    .into())
                }
            }
        }
        Cmd::Artifact { name } => {
            let forge = Forge::new(config);
            let path = forge.artifacts().locate(&name)?;
            println!("{}", path.display());
        }
        Cmd::Fetch { name, out } => {
            let forge = Forge::new(config);
            let mut retrieved = forge.artifacts().retrieve(&name).await?;
            let mut dest = tokio::fs::File::create(&out).await?;
            let copied = tokio::io::copy(&mut retrieved.file, &mut dest).await?;
            println!("saved={} bytes={copied}", out.display());
            // keep the process alive until the source is cleaned up
            retrieved.deletion.await?;
        }
        Cmd::Verify { apk } => {
            let forge = Forge::new(config);
            let locator = forge.context().locator();
            android::check_alignment(locator, &apk).await?;
            let output = android::verify_signature(locator, &apk).await?;
            if !output.stdout.trim().is_empty() {
                println!("{}", output.stdout.trim());
            }
            println!("verified={}", apk.display());
        }
        Cmd::History { limit } => {
            let history = JobHistory::open(JobHistory::default_path());
            for job in history.recent().into_iter().take(limit) {
                let outcome = match (&job.artifact, &job.error) {
                    (Some(artifact), _) => artifact.name.clone(),
                    (_, Some(failure)) => failure.kind.clone(),
                    _ => String::new(),
                };
                println!(
                    "{}\t{:?}\t{}\t{}\t{}",
                    job.job_id, job.status, job.strategy, job.display_name, outcome
                );
            }
        }
    }

    Ok(())
}
