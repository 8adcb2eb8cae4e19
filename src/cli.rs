use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::analysis::PolicyControls;
use crate::auth::Token;
use crate::config::Config;
use crate::output::{export_json, print_report};
use crate::providers::GitLabProvider;

#[derive(Parser)]
#[command(name = "pipeguard")]
#[command(author, version, about = "GitLab CI/CD trust policy analyzer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one project against the policy file
    Analyze {
        /// GitLab personal access token
        #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// GitLab instance URL, falls back to the policy file's `gitlab.url`
        #[arg(short = 'u', long)]
        gitlab_url: Option<String>,

        /// Project path, e.g. group/project
        #[arg(short = 'P', long)]
        project: String,

        /// Policy file; searched for in the working directory when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Minimum overall compliance (0-100) for the run to pass
        #[arg(short, long, default_value_t = 100.0)]
        threshold: f64,

        /// Analyze this branch instead of the default branch
        #[arg(short, long)]
        branch: Option<String>,

        /// Do not print the text report
        #[arg(long, default_value_t = false)]
        no_print: bool,

        /// Write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON report
        #[arg(short, long, default_value_t = false)]
        pretty: bool,
    },
}

/// Options of one `analyze` run once flags and the policy file are combined.
struct AnalyzeOptions<'a> {
    token: Token,
    gitlab_url: String,
    project: &'a str,
    threshold: f64,
    branch: Option<&'a str>,
    print: bool,
    output: Option<&'a PathBuf>,
    pretty: bool,
}

impl Cli {
    async fn execute_analyze(&self, options: AnalyzeOptions<'_>, config: &Config) -> Result<()> {
        info!("Analyzing project {} on {}", options.project, options.gitlab_url);
        eprintln!(
            "Analyzing project: {} on {}",
            options.project, options.gitlab_url
        );

        let controls = PolicyControls::from_config(config).context("Invalid configuration")?;
        let provider = GitLabProvider::new(
            &options.gitlab_url,
            options.project.to_owned(),
            Some(options.token),
            &config.gitlab(),
        )?;

        let result = provider
            .analyze(options.branch, &controls, options.print)
            .await
            .with_context(|| format!("Analysis of {} failed", options.project))?;

        if options.print {
            print_report(&result, options.threshold);
        }

        if let Some(output_path) = options.output {
            let file = File::create(output_path)
                .with_context(|| format!("Failed to create {}", output_path.display()))?;
            let mut writer = BufWriter::new(file);
            export_json(&result, options.threshold, options.pretty, &mut writer)?;
            writer.flush()?;
            eprintln!("Results written to: {}", output_path.display());
        } else if !options.print {
            export_json(&result, options.threshold, options.pretty, &mut std::io::stdout())?;
        }

        let compliance = result.compliance();
        if compliance < options.threshold {
            bail!(
                "compliance {compliance:.1}% is below threshold {:.1}%",
                options.threshold
            );
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Analyze {
                token,
                gitlab_url,
                project,
                config,
                threshold,
                branch,
                no_print,
                output,
                pretty,
            } => {
                let token = match token.as_deref().map(str::trim) {
                    Some(token) if !token.is_empty() => Token::from(token),
                    _ => bail!("GITLAB_TOKEN environment variable is required"),
                };
                if !(0.0..=100.0).contains(threshold) {
                    bail!("threshold must be between 0 and 100, got {threshold}");
                }

                let (config, config_path) = Config::load(config.as_deref())?;
                eprintln!("Using configuration: {}", config_path.display());

                let Some(gitlab_url) = gitlab_url
                    .clone()
                    .or_else(|| config.gitlab().url)
                    .map(|url| url.trim().trim_end_matches('/').to_string())
                    .filter(|url| !url.is_empty())
                else {
                    bail!("GitLab URL is required: pass --gitlab-url or set gitlab.url in the policy file");
                };

                let options = AnalyzeOptions {
                    token,
                    gitlab_url,
                    project,
                    threshold: *threshold,
                    branch: branch.as_deref(),
                    print: !no_print,
                    output: output.as_ref(),
                    pretty: *pretty,
                };
                self.execute_analyze(options, &config).await
            }
        }
    }
}
