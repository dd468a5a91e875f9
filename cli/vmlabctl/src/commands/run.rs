//! Full lifecycle run.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tracing::info;
use vmlab_harness::{
    default_options, random_name, Flow, FlowPlan, FlowReport, FlowTimings, ImageDownload,
    ImageSource, OptionValue, ReachabilityPolicy, StepRecord, NAME_LENGTH,
};
use vmlab_tasks::TaskWaiter;

use crate::output::{
    display_option, print_info, print_output, print_single, print_success, OutputFormat,
};

use super::CommandContext;

/// Run the lifecycle flow.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// VM name (random when omitted).
    #[arg(long)]
    name: Option<String>,

    /// Number of CPU cores.
    #[arg(long, default_value_t = 2)]
    cores: u32,

    /// Memory in MiB.
    #[arg(long, default_value_t = 4096)]
    memory: u32,

    /// Bridge the virtio NIC is attached to.
    #[arg(long, default_value = "vmbr0")]
    bridge: String,

    /// Extra VM option as name=value; repeatable, overrides defaults.
    #[arg(long = "option", value_name = "NAME=VALUE", value_parser = parse_option)]
    options: Vec<(String, OptionValue)>,

    /// Cloud image URL to download and import as the boot disk.
    #[arg(long)]
    image_url: Option<String>,

    /// Storage the image is downloaded to.
    #[arg(long, default_value = "local")]
    image_storage: String,

    /// File name for the downloaded image (defaults to the URL's last segment).
    #[arg(long)]
    image_file: Option<String>,

    /// Storage the imported disk is allocated on.
    #[arg(long, default_value = "local-lvm")]
    disk_storage: String,

    /// Seconds between task status checks.
    #[arg(long, default_value_t = 1)]
    poll_interval: u64,

    /// Multiply every task deadline by this factor.
    #[arg(long, default_value_t = 1)]
    timeout_scale: u32,

    /// Accept a running VM that does not answer the reachability probe.
    #[arg(long)]
    allow_unreachable: bool,
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let plan = self.plan()?;
        let client = ctx.client()?;

        let timings = FlowTimings {
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            ..FlowTimings::default()
        }
        .scaled(self.timeout_scale.max(1));

        let reachability = if self.allow_unreachable {
            ReachabilityPolicy::Warn
        } else {
            ReachabilityPolicy::Strict
        };

        info!(
            name = %plan.name,
            node = %client.config().node,
            image = plan.image.is_some(),
            "Starting lifecycle run"
        );

        let flow = Flow::with_settings(client, TaskWaiter::default(), timings, reachability);
        let report = flow.run(&plan).await?;

        print_report(&report, ctx.format);
        Ok(())
    }

    fn plan(&self) -> Result<FlowPlan> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("vmlab-{}", random_name(NAME_LENGTH)));

        let mut options = default_options()
            .with("cores", self.cores)
            .with("memory", self.memory)
            .with("net0", format!("virtio,bridge={}", self.bridge));
        for (key, value) in &self.options {
            options.insert(key.clone(), value.clone());
        }

        let mut plan = FlowPlan::new(name, options);

        if let Some(url) = &self.image_url {
            let filename = match &self.image_file {
                Some(file) => file.clone(),
                None => file_name(url)?,
            };
            plan = plan.with_image(ImageSource {
                download: ImageDownload {
                    storage: self.image_storage.clone(),
                    url: url.clone(),
                    filename,
                },
                target_storage: self.disk_storage.clone(),
            });
        }

        Ok(plan)
    }
}

/// Parse `name=value`; integral values are sent as numbers.
fn parse_option(raw: &str) -> Result<(String, OptionValue), String> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(format!("expected NAME=VALUE, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty option name in '{raw}'"));
    }

    let value = match value.parse::<i64>() {
        Ok(n) => OptionValue::Int(n),
        Err(_) => OptionValue::Str(value.to_string()),
    };
    Ok((name.to_string(), value))
}

/// Last path segment of `url`, without query or fragment.
fn file_name(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => Ok(name.to_string()),
        _ => bail!("Cannot derive an image file name from '{url}'; pass --image-file"),
    }
}

/// One row of the step table.
#[derive(Debug, Serialize, Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,

    #[tabled(rename = "Task", display = "display_option")]
    task: Option<String>,

    #[tabled(rename = "Polls")]
    polls: u32,

    #[tabled(rename = "Elapsed")]
    elapsed: String,

    #[tabled(rename = "Observed", display = "display_option")]
    observed: Option<String>,
}

impl From<&StepRecord> for StepRow {
    fn from(record: &StepRecord) -> Self {
        Self {
            step: record.step.to_string(),
            task: record.upid.as_ref().map(|u| u.task_type().to_string()),
            polls: record.polls,
            elapsed: format!("{:.1}s", record.elapsed_ms as f64 / 1000.0),
            observed: record.observed.map(|o| {
                format!(
                    "{} ({})",
                    o.status,
                    if o.reachable { "reachable" } else { "unreachable" }
                )
            }),
        }
    }
}

fn print_report(report: &FlowReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let rows: Vec<StepRow> = report.steps.iter().map(StepRow::from).collect();
            print_output(&rows, format);
            print_success(&format!(
                "VM {} ('{}') passed the lifecycle run, final status {}",
                report.vm_id, report.name, report.final_status
            ));
            print_info(&format!("VM {} was left in place", report.vm_id));
        }
        OutputFormat::Json => print_single(report),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::int("cores=4", "cores", OptionValue::Int(4))]
    #[case::string("vga=std", "vga", OptionValue::Str("std".into()))]
    #[case::value_with_equals(
        "net0=virtio,bridge=vmbr1",
        "net0",
        OptionValue::Str("virtio,bridge=vmbr1".into())
    )]
    fn test_parse_option(#[case] raw: &str, #[case] name: &str, #[case] value: OptionValue) {
        assert_eq!(parse_option(raw).unwrap(), (name.to_string(), value));
    }

    #[rstest]
    #[case::no_equals("cores")]
    #[case::empty_name("=4")]
    fn test_parse_option_rejects(#[case] raw: &str) {
        assert!(parse_option(raw).is_err());
    }

    #[rstest]
    #[case::plain("https://example.com/images/leap.qcow2", "leap.qcow2")]
    #[case::query("https://example.com/leap.qcow2?mirror=1", "leap.qcow2")]
    fn test_file_name(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(file_name(url).unwrap(), expected);
    }

    #[test]
    fn test_file_name_requires_segment() {
        assert!(file_name("https://example.com/").is_err());
    }
}
