use std::fs;

use chrono::{TimeZone, Utc};
use eyre::{eyre, Context, Result};
use spindle_core::plan::{plan_id_of, BalancePlan};
use spindle_core::verifier::PlanVerifier;

use crate::cli::{PlanFileArgs, VerifyArgs};

pub fn run_hash(args: &PlanFileArgs) -> Result<()> {
    let text = read_plan_text(args)?;
    println!("{}", plan_id_of(&text));
    Ok(())
}

pub fn run_inspect(args: &PlanFileArgs) -> Result<()> {
    let text = read_plan_text(args)?;
    let plan = BalancePlan::from_json(&text)
        .wrap_err_with(|| format!("failed to parse plan file {}", args.file.display()))?;

    println!("plan id:   {}", plan_id_of(&text));
    println!("version:   {}", plan.version);
    println!("node:      {}", plan.node_id);
    println!("created:   {}", format_timestamp(plan.timestamp_ms));
    println!("steps:     {}", plan.steps.len());
    for (idx, step) in plan.steps.iter().enumerate() {
        let mut overrides = Vec::new();
        if step.bandwidth > 0 {
            overrides.push(format!("bandwidth {} MB/s", step.bandwidth));
        }
        if step.tolerance_percent > 0 {
            overrides.push(format!("tolerance {}%", step.tolerance_percent));
        }
        if let Some(max_errors) = step.max_disk_errors {
            overrides.push(format!("max errors {max_errors}"));
        }
        let suffix = if overrides.is_empty() {
            String::new()
        } else {
            format!("  [{}]", overrides.join(", "))
        };
        println!(
            "  {:>3}. {} -> {}  {}{}",
            idx + 1,
            step.source_volume,
            step.destination_volume,
            format_bytes(step.bytes_to_move),
            suffix
        );
    }
    println!("total:     {}", format_bytes(plan.total_bytes()));
    Ok(())
}

pub fn run_verify(args: &VerifyArgs) -> Result<()> {
    let text = read_plan_text(&PlanFileArgs {
        file: args.file.clone(),
    })?;
    let plan_id = args.plan_id.clone().unwrap_or_else(|| plan_id_of(&text));

    // The submitted version travels next to the plan; offline we take
    // it from the document itself, falling back to 1 when the file does
    // not parse so the hash/parse checks still get their say.
    let version = BalancePlan::from_json(&text).map(|p| p.version).unwrap_or(1);

    let verifier = PlanVerifier::new(args.node_id.clone());
    match verifier.verify(&plan_id, version, &text, args.force) {
        Ok(plan) => {
            println!(
                "plan {plan_id} is admissible on node {} ({} step(s), {})",
                args.node_id,
                plan.steps.len(),
                format_bytes(plan.total_bytes())
            );
            Ok(())
        }
        Err(err) => Err(eyre!("plan rejected: {}: {err}", err.code())),
    }
}

fn read_plan_text(args: &PlanFileArgs) -> Result<String> {
    fs::read_to_string(&args.file)
        .wrap_err_with(|| format!("failed to read plan file {}", args.file.display()))
}

fn format_timestamp(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(ts) => ts.to_rfc3339(),
        None => format!("{timestamp_ms} ms"),
    }
}

fn format_bytes(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{bytes} B")
    }
}
