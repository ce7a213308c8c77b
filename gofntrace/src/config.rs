//! Validated run configuration derived from [`Args`]

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;
use crate::correlation::CorrelatorConfig;
use crate::domain::PlanError;
use crate::plan::{parse_target, PlanRequest};
use crate::render::RenderConfig;

/// Everything the tracer needs, split per component
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub binary: PathBuf,
    pub bpf_object: PathBuf,
    pub plan: PlanRequest,
    pub correlator: CorrelatorConfig,
    pub render: RenderConfig,
    pub dump_plan: Option<PathBuf>,
    pub dry_run: bool,
    pub assume_yes: bool,
    /// `None` runs until Ctrl+C
    pub duration: Option<Duration>,
}

impl TracerConfig {
    /// Convert parsed arguments, splitting targets into names and fetch
    /// declarations
    ///
    /// # Errors
    /// [`PlanError::InvalidTarget`] for a malformed target
    pub fn from_args(args: &Args) -> Result<Self, PlanError> {
        let mut explicit_names = Vec::with_capacity(args.targets.len());
        let mut fetch_statements_by_name: HashMap<String, Vec<(String, String)>> = HashMap::new();

        for target in &args.targets {
            let spec = parse_target(target)?;
            if !spec.declarations.is_empty() {
                fetch_statements_by_name
                    .entry(spec.function.clone())
                    .or_default()
                    .extend(spec.declarations);
            }
            if !explicit_names.contains(&spec.function) {
                explicit_names.push(spec.function);
            }
        }

        Ok(Self {
            binary: args.binary.clone(),
            bpf_object: args.bpf_object.clone(),
            plan: PlanRequest {
                wildcard_patterns: args.uprobe_wildcards.clone(),
                explicit_names,
                fetch_statements_by_name,
                exclude_vendor: args.vendor_excluded(),
            },
            correlator: CorrelatorConfig {
                arg_wait_timeout: Duration::from_millis(args.arg_timeout_ms),
                max_entry_corrections: args.max_entry_corrections,
            },
            render: RenderConfig { drilldown: args.drilldown.clone() },
            dump_plan: args.dump_plan.clone(),
            dry_run: args.dry_run,
            assume_yes: args.yes,
            duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        })
    }
}
