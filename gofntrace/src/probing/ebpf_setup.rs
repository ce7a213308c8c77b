//! # eBPF Object Loading and Uprobe Attachment
//!
//! The uprobe program is built separately and loaded from disk
//! (`--bpf-object`). One program instance serves every instrumentation
//! point: it looks up its per-point [`ProbeConfig`] by the probed address.
//!
//! ## Maps written by userspace
//!
//! - `CONFIG`: Go runtime offsets (`g` in TLS, `goid` in `runtime.g`)
//! - `PROBE_CONFIG`: probed address → point id, location and argument
//!   fetch rules

use aya::maps::{HashMap, RingBuf};
use aya::programs::uprobe::UProbeLinkId;
use aya::programs::UProbe;
use aya::Ebpf;
use aya_log::EbpfLogger;
use gofntrace_common::{
    FetchArgConfig, FetchRule, ProbeConfig, ARGS_MAP, CONFIG_GOID_OFFSET, CONFIG_G_OFFSET,
    CONFIG_MAP, EVENTS_MAP, MAX_FETCH_ARGS, MAX_FETCH_RULES, PROBE_CONFIG_MAP, PROBE_PROGRAM,
    RULE_REGISTER, RULE_STACK_OFFSET,
};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ring_reader::{spawn_event_reader, spawn_payload_reader};
use super::{LoadConfig, ProbeBackend, ProbeStreams};
use crate::domain::{PointId, ProbeError};
use crate::fetcharg::{AddressingRule, ArgumentFetchSpec, RuleSource};
use crate::plan::{InstrumentationPlan, InstrumentationPoint};

/// Default capacity of each reader → session channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// [`ProbeBackend`] backed by aya
pub struct AyaBackend {
    object_path: PathBuf,
    channel_capacity: usize,
    ebpf: Option<Ebpf>,
    links: Vec<UProbeLinkId>,
    streams: Option<ProbeStreams>,
    readers: Vec<JoinHandle<()>>,
}

impl AyaBackend {
    #[must_use]
    pub fn new(object_path: impl Into<PathBuf>) -> Self {
        Self {
            object_path: object_path.into(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            ebpf: None,
            links: Vec::new(),
            streams: None,
            readers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    fn ebpf_mut(&mut self) -> Result<&mut Ebpf, ProbeError> {
        self.ebpf
            .as_mut()
            .ok_or_else(|| ProbeError::EbpfLoadFailed("object not loaded".to_string()))
    }
}

impl ProbeBackend for AyaBackend {
    fn load(&mut self, plan: &InstrumentationPlan, config: &LoadConfig) -> Result<(), ProbeError> {
        // encode everything first so an oversized plan fails before touching the kernel
        let probe_configs = plan
            .iter()
            .map(|(id, point)| Ok((point.probe_address(), probe_config(id, point)?)))
            .collect::<Result<Vec<_>, ProbeError>>()?;

        let mut bpf = Ebpf::load_file(&self.object_path).map_err(|e| {
            ProbeError::EbpfLoadFailed(format!("{}: {e}", self.object_path.display()))
        })?;
        init_ebpf_logger(&mut bpf);

        write_runtime_offsets(&mut bpf, config)?;

        let mut probe_map: HashMap<_, u64, ProbeConfig> = HashMap::try_from(
            bpf.map_mut(PROBE_CONFIG_MAP).ok_or(ProbeError::MapNotFound(PROBE_CONFIG_MAP))?,
        )?;
        for (address, probe) in &probe_configs {
            probe_map.insert(address, probe, 0)?;
        }
        debug!("wrote {} probe configs", probe_configs.len());

        let program: &mut UProbe = bpf
            .program_mut(PROBE_PROGRAM)
            .ok_or(ProbeError::ProgramNotFound(PROBE_PROGRAM))?
            .try_into()?;
        program.load()?;

        let events = RingBuf::try_from(bpf.take_map(EVENTS_MAP).ok_or(ProbeError::MapNotFound(EVENTS_MAP))?)?;
        let args = RingBuf::try_from(bpf.take_map(ARGS_MAP).ok_or(ProbeError::MapNotFound(ARGS_MAP))?)?;

        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);
        let (payload_tx, payload_rx) = mpsc::channel(self.channel_capacity);
        self.readers.push(spawn_event_reader(events, event_tx)?);
        self.readers.push(spawn_payload_reader(args, payload_tx)?);
        self.streams = Some(ProbeStreams { events: event_rx, payloads: payload_rx });

        self.ebpf = Some(bpf);
        info!("✓ Loaded {}", self.object_path.display());
        Ok(())
    }

    fn attach(&mut self, binary: &Path, plan: &InstrumentationPlan) -> Result<usize, ProbeError> {
        if !self.links.is_empty() {
            return Err(ProbeError::AlreadyAttached);
        }

        let bpf = self.ebpf_mut()?;
        let program: &mut UProbe = bpf
            .program_mut(PROBE_PROGRAM)
            .ok_or(ProbeError::ProgramNotFound(PROBE_PROGRAM))?
            .try_into()?;

        let mut links = Vec::with_capacity(plan.len());
        for point in plan.points() {
            match program.attach(None, point.file_offset, binary, None) {
                Ok(link) => links.push(link),
                Err(e) => {
                    // leave nothing half-attached behind
                    detach_all(links, |link| program.detach(link));
                    return Err(ProbeError::ProbeAttachFailed {
                        probe: format!("{}+{}", point.function_name, point.offset_from_entry),
                        binary: binary.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let attached = links.len();
        self.links = links;
        info!("✓ Attached {attached} uprobes");
        Ok(attached)
    }

    fn detach(&mut self) -> Result<(), ProbeError> {
        if self.links.is_empty() {
            return Ok(());
        }
        let links = std::mem::take(&mut self.links);
        let count = links.len();

        let bpf = self.ebpf_mut()?;
        let program: &mut UProbe = bpf
            .program_mut(PROBE_PROGRAM)
            .ok_or(ProbeError::ProgramNotFound(PROBE_PROGRAM))?
            .try_into()?;

        let first_error = detach_all(links, |link| program.detach(link));
        info!("Detached {count} uprobes");
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    fn take_streams(&mut self) -> Result<ProbeStreams, ProbeError> {
        self.streams.take().ok_or(ProbeError::StreamsTaken)
    }
}

/// Detach every link, logging each failure; returns the first one
fn detach_all<L, E: std::fmt::Display>(links: Vec<L>, mut detach: impl FnMut(L) -> Result<(), E>) -> Option<E> {
    let mut first_error = None;
    for link in links {
        if let Err(e) = detach(link) {
            warn!("Failed to detach uprobe: {e}");
            first_error.get_or_insert(e);
        }
    }
    first_error
}

impl Drop for AyaBackend {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Forward `aya_log` output of the probe program, if it has any
fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        debug!("eBPF logger unavailable: {e}");
    }
}

#[allow(clippy::cast_sign_loss)]
fn write_runtime_offsets(bpf: &mut Ebpf, config: &LoadConfig) -> Result<(), ProbeError> {
    let mut config_map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut(CONFIG_MAP).ok_or(ProbeError::MapNotFound(CONFIG_MAP))?)?;
    // stored as raw two's complement; the probe reinterprets them as signed
    config_map.insert(CONFIG_G_OFFSET, config.g_offset as u64, 0)?;
    config_map.insert(CONFIG_GOID_OFFSET, config.goid_offset as u64, 0)?;
    debug!("g offset {}, goid offset {}", config.g_offset, config.goid_offset);
    Ok(())
}

/// Encode one plan point for the `PROBE_CONFIG` map
///
/// # Errors
/// [`ProbeError::TooManyArguments`] or [`ProbeError::RuleChainTooLong`] when
/// the point exceeds the probe's fixed-size arrays
pub fn probe_config(id: PointId, point: &InstrumentationPoint) -> Result<ProbeConfig, ProbeError> {
    let count = point.argument_specs.len();
    if count > MAX_FETCH_ARGS {
        return Err(ProbeError::TooManyArguments {
            function: point.function_name.clone(),
            count,
            max: MAX_FETCH_ARGS,
        });
    }

    let mut config = ProbeConfig {
        point_id: id.0,
        location: point.kind.wire_location(),
        arg_count: u8::try_from(count).unwrap_or(u8::MAX),
        ..ProbeConfig::default()
    };
    for (slot, spec) in config.args.iter_mut().zip(&point.argument_specs) {
        *slot = fetch_arg_config(spec)?;
    }
    Ok(config)
}

fn fetch_arg_config(spec: &ArgumentFetchSpec) -> Result<FetchArgConfig, ProbeError> {
    let count = spec.rule_chain.len();
    if count > MAX_FETCH_RULES {
        return Err(ProbeError::RuleChainTooLong {
            name: spec.name.clone(),
            count,
            max: MAX_FETCH_RULES,
        });
    }

    let mut config = FetchArgConfig {
        size: u32::try_from(spec.byte_width()).unwrap_or(u32::MAX),
        rule_count: u32::try_from(count).unwrap_or(u32::MAX),
        ..FetchArgConfig::default()
    };
    for (slot, rule) in config.rules.iter_mut().zip(&spec.rule_chain) {
        *slot = fetch_rule(rule);
    }
    Ok(config)
}

fn fetch_rule(rule: &AddressingRule) -> FetchRule {
    let (kind, register, offset) = match rule.source {
        RuleSource::Register(register) => (RULE_REGISTER, register.wire_id(), 0),
        RuleSource::StackOffset(offset) => (RULE_STACK_OFFSET, 0, offset),
    };
    FetchRule { kind, register, dereference: u8::from(rule.dereference), _padding: [0; 5], offset }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ProbeKind;
    use gofntrace_common::{LOCATION_ENTRY, REG_AX};

    fn entry_with(specs: Vec<ArgumentFetchSpec>) -> InstrumentationPoint {
        InstrumentationPoint {
            function_name: "main.f".to_string(),
            kind: ProbeKind::Entry,
            absolute_address: 0x40_1000,
            file_offset: 0x1000,
            offset_from_entry: 0,
            argument_specs: specs,
            is_selected: true,
        }
    }

    #[test]
    fn test_probe_config_encoding() {
        let spec = ArgumentFetchSpec::parse("name", "(*+0(+8(%ax))):c64").unwrap();
        let config = probe_config(PointId(3), &entry_with(vec![spec])).unwrap();

        assert_eq!(config.point_id, 3);
        assert_eq!(config.location, LOCATION_ENTRY);
        assert_eq!(config.arg_count, 1);

        let arg = config.args[0];
        assert_eq!(arg.size, 8);
        assert_eq!(arg.rule_count, 3);
        assert_eq!((arg.rules[0].kind, arg.rules[0].register), (RULE_REGISTER, REG_AX));
        assert_eq!((arg.rules[1].kind, arg.rules[1].offset, arg.rules[1].dereference), (RULE_STACK_OFFSET, 8, 0));
        assert_eq!((arg.rules[2].kind, arg.rules[2].offset, arg.rules[2].dereference), (RULE_STACK_OFFSET, 0, 1));
    }

    #[test]
    fn test_too_many_arguments() {
        let specs = (0..=MAX_FETCH_ARGS)
            .map(|i| ArgumentFetchSpec::parse(&format!("a{i}"), "%ax:u64").unwrap())
            .collect();
        assert!(matches!(
            probe_config(PointId(0), &entry_with(specs)),
            Err(ProbeError::TooManyArguments { count, .. }) if count == MAX_FETCH_ARGS + 1
        ));
    }

    #[test]
    fn test_rule_chain_too_long() {
        let mut statement = "%ax".to_string();
        for _ in 0..MAX_FETCH_RULES {
            statement = format!("*+0({statement})");
        }
        let spec = ArgumentFetchSpec::parse("deep", &format!("{statement}:u8")).unwrap();
        assert!(matches!(
            probe_config(PointId(0), &entry_with(vec![spec])),
            Err(ProbeError::RuleChainTooLong { .. })
        ));
    }

    #[test]
    fn test_detach_all_tries_every_link() {
        let mut tried = Vec::new();
        let first = detach_all(vec![1, 2, 3], |link| {
            tried.push(link);
            if link == 1 {
                Ok(())
            } else {
                Err(format!("link {link} busy"))
            }
        });
        assert_eq!(tried, vec![1, 2, 3]);
        assert_eq!(first.as_deref(), Some("link 2 busy"));

        assert!(detach_all(Vec::<u32>::new(), |_| Err("unreachable")).is_none());
    }

    #[test]
    fn test_attach_requires_load() {
        let mut backend = AyaBackend::new("/nonexistent/gofntrace.o");
        let plan = InstrumentationPlan::new(vec![entry_with(Vec::new())]);
        assert!(matches!(
            backend.attach(Path::new("/bin/true"), &plan),
            Err(ProbeError::EbpfLoadFailed(_))
        ));
        assert!(matches!(backend.take_streams(), Err(ProbeError::StreamsTaken)));
        assert!(backend.detach().is_ok());
    }
}
