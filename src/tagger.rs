use crate::config::{Config, ProbeConfig};
use crate::error::ProbeError;
use crate::inventory::{Inventory, InventoryRecord, TagTarget};
use crate::probe::platform::Platform;
use crate::probe::{Prober, TraceOutcome};
use eyre::Result;
use std::sync::Arc;
use std::time::Instant;

/// Runs one blocking probe against an IP address.
pub type ProbeFn = Arc<dyn Fn(&str) -> Result<TraceOutcome, ProbeError> + Send + Sync>;

/// A single write-back to the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    Tag {
        target: TagTarget,
        existing: String,
        tags: String,
    },
    CustomField {
        record_id: u64,
        key: String,
        value: String,
        notes: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagSummary {
    pub records: usize,
    pub probed: usize,
    pub reached: usize,
    pub updates_applied: usize,
    pub updates_failed: usize,
}

/// Probe function backed by the real prober.
pub fn system_probe(settings: &ProbeConfig) -> Result<ProbeFn, ProbeError> {
    let platform = Platform::from_choice(settings.strategy)?;
    let hops = settings.hops;
    let timeout_ms = settings.timeout_ms;

    Ok(Arc::new(move |ip: &str| {
        Prober::with_platform(ip, hops, timeout_ms, platform).run()
    }))
}

/// The IP address to probe for this record, if it has an IP record at all.
pub fn probe_address(record: &InventoryRecord) -> Option<&str> {
    record.ipaddress_pk?;
    record.ip_address.as_deref().filter(|ip| !ip.trim().is_empty())
}

/// Decide the updates for one record given its probe outcome.
pub fn plan_actions(record: &InventoryRecord, outcome: Option<&TraceOutcome>, config: &Config) -> Vec<TagAction> {
    let mut actions = Vec::new();
    // A blank address can't be tagged by value; the custom field goes by pk
    let has_address = !record.ip_address().trim().is_empty();
    let ip_target = || TagTarget::IpAddress(record.ip_address().to_string());
    let device_target = || TagTarget::Device(record.device_name().to_string());

    if record.device_pk.is_none() && has_address {
        if let Some(tags) = &config.ip_tags.no_device {
            actions.push(TagAction::Tag {
                target: ip_target(),
                existing: record.ipaddress_tags().to_string(),
                tags: tags.clone(),
            });
        }
    }

    if record.ipaddress_pk.is_none() {
        if let Some(tags) = &config.device_tags.no_ipaddress {
            actions.push(TagAction::Tag {
                target: device_target(),
                existing: record.device_tags().to_string(),
                tags: tags.clone(),
            });
        }
        return actions;
    }

    let Some(outcome) = outcome else {
        return actions;
    };

    let (ip_tags, device_tags) = if outcome.reached {
        (&config.ip_tags.success, &config.device_tags.success)
    } else {
        (&config.ip_tags.failure, &config.device_tags.failure)
    };

    if let (Some(tags), true) = (ip_tags, has_address) {
        actions.push(TagAction::Tag {
            target: ip_target(),
            existing: record.ipaddress_tags().to_string(),
            tags: tags.clone(),
        });
    }

    if let (Some(tags), Some(_)) = (device_tags, record.device_pk) {
        actions.push(TagAction::Tag {
            target: device_target(),
            existing: record.device_tags().to_string(),
            tags: tags.clone(),
        });
    }

    if let (Some(key), Some(record_id)) = (&config.custom_field.key, record.ipaddress_pk) {
        actions.push(TagAction::CustomField {
            record_id,
            key: key.clone(),
            value: outcome.last_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            notes: config.custom_field.notes.clone(),
        });
    }

    actions
}

/// Walks every inventory record, probes it and writes tags back.
pub struct Tagger<I> {
    inventory: I,
    probe: ProbeFn,
    config: Config,
}

impl<I: Inventory + Send + Sync> Tagger<I> {
    pub fn new(inventory: I, probe: ProbeFn, config: Config) -> Self {
        Self {
            inventory,
            probe,
            config,
        }
    }

    pub async fn run(&self) -> Result<TagSummary> {
        log::info!("[tagger] fetching_records");
        let records = self.inventory.records().await?;
        log::info!("[tagger] records_fetched: count={}", records.len());

        let mut summary = TagSummary {
            records: records.len(),
            ..Default::default()
        };

        for record in &records {
            log::info!("[tagger] processing: device={} ip={}", record.device_name(), record.ip_address());

            let outcome = match probe_address(record) {
                Some(ip) => {
                    let outcome = self.trace(ip).await;
                    summary.probed += 1;
                    if outcome.reached {
                        summary.reached += 1;
                    }
                    Some(outcome)
                }
                None if record.ipaddress_pk.is_some() => {
                    log::warn!("[tagger] ip_address_missing: ipaddress_pk={:?} device={}",
                        record.ipaddress_pk, record.device_name());
                    Some(TraceOutcome::default())
                }
                None => None,
            };

            for action in plan_actions(record, outcome.as_ref(), &self.config) {
                if self.apply(&action).await {
                    summary.updates_applied += 1;
                } else {
                    summary.updates_failed += 1;
                }
            }

            log::info!("[tagger] finished: device={} ip={}", record.device_name(), record.ip_address());
        }

        log::info!("[tagger] run_completed: {:?}", summary);
        Ok(summary)
    }

    /// Probe on a blocking worker. Fatal probe errors count as unreachable.
    async fn trace(&self, ip: &str) -> TraceOutcome {
        let probe = Arc::clone(&self.probe);
        let destination = ip.to_string();
        let trace_start = Instant::now();

        log::info!("[tagger] trace_starting: ip={}", ip);
        let result = tokio::task::spawn_blocking(move || (*probe)(&destination)).await;

        match result {
            Ok(Ok(outcome)) => {
                log::info!("[tagger] trace_finished: ip={} outcome={} duration={}ms",
                    ip, outcome, trace_start.elapsed().as_millis());
                outcome
            }
            Ok(Err(e)) => {
                log::error!("[tagger] trace_failed: ip={} error={}", ip, e);
                TraceOutcome::default()
            }
            Err(e) => {
                log::error!("[tagger] trace_panicked: ip={} error={}", ip, e);
                TraceOutcome::default()
            }
        }
    }

    async fn apply(&self, action: &TagAction) -> bool {
        let ok = match action {
            TagAction::Tag { target, existing, tags } => {
                self.inventory.set_tags(target, existing, tags).await
            }
            TagAction::CustomField { record_id, key, value, notes } => {
                self.inventory.set_custom_field(*record_id, key, value, notes).await
            }
        };
        if !ok {
            log::warn!("[tagger] update_failed: action={:?}", action);
        }
        ok
    }
}
