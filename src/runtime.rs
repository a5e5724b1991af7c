//! Load-time bootstrap tying the gate, coordinator and commands together.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::commands::{CommandBridge, OperatorCommands};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorContext, InstallReport, InterceptTable};
use crate::gate::FeatureGate;
use crate::host::{HostBindings, HostEvent, MainThread};
use crate::remediation::LeakStats;

/// Everything installed into a running host.
#[derive(Debug)]
pub struct Runtime {
    gate: Arc<FeatureGate>,
    table: Arc<InterceptTable>,
    report: InstallReport,
    stats: Arc<LeakStats>,
    commands: OperatorCommands,
    bridge: CommandBridge,
}

impl Runtime {
    /// Fetch remote overrides, then install every enabled feature.
    ///
    /// Never fails: every problem degrades the affected feature to inert.
    pub async fn start(config: &Config, host: &dyn HostBindings, main: MainThread) -> Self {
        let gate = Arc::new(FeatureGate::from_config(config).await);
        Self::with_gate(config, gate, host, main, Handle::current())
    }

    /// Install with an already-built gate.
    pub fn with_gate(
        config: &Config,
        gate: Arc<FeatureGate>,
        host: &dyn HostBindings,
        main: MainThread,
        runtime: Handle,
    ) -> Self {
        let stats = Arc::new(LeakStats::new());
        let ctx = CoordinatorContext {
            gate: Arc::clone(&gate),
            stats: Arc::clone(&stats),
            main: main.clone(),
            runtime,
            settle_delay: config.reconciler.settle_delay(),
        };
        let (table, report) = Coordinator::new(host, ctx).install();
        info!(
            active = report.features.iter().filter(|f| f.active).count(),
            "hostpatch installed"
        );
        Self {
            gate,
            table: Arc::new(table),
            report,
            commands: OperatorCommands::new(Arc::clone(&stats), config.remediation.bytes_per_element),
            stats,
            bridge: CommandBridge::new(host.command_dispatcher(), main),
        }
    }

    /// Feature gate in effect.
    pub fn gate(&self) -> &Arc<FeatureGate> {
        &self.gate
    }

    /// Installed hooks.
    pub fn table(&self) -> &Arc<InterceptTable> {
        &self.table
    }

    /// Load-time installation report.
    pub fn report(&self) -> &InstallReport {
        &self.report
    }

    /// Remediation counters.
    pub fn stats(&self) -> &Arc<LeakStats> {
        &self.stats
    }

    /// Operator command handlers.
    pub fn commands(&self) -> &OperatorCommands {
        &self.commands
    }

    /// Command submission API.
    pub fn bridge(&self) -> &CommandBridge {
        &self.bridge
    }

    /// Forward a host event to the installed post-hooks.
    pub fn dispatch(&self, event: HostEvent) -> bool {
        self.table.dispatch(event)
    }
}
