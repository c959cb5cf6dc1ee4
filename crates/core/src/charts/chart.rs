//! Charts: identity, binding list and scoped variable resolution
//!
//! A chart owns the list of its [`ChartVariable`] bindings together with the
//! five registrations each binding holds. Both live behind the chart's
//! reader/writer lock, so anybody holding [`Chart::read_lock`] sees either
//! all five registrations of a binding or none of them.
//!
//! Lock order is chart, then family table, then host table. Table locks are
//! only ever taken briefly inside a chart lock and never the other way
//! around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hibench_common::sync::{ReadGuard, RwLock};
use serde::Serialize;
use tracing::{debug, error};

use super::binding::{free_registrations, BindingEntry, ChartVariable, ChartVariableOptions};
use super::host::{Family, Host};
use crate::errors::{CoreError, CoreResult};
use crate::registry::{fix_name, simple_hash, Scope, Value, ValueCell, Variable, VariableIndex, VariableType};
use crate::VARIABLES_TARGET;

/// A chart of one host, member of one family
#[derive(Debug)]
pub struct Chart {
    host: Arc<Host>,
    family: Arc<Family>,
    variables: VariableIndex,
    state: RwLock<ChartState>,
    exposed_upstream: AtomicBool,
}

#[derive(Debug)]
pub(crate) struct ChartState {
    pub(crate) id: String,
    pub(crate) name: String,
    /// Oldest first; scans walk it backwards so the newest binding wins
    pub(crate) bindings: Vec<BindingEntry>,
}

impl ChartState {
    pub(crate) fn position_of(&self, binding: &ChartVariable) -> Option<usize> {
        self.bindings.iter().position(|entry| std::ptr::eq(Arc::as_ptr(&entry.binding), binding))
    }
}

/// Exporter view of one binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartVariableSnapshot {
    pub variable: String,
    pub full_id: String,
    pub full_name: String,
    pub variable_type: VariableType,
    pub value: Value,
    pub custom: bool,
}

impl Chart {
    /// Create a chart on `host`, in the family called `family`
    ///
    /// # Errors
    /// Fails when the host's family map lock is poisoned.
    pub fn new(host: &Arc<Host>, family: &str, id: &str, name: &str) -> CoreResult<Arc<Self>> {
        let family = host.family(family)?;
        debug!(
            target: VARIABLES_TARGET,
            host = host.hostname(),
            family = family.name(),
            "chart created with id '{id}' name '{name}'"
        );

        Ok(Arc::new(Self {
            variables: VariableIndex::new(Scope::Local, id, host.options().duplicate_lookup),
            host: Arc::clone(host),
            family,
            state: RwLock::with_label(
                format!("chart {id}"),
                ChartState { id: id.to_string(), name: name.to_string(), bindings: Vec::new() },
            ),
            exposed_upstream: AtomicBool::new(false),
        }))
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn family(&self) -> &Arc<Family> {
        &self.family
    }

    /// Chart-local table
    pub fn variables(&self) -> &VariableIndex {
        &self.variables
    }

    /// # Errors
    /// Fails when the chart lock is poisoned.
    pub fn id(&self) -> CoreResult<String> {
        Ok(self.state.read_lock()?.id.clone())
    }

    /// # Errors
    /// Fails when the chart lock is poisoned.
    pub fn name(&self) -> CoreResult<String> {
        Ok(self.state.read_lock()?.name.clone())
    }

    /// Consistent read view of the chart and its registrations
    ///
    /// # Errors
    /// Fails when the chart lock is poisoned.
    #[track_caller]
    pub fn read_lock(&self) -> CoreResult<ChartView<'_>> {
        Ok(ChartView { chart: self, state: self.state.read_lock()? })
    }

    pub(crate) fn state(&self) -> &RwLock<ChartState> {
        &self.state
    }

    /// Resolve `name`: chart table, then family, then host
    ///
    /// # Errors
    /// Fails when a lock on the way is poisoned.
    pub fn find_variable(&self, name: &str) -> CoreResult<Option<Arc<Variable>>> {
        self.read_lock()?.find_variable(name)
    }

    /// Number of bindings
    ///
    /// # Errors
    /// Fails when the chart lock is poisoned.
    pub fn binding_count(&self) -> CoreResult<usize> {
        Ok(self.state.read_lock()?.bindings.len())
    }

    /// Change the chart's id and name and re-register every binding
    ///
    /// Readers see either the old or the new keys. The alarm linker is
    /// notified once the chart lock is released.
    ///
    /// # Errors
    /// Fails when a lock is poisoned; registrations that could not be
    /// rebuilt are left out rather than half-built.
    pub fn rename(&self, id: &str, name: &str) -> CoreResult<()> {
        {
            let mut state = self.state.write_lock()?;
            debug!(
                target: VARIABLES_TARGET,
                "chart id '{}' name '{}' renamed to id '{id}' name '{name}'",
                state.id,
                state.name
            );
            state.id = id.to_string();
            state.name = name.to_string();
            self.rename_all_locked(&mut state)?;
        }
        self.host.linker().link_matching(self);
        Ok(())
    }

    /// Re-register every binding under the chart's current id and name, then
    /// re-link alarms
    ///
    /// # Errors
    /// Fails when a lock is poisoned.
    pub fn rename_all(&self) -> CoreResult<()> {
        {
            let mut state = self.state.write_lock()?;
            self.rename_all_locked(&mut state)?;
        }
        self.host.linker().link_matching(self);
        Ok(())
    }

    fn rename_all_locked(&self, state: &mut ChartState) -> CoreResult<()> {
        debug!(target: VARIABLES_TARGET, "RRDSETVAR rename for chart id '{}' name '{}'", state.id, state.name);

        let ChartState { id, name, bindings } = state;
        for entry in bindings.iter_mut() {
            entry.create_variables(self, id.as_str(), name.as_str())?;
        }
        Ok(())
    }

    /// Get or create the custom variable `name`
    ///
    /// The name is normalized with [`fix_name`] first, so `"Memory Free"` and
    /// `"memory_free"` are the same variable. A new custom variable starts
    /// undefined (`NaN`).
    ///
    /// # Errors
    /// Returns [`CoreError::NameConflict`] when a collector-owned binding
    /// already uses the name.
    pub fn create_custom_variable(self: &Arc<Self>, name: &str) -> CoreResult<Arc<ChartVariable>> {
        let fixed = fix_name(name);
        let hash = simple_hash(&fixed);

        let mut state = self.state.write_lock()?;

        let existing = state
            .bindings
            .iter()
            .rev()
            .find(|entry| entry.binding.hash() == hash && entry.binding.variable() == fixed)
            .map(|entry| Arc::clone(&entry.binding));

        if let Some(binding) = existing {
            if binding.is_custom() {
                return Ok(binding);
            }
            let err = CoreError::NameConflict {
                name: fixed,
                chart: state.id.clone(),
                host: self.host.hostname().to_string(),
            };
            error!(target: VARIABLES_TARGET, "RRDSETVAR: {err}");
            return Err(err);
        }

        ChartVariable::create_locked(
            self,
            &mut state,
            &fixed,
            Arc::new(ValueCell::undefined()),
            ChartVariableOptions::ALLOCATED,
        )
    }

    /// Every binding with its keys and current value, newest first
    ///
    /// # Errors
    /// Fails when a lock is poisoned.
    pub fn variables_snapshot(&self) -> CoreResult<Vec<ChartVariableSnapshot>> {
        let state = self.state.read_lock()?;
        state
            .bindings
            .iter()
            .rev()
            .map(|entry| -> CoreResult<ChartVariableSnapshot> {
                Ok(ChartVariableSnapshot {
                    variable: entry.binding.variable().to_string(),
                    full_id: entry.registrations.key_fullid().to_string(),
                    full_name: entry.registrations.key_fullname().to_string(),
                    variable_type: entry.binding.variable_type(),
                    value: entry.binding.value()?,
                    custom: entry.binding.is_custom(),
                })
            })
            .collect()
    }

    /// Whether the chart definition has been sent upstream since it last
    /// changed
    pub fn is_exposed_upstream(&self) -> bool {
        self.exposed_upstream.load(Ordering::Acquire)
    }

    /// Called by an exporter after sending the chart upstream
    pub fn mark_exposed_upstream(&self) {
        self.exposed_upstream.store(true, Ordering::Release);
    }

    pub(crate) fn clear_exposed_upstream(&self) {
        self.exposed_upstream.store(false, Ordering::Release);
    }
}

impl Drop for Chart {
    fn drop(&mut self) {
        let bindings = match self.state.get_mut() {
            Ok(state) => std::mem::take(&mut state.bindings),
            Err(err) => {
                error!(target: VARIABLES_TARGET, "cannot release chart variables: {err}");
                return;
            }
        };

        for mut entry in bindings {
            free_registrations(self, &entry.binding, &mut entry.registrations);
            entry.binding.mark_freed();
        }
    }
}

/// Read-locked view of a chart
///
/// Holding it keeps every binding's registrations stable.
pub struct ChartView<'a> {
    chart: &'a Chart,
    state: ReadGuard<'a, ChartState>,
}

impl ChartView<'_> {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn binding_count(&self) -> usize {
        self.state.bindings.len()
    }

    pub fn chart_variables(&self) -> &VariableIndex {
        &self.chart.variables
    }

    pub fn family_variables(&self) -> &VariableIndex {
        self.chart.family.variables()
    }

    pub fn host_variables(&self) -> &VariableIndex {
        self.chart.host.variables()
    }

    /// Resolve `name`, most specific scope first
    ///
    /// # Errors
    /// Fails when a table lock is poisoned.
    pub fn find_variable(&self, name: &str) -> CoreResult<Option<Arc<Variable>>> {
        for index in [self.chart_variables(), self.family_variables(), self.host_variables()] {
            if let Some(variable) = index.find(name)? {
                return Ok(Some(variable));
            }
        }
        Ok(None)
    }
}
