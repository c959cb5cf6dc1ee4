//! Chart-variable bindings
//!
//! A [`ChartVariable`] exposes one value cell under five keys:
//!
//! | table  | key                        |
//! |--------|----------------------------|
//! | chart  | `<variable>`               |
//! | family | `<chart-id>.<variable>`    |
//! | family | `<chart-name>.<variable>`  |
//! | host   | `<chart-id>.<variable>`    |
//! | host   | `<chart-name>.<variable>`  |
//!
//! The registrations are kept next to the binding in its chart's list and are
//! only touched with the chart's write lock held.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use tracing::{debug, error};

use super::chart::{Chart, ChartState};
use crate::errors::{CoreError, CoreResult};
use crate::registry::{
    compose_key, number_changed, simple_hash, Value, ValueCell, Variable, VariableIndex, VariableOptions,
    VariableOwner, VariableType,
};
use crate::VARIABLES_TARGET;

bitflags! {
    /// Options of a chart-variable binding
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChartVariableOptions: u32 {
        /// The binding allocated its value cell: a custom variable
        const ALLOCATED = 1 << 0;
    }
}

/// One metric value registered under the chart, family and host scopes
pub struct ChartVariable {
    variable: String,
    hash: u32,
    value: Arc<ValueCell>,
    options: ChartVariableOptions,
    chart: Weak<Chart>,
    freed: AtomicBool,
}

impl ChartVariable {
    /// Bind `value` to `chart` as `variable`
    ///
    /// Takes the chart's write lock. `value` is borrowed unless `options`
    /// carries [`ChartVariableOptions::ALLOCATED`].
    ///
    /// # Errors
    /// Fails when a lock is poisoned; nothing stays registered in that case.
    pub fn create(
        chart: &Arc<Chart>,
        variable: &str,
        value: Arc<ValueCell>,
        options: ChartVariableOptions,
    ) -> CoreResult<Arc<Self>> {
        let mut state = chart.state().write_lock()?;
        Self::create_locked(chart, &mut state, variable, value, options)
    }

    pub(crate) fn create_locked(
        chart: &Arc<Chart>,
        state: &mut ChartState,
        variable: &str,
        value: Arc<ValueCell>,
        options: ChartVariableOptions,
    ) -> CoreResult<Arc<Self>> {
        debug!(
            target: VARIABLES_TARGET,
            "RRDVARSET create for chart id '{}' name '{}' with variable name '{variable}'",
            state.id,
            state.name
        );

        let binding = Arc::new(Self {
            variable: variable.to_string(),
            hash: simple_hash(variable),
            value,
            options,
            chart: Arc::downgrade(chart),
            freed: AtomicBool::new(false),
        });

        let mut entry = BindingEntry { binding: Arc::clone(&binding), registrations: Registrations::default() };
        entry.create_variables(chart, &state.id, &state.name)?;
        state.bindings.push(entry);
        Ok(binding)
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn options(&self) -> ChartVariableOptions {
        self.options
    }

    pub fn variable_type(&self) -> VariableType {
        self.value.variable_type()
    }

    /// Whether the binding owns its value: a custom variable
    pub fn is_custom(&self) -> bool {
        self.options.contains(ChartVariableOptions::ALLOCATED)
    }

    /// Whether [`free`](Self::free) ran or the chart was dropped
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    pub fn cell(&self) -> &Arc<ValueCell> {
        &self.value
    }

    /// # Errors
    /// Fails only when a text cell's lock is poisoned.
    pub fn value(&self) -> CoreResult<Value> {
        self.value.load()
    }

    /// The owning chart
    ///
    /// # Errors
    /// Returns [`CoreError::ChartReleased`] once the chart is gone.
    pub fn chart(&self) -> CoreResult<Arc<Chart>> {
        self.chart.upgrade().ok_or_else(|| CoreError::ChartReleased(self.variable.clone()))
    }

    /// Re-register the five keys from the chart's current id and name
    ///
    /// Idempotent: the previous registrations are removed first.
    ///
    /// # Errors
    /// Returns [`CoreError::BindingNotFound`] for a freed binding.
    pub fn create_variables(&self) -> CoreResult<()> {
        let chart = self.chart()?;
        let mut state = chart.state().write_lock()?;
        let Some(position) = state.position_of(self) else {
            return Err(self.not_found(&state.id));
        };

        let ChartState { id, name, bindings } = &mut *state;
        bindings[position].create_variables(&chart, id.as_str(), name.as_str())
    }

    /// Unlink from the chart and remove all five registrations
    ///
    /// # Errors
    /// Returns [`CoreError::BindingNotFound`] (after reporting it) when the
    /// binding is missing from its chart's list.
    pub fn free(&self) -> CoreResult<()> {
        let chart = self.chart()?;
        let mut state = chart.state().write_lock()?;

        debug!(
            target: VARIABLES_TARGET,
            "RRDSETVAR free for chart id '{}' name '{}', variable '{}'",
            state.id,
            state.name,
            self.variable
        );

        let Some(position) = state.position_of(self) else {
            let err = self.not_found(&state.id);
            error!(target: VARIABLES_TARGET, "RRDSETVAR: {err}");
            return Err(err);
        };

        let mut entry = state.bindings.remove(position);
        free_registrations(&chart, self, &mut entry.registrations);
        drop(state);

        self.mark_freed();
        Ok(())
    }

    /// Set the value of a custom variable
    ///
    /// When the value changes the chart is marked for re-export upstream.
    ///
    /// # Errors
    /// Returns [`CoreError::NotCustom`] for collector-owned bindings and
    /// [`CoreError::BindingNotFound`] once freed.
    pub fn set_custom_value(&self, value: f64) -> CoreResult<()> {
        let chart = self.chart()?;

        if !self.is_custom() {
            let err = CoreError::NotCustom {
                name: self.variable.clone(),
                chart: chart.id()?,
                host: chart.host().hostname().to_string(),
            };
            error!(target: VARIABLES_TARGET, value, "RRDSETVAR: cannot set value: {err}");
            return Err(err);
        }
        if self.is_freed() {
            return Err(self.not_found(&chart.id()?));
        }

        let Some(old) = self.value.swap_number(value) else {
            return Err(CoreError::NotCustom {
                name: self.variable.clone(),
                chart: chart.id()?,
                host: chart.host().hostname().to_string(),
            });
        };

        if number_changed(old, value) {
            chart.clear_exposed_upstream();
            debug!(target: VARIABLES_TARGET, old, new = value, "custom variable '{}' changed", self.variable);
        }
        Ok(())
    }

    pub(crate) fn mark_freed(&self) {
        if !self.freed.swap(true, Ordering::AcqRel) && self.is_custom() {
            debug!(target: VARIABLES_TARGET, "releasing value of custom variable '{}'", self.variable);
        }
    }

    fn not_found(&self, chart: &str) -> CoreError {
        CoreError::BindingNotFound { name: self.variable.clone(), chart: chart.to_string() }
    }
}

impl VariableOwner for ChartVariable {
    fn describe(&self) -> String {
        format!("chart variable '{}'", self.variable)
    }
}

impl fmt::Debug for ChartVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChartVariable")
            .field("variable", &self.variable)
            .field("options", &self.options)
            .field("freed", &self.is_freed())
            .finish_non_exhaustive()
    }
}

/// A binding and the five records it registered
#[derive(Debug)]
pub(crate) struct BindingEntry {
    pub(crate) binding: Arc<ChartVariable>,
    pub(crate) registrations: Registrations,
}

impl BindingEntry {
    /// Drop the current registrations and register the five keys again
    pub(crate) fn create_variables(&mut self, chart: &Chart, id: &str, name: &str) -> CoreResult<()> {
        free_registrations(chart, &self.binding, &mut self.registrations);

        let max_len = chart.host().options().max_variable_length;
        self.registrations.key_fullid = compose_key(id, &self.binding.variable, max_len);
        self.registrations.key_fullname = compose_key(name, &self.binding.variable, max_len);

        if let Err(err) = register_all(chart, &self.binding, &mut self.registrations) {
            free_registrations(chart, &self.binding, &mut self.registrations);
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registrations {
    key_fullid: String,
    key_fullname: String,
    local: Option<Arc<Variable>>,
    family_id: Option<Arc<Variable>>,
    family_name: Option<Arc<Variable>>,
    host_id: Option<Arc<Variable>>,
    host_name: Option<Arc<Variable>>,
}

impl Registrations {
    pub(crate) fn key_fullid(&self) -> &str {
        &self.key_fullid
    }

    pub(crate) fn key_fullname(&self) -> &str {
        &self.key_fullname
    }
}

fn register_all(chart: &Chart, binding: &Arc<ChartVariable>, registrations: &mut Registrations) -> CoreResult<()> {
    let owner: Weak<dyn VariableOwner> = Arc::downgrade(binding) as Weak<dyn VariableOwner>;
    let register = |index: &VariableIndex, key: &str| {
        index.create_and_index(key, Arc::clone(&binding.value), VariableOptions::empty(), Some(owner.clone()))
    };

    registrations.local = Some(register(chart.variables(), &binding.variable)?);

    let family = chart.family().variables();
    registrations.family_id = Some(register(family, &registrations.key_fullid)?);
    registrations.family_name = Some(register(family, &registrations.key_fullname)?);

    let host = chart.host().variables();
    registrations.host_id = Some(register(host, &registrations.key_fullid)?);
    registrations.host_name = Some(register(host, &registrations.key_fullname)?);

    Ok(())
}

/// Remove whatever registrations exist; failures are reported by the table
pub(crate) fn free_registrations(chart: &Chart, binding: &ChartVariable, registrations: &mut Registrations) {
    let family = chart.family().variables();
    let host = chart.host().variables();

    let slots = [
        (&mut registrations.local, chart.variables()),
        (&mut registrations.family_id, family),
        (&mut registrations.family_name, family),
        (&mut registrations.host_id, host),
        (&mut registrations.host_name, host),
    ];

    for (slot, index) in slots {
        if let Some(variable) = slot.take() {
            if let Err(err) = index.free(&variable) {
                debug!(target: VARIABLES_TARGET, "registration of '{}' already gone: {err}", binding.variable);
            }
        }
    }

    registrations.key_fullid.clear();
    registrations.key_fullname.clear();
}
