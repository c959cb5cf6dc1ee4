//! Hosts and families: the two shared scopes above a chart

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use hibench_common::sync::Mutex;
use tracing::debug;

use super::ports::{AlarmLinker, NoopAlarmLinker};
use crate::errors::CoreResult;
use crate::registry::{RegistryOptions, Scope, VariableIndex};
use crate::VARIABLES_TARGET;

/// A monitored host with its host-wide variable table
pub struct Host {
    hostname: String,
    options: RegistryOptions,
    variables: VariableIndex,
    families: Mutex<AHashMap<String, Arc<Family>>>,
    linker: Arc<dyn AlarmLinker>,
}

impl Host {
    /// Host without an alarm engine
    pub fn new(hostname: &str, options: RegistryOptions) -> Arc<Self> {
        Self::with_linker(hostname, options, Arc::new(NoopAlarmLinker))
    }

    pub fn with_linker(hostname: &str, options: RegistryOptions, linker: Arc<dyn AlarmLinker>) -> Arc<Self> {
        debug!(target: VARIABLES_TARGET, host = hostname, "host created");
        Arc::new(Self {
            hostname: hostname.to_string(),
            options,
            variables: VariableIndex::new(Scope::Host, hostname, options.duplicate_lookup),
            families: Mutex::with_label(format!("families of {hostname}"), AHashMap::new()),
            linker,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn options(&self) -> RegistryOptions {
        self.options
    }

    /// Host-wide table: `<chart-id>.<variable>` and `<chart-name>.<variable>`
    pub fn variables(&self) -> &VariableIndex {
        &self.variables
    }

    /// The family called `name`, created on first use
    ///
    /// # Errors
    /// Fails when the family map lock is poisoned.
    pub fn family(&self, name: &str) -> CoreResult<Arc<Family>> {
        let mut families = self.families.lock()?;
        let family = families.entry(name.to_string()).or_insert_with(|| {
            debug!(target: VARIABLES_TARGET, host = %self.hostname, family = name, "family created");
            Arc::new(Family {
                name: name.to_string(),
                variables: VariableIndex::new(
                    Scope::Family,
                    &format!("{}/{name}", self.hostname),
                    self.options.duplicate_lookup,
                ),
            })
        });
        Ok(Arc::clone(family))
    }

    pub(crate) fn linker(&self) -> &Arc<dyn AlarmLinker> {
        &self.linker
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("hostname", &self.hostname)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Group of charts sharing a family-wide variable table
#[derive(Debug)]
pub struct Family {
    name: String,
    variables: VariableIndex,
}

impl Family {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Family-wide table: `<chart-id>.<variable>` and `<chart-name>.<variable>`
    pub fn variables(&self) -> &VariableIndex {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_is_shared_by_name() {
        let host = Host::new("web01", RegistryOptions::default());
        let cpu = host.family("cpu").unwrap();
        let again = host.family("cpu").unwrap();
        let disk = host.family("disk").unwrap();

        assert!(Arc::ptr_eq(&cpu, &again));
        assert!(!Arc::ptr_eq(&cpu, &disk));
        assert_eq!(disk.name(), "disk");
        assert_eq!(cpu.variables().scope(), Scope::Family);
        assert_eq!(host.variables().scope(), Scope::Host);
    }
}
