//! Scoped symbol tables
//!
//! One [`VariableIndex`] exists per chart, per family and per host. Records
//! are bucketed by [`simple_hash`] and compared by name inside a bucket.
//! Registration does not deduplicate: several records may carry the same
//! name, and [`DuplicateLookup`] decides which one a lookup returns.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use bitflags::bitflags;
use hibench_common::error::CommonError;
use hibench_common::sync::RwLock;
use hibench_domain::{DuplicateLookup, RegistryConfig};
use serde::Serialize;
use tracing::{debug, error};

use super::names::simple_hash;
use super::value::{Value, ValueCell, VariableType};
use crate::errors::CoreResult;
use crate::VARIABLES_TARGET;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one registered record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariableId(u64);

impl VariableId {
    fn next() -> Self {
        Self(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Options of a registered variable
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VariableOptions: u32 {
        /// The value cell was allocated for this variable and is released with it
        const ALLOCATED = 1 << 0;
    }
}

/// Which table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Chart table, local names
    Local,
    Family,
    Host,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Family => "family",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whatever registered a record; reached through a non-owning reference
pub trait VariableOwner: Send + Sync {
    /// Human-readable description for diagnostics
    fn describe(&self) -> String;
}

/// Registry behaviour shared by every table of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub duplicate_lookup: DuplicateLookup,
    pub max_variable_length: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from(&RegistryConfig::default())
    }
}

impl From<&RegistryConfig> for RegistryOptions {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            duplicate_lookup: config.duplicate_lookup,
            max_variable_length: config.max_variable_length,
        }
    }
}

/// One record in one table
pub struct Variable {
    id: VariableId,
    name: String,
    hash: u32,
    scope: Scope,
    kind: VariableType,
    value: Arc<ValueCell>,
    options: VariableOptions,
    owner: Option<Weak<dyn VariableOwner>>,
}

impl Variable {
    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn variable_type(&self) -> VariableType {
        self.kind
    }

    pub fn options(&self) -> VariableOptions {
        self.options
    }

    /// Shared value cell; the record never owns it exclusively
    pub fn cell(&self) -> &Arc<ValueCell> {
        &self.value
    }

    /// Snapshot of the current value
    ///
    /// # Errors
    /// Fails only when a text cell's lock is poisoned.
    pub fn value(&self) -> CoreResult<Value> {
        self.value.load()
    }

    /// Description of the registering owner, if it is still alive
    pub fn owner(&self) -> Option<String> {
        self.owner.as_ref().and_then(Weak::upgrade).map(|owner| owner.describe())
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("type", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Hash-indexed symbol table of one scope
#[derive(Debug)]
pub struct VariableIndex {
    scope: Scope,
    lookup: DuplicateLookup,
    buckets: RwLock<AHashMap<u32, Vec<Arc<Variable>>>>,
}

impl VariableIndex {
    pub fn new(scope: Scope, label: &str, lookup: DuplicateLookup) -> Self {
        Self {
            scope,
            lookup,
            buckets: RwLock::with_label(format!("{scope} variables of {label}"), AHashMap::new()),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Register a new record under `name`
    ///
    /// Never deduplicates. The record shares `value` with its owner.
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn create_and_index(
        &self,
        name: &str,
        value: Arc<ValueCell>,
        options: VariableOptions,
        owner: Option<Weak<dyn VariableOwner>>,
    ) -> CoreResult<Arc<Variable>> {
        let variable = Arc::new(Variable {
            id: VariableId::next(),
            name: name.to_string(),
            hash: simple_hash(name),
            scope: self.scope,
            kind: value.variable_type(),
            value,
            options,
            owner,
        });

        debug!(
            target: VARIABLES_TARGET,
            scope = %self.scope,
            id = %variable.id,
            "RRDVAR create variable '{}'",
            variable.name
        );

        let mut buckets = self.buckets.write_lock()?;
        buckets.entry(variable.hash).or_default().push(Arc::clone(&variable));
        Ok(variable)
    }

    /// Remove exactly this record
    ///
    /// The value cell is released with the record when it is
    /// [`VariableOptions::ALLOCATED`]; borrowed cells stay with their owner.
    ///
    /// # Errors
    /// Returns `CommonError::NotFound` (after reporting it) when the record
    /// is not in this table, and fails when the table lock is poisoned.
    pub fn free(&self, variable: &Arc<Variable>) -> CoreResult<()> {
        let mut buckets = self.buckets.write_lock()?;

        let removed = match buckets.get_mut(&variable.hash) {
            Some(bucket) => {
                let position = bucket.iter().position(|candidate| candidate.id == variable.id);
                let removed = position.map(|position| bucket.remove(position));
                if bucket.is_empty() {
                    buckets.remove(&variable.hash);
                }
                removed
            }
            None => None,
        };
        drop(buckets);

        match removed {
            Some(record) => {
                debug!(
                    target: VARIABLES_TARGET,
                    scope = %self.scope,
                    id = %record.id,
                    owned = record.options.contains(VariableOptions::ALLOCATED),
                    "RRDVAR free variable '{}'",
                    record.name
                );
                Ok(())
            }
            None => {
                error!(
                    target: VARIABLES_TARGET,
                    scope = %self.scope,
                    id = %variable.id,
                    "RRDVAR: variable '{}' is not indexed in this table",
                    variable.name
                );
                Err(CommonError::not_found_with_id("Variable", format!("{} {}", variable.name, variable.id)).into())
            }
        }
    }

    /// Record registered under `name`, honouring the duplicate policy
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn find(&self, name: &str) -> CoreResult<Option<Arc<Variable>>> {
        let hash = simple_hash(name);
        let buckets = self.buckets.read_lock()?;
        let Some(bucket) = buckets.get(&hash) else {
            return Ok(None);
        };

        let mut matching = bucket.iter().filter(|variable| variable.name == name);
        let found = match self.lookup {
            DuplicateLookup::MostRecent => matching.last(),
            DuplicateLookup::FirstRegistered => matching.next(),
        };
        Ok(found.cloned())
    }

    /// Every record registered under `name`, oldest first
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn find_all(&self, name: &str) -> CoreResult<Vec<Arc<Variable>>> {
        let hash = simple_hash(name);
        let buckets = self.buckets.read_lock()?;
        Ok(buckets
            .get(&hash)
            .map(|bucket| bucket.iter().filter(|variable| variable.name == name).cloned().collect())
            .unwrap_or_default())
    }

    /// Whether this exact record is registered
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn contains(&self, variable: &Variable) -> CoreResult<bool> {
        let buckets = self.buckets.read_lock()?;
        Ok(buckets
            .get(&variable.hash)
            .is_some_and(|bucket| bucket.iter().any(|candidate| candidate.id == variable.id)))
    }

    /// Number of records
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.buckets.read_lock()?.values().map(Vec::len).sum())
    }

    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Sorted names of all records, duplicates included
    ///
    /// # Errors
    /// Fails when the table lock is poisoned.
    pub fn names(&self) -> CoreResult<Vec<String>> {
        let buckets = self.buckets.read_lock()?;
        let mut names: Vec<String> =
            buckets.values().flat_map(|bucket| bucket.iter().map(|variable| variable.name.clone())).collect();
        names.sort_unstable();
        Ok(names)
    }
}
