//! Signal catalog
//!
//! The catalog describes every known data source and signal. It is built once at startup from
//! two reference tables (sources and signals) and is read-only afterwards, so it can be shared
//! between requests without locking.
//!
//! Besides descriptive metadata the catalog answers two questions for the query pipeline:
//!
//! * Is a signal stored directly, or derived on the fly from a base signal, and if so by which
//!   [Transform]?
//! * Which storage key does an externally advertised source name use? Several external sources
//!   may share one storage key, in which case rows are mapped back by signal.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EpidataError;
use crate::selectors::{SourceSignalPair, Values};
use crate::transform::Transform;
use crate::types::TimeType;

static DEFAULT_SOURCES: &str = include_str!("../data/db_sources.json");
static DEFAULT_SIGNALS: &str = include_str!("../data/db_signals.json");

/// Storage format of a signal's values
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFormat {
    Raw,
    Percent,
    Fraction,
    Per100k,
    Count,
    RawCount,
}

/// A (source, signal) identifier
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SignalKey {
    pub source: String,
    pub signal: String,
}

impl SignalKey {
    pub fn new(source: &str, signal: &str) -> Self {
        Self {
            source: source.to_string(),
            signal: signal.to_string(),
        }
    }
}

/// Catalog entry for one signal
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataSignal {
    pub source: String,
    pub signal: String,
    /// The signal this one is derived from. Equal to `signal` for base signals.
    #[serde(default)]
    pub signal_basename: String,
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    pub time_type: TimeType,
    pub format: SignalFormat,
    #[serde(default)]
    pub is_cumulative: bool,
    #[serde(default)]
    pub is_smoothed: bool,
    #[serde(default)]
    pub has_stderr: bool,
    #[serde(default)]
    pub has_sample_size: bool,
    /// Whether the signal is computed from its base signal at query time.
    #[serde(default)]
    pub compute_from_base: bool,
}

impl DataSignal {
    pub fn key(&self) -> SignalKey {
        SignalKey::new(&self.source, &self.signal)
    }
}

/// Catalog entry for one source
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataSource {
    pub source: String,
    /// Storage key of the source. Equal to `source` unless the source is an alias.
    #[serde(default)]
    pub db_source: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub signals: Vec<DataSignal>,
}

/// A requested signal that is computed from a stored base signal
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedSignal {
    pub signal: SignalKey,
    pub base: SignalKey,
    pub transform: Transform,
}

/// How a list of requested signals is satisfied
#[derive(Debug, Default, PartialEq)]
pub struct SignalPlan {
    /// Signals read directly from storage
    pub direct: Vec<SourceSignalPair>,
    /// Signals computed from a base signal
    pub derived: Vec<DerivedSignal>,
}

/// Maps storage source keys in result rows back to the requested external source names.
#[derive(Debug, Default)]
pub struct SourceMapper {
    by_signal: HashMap<SignalKey, String>,
    by_source: HashMap<String, String>,
}

impl SourceMapper {
    /// Returns the external source name for a row read from storage.
    pub fn external_source(&self, db_source: &str, signal: &str) -> String {
        self.by_signal
            .get(&SignalKey::new(db_source, signal))
            .or_else(|| self.by_source.get(db_source))
            .cloned()
            .unwrap_or_else(|| db_source.to_string())
    }
}

/// The immutable signal catalog
#[derive(Debug, Default)]
pub struct Catalog {
    sources: Vec<DataSource>,
    source_index: HashMap<String, usize>,
    signal_index: HashMap<SignalKey, (usize, usize)>,
}

/// Build the catalog from reference tables.
///
/// The built-in tables are used for any path that is not provided.
///
/// # Arguments
///
/// * `sources_file`: Optional path to a JSON list of sources
/// * `signals_file`: Optional path to a JSON list of signals
pub fn initialize_catalog(
    sources_file: Option<&Path>,
    signals_file: Option<&Path>,
) -> Result<Catalog, EpidataError> {
    let sources: Vec<DataSource> = load_table(sources_file, DEFAULT_SOURCES)?;
    let signals: Vec<DataSignal> = load_table(signals_file, DEFAULT_SIGNALS)?;
    let catalog = Catalog::new(sources, signals);
    tracing::info!(
        sources = catalog.sources.len(),
        signals = catalog.signal_index.len(),
        "loaded signal catalog"
    );
    Ok(catalog)
}

fn load_table<T: serde::de::DeserializeOwned>(
    path: Option<&Path>,
    default: &str,
) -> Result<T, EpidataError> {
    match path {
        Some(path) => {
            let display = path.display().to_string();
            let contents = std::fs::read_to_string(path).map_err(|source| {
                EpidataError::CatalogIo {
                    path: display.clone(),
                    source,
                }
            })?;
            serde_json::from_str(&contents).map_err(|source| EpidataError::CatalogParse {
                path: display,
                source,
            })
        }
        None => serde_json::from_str(default).map_err(|source| EpidataError::CatalogParse {
            path: "<built-in>".to_string(),
            source,
        }),
    }
}

impl Catalog {
    /// Build a catalog, attaching each signal to its source.
    ///
    /// Signals of unknown sources are ignored.
    pub fn new(sources: Vec<DataSource>, signals: Vec<DataSignal>) -> Self {
        let mut catalog = Catalog::default();
        for mut source in sources {
            if source.db_source.is_empty() {
                source.db_source.clone_from(&source.source);
            }
            source.signals.clear();
            catalog
                .source_index
                .insert(source.source.clone(), catalog.sources.len());
            catalog.sources.push(source);
        }
        for mut signal in signals {
            if signal.signal_basename.is_empty() {
                signal.signal_basename.clone_from(&signal.signal);
            }
            let Some(&source_index) = catalog.source_index.get(&signal.source) else {
                tracing::warn!(
                    source = %signal.source,
                    signal = %signal.signal,
                    "ignoring signal of unknown source"
                );
                continue;
            };
            let signals = &mut catalog.sources[source_index].signals;
            catalog
                .signal_index
                .insert(signal.key(), (source_index, signals.len()));
            signals.push(signal);
        }
        catalog
    }

    /// All sources, in reference table order.
    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn source(&self, source: &str) -> Option<&DataSource> {
        self.source_index.get(source).map(|&i| &self.sources[i])
    }

    pub fn signal(&self, source: &str, signal: &str) -> Option<&DataSignal> {
        self.signal_index
            .get(&SignalKey::new(source, signal))
            .map(|&(i, j)| &self.sources[i].signals[j])
    }

    /// Returns the base signal and the transform deriving `signal` from it.
    ///
    /// Signals that are not computed from a base resolve to themselves with
    /// [Transform::Identity]. Returns `None` if the signal is unknown, or if it is derived from a
    /// base signal that is missing from the catalog.
    pub fn resolve_derivation(&self, source: &str, signal: &str) -> Option<(SignalKey, Transform)> {
        let data_signal = self.signal(source, signal)?;
        if !data_signal.compute_from_base || data_signal.signal_basename == data_signal.signal {
            return Some((data_signal.key(), Transform::Identity));
        }
        let base = self.signal(source, &data_signal.signal_basename)?;
        let transform = match (data_signal.is_cumulative, data_signal.is_smoothed) {
            (false, false) => Transform::Diff,
            (true, true) => Transform::Smooth,
            (false, true) => Transform::DiffSmooth,
            (true, false) => Transform::Identity,
        };
        Some((base.key(), transform))
    }

    /// Replace `*` signal selectors of known sources with their catalog signal lists.
    pub fn expand_wildcards(&self, pairs: &[SourceSignalPair]) -> Vec<SourceSignalPair> {
        pairs
            .iter()
            .map(|pair| match (&pair.signals, self.source(&pair.source)) {
                (Values::All, Some(source)) if !source.signals.is_empty() => {
                    SourceSignalPair::new(
                        &pair.source,
                        Values::List(source.signals.iter().map(|s| s.signal.clone()).collect()),
                    )
                }
                _ => pair.clone(),
            })
            .collect()
    }

    /// Check that no requested catalog signal has a different time type to the time arguments.
    pub fn check_time_type(
        &self,
        pairs: &[SourceSignalPair],
        time_type: TimeType,
    ) -> Result<(), EpidataError> {
        for pair in pairs {
            let Values::List(signals) = &pair.signals else {
                continue;
            };
            for signal in signals {
                if let Some(data_signal) = self.signal(&pair.source, signal) {
                    if data_signal.time_type != time_type {
                        return Err(EpidataError::TimeTypeMismatch {
                            time_type,
                            time_type_signal: data_signal.time_type,
                            data_source: pair.source.clone(),
                            signal: signal.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Split requested signals into those read directly and those derived from a base signal.
    ///
    /// Signals unknown to the catalog are read directly. Derived signals whose base is missing
    /// from the catalog are dropped, so they produce no rows.
    pub fn plan(&self, pairs: &[SourceSignalPair]) -> SignalPlan {
        let mut plan = SignalPlan::default();
        for pair in pairs {
            let Values::List(signals) = &pair.signals else {
                plan.direct.push(pair.clone());
                continue;
            };
            let mut direct = Vec::new();
            for signal in signals {
                if self.signal(&pair.source, signal).is_none() {
                    direct.push(signal.clone());
                    continue;
                }
                match self.resolve_derivation(&pair.source, signal) {
                    Some((base, _)) if base.signal == *signal => direct.push(signal.clone()),
                    Some((base, transform)) => plan.derived.push(DerivedSignal {
                        signal: SignalKey::new(&pair.source, signal),
                        base,
                        transform,
                    }),
                    None => tracing::debug!(
                        source = %pair.source,
                        %signal,
                        "base signal missing from catalog"
                    ),
                }
            }
            if !direct.is_empty() {
                plan.direct
                    .push(SourceSignalPair::new(&pair.source, Values::List(direct)));
            }
        }
        plan
    }

    /// Rewrite source names to their storage keys.
    ///
    /// Returns the rewritten pairs, merged by storage key, and a mapper from result rows back to
    /// the requested source names.
    pub fn resolve_alias(
        &self,
        pairs: &[SourceSignalPair],
    ) -> (Vec<SourceSignalPair>, SourceMapper) {
        let mut mapper = SourceMapper::default();
        let mut rewritten: Vec<SourceSignalPair> = Vec::new();
        for pair in pairs {
            let db_source = self
                .source(&pair.source)
                .map(|source| source.db_source.as_str())
                .unwrap_or(&pair.source);
            if db_source != pair.source {
                match &pair.signals {
                    Values::List(signals) => {
                        // One storage row gets one label: the alias owning the signal in the
                        // catalog, otherwise the first alias that asked for it.
                        for signal in signals {
                            let owned = self.signal(&pair.source, signal).is_some();
                            match mapper.by_signal.entry(SignalKey::new(db_source, signal)) {
                                Entry::Vacant(entry) => {
                                    entry.insert(pair.source.clone());
                                }
                                Entry::Occupied(mut entry) => {
                                    if owned && self.signal(entry.get(), signal).is_none() {
                                        entry.insert(pair.source.clone());
                                    }
                                }
                            }
                        }
                    }
                    Values::All => {
                        mapper
                            .by_source
                            .entry(db_source.to_string())
                            .or_insert_with(|| pair.source.clone());
                    }
                }
            }
            match rewritten.iter_mut().find(|p| p.source == db_source) {
                Some(existing) => existing.signals = existing.signals.merge(&pair.signals),
                None => rewritten.push(SourceSignalPair::new(db_source, pair.signals.clone())),
            }
        }
        (rewritten, mapper)
    }
}
