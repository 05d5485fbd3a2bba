//! Allocator configuration.

use std::{env, fmt, str::FromStr};

use crate::error::{AllocError, AllocResult};

/// Region size used when nothing else is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Environment variable holding the region capacity in bytes.
pub const CAPACITY_ENV: &str = "MEMREGION_CAPACITY";

/// Environment variable selecting the search mode.
pub const SEARCH_ENV: &str = "MEMREGION_SEARCH";

// Leaves room to round any accepted capacity up to a page.
const MAX_CAPACITY: usize = isize::MAX as usize / 2;

/// How the free-block search runs its two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
  /// One scoped thread per scan direction.
  #[default]
  Parallel,
  /// Forward then backward scan on the calling thread.
  Sequential,
}

impl FromStr for SearchMode {
  type Err = AllocError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "parallel" => Ok(Self::Parallel),
      "sequential" => Ok(Self::Sequential),
      other => Err(AllocError::config(format!("unknown search mode `{other}`"))),
    }
  }
}

impl fmt::Display for SearchMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Parallel => f.write_str("parallel"),
      Self::Sequential => f.write_str("sequential"),
    }
  }
}

/// Configuration for a [`RegionAllocator`](crate::RegionAllocator).
///
/// Read once, when the region is reserved on the first allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Requested region size in bytes, rounded up to whole pages.
  pub capacity: usize,
  /// Free-block search strategy.
  pub search: SearchMode,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      search: SearchMode::default(),
    }
  }
}

impl AllocatorConfig {
  /// Creates a configuration for a region of `capacity` bytes.
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      ..Self::default()
    }
  }

  /// Sets the region capacity.
  pub fn with_capacity(
    mut self,
    capacity: usize,
  ) -> Self {
    self.capacity = capacity;
    self
  }

  /// Sets the search mode.
  pub fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }

  /// Checks that the capacity can be mapped.
  pub fn validate(&self) -> AllocResult<()> {
    if self.capacity == 0 {
      return Err(AllocError::config("capacity must be greater than zero"));
    }
    if self.capacity > MAX_CAPACITY {
      return Err(AllocError::config(format!(
        "capacity {} exceeds the maximum of {}",
        self.capacity, MAX_CAPACITY
      )));
    }
    Ok(())
  }

  /// Builds a configuration from `MEMREGION_CAPACITY` and `MEMREGION_SEARCH`.
  pub fn from_env() -> AllocResult<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  /// Builds a configuration from an arbitrary key lookup, falling back to
  /// defaults for missing keys.
  pub fn from_lookup<F>(lookup: F) -> AllocResult<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(raw) = lookup(CAPACITY_ENV) {
      config.capacity = raw.trim().parse().map_err(|_| {
        AllocError::config(format!("{CAPACITY_ENV} must be a byte count, got `{raw}`"))
      })?;
    }

    if let Some(raw) = lookup(SEARCH_ENV) {
      config.search = raw.parse()?;
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn defaults() {
    let config = AllocatorConfig::default();
    assert_eq!(config.capacity, DEFAULT_CAPACITY);
    assert_eq!(config.search, SearchMode::Parallel);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn builder() {
    let config = AllocatorConfig::new(1 << 20).with_search(SearchMode::Sequential);
    assert_eq!(config.capacity, 1 << 20);
    assert_eq!(config.search, SearchMode::Sequential);

    let config = config.with_capacity(4096);
    assert_eq!(config.capacity, 4096);
  }

  #[test]
  fn zero_capacity_is_rejected() {
    assert!(AllocatorConfig::new(0).validate().is_err());
    assert!(AllocatorConfig::new(usize::MAX).validate().is_err());
  }

  #[test]
  fn search_mode_parsing() {
    assert_eq!("parallel".parse::<SearchMode>().unwrap(), SearchMode::Parallel);
    assert_eq!(" Sequential ".parse::<SearchMode>().unwrap(), SearchMode::Sequential);
    assert!("best-fit".parse::<SearchMode>().is_err());
    assert_eq!(SearchMode::Sequential.to_string(), "sequential");
  }

  #[test]
  fn lookup_overrides_defaults() {
    let config = AllocatorConfig::from_lookup(lookup_from(&[
      (CAPACITY_ENV, "65536"),
      (SEARCH_ENV, "sequential"),
    ]))
    .unwrap();

    assert_eq!(config.capacity, 65536);
    assert_eq!(config.search, SearchMode::Sequential);
  }

  #[test]
  fn lookup_with_nothing_set_is_default() {
    let config = AllocatorConfig::from_lookup(|_| None).unwrap();
    assert_eq!(config, AllocatorConfig::default());
  }

  #[test]
  fn lookup_rejects_garbage() {
    assert!(AllocatorConfig::from_lookup(lookup_from(&[(CAPACITY_ENV, "lots")])).is_err());
    assert!(AllocatorConfig::from_lookup(lookup_from(&[(CAPACITY_ENV, "0")])).is_err());
    assert!(AllocatorConfig::from_lookup(lookup_from(&[(SEARCH_ENV, "random")])).is_err());
  }
}
