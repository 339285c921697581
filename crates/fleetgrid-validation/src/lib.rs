//! fleetgrid-validation — deciding whether machines may be assigned.
//!
//! Two layers:
//!
//! - [`rules`]: pure checks over machine records (availability, exclusivity,
//!   team, target identifiers) and the bulk partition built from them.
//! - [`exclusivity`]: the authoritative answer from the assignment service,
//!   fronted by a TTL [`cache`] and bounded by a hard timeout. Anything the
//!   service does not answer in time is treated as unavailable.
//!
//! [`debounce`] coalesces bursts of rule validation into one evaluation per
//! window.

pub mod cache;
pub mod debounce;
pub mod exclusivity;
pub mod rules;

pub use cache::{CacheConfig, CachedAvailability, ValidationCache};
pub use debounce::DebouncedValidator;
pub use exclusivity::{AvailabilityReport, ExclusivityChecker, MachineConflict, parse_conflict};
pub use rules::{BulkRuleOptions, validate_assignment, validate_bulk, validate_for_kind};
