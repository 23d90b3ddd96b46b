//! Workload oracle: open-review counts per user.

use std::collections::HashMap;

use crate::errors::ReviewError;

/// Per-user review load, computed inside a store transaction.
pub trait WorkloadOracle {
    /// Map every id in `user_ids` to the number of `OPEN` pull requests on
    /// which that user is an assigned reviewer. Ids with no such pull
    /// requests map to 0. An empty input yields an empty map without
    /// touching the store.
    fn workload(&self, user_ids: &[String]) -> Result<HashMap<String, u32>, ReviewError>;
}
