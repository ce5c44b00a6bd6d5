//! Static step graph configuration.
//!
//! - `config` -- per-kind routing entries (`on_success`, `on_failure`,
//!   AND-join `prerequisites`, `read_data_from` data edges), chain routing,
//!   and graph consistency validation.

pub mod config;

pub use config::{
    StepRoute, all_step_kinds, chain_for, init_kind, route_for, validate_graph,
};
